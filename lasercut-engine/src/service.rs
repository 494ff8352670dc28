use std::sync::Arc;

use lasercut_config::{AppConfig, PreviewFailurePolicy};
use lasercut_core::catalog::{MaterialCatalog, MaterialEntry};
use lasercut_io::{DrawingLoader, DxfFacade};
use serde::Serialize;
use tracing::{info, warn};

use crate::dimensions::{self, Dimensions};
use crate::errors::QuoteError;
use crate::preview::{self, PreviewRenderer, StyleError};
use crate::pricing::{PricingEngine, QuoteRequest, QuoteResult};
use crate::validation::{self, ValidatedDocument};

const DXF_EXTENSION: &str = ".dxf";

/// 上传边界：原始文件名与字节。
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// 文件分析结果：尺寸与 base64 编码的 SVG 预览。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysis {
    pub filename: String,
    pub width_mm: f64,
    pub height_mm: f64,
    pub preview_image_base64: Option<String>,
}

/// 分析结果连同同一次渲染得到的 SVG 文本；预览被省略时 `svg` 为 `None`。
#[derive(Debug, Clone)]
pub struct RenderedAnalysis {
    pub analysis: FileAnalysis,
    pub svg: Option<String>,
}

/// 空文件优先于扩展名检查。
pub fn check_upload(upload: &Upload) -> Result<(), QuoteError> {
    if upload.bytes.is_empty() {
        return Err(QuoteError::EmptyUpload);
    }
    if !upload.filename.to_lowercase().ends_with(DXF_EXTENSION) {
        return Err(QuoteError::UnsupportedFileType(upload.filename.clone()));
    }
    Ok(())
}

/// 分析与报价流水线。内部无可变状态，可在多个线程间共享。
pub struct QuoteService {
    catalog: Arc<dyn MaterialCatalog>,
    loader: Box<dyn DrawingLoader>,
    pricing: PricingEngine,
    renderer: PreviewRenderer,
    preview_policy: PreviewFailurePolicy,
}

impl QuoteService {
    pub fn new(
        catalog: Arc<dyn MaterialCatalog>,
        loader: Box<dyn DrawingLoader>,
        pricing: PricingEngine,
        renderer: PreviewRenderer,
        preview_policy: PreviewFailurePolicy,
    ) -> Self {
        Self {
            catalog,
            loader,
            pricing,
            renderer,
            preview_policy,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        catalog: Arc<dyn MaterialCatalog>,
    ) -> Result<Self, StyleError> {
        Ok(Self::new(
            catalog,
            Box::new(DxfFacade::new()),
            PricingEngine::from_config(&config.pricing),
            PreviewRenderer::from_config(&config.preview)?,
            config.preview.on_failure,
        ))
    }

    /// 解析并校验上传的图纸；后续阶段都基于该结果。
    pub fn load(&self, upload: &Upload) -> Result<ValidatedDocument, QuoteError> {
        check_upload(upload)?;
        let document = self.loader.load_bytes(&upload.bytes)?;
        validation::validate(document)
    }

    pub fn analyze(&self, upload: &Upload) -> Result<FileAnalysis, QuoteError> {
        Ok(self.analyze_rendered(upload)?.analysis)
    }

    /// 只解析、渲染一次；base64 字段与返回的 SVG 文本出自同一份预览。
    pub fn analyze_rendered(&self, upload: &Upload) -> Result<RenderedAnalysis, QuoteError> {
        let document = self.load(upload)?;
        let Dimensions { width, height } = dimensions::extract(&document);
        let svg = self.render_preview(&document, &upload.filename)?;
        let preview_image_base64 = svg.as_deref().map(preview::encode_base64);

        info!(
            filename = %upload.filename,
            width,
            height,
            preview = preview_image_base64.is_some(),
            "图纸分析完成"
        );
        Ok(RenderedAnalysis {
            analysis: FileAnalysis {
                filename: upload.filename.clone(),
                width_mm: width,
                height_mm: height,
                preview_image_base64,
            },
            svg,
        })
    }

    pub fn quote(&self, upload: &Upload, request: &QuoteRequest) -> Result<QuoteResult, QuoteError> {
        let checked = self.pricing.check_request(request, self.catalog.as_ref())?;
        let document = self.load(upload)?;
        let dimensions = dimensions::extract(&document);
        let result = self.pricing.price(dimensions, request, &checked)?;

        info!(
            filename = %upload.filename,
            material = %result.material,
            width = %result.width_mm,
            height = %result.height_mm,
            thickness = %result.thickness_mm,
            weight = %result.weight_kg,
            unit_price = %result.unit_price,
            quantity = result.quantity,
            unit = %result.unit,
            total_price = %result.total_price,
            "报价计算完成"
        );
        Ok(result)
    }

    pub fn materials(&self) -> Vec<MaterialEntry> {
        self.catalog.materials()
    }

    fn render_preview(
        &self,
        document: &ValidatedDocument,
        filename: &str,
    ) -> Result<Option<String>, QuoteError> {
        match self.renderer.render_svg(document) {
            Ok(svg) => Ok(Some(svg)),
            Err(err) if self.preview_policy == PreviewFailurePolicy::Omit => {
                warn!(filename, error = %err, "预览生成失败，按配置省略预览");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
