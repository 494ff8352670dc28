use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lasercut_config::{AppConfig, PreviewFailurePolicy};
use lasercut_core::catalog::{InMemoryCatalog, MaterialEntry, SharedCatalog, ThicknessEntry};
use lasercut_engine::QuoteError;
use lasercut_engine::pricing::QuoteRequest;
use lasercut_engine::service::{QuoteService, Upload};

fn fixture(name: &str) -> Upload {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name);
    let bytes = fs::read(&path).expect("读取测试图纸失败");
    Upload::new(name, bytes)
}

fn material(name: &str) -> MaterialEntry {
    MaterialEntry {
        name: name.to_string(),
        kind: Some("steel".to_string()),
        density: 8.0,
        price_per_kg: 5000.0,
        thicknesses: vec![ThicknessEntry {
            thickness_mm: 2.0,
            extra_price_per_m2: 0.0,
            finishes: Vec::new(),
        }],
    }
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new([material("Acero Inoxidable"), material("Acero Carbono")])
        .expect("构建目录失败")
}

fn service_with(config: &AppConfig) -> QuoteService {
    QuoteService::from_config(config, Arc::new(catalog())).expect("构建服务失败")
}

fn service() -> QuoteService {
    service_with(&AppConfig::default())
}

#[test]
fn analyze_reports_dimensions_and_preview() {
    let analysis = service().analyze(&fixture("bracket.dxf")).expect("分析失败");
    assert_eq!(analysis.filename, "bracket.dxf");
    assert!((analysis.width_mm - 120.0).abs() < 1e-9);
    assert!((analysis.height_mm - 80.0).abs() < 1e-9);

    let encoded = analysis.preview_image_base64.expect("应包含预览");
    let svg = String::from_utf8(STANDARD.decode(encoded).expect("base64 无效")).expect("UTF-8");
    assert!(svg.contains(".outer-silhouette{fill:#e0e0e0;fill-rule:evenodd}"));
    assert_eq!(svg.matches("class=\"outer-silhouette\"").count(), 1);
    assert_eq!(svg.matches("<circle").count(), 2);
    assert!(!svg.contains("NaN"));
}

#[test]
fn analysis_serializes_with_camel_case_fields() {
    let analysis = service().analyze(&fixture("bracket.dxf")).expect("分析失败");
    let json = serde_json::to_value(&analysis).expect("序列化失败");
    assert_eq!(json["filename"], "bracket.dxf");
    assert_eq!(json["widthMm"], 120.0);
    assert_eq!(json["heightMm"], 80.0);
    assert!(json["previewImageBase64"].is_string());
}

#[test]
fn quote_prices_the_drawing() {
    let request = QuoteRequest::new(2.0, "  acero inoxidable ", 5, "MM");
    let result = service()
        .quote(&fixture("bracket.dxf"), &request)
        .expect("报价失败");

    // 120 × 80 × 2 × 8 / 1e6 = 0.1536 kg
    assert_eq!(result.weight_kg.to_string(), "0.1536");
    assert_eq!(result.unit_price.to_string(), "768.00");
    assert_eq!(result.total_price.to_string(), "3840.00");
    assert_eq!(result.width_mm.to_string(), "120.00");
    assert_eq!(result.height_mm.to_string(), "80.00");
    assert_eq!(result.unit, "mm");
    assert_eq!(result.quantity, 5);

    let json = serde_json::to_value(&result).expect("序列化失败");
    for key in [
        "material",
        "widthMm",
        "heightMm",
        "thicknessMm",
        "weightKg",
        "unitPrice",
        "quantity",
        "unit",
        "totalPrice",
    ] {
        assert!(json.get(key).is_some(), "缺少字段 {key}");
    }
}

#[test]
fn centimeter_drawings_are_scaled() {
    let request = QuoteRequest::new(2.0, "Acero Carbono", 1, "cm");
    let result = service()
        .quote(&fixture("bracket.dxf"), &request)
        .expect("报价失败");
    assert_eq!(result.width_mm.to_string(), "1200.00");
    assert_eq!(result.height_mm.to_string(), "800.00");
    assert_eq!(result.weight_kg.to_string(), "15.3600");
}

#[test]
fn open_arc_is_invalid_geometry() {
    let err = service()
        .analyze(&fixture("open_slot.dxf"))
        .expect_err("未闭合的圆弧应失败");
    match err {
        QuoteError::InvalidGeometry(message) => {
            assert!(message.contains("SLOTS"));
            assert!(message.contains("270"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn upload_checks_run_before_parsing() {
    let svc = service();
    assert!(matches!(
        svc.analyze(&Upload::new("bracket.dxf", Vec::new())),
        Err(QuoteError::EmptyUpload)
    ));
    let mut upload = fixture("bracket.dxf");
    upload.filename = "bracket.svg".to_string();
    assert!(matches!(
        svc.analyze(&upload),
        Err(QuoteError::UnsupportedFileType(_))
    ));
}

#[test]
fn malformed_upload_is_reported() {
    let upload = Upload::new("broken.dxf", b"0\nSECTION\n2\nENTITIES\n0\nLINE\n10\nabc\n".to_vec());
    assert!(matches!(
        service().analyze(&upload),
        Err(QuoteError::MalformedDrawing(_))
    ));
}

#[test]
fn unknown_material_fails_before_the_drawing_is_read() {
    let request = QuoteRequest::new(2.0, "Madera", 1, "mm");
    let upload = Upload::new("broken.dxf", b"not a drawing".to_vec());
    assert!(matches!(
        service().quote(&upload, &request),
        Err(QuoteError::UnknownMaterial(name)) if name == "Madera"
    ));
}

#[test]
fn invalid_unit_is_rejected() {
    let request = QuoteRequest::new(2.0, "Acero Carbono", 1, "in");
    assert!(matches!(
        service().quote(&fixture("bracket.dxf"), &request),
        Err(QuoteError::UnsupportedUnit(unit)) if unit == "in"
    ));
}

fn absurd_extent_upload() -> Upload {
    let text = "0\nSECTION\n2\nENTITIES\n0\nLINE\n10\n-1e308\n20\n-1e308\n11\n1e308\n21\n1e308\n0\nENDSEC\n0\nEOF\n";
    Upload::new("huge.dxf", text.as_bytes().to_vec())
}

#[test]
fn overflowing_extent_is_invalid_geometry() {
    assert!(matches!(
        service().analyze(&absurd_extent_upload()),
        Err(QuoteError::InvalidGeometry(_))
    ));
    let request = QuoteRequest::new(2.0, "Acero Inoxidable", 1, "mm");
    assert!(matches!(
        service().quote(&absurd_extent_upload(), &request),
        Err(QuoteError::InvalidGeometry(_))
    ));
}

/// 边距比例乘以图纸尺寸后溢出，图纸本身合法但预览无法生成。
fn broken_preview_config(policy: PreviewFailurePolicy) -> AppConfig {
    let mut config = AppConfig::default();
    config.preview.margin_ratio = 1e308;
    config.preview.on_failure = policy;
    config
}

#[test]
fn preview_failure_fails_analysis_by_default() {
    assert!(matches!(
        service_with(&broken_preview_config(PreviewFailurePolicy::Fail))
            .analyze(&fixture("bracket.dxf")),
        Err(QuoteError::PreviewGenerationFailed(_))
    ));
}

#[test]
fn preview_failure_can_be_omitted() {
    let service = service_with(&broken_preview_config(PreviewFailurePolicy::Omit));
    let rendered = service
        .analyze_rendered(&fixture("bracket.dxf"))
        .expect("省略预览时分析应成功");
    assert!(rendered.analysis.preview_image_base64.is_none());
    assert!(rendered.svg.is_none());
    assert!((rendered.analysis.width_mm - 120.0).abs() < 1e-9);

    // 报价不依赖预览。
    let request = QuoteRequest::new(2.0, "Acero Inoxidable", 1, "mm");
    assert!(service.quote(&fixture("bracket.dxf"), &request).is_ok());
}

#[test]
fn service_is_shareable_across_threads() {
    let svc = service();
    let upload = fixture("bracket.dxf");
    let request = QuoteRequest::new(2.0, "Acero Inoxidable", 3, "mm");
    let expected = svc.quote(&upload, &request).expect("报价失败");

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| svc.quote(&upload, &request).expect("报价失败")))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("线程崩溃"), expected);
        }
    });
}

#[test]
fn shared_catalog_refresh_is_visible_to_service() {
    let shared = Arc::new(SharedCatalog::new(catalog()));
    let svc = QuoteService::from_config(&AppConfig::default(), shared.clone())
        .expect("构建服务失败");
    let request = QuoteRequest::new(2.0, "Aluminio", 1, "mm");
    assert!(matches!(
        svc.quote(&fixture("bracket.dxf"), &request),
        Err(QuoteError::UnknownMaterial(_))
    ));

    shared.replace(InMemoryCatalog::new([material("Aluminio")]).expect("构建目录失败"));
    assert!(svc.quote(&fixture("bracket.dxf"), &request).is_ok());
    assert_eq!(svc.materials().len(), 1);
}
