use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "LASERCUT_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `LASERCUT_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 检查数值型配置项；非法值在加载阶段即报错，而不是在报价时。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pricing = &self.pricing;
        require_positive("pricing.density_factor", pricing.density_factor)?;
        require_positive("pricing.price_per_kg", pricing.price_per_kg)?;

        let preview = &self.preview;
        require_non_negative("preview.margin_ratio", preview.margin_ratio)?;
        require_positive("preview.stroke_width_ratio", preview.stroke_width_ratio)?;
        if preview.silhouette_class.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "preview.silhouette_class 不能为空".to_string(),
            });
        }
        Ok(())
    }
}

fn require_positive(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            message: format!("{key} 必须为正数（当前值：{value}）"),
        })
    }
}

fn require_non_negative(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            message: format!("{key} 不能为负数（当前值：{value}）"),
        })
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 报价时密度与单价的来源。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingSource {
    /// 所有材料使用全局密度系数与每公斤单价。
    #[default]
    Flat,
    /// 使用目录中材料自身的密度与单价。
    Catalog,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub source: PricingSource,
    #[serde(default = "PricingConfig::default_density_factor")]
    pub density_factor: f64,
    #[serde(default = "PricingConfig::default_price_per_kg")]
    pub price_per_kg: f64,
    /// 是否叠加厚度档位与表面处理的每平方米附加费。
    #[serde(default)]
    pub apply_surcharges: bool,
}

impl PricingConfig {
    fn default_density_factor() -> f64 {
        8.0
    }

    fn default_price_per_kg() -> f64 {
        5000.0
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            source: PricingSource::default(),
            density_factor: Self::default_density_factor(),
            price_per_kg: Self::default_price_per_kg(),
            apply_surcharges: false,
        }
    }
}

/// 预览生成失败时的处理方式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewFailurePolicy {
    /// 整个分析请求失败。
    #[default]
    Fail,
    /// 返回尺寸，预览字段为空。
    Omit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "PreviewConfig::default_silhouette_class")]
    pub silhouette_class: String,
    #[serde(default = "PreviewConfig::default_silhouette_fill")]
    pub silhouette_fill: String,
    #[serde(default = "PreviewConfig::default_hole_fill")]
    pub hole_fill: String,
    #[serde(default = "PreviewConfig::default_stroke")]
    pub stroke: String,
    /// 视图边距，占图纸最大边长的比例。
    #[serde(default = "PreviewConfig::default_margin_ratio")]
    pub margin_ratio: f64,
    #[serde(default = "PreviewConfig::default_stroke_width_ratio")]
    pub stroke_width_ratio: f64,
    #[serde(default)]
    pub on_failure: PreviewFailurePolicy,
}

impl PreviewConfig {
    fn default_silhouette_class() -> String {
        "outer-silhouette".to_string()
    }

    fn default_silhouette_fill() -> String {
        "#e0e0e0".to_string()
    }

    fn default_hole_fill() -> String {
        "#ffffff".to_string()
    }

    fn default_stroke() -> String {
        "#000000".to_string()
    }

    fn default_margin_ratio() -> f64 {
        0.02
    }

    fn default_stroke_width_ratio() -> f64 {
        0.002
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            silhouette_class: Self::default_silhouette_class(),
            silhouette_fill: Self::default_silhouette_fill(),
            hole_fill: Self::default_hole_fill(),
            stroke: Self::default_stroke(),
            margin_ratio: Self::default_margin_ratio(),
            stroke_width_ratio: Self::default_stroke_width_ratio(),
            on_failure: PreviewFailurePolicy::default(),
        }
    }
}

/// 材料目录文件位置；为空时由前端按约定路径查找。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("配置无效: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.pricing.source, PricingSource::Flat);
        assert_eq!(cfg.pricing.density_factor, 8.0);
        assert_eq!(cfg.pricing.price_per_kg, 5000.0);
        assert!(!cfg.pricing.apply_surcharges);
        assert_eq!(cfg.preview.silhouette_class, "outer-silhouette");
        assert_eq!(cfg.preview.on_failure, PreviewFailurePolicy::Fail);
        assert!(cfg.catalog.path.is_none());
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r##"
            [logging]
            level = "debug"

            [pricing]
            source = "catalog"
            apply_surcharges = true

            [preview]
            silhouette_class = "pieza-principal"
            hole_fill = "#fafafa"
            on_failure = "omit"

            [catalog]
            path = "../catalog.toml"
            "##
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.pricing.source, PricingSource::Catalog);
        assert!(cfg.pricing.apply_surcharges);
        assert_eq!(cfg.pricing.density_factor, 8.0);
        assert_eq!(cfg.preview.silhouette_class, "pieza-principal");
        assert_eq!(cfg.preview.hole_fill, "#fafafa");
        assert_eq!(cfg.preview.silhouette_fill, "#e0e0e0");
        assert_eq!(cfg.preview.on_failure, PreviewFailurePolicy::Omit);
        assert_eq!(
            cfg.catalog
                .path
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("../catalog.toml".to_string())
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [pricing]
            price_per_kg = -1.0
            "#
        )
        .unwrap();

        let err = AppConfig::from_file(file.path()).expect_err("negative price must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unknown_enum_value_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [preview]
            on_failure = "ignore"
            "#
        )
        .unwrap();

        let err = AppConfig::from_file(file.path()).expect_err("unknown policy must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn shipped_default_config_matches_builtin_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("config")
            .join("default.toml");
        let cfg = AppConfig::from_file(&path).expect("load shipped config");
        let builtin = AppConfig::default();
        assert_eq!(cfg.pricing.density_factor, builtin.pricing.density_factor);
        assert_eq!(cfg.pricing.price_per_kg, builtin.pricing.price_per_kg);
        assert_eq!(cfg.preview.silhouette_class, builtin.preview.silhouette_class);
        assert_eq!(cfg.preview.on_failure, builtin.preview.on_failure);
        assert!(cfg.catalog.path.is_some());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AppConfig::from_file("/definitely/not/here.toml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
