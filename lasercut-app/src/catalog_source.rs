use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use lasercut_config::CatalogConfig;
use lasercut_core::catalog::{CatalogError, InMemoryCatalog, MaterialEntry};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub const CATALOG_ENV: &str = "LASERCUT_CATALOG";

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    materials: Vec<MaterialEntry>,
}

#[derive(Debug, Error)]
pub enum CatalogSourceError {
    #[error("读取材料目录 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析材料目录 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("材料目录 {path:?} 无效: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: CatalogError,
    },
}

/// 按 `LASERCUT_CATALOG`、配置中的路径、`./config/catalog.toml` 的顺序寻找材料目录。
/// 都不存在时返回空目录。
pub fn load_catalog(config: &CatalogConfig) -> Result<InMemoryCatalog, CatalogSourceError> {
    match locate_catalog(config) {
        Some(path) => load_catalog_file(&path),
        None => {
            warn!("未找到材料目录文件，使用空目录");
            Ok(InMemoryCatalog::default())
        }
    }
}

pub fn load_catalog_file(path: &Path) -> Result<InMemoryCatalog, CatalogSourceError> {
    let content = fs::read_to_string(path).map_err(|source| CatalogSourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: CatalogFile = toml::from_str(&content).map_err(|source| CatalogSourceError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let catalog =
        InMemoryCatalog::new(file.materials).map_err(|source| CatalogSourceError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
    info!(path = %path.display(), materials = catalog.len(), "已加载材料目录");
    Ok(catalog)
}

fn locate_catalog(config: &CatalogConfig) -> Option<PathBuf> {
    if let Some(env_path) = env::var_os(CATALOG_ENV) {
        return Some(PathBuf::from(env_path));
    }
    if let Some(path) = config.path.as_ref() {
        return Some(path.clone());
    }
    let fallback = env::current_dir().ok()?.join("config").join("catalog.toml");
    fallback.is_file().then_some(fallback)
}
