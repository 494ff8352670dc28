use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lasercut_config::{AppConfig, ConfigError};
use lasercut_core::catalog::{MaterialCatalog, MaterialEntry};
use lasercut_engine::pricing::QuoteRequest;
use lasercut_engine::service::{QuoteService, Upload};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod catalog_source;

#[derive(Debug, Parser)]
#[command(name = "lasercut", version, about = "激光切割 DXF 图纸分析与报价")]
struct Cli {
    /// 配置文件路径，覆盖 `LASERCUT_CONFIG` 与默认位置
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 测量图纸尺寸并生成预览
    Analyze {
        file: PathBuf,
        /// 额外把 SVG 预览写到该路径
        #[arg(long)]
        svg_out: Option<PathBuf>,
    },
    /// 按材料、厚度和数量报价
    Quote {
        file: PathBuf,
        #[arg(long)]
        thickness: f64,
        #[arg(long)]
        material: String,
        #[arg(long)]
        quantity: i64,
        #[arg(long, default_value = "mm")]
        unit: String,
        #[arg(long)]
        finish: Option<String>,
    },
    /// 列出材料目录
    Materials,
}

fn main() {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.clone());
    init_logging(&config);
    info!("启动 lasercut");

    if let Err(err) = run(cli, &config) {
        error!(error = %format!("{err:#}"), "命令执行失败");
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: &AppConfig) -> Result<()> {
    let catalog = catalog_source::load_catalog(&config.catalog).context("加载材料目录失败")?;
    let catalog: Arc<dyn MaterialCatalog> = Arc::new(catalog);
    let service =
        QuoteService::from_config(config, catalog).context("预览样式配置无效")?;

    match cli.command {
        Command::Analyze { file, svg_out } => {
            let upload = read_upload(&file)?;
            let rendered = service
                .analyze_rendered(&upload)
                .with_context(|| format!("分析 {} 失败", file.display()))?;
            if let Some(path) = svg_out {
                match &rendered.svg {
                    Some(svg) => {
                        fs::write(&path, svg)
                            .with_context(|| format!("写入预览 {} 失败", path.display()))?;
                        info!(path = %path.display(), "已写出 SVG 预览");
                    }
                    None => warn!(path = %path.display(), "预览已省略，未写出 SVG 文件"),
                }
            }
            print_json(&rendered.analysis)
        }
        Command::Quote {
            file,
            thickness,
            material,
            quantity,
            unit,
            finish,
        } => {
            let upload = read_upload(&file)?;
            let mut request = QuoteRequest::new(thickness, material, quantity, unit);
            if let Some(finish) = finish {
                request = request.with_finish(finish);
            }
            let result = service
                .quote(&upload, &request)
                .with_context(|| format!("报价 {} 失败", file.display()))?;
            print_json(&result)
        }
        Command::Materials => {
            let listing: Vec<MaterialListing> =
                service.materials().iter().map(MaterialListing::from).collect();
            print_json(&listing)
        }
    }
}

/// 目录输出：在原始条目上补充英寸厚度。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MaterialListing {
    name: String,
    kind: Option<String>,
    density: f64,
    price_per_kg: f64,
    thicknesses: Vec<ThicknessListing>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThicknessListing {
    thickness_mm: f64,
    thickness_inch: f64,
    extra_price_per_m2: f64,
    finishes: Vec<String>,
}

impl From<&MaterialEntry> for MaterialListing {
    fn from(entry: &MaterialEntry) -> Self {
        Self {
            name: entry.name.clone(),
            kind: entry.kind.clone(),
            density: entry.density,
            price_per_kg: entry.price_per_kg,
            thicknesses: entry
                .thicknesses
                .iter()
                .map(|tier| ThicknessListing {
                    thickness_mm: tier.thickness_mm,
                    thickness_inch: tier.thickness_inch(),
                    extra_price_per_m2: tier.extra_price_per_m2,
                    finishes: tier.finishes.iter().map(|f| f.name.clone()).collect(),
                })
                .collect(),
        }
    }
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("读取图纸 {} 失败", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Upload::new(filename, bytes))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("序列化输出失败")?;
    println!("{text}");
    Ok(())
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } | ConfigError::Invalid { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_writer(std::io::stderr).with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
