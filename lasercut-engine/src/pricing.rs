use std::fmt;
use std::str::FromStr;

use lasercut_config::{PricingConfig, PricingSource};
use lasercut_core::catalog::{MaterialCatalog, MaterialEntry};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dimensions::Dimensions;
use crate::errors::QuoteError;

pub const MIN_QUANTITY: i64 = 1;
pub const MAX_QUANTITY: i64 = 30;

const WEIGHT_SCALE: u32 = 4;
const PRICE_SCALE: u32 = 2;
const LENGTH_SCALE: u32 = 2;
const MM3_PER_UNIT_WEIGHT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const MM2_PER_M2: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// 图纸尺寸的解释单位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Millimeters,
    Centimeters,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Millimeters => "mm",
            Unit::Centimeters => "cm",
        }
    }

    /// 换算到毫米的倍数。
    fn to_mm_factor(self) -> f64 {
        match self {
            Unit::Millimeters => 1.0,
            Unit::Centimeters => 10.0,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = QuoteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("mm") {
            Ok(Unit::Millimeters)
        } else if trimmed.eq_ignore_ascii_case("cm") {
            Ok(Unit::Centimeters)
        } else {
            Err(QuoteError::UnsupportedUnit(value.to_string()))
        }
    }
}

/// 调用方提交的报价参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub thickness_mm: f64,
    pub material: String,
    pub quantity: i64,
    pub unit: String,
    #[serde(default)]
    pub finish: Option<String>,
}

impl QuoteRequest {
    pub fn new(
        thickness_mm: f64,
        material: impl Into<String>,
        quantity: i64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            thickness_mm,
            material: material.into(),
            quantity,
            unit: unit.into(),
            finish: None,
        }
    }

    pub fn with_finish(mut self, finish: impl Into<String>) -> Self {
        self.finish = Some(finish.into());
        self
    }
}

/// 报价结果；十进制字段按固定小数位序列化为字符串。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    pub material: String,
    pub width_mm: Decimal,
    pub height_mm: Decimal,
    pub thickness_mm: Decimal,
    pub weight_kg: Decimal,
    pub unit_price: Decimal,
    pub quantity: i64,
    pub unit: String,
    pub total_price: Decimal,
}

/// 通过前置检查的请求。
#[derive(Debug, Clone)]
pub struct CheckedRequest {
    pub material: MaterialEntry,
    pub unit: Unit,
}

#[derive(Debug, Clone)]
pub struct PricingEngine {
    source: PricingSource,
    density_factor: f64,
    price_per_kg: f64,
    apply_surcharges: bool,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

impl PricingEngine {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            source: config.source,
            density_factor: config.density_factor,
            price_per_kg: config.price_per_kg,
            apply_surcharges: config.apply_surcharges,
        }
    }

    /// 依次检查材料、厚度、数量、单位，返回第一个失败项。
    pub fn check_request(
        &self,
        request: &QuoteRequest,
        catalog: &dyn MaterialCatalog,
    ) -> Result<CheckedRequest, QuoteError> {
        let material = catalog
            .find(&request.material)
            .ok_or_else(|| QuoteError::UnknownMaterial(request.material.clone()))?;
        if !request.thickness_mm.is_finite() || request.thickness_mm <= 0.0 {
            return Err(QuoteError::InvalidThickness(request.thickness_mm));
        }
        if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&request.quantity) {
            return Err(QuoteError::InvalidQuantity(request.quantity));
        }
        let unit = request.unit.parse::<Unit>()?;
        if let Some(finish) = request.finish.as_deref() {
            let available = material
                .thickness(request.thickness_mm)
                .and_then(|entry| entry.finish(finish))
                .is_some();
            if !available {
                return Err(QuoteError::UnknownFinish {
                    material: material.name.clone(),
                    finish: finish.to_string(),
                });
            }
        }
        Ok(CheckedRequest { material, unit })
    }

    pub fn quote(
        &self,
        dimensions: Dimensions,
        request: &QuoteRequest,
        catalog: &dyn MaterialCatalog,
    ) -> Result<QuoteResult, QuoteError> {
        let checked = self.check_request(request, catalog)?;
        self.price(dimensions, request, &checked)
    }

    /// 计算价格：重量 = 宽 × 高 × 厚 × 密度 / 1e6，单价 = 重量 × 每公斤价格，总价 = 单价 × 数量。
    pub fn price(
        &self,
        dimensions: Dimensions,
        request: &QuoteRequest,
        checked: &CheckedRequest,
    ) -> Result<QuoteResult, QuoteError> {
        let factor = checked.unit.to_mm_factor();
        let width = to_decimal(dimensions.width * factor, "width")?;
        let height = to_decimal(dimensions.height * factor, "height")?;
        let thickness = to_decimal(request.thickness_mm, "thickness")?;

        let (density, price_per_kg) = match self.source {
            PricingSource::Flat => (self.density_factor, self.price_per_kg),
            PricingSource::Catalog => (checked.material.density, checked.material.price_per_kg),
        };
        let density = to_decimal(density, "density")?;
        let price_per_kg = to_decimal(price_per_kg, "price per kg")?;

        let volume = mul(mul(width, height)?, thickness)?;
        let weight = div(mul(volume, density)?, MM3_PER_UNIT_WEIGHT)?;
        let mut unit_price = mul(weight, price_per_kg)?;
        if self.apply_surcharges {
            unit_price = add(unit_price, self.surcharge(width, height, request, checked)?)?;
        }
        let total = mul(unit_price, Decimal::from(request.quantity))?;

        let result = QuoteResult {
            material: request.material.clone(),
            width_mm: round_to(width, LENGTH_SCALE),
            height_mm: round_to(height, LENGTH_SCALE),
            thickness_mm: round_to(thickness, LENGTH_SCALE),
            weight_kg: round_to(weight, WEIGHT_SCALE),
            unit_price: round_to(unit_price, PRICE_SCALE),
            quantity: request.quantity,
            unit: checked.unit.as_str().to_string(),
            total_price: round_to(total, PRICE_SCALE),
        };
        debug!(
            material = %checked.material.name,
            weight = %result.weight_kg,
            unit_price = %result.unit_price,
            "价格计算完成"
        );
        Ok(result)
    }

    /// 厚度档位与表面处理的附加费：每平方米单价 × 板材面积（平方米）。
    fn surcharge(
        &self,
        width: Decimal,
        height: Decimal,
        request: &QuoteRequest,
        checked: &CheckedRequest,
    ) -> Result<Decimal, QuoteError> {
        let Some(tier) = checked.material.thickness(request.thickness_mm) else {
            debug!(
                material = %checked.material.name,
                thickness = request.thickness_mm,
                "目录中没有对应厚度档位，不计附加费"
            );
            return Ok(Decimal::ZERO);
        };
        let mut per_m2 = to_decimal(tier.extra_price_per_m2, "thickness surcharge")?;
        if let Some(finish) = request.finish.as_deref().and_then(|name| tier.finish(name)) {
            per_m2 = add(per_m2, to_decimal(finish.extra_price_per_m2, "finish surcharge")?)?;
        }
        let area_m2 = div(mul(width, height)?, MM2_PER_M2)?;
        mul(per_m2, area_m2)
    }
}

/// 按十进制字面量转换，避免二进制浮点的尾差进入金额计算。
fn to_decimal(value: f64, what: &str) -> Result<Decimal, QuoteError> {
    if !value.is_finite() {
        return Err(QuoteError::OutOfRange(format!("{what} is not finite")));
    }
    value
        .to_string()
        .parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .ok_or_else(|| QuoteError::OutOfRange(format!("{what} {value} exceeds decimal range")))
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, QuoteError> {
    a.checked_mul(b)
        .ok_or_else(|| QuoteError::OutOfRange(format!("{a} x {b} overflows")))
}

fn div(a: Decimal, b: Decimal) -> Result<Decimal, QuoteError> {
    a.checked_div(b)
        .ok_or_else(|| QuoteError::OutOfRange(format!("{a} / {b} is not representable")))
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal, QuoteError> {
    a.checked_add(b)
        .ok_or_else(|| QuoteError::OutOfRange(format!("{a} + {b} overflows")))
}

/// 四舍五入（远离零）并固定小数位。
fn round_to(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}
