use serde::Serialize;

use crate::validation::ValidatedDocument;

/// 图纸的整体宽高（图纸单位，不做换算）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

pub fn extract(document: &ValidatedDocument) -> Dimensions {
    let bounds = document.bounds();
    Dimensions {
        width: bounds.width(),
        height: bounds.height(),
    }
}
