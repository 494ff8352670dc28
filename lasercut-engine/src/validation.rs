use std::fmt;
use std::ops::Deref;

use lasercut_core::document::GeometryDocument;
use lasercut_core::geometry::Bounds2D;
use tracing::warn;

use crate::errors::QuoteError;

/// 圆弧总角度与 360° 的允许偏差（度）。
pub const ARC_ANGLE_TOLERANCE_DEG: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    EmptyDocument,
    OpenArc {
        layer: String,
        total_angle_degrees: f64,
    },
    DegenerateBounds {
        width: f64,
        height: f64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyDocument => write!(f, "drawing contains no cuttable entities"),
            Violation::OpenArc {
                layer,
                total_angle_degrees,
            } => write!(
                f,
                "arc on layer `{layer}` is not closed (total angle {total_angle_degrees:.3}°)"
            ),
            Violation::DegenerateBounds { width, height } => write!(
                f,
                "drawing has a degenerate bounding box ({width} x {height})"
            ),
        }
    }
}

/// 通过校验的文档，携带已计算的整体范围。后续阶段只接受该类型。
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    document: GeometryDocument,
    bounds: Bounds2D,
}

impl ValidatedDocument {
    #[inline]
    pub fn document(&self) -> &GeometryDocument {
        &self.document
    }

    #[inline]
    pub fn bounds(&self) -> Bounds2D {
        self.bounds
    }

    pub fn into_inner(self) -> GeometryDocument {
        self.document
    }
}

impl Deref for ValidatedDocument {
    type Target = GeometryDocument;

    fn deref(&self) -> &Self::Target {
        &self.document
    }
}

/// 收集文档中的全部违规项，不做任何修复。
pub fn collect_violations(document: &GeometryDocument) -> Vec<Violation> {
    let mut violations = Vec::new();
    if document.is_empty() {
        violations.push(Violation::EmptyDocument);
        return violations;
    }

    for arc in document.arcs() {
        if (arc.total_angle_degrees - 360.0).abs() > ARC_ANGLE_TOLERANCE_DEG {
            warn!(
                layer = arc.layer,
                total_angle = arc.total_angle_degrees,
                "圆弧未闭合"
            );
            violations.push(Violation::OpenArc {
                layer: arc.layer.to_string(),
                total_angle_degrees: arc.total_angle_degrees,
            });
        }
    }

    match document.bounds() {
        Some(bounds) if has_measurable_extent(&bounds) => {}
        Some(bounds) => violations.push(Violation::DegenerateBounds {
            width: bounds.width(),
            height: bounds.height(),
        }),
        None => violations.push(Violation::DegenerateBounds {
            width: 0.0,
            height: 0.0,
        }),
    }
    violations
}

/// 宽高必须为正的有限值；坐标本身有限但跨度溢出 f64 的图纸同样无效。
fn has_measurable_extent(bounds: &Bounds2D) -> bool {
    let (width, height) = (bounds.width(), bounds.height());
    bounds.is_finite() && width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0
}

pub fn validate(document: GeometryDocument) -> Result<ValidatedDocument, QuoteError> {
    let violations = collect_violations(&document);
    if !violations.is_empty() {
        let message = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(QuoteError::InvalidGeometry(message));
    }
    let bounds = document
        .bounds()
        .ok_or_else(|| QuoteError::InvalidGeometry("drawing has no measurable extent".into()))?;
    Ok(ValidatedDocument { document, bounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasercut_core::geometry::Point2;

    fn plate() -> GeometryDocument {
        let mut doc = GeometryDocument::new();
        doc.add_polyline(
            [
                Point2::new(0.0, 0.0),
                Point2::new(100.0, 0.0),
                Point2::new(100.0, 50.0),
                Point2::new(0.0, 50.0),
            ],
            true,
            "CUT",
        );
        doc
    }

    fn with_arc(degrees: f64) -> GeometryDocument {
        let mut doc = plate();
        doc.add_arc(Point2::new(50.0, 25.0), 5.0, 0.0, degrees.to_radians(), "HOLES");
        doc
    }

    #[test]
    fn closed_arcs_within_tolerance_pass() {
        assert!(validate(with_arc(360.0)).is_ok());
        assert!(validate(with_arc(359.995)).is_ok());
        assert!(validate(with_arc(360.009)).is_ok());
    }

    #[test]
    fn arcs_outside_tolerance_fail() {
        for degrees in [359.98, 360.02, 180.0] {
            let err = validate(with_arc(degrees)).unwrap_err();
            match err {
                QuoteError::InvalidGeometry(message) => assert!(message.contains("HOLES")),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn equal_start_and_end_angles_are_open() {
        let mut doc = plate();
        doc.add_arc(Point2::new(50.0, 25.0), 5.0, 1.0, 1.0, "HOLES");
        let violations = collect_violations(&doc);
        assert_eq!(violations.len(), 1);
        assert!(matches!(violations[0], Violation::OpenArc { .. }));
    }

    #[test]
    fn all_violations_are_reported() {
        let mut doc = plate();
        doc.add_arc(Point2::new(10.0, 10.0), 2.0, 0.0, 1.0, "A");
        doc.add_arc(Point2::new(20.0, 10.0), 2.0, 0.0, 2.0, "B");
        let err = validate(doc).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`A`"));
        assert!(message.contains("`B`"));
    }

    #[test]
    fn empty_document_is_rejected() {
        let violations = collect_violations(&GeometryDocument::new());
        assert_eq!(violations, vec![Violation::EmptyDocument]);
        assert!(matches!(
            validate(GeometryDocument::new()),
            Err(QuoteError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn zero_height_document_is_rejected() {
        let mut doc = GeometryDocument::new();
        doc.add_line(Point2::new(0.0, 5.0), Point2::new(10.0, 5.0), "0");
        let violations = collect_violations(&doc);
        assert!(matches!(
            violations.as_slice(),
            [Violation::DegenerateBounds { height, .. }] if *height == 0.0
        ));
    }

    #[test]
    fn overflowing_extent_is_rejected() {
        let mut doc = GeometryDocument::new();
        doc.add_line(
            Point2::new(-1e308, -1e308),
            Point2::new(1e308, 1e308),
            "0",
        );
        let violations = collect_violations(&doc);
        assert!(matches!(
            violations.as_slice(),
            [Violation::DegenerateBounds { width, height }]
                if width.is_infinite() && height.is_infinite()
        ));
        assert!(matches!(validate(doc), Err(QuoteError::InvalidGeometry(_))));
    }

    #[test]
    fn validated_document_exposes_same_document() {
        let validated = validate(plate()).expect("valid");
        assert_eq!(validated.entity_count(), 1);
        assert_eq!(validated.bounds().width(), 100.0);
        assert_eq!(validated.into_inner().entity_count(), 1);
    }
}
