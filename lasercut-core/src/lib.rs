pub mod catalog;

pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，坐标单位与图纸单位一致。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于估算文档/实体范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        /// 宽度取绝对跨度，空边界框返回 0。
        #[inline]
        pub fn width(&self) -> f64 {
            if self.is_empty() {
                return 0.0;
            }
            (self.max.x() - self.min.x()).abs()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            if self.is_empty() {
                return 0.0;
            }
            (self.max.y() - self.min.y()).abs()
        }

        #[inline]
        pub fn area(&self) -> f64 {
            self.width() * self.height()
        }

        #[inline]
        pub fn is_finite(&self) -> bool {
            self.min.is_finite() && self.max.is_finite()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }
    }
}

pub mod document {
    use std::collections::HashMap;
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, Point2, Vector2};

    /// DXF 默认图层名。
    pub const DEFAULT_LAYER: &str = "0";

    /// 低于该阈值的 bulge 视为直线段。
    pub const BULGE_EPSILON: f64 = 1e-9;

    /// 图层按名称分组实体，实体顺序与文件中出现的顺序一致。
    #[derive(Debug, Clone, Serialize)]
    pub struct Layer {
        pub name: String,
        entities: Vec<Entity>,
    }

    impl Layer {
        #[inline]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                entities: Vec::new(),
            }
        }

        #[inline]
        pub fn entities(&self) -> &[Entity] {
            &self.entities
        }
    }

    /// 可切割的几何图元。集合是封闭的：解析器遇到其它实体类型时直接跳过。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Entity {
        Line(Line),
        Arc(Arc),
        Circle(Circle),
        Polyline(Polyline),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Line(line) => &line.layer,
                Entity::Arc(arc) => &arc.layer,
                Entity::Circle(circle) => &circle.layer,
                Entity::Polyline(polyline) => &polyline.layer,
            }
        }

        #[inline]
        pub fn kind(&self) -> &'static str {
            match self {
                Entity::Line(_) => "LINE",
                Entity::Arc(_) => "ARC",
                Entity::Circle(_) => "CIRCLE",
                Entity::Polyline(_) => "POLYLINE",
            }
        }

        /// 计算实体的 2D 轴对齐范围；圆弧与 bulge 段按真实几何外扩到象限点。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            match self {
                Entity::Line(line) => {
                    bounds.include_point(line.start);
                    bounds.include_point(line.end);
                }
                Entity::Circle(circle) => {
                    let radius = circle.radius.abs();
                    let center = circle.center;
                    bounds.include_point(Point2::new(center.x() - radius, center.y() - radius));
                    bounds.include_point(Point2::new(center.x() + radius, center.y() + radius));
                }
                Entity::Arc(arc) => {
                    arc_bounds(arc, &mut bounds);
                }
                Entity::Polyline(polyline) => {
                    return polyline.bounds();
                }
            }
            if bounds.is_empty() {
                None
            } else {
                Some(bounds)
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Line {
        pub start: Point2,
        pub end: Point2,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
        pub layer: String,
    }

    /// 圆弧实体，角度以弧度形式储存，从起始角逆时针扫到终止角。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Arc {
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
        pub layer: String,
    }

    impl Arc {
        /// 圆弧扫过的总角度（度）。终止角小于起始角时跨越 0°，
        /// 起止角相等时结果为 0。
        pub fn total_angle_degrees(&self) -> f64 {
            let start = self.start_angle.to_degrees();
            let end = self.end_angle.to_degrees();
            if end < start {
                (360.0 + end) - start
            } else {
                (end - start).abs()
            }
        }

        #[inline]
        pub fn point_at(&self, angle: f64) -> Point2 {
            arc_point(self.center, self.radius.abs(), angle)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<PolylineVertex>,
        pub is_closed: bool,
        pub layer: String,
    }

    impl Polyline {
        /// 顶点及 bulge 圆弧段共同决定的范围，闭合多段线包含首尾连接段。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            for vertex in &self.vertices {
                bounds.include_point(vertex.position);
            }
            for (start, end) in self.segments() {
                if let Some(arc) = bulge_arc(start.position, end.position, start.bulge) {
                    arc_bounds(&arc, &mut bounds);
                }
            }
            if bounds.is_empty() {
                None
            } else {
                Some(bounds)
            }
        }

        /// 依次返回相邻顶点对；闭合时追加末点到首点的段。
        pub fn segments(&self) -> impl Iterator<Item = (&PolylineVertex, &PolylineVertex)> + '_ {
            let closing = if self.is_closed && self.vertices.len() > 1 {
                self.vertices.last().zip(self.vertices.first())
            } else {
                None
            };
            self.vertices
                .windows(2)
                .map(|pair| (&pair[0], &pair[1]))
                .chain(closing)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PolylineVertex {
        pub position: Point2,
        pub bulge: f64,
    }

    impl PolylineVertex {
        #[inline]
        pub fn new(position: Point2) -> Self {
            Self {
                position,
                bulge: 0.0,
            }
        }

        #[inline]
        pub fn with_bulge(position: Point2, bulge: f64) -> Self {
            Self { position, bulge }
        }
    }

    /// 校验器使用的圆弧摘要。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct ArcRecord<'a> {
        pub layer: &'a str,
        pub total_angle_degrees: f64,
    }

    /// 单次上传解析出的几何文档，解析完成后只读。
    #[derive(Debug, Default, Clone, Serialize)]
    pub struct GeometryDocument {
        layers: Vec<Layer>,
        #[serde(skip)]
        layer_index: HashMap<String, usize>,
        skipped_entities: usize,
        insert_units: Option<i16>,
    }

    impl GeometryDocument {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_entity(&mut self, entity: Entity) {
            let index = self.ensure_layer(entity.layer_name());
            self.layers[index].entities.push(entity);
        }

        pub fn add_line(&mut self, start: Point2, end: Point2, layer: impl Into<String>) {
            self.add_entity(Entity::Line(Line {
                start,
                end,
                layer: layer.into(),
            }));
        }

        pub fn add_circle(&mut self, center: Point2, radius: f64, layer: impl Into<String>) {
            self.add_entity(Entity::Circle(Circle {
                center,
                radius,
                layer: layer.into(),
            }));
        }

        pub fn add_arc(
            &mut self,
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
            layer: impl Into<String>,
        ) {
            self.add_entity(Entity::Arc(Arc {
                center,
                radius,
                start_angle,
                end_angle,
                layer: layer.into(),
            }));
        }

        pub fn add_polyline(
            &mut self,
            points: impl IntoIterator<Item = Point2>,
            is_closed: bool,
            layer: impl Into<String>,
        ) {
            let vertices = points.into_iter().map(PolylineVertex::new).collect();
            self.add_entity(Entity::Polyline(Polyline {
                vertices,
                is_closed,
                layer: layer.into(),
            }));
        }

        fn ensure_layer(&mut self, name: &str) -> usize {
            if let Some(index) = self.layer_index.get(name) {
                return *index;
            }
            let index = self.layers.len();
            self.layers.push(Layer::new(name));
            self.layer_index.insert(name.to_string(), index);
            index
        }

        #[inline]
        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.iter()
        }

        #[inline]
        pub fn layer(&self, name: &str) -> Option<&Layer> {
            self.layer_index.get(name).map(|index| &self.layers[*index])
        }

        /// 按图层顺序遍历全部实体。
        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &Entity> {
            self.layers.iter().flat_map(|layer| layer.entities.iter())
        }

        #[inline]
        pub fn entity_count(&self) -> usize {
            self.layers.iter().map(|layer| layer.entities.len()).sum()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.entity_count() == 0
        }

        pub fn arcs(&self) -> impl Iterator<Item = ArcRecord<'_>> {
            self.layers.iter().flat_map(|layer| {
                layer.entities.iter().filter_map(move |entity| match entity {
                    Entity::Arc(arc) => Some(ArcRecord {
                        layer: &layer.name,
                        total_angle_degrees: arc.total_angle_degrees(),
                    }),
                    _ => None,
                })
            })
        }

        pub fn bounds(&self) -> Option<Bounds2D> {
            merge_bounds(self.entities())
        }

        #[inline]
        pub fn record_skipped_entity(&mut self) {
            self.skipped_entities += 1;
        }

        /// 解析时跳过的非切割实体数量（TEXT、DIMENSION 等）。
        #[inline]
        pub fn skipped_entities(&self) -> usize {
            self.skipped_entities
        }

        #[inline]
        pub fn set_insert_units(&mut self, units: i16) {
            self.insert_units = Some(units);
        }

        /// 头段 `$INSUNITS` 声明的单位代码，仅供参考，不参与换算。
        #[inline]
        pub fn insert_units(&self) -> Option<i16> {
            self.insert_units
        }
    }

    fn merge_bounds<'a>(entities: impl Iterator<Item = &'a Entity>) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        let mut has = false;
        for entity in entities {
            if let Some(entity_bounds) = entity.bounds() {
                bounds.include_bounds(&entity_bounds);
                has = true;
            }
        }
        if has { Some(bounds) } else { None }
    }

    /// 将 bulge 段转换为等价圆弧（逆时针方向存储）。直线段或退化弦返回 `None`。
    pub fn bulge_arc(start: Point2, end: Point2, bulge: f64) -> Option<Arc> {
        if bulge.abs() <= BULGE_EPSILON {
            return None;
        }
        let start_vec = start.as_vec2();
        let end_vec = end.as_vec2();
        let chord = end_vec - start_vec;
        let chord_len = chord.length();
        if chord_len <= f64::EPSILON {
            return None;
        }

        let theta = 4.0 * bulge.atan();
        let left_normal = DVec2::new(-chord.y, chord.x) / chord_len;
        let offset = chord_len * 0.5 * (1.0 - bulge * bulge) / (2.0 * bulge);
        let center_vec = (start_vec + end_vec) * 0.5 + left_normal * offset;
        let radius = (start_vec - center_vec).length();

        let start_dir = start_vec - center_vec;
        let from = start_dir.y.atan2(start_dir.x);
        let (start_angle, end_angle) = if theta >= 0.0 {
            (from, from + theta)
        } else {
            (from + theta, from)
        };
        Some(Arc {
            center: Point2::from_vec(center_vec),
            radius,
            start_angle,
            end_angle,
            layer: String::new(),
        })
    }

    fn normalize_angle(angle: f64) -> f64 {
        let mut result = angle % TAU;
        if result < 0.0 {
            result += TAU;
        }
        result
    }

    /// 规范化到 [start, end]，end 不小于 start；相等时视为整圆。
    pub fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
        let start = normalize_angle(start);
        let mut end = normalize_angle(end);
        if (end - start).abs() < 1e-9 {
            end = start + TAU;
        } else if end < start {
            end += TAU;
        }
        (start, end)
    }

    fn arc_point(center: Point2, radius: f64, angle: f64) -> Point2 {
        let offset = Vector2::new(radius * angle.cos(), radius * angle.sin());
        center.translate(offset)
    }

    fn arc_bounds(arc: &Arc, bounds: &mut Bounds2D) {
        let radius = arc.radius.abs();
        if radius <= f64::EPSILON {
            bounds.include_point(arc.center);
            return;
        }

        let (start, end) = canonical_interval(arc.start_angle, arc.end_angle);
        bounds.include_point(arc_point(arc.center, radius, start));
        bounds.include_point(arc_point(arc.center, radius, end));

        const QUADRANTS: [f64; 4] = [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0];
        for base in QUADRANTS {
            let mut candidate = base;
            while candidate < start {
                candidate += TAU;
            }
            if candidate <= end {
                bounds.include_point(arc_point(arc.center, radius, candidate));
            }
        }
    }

}
