//! SVG 预览：先构建结构化的 [`PreviewDocument`]，再一次性序列化。
//!
//! 图纸坐标为 Y 轴向上，SVG 为 Y 轴向下，所有输出坐标都经过 `y -> -y` 翻转。
//! 路径的外接矩形在图纸坐标中计算，翻转不影响面积比较。

use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lasercut_config::PreviewConfig;
use lasercut_core::document::{
    Arc, BULGE_EPSILON, Entity, Polyline, PolylineVertex, bulge_arc,
};
use lasercut_core::geometry::{Bounds2D, Point2};
use svg::Document as SvgDocument;
use svg::node::element::path::Data;
use svg::node::element::{Circle as SvgCircle, Group, Path as SvgPath, Style};
use thiserror::Error;
use tracing::debug;

use crate::errors::QuoteError;
use crate::validation::ValidatedDocument;

/// 端点拼接容差，相对于图纸最大边长。
const JOIN_TOLERANCE_RATIO: f64 = 1e-6;
const MIN_JOIN_TOLERANCE: f64 = 1e-9;
const FULL_CIRCLE_TOLERANCE_DEG: f64 = 0.01;
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

#[derive(Debug, Error, PartialEq)]
pub enum StyleError {
    #[error("`{0}` is not a valid CSS class name")]
    InvalidClass(String),
    #[error("`{0}` is not a valid colour value")]
    InvalidColor(String),
}

/// 预览样式块，附着在预览文档上并随文档一起序列化。
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewStyle {
    silhouette_class: String,
    silhouette_fill: String,
    hole_fill: String,
    stroke: String,
}

impl PreviewStyle {
    pub fn new(
        silhouette_class: impl Into<String>,
        silhouette_fill: impl Into<String>,
        hole_fill: impl Into<String>,
        stroke: impl Into<String>,
    ) -> Result<Self, StyleError> {
        let silhouette_class = silhouette_class.into();
        if !is_css_identifier(&silhouette_class) {
            return Err(StyleError::InvalidClass(silhouette_class));
        }
        let silhouette_fill = checked_color(silhouette_fill.into())?;
        let hole_fill = checked_color(hole_fill.into())?;
        let stroke = checked_color(stroke.into())?;
        Ok(Self {
            silhouette_class,
            silhouette_fill,
            hole_fill,
            stroke,
        })
    }

    pub fn from_config(config: &PreviewConfig) -> Result<Self, StyleError> {
        Self::new(
            config.silhouette_class.trim(),
            config.silhouette_fill.trim(),
            config.hole_fill.trim(),
            config.stroke.trim(),
        )
    }

    #[inline]
    pub fn silhouette_class(&self) -> &str {
        &self.silhouette_class
    }

    fn css(&self) -> String {
        format!(
            ".{}{{fill:{};fill-rule:evenodd}} circle{{fill:{}}}",
            self.silhouette_class, self.silhouette_fill, self.hole_fill
        )
    }
}

fn is_css_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '-' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

fn checked_color(value: String) -> Result<String, StyleError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '#' | '(' | ')' | ',' | '.' | '%' | ' '));
    if valid {
        Ok(value)
    } else {
        Err(StyleError::InvalidColor(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    MoveTo(Point2),
    LineTo(Point2),
    /// 圆弧段；`ccw` 指图纸坐标系中的逆时针方向。
    ArcTo {
        radius: f64,
        large_arc: bool,
        ccw: bool,
        to: Point2,
    },
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPath {
    pub commands: Vec<PathCommand>,
    /// 图纸坐标下的外接矩形；无法确定时为 `None`。
    pub bounds: Option<Bounds2D>,
    pub class: Option<String>,
}

impl PreviewPath {
    pub fn new(commands: Vec<PathCommand>, bounds: Option<Bounds2D>) -> Self {
        Self {
            commands,
            bounds,
            class: None,
        }
    }

    /// 外接矩形面积；范围无法确定时返回 -1。
    pub fn area(&self) -> f64 {
        match self.bounds {
            Some(bounds) if !bounds.is_empty() && bounds.is_finite() => bounds.area(),
            _ => -1.0,
        }
    }

    pub fn from_polyline(polyline: &Polyline) -> Self {
        let commands = chain_commands(&polyline.vertices, polyline.is_closed);
        Self::new(commands, polyline.bounds())
    }

    pub fn from_arc(arc: &Arc) -> Self {
        let radius = arc.radius.abs();
        let sweep = arc.total_angle_degrees();
        let start = arc.point_at(arc.start_angle);
        let mut commands = vec![PathCommand::MoveTo(start)];
        if (sweep - 360.0).abs() <= FULL_CIRCLE_TOLERANCE_DEG {
            // 起点与终点重合的圆弧无法用单个 SVG 弧段表示，拆成两个半圆。
            let opposite = arc.point_at(arc.start_angle + PI);
            commands.push(PathCommand::ArcTo {
                radius,
                large_arc: false,
                ccw: true,
                to: opposite,
            });
            commands.push(PathCommand::ArcTo {
                radius,
                large_arc: false,
                ccw: true,
                to: start,
            });
            commands.push(PathCommand::Close);
        } else {
            let end = arc.point_at(arc.start_angle + sweep.to_radians());
            commands.push(PathCommand::ArcTo {
                radius,
                large_arc: sweep > 180.0,
                ccw: true,
                to: end,
            });
        }
        Self::new(commands, Entity::Arc(arc.clone()).bounds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewCircle {
    pub center: Point2,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewElement {
    Path(PreviewPath),
    Circle(PreviewCircle),
}

impl PreviewElement {
    fn as_path(&self) -> Option<&PreviewPath> {
        match self {
            PreviewElement::Path(path) => Some(path),
            PreviewElement::Circle(_) => None,
        }
    }
}

/// 为外接矩形面积最大的路径打上轮廓类名；面积相同时保留最先出现的路径。
/// 返回被标记元素的下标。
pub fn tag_silhouette(elements: &mut [PreviewElement], class: &str) -> Option<usize> {
    let mut winner: Option<(usize, f64)> = None;
    for (index, element) in elements.iter().enumerate() {
        let Some(path) = element.as_path() else {
            continue;
        };
        let area = path.area();
        if area < 0.0 {
            continue;
        }
        match winner {
            Some((_, best)) if area <= best => {}
            _ => winner = Some((index, area)),
        }
    }

    for element in elements.iter_mut() {
        if let PreviewElement::Path(path) = element {
            path.class = None;
        }
    }
    let (index, _) = winner?;
    if let PreviewElement::Path(path) = &mut elements[index] {
        path.class = Some(class.to_string());
    }
    Some(index)
}

/// SVG 坐标下的视图框。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewDocument {
    pub view_box: ViewBox,
    pub stroke_width: f64,
    pub style: PreviewStyle,
    pub elements: Vec<PreviewElement>,
}

impl PreviewDocument {
    pub fn silhouette(&self) -> Option<&PreviewPath> {
        self.elements
            .iter()
            .filter_map(PreviewElement::as_path)
            .find(|path| path.class.is_some())
    }

    /// 序列化为 SVG 文本。出现非有限数值或没有可绘制元素时失败。
    pub fn to_svg(&self) -> Result<String, QuoteError> {
        if self.elements.is_empty() {
            return Err(QuoteError::PreviewGenerationFailed(
                "drawing produced no previewable elements".to_string(),
            ));
        }
        let document = self.to_node()?;
        Ok(format!("{XML_DECLARATION}\n{document}\n"))
    }

    /// 所有数值在构建节点前检查，节点树中不会出现 `NaN` 或 `inf`。
    fn to_node(&self) -> Result<SvgDocument, QuoteError> {
        let vb = &self.view_box;
        let view_box = format!(
            "{} {} {} {}",
            num(vb.min_x)?,
            num(vb.min_y)?,
            num(vb.width)?,
            num(vb.height)?
        );

        let mut group = Group::new()
            .set("fill", "none")
            .set("stroke", self.style.stroke.as_str())
            .set("stroke-width", num(self.stroke_width)?);
        for element in &self.elements {
            group = match element {
                PreviewElement::Path(path) => {
                    let node = SvgPath::new().set("d", path_data(&path.commands)?);
                    match &path.class {
                        Some(class) => group.add(node.set("class", class.as_str())),
                        None => group.add(node),
                    }
                }
                PreviewElement::Circle(circle) => group.add(
                    SvgCircle::new()
                        .set("cx", num(circle.center.x())?)
                        .set("cy", num(-circle.center.y())?)
                        .set("r", num(circle.radius.abs())?),
                ),
            };
        }

        Ok(SvgDocument::new()
            .set("xmlns", SVG_NAMESPACE)
            .set("viewBox", view_box)
            .set("preserveAspectRatio", "xMidYMid meet")
            .add(Style::new(self.style.css()))
            .add(group))
    }
}

/// SVG 文本的 base64 编码，供 JSON 响应内嵌。
pub fn encode_base64(svg: &str) -> String {
    STANDARD.encode(svg.as_bytes())
}

fn non_finite(value: f64) -> QuoteError {
    QuoteError::PreviewGenerationFailed(format!("non-finite coordinate {value}"))
}

/// 四位小数、去掉多余的 0；非有限数值直接报错，避免写出 `NaN`。
fn num(value: f64) -> Result<String, QuoteError> {
    if !value.is_finite() {
        return Err(non_finite(value));
    }
    let text = format!("{value:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    Ok(match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    })
}

/// 路径参数为 f32：先取四位小数，超出 f32 范围同样视为非有限。
fn coord(value: f64) -> Result<f32, QuoteError> {
    let narrowed = ((value * 1e4).round() / 1e4) as f32;
    if !value.is_finite() || !narrowed.is_finite() {
        return Err(non_finite(value));
    }
    // 消除 -0。
    Ok(narrowed + 0.0)
}

fn point(p: Point2) -> Result<(f32, f32), QuoteError> {
    Ok((coord(p.x())?, coord(-p.y())?))
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

fn path_data(commands: &[PathCommand]) -> Result<Data, QuoteError> {
    let mut data = Data::new();
    for command in commands {
        data = match *command {
            PathCommand::MoveTo(p) => data.move_to(point(p)?),
            PathCommand::LineTo(p) => data.line_to(point(p)?),
            PathCommand::ArcTo {
                radius,
                large_arc,
                ccw,
                to,
            } => {
                let r = coord(radius)?;
                let (x, y) = point(to)?;
                // 翻转 Y 后，图纸中的逆时针在 SVG 中对应 sweep-flag = 0。
                data.elliptical_arc_to((r, r, 0.0, flag(large_arc), flag(!ccw), x, y))
            }
            PathCommand::Close => data.close(),
        };
    }
    Ok(data)
}

fn chain_commands(vertices: &[PolylineVertex], closed: bool) -> Vec<PathCommand> {
    let Some(first) = vertices.first() else {
        return Vec::new();
    };
    let mut commands = vec![PathCommand::MoveTo(first.position)];
    for pair in vertices.windows(2) {
        commands.push(segment_command(&pair[0], pair[1].position));
    }
    if closed && vertices.len() > 1 {
        if let Some(last) = vertices.last() {
            if last.bulge.abs() > BULGE_EPSILON {
                commands.push(segment_command(last, first.position));
            }
        }
        commands.push(PathCommand::Close);
    }
    commands
}

fn segment_command(from: &PolylineVertex, to: Point2) -> PathCommand {
    match bulge_arc(from.position, to, from.bulge) {
        Some(arc) => {
            let sweep = 4.0 * from.bulge.atan();
            PathCommand::ArcTo {
                radius: arc.radius,
                large_arc: sweep.abs() > PI,
                ccw: from.bulge > 0.0,
                to,
            }
        }
        None => PathCommand::LineTo(to),
    }
}

/// 可拼接的开放线段链（直线或开放多段线）。
#[derive(Debug, Clone)]
struct Chain {
    order: usize,
    vertices: Vec<PolylineVertex>,
}

impl Chain {
    fn start(&self) -> Point2 {
        self.vertices[0].position
    }

    fn end(&self) -> Point2 {
        self.vertices[self.vertices.len() - 1].position
    }

    /// 反转方向；每段的 bulge 随之取反并移到新的起点上。
    fn reversed(&self) -> Vec<PolylineVertex> {
        let n = self.vertices.len();
        (0..n)
            .map(|k| {
                let position = self.vertices[n - 1 - k].position;
                let bulge = if k + 1 < n {
                    -self.vertices[n - 2 - k].bulge
                } else {
                    0.0
                };
                PolylineVertex::with_bulge(position, bulge)
            })
            .collect()
    }
}

/// 端点的网格索引，用于在容差范围内查找可拼接的链。
/// 已拼接的链会从索引中移除，查找代价与已消耗的链数无关。
struct EndpointIndex {
    cell: f64,
    buckets: HashMap<(i64, i64), BTreeSet<usize>>,
}

impl EndpointIndex {
    fn new(cell: f64) -> Self {
        Self {
            cell,
            buckets: HashMap::new(),
        }
    }

    fn key(&self, p: Point2) -> (i64, i64) {
        (
            (p.x() / self.cell).floor() as i64,
            (p.y() / self.cell).floor() as i64,
        )
    }

    fn insert(&mut self, chain: &Chain, id: usize) {
        for p in [chain.start(), chain.end()] {
            self.buckets.entry(self.key(p)).or_default().insert(id);
        }
    }

    fn remove(&mut self, chain: &Chain, id: usize) {
        for p in [chain.start(), chain.end()] {
            let key = self.key(p);
            if let Some(ids) = self.buckets.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    /// 编号最小的、有端点落在 `tail` 容差内的链；第二项表示是否需要反向。
    fn nearest(&self, tail: Point2, tolerance: f64, chains: &[Chain]) -> Option<(usize, bool)> {
        let (kx, ky) = self.key(tail);
        let mut best: Option<(usize, bool)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(ids) = self.buckets.get(&(kx.saturating_add(dx), ky.saturating_add(dy)))
                else {
                    continue;
                };
                let found = ids.iter().copied().find_map(|id| {
                    let chain = &chains[id];
                    if chain.start().distance(tail) <= tolerance {
                        Some((id, false))
                    } else if chain.end().distance(tail) <= tolerance {
                        Some((id, true))
                    } else {
                        None
                    }
                });
                if let Some(candidate) = found {
                    if best.is_none_or(|(id, _)| candidate.0 < id) {
                        best = Some(candidate);
                    }
                }
            }
        }
        best
    }
}

/// 把首尾相接的链合并为轮廓；首尾重合的轮廓标记为闭合。
fn join_chains(chains: Vec<Chain>, tolerance: f64) -> Vec<(usize, Polyline)> {
    let mut index = EndpointIndex::new(tolerance.max(MIN_JOIN_TOLERANCE));
    for (id, chain) in chains.iter().enumerate() {
        index.insert(chain, id);
    }

    let mut used = vec![false; chains.len()];
    let mut contours = Vec::new();
    for seed in 0..chains.len() {
        if used[seed] {
            continue;
        }
        used[seed] = true;
        index.remove(&chains[seed], seed);
        let order = chains[seed].order;
        let mut vertices = chains[seed].vertices.clone();

        // 先向尾部延伸，再反转后继续延伸原来的头部。
        for pass in 0..2 {
            if pass == 1 {
                vertices = Chain {
                    order,
                    vertices,
                }
                .reversed();
            }
            loop {
                let Some(tail) = vertices.last().map(|v| v.position) else {
                    break;
                };
                let head = vertices[0].position;
                if vertices.len() > 2 && head.distance(tail) <= tolerance {
                    break;
                }
                let Some((id, reverse)) = index.nearest(tail, tolerance, &chains) else {
                    break;
                };
                used[id] = true;
                index.remove(&chains[id], id);
                let next_vertices = if reverse {
                    chains[id].reversed()
                } else {
                    chains[id].vertices.clone()
                };
                if let Some(last) = vertices.last_mut() {
                    last.bulge = next_vertices[0].bulge;
                }
                vertices.extend(next_vertices.into_iter().skip(1));
            }
        }

        let closed = vertices.len() > 2
            && vertices[0].position.distance(vertices[vertices.len() - 1].position) <= tolerance;
        if closed {
            vertices.pop();
        }
        contours.push((
            order,
            Polyline {
                vertices,
                is_closed: closed,
                layer: String::new(),
            },
        ));
    }
    contours
}

/// 根据配置把校验后的文档渲染为预览。
#[derive(Debug, Clone)]
pub struct PreviewRenderer {
    style: PreviewStyle,
    margin_ratio: f64,
    stroke_width_ratio: f64,
}

impl PreviewRenderer {
    pub fn new(style: PreviewStyle, margin_ratio: f64, stroke_width_ratio: f64) -> Self {
        Self {
            style,
            margin_ratio,
            stroke_width_ratio,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Result<Self, StyleError> {
        Ok(Self::new(
            PreviewStyle::from_config(config)?,
            config.margin_ratio,
            config.stroke_width_ratio,
        ))
    }

    pub fn render(&self, document: &ValidatedDocument) -> Result<PreviewDocument, QuoteError> {
        let bounds = document.bounds();
        let extent = bounds.width().max(bounds.height());
        let tolerance = (extent * JOIN_TOLERANCE_RATIO).max(MIN_JOIN_TOLERANCE);

        let mut ordered: Vec<(usize, PreviewElement)> = Vec::new();
        let mut chains: Vec<Chain> = Vec::new();
        for (order, entity) in document.entities().enumerate() {
            match entity {
                Entity::Line(line) => chains.push(Chain {
                    order,
                    vertices: vec![
                        PolylineVertex::new(line.start),
                        PolylineVertex::new(line.end),
                    ],
                }),
                Entity::Polyline(polyline) if !polyline.is_closed && polyline.vertices.len() > 1 => {
                    chains.push(Chain {
                        order,
                        vertices: polyline.vertices.clone(),
                    })
                }
                Entity::Polyline(polyline) => ordered.push((
                    order,
                    PreviewElement::Path(PreviewPath::from_polyline(polyline)),
                )),
                Entity::Arc(arc) => {
                    ordered.push((order, PreviewElement::Path(PreviewPath::from_arc(arc))))
                }
                Entity::Circle(circle) => ordered.push((
                    order,
                    PreviewElement::Circle(PreviewCircle {
                        center: circle.center,
                        radius: circle.radius,
                    }),
                )),
            }
        }

        let chain_count = chains.len();
        for (order, contour) in join_chains(chains, tolerance) {
            ordered.push((order, PreviewElement::Path(PreviewPath::from_polyline(&contour))));
        }
        ordered.sort_by_key(|(order, _)| *order);
        let mut elements: Vec<PreviewElement> =
            ordered.into_iter().map(|(_, element)| element).collect();

        // 轮廓放在最前，孔洞等其它元素绘制在其上方。
        if let Some(index) = tag_silhouette(&mut elements, self.style.silhouette_class()) {
            let silhouette = elements.remove(index);
            elements.insert(0, silhouette);
        }

        let margin = extent * self.margin_ratio;
        let view_box = ViewBox {
            min_x: bounds.min().x() - margin,
            min_y: -bounds.max().y() - margin,
            width: bounds.width() + 2.0 * margin,
            height: bounds.height() + 2.0 * margin,
        };
        debug!(
            elements = elements.len(),
            joined_segments = chain_count,
            "预览文档已构建"
        );
        Ok(PreviewDocument {
            view_box,
            stroke_width: extent * self.stroke_width_ratio,
            style: self.style.clone(),
            elements,
        })
    }

    pub fn render_svg(&self, document: &ValidatedDocument) -> Result<String, QuoteError> {
        self.render(document)?.to_svg()
    }
}
