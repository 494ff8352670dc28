use std::fs;
use std::path::Path;

use lasercut_core::{
    document::{DEFAULT_LAYER, Entity, GeometryDocument, Polyline, PolylineVertex},
    geometry::Point2,
};
use thiserror::Error;
use tracing::debug;

pub mod code_page;
mod reader;

use code_page::{decode_text, encoding_from_code_page};
use reader::{BINARY_SENTINEL, DxfReader};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("malformed drawing: {0}")]
    MalformedDrawing(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 把上传的图纸字节转换为几何文档。
pub trait DrawingLoader: Send + Sync {
    fn load_bytes(&self, bytes: &[u8]) -> Result<GeometryDocument, IoError>;

    fn load(&self, path: &Path) -> Result<GeometryDocument, IoError> {
        let data = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_bytes(&data)
    }
}

/// DXF 读取入口，自动区分二进制与 ASCII 两种格式。
#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }
}

impl DrawingLoader for DxfFacade {
    fn load_bytes(&self, bytes: &[u8]) -> Result<GeometryDocument, IoError> {
        let result = if bytes.starts_with(BINARY_SENTINEL) {
            debug!(size = bytes.len(), "解析二进制 DXF");
            DxfParser::new(DxfReader::binary(bytes)).parse()
        } else {
            let (text, encoding) = decode_text(bytes);
            debug!(size = bytes.len(), encoding = encoding.name(), "解析 ASCII DXF");
            DxfParser::new(DxfReader::text(&text)).parse()
        };
        let document = result.map_err(|err| IoError::MalformedDrawing(err.message))?;
        debug!(
            entities = document.entity_count(),
            skipped = document.skipped_entities(),
            insert_units = ?document.insert_units(),
            "DXF 解析完成"
        );
        Ok(document)
    }
}

#[derive(Debug)]
pub(crate) struct DxfError {
    message: String,
}

impl DxfError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 实体的拉伸方向：Z 分量为负时实体在镜像的 OCS 中定义。
#[derive(Debug, Default)]
struct Extrusion {
    z: Option<f64>,
}

impl Extrusion {
    fn is_mirrored(&self) -> bool {
        self.z.is_some_and(|z| z < 0.0)
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(reader: DxfReader<'a>) -> Self {
        Self { reader }
    }

    fn parse(mut self) -> Result<GeometryDocument, DxfError> {
        let mut document = GeometryDocument::new();
        let mut has_entities = false;
        while let Some((code, value)) = self.reader.next_pair()? {
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "HEADER" => self.parse_header(&mut document)?,
                        "ENTITIES" => {
                            self.parse_entities(&mut document)?;
                            has_entities = true;
                        }
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        if !has_entities {
            return Err(DxfError::invalid("缺少 ENTITIES 段"));
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, document: &mut GeometryDocument) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("HEADER 段未找到 ENDSEC 终止标记")),
            };
            match (code, value.trim()) {
                (0, "ENDSEC") => break,
                (9, "$INSUNITS") => match self.reader.next_pair()? {
                    Some((70, raw)) => document.set_insert_units(parse_i16(&raw, "$INSUNITS")?),
                    Some(other) => self.reader.put_back(other)?,
                    None => {}
                },
                (9, "$DWGCODEPAGE") => match self.reader.next_pair()? {
                    Some((3, raw)) => {
                        if self.reader.is_binary() {
                            self.reader.set_encoding(encoding_from_code_page(&raw));
                        }
                    }
                    Some(other) => self.reader.put_back(other)?,
                    None => {}
                },
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_entities(&mut self, document: &mut GeometryDocument) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.trim() {
                "ENDSEC" => break,
                "LINE" => {
                    let entity = self.parse_line()?;
                    document.add_entity(entity);
                }
                "CIRCLE" => {
                    let entity = self.parse_circle()?;
                    document.add_entity(entity);
                }
                "ARC" => {
                    let entity = self.parse_arc()?;
                    document.add_entity(entity);
                }
                "LWPOLYLINE" => {
                    let entity = self.parse_lwpolyline()?;
                    document.add_entity(entity);
                }
                "POLYLINE" => match self.parse_polyline_entity()? {
                    Some(entity) => document.add_entity(entity),
                    None => document.record_skipped_entity(),
                },
                "SEQEND" | "VERTEX" => {
                    self.skip_entity_body()?;
                }
                other => {
                    debug!(kind = other, "跳过不参与切割的实体");
                    self.skip_entity_body()?;
                    document.record_skipped_entity();
                }
            }
        }
        Ok(())
    }

    fn parse_line(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut start_x = None;
        let mut start_y = None;
        let mut end_x = None;
        let mut end_y = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut start_x, &value, "LINE 起点 X（组码 10）")?,
                    20 => assign_coord(&mut start_y, &value, "LINE 起点 Y（组码 20）")?,
                    11 => assign_coord(&mut end_x, &value, "LINE 终点 X（组码 11）")?,
                    21 => assign_coord(&mut end_y, &value, "LINE 终点 Y（组码 21）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LINE 未正确结束")),
            }
        }

        let sx = start_x.ok_or_else(|| DxfError::invalid("LINE 缺少起点 X（组码 10）"))?;
        let sy = start_y.ok_or_else(|| DxfError::invalid("LINE 缺少起点 Y（组码 20）"))?;
        let ex = end_x.ok_or_else(|| DxfError::invalid("LINE 缺少终点 X（组码 11）"))?;
        let ey = end_y.ok_or_else(|| DxfError::invalid("LINE 缺少终点 Y（组码 21）"))?;

        Ok(Entity::Line(lasercut_core::document::Line {
            start: Point2::new(sx, sy),
            end: Point2::new(ex, ey),
            layer: layer_or_default(layer),
        }))
    }

    fn parse_circle(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        let mut extrusion = Extrusion::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut center_x, &value, "CIRCLE 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center_y, &value, "CIRCLE 圆心 Y（组码 20）")?,
                    40 => assign_coord(&mut radius, &value, "CIRCLE 半径（组码 40）")?,
                    230 => assign_coord(&mut extrusion.z, &value, "CIRCLE 拉伸方向 Z（组码 230）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("CIRCLE 未正确结束")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::invalid("CIRCLE 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("CIRCLE 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::invalid("CIRCLE 缺少半径（组码 40）"))?;
        let cx = if extrusion.is_mirrored() { -cx } else { cx };

        Ok(Entity::Circle(lasercut_core::document::Circle {
            center: Point2::new(cx, cy),
            radius,
            layer: layer_or_default(layer),
        }))
    }

    fn parse_arc(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        let mut start_angle = None;
        let mut end_angle = None;
        let mut extrusion = Extrusion::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut center_x, &value, "ARC 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center_y, &value, "ARC 圆心 Y（组码 20）")?,
                    40 => assign_coord(&mut radius, &value, "ARC 半径（组码 40）")?,
                    50 => assign_coord(&mut start_angle, &value, "ARC 起始角（组码 50）")?,
                    51 => assign_coord(&mut end_angle, &value, "ARC 终止角（组码 51）")?,
                    230 => assign_coord(&mut extrusion.z, &value, "ARC 拉伸方向 Z（组码 230）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("ARC 未正确结束")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::invalid("ARC 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::invalid("ARC 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::invalid("ARC 缺少半径（组码 40）"))?;
        let start = start_angle.ok_or_else(|| DxfError::invalid("ARC 缺少起始角（组码 50）"))?;
        let end = end_angle.ok_or_else(|| DxfError::invalid("ARC 缺少终止角（组码 51）"))?;

        // 镜像 OCS 中的逆时针圆弧在 WCS 中沿 Y 轴翻转，起止角互换。
        let (cx, start, end) = if extrusion.is_mirrored() {
            (-cx, 180.0 - end, 180.0 - start)
        } else {
            (cx, start, end)
        };

        Ok(Entity::Arc(lasercut_core::document::Arc {
            center: Point2::new(cx, cy),
            radius,
            start_angle: start.to_radians(),
            end_angle: end.to_radians(),
            layer: layer_or_default(layer),
        }))
    }

    fn parse_lwpolyline(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut is_closed = false;
        let mut vertices: Vec<PolylineVertex> = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        let mut extrusion = Extrusion::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => {
                        let flag = parse_i32(&value, "LWPOLYLINE 标志")?;
                        is_closed = flag & 0x01 == 0x01;
                    }
                    10 => {
                        let x = parse_f64(&value, "LWPOLYLINE 顶点 X")?;
                        if let Some(y) = pending_y.take() {
                            vertices.push(PolylineVertex::new(Point2::new(x, y)));
                        } else if pending_x.replace(x).is_some() {
                            return Err(DxfError::invalid("LWPOLYLINE 顶点缺少对应的 Y（组码 20）"));
                        }
                    }
                    20 => {
                        let y = parse_f64(&value, "LWPOLYLINE 顶点 Y")?;
                        if let Some(x) = pending_x.take() {
                            vertices.push(PolylineVertex::new(Point2::new(x, y)));
                        } else if pending_y.replace(y).is_some() {
                            return Err(DxfError::invalid("LWPOLYLINE 顶点缺少对应的 X（组码 10）"));
                        }
                    }
                    42 => {
                        let bulge = parse_f64(&value, "LWPOLYLINE 顶点 bulge")?;
                        match vertices.last_mut() {
                            Some(vertex) => vertex.bulge = bulge,
                            None => {
                                return Err(DxfError::invalid(
                                    "LWPOLYLINE 在定义首个顶点前遇到 bulge（组码 42）",
                                ));
                            }
                        }
                    }
                    230 => assign_coord(
                        &mut extrusion.z,
                        &value,
                        "LWPOLYLINE 拉伸方向 Z（组码 230）",
                    )?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LWPOLYLINE 未正确结束")),
            }
        }

        if pending_x.is_some() || pending_y.is_some() {
            return Err(DxfError::invalid(
                "LWPOLYLINE 顶点坐标成对出现（组码 10/20），检测到不完整的顶点",
            ));
        }
        if vertices.is_empty() {
            return Err(DxfError::invalid("LWPOLYLINE 未解析到任何顶点"));
        }
        if extrusion.is_mirrored() {
            mirror_vertices(&mut vertices);
        }

        Ok(Entity::Polyline(Polyline {
            vertices,
            is_closed,
            layer: layer_or_default(layer),
        }))
    }

    /// 旧式 POLYLINE + VERTEX + SEQEND 序列。网格类多段线不参与切割，返回 `None`。
    fn parse_polyline_entity(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut flags: i32 = 0;
        let mut extrusion = Extrusion::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => flags = parse_i32(&value, "POLYLINE 标志（组码 70）")?,
                    230 => assign_coord(&mut extrusion.z, &value, "POLYLINE 拉伸方向 Z（组码 230）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("POLYLINE 未正确结束")),
            }
        }

        let is_mesh = flags & (0x10 | 0x40) != 0;
        let mut vertices: Vec<PolylineVertex> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => {
                        let vertex = self.parse_vertex()?;
                        if !is_mesh {
                            vertices.push(vertex);
                        }
                    }
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value))?;
                        break;
                    }
                },
                Some(_) => {
                    return Err(DxfError::invalid(
                        "POLYLINE 遇到无效的记录，期望 VERTEX/SEQEND",
                    ));
                }
                None => {
                    return Err(DxfError::invalid(
                        "POLYLINE 缺少 SEQEND（组码 0, 值为 SEQEND）",
                    ));
                }
            }
        }

        if is_mesh {
            debug!(flags, "跳过网格类 POLYLINE");
            return Ok(None);
        }
        if vertices.is_empty() {
            return Err(DxfError::invalid("POLYLINE 未解析到任何顶点"));
        }
        if extrusion.is_mirrored() {
            mirror_vertices(&mut vertices);
        }

        Ok(Some(Entity::Polyline(Polyline {
            vertices,
            is_closed: flags & 0x01 == 0x01,
            layer: layer_or_default(layer),
        })))
    }

    fn parse_vertex(&mut self) -> Result<PolylineVertex, DxfError> {
        let mut x = None;
        let mut y = None;
        let mut bulge = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some((code, value)) => match code {
                    10 => assign_coord(&mut x, &value, "VERTEX X（组码 10）")?,
                    20 => assign_coord(&mut y, &value, "VERTEX Y（组码 20）")?,
                    42 => assign_coord(&mut bulge, &value, "VERTEX bulge（组码 42）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("VERTEX 未正确结束")),
            }
        }
        let x = x.ok_or_else(|| DxfError::invalid("VERTEX 缺少 X（组码 10）"))?;
        let y = y.ok_or_else(|| DxfError::invalid("VERTEX 缺少 Y（组码 20）"))?;
        Ok(PolylineVertex::with_bulge(
            Point2::new(x, y),
            bulge.unwrap_or(0.0),
        ))
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value))?;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

fn layer_or_default(layer: Option<String>) -> String {
    match layer {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_LAYER.to_string(),
    }
}

/// 镜像 OCS（拉伸 Z < 0）：X 取反，bulge 方向随之反转。
fn mirror_vertices(vertices: &mut [PolylineVertex]) {
    for vertex in vertices {
        vertex.position = Point2::new(-vertex.position.x(), vertex.position.y());
        vertex.bulge = -vertex.bulge;
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))?;
    if !value.is_finite() {
        return Err(DxfError::invalid(format!("{context} 不是有限数值（值：\"{raw}\"）")));
    }
    Ok(value)
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}
