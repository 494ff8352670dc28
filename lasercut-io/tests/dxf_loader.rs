use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use lasercut_core::document::{Entity, GeometryDocument};
use lasercut_io::{DrawingLoader, DxfFacade, IoError};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

fn load_fixture(name: &str) -> Result<GeometryDocument, IoError> {
    DxfFacade::new().load(&fixture_path(name))
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn loads_plate_with_holes() {
    let document = load_fixture("plate_with_holes.dxf").expect("读取 DXF 失败");

    let layers: Vec<&str> = document.layers().map(|layer| layer.name.as_str()).collect();
    assert_eq!(layers, ["CUT", "HOLES"]);
    assert_eq!(document.entity_count(), 3);
    assert_eq!(document.skipped_entities(), 1);
    assert_eq!(document.insert_units(), Some(4));

    let bounds = document.bounds().expect("应存在边界");
    assert_close(bounds.width(), 100.0);
    assert_close(bounds.height(), 50.0);

    let arcs: Vec<f64> = document.arcs().map(|arc| arc.total_angle_degrees).collect();
    assert_eq!(arcs.len(), 1);
    assert_close(arcs[0], 360.0);

    match document.entities().next() {
        Some(Entity::Polyline(polyline)) => {
            assert!(polyline.is_closed);
            assert_eq!(polyline.vertices.len(), 4);
        }
        other => panic!("首个实体应为多段线，实际为 {other:?}"),
    }
}

#[test]
fn loads_open_arc_without_judging_it() {
    let document = load_fixture("open_arc.dxf").expect("读取 DXF 失败");
    let arc = document.arcs().next().expect("应包含圆弧");
    assert_eq!(arc.layer, "CUT");
    assert_close(arc.total_angle_degrees, 180.0);

    // 半圆向上凸起，高度等于半径。
    let bounds = document.bounds().expect("应存在边界");
    assert_close(bounds.width(), 40.0);
    assert_close(bounds.height(), 20.0);
}

#[test]
fn loads_legacy_polyline_with_bulge() {
    let document = load_fixture("legacy_polyline.dxf").expect("读取 DXF 失败");
    assert_eq!(document.entity_count(), 1);

    let bounds = document.bounds().expect("应存在边界");
    assert_close(bounds.min().x(), -15.0);
    assert_close(bounds.width(), 75.0);
    assert_close(bounds.height(), 30.0);
}

#[test]
fn missing_entities_section_is_malformed() {
    let err = load_fixture("missing_entities.dxf").expect_err("缺少 ENTITIES 段应失败");
    match err {
        IoError::MalformedDrawing(message) => assert!(message.contains("ENTITIES")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_file_reports_read_error() {
    let err = load_fixture("does_not_exist.dxf").expect_err("文件不存在应失败");
    assert!(matches!(err, IoError::ReadError { .. }));
}

#[test]
fn garbage_bytes_are_malformed() {
    let err = DxfFacade::new()
        .load_bytes(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n")
        .expect_err("非 DXF 内容应失败");
    assert!(matches!(err, IoError::MalformedDrawing(_)));
}

fn write_string(out: &mut Vec<u8>, code: i16, value: &str) {
    out.write_i16::<LittleEndian>(code).expect("写入组码");
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

fn write_double(out: &mut Vec<u8>, code: i16, value: f64) {
    out.write_i16::<LittleEndian>(code).expect("写入组码");
    out.write_f64::<LittleEndian>(value).expect("写入浮点");
}

fn write_i16(out: &mut Vec<u8>, code: i16, value: i16) {
    out.write_i16::<LittleEndian>(code).expect("写入组码");
    out.write_i16::<LittleEndian>(value).expect("写入整数");
}

fn binary_plate() -> Vec<u8> {
    let mut out = b"AutoCAD Binary DXF\r\n\x1a\0".to_vec();
    write_string(&mut out, 0, "SECTION");
    write_string(&mut out, 2, "HEADER");
    write_string(&mut out, 9, "$INSUNITS");
    write_i16(&mut out, 70, 4);
    write_string(&mut out, 0, "ENDSEC");
    write_string(&mut out, 0, "SECTION");
    write_string(&mut out, 2, "ENTITIES");

    write_string(&mut out, 0, "LWPOLYLINE");
    write_string(&mut out, 8, "CUT");
    out.write_i16::<LittleEndian>(90).expect("写入组码");
    out.write_i32::<LittleEndian>(4).expect("写入整数");
    write_i16(&mut out, 70, 1);
    for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 50.0), (0.0, 50.0)] {
        write_double(&mut out, 10, x);
        write_double(&mut out, 20, y);
    }

    write_string(&mut out, 0, "CIRCLE");
    write_string(&mut out, 8, "HOLES");
    write_double(&mut out, 10, 20.0);
    write_double(&mut out, 20, 25.0);
    write_double(&mut out, 40, 5.0);

    write_string(&mut out, 0, "ARC");
    write_string(&mut out, 8, "HOLES");
    write_double(&mut out, 10, 80.0);
    write_double(&mut out, 20, 25.0);
    write_double(&mut out, 40, 5.0);
    write_double(&mut out, 50, 0.0);
    write_double(&mut out, 51, 360.0);

    write_string(&mut out, 0, "ENDSEC");
    write_string(&mut out, 0, "EOF");
    out
}

#[test]
fn binary_and_ascii_encodings_agree() {
    let ascii = load_fixture("plate_with_holes.dxf").expect("读取 ASCII DXF 失败");
    let binary = DxfFacade::new()
        .load_bytes(&binary_plate())
        .expect("读取二进制 DXF 失败");

    assert_eq!(binary.entity_count(), ascii.entity_count());
    assert_eq!(binary.insert_units(), ascii.insert_units());
    let ascii_layers: Vec<&str> = ascii.layers().map(|l| l.name.as_str()).collect();
    let binary_layers: Vec<&str> = binary.layers().map(|l| l.name.as_str()).collect();
    assert_eq!(ascii_layers, binary_layers);

    let ascii_json = serde_json::to_value(ascii.entities().collect::<Vec<_>>()).expect("序列化");
    let binary_json = serde_json::to_value(binary.entities().collect::<Vec<_>>()).expect("序列化");
    assert_eq!(ascii_json, binary_json);
}

#[test]
fn truncated_binary_is_malformed() {
    let mut bytes = binary_plate();
    bytes.truncate(bytes.len() - 30);
    let err = DxfFacade::new()
        .load_bytes(&bytes)
        .expect_err("截断的二进制 DXF 应失败");
    assert!(matches!(err, IoError::MalformedDrawing(_)));
}

#[test]
fn latin1_layer_names_decode_permissively() {
    let mut bytes = b"0\nSECTION\n2\nENTITIES\n0\nLINE\n8\nCAPA_DISE".to_vec();
    bytes.push(0xD1);
    bytes.extend_from_slice(b"O\n10\n0\n20\n0\n11\n10\n21\n10\n0\nENDSEC\n0\nEOF\n");

    let document = DxfFacade::new()
        .load_bytes(&bytes)
        .expect("非 UTF-8 文本应被宽松解码");
    let layer = document.layers().next().expect("应有图层");
    assert_eq!(layer.name, "CAPA_DISE\u{d1}O");
}

#[test]
fn crlf_line_endings_are_accepted() {
    let text = std::fs::read_to_string(fixture_path("open_arc.dxf")).expect("读取夹具失败");
    let crlf = text.replace('\n', "\r\n");
    let document = DxfFacade::new()
        .load_bytes(crlf.as_bytes())
        .expect("CRLF 文本应可解析");
    assert_eq!(document.entity_count(), 2);
}
