use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::{Encoding, WINDOWS_1252};

use crate::DxfError;
use crate::code_page::decode_value;

/// 二进制 DXF 文件头，含结尾的 `\r\n\x1a\0`。
pub const BINARY_SENTINEL: &[u8] = b"AutoCAD Binary DXF\r\n\x1a\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Double,
    Int16,
    Int32,
    Int64,
    Bool,
    Chunk,
}

/// 按组码范围确定值类型（二进制 DXF 按此读取定长字段）。
fn value_kind(code: i32) -> ValueKind {
    match code {
        10..=59 | 110..=149 | 210..=239 | 460..=469 | 1010..=1059 => ValueKind::Double,
        60..=79 | 170..=179 | 270..=289 | 370..=389 | 400..=409 | 1060..=1070 => {
            ValueKind::Int16
        }
        90..=99 | 420..=429 | 440..=459 | 1071 => ValueKind::Int32,
        160..=169 => ValueKind::Int64,
        290..=299 => ValueKind::Bool,
        310..=319 | 1004 => ValueKind::Chunk,
        _ => ValueKind::Text,
    }
}

enum PairSource<'a> {
    Text {
        lines: std::str::Lines<'a>,
        line_number: usize,
    },
    Binary {
        cursor: Cursor<&'a [u8]>,
        wide_codes: bool,
        encoding: &'static Encoding,
    },
}

/// 逐对读取 (组码, 值)，支持回退一个 pair。文本和二进制来源产出相同的字符串值。
pub(crate) struct DxfReader<'a> {
    source: PairSource<'a>,
    buffer: Option<(i32, String)>,
}

impl<'a> DxfReader<'a> {
    pub(crate) fn text(source: &'a str) -> Self {
        Self {
            source: PairSource::Text {
                lines: source.lines(),
                line_number: 0,
            },
            buffer: None,
        }
    }

    /// `bytes` 必须以 [`BINARY_SENTINEL`] 开头。
    pub(crate) fn binary(bytes: &'a [u8]) -> Self {
        let body = &bytes[BINARY_SENTINEL.len().min(bytes.len())..];
        // R13 起组码为 2 字节；R12 为 1 字节。首个组码恒为 0（SECTION），据第二个字节区分。
        let wide_codes = body.get(1) == Some(&0);
        Self {
            source: PairSource::Binary {
                cursor: Cursor::new(body),
                wide_codes,
                encoding: WINDOWS_1252,
            },
            buffer: None,
        }
    }

    /// 二进制文件中的非 UTF-8 字符串按该编码解码。
    pub(crate) fn set_encoding(&mut self, encoding: &'static Encoding) {
        if let PairSource::Binary { encoding: current, .. } = &mut self.source {
            *current = encoding;
        }
    }

    pub(crate) fn is_binary(&self) -> bool {
        matches!(self.source, PairSource::Binary { .. })
    }

    pub(crate) fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }
        match &mut self.source {
            PairSource::Text { lines, line_number } => next_text_pair(lines, line_number),
            PairSource::Binary {
                cursor,
                wide_codes,
                encoding,
            } => next_binary_pair(cursor, *wide_codes, *encoding),
        }
    }

    pub(crate) fn put_back(&mut self, pair: (i32, String)) -> Result<(), DxfError> {
        if self.buffer.is_some() {
            return Err(DxfError::invalid("内部错误：尝试多次回退 DXF pair"));
        }
        self.buffer = Some(pair);
        Ok(())
    }
}

fn next_text_pair(
    lines: &mut std::str::Lines<'_>,
    line_number: &mut usize,
) -> Result<Option<(i32, String)>, DxfError> {
    let code_line = loop {
        match lines.next() {
            Some(line) => {
                *line_number += 1;
                // 文件末尾的空行不算作组码。
                if line.trim().is_empty() {
                    continue;
                }
                break line;
            }
            None => return Ok(None),
        }
    };

    let value_line = match lines.next() {
        Some(line) => {
            *line_number += 1;
            line
        }
        None => {
            return Err(DxfError::invalid(format!(
                "文件在第 {} 行结束，缺少与组码对应的值行",
                line_number
            )));
        }
    };

    let code = code_line.trim().parse::<i32>().map_err(|_| {
        DxfError::invalid(format!(
            "第 {} 行的组码 \"{}\" 无法解析为整数",
            *line_number - 1,
            code_line.trim()
        ))
    })?;
    let value = value_line.trim_end_matches('\r').to_string();
    Ok(Some((code, value)))
}

fn next_binary_pair(
    cursor: &mut Cursor<&[u8]>,
    wide_codes: bool,
    encoding: &'static Encoding,
) -> Result<Option<(i32, String)>, DxfError> {
    if cursor.position() >= cursor.get_ref().len() as u64 {
        return Ok(None);
    }
    let offset = cursor.position();
    let truncated = |_| DxfError::invalid(format!("二进制 DXF 在偏移 {offset} 处被截断"));

    let code = if wide_codes {
        i32::from(cursor.read_i16::<LittleEndian>().map_err(truncated)?)
    } else {
        match cursor.read_u8().map_err(truncated)? {
            255 => i32::from(cursor.read_i16::<LittleEndian>().map_err(truncated)?),
            byte => i32::from(byte),
        }
    };

    let value = match value_kind(code) {
        ValueKind::Text => {
            let raw = read_nul_terminated(cursor).ok_or_else(|| {
                DxfError::invalid(format!("二进制 DXF 组码 {code} 的字符串缺少结尾 NUL"))
            })?;
            decode_value(&raw, encoding)
        }
        ValueKind::Double => cursor.read_f64::<LittleEndian>().map_err(truncated)?.to_string(),
        ValueKind::Int16 => cursor.read_i16::<LittleEndian>().map_err(truncated)?.to_string(),
        ValueKind::Int32 => cursor.read_i32::<LittleEndian>().map_err(truncated)?.to_string(),
        ValueKind::Int64 => cursor.read_i64::<LittleEndian>().map_err(truncated)?.to_string(),
        ValueKind::Bool => cursor.read_u8().map_err(truncated)?.to_string(),
        ValueKind::Chunk => {
            let len = usize::from(cursor.read_u8().map_err(truncated)?);
            let mut data = vec![0u8; len];
            cursor.read_exact(&mut data).map_err(truncated)?;
            data.iter().map(|byte| format!("{byte:02X}")).collect()
        }
    };
    Ok(Some((code, value)))
}

fn read_nul_terminated(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let start = cursor.position() as usize;
    let rest = cursor.get_ref().get(start..)?;
    let end = rest.iter().position(|byte| *byte == 0)?;
    let raw = rest[..end].to_vec();
    cursor.set_position((start + end + 1) as u64);
    Some(raw)
}
