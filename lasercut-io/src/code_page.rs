//! `$DWGCODEPAGE` 到 `encoding_rs` 编码的映射，以及 ASCII DXF 的整体解码。

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 根据 `$DWGCODEPAGE` 取值选择编码；无法识别时回退到 Windows-1252。
pub fn encoding_from_code_page(code_page: &str) -> &'static Encoding {
    match code_page.trim().to_ascii_lowercase().as_str() {
        "gb2312" | "ansi_936" => encoding_rs::GBK,
        "big5" | "ansi_950" => encoding_rs::BIG5,
        "korean" | "ansi_949" | "johab" => encoding_rs::EUC_KR,
        "ansi_932" => encoding_rs::SHIFT_JIS,
        "dos852" => encoding_rs::WINDOWS_1250,
        "dos855" | "dos866" | "dos437" => encoding_rs::IBM866,
        "dos857" => encoding_rs::WINDOWS_1254,
        "dos869" => encoding_rs::WINDOWS_1253,
        "ansi_874" => encoding_rs::WINDOWS_874,
        "ansi_1250" => encoding_rs::WINDOWS_1250,
        "ansi_1251" => encoding_rs::WINDOWS_1251,
        "ansi_1253" => encoding_rs::WINDOWS_1253,
        "ansi_1254" | "iso8859-9" | "iso_8859-9" => encoding_rs::WINDOWS_1254,
        "ansi_1255" => encoding_rs::WINDOWS_1255,
        "ansi_1256" => encoding_rs::WINDOWS_1256,
        "ansi_1257" => encoding_rs::WINDOWS_1257,
        "ansi_1258" => encoding_rs::WINDOWS_1258,
        "iso8859-2" | "iso_8859-2" => encoding_rs::ISO_8859_2,
        "iso8859-5" | "iso_8859-5" => encoding_rs::ISO_8859_5,
        "iso8859-7" | "iso_8859-7" => encoding_rs::ISO_8859_7,
        "iso8859-15" | "iso_8859-15" => encoding_rs::ISO_8859_15,
        "koi8-r" => encoding_rs::KOI8_R,
        "koi8-u" => encoding_rs::KOI8_U,
        "utf-8" | "utf8" | "unicode" => UTF_8,
        _ => WINDOWS_1252,
    }
}

/// 把字节解码成文本：合法 UTF-8 直接使用（去掉 BOM），
/// 否则按文件头声明的代码页解码。解码器对非法字节使用替换字符，不会失败。
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, &'static Encoding) {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (Cow::Borrowed(text), UTF_8);
    }

    // 代码页名称本身是 ASCII，先用单字节编码粗解一遍定位它。
    let (sniffed, _, _) = WINDOWS_1252.decode(bytes);
    let encoding = declared_code_page(&sniffed)
        .map(encoding_from_code_page)
        .filter(|encoding| *encoding != UTF_8)
        .unwrap_or(WINDOWS_1252);
    if encoding == WINDOWS_1252 {
        return (sniffed, encoding);
    }
    let (text, _, _) = encoding.decode(bytes);
    (text, encoding)
}

/// 解码单个字符串值（二进制 DXF 使用）。
pub fn decode_value(bytes: &[u8], fallback: &'static Encoding) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _) = fallback.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

fn declared_code_page(text: &str) -> Option<&str> {
    let mut lines = text.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if line.eq_ignore_ascii_case("$DWGCODEPAGE") {
            // 变量名之后紧跟 "3" 组码行和取值行。
            let code = lines.next()?;
            if code != "3" {
                return None;
            }
            return lines.next();
        }
        if line == "ENDSEC" {
            return None;
        }
    }
    None
}
