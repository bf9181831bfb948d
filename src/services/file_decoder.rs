//! 文件材料归一化 - 业务能力层
//!
//! 把下载得到的异构字节流归一化为 FileMaterial：
//! - 先按声明的 Content-Type 分发，再按文件扩展名兜底
//! - 单个文件解码失败不影响批次（调用方记录日志后跳过）
//!
//! 只处理单个文件，不关心 key 来源和流程顺序

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use phf::phf_map;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::models::{FileMaterial, MediaData, TabularData};

/// 单文件解码失败
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("CSV 解析失败: {0}")]
    Csv(#[from] csv::Error),
    #[error("Excel 解析失败: {0}")]
    Excel(String),
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PDF 解析失败: {0}")]
    Pdf(String),
    #[error("文件为空")]
    Empty,
}

/// 图片扩展名 → MIME
static IMAGE_MIME: phf::Map<&'static str, &'static str> = phf_map! {
    "png" => "image/png",
    "jpg" => "image/jpeg",
    "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "bmp" => "image/bmp",
    "svg" => "image/svg+xml",
    "webp" => "image/webp",
};

/// 音频扩展名 → MIME
static AUDIO_MIME: phf::Map<&'static str, &'static str> = phf_map! {
    "wav" => "audio/wav",
    "opus" => "audio/opus",
    "mp3" => "audio/mpeg",
    "ogg" => "audio/ogg",
    "m4a" => "audio/mp4",
    "flac" => "audio/flac",
    "aac" => "audio/aac",
    "wma" => "audio/x-ms-wma",
};

/// 表格摘要的采样行数
const SAMPLE_ROWS: usize = 10;

/// 解码单个文件
///
/// # 参数
/// - `key`: 来源 URL 或合成键（用于扩展名兜底判断）
/// - `bytes`: 原始字节
/// - `content_type`: 响应头声明的 Content-Type（可为空）
pub fn decode(key: &str, bytes: &[u8], content_type: &str) -> Result<FileMaterial, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let ct = content_type.to_lowercase();
    let ext = key_extension(key);

    debug!("解码文件: key={} content_type={} ext={:?}", key, ct, ext);

    if ct.contains("pdf") || ext.as_deref() == Some("pdf") {
        decode_pdf(bytes)
    } else if ct.contains("json") || ext.as_deref() == Some("json") {
        decode_json(bytes)
    } else if ct.contains("csv") || ext.as_deref() == Some("csv") {
        decode_csv(bytes)
    } else if ct.contains("excel")
        || ct.contains("spreadsheet")
        || matches!(ext.as_deref(), Some("xlsx") | Some("xls"))
    {
        decode_excel(bytes)
    } else if ct.contains("image") || ext.as_deref().is_some_and(|e| IMAGE_MIME.contains_key(e)) {
        Ok(decode_image(bytes, &ct, ext.as_deref()))
    } else if ct.contains("audio") || ext.as_deref().is_some_and(|e| AUDIO_MIME.contains_key(e)) {
        Ok(decode_audio(bytes, &ct, ext.as_deref()))
    } else {
        Ok(FileMaterial::Text {
            content: String::from_utf8_lossy(bytes).into_owned(),
        })
    }
}

/// 取 key 末段的小写扩展名（忽略查询串）
fn key_extension(key: &str) -> Option<String> {
    let segment = key
        .rsplit('/')
        .next()?
        .split(['?', '#'])
        .next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

// ========== 表格 ==========

fn decode_csv(bytes: &[u8]) -> Result<FileMaterial, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let column_names: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut full_rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = JsonMap::new();
        for (i, name) in column_names.iter().enumerate() {
            let raw = record.get(i).unwrap_or("");
            row.insert(name.clone(), infer_cell(raw));
        }
        full_rows.push(JsonValue::Object(row));
    }

    let summary = describe_numeric(&column_names, &full_rows);

    Ok(FileMaterial::Csv(build_tabular(
        column_names,
        full_rows,
        Some(summary),
    )))
}

fn decode_excel(bytes: &[u8]) -> Result<FileMaterial, DecodeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| DecodeError::Excel(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DecodeError::Excel("工作簿没有工作表".to_string()))?
        .map_err(|e| DecodeError::Excel(e.to_string()))?;

    let mut rows = range.rows();
    let column_names: Vec<String> = rows
        .next()
        .map(|header| header.iter().map(cell_to_header).collect())
        .unwrap_or_default();

    let mut full_rows = Vec::new();
    for row in rows {
        let mut record = JsonMap::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = row.get(i).map(cell_to_json).unwrap_or(JsonValue::Null);
            record.insert(name.clone(), value);
        }
        full_rows.push(JsonValue::Object(record));
    }

    Ok(FileMaterial::Excel(build_tabular(column_names, full_rows, None)))
}

fn build_tabular(
    column_names: Vec<String>,
    full_rows: Vec<JsonValue>,
    summary_statistics: Option<JsonValue>,
) -> TabularData {
    TabularData {
        row_count: full_rows.len(),
        column_count: column_names.len(),
        sample_rows: full_rows.iter().take(SAMPLE_ROWS).cloned().collect(),
        summary_statistics,
        full_rows,
        column_names,
    }
}

/// 单元格字符串的类型推断：整数 → 浮点 → 原文
fn infer_cell(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return json!(f);
    }
    JsonValue::String(trimmed.to_string())
}

fn cell_to_header(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_to_json(cell: &Data) -> JsonValue {
    match cell {
        Data::Empty => JsonValue::Null,
        Data::String(s) => JsonValue::String(s.clone()),
        Data::Int(i) => json!(i),
        Data::Float(f) => {
            // 整数值的浮点单元格按整数呈现，与 CSV 推断保持一致
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                json!(*f as i64)
            } else {
                json!(f)
            }
        }
        Data::Bool(b) => json!(b),
        other => JsonValue::String(other.to_string()),
    }
}

/// 数值列描述性统计（count / mean / std / min / max）
fn describe_numeric(column_names: &[String], rows: &[JsonValue]) -> JsonValue {
    let mut stats = JsonMap::new();

    for name in column_names {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(name))
            .filter_map(|v| v.as_f64())
            .collect();

        if values.is_empty() {
            continue;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        stats.insert(
            name.clone(),
            json!({
                "count": count,
                "mean": mean,
                "std": std,
                "min": min,
                "max": max,
            }),
        );
    }

    JsonValue::Object(stats)
}

// ========== PDF / JSON ==========

fn decode_pdf(bytes: &[u8]) -> Result<FileMaterial, DecodeError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| DecodeError::Pdf(e.to_string()))?;

    let mut page_texts = Vec::new();
    for (page_number, _) in doc.get_pages() {
        // 扫描件按页退化为空字符串，不视为错误
        let text = doc.extract_text(&[page_number]).unwrap_or_default();
        page_texts.push(text);
    }

    let page_count = page_texts.len();
    Ok(FileMaterial::Pdf {
        page_texts,
        page_count,
    })
}

fn decode_json(bytes: &[u8]) -> Result<FileMaterial, DecodeError> {
    let value: JsonValue = serde_json::from_slice(bytes)?;
    Ok(FileMaterial::Json { value })
}

// ========== 图片 / 音频 ==========

fn decode_image(bytes: &[u8], content_type: &str, ext: Option<&str>) -> FileMaterial {
    let mime = if content_type.contains("image") {
        content_type
            .split(';')
            .next()
            .unwrap_or("image/png")
            .trim()
            .to_string()
    } else {
        ext.and_then(|e| IMAGE_MIME.get(e))
            .copied()
            .unwrap_or("image/png")
            .to_string()
    };

    FileMaterial::Image(encode_media(bytes, mime, None))
}

fn decode_audio(bytes: &[u8], content_type: &str, ext: Option<&str>) -> FileMaterial {
    let mime = if content_type.contains("audio") {
        content_type
            .split(';')
            .next()
            .unwrap_or("audio/wav")
            .trim()
            .to_string()
    } else {
        ext.and_then(|e| AUDIO_MIME.get(e))
            .copied()
            .unwrap_or("audio/wav")
            .to_string()
    };

    FileMaterial::Audio(encode_media(bytes, mime, None))
}

/// 字节流包装为 data-URI 载荷
pub fn encode_media(bytes: &[u8], mime_type: String, alt_text: Option<String>) -> MediaData {
    let encoded = BASE64.encode(bytes);
    MediaData {
        data_uri: format!("data:{};base64,{}", mime_type, encoded),
        size_bytes: bytes.len(),
        mime_type,
        alt_text,
    }
}

/// 按扩展名查输出文件的 MIME（代码执行产物转 data-URI 用）
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    IMAGE_MIME
        .get(ext.as_str())
        .or_else(|| AUDIO_MIME.get(ext.as_str()))
        .copied()
        .or(match ext.as_str() {
            "csv" => Some("text/csv"),
            "json" => Some("application/json"),
            "xlsx" => {
                Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
            }
            "txt" => Some("text/plain"),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MaterialKind;
    use serde_json::json;

    const SALES_CSV: &str = "product,sales\nA,2000\nB,3500\nC,4000\nD,2500\nE,3000\n";

    #[test]
    fn test_decode_csv_shape_and_rows() {
        let m = decode("http://h/data/sales.csv", SALES_CSV.as_bytes(), "text/csv").unwrap();
        let FileMaterial::Csv(t) = m else {
            panic!("应解码为 CSV");
        };
        assert_eq!(t.column_names, vec!["product", "sales"]);
        assert_eq!(t.row_count, 5);
        assert_eq!(t.column_count, 2);
        assert_eq!(t.sample_rows.len(), 5);
        assert_eq!(t.full_rows[0]["sales"], json!(2000));
    }

    #[test]
    fn test_decode_csv_summary_statistics() {
        let m = decode("sales.csv", SALES_CSV.as_bytes(), "text/csv").unwrap();
        let FileMaterial::Csv(t) = m else {
            panic!("应解码为 CSV");
        };
        let stats = t.summary_statistics.unwrap();
        assert_eq!(stats["sales"]["count"], json!(5));
        assert_eq!(stats["sales"]["mean"], json!(3000.0));
        assert_eq!(stats["sales"]["min"], json!(2000.0));
        assert_eq!(stats["sales"]["max"], json!(4000.0));
        // 文本列不参与统计
        assert!(stats.get("product").is_none());
    }

    #[test]
    fn test_decode_dispatch_by_extension_fallback() {
        // Content-Type 缺失时按扩展名分发
        let m = decode("http://h/files/config.json", b"{\"a\": 1}", "").unwrap();
        assert_eq!(m.kind(), MaterialKind::Json);
    }

    #[test]
    fn test_decode_image_wraps_data_uri() {
        let m = decode("http://h/chart.png", &[0x89, 0x50, 0x4e, 0x47], "image/png").unwrap();
        let FileMaterial::Image(media) = m else {
            panic!("应解码为图片");
        };
        assert!(media.data_uri.starts_with("data:image/png;base64,"));
        assert_eq!(media.size_bytes, 4);
    }

    #[test]
    fn test_decode_image_substitutes_default_mime() {
        // 声明类型不属于图片族时退化为 image/png
        let m = decode("http://h/pic.png", &[1, 2, 3], "application/octet-stream").unwrap();
        let FileMaterial::Image(media) = m else {
            panic!("应解码为图片");
        };
        assert_eq!(media.mime_type, "image/png");
    }

    #[test]
    fn test_decode_audio_substitutes_default_mime() {
        let m = decode("http://h/clip.wav", &[1, 2, 3], "").unwrap();
        let FileMaterial::Audio(media) = m else {
            panic!("应解码为音频");
        };
        assert_eq!(media.mime_type, "audio/wav");
    }

    #[test]
    fn test_decode_unknown_defaults_to_text() {
        let m = decode("http://h/readme", b"hello world", "").unwrap();
        let FileMaterial::Text { content } = m else {
            panic!("应解码为文本");
        };
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_decode_batch_isolates_failures() {
        // 三个文件中有一个损坏，得到两个材料
        let inputs: Vec<(&str, &[u8], &str)> = vec![
            ("a.csv", SALES_CSV.as_bytes(), "text/csv"),
            ("b.json", b"{not-json", "application/json"),
            ("c.txt", b"plain", "text/plain"),
        ];

        let decoded: Vec<_> = inputs
            .into_iter()
            .filter_map(|(k, b, ct)| decode(k, b, ct).ok())
            .collect();

        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("png"), Some("image/png"));
        assert_eq!(mime_for_extension("JPG"), Some("image/jpeg"));
        assert_eq!(mime_for_extension("csv"), Some("text/csv"));
        assert_eq!(mime_for_extension("bin"), None);
    }
}
