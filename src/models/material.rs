//! 文件材料数据模型
//!
//! 下载文件和页面图片统一归一化为 FileMaterial，按来源 key 保序存放在
//! MaterialSet 中，供提示词构建和代码执行落盘两条路径共用

use serde_json::Value as JsonValue;

/// 材料种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Image,
    Audio,
    Csv,
    Excel,
    Json,
    Pdf,
    Text,
}

impl MaterialKind {
    /// 种类名称（用于日志和提示词）
    pub fn name(&self) -> &'static str {
        match self {
            MaterialKind::Image => "image",
            MaterialKind::Audio => "audio",
            MaterialKind::Csv => "csv",
            MaterialKind::Excel => "excel",
            MaterialKind::Json => "json",
            MaterialKind::Pdf => "pdf",
            MaterialKind::Text => "text",
        }
    }
}

/// 图片/音频载荷（base64 data-URI 形式）
#[derive(Debug, Clone)]
pub struct MediaData {
    /// `data:<mime>;base64,<...>` 形式的完整 URI
    pub data_uri: String,
    pub mime_type: String,
    pub size_bytes: usize,
    /// 页面图片的 alt 文本
    pub alt_text: Option<String>,
}

/// 表格载荷（CSV / Excel 共用）
///
/// sample_rows 与 full_rows 刻意并存：摘要给模型看，全量数据用于精确计算
#[derive(Debug, Clone)]
pub struct TabularData {
    pub row_count: usize,
    pub column_count: usize,
    /// 列名，保持源文件顺序
    pub column_names: Vec<String>,
    /// 前 10 行记录
    pub sample_rows: Vec<JsonValue>,
    /// 数值列的描述性统计（仅 CSV 计算）
    pub summary_statistics: Option<JsonValue>,
    /// 全量行记录
    pub full_rows: Vec<JsonValue>,
}

/// 归一化后的文件材料
#[derive(Debug, Clone)]
pub enum FileMaterial {
    Image(MediaData),
    Audio(MediaData),
    Csv(TabularData),
    Excel(TabularData),
    Json { value: JsonValue },
    Pdf { page_texts: Vec<String>, page_count: usize },
    Text { content: String },
}

impl FileMaterial {
    pub fn kind(&self) -> MaterialKind {
        match self {
            FileMaterial::Image(_) => MaterialKind::Image,
            FileMaterial::Audio(_) => MaterialKind::Audio,
            FileMaterial::Csv(_) => MaterialKind::Csv,
            FileMaterial::Excel(_) => MaterialKind::Excel,
            FileMaterial::Json { .. } => MaterialKind::Json,
            FileMaterial::Pdf { .. } => MaterialKind::Pdf,
            FileMaterial::Text { .. } => MaterialKind::Text,
        }
    }
}

/// 计算材料落盘（以及提示词展示）使用的文件名
///
/// 规则：
/// - 合成 key `image_<n>` 固定映射为 `image_<n>.png`
/// - 来源 URL 末段含 '.' 时取末段（去掉查询串），并把扩展名改写为
///   实际落盘格式（Excel 落为 CSV，PDF 落为文本）
/// - 其余按种类取默认名
pub fn material_filename(key: &str, material: &FileMaterial) -> String {
    if let Some(index) = key.strip_prefix("image_") {
        if index.chars().all(|c| c.is_ascii_digit()) {
            return format!("image_{}.png", index);
        }
    }

    let last_segment = key
        .rsplit('/')
        .next()
        .unwrap_or(key)
        .split(['?', '#'])
        .next()
        .unwrap_or("");

    if last_segment.contains('.') {
        return rewrite_extension(last_segment, material.kind());
    }

    default_filename(material.kind()).to_string()
}

/// 按落盘格式改写扩展名
fn rewrite_extension(name: &str, kind: MaterialKind) -> String {
    let lower = name.to_lowercase();
    match kind {
        MaterialKind::Excel if lower.ends_with(".xlsx") || lower.ends_with(".xls") => {
            let stem = &name[..name.rfind('.').unwrap()];
            format!("{}.csv", stem)
        }
        MaterialKind::Pdf if lower.ends_with(".pdf") => {
            let stem = &name[..name.rfind('.').unwrap()];
            format!("{}.txt", stem)
        }
        _ => name.to_string(),
    }
}

fn default_filename(kind: MaterialKind) -> &'static str {
    match kind {
        MaterialKind::Csv | MaterialKind::Excel => "data.csv",
        MaterialKind::Json => "data.json",
        MaterialKind::Pdf | MaterialKind::Text => "data.txt",
        MaterialKind::Image => "image.png",
        MaterialKind::Audio => "audio.wav",
    }
}

/// 保序唯一键材料集合
///
/// key 为来源 URL 或合成键 `image_<n>`；插入顺序即发现顺序，
/// 单次抓取内保持确定性（下载文件在前，页面图片在后）
#[derive(Debug, Clone, Default)]
pub struct MaterialSet {
    entries: Vec<(String, FileMaterial)>,
}

impl MaterialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入材料；key 已存在时覆盖原值（保持原位置）
    pub fn insert(&mut self, key: impl Into<String>, material: FileMaterial) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = material;
        } else {
            self.entries.push((key, material));
        }
    }

    pub fn get(&self, key: &str) -> Option<&FileMaterial> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileMaterial)> {
        self.entries.iter().map(|(k, m)| (k.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_material() -> FileMaterial {
        FileMaterial::Csv(TabularData {
            row_count: 0,
            column_count: 0,
            column_names: Vec::new(),
            sample_rows: Vec::new(),
            summary_statistics: None,
            full_rows: Vec::new(),
        })
    }

    #[test]
    fn test_filename_from_url_segment() {
        let m = csv_material();
        assert_eq!(
            material_filename("http://host/data/sales.csv", &m),
            "sales.csv"
        );
    }

    #[test]
    fn test_filename_strips_query_string() {
        let m = csv_material();
        assert_eq!(
            material_filename("http://host/files/report.csv?token=abc", &m),
            "report.csv"
        );
    }

    #[test]
    fn test_filename_synthetic_image_key() {
        let m = FileMaterial::Image(MediaData {
            data_uri: String::new(),
            mime_type: "image/png".to_string(),
            size_bytes: 0,
            alt_text: None,
        });
        assert_eq!(material_filename("image_3", &m), "image_3.png");
    }

    #[test]
    fn test_filename_excel_rewritten_to_csv() {
        let m = FileMaterial::Excel(TabularData {
            row_count: 0,
            column_count: 0,
            column_names: Vec::new(),
            sample_rows: Vec::new(),
            summary_statistics: None,
            full_rows: Vec::new(),
        });
        assert_eq!(
            material_filename("http://host/files/report.xlsx", &m),
            "report.csv"
        );
    }

    #[test]
    fn test_filename_pdf_rewritten_to_txt() {
        let m = FileMaterial::Pdf {
            page_texts: Vec::new(),
            page_count: 0,
        };
        assert_eq!(
            material_filename("http://host/files/doc.pdf", &m),
            "doc.txt"
        );
    }

    #[test]
    fn test_filename_default_by_kind() {
        let m = csv_material();
        assert_eq!(material_filename("http://host/data/download", &m), "data.csv");
    }

    #[test]
    fn test_material_set_preserves_insertion_order() {
        let mut set = MaterialSet::new();
        set.insert("b", csv_material());
        set.insert("a", csv_material());
        let keys: Vec<&str> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_material_set_unique_keys() {
        let mut set = MaterialSet::new();
        set.insert("a", csv_material());
        set.insert("a", FileMaterial::Text { content: "x".to_string() });
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a").unwrap().kind(), MaterialKind::Text);
    }
}
