//! 页面启发式解析 - 业务能力层
//!
//! 从渲染后的页面内容中提取题目标识 URL 和可下载文件 URL。
//! 这里是启发式匹配而非 HTML 解析器，输入默认可信

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

/// 可下载文件的扩展名集合（含音频族）
const FILE_EXTENSIONS: &[&str] = &[
    ".pdf", ".csv", ".json", ".xlsx", ".txt", ".xml", ".wav", ".opus", ".mp3", ".ogg", ".m4a",
    ".flac", ".aac", ".wma",
];

/// 数据目录路径段
const DATA_SEGMENTS: &[&str] = &["/data/", "/files/", "/download/"];

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href=["']([^"']+)["']"#).unwrap())
}

fn bare_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]()']+"#).unwrap())
}

fn quiz_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)with\s+url\s*=\s*(https?://[^\s<>"']+)"#).unwrap())
}

/// 从页面内容解析题目标识 URL
///
/// 提交载荷中的 url 未必等于抓取 URL：页面可能带有
/// `with url = <literal>` 指令；缺失时回退到抓取 URL
pub fn extract_quiz_identifier(page_content: &str, fetched_url: &str) -> String {
    if let Some(caps) = quiz_id_regex().captures(page_content) {
        let id = caps[1].trim_end_matches(['.', ',']).to_string();
        debug!("页面指定题目标识: {}", id);
        return id;
    }
    fetched_url.to_string()
}

/// 发现页面中的可下载文件 URL
///
/// 采集所有 href 目标和裸露的 http(s) URL，按扩展名或数据目录段分类，
/// 根相对路径按页面源站解析，保序去重
pub fn discover_file_urls(page_content: &str, page_url: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for caps in href_regex().captures_iter(page_content) {
        candidates.push(caps[1].to_string());
    }
    for m in bare_url_regex().find_iter(page_content) {
        candidates.push(m.as_str().to_string());
    }

    let base = Url::parse(page_url).ok();
    let mut seen = Vec::new();

    for candidate in candidates {
        let Some(absolute) = resolve_candidate(&candidate, base.as_ref()) else {
            continue;
        };
        if !looks_downloadable(&absolute) {
            continue;
        }
        if !seen.contains(&absolute) {
            seen.push(absolute);
        }
    }

    debug!("发现 {} 个文件 URL", seen.len());
    seen
}

/// 根相对路径解析为绝对 URL；其他协议返回 None
fn resolve_candidate(candidate: &str, base: Option<&Url>) -> Option<String> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Some(candidate.to_string());
    }
    if candidate.starts_with('/') && !candidate.starts_with("//") {
        let base = base?;
        return base.join(candidate).ok().map(|u| u.to_string());
    }
    None
}

fn looks_downloadable(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());

    FILE_EXTENSIONS.iter().any(|ext| path.contains(ext))
        || DATA_SEGMENTS.iter().any(|seg| path.contains(seg))
}
