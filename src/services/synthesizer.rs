//! 答案合成 - 业务能力层
//!
//! 构建三类提示词（策略判定 / 直接作答 / 代码生成），并从模型的自由
//! 文本输出中提取归一化答案或代码块。
//!
//! 职责：
//! - 只处理单个题目
//! - 不持有 LLM 连接（LlmService 作为参数传入）
//! - 不关心重试和流程顺序

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::models::{material_filename, Answer, FileMaterial, MaterialSet};
use crate::services::llm_service::LlmService;

/// 个性化问题的固定短语集合（大小写不敏感的子串匹配）
const PERSONALIZATION_MARKERS: &[&str] = &["your email", "<your email>", "youremail"];

/// PDF 页文本在提示词中的截断长度
const PDF_PAGE_PREVIEW: usize = 500;

/// 答案合成服务
pub struct AnswerSynthesizer {
    /// 操作者邮箱，用于个性化问题替换
    operator_email: String,
}

impl AnswerSynthesizer {
    pub fn new(config: &Config) -> Self {
        Self {
            operator_email: config.email.clone(),
        }
    }

    /// 直接作答
    ///
    /// 提示词包含完整题目文本与全部材料摘要（表格为全量行序列化，
    /// 让模型做精确聚合而非凭采样估算），图片材料同时作为视觉输入。
    ///
    /// # 返回
    /// 归一化答案；模型输出为空时返回 None
    pub async fn answer_directly(
        &self,
        llm: &LlmService,
        question: &str,
        materials: &MaterialSet,
    ) -> Result<Option<Answer>> {
        let prompt = self.build_direct_prompt(question, materials);
        let image_uris = collect_image_uris(materials);
        let imgs = (!image_uris.is_empty()).then_some(image_uris.as_slice());

        let response = llm.send_to_llm(&prompt, None, imgs).await?;

        debug!("直接作答响应: {}", crate::utils::logging::truncate_text(&response, 200));

        if response.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(extract_answer(&response)))
    }

    /// 生成解题代码
    ///
    /// 无条件要求一段完整、自包含、可运行的 Python 脚本：文件按展示
    /// 文件名存在于工作目录，最终值存入变量 `answer`，图表/表格产物落盘
    pub async fn generate_code(
        &self,
        llm: &LlmService,
        question: &str,
        materials: &MaterialSet,
    ) -> Result<Option<String>> {
        let prompt = self.build_code_generation_prompt(question, materials);
        let response = llm.send_to_llm(&prompt, None, None).await?;

        let code = extract_code_block(&response);
        if let Some(code) = &code {
            info!("✓ 代码生成成功 ({} 字符)", code.len());
        }
        Ok(code)
    }

    /// 构建策略判定提示词（供策略选择器使用）
    pub fn build_strategy_prompt(&self, question: &str, materials: &MaterialSet) -> String {
        let mut parts = vec![
            "Analyze this quiz question and determine the best solution approach.".to_string(),
            String::new(),
            "QUIZ QUESTION:".to_string(),
            question.to_string(),
            String::new(),
        ];

        if !materials.is_empty() {
            parts.push("AVAILABLE DATA FILES:".to_string());
            for (key, material) in materials.iter() {
                parts.push(format!("- {} (Type: {})", key, material.kind().name()));
            }
            parts.push(String::new());
        }

        parts.extend(
            [
                "TASK:",
                "Determine if this question requires:",
                "1. DIRECT ANSWER: Simple calculation, data lookup, or text processing that you can solve directly",
                "2. CODE EXECUTION: Complex tasks like:",
                "   - Creating visualizations (charts, plots, graphs)",
                "   - Machine learning models (regression, classification, clustering)",
                "   - Complex data transformations or aggregations",
                "   - Generating files (CSV, images, etc.)",
                "   - Statistical analysis requiring specific libraries",
                "",
                "If CODE EXECUTION is needed:",
                "- Write complete, executable Python code",
                "- Use standard libraries: pandas, numpy, matplotlib, seaborn, sklearn, etc.",
                "- Store the final answer in a variable called 'answer'",
                "- For visualizations, save to a file (e.g., plt.savefig('output.png'))",
                "- Include all necessary imports",
                "- Handle file reading (files are available in current directory)",
                "",
                "Respond with:",
                "STRATEGY: [DIRECT or CODE_EXECUTION]",
                "",
                "If CODE_EXECUTION, provide:",
                "```python",
                "# Your complete Python code here",
                "```",
            ]
            .map(str::to_string),
        );

        parts.join("\n")
    }

    /// 构建直接作答提示词
    fn build_direct_prompt(&self, question: &str, materials: &MaterialSet) -> String {
        let mut parts = vec![
            "You are solving a data analysis quiz. Analyze carefully and provide the CORRECT FINAL ANSWER ONLY, WITHOUT ANY EXPLANATIONS/STEPS.".to_string(),
            String::new(),
            "QUIZ QUESTION:".to_string(),
            question.to_string(),
            String::new(),
        ];

        if !materials.is_empty() {
            parts.push("DOWNLOADED FILES AND IMAGES:".to_string());
            for (key, material) in materials.iter() {
                parts.push(render_material_summary(key, material));
            }
            parts.push(String::new());
        }

        if let Some(note) = self.personalization_note(question) {
            parts.push(note);
            parts.push(String::new());
        }

        parts.extend(
            [
                "INSTRUCTIONS:",
                "1. Read the question carefully (including any images)",
                "2. Analyze any provided data",
                "3. Perform required calculations/analysis",
                "4. RETURN ONLY THE FINAL ANSWER IN THE REQUIRED FORMAT:",
                "   - Number: just the number (e.g., 12345)",
                "   - String: just the string (e.g., hello), no surrounding quotes unless requested",
                "   - Boolean: true or false",
                "   - JSON: valid JSON object",
                "   - Image: base64 data URI (data:image/png;base64,...)",
                "   - Multiple commands: newline-separated literal lines",
                "",
                "FINAL ANSWER:",
            ]
            .map(str::to_string),
        );

        parts.join("\n")
    }

    /// 构建代码生成提示词
    fn build_code_generation_prompt(&self, question: &str, materials: &MaterialSet) -> String {
        let mut parts = vec![
            "Generate Python code to solve this quiz question.".to_string(),
            String::new(),
            "QUIZ QUESTION:".to_string(),
            question.to_string(),
            String::new(),
        ];

        if !materials.is_empty() {
            parts.push("AVAILABLE DATA FILES:".to_string());
            for (key, material) in materials.iter() {
                // 展示文件名与落盘文件名来自同一个函数，保证生成代码能读到文件
                let filename = material_filename(key, material);
                parts.push(format!("- {} (Type: {})", filename, material.kind().name()));

                if let FileMaterial::Csv(t) | FileMaterial::Excel(t) = material {
                    parts.push(format!("  Columns: {:?}", t.column_names));
                }
            }
            parts.push(String::new());
        }

        parts.extend(
            [
                "REQUIREMENTS:",
                "1. Write complete, executable Python code",
                "2. Import all necessary libraries (pandas, numpy, matplotlib, sklearn, etc.)",
                "3. Read data files from current directory using their filenames",
                "4. Store the final answer in a variable called 'answer'",
                "5. For visualizations:",
                "   - Create the plot/chart",
                "   - Save to a file (e.g., plt.savefig('output.png'))",
                "   - Use high DPI for quality (dpi=300)",
                "6. For CSV output:",
                "   - Save to a file (e.g., df.to_csv('output.csv', index=False))",
                "7. Handle errors gracefully",
                "",
                "OUTPUT FORMAT:",
                "Provide ONLY the Python code in a code block:",
                "```python",
                "# Your code here",
                "```",
            ]
            .map(str::to_string),
        );

        parts.join("\n")
    }

    /// 题目含个性化短语时生成替换指令
    fn personalization_note(&self, question: &str) -> Option<String> {
        let lower = question.to_lowercase();
        let matched = PERSONALIZATION_MARKERS
            .iter()
            .any(|marker| lower.contains(marker));

        matched.then(|| {
            format!(
                "PERSONALIZATION:\nWhen the question refers to \"your email\" (or similar), substitute this literal value: {}",
                self.operator_email
            )
        })
    }
}

/// 渲染单个材料的提示词摘要
fn render_material_summary(key: &str, material: &FileMaterial) -> String {
    match material {
        FileMaterial::Image(media) => {
            let preview: String = media.data_uri.chars().take(100).collect();
            format!(
                "\n{}:\nType: Image\nAlt text: {}\nData URI: {}... (truncated)\nNOTE: Full base64 image data available for vision analysis",
                key,
                media.alt_text.as_deref().unwrap_or("N/A"),
                preview
            )
        }
        FileMaterial::Audio(media) => {
            let preview: String = media.data_uri.chars().take(100).collect();
            format!(
                "\n{}:\nType: Audio ({})\nData URI: {}... (truncated)",
                key, media.mime_type, preview
            )
        }
        FileMaterial::Csv(t) | FileMaterial::Excel(t) => {
            let full = serde_json::to_string_pretty(&t.full_rows).unwrap_or_default();
            let mut summary = format!(
                "\nFile: {}\nType: {}\nShape: ({}, {})\nColumns: {:?}\nComplete data: {}",
                key,
                material.kind().name(),
                t.row_count,
                t.column_count,
                t.column_names,
                full
            );
            if let Some(stats) = &t.summary_statistics {
                summary.push_str(&format!(
                    "\nSummary statistics: {}",
                    serde_json::to_string(stats).unwrap_or_default()
                ));
            }
            summary
        }
        FileMaterial::Pdf {
            page_texts,
            page_count,
        } => {
            let mut summary = format!("\nFile: {}\nType: PDF\nPages: {}", key, page_count);
            for (i, text) in page_texts.iter().enumerate() {
                let preview: String = text.chars().take(PDF_PAGE_PREVIEW).collect();
                summary.push_str(&format!("\n\nPage {}:\n{}", i + 1, preview));
            }
            summary
        }
        FileMaterial::Json { value } => {
            format!(
                "\nFile: {}\nType: JSON\nData: {}",
                key,
                serde_json::to_string_pretty(value).unwrap_or_default()
            )
        }
        FileMaterial::Text { content } => {
            format!(
                "\nFile: {}\nType: Text\nContent: {}",
                key,
                crate::utils::logging::truncate_text(content, 2000)
            )
        }
    }
}

/// 收集图片材料的 data-URI（作为视觉输入）
fn collect_image_uris(materials: &MaterialSet) -> Vec<String> {
    materials
        .iter()
        .filter_map(|(_, m)| match m {
            FileMaterial::Image(media) => Some(media.data_uri.clone()),
            _ => None,
        })
        .collect()
}

// ========== 答案 / 代码提取 ==========

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+\.?\d*").unwrap())
}

fn code_fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z0-9]*\s*(.*?)```").unwrap())
}

/// 从模型的自由文本中提取归一化答案
///
/// 优先级：
/// 1. 第一个配平的 `{...}` / `[...]` 子串解析为 JSON
/// 2. 整体是 data-URI 时原样返回（避免 base64 被数字扫描截取）
/// 3. 第一个数字 token（含小数点按浮点，否则按整数）
/// 4. 整体等于 true/yes/false/no（大小写不敏感）按布尔
/// 5. 其余原样返回修剪后的文本
///
/// 该顺序意味着 `"Result: 42 items"` 提取为数字 42，是刻意行为
pub fn extract_answer(text: &str) -> Answer {
    let trimmed = text.trim();

    if let Some(value) = find_balanced_json(trimmed) {
        return Answer::Json(value);
    }

    if trimmed.starts_with("data:") && trimmed.contains(";base64,") && !trimmed.contains(char::is_whitespace) {
        return Answer::DataUri(trimmed.to_string());
    }

    if let Some(m) = number_regex().find(trimmed) {
        let token = m.as_str();
        if token.contains('.') {
            if let Ok(f) = token.parse::<f64>() {
                return Answer::Float(f);
            }
        }
        if let Ok(i) = token.trim_end_matches('.').parse::<i64>() {
            return Answer::Int(i);
        }
    }

    match trimmed.to_lowercase().as_str() {
        "true" | "yes" => return Answer::Bool(true),
        "false" | "no" => return Answer::Bool(false),
        _ => {}
    }

    Answer::Text(trimmed.to_string())
}

/// 提取第一个配平的 JSON 对象/数组子串
fn find_balanced_json(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();

    for (start, &b) in bytes.iter().enumerate() {
        let close = match b {
            b'{' => b'}',
            b'[' => b']',
            _ => continue,
        };

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &c) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                _ if in_string => {}
                _ if c == b => depth += 1,
                _ if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..start + offset + 1];
                        if let Ok(value) = serde_json::from_str(candidate) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    None
}

/// 提取响应中的第一个代码块（语言标签可选，首尾去空白）
pub fn extract_code_block(response: &str) -> Option<String> {
    code_fence_regex()
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
        .filter(|code| !code.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaData, TabularData};
    use serde_json::json;

    #[test]
    fn test_extract_answer_integer() {
        assert_eq!(extract_answer("42"), Answer::Int(42));
    }

    #[test]
    fn test_extract_answer_float() {
        assert_eq!(extract_answer("45.67"), Answer::Float(45.67));
    }

    #[test]
    fn test_extract_answer_boolean() {
        assert_eq!(extract_answer("true"), Answer::Bool(true));
        assert_eq!(extract_answer("NO"), Answer::Bool(false));
    }

    #[test]
    fn test_extract_answer_json_object() {
        assert_eq!(extract_answer(r#"{"a":1}"#), Answer::Json(json!({"a": 1})));
    }

    #[test]
    fn test_extract_answer_number_inside_prose() {
        // 设计上的刻意行为：文字环绕的数字提取为数字
        assert_eq!(extract_answer("Result: 42 items"), Answer::Int(42));
    }

    #[test]
    fn test_extract_answer_data_uri_passthrough() {
        let uri = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(extract_answer(uri), Answer::DataUri(uri.to_string()));
    }

    #[test]
    fn test_extract_answer_plain_string() {
        assert_eq!(
            extract_answer("  dataquest  "),
            Answer::Text("dataquest".to_string())
        );
    }

    #[test]
    fn test_extract_answer_json_takes_priority_over_number() {
        assert_eq!(
            extract_answer(r#"The result is {"count": 7}"#),
            Answer::Json(json!({"count": 7}))
        );
    }

    #[test]
    fn test_extract_answer_skips_unparsable_braces() {
        // 非法 JSON 花括号不阻止数字提取
        assert_eq!(extract_answer("{not json} 15"), Answer::Int(15));
    }

    #[test]
    fn test_extract_code_block_with_language_tag() {
        let response = "STRATEGY: CODE_EXECUTION\n```python\nanswer = 1 + 1\n```";
        assert_eq!(extract_code_block(response).unwrap(), "answer = 1 + 1");
    }

    #[test]
    fn test_extract_code_block_without_tag() {
        let response = "```\nprint('hi')\n```";
        assert_eq!(extract_code_block(response).unwrap(), "print('hi')");
    }

    #[test]
    fn test_extract_code_block_absent() {
        assert!(extract_code_block("no code here").is_none());
    }

    #[test]
    fn test_personalization_note_detects_markers() {
        let config = Config {
            email: "me@example.com".to_string(),
            ..Config::default()
        };
        let synth = AnswerSynthesizer::new(&config);

        assert!(synth
            .personalization_note("What is YOUR EMAIL address?")
            .is_some());
        assert!(synth.personalization_note("Sum the sales column").is_none());
    }

    #[test]
    fn test_code_prompt_uses_materialized_filenames() {
        let config = Config::default();
        let synth = AnswerSynthesizer::new(&config);

        let mut materials = MaterialSet::new();
        materials.insert(
            "http://h/files/report.xlsx",
            crate::models::FileMaterial::Excel(TabularData {
                row_count: 1,
                column_count: 1,
                column_names: vec!["a".to_string()],
                sample_rows: vec![json!({"a": 1})],
                summary_statistics: None,
                full_rows: vec![json!({"a": 1})],
            }),
        );

        let prompt = synth.build_code_generation_prompt("q", &materials);
        // Excel 落盘为 CSV，提示词必须展示实际文件名
        assert!(prompt.contains("report.csv"));
        assert!(!prompt.contains("report.xlsx (Type:"));
    }

    #[test]
    fn test_direct_prompt_serializes_full_rows() {
        let config = Config::default();
        let synth = AnswerSynthesizer::new(&config);

        let rows: Vec<serde_json::Value> =
            (0..20).map(|i| json!({"sales": i * 100})).collect();
        let mut materials = MaterialSet::new();
        materials.insert(
            "sales.csv",
            crate::models::FileMaterial::Csv(TabularData {
                row_count: rows.len(),
                column_count: 1,
                column_names: vec!["sales".to_string()],
                sample_rows: rows.iter().take(10).cloned().collect(),
                summary_statistics: None,
                full_rows: rows,
            }),
        );

        let prompt = synth.build_direct_prompt("sum?", &materials);
        // 全量行都在提示词里（第 19 行，超出采样窗口）
        assert!(prompt.contains("1900"));
    }

    #[test]
    fn test_collect_image_uris() {
        let mut materials = MaterialSet::new();
        materials.insert(
            "image_0",
            crate::models::FileMaterial::Image(MediaData {
                data_uri: "data:image/png;base64,AA".to_string(),
                mime_type: "image/png".to_string(),
                size_bytes: 2,
                alt_text: None,
            }),
        );
        materials.insert(
            "note.txt",
            crate::models::FileMaterial::Text {
                content: "x".to_string(),
            },
        );

        let uris = collect_image_uris(&materials);
        assert_eq!(uris, vec!["data:image/png;base64,AA".to_string()]);
    }
}
