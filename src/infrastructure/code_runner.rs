//! 代码执行器 - 基础设施层
//!
//! 持有临时目录这一稀缺资源，只暴露"执行一段生成代码"的能力。
//!
//! 执行模型：材料落盘到独占的 scratch 子目录 → 用户代码包进错误捕获
//! 包装脚本 → 以独立子进程运行（进程外沙箱边界，保证超时强杀与崩溃
//! 隔离）→ 从标准输出的定界结果块解析答案。
//!
//! 不认识 Question / Chain，不处理业务流程

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value as JsonValue;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{material_filename, Answer, FileMaterial, MaterialSet, MediaData, TabularData};
use crate::services::file_decoder::mime_for_extension;

/// 结果块定界标记
const RESULT_START: &str = "__QUIZ_RESULT_START__";
const RESULT_END: &str = "__QUIZ_RESULT_END__";

/// 脚本失败时保留的 stderr 头部长度（保留最前面的失败原因）
const STDERR_HEAD: usize = 2000;

/// 一次代码执行的结果
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub value: Option<Answer>,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    fn success(value: Answer) -> Self {
        Self {
            succeeded: true,
            value: Some(value),
            error_message: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            value: None,
            error_message: Some(message.into()),
        }
    }
}

/// 代码执行器
///
/// 职责：
/// - 持有执行根目录，进程退出时整树释放（尽力而为，失败只记日志）
/// - 每次执行分配独占的子目录，执行结束立即释放
/// - 不跨执行共享任何文件
pub struct CodeRunner {
    root: TempDir,
    python_bin: String,
    exec_timeout: Duration,
}

impl CodeRunner {
    /// 创建新的代码执行器（分配执行根目录）
    pub fn new(config: &Config) -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("quiz_exec_")
            .tempdir()
            .context("创建执行根目录失败")?;

        debug!("执行根目录: {}", root.path().display());

        Ok(Self {
            root,
            python_bin: config.python_bin.clone(),
            exec_timeout: Duration::from_secs(config.exec_timeout_secs),
        })
    }

    /// 执行一段生成代码
    ///
    /// # 参数
    /// - `code`: 模型生成的 Python 代码（原样嵌入包装脚本）
    /// - `materials`: 文件材料，执行前落盘到 scratch 目录
    pub async fn run(&self, code: &str, materials: &MaterialSet) -> ExecutionResult {
        let exec_dir = match tempfile::Builder::new()
            .prefix("run_")
            .tempdir_in(self.root.path())
        {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::failure(format!("创建执行目录失败: {}", e)),
        };

        materialize_materials(exec_dir.path(), materials);

        let script = wrap_code(code);
        let script_path = exec_dir.path().join("quiz_solution.py");
        if let Err(e) = std::fs::write(&script_path, &script) {
            return ExecutionResult::failure(format!("写入脚本失败: {}", e));
        }

        info!("🐍 执行生成代码 ({} 字符)", code.len());

        let result = self.run_script(&script_path, exec_dir.path()).await;

        // 立即释放本次执行的 scratch 目录
        if let Err(e) = exec_dir.close() {
            warn!("清理执行目录失败: {}", e);
        }

        result
    }

    async fn run_script(&self, script_path: &Path, exec_dir: &Path) -> ExecutionResult {
        let child = Command::new(&self.python_bin)
            .arg(script_path)
            .current_dir(exec_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return ExecutionResult::failure(format!("子进程启动失败: {}", e)),
        };

        // 超时即丢弃 future，kill_on_drop 保证子进程被强制终止
        let output = match timeout(self.exec_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ExecutionResult::failure(format!("等待子进程失败: {}", e)),
            Err(_) => {
                warn!("⏱️ 代码执行超时 ({} 秒)，已强制终止", self.exec_timeout.as_secs());
                return ExecutionResult::failure("Code execution timeout");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let head: String = stderr.chars().take(STDERR_HEAD).collect();
            warn!("脚本非零退出: {:?}", output.status.code());
            return ExecutionResult::failure(format!("Execution failed: {}", head));
        }

        match parse_marker_block(&stdout) {
            Some(payload) => self.interpret_payload(payload, exec_dir),
            None => ExecutionResult::failure("Could not extract result from execution"),
        }
    }

    /// 解释结果块：优先 result 字段，其次 output_file
    fn interpret_payload(&self, payload: JsonValue, exec_dir: &Path) -> ExecutionResult {
        if let Some(result) = payload.get("result") {
            return ExecutionResult::success(Answer::from_json(result.clone()));
        }

        if let Some(output_file) = payload.get("output_file").and_then(|v| v.as_str()) {
            return match convert_output_file(exec_dir, output_file) {
                Some(answer) => ExecutionResult::success(answer),
                None => {
                    ExecutionResult::failure(format!("输出文件无法转换: {}", output_file))
                }
            };
        }

        ExecutionResult::failure("Could not extract result from execution")
    }
}

impl Drop for CodeRunner {
    /// 整树释放执行根目录：尽力而为，失败只记日志
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(self.root.path()) {
            warn!("清理执行根目录失败 ({}): {}", self.root.path().display(), e);
        }
    }
}

/// 材料落盘（单文件失败不致命：记日志后跳过，脚本仍会运行）
fn materialize_materials(dir: &Path, materials: &MaterialSet) {
    for (key, material) in materials.iter() {
        let filename = material_filename(key, material);
        let path = dir.join(&filename);
        match write_material(&path, material) {
            Ok(()) => debug!("落盘材料: {}", filename),
            Err(e) => warn!("材料落盘失败 ({}), 跳过: {}", filename, e),
        }
    }
}

fn write_material(path: &Path, material: &FileMaterial) -> Result<()> {
    match material {
        FileMaterial::Csv(t) | FileMaterial::Excel(t) => write_tabular_csv(path, t),
        FileMaterial::Json { value } => {
            std::fs::write(path, serde_json::to_string_pretty(value)?)?;
            Ok(())
        }
        FileMaterial::Pdf { page_texts, .. } => {
            let mut content = String::new();
            for (i, text) in page_texts.iter().enumerate() {
                content.push_str(&format!("Page {}:\n{}\n\n", i + 1, text));
            }
            std::fs::write(path, content)?;
            Ok(())
        }
        FileMaterial::Image(media) | FileMaterial::Audio(media) => {
            std::fs::write(path, decode_data_uri(media)?)?;
            Ok(())
        }
        FileMaterial::Text { content } => {
            std::fs::write(path, content)?;
            Ok(())
        }
    }
}

/// 表格材料统一落为 CSV（列顺序取 column_names）
fn write_tabular_csv(path: &Path, t: &TabularData) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&t.column_names)?;

    for row in &t.full_rows {
        let record: Vec<String> = t
            .column_names
            .iter()
            .map(|name| cell_to_string(row.get(name)))
            .collect();
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn cell_to_string(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// data-URI 还原为原始字节
fn decode_data_uri(media: &MediaData) -> Result<Vec<u8>> {
    let (_, b64) = media
        .data_uri
        .split_once(',')
        .context("data-URI 缺少逗号分隔")?;
    Ok(BASE64.decode(b64)?)
}

/// 把用户代码包进错误捕获包装脚本
///
/// 固定输出协议：用户代码之后立即注入序列化步骤，先查 `answer` 再查
/// `result` 绑定，都没有时扫描新生成的产物文件，最后把结果写入定界
/// JSON 块。用户代码抛异常时输出到 stderr 并以非零状态退出，不产生
/// 结果块
fn wrap_code(code: &str) -> String {
    let indented = indent_code(code, 4);

    format!(
        r#"import sys
import json
from pathlib import Path

__ARTIFACT_GLOBS__ = ['*.png', '*.jpg', '*.jpeg', '*.svg', '*.csv', '*.json', '*.xlsx']
__preexisting__ = set(str(p) for g in __ARTIFACT_GLOBS__ for p in Path('.').glob(g))

__result__ = None
__output_file__ = None

try:
    # ---- user code start ----
{indented}
    # ---- user code end ----

    __g__ = globals()
    if 'answer' in __g__:
        __result__ = __g__['answer']
    elif 'result' in __g__:
        __result__ = __g__['result']

    if __result__ is None:
        __artifacts__ = [p for g in __ARTIFACT_GLOBS__ for p in Path('.').glob(g)
                         if str(p) not in __preexisting__]
        if __artifacts__:
            __latest__ = max(__artifacts__, key=lambda p: p.stat().st_mtime)
            __output_file__ = str(__latest__)

except Exception as e:
    print(f"EXECUTION_ERROR: {{e}}", file=sys.stderr)
    import traceback
    traceback.print_exc()
    sys.exit(1)

__payload__ = {{}}
if __result__ is not None:
    __payload__['result'] = __result__
if __output_file__:
    __payload__['output_file'] = __output_file__

print("{RESULT_START}")
print(json.dumps(__payload__, default=str))
print("{RESULT_END}")
"#,
        indented = indented,
        RESULT_START = RESULT_START,
        RESULT_END = RESULT_END,
    )
}

fn indent_code(code: &str, spaces: usize) -> String {
    let indent = " ".repeat(spaces);
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 从标准输出解析定界结果块
fn parse_marker_block(stdout: &str) -> Option<JsonValue> {
    let start = stdout.find(RESULT_START)? + RESULT_START.len();
    let end_offset = stdout[start..].find(RESULT_END)?;
    let block = stdout[start..start + end_offset].trim();
    serde_json::from_str(block).ok()
}

/// 按扩展名把输出文件转换为答案
///
/// 图片族转对应 MIME 的 data-URI；.json 读取并返回解析值；
/// 其余（含 csv / xlsx）转 type 对应或 octet-stream 的 base64 data-URI
fn convert_output_file(exec_dir: &Path, relative: &str) -> Option<Answer> {
    let path = exec_dir.join(relative);
    if !path.exists() {
        warn!("输出文件不存在: {}", path.display());
        return None;
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "svg" => {
            let bytes = std::fs::read(&path).ok()?;
            let mime = mime_for_extension(&ext).unwrap_or("application/octet-stream");
            Some(Answer::DataUri(format!(
                "data:{};base64,{}",
                mime,
                BASE64.encode(&bytes)
            )))
        }
        "json" => {
            let bytes = std::fs::read(&path).ok()?;
            let value: JsonValue = serde_json::from_slice(&bytes).ok()?;
            Some(Answer::from_json(value))
        }
        _ => {
            let bytes = std::fs::read(&path).ok()?;
            let mime = mime_for_extension(&ext).unwrap_or("application/octet-stream");
            Some(Answer::DataUri(format!(
                "data:{};base64,{}",
                mime,
                BASE64.encode(&bytes)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::file_decoder;
    use serde_json::json;

    fn sales_tabular() -> TabularData {
        let rows: Vec<JsonValue> = [2000, 3500, 4000, 2500, 3000]
            .iter()
            .map(|v| json!({"sales": v}))
            .collect();
        TabularData {
            row_count: rows.len(),
            column_count: 1,
            column_names: vec!["sales".to_string()],
            sample_rows: rows.clone(),
            summary_statistics: None,
            full_rows: rows,
        }
    }

    #[test]
    fn test_csv_materialize_decode_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let material = FileMaterial::Csv(sales_tabular());
        let path = dir.path().join("sales.csv");

        write_material(&path, &material).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let decoded = file_decoder::decode("sales.csv", &bytes, "text/csv").unwrap();
        let FileMaterial::Csv(t) = decoded else {
            panic!("应解码为 CSV");
        };
        assert_eq!(t.column_names, vec!["sales"]);
        assert_eq!(t.row_count, 5);
        assert_eq!(t.full_rows[2]["sales"], json!(4000));
    }

    #[test]
    fn test_materialize_pdf_as_text_with_page_headers() {
        let dir = tempfile::tempdir().unwrap();
        let material = FileMaterial::Pdf {
            page_texts: vec!["first".to_string(), "second".to_string()],
            page_count: 2,
        };
        let path = dir.path().join("doc.txt");

        write_material(&path, &material).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Page 1:\nfirst"));
        assert!(content.contains("Page 2:\nsecond"));
    }

    #[test]
    fn test_materialize_image_from_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let material = FileMaterial::Image(MediaData {
            data_uri: format!("data:image/png;base64,{}", BASE64.encode([1u8, 2, 3])),
            mime_type: "image/png".to_string(),
            size_bytes: 3,
            alt_text: None,
        });
        let path = dir.path().join("image_0.png");

        write_material(&path, &material).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1u8, 2, 3]);
    }

    #[test]
    fn test_parse_marker_block() {
        let stdout = format!(
            "noise before\n{}\n{{\"result\": 15000}}\n{}\ntrailing",
            RESULT_START, RESULT_END
        );
        let payload = parse_marker_block(&stdout).unwrap();
        assert_eq!(payload["result"], json!(15000));
    }

    #[test]
    fn test_parse_marker_block_missing() {
        assert!(parse_marker_block("no markers at all").is_none());
        assert!(parse_marker_block(RESULT_START).is_none());
    }

    #[test]
    fn test_wrap_code_structure() {
        let wrapped = wrap_code("answer = 1 + 1");
        assert!(wrapped.contains("    answer = 1 + 1"));
        assert!(wrapped.contains(RESULT_START));
        assert!(wrapped.contains(RESULT_END));
        assert!(wrapped.contains("sys.exit(1)"));
    }

    #[test]
    fn test_convert_output_file_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.json"), br#"{"total": 7}"#).unwrap();

        let answer = convert_output_file(dir.path(), "out.json").unwrap();
        assert_eq!(answer, Answer::Json(json!({"total": 7})));
    }

    #[test]
    fn test_convert_output_file_image_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plot.png"), [9u8, 8, 7]).unwrap();

        let answer = convert_output_file(dir.path(), "plot.png").unwrap();
        let Answer::DataUri(uri) = answer else {
            panic!("应转换为 data-URI");
        };
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_convert_output_file_csv_generic_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.csv"), "a,b\n1,2\n").unwrap();

        let answer = convert_output_file(dir.path(), "out.csv").unwrap();
        let Answer::DataUri(uri) = answer else {
            panic!("应转换为 data-URI");
        };
        assert!(uri.starts_with("data:text/csv;base64,"));
    }

    #[test]
    fn test_convert_output_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(convert_output_file(dir.path(), "absent.png").is_none());
    }

    /// 需要本机 python3，默认忽略：cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_run_captures_answer_variable() {
        let config = Config::default();
        let runner = CodeRunner::new(&config).unwrap();

        let result = runner.run("answer = 2 + 3", &MaterialSet::new()).await;

        assert!(result.succeeded, "执行失败: {:?}", result.error_message);
        assert_eq!(result.value, Some(Answer::Int(5)));
    }

    /// 需要本机 python3，默认忽略
    #[tokio::test]
    #[ignore]
    async fn test_run_timeout_kills_process() {
        let config = Config {
            exec_timeout_secs: 1,
            ..Config::default()
        };
        let runner = CodeRunner::new(&config).unwrap();

        let result = runner
            .run("import time\ntime.sleep(30)\nanswer = 1", &MaterialSet::new())
            .await;

        assert!(!result.succeeded);
        assert!(result
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("timeout"));

        // 超时后 scratch 根目录下不应残留执行目录
        let leftovers = std::fs::read_dir(runner.root.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    /// 需要本机 python3，默认忽略
    #[tokio::test]
    #[ignore]
    async fn test_run_error_reports_stderr() {
        let config = Config::default();
        let runner = CodeRunner::new(&config).unwrap();

        let result = runner
            .run("raise ValueError('boom')", &MaterialSet::new())
            .await;

        assert!(!result.succeeded);
        assert!(result
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("EXECUTION_ERROR"));
    }
}
