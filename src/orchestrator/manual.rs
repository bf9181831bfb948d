//! 人工兜底输入 - 编排层
//!
//! 自动重试耗尽后，引导操作者在终端提供字面答案与题目标识 URL。
//! 只负责交互输入，提交与解释由链运行器完成

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// 操作者提供的人工答案
#[derive(Debug)]
pub struct ManualAnswer {
    /// 字面答案文本（按通用答案提取规则归一化）
    pub answer_text: String,
    /// 提交载荷使用的题目标识 URL
    pub quiz_url: String,
}

/// 读取一组人工输入
///
/// 答案留空表示操作者放弃，返回 None；
/// URL 留空时回退为当前题目 URL
pub async fn prompt_manual_answer(current_url: &str) -> Option<ManualAnswer> {
    info!("🖐️ 自动求解已耗尽，进入人工兜底模式 (当前题目: {})", current_url);

    println!();
    println!("{}", "=".repeat(60));
    println!("人工兜底: 当前题目 {}", current_url);
    println!("请输入字面答案（直接回车放弃本题）:");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let answer_text = lines.next_line().await.ok()??.trim().to_string();
    if answer_text.is_empty() {
        println!("已放弃人工兜底");
        return None;
    }

    println!("请输入提交用的题目标识 URL（直接回车使用当前 URL）:");
    let quiz_url = match lines.next_line().await.ok()? {
        Some(line) if !line.trim().is_empty() => line.trim().to_string(),
        _ => current_url.to_string(),
    };
    println!("{}", "=".repeat(60));

    Some(ManualAnswer {
        answer_text,
        quiz_url,
    })
}
