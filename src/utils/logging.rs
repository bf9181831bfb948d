/// 日志工具模块
///
/// 提供链路运行报告和文本截断的辅助函数
use tracing::info;

/// 记录服务启动信息
pub fn log_startup(host: &str, port: u16, model: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 服务启动 - 自动答题链模式");
    info!("📡 监听地址: {}:{}", host, port);
    info!("🧠 模型: {}", model);
    info!("{}", "=".repeat(60));
}

/// 记录链路开始信息
pub fn log_chain_start(initial_url: &str) {
    info!("\n{}", "=".repeat(60));
    info!("🔗 开始处理答题链: {}", initial_url);
    info!("{}", "=".repeat(60));
}

/// 记录单题开始信息
pub fn log_question_start(question_number: usize, url: &str) {
    info!("\n{}", "─".repeat(60));
    info!("📝 第 {} 题: {}", question_number, url);
    info!("{}", "─".repeat(60));
}

/// 打印链路最终统计
pub fn print_chain_stats(attempted: usize, correct: usize, skipped: usize, started: chrono::DateTime<chrono::Local>) {
    let elapsed = chrono::Local::now().signed_duration_since(started);
    info!("\n{}", "=".repeat(60));
    info!("📊 答题链处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 答对: {}/{}", correct, attempted);
    info!("⏭️ 跳过: {}", skipped);
    info!("⏱️ 总耗时: {} 秒", elapsed.num_seconds());
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdefghij", 5), "abcde...");
    }
}
