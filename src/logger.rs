//! 日志初始化
//!
//! 基于 tracing-subscriber，支持 RUST_LOG 环境变量过滤

use tracing_subscriber::EnvFilter;

/// 初始化全局日志订阅器
///
/// 默认级别 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
