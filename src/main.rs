use anyhow::Result;
use quiz_chain_solver::utils::logging;
use quiz_chain_solver::{logger, server, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init();

    // 加载并校验配置
    let config = Config::from_env();
    config.validate()?;

    logging::log_startup(&config.host, config.port, &config.llm_model_name);

    // 启动 HTTP 服务（每个请求在后台运行一条答题链）
    server::serve(config).await?;

    Ok(())
}
