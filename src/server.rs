//! 入站 HTTP 服务
//!
//! 信任边界：`POST /` 接收 `{email, secret, url}`，凭证不匹配拒绝 403，
//! 载荷残缺拒绝 400，校验通过后立即应答并在后台任务中运行答题链。
//! 校验在任何页面抓取之前完成

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::orchestrator::ChainRunner;

/// 解题请求体
#[derive(Debug, Deserialize)]
pub struct SolveRequest {
    pub email: String,
    pub secret: String,
    pub url: String,
}

struct AppState {
    config: Config,
}

/// 启动 HTTP 服务（阻塞直到服务结束）
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let state = Arc::new(AppState { config });

    let app = Router::new()
        .route("/", post(handle_solve).get(service_info))
        .route("/health", get(health_check))
        .with_state(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("📡 HTTP 服务监听: {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// 主端点：接收解题任务
async fn handle_solve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    let request = match validate_request(&state.config, &body) {
        Ok(request) => request,
        Err((status, message)) => {
            warn!("请求被拒绝 ({}): {}", status.as_u16(), message);
            return (
                status,
                Json(json!({"status": "error", "message": message})),
            );
        }
    };

    info!("✉️ 接受解题请求: {}", request.url);

    // 后台运行答题链：每条链一个全新的运行器实例
    let config = state.config.clone();
    let initial_url = request.url.clone();
    tokio::spawn(async move {
        match ChainRunner::new(config) {
            Ok(mut runner) => {
                let report = runner.run_chain(&initial_url).await;
                info!(
                    "链路结束: 答对 {}/{}, 跳过 {}, 正常完成: {}",
                    report.correct, report.attempted, report.skipped, report.completed
                );
            }
            Err(e) => error!("链运行器初始化失败: {}", e),
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "status": "accepted",
            "message": "Quiz solving started",
            "url": request.url,
        })),
    )
}

/// 校验请求：结构残缺 → 400；凭证不匹配 → 403
///
/// 在任何页面抓取之前完成
fn validate_request(
    config: &Config,
    body: &JsonValue,
) -> Result<SolveRequest, (StatusCode, &'static str)> {
    let request: SolveRequest = serde_json::from_value(body.clone())
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid request format"))?;

    if request.url.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Invalid request format"));
    }

    if request.secret != config.secret {
        return Err((StatusCode::FORBIDDEN, "Invalid secret"));
    }

    if request.email != config.email {
        return Err((StatusCode::FORBIDDEN, "Email does not match"));
    }

    Ok(request)
}

/// 健康检查端点
async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "healthy", "service": "LLM Analysis Quiz Solver"}))
}

/// 根端点：服务元信息
async fn service_info() -> impl IntoResponse {
    Json(json!({
        "service": "LLM Analysis Quiz Solver",
        "version": "1.0",
        "endpoints": {
            "POST /": "Submit quiz task",
            "GET /health": "Health check",
            "GET /": "API information"
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            email: "user@example.com".to_string(),
            secret: "s3cret".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_validate_accepts_matching_credentials() {
        let body = json!({
            "email": "user@example.com",
            "secret": "s3cret",
            "url": "http://host/quiz/q1"
        });
        let request = validate_request(&test_config(), &body).unwrap();
        assert_eq!(request.url, "http://host/quiz/q1");
    }

    #[test]
    fn test_validate_rejects_secret_mismatch_with_403() {
        // 凭证校验发生在任何页面抓取之前
        let body = json!({
            "email": "user@example.com",
            "secret": "wrong",
            "url": "http://host/quiz/q1"
        });
        let (status, _) = validate_request(&test_config(), &body).unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validate_rejects_email_mismatch_with_403() {
        let body = json!({
            "email": "other@example.com",
            "secret": "s3cret",
            "url": "http://host/quiz/q1"
        });
        let (status, _) = validate_request(&test_config(), &body).unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validate_rejects_missing_fields_with_400() {
        let body = json!({"email": "user@example.com"});
        let (status, _) = validate_request(&test_config(), &body).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
