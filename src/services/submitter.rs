//! 答案提交 - 业务能力层
//!
//! 只负责"提交并解释响应"能力。HTTP 层错误不向上抛，统一归一化为
//! 非正确的 SubmitOutcome（原始原因进 reason），由流程层决定重试

use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::models::{Answer, SubmitOutcome, SubmitPayload, SubmitResponse};
use crate::utils::logging::truncate_text;

/// 提交服务
pub struct Submitter {
    http: reqwest::Client,
    endpoint: String,
    email: String,
    secret: String,
}

impl Submitter {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http,
            endpoint: config.submit_endpoint.clone(),
            email: config.email.clone(),
            secret: config.secret.clone(),
        }
    }

    /// 提交答案到评分端点
    ///
    /// # 参数
    /// - `quiz_identifier`: 题目标识 URL（载荷中的 url 字段）
    /// - `answer`: 归一化答案
    pub async fn submit(&self, quiz_identifier: &str, answer: Answer) -> SubmitOutcome {
        let payload = SubmitPayload {
            email: self.email.clone(),
            secret: self.secret.clone(),
            url: quiz_identifier.to_string(),
            answer,
        };

        info!("📤 提交答案到 {}", self.endpoint);
        if let Ok(preview) = serde_json::to_string(&payload) {
            info!("提交载荷预览: {}", truncate_text(&preview, 500));
        }

        let response = match self.http.post(&self.endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("提交请求失败: {}", e);
                return SubmitOutcome::incorrect(format!("Submission request failed: {}", e));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        info!("评分响应: HTTP {} - {}", status.as_u16(), truncate_text(&body, 300));

        if !status.is_success() {
            return SubmitOutcome::incorrect(format!("HTTP {}: {}", status.as_u16(), body));
        }

        match serde_json::from_str::<SubmitResponse>(&body) {
            Ok(resp) => SubmitOutcome::from(resp),
            Err(e) => {
                warn!("评分响应解析失败: {}", e);
                SubmitOutcome::incorrect(format!("Unparsable scoring response: {}", e))
            }
        }
    }
}
