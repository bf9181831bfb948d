use crate::error::{AppError, ConfigError};

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    // --- 身份凭证 ---
    /// 操作者邮箱（同时用于提交载荷和个性化问题替换）
    pub email: String,
    /// 提交密钥
    pub secret: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 评分端点 ---
    /// 答案提交端点（固定常量，不从页面解析）
    pub submit_endpoint: String,
    // --- 服务器配置 ---
    pub host: String,
    pub port: u16,
    // --- 重试策略 ---
    /// 单题最大重试次数
    pub max_retries_per_question: usize,
    /// 从第几次尝试起强制代码执行路径
    pub escalate_after_attempt: usize,
    /// 单题时间预算（秒，仅在两次尝试之间检查）
    pub question_timeout_secs: u64,
    /// 重试间隔（秒）
    pub retry_backoff_secs: u64,
    // --- 代码执行 ---
    /// 生成代码的解释器
    pub python_bin: String,
    /// 代码执行硬超时（秒）
    pub exec_timeout_secs: u64,
    // --- 浏览器配置 ---
    /// 浏览器可执行文件路径（None 时使用 chromiumoxide 自动探测）
    pub chrome_executable: Option<String>,
    /// 页面渲染等待时间（毫秒）
    pub render_settle_millis: u64,
    // --- 其他 ---
    /// 重试耗尽后是否允许人工兜底输入
    pub manual_fallback: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email: String::new(),
            secret: String::new(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.aipipe.io/v1".to_string(),
            llm_model_name: "openai/gpt-4o-mini".to_string(),
            submit_endpoint: "http://localhost:5000/submit".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_retries_per_question: 2,
            escalate_after_attempt: 2,
            question_timeout_secs: 160,
            retry_backoff_secs: 2,
            python_bin: "python3".to_string(),
            exec_timeout_secs: 60,
            chrome_executable: None,
            render_settle_millis: 1000,
            manual_fallback: false,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            email: std::env::var("QUIZ_EMAIL").unwrap_or(default.email),
            secret: std::env::var("QUIZ_SECRET").unwrap_or(default.secret),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            submit_endpoint: std::env::var("SUBMIT_ENDPOINT").unwrap_or(default.submit_endpoint),
            host: std::env::var("HOST").unwrap_or(default.host),
            port: std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.port),
            max_retries_per_question: std::env::var("MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_retries_per_question),
            escalate_after_attempt: std::env::var("ESCALATE_AFTER_ATTEMPT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.escalate_after_attempt),
            question_timeout_secs: std::env::var("QUESTION_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.question_timeout_secs),
            retry_backoff_secs: std::env::var("RETRY_BACKOFF_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retry_backoff_secs),
            python_bin: std::env::var("PYTHON_BIN").unwrap_or(default.python_bin),
            exec_timeout_secs: std::env::var("EXEC_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.exec_timeout_secs),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok(),
            render_settle_millis: std::env::var("RENDER_SETTLE_MILLIS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.render_settle_millis),
            manual_fallback: std::env::var("MANUAL_FALLBACK").ok().and_then(|v| v.parse().ok()).unwrap_or(default.manual_fallback),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
        }
    }

    /// 校验必需配置项（启动时调用）
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, value) in [
            ("QUIZ_EMAIL", &self.email),
            ("QUIZ_SECRET", &self.secret),
            ("LLM_API_KEY", &self.llm_api_key),
        ] {
            if value.is_empty() {
                return Err(AppError::Config(ConfigError::EnvVarNotFound {
                    var_name: name.to_string(),
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let config = Config {
            email: "user@example.com".to_string(),
            secret: "s3cret".to_string(),
            llm_api_key: "key".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
