use std::fmt;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 页面抓取相关错误
    Fetch(FetchError),
    /// LLM 服务错误
    Llm(LlmError),
    /// 代码执行错误
    Exec(ExecError),
    /// 答案提交错误
    Submit(SubmitError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Fetch(e) => write!(f, "抓取错误: {}", e),
            AppError::Llm(e) => write!(f, "LLM错误: {}", e),
            AppError::Exec(e) => write!(f, "代码执行错误: {}", e),
            AppError::Submit(e) => write!(f, "提交错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Fetch(e) => Some(e),
            AppError::Llm(e) => Some(e),
            AppError::Exec(e) => Some(e),
            AppError::Submit(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

/// 页面抓取相关错误
#[derive(Debug)]
pub enum FetchError {
    /// 启动浏览器失败
    BrowserLaunchFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 导航失败
    NavigationFailed {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 页面内容为空
    EmptyPage { url: String },
    /// 文件下载失败
    DownloadFailed { url: String, status: Option<u16> },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::BrowserLaunchFailed { source } => {
                write!(f, "启动无头浏览器失败: {}", source)
            }
            FetchError::NavigationFailed { url, source } => {
                write!(f, "导航到 {} 失败: {}", url, source)
            }
            FetchError::EmptyPage { url } => write!(f, "页面内容为空: {}", url),
            FetchError::DownloadFailed { url, status } => {
                write!(f, "下载失败 ({}): HTTP {:?}", url, status)
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::BrowserLaunchFailed { source }
            | FetchError::NavigationFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// LLM 服务错误
#[derive(Debug)]
pub enum LlmError {
    /// API 调用失败
    ApiCallFailed {
        model: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 返回内容为空
    EmptyContent { model: String },
    /// 未能从响应中提取代码块
    NoCodeBlock,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ApiCallFailed { model, source } => {
                write!(f, "LLM API调用失败 (模型: {}): {}", model, source)
            }
            LlmError::EmptyContent { model } => {
                write!(f, "LLM返回内容为空 (模型: {})", model)
            }
            LlmError::NoCodeBlock => write!(f, "LLM响应中没有可提取的代码块"),
        }
    }
}

impl std::error::Error for LlmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LlmError::ApiCallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 代码执行错误
#[derive(Debug)]
pub enum ExecError {
    /// 子进程启动失败
    SpawnFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 执行超时（已强制终止）
    Timeout { seconds: u64 },
    /// 脚本以非零状态退出
    NonZeroExit { stderr: String },
    /// 无法从输出中解析结果块
    ResultBlockMissing,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::SpawnFailed { source } => write!(f, "子进程启动失败: {}", source),
            ExecError::Timeout { seconds } => write!(f, "代码执行超时 ({} 秒)", seconds),
            ExecError::NonZeroExit { stderr } => write!(f, "脚本执行失败: {}", stderr),
            ExecError::ResultBlockMissing => write!(f, "无法从执行输出中提取结果"),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::SpawnFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 答案提交错误
#[derive(Debug)]
pub enum SubmitError {
    /// 网络请求失败
    RequestFailed {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 评分端点返回非 200 响应
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// 响应 JSON 解析失败
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::RequestFailed { endpoint, source } => {
                write!(f, "提交请求失败 ({}): {}", endpoint, source)
            }
            SubmitError::BadStatus {
                endpoint,
                status,
                body,
            } => {
                write!(
                    f,
                    "评分端点返回错误 ({}): HTTP {} - {}",
                    endpoint, status, body
                )
            }
            SubmitError::JsonParseFailed { source } => write!(f, "JSON解析失败: {}", source),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::RequestFailed { source, .. } | SubmitError::JsonParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 必需的环境变量不存在
    EnvVarNotFound { var_name: String },
    /// 环境变量解析失败
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarNotFound { var_name } => {
                write!(f, "环境变量 {} 不存在", var_name)
            }
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                    var_name, value, expected_type
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========
// 注意：不需要手动实现 From<AppError> for anyhow::Error，
// 因为 anyhow 已经为所有实现了 std::error::Error 的类型提供了自动实现

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Fetch(FetchError::BrowserLaunchFailed {
            source: Box::new(err),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err.url().map(|u| u.to_string()).unwrap_or_default();
        AppError::Submit(SubmitError::RequestFailed {
            endpoint,
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Submit(SubmitError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Exec(ExecError::SpawnFailed {
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建导航失败错误
    pub fn navigation_failed(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Fetch(FetchError::NavigationFailed {
            url: url.into(),
            source: Box::new(source),
        })
    }

    /// 创建LLM API调用错误
    pub fn llm_api_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Llm(LlmError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建执行超时错误
    pub fn exec_timeout(seconds: u64) -> Self {
        AppError::Exec(ExecError::Timeout { seconds })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
