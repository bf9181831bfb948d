//! LLM 服务 - 业务能力层
//!
//! 只负责"调用模型"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use tracing::{debug, warn};

use crate::config::Config;

/// LLM 服务
///
/// 职责：
/// - 封装模型后端的聊天调用
/// - 支持附带图片（data-URI 或 URL）的视觉输入
/// - 不构建业务提示词
/// - 不解析答案
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    /// - `imgs`: 图片 URL 列表（可选），会以视觉输入追加到用户消息中
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        imgs: Option<&[String]>,
    ) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());
        if let Some(img_urls) = imgs {
            debug!("包含 {} 张图片", img_urls.len());
        }

        // 构建消息列表
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        // 构建用户消息内容（支持图片）
        let user_msg = if let Some(img_urls) = imgs.filter(|urls| !urls.is_empty()) {
            // 使用 Vision API：构建包含文本和图片的内容
            let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();

            content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: user_message.to_string(),
                },
            ));

            for url in img_urls.iter() {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::Auto),
                        },
                    },
                ));
            }

            debug!("使用 Vision API，包含 {} 张图片", img_urls.len());

            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()?
        } else {
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()?
        };

        messages.push(ChatCompletionRequestMessage::User(user_msg));

        // 构建请求（低温度保证答案稳定，额度放宽到代码生成够用）
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.1)
            .max_tokens(3000u32)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败: {}", e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> LlmService {
        let config = Config {
            llm_api_key: "test-key".to_string(),
            llm_api_base_url: "http://localhost:9999/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            ..Config::default()
        };
        LlmService::new(&config)
    }

    /// 测试 LLM API 连接性
    ///
    /// 运行方式：
    /// ```bash
    /// cargo test test_send_to_llm_simple -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_send_to_llm_simple() {
        let _ = tracing_subscriber::fmt::try_init();

        let config = Config::from_env();
        let service = LlmService::new(&config);

        let result = service
            .send_to_llm("Reply with the single word: pong", None, None)
            .await;

        match result {
            Ok(response) => {
                println!("LLM 响应: {}", response);
                assert!(!response.is_empty());
            }
            Err(e) => panic!("LLM 调用失败: {}", e),
        }
    }

    #[test]
    fn test_service_construction() {
        let service = create_test_service();
        assert_eq!(service.model_name, "gpt-4o-mini");
    }
}
