use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// 渲染完成的页面快照
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// document.body.innerText
    pub body_text: String,
    /// 完整 HTML
    pub html: String,
    /// 页面 `<img>` 清单（src 可能是普通 URL 或 data-URI）
    pub images: Vec<PageImage>,
}

impl RenderedPage {
    /// 拼接正文与 HTML，作为题目文本送入后续流程
    pub fn combined_content(&self) -> String {
        let mut content = format!("{}\n\nHTML:\n{}", self.body_text, self.html);
        if !self.images.is_empty() {
            content.push_str(&format!("\n\n[Page contains {} image(s)]", self.images.len()));
        }
        content
    }
}

/// 页面图片信息
#[derive(Debug, Clone, Deserialize)]
pub struct PageImage {
    pub src: String,
    pub alt: String,
}

/// 渲染并抓取一个页面
///
/// 每次抓取启动独立的无头浏览器实例，抓取结束后关闭，
/// 不在链路之间复用浏览器状态
pub async fn fetch_rendered_page(config: &Config, url: &str) -> Result<RenderedPage> {
    info!("🌐 抓取页面: {}", url);

    let (mut browser, mut handler) = launch_headless_browser(config).await?;

    // 在后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    let result = render_page(&browser, config, url).await;

    if let Err(e) = browser.close().await {
        warn!("关闭浏览器失败: {}", e);
    }
    handler_task.abort();

    let page = result?;
    debug!(
        "页面抓取完成: 正文 {} 字符, {} 张图片",
        page.body_text.len(),
        page.images.len()
    );

    Ok(page)
}

/// 启动无头浏览器
async fn launch_headless_browser(
    config: &Config,
) -> Result<(Browser, chromiumoxide::Handler)> {
    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",
        "--no-sandbox",              // 禁用沙盒，防止权限问题导致的崩溃
        "--disable-dev-shm-usage",   // 防止共享内存不足
        "--remote-debugging-port=0", // 让浏览器自动选择端口
    ]);

    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(Path::new(path));
    }

    let browser_config = builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        anyhow::anyhow!("配置无头浏览器失败: {}", e)
    })?;

    let pair = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        anyhow::anyhow!("启动无头浏览器失败: {}", e)
    })?;
    debug!("无头浏览器启动成功");

    Ok(pair)
}

async fn render_page(browser: &Browser, config: &Config, url: &str) -> Result<RenderedPage> {
    let page = browser.new_page(url).await.map_err(|e| {
        error!("导航到 {} 失败: {}", url, e);
        anyhow::anyhow!("导航到 {} 失败: {}", url, e)
    })?;

    page.wait_for_navigation().await?;

    // 等待动态内容渲染
    sleep(Duration::from_millis(config.render_settle_millis)).await;

    let body_text: String = page
        .evaluate("document.body.innerText")
        .await?
        .into_value()?;

    let html = page.content().await?;

    let images: Vec<PageImage> = page
        .evaluate(
            r#"Array.from(document.querySelectorAll('img')).map(img => ({
                src: img.getAttribute('src') || '',
                alt: img.getAttribute('alt') || ''
            }))"#,
        )
        .await?
        .into_value()
        .unwrap_or_default();

    Ok(RenderedPage {
        body_text,
        html,
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_content_mentions_images() {
        let page = RenderedPage {
            body_text: "question".to_string(),
            html: "<html></html>".to_string(),
            images: vec![PageImage {
                src: "data:image/png;base64,AA".to_string(),
                alt: String::new(),
            }],
        };
        let content = page.combined_content();
        assert!(content.contains("question"));
        assert!(content.contains("HTML:"));
        assert!(content.contains("[Page contains 1 image(s)]"));
    }
}
