//! 文件获取 - 业务能力层
//!
//! 下载页面发现的文件 URL 并归一化为材料；页面内嵌图片（data-URI 或
//! 外链）同样归一化。单个文件失败只记日志，不影响整题

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::join_all;
use tracing::{info, warn};
use url::Url;

use crate::browser::PageImage;
use crate::models::{FileMaterial, MaterialSet, MediaData};
use crate::services::file_decoder;

/// 文件获取服务
pub struct FileFetcher {
    http: reqwest::Client,
}

impl FileFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// 汇集一道题的全部材料
    ///
    /// 下载文件在前、页面图片在后，key 顺序即发现顺序；
    /// 文件之间并发下载，join_all 保证结果顺序确定
    pub async fn collect_materials(
        &self,
        file_urls: &[String],
        images: &[PageImage],
        page_url: &str,
    ) -> MaterialSet {
        let mut materials = MaterialSet::new();

        let downloads = join_all(
            file_urls
                .iter()
                .map(|url| self.download_and_decode(url)),
        )
        .await;

        for (url, material) in file_urls.iter().zip(downloads) {
            if let Some(material) = material {
                materials.insert(url.clone(), material);
            }
        }

        for (idx, image) in images.iter().enumerate() {
            if let Some(material) = self.normalize_page_image(image, page_url).await {
                materials.insert(format!("image_{}", idx), material);
            }
        }

        info!("📎 材料汇集完成: {} 项", materials.len());
        materials
    }

    /// 下载并解码单个文件（失败返回 None，由调用方跳过）
    pub async fn download_and_decode(&self, url: &str) -> Option<FileMaterial> {
        info!("⬇️ 下载文件: {}", url);

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("下载失败 ({}): {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("下载失败 ({}): HTTP {}", url, status.as_u16());
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("读取响应体失败 ({}): {}", url, e);
                return None;
            }
        };

        match file_decoder::decode(url, &bytes, &content_type) {
            Ok(material) => Some(material),
            Err(e) => {
                warn!("解码失败 ({}), 跳过该文件: {}", url, e);
                None
            }
        }
    }

    /// 归一化页面图片
    ///
    /// data-URI 直接收录（无下载往返）；普通/根相对 src 下载后按图片解码
    async fn normalize_page_image(&self, image: &PageImage, page_url: &str) -> Option<FileMaterial> {
        let src = image.src.trim();
        if src.is_empty() {
            return None;
        }

        let alt = (!image.alt.is_empty()).then(|| image.alt.clone());

        if src.starts_with("data:") {
            return inline_image_material(src, alt);
        }

        let absolute = if src.starts_with("http://") || src.starts_with("https://") {
            src.to_string()
        } else if src.starts_with('/') {
            let base = Url::parse(page_url).ok()?;
            base.join(src).ok()?.to_string()
        } else {
            return None;
        };

        match self.download_and_decode(&absolute).await? {
            FileMaterial::Image(mut media) => {
                media.alt_text = alt;
                Some(FileMaterial::Image(media))
            }
            _ => {
                warn!("页面图片解码为非图片类型，跳过: {}", absolute);
                None
            }
        }
    }
}

impl Default for FileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// 页面内嵌 data-URI 图片直接收录
fn inline_image_material(data_uri: &str, alt_text: Option<String>) -> Option<FileMaterial> {
    let header = data_uri.strip_prefix("data:")?;
    let (meta, payload) = header.split_once(',')?;

    let mime = meta.split(';').next().unwrap_or("").trim();
    let mime_type = if mime.starts_with("image/") {
        mime.to_string()
    } else {
        "image/png".to_string()
    };

    let size_bytes = BASE64.decode(payload).map(|b| b.len()).unwrap_or(0);

    Some(FileMaterial::Image(MediaData {
        data_uri: data_uri.to_string(),
        mime_type,
        size_bytes,
        alt_text,
    }))
}
