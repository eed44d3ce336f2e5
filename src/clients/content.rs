//! 監視対象のコンテンツを取得するクライアント。
//!
//! HTMLは段落境界が空行として残るようにプレーンテキストへ変換する。
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url, header};
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::models::MonitoredResource;

/// html2textの折り返し幅。段落内で改行が入らないよう十分大きくする。
const HTML_RENDER_WIDTH: usize = 10_000;

/// 取得対象。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub url: String,
    /// ソース固有アダプタ向けにそのまま渡す。HTTPフェッチャーは評価しない。
    pub content_selector: Option<String>,
}

impl From<&MonitoredResource> for FetchTarget {
    fn from(resource: &MonitoredResource) -> Self {
        Self {
            url: resource.target_url.clone(),
            content_selector: resource.content_selector.clone(),
        }
    }
}

/// 取得結果。ハッシュは呼び出し側で計算する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub content: String,
    pub status_code: u16,
    pub fetch_duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid target url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode body from {url}: {message}")]
    Decode { url: String, message: String },
}

/// コンテンツ取得の境界。
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, target: &FetchTarget) -> Result<FetchedContent, FetchError>;
}

/// HTTPフェッチャーの設定。
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    pub user_agent: String,
    /// 受信する本文の上限。超過分は読まずに打ち切る。
    pub max_body_bytes: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(30),
            user_agent: concat!("watchpoint-worker/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

/// reqwestによる既定のフェッチャー。2xx以外はエラーとして扱う。
#[derive(Debug, Clone)]
pub struct HttpContentFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpContentFetcher {
    /// # Errors
    /// HTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(config: &HttpFetcherConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .user_agent(&config.user_agent)
            .build()
            .context("failed to build content fetch HTTP client")?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<FetchedContent, FetchError> {
        let url = Url::parse(&target.url).map_err(|error| FetchError::InvalidUrl {
            url: target.url.clone(),
            message: error.to_string(),
        })?;
        if let Some(selector) = &target.content_selector {
            debug!(url = %url, selector = %selector, "content selector is not evaluated by the HTTP fetcher");
        }

        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: target.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: target.url.clone(),
                status: status.as_u16(),
            });
        }

        let declared_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("html"));

        let body = self.read_bounded_body(response, &target.url).await?;

        let content = if declared_html || looks_like_html(&body) {
            html_to_text(&body).map_err(|message| FetchError::Decode {
                url: target.url.clone(),
                message,
            })?
        } else {
            body
        };

        let fetch_duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(
            url = %url,
            status = status.as_u16(),
            bytes = content.len(),
            fetch_duration_ms,
            "fetched content"
        );

        Ok(FetchedContent {
            content,
            status_code: status.as_u16(),
            fetch_duration_ms,
        })
    }
}

impl HttpContentFetcher {
    /// 本文を上限まで読み込む。上限を超えた分は受信せずに打ち切る。
    async fn read_bounded_body(
        &self,
        mut response: reqwest::Response,
        url: &str,
    ) -> Result<String, FetchError> {
        let limit = self.max_body_bytes;
        if let Some(declared) = response.content_length()
            && !usize::try_from(declared).is_ok_and(|declared| declared <= limit)
        {
            warn!(url, declared, limit, "declared body exceeds limit, reading a prefix only");
        }

        let mut buffer: Vec<u8> = Vec::with_capacity(limit.min(64 * 1024));
        while let Some(chunk) = response.chunk().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })? {
            let remaining = limit - buffer.len();
            if chunk.len() >= remaining {
                buffer.extend_from_slice(&chunk[..remaining]);
                if chunk.len() > remaining {
                    debug!(url, limit, "body truncated at limit");
                }
                break;
            }
            buffer.extend_from_slice(&chunk);
        }

        // 上限で切れたマルチバイト文字は置換文字になる
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(32).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// HTMLをプレーンテキストに変換する。ブロック要素の境界は空行になる。
pub(crate) fn html_to_text(html: &str) -> Result<String, String> {
    html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH).map_err(|error| error.to_string())
}
