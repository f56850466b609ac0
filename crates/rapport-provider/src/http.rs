use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{CognitiveIndicators, RenderedPanel, TextAnalyzer, TextInsights, Visualizer};

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ServiceErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServerError | Self::Timeout)
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn format_api_error(service: &str, status: StatusCode, parsed: Option<ApiError>) -> anyhow::Error {
    let kind = ServiceErrorKind::from_status(status);
    let retryable = if kind.is_retryable() {
        " [retryable]"
    } else {
        ""
    };
    if let Some(api_error) = parsed {
        anyhow!(
            "{service} api error ({status}){retryable}: {}",
            api_error.error.message
        )
    } else {
        anyhow!("{service} api error ({status}){retryable}")
    }
}

async fn check_status(service: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status != StatusCode::OK {
        let text = resp.text().await?;
        let parsed = serde_json::from_str::<ApiError>(&text).ok();
        return Err(format_api_error(service, status, parsed));
    }
    Ok(resp)
}

fn map_send_error(service: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("{service} api error (timeout) [retryable]: request timed out")
    } else if e.is_connect() {
        anyhow!("{service} api error (connect) [retryable]: {e}")
    } else {
        e.into()
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct CognitiveRequest<'a> {
    texts: &'a [String],
}

/// Client for the text-analysis service.
#[derive(Debug, Clone)]
pub struct HttpTextAnalyzer {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl HttpTextAnalyzer {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url).header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        req
    }
}

#[async_trait]
impl TextAnalyzer for HttpTextAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TextInsights> {
        let url = format!("{}/v1/analyze", self.api_base);
        let resp = self
            .post(url)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| map_send_error("text-analysis", e))?;
        let resp = check_status("text-analysis", resp).await?;
        Ok(resp.json().await?)
    }

    async fn cognitive_profile(&self, texts: &[String]) -> Result<CognitiveIndicators> {
        let url = format!("{}/v1/cognitive", self.api_base);
        let resp = self
            .post(url)
            .json(&CognitiveRequest { texts })
            .send()
            .await
            .map_err(|e| map_send_error("text-analysis", e))?;
        let resp = check_status("text-analysis", resp).await?;
        Ok(resp.json().await?)
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/v1/health", self.api_base);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_send_error("text-analysis", e))?;
        check_status("text-analysis", resp).await?;
        Ok(())
    }
}

/// Client for the visualization renderer.
#[derive(Debug, Clone)]
pub struct HttpVisualizer {
    client: reqwest::Client,
    api_base: String,
}

impl HttpVisualizer {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Visualizer for HttpVisualizer {
    async fn render(&self, report: &serde_json::Value) -> Result<RenderedPanel> {
        let url = format!("{}/v1/render", self.api_base);
        let resp = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(report)
            .send()
            .await
            .map_err(|e| map_send_error("visualizer", e))?;
        let resp = check_status("visualizer", resp).await?;
        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let data: Bytes = resp.bytes().await?;
        Ok(RenderedPanel { mime_type, data })
    }
}
