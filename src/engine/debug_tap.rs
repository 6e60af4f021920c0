//! Forensic capture of raw provider traffic.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Status line and headers of one HTTP request or response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HttpExchange {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
}

impl HttpExchange {
    pub fn request(method: &str, url: &str, headers: &reqwest::header::HeaderMap) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status: None,
            headers: header_pairs(headers),
        }
    }

    pub fn response(status: u16, headers: &reqwest::header::HeaderMap) -> Self {
        Self {
            status: Some(status),
            headers: header_pairs(headers),
            ..Default::default()
        }
    }
}

/// Header pairs with credentials masked.
fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if name == reqwest::header::AUTHORIZATION {
                "****".to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Optional observer attached to an inference context. All methods must be
/// safe to call concurrently.
pub trait DebugTap: Send + Sync {
    fn on_http(&self, request: &HttpExchange, body: &[u8]);
    fn on_http_response(&self, response: &HttpExchange, body: &[u8]);
    fn on_sse(&self, event: &str, data: &[u8]);
    fn on_provider_object(&self, name: &str, value: &Value);
    fn on_turn_before_conversion(&self, turn_yaml: &str);
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
