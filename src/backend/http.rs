//! Strategy API REST client

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, StatusCode,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::{Backend, Instrument};
use crate::error::FetchError;
use crate::types::{Candle, InstrumentState, StrategyMeta, TradeRecord};

/// Replace bare `NaN`, `Infinity` and `-Infinity` tokens outside string
/// literals with `null`. Python's json module emits them for missing
/// indicator values and serde_json rejects them.
pub fn sanitize_non_finite(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = body;

    while let Some(ch) = rest.chars().next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            rest = &rest[ch.len_utf8()..];
            continue;
        }

        if ch == '"' {
            in_string = true;
            out.push(ch);
            rest = &rest[1..];
            continue;
        }

        let token = ["-Infinity", "Infinity", "NaN"]
            .into_iter()
            .find(|t| rest.starts_with(t));
        match token {
            Some(t) => {
                out.push_str("null");
                rest = &rest[t.len()..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    out
}

/// REST client for the strategy API
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a new REST client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&sanitize_non_finite(&body))?)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_candles(
        &self,
        strategy_id: &str,
        symbol: &str,
        resolution: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let path = format!("/strategies/{strategy_id}/candles/{symbol}/{resolution}");
        self.get_json(&path, &[("limit", limit.to_string())]).await
    }

    async fn fetch_trades(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Vec<TradeRecord>, FetchError> {
        let path = format!("/strategies/{strategy_id}/trades");
        self.get_json(&path, &[("symbol", symbol.to_string())]).await
    }

    async fn fetch_state(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<InstrumentState, FetchError> {
        let path = format!("/strategies/{strategy_id}/state/{symbol}");
        self.get_json(&path, &[]).await
    }

    async fn fetch_strategies(&self) -> Result<Vec<StrategyMeta>, FetchError> {
        self.get_json("/strategies", &[]).await
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError> {
        self.get_json("/instruments", &[]).await
    }
}
