// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network refresh contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RefreshError;
use crate::token::TokenPair;
use crate::BoxFuture;

pub const DEFAULT_REFRESH_PATH: &str = "/auths/refresh_token";

/// Exchanges a refresh token for a new pair.
pub trait RefreshEndpoint: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair, RefreshError>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    errors: Vec<JsonValue>,
    response_data: Option<RefreshData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    jwt: String,
    refresh_token: String,
}

/// [`RefreshEndpoint`] that POSTs JSON to `{api_url}{path}`.
pub struct HttpRefreshEndpoint {
    http_client: reqwest::Client,
    url: String,
}

impl HttpRefreshEndpoint {
    pub fn new(api_url: &str, path: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http_client, api_url, path))
    }

    pub fn with_client(http_client: reqwest::Client, api_url: &str, path: &str) -> Self {
        let url = format!("{}/{}", api_url.trim_end_matches('/'), path.trim_start_matches('/'));
        Self { http_client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn do_refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let resp = self
            .http_client
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body =
            resp.text().await.map_err(|e| RefreshError::Network(format!("read body: {e}")))?;

        let parsed = serde_json::from_str::<RefreshResponse>(&body);
        if let Ok(RefreshResponse { ref errors, .. }) = parsed {
            if let Some(first) = errors.first() {
                return Err(RefreshError::from_server_message(error_message(first)));
            }
        }
        if !status.is_success() {
            return Err(RefreshError::Network(format!("HTTP {status}: {body}")));
        }

        match parsed {
            Ok(RefreshResponse { response_data: Some(data), .. }) => {
                Ok(TokenPair::new(data.jwt, data.refresh_token))
            }
            Ok(_) => Err(RefreshError::Unknown("response carried no token data".into())),
            Err(e) => Err(RefreshError::Unknown(format!("parse response: {e}"))),
        }
    }
}

impl RefreshEndpoint for HttpRefreshEndpoint {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair, RefreshError>> {
        Box::pin(self.do_refresh(refresh_token))
    }
}

/// Servers report errors either as bare strings or as `{ "message": ... }`.
fn error_message(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Object(map) => match map.get("message") {
            Some(JsonValue::String(s)) => s.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
