use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::RequestBuilder;
use serde::Serialize;
use shop_tunnel_instruments::OperationRecord;
use url::Url;

use crate::response::CompletedRequest;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendCoinRequest<'a> {
    to_user: &'a str,
    amount: i32,
}

/// Client for the merch shop API which times every request.
///
/// Cheap to clone, clones share a connection pool.
#[derive(Debug, Clone)]
pub struct MerchShopClientInstrumented {
    client: reqwest::Client,
    base_url: Url,
}

impl MerchShopClientInstrumented {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Requests that take longer than `timeout` are given up on and reported with status `0`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Base URL cannot have paths added to it: {base_url}");
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shop-tunnel/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /api/auth`. A successful response has a `token` field.
    pub async fn auth(&self, username: &str, password: &str) -> CompletedRequest {
        let request = self
            .client
            .post(self.endpoint(&["api", "auth"]))
            .json(&AuthRequest { username, password });

        self.send("auth", request).await
    }

    /// `GET /api/info`
    pub async fn info(&self, token: &str) -> CompletedRequest {
        let request = self
            .client
            .get(self.endpoint(&["api", "info"]))
            .bearer_auth(token);

        self.send("info", request).await
    }

    /// `POST /api/sendCoin`
    pub async fn send_coin(&self, token: &str, to_user: &str, amount: i32) -> CompletedRequest {
        let request = self
            .client
            .post(self.endpoint(&["api", "sendCoin"]))
            .bearer_auth(token)
            .json(&SendCoinRequest { to_user, amount });

        self.send("send_coin", request).await
    }

    /// `GET /api/buy/{item}`
    pub async fn buy(&self, token: &str, item: &str) -> CompletedRequest {
        let request = self
            .client
            .get(self.endpoint(&["api", "buy", item]))
            .bearer_auth(token);

        self.send("buy", request).await
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// The timer covers sending the request and reading the whole body.
    ///
    /// A body that can't be read in full counts as a transport failure, so the request gets a
    /// status of `0` even though the headers were received.
    async fn send(&self, operation_id: &str, request: RequestBuilder) -> CompletedRequest {
        let record = OperationRecord::new(operation_id);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Request {} failed: {}", operation_id, e);
                return CompletedRequest::new(record.finish(0), Bytes::new(), Some(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => CompletedRequest::new(record.finish(status), body, None),
            Err(e) => {
                log::debug!(
                    "Reading the body of {} failed after status {}: {}",
                    operation_id,
                    status,
                    e
                );
                CompletedRequest::new(record.finish(0), Bytes::new(), Some(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_joined_to_the_base_url() {
        let client = MerchShopClientInstrumented::new("http://localhost:8080").unwrap();
        assert_eq!(
            "http://localhost:8080/api/auth",
            client.endpoint(&["api", "auth"]).as_str()
        );

        let client = MerchShopClientInstrumented::new("http://localhost:8080/shop").unwrap();
        assert_eq!(
            "http://localhost:8080/shop/api/buy/t-shirt",
            client.endpoint(&["api", "buy", "t-shirt"]).as_str()
        );
    }

    #[test]
    fn item_is_escaped() {
        let client = MerchShopClientInstrumented::new("http://localhost:8080/").unwrap();
        assert_eq!(
            "http://localhost:8080/api/buy/a%2Fb",
            client.endpoint(&["api", "buy", "a/b"]).as_str()
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(MerchShopClientInstrumented::new("localhost").is_err());
        assert!(MerchShopClientInstrumented::new("mailto:shop@example.com").is_err());
    }
}
