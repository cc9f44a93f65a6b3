// Economy provider speaking to a remote economy service over HTTP.
//
// Endpoints, all JSON:
//   GET  {base}/players/{uuid}/balance   -> { "balance": 1234 }
//   POST {base}/players/{uuid}/withdraw  <- { "amount": 500 }
//   POST {base}/players/{uuid}/deposit   <- { "amount": 500 }
// A withdraw the service cannot cover answers 402 or `{ "ok": false,
// "error": "insufficient_funds" }`.

use crate::core::economy::{EconomyError, EconomyProvider};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

pub struct HttpEconomyProvider {
    client: Client,
    base_url: String,
}

impl HttpEconomyProvider {
    pub fn new(base_url: String, api_token: Option<String>) -> Result<Self, EconomyError> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Some(token) = api_token {
            headers.insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| EconomyError::Provider(e.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EconomyError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn player_url(&self, player_id: Uuid, operation: &str) -> String {
        format!("{}/players/{}/{}", self.base_url, player_id, operation)
    }

    async fn post_amount(
        &self,
        player_id: Uuid,
        operation: &str,
        amount: i64,
    ) -> Result<(), EconomyError> {
        let response = self
            .client
            .post(self.player_url(player_id, operation))
            .json(&json!({ "amount": amount }))
            .send()
            .await
            .map_err(|e| EconomyError::Provider(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: MutationResponse = response
                    .json()
                    .await
                    .map_err(|e| EconomyError::Provider(e.to_string()))?;
                if body.ok {
                    Ok(())
                } else if body.error.as_deref() == Some("insufficient_funds") {
                    Err(EconomyError::InsufficientFunds)
                } else {
                    Err(EconomyError::Provider(body.error.unwrap_or_else(|| {
                        format!("{} rejected without a reason", operation)
                    })))
                }
            }
            StatusCode::PAYMENT_REQUIRED => Err(EconomyError::InsufficientFunds),
            status => Err(EconomyError::Provider(format!(
                "{} returned {}",
                operation, status
            ))),
        }
    }
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: i64,
}

#[derive(Deserialize)]
struct MutationResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl EconomyProvider for HttpEconomyProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn balance(&self, player_id: Uuid) -> Result<i64, EconomyError> {
        let response = self
            .client
            .get(self.player_url(player_id, "balance"))
            .send()
            .await
            .map_err(|e| EconomyError::Provider(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(EconomyError::Provider(format!(
                "balance returned {}",
                response.status()
            )));
        }

        let body: BalanceResponse = response
            .json()
            .await
            .map_err(|e| EconomyError::Provider(e.to_string()))?;
        Ok(body.balance)
    }

    async fn withdraw(&self, player_id: Uuid, amount: i64) -> Result<(), EconomyError> {
        self.post_amount(player_id, "withdraw", amount).await
    }

    async fn deposit(&self, player_id: Uuid, amount: i64) -> Result<(), EconomyError> {
        self.post_amount(player_id, "deposit", amount).await
    }
}
