use crate::config::PaymentConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ProviderStatus, ProviderStatusSnapshot};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// 按交易号查询支付状态
#[async_trait]
pub trait PaymentStatusProvider: Send + Sync {
    async fn fetch_status(&self, transaction_id: &str) -> AppResult<ProviderStatusSnapshot>;
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
}

/// PIX 网关 HTTP 客户端
#[derive(Clone)]
pub struct PaymentGateway {
    client: Client,
    config: PaymentConfig,
}

impl PaymentGateway {
    pub fn new(config: PaymentConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn transaction_url(&self, transaction_id: &str) -> String {
        format!(
            "{}/transactions/{}",
            self.config.api_base_url.trim_end_matches('/'),
            transaction_id
        )
    }
}

#[async_trait]
impl PaymentStatusProvider for PaymentGateway {
    async fn fetch_status(&self, transaction_id: &str) -> AppResult<ProviderStatusSnapshot> {
        let response = self
            .client
            .get(self.transaction_url(transaction_id))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("payment status for {transaction_id}"))
                } else {
                    AppError::ReqwestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Failed to fetch transaction {transaction_id} ({status}): {error_text}"
            )));
        }

        let raw: serde_json::Value = response.json().await?;
        let parsed: TransactionResponse = serde_json::from_value(raw.clone())?;
        let reported_id = parsed.id.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        Ok(ProviderStatusSnapshot::new(
            ProviderStatus::parse(parsed.status.as_deref().unwrap_or_default()),
            reported_id.or_else(|| Some(transaction_id.to_string())),
            raw,
        ))
    }
}
