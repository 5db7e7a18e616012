use crate::config::EmailConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    /// 同一个 key 的重复请求由邮件服务去重
    pub idempotency_key: String,
}

/// 发送邮件，成功返回服务商的消息 ID
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> AppResult<String>;
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: String,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Clone)]
pub struct HttpMailer {
    client: Client,
    config: EmailConfig,
}

impl HttpMailer {
    pub fn new(config: EmailConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn from_header(&self) -> String {
        match &self.config.from_name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.config.from_address),
            _ => self.config.from_address.clone(),
        }
    }
}

#[async_trait]
impl EmailSender for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> AppResult<String> {
        let body = SendEmailRequest {
            from: self.from_header(),
            to: vec![message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", &message.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("email to {}", message.to))
                } else {
                    AppError::ReqwestError(e)
                }
            })?;

        if response.status().is_success() {
            let parsed: SendEmailResponse = response.json().await?;
            let id = parsed.id.unwrap_or_default();
            log::info!("Email sent to {}: {}", message.to, id);
            Ok(id)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Email to {} failed to send: {}", message.to, error_text);
            Err(AppError::ExternalApiError(format!(
                "Email sending failed: {error_text}"
            )))
        }
    }
}
