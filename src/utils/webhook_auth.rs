use crate::config::PaymentConfig;
use crate::error::{AppError, AppResult};
use actix_web::http::header::{AUTHORIZATION, HeaderMap};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use subtle::ConstantTimeEq;

pub const WEBHOOK_TOKEN_HEADER: &str = "X-Webhook-Token";

/// 校验支付网关回调
///
/// 支持 HTTP Basic 与共享令牌两种方式，任一已配置的方式匹配即通过；
/// Basic 需要用户名和密码同时配置。两者都未配置时拒绝所有请求。
#[derive(Clone)]
pub struct WebhookAuthenticator {
    basic: Option<(String, String)>,
    token: Option<String>,
}

impl WebhookAuthenticator {
    pub fn new(config: &PaymentConfig) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let basic = match (
            non_empty(&config.webhook_username),
            non_empty(&config.webhook_password),
        ) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            _ => {
                log::warn!("Webhook Basic auth needs both username and password, ignoring it");
                None
            }
        };
        Self {
            basic,
            token: non_empty(&config.webhook_token),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.basic.is_some() || self.token.is_some()
    }

    pub fn verify(&self, headers: &HeaderMap) -> AppResult<()> {
        if !self.is_configured() {
            log::error!("Webhook credentials are not configured, rejecting callback");
            return Err(AppError::AuthError("Webhook authentication failed".into()));
        }

        if let Some(expected) = &self.token
            && let Some(provided) = headers
                .get(WEBHOOK_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
            && constant_time_eq(expected, provided.trim())
        {
            return Ok(());
        }

        if let Some((user, pass)) = &self.basic
            && let Some((provided_user, provided_pass)) = basic_credentials(headers)
        {
            // 两项都比较，避免按用户名短路
            let user_ok = constant_time_eq(user, &provided_user);
            let pass_ok = constant_time_eq(pass, &provided_pass);
            if user_ok & pass_ok {
                return Ok(());
            }
        }

        Err(AppError::AuthError("Webhook authentication failed".into()))
    }
}

fn constant_time_eq(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    // 长度不是秘密
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
