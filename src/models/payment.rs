use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::entities::PurchaseStatus;

/// 支付网关上报的交易状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Paid,
    Pending,
    /// 其它任何状态 (expired / canceled / refunded ...)，对账时一律视为未支付
    Other(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" => ProviderStatus::Paid,
            "pending" | "" => ProviderStatus::Pending,
            other => ProviderStatus::Other(other.to_string()),
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, ProviderStatus::Paid)
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderStatus::Paid => write!(f, "paid"),
            ProviderStatus::Pending => write!(f, "pending"),
            ProviderStatus::Other(s) => write!(f, "{s}"),
        }
    }
}

/// 某一时刻支付网关对交易状态的快照，不落库 (确认支付时原始报文会随购买记录保存)
#[derive(Debug, Clone)]
pub struct ProviderStatusSnapshot {
    pub status: ProviderStatus,
    pub transaction_id: Option<String>,
    pub raw: Value,
}

impl ProviderStatusSnapshot {
    pub fn new(status: ProviderStatus, transaction_id: Option<String>, raw: Value) -> Self {
        Self {
            status,
            transaction_id,
            raw,
        }
    }
}

/// 对账结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResult {
    pub status: PurchaseStatus,
    /// 本次购买的全部号码
    pub titles: Vec<String>,
    /// 本次调用是否产生了状态迁移或补发号码
    pub updated: bool,
}

/// Webhook 推送报文
///
/// 网关可能直接推送交易对象，也可能包在 `data` 字段里；
/// `id` 可能是数字也可能是字符串，`secure_id` 为不透明标识。
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookNotification {
    /// 数字或字符串
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub id: Option<Value>,
    #[serde(default)]
    pub secure_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Box<WebhookNotification>>,
}

impl WebhookNotification {
    /// 实际承载交易字段的那一层
    fn body(&self) -> &WebhookNotification {
        match &self.data {
            Some(inner) if inner.id.is_some() || inner.secure_id.is_some() => inner,
            _ => self,
        }
    }

    /// 候选交易号: 数字 id 在前，secure_id 在后；去空去重
    pub fn identifier_candidates(&self) -> Vec<String> {
        let body = self.body();
        let numeric = body.id.as_ref().and_then(|v| match v {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        });
        let secure = body.secure_id.as_ref().map(|s| s.trim().to_string());

        let mut out: Vec<String> = Vec::with_capacity(2);
        for candidate in [numeric, secure].into_iter().flatten() {
            if !candidate.is_empty() && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }

    pub fn provider_status(&self) -> ProviderStatus {
        let status = self.body().status.as_deref().or(self.status.as_deref());
        ProviderStatus::parse(status.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_status_parse() {
        assert_eq!(ProviderStatus::parse("PAID"), ProviderStatus::Paid);
        assert_eq!(ProviderStatus::parse(" pending "), ProviderStatus::Pending);
        assert_eq!(
            ProviderStatus::parse("expired"),
            ProviderStatus::Other("expired".into())
        );
        assert!(!ProviderStatus::parse("approved").is_paid());
    }

    #[test]
    fn test_candidates_numeric_then_secure() {
        let n: WebhookNotification = serde_json::from_value(json!({
            "id": 123,
            "secure_id": "abc-secure-id",
            "status": "paid"
        }))
        .unwrap();
        assert_eq!(n.identifier_candidates(), vec!["123", "abc-secure-id"]);
        assert!(n.provider_status().is_paid());
    }

    #[test]
    fn test_candidates_nested_and_deduplicated() {
        let n: WebhookNotification = serde_json::from_value(json!({
            "event": "transaction.updated",
            "data": { "id": "tx-9", "secure_id": "tx-9", "status": "paid" }
        }))
        .unwrap();
        assert_eq!(n.identifier_candidates(), vec!["tx-9"]);
        assert!(n.provider_status().is_paid());
    }

    #[test]
    fn test_candidates_skip_empty_values() {
        let n: WebhookNotification = serde_json::from_value(json!({
            "id": "",
            "secure_id": "  ",
        }))
        .unwrap();
        assert!(n.identifier_candidates().is_empty());
        assert_eq!(n.provider_status(), ProviderStatus::Pending);
    }
}
