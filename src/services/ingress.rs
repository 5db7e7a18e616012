//! 对账入口: 网关推送 (webhook) 与客户端轮询。两者最终都调用 `PaymentReconciler::reconcile`。

use crate::entities::{PurchaseStatus, purchase_entity as purchases};
use crate::error::{AppError, AppResult};
use crate::external::PaymentStatusProvider;
use crate::models::{ProviderStatus, ProviderStatusSnapshot, ReconcileResult, WebhookNotification};
use crate::services::purchase_store::PurchaseStore;
use crate::services::reconcile_service::PaymentReconciler;
use crate::utils::WebhookAuthenticator;
use actix_web::http::header::HeaderMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct WebhookIngress {
    authenticator: WebhookAuthenticator,
}

impl WebhookIngress {
    pub fn new(authenticator: WebhookAuthenticator) -> Self {
        Self { authenticator }
    }

    /// 认证 -> 解析报文 -> 对账
    pub async fn receive(
        &self,
        reconciler: &PaymentReconciler,
        headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<ReconcileResult> {
        self.authenticator.verify(headers)?;

        let raw: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| AppError::ValidationError(format!("Invalid webhook payload: {e}")))?;
        let notification: WebhookNotification = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::ValidationError(format!("Invalid webhook payload: {e}")))?;

        reconcile_webhook(reconciler, &notification, raw).await
    }
}

pub async fn reconcile_webhook(
    reconciler: &PaymentReconciler,
    notification: &WebhookNotification,
    raw: serde_json::Value,
) -> AppResult<ReconcileResult> {
    let candidates = notification.identifier_candidates();
    if candidates.is_empty() {
        return Err(AppError::ValidationError(
            "Webhook payload carries no transaction identifier".to_string(),
        ));
    }

    let status = notification.provider_status();
    log::info!("Payment webhook for {candidates:?}: {status}");
    let snapshot = ProviderStatusSnapshot::new(status, candidates.first().cloned(), raw);
    reconciler.reconcile(&candidates, snapshot).await
}

/// 客户端按交易号查询支付状态
#[derive(Clone)]
pub struct PollingIngress {
    provider: Arc<dyn PaymentStatusProvider>,
    timeout: Duration,
}

impl PollingIngress {
    pub fn new(provider: Arc<dyn PaymentStatusProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// 只能查询自己的购买；网关不可用时返回库中状态，由客户端继续轮询
    pub async fn poll(
        &self,
        reconciler: &PaymentReconciler,
        customer_id: i64,
        transaction_id: &str,
    ) -> AppResult<ReconcileResult> {
        let purchase = reconciler
            .store()
            .find_by_transaction_id(transaction_id)
            .await?
            .filter(|p| p.customer_id == customer_id)
            .ok_or_else(|| AppError::PurchaseNotFound(vec![transaction_id.to_string()]))?;

        let snapshot = if purchase.is_paid() {
            // 已支付不再查询网关，仍走对账以补齐号码
            ProviderStatusSnapshot::new(
                ProviderStatus::Paid,
                Some(purchase.transaction_id.clone()),
                json!({ "source": "store" }),
            )
        } else {
            let fetched =
                tokio::time::timeout(self.timeout, self.provider.fetch_status(transaction_id))
                    .await
                    .unwrap_or_else(|_| {
                        Err(AppError::Timeout(format!("payment status for {transaction_id}")))
                    });
            match fetched {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::warn!("Payment status lookup for {transaction_id} failed: {e}");
                    return Ok(ReconcileResult {
                        status: purchase.status,
                        titles: Vec::new(),
                        updated: false,
                    });
                }
            }
        };

        match reconciler
            .reconcile(&[purchase.transaction_id.clone()], snapshot)
            .await
        {
            Ok(result) => Ok(result),
            Err(e @ AppError::PurchaseNotFound(_)) => Err(e),
            Err(e) => {
                // 客户端只看到库中状态，下一次轮询会再次对账
                log::error!(
                    "Reconcile during poll of {} failed: {e}",
                    purchase.transaction_id
                );
                Ok(stored_result(reconciler, &purchase).await)
            }
        }
    }
}

/// 尽力读取库中状态；读取失败时退回到查询开始时的快照
async fn stored_result(
    reconciler: &PaymentReconciler,
    purchase: &purchases::Model,
) -> ReconcileResult {
    let store = reconciler.store();
    let status = match store.find_by_id(purchase.id).await {
        Ok(Some(current)) => current.status,
        _ => purchase.status,
    };
    let titles = if status == PurchaseStatus::Paid {
        PurchaseStore::ticket_numbers(store.connection(), purchase.id)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    ReconcileResult {
        status,
        titles,
        updated: false,
    }
}
