use crate::config::NotificationConfig;
use crate::entities::purchase_entity as purchases;
use crate::error::{AppError, AppResult};
use crate::external::{EmailMessage, EmailSender};
use crate::services::purchase_store::PurchaseStore;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// 每次定时扫描处理的记录数
const SWEEP_BATCH: u64 = 100;

/// 购买确认 / 催付邮件
///
/// 确认邮件以 `confirmation_email_sent_at` 为门闸: 先发送、后标记。
/// 发送与标记之间崩溃最多导致一封重复邮件。
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: PurchaseStore,
    sender: Arc<dyn EmailSender>,
    config: NotificationConfig,
    send_timeout: std::time::Duration,
}

impl NotificationDispatcher {
    pub fn new(
        store: PurchaseStore,
        sender: Arc<dyn EmailSender>,
        config: NotificationConfig,
        send_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            sender,
            config,
            send_timeout,
        }
    }

    pub fn should_send(&self, purchase: &purchases::Model) -> bool {
        purchase.confirmation_email_sent_at.is_none()
    }

    pub async fn mark_sent(&self, purchase: &purchases::Model) -> AppResult<bool> {
        self.store.mark_confirmation_sent(purchase.id).await
    }

    /// 发送确认邮件，返回是否真的发出
    pub async fn dispatch_confirmation(
        &self,
        purchase: &purchases::Model,
        titles: &[String],
    ) -> AppResult<bool> {
        if !self.config.confirmation_enabled {
            return Ok(false);
        }
        // 以库中最新的标记为准，调用方手里的快照可能已过期
        let current = self
            .store
            .find_by_id(purchase.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Purchase {} not found", purchase.id)))?;
        if !self.should_send(&current) {
            log::debug!(
                "Confirmation already sent for purchase {}",
                current.transaction_id
            );
            return Ok(false);
        }

        let message = confirmation_email(&current, titles);
        if let Err(e) = self.send(&message).await {
            let attempts = self.store.record_confirmation_failure(current.id).await?;
            if attempts >= self.config.max_confirmation_attempts {
                log::warn!(
                    "Giving up confirmation email for purchase {} after {attempts} attempts",
                    current.transaction_id
                );
            }
            return Err(e);
        }

        if !self.mark_sent(&current).await? {
            log::warn!(
                "Confirmation marker for purchase {} was set concurrently",
                current.transaction_id
            );
        }
        Ok(true)
    }

    /// 待支付提醒，每笔购买最多一次
    pub async fn dispatch_recovery(&self, purchase: &purchases::Model) -> AppResult<bool> {
        if !self.config.recovery_enabled {
            return Ok(false);
        }
        // 扫描之后可能刚刚完成支付
        let Some(current) = self.store.find_by_id(purchase.id).await? else {
            return Ok(false);
        };
        if current.is_paid() || current.recovery_email_sent_at.is_some() {
            return Ok(false);
        }
        self.send(&recovery_email(&current)).await?;
        self.store.mark_recovery_sent(current.id).await?;
        Ok(true)
    }

    async fn send(&self, message: &EmailMessage) -> AppResult<String> {
        match tokio::time::timeout(self.send_timeout, self.sender.send(message)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(AppError::NotificationFailure(format!(
                "{} to {}: {e}",
                message.subject, message.to
            ))),
            Err(_) => Err(AppError::Timeout(format!("email to {}", message.to))),
        }
    }

    /// 补发确认邮件 (对账时发送失败或被跳过)
    pub async fn sweep_confirmations(&self) -> AppResult<usize> {
        if !self.config.confirmation_enabled {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::seconds(self.config.grace_period_secs);
        let pending = self
            .store
            .paid_without_confirmation(cutoff, self.config.max_confirmation_attempts, SWEEP_BATCH)
            .await?;

        let mut sent = 0;
        for purchase in pending {
            let titles = PurchaseStore::ticket_numbers(self.store.connection(), purchase.id).await?;
            match self.dispatch_confirmation(&purchase, &titles).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => log::error!(
                    "Failed to send confirmation for purchase {}: {e}",
                    purchase.transaction_id
                ),
            }
        }
        Ok(sent)
    }

    /// 创建后超过 recovery_after_minutes 仍未支付 (24 小时内) 的购买发送催付邮件
    pub async fn sweep_recoveries(&self) -> AppResult<usize> {
        if !self.config.recovery_enabled {
            return Ok(0);
        }
        let now = Utc::now();
        let created_before = now - Duration::minutes(self.config.recovery_after_minutes);
        let created_after = now - Duration::hours(24);
        let pending = self
            .store
            .pending_for_recovery(created_after, created_before, SWEEP_BATCH)
            .await?;

        let mut sent = 0;
        for purchase in pending {
            match self.dispatch_recovery(&purchase).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => log::error!(
                    "Failed to send recovery email for purchase {}: {e}",
                    purchase.transaction_id
                ),
            }
        }
        Ok(sent)
    }
}

fn greeting(purchase: &purchases::Model) -> String {
    let name = purchase.customer_name.trim();
    if name.is_empty() {
        "Olá!".to_string()
    } else {
        format!("Olá, {name}!")
    }
}

fn format_brl(cents: i64) -> String {
    format!("R$ {},{:02}", cents / 100, (cents % 100).abs())
}

fn confirmation_email(purchase: &purchases::Model, titles: &[String]) -> EmailMessage {
    let items: String = titles
        .iter()
        .map(|t| format!("<li><strong>{t}</strong></li>"))
        .collect();
    let html = format!(
        "<p>{}</p>\
         <p>Seu pagamento de {} foi confirmado.</p>\
         <p>Seus {} títulos:</p><ul>{}</ul>\
         <p>Boa sorte!</p>",
        greeting(purchase),
        format_brl(purchase.total_cents),
        titles.len(),
        items
    );
    EmailMessage {
        to: purchase.customer_email.clone(),
        subject: "Pagamento confirmado - seus títulos".to_string(),
        html,
        idempotency_key: format!("confirmation-{}", purchase.id),
    }
}

fn recovery_email(purchase: &purchases::Model) -> EmailMessage {
    let html = format!(
        "<p>{}</p>\
         <p>Sua reserva de {} títulos ({}) ainda aguarda o pagamento via PIX.</p>\
         <p>Conclua o pagamento para garantir seus números.</p>",
        greeting(purchase),
        purchase.quantity,
        format_brl(purchase.total_cents)
    );
    EmailMessage {
        to: purchase.customer_email.clone(),
        subject: "Finalize seu pagamento PIX".to_string(),
        html,
        idempotency_key: format!("recovery-{}", purchase.id),
    }
}
