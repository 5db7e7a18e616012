use crate::entities::{PurchaseStatus, purchase_entity as purchases};
use crate::error::{AppError, AppResult};
use crate::models::{ProviderStatusSnapshot, ReconcileResult};
use crate::services::notification_service::NotificationDispatcher;
use crate::services::purchase_store::PurchaseStore;
use crate::services::spin_service::SpinService;
use crate::services::ticket_generator::TicketSource;
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// 唯一约束拒绝号码后，重新生成的次数
const TICKET_INSERT_ATTEMPTS: usize = 2;

/// 支付对账
///
/// 对同一笔购买的并发调用中，只有一个调用能把状态从 pending 改为 paid 并发放号码；
/// 其余调用走幂等分支: 原样返回已有号码，或补齐缺失的号码。
///
/// 状态翻转与号码写入在同一事务内完成。转盘次数与确认邮件在提交之后执行，
/// 失败只记录日志，由定时任务补偿。
#[derive(Clone)]
pub struct PaymentReconciler {
    pool: DatabaseConnection,
    store: PurchaseStore,
    generator: Arc<dyn TicketSource>,
    spins: SpinService,
    notifier: NotificationDispatcher,
}

impl PaymentReconciler {
    pub fn new(
        pool: DatabaseConnection,
        store: PurchaseStore,
        generator: Arc<dyn TicketSource>,
        spins: SpinService,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            pool,
            store,
            generator,
            spins,
            notifier,
        }
    }

    pub fn store(&self) -> &PurchaseStore {
        &self.store
    }

    pub async fn reconcile(
        &self,
        candidates: &[String],
        snapshot: ProviderStatusSnapshot,
    ) -> AppResult<ReconcileResult> {
        let purchase = self.store.resolve(candidates).await?;
        let attempt = Uuid::new_v4();

        if !snapshot.status.is_paid() {
            log::info!(
                "[{attempt}] Reconcile {}: provider reports {}, stored {}, ignored",
                purchase.transaction_id,
                snapshot.status,
                purchase.status
            );
            return Ok(ReconcileResult {
                status: purchase.status,
                titles: Vec::new(),
                updated: false,
            });
        }

        let txn = self.pool.begin().await?;
        let mut locked = PurchaseStore::lock_for_update(&txn, purchase.id).await?;

        if !locked.is_paid() {
            if PurchaseStore::mark_paid(&txn, locked.id, &snapshot.raw).await? {
                return self.issue_first(attempt, txn, locked).await;
            }
            // 没有行锁的后端上可能被并发调用抢先
            locked = PurchaseStore::lock_for_update(&txn, purchase.id).await?;
            if !locked.is_paid() {
                return Err(AppError::InternalError(format!(
                    "Purchase {} could not be marked paid",
                    locked.transaction_id
                )));
            }
        }

        self.settle_duplicate(attempt, txn, locked).await
    }

    /// 首次确认: 发放全部号码，提交后再发放转盘次数并发送确认邮件
    async fn issue_first(
        &self,
        attempt: Uuid,
        txn: DatabaseTransaction,
        purchase: purchases::Model,
    ) -> AppResult<ReconcileResult> {
        let quantity = purchase.quantity.max(0) as usize;
        let titles = match self.fill_tickets(&txn, &purchase, quantity).await {
            Ok(titles) => titles,
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    log::error!("[{attempt}] Rollback for {} failed: {rb}", purchase.transaction_id);
                }
                return Err(self.abandon_first(attempt, &purchase, e));
            }
        };
        // 提交失败时无法确认状态是否已落库
        txn.commit()
            .await
            .map_err(|e| self.escalate(&purchase, e.into()))?;

        log::info!(
            "[{attempt}] Reconcile {}: first issuance, {} tickets",
            purchase.transaction_id,
            titles.len()
        );

        // 以下两步失败都不影响本次结果
        if let Err(e) = self.spins.grant_for_purchase(&purchase).await {
            let err = AppError::GrantFailure(e.to_string());
            log::error!("[{attempt}] {}: {err}", purchase.transaction_id);
        }
        if let Err(e) = self.notifier.dispatch_confirmation(&purchase, &titles).await {
            let err = match e {
                AppError::NotificationFailure(_) => e,
                other => AppError::NotificationFailure(other.to_string()),
            };
            log::error!("[{attempt}] {}: {err}", purchase.transaction_id);
        }

        Ok(ReconcileResult {
            status: PurchaseStatus::Paid,
            titles,
            updated: true,
        })
    }

    /// 已支付: 号码齐全则原样返回，否则补齐缺失部分。不重复发放次数或邮件。
    async fn settle_duplicate(
        &self,
        attempt: Uuid,
        txn: DatabaseTransaction,
        purchase: purchases::Model,
    ) -> AppResult<ReconcileResult> {
        let quantity = purchase.quantity.max(0) as usize;
        let existing = PurchaseStore::ticket_numbers(&txn, purchase.id).await?;

        if existing.len() >= quantity {
            txn.commit().await?;
            if existing.len() > quantity {
                log::warn!(
                    "[{attempt}] Purchase {} holds {} tickets for quantity {}",
                    purchase.transaction_id,
                    existing.len(),
                    quantity
                );
            }
            log::info!(
                "[{attempt}] Reconcile {}: already paid, {} tickets unchanged",
                purchase.transaction_id,
                existing.len()
            );
            return Ok(ReconcileResult {
                status: PurchaseStatus::Paid,
                titles: existing,
                updated: false,
            });
        }

        log::warn!(
            "[{attempt}] Purchase {} is paid with {}/{} tickets, healing",
            purchase.transaction_id,
            existing.len(),
            quantity
        );
        let titles = self
            .fill_tickets(&txn, &purchase, quantity)
            .await
            .map_err(|e| self.escalate(&purchase, e))?;
        txn.commit()
            .await
            .map_err(|e| self.escalate(&purchase, e.into()))?;

        log::info!(
            "[{attempt}] Reconcile {}: healed, {} tickets",
            purchase.transaction_id,
            titles.len()
        );
        Ok(ReconcileResult {
            status: PurchaseStatus::Paid,
            titles,
            updated: true,
        })
    }

    /// 补齐到 `quantity` 个号码，已有号码作为排除集；返回全部号码 (原有在前)
    async fn fill_tickets<C: ConnectionTrait>(
        &self,
        db: &C,
        purchase: &purchases::Model,
        quantity: usize,
    ) -> AppResult<Vec<String>> {
        for attempt in 1..=TICKET_INSERT_ATTEMPTS {
            let existing = PurchaseStore::ticket_numbers(db, purchase.id).await?;
            if existing.len() >= quantity {
                return Ok(existing);
            }
            let missing = quantity - existing.len();
            let exclude: HashSet<String> = existing.into_iter().collect();
            let fresh = self.generator.generate(missing, &exclude)?;

            let inserted = PurchaseStore::insert_tickets(db, purchase.id, &fresh).await?;
            if inserted < missing as u64 {
                log::warn!(
                    "Ticket conflict on purchase {}: {} of {} rejected (attempt {attempt})",
                    purchase.transaction_id,
                    missing as u64 - inserted,
                    missing
                );
            }
        }

        let stored = PurchaseStore::ticket_numbers(db, purchase.id).await?;
        if stored.len() < quantity {
            return Err(AppError::TicketConflict {
                purchase_id: purchase.id,
                rejected: quantity - stored.len(),
            });
        }
        Ok(stored)
    }

    /// 首次发放在提交前失败: 事务已回滚，购买仍为 pending，返回原始错误
    fn abandon_first(&self, attempt: Uuid, purchase: &purchases::Model, err: AppError) -> AppError {
        if let AppError::GenerationExhausted { .. } = err {
            log::error!(
                target: "alert",
                "Ticket generation exhausted for purchase {}: {err}",
                purchase.transaction_id
            );
        } else {
            log::error!(
                "[{attempt}] First issuance for {} rolled back, purchase stays pending: {err}",
                purchase.transaction_id
            );
        }
        err
    }

    /// 已认定支付但号码写入失败: 单独的 alert 日志
    fn escalate(&self, purchase: &purchases::Model, err: AppError) -> AppError {
        match err {
            AppError::GenerationExhausted { .. } => {
                log::error!(
                    target: "alert",
                    "Ticket generation exhausted for paid purchase {}: {err}",
                    purchase.transaction_id
                );
                err
            }
            other => {
                log::error!(
                    target: "alert",
                    "Payment confirmed but tickets not recorded for {}: {other}",
                    purchase.transaction_id
                );
                AppError::TicketsNotRecorded {
                    transaction_id: purchase.transaction_id.clone(),
                    reason: other.to_string(),
                }
            }
        }
    }
}
