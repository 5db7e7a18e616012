use crate::entities::{purchase_entity as purchases, spin_balance_entity as spins};
use crate::error::{AppError, AppResult};
use crate::models::SpinBalanceResponse;
use crate::services::entitlement::EntitlementCalculator;
use crate::services::purchase_store::PurchaseStore;
use chrono::{Duration, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

#[derive(Clone)]
pub struct SpinService {
    pool: DatabaseConnection,
    store: PurchaseStore,
    calculator: EntitlementCalculator,
}

impl SpinService {
    pub fn new(
        pool: DatabaseConnection,
        store: PurchaseStore,
        calculator: EntitlementCalculator,
    ) -> Self {
        Self {
            pool,
            store,
            calculator,
        }
    }

    /// 获取用户转盘次数（无记录视为 0）
    pub async fn get_balance(&self, customer_id: i64) -> AppResult<SpinBalanceResponse> {
        let model = spins::Entity::find()
            .filter(spins::Column::CustomerId.eq(customer_id))
            .one(&self.pool)
            .await?;
        Ok(model
            .map(Into::into)
            .unwrap_or_else(|| SpinBalanceResponse::empty(customer_id)))
    }

    /// 原子累加: INSERT ... ON CONFLICT (customer_id) DO UPDATE SET balance = balance + n
    pub async fn add_spins<C: ConnectionTrait>(db: &C, customer_id: i64, count: i64) -> AppResult<()> {
        if count <= 0 {
            return Err(AppError::ValidationError(
                "Count to award must be positive".into(),
            ));
        }
        let now = Utc::now();
        spins::Entity::insert(spins::ActiveModel {
            customer_id: Set(customer_id),
            balance: Set(count),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(spins::Column::CustomerId)
                .value(
                    spins::Column::Balance,
                    Expr::col((spins::Entity, spins::Column::Balance)).add(count),
                )
                .update_column(spins::Column::UpdatedAt)
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
        Ok(())
    }

    /// 为已支付的购买发放转盘次数，每笔购买最多发放一次
    ///
    /// 标记与余额累加在同一事务内；返回本次实际发放的次数 (已发放过或为 0 时返回 0)
    pub async fn grant_for_purchase(&self, purchase: &purchases::Model) -> AppResult<i64> {
        if !self.calculator.is_enabled() {
            return Ok(0);
        }
        let amount = self
            .calculator
            .calculate(purchase.quantity as i64, purchase.spin_override());

        let txn = self.pool.begin().await?;
        if !PurchaseStore::claim_spin_grant(&txn, purchase.id, amount).await? {
            log::debug!(
                "Spins already granted for purchase {}",
                purchase.transaction_id
            );
            return Ok(0);
        }
        if amount > 0 {
            Self::add_spins(&txn, purchase.customer_id, amount).await?;
        }
        txn.commit().await?;

        log::info!(
            "Granted {} spins to customer {} for purchase {}",
            amount,
            purchase.customer_id,
            purchase.transaction_id
        );
        Ok(amount)
    }

    /// 补发漏掉的转盘次数 (支付确认后发放失败或进程中断)
    pub async fn sweep_ungranted(&self, grace_period_secs: i64) -> AppResult<usize> {
        if !self.calculator.is_enabled() {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::seconds(grace_period_secs);
        let pending = self.store.paid_without_grant(cutoff, 100).await?;

        let mut granted = 0;
        for purchase in pending {
            match self.grant_for_purchase(&purchase).await {
                Ok(n) if n > 0 => granted += 1,
                Ok(_) => {}
                Err(e) => log::error!(
                    "Failed to grant spins for purchase {}: {e:?}",
                    purchase.transaction_id
                ),
            }
        }
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PurchaseStatus;
    use crate::testing;
    use serde_json::json;

    async fn paid_purchase(
        store: &PurchaseStore,
        db: &DatabaseConnection,
        tx: &str,
        quantity: i32,
        metadata: Option<serde_json::Value>,
    ) -> purchases::Model {
        let purchase = testing::create_purchase(store, tx, quantity, metadata).await;
        PurchaseStore::mark_paid(db, purchase.id, &json!({})).await.unwrap();
        store.find_by_id(purchase.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_grant_is_once_per_purchase() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let service = testing::spin_service(&db);
        let purchase = paid_purchase(&store, &db, "tx-spin", 50, None).await;
        assert_eq!(purchase.status, PurchaseStatus::Paid);

        assert_eq!(service.grant_for_purchase(&purchase).await.unwrap(), 5);
        assert_eq!(service.grant_for_purchase(&purchase).await.unwrap(), 0);

        let balance = service.get_balance(purchase.customer_id).await.unwrap();
        assert_eq!(balance.balance, 5);
        let stored = store.find_by_id(purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.bonus_spins, Some(5));
        assert!(stored.spins_granted_at.is_some());
    }

    #[tokio::test]
    async fn test_grants_accumulate_across_purchases() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let service = testing::spin_service(&db);
        let first = paid_purchase(&store, &db, "tx-1", 20, None).await;
        let second = paid_purchase(&store, &db, "tx-2", 10, Some(json!({ "bonus_spins": 3 }))).await;

        let (a, b) = tokio::join!(
            service.grant_for_purchase(&first),
            service.grant_for_purchase(&second)
        );
        assert_eq!(a.unwrap(), 2);
        assert_eq!(b.unwrap(), 3);
        assert_eq!(service.get_balance(testing::CUSTOMER_ID).await.unwrap().balance, 5);
    }

    #[tokio::test]
    async fn test_pending_purchase_is_not_granted() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let service = testing::spin_service(&db);
        let purchase = testing::create_purchase(&store, "tx-pending", 50, None).await;

        assert_eq!(service.grant_for_purchase(&purchase).await.unwrap(), 0);
        assert_eq!(service.get_balance(purchase.customer_id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_sweep_grants_missing_entitlements() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let service = testing::spin_service(&db);
        paid_purchase(&store, &db, "tx-sweep", 30, None).await;

        // 负的等待时间让刚支付的记录也进入扫描范围
        assert_eq!(service.sweep_ungranted(-60).await.unwrap(), 1);
        assert_eq!(service.sweep_ungranted(-60).await.unwrap(), 0);
        assert_eq!(service.get_balance(testing::CUSTOMER_ID).await.unwrap().balance, 3);
    }

    #[tokio::test]
    async fn test_sweep_counts_only_actual_grants() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let service = testing::spin_service(&db);
        // 数量 5 * 0.1 向下取整为 0: 占用标记但不计入
        paid_purchase(&store, &db, "tx-small", 5, None).await;
        paid_purchase(&store, &db, "tx-big", 20, None).await;

        assert_eq!(service.sweep_ungranted(-60).await.unwrap(), 1);
        assert_eq!(service.get_balance(testing::CUSTOMER_ID).await.unwrap().balance, 2);
        assert_eq!(service.sweep_ungranted(-60).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_spins_rejects_non_positive() {
        let db = testing::setup_db().await;
        assert!(SpinService::add_spins(&db, 1, 0).await.is_err());
    }
}
