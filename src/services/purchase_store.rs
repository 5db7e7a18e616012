use crate::entities::{PurchaseStatus, purchase_entity as purchases, ticket_entity as tickets};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

/// 结账流程写入的新购买记录
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub transaction_id: String,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub quantity: i32,
    pub total_cents: i64,
    pub metadata: Option<serde_json::Value>,
}

/// 购买记录 / 号码表的读写入口
///
/// 带 `db: &C` 参数的方法既可以传连接池也可以传事务，
/// 对账流程在同一个事务里调用它们。
#[derive(Clone)]
pub struct PurchaseStore {
    pool: DatabaseConnection,
}

impl PurchaseStore {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.pool
    }

    /// 创建待支付记录 (结账流程使用)
    pub async fn create_pending(&self, new: NewPurchase) -> AppResult<purchases::Model> {
        if new.quantity <= 0 {
            return Err(AppError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }
        if new.transaction_id.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Transaction id is required".to_string(),
            ));
        }

        let model = purchases::ActiveModel {
            transaction_id: Set(new.transaction_id),
            customer_id: Set(new.customer_id),
            customer_name: Set(new.customer_name),
            customer_email: Set(new.customer_email),
            quantity: Set(new.quantity),
            total_cents: Set(new.total_cents),
            status: Set(PurchaseStatus::Pending),
            metadata: Set(new.metadata),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;
        Ok(model)
    }

    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<purchases::Model>> {
        Ok(purchases::Entity::find_by_id(id).one(&self.pool).await?)
    }

    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> AppResult<Option<purchases::Model>> {
        Ok(purchases::Entity::find()
            .filter(purchases::Column::TransactionId.eq(transaction_id))
            .one(&self.pool)
            .await?)
    }

    /// 按顺序尝试候选交易号，返回第一个命中的购买记录
    pub async fn resolve(&self, candidates: &[String]) -> AppResult<purchases::Model> {
        for candidate in candidates {
            if let Some(purchase) = self.find_by_transaction_id(candidate).await? {
                return Ok(purchase);
            }
        }
        Err(AppError::PurchaseNotFound(candidates.to_vec()))
    }

    /// 读取并锁定购买记录 (SELECT ... FOR UPDATE)
    ///
    /// SQLite 不支持行锁，其写事务本身是串行的。
    pub async fn lock_for_update<C: ConnectionTrait>(
        db: &C,
        id: i64,
    ) -> AppResult<purchases::Model> {
        let mut query = purchases::Entity::find_by_id(id);
        if db.get_database_backend() != DbBackend::Sqlite {
            query = query.lock_exclusive();
        }
        query
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Purchase {id} not found")))
    }

    /// pending -> paid 的条件更新，返回本次调用是否完成了迁移
    pub async fn mark_paid<C: ConnectionTrait>(
        db: &C,
        id: i64,
        provider_payload: &serde_json::Value,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let result = purchases::Entity::update_many()
            .col_expr(purchases::Column::Status, Expr::value(PurchaseStatus::Paid))
            .col_expr(purchases::Column::PaidAt, Expr::value(now))
            .col_expr(purchases::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                purchases::Column::ProviderPayload,
                Expr::value(provider_payload.clone()),
            )
            .filter(purchases::Column::Id.eq(id))
            .filter(purchases::Column::Status.eq(PurchaseStatus::Pending))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// 已发放号码，按发放顺序
    pub async fn ticket_numbers<C: ConnectionTrait>(
        db: &C,
        purchase_id: i64,
    ) -> AppResult<Vec<String>> {
        let rows = tickets::Entity::find()
            .filter(tickets::Column::PurchaseId.eq(purchase_id))
            .order_by_asc(tickets::Column::Id)
            .all(db)
            .await?;
        Ok(rows.into_iter().map(|t| t.number).collect())
    }

    /// 批量写入号码，(purchase_id, number) 冲突的行被跳过；返回实际写入行数
    pub async fn insert_tickets<C: ConnectionTrait>(
        db: &C,
        purchase_id: i64,
        numbers: &[String],
    ) -> AppResult<u64> {
        if numbers.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let models = numbers.iter().map(|number| tickets::ActiveModel {
            purchase_id: Set(purchase_id),
            number: Set(number.clone()),
            created_at: Set(now),
            ..Default::default()
        });

        let inserted = tickets::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([tickets::Column::PurchaseId, tickets::Column::Number])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(inserted)
    }

    /// 占用赠送标记，只有第一次调用返回 true
    pub async fn claim_spin_grant<C: ConnectionTrait>(
        db: &C,
        id: i64,
        spins: i64,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let result = purchases::Entity::update_many()
            .col_expr(purchases::Column::BonusSpins, Expr::value(spins))
            .col_expr(purchases::Column::SpinsGrantedAt, Expr::value(now))
            .col_expr(purchases::Column::UpdatedAt, Expr::value(now))
            .filter(purchases::Column::Id.eq(id))
            .filter(purchases::Column::Status.eq(PurchaseStatus::Paid))
            .filter(purchases::Column::SpinsGrantedAt.is_null())
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn mark_confirmation_sent(&self, id: i64) -> AppResult<bool> {
        let now = Utc::now();
        let result = purchases::Entity::update_many()
            .col_expr(purchases::Column::ConfirmationEmailSentAt, Expr::value(now))
            .col_expr(purchases::Column::UpdatedAt, Expr::value(now))
            .filter(purchases::Column::Id.eq(id))
            .filter(purchases::Column::ConfirmationEmailSentAt.is_null())
            .exec(&self.pool)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// 确认邮件发送失败，尝试次数加一；返回累计次数
    pub async fn record_confirmation_failure(&self, id: i64) -> AppResult<i32> {
        purchases::Entity::update_many()
            .col_expr(
                purchases::Column::ConfirmationAttempts,
                Expr::col(purchases::Column::ConfirmationAttempts).add(1),
            )
            .col_expr(purchases::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(purchases::Column::Id.eq(id))
            .exec(&self.pool)
            .await?;
        let attempts = purchases::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .map(|p| p.confirmation_attempts)
            .unwrap_or_default();
        Ok(attempts)
    }

    pub async fn mark_recovery_sent(&self, id: i64) -> AppResult<bool> {
        let now = Utc::now();
        let result = purchases::Entity::update_many()
            .col_expr(purchases::Column::RecoveryEmailSentAt, Expr::value(now))
            .col_expr(purchases::Column::UpdatedAt, Expr::value(now))
            .filter(purchases::Column::Id.eq(id))
            .filter(purchases::Column::RecoveryEmailSentAt.is_null())
            .exec(&self.pool)
            .await?;
        Ok(result.rows_affected == 1)
    }

    // -----------------------------
    // 定时任务查询
    // -----------------------------

    /// 已支付但确认邮件未发送，支付时间早于 `paid_before` 且失败次数未达上限
    ///
    /// 失败次数少的排在前面，反复失败的记录不会挤占新记录
    pub async fn paid_without_confirmation(
        &self,
        paid_before: DateTime<Utc>,
        max_attempts: i32,
        limit: u64,
    ) -> AppResult<Vec<purchases::Model>> {
        Ok(purchases::Entity::find()
            .filter(purchases::Column::Status.eq(PurchaseStatus::Paid))
            .filter(purchases::Column::ConfirmationEmailSentAt.is_null())
            .filter(purchases::Column::PaidAt.lt(paid_before))
            .filter(purchases::Column::ConfirmationAttempts.lt(max_attempts))
            .order_by_asc(purchases::Column::ConfirmationAttempts)
            .order_by_asc(purchases::Column::Id)
            .limit(limit)
            .all(&self.pool)
            .await?)
    }

    /// 已支付但未发放转盘次数
    pub async fn paid_without_grant(
        &self,
        paid_before: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<purchases::Model>> {
        Ok(purchases::Entity::find()
            .filter(purchases::Column::Status.eq(PurchaseStatus::Paid))
            .filter(purchases::Column::SpinsGrantedAt.is_null())
            .filter(purchases::Column::PaidAt.lt(paid_before))
            .order_by_asc(purchases::Column::Id)
            .limit(limit)
            .all(&self.pool)
            .await?)
    }

    /// 创建时间在 (created_after, created_before) 之间仍未支付、且未发过催付邮件
    pub async fn pending_for_recovery(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<purchases::Model>> {
        Ok(purchases::Entity::find()
            .filter(purchases::Column::Status.eq(PurchaseStatus::Pending))
            .filter(purchases::Column::RecoveryEmailSentAt.is_null())
            .filter(purchases::Column::CreatedAt.gt(created_after))
            .filter(purchases::Column::CreatedAt.lt(created_before))
            .order_by_asc(purchases::Column::Id)
            .limit(limit)
            .all(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use sea_orm::TransactionTrait;

    #[tokio::test]
    async fn test_resolve_tries_candidates_in_order() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let created = testing::create_purchase(&store, "abc-secure-id", 3, None).await;

        let found = store
            .resolve(&["123".to_string(), "abc-secure-id".to_string()])
            .await
            .unwrap();
        assert_eq!(found.id, created.id);

        let err = store.resolve(&["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, AppError::PurchaseNotFound(ids) if ids == vec!["nope"]));
    }

    #[tokio::test]
    async fn test_create_pending_rejects_non_positive_quantity() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db);
        let mut new = testing::new_purchase("tx-zero", 1, None);
        new.quantity = 0;
        assert!(matches!(
            store.create_pending(new).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_paid_only_once() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let purchase = testing::create_purchase(&store, "tx-cas", 1, None).await;
        let payload = serde_json::json!({ "status": "paid" });

        assert!(PurchaseStore::mark_paid(&db, purchase.id, &payload).await.unwrap());
        assert!(!PurchaseStore::mark_paid(&db, purchase.id, &payload).await.unwrap());

        let stored = store.find_by_id(purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Paid);
        assert!(stored.paid_at.is_some());
        assert_eq!(stored.provider_payload, Some(payload));
    }

    #[tokio::test]
    async fn test_insert_tickets_skips_duplicates_within_purchase() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let a = testing::create_purchase(&store, "tx-a", 2, None).await;
        let b = testing::create_purchase(&store, "tx-b", 2, None).await;

        let txn = db.begin().await.unwrap();
        let first = vec!["123456".to_string(), "654321".to_string()];
        assert_eq!(PurchaseStore::insert_tickets(&txn, a.id, &first).await.unwrap(), 2);
        let again = vec!["123456".to_string(), "111111".to_string()];
        assert_eq!(PurchaseStore::insert_tickets(&txn, a.id, &again).await.unwrap(), 1);
        // 跨购买允许相同号码
        assert_eq!(PurchaseStore::insert_tickets(&txn, b.id, &first).await.unwrap(), 2);
        txn.commit().await.unwrap();

        let numbers = PurchaseStore::ticket_numbers(&db, a.id).await.unwrap();
        assert_eq!(numbers, vec!["123456", "654321", "111111"]);
    }

    #[tokio::test]
    async fn test_sent_markers_are_set_once() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db);
        let purchase = testing::create_purchase(&store, "tx-mark", 1, None).await;

        assert!(store.mark_confirmation_sent(purchase.id).await.unwrap());
        assert!(!store.mark_confirmation_sent(purchase.id).await.unwrap());
        assert!(store.mark_recovery_sent(purchase.id).await.unwrap());
        assert!(!store.mark_recovery_sent(purchase.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmation_query_skips_exhausted_and_orders_by_attempts() {
        let db = testing::setup_db().await;
        let store = PurchaseStore::new(db.clone());
        let failing = testing::create_purchase(&store, "tx-bounce", 1, None).await;
        let fresh = testing::create_purchase(&store, "tx-fresh", 1, None).await;
        for p in [&failing, &fresh] {
            PurchaseStore::mark_paid(&db, p.id, &serde_json::json!({})).await.unwrap();
        }

        assert_eq!(store.record_confirmation_failure(failing.id).await.unwrap(), 1);
        let cutoff = Utc::now() + chrono::Duration::seconds(60);
        let due = store.paid_without_confirmation(cutoff, 3, 10).await.unwrap();
        assert_eq!(
            due.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![fresh.id, failing.id]
        );

        store.record_confirmation_failure(failing.id).await.unwrap();
        assert_eq!(store.record_confirmation_failure(failing.id).await.unwrap(), 3);
        let due = store.paid_without_confirmation(cutoff, 3, 10).await.unwrap();
        assert_eq!(due.iter().map(|p| p.id).collect::<Vec<_>>(), vec![fresh.id]);
    }
}
