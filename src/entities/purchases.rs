use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 购买状态，只允许 pending -> paid
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    ToSchema,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseStatus::Pending => write!(f, "pending"),
            PurchaseStatus::Paid => write!(f, "paid"),
        }
    }
}

/// 购买记录实体
/// 说明:
/// - transaction_id: 支付网关创建时返回的交易号，创建后不可变
/// - status / paid_at / *_sent_at / spins_granted_at 仅由支付对账流程写入
/// - metadata: 结账时附带的追踪信息，可包含 `bonus_spins` 覆盖值
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub transaction_id: String,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub quantity: i32,
    pub total_cents: i64,
    pub status: PurchaseStatus,
    pub metadata: Option<Json>,
    pub provider_payload: Option<Json>,
    /// 实际发放的转盘次数 (发放后写入)
    pub bonus_spins: Option<i64>,
    pub spins_granted_at: Option<DateTime<Utc>>,
    pub confirmation_email_sent_at: Option<DateTime<Utc>>,
    /// 确认邮件发送失败次数，达到上限后定时任务不再重试
    pub confirmation_attempts: i32,
    pub recovery_email_sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn is_paid(&self) -> bool {
        self.status == PurchaseStatus::Paid
    }

    /// 结账时写入的赠送次数覆盖值
    pub fn spin_override(&self) -> Option<f64> {
        let value = self.metadata.as_ref()?.get("bonus_spins")?;
        match value {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tickets::Entity")]
    Tickets,
}

impl Related<super::tickets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tickets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
