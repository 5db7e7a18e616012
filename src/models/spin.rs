use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::entities::spin_balance_entity;

/// 用户转盘次数响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SpinBalanceResponse {
    pub customer_id: i64,
    /// 剩余次数
    pub balance: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SpinBalanceResponse {
    /// 从未发放过的用户
    pub fn empty(customer_id: i64) -> Self {
        Self {
            customer_id,
            balance: 0,
            updated_at: None,
        }
    }
}

impl From<spin_balance_entity::Model> for SpinBalanceResponse {
    fn from(m: spin_balance_entity::Model) -> Self {
        Self {
            customer_id: m.customer_id,
            balance: m.balance,
            updated_at: m.updated_at,
        }
    }
}
