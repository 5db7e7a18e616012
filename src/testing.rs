//! 测试共用: SQLite 内存库 + 外部服务替身

use crate::config::{EntitlementConfig, NotificationConfig, TicketConfig};
use crate::entities::purchase_entity as purchases;
use crate::error::{AppError, AppResult};
use crate::external::{EmailMessage, EmailSender, PaymentStatusProvider};
use crate::models::{ProviderStatus, ProviderStatusSnapshot};
use crate::services::{
    EntitlementCalculator, NewPurchase, NotificationDispatcher, PaymentReconciler, PurchaseStore,
    SpinService, TicketNumberGenerator, TicketSource,
};
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CUSTOMER_ID: i64 = 42;

/// 单连接: 内存库随连接关闭而消失
pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

pub fn new_purchase(
    transaction_id: &str,
    quantity: i32,
    metadata: Option<serde_json::Value>,
) -> NewPurchase {
    NewPurchase {
        transaction_id: transaction_id.to_string(),
        customer_id: CUSTOMER_ID,
        customer_name: "Maria".to_string(),
        customer_email: "maria@example.com".to_string(),
        quantity,
        total_cents: quantity as i64 * 100,
        metadata,
    }
}

pub async fn create_purchase(
    store: &PurchaseStore,
    transaction_id: &str,
    quantity: i32,
    metadata: Option<serde_json::Value>,
) -> purchases::Model {
    store
        .create_pending(new_purchase(transaction_id, quantity, metadata))
        .await
        .expect("create purchase")
}

pub fn spin_service(db: &DatabaseConnection) -> SpinService {
    SpinService::new(
        db.clone(),
        PurchaseStore::new(db.clone()),
        EntitlementCalculator::new(EntitlementConfig::default()),
    )
}

pub fn dispatcher(db: &DatabaseConnection, mailer: Arc<CountingMailer>) -> NotificationDispatcher {
    dispatcher_with(db, mailer, NotificationConfig::default())
}

pub fn dispatcher_with(
    db: &DatabaseConnection,
    mailer: Arc<CountingMailer>,
    config: NotificationConfig,
) -> NotificationDispatcher {
    NotificationDispatcher::new(
        PurchaseStore::new(db.clone()),
        mailer,
        config,
        Duration::from_secs(1),
    )
}

pub fn reconciler(db: &DatabaseConnection, mailer: Arc<CountingMailer>) -> PaymentReconciler {
    reconciler_with_tickets(
        db,
        mailer,
        Arc::new(TicketNumberGenerator::new(&TicketConfig::default())),
    )
}

pub fn reconciler_with_tickets(
    db: &DatabaseConnection,
    mailer: Arc<CountingMailer>,
    tickets: Arc<dyn TicketSource>,
) -> PaymentReconciler {
    PaymentReconciler::new(
        db.clone(),
        PurchaseStore::new(db.clone()),
        tickets,
        spin_service(db),
        dispatcher(db, mailer),
    )
}

/// 按顺序返回预设批次的号码来源，忽略排除集 (用于制造唯一约束冲突)
pub struct ScriptedTickets {
    batches: Mutex<VecDeque<Vec<String>>>,
    calls: AtomicUsize,
}

impl ScriptedTickets {
    pub fn new(batches: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(
                batches
                    .iter()
                    .map(|b| b.iter().map(|n| n.to_string()).collect())
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TicketSource for ScriptedTickets {
    fn generate(&self, count: usize, _exclude: &HashSet<String>) -> AppResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let batch = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(batch.into_iter().take(count).collect())
    }
}

/// 记录调用次数的邮件替身
#[derive(Default)]
pub struct CountingMailer {
    calls: AtomicUsize,
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
    reject_to: Option<String>,
}

impl CountingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    /// 只拒收发往某个地址的邮件 (如退信地址)
    pub fn rejecting(address: &str) -> Arc<Self> {
        Arc::new(Self {
            reject_to: Some(address.to_string()),
            ..Default::default()
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for CountingMailer {
    async fn send(&self, message: &EmailMessage) -> AppResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(AppError::ExternalApiError("mail service down".to_string()));
        }
        if self.reject_to.as_deref() == Some(message.to.as_str()) {
            return Err(AppError::ExternalApiError(format!(
                "550 mailbox unavailable: {}",
                message.to
            )));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(format!("msg-{n}"))
    }
}

/// 固定返回某个状态的网关替身
pub struct StaticProvider {
    status: Option<ProviderStatus>,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(status: ProviderStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Some(status),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            status: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentStatusProvider for StaticProvider {
    async fn fetch_status(&self, transaction_id: &str) -> AppResult<ProviderStatusSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.status {
            Some(status) => Ok(ProviderStatusSnapshot::new(
                status.clone(),
                Some(transaction_id.to_string()),
                serde_json::json!({ "id": transaction_id, "status": status.to_string() }),
            )),
            None => Err(AppError::ExternalApiError("gateway unavailable".to_string())),
        }
    }
}
