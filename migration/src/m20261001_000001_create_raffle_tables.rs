use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DbBackend;

/// 购买记录 (一次结账)
#[derive(DeriveIden)]
enum Purchases {
    Table,
    Id,
    TransactionId,
    CustomerId,
    CustomerName,
    CustomerEmail,
    Quantity,
    TotalCents,
    Status,
    Metadata,
    ProviderPayload,
    BonusSpins,
    SpinsGrantedAt,
    ConfirmationEmailSentAt,
    ConfirmationAttempts,
    RecoveryEmailSentAt,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

/// 已发放的抽奖号码
#[derive(DeriveIden)]
enum Tickets {
    Table,
    Id,
    PurchaseId,
    Number,
    CreatedAt,
}

/// 用户转盘次数余额
#[derive(DeriveIden)]
enum SpinBalances {
    Table,
    Id,
    CustomerId,
    Balance,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

/// 自增主键列
///
/// SQLite 只允许 `INTEGER PRIMARY KEY` 使用 AUTOINCREMENT，其它数据库使用 bigint。
fn id_column<T: IntoIden>(backend: DbBackend, col: T) -> ColumnDef {
    let mut def = ColumnDef::new(col);
    match backend {
        DbBackend::Sqlite => def.integer(),
        _ => def.big_integer(),
    };
    def.not_null().auto_increment().primary_key();
    def
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(Purchases::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, Purchases::Id))
                    .col(
                        ColumnDef::new(Purchases::TransactionId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::CustomerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::CustomerName)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Purchases::CustomerEmail)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Purchases::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(Purchases::TotalCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Purchases::Metadata).json().null())
                    .col(ColumnDef::new(Purchases::ProviderPayload).json().null())
                    .col(ColumnDef::new(Purchases::BonusSpins).big_integer().null())
                    .col(
                        ColumnDef::new(Purchases::SpinsGrantedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::ConfirmationEmailSentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::ConfirmationAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Purchases::RecoveryEmailSentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Purchases::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 外部交易号唯一
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_purchases_transaction_id_unique")
                    .table(Purchases::Table)
                    .col(Purchases::TransactionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 定时扫描按状态 + 时间过滤
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_purchases_status_created_at")
                    .table(Purchases::Table)
                    .col(Purchases::Status)
                    .col(Purchases::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tickets::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, Tickets::Id))
                    .col(ColumnDef::new(Tickets::PurchaseId).big_integer().not_null())
                    .col(ColumnDef::new(Tickets::Number).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Tickets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一笔购买内号码不可重复 (跨购买允许重复)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_purchase_number_unique")
                    .table(Tickets::Table)
                    .col(Tickets::PurchaseId)
                    .col(Tickets::Number)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SpinBalances::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, SpinBalances::Id))
                    .col(
                        ColumnDef::new(SpinBalances::CustomerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SpinBalances::Balance)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(SpinBalances::Balance).gte(0)),
                    )
                    .col(
                        ColumnDef::new(SpinBalances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 一个用户一条余额记录 (ON CONFLICT 原子累加依赖此索引)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_spin_balances_customer_unique")
                    .table(SpinBalances::Table)
                    .col(SpinBalances::CustomerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SpinBalances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tickets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Purchases::Table).to_owned())
            .await?;
        Ok(())
    }
}
