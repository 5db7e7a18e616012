pub mod purchases;
pub mod spin_balances;
pub mod tickets;

pub use purchases::PurchaseStatus;
pub use purchases as purchase_entity;
pub use spin_balances as spin_balance_entity;
pub use tickets as ticket_entity;
