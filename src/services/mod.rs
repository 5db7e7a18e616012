pub mod entitlement;
pub mod ingress;
pub mod notification_service;
pub mod purchase_store;
pub mod reconcile_service;
pub mod spin_service;
pub mod ticket_generator;

pub use entitlement::*;
pub use ingress::*;
pub use notification_service::*;
pub use purchase_store::*;
pub use reconcile_service::*;
pub use spin_service::*;
pub use ticket_generator::*;
