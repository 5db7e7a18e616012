pub mod payment;
pub mod spin;
pub mod webhook;

pub use payment::payment_config;
pub use spin::spin_config;
pub use webhook::webhook_config;
