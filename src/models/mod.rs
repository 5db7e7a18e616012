pub mod common;
pub mod payment;
pub mod spin;

pub use common::*;
pub use payment::*;
pub use spin::*;
