pub mod error;
pub mod ids;
pub mod logger;
pub mod monitor;
pub mod validation;
