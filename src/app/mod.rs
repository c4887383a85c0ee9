// Application layer: services, the HTTP gateway and the bootstrap sequence.

pub mod bootstrap;
pub mod context;
pub mod gateway;
pub mod services;

pub use bootstrap::{plan, Bootstrap, PlannedStep, Supervisor};
pub use context::AppContext;
pub use gateway::Gateway;
