pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use app::{AppContext, Gateway};
pub use config::AppConfig;
pub use core::{Block, BlockKind, Graph, GraphRunner, RunReport};
pub use utils::error::{FlowError, Result};
