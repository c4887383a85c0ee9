pub mod block;
pub mod codec;
pub mod graph;
pub mod port;
pub mod runner;
pub mod template;

pub use block::{Block, BlockKind};
pub use graph::Graph;
pub use port::{Connection, ConnectionHub, HubKind, Port, PortRef, VariableValue};
pub use runner::{BlockOutcome, GraphRunner, RunReport};
pub use crate::utils::error::Result;
