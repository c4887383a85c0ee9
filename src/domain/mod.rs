// Domain layer: identifiers, value types and the port traits implemented by adapters.

pub mod model;
pub mod ports;

pub use model::{Action, BlockId, ConnectionId, GraphId, Permissions, Value};
pub use ports::{
    CodeExecutor, CommandOutput, ContainerRuntime, KeyValueStore, LlmClient, ManagedProcess,
    ProcessLauncher,
};
