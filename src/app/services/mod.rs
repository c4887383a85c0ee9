pub mod auth;
pub mod code_service;
pub mod execution;
pub mod graph_manager;
pub mod llm_service;

pub use auth::AuthService;
pub use code_service::CodeExecutionService;
pub use execution::GraphExecutionService;
pub use graph_manager::GraphManager;
pub use llm_service::LlmService;
