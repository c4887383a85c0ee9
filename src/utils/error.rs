use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ('{value}'): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required field: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Block '{name}' already exists in the graph")]
    DuplicateBlock { name: String },

    #[error("Block '{name}' does not exist in the graph")]
    UnknownBlock { name: String },

    #[error("Connection '{id}' does not exist in the graph")]
    UnknownConnection { id: String },

    #[error("Port error: {message}")]
    PortError { message: String },

    #[error("The hub is not editable")]
    HubEditError,

    #[error("Graph contains a cycle through: {}", blocks.join(", "))]
    CycleError { blocks: Vec<String> },

    #[error("Malformed graph document: {message}")]
    GraphFormatError { message: String },

    #[error("Block '{block}' failed: {reason}")]
    BlockFailed { block: String, reason: String },

    #[error("Sandbox execution failed (exit code {exit_code:?}): {stderr}")]
    SandboxError {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Container runtime error: {message}")]
    RuntimeError { message: String },

    #[error("Prompt error: {message}")]
    PromptError { message: String },

    #[error("LLM provider returned {status}: {body}")]
    LlmError { status: u16, body: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("Authorization failed: {message}")]
    AuthorizationError { message: String },

    #[error("Store error: {message}")]
    StoreError { message: String },

    #[error("Bootstrap step '{step}' failed: {reason}")]
    BootstrapError { step: String, reason: String },

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Graph,
    Execution,
    External,
    Access,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FlowError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::ConfigError { .. }
            | FlowError::InvalidConfigValueError { .. }
            | FlowError::MissingConfigError { .. }
            | FlowError::TomlError(_)
            | FlowError::ValidationError { .. } => ErrorCategory::Configuration,
            FlowError::DuplicateBlock { .. }
            | FlowError::UnknownBlock { .. }
            | FlowError::UnknownConnection { .. }
            | FlowError::PortError { .. }
            | FlowError::HubEditError
            | FlowError::CycleError { .. }
            | FlowError::GraphFormatError { .. }
            | FlowError::SerializationError(_) => ErrorCategory::Graph,
            FlowError::BlockFailed { .. }
            | FlowError::SandboxError { .. }
            | FlowError::PromptError { .. }
            | FlowError::Timeout { .. } => ErrorCategory::Execution,
            FlowError::HttpError(_)
            | FlowError::LlmError { .. }
            | FlowError::RuntimeError { .. }
            | FlowError::StoreError { .. } => ErrorCategory::External,
            FlowError::NotFound { .. } | FlowError::AuthorizationError { .. } => {
                ErrorCategory::Access
            }
            FlowError::IoError(_) | FlowError::BootstrapError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlowError::NotFound { .. } => ErrorSeverity::Low,
            FlowError::HttpError(_)
            | FlowError::LlmError { .. }
            | FlowError::Timeout { .. }
            | FlowError::StoreError { .. } => ErrorSeverity::Medium,
            FlowError::IoError(_)
            | FlowError::RuntimeError { .. }
            | FlowError::BootstrapError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Retrying the same call may succeed without any change on the caller side.
    pub fn is_retryable(&self) -> bool {
        self.severity() == ErrorSeverity::Medium
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the configuration file and command line arguments",
            ErrorCategory::Graph => "Inspect the graph document: block names, ports and connections must be consistent",
            ErrorCategory::Execution => "Check the block's code or prompt and its input values",
            ErrorCategory::External => "Verify that Docker, Redis and the LLM endpoint are reachable, then retry",
            ErrorCategory::Access => "Check the graph id and the permissions granted to the user",
            ErrorCategory::System => "Check file permissions and that the required binaries are installed",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            FlowError::CycleError { blocks } => {
                format!("The graph has a cycle and cannot be ordered ({})", blocks.join(" -> "))
            }
            FlowError::SandboxError { stderr, .. } => {
                let last_line = stderr.lines().last().unwrap_or("unknown error");
                format!("The code block raised an error: {}", last_line)
            }
            FlowError::Timeout { operation, seconds } => {
                format!("'{}' did not finish within {} seconds", operation, seconds)
            }
            other => other.to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        FlowError::NotFound {
            message: message.into(),
        }
    }

    pub fn port(message: impl Into<String>) -> Self {
        FlowError::PortError {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
