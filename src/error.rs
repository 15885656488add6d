use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vision processing error: {0}")]
    Vision(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("LLM Gateway error: {0}")]
    LLM(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Placeholder resolution failed for {placeholder} at step {step}")]
    Placeholder { placeholder: String, step: usize },

    #[error("Sensitive operation denied: {0}")]
    SensitiveGateDenied(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Config error requiring user action: {0}")]
    ConfigError(String),

    #[error("Planner returned unparseable output: {0}")]
    PlannerParseFailure(String),

    #[error("Reflector returned unparseable output: {0}")]
    ReflectorParseFailure(String),
}
