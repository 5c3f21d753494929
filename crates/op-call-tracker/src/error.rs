use thiserror::Error;

/// Misuse of the ambient context stack.
///
/// These are programming errors in the run-wrapper. They are reported at the
/// violating call and the stack is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("unbalanced restore: token for depth {expected} used while depth {current} is current")]
    Unbalanced { expected: usize, current: usize },

    #[error("context at depth {depth} was already restored")]
    AlreadyRestored { depth: usize },

    #[error("no ambient context is active")]
    NoCurrentContext,
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
