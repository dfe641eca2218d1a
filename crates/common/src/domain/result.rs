use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid resource specification: {0}")]
    Specification(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("Salesforce REST error (status {status}): {message}")]
    SalesforceRest { status: u16, message: String },

    #[error("transient source error: {0}")]
    SourceTransient(String),

    #[error("fatal source error: {0}")]
    SourceFatal(String),

    #[error("replay storage error: {0}")]
    ReplayStorage(String),

    #[error("sink network error: {0}")]
    SinkNetwork(String),

    #[error("routing error: {0}")]
    Routing(String),

    #[error("invalid routing condition: {0}")]
    InvalidRoutingCondition(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl BridgeError {
    /// Whether retrying the failed operation can succeed without operator
    /// intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::SourceTransient(_) | BridgeError::SinkNetwork(_)
        )
    }
}
