use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Router not found: {0}")]
    RouterNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Persistence error: {0}")]
    PersistenceError(#[from] anyhow::Error),

    /// Fast-path store failure. Logged by the caller, never surfaced as a
    /// request failure.
    #[error("Cache warning: {0}")]
    CacheWarning(anyhow::Error),
}

impl DomainError {
    pub fn is_cache_warning(&self) -> bool {
        matches!(self, DomainError::CacheWarning(_))
    }
}
