//! Error types for the pool

use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by resource constructors and keep-alive checks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// The resource constructor failed; the original error is the source
    #[error("Failed to construct resource: {0}")]
    Construction(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The pool was full on checkin; the resource has been released
    #[error("Pool is full")]
    PoolFull,

    #[error("Pool is closed")]
    Closed,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    pub(crate) fn construction(err: BoxError) -> Self {
        PoolError::Construction(Arc::from(err))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
