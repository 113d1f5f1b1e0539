//! Capabilities the pool consumes from the database layer

use std::error::Error;

/// Compiled statement handle held by the pool
pub trait Statement: Send + Sync + 'static {
    /// Error returned when releasing the handle
    type Error: Error + Send + Sync + 'static;

    /// Release the underlying resource
    fn close(&self) -> Result<(), Self::Error>;
}

/// Connection able to compile query text into a statement
pub trait Prepare<S> {
    /// Error returned when the query cannot be compiled
    type Error: Error + Send + Sync + 'static;

    /// Compile `query` against this connection
    fn prepare(&self, query: &str) -> Result<S, Self::Error>;
}

impl<S, E, F> Prepare<S> for F
where
    F: Fn(&str) -> Result<S, E>,
    E: Error + Send + Sync + 'static,
{
    type Error = E;

    fn prepare(&self, query: &str) -> Result<S, E> {
        self(query)
    }
}
