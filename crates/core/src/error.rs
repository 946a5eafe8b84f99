//! Error taxonomy shared by all reconcilers.
//!
//! `NotFound` and `AlreadyExists` are control signals that reconcilers normally handle
//! locally; they only escape when a caller deliberately lets them through (the raced
//! statefulset creation). Everything else is fatal for the current sync pass.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Store or database unreachable, or any unclassified backend failure.
    #[error("{0}")]
    Transport(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("not ready: {0}")]
    Unready(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context { context: context.into(), source: Box::new(self) }
    }

    /// Innermost error, skipping every context layer.
    pub fn root(&self) -> &Error {
        let mut cur = self;
        while let Error::Context { source, .. } = cur {
            cur = source;
        }
        cur
    }

    pub fn is_already_exists(&self) -> bool { matches!(self.root(), Error::AlreadyExists(_)) }
    pub fn is_not_found(&self) -> bool { matches!(self.root(), Error::NotFound(_)) }
}

pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().context(f()))
    }
}
