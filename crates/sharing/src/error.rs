//! Annotated errors.
//!
//! Inner code wraps whatever went wrong and tags it with an `action` label
//! and, where known, an HTTP status hint; the top-level handler reads the
//! annotations back to classify the response. Reads return the most
//! recently attached annotation of a kind.

use std::borrow::Cow;
use std::fmt;

use http::StatusCode;

#[derive(Debug, Clone)]
enum Annotation {
    Action(Cow<'static, str>),
    Status(StatusCode),
}

/// An error in transit through the handler pipeline.
pub struct Error {
    inner: Box<dyn std::error::Error + Send + Sync + 'static>,
    annotations: Vec<Annotation>,
}

impl Error {
    /// An error with the given message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: message.into().into(),
            annotations: Vec::new(),
        }
    }

    /// Reconstruct a shared error, keeping its message and annotations.
    ///
    /// Used where an error comes back behind an `Arc` (coalesced cache
    /// fills hand one failure to every waiter).
    pub(crate) fn from_shared(err: &Error) -> Self {
        Self {
            inner: err.to_string().into(),
            annotations: err.annotations.clone(),
        }
    }

    /// Attach an action label.
    pub fn with_action(mut self, action: impl Into<Cow<'static, str>>) -> Self {
        self.annotations.push(Annotation::Action(action.into()));
        self
    }

    /// Attach an HTTP status hint.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.annotations.push(Annotation::Status(status));
        self
    }

    /// The most recently attached action label, or `default`.
    pub fn action<'a>(&'a self, default: &'a str) -> &'a str {
        self.annotations
            .iter()
            .rev()
            .find_map(|annotation| match annotation {
                Annotation::Action(action) => Some(action.as_ref()),
                Annotation::Status(_) => None,
            })
            .unwrap_or(default)
    }

    /// The most recently attached status hint, or `default`.
    pub fn status(&self, default: StatusCode) -> StatusCode {
        self.annotations
            .iter()
            .rev()
            .find_map(|annotation| match annotation {
                Annotation::Status(status) => Some(*status),
                Annotation::Action(_) => None,
            })
            .unwrap_or(default)
    }

    /// The wrapped store error, if the source was one.
    pub fn store_error(&self) -> Option<&linkgate_store::Error> {
        self.inner.downcast_ref::<linkgate_store::Error>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (action: {})", self.inner, self.action("unknown"))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<linkgate_store::Error> for Error {
    fn from(err: linkgate_store::Error) -> Self {
        Self {
            inner: Box::new(err),
            annotations: Vec::new(),
        }
    }
}

impl From<linkgate_objectmap::Error> for Error {
    fn from(err: linkgate_objectmap::Error) -> Self {
        Self {
            inner: Box::new(err),
            annotations: Vec::new(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self {
            inner: Box::new(err),
            annotations: Vec::new(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            inner: Box::new(err),
            annotations: Vec::new(),
        }
    }
}

/// Annotation helpers for results.
pub trait ResultExt<T> {
    /// Wrap the error and attach an action label.
    fn action(self, action: &'static str) -> Result<T, Error>;

    /// Wrap the error and attach an HTTP status hint.
    fn status(self, status: StatusCode) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn action(self, action: &'static str) -> Result<T, Error> {
        self.map_err(|err| err.into().with_action(action))
    }

    fn status(self, status: StatusCode) -> Result<T, Error> {
        self.map_err(|err| err.into().with_status(status))
    }
}
