use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for Backboard operations.
///
/// Besides the layer's own failures (`ConfigurationError`, `OpenError`,
/// `UpgradeCallbackError`), the taxonomy carries the storage engine's
/// request errors so they can be propagated unmodified to the caller.
///
/// # Examples
///
/// ```rust,ignore
/// use backboard::errors::{BackboardError, ErrorKind, BackboardResult};
///
/// fn example() -> BackboardResult<()> {
///     Err(BackboardError::new("Object store not found", ErrorKind::NotFoundError))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Layer errors
    /// Malformed schema snapshot list or open target
    ConfigurationError,
    /// The engine failed to open the database, or the upgrade could not be applied
    OpenError,
    /// The caller supplied upgrade callback failed
    UpgradeCallbackError,

    // Engine request errors - passed through unmodified
    /// A request was issued against a transaction that already settled
    TransactionInactiveError,
    /// The transaction was aborted
    AbortError,
    /// A key or unique index constraint was violated, or a store/index already exists
    ConstraintError,
    /// The supplied key, key path or key range is invalid
    DataError,
    /// The named object store or index does not exist
    NotFoundError,
    /// The operation is not valid in the current state of the object
    InvalidStateError,
    /// The combination of parameters is not supported by the engine
    InvalidAccessError,
    /// A write was attempted in a read-only transaction
    ReadOnlyError,
    /// The requested version is lower than the current version
    VersionError,
    /// The engine ran out of storage quota
    QuotaExceededError,

    // Event errors
    /// A listener failed while handling an event
    EventError,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Returns the DOM-style name of the error kind, e.g. `TransactionInactiveError`.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::OpenError => "OpenError",
            ErrorKind::UpgradeCallbackError => "UpgradeCallbackError",
            ErrorKind::TransactionInactiveError => "TransactionInactiveError",
            ErrorKind::AbortError => "AbortError",
            ErrorKind::ConstraintError => "ConstraintError",
            ErrorKind::DataError => "DataError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::InvalidStateError => "InvalidStateError",
            ErrorKind::InvalidAccessError => "InvalidAccessError",
            ErrorKind::ReadOnlyError => "ReadOnlyError",
            ErrorKind::VersionError => "VersionError",
            ErrorKind::QuotaExceededError => "QuotaExceededError",
            ErrorKind::EventError => "EventError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ConfigurationError => write!(f, "Configuration error"),
            ErrorKind::OpenError => write!(f, "Open error"),
            ErrorKind::UpgradeCallbackError => write!(f, "Upgrade callback error"),
            ErrorKind::TransactionInactiveError => write!(f, "Transaction inactive"),
            ErrorKind::AbortError => write!(f, "Transaction aborted"),
            ErrorKind::ConstraintError => write!(f, "Constraint violation"),
            ErrorKind::DataError => write!(f, "Invalid data"),
            ErrorKind::NotFoundError => write!(f, "Not found"),
            ErrorKind::InvalidStateError => write!(f, "Invalid state"),
            ErrorKind::InvalidAccessError => write!(f, "Invalid access"),
            ErrorKind::ReadOnlyError => write!(f, "Read only"),
            ErrorKind::VersionError => write!(f, "Version error"),
            ErrorKind::QuotaExceededError => write!(f, "Quota exceeded"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom Backboard error type.
///
/// `BackboardError` carries a message, an [`ErrorKind`], an optional cause and the
/// backtrace captured at construction. Errors are cheap to clone so that a single
/// transaction settlement can be handed out any number of times.
///
/// # Examples
///
/// ```rust,ignore
/// use backboard::errors::{BackboardError, ErrorKind};
///
/// let cause = BackboardError::new("unique index 'tid' violated", ErrorKind::ConstraintError);
/// let err = BackboardError::new_with_cause("Schema upgrade failed", ErrorKind::OpenError, cause);
/// assert_eq!(err.cause().unwrap().kind(), &ErrorKind::ConstraintError);
/// ```
#[derive(Clone)]
pub struct BackboardError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<BackboardError>>,
    backtrace: Atomic<Backtrace>,
}

impl BackboardError {
    /// Creates a new `BackboardError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        BackboardError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `BackboardError` preserving `cause` as the underlying error.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: BackboardError) -> Self {
        BackboardError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    /// DOM-style name of the error, e.g. `TransactionInactiveError`.
    pub fn name(&self) -> &'static str {
        self.error_kind.name()
    }

    pub fn cause(&self) -> Option<&BackboardError> {
        self.cause.as_deref()
    }

    /// Walks the cause chain down to the innermost error.
    pub fn root_cause(&self) -> &BackboardError {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }
}

impl Display for BackboardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for BackboardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}: {}\nCaused by: {:?}", self.name(), self.message, cause),
            None => write!(f, "{}: {}\n{:?}", self.name(), self.message, self.backtrace.read()),
        }
    }
}

impl Error for BackboardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for Backboard operations.
pub type BackboardResult<T> = Result<T, BackboardError>;

impl From<serde_json::Error> for BackboardError {
    fn from(err: serde_json::Error) -> Self {
        BackboardError::new(&format!("JSON error: {}", err), ErrorKind::DataError)
    }
}

impl From<anyhow::Error> for BackboardError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BackboardError>() {
            Ok(error) => error,
            Err(err) => BackboardError::new(&format!("{:#}", err), ErrorKind::InternalError),
        }
    }
}

impl From<String> for BackboardError {
    fn from(msg: String) -> Self {
        BackboardError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for BackboardError {
    fn from(msg: &str) -> Self {
        BackboardError::new(msg, ErrorKind::InternalError)
    }
}
