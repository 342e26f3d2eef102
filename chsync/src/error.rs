//! Error type shared by every component of the sync engine.
//!
//! A [`SyncError`] carries an [`ErrorKind`] used for classification and metrics, a static
//! description, an optional dynamic detail, an optional source error and the callsite where
//! it was created. Errors of concurrent operations, such as writes to several replicas, are
//! aggregated into a single [`SyncError`].

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error returned by queue, lock, routing, source and destination operations.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(Box<ErrorPayload>),
    /// Errors of operations that ran side by side, e.g. a fan-out write.
    Many {
        errors: Vec<SyncError>,
        location: &'static Location<'static>,
    },
}

/// Classification of a [`SyncError`].
///
/// A busy lock is not an error: it surfaces as a skipped round. A hard released lock is
/// reported through logs and metrics only.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Backing store errors (queue, lock, versions, schedule)
    QueueUnavailable,
    LockLost,

    // Source errors
    SourceReadFailure,
    SourceConnectionFailed,

    // Data errors
    SerializationFailure,
    DeserializationError,
    ConversionError,
    InvalidData,

    // Destination errors
    DestinationWriteFailure,
    PartialDestinationWrite,
    DestinationReadFailure,
    DestinationConnectionFailed,

    // Configuration errors
    ConfigError,
    UnknownTable,
    UnknownReplica,

    // Generic errors
    IoError,
    InvalidState,
    Unknown,

    // Raised by fail points in fault injection tests.
    #[cfg(feature = "failpoints")]
    InjectedFault,
}

impl ErrorKind {
    /// Returns the kind in `snake_case`, as used in metric labels.
    pub fn as_static_str(&self) -> &'static str {
        match self {
            ErrorKind::QueueUnavailable => "queue_unavailable",
            ErrorKind::LockLost => "lock_lost",
            ErrorKind::SourceReadFailure => "source_read_failure",
            ErrorKind::SourceConnectionFailed => "source_connection_failed",
            ErrorKind::SerializationFailure => "serialization_failure",
            ErrorKind::DeserializationError => "deserialization_error",
            ErrorKind::ConversionError => "conversion_error",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::DestinationWriteFailure => "destination_write_failure",
            ErrorKind::PartialDestinationWrite => "partial_destination_write",
            ErrorKind::DestinationReadFailure => "destination_read_failure",
            ErrorKind::DestinationConnectionFailed => "destination_connection_failed",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::UnknownTable => "unknown_table",
            ErrorKind::UnknownReplica => "unknown_replica",
            ErrorKind::IoError => "io_error",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Unknown => "unknown",
            #[cfg(feature = "failpoints")]
            ErrorKind::InjectedFault => "injected_fault",
        }
    }
}

impl SyncError {
    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.kind,
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns the kinds of all errors, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.repr {
            ErrorRepr::Single(payload) => vec![payload.kind],
            ErrorRepr::Many { errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    pub fn description(&self) -> &str {
        match &self.repr {
            ErrorRepr::Single(payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the first available detail.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.detail.as_deref(),
            ErrorRepr::Many { errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match &self.repr {
            ErrorRepr::Single(payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the error that caused this one. No effect on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(payload) = &mut self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let payload = ErrorPayload {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        };

        SyncError {
            repr: ErrorRepr::Single(Box::new(payload)),
        }
    }

    #[track_caller]
    fn wrap<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Errors compare equal when their kinds match.
impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Hashes kind and description only, so repeated occurrences of one failure group together.
impl Hash for SyncError {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);

        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_block(f, "Detail", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_block(f, "Backtrace", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error(s) @ {}:{}:{}",
                    errors.len(),
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, title: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in body.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(description), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(description), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unchanged.
impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SyncError {
        let location = Location::caller();
        let mut errors: Vec<SyncError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        SyncError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> SyncError {
        SyncError::wrap(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for SyncError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SyncError {
        match err.classify() {
            serde_json::error::Category::Io => {
                SyncError::wrap(ErrorKind::IoError, "JSON I/O operation failed", err)
            }
            _ => SyncError::wrap(
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
                err,
            ),
        }
    }
}

impl From<std::num::ParseIntError> for SyncError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<chrono::ParseError> for SyncError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Datetime parsing failed", err)
    }
}

impl From<chsync_config::shared::ValidationError> for SyncError {
    #[track_caller]
    fn from(err: chsync_config::shared::ValidationError) -> SyncError {
        SyncError::wrap(ErrorKind::ConfigError, "Invalid sync configuration", err)
    }
}

impl From<uuid::Error> for SyncError {
    #[track_caller]
    fn from(err: uuid::Error) -> SyncError {
        SyncError::wrap(ErrorKind::InvalidData, "UUID parsing failed", err)
    }
}

/// Store queries map to [`ErrorKind::QueueUnavailable`]. Source reads map their errors
/// explicitly to [`ErrorKind::SourceReadFailure`].
impl From<sqlx::Error> for SyncError {
    #[track_caller]
    fn from(err: sqlx::Error) -> SyncError {
        let description = match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => "Store connection unavailable",
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => "Store connection failed",
            _ => "Store query failed",
        };

        SyncError::wrap(ErrorKind::QueueUnavailable, description, err)
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> SyncError {
        SyncError::wrap(ErrorKind::QueueUnavailable, "Store migration failed", err)
    }
}
