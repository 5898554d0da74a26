use snafu::Snafu;

/// The broad category of a failure, stable enough for callers to branch on.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum ErrorKind {
    /// Malformed input: bad date range, empty name, voting outside the window.
    Validation,
    /// A domain invariant would be broken: duplicate active nomination or
    /// event, duplicate vote, delete with dependents.
    Conflict,
    /// A referenced record does not exist.
    NotFound,
    /// The store failed for a reason unrelated to the domain rules.
    Storage,
}

/// Errors returned by every operation of the election core.
///
/// The display string is the human-readable reason and is meant to be shown
/// to the end user as is.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ElectionError {
    #[snafu(display("{reason}"))]
    Validation { reason: String },

    #[snafu(display("{reason}"))]
    Conflict { reason: String },

    #[snafu(display("{entity} {id} does not exist"))]
    NotFound { entity: &'static str, id: i64 },

    #[snafu(display("storage failure: {source}"))]
    Storage { source: rusqlite::Error },
}

impl ElectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ElectionError::Validation { .. } => ErrorKind::Validation,
            ElectionError::Conflict { .. } => ErrorKind::Conflict,
            ElectionError::NotFound { .. } => ErrorKind::NotFound,
            ElectionError::Storage { .. } => ErrorKind::Storage,
        }
    }
}

pub type ElectionResult<T> = Result<T, ElectionError>;

/// True when the store rejected a write because of a UNIQUE constraint,
/// including the partial unique indexes guarding club exclusivity.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Maps a lost race at the storage boundary to the same conflict the
/// application-level pre-check would have reported.
pub(crate) fn unique_or_storage(err: rusqlite::Error, reason: &str) -> ElectionError {
    if is_unique_violation(&err) {
        ElectionError::Conflict {
            reason: reason.to_string(),
        }
    } else {
        ElectionError::Storage { source: err }
    }
}
