use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRepositoryUrl,
    RepositoryNotFound,
    RateLimitExceeded,
    FetchFailed,
    ClassNotFound,
    ClassExists,
    StudentNotFound,
    NoStudentsFound,
    DuplicateRosterEntry,
    Validation,
    Unauthorized,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Unsupported GitHub URL format: {input:?}")]
    InvalidRepositoryUrl { input: String },
    #[error("Repository not found for {url}")]
    RepositoryNotFound { url: String },
    #[error("GitHub API rate limit exceeded. Provide a personal access token via GITHUB_TOKEN.")]
    RateLimitExceeded,
    #[error("Failed to fetch commits for {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Class not found: {0}")]
    ClassNotFound(Uuid),
    #[error("A class named {0:?} already exists")]
    ClassExists(String),
    #[error("Student not found: {0}")]
    StudentNotFound(Uuid),
    #[error("No students found for class {0}")]
    NoStudentsFound(Uuid),
    #[error("Duplicate roster entry: {0}")]
    DuplicateRosterEntry(String),
    #[error("{0}")]
    Validation(String),
    #[error("Admin privileges required")]
    Unauthorized,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRepositoryUrl { .. } => ErrorKind::InvalidRepositoryUrl,
            Self::RepositoryNotFound { .. } => ErrorKind::RepositoryNotFound,
            Self::RateLimitExceeded => ErrorKind::RateLimitExceeded,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::ClassNotFound(_) => ErrorKind::ClassNotFound,
            Self::ClassExists(_) => ErrorKind::ClassExists,
            Self::StudentNotFound(_) => ErrorKind::StudentNotFound,
            Self::NoStudentsFound(_) => ErrorKind::NoStudentsFound,
            Self::DuplicateRosterEntry(_) => ErrorKind::DuplicateRosterEntry,
            Self::Validation(_) | Self::Csv(_) => ErrorKind::Validation,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Database(_) | Self::Migration(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
