use thiserror::Error;

/// Failures surfaced by the import workflow. Messages are shown to the user verbatim.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Text import is empty. Add a title and at least one sentence.")]
    EmptyInput,

    #[error("Add a title on the first line before importing.")]
    MissingTitle,

    #[error("No sentences were found. Add at least one sentence per line.")]
    NoSentences,

    /// Surface and candidate arrays disagree. Only reachable through a caller bug.
    #[error("Surface tokens and candidate tokens must match in length.")]
    LengthMismatch,

    #[error("This text matches one that already exists in your library.")]
    DuplicateText,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Text not found: {0}")]
    TextNotFound(String),
}
