use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Analytics are per user; an absent id never turns into an
    /// all-users query.
    #[error("a user id is required")]
    MissingUser,

    #[error("records belong to {0} different users; pick one")]
    AmbiguousUser(usize),

    #[error("failed to retrieve prediction records: {0}")]
    Retrieval(#[from] sqlx::Error),

    #[error("invalid prediction record: {0}")]
    InvalidRecord(String),
}
