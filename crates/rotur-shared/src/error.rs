use thiserror::Error;

/// Input that failed a length, charset or format check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid username: {0}")]
    Username(String),

    #[error("Invalid email address")]
    Email,

    #[error("Password must be a {0}-character hex hash")]
    PasswordHash(usize),

    #[error("Invalid amount: {0}")]
    Amount(String),

    #[error("Invalid name: {0}")]
    Name(String),

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid billing period: {0}")]
    Period(String),

    #[error("Billing frequency must be at least 1")]
    Frequency,

    #[error("Unsafe path component: {0}")]
    PathComponent(String),
}
