use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentError {
    /// The object cannot be weakly tracked or has no stable identity.
    #[error("Untrackable object: {0}")]
    Untrackable(String),
}

pub type Result<T> = std::result::Result<T, IdentError>;
