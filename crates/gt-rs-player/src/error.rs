use gt_rs_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session id already in use")]
    Conflict,

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Expired sessions are as good as absent.
    pub fn is_missing(&self) -> bool {
        matches!(self, SessionError::NotFound | SessionError::Expired)
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("user {0:?} not found")]
    NotFound(String),

    #[error("username {0:?} is already taken")]
    UsernameTaken(String),

    #[error("invalid username {0:?}")]
    InvalidUsername(String),

    #[error("insufficient gems: have {balance}, need {requested}")]
    InsufficientGems { balance: u64, requested: u64 },

    #[error("gem balance would overflow")]
    GemOverflow,

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}
