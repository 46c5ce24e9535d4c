//! Player-facing state: accounts and login sessions.

pub mod account;
pub mod error;
pub mod session;

pub use account::AccountStore;
pub use error::{AccountError, SessionError};
pub use session::SessionStore;
