pub mod session;
pub mod token;

pub use session::{SESSION_TTL_SECS, SessionError, SessionKeys, SessionUser};
pub use token::{MemoryTokenStore, TokenStore, generate_word};
