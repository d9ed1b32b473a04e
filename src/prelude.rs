//! Convenience re-exports for common use.

pub use crate::clock::{Clock, SystemClock};
pub use crate::config::SessionConfig;
pub use crate::error::{Result, SessionError, TransportError};
pub use crate::session::{
    AccessCredentials, AuthSessionManager, Credentials, FileTokenStore, MemoryTokenStore,
    SessionSnapshot, SessionStatus, Subscription, TokenStore, TokenStoreConfig, User,
};
pub use crate::transport::{AuthTransport, HttpTransport};
pub use crate::util::retry::RetryPolicy;
