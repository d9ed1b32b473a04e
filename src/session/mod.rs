//! Session lifecycle: tokens, expiry, refresh, monitoring and the manager.

pub mod activity;
pub mod manager;
pub mod monitor;
pub mod policy;
pub mod refresh;
pub mod snapshot;
pub mod store;
pub mod token;

pub use activity::ActivityTracker;
pub use manager::{AccessCredentials, AuthSessionManager};
pub use monitor::{evaluate, MonitorAction, MonitorTick, SessionMonitor};
pub use policy::ExpiryPolicy;
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use snapshot::{PromptState, SessionSnapshot, SessionStatus, Subscription};
pub use store::{FileTokenStore, MemoryTokenStore, StoredSession, TokenStore, TokenStoreConfig};
pub use token::{jwt_expiry, AuthGrant, Credentials, TokenGrant, TokenSet, User};
