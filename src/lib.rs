//! Session and token lifecycle coordination.
//!
//! Keeps an authenticated session alive for a dashboard client: restores it
//! from storage, refreshes tokens ahead of expiry with a single in-flight
//! refresh, prompts before an idle session lapses, and logs out cleanly.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use authsession::prelude::*;
//!
//! # async fn example() -> authsession::error::Result<()> {
//! let config = SessionConfig::from_env()?;
//! let transport = Arc::new(HttpTransport::new("https://dashboard.example.com")?);
//! let store = Arc::new(FileTokenStore::new(TokenStoreConfig::new(
//!     TokenStoreConfig::default_dir(),
//!     "dashboard",
//! )));
//! let manager = AuthSessionManager::new(config, transport, store);
//! let _subscription = manager.subscribe(|snapshot| println!("{}", snapshot.status));
//! if !manager.start().await.is_authenticated() {
//!     manager.login(Credentials::new("ada", "correct horse")).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod session;
pub mod transport;
pub mod util;
