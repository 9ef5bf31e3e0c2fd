//! azweb State Management
//!
//! Records which ARM object each manifest resource maps to, so later runs
//! update or delete what earlier runs created.
//!
//! - **StateFile**: serial, lineage and one entry per managed resource
//! - **StateBackend**: storage plus an exclusive lock per run
//! - **LockInfo**: who holds the lock and until when
//!
//! ```ignore
//! let backend = create_backend(&BackendConfig::local())?;
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
