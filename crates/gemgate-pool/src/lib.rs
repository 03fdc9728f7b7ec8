//! Health-tracked pool of upstream API keys.
//!
//! Keys move between `Active`, `Cooldown` and `Disabled` as failures are
//! reported and classified. Selection is round-robin over `Active` keys; an
//! elapsed cooldown is resolved both lazily on selection and by a background
//! sweep task.

pub mod classify;
pub mod clock;
pub mod pool;
pub mod record;
pub mod reset;

pub use classify::{FailureClassifier, FailureKind, RuleClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use pool::{KeyLease, KeyPool, PoolConfig, PoolHealth, PoolSnapshot, RecoverySweep};
pub use record::{KeyInput, KeyStatus, KeyView, key_preview};
pub use reset::next_daily_reset;
