//! Lifecycle hooks
//!
//! Hooks provision resources at two points of an orchestration run:
//!
//! ```text
//! 1. Graph built and frozen
//!    ↓
//! 2. before_start (per resource)             ← blocks startup; failure = FailedToStart
//!    ↓
//! 3. Endpoints allocated, connection strings available
//!    ↓
//! 4. after_resources_created (per resource)  ← background; failure recorded only
//!    ↓
//! 5. Wait conditions resolved, resources started
//!    ↓
//! [Running...]
//!    ↓
//! 6. Shutdown: every hook task cancelled, bounded by shutdown_timeout
//! ```
//!
//! Hooks report progress only through [`HookContext`], which writes to the
//! notification service.

mod context;
mod report;
mod runner;
mod traits;

pub use context::{HookContext, PROGRESS_PROPERTY};
pub use report::{HookPhase, HookTaskReport, HookTaskState};
pub use runner::{LifecycleHookRunner, CANCELLED_BEFORE_START};
pub use traits::LifecycleHook;
