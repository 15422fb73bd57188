//! Background machinery.
//!
//! Threads and bus handlers that keep compiled artifacts current:
//!
//! ```text
//! InvalidationScheduler --COMPILE--> BackgroundCompiler --> CompileCache
//!  (timer + notifications)            (worker pool)
//!          ^
//!   GroupLifecycle (group created / deleted)
//! ```
//!
//! # Module Structure
//!
//! - `messages` - Sweep filters and worker jobs
//! - `sweep` - Invalidation scheduler
//! - `dispatch` - Background compile dispatcher
//! - `lifecycle` - Group creation and removal
//! - `coordinator` - Wires up and runs everything

pub mod coordinator;
pub mod dispatch;
pub mod lifecycle;
pub mod messages;
pub mod sweep;

pub use coordinator::Service;
pub use dispatch::BackgroundCompiler;
pub use lifecycle::GroupLifecycle;
pub use sweep::{InvalidationScheduler, is_self_inflicted};
