//! Consistency reconciliation between the hot and durable stores.
//!
//! - [`Reconciler`]: paged, round-robin audit with directional repair
//! - [`diff_sets`]: member-level comparison of one entity's sets
//! - [`ReconcileRunnable`]: periodic execution on a background worker

pub mod diff;
pub mod reconciler;
pub mod task;

pub use diff::{diff_sets, SetDiff};
pub use reconciler::Reconciler;
pub use task::{ReconcileRunnable, ReconcileTask};
