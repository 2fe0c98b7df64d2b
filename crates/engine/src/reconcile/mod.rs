//! Event-link reconciliation
//!
//! The [`Resolver`] answers "is this event already linked"; the
//! [`ReconcilePass`] drives a whole tenant through both providers.

mod pass;
mod resolver;

pub use pass::{PassRunner, PassSettings, PassSummary, ReconcilePass};
pub use resolver::{Candidate, Observed, Resolution, Resolver};
