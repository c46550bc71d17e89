//! Maintenance jobs: the scheduled retention sweep and the operator-driven range delete.

mod range_delete;
mod retention;

pub use range_delete::*;
pub use retention::*;
