//! Data models for the TeamFlow application.
//!
//! JSON shapes use camelCase field names to match the web client.

mod attendance;
mod change;
mod image;
mod profile;
mod task;

pub use attendance::*;
pub use change::*;
pub use image::*;
pub use profile::*;
pub use task::*;
