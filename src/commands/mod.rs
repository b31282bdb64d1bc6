//! Subcommand orchestration
//!
//! Each module wires one CLI subcommand to the library: connect, run the
//! operations in order, release whatever was acquired, and hand back an exit
//! code. All policy lives in the library modules; these stay thin.

mod pgloader;
mod post_migrate;
mod source;
mod target;

pub use pgloader::pgloader;
pub use post_migrate::post_migrate;
pub use source::source;
pub use target::target;

/// Structural drift was found and reported; not an error
pub const EXIT_DRIFT: u8 = 10;
