//! Shared pieces of the `slips-render` and `slips-bench` binaries.

pub mod setup;
