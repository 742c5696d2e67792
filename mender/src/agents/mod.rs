//! The four cooperating agents of the heal loop.

pub mod analyzer;
pub mod applier;
pub mod committer;
pub mod fixer;
pub mod monitor;
