//! Command-line interface for xgotop

pub mod args;

pub use args::Args;
