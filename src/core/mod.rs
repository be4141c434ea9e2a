//! Core deployment logic: types, compilation, argument extraction, execution.

pub mod args;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod files;
pub mod resolver;
pub mod types;
