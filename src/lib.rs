//! Shipwright: execution plan builder and remote script deployer.
//!
//! Compiles declarative deployment templates into self-contained execution
//! plans, then carries a plan to an already-reachable host over SSH with
//! bounded retries.

pub mod cli;
pub mod core;
pub mod provenance;
pub mod transport;
