//! Integration test suite for wavefront.
//!
//! These tests drive whole plans through the coordinator and check the
//! report, the event stream and what the agents actually observed.
//!
//! # Test Categories
//!
//! - `scenarios`: Canonical end-to-end plans (independent, dependent,
//!   conflicting, blocked, timed out)
//! - `concurrency`: Ceiling, conflict serialization, merges, events, abort
//! - `checkpoints`: Gating between waves
//! - `plan_files`: TOML plans with command agents and command gates
//!
//! # CI Compatibility
//!
//! Most tests use scripted callback agents on tokio's paused clock, so they
//! neither sleep for real nor spawn processes. `plan_files` spawns `sh`.


mod checkpoints;
mod concurrency;
mod plan_files;
