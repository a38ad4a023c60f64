//! Wavefront runs a set of interdependent tasks as dependency-ordered waves.
//!
//! Tasks within a wave run concurrently on their agents unless their
//! resource footprints overlap, in which case they are serialized (or
//! merged onto one agent). Checkpoints between waves can stop the plan.
//!
//! The usual entry point is [`PlanCoordinator::execute`]:
//!
//! ```no_run
//! use wavefront::agent::{Agent, AgentRegistry, AgentResponse};
//! use wavefront::core::Task;
//! use wavefront::{CoordinatorConfig, PlanCoordinator};
//!
//! # async fn demo() -> wavefront::Result<()> {
//! let agents = AgentRegistry::new()
//!     .with("coder", Agent::callback(|_| async { AgentResponse::success("done") }));
//! let tasks = vec![
//!     Task::new("schema", "coder").with_footprint(["db/schema.sql"]),
//!     Task::new("api", "coder").depends_on(["schema"]),
//! ];
//!
//! let mut coordinator = PlanCoordinator::new(CoordinatorConfig::default(), agents);
//! let report = coordinator.execute(tasks, &[]).await?;
//! report.ensure_success()?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod plan;
pub mod util;

pub use error::{Error, Result};
pub use orchestration::{CoordinatorConfig, PlanCoordinator, PlanExecutionResult, PlanState};
