//! phasegate: a sequential, phase-gated design-control workflow engine.
//!
//! | Module     | Responsibility                                                  |
//! |------------|-----------------------------------------------------------------|
//! | `phase`    | Phase definitions and the validated `PhaseRegistry`             |
//! | `workflow` | Phase instances, the state machine, gate reviews, bottlenecks   |
//! | `trace`    | Traceability artifacts, link graph, coverage matrix             |
//! | `audit`    | Append-only audit entries and digest-sealed exports             |
//! | `store`    | SQLite persistence with atomic per-project commits              |
//! | `service`  | `WorkflowService`, the entry point for every operation          |
//! | `server`   | axum routes, WebSocket event feed, server bootstrap             |
//! | `config`   | `phasegate.toml` layering (file, env, CLI)                      |
//! | `logging`  | `tracing` subscriber setup                                      |
//! | `errors`   | `WorkflowError` taxonomy                                        |

pub mod audit;
pub mod config;
pub mod errors;
pub mod logging;
pub mod phase;
pub mod server;
pub mod service;
pub mod store;
pub mod trace;
pub mod workflow;

pub use errors::{WorkflowError, WorkflowResult};
pub use service::WorkflowService;
