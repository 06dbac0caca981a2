#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused_must_use)]
#![allow(clippy::module_name_repetitions)]

//! Ferry application wiring: run supervision, trigger orchestration and the
//! command-line front end.
//!
//! Layout: `supervisor.rs` (per-class runs), `orchestrator.rs` (view-state
//! machine), `resolver.rs` and `guard.rs` (pre-dispatch steps), `host.rs`
//! (terminal collaborators), `bootstrap.rs` (service wiring), `cli.rs`
//! (argument parsing and prompt answering).

/// Application bootstrap and logging setup.
pub mod bootstrap;
/// Command-line front end.
pub mod cli;
/// Application error types.
pub mod error;
/// Large-operation confirmation gate.
pub mod guard;
/// Host-side collaborators for the binary.
pub mod host;
/// Orchestration view-state machine.
pub mod orchestrator;
/// Destination resolution.
pub mod resolver;
/// Transfer run supervision.
pub mod supervisor;

pub use bootstrap::{App, build_app, init_logging};
pub use cli::{Answers, Verdict, drive, run};
pub use error::{AppError, AppResult};
pub use orchestrator::{OrchestratorDeps, TransferOrchestrator};
pub use supervisor::{RunReport, RunTicket, SupervisorDeps, TransferSupervisor};
