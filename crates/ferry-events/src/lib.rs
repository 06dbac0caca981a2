#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused_must_use)]

//! Event bus and shared payloads for the transfer orchestration layer.
//!
//! Layout: `payloads.rs` (event enum and classification types), `totals.rs`
//! (the aggregate totals carried by progress events), `routing.rs` (the
//! broadcast bus with a replay ring).

pub mod payloads;
pub mod routing;
pub mod totals;

pub use payloads::{
    DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, JobInProgressState, RunOutcome,
    SupervisorPhase, TransferClass, TriggerKind, WorkerResult,
};
pub use routing::{EventBus, EventStream};
pub use totals::{ActiveTransferTotals, SlotState, SpeedSample, TransferSlot, TransferTag};
