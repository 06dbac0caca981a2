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

//! Engine-agnostic transfer interfaces, triggers and the totals aggregator.
//!
//! Layout: `model/` (triggers, destinations, engine events, one-shot UI
//! events), `aggregate.rs` (pure fold of engine events into totals),
//! `service/` (collaborator traits), `error.rs` (transfer error taxonomy).

pub mod aggregate;
pub mod error;
pub mod model;
pub mod service;

pub use aggregate::{SPEED_WINDOW_MS, fold, fold_all};
pub use error::{TransferError, TransferResult};
pub use model::{
    ChatId, MessageKind, NodeId, NodeRef, Notification, NotificationId, NotificationProgress,
    OneShot, OneShotEvent, ProcessingError, ResolvedDestination, TransferEvent, TransferFailure,
    TransferTrigger, UriKind,
};
pub use service::{
    ConnectivityOracle, DestinationPicker, NotificationBuilder, NotificationPoster,
    PreferenceStore, QuotaOracle, RatingPolicy, SizeCalculator, TransferEngine,
    TransferEventStream,
};
