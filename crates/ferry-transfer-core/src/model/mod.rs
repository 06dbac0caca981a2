//! Core transfer domain types shared across the workspace.

mod destination;
mod event;
mod notification;
mod outcome;
mod trigger;

pub use destination::{ResolvedDestination, UriKind};
pub use event::{TransferEvent, TransferFailure};
pub use notification::{Notification, NotificationId, NotificationProgress};
pub use outcome::{MessageKind, OneShot, OneShotEvent, ProcessingError};
pub use trigger::{ChatId, NodeId, NodeRef, TransferTrigger};
