//! Cross-view notifications
//!
//! This module provides:
//! - `ViewEvent`: typed events published after every committed mutation
//! - `ViewNotifier`: broadcast channel distributing events to subscribed views

mod bus;
mod types;

pub use bus::{ViewNotifier, ViewSubscription};
pub use types::{event_name, parse_event_name, CrudAction, EventEmitter, ViewEvent};
