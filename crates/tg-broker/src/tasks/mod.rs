//! Asynchronous task tracking
//!
//! The correlator remembers which connection and owner started each queued
//! task. The listener multiplexes the completion streams of all client
//! sessions and hands each event to the correlator, which turns it into a
//! push notification.

mod correlator;
mod listener;

pub use correlator::{PendingTask, TaskCorrelator};
pub use listener::{CompletionListener, ListenerHandle};
