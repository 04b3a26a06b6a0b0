//! Alert delivery: per-kind senders and the fan-out dispatcher.

pub mod dispatcher;
pub mod senders;

pub use dispatcher::NotificationDispatcher;
pub use senders::{ChannelNotifier, Notifier, SenderError};
