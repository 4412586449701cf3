//! Outer surfaces that feed events to the [`Updater`](crate::updater::Updater).

pub mod http;
pub mod queue;

pub use queue::{
    ConsumerSettings, MessageQueue, QueueConsumer, QueueError, QueueMessage, SpoolQueue,
    DEFAULT_RELEASE_BACKOFF,
};
