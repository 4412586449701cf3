//! Queue consumption with acknowledge / redeliver / dead-letter handling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::event::PushEvent;
use crate::routing::RuleSet;
use crate::updater::{Disposition, Updater};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue I/O on '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode dead-letter envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A leased message.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub body: Vec<u8>,
    /// How many times this message has been received, including this one.
    pub receive_count: u32,
}

/// A queue with lease semantics: received messages are invisible to other
/// receivers until acked, released, or dead-lettered.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Deletes the message.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Makes the message visible again for redelivery, possibly after a
    /// backoff.
    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Moves the message aside for operators.
    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError>;
}

const INBOX_DIR: &str = "inbox";
const PROCESSING_DIR: &str = "processing";
const DEAD_DIR: &str = "dead";
const MESSAGE_EXT: &str = "json";

/// Default delay before a released message is received again.
pub const DEFAULT_RELEASE_BACKOFF: Duration = Duration::from_secs(30);
const MAX_RELEASE_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Delay after the `receive_count`th failed receive: doubles per receive,
/// capped at 15 minutes.
fn release_delay(base: Duration, receive_count: u32) -> Duration {
    let exponent = receive_count.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(MAX_RELEASE_BACKOFF)
}

/// In-memory delivery state of one message.
#[derive(Debug, Default)]
struct Delivery {
    receive_count: u32,
    /// Released messages are skipped by `receive` until this instant.
    visible_at: Option<Instant>,
}

/// Dead-lettered message as written to `dead/`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterEnvelope<'a> {
    id: &'a str,
    failed_at: DateTime<Utc>,
    reason: &'a str,
    receive_count: u32,
    body: String,
}

/// Directory-backed queue.
///
/// Messages are `*.json` files in `inbox/`. Receiving renames them into
/// `processing/`; ack deletes, release renames back, dead-letter writes an
/// envelope into `dead/`. Receive counts and release backoffs live in memory
/// and restart from zero with the process.
#[derive(Debug)]
pub struct SpoolQueue {
    inbox: PathBuf,
    processing: PathBuf,
    dead: PathBuf,
    release_backoff: Duration,
    deliveries: Mutex<HashMap<String, Delivery>>,
}

impl SpoolQueue {
    /// Opens the spool at `root`, creating its directories and returning any
    /// messages left in `processing/` by a previous run to the inbox.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, QueueError> {
        let root = root.as_ref();
        let queue = Self {
            inbox: root.join(INBOX_DIR),
            processing: root.join(PROCESSING_DIR),
            dead: root.join(DEAD_DIR),
            release_backoff: DEFAULT_RELEASE_BACKOFF,
            deliveries: Mutex::new(HashMap::new()),
        };

        for dir in [&queue.inbox, &queue.processing, &queue.dead] {
            tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        }

        let recovered = queue.recover().await?;
        if recovered > 0 {
            info!("Recovered {} in-flight messages from a previous run", recovered);
        }
        Ok(queue)
    }

    /// Base delay before a released message becomes visible again. Zero
    /// redelivers on the next receive.
    pub fn with_release_backoff(mut self, backoff: Duration) -> Self {
        self.release_backoff = backoff;
        self
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn dead_letter_dir(&self) -> &Path {
        &self.dead
    }

    /// Writes a new message into the inbox and returns its id.
    pub async fn enqueue(&self, body: &[u8]) -> Result<String, QueueError> {
        let id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            uuid::Uuid::new_v4()
        );
        let file_name = format!("{}.{}", id, MESSAGE_EXT);
        let staging = self.processing.join(format!(".{}.tmp", file_name));
        tokio::fs::write(&staging, body).await.map_err(io_err(&staging))?;

        let target = self.inbox.join(&file_name);
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(io_err(&target))?;
        Ok(id)
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let mut recovered = 0;
        for name in list_messages(&self.processing).await? {
            let from = self.processing.join(&name);
            let to = self.inbox.join(&name);
            tokio::fs::rename(&from, &to).await.map_err(io_err(&from))?;
            recovered += 1;
        }
        Ok(recovered)
    }

    fn file_name(id: &str) -> String {
        format!("{}.{}", id, MESSAGE_EXT)
    }

    fn deliveries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Delivery>> {
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_delayed(&self, id: &str, now: Instant) -> bool {
        self.deliveries()
            .get(id)
            .and_then(|delivery| delivery.visible_at)
            .is_some_and(|visible_at| visible_at > now)
    }

    fn bump_receive_count(&self, id: &str) -> u32 {
        let mut deliveries = self.deliveries();
        let delivery = deliveries.entry(id.to_string()).or_default();
        delivery.receive_count += 1;
        delivery.visible_at = None;
        delivery.receive_count
    }

    fn delay(&self, id: &str, receive_count: u32) -> Duration {
        let delay = release_delay(self.release_backoff, receive_count);
        if !delay.is_zero() {
            self.deliveries()
                .entry(id.to_string())
                .or_default()
                .visible_at = Some(Instant::now() + delay);
        }
        delay
    }

    fn forget(&self, id: &str) {
        self.deliveries().remove(id);
    }

    fn message_id(name: &str) -> &str {
        name.strip_suffix(&format!(".{}", MESSAGE_EXT))
            .unwrap_or(name)
    }
}

/// Message file names in `dir`, oldest name first.
async fn list_messages(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err(dir))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err(dir))? {
        let path = entry.path();
        let is_message = path.extension().and_then(|e| e.to_str()) == Some(MESSAGE_EXT);
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if is_message && !hidden {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl MessageQueue for SpoolQueue {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut messages = Vec::new();
        if max == 0 {
            return Ok(messages);
        }

        let now = Instant::now();
        for name in list_messages(&self.inbox).await? {
            if self.is_delayed(Self::message_id(&name), now) {
                continue;
            }

            let from = self.inbox.join(&name);
            let to = self.processing.join(&name);
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {}
                // Leased by another receiver in the meantime.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&from)(e)),
            }

            let body = tokio::fs::read(&to).await.map_err(io_err(&to))?;
            let id = Self::message_id(&name).to_string();
            let receive_count = self.bump_receive_count(&id);
            messages.push(QueueMessage {
                id,
                body,
                receive_count,
            });

            if messages.len() >= max {
                break;
            }
        }
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let path = self.processing.join(Self::file_name(&message.id));
        tokio::fs::remove_file(&path).await.map_err(io_err(&path))?;
        self.forget(&message.id);
        Ok(())
    }

    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let name = Self::file_name(&message.id);
        let from = self.processing.join(&name);
        let to = self.inbox.join(&name);
        let delay = self.delay(&message.id, message.receive_count);
        tokio::fs::rename(&from, &to).await.map_err(io_err(&from))?;
        debug!(
            "Released message {} for redelivery in {:?}",
            message.id, delay
        );
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        let envelope = DeadLetterEnvelope {
            id: &message.id,
            failed_at: Utc::now(),
            reason,
            receive_count: message.receive_count,
            body: String::from_utf8_lossy(&message.body).into_owned(),
        };
        let encoded = serde_json::to_vec_pretty(&envelope)?;

        let name = Self::file_name(&message.id);
        let target = self.dead.join(&name);
        tokio::fs::write(&target, encoded)
            .await
            .map_err(io_err(&target))?;

        let leased = self.processing.join(&name);
        tokio::fs::remove_file(&leased)
            .await
            .map_err(io_err(&leased))?;
        self.forget(&message.id);
        Ok(())
    }
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub poll_interval: Duration,
    pub max_concurrent_updates: usize,
    /// Transient failures are dead-lettered once a message has been received
    /// this many times.
    pub max_receive_count: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_concurrent_updates: 8,
            max_receive_count: 5,
        }
    }
}

/// Polls a queue and applies each message as a push event.
pub struct QueueConsumer<Q> {
    queue: Arc<Q>,
    updater: Arc<Updater>,
    rules: Arc<RuleSet>,
    settings: ConsumerSettings,
    permits: Arc<Semaphore>,
}

impl<Q: MessageQueue + 'static> QueueConsumer<Q> {
    pub fn new(
        queue: Arc<Q>,
        updater: Arc<Updater>,
        rules: Arc<RuleSet>,
        settings: ConsumerSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_updates.max(1)));
        Self {
            queue,
            updater,
            rules,
            settings,
            permits,
        }
    }

    /// Polls until `shutdown` fires, then aborts in-flight updates.
    ///
    /// Aborted messages stay leased; [`SpoolQueue::open`] returns them to the
    /// inbox on the next start.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tasks = JoinSet::new();
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            while let Some(result) = tasks.try_join_next() {
                log_join_error(result);
            }

            if let Err(e) = self.dispatch(&mut tasks).await {
                error!("Failed to receive messages: {}", e);
            }
        }

        if !tasks.is_empty() {
            warn!("Shutting down with {} updates in flight", tasks.len());
        }
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!("Queue consumer stopped");
    }

    /// Receives one batch, processes it, and waits for every message in it.
    /// Returns the number of messages handled.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let mut tasks = JoinSet::new();
        let dispatched = self.dispatch(&mut tasks).await?;
        while let Some(result) = tasks.join_next().await {
            log_join_error(result);
        }
        Ok(dispatched)
    }

    /// Receives as many messages as there are free permits and spawns one
    /// task per message.
    async fn dispatch(&self, tasks: &mut JoinSet<()>) -> Result<usize, QueueError> {
        let free = self.permits.available_permits();
        if free == 0 {
            debug!("All update slots busy, skipping poll");
            return Ok(0);
        }

        let messages = self.queue.receive(free).await?;
        let count = messages.len();
        for message in messages {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let queue = Arc::clone(&self.queue);
            let updater = Arc::clone(&self.updater);
            let rules = Arc::clone(&self.rules);
            let max_receive_count = self.settings.max_receive_count;

            tasks.spawn(async move {
                handle_message(queue.as_ref(), &updater, &rules, message, max_receive_count).await;
                drop(permit);
            });
        }
        Ok(count)
    }
}

/// Applies one message and settles it with the queue.
pub async fn handle_message<Q: MessageQueue + ?Sized>(
    queue: &Q,
    updater: &Updater,
    rules: &RuleSet,
    message: QueueMessage,
    max_receive_count: u32,
) {
    let event = match PushEvent::from_json(&message.body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Message {} is not a valid event: {}", message.id, e);
            settle(queue.dead_letter(&message, &format!("malformed event: {}", e)).await, &message);
            return;
        }
    };

    let outcome = updater.apply(rules, &event).await;
    let result = match outcome.disposition() {
        Disposition::Ack => queue.ack(&message).await,
        Disposition::DeadLetter => {
            let reason = outcome.report().error.unwrap_or_else(|| outcome.kind().to_string());
            queue.dead_letter(&message, &reason).await
        }
        Disposition::Retry if message.receive_count >= max_receive_count => {
            let reason = format!(
                "giving up after {} receives: {}",
                message.receive_count,
                outcome.report().error.unwrap_or_default()
            );
            warn!("Message {} {}", message.id, reason);
            queue.dead_letter(&message, &reason).await
        }
        Disposition::Retry => queue.release(&message).await,
    };
    settle(result, &message);
}

fn settle(result: Result<(), QueueError>, message: &QueueMessage) {
    if let Err(e) = result {
        error!("Failed to settle message {}: {}", message.id, e);
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Update task panicked: {}", e);
        }
    }
}
