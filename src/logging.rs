//! Per-location structured logging.
//!
//! Grounded on `elm/ords/utilities/queued_logging.py`: a single queue-backed
//! sink (`LogListener`) demultiplexes records to per-location files by a
//! `location` tag attached at emit time, with an untagged catch-all going to
//! `main.log`. The original derives the tag from `asyncio.current_task()`'s
//! name; since tokio tasks don't carry an inheritable name the way asyncio's
//! does, the tag is carried explicitly through a
//! [`tokio::task_local!`] that [`spawn_with_location`] propagates into any
//! task it spawns (including nested `tokio::spawn` calls made from within
//! that task's body, since the task-local is still in scope there).

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::span::Attributes;
use tracing::{Event, Id, Subscriber};
use tracing_subscriber::layer::Context as LayerContext;
use tracing_subscriber::Layer;

use crate::service::sanitize_filename;

tokio::task_local! {
    /// The full location name of the pipeline task currently executing, if
    /// any. `None` outside of any per-location scope -- records emitted
    /// there are the "Task-*" catch-all the original routes to `main.log`.
    pub static CURRENT_LOCATION: Option<String>;
}

/// Run `fut` with `location` bound as the task-local for its whole
/// execution, on a new tokio task. Mirrors `asyncio.create_task(..., name=
/// location.full_name())` plus the `LocationFileLog` scope wrapping it.
pub fn spawn_with_location<F>(location: String, fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(CURRENT_LOCATION.scope(Some(location), fut))
}

/// One formatted log line plus the location tag it was emitted under.
struct Record {
    location: Option<String>,
    line: String,
}

/// A `tracing_subscriber` [`Layer`] that renders each event to a single line
/// and forwards it, tagged with the current task-local location, to the
/// listener task over an unbounded channel. Never blocks the emitting task.
pub struct LocationLogLayer {
    sender: mpsc::UnboundedSender<Record>,
}

impl LocationLogLayer {
    fn new(sender: mpsc::UnboundedSender<Record>) -> Self {
        Self { sender }
    }
}

impl<S: Subscriber> Layer<S> for LocationLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format!("{} {} {}", event.metadata().level(), event.metadata().target(), visitor.message);

        let location = CURRENT_LOCATION.try_with(Clone::clone).ok().flatten();
        let _ = self.sender.send(Record { location, line });
    }

    fn on_new_span(&self, _attrs: &Attributes<'_>, _id: &Id, _ctx: LayerContext<'_, S>) {}
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            self.message.push_str(&format!("{}={:?}", field.name(), value));
        }
    }
}

/// Drains the log-record channel on a dedicated task, appending each line
/// to `{log_dir}/{location}.log`, or `{log_dir}/main.log` for untagged
/// records. File handles are opened lazily and kept for the listener's
/// lifetime. Mirrors `LogListener`'s `QueueListener` drain loop plus
/// `NoLocationFilter`'s main-log fallback.
pub struct LogListener {
    log_dir: PathBuf,
    sender: mpsc::UnboundedSender<Record>,
    drain: tokio::task::JoinHandle<()>,
}

impl LogListener {
    /// Start the listener, returning both it (so callers can build a
    /// [`LocationLogLayer`] from its sender) and a guard whose `shutdown`
    /// must be awaited once all per-location tasks have finished, to flush
    /// and close every open file.
    pub fn start(log_dir: impl Into<PathBuf>) -> (Self, LocationLogLayer) {
        let log_dir = log_dir.into();
        let (tx, rx) = mpsc::unbounded_channel::<Record>();
        let drain = tokio::spawn(drain_loop(log_dir.clone(), rx));
        let layer = LocationLogLayer::new(tx.clone());
        (Self { log_dir, sender: tx, drain }, layer)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Close the channel and wait for the drain task to flush every file.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.drain.await;
    }
}

async fn drain_loop(log_dir: PathBuf, mut rx: mpsc::UnboundedReceiver<Record>) {
    let mut files: HashMap<String, tokio::fs::File> = HashMap::new();
    while let Some(record) = rx.recv().await {
        let file_name = match &record.location {
            Some(loc) => format!("{}.log", sanitize_filename(loc)),
            None => "main.log".to_string(),
        };
        let file = match files.get_mut(&file_name) {
            Some(f) => f,
            None => {
                let Ok(f) = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_dir.join(&file_name))
                    .await
                else {
                    continue;
                };
                files.entry(file_name.clone()).or_insert(f)
            }
        };
        let _ = file.write_all(format!("{}\n", record.line).as_bytes()).await;
    }
    for (_, mut file) in files {
        let _ = file.flush().await;
    }
}
