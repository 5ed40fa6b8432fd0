//! Durable filesystem spool queue.
//!
//! Each pending message is one JSON file under `<root>/<queue>/`, named
//! by its visibility time so a directory scan yields due entries in
//! order. Consumers claim an entry by renaming it into the queue's
//! `claimed/` subdirectory, which also arbitrates between concurrent
//! pollers; the file is deleted once the handler returns. Entries left
//! in `claimed/` by a crash are moved back on the next subscribe.
//!
//! Durability is exactly the filesystem's: the spool survives broker
//! restart, nothing else is persisted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use super::{EnqueueOptions, MessageQueue, QueueError, QueueHandler, Result};
use crate::message::Message;

/// How often the poller rescans a queue directory for due entries.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Subdirectory holding entries claimed by a consumer.
const CLAIMED_DIR: &str = "claimed";

/// On-disk record: the message plus the instant it becomes visible.
#[derive(Debug, Serialize, Deserialize)]
struct SpoolEntry {
    visible_at: DateTime<Utc>,
    message: Message,
}

/// Filesystem-backed queue rooted at the broker spool path.
pub struct SpoolQueue {
    root: PathBuf,
}

impl SpoolQueue {
    /// Open (creating if necessary) a spool at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            QueueError::Backend(format!("cannot create spool at {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    fn queue_dir(&self, queue: &str) -> PathBuf {
        self.root.join(queue)
    }
}

fn entry_file_name(visible_at: DateTime<Utc>, message: &Message) -> String {
    format!("{:020}-{}.json", visible_at.timestamp_millis(), message.id)
}

/// Visibility time encoded in an entry's file name, if well-formed.
fn visible_at_millis(file_name: &str) -> Option<i64> {
    file_name.split_once('-')?.0.parse().ok()
}

/// Move entries stranded in `claimed/` by a crash back into the pending
/// directory.
async fn recover_claimed(dir: &Path, claimed: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(claimed).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".json") {
            warn!(entry = %name.to_string_lossy(), "Recovering claimed spool entry");
            if let Err(e) = tokio::fs::rename(entry.path(), dir.join(&name)).await {
                error!(error = %e, "Failed to recover claimed spool entry");
            }
        }
    }
}

/// Scan a queue directory and claim every due entry into `claimed/`,
/// handing claimed paths to the workers. Returns `false` once the
/// worker channel is gone.
async fn claim_due_entries(dir: &Path, claimed: &Path, tx: &mpsc::Sender<PathBuf>) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return true;
    };

    let now = Utc::now().timestamp_millis();
    let mut due: Vec<(i64, PathBuf)> = Vec::new();

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.ends_with(".json") {
            continue;
        }
        if let Some(millis) = visible_at_millis(&name) {
            if millis <= now {
                due.push((millis, entry.path()));
            }
        }
    }

    due.sort();

    for (_, path) in due {
        let file_name = match path.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let claimed_path = claimed.join(&file_name);
        // A lost rename race means another consumer claimed it first.
        if tokio::fs::rename(&path, &claimed_path).await.is_ok()
            && tx.send(claimed_path).await.is_err()
        {
            return false;
        }
    }

    true
}

async fn run_worker(
    queue: String,
    rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    handler: Arc<dyn QueueHandler>,
) {
    loop {
        let path = { rx.lock().await.recv().await };
        let Some(path) = path else { break };

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<SpoolEntry>(&bytes) {
                Ok(entry) => {
                    if let Err(e) = handler.handle(entry.message).await {
                        error!(queue = %queue, error = %e, "Queue handler failed");
                    }
                }
                Err(e) => {
                    warn!(queue = %queue, path = %path.display(), error = %e,
                        "Discarding unreadable spool entry");
                }
            },
            Err(e) => {
                error!(queue = %queue, path = %path.display(), error = %e,
                    "Failed to read claimed spool entry");
            }
        }

        if let Err(e) = tokio::fs::remove_file(&path).await {
            error!(queue = %queue, path = %path.display(), error = %e,
                "Failed to remove spool entry");
        }
    }
}

#[async_trait]
impl MessageQueue for SpoolQueue {
    async fn enqueue(&self, queue: &str, message: Message, options: EnqueueOptions) -> Result<()> {
        let dir = self.queue_dir(queue);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| QueueError::Enqueue {
            queue: queue.to_string(),
            message: e.to_string(),
        })?;

        let delay = options
            .delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        let visible_at = Utc::now() + delay;

        let name = entry_file_name(visible_at, &message);
        let id = message.id;
        let entry = SpoolEntry {
            visible_at,
            message,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| QueueError::Enqueue {
            queue: queue.to_string(),
            message: e.to_string(),
        })?;

        // Write-then-rename so a scan never observes a partial entry.
        let tmp = dir.join(format!("{}.tmp", name));
        let path = dir.join(&name);
        let io_err = |e: std::io::Error| QueueError::Enqueue {
            queue: queue.to_string(),
            message: e.to_string(),
        };
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        debug!(queue = %queue, id = %id, visible_at = %visible_at, "Spooled message");
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn QueueHandler>,
        parallelism: usize,
    ) -> Result<()> {
        let dir = self.queue_dir(queue);
        let claimed = dir.join(CLAIMED_DIR);
        tokio::fs::create_dir_all(&claimed)
            .await
            .map_err(|e| QueueError::Subscribe {
                queue: queue.to_string(),
                message: e.to_string(),
            })?;

        recover_claimed(&dir, &claimed).await;

        let (tx, rx) = mpsc::channel(parallelism.max(1) * 2);
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..parallelism.max(1) {
            tokio::spawn(run_worker(
                queue.to_string(),
                Arc::clone(&rx),
                Arc::clone(&handler),
            ));
        }

        tokio::spawn(async move {
            loop {
                if !claim_due_entries(&dir, &claimed, &tx).await {
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });

        Ok(())
    }
}
