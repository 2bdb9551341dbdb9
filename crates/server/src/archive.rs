//! Concluded-game archive.
//!
//! Keeps the records of the most recently concluded games in memory, up to
//! a fixed capacity; the oldest record is evicted first. When a directory
//! is configured, every record is also exported as a protobuf file. Exports
//! run on the blocking pool so a session actor never waits on disk.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use gambit_replay::{record_path, write_record};
use gambit_wire::GameRecordProto;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::SessionId;

#[derive(Debug, Clone)]
pub struct Archive {
    inner: Arc<Mutex<Records>>,
    capacity: usize,
    dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Records {
    by_session: HashMap<SessionId, GameRecordProto>,
    /// Oldest first. Holds each stored session id exactly once.
    order: VecDeque<SessionId>,
}

impl Archive {
    /// An archive holding at most `capacity` records (at least one).
    pub fn new(capacity: usize, dir: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::default(),
            capacity: capacity.max(1),
            dir,
        }
    }

    /// Store `record`, replacing any earlier record of the same session.
    pub fn store(&self, record: GameRecordProto) {
        info!(
            session_id = %record.session_id,
            end_reason = %record.end_reason,
            moves = record.moves.len(),
            "game archived"
        );

        if let Some(dir) = &self.dir {
            let path = record_path(dir, &record);
            let export = record.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = write_record(&export, &path) {
                    warn!(path = %path.display(), error = %e, "game record export failed");
                }
            });
        }

        let mut records = self.inner.lock();
        let session_id = record.session_id.clone();
        if records.by_session.insert(session_id.clone(), record).is_some() {
            records.order.retain(|id| *id != session_id);
        }
        records.order.push_back(session_id);

        while records.order.len() > self.capacity {
            if let Some(oldest) = records.order.pop_front() {
                records.by_session.remove(&oldest);
                debug!(session_id = %oldest, "archived record evicted");
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<GameRecordProto> {
        self.inner.lock().by_session.get(session_id).cloned()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
