//! Structured session event stream.
//!
//! Discrete, typed lifecycle events serialized as newline-delimited JSON
//! (JSONL), each carrying a monotonically increasing sequence number so a
//! consumer can order events across sessions.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted while the runtime serves sessions.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The server is listening.
    ServerStarted {
        /// When the server started.
        timestamp: DateTime<Utc>,
        /// Bound address.
        bind: String,
        /// Missions loaded at startup.
        missions: usize,
    },

    /// The server has stopped.
    ServerStopped {
        /// When the server stopped.
        timestamp: DateTime<Utc>,
        /// Human-readable stop reason.
        reason: String,
    },

    /// A session was launched from a mission.
    SessionLaunched {
        /// When the session was created.
        timestamp: DateTime<Utc>,
        /// Session id.
        session_id: String,
        /// Mission name.
        mission: String,
        /// User who launched it.
        owner_id: String,
    },

    /// A session moved to a new state.
    SessionStateChanged {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Session id.
        session_id: String,
        /// State before the transition.
        from: String,
        /// State after the transition.
        to: String,
    },

    /// A session was destroyed and removed from the registry.
    SessionDestroyed {
        /// When the session was destroyed.
        timestamp: DateTime<Utc>,
        /// Session id.
        session_id: String,
    },

    /// An execution finished or was aborted.
    ExecutionCompleted {
        /// When the outcome was realized.
        timestamp: DateTime<Utc>,
        /// Session id.
        session_id: String,
        /// Node the action ran on.
        node_id: String,
        /// Action that ran.
        action_id: String,
        /// Whether it succeeded.
        successful: bool,
        /// Whether it was aborted.
        aborted: bool,
    },

    /// An effect failed and was skipped.
    EffectFailed {
        /// When the failure was logged.
        timestamp: DateTime<Utc>,
        /// Session id.
        session_id: String,
        /// Trigger that fired the batch.
        trigger: String,
        /// Number of failed effects in the batch.
        count: usize,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// writes one JSON line and flushes. Serialization and I/O failures are
/// dropped.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards every event.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    /// In-memory writer for capturing emitter output in tests.
    #[derive(Clone)]
    pub(crate) struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        pub(crate) fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        pub(crate) fn lines(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn state_change() -> Event {
        Event::SessionStateChanged {
            timestamp: DateTime::parse_from_rfc3339("2025-02-04T10:15:30Z")
                .unwrap()
                .with_timezone(&Utc),
            session_id: "s1".to_owned(),
            from: "unstarted".to_owned(),
            to: "starting".to_owned(),
        }
    }

    #[test]
    fn emitter_writes_valid_jsonl() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(state_change());

        let lines = tw.lines();
        assert_eq!(lines[0]["type"], "SessionStateChanged");
        assert_eq!(lines[0]["session_id"], "s1");
        assert_eq!(lines[0]["to"], "starting");
        assert_eq!(lines[0]["sequence"], 0);
        assert!(lines[0].get("event").is_none());
    }

    #[test]
    fn emitter_increments_sequence() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(state_change());
        emitter.emit(Event::SessionDestroyed {
            timestamp: Utc::now(),
            session_id: "s1".to_owned(),
        });

        assert_eq!(emitter.event_count(), 2);
        let lines = tw.lines();
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["type"], "SessionDestroyed");
    }

    #[test]
    fn execution_event_carries_result() {
        let json = serde_json::to_value(Event::ExecutionCompleted {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            node_id: "n1".into(),
            action_id: "a1".into(),
            successful: false,
            aborted: true,
        })
        .unwrap();
        assert_eq!(json["type"], "ExecutionCompleted");
        assert_eq!(json["aborted"], true);
    }
}
