//! Progress events and cooperative cancellation
//!
//! Emitters never know who is listening. A GUI caller hands in a channel
//! sender and drains it on its own thread; a CLI hands in a closure.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline stage an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Collect,
    Compress,
    Header,
    Assemble,
    Parse,
    Extract,
    Scripts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collect => "collect",
            Stage::Compress => "compress",
            Stage::Header => "header",
            Stage::Assemble => "assemble",
            Stage::Parse => "parse",
            Stage::Extract => "extract",
            Stage::Scripts => "scripts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        stage: Stage,
    },
    /// `current`/`total` are bytes for codec stages and counts for scripts
    Progress {
        stage: Stage,
        current: u64,
        total: u64,
        detail: String,
    },
    Finished {
        stage: Stage,
    },
    Failed {
        stage: Stage,
        error: String,
    },
}

/// Observer for progress events.
///
/// Implementations may be called from a worker thread and must not assume
/// they run on a UI thread.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);

    fn started(&self, stage: Stage) {
        self.emit(ProgressEvent::Started { stage });
    }

    fn progress(&self, stage: Stage, current: u64, total: u64, detail: &str) {
        self.emit(ProgressEvent::Progress {
            stage,
            current,
            total,
            detail: detail.to_string(),
        });
    }

    fn finished(&self, stage: Stage) {
        self.emit(ProgressEvent::Finished { stage });
    }

    fn failed(&self, stage: Stage, error: &dyn fmt::Display) {
        self.emit(ProgressEvent::Failed {
            stage,
            error: error.to_string(),
        });
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for crossbeam_channel::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is watching any more
        let _ = self.send(event);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

/// Cooperative cancellation flag shared between a caller and a worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = move |event: ProgressEvent| seen_clone.lock().unwrap().push(event);

        sink.started(Stage::Compress);
        sink.progress(Stage::Compress, 5, 10, "a.txt");
        sink.finished(Stage::Compress);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            ProgressEvent::Progress {
                stage: Stage::Compress,
                current: 5,
                total: 10,
                detail: "a.txt".to_string(),
            }
        );
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        tx.started(Stage::Extract);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
