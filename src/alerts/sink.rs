use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::speaker::Speaker;
use super::{AlertError, AlertEvent};

#[derive(Debug, Default)]
struct SinkCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of the speech queue. `enqueue` never blocks.
#[derive(Clone, Debug)]
pub struct AlertSink {
    tx: Option<mpsc::Sender<String>>,
    counters: Arc<SinkCounters>,
}

impl AlertSink {
    /// A sink that accepts nothing; used when alerts are turned off.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            counters: Arc::default(),
        }
    }

    pub fn alert(&self, event: &AlertEvent) -> bool {
        self.enqueue(event.phrase())
    }

    /// Queues a phrase. A full or closed queue drops it.
    pub fn enqueue(&self, phrase: impl Into<String>) -> bool {
        let phrase = phrase.into();
        let Some(tx) = self.tx.as_ref() else {
            debug!("Alerts disabled, not speaking: {}", phrase);
            return false;
        };

        match tx.try_send(phrase) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(phrase)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Alert queue full, dropping: {}", phrase);
                false
            }
            Err(mpsc::error::TrySendError::Closed(phrase)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Speech worker gone, dropping: {}", phrase);
                false
            }
        }
    }

    pub fn enqueued(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Dedicated thread draining the queue into a [`Speaker`].
pub struct SpeechWorker {
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SpeechWorker {
    pub fn spawn(mut speaker: Box<dyn Speaker>, capacity: usize) -> Result<(AlertSink, Self), AlertError> {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = stopping.clone();

        let thread = std::thread::Builder::new()
            .name("speech".into())
            .spawn(move || {
                info!("Speech worker started");
                while let Some(phrase) = rx.blocking_recv() {
                    if stop_flag.load(Ordering::Acquire) {
                        debug!("Discarding queued phrase during shutdown: {}", phrase);
                        continue;
                    }
                    if let Err(e) = speaker.speak(&phrase) {
                        error!("Speech failed: {}", e);
                    }
                }
                info!("Speech worker stopped");
            })
            .map_err(AlertError::Thread)?;

        let sink = AlertSink {
            tx: Some(tx),
            counters: Arc::default(),
        };
        Ok((
            sink,
            Self {
                stopping,
                thread: Some(thread),
            },
        ))
    }

    /// Skips whatever is still queued. The thread exits once every sink is dropped.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Waits for the thread. Only returns once all sinks are gone and every queued
    /// phrase has been spoken, unless [`SpeechWorker::stop`] was called first.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Speech worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Speaker for Recording {
        fn speak(&mut self, phrase: &str) -> Result<(), AlertError> {
            self.0.lock().unwrap().push(phrase.to_string());
            Ok(())
        }
    }

    /// Reports each phrase it starts and then blocks until released.
    struct Blocking {
        started: std_mpsc::Sender<String>,
        release: std_mpsc::Receiver<()>,
    }

    impl Speaker for Blocking {
        fn speak(&mut self, phrase: &str) -> Result<(), AlertError> {
            let _ = self.started.send(phrase.to_string());
            let _ = self.release.recv();
            Ok(())
        }
    }

    #[test]
    fn phrases_reach_the_speaker_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let (sink, worker) = SpeechWorker::spawn(Box::new(Recording(spoken.clone())), 8)?;

        assert!(sink.alert(&AlertEvent::ClutchNoise));
        assert!(sink.alert(&AlertEvent::GasDrift { percent_reached: 82 }));
        drop(sink);
        worker.join();

        let spoken = spoken.lock().unwrap();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[1], AlertEvent::GasDrift { percent_reached: 82 }.phrase());
        Ok(())
    }

    #[test]
    fn saturated_queue_drops_instead_of_blocking() -> Result<(), Box<dyn std::error::Error>> {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let (sink, worker) = SpeechWorker::spawn(
            Box::new(Blocking {
                started: started_tx,
                release: release_rx,
            }),
            1,
        )?;

        assert!(sink.enqueue("one"));
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5))?, "one");
        assert!(sink.enqueue("two"));
        assert!(!sink.enqueue("three"));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(sink.enqueued(), 2);

        drop(sink);
        release_tx.send(())?;
        release_tx.send(())?;
        worker.join();
        Ok(())
    }

    #[test]
    fn join_speaks_what_is_still_queued() -> Result<(), Box<dyn std::error::Error>> {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let (sink, worker) = SpeechWorker::spawn(
            Box::new(Blocking {
                started: started_tx,
                release: release_rx,
            }),
            4,
        )?;

        assert!(sink.enqueue("first"));
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5))?, "first");
        assert!(sink.enqueue("last"));
        drop(sink);

        release_tx.send(())?;
        release_tx.send(())?;
        worker.join();
        assert_eq!(started_rx.try_recv()?, "last");
        Ok(())
    }

    #[test]
    fn disabled_sink_accepts_nothing() {
        let sink = AlertSink::disabled();
        assert!(!sink.enqueue("anything"));
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn stopped_worker_discards_queued_phrases() -> Result<(), Box<dyn std::error::Error>> {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let (sink, worker) = SpeechWorker::spawn(Box::new(Recording(spoken.clone())), 4)?;

        worker.stop();
        assert!(sink.enqueue("late"));
        drop(sink);
        worker.join();

        assert!(spoken.lock().unwrap().is_empty());
        Ok(())
    }
}
