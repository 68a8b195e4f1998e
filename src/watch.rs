//! Debounced, single-flight rescans driven by change notifications.
//!
//! The coordinator is transport-agnostic: it consumes paths from an mpsc
//! channel (the CLI feeds it from `notify`) and runs a blocking scan closure
//! on tokio's blocking pool. Changes that arrive while a scan is running are
//! folded into exactly one follow-up scan.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    /// A scan is starting; `changes` are the paths that triggered it (empty for the initial scan).
    Start { changes: Vec<PathBuf> },
    Change(PathBuf),
    Complete(T),
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub debounce: Duration,
    /// Scan once immediately, before any change arrives.
    pub initial_scan: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            debounce: DEFAULT_DEBOUNCE,
            initial_scan: false,
        }
    }
}

/// Receiving end of a watch. Dropping it cancels the coordinator.
pub struct Subscription<T> {
    events: mpsc::Receiver<WatchEvent<T>>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    /// Next event in emission order; `None` once the coordinator has stopped.
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        self.events.recv().await
    }

    /// Stop watching. A pending debounced scan is dropped; a running scan finishes.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Cancel and wait for the coordinator to exit.
    pub async fn shutdown(mut self) {
        self.cancel();
        // Keep draining so a coordinator blocked on a full buffer can finish.
        let Some(task) = self.task.take() else { return };
        let mut events = self.events;
        let drain = async move { while events.recv().await.is_some() {} };
        let _ = tokio::join!(task, drain);
    }
}

/// Start a coordinator task. Must be called inside a tokio runtime.
pub fn spawn<T, E, F>(changes: mpsc::Receiver<PathBuf>, opts: WatchOptions, scan: F) -> Subscription<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(coordinate(changes, opts, Arc::new(scan), event_tx, cancel_rx));
    Subscription {
        events: event_rx,
        cancel: Some(cancel_tx),
        task: Some(task),
    }
}

async fn coordinate<T, E, F>(
    mut changes: mpsc::Receiver<PathBuf>,
    opts: WatchOptions,
    scan: Arc<F>,
    events: mpsc::Sender<WatchEvent<T>>,
    mut cancel: oneshot::Receiver<()>,
) where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    let mut pending: Vec<PathBuf> = Vec::new();
    let mut closed = false;

    if opts.initial_scan && !run_scan(&scan, &events, Vec::new()).await {
        return;
    }

    loop {
        if pending.is_empty() {
            tokio::select! {
                _ = &mut cancel => return,
                change = changes.recv() => match change {
                    Some(path) => {
                        if !record(&events, &mut pending, path).await {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }

        // Quiet period restarts on every change.
        while !closed {
            tokio::select! {
                _ = &mut cancel => return,
                _ = tokio::time::sleep(opts.debounce) => break,
                change = changes.recv() => match change {
                    Some(path) => {
                        if !record(&events, &mut pending, path).await {
                            return;
                        }
                    }
                    None => closed = true,
                },
            }
        }

        let batch = std::mem::take(&mut pending);
        debug!(changes = batch.len(), "rescanning");
        if !run_scan(&scan, &events, batch).await {
            return;
        }

        if !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return;
        }

        // Whatever queued up mid-scan becomes the next batch.
        while let Ok(path) = changes.try_recv() {
            if !record(&events, &mut pending, path).await {
                return;
            }
        }
        if closed && pending.is_empty() {
            return;
        }
    }
}

/// Queue `path` and announce it. False when the subscriber is gone.
async fn record<T>(events: &mpsc::Sender<WatchEvent<T>>, pending: &mut Vec<PathBuf>, path: PathBuf) -> bool {
    if pending.contains(&path) {
        return true;
    }
    pending.push(path.clone());
    events.send(WatchEvent::Change(path)).await.is_ok()
}

async fn run_scan<T, E, F>(scan: &Arc<F>, events: &mpsc::Sender<WatchEvent<T>>, changes: Vec<PathBuf>) -> bool
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    if events.send(WatchEvent::Start { changes }).await.is_err() {
        return false;
    }
    let job = Arc::clone(scan);
    let event = match tokio::task::spawn_blocking(move || job()).await {
        Ok(Ok(value)) => WatchEvent::Complete(value),
        Ok(Err(e)) => {
            warn!(error = %e, "watch scan failed");
            WatchEvent::Error(e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "watch scan task aborted");
            WatchEvent::Error(format!("scan task failed: {}", e))
        }
    };
    events.send(event).await.is_ok()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn opts(ms: u64) -> WatchOptions {
        WatchOptions {
            debounce: Duration::from_millis(ms),
            initial_scan: false,
        }
    }

    /// Scan closure that counts calls and sleeps `work` per call.
    fn counting(work: Duration) -> (Arc<AtomicUsize>, impl Fn() -> Result<usize, String> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let f = move || {
            std::thread::sleep(work);
            Ok(c.fetch_add(1, Ordering::SeqCst) + 1)
        };
        (count, f)
    }

    async fn until_start(sub: &mut Subscription<usize>) -> Vec<PathBuf> {
        loop {
            match sub.next().await {
                Some(WatchEvent::Start { changes }) => return changes,
                Some(_) => continue,
                None => panic!("coordinator stopped before a scan started"),
            }
        }
    }

    async fn until_complete(sub: &mut Subscription<usize>) -> usize {
        loop {
            match sub.next().await {
                Some(WatchEvent::Complete(n)) => return n,
                Some(WatchEvent::Error(e)) => panic!("scan failed: {e}"),
                Some(_) => continue,
                None => panic!("coordinator stopped before a scan completed"),
            }
        }
    }

    #[tokio::test]
    async fn burst_coalesces_into_one_scan() {
        let (tx, rx) = mpsc::channel(16);
        let (count, scan) = counting(Duration::ZERO);
        let mut sub = spawn(rx, opts(50), scan);

        for name in ["a.html", "b.html", "a.html", "c.html"] {
            tx.send(PathBuf::from(name)).await.unwrap();
        }
        let changes = until_start(&mut sub).await;
        assert_eq!(changes, vec![PathBuf::from("a.html"), PathBuf::from("b.html"), PathBuf::from("c.html")]);
        assert_eq!(until_complete(&mut sub).await, 1);

        drop(tx);
        assert!(sub.next().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changes_during_scan_trigger_one_follow_up() {
        let (tx, rx) = mpsc::channel(16);
        let (count, scan) = counting(Duration::from_millis(200));
        let mut sub = spawn(rx, opts(20), scan);

        tx.send(PathBuf::from("a.html")).await.unwrap();
        until_start(&mut sub).await;
        tx.send(PathBuf::from("b.html")).await.unwrap();
        tx.send(PathBuf::from("c.html")).await.unwrap();
        assert_eq!(until_complete(&mut sub).await, 1);

        let second = until_start(&mut sub).await;
        assert_eq!(second, vec![PathBuf::from("b.html"), PathBuf::from("c.html")]);
        assert_eq!(until_complete(&mut sub).await, 2);

        drop(tx);
        assert!(sub.next().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_drops_pending_scan() {
        let (tx, rx) = mpsc::channel(16);
        let (count, scan) = counting(Duration::ZERO);
        let mut sub = spawn(rx, opts(300), scan);

        tx.send(PathBuf::from("a.html")).await.unwrap();
        assert_eq!(sub.next().await, Some(WatchEvent::Change(PathBuf::from("a.html"))));
        sub.cancel();
        assert!(sub.next().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn running_scan_completes_after_cancel() {
        let (tx, rx) = mpsc::channel(16);
        let (count, scan) = counting(Duration::from_millis(150));
        let mut sub = spawn(rx, opts(10), scan);

        tx.send(PathBuf::from("a.html")).await.unwrap();
        until_start(&mut sub).await;
        sub.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scan_error_is_an_event() {
        let (tx, rx) = mpsc::channel(16);
        let mut sub = spawn(rx, opts(10), || Err::<usize, _>("boom"));

        tx.send(PathBuf::from("a.html")).await.unwrap();
        until_start(&mut sub).await;
        assert_eq!(sub.next().await, Some(WatchEvent::Error("boom".into())));
    }

    #[tokio::test]
    async fn initial_scan_runs_without_changes() {
        let (_tx, rx) = mpsc::channel::<PathBuf>(16);
        let (_, scan) = counting(Duration::ZERO);
        let mut sub = spawn(
            rx,
            WatchOptions {
                initial_scan: true,
                ..opts(10)
            },
            scan,
        );
        assert_eq!(until_start(&mut sub).await, Vec::<PathBuf>::new());
        assert_eq!(until_complete(&mut sub).await, 1);
    }
}
