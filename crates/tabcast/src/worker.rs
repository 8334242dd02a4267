use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// A single worker thread that runs posted closures in order.
///
/// Posters are cheap clones of the sending half; the worker itself exits on
/// an explicit shutdown message, so outstanding posters never keep a
/// stopped worker alive.
///
/// # Example
/// ```rust
/// use tabcast::worker::WorkerContext;
///
/// let worker = WorkerContext::spawn("demo").unwrap();
/// let (tx, rx) = std::sync::mpsc::channel();
/// worker.poster().post(move || tx.send(41 + 1).unwrap());
/// assert_eq!(rx.recv().unwrap(), 42);
/// worker.stop();
/// ```
pub struct WorkerContext {
    tx: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerContext {
    /// Spawn a named worker thread.
    pub fn spawn(label: &str) -> io::Result<Self> {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(job) => job(),
                        Job::Shutdown => break,
                    }
                }
            })?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// A cloneable handle for posting work to this thread.
    pub fn poster(&self) -> TaskPoster {
        TaskPoster {
            tx: self.tx.clone(),
        }
    }

    /// Drain pending work, then stop and join the thread.
    pub fn stop(mut self) {
        self.teardown_in_place();
    }

    fn teardown_in_place(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Job::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.teardown_in_place();
    }
}

/// Posting half of a [`WorkerContext`].
#[derive(Clone)]
pub struct TaskPoster {
    tx: Sender<Job>,
}

impl TaskPoster {
    /// Post a closure. Returns false when the worker has shut down; the
    /// closure is dropped in that case, never run.
    pub fn post<F: FnOnce() + Send + 'static>(&self, job: F) -> bool {
        self.tx.send(Job::Run(Box::new(job))).is_ok()
    }
}

/// Fixed-interval timer thread.
///
/// The tick callback runs on the timer thread, so it should do no more than
/// post work elsewhere.
pub struct PollTimer {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PollTimer {
    /// Start ticking every `interval` until stopped.
    pub fn start<F>(interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("tabcast-poll".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    _ => break,
                }
            })?;
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop ticking and join the timer thread.
    pub fn stop(mut self) {
        self.teardown_in_place();
    }

    fn teardown_in_place(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.teardown_in_place();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn jobs_run_in_post_order() {
        let worker = WorkerContext::spawn("order").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            worker.poster().post(move || tx.send(i).unwrap());
        }
        let got: Vec<i32> = (0..5).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(got, [0, 1, 2, 3, 4]);
        worker.stop();
    }

    #[test]
    fn stop_drains_pending_work() {
        let worker = WorkerContext::spawn("drain").unwrap();
        let ran = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let ran = ran.clone();
            worker.poster().post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        worker.stop();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn post_after_stop_reports_failure() {
        let worker = WorkerContext::spawn("gone").unwrap();
        let poster = worker.poster();
        worker.stop();
        assert!(!poster.post(|| {}));
    }

    #[test]
    fn timer_ticks_then_stops() {
        let ticks = Arc::new(AtomicU32::new(0));
        let timer = {
            let ticks = ticks.clone();
            PollTimer::start(Duration::from_millis(5), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        while ticks.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(2));
        }
        timer.stop();
        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }
}
