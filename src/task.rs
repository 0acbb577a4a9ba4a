use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::cancel::CancellationToken;
use crate::errors::{AssetError, Result};

/// Handle to a pass running on its own thread. The event channel disconnects once it returns.
pub struct WorkerTask<E, T> {
    events: Receiver<E>,
    token: CancellationToken,
    handle: JoinHandle<Result<T>>,
}

impl<E, T> WorkerTask<E, T>
where
    E: Send + 'static,
    T: Send + 'static,
{
    pub fn spawn<F>(name: &str, work: F) -> Result<Self>
    where
        F: FnOnce(&CancellationToken, &Sender<E>) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(&worker_token, &tx))
            .map_err(|e| AssetError::Worker(format!("failed to start {}: {}", name, e)))?;
        Ok(Self {
            events: rx,
            token,
            handle,
        })
    }

    pub fn events(&self) -> &Receiver<E> {
        &self.events
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the worker returns its result.
    pub fn wait(self) -> Result<T> {
        self.handle
            .join()
            .map_err(|_| AssetError::Worker("worker thread panicked".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_and_result() {
        let task = WorkerTask::spawn("test-worker", |_, events: &Sender<u32>| {
            for i in 0..3 {
                events.send(i).unwrap();
            }
            Ok("done")
        })
        .unwrap();
        let events = task.events().clone();
        assert_eq!(task.wait().unwrap(), "done");
        assert_eq!(events.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_cancel_reaches_worker() {
        let (started_tx, started_rx) = channel::bounded::<()>(0);
        let task = WorkerTask::spawn("test-worker", move |token, _: &Sender<()>| {
            started_tx.send(()).unwrap();
            while !token.is_cancelled() {
                thread::yield_now();
            }
            Ok(true)
        })
        .unwrap();
        started_rx.recv().unwrap();
        task.cancel();
        assert!(task.token().is_cancelled());
        assert!(task.wait().unwrap());
    }

    #[test]
    fn test_error_passes_through() {
        let task = WorkerTask::spawn("test-worker", |_, _: &Sender<()>| -> Result<()> {
            Err(AssetError::NotFound("library 9".to_string()))
        })
        .unwrap();
        assert!(matches!(task.wait(), Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_panic_becomes_worker_error() {
        let task = WorkerTask::spawn("test-worker", |_, _: &Sender<()>| -> Result<()> {
            panic!("boom");
        })
        .unwrap();
        assert!(matches!(task.wait(), Err(AssetError::Worker(_))));
    }
}
