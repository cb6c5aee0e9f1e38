//! A multi-producer, multi-consumer "send a signal exactly once" primitive,
//! used here for graceful shutdown. Ported from the teacher's
//! `lexe-tokio::notify_once` module.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Sends a notification to all consumers *once*. Clone to get another
/// handle; every clone observes the signal at-most-once, including clones
/// made after the signal was already sent.
#[derive(Debug)]
pub struct NotifyOnce {
    inner: Arc<Semaphore>,
    have_recved: bool,
}

impl NotifyOnce {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { inner: Arc::new(Semaphore::new(0)), have_recved: false }
    }

    /// Sends the signal. Safe to call more than once.
    pub fn send(&self) {
        self.inner.close();
    }

    /// Waits for the signal. If this handle has already observed one, this
    /// future never resolves.
    pub async fn recv(&mut self) {
        if self.have_recved {
            std::future::pending().await
        } else {
            self.inner.acquire().await.map_err(|_| ()).expect_err("semaphore should only close, never hand out a permit");
            self.have_recved = true;
        }
    }

    pub fn try_recv(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Clone for NotifyOnce {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), have_recved: false }
    }
}
