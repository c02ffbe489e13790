use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long a session may sit idle before it leaves the voice channel.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Countdown that ends an idle session.
///
/// Each `arm` gets a new generation number which is passed to the fire
/// callback. The owner must check it with [`InactivityTimer::accept_fire`]
/// before acting: a countdown that fired just as it was disarmed carries a
/// stale generation and is rejected.
#[derive(Debug)]
pub struct InactivityTimer {
    timeout: Duration,
    generation: u64,
    armed: Option<JoinHandle<()>>,
}

impl Default for InactivityTimer {
    fn default() -> Self {
        Self::new(INACTIVITY_TIMEOUT)
    }
}

impl InactivityTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            generation: 0,
            armed: None,
        }
    }

    /// Starts a countdown, replacing any pending one.
    pub fn arm<F>(&mut self, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.disarm();
        self.generation += 1;

        let generation = self.generation;
        let timeout = self.timeout;
        self.armed = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_fire(generation);
        }));

        debug!(
            "⏲️ Inactivity timer armed ({}s, generation {})",
            timeout.as_secs(),
            generation
        );
        generation
    }

    /// Cancels the pending countdown. Returns false if none was pending.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some(handle) => {
                handle.abort();
                debug!("Inactivity timer disarmed (generation {})", self.generation);
                true
            }
            None => false,
        }
    }

    /// Consumes a fire notification. Only the live countdown is accepted.
    pub fn accept_fire(&mut self, generation: u64) -> bool {
        if self.armed.is_some() && generation == self.generation {
            self.armed = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for InactivityTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
