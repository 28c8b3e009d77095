use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Cooperative stop signal for a clone run.
///
/// Unlike a bare `CancellationToken` this can be cleared: a resumed run reuses
/// the same handle the control surface holds. The orchestrator only polls it
/// between messages.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<Mutex<CancellationToken>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.current().is_cancelled()
    }

    pub fn request(&self) {
        self.current().cancel();
    }

    /// Reset to "not requested". Waiters on the old token stay cancelled.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
        }
    }

    /// Token for the current generation, for `select!`-style waiting.
    pub fn token(&self) -> CancellationToken {
        self.current()
    }

    fn current(&self) -> CancellationToken {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
