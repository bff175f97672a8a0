//! Wake/network lock bookkeeping

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock acquisition refused: {0}")]
    Acquisition(String),
}

/// Platform hook for the actual wake and network locks. The manager only
/// tracks the held/unheld pair; what "holding" means is up to the backend.
pub trait LockBackend: Send {
    fn acquire_wake(&mut self) -> Result<(), LockError>;
    fn acquire_network(&mut self) -> Result<(), LockError>;
    fn release_wake(&mut self);
    fn release_network(&mut self);
}

/// Backend for platforms without a lock facility; every operation succeeds.
#[derive(Debug, Default)]
pub struct NoopLockBackend;

impl LockBackend for NoopLockBackend {
    fn acquire_wake(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn acquire_network(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn release_wake(&mut self) {}

    fn release_network(&mut self) {}
}

/// Owns at most one wake+network lock pair. The two locks are always acquired
/// and released together.
pub struct ResourceLockManager {
    backend: Box<dyn LockBackend>,
    held: bool,
}

impl ResourceLockManager {
    pub fn new(backend: Box<dyn LockBackend>) -> Self {
        Self {
            backend,
            held: false,
        }
    }

    /// Acquire the pair. No-op if already held. On failure neither lock is
    /// left held.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        if self.held {
            return Ok(());
        }
        self.backend.acquire_wake()?;
        if let Err(err) = self.backend.acquire_network() {
            self.backend.release_wake();
            return Err(err);
        }
        self.held = true;
        Ok(())
    }

    /// Release the pair. No-op if not held.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.backend.release_network();
        self.backend.release_wake();
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}
