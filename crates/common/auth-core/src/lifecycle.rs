use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("provider is not initialized")]
    NotInitialized,

    #[error("provider is closed")]
    Closed,
}

enum State<T> {
    Uninitialized,
    Initialized(Arc<T>),
    Closed,
}

/// `Uninitialized -> Initialized -> Closed` state holder for long-lived providers.
///
/// The lock only guards the state swap; callers get an `Arc` to the initialized
/// value and do their work (including I/O) after the lock is released.
pub struct Lifecycle<T> {
    state: RwLock<State<T>>,
}

impl<T> Default for Lifecycle<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(State::Uninitialized),
        }
    }
}

impl<T> Lifecycle<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Result<Arc<T>, LifecycleError> {
        match &*self.state.read() {
            State::Initialized(inner) => Ok(Arc::clone(inner)),
            State::Uninitialized => Err(LifecycleError::NotInitialized),
            State::Closed => Err(LifecycleError::Closed),
        }
    }

    /// Re-initializing an open provider replaces its state; a closed one stays closed.
    pub fn initialize(&self, inner: T) -> Result<(), LifecycleError> {
        let mut state = self.state.write();
        if matches!(*state, State::Closed) {
            return Err(LifecycleError::Closed);
        }
        *state = State::Initialized(Arc::new(inner));
        Ok(())
    }

    /// Returns the state that was live, if any.
    pub fn close(&self) -> Option<Arc<T>> {
        match std::mem::replace(&mut *self.state.write(), State::Closed) {
            State::Initialized(inner) => Some(inner),
            State::Uninitialized | State::Closed => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.read(), State::Initialized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_state_machine() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.get().err(), Some(LifecycleError::NotInitialized));

        lifecycle.initialize(7_u32).unwrap();
        assert_eq!(*lifecycle.get().unwrap(), 7);

        lifecycle.initialize(8_u32).unwrap();
        assert_eq!(*lifecycle.get().unwrap(), 8);

        assert_eq!(lifecycle.close().as_deref(), Some(&8));
        assert_eq!(lifecycle.get().err(), Some(LifecycleError::Closed));
        assert_eq!(lifecycle.initialize(9), Err(LifecycleError::Closed));
        assert!(lifecycle.close().is_none());
    }
}
