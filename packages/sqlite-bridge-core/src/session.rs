use crate::engine::Engine;
use crate::errors::BridgeError;

/// Lifecycle of the worker's single database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

enum SessionState<E> {
    Uninitialized,
    Initializing,
    Ready(E),
    Closed,
}

pub struct Session<E: Engine> {
    state: SessionState<E>,
}

impl<E: Engine> Default for Session<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Session<E> {
    pub fn new() -> Self {
        Session {
            state: SessionState::Uninitialized,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Initializing => SessionStatus::Initializing,
            SessionState::Ready(_) => SessionStatus::Ready,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    /// Claim the session for loading. Only one load may be in flight and a
    /// worker never gets a second handle.
    pub fn begin_init(&mut self) -> Result<(), BridgeError> {
        match self.state {
            SessionState::Uninitialized => {
                self.state = SessionState::Initializing;
                Ok(())
            }
            SessionState::Initializing => Err(BridgeError::Initializing),
            SessionState::Ready(_) => Err(BridgeError::AlreadyInitialized),
            SessionState::Closed => Err(BridgeError::Closed),
        }
    }

    /// Store the outcome of a load started with `begin_init`. A failed load
    /// returns the session to `Uninitialized` so the host may retry.
    pub fn finish_init(&mut self, loaded: Result<E, BridgeError>) -> Result<(), BridgeError> {
        if !matches!(self.state, SessionState::Initializing) {
            return Err(BridgeError::Engine(
                "Initialization finished without being started".to_string(),
            ));
        }
        match loaded {
            Ok(engine) => {
                self.state = SessionState::Ready(engine);
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Uninitialized;
                Err(err)
            }
        }
    }

    pub fn engine_mut(&mut self) -> Result<&mut E, BridgeError> {
        match &mut self.state {
            SessionState::Ready(engine) => Ok(engine),
            SessionState::Uninitialized => Err(BridgeError::NotInitialized),
            SessionState::Initializing => Err(BridgeError::Initializing),
            SessionState::Closed => Err(BridgeError::Closed),
        }
    }

    /// Close the handle. If the engine refuses, the session stays `Ready`.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        self.engine_mut()?.close()?;
        self.state = SessionState::Closed;
        Ok(())
    }
}
