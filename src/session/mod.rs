pub mod config;
pub mod factory;
pub mod state;

use crate::core::{Result, SagaError, SagaType};
use crate::driver::{DocumentClient, DriverResult, DriverSession, Namespace};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub use config::PersistenceConfig;
pub use factory::SessionFactory;
pub use state::{SessionState, VersionCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// One unit of work against the document store.
///
/// Wraps a driver session whose transaction (when transactions are enabled)
/// was started on open. Every saga operation issued through this session runs
/// inside that transaction until [`commit`](Self::commit) or
/// [`discard`](Self::discard). Dropping an open session discards it.
///
/// The session is owned by exactly one unit of work and is driven
/// sequentially; it must not be reused once it left the `Open` state.
pub struct TransactionalSession {
    id: SessionId,
    opened_at: DateTime<Utc>,
    state: SessionState,
    driver: Option<Box<dyn DriverSession>>,
    client: Arc<dyn DocumentClient>,
    config: Arc<PersistenceConfig>,
    versions: VersionCache,
    cancel: CancellationToken,
}

impl TransactionalSession {
    pub(crate) fn new(
        driver: Box<dyn DriverSession>,
        client: Arc<dyn DocumentClient>,
        config: Arc<PersistenceConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: SessionId::new(),
            opened_at: Utc::now(),
            state: SessionState::Open,
            driver: Some(driver),
            client,
            config,
            versions: VersionCache::new(),
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Whether a database transaction backs this session.
    pub fn in_transaction(&self) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|driver| driver.in_transaction())
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn versions(&self) -> &VersionCache {
        &self.versions
    }

    pub(crate) fn versions_mut(&mut self) -> &mut VersionCache {
        &mut self.versions
    }

    pub(crate) fn client(&self) -> &Arc<dyn DocumentClient> {
        &self.client
    }

    /// Collection handle for a saga type.
    pub fn namespace_for(&self, saga_type: SagaType) -> Result<Namespace> {
        self.ensure_open()?;
        Ok(Namespace::new(
            self.config.database.clone(),
            self.config.collections.resolve(saga_type),
        ))
    }

    pub(crate) fn driver(&mut self) -> Result<&mut (dyn DriverSession + 'static)> {
        let state = self.state;
        match self.driver.as_deref_mut() {
            Some(driver) if state.is_open() => Ok(driver),
            _ => Err(SagaError::SessionNotOpen {
                state: state.to_string(),
            }),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(SagaError::SessionNotOpen {
                state: self.state.to_string(),
            })
        }
    }

    /// Commits the unit of work and releases the driver session.
    ///
    /// A failed commit leaves the session `Discarded`; the failure is
    /// returned as-is and not retried.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(mut driver) = self.driver.take() else {
            return Err(SagaError::SessionNotOpen {
                state: self.state.to_string(),
            });
        };

        let outcome = if driver.in_transaction() {
            cancellable(&self.cancel, driver.commit_transaction()).await
        } else {
            Ok(())
        };

        match &outcome {
            Ok(()) => {
                self.state = SessionState::Committed;
                debug!(session_id = %self.id, "session committed");
            }
            Err(err) => {
                self.state = SessionState::Discarded;
                warn!(session_id = %self.id, error = %err, "session commit failed");
            }
        }
        // Dropping the driver session aborts whatever is still in flight.
        drop(driver);
        outcome
    }

    /// Rolls the unit of work back and releases the driver session.
    ///
    /// Discarding an already committed or discarded session is a no-op so
    /// the call is safe on every cleanup path. Cancellation is ignored here.
    pub async fn discard(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.state = SessionState::Discarded;
        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        debug!(session_id = %self.id, "session discarded");
        if driver.in_transaction() {
            driver.abort_transaction().await?;
        }
        Ok(())
    }
}

impl Drop for TransactionalSession {
    fn drop(&mut self) {
        if self.state.is_open() {
            warn!(
                session_id = %self.id,
                opened_at = %self.opened_at.to_rfc3339(),
                "session dropped without commit; discarding"
            );
        }
    }
}

/// Races a driver round trip against the session's cancellation signal.
///
/// Cancellation stops waiting for the result only; the remote operation may
/// still have been applied.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = DriverResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(SagaError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SagaError::Cancelled),
        result = operation => result.map_err(SagaError::from),
    }
}
