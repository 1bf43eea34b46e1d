use super::{PersistenceConfig, TransactionalSession, cancellable};
use crate::core::{Result, SagaError};
use crate::driver::{DocumentClient, DriverError, TransactionOptions};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Opens one [`TransactionalSession`] per unit of work.
///
/// Construction verifies once, at startup, that the database supports
/// transactions when transactional mode is enabled.
pub struct SessionFactory {
    client: Arc<dyn DocumentClient>,
    config: Arc<PersistenceConfig>,
}

impl SessionFactory {
    /// Validates the configuration and runs the transaction capability probe.
    ///
    /// Fails with `TransactionUnsupported` when transactions are enabled but
    /// the server cannot run them; the process is expected to stop.
    pub async fn initialize(
        client: Arc<dyn DocumentClient>,
        config: PersistenceConfig,
    ) -> Result<Self> {
        config.validate().map_err(SagaError::InvalidConfig)?;

        if config.use_transactions {
            Self::probe_transactions(client.as_ref(), &config).await?;
        } else {
            info!(database = %config.database, "transactional sessions disabled");
        }

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Start a throwaway transaction and abort it right away.
    async fn probe_transactions(
        client: &dyn DocumentClient,
        config: &PersistenceConfig,
    ) -> Result<()> {
        let mut session = client.start_session().await?;
        let options = TransactionOptions {
            max_duration: config.transaction_timeout,
        };

        match session.start_transaction(options) {
            Ok(()) => {}
            Err(DriverError::TransactionsNotSupported(reason)) => {
                error!(database = %config.database, %reason, "transaction support probe failed");
                return Err(SagaError::TransactionUnsupported { reason });
            }
            Err(err) => return Err(err.into()),
        }
        session.abort_transaction().await?;

        info!(database = %config.database, "transaction support verified");
        Ok(())
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub async fn open(&self) -> Result<TransactionalSession> {
        self.open_with_cancellation(CancellationToken::new()).await
    }

    /// Opens a session whose operations abort waiting when `cancel` fires.
    pub async fn open_with_cancellation(
        &self,
        cancel: CancellationToken,
    ) -> Result<TransactionalSession> {
        let mut driver = cancellable(&cancel, self.client.start_session()).await?;
        if self.config.use_transactions {
            driver.start_transaction(TransactionOptions {
                max_duration: self.config.transaction_timeout,
            })?;
        }

        let session = TransactionalSession::new(
            driver,
            Arc::clone(&self.client),
            Arc::clone(&self.config),
            cancel,
        );
        debug!(
            session_id = %session.id(),
            transactional = session.in_transaction(),
            "session opened"
        );
        Ok(session)
    }

    /// Runs `op` inside a fresh session.
    ///
    /// Commits when `op` returns `Ok`, discards when it returns `Err`.
    pub async fn with_session<F, T>(&self, op: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut TransactionalSession) -> BoxFuture<'s, Result<T>>,
    {
        self.with_session_cancellable(CancellationToken::new(), op)
            .await
    }

    pub async fn with_session_cancellable<F, T>(
        &self,
        cancel: CancellationToken,
        op: F,
    ) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut TransactionalSession) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = self.open_with_cancellation(cancel).await?;

        match op(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(discard_err) = session.discard().await {
                    warn!(
                        session_id = %session.id(),
                        error = %discard_err,
                        "discard after failed unit of work also failed"
                    );
                }
                Err(err)
            }
        }
    }
}
