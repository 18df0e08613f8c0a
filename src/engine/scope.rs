//! Transaction scopes.
//!
//! A [`TransactionScope`] runs one unit of work in its own catalog
//! transaction: begin, run, then commit on success or roll back on failure.
//! The session is dropped when the scope ends, so nothing loaded for one
//! unit is still held while the next one runs.

use thiserror::Error;
use tracing::warn;

use crate::store::{CatalogSession, CatalogStore, StoreError};

/// Failure of a scoped unit of work.
#[derive(Debug, Error)]
pub enum ScopeError<E> {
    /// Beginning, committing or rolling back failed.
    #[error("transaction failed: {0}")]
    Infrastructure(#[source] StoreError),

    /// The work itself failed; its changes were rolled back.
    #[error(transparent)]
    Work(E),
}

/// Runs units of work in catalog transactions.
pub struct TransactionScope<'a, C: CatalogStore> {
    store: &'a C,
}

impl<'a, C: CatalogStore> TransactionScope<'a, C> {
    pub fn new(store: &'a C) -> Self {
        Self { store }
    }

    /// Runs `work` in a fresh transaction.
    pub fn run<T, E>(
        &self,
        work: impl FnOnce(&mut C::Session) -> Result<T, E>,
    ) -> Result<T, ScopeError<E>> {
        let mut session = self.store.begin().map_err(ScopeError::Infrastructure)?;
        run_in(&mut session, work)
    }

    /// Opens a session that stays open across several runs.
    pub fn continue_session(&self) -> Result<ContinuedSession<C::Session>, StoreError> {
        Ok(ContinuedSession {
            session: self.store.begin()?,
        })
    }
}

/// A session reused by successive runs. Each run still commits or rolls
/// back its own changes.
pub struct ContinuedSession<S: CatalogSession> {
    session: S,
}

impl<S: CatalogSession> ContinuedSession<S> {
    pub fn run<T, E>(
        &mut self,
        work: impl FnOnce(&mut S) -> Result<T, E>,
    ) -> Result<T, ScopeError<E>> {
        run_in(&mut self.session, work)
    }
}

fn run_in<S: CatalogSession, T, E>(
    session: &mut S,
    work: impl FnOnce(&mut S) -> Result<T, E>,
) -> Result<T, ScopeError<E>> {
    match work(session) {
        Ok(value) => {
            session.commit().map_err(ScopeError::Infrastructure)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = session.rollback() {
                warn!(error = %rollback, "Rollback failed");
                return Err(ScopeError::Infrastructure(rollback));
            }
            Err(ScopeError::Work(e))
        }
    }
}
