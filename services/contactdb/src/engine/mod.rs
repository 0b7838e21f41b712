//! Reconciliation engine for organisation aggregates.
//!
//! # Purpose
//! Turns a desired organisation aggregate into the minimal set of storage writes that make the
//! stored state match it, auditing every annotation change.
//!
//! # Notes
//! [`Engine`] owns the store handle and opens one transaction per call. The submodules only ever
//! work on a [`Session`], i.e. an already open transaction plus the acting user.
pub mod aggregate;
pub mod batch;
pub mod diff;
pub mod error;
pub mod leaf;
pub mod shared;

use crate::model::{AsnDetails, CommandKind, Organisation};
use crate::store::{ContactStore, StoreTx, TableSet};
use batch::{CommandResult, execute_batch, parse_batch};
use error::{BatchError, EngineResult};
use serde_json::Value;
use std::sync::Arc;

/// An open transaction and the user whose changes it records.
pub struct Session<'a> {
    pub tx: &'a mut dyn StoreTx,
    pub user: &'a str,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ContactStore>,
}

impl Engine {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn ContactStore {
        self.store.as_ref()
    }

    /// Reads one organisation aggregate.
    pub async fn organisation(&self, id: i64) -> EngineResult<Option<Organisation>> {
        self.load(TableSet::Manual, id).await
    }

    /// Reads one imported organisation from the automatic tables. It has no annotations.
    pub async fn automatic_organisation(&self, id: i64) -> EngineResult<Option<Organisation>> {
        self.load(TableSet::Automatic, id).await
    }

    async fn load(&self, set: TableSet, id: i64) -> EngineResult<Option<Organisation>> {
        let mut tx = self.store.begin().await?;
        let result = aggregate::load_organisation(tx.as_mut(), set, id).await;
        release(tx).await;
        Ok(result?)
    }

    /// Reads the organisations linking an ASN and the number's annotations.
    pub async fn asn(&self, number: i64) -> EngineResult<Option<AsnDetails>> {
        let mut tx = self.store.begin().await?;
        let result = aggregate::load_asn(tx.as_mut(), number).await;
        release(tx).await;
        Ok(result?)
    }

    pub async fn create(&self, user: &str, org: &Organisation) -> EngineResult<i64> {
        let mut tx = self.store.begin().await?;
        let result = {
            let mut session = Session {
                tx: tx.as_mut(),
                user,
            };
            aggregate::create(&mut session, org).await
        };
        finish(tx, CommandKind::Create, result).await
    }

    pub async fn update(&self, user: &str, org: &Organisation) -> EngineResult<i64> {
        let mut tx = self.store.begin().await?;
        let result = {
            let mut session = Session {
                tx: tx.as_mut(),
                user,
            };
            aggregate::update(&mut session, org).await
        };
        finish(tx, CommandKind::Update, result).await
    }

    pub async fn delete(&self, user: &str, org: &Organisation) -> EngineResult<Option<i64>> {
        let mut tx = self.store.begin().await?;
        let result = {
            let mut session = Session {
                tx: tx.as_mut(),
                user,
            };
            aggregate::delete(&mut session, org).await
        };
        finish(tx, CommandKind::Delete, result).await
    }

    /// Validates a `{commands, orgs}` body and applies it atomically.
    ///
    /// # Errors
    /// - [`BatchError::BadRequest`] for a malformed envelope; storage is not touched.
    /// - [`BatchError::Validation`] when an aggregate fails schema validation.
    /// - [`BatchError::CommitFailed`] for every other failure.
    pub async fn apply_batch(
        &self,
        user: &str,
        body: &Value,
    ) -> Result<Vec<CommandResult>, BatchError> {
        let commands = parse_batch(body)?;
        execute_batch(self.store.as_ref(), user, &commands).await
    }
}

async fn release(tx: Box<dyn StoreTx>) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "failed to release read transaction");
    }
}

async fn finish<T>(
    tx: Box<dyn StoreTx>,
    kind: CommandKind,
    result: EngineResult<T>,
) -> EngineResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::info!(command = %kind, error = %err, "command rolled back");
            release(tx).await;
            Err(err)
        }
    }
}
