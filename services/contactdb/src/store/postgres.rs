//! Postgres-backed implementation of the contact store.
//!
//! # What this module is
//! Implements [`ContactStore`] and [`StoreTx`] on top of a `sqlx::PgPool`. Each engine batch runs
//! inside one database transaction; the engine decides when to commit or roll back.
//!
//! # Key invariants
//! - Annotations are stored as `jsonb`, so equality in `DELETE ... WHERE annotation = $n`
//!   ignores object key order and whitespace.
//! - Network addresses are stored as `cidr` and read back through `address::text`, which is the
//!   canonical `network/prefix` form.
//! - `audit_log` is append-only.
//! - The `*_automatic` tables are only read. Their surrogate keys are named after the table
//!   (`organisation_automatic_id`, `network_automatic_id`, ...).
//!
//! # Connection health
//! [`ContactStore::begin`] probes every fresh transaction with `SELECT 1`. A failed probe
//! discards the transaction and retries, up to `max_connections + 1` attempts, then fails with
//! [`StoreError::Exhausted`].
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - Dynamic SQL only interpolates table and column names from the fixed enums in
//!   [`super`]; values are always bound.
use super::{
    AnnotationOwner, ContactStore, LeafKind, LeafRow, ResourceKind, SharedRow, StoreError,
    StoreResult, StoreTx, TableSet,
};
use crate::config::PostgresConfig;
use crate::model::{Annotation, AuditLogEntry, OrganisationRow};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            return StoreError::Conflict(err.to_string());
        }
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

/// Durable contact store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use contactdb::config::PostgresConfig;
/// use contactdb::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
    probe_attempts: u32,
}

#[derive(Debug, Clone, FromRow)]
struct DbOrganisation {
    name: String,
    sector_id: Option<i64>,
    comment: String,
    ripe_org_hdl: String,
    ti_handle: String,
    first_handle: String,
}

impl From<DbOrganisation> for OrganisationRow {
    fn from(row: DbOrganisation) -> Self {
        OrganisationRow {
            name: row.name,
            sector_id: row.sector_id,
            comment: row.comment,
            ripe_org_hdl: row.ripe_org_hdl,
            ti_handle: row.ti_handle,
            first_handle: row.first_handle,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbLeaf {
    id: i64,
    fields: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DbShared {
    id: i64,
    key: String,
    comment: String,
}

impl From<DbShared> for SharedRow {
    fn from(row: DbShared) -> Self {
        SharedRow {
            id: row.id,
            key: row.key,
            comment: row.comment,
        }
    }
}

impl PostgresStore {
    /// Connect to Postgres and run the embedded migrations.
    ///
    /// # Errors
    /// - Connection, pool setup or migration failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Connect without running migrations, for tests that manage the schema themselves.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // Avoid logging `pg.url`; it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let connect = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connect)
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)??;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self {
            pool,
            probe_attempts: pg.max_connections.saturating_add(1),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContactStore for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        for attempt in 1..=self.probe_attempts {
            let mut tx = match self.pool.begin().await {
                Ok(tx) => tx,
                Err(sqlx::Error::PoolTimedOut) => {
                    return Err(StoreError::Exhausted { attempts: attempt });
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "failed to open transaction");
                    continue;
                }
            };
            match sqlx::query("SELECT 1").execute(&mut *tx).await {
                Ok(_) => return Ok(Box::new(PgTx { tx })),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "discarding unhealthy connection");
                }
            }
        }
        Err(StoreError::Exhausted {
            attempts: self.probe_attempts,
        })
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn key_cast(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "::cidr",
        ResourceKind::Fqdn => "",
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_organisation(&mut self, row: &OrganisationRow) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO organisation \
                (name, sector_id, comment, ripe_org_hdl, ti_handle, first_handle) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING organisation_id",
        )
        .bind(&row.name)
        .bind(row.sector_id)
        .bind(&row.comment)
        .bind(&row.ripe_org_hdl)
        .bind(&row.ti_handle)
        .bind(&row.first_handle)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn update_organisation(&mut self, id: i64, row: &OrganisationRow) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE organisation \
             SET (name, sector_id, comment, ripe_org_hdl, ti_handle, first_handle) \
               = ($2, $3, $4, $5, $6, $7) \
             WHERE organisation_id = $1",
        )
        .bind(id)
        .bind(&row.name)
        .bind(row.sector_id)
        .bind(&row.comment)
        .bind(&row.ripe_org_hdl)
        .bind(&row.ti_handle)
        .bind(&row.first_handle)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_organisation(&mut self, id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM organisation WHERE organisation_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn organisation_row(
        &mut self,
        set: TableSet,
        id: i64,
    ) -> StoreResult<Option<OrganisationRow>> {
        let query = format!(
            "SELECT name, sector_id, comment, ripe_org_hdl, ti_handle, first_handle \
             FROM {table} WHERE {id} = $1",
            table = set.table("organisation"),
            id = set.id_column("organisation"),
        );
        let row = sqlx::query_as::<_, DbOrganisation>(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(OrganisationRow::from))
    }

    async fn annotations(&mut self, owner: AnnotationOwner) -> StoreResult<Vec<Annotation>> {
        let query = format!(
            "SELECT annotation FROM {table} WHERE {column} = $1 ORDER BY annotation::text",
            table = owner.table(),
            column = owner.key_column(),
        );
        let rows = sqlx::query_scalar::<_, Json<Annotation>>(&query)
            .bind(owner.key())
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(|Json(annotation)| annotation).collect())
    }

    async fn insert_annotation(
        &mut self,
        owner: AnnotationOwner,
        annotation: &Annotation,
    ) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO {table} ({column}, annotation) VALUES ($1, $2)",
            table = owner.table(),
            column = owner.key_column(),
        );
        sqlx::query(&query)
            .bind(owner.key())
            .bind(Json(annotation))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_annotation(
        &mut self,
        owner: AnnotationOwner,
        annotation: &Annotation,
    ) -> StoreResult<u64> {
        let query = format!(
            "DELETE FROM {table} WHERE {column} = $1 AND annotation = $2",
            table = owner.table(),
            column = owner.key_column(),
        );
        let result = sqlx::query(&query)
            .bind(owner.key())
            .bind(Json(annotation))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn linked_asns(&mut self, set: TableSet, org_id: i64) -> StoreResult<Vec<i64>> {
        let query = format!(
            "SELECT asn FROM {table} WHERE {org} = $1 ORDER BY asn",
            table = set.table("organisation_to_asn"),
            org = set.id_column("organisation"),
        );
        let asns = sqlx::query_scalar::<_, i64>(&query)
            .bind(org_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(asns)
    }

    async fn asn_organisations(&mut self, asn: i64) -> StoreResult<Vec<i64>> {
        let orgs = sqlx::query_scalar::<_, i64>(
            "SELECT organisation_id FROM organisation_to_asn WHERE asn = $1 \
             ORDER BY organisation_id",
        )
        .bind(asn)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(orgs)
    }

    async fn link_asn(&mut self, org_id: i64, asn: i64) -> StoreResult<()> {
        sqlx::query("INSERT INTO organisation_to_asn (organisation_id, asn) VALUES ($1, $2)")
            .bind(org_id)
            .bind(asn)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn unlink_asns_except(&mut self, org_id: i64, keep: &[i64]) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM organisation_to_asn WHERE organisation_id = $1 AND asn <> ALL($2)",
        )
        .bind(org_id)
        .bind(keep)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn prune_asn_annotations(&mut self) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM autonomous_system_annotation AS asa \
             WHERE NOT EXISTS (SELECT 1 FROM organisation_to_asn AS ota WHERE ota.asn = asa.asn)",
        )
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn leaves(
        &mut self,
        set: TableSet,
        kind: LeafKind,
        org_id: i64,
    ) -> StoreResult<Vec<LeafRow>> {
        let query = format!(
            "SELECT {id} AS id, ARRAY[{fields}]::text[] AS fields \
             FROM {table} WHERE {org} = $1 ORDER BY {id}",
            id = set.id_column(kind.table()),
            fields = kind.fields().join(", "),
            table = set.table(kind.table()),
            org = set.id_column("organisation"),
        );
        let rows = sqlx::query_as::<_, DbLeaf>(&query)
            .bind(org_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| LeafRow {
                id: row.id,
                values: row.fields,
            })
            .collect())
    }

    async fn delete_leaves(&mut self, kind: LeafKind, org_id: i64) -> StoreResult<u64> {
        let query = format!("DELETE FROM {} WHERE organisation_id = $1", kind.table());
        let result = sqlx::query(&query)
            .bind(org_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_leaf(
        &mut self,
        kind: LeafKind,
        org_id: i64,
        values: &[String],
    ) -> StoreResult<i64> {
        let fields = kind.fields();
        if values.len() != fields.len() {
            return Err(StoreError::Unexpected(anyhow::anyhow!(
                "{} expects {} values, got {}",
                kind.table(),
                fields.len(),
                values.len()
            )));
        }
        let placeholders: Vec<String> = (2..fields.len() + 2).map(|n| format!("${n}")).collect();
        let query = format!(
            "INSERT INTO {table} (organisation_id, {fields}) VALUES ($1, {placeholders}) \
             RETURNING {id}",
            table = kind.table(),
            fields = fields.join(", "),
            placeholders = placeholders.join(", "),
            id = kind.id_column(),
        );
        let mut insert = sqlx::query_scalar::<_, i64>(&query).bind(org_id);
        for value in values {
            insert = insert.bind(value);
        }
        Ok(insert.fetch_one(&mut *self.tx).await?)
    }

    async fn linked_resources(
        &mut self,
        set: TableSet,
        kind: ResourceKind,
        org_id: i64,
    ) -> StoreResult<Vec<SharedRow>> {
        let query = format!(
            "SELECT r.{id} AS id, r.{key}::text AS key, r.comment AS comment \
             FROM {table} AS r JOIN {join} AS j ON j.{id} = r.{id} \
             WHERE j.{org} = $1 ORDER BY r.{id}",
            id = set.id_column(kind.table()),
            key = kind.key_column(),
            table = set.table(kind.table()),
            join = set.table(kind.join_table()),
            org = set.id_column("organisation"),
        );
        let rows = sqlx::query_as::<_, DbShared>(&query)
            .bind(org_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(SharedRow::from).collect())
    }

    async fn find_resource(
        &mut self,
        kind: ResourceKind,
        key: &str,
    ) -> StoreResult<Option<SharedRow>> {
        let query = format!(
            "SELECT {id} AS id, {key}::text AS key, comment FROM {table} \
             WHERE {key} = $1{cast} ORDER BY {id} LIMIT 1",
            id = kind.id_column(),
            key = kind.key_column(),
            table = kind.table(),
            cast = key_cast(kind),
        );
        let row = sqlx::query_as::<_, DbShared>(&query)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(SharedRow::from))
    }

    async fn insert_resource(
        &mut self,
        kind: ResourceKind,
        key: &str,
        comment: &str,
    ) -> StoreResult<i64> {
        let query = format!(
            "INSERT INTO {table} ({key}, comment) VALUES ($1{cast}, $2) RETURNING {id}",
            table = kind.table(),
            key = kind.key_column(),
            cast = key_cast(kind),
            id = kind.id_column(),
        );
        let id = sqlx::query_scalar::<_, i64>(&query)
            .bind(key)
            .bind(comment)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn update_resource_comment(
        &mut self,
        kind: ResourceKind,
        id: i64,
        comment: &str,
    ) -> StoreResult<u64> {
        let query = format!(
            "UPDATE {table} SET comment = $2 WHERE {id} = $1",
            table = kind.table(),
            id = kind.id_column(),
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(comment)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn link_resource(
        &mut self,
        kind: ResourceKind,
        org_id: i64,
        id: i64,
    ) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO {join} (organisation_id, {id}) VALUES ($1, $2)",
            join = kind.join_table(),
            id = kind.id_column(),
        );
        sqlx::query(&query)
            .bind(org_id)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn unlink_resource(
        &mut self,
        kind: ResourceKind,
        org_id: i64,
        id: i64,
    ) -> StoreResult<u64> {
        let query = format!(
            "DELETE FROM {join} WHERE organisation_id = $1 AND {id} = $2",
            join = kind.join_table(),
            id = kind.id_column(),
        );
        let result = sqlx::query(&query)
            .bind(org_id)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_resources(&mut self, kind: ResourceKind) -> StoreResult<u64> {
        let orphan = format!(
            "NOT EXISTS (SELECT 1 FROM {join} AS j WHERE j.{id} = t.{id})",
            join = kind.join_table(),
            id = kind.id_column(),
        );
        let annotations = format!(
            "DELETE FROM {annotation_table} AS a WHERE a.{id} IN \
             (SELECT t.{id} FROM {table} AS t WHERE {orphan})",
            annotation_table = kind.annotation_owner(0).table(),
            id = kind.id_column(),
            table = kind.table(),
        );
        sqlx::query(&annotations).execute(&mut *self.tx).await?;
        let resources = format!("DELETE FROM {table} AS t WHERE {orphan}", table = kind.table());
        let result = sqlx::query(&resources).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_log \
                (table_name, \"user\", operation, object_type, object_value, before, after) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&entry.table)
        .bind(&entry.user)
        .bind(entry.operation.as_str())
        .bind(&entry.object_type)
        .bind(&entry.object_value)
        .bind(entry.before.as_ref().map(Json))
        .bind(entry.after.as_ref().map(Json))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}
