//! Building, rebuilding, dropping and inspecting the vector index on a
//! store's table.

use sqlx::{Executor, PgConnection};

use crate::error::AlloyDbError;
use crate::indexes::{
    default_index_name, maintenance_work_mem_mb, strategy_from_indexdef, DistanceStrategy,
    VectorIndex,
};
use crate::sql::{quote_ident, validate_identifier};
use crate::store::StoreCore;

const DUPLICATE_OBJECT: &str = "42P07";
const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_OBJECT: &str = "42704";

/// How [`apply_vector_index`](crate::AsyncAlloyDbVectorStore::apply_vector_index)
/// builds an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Overrides the descriptor's name.
    pub name: Option<String>,
    /// Build with `CREATE INDEX CONCURRENTLY` so writes are not blocked.
    pub concurrently: bool,
    /// Raise `maintenance_work_mem` for the build, sized from the index's
    /// partition count and the embedding width. Never lowers the session's
    /// current value. HNSW has no partition count and rejects this.
    pub tune_memory: bool,
    /// Explicit `maintenance_work_mem` in MB for the build. Takes precedence
    /// over `tune_memory`.
    pub maintenance_work_mem_mb: Option<u64>,
}

impl ApplyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn concurrently(mut self) -> Self {
        self.concurrently = true;
        self
    }

    pub fn with_tuned_memory(mut self) -> Self {
        self.tune_memory = true;
        self
    }

    pub fn with_maintenance_work_mem_mb(mut self, mb: u64) -> Self {
        self.maintenance_work_mem_mb = Some(mb);
        self
    }
}

/// Raise `maintenance_work_mem` on `conn` to the size recommended for an
/// index with `num_leaves` partitions over `vector_size`-wide vectors.
///
/// Returns the MB applied, or `None` when the current setting is already at
/// least that large (or cannot be read) and was left alone. The setting lasts
/// for the session, so it only affects builds issued on the same connection.
pub async fn set_maintenance_work_mem(
    conn: &mut PgConnection,
    num_leaves: u32,
    vector_size: u32,
) -> Result<Option<u64>, AlloyDbError> {
    let wanted = maintenance_work_mem_mb(num_leaves, vector_size);
    let current = current_work_mem_mb(conn).await?;
    let raised = work_mem_to_raise(current, wanted);
    if let Some(mb) = raised {
        set_work_mem(conn, mb).await?;
    }
    Ok(raised)
}

async fn set_work_mem(conn: &mut PgConnection, mb: u64) -> Result<(), AlloyDbError> {
    let stmt = format!("SET maintenance_work_mem TO '{mb} MB'");
    tracing::debug!("{stmt}");
    (&mut *conn).execute(sqlx::raw_sql(&stmt)).await?;
    Ok(())
}

async fn current_work_mem_mb(conn: &mut PgConnection) -> Result<Option<u64>, AlloyDbError> {
    let shown: String = sqlx::query_scalar("SELECT current_setting('maintenance_work_mem')")
        .fetch_one(&mut *conn)
        .await?;
    let mb = parse_memory_mb(&shown);
    if mb.is_none() {
        tracing::warn!("unrecognised maintenance_work_mem '{shown}', leaving it unchanged");
    }
    Ok(mb)
}

/// Parse a memory setting as Postgres shows it (`64MB`, `1GB`, `1024kB`)
/// into MB, rounding kB up.
fn parse_memory_mb(shown: &str) -> Option<u64> {
    let shown = shown.trim();
    let split = shown
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(shown.len());
    let (digits, unit) = shown.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "kB" => Some(value.div_ceil(1024)),
        "MB" => Some(value),
        "GB" => value.checked_mul(1024),
        "TB" => value.checked_mul(1024 * 1024),
        _ => None,
    }
}

/// The value to set, if any. Tuning only ever raises the limit; an unknown
/// current value is left alone.
fn work_mem_to_raise(current_mb: Option<u64>, wanted_mb: u64) -> Option<u64> {
    match current_mb {
        Some(current) if current < wanted_mb => Some(wanted_mb),
        _ => None,
    }
}

/// Partition count to size tuned memory from, when tuning applies.
fn tuning_partitions(
    index: &VectorIndex,
    options: &ApplyOptions,
) -> Result<Option<u32>, AlloyDbError> {
    if !options.tune_memory || options.maintenance_work_mem_mb.is_some() {
        return Ok(None);
    }
    match index.kind.partition_count() {
        Some(partitions) => Ok(Some(partitions)),
        None => Err(AlloyDbError::Unsupported(format!(
            "memory tuning needs a partition count and {} has none; \
             set maintenance_work_mem_mb explicitly",
            index.kind.access_method()
        ))),
    }
}

fn map_sqlstate(err: sqlx::Error, codes: &[&str], mapped: AlloyDbError) -> AlloyDbError {
    let hit = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| codes.contains(&code.as_ref()));
    if hit {
        mapped
    } else {
        AlloyDbError::Database(err)
    }
}

impl StoreCore {
    fn index_name(&self, name: Option<&str>) -> Result<String, AlloyDbError> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_index_name(&self.config.table_name));
        validate_identifier("index", &name)?;
        Ok(name)
    }

    fn qualified_index(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.table.schema), quote_ident(name))
    }

    /// Build `index` on the embedding column.
    pub(crate) async fn apply_vector_index(
        &self,
        index: &VectorIndex,
        options: &ApplyOptions,
    ) -> Result<String, AlloyDbError> {
        let name = match &options.name {
            Some(name) => name.clone(),
            None => index.resolved_name(&self.config.table_name),
        };
        validate_identifier("index", &name)?;
        if index.distance_strategy != self.config.distance_strategy {
            tracing::warn!(
                "index '{name}' uses {} but the store ranks by {}; queries will not use it",
                index.distance_strategy,
                self.config.distance_strategy
            );
        }

        let partitions = tuning_partitions(index, options)?;

        let mut conn = self.pool.acquire().await?;
        if let Some(extension) = index.kind.required_extension() {
            (&mut *conn)
                .execute(sqlx::raw_sql(&format!("CREATE EXTENSION IF NOT EXISTS {extension}")))
                .await?;
        }

        let work_mem = match (options.maintenance_work_mem_mb, partitions) {
            (Some(mb), _) => Some(mb),
            (None, Some(partitions)) => {
                let dims = embedding_dimensions(&mut *conn, self).await?.ok_or_else(|| {
                    AlloyDbError::Config(format!(
                        "column '{}' has no declared dimension",
                        self.config.embedding_column
                    ))
                })?;
                let wanted = maintenance_work_mem_mb(partitions, dims);
                let current = current_work_mem_mb(&mut *conn).await?;
                work_mem_to_raise(current, wanted)
            }
            (None, None) => None,
        };
        if let Some(mb) = work_mem {
            set_work_mem(&mut *conn, mb).await?;
        }

        let stmt = index.create_statement(
            &self.table,
            &self.config.embedding_column,
            &name,
            options.concurrently,
        );
        tracing::debug!("{stmt}");
        let built = (&mut *conn).execute(sqlx::raw_sql(&stmt)).await;

        if work_mem.is_some() {
            let reset = (&mut *conn)
                .execute(sqlx::raw_sql("RESET maintenance_work_mem"))
                .await;
            if let Err(e) = reset {
                tracing::warn!("failed to reset maintenance_work_mem, discarding connection: {e}");
                drop(conn.detach());
            }
        }

        built.map_err(|e| {
            map_sqlstate(e, &[DUPLICATE_OBJECT], AlloyDbError::IndexExists(name.clone()))
        })?;
        tracing::info!(
            "created {} index '{name}' on {}",
            index.kind.access_method(),
            self.table.qualified()
        );
        Ok(name)
    }

    /// Rebuild an index in place.
    pub(crate) async fn reindex(&self, name: Option<&str>) -> Result<(), AlloyDbError> {
        let name = self.index_name(name)?;
        let stmt = format!("REINDEX INDEX {}", self.qualified_index(&name));
        tracing::debug!("{stmt}");
        sqlx::raw_sql(&stmt)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_sqlstate(
                    e,
                    &[UNDEFINED_TABLE, UNDEFINED_OBJECT],
                    AlloyDbError::IndexNotFound(name.clone()),
                )
            })?;
        tracing::info!("reindexed '{name}'");
        Ok(())
    }

    /// Drop an index. Dropping one that does not exist succeeds.
    pub(crate) async fn drop_vector_index(&self, name: Option<&str>) -> Result<String, AlloyDbError> {
        let name = self.index_name(name)?;
        let stmt = format!("DROP INDEX IF EXISTS {}", self.qualified_index(&name));
        tracing::debug!("{stmt}");
        sqlx::raw_sql(&stmt).execute(&self.pool).await?;
        tracing::info!("dropped index '{name}'");
        Ok(name)
    }

    /// Whether `name` exists on this table and is ready for queries.
    pub(crate) async fn is_valid_index(&self, name: Option<&str>) -> Result<bool, AlloyDbError> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_index_name(&self.config.table_name));
        let valid: Option<bool> = sqlx::query_scalar(
            "SELECT i.indisvalid AND i.indisready \
             FROM pg_index i \
             JOIN pg_class ic ON ic.oid = i.indexrelid \
             JOIN pg_class tc ON tc.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = tc.relnamespace \
             WHERE n.nspname = $1 AND tc.relname = $2 AND ic.relname = $3",
        )
        .bind(&self.table.schema)
        .bind(&self.table.table)
        .bind(&name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(valid.unwrap_or(false))
    }

    /// Distance strategy an existing index was built for, read from its
    /// operator class. `None` when the index is missing or not a vector index.
    pub(crate) async fn index_distance_strategy(
        &self,
        name: Option<&str>,
    ) -> Result<Option<DistanceStrategy>, AlloyDbError> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_index_name(&self.config.table_name));
        let indexdef: Option<String> = sqlx::query_scalar(
            "SELECT indexdef FROM pg_indexes \
             WHERE schemaname = $1 AND tablename = $2 AND indexname = $3",
        )
        .bind(&self.table.schema)
        .bind(&self.table.table)
        .bind(&name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(indexdef.as_deref().and_then(strategy_from_indexdef))
    }

    /// Declared width of the embedding column.
    pub(crate) async fn embedding_dimensions(&self) -> Result<Option<u32>, AlloyDbError> {
        let mut conn = self.pool.acquire().await?;
        embedding_dimensions(&mut *conn, self).await
    }
}

async fn embedding_dimensions(
    conn: &mut PgConnection,
    core: &StoreCore,
) -> Result<Option<u32>, AlloyDbError> {
    // pgvector stores the dimension directly as the type modifier.
    let typmod: Option<i32> = sqlx::query_scalar(
        "SELECT a.atttypmod \
         FROM pg_attribute a \
         JOIN pg_class c ON c.oid = a.attrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = $3 AND NOT a.attisdropped",
    )
    .bind(&core.table.schema)
    .bind(&core.table.table)
    .bind(&core.config.embedding_column)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(typmod.and_then(|t| u32::try_from(t).ok()).filter(|d| *d > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_options_builders() {
        let options = ApplyOptions::new()
            .with_name("secondindex")
            .concurrently()
            .with_tuned_memory();
        assert_eq!(options.name.as_deref(), Some("secondindex"));
        assert!(options.concurrently);
        assert!(options.tune_memory);
        assert_eq!(options.maintenance_work_mem_mb, None);

        let options = ApplyOptions::new().with_maintenance_work_mem_mb(64);
        assert!(!options.concurrently);
        assert_eq!(options.maintenance_work_mem_mb, Some(64));
    }

    #[test]
    fn memory_settings_parse_to_mb() {
        assert_eq!(parse_memory_mb("64MB"), Some(64));
        assert_eq!(parse_memory_mb("1GB"), Some(1024));
        assert_eq!(parse_memory_mb("1025kB"), Some(2));
        assert_eq!(parse_memory_mb("2048"), Some(2));
        assert_eq!(parse_memory_mb("1TB"), Some(1024 * 1024));
        assert_eq!(parse_memory_mb("lots"), None);
        assert_eq!(parse_memory_mb("64XB"), None);
    }

    #[test]
    fn tuning_only_raises_the_limit() {
        // lists = 100 over 1536 dimensions recommends 30 MB, below the 64 MB default.
        let wanted = maintenance_work_mem_mb(100, 1536);
        assert_eq!(wanted, 30);
        assert_eq!(work_mem_to_raise(Some(64), wanted), None);
        assert_eq!(work_mem_to_raise(Some(30), wanted), None);
        assert_eq!(work_mem_to_raise(Some(16), wanted), Some(30));
        assert_eq!(work_mem_to_raise(None, wanted), None);
    }

    #[test]
    fn tuning_hnsw_is_unsupported() {
        let tuned = ApplyOptions::new().with_tuned_memory();
        let err = tuning_partitions(&VectorIndex::hnsw(), &tuned).unwrap_err();
        assert!(matches!(err, AlloyDbError::Unsupported(ref msg) if msg.contains("hnsw")));

        // An explicit size needs no partition count.
        let explicit = tuned.clone().with_maintenance_work_mem_mb(256);
        assert_eq!(tuning_partitions(&VectorIndex::hnsw(), &explicit).unwrap(), None);
        assert_eq!(
            tuning_partitions(&VectorIndex::hnsw(), &ApplyOptions::new()).unwrap(),
            None
        );
    }

    #[test]
    fn tuning_partitions_per_family() {
        let tuned = ApplyOptions::new().with_tuned_memory();
        assert_eq!(tuning_partitions(&VectorIndex::ivfflat(), &tuned).unwrap(), Some(100));
        assert_eq!(tuning_partitions(&VectorIndex::ivf(), &tuned).unwrap(), Some(100));
        assert_eq!(tuning_partitions(&VectorIndex::scann(), &tuned).unwrap(), Some(5));
    }

    #[test]
    fn non_database_errors_pass_through() {
        let err = map_sqlstate(
            sqlx::Error::RowNotFound,
            &[DUPLICATE_OBJECT],
            AlloyDbError::IndexExists("i".into()),
        );
        assert!(matches!(err, AlloyDbError::Database(sqlx::Error::RowNotFound)));
    }
}
