use pgvector::Vector;
use serde_json::Value;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};
use synaptic_core::Document;
use uuid::Uuid;

use crate::config::VectorStoreConfig;
use crate::error::AlloyDbError;
use crate::filters::{as_text, MetadataFilters};
use crate::indexes::DistanceStrategy;
use crate::node::Node;
use crate::schema::TableColumns;
use crate::sql::{quote_ident, TableRef};

/// PostgreSQL caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// A nearest-neighbor query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreQuery {
    pub embedding: Vec<f32>,
    pub k: usize,
    pub filters: Option<MetadataFilters>,
    /// Ranking strategy. `None` uses the store's configured strategy.
    pub distance_strategy: Option<DistanceStrategy>,
}

impl VectorStoreQuery {
    pub fn new(embedding: Vec<f32>, k: usize) -> Self {
        Self {
            embedding,
            k,
            filters: None,
            distance_strategy: None,
        }
    }

    pub fn with_filters(mut self, filters: impl Into<MetadataFilters>) -> Self {
        self.filters = Some(filters.into());
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = Some(strategy);
        self
    }
}

/// Nodes ordered from nearest to farthest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorStoreQueryResult {
    pub nodes: Vec<Node>,
    pub ids: Vec<String>,
    /// Raw operator distances, ascending.
    pub distances: Vec<f64>,
    /// Strategy the query was ranked with.
    pub distance_strategy: DistanceStrategy,
}

impl VectorStoreQueryResult {
    /// Distances converted to scores where higher means more similar.
    pub fn similarities(&self) -> Vec<f32> {
        self.distances
            .iter()
            .map(|d| self.distance_strategy.similarity(*d))
            .collect()
    }

    pub fn into_scored_documents(self) -> Vec<(Document, f32)> {
        let scores = self.similarities();
        self.nodes
            .into_iter()
            .map(Node::into_document)
            .zip(scores)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StoreCore
// ---------------------------------------------------------------------------

/// All SQL behind both store façades. Built only after the table layout has
/// been validated.
pub(crate) struct StoreCore {
    pub(crate) pool: PgPool,
    pub(crate) config: VectorStoreConfig,
    pub(crate) table: TableRef,
    id_type: String,
    ref_doc_id_type: String,
    /// Extracted metadata columns with their catalog type names.
    metadata_columns: Vec<(String, String)>,
}

impl StoreCore {
    /// Read the table's column catalog once and check it against `config`.
    pub(crate) async fn create(
        pool: PgPool,
        config: VectorStoreConfig,
    ) -> Result<Self, AlloyDbError> {
        config.validate_identifiers()?;
        let table = config.table();
        let columns = TableColumns::fetch(&pool, &table).await?;
        columns.validate(&config)?;

        let udt = |column: &str| {
            columns
                .get(column)
                .map(|t| t.udt_name.clone())
                .unwrap_or_else(|| "text".to_string())
        };
        let id_type = udt(&config.id_column);
        let ref_doc_id_type = udt(&config.ref_doc_id_column);
        let metadata_columns = config
            .metadata_columns
            .iter()
            .map(|c| (c.clone(), udt(c)))
            .collect();

        tracing::info!("AlloyDbVectorStore: validated table {}", table.qualified());
        Ok(Self {
            pool,
            config,
            table,
            id_type,
            ref_doc_id_type,
            metadata_columns,
        })
    }

    fn column(&self, name: &str) -> String {
        quote_ident(name)
    }

    /// Insert `nodes` in one transaction and return their ids in input order.
    pub(crate) async fn add(&self, nodes: Vec<Node>) -> Result<Vec<String>, AlloyDbError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(node) = nodes.iter().find(|n| n.embedding.is_none()) {
            return Err(AlloyDbError::MissingEmbedding(node.id.clone()));
        }

        let mut ids = Vec::with_capacity(nodes.len());
        let mut rows = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            if node.id.is_empty() {
                node.id = Uuid::new_v4().to_string();
            }
            ids.push(node.id.clone());
            rows.push(InsertRow::new(node, &self.metadata_columns)?);
        }

        let mut column_names = vec![
            self.column(&self.config.id_column),
            self.column(&self.config.text_column),
            self.column(&self.config.embedding_column),
            self.column(&self.config.metadata_json_column),
            self.column(&self.config.ref_doc_id_column),
            self.column(&self.config.node_column),
        ];
        column_names.extend(self.metadata_columns.iter().map(|(c, _)| self.column(c)));
        let insert = format!(
            "INSERT INTO {} ({}) ",
            self.table.qualified(),
            column_names.join(", ")
        );
        let rows_per_statement = (MAX_BIND_PARAMS / column_names.len()).max(1);

        let mut tx = self.pool.begin().await?;
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<InsertRow> = rows.by_ref().take(rows_per_statement).collect();
            let mut qb = QueryBuilder::<Postgres>::new(&insert);
            qb.push_values(chunk, |mut b, row| {
                b.push("CAST(")
                    .push_bind_unseparated(row.id)
                    .push_unseparated(cast_close(&self.id_type));
                b.push_bind(row.text);
                b.push_bind(row.embedding);
                b.push("CAST(")
                    .push_bind_unseparated(row.metadata)
                    .push_unseparated(" AS jsonb)");
                b.push("CAST(")
                    .push_bind_unseparated(row.ref_doc_id)
                    .push_unseparated(cast_close(&self.ref_doc_id_type));
                b.push("CAST(")
                    .push_bind_unseparated(row.node)
                    .push_unseparated(" AS json)");
                for (value, (_, ty)) in row.extracted.into_iter().zip(&self.metadata_columns) {
                    b.push("CAST(")
                        .push_bind_unseparated(value)
                        .push_unseparated(cast_close(ty));
                }
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::debug!("AlloyDbVectorStore: inserted {} nodes", ids.len());
        Ok(ids)
    }

    /// Delete every node whose parent document is `ref_doc_id`.
    pub(crate) async fn delete(&self, ref_doc_id: &str) -> Result<u64, AlloyDbError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = CAST($1 AS {})",
            self.table.qualified(),
            self.column(&self.config.ref_doc_id_column),
            quote_ident(&self.ref_doc_id_type),
        );
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(&sql).bind(ref_doc_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Delete nodes matching the id list and/or the metadata filters.
    ///
    /// With neither given nothing is deleted; use `clear` to empty the table.
    pub(crate) async fn delete_nodes(
        &self,
        node_ids: Option<Vec<String>>,
        filters: Option<MetadataFilters>,
    ) -> Result<u64, AlloyDbError> {
        if node_ids.is_none() && filters.is_none() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "DELETE FROM {} WHERE ",
            self.table.qualified()
        ));
        self.push_selection(&mut qb, node_ids, filters.as_ref());

        let mut tx = self.pool.begin().await?;
        let result = qb.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Fetch nodes matching the id list and/or the metadata filters; all
    /// nodes when neither is given.
    pub(crate) async fn get_nodes(
        &self,
        node_ids: Option<Vec<String>>,
        filters: Option<MetadataFilters>,
    ) -> Result<Vec<Node>, AlloyDbError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {}",
            self.column(&self.config.node_column),
            self.table.qualified()
        ));
        if node_ids.is_some() || filters.is_some() {
            qb.push(" WHERE ");
            self.push_selection(&mut qb, node_ids, filters.as_ref());
        }
        let rows: Vec<Value> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|v| serde_json::from_value(v).map_err(AlloyDbError::from))
            .collect()
    }

    /// Remove every row.
    pub(crate) async fn clear(&self) -> Result<(), AlloyDbError> {
        let sql = format!("TRUNCATE TABLE {}", self.table.qualified());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Nearest-neighbor search ranked by the query's (or the store's)
    /// distance strategy.
    pub(crate) async fn query(
        &self,
        query: VectorStoreQuery,
    ) -> Result<VectorStoreQueryResult, AlloyDbError> {
        let strategy = query
            .distance_strategy
            .unwrap_or(self.config.distance_strategy);
        if query.k == 0 {
            return Ok(VectorStoreQueryResult {
                distance_strategy: strategy,
                ..Default::default()
            });
        }

        let embedding_column = self.column(&self.config.embedding_column);
        let distance = format!("{embedding_column} {} ", strategy.operator());
        let embedding = Vector::from(query.embedding);

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {}, (",
            self.column(&self.config.node_column)
        ));
        qb.push(&distance);
        qb.push_bind(embedding.clone());
        qb.push(format!(") AS distance FROM {}", self.table.qualified()));
        if let Some(filters) = &query.filters {
            qb.push(" WHERE ");
            filters.push_predicate(&mut qb, &self.column(&self.config.metadata_json_column));
        }
        qb.push(" ORDER BY ");
        qb.push(&distance);
        qb.push_bind(embedding);
        qb.push(" LIMIT ");
        qb.push_bind(query.k as i64);

        let mut tx = self.pool.begin().await?;
        if let Some(options) = &self.config.index_query_options {
            for stmt in options.set_local_statements() {
                (&mut *tx).execute(sqlx::raw_sql(&stmt)).await?;
            }
        }
        let rows: Vec<(Value, f64)> = qb.build_query_as().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let mut result = VectorStoreQueryResult {
            distance_strategy: strategy,
            ..Default::default()
        };
        for (node, distance) in rows {
            let node: Node = serde_json::from_value(node)?;
            result.ids.push(node.id.clone());
            result.nodes.push(node);
            result.distances.push(distance);
        }
        Ok(result)
    }

    fn push_selection(
        &self,
        qb: &mut QueryBuilder<'_, Postgres>,
        node_ids: Option<Vec<String>>,
        filters: Option<&MetadataFilters>,
    ) {
        let has_ids = node_ids.is_some();
        if let Some(ids) = node_ids {
            qb.push(format!(
                "{} = ANY(CAST(",
                self.column(&self.config.id_column)
            ));
            qb.push_bind(ids);
            qb.push(format!(" AS {}[]))", quote_ident(&self.id_type)));
        }
        if let Some(filters) = filters {
            if has_ids {
                qb.push(" AND ");
            }
            filters.push_predicate(qb, &self.column(&self.config.metadata_json_column));
        }
    }
}

fn cast_close(ty: &str) -> String {
    format!(" AS {})", quote_ident(ty))
}

/// Bind values for one inserted node.
struct InsertRow {
    id: String,
    text: String,
    embedding: Vector,
    metadata: Value,
    ref_doc_id: Option<String>,
    node: Value,
    extracted: Vec<Option<String>>,
}

impl InsertRow {
    fn new(node: Node, metadata_columns: &[(String, String)]) -> Result<Self, AlloyDbError> {
        let serialized = serde_json::to_value(&node)?;
        let metadata = serde_json::to_value(&node.metadata)?;
        let extracted = metadata_columns
            .iter()
            .map(|(column, _)| match node.metadata.get(column) {
                None | Some(Value::Null) => None,
                Some(value) => Some(as_text(value)),
            })
            .collect();
        let embedding = node
            .embedding
            .ok_or_else(|| AlloyDbError::MissingEmbedding(node.id.clone()))?;
        Ok(Self {
            id: node.id,
            text: node.text,
            embedding: Vector::from(embedding),
            metadata,
            ref_doc_id: node.ref_doc_id,
            node: serialized,
            extracted,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn insert_row_pulls_extracted_columns_by_name() {
        let node = Node::new("n1", "hello")
            .with_embedding(vec![1.0, 2.0])
            .with_metadata_entry("page", 3)
            .with_metadata_entry("source", "google.com")
            .with_metadata_entry("empty", Value::Null)
            .with_ref_doc_id("doc");
        let columns = vec![
            ("source".to_string(), "varchar".to_string()),
            ("page".to_string(), "int4".to_string()),
            ("missing".to_string(), "text".to_string()),
            ("empty".to_string(), "text".to_string()),
        ];
        let row = InsertRow::new(node, &columns).unwrap();
        assert_eq!(
            row.extracted,
            vec![Some("google.com".to_string()), Some("3".to_string()), None, None]
        );
        assert_eq!(row.ref_doc_id.as_deref(), Some("doc"));
        assert_eq!(row.metadata["page"], json!(3));
        assert_eq!(row.node["id"], json!("n1"));
        assert_eq!(row.node["embedding"], json!([1.0, 2.0]));
        assert_eq!(row.embedding.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn insert_row_requires_embedding() {
        let err = InsertRow::new(Node::new("n1", "x"), &[]).err().unwrap();
        assert!(matches!(err, AlloyDbError::MissingEmbedding(ref id) if id == "n1"));
    }

    #[test]
    fn query_result_scores() {
        let result = VectorStoreQueryResult {
            nodes: vec![Node::new("a", "x"), Node::new("b", "y")],
            ids: vec!["a".into(), "b".into()],
            distances: vec![0.0, 0.5],
            distance_strategy: DistanceStrategy::CosineDistance,
        };
        assert_eq!(result.similarities(), vec![1.0, 0.5]);
        let docs = result.into_scored_documents();
        assert_eq!(docs[0].0.id, "a");
        assert_eq!(docs[1].1, 0.5);
    }

    #[test]
    fn query_builder_defaults() {
        let query = VectorStoreQuery::new(vec![1.0; 5], 5);
        assert_eq!(query.k, 5);
        assert!(query.filters.is_none());
        assert!(query.distance_strategy.is_none());
        let query = query.with_distance_strategy(DistanceStrategy::Euclidean);
        assert_eq!(query.distance_strategy, Some(DistanceStrategy::Euclidean));
    }
}
