use crate::error::AlloyDbError;
use crate::indexes::{DistanceStrategy, IndexQueryOptions};
use crate::sql::{validate_identifier, TableRef};

/// Column mapping and search defaults for an AlloyDB vector store table.
///
/// Column names are configurable but each column's role is fixed. The table
/// must already exist; [`create`](crate::AsyncAlloyDbVectorStore::create)
/// checks its layout against this config before returning a store.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Name of the existing table.
    pub table_name: String,
    /// Database schema holding the table. Defaults to `public`.
    pub schema_name: String,
    /// Node id column. Defaults to `node_id`.
    pub id_column: String,
    /// Text content column, any character string type. Defaults to `text`.
    pub text_column: String,
    /// Embedding column of type `vector`. Defaults to `embedding`.
    pub embedding_column: String,
    /// Metadata column of type `jsonb`. Defaults to `li_metadata`.
    pub metadata_json_column: String,
    /// Metadata keys extracted into their own columns on insert.
    pub metadata_columns: Vec<String>,
    /// Parent document id column. Defaults to `ref_doc_id`.
    pub ref_doc_id_column: String,
    /// Whole serialized node, type `json`. Defaults to `node`.
    pub node_column: String,
    /// Strategy used to rank queries. Indexes should be built with the same one.
    pub distance_strategy: DistanceStrategy,
    /// Session options applied before every query (probes, ef_search, ...).
    pub index_query_options: Option<IndexQueryOptions>,
}

impl VectorStoreConfig {
    /// Create a config for `table_name` with the default column names.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: "public".to_string(),
            id_column: "node_id".to_string(),
            text_column: "text".to_string(),
            embedding_column: "embedding".to_string(),
            metadata_json_column: "li_metadata".to_string(),
            metadata_columns: Vec::new(),
            ref_doc_id_column: "ref_doc_id".to_string(),
            node_column: "node".to_string(),
            distance_strategy: DistanceStrategy::default(),
            index_query_options: None,
        }
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_text_column(mut self, column: impl Into<String>) -> Self {
        self.text_column = column.into();
        self
    }

    pub fn with_embedding_column(mut self, column: impl Into<String>) -> Self {
        self.embedding_column = column.into();
        self
    }

    pub fn with_metadata_json_column(mut self, column: impl Into<String>) -> Self {
        self.metadata_json_column = column.into();
        self
    }

    pub fn with_metadata_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ref_doc_id_column(mut self, column: impl Into<String>) -> Self {
        self.ref_doc_id_column = column.into();
        self
    }

    pub fn with_node_column(mut self, column: impl Into<String>) -> Self {
        self.node_column = column.into();
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_index_query_options(mut self, options: IndexQueryOptions) -> Self {
        self.index_query_options = Some(options);
        self
    }

    pub fn table(&self) -> TableRef {
        TableRef::new(&self.schema_name, &self.table_name)
    }

    /// Reject identifiers that cannot be safely embedded in SQL.
    pub(crate) fn validate_identifiers(&self) -> Result<(), AlloyDbError> {
        self.table().validate()?;
        for column in [
            &self.id_column,
            &self.text_column,
            &self.embedding_column,
            &self.metadata_json_column,
            &self.ref_doc_id_column,
            &self.node_column,
        ]
        .into_iter()
        .chain(&self.metadata_columns)
        {
            validate_identifier("column", column)?;
        }
        Ok(())
    }
}
