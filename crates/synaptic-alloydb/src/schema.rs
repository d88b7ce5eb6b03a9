use std::collections::HashMap;

use sqlx::PgPool;

use crate::config::VectorStoreConfig;
use crate::error::AlloyDbError;
use crate::sql::TableRef;

/// Declared type of a column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// SQL standard type name (`text`, `jsonb`, `USER-DEFINED`, ...).
    pub data_type: String,
    /// Underlying type name (`varchar`, `int4`, `vector`, ...).
    pub udt_name: String,
}

impl ColumnType {
    pub fn new(data_type: impl Into<String>, udt_name: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            udt_name: udt_name.into(),
        }
    }

    fn is_character_string(&self) -> bool {
        self.data_type == "text" || self.data_type.contains("char")
    }

    fn is_vector(&self) -> bool {
        self.data_type == "USER-DEFINED" && self.udt_name == "vector"
    }
}

/// Snapshot of a table's column catalog.
#[derive(Debug, Clone, Default)]
pub struct TableColumns {
    columns: HashMap<String, ColumnType>,
}

impl TableColumns {
    /// Read the column catalog for `table` in one query.
    pub async fn fetch(pool: &PgPool, table: &TableRef) -> Result<Self, AlloyDbError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"SELECT column_name::text, data_type::text, udt_name::text
               FROM information_schema.columns
               WHERE table_name = $1 AND table_schema = $2"#,
        )
        .bind(&table.table)
        .bind(&table.schema)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, udt_name)| (name, ColumnType::new(data_type, udt_name)))
            .collect())
    }

    pub fn get(&self, column: &str) -> Option<&ColumnType> {
        self.columns.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check that every column role in `config` is present with a usable type.
    ///
    /// Stops at the first violation; the error names the role and the column.
    pub fn validate(&self, config: &VectorStoreConfig) -> Result<(), AlloyDbError> {
        self.require("Id", &config.id_column)?;

        let text = self.require("Text", &config.text_column)?;
        if !text.is_character_string() {
            return Err(AlloyDbError::Config(format!(
                "Text column, {}, is type, {}. It must be a type of character string.",
                config.text_column, text.data_type,
            )));
        }

        let embedding = self.require("Embedding", &config.embedding_column)?;
        if !embedding.is_vector() {
            return Err(AlloyDbError::Config(format!(
                "Embedding column, {}, is not type Vector.",
                config.embedding_column,
            )));
        }

        let node = self.require("Node", &config.node_column)?;
        if node.data_type != "json" {
            return Err(AlloyDbError::Config(format!(
                "Node column, {}, is not type JSON.",
                config.node_column,
            )));
        }

        self.require("Reference Document Id", &config.ref_doc_id_column)?;

        let metadata = self.require("Metadata", &config.metadata_json_column)?;
        if metadata.data_type != "jsonb" {
            return Err(AlloyDbError::Config(format!(
                "Metadata column, {}, is not type JSONB.",
                config.metadata_json_column,
            )));
        }

        for column in &config.metadata_columns {
            self.require("Metadata", column)?;
        }
        Ok(())
    }

    fn require(&self, role: &str, column: &str) -> Result<&ColumnType, AlloyDbError> {
        self.columns.get(column).ok_or_else(|| {
            AlloyDbError::Config(format!("{role} column, {column}, does not exist."))
        })
    }
}

impl FromIterator<(String, ColumnType)> for TableColumns {
    fn from_iter<I: IntoIterator<Item = (String, ColumnType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_columns() -> Vec<(String, ColumnType)> {
        vec![
            ("node_id".into(), ColumnType::new("uuid", "uuid")),
            ("text".into(), ColumnType::new("text", "text")),
            ("embedding".into(), ColumnType::new("USER-DEFINED", "vector")),
            ("li_metadata".into(), ColumnType::new("jsonb", "jsonb")),
            ("ref_doc_id".into(), ColumnType::new("character varying", "varchar")),
            ("node".into(), ColumnType::new("json", "json")),
            ("page".into(), ColumnType::new("integer", "int4")),
        ]
    }

    fn without(column: &str) -> TableColumns {
        valid_columns()
            .into_iter()
            .filter(|(name, _)| name != column)
            .collect()
    }

    fn replacing(column: &str, ty: ColumnType) -> TableColumns {
        valid_columns()
            .into_iter()
            .map(|(name, t)| if name == column { (name, ty.clone()) } else { (name, t) })
            .collect()
    }

    fn config_message(result: Result<(), AlloyDbError>) -> String {
        match result {
            Err(AlloyDbError::Config(msg)) => msg,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn valid_table_passes() {
        let columns: TableColumns = valid_columns().into_iter().collect();
        let config = VectorStoreConfig::new("docs").with_metadata_columns(["page"]);
        assert!(columns.validate(&config).is_ok());
    }

    #[test]
    fn varchar_text_column_passes() {
        let columns = replacing("text", ColumnType::new("character varying", "varchar"));
        assert!(columns.validate(&VectorStoreConfig::new("docs")).is_ok());
    }

    #[test]
    fn each_missing_required_column_is_named() {
        let config = VectorStoreConfig::new("docs");
        let cases = [
            ("node_id", "Id column, node_id, does not exist."),
            ("text", "Text column, text, does not exist."),
            ("embedding", "Embedding column, embedding, does not exist."),
            ("node", "Node column, node, does not exist."),
            ("ref_doc_id", "Reference Document Id column, ref_doc_id, does not exist."),
            ("li_metadata", "Metadata column, li_metadata, does not exist."),
        ];
        for (column, expected) in cases {
            assert_eq!(config_message(without(column).validate(&config)), expected);
        }
    }

    #[test]
    fn wrong_types_are_named() {
        let config = VectorStoreConfig::new("docs");

        let msg = config_message(
            replacing("text", ColumnType::new("integer", "int4")).validate(&config),
        );
        assert_eq!(
            msg,
            "Text column, text, is type, integer. It must be a type of character string."
        );

        let msg = config_message(
            replacing("embedding", ColumnType::new("ARRAY", "_float4")).validate(&config),
        );
        assert_eq!(msg, "Embedding column, embedding, is not type Vector.");

        let msg =
            config_message(replacing("node", ColumnType::new("jsonb", "jsonb")).validate(&config));
        assert_eq!(msg, "Node column, node, is not type JSON.");

        let msg = config_message(
            replacing("li_metadata", ColumnType::new("json", "json")).validate(&config),
        );
        assert_eq!(msg, "Metadata column, li_metadata, is not type JSONB.");
    }

    #[test]
    fn user_defined_non_vector_embedding_is_rejected() {
        let columns = replacing("embedding", ColumnType::new("USER-DEFINED", "halfvec"));
        assert!(columns.validate(&VectorStoreConfig::new("docs")).is_err());
    }

    #[test]
    fn missing_extracted_metadata_column_is_named() {
        let columns: TableColumns = valid_columns().into_iter().collect();
        let config = VectorStoreConfig::new("docs").with_metadata_columns(["page", "source"]);
        assert_eq!(
            config_message(columns.validate(&config)),
            "Metadata column, source, does not exist."
        );
    }

    #[test]
    fn first_violation_wins() {
        let columns = TableColumns::default();
        assert!(columns.is_empty());
        assert_eq!(
            config_message(columns.validate(&VectorStoreConfig::new("docs"))),
            "Id column, node_id, does not exist."
        );
    }

    #[test]
    fn renamed_columns_are_checked_by_configured_name() {
        let columns: TableColumns = valid_columns().into_iter().collect();
        let config = VectorStoreConfig::new("docs").with_id_column("id");
        assert_eq!(
            config_message(columns.validate(&config)),
            "Id column, id, does not exist."
        );
    }
}
