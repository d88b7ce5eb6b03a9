use crate::error::AlloyDbError;

/// Validate that an identifier is safe to interpolate into SQL.
///
/// Allows ASCII alphanumerics and underscores. Identifiers are additionally
/// double-quoted wherever they are emitted, so this only has to keep out
/// characters that would need escaping.
pub(crate) fn validate_identifier(kind: &str, name: &str) -> Result<(), AlloyDbError> {
    if name.is_empty() {
        return Err(AlloyDbError::Config(format!("{kind} name must not be empty")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AlloyDbError::Config(format!(
            "invalid {kind} name '{name}': only alphanumeric and underscore characters are allowed",
        )));
    }
    Ok(())
}

/// Double-quote an identifier, doubling any embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), AlloyDbError> {
        validate_identifier("schema", &self.schema)?;
        validate_identifier("table", &self.table)
    }

    /// `"schema"."table"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}
