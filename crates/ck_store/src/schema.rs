//! Collection declarations.
//!
//! A collection is declared once with its primary-key field and any
//! secondary indices; `Database::initialize` turns the declaration into
//! `CREATE TABLE / CREATE INDEX IF NOT EXISTS` statements.

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    /// Top-level document field the index covers.
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    /// Top-level document field holding the (string) primary key.
    pub primary_key: String,
    pub indices: Vec<IndexSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            indices: Vec::new(),
        }
    }

    /// Add a non-unique secondary index on `field`.
    pub fn with_index(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.indices.push(IndexSchema {
            name: name.into(),
            field: field.into(),
        });
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indices.iter().find(|i| i.name == name)
    }

    /// Names are spliced into SQL, so they are restricted to `[A-Za-z0-9_]`.
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        check_identifier("collection", &self.name)?;
        check_identifier("primary key", &self.primary_key)?;
        for index in &self.indices {
            check_identifier("index", &index.name)?;
            check_identifier("index field", &index.field)?;
        }
        Ok(())
    }

    pub(crate) fn table(&self) -> String {
        format!("\"{}\"", self.name)
    }

    pub(crate) fn index_name(&self, index: &IndexSchema) -> String {
        format!("\"{}_{}\"", self.name, index.name)
    }

    pub(crate) fn create_statements(&self) -> Vec<String> {
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (pk TEXT PRIMARY KEY NOT NULL, doc TEXT NOT NULL)",
            self.table()
        )];
        for index in &self.indices {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                self.index_name(index),
                self.table(),
                field_expr(&index.field)
            ));
        }
        statements
    }
}

/// SQL expression for a top-level document field. Must match the index
/// expression exactly for SQLite to use the index.
pub(crate) fn field_expr(field: &str) -> String {
    format!("json_extract(doc, '$.{field}')")
}

pub(crate) fn check_identifier(what: &str, value: &str) -> Result<(), StoreError> {
    let valid = !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StoreError::Schema(format!("invalid {what} name: {value:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_table_and_index_statements() {
        let schema = CollectionSchema::new("user_keys", "user").with_index("by_created_at", "createdAt");
        schema.validate().unwrap();
        let sql = schema.create_statements();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("CREATE TABLE IF NOT EXISTS \"user_keys\""));
        assert!(sql[1].contains("\"user_keys_by_created_at\""));
        assert!(sql[1].contains("json_extract(doc, '$.createdAt')"));
    }

    #[test]
    fn rejects_sql_in_names() {
        let schema = CollectionSchema::new("keys; DROP TABLE x", "user");
        assert!(matches!(schema.validate(), Err(StoreError::Schema(_))));

        let schema = CollectionSchema::new("keys", "user").with_index("i", "a') OR 1=1 --");
        assert!(matches!(schema.validate(), Err(StoreError::Schema(_))));
    }
}
