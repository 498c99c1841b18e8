//! Column introspection and the common-column projection used to copy rows
//! between the old and new shape of a rebuilt table.

use sqlx::SqliteConnection;

use crate::error::{MigrateError, Result};

/// A column of a table, as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Zero-based position in the table definition.
    pub position: i64,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, position: i64) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }
}

/// Columns of `table` in `schema`, in declaration order.
pub async fn table_columns(
    conn: &mut SqliteConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    sqlx::query_as::<_, ColumnDescriptor>(
        "SELECT name, cid AS position FROM pragma_table_info(?1, ?2) ORDER BY cid",
    )
    .bind(table)
    .bind(schema)
    .persistent(false)
    .fetch_all(&mut *conn)
    .await
    .map_err(MigrateError::catalog(schema))
}

/// Names present in both column sets, ordered as in `new`.
///
/// Matching is by name only: a renamed column is indistinguishable from a
/// dropped one plus an added one, and its data is not carried over.
pub fn common_columns(old: &[ColumnDescriptor], new: &[ColumnDescriptor]) -> Vec<String> {
    let mut new = new.iter().collect::<Vec<_>>();
    new.sort_by_key(|c| c.position);

    new.into_iter()
        .filter(|n| old.iter().any(|o| o.name == n.name))
        .map(|c| c.name.to_owned())
        .collect()
}

/// Quote an identifier so reserved words and odd characters stay valid.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Comma separated, quoted column list.
pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| ColumnDescriptor::new(*n, i as i64))
            .collect()
    }

    #[test]
    fn keeps_new_declaration_order() {
        let old = columns(&["id", "name", "email"]);
        let new = columns(&["email", "id", "created_at", "name"]);

        assert_eq!(common_columns(&old, &new), vec!["email", "id", "name"]);
    }

    #[test]
    fn dropped_and_added_columns_are_excluded() {
        let old = columns(&["id", "legacy"]);
        let new = columns(&["id", "fresh"]);

        assert_eq!(common_columns(&old, &new), vec!["id"]);
    }

    #[test]
    fn rename_loses_the_column() {
        let old = columns(&["id", "title"]);
        let new = columns(&["id", "name"]);

        assert_eq!(common_columns(&old, &new), vec!["id"]);
    }

    #[test]
    fn nothing_in_common() {
        assert!(common_columns(&columns(&["a"]), &columns(&["b"])).is_empty());
    }

    #[test]
    fn quotes_reserved_words_and_embedded_quotes() {
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            column_list(&["group".to_owned(), "id".to_owned()]),
            "\"group\", \"id\""
        );
    }
}
