//! Just enough parsing of `CREATE TABLE` statements to find and replace the
//! table name.

use crate::columns::quote_ident;

/// Rewrite the name in a `CREATE TABLE [IF NOT EXISTS] <name> ...` statement.
///
/// The name may be bare or quoted with `"`, `` ` ``, `'` or `[...]`. Returns
/// `None` when the statement does not have that shape.
pub(crate) fn rename_definition(sql: &str, new_name: &str) -> Option<String> {
    let mut pos = keyword(sql, 0, "CREATE")?;
    pos = keyword(sql, pos, "TABLE")?;

    if let Some(after_if) = keyword(sql, pos, "IF") {
        pos = keyword(sql, after_if, "NOT")?;
        pos = keyword(sql, pos, "EXISTS")?;
    }

    let start = skip_whitespace(sql, pos);
    let end = identifier_end(sql, start)?;

    Some(format!(
        "{}{}{}",
        &sql[..start],
        quote_ident(new_name),
        &sql[end..]
    ))
}

/// Whether `sql` is a `CREATE VIRTUAL TABLE` statement.
pub(crate) fn is_virtual_table(sql: &str) -> bool {
    keyword(sql, 0, "CREATE")
        .and_then(|pos| keyword(sql, pos, "VIRTUAL"))
        .is_some()
}

fn skip_whitespace(sql: &str, pos: usize) -> usize {
    sql[pos..]
        .find(|c: char| !c.is_whitespace())
        .map_or(sql.len(), |offset| pos + offset)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Position after `word` if it is the next token at `pos`.
fn keyword(sql: &str, pos: usize, word: &str) -> Option<usize> {
    let start = skip_whitespace(sql, pos);
    let end = start + word.len();
    let candidate = sql.get(start..end)?;

    if !candidate.eq_ignore_ascii_case(word) {
        return None;
    }

    match sql[end..].chars().next() {
        Some(c) if is_identifier_char(c) => None,
        _ => Some(end),
    }
}

fn identifier_end(sql: &str, start: usize) -> Option<usize> {
    let bytes = sql.as_bytes();

    match *bytes.get(start)? {
        quote @ (b'"' | b'`' | b'\'') => {
            let mut i = start + 1;
            loop {
                if *bytes.get(i)? == quote {
                    if bytes.get(i + 1) == Some(&quote) {
                        i += 2;
                        continue;
                    }
                    return Some(i + 1);
                }
                i += 1;
            }
        }
        b'[' => sql[start..].find(']').map(|offset| start + offset + 1),
        _ => {
            let len = sql[start..]
                .find(|c: char| !is_identifier_char(c))
                .unwrap_or(sql.len() - start);

            (len > 0).then_some(start + len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_bare_table_name() {
        assert_eq!(
            rename_definition("CREATE TABLE user (id INTEGER)", "_tmp_user").as_deref(),
            Some(r#"CREATE TABLE "_tmp_user" (id INTEGER)"#)
        );
    }

    #[test]
    fn renames_name_without_space_before_columns() {
        assert_eq!(
            rename_definition("CREATE TABLE t(id)", "n").as_deref(),
            Some(r#"CREATE TABLE "n"(id)"#)
        );
    }

    #[test]
    fn renames_quoted_names() {
        assert_eq!(
            rename_definition(r#"CREATE TABLE "order" (id)"#, "n").as_deref(),
            Some(r#"CREATE TABLE "n" (id)"#)
        );
        assert_eq!(
            rename_definition(r#"CREATE TABLE "we""ird" (id)"#, "n").as_deref(),
            Some(r#"CREATE TABLE "n" (id)"#)
        );
        assert_eq!(
            rename_definition("CREATE TABLE `t` (id)", "n").as_deref(),
            Some(r#"CREATE TABLE "n" (id)"#)
        );
        assert_eq!(
            rename_definition("CREATE TABLE [my table] (id)", "n").as_deref(),
            Some(r#"CREATE TABLE "n" (id)"#)
        );
    }

    #[test]
    fn renames_after_if_not_exists() {
        assert_eq!(
            rename_definition("create table if not exists t (id)", "n").as_deref(),
            Some(r#"create table if not exists "n" (id)"#)
        );
    }

    #[test]
    fn table_named_like_a_keyword_prefix() {
        assert_eq!(
            rename_definition("CREATE TABLE ifs (id)", "n").as_deref(),
            Some(r#"CREATE TABLE "n" (id)"#)
        );
    }

    #[test]
    fn detects_virtual_tables() {
        assert!(is_virtual_table("CREATE VIRTUAL TABLE docs USING fts5(body)"));
        assert!(is_virtual_table("create  virtual table docs using fts5(body)"));
        assert!(!is_virtual_table("CREATE TABLE virtual (id)"));
        assert!(rename_definition("CREATE VIRTUAL TABLE docs USING fts5(body)", "n").is_none());
    }

    #[test]
    fn rejects_other_statements() {
        assert!(rename_definition("CREATE INDEX ix ON t(id)", "n").is_none());
        assert!(rename_definition("CREATE TABLE", "n").is_none());
    }
}
