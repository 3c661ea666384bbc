//! Recognition of the narrow `UPDATE <table> SET ... [WHERE ...]` shape and
//! rewriting it into one range-bounded statement per transaction unit.
//!
//! Shape checks are pattern matches. Clause detection for the rewrite is a
//! small lexical scan: quoted strings, quoted identifiers, comments and
//! parenthesized subqueries are skipped, so only the statement's own `WHERE`
//! and `ORDER BY` are found.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SplitError;

static UPDATE_SHAPE_RE: OnceLock<Regex> = OnceLock::new();
static UPDATE_TARGET_RE: OnceLock<Regex> = OnceLock::new();
static LIMIT_TAIL_RE: OnceLock<Regex> = OnceLock::new();

/// A validated single-table update statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    /// Statement text without surrounding whitespace or semicolons.
    pub query: String,
    /// Target table exactly as written in the statement.
    pub table: String,
}

impl UpdateStatement {
    /// Validates `query` before any database introspection happens.
    ///
    /// Rejects anything that is not `UPDATE <table> SET ...`, statements that
    /// end in a `LIMIT` clause, and multi-table targets.
    pub fn parse(query: &str) -> Result<Self, SplitError> {
        let query = trim_statement(query);
        if !is_update_statement(query) {
            return Err(SplitError::invalid_statement(
                "statement must start with 'UPDATE <table> SET ...'",
            ));
        }
        if has_limit_clause(query) {
            return Err(SplitError::invalid_statement(
                "statement has a LIMIT clause and cannot be split",
            ));
        }
        let Some(table) = update_target_table(query) else {
            return Err(SplitError::invalid_statement(
                "statement must update exactly one table: 'UPDATE <table> SET ...'",
            ));
        };
        Ok(Self {
            query: query.to_string(),
            table,
        })
    }
}

/// Strips surrounding whitespace and statement terminators.
pub fn trim_statement(query: &str) -> &str {
    query.trim_matches(|c: char| c.is_whitespace() || c == ';')
}

/// Returns `true` when `sql` looks like `UPDATE <target> SET <assignments>`.
pub fn is_update_statement(sql: &str) -> bool {
    UPDATE_SHAPE_RE
        .get_or_init(|| Regex::new(r"(?is)^\s*update\s+.+\s+set\s.+$").expect("valid regex"))
        .is_match(sql)
}

/// Returns `true` when `sql` ends with a row-limiting `LIMIT <n>` clause.
pub fn has_limit_clause(sql: &str) -> bool {
    LIMIT_TAIL_RE
        .get_or_init(|| Regex::new(r"(?is)^\s*.+\blimit\s+[0-9]+\s*;?\s*$").expect("valid regex"))
        .is_match(sql)
}

/// Resolves the single table targeted by an update statement.
///
/// Returns `None` for multi-table targets (`UPDATE a, b SET ...`) and for
/// targets carrying aliases or joins, none of which can be split safely.
pub fn update_target_table(sql: &str) -> Option<String> {
    let captures = UPDATE_TARGET_RE
        .get_or_init(|| Regex::new(r"(?is)^\s*update\s+(.+?)\s+set\s").expect("valid regex"))
        .captures(sql)?;
    let target = captures.get(1)?.as_str().trim();
    if target.is_empty() || target.contains(',') || target.contains(char::is_whitespace) {
        return None;
    }
    Some(target.to_string())
}

/// Byte offsets of the top-level clauses the range rewrite cares about.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ClauseOffsets {
    where_at: Option<usize>,
    order_by_at: Option<usize>,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Index just past the quoted run opened by `bytes[open]`.
fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            b if b == quote => {
                // A doubled quote is an escaped quote.
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |pos| from + pos + 1)
}

fn skip_block_comment(bytes: &[u8], from: usize) -> usize {
    bytes[from + 2..]
        .windows(2)
        .position(|pair| pair == b"*/")
        .map_or(bytes.len(), |pos| from + 2 + pos + 2)
}

fn scan_clauses(sql: &str) -> ClauseOffsets {
    let bytes = sql.as_bytes();
    let mut offsets = ClauseOffsets::default();
    let mut depth = 0usize;
    let mut previous_word: Option<(usize, &str)> = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i),
            b'#' => i = skip_line(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && bytes.get(i + 2).map_or(true, u8::is_ascii_whitespace) =>
            {
                i = skip_line(bytes, i)
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                if depth > 0 {
                    continue;
                }
                let word = &sql[start..i];
                if word.eq_ignore_ascii_case("where") && offsets.where_at.is_none() {
                    offsets.where_at = Some(start);
                }
                if word.eq_ignore_ascii_case("by") && offsets.order_by_at.is_none() {
                    if let Some((at, prev)) = previous_word {
                        if prev.eq_ignore_ascii_case("order") {
                            offsets.order_by_at = Some(at);
                        }
                    }
                }
                previous_word = Some((start, word));
            }
            _ => i += 1,
        }
    }
    offsets
}

/// Returns `true` when `sql` carries its own top-level `WHERE` clause.
///
/// A `WHERE` inside a string literal, a quoted identifier, a comment or a
/// subquery does not count.
pub fn statement_has_where(sql: &str) -> bool {
    scan_clauses(sql).where_at.is_some()
}

/// Restricts `sql` to `column BETWEEN start AND end` for one transaction unit.
///
/// An existing predicate is parenthesized so `OR` terms stay inside the
/// range; a trailing `ORDER BY` stays last.
pub fn ranged_statement(sql: &str, column: &str, start: i64, end: i64) -> String {
    let range = format!("{} BETWEEN {start} AND {end}", quote_identifier(column));
    let offsets = scan_clauses(sql);
    let (body, order_by) = match offsets.order_by_at {
        Some(at) => (sql[..at].trim_end(), Some(&sql[at..])),
        None => (sql, None),
    };
    let mut ranged = match offsets.where_at.filter(|&at| at < body.len()) {
        Some(at) => {
            let head = body[..at].trim_end();
            let predicate = body[at + "where".len()..].trim();
            format!("{head} WHERE ({predicate}) AND {range}")
        }
        None => format!("{body} WHERE {range}"),
    };
    if let Some(order_by) = order_by {
        ranged.push(' ');
        ranged.push_str(order_by);
    }
    ranged
}

/// Quotes a MySQL identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_shape_accepts_single_and_multi_assignment_forms() {
        assert!(is_update_statement("UPDATE foo SET yo = 'hey'"));
        assert!(is_update_statement("UPDATE foo SET yo = 'hey' WHERE hey = 'yo'"));
        assert!(is_update_statement("update foo set yo = 'hey', hey = 'yo'"));
        assert!(is_update_statement("UPDATE foo\nSET yo = 1\nWHERE id > 3"));
        assert!(!is_update_statement(
            "INSERT INTO update (yo, hey) VALUES ('hey', 'yo')"
        ));
        assert!(!is_update_statement("DELETE FROM foo"));
    }

    #[test]
    fn limit_clause_only_matches_trailing_limit() {
        assert!(has_limit_clause("UPDATE foo SET yo = 'hey' LIMIT 100;"));
        assert!(has_limit_clause(
            "UPDATE foo SET yo = 'hey' WHERE hey = 'yo' limit 10"
        ));
        assert!(!has_limit_clause("update foo set yo = 'limit', hey = 'yo'"));
    }

    #[test]
    fn target_table_rejects_multi_table_updates() {
        assert_eq!(
            update_target_table("UPDATE foo SET yo = 'hey'").as_deref(),
            Some("foo")
        );
        assert_eq!(
            update_target_table("UPDATE settings SET v = 1").as_deref(),
            Some("settings")
        );
        assert_eq!(
            update_target_table("UPDATE `app`.`users` SET v = 1").as_deref(),
            Some("`app`.`users`")
        );
        assert_eq!(
            update_target_table("UPDATE items, month SET items.price=month.price WHERE items.id=month.id"),
            None
        );
        assert_eq!(
            update_target_table("UPDATE foo,(select id from foo) as tmp SET foo.col=tmp.col"),
            None
        );
    }

    #[test]
    fn parse_trims_terminators_and_reports_invalid_shapes() {
        let stmt = UpdateStatement::parse("  UPDATE foo SET a = 1;; ").expect("valid statement");
        assert_eq!(stmt.query, "UPDATE foo SET a = 1");
        assert_eq!(stmt.table, "foo");

        let err = UpdateStatement::parse("UPDATE foo SET a = 1 LIMIT 10").unwrap_err();
        assert!(matches!(err, SplitError::InvalidStatement { .. }));
        let err = UpdateStatement::parse("SELECT 1").unwrap_err();
        assert!(matches!(err, SplitError::InvalidStatement { .. }));
        let err = UpdateStatement::parse("UPDATE a, b SET a.x = b.x").unwrap_err();
        assert!(matches!(err, SplitError::InvalidStatement { .. }));
    }

    #[test]
    fn ranged_statement_extends_existing_where_clause() {
        assert_eq!(
            ranged_statement("UPDATE t SET x = 1", "id", 1, 99),
            "UPDATE t SET x = 1 WHERE `id` BETWEEN 1 AND 99"
        );
        assert_eq!(
            ranged_statement("UPDATE t SET x = 1 where y = 2", "id", 100, 199),
            "UPDATE t SET x = 1 WHERE (y = 2) AND `id` BETWEEN 100 AND 199"
        );
        assert_eq!(
            ranged_statement("UPDATE t SET x = 1", "we`ird", -5, 5),
            "UPDATE t SET x = 1 WHERE `we``ird` BETWEEN -5 AND 5"
        );
    }

    #[test]
    fn where_inside_literals_and_identifiers_is_not_a_clause() {
        assert_eq!(
            ranged_statement("UPDATE t SET note = 'where'", "id", 1, 99),
            "UPDATE t SET note = 'where' WHERE `id` BETWEEN 1 AND 99"
        );
        assert_eq!(
            ranged_statement(r#"UPDATE t SET note = "it\"s where", `where` = 1"#, "id", 1, 99),
            r#"UPDATE t SET note = "it\"s where", `where` = 1 WHERE `id` BETWEEN 1 AND 99"#
        );
        assert_eq!(
            ranged_statement("UPDATE t SET note = 'don''t where' /* where */", "id", 1, 99),
            "UPDATE t SET note = 'don''t where' /* where */ WHERE `id` BETWEEN 1 AND 99"
        );
        assert!(!statement_has_where("UPDATE t SET note = 'where'"));
        assert!(statement_has_where("UPDATE t SET note = 'x' WHERE id > 3"));
    }

    #[test]
    fn or_predicate_stays_inside_the_range() {
        assert_eq!(
            ranged_statement("UPDATE t SET x = 1 WHERE a = 1 OR b = 2", "id", 1, 99),
            "UPDATE t SET x = 1 WHERE (a = 1 OR b = 2) AND `id` BETWEEN 1 AND 99"
        );
    }

    #[test]
    fn subquery_where_does_not_count_for_the_outer_statement() {
        assert_eq!(
            ranged_statement(
                "UPDATE t SET x = (SELECT MAX(y) FROM u WHERE u.t_id = 7)",
                "id",
                1,
                99
            ),
            "UPDATE t SET x = (SELECT MAX(y) FROM u WHERE u.t_id = 7) WHERE `id` BETWEEN 1 AND 99"
        );
        assert_eq!(
            ranged_statement(
                "UPDATE t SET x = 1 WHERE y IN (SELECT y FROM u WHERE z = 2)",
                "id",
                1,
                99
            ),
            "UPDATE t SET x = 1 WHERE (y IN (SELECT y FROM u WHERE z = 2)) AND `id` BETWEEN 1 AND 99"
        );
    }

    #[test]
    fn order_by_stays_after_the_range_predicate() {
        assert_eq!(
            ranged_statement("UPDATE t SET x = 1 WHERE y = 2 ORDER BY id", "id", 1, 99),
            "UPDATE t SET x = 1 WHERE (y = 2) AND `id` BETWEEN 1 AND 99 ORDER BY id"
        );
        assert_eq!(
            ranged_statement("UPDATE t SET x = 1 order by id DESC", "id", 1, 99),
            "UPDATE t SET x = 1 WHERE `id` BETWEEN 1 AND 99 order by id DESC"
        );
    }
}
