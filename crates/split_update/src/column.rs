//! Split-column selection.
//!
//! The table definition reported by `SHOW CREATE TABLE` is parsed into a
//! typed [`TableDefinition`] first; the selection policy then runs over that
//! structure only, so the text parser can be swapped for catalog queries
//! without changing which column wins.
//!
//! Policy, first match wins:
//! 1. single-column primary key, integer-typed and `NOT NULL`;
//! 2. single-column unique key, integer-typed and `NOT NULL`;
//! 3. `NOT NULL` integer `AUTO_INCREMENT` column.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::database::Database;
use crate::error::SplitError;

static COLUMN_LINE_RE: OnceLock<Regex> = OnceLock::new();
static PRIMARY_KEY_LINE_RE: OnceLock<Regex> = OnceLock::new();
static UNIQUE_KEY_LINE_RE: OnceLock<Regex> = OnceLock::new();
static KEY_PART_RE: OnceLock<Regex> = OnceLock::new();
static NOT_NULL_RE: OnceLock<Regex> = OnceLock::new();
static AUTO_INCREMENT_RE: OnceLock<Regex> = OnceLock::new();
static QUOTED_LITERAL_RE: OnceLock<Regex> = OnceLock::new();

/// Base type names of the MySQL integer family.
const INTEGER_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "integer", "bigint"];

/// One column declaration from a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Declared type token, e.g. `bigint(20)`.
    pub data_type: String,
    pub not_null: bool,
    pub auto_increment: bool,
}

impl ColumnDefinition {
    /// Returns `true` when the declared type is an integer of any width.
    pub fn is_integer(&self) -> bool {
        is_integer_type(&self.data_type)
    }

    fn splittable(&self) -> bool {
        self.not_null && self.is_integer()
    }
}

/// A named unique key and its ordered key parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: String,
    pub columns: Vec<String>,
}

/// Column and key metadata needed by the selection policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDefinition {
    pub columns: Vec<ColumnDefinition>,
    /// Primary key parts; empty when the table has no primary key.
    pub primary_key: Vec<String>,
    /// Unique keys in declaration order.
    pub unique_keys: Vec<UniqueKey>,
}

impl TableDefinition {
    /// Parses the `Create Table` text returned by `SHOW CREATE TABLE`.
    pub fn from_show_create(ddl: &str) -> Self {
        let column_re = COLUMN_LINE_RE.get_or_init(|| {
            Regex::new(r#"(?i)^\s*[`'"]([^`'"]+)[`'"]\s+([^\s,]+)(.*)$"#).expect("valid regex")
        });
        let primary_re = PRIMARY_KEY_LINE_RE.get_or_init(|| {
            Regex::new(r"(?i)^\s*primary\s+key\s*(?:using\s+\w+\s*)?\((.*)\)").expect("valid regex")
        });
        let unique_re = UNIQUE_KEY_LINE_RE.get_or_init(|| {
            Regex::new(r#"(?i)^\s*unique\s+(?:key|index)\s+[`'"]([^`'"]+)[`'"]\s*(?:using\s+\w+\s*)?\((.*)\)"#)
                .expect("valid regex")
        });
        let not_null_re =
            NOT_NULL_RE.get_or_init(|| Regex::new(r"(?i)\bnot\s+null\b").expect("valid regex"));
        let auto_increment_re = AUTO_INCREMENT_RE
            .get_or_init(|| Regex::new(r"(?i)\bauto_increment\b").expect("valid regex"));
        let quoted_re = QUOTED_LITERAL_RE.get_or_init(|| {
            Regex::new(r#"'(?:[^'\\]|\\.|'')*'|"(?:[^"\\]|\\.|"")*""#).expect("valid regex")
        });

        let mut definition = Self::default();
        for line in ddl.lines() {
            if let Some(caps) = primary_re.captures(line) {
                definition.primary_key = parse_key_parts(&caps[1]);
            } else if let Some(caps) = unique_re.captures(line) {
                definition.unique_keys.push(UniqueKey {
                    name: caps[1].to_string(),
                    columns: parse_key_parts(&caps[2]),
                });
            } else if let Some(caps) = column_re.captures(line) {
                // DEFAULT and COMMENT text must not read as attributes.
                let rest = quoted_re.replace_all(&caps[3], "''");
                definition.columns.push(ColumnDefinition {
                    name: caps[1].to_string(),
                    data_type: caps[2].to_string(),
                    not_null: not_null_re.is_match(&rest),
                    auto_increment: auto_increment_re.is_match(&rest),
                });
            }
        }
        definition
    }

    /// Looks up a column by name (MySQL column names are case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Applies the split-column policy.
    pub fn split_candidate(&self) -> Option<(&ColumnDefinition, SplitColumnKind)> {
        if let [only] = self.primary_key.as_slice() {
            if let Some(column) = self.column(only).filter(|c| c.splittable()) {
                return Some((column, SplitColumnKind::PrimaryKey));
            }
        }
        for key in &self.unique_keys {
            let [only] = key.columns.as_slice() else {
                continue;
            };
            if let Some(column) = self.column(only).filter(|c| c.splittable()) {
                return Some((column, SplitColumnKind::UniqueKey(key.name.clone())));
            }
        }
        self.columns
            .iter()
            .find(|column| column.auto_increment && column.splittable())
            .map(|column| (column, SplitColumnKind::AutoIncrement))
    }
}

/// Which policy rule picked the split column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitColumnKind {
    PrimaryKey,
    UniqueKey(String),
    AutoIncrement,
}

impl fmt::Display for SplitColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKey => write!(f, "primary key"),
            Self::UniqueKey(name) => write!(f, "unique key '{name}'"),
            Self::AutoIncrement => write!(f, "auto_increment"),
        }
    }
}

/// The chosen column plus the bounds observed when the session was planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitColumn {
    pub name: String,
    pub kind: SplitColumnKind,
    pub min: i64,
    pub max: i64,
}

/// Returns `true` for any integer-family type name (any display width).
pub fn is_integer_type(type_name: &str) -> bool {
    let lowered = type_name.trim().to_ascii_lowercase();
    let base = lowered
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    INTEGER_TYPES.contains(&base)
}

/// Extracts bare column names from a key part list like `` `a`(10),`b` ``.
fn parse_key_parts(raw: &str) -> Vec<String> {
    let part_re = KEY_PART_RE.get_or_init(|| {
        Regex::new(r#"^\s*[`'"]?([^`'"(\s]+)[`'"]?"#).expect("valid regex")
    });
    raw.split(',')
        .filter_map(|part| part_re.captures(part).map(|caps| caps[1].to_string()))
        .collect()
}

/// Resolves the split column of `table` with one DDL lookup and one
/// `MIN`/`MAX` scan.
///
/// Fails with [`SplitError::NoUsableColumn`] naming `<database>.<table>` when
/// no column qualifies or the table is empty, and with
/// [`SplitError::InvalidKeyBounds`] when the bounds do not fit an `i64` plan.
pub async fn resolve_split_column(
    db: &dyn Database,
    database: &str,
    table: &str,
) -> Result<SplitColumn, SplitError> {
    let qualified = format!("{database}.{table}");
    let ddl = db.show_create_table(table).await?;
    trace!(table = %qualified, ddl = %ddl, "fetched table definition");

    let definition = TableDefinition::from_show_create(&ddl);
    let Some((column, kind)) = definition.split_candidate() else {
        return Err(SplitError::NoUsableColumn { table: qualified });
    };

    let Some((raw_min, raw_max)) = db.min_max(table, &column.name).await? else {
        // Empty table or every value NULL.
        return Err(SplitError::NoUsableColumn { table: qualified });
    };
    let (Ok(min), Ok(max)) = (i64::try_from(raw_min), i64::try_from(raw_max)) else {
        return Err(SplitError::InvalidKeyBounds {
            table: qualified,
            detail: format!(
                "{} bounds [{raw_min}, {raw_max}] exceed the signed 64-bit range",
                column.name
            ),
        });
    };
    if max < min {
        return Err(SplitError::InvalidKeyBounds {
            table: qualified,
            detail: format!("{} bounds are inverted: MIN {min} > MAX {max}", column.name),
        });
    }
    debug!(
        table = %qualified,
        column = %column.name,
        rule = %kind,
        min,
        max,
        "selected split column"
    );
    Ok(SplitColumn {
        name: column.name.clone(),
        kind,
        min,
        max,
    })
}
