//! Result processing
//!
//! Drivers hand back a [`RawResultSet`]. The [`ResultProcessor`] consumes it,
//! materializes rows in the configured [`FetchType`] shape up to a fetch
//! limit, and derives row counts and inserted identifiers.

use super::value::{DatabaseRow, DatabaseValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum rows materialized when no explicit limit is given
pub const DEFAULT_FETCH_LIMIT: usize = 100_000;

/// Shape of materialized rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchType {
    /// [`Record`] accessor rows
    #[default]
    Object,
    /// Column name -> value maps
    ArrayAssoc,
    /// Values in column order
    ArrayPositional,
    /// Both a map and the positional values
    ArrayBoth,
}

/// Unprocessed response of a driver for one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DatabaseValue>>,
    pub affected_rows: u64,
    /// Last identifier generated by an INSERT, `None` for other statements
    pub last_insert_id: Option<u64>,
}

/// Map-backed row accessor keeping column order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, DatabaseValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Record::set`]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Value of `key`, if present
    pub fn get(&self, key: &str) -> Option<&DatabaseValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Value of `key`, or `default` when absent
    pub fn get_or(&self, key: &str, default: DatabaseValue) -> DatabaseValue {
        self.get(key).cloned().unwrap_or(default)
    }

    /// Set `key`, replacing an existing value in place or appending a new column
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<DatabaseValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &DatabaseValue> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_map(self) -> DatabaseRow {
        self.fields.into_iter().collect()
    }
}

impl IntoIterator for Record {
    type Item = (String, DatabaseValue);
    type IntoIter = std::vec::IntoIter<(String, DatabaseValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>, V: Into<DatabaseValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.set(key, value);
        }
        record
    }
}

/// One materialized row
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedRow {
    Object(Record),
    Assoc(DatabaseRow),
    Positional(Vec<DatabaseValue>),
    Both(DatabaseRow, Vec<DatabaseValue>),
}

impl FetchedRow {
    /// Look a column up by name; positional rows have no names
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        match self {
            FetchedRow::Object(record) => record.get(column),
            FetchedRow::Assoc(map) | FetchedRow::Both(map, _) => map.get(column),
            FetchedRow::Positional(_) => None,
        }
    }

    /// Look a column up by position; associative rows have no order
    pub fn at(&self, index: usize) -> Option<&DatabaseValue> {
        match self {
            FetchedRow::Object(record) => record.values().nth(index),
            FetchedRow::Positional(values) | FetchedRow::Both(_, values) => values.get(index),
            FetchedRow::Assoc(_) => None,
        }
    }
}

/// Rows and metadata of one executed statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<FetchedRow>,
    /// Rows actually materialized, after the fetch limit
    pub row_count: usize,
    pub rows_affected: u64,
    pub insert_ids: Vec<u64>,
    pub query: String,
    pub elapsed: Duration,
}

impl QueryResult {
    pub fn first(&self) -> Option<&FetchedRow> {
        self.rows.first()
    }

    pub fn last_insert_id(&self) -> Option<u64> {
        self.insert_ids.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop rows and metadata so the value can be reused for another statement
    pub fn clear(&mut self) {
        self.rows.clear();
        self.row_count = 0;
        self.rows_affected = 0;
        self.insert_ids.clear();
        self.query.clear();
        self.elapsed = Duration::ZERO;
    }
}

/// Converts driver output into [`QueryResult`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultProcessor {
    fetch_type: FetchType,
    limit: usize,
    contiguous_insert_ids: bool,
}

impl Default for ResultProcessor {
    fn default() -> Self {
        Self {
            fetch_type: FetchType::default(),
            limit: DEFAULT_FETCH_LIMIT,
            contiguous_insert_ids: true,
        }
    }
}

impl ResultProcessor {
    pub fn new(fetch_type: FetchType, limit: usize, contiguous_insert_ids: bool) -> Self {
        Self {
            fetch_type,
            limit,
            contiguous_insert_ids,
        }
    }

    pub fn fetch_type(&self) -> FetchType {
        self.fetch_type
    }

    /// Materialize `raw`
    ///
    /// `raw` is consumed, so the driver's buffers are released when this
    /// returns. `limit` and `fetch_type` override the processor defaults for
    /// this call.
    pub fn process(
        &self,
        raw: RawResultSet,
        limit: Option<usize>,
        fetch_type: Option<FetchType>,
    ) -> QueryResult {
        let RawResultSet {
            columns,
            rows,
            affected_rows,
            last_insert_id,
        } = raw;
        let limit = limit.unwrap_or(self.limit);
        let shape = fetch_type.unwrap_or(self.fetch_type);

        let rows: Vec<FetchedRow> = rows
            .into_iter()
            .take(limit)
            .map(|values| shape_row(&columns, values, shape))
            .collect();

        QueryResult {
            row_count: rows.len(),
            rows,
            rows_affected: affected_rows,
            insert_ids: derive_insert_ids(
                last_insert_id,
                affected_rows,
                self.contiguous_insert_ids,
            ),
            ..QueryResult::default()
        }
    }
}

fn shape_row(columns: &[String], values: Vec<DatabaseValue>, shape: FetchType) -> FetchedRow {
    match shape {
        FetchType::Object => FetchedRow::Object(Record {
            fields: named(columns, &values),
        }),
        FetchType::ArrayAssoc => FetchedRow::Assoc(named(columns, &values).into_iter().collect()),
        FetchType::ArrayBoth => {
            let map = named(columns, &values).into_iter().collect();
            FetchedRow::Both(map, values)
        }
        FetchType::ArrayPositional => FetchedRow::Positional(values),
    }
}

fn named(columns: &[String], values: &[DatabaseValue]) -> Vec<(String, DatabaseValue)> {
    columns.iter().cloned().zip(values.iter().cloned()).collect()
}

/// Identifiers generated by an INSERT that affected `rows_affected` rows
///
/// With `contiguous` set, a multi-row insert is assumed to have received
/// consecutive identifiers ending at `last_id`. That holds for a single
/// writer but not necessarily under concurrent inserts, so callers that cannot
/// rely on it disable `contiguous` and get only the last identifier.
pub fn derive_insert_ids(last_id: Option<u64>, rows_affected: u64, contiguous: bool) -> Vec<u64> {
    let Some(last) = last_id.filter(|id| *id > 0) else {
        return Vec::new();
    };
    if rows_affected == 0 {
        return Vec::new();
    }
    if !contiguous || rows_affected == 1 || rows_affected > last {
        return vec![last];
    }
    (last + 1 - rows_affected..=last).collect()
}

/// Whether `sql` is an INSERT-type statement that may generate identifiers
pub(crate) fn is_insert_statement(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
}
