//! SQLite queries exposed as [`QuerySource`]s.
//!
//! Chunked reads wrap the caller query as a subquery and re-order it by the
//! key column, so any ordering or limit inside the query is discarded.
//! Unchunked reads run the query exactly once as a single statement.

use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, Rows, Statement, params_from_iter};
use tracing::debug;

use crate::cursor::{EnumKeyValue, QuerySource, SpecKeyedRecord};
use crate::error::{Result, TableIoError};
use crate::row::Row;
use crate::source::EnumRawRecord;
use crate::spec::EnumCellValue;

/// Query over a borrowed connection.
///
/// The forward pull steps one statement to completion on first use and
/// yields from that result; use a key with chunked reads, or
/// [`SqliteStatementSource`], to keep memory bounded.
pub struct SqliteQuerySource<'a> {
    conn: &'a Connection,
    c_query: String,
    c_key_column: Option<String>,
    limit: Option<usize>,
    l_pull_buffer: VecDeque<EnumRawRecord>,
    if_pull_started: bool,
}

impl<'a> SqliteQuerySource<'a> {
    /// Wrap `query` (a `SELECT` without trailing semicolon).
    pub fn new(conn: &'a Connection, query: impl Into<String>) -> Self {
        Self {
            conn,
            c_query: query.into().trim().trim_end_matches(';').to_string(),
            c_key_column: None,
            limit: None,
            l_pull_buffer: VecDeque::new(),
            if_pull_started: false,
        }
    }

    /// Declare the unique ordering key used by chunked reads.
    pub fn with_key(mut self, key_column: impl Into<String>) -> Self {
        self.c_key_column = Some(key_column.into());
        self
    }

    /// Caller record limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|err| TableIoError::SourceUnavailable(format!("prepare failed: {err}")))?;
        let headings = derive_statement_headings(&stmt);
        let n_cols = headings.len();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|err| TableIoError::codec("sqlite_query", err))?;

        let mut l_rows = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| TableIoError::codec("sqlite_step", err))?
        {
            l_rows.push(convert_sqlite_row(row, n_cols)?.with_headings(headings.clone()));
        }
        Ok(l_rows)
    }
}

impl QuerySource for SqliteQuerySource<'_> {
    fn key_column(&self) -> Option<String> {
        self.c_key_column.clone()
    }

    fn fetch_after(
        &mut self,
        after: Option<&EnumKeyValue>,
        limit: usize,
    ) -> Result<Vec<SpecKeyedRecord>> {
        let Some(c_key) = self.c_key_column.clone() else {
            return Err(TableIoError::SourceUnavailable(
                "query has no key column".to_string(),
            ));
        };
        let c_key_sql = quote_identifier(&c_key);
        let n_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let (c_sql, l_params) = match after {
            Some(key) => (
                format!(
                    "SELECT * FROM ({}) WHERE {c_key_sql} > ?1 ORDER BY {c_key_sql} LIMIT ?2",
                    self.c_query
                ),
                vec![convert_key_to_value(key), Value::Integer(n_limit)],
            ),
            None => (
                format!(
                    "SELECT * FROM ({}) ORDER BY {c_key_sql} LIMIT ?1",
                    self.c_query
                ),
                vec![Value::Integer(n_limit)],
            ),
        };
        debug!(key = %c_key, after = ?after, limit, "sqlite keyset fetch");

        self.query_rows(&c_sql, &l_params)?
            .into_iter()
            .map(|row| {
                let key = match row.get_by_name(&c_key) {
                    Some(EnumCellValue::Int(v)) => EnumKeyValue::Int(*v),
                    Some(EnumCellValue::String(s)) => EnumKeyValue::Text(s.clone()),
                    other => {
                        return Err(TableIoError::SourceUnavailable(format!(
                            "key column {c_key:?} holds a non-orderable value: {other:?}"
                        )));
                    }
                };
                Ok(SpecKeyedRecord {
                    key,
                    record: EnumRawRecord::Row(row),
                })
            })
            .collect()
    }

    fn pull(&mut self) -> Option<Result<EnumRawRecord>> {
        if !self.if_pull_started {
            self.if_pull_started = true;
            match self.query_rows(&self.c_query, &[]) {
                Ok(l_rows) => {
                    debug!(rows = l_rows.len(), "sqlite forward pull");
                    self.l_pull_buffer.extend(l_rows.into_iter().map(EnumRawRecord::Row));
                }
                Err(err) => return Some(Err(err)),
            }
        }
        self.l_pull_buffer.pop_front().map(Ok)
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Forward-only pull over one caller-prepared statement.
///
/// Rows are stepped from a single cursor as they are consumed, so memory
/// stays bounded. There is no key, so chunked reads are unavailable.
pub struct SqliteStatementSource<'s> {
    rows: Rows<'s>,
    headings: Arc<[String]>,
    limit: Option<usize>,
    if_done: bool,
}

impl<'s> SqliteStatementSource<'s> {
    /// Start executing `stmt` (a statement without parameters).
    pub fn new(stmt: &'s mut Statement<'_>) -> Result<Self> {
        let headings = derive_statement_headings(stmt);
        let rows = stmt
            .query([])
            .map_err(|err| TableIoError::SourceUnavailable(format!("query failed: {err}")))?;
        Ok(Self {
            rows,
            headings,
            limit: None,
            if_done: false,
        })
    }

    /// Caller record limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl QuerySource for SqliteStatementSource<'_> {
    fn key_column(&self) -> Option<String> {
        None
    }

    fn fetch_after(
        &mut self,
        _after: Option<&EnumKeyValue>,
        _limit: usize,
    ) -> Result<Vec<SpecKeyedRecord>> {
        Err(TableIoError::SourceUnavailable(
            "prepared statement has no key column".to_string(),
        ))
    }

    fn pull(&mut self) -> Option<Result<EnumRawRecord>> {
        if self.if_done {
            return None;
        }
        let item = match self.rows.next() {
            Ok(Some(row)) => convert_sqlite_row(row, self.headings.len())
                .map(|row| EnumRawRecord::Row(row.with_headings(self.headings.clone()))),
            Ok(None) => {
                self.if_done = true;
                return None;
            }
            Err(err) => Err(TableIoError::codec("sqlite_step", err)),
        };
        self.if_done = item.is_err();
        Some(item)
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}

fn derive_statement_headings(stmt: &Statement<'_>) -> Arc<[String]> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn convert_sqlite_row(row: &rusqlite::Row<'_>, n_cols: usize) -> Result<Row> {
    let l_values = (0..n_cols)
        .map(|n_idx| {
            row.get_ref(n_idx)
                .map(convert_value_ref_to_cell)
                .map_err(|err| TableIoError::codec("sqlite_cell", err))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(l_values))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn convert_key_to_value(key: &EnumKeyValue) -> Value {
    match key {
        EnumKeyValue::Int(v) => Value::Integer(*v),
        EnumKeyValue::Text(v) => Value::Text(v.clone()),
    }
}

fn convert_value_ref_to_cell(value: ValueRef<'_>) -> EnumCellValue {
    match value {
        ValueRef::Null => EnumCellValue::None,
        ValueRef::Integer(v) => EnumCellValue::Int(v),
        ValueRef::Real(v) => EnumCellValue::Number(v),
        ValueRef::Text(v) | ValueRef::Blob(v) => {
            EnumCellValue::String(String::from_utf8_lossy(v).into_owned())
        }
    }
}
