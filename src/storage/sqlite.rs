// FILE: src/storage/sqlite.rs
//! SQLite-backed document store
//!
//! Each collection is one table holding JSON bodies:
//!   seq    INTEGER PRIMARY KEY AUTOINCREMENT  -- insertion order
//!   doc_id TEXT NOT NULL UNIQUE               -- canonical JSON of `_id`
//!   body   TEXT NOT NULL                      -- the whole document
//!
//! Scalar equality criteria are pushed into SQL through `json_extract`, the
//! same expressions `ensure_index` builds its indexes on. Anything else is
//! filtered in Rust after the row is decoded.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::connection::{open_connection, open_in_memory};
use super::{Cursor, Document, DocumentStore, IndexSpec, QueryOptions, SortOrder, Value};
use crate::error::{GridError, Result};

/// Rows fetched per round trip by a cursor.
const PAGE_SIZE: usize = 64;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::from_connection(open_connection(db_path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Arc::new(Mutex::new(conn)) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| poisoned())
    }
}

fn poisoned() -> GridError {
    GridError::store("Poisoned lock")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `json_extract` expression for a top-level field, or `None` when the field
/// name cannot be expressed as a JSON path key.
fn field_expr(field: &str) -> Option<String> {
    if field.contains('"') || field.contains('\'') {
        return None;
    }
    Some(format!("json_extract(body, '$.\"{field}\"')"))
}

/// Canonical text form of an `_id`, so `1` and `"1"` stay distinct.
fn id_key(id: &Value) -> String {
    id.to_json().to_string()
}

fn sql_scalar(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Int(i) => Some(SqlValue::Integer(*i)),
        Value::Float(f) => Some(SqlValue::Real(*f)),
        Value::Text(s) => Some(SqlValue::Text(s.clone())),
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        _ => None,
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn create_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL
        );",
        quote_ident(table)
    ))?;
    Ok(())
}

/// Conditions for the criteria fields SQL can evaluate, plus their parameters.
fn criteria_clauses(criteria: &Document) -> (Vec<String>, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (field, value) in criteria.iter() {
        if field == "_id" {
            params.push(SqlValue::Text(id_key(value)));
            clauses.push(format!("doc_id = ?{}", params.len()));
            continue;
        }
        if let (Some(expr), Some(param)) = (field_expr(field), sql_scalar(value)) {
            params.push(param);
            clauses.push(format!("{expr} = ?{}", params.len()));
        }
    }
    (clauses, params)
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn order_clause(sort: &[(String, SortOrder)]) -> String {
    let mut terms: Vec<String> = sort
        .iter()
        .filter_map(|(field, order)| {
            field_expr(field).map(|expr| match order {
                SortOrder::Ascending => format!("{expr} ASC"),
                SortOrder::Descending => format!("{expr} DESC"),
            })
        })
        .collect();
    terms.push("seq ASC".to_string());
    format!(" ORDER BY {}", terms.join(", "))
}

/// How a cursor walks its table. Both modes resume from row identity, never
/// from a row offset.
enum Paging {
    /// Unsorted: rows in `seq` order after the last one seen.
    Keyset { after: i64 },
    /// Sorted: the matching `seq`s in result order, captured at query time.
    Snapshot { pending: VecDeque<i64> },
}

/// Lazily pages through a table, holding the connection only while fetching.
struct SqliteCursor {
    conn: Arc<Mutex<Connection>>,
    table: String,
    clauses: Vec<String>,
    params: Vec<SqlValue>,
    criteria: Document,
    projection: Option<Vec<String>>,
    remaining: Option<usize>,
    paging: Paging,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl SqliteCursor {
    fn fetch_page(&mut self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let bodies = match &mut self.paging {
            Paging::Keyset { after } => {
                let mut clauses = self.clauses.clone();
                clauses.push(format!("seq > ?{}", self.params.len() + 1));
                let sql = format!(
                    "SELECT seq, body FROM {}{} ORDER BY seq ASC LIMIT {}",
                    self.table,
                    where_sql(&clauses),
                    PAGE_SIZE
                );
                let mut params = self.params.clone();
                params.push(SqlValue::Integer(*after));

                let rows = fetch_rows(&conn, &sql, &params)?;
                if rows.len() < PAGE_SIZE {
                    self.exhausted = true;
                }
                if let Some((seq, _)) = rows.last() {
                    *after = *seq;
                }
                rows.into_iter().map(|(_, body)| body).collect::<Vec<_>>()
            }
            Paging::Snapshot { pending } => {
                let take = pending.len().min(PAGE_SIZE);
                let batch: Vec<i64> = pending.drain(..take).collect();
                if pending.is_empty() {
                    self.exhausted = true;
                }
                if batch.is_empty() {
                    return Ok(());
                }
                let placeholders: Vec<String> = (1..=batch.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "SELECT seq, body FROM {} WHERE seq IN ({})",
                    self.table,
                    placeholders.join(", ")
                );
                let params: Vec<SqlValue> = batch.iter().map(|seq| SqlValue::Integer(*seq)).collect();
                let mut found: HashMap<i64, String> = fetch_rows(&conn, &sql, &params)?.into_iter().collect();
                // Rows removed since the snapshot are simply gone.
                batch.iter().filter_map(|seq| found.remove(seq)).collect()
            }
        };
        drop(conn);

        for body in bodies {
            let doc = Document::from_json_str(&body)?;
            if doc.matches(&self.criteria) {
                self.buffer.push_back(doc);
            }
        }
        Ok(())
    }
}

fn fetch_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn matching_seqs(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<VecDeque<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;
    Ok(rows.collect::<rusqlite::Result<VecDeque<_>>>()?)
}

impl Iterator for SqliteCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let doc = self.buffer.pop_front()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(Ok(match &self.projection {
            Some(fields) => {
                let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
                doc.project(&fields)
            }
            None => doc,
        }))
    }
}

impl DocumentStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn insert(&self, collection: &str, mut doc: Document) -> Result<()> {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Value::Text(Uuid::new_v4().to_string());
                doc.insert("_id", id.clone());
                id
            }
        };

        let conn = self.lock()?;
        create_table(&conn, collection)?;
        conn.execute(
            &format!("INSERT INTO {} (doc_id, body) VALUES (?1, ?2)", quote_ident(collection)),
            params![id_key(&id), doc.to_json_string()?],
        )?;
        Ok(())
    }

    fn remove(&self, collection: &str, criteria: &Document, just_one: bool) -> Result<u64> {
        let mut conn = self.lock()?;
        if !table_exists(&conn, collection)? {
            return Ok(0);
        }

        let table = quote_ident(collection);
        let (clauses, params) = criteria_clauses(criteria);
        let sql = format!("SELECT seq, body FROM {table}{} ORDER BY seq ASC", where_sql(&clauses));

        let mut doomed = Vec::new();
        {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (seq, body) = row?;
                if Document::from_json_str(&body)?.matches(criteria) {
                    doomed.push(seq);
                    if just_one {
                        break;
                    }
                }
            }
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {table} WHERE seq = ?1"))?;
            for seq in &doomed {
                stmt.execute(params![seq])?;
            }
        }
        tx.commit()?;

        tracing::debug!("[SqliteStore] Removed {} document(s) from {}", doomed.len(), collection);
        Ok(doomed.len() as u64)
    }

    fn query(&self, collection: &str, criteria: &Document, options: QueryOptions) -> Result<Cursor> {
        let table = quote_ident(collection);
        let (clauses, params) = criteria_clauses(criteria);

        let paging = {
            let conn = self.lock()?;
            if !table_exists(&conn, collection)? {
                return Ok(Box::new(std::iter::empty()));
            }
            if options.sort.is_empty() {
                Paging::Keyset { after: 0 }
            } else {
                let sql = format!(
                    "SELECT seq FROM {table}{}{}",
                    where_sql(&clauses),
                    order_clause(&options.sort)
                );
                Paging::Snapshot { pending: matching_seqs(&conn, &sql, &params)? }
            }
        };

        Ok(Box::new(SqliteCursor {
            conn: Arc::clone(&self.conn),
            table,
            clauses,
            params,
            criteria: criteria.clone(),
            projection: options.projection,
            remaining: options.limit,
            paging,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let columns = index
            .keys
            .iter()
            .map(|(field, order)| {
                let expr = field_expr(field)
                    .ok_or_else(|| GridError::argument(format!("cannot index field {field:?}")))?;
                Ok(match order {
                    SortOrder::Ascending => format!("{expr} ASC"),
                    SortOrder::Descending => format!("{expr} DESC"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let conn = self.lock()?;
        create_table(&conn, collection)?;
        conn.execute_batch(&format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&format!("{}_{}", collection, index.name)),
            quote_ident(collection),
            columns.join(", ")
        ))?;
        tracing::debug!("[SqliteStore] Ensured index {} on {}", index.name, collection);
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(collection)))?;
        Ok(())
    }
}
