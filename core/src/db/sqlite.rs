// Trellis
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Common utilities to interact with an SQLite database.

use crate::db::{
    Db, DbError, DbResult, Dialect, Executor, QueryDone, Record, Statement, TxExecutor,
};
use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, Transaction, TypeInfo, ValueRef};
use std::str::FromStr;

/// Takes a raw SQLx error `e` and converts it to our generic error type.
pub fn map_sqlx_error(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::ColumnDecode { source, .. } => DbError::DataIntegrityError(source.to_string()),
        sqlx::Error::RowNotFound => DbError::NotFound,
        e if e.to_string().contains("FOREIGN KEY constraint failed") => DbError::NotFound,
        e if e.to_string().contains("UNIQUE constraint failed") => DbError::AlreadyExists,
        e => DbError::BackendError(e.to_string()),
    }
}

/// Returns true if `conn_str` names an in-memory database.
fn is_in_memory(conn_str: &str) -> bool {
    conn_str.contains(":memory:") || conn_str.contains("mode=memory")
}

/// Opens a connection pool to the database described by `conn_str`.
///
/// The pool keeps one connection open at all times so that in-memory databases survive between
/// queries.  Every connection to an in-memory database sees a different database, so those pools
/// are limited to a single connection.
pub async fn connect(conn_str: &str) -> DbResult<SqliteDb> {
    let options = SqliteConnectOptions::from_str(conn_str)
        .map_err(|e| DbError::IncorrectConfig(e.to_string()))?
        .create_if_missing(true);
    let mut pool_options =
        SqlitePoolOptions::new().min_connections(1).idle_timeout(None).max_lifetime(None);
    if is_in_memory(conn_str) {
        pool_options = pool_options.max_connections(1);
    }
    let pool = pool_options.connect_with(options).await.map_err(map_sqlx_error)?;
    Ok(SqliteDb { pool })
}

/// A generic database executor implementation for SQLite.
#[derive(Debug)]
pub enum SqliteExecutor {
    /// An executor backed by a pool.  Operations issued via this executor aren't guaranteed to
    /// happen on the same connection.
    PoolExec(PoolConnection<Sqlite>),

    /// An executor backed by a transaction.
    TxExec(Transaction<'static, Sqlite>),
}

impl SqliteExecutor {
    /// Commits the transaction if this executor is backed by one.
    ///
    /// Calling this on a non-transaction-based executor results in a panic.
    pub(super) async fn commit(self) -> DbResult<()> {
        match self {
            SqliteExecutor::PoolExec(_) => unreachable!("Do not call commit on direct executors"),
            SqliteExecutor::TxExec(tx) => tx.commit().await.map_err(map_sqlx_error),
        }
    }

    /// Returns the raw connection behind this executor.
    fn conn(&mut self) -> &mut SqliteConnection {
        match self {
            SqliteExecutor::PoolExec(conn) => conn,
            SqliteExecutor::TxExec(tx) => tx,
        }
    }
}

/// A database instance backed by an SQLite database.
pub struct SqliteDb {
    /// Shared SQLite connection pool.  This is a cloneable type that all concurrent
    /// transactions can use concurrently.
    pool: SqlitePool,
}

impl Drop for SqliteDb {
    fn drop(&mut self) {
        if !self.pool.is_closed() {
            warn!("Dropping connection without having called close() first");
        }
    }
}

#[async_trait]
impl Db for SqliteDb {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn ex(&self) -> DbResult<Executor> {
        let conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(Executor::Sqlite(SqliteExecutor::PoolExec(conn)))
    }

    async fn begin(&self) -> DbResult<TxExecutor> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(TxExecutor(Executor::Sqlite(SqliteExecutor::TxExec(tx))))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Binds a JSON `value` as the next parameter of `query`.
fn bind<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        v => query.bind(v.to_string()),
    }
}

/// Converts a raw SQLite `row` into a `Record`.
fn decode_row(row: &SqliteRow) -> DbResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i).map_err(map_sqlx_error)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_uppercase();
            if type_name.contains("INT") || type_name == "BOOLEAN" {
                Value::from(row.try_get_unchecked::<i64, _>(i).map_err(map_sqlx_error)?)
            } else if type_name == "REAL" || type_name == "NUMERIC" {
                let f = row.try_get_unchecked::<f64, _>(i).map_err(map_sqlx_error)?;
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            } else if type_name == "BLOB" {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(i).map_err(map_sqlx_error)?;
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                Value::String(row.try_get_unchecked::<String, _>(i).map_err(map_sqlx_error)?)
            }
        };
        record.insert(column.name().to_owned(), value);
    }
    Ok(record)
}

/// Runs `stmt` and returns all produced rows.
pub(super) async fn fetch_all(ex: &mut SqliteExecutor, stmt: &Statement) -> DbResult<Vec<Record>> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = bind(query, param);
    }
    let rows = query.fetch_all(ex.conn()).await.map_err(map_sqlx_error)?;
    rows.iter().map(decode_row).collect()
}

/// Runs `stmt` and returns how many rows it touched.
pub(super) async fn execute(ex: &mut SqliteExecutor, stmt: &Statement) -> DbResult<QueryDone> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = bind(query, param);
    }
    let result = query.execute(ex.conn()).await.map_err(map_sqlx_error)?;
    Ok(QueryDone {
        rows_affected: result.rows_affected(),
        last_insert_id: Some(result.last_insert_rowid()),
    })
}

/// Helper function to initialize the database with a schema.
pub(super) async fn run_schema(ex: &mut SqliteExecutor, schema: &str) -> DbResult<()> {
    sqlx::raw_sql(schema).execute(ex.conn()).await.map_err(map_sqlx_error)?;
    Ok(())
}

/// Test utilities for the SQLite connection.
#[cfg(any(feature = "testutils", test))]
pub mod testutils {
    use crate::db::{Database, DbConfig};

    /// Initializes a database context connected to a fresh in-memory database.
    pub async fn setup() -> Database {
        let _can_fail = env_logger::builder().is_test(true).try_init();
        let db = Database::new();
        db.connect(DbConfig::sqlite(":memory:")).await.unwrap();
        db
    }
}
