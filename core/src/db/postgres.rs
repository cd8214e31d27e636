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

//! Common utilities to interact with a PostgreSQL database.

use crate::db::{
    Db, DbConfig, DbError, DbResult, Dialect, Driver, Executor, QueryDone, Record, Statement,
    TxExecutor,
};
use async_trait::async_trait;
use derivative::Derivative;
use futures::Future;
use log::warn;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgConnection, PgDatabaseError, PgPool, PgPoolOptions, PgRow,
    Postgres,
};
use sqlx::query::Query;
use sqlx::{Column, Row, Transaction, TypeInfo, ValueRef};
use std::time::Duration;

/// Default value for the `max_retries` configuration property.
const DEFAULT_MAX_RETRIES: u16 = 60;

/// Default port for PostgreSQL servers.
const DEFAULT_PORT: u16 = 5432;

/// Takes a raw SQLx error `e` and converts it to our generic error type.
pub fn map_sqlx_error(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::ColumnDecode { source, .. } => DbError::DataIntegrityError(source.to_string()),
        sqlx::Error::Database(e) => match e.downcast_ref::<PgDatabaseError>().code() {
            "23503" /* foreign_key_violation */ => DbError::NotFound,
            "23505" /* unique_violation */ => DbError::AlreadyExists,
            "53300" /* too_many_connections */ => DbError::Unavailable,
            number => DbError::BackendError(format!("pgsql error {}: {}", number, e)),
        },
        sqlx::Error::PoolTimedOut => DbError::Unavailable,
        sqlx::Error::RowNotFound => DbError::NotFound,
        e => DbError::BackendError(e.to_string()),
    }
}

/// Options to establish a connection to a PostgreSQL database.
#[derive(Derivative)]
#[derivative(Debug, Default)]
#[cfg_attr(test, derivative(PartialEq))]
pub struct PostgresOptions {
    /// Host to connect to.
    pub host: String,

    /// Port to connect to (typically 5432).
    pub port: u16,

    /// Database name to connect to.
    pub database: String,

    /// Username to establish the connection with.
    pub username: String,

    /// Password to establish the connection with.
    #[derivative(Debug = "ignore")]
    pub password: String,

    /// Minimum number of connections to keep open against the database.
    pub min_connections: Option<u32>,

    /// Maximum number of connections to allow against the database.
    pub max_connections: Option<u32>,

    /// Number of times to retry a connection operation when the database is unavailable.
    pub max_retries: u16,
}

impl TryFrom<&DbConfig> for PostgresOptions {
    type Error = DbError;

    fn try_from(config: &DbConfig) -> DbResult<Self> {
        if config.driver() != Driver::Postgres {
            return Err(DbError::IncorrectConfig(format!(
                "Cannot open a {} configuration as PostgreSQL",
                config.driver().as_str()
            )));
        }

        fn required(field: &Option<String>, name: &str) -> DbResult<String> {
            field.clone().ok_or_else(|| DbError::IncorrectConfig(format!("Missing {}", name)))
        }

        Ok(Self {
            host: required(&config.host, "host")?,
            port: config.port.unwrap_or(DEFAULT_PORT),
            database: required(&config.dbname, "dbname")?,
            username: required(&config.username, "username")?,
            password: config.password.clone().unwrap_or_default(),
            min_connections: config.min_connections,
            max_connections: config.max_connections,
            max_retries: config.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}

/// A generic database executor implementation for PostgreSQL.
#[derive(Debug)]
pub enum PostgresExecutor {
    /// An executor backed by a pool.  Operations issued via this executor aren't guaranteed to
    /// happen on the same connection.
    PoolExec(PoolConnection<Postgres>),

    /// An executor backed by a transaction.
    TxExec(Transaction<'static, Postgres>),
}

impl PostgresExecutor {
    /// Commits the transaction if this executor is backed by one.
    ///
    /// Calling this on a non-transaction-based executor results in a panic.
    pub(super) async fn commit(self) -> DbResult<()> {
        match self {
            PostgresExecutor::PoolExec(_) => unreachable!("Do not call commit on direct executors"),
            PostgresExecutor::TxExec(tx) => tx.commit().await.map_err(map_sqlx_error),
        }
    }

    /// Returns the raw connection behind this executor.
    fn conn(&mut self) -> &mut PgConnection {
        match self {
            PostgresExecutor::PoolExec(conn) => conn,
            PostgresExecutor::TxExec(tx) => tx,
        }
    }
}

/// Runs `op` until it succeeds or fails with an error other than unavailability, sleeping with
/// randomized backoff between attempts and giving up after `retries` attempts.
async fn retry<Op, OpFut, T>(op: Op, mut retries: u16) -> DbResult<T>
where
    Op: Fn() -> OpFut,
    OpFut: Future<Output = Result<T, sqlx::Error>>,
    T: Send + Sync,
{
    let mut delay = Duration::from_millis(100 + u64::from(rand::random::<u16>() % 900));
    loop {
        match op().await.map_err(map_sqlx_error) {
            Ok(result) => return Ok(result),
            Err(DbError::Unavailable) => {
                if retries == 0 {
                    return Err(DbError::Unavailable);
                }
                retries -= 1;

                warn!(
                    "Database is unavailable; waiting {}ms before retrying with {} attempts left",
                    delay.as_millis(),
                    retries
                );

                tokio::time::sleep(delay).await;
                if delay < Duration::from_secs(5) {
                    delay += Duration::from_millis(u64::from(rand::random::<u16>() % 1000));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Shareable connection across transactions and `PostgresDb` types.
pub struct PostgresDb {
    /// Shared PostgreSQL connection pool.  This is a cloneable type that all concurrent
    /// transactions can use it concurrently.
    pool: PgPool,

    /// Maximum number of attempts to retry a connection operation when the database does not seem
    /// to be available.
    max_retries: u16,
}

impl Drop for PostgresDb {
    fn drop(&mut self) {
        if !self.pool.is_closed() {
            warn!("Dropping connection without having called close() first");
        }
    }
}

impl PostgresDb {
    /// Creates a new connection based on a set of options.
    ///
    /// Note that this does *not* establish the connection.
    pub fn connect(opts: PostgresOptions) -> DbResult<Self> {
        let mut pool_options = PgPoolOptions::new();
        if let Some(min_connections) = opts.min_connections {
            pool_options = pool_options.min_connections(min_connections);
        }
        if let Some(max_connections) = opts.max_connections {
            pool_options = pool_options.max_connections(max_connections);
        }
        pool_options = pool_options.acquire_timeout(Duration::from_secs(2));

        let options = PgConnectOptions::new()
            .host(&opts.host)
            .port(opts.port)
            .database(&opts.database)
            .username(&opts.username)
            .password(&opts.password);

        let pool = pool_options.connect_lazy_with(options);
        Ok(Self { pool, max_retries: opts.max_retries })
    }

    /// Returns an executor of the specific type used by this database.
    pub async fn typed_ex(&self) -> DbResult<PostgresExecutor> {
        let conn = retry(|| self.pool.acquire(), self.max_retries).await?;
        Ok(PostgresExecutor::PoolExec(conn))
    }
}

#[async_trait]
impl Db for PostgresDb {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ex(&self) -> DbResult<Executor> {
        let ex = self.typed_ex().await?;
        Ok(Executor::Postgres(ex))
    }

    async fn begin(&self) -> DbResult<TxExecutor> {
        let tx = retry(|| self.pool.begin(), self.max_retries).await?;
        Ok(TxExecutor(Executor::Postgres(PostgresExecutor::TxExec(tx))))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Binds a JSON `value` as the next parameter of `query`.
fn bind<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
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

/// Converts a raw PostgreSQL `row` into a `Record`.
///
/// Only scalar types with a natural JSON representation are supported.  Other types must be cast
/// to text in the query.
fn decode_row(row: &PgRow) -> DbResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i).map_err(map_sqlx_error)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_owned();
            match type_name.as_str() {
                "BOOL" => Value::from(row.try_get::<bool, _>(i).map_err(map_sqlx_error)?),
                "INT2" => Value::from(row.try_get::<i16, _>(i).map_err(map_sqlx_error)?),
                "INT4" => Value::from(row.try_get::<i32, _>(i).map_err(map_sqlx_error)?),
                "INT8" => Value::from(row.try_get::<i64, _>(i).map_err(map_sqlx_error)?),
                "FLOAT4" | "FLOAT8" => {
                    let f = match type_name.as_str() {
                        "FLOAT4" => f64::from(row.try_get::<f32, _>(i).map_err(map_sqlx_error)?),
                        _ => row.try_get::<f64, _>(i).map_err(map_sqlx_error)?,
                    };
                    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                }
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
                    Value::String(row.try_get::<String, _>(i).map_err(map_sqlx_error)?)
                }
                other => {
                    return Err(DbError::DataIntegrityError(format!(
                        "Unsupported type {} in column {}",
                        other,
                        column.name()
                    )));
                }
            }
        };
        record.insert(column.name().to_owned(), value);
    }
    Ok(record)
}

/// Runs `stmt` and returns all produced rows.
pub(super) async fn fetch_all(
    ex: &mut PostgresExecutor,
    stmt: &Statement,
) -> DbResult<Vec<Record>> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = bind(query, param);
    }
    let rows = query.fetch_all(ex.conn()).await.map_err(map_sqlx_error)?;
    rows.iter().map(decode_row).collect()
}

/// Runs `stmt` and returns how many rows it touched.
///
/// PostgreSQL does not report inserted identifiers outside of `RETURNING` clauses.
pub(super) async fn execute(ex: &mut PostgresExecutor, stmt: &Statement) -> DbResult<QueryDone> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = bind(query, param);
    }
    let result = query.execute(ex.conn()).await.map_err(map_sqlx_error)?;
    Ok(QueryDone { rows_affected: result.rows_affected(), last_insert_id: None })
}

/// Helper function to initialize the database with a schema.
pub(super) async fn run_schema(ex: &mut PostgresExecutor, schema: &str) -> DbResult<()> {
    sqlx::raw_sql(schema).execute(ex.conn()).await.map_err(map_sqlx_error)?;
    Ok(())
}

/// Test utilities for the PostgreSQL connection.
#[cfg(any(feature = "testutils", test))]
pub mod testutils {
    use super::*;
    use crate::db::Database;
    use std::sync::Arc;

    /// Creates a new connection to the test database and initializes it.
    ///
    /// This sets up the database to use the `pg_temp` schema by default so that any tables
    /// created during the test are deleted at disconnection time.  Note that for this to work,
    /// the connection pool must maintain a single connection open at all times, but not more.
    ///
    /// Given that this is for testing purposes only, any errors will panic.
    pub async fn setup() -> Database {
        let _can_fail = env_logger::builder().is_test(true).try_init();

        let mut config = DbConfig::from_env("PGSQL_TEST").unwrap();
        config.min_connections = Some(1);
        config.max_connections = Some(1);
        let db = PostgresDb::connect(PostgresOptions::try_from(&config).unwrap()).unwrap();

        let mut ex = db.typed_ex().await.unwrap();
        sqlx::query("SET search_path TO pg_temp").execute(ex.conn()).await.unwrap();
        drop(ex);

        let database = Database::new();
        database.attach(config, Arc::new(db)).await;
        database
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::*;
    use super::*;
    use crate::db::testutils::generate_tests;

    generate_tests!(
        #[ignore = "Requires environment configuration and is expensive"],
        setup().await,
        crate::db::tests,
        test_fetch_and_execute,
        test_nulls,
        test_unique_violation,
        test_transaction_commit
    );

    #[test]
    pub fn test_postgres_options_from_config() {
        let mut config = DbConfig::new(Driver::Postgres);
        config.host = Some("the-host".to_owned());
        config.dbname = Some("the-database".to_owned());
        config.username = Some("the-username".to_owned());
        config.password = Some("the-password".to_owned());
        config.max_connections = Some(20);
        assert_eq!(
            PostgresOptions {
                host: "the-host".to_owned(),
                port: DEFAULT_PORT,
                database: "the-database".to_owned(),
                username: "the-username".to_owned(),
                password: "the-password".to_owned(),
                min_connections: None,
                max_connections: Some(20),
                max_retries: DEFAULT_MAX_RETRIES,
            },
            PostgresOptions::try_from(&config).unwrap()
        );
    }

    #[test]
    pub fn test_postgres_options_missing_fields() {
        let mut config = DbConfig::new(Driver::Postgres);
        config.host = Some("the-host".to_owned());
        assert_eq!(
            DbError::IncorrectConfig("Missing dbname".to_owned()),
            PostgresOptions::try_from(&config).unwrap_err()
        );

        assert!(PostgresOptions::try_from(&DbConfig::sqlite(":memory:")).is_err());
    }
}
