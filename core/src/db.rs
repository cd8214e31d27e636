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

//! Generic abstraction to access different database systems.
//!
//! The facilities in this module provide an abstraction over different database systems such as
//! PostgreSQL and SQLite.  The PostgreSQL backend is for production use and the SQLite backend is
//! primarily intended to support unit tests and small deployments.
//!
//! Queries flow through this module as `Statement`s: SQL text plus positional parameters.  Rows
//! flow back as `Record`s, which are ordered maps from column names to JSON values.  This keeps the
//! query builder in `trellis-dbal` independent from the concrete backend types that `sqlx` needs.

use crate::model::ModelError;
use async_trait::async_trait;
use derivative::Derivative;
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

mod config;
pub use config::DbConfig;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Database errors.  Any unexpected errors that come from the database are classified as
/// `BackendError`, but errors we know about have more specific types.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DbError {
    /// Indicates that a request to create an entry failed because it already exists.
    #[error("Already exists")]
    AlreadyExists,

    /// Catch-all error type for unexpected database errors.
    #[error("Database error: {0}")]
    BackendError(String),

    /// Indicates a failure processing the data that already exists in the database.
    #[error("Data integrity error: {0}")]
    DataIntegrityError(String),

    /// Indicates that the connection configuration is invalid.
    #[error("Incorrect database configuration: {0}")]
    IncorrectConfig(String),

    /// Indicates that an operation required a live connection but none was established.
    #[error("Database configuration not provided")]
    MissingConfig,

    /// Indicates that a requested entry does not exist.
    #[error("Entity not found")]
    NotFound,

    /// Indicates that the database is not available (maybe because of too many active concurrent
    /// connections).
    #[error("Unavailable")]
    Unavailable,

    /// Indicates that the configured driver is not known or not compiled into this binary.
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),
}

impl From<ModelError> for DbError {
    fn from(e: ModelError) -> Self {
        DbError::DataIntegrityError(e.to_string())
    }
}

/// Result type for this module.
pub type DbResult<T> = Result<T, DbError>;

/// A row returned by a query, keyed by column name in the order in which the database returned
/// the columns.
pub type Record = serde_json::Map<String, Value>;

/// Supported database drivers, as named in the connection configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Driver {
    /// MySQL or MariaDB.
    MySql,

    /// PostgreSQL.
    Postgres,

    /// SQLite, either file-backed or in-memory.
    Sqlite,
}

impl Driver {
    /// Returns the SQL dialect spoken by this driver.
    pub fn dialect(self) -> Dialect {
        match self {
            Driver::MySql => Dialect::MySql,
            Driver::Postgres => Dialect::Postgres,
            Driver::Sqlite => Dialect::Sqlite,
        }
    }

    /// Returns the canonical name of the driver as used in connection strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::MySql => "mysql",
            Driver::Postgres => "pgsql",
            Driver::Sqlite => "sqlite",
        }
    }
}

impl FromStr for Driver {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Driver::MySql),
            "pgsql" | "postgres" | "postgresql" => Ok(Driver::Postgres),
            "sqlite" => Ok(Driver::Sqlite),
            _ => Err(DbError::UnsupportedDriver(s.to_owned())),
        }
    }
}

/// Syntactic differences between the SQL dialects we generate queries for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dialect {
    /// MySQL-style quoting with backticks and `?` placeholders.
    MySql,

    /// PostgreSQL-style quoting with double quotes and `$n` placeholders.
    Postgres,

    /// SQLite accepts the MySQL-style syntax, which we use for compatibility.
    Sqlite,
}

impl Dialect {
    /// Returns the character used to quote identifiers.
    pub fn quote(self) -> char {
        match self {
            Dialect::MySql | Dialect::Sqlite => '`',
            Dialect::Postgres => '"',
        }
    }

    /// Returns the placeholder for the `n`th parameter of a statement, starting at 1.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::MySql | Dialect::Sqlite => "?".to_owned(),
            Dialect::Postgres => format!("${}", n),
        }
    }
}

/// A SQL statement ready to be executed, with its positional parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statement {
    /// The SQL text with placeholders for the parameters.
    pub sql: String,

    /// The values for the placeholders in `sql`, in order.
    pub params: Vec<Value>,
}

impl Statement {
    /// Creates a statement with no parameters.
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self { sql: sql.into(), params: vec![] }
    }

    /// Creates a statement with parameters.
    pub fn with_params<S: Into<String>>(sql: S, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Renders the statement with its parameters inlined.
    ///
    /// The result is meant for diagnostics only: values are quoted naively and the output must
    /// never be sent to the database.
    pub fn inlined(&self) -> String {
        let mut output = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        let mut chars = self.sql.chars().peekable();
        while let Some(ch) = chars.next() {
            let is_placeholder = match ch {
                '?' => true,
                '$' => {
                    let mut digits = false;
                    while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                        chars.next();
                        digits = true;
                    }
                    digits
                }
                _ => false,
            };
            if !is_placeholder {
                output.push(ch);
                continue;
            }
            match params.next() {
                Some(Value::String(s)) => {
                    output.push('\'');
                    output.push_str(&s.replace('\'', "''"));
                    output.push('\'');
                }
                Some(Value::Null) => output.push_str("NULL"),
                Some(value) => output.push_str(&value.to_string()),
                None => output.push(ch),
            }
        }
        output
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Default, PartialEq)]
pub struct QueryDone {
    /// Number of rows modified by the statement.
    pub rows_affected: u64,

    /// Identifier of the last inserted row, if the backend reports it.
    pub last_insert_id: Option<i64>,
}

/// A database executor that can talk to multiple database implementations.
///
/// This type provides a generic mechanism to access a typed instance of a database, which is needed
/// by sqlx to offer type safety guarantees during query compilation.  Users of this type are forced
/// to destructure it and issue different calls for each database.
///
/// Note that this can wrap an executor that talks directly to a pool or to an open transaction.
pub enum Executor {
    /// A PostgreSQL executor that can be used in `sqlx` operations.
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresExecutor),

    /// A SQLite executor that can be used in `sqlx` operations.
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteExecutor),
}

impl Executor {
    /// Returns the SQL dialect understood by this executor.
    pub fn dialect(&self) -> Dialect {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(_) => Dialect::Postgres,

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(_) => Dialect::Sqlite,
        }
    }
}

/// A wrapper for a database executor backed by an open transaction.
pub struct TxExecutor(Executor);

impl TxExecutor {
    /// Returns the executor wrapped by this transaction.
    ///
    /// This would be better called `executor` but this method is used so frequently that it makes
    /// call sites too verbose.
    pub fn ex(&mut self) -> &mut Executor {
        &mut self.0
    }

    /// Commits the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self.0 {
            #[cfg(feature = "postgres")]
            Executor::Postgres(e) => e.commit().await,

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(e) => e.commit().await,
        }
    }
}

/// Abstraction over the database connection.
#[async_trait]
pub trait Db {
    /// Returns the SQL dialect understood by this database.
    fn dialect(&self) -> Dialect;

    /// Obtains an executor for direct access to the pool.
    ///
    /// This would be better called `executor` but this method is used so frequently that it makes
    /// call sites too verbose.
    async fn ex(&self) -> DbResult<Executor>;

    /// Begins a transaction.
    ///
    /// It is the responsibility of the caller to call `commit` on the returned executor.  Otherwise
    /// the transaction is rolled back on drop.
    async fn begin(&self) -> DbResult<TxExecutor>;

    /// Closes the connection pool.  Must be called before dropping the database.
    async fn close(&self);
}

/// Runs `stmt` on `ex` and returns all the rows it produced.
pub async fn fetch_all(ex: &mut Executor, stmt: &Statement) -> DbResult<Vec<Record>> {
    debug!("Fetching: {}", stmt.sql);
    match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => postgres::fetch_all(ex, stmt).await,

        #[cfg(feature = "sqlite")]
        Executor::Sqlite(ex) => sqlite::fetch_all(ex, stmt).await,
    }
}

/// Runs `stmt` on `ex` without expecting any rows back.
pub async fn execute(ex: &mut Executor, stmt: &Statement) -> DbResult<QueryDone> {
    debug!("Executing: {}", stmt.sql);
    match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => postgres::execute(ex, stmt).await,

        #[cfg(feature = "sqlite")]
        Executor::Sqlite(ex) => sqlite::execute(ex, stmt).await,
    }
}

/// Initializes the database with a `schema`, which may contain multiple statements.
pub async fn run_schema(ex: &mut Executor, schema: &str) -> DbResult<()> {
    match ex {
        #[cfg(feature = "postgres")]
        Executor::Postgres(ex) => postgres::run_schema(ex, schema).await,

        #[cfg(feature = "sqlite")]
        Executor::Sqlite(ex) => sqlite::run_schema(ex, schema).await,
    }
}

/// Opens a connection pool for `config`.
///
/// Drivers that were not compiled into this binary are reported as unsupported.
pub async fn open(config: &DbConfig) -> DbResult<Arc<dyn Db + Send + Sync>> {
    match config.driver() {
        #[cfg(feature = "postgres")]
        Driver::Postgres => {
            let opts = postgres::PostgresOptions::try_from(config)?;
            let db: Arc<dyn Db + Send + Sync> = Arc::new(postgres::PostgresDb::connect(opts)?);
            Ok(db)
        }

        #[cfg(feature = "sqlite")]
        Driver::Sqlite => {
            let db: Arc<dyn Db + Send + Sync> =
                Arc::new(sqlite::connect(&config.connection_string()).await?);
            Ok(db)
        }

        driver => Err(DbError::UnsupportedDriver(driver.as_str().to_owned())),
    }
}

/// An established connection: the configuration it was created from and its pool.
#[derive(Derivative)]
#[derivative(Debug)]
struct Live {
    /// Configuration used to establish the connection.
    config: DbConfig,

    /// The connection pool.
    #[derivative(Debug = "ignore")]
    db: Arc<dyn Db + Send + Sync>,
}

/// Process-wide database context.
///
/// A `Database` starts disconnected.  It is connected once during application startup, shared
/// with every component that needs persistence, and disconnected at shutdown.  Operations that
/// need a live connection fail with `DbError::MissingConfig` while disconnected.
#[derive(Default)]
pub struct Database {
    /// The live connection, if any.
    live: RwLock<Option<Live>>,

    /// Last statement issued through this context, with its parameters inlined.
    last_query: Mutex<Option<String>>,
}

impl Database {
    /// Creates a new disconnected database context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Establishes a connection described by `config`, replacing any previous one.
    pub async fn connect(&self, config: DbConfig) -> DbResult<()> {
        let db = open(&config).await?;
        self.attach(config, db).await;
        Ok(())
    }

    /// Establishes a connection described by a flat key/value `map`.
    pub async fn connect_map(&self, map: &BTreeMap<String, String>) -> DbResult<()> {
        self.connect(DbConfig::from_map(map)?).await
    }

    /// Adopts an already-open `db` as the live connection described by `config`.
    pub async fn attach(&self, config: DbConfig, db: Arc<dyn Db + Send + Sync>) {
        let previous = {
            let mut live = self.live.write().unwrap_or_else(|e| e.into_inner());
            live.replace(Live { config, db })
        };
        if let Some(previous) = previous {
            previous.db.close().await;
        }
    }

    /// Returns the configuration of the live connection, if any.
    pub fn get_connection(&self) -> Option<DbConfig> {
        let live = self.live.read().unwrap_or_else(|e| e.into_inner());
        live.as_ref().map(|live| live.config.clone())
    }

    /// Tears down the live connection, if any.
    pub async fn disconnect(&self) {
        let previous = {
            let mut live = self.live.write().unwrap_or_else(|e| e.into_inner());
            live.take()
        };
        if let Some(previous) = previous {
            previous.db.close().await;
        }
        *self.last_query.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Returns the live connection or fails if there is none.
    pub fn db(&self) -> DbResult<Arc<dyn Db + Send + Sync>> {
        let live = self.live.read().unwrap_or_else(|e| e.into_inner());
        match live.as_ref() {
            Some(live) => Ok(live.db.clone()),
            None => Err(DbError::MissingConfig),
        }
    }

    /// Returns the dialect of the live connection or fails if there is none.
    pub fn dialect(&self) -> DbResult<Dialect> {
        Ok(self.db()?.dialect())
    }

    /// Begins a transaction on the live connection.
    pub async fn begin(&self) -> DbResult<TxExecutor> {
        self.db()?.begin().await
    }

    /// Runs `stmt` on the live connection and returns all rows it produced.
    pub async fn fetch_all(&self, stmt: &Statement) -> DbResult<Vec<Record>> {
        let db = self.db()?;
        self.record(stmt);
        fetch_all(&mut db.ex().await?, stmt).await
    }

    /// Runs `stmt` on the live connection without expecting rows back.
    pub async fn execute(&self, stmt: &Statement) -> DbResult<QueryDone> {
        let db = self.db()?;
        self.record(stmt);
        execute(&mut db.ex().await?, stmt).await
    }

    /// Runs a possibly multi-statement `schema` on the live connection.
    pub async fn run_schema(&self, schema: &str) -> DbResult<()> {
        let db = self.db()?;
        run_schema(&mut db.ex().await?, schema).await
    }

    /// Returns the last statement issued through this context with its parameters inlined.
    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remembers `stmt` as the last issued statement.
    fn record(&self, stmt: &Statement) {
        *self.last_query.lock().unwrap_or_else(|e| e.into_inner()) = Some(stmt.inlined());
    }
}

/// Macros to help instantiate tests for multiple database systems.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    pub use paste::paste;

    /// Instantiates the `module::name` test for the database configured by `setup`.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_one_test [
        ( $name:ident, $setup:expr, $module:path $(, #[$extra:meta] )? ) => {
            #[tokio::test]
            $(#[$extra])?
            async fn $name() {
                $crate::db::testutils::paste! {
                    $module :: [< $name >]($setup).await;
                }
            }
        }
    ];

    pub use generate_one_test;

    /// Instantiates a collection of tests for a specific database system.
    ///
    /// The database implementation to run the tests against is determined by the `setup`
    /// expression, which needs to return a ready-to-use database context.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_tests [
        ( #[$extra:meta], $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module, #[$extra]);
            )+
        };

        ( $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module);
            )+
        };
    ];

    pub use generate_tests;
}
