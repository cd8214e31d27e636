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

//! Fluent query builder and active-record layer on top of `trellis_core::db`.
//!
//! A `QueryBuilder` starts from a `Schema` (usually obtained from a type implementing `Model`) and
//! accumulates criteria, joins, ordering, grouping and pagination through chained calls.  Every
//! chained call validates its input immediately so that malformed queries never reach the
//! database.  `QueryBuilder::to_sql` renders the accumulated state into a `Statement` for a given
//! `Dialect`, and the terminal operations (`get`, `first`, `count`...) run that statement against
//! a connected `Database` and wrap the rows into `Entity` objects.
//!
//! ```ignore
//! let users = User::query()?
//!     .select(&["users.id AS user_id", "firstname", "user_professions.title"])?
//!     .join_to(UserProfession::SCHEMA, true)?
//!     .criteria("age", ">", 30)?
//!     .get(&db)
//!     .await?;
//! ```

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use serde_json::Value;
use trellis_core::db::{Database, DbError, QueryDone, Record, Statement};
use trellis_core::model::ModelError;
use trellis_core::rest::RestError;

mod builder;
pub use builder::{Direction, QueryBuilder};
mod criteria;
pub use criteria::{Connective, Criteria, Criterion, Operator};
mod entity;
pub use entity::{Entity, ModelCollection, Page};
mod join;
pub use join::{JoinClause, JoinKind};
mod schema;
pub use schema::{Model, Schema};
mod sql;
#[cfg(test)]
mod testutils;

/// Errors raised by the query builder.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DbalError {
    /// Indicates a failure in the database layer, including a missing connection.
    #[error("{0}")]
    Db(DbError),

    /// Indicates that a criterion or clause is malformed.
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    /// Indicates that an identifier (table, column or alias) is not acceptable.
    #[error("{0}")]
    InvalidIdentifier(String),

    /// Indicates that an entity operation needs an identifier the entity does not have.
    #[error("Entity of table `{0}` has not been persisted")]
    NotPersisted(String),

    /// Indicates that an operator is not in the supported set.
    #[error("Unsupported operator `{0}`")]
    UnsupportedOperator(String),

    /// Indicates that two models do not declare a foreign key between them.
    #[error("Wrong relation between `{0}` and `{1}`")]
    WrongRelation(String, String),
}

impl From<DbError> for DbalError {
    fn from(e: DbError) -> Self {
        DbalError::Db(e)
    }
}

impl From<ModelError> for DbalError {
    fn from(e: ModelError) -> Self {
        DbalError::InvalidIdentifier(e.to_string())
    }
}

impl From<DbalError> for RestError {
    fn from(e: DbalError) -> Self {
        match e {
            DbalError::Db(e) => RestError::from(e),
            DbalError::InvalidCriteria(_) => RestError::InvalidRequest(e.to_string()),
            DbalError::InvalidIdentifier(_) => RestError::InvalidRequest(e.to_string()),
            DbalError::NotPersisted(_) => RestError::InternalError(e.to_string()),
            DbalError::UnsupportedOperator(_) => RestError::InvalidRequest(e.to_string()),
            DbalError::WrongRelation(_, _) => RestError::NotFound(e.to_string()),
        }
    }
}

/// Result type for this crate.
pub type DbalResult<T> = Result<T, DbalError>;

/// Runs a raw `sql` statement with positional `params` that does not return rows.
///
/// The placeholders in `sql` must match the dialect of the connected database.
pub async fn execute(db: &Database, sql: &str, params: Vec<Value>) -> DbalResult<QueryDone> {
    Ok(db.execute(&Statement::with_params(sql, params)).await?)
}

/// Runs a raw `sql` query with positional `params` and returns all rows.
///
/// The placeholders in `sql` must match the dialect of the connected database.
pub async fn query(db: &Database, sql: &str, params: Vec<Value>) -> DbalResult<Vec<Record>> {
    Ok(db.fetch_all(&Statement::with_params(sql, params)).await?)
}

/// Returns the last statement issued against `db` with its parameters inlined, for diagnostics.
pub fn last_query(db: &Database) -> Option<String> {
    db.last_query()
}
