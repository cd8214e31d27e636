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

//! Rows wrapped as active records, plus the collections queries return.

use crate::sql::SqlWriter;
use crate::{DbalError, DbalResult, Schema};
use log::debug;
use serde_json::Value;
use trellis_core::db::{Database, DbError, Dialect, Record};
use trellis_core::model::Identifier;

/// A single row of a model's table.
///
/// Entities returned by queries are persisted.  Entities obtained from `QueryBuilder::create`
/// are not until they are saved.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    /// Model the row belongs to.
    schema: Schema,

    /// Column values of the row.
    record: Record,

    /// Whether the row is known to exist in the database.
    persisted: bool,
}

impl Entity {
    /// Creates a new empty entity of the `schema` model that is not persisted.
    pub(crate) fn new(schema: Schema) -> Self {
        Self { schema, record: Record::new(), persisted: false }
    }

    /// Wraps a `record` fetched from the database.
    pub(crate) fn from_record(schema: Schema, record: Record) -> Self {
        Self { schema, record, persisted: true }
    }

    /// Returns the schema of the model the entity belongs to.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the value of the `name` column, if present.
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    /// Sets the value of the `name` column.  The column name is validated when saving.
    pub fn set<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.record.insert(name.into(), value.into());
        self
    }

    /// Returns true if the entity has no columns at all.
    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Returns true if the entity is known to exist in the database.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Returns the primary key of the entity, if it has a non-null one.
    pub fn id(&self) -> Option<&Value> {
        self.record.get(self.schema.id_column).filter(|v| !v.is_null())
    }

    /// Returns the columns of the entity except for those the model declares as hidden.
    pub fn as_array(&self) -> Record {
        self.record
            .iter()
            .filter(|(name, _)| !self.schema.is_hidden(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Returns the validated columns to write, skipping the primary key.
    fn columns(&self) -> DbalResult<Vec<(Identifier, Value)>> {
        let mut columns = Vec::with_capacity(self.record.len());
        for (name, value) in &self.record {
            if name == self.schema.id_column {
                continue;
            }
            let column = Identifier::new(name.as_str())?;
            if column.segments().count() != 1 || column.as_str() == "*" {
                return Err(DbalError::InvalidIdentifier(format!(
                    "Cannot write to column '{}'",
                    column
                )));
            }
            columns.push((column, value.clone()));
        }
        Ok(columns)
    }

    /// Writes the entity to the database.
    ///
    /// Persisted entities with a primary key are updated in place.  Any other entity is inserted
    /// and picks up the primary key assigned by the database unless it already had one.
    pub async fn save(&mut self, db: &Database) -> DbalResult<()> {
        let dialect = db.dialect()?;
        match self.id().cloned() {
            Some(id) if self.persisted => self.update(db, dialect, id).await,
            _ => self.insert(db, dialect).await,
        }
    }

    /// Inserts the entity as a new row.
    async fn insert(&mut self, db: &Database, dialect: Dialect) -> DbalResult<()> {
        let table = Identifier::new(self.schema.table)?;
        let id_column = Identifier::new(self.schema.id_column)?;

        let mut columns = self.columns()?;
        if let Some(id) = self.id() {
            columns.push((id_column.clone(), id.clone()));
        }

        let mut w = SqlWriter::new(dialect);
        w.push("INSERT INTO ").ident(&table);
        if columns.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            w.push(" (");
            w.list(&columns, ", ", |w, (column, _)| {
                w.ident(column);
            });
            w.push(") VALUES (");
            w.list(&columns, ", ", |w, (_, value)| {
                w.param(value.clone());
            });
            w.push(")");
        }

        let id = match dialect {
            Dialect::Postgres => {
                w.push(" RETURNING ").ident(&id_column);
                let rows = db.fetch_all(&w.finish()).await?;
                rows.into_iter().next().and_then(|mut row| row.remove(self.schema.id_column))
            }
            Dialect::MySql | Dialect::Sqlite => {
                let done = db.execute(&w.finish()).await?;
                done.last_insert_id.map(Value::from)
            }
        };

        if self.id().is_none() {
            match id {
                Some(id) => {
                    debug!("Inserted into {} with id {}", self.schema.table, id);
                    self.record.insert(self.schema.id_column.to_owned(), id);
                }
                None => {
                    return Err(DbalError::Db(DbError::DataIntegrityError(format!(
                        "Insert into {} did not report an id",
                        self.schema.table
                    ))));
                }
            }
        }
        self.persisted = true;
        Ok(())
    }

    /// Updates the row identified by `id` with the current column values.
    async fn update(&mut self, db: &Database, dialect: Dialect, id: Value) -> DbalResult<()> {
        let columns = self.columns()?;
        if columns.is_empty() {
            return Ok(());
        }

        let mut w = SqlWriter::new(dialect);
        w.push("UPDATE ").ident(&Identifier::new(self.schema.table)?).push(" SET ");
        w.list(&columns, ", ", |w, (column, value)| {
            w.ident(column).push(" = ").param(value.clone());
        });
        w.push(" WHERE ").ident(&Identifier::new(self.schema.id_column)?).push(" = ").param(id);

        let done = db.execute(&w.finish()).await?;
        if done.rows_affected == 0 {
            return Err(DbalError::Db(DbError::NotFound));
        }
        Ok(())
    }

    /// Deletes the row identified by the primary key of the entity.
    ///
    /// The entity keeps its columns but is no longer considered persisted.
    pub async fn delete(&mut self, db: &Database) -> DbalResult<()> {
        let id = match self.id() {
            Some(id) => id.clone(),
            None => return Err(DbalError::NotPersisted(self.schema.table.to_owned())),
        };

        let mut w = SqlWriter::new(db.dialect()?);
        w.push("DELETE FROM ").ident(&Identifier::new(self.schema.table)?);
        w.push(" WHERE ").ident(&Identifier::new(self.schema.id_column)?).push(" = ").param(id);

        let done = db.execute(&w.finish()).await?;
        if done.rows_affected == 0 {
            return Err(DbalError::Db(DbError::NotFound));
        }
        self.persisted = false;
        Ok(())
    }
}

/// Rows returned by `QueryBuilder::get`, consumed once in order.
#[derive(Debug)]
pub struct ModelCollection {
    /// Model the rows belong to.
    schema: Schema,

    /// Rows not yet yielded.
    rows: std::vec::IntoIter<Record>,
}

impl ModelCollection {
    /// Wraps the `rows` of the `schema` model.
    pub(crate) fn new(schema: Schema, rows: Vec<Record>) -> Self {
        Self { schema, rows: rows.into_iter() }
    }
}

impl Iterator for ModelCollection {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|record| Entity::from_record(self.schema, record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for ModelCollection {}

/// One page of results from `QueryBuilder::paginate`.
#[derive(Debug)]
pub struct Page {
    /// Rows in this page.
    pub items: Vec<Entity>,

    /// Number of rows across all pages.
    pub total: u64,

    /// Maximum number of rows per page.
    pub per_page: u64,

    /// Number of this page, starting at 1.
    pub current_page: u64,
}

impl Page {
    /// Creates a new page.
    pub(crate) fn new(items: Vec<Entity>, total: u64, per_page: u64, current_page: u64) -> Self {
        Self { items, total, per_page, current_page }
    }

    /// Returns the number of the last page, which is 1 when there are no rows.
    pub fn last_page(&self) -> u64 {
        self.total.div_ceil(self.per_page.max(1)).max(1)
    }

    /// Returns the number of the next page, if there is one.
    pub fn next_page(&self) -> Option<u64> {
        if self.current_page < self.last_page() { Some(self.current_page + 1) } else { None }
    }

    /// Returns the number of the previous page, if there is one.
    pub fn previous_page(&self) -> Option<u64> {
        if self.current_page > 1 { Some(self.current_page - 1) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::*;
    use crate::{QueryBuilder, last_query};
    use serde_json::json;

    #[tokio::test]
    async fn test_save_inserts_then_updates() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut ann = users.create();
        assert!(ann.is_empty());
        assert!(!ann.is_persisted());
        ann.set("firstname", "Ann").set("lastname", "Lee").set("age", 30);
        ann.save(&db).await.unwrap();
        assert!(ann.is_persisted());
        assert_eq!(Some(&json!(3)), ann.id());

        ann.set("age", 31);
        ann.save(&db).await.unwrap();
        assert_eq!(
            "UPDATE `users` SET `firstname` = 'Ann', `lastname` = 'Lee', `age` = 31 WHERE `id` = 3",
            last_query(&db).unwrap()
        );

        let stored = users.find_one(&db, 3).await.unwrap().unwrap();
        assert_eq!(Some(&json!("Ann")), stored.prop("firstname"));
        assert_eq!(Some(&json!(31)), stored.prop("age"));
        assert_eq!(3, users.count(&db).await.unwrap());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_save_loaded_entity() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut john = users.find_one(&db, 1).await.unwrap().unwrap();
        john.set("country", "Spain");
        john.save(&db).await.unwrap();

        let spaniards = users.clone().criteria("country", "=", "Spain").unwrap();
        assert_eq!(1, spaniards.count(&db).await.unwrap());
        assert_eq!(2, users.count(&db).await.unwrap());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_save_vanished_row() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut john = users.find_one(&db, 1).await.unwrap().unwrap();
        users.delete_many(&db).await.unwrap();
        john.set("age", 46);
        assert_eq!(DbalError::Db(DbError::NotFound), john.save(&db).await.unwrap_err());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_save_empty_entity() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut empty = users.create();
        empty.save(&db).await.unwrap();
        assert_eq!("INSERT INTO `users` DEFAULT VALUES", last_query(&db).unwrap());
        assert_eq!(Some(&json!(3)), empty.id());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_save_explicit_id() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut user = users.create();
        user.set("id", 10).set("firstname", "Zed");
        user.save(&db).await.unwrap();
        assert_eq!(
            "INSERT INTO `users` (`firstname`, `id`) VALUES ('Zed', 10)",
            last_query(&db).unwrap()
        );
        assert!(users.find_one(&db, 10).await.unwrap().is_some());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_save_invalid_column() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut user = users.create();
        user.set("first name", "Bad");
        assert!(matches!(user.save(&db).await, Err(DbalError::InvalidIdentifier(_))));

        let mut user = users.create();
        user.set("users.firstname", "Bad");
        assert!(matches!(user.save(&db).await, Err(DbalError::InvalidIdentifier(_))));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_delete() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let mut jane = users.find_one(&db, 2).await.unwrap().unwrap();
        jane.delete(&db).await.unwrap();
        assert!(!jane.is_persisted());
        assert_eq!(Some(&json!("Jane")), jane.prop("firstname"));
        assert_eq!(1, users.count(&db).await.unwrap());
        assert_eq!(DbalError::Db(DbError::NotFound), jane.delete(&db).await.unwrap_err());

        let mut unsaved = users.create();
        assert_eq!(
            DbalError::NotPersisted("users".to_owned()),
            unsaved.delete(&db).await.unwrap_err()
        );

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_as_array_excludes_hidden() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let john = users.find_one(&db, 1).await.unwrap().unwrap();
        assert!(john.prop("created_at").is_some());

        let array = john.as_array();
        assert!(!array.contains_key("created_at"));
        let keys = array.keys().map(String::as_str).collect::<Vec<&str>>();
        assert_eq!(vec!["id", "firstname", "lastname", "age", "country"], keys);

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_as_array_excludes_hidden_in_joined_rows() {
        let db = setup().await;

        let john = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["users.*", "user_events.confirmed", "events.title AS event"])
            .unwrap()
            .join_to(USER_EVENTS, true)
            .unwrap()
            .join_through(EVENTS)
            .unwrap()
            .find_one(&db, 1)
            .await
            .unwrap()
            .unwrap();
        assert!(john.prop("created_at").is_some());
        let keys = john.as_array().keys().cloned().collect::<Vec<String>>();
        assert_eq!(
            vec!["id", "firstname", "lastname", "age", "country", "confirmed", "event"],
            keys
        );

        let pivot = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["firstname", "user_events.created_at AS created_at"])
            .unwrap()
            .join_to(USER_EVENTS, false)
            .unwrap()
            .first(&db)
            .await
            .unwrap()
            .unwrap();
        assert!(pivot.prop("created_at").is_some());
        let array = pivot.as_array();
        assert!(!array.contains_key("created_at"));
        assert_eq!(1, array.len());

        db.disconnect().await;
    }

    #[test]
    fn test_model_collection() {
        let mut row = Record::new();
        row.insert("id".to_owned(), json!(1));
        let mut rows = ModelCollection::new(USERS, vec![row.clone(), row]);
        assert_eq!(2, rows.len());

        let first = rows.next().unwrap();
        assert!(first.is_persisted());
        assert_eq!(Some(&json!(1)), first.id());
        assert_eq!(1, rows.len());
        assert!(rows.next().is_some());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_page_navigation() {
        let page = Page::new(vec![], 0, 10, 1);
        assert_eq!(1, page.last_page());
        assert_eq!(None, page.next_page());
        assert_eq!(None, page.previous_page());

        let page = Page::new(vec![], 10, 3, 2);
        assert_eq!(4, page.last_page());
        assert_eq!(Some(3), page.next_page());
        assert_eq!(Some(1), page.previous_page());

        let page = Page::new(vec![], 9, 3, 3);
        assert_eq!(3, page.last_page());
        assert_eq!(None, page.next_page());
    }
}
