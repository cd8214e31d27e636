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

//! Fluent construction and execution of queries against a model's table.

use crate::criteria::{Condition, render_conditions};
use crate::entity::{Entity, ModelCollection, Page};
use crate::join::{JoinClause, JoinKind};
use crate::sql::SqlWriter;
use crate::{Criteria, Criterion, DbalError, DbalResult, Schema};
use log::debug;
use serde_json::Value;
use std::str::FromStr;
use trellis_core::db::{Database, DbError, Dialect, Statement};
use trellis_core::model::Identifier;

/// Largest row count or offset that every backend accepts as an integer literal.
const MAX_ROWS: u64 = i64::MAX as u64;

/// Sort direction for `ORDER BY`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Ascending order.
    Asc,

    /// Descending order.
    Desc,
}

impl Direction {
    /// Returns the SQL keyword for the direction.
    fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = DbalError;

    fn from_str(s: &str) -> DbalResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            _ => Err(DbalError::InvalidCriteria(format!("Invalid sort direction '{}'", s))),
        }
    }
}

/// A column in the select list with its optional alias.
#[derive(Clone, Debug, PartialEq)]
struct Selection {
    /// Column to select, possibly qualified or a wildcard.
    column: Identifier,

    /// Name under which the column is returned.
    alias: Option<Identifier>,
}

impl Selection {
    /// Parses a `column` or `column AS alias` expression.  The `AS` keyword is case-insensitive.
    fn parse(expr: &str) -> DbalResult<Self> {
        let parts = expr.split_whitespace().collect::<Vec<&str>>();
        match parts.as_slice() {
            [column] => Ok(Self { column: Identifier::new(*column)?, alias: None }),
            [column, keyword, alias] if keyword.eq_ignore_ascii_case("as") => {
                Self::aliased(column, alias)
            }
            _ => Err(DbalError::InvalidIdentifier(format!("Invalid select expression '{}'", expr))),
        }
    }

    /// Creates a selection of `column` returned as `alias`.
    fn aliased(column: &str, alias: &str) -> DbalResult<Self> {
        let column = Identifier::new(column)?;
        if column.as_str().ends_with('*') {
            return Err(DbalError::InvalidIdentifier(format!("Cannot alias wildcard {}", column)));
        }
        let alias = Identifier::new(alias)?;
        if alias.segments().count() != 1 || alias.as_str() == "*" {
            return Err(DbalError::InvalidIdentifier(format!("Invalid alias '{}'", alias)));
        }
        Ok(Self { column, alias: Some(alias) })
    }

    /// Renders the selection into `w`.
    fn render(&self, w: &mut SqlWriter) {
        w.ident(&self.column);
        if let Some(alias) = self.alias.as_ref() {
            w.push(" AS ").ident(alias);
        }
    }
}

/// Fluent builder of queries against the table of a model.
///
/// Chained calls consume the builder and validate their input right away, so a builder that
/// exists is always renderable.  The same sequence of calls always renders the same SQL.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    /// Model the query starts from.
    schema: Schema,

    /// Validated name of the table of `schema`.
    table: Identifier,

    /// Model that the next `join_to` or `join_through` derives its join from.
    current: Schema,

    /// Columns to return.  Empty means all of them.
    selects: Vec<Selection>,

    /// Conditions of the `WHERE` clause.
    conditions: Vec<Condition>,

    /// Joins in the order they were added.
    joins: Vec<JoinClause>,

    /// Sort keys in priority order.
    order: Vec<(Identifier, Direction)>,

    /// Grouping columns.
    group_by: Vec<Identifier>,

    /// Conditions of the `HAVING` clause.
    having: Vec<Condition>,

    /// Maximum number of rows to return.
    limit: Option<u64>,

    /// Number of rows to skip.
    offset: Option<u64>,
}

impl QueryBuilder {
    /// Creates a builder that selects everything from the table of `schema`.
    pub fn new(schema: Schema) -> DbalResult<Self> {
        schema.validate()?;
        Ok(Self {
            schema,
            table: Identifier::new(schema.table)?,
            current: schema,
            selects: vec![],
            conditions: vec![],
            joins: vec![],
            order: vec![],
            group_by: vec![],
            having: vec![],
            limit: None,
            offset: None,
        })
    }

    /// Returns the schema of the model this query starts from.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Adds `columns` to the select list.  Each entry can be a plain column, a qualified column,
    /// a wildcard like `users.*`, or any of these followed by `AS alias`.
    pub fn select(mut self, columns: &[&str]) -> DbalResult<Self> {
        for column in columns {
            self.selects.push(Selection::parse(column)?);
        }
        Ok(self)
    }

    /// Adds `column` to the select list under `alias`.
    pub fn select_as(mut self, column: &str, alias: &str) -> DbalResult<Self> {
        self.selects.push(Selection::aliased(column, alias)?);
        Ok(self)
    }

    /// Adds a `column operator value` condition combined with `AND`.
    pub fn criteria<V: Into<Value>>(
        mut self,
        column: &str,
        operator: &str,
        value: V,
    ) -> DbalResult<Self> {
        self.conditions.push(Condition::Single(Criterion::new(column, operator, value)?));
        Ok(self)
    }

    /// Adds several conditions at once.  `Criteria::Any` groups render as bracketed `OR` groups.
    pub fn criterias(mut self, criterias: Vec<Criteria>) -> DbalResult<Self> {
        for criteria in criterias {
            self.conditions.push(Condition::from_criteria(criteria)?);
        }
        Ok(self)
    }

    /// Adds a `column operator value` condition to the `HAVING` clause.
    pub fn having<V: Into<Value>>(
        mut self,
        column: &str,
        operator: &str,
        value: V,
    ) -> DbalResult<Self> {
        self.having.push(Condition::Single(Criterion::new(column, operator, value)?));
        Ok(self)
    }

    /// Adds an inner join on `table` with the condition `(left, operator, right)`.
    pub fn join(self, table: &str, on: (&str, &str, &str)) -> DbalResult<Self> {
        self.inner_join(table, on)
    }

    /// Adds an inner join on `table` with the condition `(left, operator, right)`.
    pub fn inner_join(self, table: &str, on: (&str, &str, &str)) -> DbalResult<Self> {
        self.push_join(JoinClause::new(JoinKind::Inner, table, on)?)
    }

    /// Adds a left join on `table` with the condition `(left, operator, right)`.
    pub fn left_join(self, table: &str, on: (&str, &str, &str)) -> DbalResult<Self> {
        self.push_join(JoinClause::new(JoinKind::Left, table, on)?)
    }

    /// Adds a right join on `table` with the condition `(left, operator, right)`.
    pub fn right_join(self, table: &str, on: (&str, &str, &str)) -> DbalResult<Self> {
        self.push_join(JoinClause::new(JoinKind::Right, table, on)?)
    }

    /// Joins the `related` model using the foreign keys declared between it and the current
    /// model.  With `switch`, `related` becomes the current model so that the next relation join
    /// starts from it.
    pub fn join_to(mut self, related: Schema, switch: bool) -> DbalResult<Self> {
        related.validate()?;
        let join = JoinClause::between(&self.current, &related, false)?;
        if switch {
            self.current = related;
        }
        self.push_join(join)
    }

    /// Joins the `related` model through the current model, which typically is a pivot table
    /// reached with `join_to`.  The current model never changes.
    pub fn join_through(self, related: Schema) -> DbalResult<Self> {
        related.validate()?;
        let join = JoinClause::between(&self.current, &related, true)?;
        self.push_join(join)
    }

    /// Appends a validated `join`.
    fn push_join(mut self, join: JoinClause) -> DbalResult<Self> {
        self.joins.push(join);
        Ok(self)
    }

    /// Adds a sort key.  Keys apply in the order they are added.
    pub fn order_by(mut self, column: &str, direction: Direction) -> DbalResult<Self> {
        self.order.push((Identifier::new(column)?, direction));
        Ok(self)
    }

    /// Adds grouping columns.
    pub fn group_by(mut self, columns: &[&str]) -> DbalResult<Self> {
        for column in columns {
            self.group_by.push(Identifier::new(*column)?);
        }
        Ok(self)
    }

    /// Limits the number of returned rows.  Values past `i64::MAX` are clamped to it.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit.min(MAX_ROWS));
        self
    }

    /// Skips the first `offset` rows.  Values past `i64::MAX` are clamped to it.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset.min(MAX_ROWS));
        self
    }

    /// Renders the query for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> Statement {
        let mut w = SqlWriter::new(dialect);
        w.push("SELECT ");
        if self.selects.is_empty() {
            w.push("*");
        } else {
            w.list(&self.selects, ", ", |w, selection| selection.render(w));
        }
        self.render_body(&mut w);

        if !self.order.is_empty() {
            w.push(" ORDER BY ");
            w.list(&self.order, ", ", |w, (column, direction)| {
                w.ident(column).push(" ").push(direction.as_sql());
            });
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => {
                w.push(&format!(" LIMIT {}", limit));
            }
            (None, Some(_)) => match w.dialect() {
                Dialect::MySql => {
                    w.push(" LIMIT 18446744073709551615");
                }
                Dialect::Sqlite => {
                    w.push(" LIMIT -1");
                }
                Dialect::Postgres => (),
            },
            (None, None) => (),
        }
        if let Some(offset) = self.offset {
            w.push(&format!(" OFFSET {}", offset));
        }

        w.finish()
    }

    /// Renders a query that counts the rows the query would return, ignoring the select list,
    /// the sort keys and the pagination.
    pub fn to_count_sql(&self, dialect: Dialect) -> Statement {
        let mut w = SqlWriter::new(dialect);
        if self.group_by.is_empty() {
            w.push("SELECT COUNT(*) AS count");
            self.render_body(&mut w);
        } else {
            w.push("SELECT COUNT(*) AS count FROM (SELECT 1");
            self.render_body(&mut w);
            w.push(") AS grouped");
        }
        w.finish()
    }

    /// Renders everything from the `FROM` clause up to the `HAVING` clause.
    fn render_body(&self, w: &mut SqlWriter) {
        w.push(" FROM ").ident(&self.table);
        for join in &self.joins {
            w.push(" ");
            join.render(w);
        }
        if !self.conditions.is_empty() {
            w.push(" WHERE ");
            render_conditions(w, &self.conditions);
        }
        if !self.group_by.is_empty() {
            w.push(" GROUP BY ");
            w.list(&self.group_by, ", ", |w, column| {
                w.ident(column);
            });
        }
        if !self.having.is_empty() {
            w.push(" HAVING ");
            render_conditions(w, &self.having);
        }
    }

    /// Runs the query and returns all matching rows.
    pub async fn get(&self, db: &Database) -> DbalResult<ModelCollection> {
        let stmt = self.to_sql(db.dialect()?);
        debug!("Querying {}: {}", self.schema.table, stmt.sql);
        let rows = db.fetch_all(&stmt).await?;
        Ok(ModelCollection::new(self.schema, rows))
    }

    /// Runs the query limited to one row and returns that row, if any.
    pub async fn first(&self, db: &Database) -> DbalResult<Option<Entity>> {
        let query = self.clone().limit(1);
        let mut rows = query.get(db).await?;
        Ok(rows.next())
    }

    /// Returns the row whose primary key equals `id`, if any.
    pub async fn find_one<V: Into<Value>>(
        &self,
        db: &Database,
        id: V,
    ) -> DbalResult<Option<Entity>> {
        let query = self.clone().criteria(&self.schema.qualified_id(), "=", id)?;
        query.first(db).await
    }

    /// Returns the first row whose `column` equals `value`, if any.
    pub async fn find_one_by<V: Into<Value>>(
        &self,
        db: &Database,
        column: &str,
        value: V,
    ) -> DbalResult<Option<Entity>> {
        let query = self.clone().criteria(column, "=", value)?;
        query.first(db).await
    }

    /// Returns the number of rows the query matches.
    pub async fn count(&self, db: &Database) -> DbalResult<u64> {
        let stmt = self.to_count_sql(db.dialect()?);
        let rows = db.fetch_all(&stmt).await?;
        match rows.first().and_then(|row| row.get("count")).and_then(Value::as_u64) {
            Some(count) => Ok(count),
            None => Err(DbalError::Db(DbError::DataIntegrityError(format!(
                "Count query on {} did not return a count",
                self.schema.table
            )))),
        }
    }

    /// Returns the `page`th group of `per_page` rows, counting pages from 1, along with the
    /// total number of matching rows.  Pages below 1 are treated as the first page.
    pub async fn paginate(&self, db: &Database, per_page: u64, page: u64) -> DbalResult<Page> {
        if per_page == 0 {
            return Err(DbalError::InvalidCriteria("Page size must be positive".to_owned()));
        }
        let page = page.max(1);

        let total = self.count(db).await?;
        let items = match (page - 1).checked_mul(per_page) {
            Some(offset) if offset <= MAX_ROWS => {
                let query = self.clone().limit(per_page).offset(offset);
                query.get(db).await?.collect()
            }
            _ => {
                debug!("Page {} of {} is out of range", page, self.schema.table);
                vec![]
            }
        };
        Ok(Page::new(items, total, per_page, page))
    }

    /// Deletes all rows matching the conditions of the query and returns how many were deleted.
    ///
    /// Queries with joins or grouping are rejected because their meaning as a deletion differs
    /// across backends.
    pub async fn delete_many(&self, db: &Database) -> DbalResult<u64> {
        if !self.joins.is_empty() || !self.group_by.is_empty() {
            return Err(DbalError::InvalidCriteria(format!(
                "Cannot delete from {} with joins or grouping",
                self.schema.table
            )));
        }

        let mut w = SqlWriter::new(db.dialect()?);
        w.push("DELETE FROM ").ident(&self.table);
        if !self.conditions.is_empty() {
            w.push(" WHERE ");
            render_conditions(&mut w, &self.conditions);
        }
        let done = db.execute(&w.finish()).await?;
        Ok(done.rows_affected)
    }

    /// Creates a new, not yet persisted, entity of the model this query starts from.
    pub fn create(&self) -> Entity {
        Entity::new(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::last_query;
    use crate::testutils::*;
    use serde_json::json;

    #[test]
    fn test_direction_from_str() {
        assert_eq!(Direction::Asc, Direction::from_str("asc").unwrap());
        assert_eq!(Direction::Desc, Direction::from_str(" DESC ").unwrap());
        assert!(matches!(Direction::from_str("down"), Err(DbalError::InvalidCriteria(_))));
    }

    #[test]
    fn test_select_with_aliases_and_join_to() {
        let query = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["users.id AS user_id", "firstname", "user_professions.title"])
            .unwrap()
            .join_to(USER_PROFESSIONS, true)
            .unwrap();
        assert_eq!(
            "SELECT `users`.`id` AS `user_id`, `firstname`, `user_professions`.`title` \
             FROM `users` JOIN `user_professions` ON `user_professions`.`user_id` = `users`.`id`",
            query.to_sql(Dialect::Sqlite).sql
        );
    }

    #[test]
    fn test_select_errors() {
        let query = QueryBuilder::new(USERS).unwrap();
        for expr in ["a AS", "a b", "a AS b c", "users.* AS everything", "a AS b.c", "a AS *"] {
            match query.clone().select(&[expr]) {
                Err(DbalError::InvalidIdentifier(_)) => (),
                e => panic!("Unexpected result for '{}': {:?}", expr, e),
            }
        }
        assert!(query.clone().select_as("id", "uid").is_ok());
        assert!(query.clone().order_by("age; --", Direction::Asc).is_err());
        assert!(query.group_by(&["bad column"]).is_err());
    }

    #[tokio::test]
    async fn test_chained_join_to_switches_context() {
        let db = setup().await;

        let query = QueryBuilder::new(USERS)
            .unwrap()
            .join_to(MEETINGS, true)
            .unwrap()
            .join_to(TICKETS, true)
            .unwrap();
        assert_eq!(
            "SELECT * FROM `users` \
             JOIN `meetings` ON `meetings`.`user_id` = `users`.`id` \
             JOIN `tickets` ON `tickets`.`meeting_id` = `meetings`.`id`",
            query.to_sql(Dialect::Sqlite).sql
        );

        let rows = query
            .select(&["firstname", "meetings.title AS meeting", "number"])
            .unwrap()
            .criteria("tickets.type", "=", "regular")
            .unwrap()
            .order_by("tickets.id", Direction::Asc)
            .unwrap()
            .get(&db)
            .await
            .unwrap()
            .collect::<Vec<Entity>>();
        assert_eq!(2, rows.len());
        for (row, number) in rows.iter().zip(["R1245", "R4563"]) {
            assert_eq!(Some(&json!("John")), row.prop("firstname"));
            assert_eq!(Some(&json!("Business planning")), row.prop("meeting"));
            assert_eq!(Some(&json!(number)), row.prop("number"));
        }

        db.disconnect().await;
    }

    #[test]
    fn test_join_to_without_switch() {
        let query = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["users.*", "user_professions.title", "user_events.event_id"])
            .unwrap()
            .join_to(USER_PROFESSIONS, false)
            .unwrap()
            .join_to(USER_EVENTS, false)
            .unwrap();
        assert_eq!(
            "SELECT `users`.*, `user_professions`.`title`, `user_events`.`event_id` FROM `users` \
             JOIN `user_professions` ON `user_professions`.`user_id` = `users`.`id` \
             JOIN `user_events` ON `user_events`.`user_id` = `users`.`id`",
            query.to_sql(Dialect::Sqlite).sql
        );
    }

    #[test]
    fn test_join_to_outbound_key() {
        let query = QueryBuilder::new(TICKETS).unwrap().join_to(MEETINGS, true).unwrap();
        assert_eq!(
            "SELECT * FROM `tickets` JOIN `meetings` ON `meetings`.`id` = `tickets`.`meeting_id`",
            query.to_sql(Dialect::Sqlite).sql
        );
    }

    #[tokio::test]
    async fn test_join_to_wrong_relation() {
        let db = setup().await;
        let result = QueryBuilder::new(EVENTS).unwrap().join_to(TICKETS, true);
        assert_eq!(
            DbalError::WrongRelation("events".to_owned(), "tickets".to_owned()),
            result.unwrap_err()
        );
        assert_eq!(None, last_query(&db));
        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_join_through_keeps_context() {
        let db = setup().await;

        let query = QueryBuilder::new(USERS)
            .unwrap()
            .select(&[
                "users.id AS user_id",
                "events.id AS event_id",
                "firstname",
                "confirmed",
                "events.title AS event_title",
            ])
            .unwrap()
            .join_to(USER_EVENTS, true)
            .unwrap()
            .join_through(EVENTS)
            .unwrap()
            .criteria("user_events.confirmed", "=", "Yes")
            .unwrap()
            .order_by("user_events.created_at", Direction::Desc)
            .unwrap();
        let rows = query.get(&db).await.unwrap().collect::<Vec<Entity>>();

        assert_eq!(
            squash(
                "SELECT `users`.`id` AS `user_id`, `events`.`id` AS `event_id`, `firstname`,
                    `confirmed`, `events`.`title` AS `event_title`
                FROM `users`
                JOIN `user_events` ON `user_events`.`user_id` = `users`.`id`
                JOIN `events` ON `events`.`id` = `user_events`.`event_id`
                WHERE `user_events`.`confirmed` = 'Yes'
                ORDER BY `user_events`.`created_at` DESC"
            ),
            last_query(&db).unwrap()
        );
        assert_eq!(2, rows.len());
        assert_eq!(Some(&json!("Yes")), rows[0].prop("confirmed"));
        assert_eq!(Some(&json!("Music")), rows[0].prop("event_title"));
        assert_eq!(Some(&json!("Jane")), rows[0].prop("firstname"));
        assert_eq!(Some(&json!("Dance")), rows[1].prop("event_title"));

        // The pivot table stays current, so another relation join still starts from it.
        let query = query.join_to(USERS, false).unwrap();
        assert!(
            query
                .to_sql(Dialect::Sqlite)
                .sql
                .ends_with("JOIN `users` ON `users`.`id` = `user_events`.`user_id`")
        );

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_consecutive_join_through_start_from_same_model() {
        let db = setup().await;

        let query = QueryBuilder::new(USER_EVENTS)
            .unwrap()
            .select(&["user_events.id", "firstname", "events.title AS event"])
            .unwrap()
            .join_through(USERS)
            .unwrap()
            .join_through(EVENTS)
            .unwrap()
            .order_by("user_events.id", Direction::Asc)
            .unwrap();
        assert_eq!(
            squash(
                "SELECT `user_events`.`id`, `firstname`, `events`.`title` AS `event`
                FROM `user_events`
                JOIN `users` ON `users`.`id` = `user_events`.`user_id`
                JOIN `events` ON `events`.`id` = `user_events`.`event_id`
                ORDER BY `user_events`.`id` ASC"
            ),
            query.to_sql(Dialect::Sqlite).sql
        );

        let rows = query.get(&db).await.unwrap().collect::<Vec<Entity>>();
        assert_eq!(6, rows.len());
        assert_eq!(Some(&json!("John")), rows[0].prop("firstname"));
        assert_eq!(Some(&json!("Dance")), rows[0].prop("event"));
        assert_eq!(Some(&json!("Jane")), rows[5].prop("firstname"));
        assert_eq!(Some(&json!("Film")), rows[5].prop("event"));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_join_through_outbound_key() {
        let db = setup().await;

        let query = QueryBuilder::new(TICKETS)
            .unwrap()
            .select(&["number", "meetings.title AS meeting"])
            .unwrap()
            .join_through(MEETINGS)
            .unwrap()
            .criteria("tickets.type", "=", "vip")
            .unwrap()
            .order_by("tickets.id", Direction::Asc)
            .unwrap();
        let rows = query.get(&db).await.unwrap().collect::<Vec<Entity>>();

        assert_eq!(
            squash(
                "SELECT `number`, `meetings`.`title` AS `meeting` FROM `tickets`
                JOIN `meetings` ON `meetings`.`id` = `tickets`.`meeting_id`
                WHERE `tickets`.`type` = 'vip'
                ORDER BY `tickets`.`id` ASC"
            ),
            last_query(&db).unwrap()
        );
        let found = rows
            .iter()
            .map(|row| (row.prop("number").cloned(), row.prop("meeting").cloned()))
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                (Some(json!("V4563")), Some(json!("Business planning"))),
                (Some(json!("V7854")), Some(json!("Business management"))),
                (Some(json!("V7410")), Some(json!("Business management"))),
            ],
            found
        );

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_first_with_relation_joins() {
        let db = setup().await;

        let john = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["firstname", "user_professions.title AS profession", "events.title AS event"])
            .unwrap()
            .join_to(USER_PROFESSIONS, false)
            .unwrap()
            .join_to(USER_EVENTS, true)
            .unwrap()
            .join_through(EVENTS)
            .unwrap()
            .order_by("users.id", Direction::Asc)
            .unwrap()
            .order_by("events.id", Direction::Asc)
            .unwrap()
            .first(&db)
            .await
            .unwrap()
            .unwrap();
        assert!(last_query(&db).unwrap().ends_with(" LIMIT 1"));
        assert_eq!(Some(&json!("John")), john.prop("firstname"));
        assert_eq!(Some(&json!("Writer")), john.prop("profession"));
        assert_eq!(Some(&json!("Dance")), john.prop("event"));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_relation_join_results() {
        let db = setup().await;

        let rows = QueryBuilder::new(USERS)
            .unwrap()
            .join_to(USER_EVENTS, true)
            .unwrap()
            .order_by("user_events.id", Direction::Asc)
            .unwrap()
            .get(&db)
            .await
            .unwrap();
        assert_eq!(6, rows.len());
        let rows = rows.collect::<Vec<Entity>>();
        assert_eq!(Some(&json!(1)), rows[0].prop("event_id"));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_explicit_joins() {
        let db = setup().await;

        let query = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["users.*", "events.*"])
            .unwrap()
            .join("user_events", ("user_events.user_id", "=", "users.id"))
            .unwrap()
            .join("events", ("events.id", "=", "user_events.event_id"))
            .unwrap()
            .order_by("user_events.id", Direction::Asc)
            .unwrap();

        let rows = query.get(&db).await.unwrap().collect::<Vec<Entity>>();
        assert_eq!(6, rows.len());
        assert_eq!(Some(&json!("Dance")), rows[0].prop("title"));

        let rows = query.criteria("events.started_at", ">=", "2020-01-01").unwrap().get(&db).await;
        assert_eq!(2, rows.unwrap().len());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_inner_and_left_joins() {
        let db = setup().await;

        let inner = QueryBuilder::new(USER_EVENTS)
            .unwrap()
            .inner_join("events", ("events.id", "=", "user_events.event_id"))
            .unwrap()
            .get(&db)
            .await
            .unwrap();
        assert_eq!(6, inner.len());

        let left = QueryBuilder::new(USER_EVENTS)
            .unwrap()
            .left_join("events", ("events.id", "=", "user_events.event_id"))
            .unwrap()
            .order_by("user_events.id", Direction::Asc)
            .unwrap()
            .get(&db)
            .await
            .unwrap()
            .collect::<Vec<Entity>>();
        assert_eq!(8, left.len());
        assert_eq!(Some(&Value::Null), left[7].prop("id"));
        assert_eq!(Some(&Value::Null), left[7].prop("title"));
        assert_eq!(Some(&json!(220)), left[7].prop("event_id"));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_get_and_find() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let all = users.clone().order_by("id", Direction::Asc).unwrap().get(&db).await.unwrap();
        let names = all.map(|u| u.prop("firstname").cloned()).collect::<Vec<Option<Value>>>();
        assert_eq!(vec![Some(json!("John")), Some(json!("Jane"))], names);

        let john = users.find_one(&db, 1).await.unwrap().unwrap();
        assert_eq!(Some(&json!("John")), john.prop("firstname"));
        assert_eq!(Some(&json!("Doe")), john.prop("lastname"));
        assert_eq!(Some(&json!(1)), john.id());

        assert!(users.find_one(&db, 99).await.unwrap().is_none());

        let john = users.find_one_by(&db, "firstname", "John").await.unwrap().unwrap();
        assert_eq!(Some(&json!("Doe")), john.prop("lastname"));
        assert_eq!(Some(&json!(45)), john.prop("age"));

        assert!(users.find_one_by(&db, "firstname", "Nobody").await.unwrap().is_none());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_first_and_count() {
        let db = setup().await;
        let users = QueryBuilder::new(USERS).unwrap();

        let first = users.first(&db).await.unwrap().unwrap();
        assert_eq!(Some(&json!("Doe")), first.prop("lastname"));

        let young = users.clone().criteria("age", "<", 50).unwrap();
        let first = young.first(&db).await.unwrap().unwrap();
        assert_eq!(Some(&json!("John")), first.prop("firstname"));
        assert_eq!(2, young.count(&db).await.unwrap());

        let irish = users.clone().criteria("country", "=", "Ireland").unwrap();
        assert_eq!(1, irish.count(&db).await.unwrap());
        assert_eq!(
            "SELECT COUNT(*) AS count FROM `users` WHERE `country` = 'Ireland'",
            last_query(&db).unwrap()
        );

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_order_by_joined_alias() {
        let db = setup().await;

        let oldest = QueryBuilder::new(USERS)
            .unwrap()
            .join_to(USER_PROFESSIONS, false)
            .unwrap()
            .select(&["users.*", "user_professions.title AS profession"])
            .unwrap()
            .order_by("age", Direction::Desc)
            .unwrap()
            .first(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(&json!("Writer")), oldest.prop("profession"));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_or_groups() {
        let db = setup().await;

        let events = QueryBuilder::new(EVENTS)
            .unwrap()
            .criterias(vec![
                Criteria::new("country", "=", "Ireland"),
                Criteria::any(vec![
                    Criteria::new("title", "=", "Film"),
                    Criteria::new("started_at", "<", "2021-01-01"),
                ]),
            ])
            .unwrap()
            .order_by("id", Direction::Asc)
            .unwrap()
            .get(&db)
            .await
            .unwrap();
        let ids = events.map(|e| e.id().cloned()).collect::<Vec<Option<Value>>>();
        assert_eq!(vec![Some(json!(3)), Some(json!(5))], ids);

        let count = QueryBuilder::new(EVENTS)
            .unwrap()
            .criteria("started_at", "NULL", Value::Null)
            .unwrap()
            .criteria("title", "IN", json!(["Art", "Music"]))
            .unwrap()
            .count(&db)
            .await
            .unwrap();
        assert_eq!(2, count);

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_group_by_and_having() {
        let db = setup().await;

        let query = QueryBuilder::new(EVENTS)
            .unwrap()
            .select(&["country"])
            .unwrap()
            .group_by(&["country"])
            .unwrap()
            .having("country", "!=", "England")
            .unwrap()
            .order_by("country", Direction::Asc)
            .unwrap();
        assert_eq!(
            "SELECT `country` FROM `events` GROUP BY `country` HAVING `country` != ? \
             ORDER BY `country` ASC",
            query.to_sql(Dialect::Sqlite).sql
        );

        let countries = query.get(&db).await.unwrap();
        let countries = countries.map(|e| e.prop("country").cloned()).collect::<Vec<_>>();
        assert_eq!(
            vec![Some(json!("Ireland")), Some(json!("Island")), Some(json!("New Zealand"))],
            countries
        );
        assert_eq!(3, query.count(&db).await.unwrap());

        db.disconnect().await;
    }

    #[test]
    fn test_identical_chains_render_identical_sql() {
        let build = || {
            QueryBuilder::new(USERS)
                .unwrap()
                .select(&["users.id AS user_id", "events.title"])
                .unwrap()
                .join_to(USER_EVENTS, true)
                .unwrap()
                .join_through(EVENTS)
                .unwrap()
                .criteria("age", ">", 30)
                .unwrap()
                .criterias(vec![Criteria::any(vec![
                    Criteria::new("country", "=", "Ireland"),
                    Criteria::new("country", "=", "England"),
                ])])
                .unwrap()
                .order_by("age", Direction::Desc)
                .unwrap()
                .limit(10)
                .offset(20)
        };
        assert_eq!(build().to_sql(Dialect::Postgres), build().to_sql(Dialect::Postgres));

        let stmt = build().to_sql(Dialect::Postgres);
        assert_eq!(
            "SELECT \"users\".\"id\" AS \"user_id\", \"events\".\"title\" FROM \"users\" \
             JOIN \"user_events\" ON \"user_events\".\"user_id\" = \"users\".\"id\" \
             JOIN \"events\" ON \"events\".\"id\" = \"user_events\".\"event_id\" \
             WHERE \"age\" > $1 AND (\"country\" = $2 OR \"country\" = $3) \
             ORDER BY \"age\" DESC LIMIT 10 OFFSET 20",
            stmt.sql
        );
        assert_eq!(vec![json!(30), json!("Ireland"), json!("England")], stmt.params);
    }

    #[test]
    fn test_offset_without_limit() {
        let query = QueryBuilder::new(USERS).unwrap().offset(1);
        assert_eq!("SELECT * FROM `users` LIMIT -1 OFFSET 1", query.to_sql(Dialect::Sqlite).sql);
        assert_eq!(
            "SELECT * FROM `users` LIMIT 18446744073709551615 OFFSET 1",
            query.to_sql(Dialect::MySql).sql
        );
        assert_eq!("SELECT * FROM \"users\" OFFSET 1", query.to_sql(Dialect::Postgres).sql);
    }

    #[test]
    fn test_count_sql() {
        let query = QueryBuilder::new(USERS)
            .unwrap()
            .select(&["firstname"])
            .unwrap()
            .criteria("age", ">", 1)
            .unwrap()
            .order_by("age", Direction::Asc)
            .unwrap()
            .limit(5);
        assert_eq!(
            "SELECT COUNT(*) AS count FROM `users` WHERE `age` > ?",
            query.to_count_sql(Dialect::Sqlite).sql
        );

        let query = query.group_by(&["country"]).unwrap();
        assert_eq!(
            "SELECT COUNT(*) AS count FROM (SELECT 1 FROM `users` WHERE `age` > ? \
             GROUP BY `country`) AS grouped",
            query.to_count_sql(Dialect::Sqlite).sql
        );
    }

    #[tokio::test]
    async fn test_paginate() {
        let db = setup().await;
        let query = QueryBuilder::new(USER_EVENTS).unwrap().order_by("id", Direction::Asc).unwrap();

        let page = query.paginate(&db, 3, 2).await.unwrap();
        assert_eq!(8, page.total);
        assert_eq!(3, page.per_page);
        assert_eq!(2, page.current_page);
        assert_eq!(3, page.last_page());
        assert_eq!(Some(3), page.next_page());
        assert_eq!(Some(1), page.previous_page());
        let ids = page.items.iter().map(|e| e.id().cloned()).collect::<Vec<_>>();
        assert_eq!(vec![Some(json!(4)), Some(json!(5)), Some(json!(6))], ids);

        let page = query.paginate(&db, 3, 3).await.unwrap();
        assert_eq!(2, page.items.len());
        assert_eq!(None, page.next_page());

        let page = query.paginate(&db, 3, 0).await.unwrap();
        assert_eq!(1, page.current_page);
        assert_eq!(None, page.previous_page());

        assert!(matches!(query.paginate(&db, 0, 1).await, Err(DbalError::InvalidCriteria(_))));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_paginate_out_of_range() {
        let db = setup().await;
        let query = QueryBuilder::new(USER_EVENTS).unwrap();

        let page = query.paginate(&db, 10, u64::MAX).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(8, page.total);
        assert_eq!(u64::MAX, page.current_page);
        assert_eq!(None, page.next_page());

        let page = query.paginate(&db, 1, u64::MAX / 2 + 10).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(8, page.total);

        let page = query.paginate(&db, u64::MAX, 1).await.unwrap();
        assert_eq!(8, page.items.len());
        assert_eq!(1, page.last_page());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_limit_and_offset_are_clamped() {
        let db = setup().await;

        let query = QueryBuilder::new(USER_EVENTS).unwrap().limit(u64::MAX).offset(u64::MAX);
        assert_eq!(
            "SELECT * FROM `user_events` LIMIT 9223372036854775807 OFFSET 9223372036854775807",
            query.to_sql(Dialect::Sqlite).sql
        );
        assert_eq!(0, query.get(&db).await.unwrap().len());

        let query = QueryBuilder::new(USER_EVENTS).unwrap().limit(u64::MAX);
        assert_eq!(8, query.get(&db).await.unwrap().len());

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_delete_many() {
        let db = setup().await;

        let unconfirmed = QueryBuilder::new(USER_EVENTS).unwrap().criteria("confirmed", "=", "No");
        assert_eq!(6, unconfirmed.unwrap().delete_many(&db).await.unwrap());
        assert_eq!(
            "DELETE FROM `user_events` WHERE `confirmed` = 'No'",
            last_query(&db).unwrap()
        );
        assert_eq!(2, QueryBuilder::new(USER_EVENTS).unwrap().count(&db).await.unwrap());

        let joined = QueryBuilder::new(USERS).unwrap().join_to(USER_EVENTS, true).unwrap();
        assert!(matches!(joined.delete_many(&db).await, Err(DbalError::InvalidCriteria(_))));

        db.disconnect().await;
    }

    #[tokio::test]
    async fn test_terminal_operations_without_connection() {
        let db = Database::new();
        let query = QueryBuilder::new(USERS).unwrap();

        let missing = DbalError::Db(DbError::MissingConfig);
        assert_eq!(missing, query.get(&db).await.unwrap_err());
        assert_eq!(missing, query.first(&db).await.unwrap_err());
        assert_eq!(missing, query.find_one(&db, 1).await.unwrap_err());
        assert_eq!(missing, query.count(&db).await.unwrap_err());
        assert_eq!(missing, query.delete_many(&db).await.unwrap_err());
    }
}
