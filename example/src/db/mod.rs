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

//! Database abstraction in terms of the operations needed by the blog.

use crate::model::*;
use log::debug;
use trellis_core::db::{Database, DbError, DbResult, Dialect};
use trellis_core::model::ModelError;
use trellis_dbal::{DbalError, DbalResult, Direction, Entity, Model, QueryBuilder};


/// Initializes the database schema.
pub(crate) async fn init_schema(db: &Database) -> DbResult<()> {
    match db.dialect()? {
        Dialect::Postgres => db.run_schema(include_str!("postgres.sql")).await,
        Dialect::Sqlite => db.run_schema(include_str!("sqlite.sql")).await,
        Dialect::MySql => Err(DbError::UnsupportedDriver("mysql".to_owned())),
    }
}

/// Converts a row that the database returned into one of our types.
///
/// Rows that do not decode indicate a schema mismatch, not a bad request.
fn decode<T: TryFrom<Entity, Error = ModelError>>(entity: Entity) -> DbalResult<T> {
    T::try_from(entity).map_err(|e| DbalError::Db(DbError::DataIntegrityError(e.0)))
}

/// Starts a query on posts that also returns the username of their author as `author`.
fn posts_with_author() -> DbalResult<QueryBuilder> {
    Posts::query()?
        .select(&["posts.*", "users.username AS author"])?
        .join_to(Users::SCHEMA, false)?
        .order_by("posts.id", Direction::Desc)
}

/// Gets the user identified by `id`, if it exists.
pub(crate) async fn get_user(db: &Database, id: i64) -> DbalResult<Option<User>> {
    match Users::query()?.find_one(db, id).await? {
        Some(entity) => Ok(Some(decode(entity)?)),
        None => Ok(None),
    }
}

/// Registers a new user described by `form` and returns it.
///
/// Fails with `DbError::AlreadyExists` if the username is taken.
pub(crate) async fn create_user(db: &Database, form: &UserForm) -> DbalResult<User> {
    let mut entity = Users::query()?.create();
    entity.set("username", form.username().as_str()).set("email", form.email().as_str());
    entity.save(db).await?;
    debug!("Created user {}", form.username().as_str());
    decode(entity)
}

/// Gets the `page`th page of posts, newest first, with `per_page` posts each.
pub(crate) async fn list_posts(db: &Database, per_page: u64, page: u64) -> DbalResult<PostPage> {
    let page = posts_with_author()?.paginate(db, per_page, page).await?;
    let last_page = page.last_page();
    let items = page.items.into_iter().map(decode).collect::<DbalResult<Vec<Post>>>()?;
    Ok(PostPage { items, total: page.total, current_page: page.current_page, last_page })
}

/// Gets the post identified by `id`, if it exists.
pub(crate) async fn get_post(db: &Database, id: i64) -> DbalResult<Option<Post>> {
    match posts_with_author()?.find_one(db, id).await? {
        Some(entity) => Ok(Some(decode(entity)?)),
        None => Ok(None),
    }
}

/// Gets all posts written by the user called `username`, newest first.
pub(crate) async fn posts_by_author(db: &Database, username: &str) -> DbalResult<Vec<Post>> {
    let rows = posts_with_author()?.criteria("users.username", "=", username)?.get(db).await?;
    rows.map(decode).collect()
}

/// Creates a new post authored by `user_id` and returns it.
pub(crate) async fn create_post(db: &Database, user_id: i64, form: &PostForm) -> DbalResult<Post> {
    let mut entity = Posts::query()?.create();
    entity
        .set("user_id", user_id)
        .set("title", form.title().as_str())
        .set("body", form.body().as_str());
    entity.save(db).await?;
    debug!("User {} created post {:?}", user_id, entity.id());
    decode(entity)
}

/// Replaces the contents of the post identified by `id` and returns the updated post.
///
/// Fails with `DbError::NotFound` if the post does not exist.
pub(crate) async fn update_post(db: &Database, id: i64, form: &PostForm) -> DbalResult<Post> {
    let mut entity = match Posts::query()?.find_one(db, id).await? {
        Some(entity) => entity,
        None => return Err(DbalError::Db(DbError::NotFound)),
    };
    entity.set("title", form.title().as_str()).set("body", form.body().as_str());
    entity.save(db).await?;
    decode(entity)
}

/// Deletes the post identified by `id`.
///
/// Fails with `DbError::NotFound` if the post does not exist.
pub(crate) async fn delete_post(db: &Database, id: i64) -> DbalResult<()> {
    let deleted = Posts::query()?.criteria("id", "=", id)?.delete_many(db).await?;
    if deleted == 0 {
        return Err(DbalError::Db(DbError::NotFound));
    }
    Ok(())
}
