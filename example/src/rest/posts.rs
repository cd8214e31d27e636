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

//! Controller for the posts of the blog.

use crate::db;
use crate::model::{Post, PostForm};
use crate::rest::owner::USER_ID_ATTRIBUTE;
use http::StatusCode;
use http::header::{self, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use trellis_core::db::Database;
use trellis_core::rest::RestError;
use trellis_web::{Context, Controller, FromContext, Inject, Json, Path, Query, Response};
use trellis_web::{WebError, WebResult};

/// Name of the controller as referenced by the routes.
pub(crate) const NAME: &str = "PostController";

/// Module of the controller as referenced by the routes.
pub(crate) const MODULE: &str = "blog";

/// Number of posts per page in listings.
const PER_PAGE: u64 = 10;

/// Identifier of the user that the `owner` middleware authenticated.
struct Owner(i64);

impl FromContext for Owner {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        match cx.request().attribute(USER_ID_ATTRIBUTE).and_then(Value::as_i64) {
            Some(user_id) => Ok(Owner(user_id)),
            None => Err(WebError::Binding("Request does not identify a user".to_owned())),
        }
    }
}

/// Path parameters of the routes that address a single post.
#[derive(Deserialize)]
struct PostId {
    /// Identifier of the post.
    id: i64,
}

/// Path parameters of the routes that address an author.
#[derive(Deserialize)]
struct Author {
    /// Name of the author.
    username: String,
}

/// Query parameters of the listing.
#[derive(Deserialize)]
struct Listing {
    /// Page to return, starting at 1.
    #[serde(default = "first_page")]
    page: u64,
}

/// Returns the page that listings start at.
fn first_page() -> u64 {
    1
}

/// Gets the post `id` and ensures it was written by `owner`.
async fn get_owned_post(db: &Database, id: i64, owner: i64) -> WebResult<Post> {
    let post = match db::get_post(db, id).await? {
        Some(post) => post,
        None => return Err(RestError::NotFound(format!("Post {} not found", id)).into()),
    };
    if *post.user_id() != owner {
        return Err(RestError::Forbidden(format!("Post {} belongs to another user", id)).into());
    }
    Ok(post)
}

/// Lists one page of posts, newest first.
async fn index(
    response: Response,
    Query(listing): Query<Listing>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    let page = db::list_posts(&db, PER_PAGE, listing.page).await?;
    response.json(&page)
}

/// Returns a single post.
async fn show(
    response: Response,
    Path(post): Path<PostId>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    match db::get_post(&db, post.id).await? {
        Some(post) => response.json(&post),
        None => Err(RestError::NotFound(format!("Post {} not found", post.id)).into()),
    }
}

/// Creates a post authored by the requesting user.
async fn create(
    response: Response,
    Owner(owner): Owner,
    Json(form): Json<PostForm>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    let post = db::create_post(&db, owner, &form).await?;
    response.with_status(StatusCode::CREATED).json(&post)
}

/// Replaces the contents of a post owned by the requesting user.
async fn update(
    response: Response,
    Owner(owner): Owner,
    Path(post): Path<PostId>,
    Json(form): Json<PostForm>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    get_owned_post(&db, post.id, owner).await?;
    let post = db::update_post(&db, post.id, &form).await?;
    response.json(&post)
}

/// Deletes a post owned by the requesting user.
async fn delete(
    response: Response,
    Owner(owner): Owner,
    Path(post): Path<PostId>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    get_owned_post(&db, post.id, owner).await?;
    db::delete_post(&db, post.id).await?;
    Ok(response.with_status(StatusCode::NO_CONTENT))
}

/// Lists all posts of an author.
async fn by_author(
    response: Response,
    Path(author): Path<Author>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    let posts = db::posts_by_author(&db, &author.username).await?;
    response.json(&posts)
}

/// Marks every response of the controller as not cacheable.
async fn no_store(response: Response) -> WebResult<Response> {
    Ok(response.with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store")))
}

/// Creates the controller.
///
/// Requests are authenticated by header, not by cookie, so they are not exposed to CSRF.
pub(crate) fn controller() -> Controller {
    Controller::new(NAME)
        .with_module(MODULE)
        .without_csrf()
        .action("index", index)
        .action("show", show)
        .action("create", create)
        .action("update", update)
        .action("delete", delete)
        .action("by_author", by_author)
        .after(no_store)
}
