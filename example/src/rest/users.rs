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

//! Controller for the users of the blog.

use crate::db;
use crate::model::UserForm;
use crate::rest::posts::MODULE;
use http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use trellis_core::db::Database;
use trellis_core::rest::RestError;
use trellis_web::{Controller, Inject, Json, Path, Response, WebResult};

/// Path parameters of the routes that address a single user.
#[derive(Deserialize)]
struct UserId {
    /// Identifier of the user.
    id: i64,
}

/// Registers a new user.
async fn create(
    response: Response,
    Json(form): Json<UserForm>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    let user = db::create_user(&db, &form).await?;
    response.with_status(StatusCode::CREATED).json(&user)
}

/// Returns the public details of a user.
async fn show(
    response: Response,
    Path(user): Path<UserId>,
    Inject(db): Inject<Arc<Database>>,
) -> WebResult<Response> {
    match db::get_user(&db, user.id).await? {
        Some(user) => response.json(&user),
        None => Err(RestError::NotFound(format!("User {} not found", user.id)).into()),
    }
}

/// Creates the controller.
pub(crate) fn controller() -> Controller {
    Controller::new("UserController")
        .with_module(MODULE)
        .without_csrf()
        .action("create", create)
        .action("show", show)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::testutils::*;
    use serde_json::json;
    use trellis_core::rest::testutils::*;

    #[tokio::test]
    async fn test_create_ok() {
        let context = TestContext::setup().await;

        let response = OneShotBuilder::new(context.app(), (http::Method::POST, "/api/v1/users"))
            .send_json(json!({"username": "Alice", "email": "alice@example.com"}))
            .await
            .expect_status(StatusCode::CREATED)
            .expect_json::<serde_json::Value>()
            .await;
        assert_eq!(json!({"id": 1, "username": "alice"}), response);

        assert_eq!("alice", context.get_user(1).await.unwrap().username());
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let context = TestContext::setup().await;
        context.create_user("alice").await;

        OneShotBuilder::new(context.into_app(), (http::Method::POST, "/api/v1/users"))
            .send_json(json!({"username": "alice", "email": "other@example.com"}))
            .await
            .expect_status(StatusCode::BAD_REQUEST)
            .expect_error("Already exists")
            .await;
    }

    #[tokio::test]
    async fn test_create_invalid() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.app(), (http::Method::POST, "/api/v1/users"))
            .send_json(json!({"username": "al ice", "email": "alice@example.com"}))
            .await
            .expect_status(StatusCode::BAD_REQUEST)
            .expect_error("Unsupported character ' ' in username")
            .await;

        OneShotBuilder::new(context.into_app(), (http::Method::POST, "/api/v1/users"))
            .send_json(json!({"username": "alice", "email": "alice"}))
            .await
            .expect_status(StatusCode::BAD_REQUEST)
            .expect_error("Invalid email address 'alice'")
            .await;
    }

    #[tokio::test]
    async fn test_show_hides_email() {
        let context = TestContext::setup().await;
        let id = context.create_user("bob").await;

        let route = (http::Method::GET, format!("/api/v1/users/{}", id));
        let response = OneShotBuilder::new(context.into_app(), route)
            .send_empty()
            .await
            .expect_json::<serde_json::Value>()
            .await;
        assert_eq!(json!({"id": id, "username": "bob"}), response);
    }

    #[tokio::test]
    async fn test_show_not_found() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.into_app(), (http::Method::GET, "/api/v1/users/3"))
            .send_empty()
            .await
            .expect_status(StatusCode::NOT_FOUND)
            .expect_error("User 3 not found")
            .await;
    }
}
