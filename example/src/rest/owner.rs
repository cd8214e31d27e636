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

//! Middleware that identifies the user making a request.

use crate::db;
use async_trait::async_trait;
use http::StatusCode;
use log::debug;
use std::sync::Arc;
use trellis_core::db::Database;
use trellis_core::rest::ErrorResponse;
use trellis_web::{Flow, Middleware, Next, Request, Response, WebResult};

/// Header that carries the identifier of the user making the request.
pub(crate) const USER_ID_HEADER: &str = "x-user-id";

/// Attribute that carries the identifier of the authenticated user.
pub(crate) const USER_ID_ATTRIBUTE: &str = "user_id";

/// Attribute that carries the name of the authenticated user.
pub(crate) const USERNAME_ATTRIBUTE: &str = "username";

/// Rejects requests that do not come from a known user and tags the others with the user's
/// identity.
pub(crate) struct OwnerMiddleware {
    /// Database where users are looked up.
    db: Arc<Database>,
}

impl OwnerMiddleware {
    /// Creates a new middleware that looks users up in `db`.
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

/// Halts processing with a `401 Unauthorized` response that carries `message`.
fn deny(response: Response, message: String) -> WebResult<Flow> {
    debug!("Unauthorized request: {}", message);
    let response = response.with_status(StatusCode::UNAUTHORIZED);
    Ok(Flow::Halt(response.json(&ErrorResponse { message })?))
}

#[async_trait]
impl Middleware for OwnerMiddleware {
    async fn apply(&self, mut request: Request, response: Response, next: Next) -> WebResult<Flow> {
        let user_id = match request.header(USER_ID_HEADER)? {
            Some(value) => match value.parse::<i64>() {
                Ok(user_id) => user_id,
                Err(_) => return deny(response, format!("Invalid user identifier '{}'", value)),
            },
            None => return deny(response, format!("Missing {} header", USER_ID_HEADER)),
        };

        let user = match db::get_user(&self.db, user_id).await? {
            Some(user) => user,
            None => return deny(response, format!("Unknown user {}", user_id)),
        };

        request.set_attribute(USER_ID_ATTRIBUTE, *user.id());
        request.set_attribute(USERNAME_ATTRIBUTE, user.username().as_str());
        Ok(next.run(request, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::testutils::*;
    use serde_json::json;
    use trellis_core::rest::testutils::*;

    fn route() -> (http::Method, &'static str) {
        (http::Method::POST, "/api/v1/posts")
    }

    #[tokio::test]
    async fn test_missing_header() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.into_app(), route())
            .send_json(json!({"title": "T", "body": "B"}))
            .await
            .expect_status(StatusCode::UNAUTHORIZED)
            .expect_error("Missing x-user-id header")
            .await;
    }

    #[tokio::test]
    async fn test_invalid_header() {
        let context = TestContext::setup().await;

        OneShotBuilder::new(context.into_app(), route())
            .with_header(USER_ID_HEADER, "abc")
            .send_json(json!({"title": "T", "body": "B"}))
            .await
            .expect_status(StatusCode::UNAUTHORIZED)
            .expect_error("Invalid user identifier 'abc'")
            .await;
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let context = TestContext::setup().await;
        context.create_user("alice").await;

        OneShotBuilder::new(context.app(), route())
            .with_header(USER_ID_HEADER, "2")
            .send_json(json!({"title": "T", "body": "B"}))
            .await
            .expect_status(StatusCode::UNAUTHORIZED)
            .expect_error("Unknown user 2")
            .await;

        assert_eq!(0, context.count_posts().await);
    }

    #[tokio::test]
    async fn test_known_user() {
        let context = TestContext::setup().await;
        let user_id = context.create_user("alice").await;

        OneShotBuilder::new(context.app(), route())
            .with_header(USER_ID_HEADER, user_id.to_string())
            .send_json(json!({"title": "T", "body": "B"}))
            .await
            .expect_status(StatusCode::CREATED)
            .take_response()
            .await;

        assert_eq!(1, context.count_posts().await);
    }
}
