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

//! Test utilities for the REST API.

use crate::db;
use crate::model::*;
use crate::rest::app;
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use trellis_core::db::Database;
use trellis_core::db::sqlite::testutils::setup;

pub(crate) struct TestContext {
    db: Arc<Database>,
    app: Router,
}

impl TestContext {
    pub(crate) async fn setup() -> Self {
        let db = Arc::new(setup().await);
        db::init_schema(&db).await.unwrap();
        let app = app(db.clone()).unwrap().into_router();
        Self { db, app }
    }

    pub(crate) fn app(&self) -> Router {
        self.app.clone()
    }

    pub(crate) fn into_app(self) -> Router {
        self.app
    }

    pub(crate) async fn create_user(&self, username: &str) -> i64 {
        let email = format!("{}@example.com", username);
        let form: UserForm =
            serde_json::from_value(json!({"username": username, "email": email})).unwrap();
        *db::create_user(&self.db, &form).await.unwrap().id()
    }

    pub(crate) async fn get_user(&self, id: i64) -> Option<User> {
        db::get_user(&self.db, id).await.unwrap()
    }

    pub(crate) async fn create_post(&self, user_id: i64, title: &str) -> i64 {
        let form: PostForm =
            serde_json::from_value(json!({"title": title, "body": "Some text"})).unwrap();
        *db::create_post(&self.db, user_id, &form).await.unwrap().id()
    }

    pub(crate) async fn get_post(&self, id: i64) -> Option<Post> {
        db::get_post(&self.db, id).await.unwrap()
    }

    pub(crate) async fn count_posts(&self) -> u64 {
        db::list_posts(&self.db, 1, 1).await.unwrap().total
    }
}
