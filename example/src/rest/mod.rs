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

//! Entry point to the REST server.

use http::Method;
use serde_json::json;
use std::sync::Arc;
use trellis_core::db::Database;
use trellis_web::{Response, Route, RouteTable, WebApp, WebResult};

mod owner;
use owner::OwnerMiddleware;
mod posts;
#[cfg(test)]
mod testutils;
mod users;

/// Reports that the service is up.
async fn health(response: Response) -> WebResult<Response> {
    response.json(&json!({"status": "ok"}))
}

/// Loads the routes of the application.
fn routes() -> WebResult<RouteTable> {
    let table = RouteTable::from_json(include_str!("routes.json"))?;
    Ok(table.route(Route::callback(Method::GET, "/health", health)))
}

/// Creates the application backed by `db`.
pub(crate) fn app(db: Arc<Database>) -> WebResult<WebApp> {
    let app = WebApp::new(routes()?)?
        .with_middleware("owner", OwnerMiddleware::new(db.clone()))
        .with_controller(posts::controller())
        .with_controller(users::controller())
        .with_database(db);
    Ok(app)
}
