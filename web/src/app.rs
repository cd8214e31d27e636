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

//! Composition root of an application and its HTTP boundary.

use crate::{
    Container, Controller, ControllerRegistry, Dispatcher, Flow, Middleware, MiddlewareManager,
    Request, Response, RouteTable, Router, WebError, WebResult,
};
use axum::extract::State;
use http::Method;
use log::{debug, info, warn};
use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{self, CorsLayer};
use trellis_core::db::Database;
use trellis_core::rest::RestError;

/// Maximum size of request bodies accepted by the HTTP bridge.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// An application: its routes, middlewares, controllers and shared services.
///
/// There is exactly one of these per process and it owns every registry the pipeline uses.
#[derive(Debug)]
pub struct WebApp {
    /// Matches requests to routes.
    router: Router,

    /// Middlewares that routes can name.
    middlewares: MiddlewareManager,

    /// Invokes the targets of matched routes.
    dispatcher: Dispatcher,
}

impl WebApp {
    /// Creates an application that serves the routes in `table`.
    ///
    /// Fails if any route pattern is malformed.
    pub fn new(table: RouteTable) -> WebResult<Self> {
        let router = Router::new(table)?;
        info!("Application configured with {} routes", router.len());
        Ok(Self {
            router,
            middlewares: MiddlewareManager::new(),
            dispatcher: Dispatcher::new(ControllerRegistry::new(), Container::new()),
        })
    }

    /// Registers `middleware` under `name`.
    pub fn with_middleware<N: Into<String>, M: Middleware + 'static>(
        mut self,
        name: N,
        middleware: M,
    ) -> Self {
        self.middlewares.register(name, middleware);
        self
    }

    /// Registers `controller`.
    pub fn with_controller(mut self, controller: Controller) -> Self {
        self.dispatcher.register(controller);
        self
    }

    /// Makes `value` available for injection into handlers.
    pub fn provide<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.dispatcher.provide(value);
        self
    }

    /// Makes the `db` connection available for injection as `Inject<Arc<Database>>`.
    pub fn with_database(self, db: Arc<Database>) -> Self {
        self.provide(db)
    }

    /// Returns the router, mostly for reverse lookups with `Router::url_for`.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Runs `request` through routing, middlewares and dispatch.
    pub async fn handle(&self, mut request: Request) -> WebResult<Response> {
        let response = Response::new();
        if request.method() == Method::OPTIONS {
            debug!("Answering OPTIONS {} without routing", request.path());
            return Ok(response);
        }

        let matched = self.router.find_route(request.method(), request.path())?;
        request.set_params(matched.params().clone());

        let flow = self
            .middlewares
            .apply_middlewares(matched.route().middlewares(), request, response)
            .await?;
        let (request, response) = match flow {
            Flow::Continue(request, response) => (request, response),
            Flow::Halt(response) => return Ok(response),
        };

        self.dispatcher.handle(&matched, &request, response).await
    }

    /// Serves `request` and turns any error into its HTTP response.
    ///
    /// Returns the code carried by `WebError::Stop` if a handler stopped processing.
    pub async fn start(&self, request: Request) -> (Response, Option<i32>) {
        let method = request.method().clone();
        let path = request.path().to_owned();
        match self.handle(request).await {
            Ok(response) => (response, None),
            Err(WebError::Stop { response, code }) => {
                debug!("{} {} stopped with code {}", method, path, code);
                (*response, Some(code))
            }
            Err(e) => {
                let e = RestError::from(e);
                if e.status().is_server_error() {
                    warn!("{} {} failed: {}", method, path, e);
                } else {
                    debug!("{} {} rejected: {}", method, path, e);
                }
                (Response::from_error(&e), None)
            }
        }
    }

    /// Wraps the application in an axum router that sends every request through `start`.
    pub fn into_router(self) -> axum::Router {
        let cors = CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods(cors::Any)
            .allow_headers(cors::Any);
        axum::Router::new().fallback(bridge).with_state(Arc::from(self)).layer(cors)
    }

    /// Serves the application on `bind_addr` until the server fails.
    pub async fn serve(self, bind_addr: impl Into<SocketAddr>) -> io::Result<()> {
        let listener = TcpListener::bind(bind_addr.into()).await?;
        info!("Listening on {}", listener.local_addr()?);
        axum::serve(listener, self.into_router()).await
    }
}

/// Adapts an axum request into the pipeline and its outcome back into an axum response.
async fn bridge(State(app): State<Arc<WebApp>>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => {
            let e = RestError::InvalidRequest(format!("Cannot read request body: {}", e));
            return Response::from_error(&e);
        }
    };
    let request = Request::from_parts(parts.method, parts.uri, parts.headers, body);
    let (response, _code) = app.start(request).await;
    response
}
