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

//! Request pipeline of Trellis applications.
//!
//! Every request goes through the same sequence of stages:
//!
//! 1.  The `Router` matches the method and path of the request against the `RouteTable` and
//!     extracts the path parameters.  The first route that matches wins, regardless of how
//!     specific later routes are, so more specific routes must be registered first.
//!
//! 1.  The `MiddlewareManager` runs the middlewares named by the route, in order.  Any of them can
//!     halt the chain by returning a response of its own.
//!
//! 1.  The `Dispatcher` invokes the callback of the route or the action of the controller the
//!     route names, together with the controller's `before` and `after` hooks.  The arguments of
//!     these handlers are bound from the path parameters, the request, and the `Container`.
//!
//! `WebApp` is the composition root that owns all of the above and is the single place where
//! errors turn into HTTP responses.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use trellis_core::db::DbError;
use trellis_core::rest::RestError;
use trellis_dbal::DbalError;

mod app;
pub use app::WebApp;
mod container;
pub use container::Container;
mod csrf;
pub use csrf::{CSRF_COOKIE, CSRF_HEADER};
mod dispatcher;
pub use dispatcher::{Controller, ControllerRegistry, Dispatcher};
mod handler;
pub use handler::{
    Attributes, BoxedHandler, Context, Form, FromContext, Handler, Inject, Json, Params, Path,
    Query, boxed,
};
mod message;
pub use message::{Request, Response};
mod middleware;
pub use middleware::{Flow, Middleware, MiddlewareManager, Next};
mod route;
pub use route::{Route, RouteGroup, RouteTable, RouteTarget};
mod router;
pub use router::{MatchedRoute, Router};
#[cfg(test)]
mod testutils;

/// Errors raised while serving a request.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WebError {
    /// Indicates that a controller does not implement the action a route names.
    #[error("Action {action} not defined in controller {controller}")]
    ActionNotDefined {
        /// Name of the controller.
        controller: String,

        /// Name of the missing action.
        action: String,
    },

    /// Indicates that a handler argument could not be bound from the request or the container.
    #[error("{0}")]
    Binding(String),

    /// Indicates that no controller is registered under the name a route uses.
    #[error("Controller {0} not defined")]
    ControllerNotDefined(String),

    /// Indicates that the CSRF token of a state-changing request is missing or does not match.
    #[error("{0}")]
    Csrf(String),

    /// Indicates a failure in the database abstraction layer.
    #[error("{0}")]
    Dbal(DbalError),

    /// Indicates that a route definition is malformed.
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// Passes through an error already expressed in HTTP terms.
    #[error("{0}")]
    Rest(RestError),

    /// Indicates that no route matches the request.
    #[error("No route for {method} {path}")]
    RouteNotFound {
        /// Method of the request.
        method: String,

        /// Path of the request.
        path: String,
    },

    /// Stops processing and sends `response` as is.  `code` is reported to the caller of
    /// `WebApp::start`.
    #[error("Processing stopped with code {code}")]
    Stop {
        /// Response to send.
        response: Box<Response>,

        /// Code to report.
        code: i32,
    },

    /// Indicates that a route names a middleware that is not registered.
    #[error("Middleware {0} not registered")]
    UnknownMiddleware(String),
}

impl From<DbalError> for WebError {
    fn from(e: DbalError) -> Self {
        WebError::Dbal(e)
    }
}

impl From<DbError> for WebError {
    fn from(e: DbError) -> Self {
        WebError::Dbal(DbalError::Db(e))
    }
}

impl From<RestError> for WebError {
    fn from(e: RestError) -> Self {
        WebError::Rest(e)
    }
}

impl From<WebError> for RestError {
    fn from(e: WebError) -> Self {
        match e {
            WebError::ActionNotDefined { .. } => RestError::NotFound(e.to_string()),
            WebError::Binding(_) => RestError::InvalidRequest(e.to_string()),
            WebError::ControllerNotDefined(_) => RestError::NotFound(e.to_string()),
            WebError::Csrf(msg) => RestError::Forbidden(msg),
            WebError::Dbal(e) => RestError::from(e),
            WebError::InvalidRoute(_) => RestError::InternalError(e.to_string()),
            WebError::Rest(e) => e,
            WebError::RouteNotFound { .. } => RestError::NotFound(e.to_string()),
            WebError::Stop { .. } => RestError::InternalError(e.to_string()),
            WebError::UnknownMiddleware(_) => RestError::InternalError(e.to_string()),
        }
    }
}

/// Result type for this crate.
pub type WebResult<T> = Result<T, WebError>;
