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

//! Route definitions and the ordered table that holds them.

use crate::handler::{BoxedHandler, Handler, boxed};
use crate::{WebError, WebResult};
use http::Method;
use serde::Deserialize;

/// What a route invokes once matched.
#[derive(Clone, Debug)]
pub enum RouteTarget {
    /// An action of a registered controller.
    Controller {
        /// Name of the controller.
        controller: String,

        /// Name of the action within the controller.
        action: String,
    },

    /// A handler invoked directly.
    Callback(BoxedHandler),
}

/// A single route definition.  Immutable once added to a `RouteTable`.
#[derive(Clone, Debug)]
pub struct Route {
    /// Method the route responds to.
    method: Method,

    /// Path pattern relative to `prefix`, with `{name}` placeholders.
    pattern: String,

    /// What to invoke when the route matches.
    target: RouteTarget,

    /// Module the controller belongs to, if any.
    module: Option<String>,

    /// Path prefix the pattern is mounted under.
    prefix: String,

    /// Names of the middlewares to run before the target, in order.
    middlewares: Vec<String>,

    /// Name for reverse lookups.
    name: Option<String>,
}

impl Route {
    /// Creates a route for `method` and `pattern` that invokes `target`.
    pub fn new<P: Into<String>>(method: Method, pattern: P, target: RouteTarget) -> Self {
        let method = match Method::from_bytes(method.as_str().to_ascii_uppercase().as_bytes()) {
            Ok(upper) => upper,
            Err(_) => method,
        };
        Self {
            method,
            pattern: pattern.into(),
            target,
            module: None,
            prefix: String::new(),
            middlewares: vec![],
            name: None,
        }
    }

    /// Creates a route that invokes `action` of `controller`.
    pub fn controller<P, C, A>(method: Method, pattern: P, controller: C, action: A) -> Self
    where
        P: Into<String>,
        C: Into<String>,
        A: Into<String>,
    {
        let target =
            RouteTarget::Controller { controller: controller.into(), action: action.into() };
        Self::new(method, pattern, target)
    }

    /// Creates a route that invokes `handler` directly.
    pub fn callback<P, H, Args>(method: Method, pattern: P, handler: H) -> Self
    where
        P: Into<String>,
        H: Handler<Args>,
        Args: 'static,
    {
        Self::new(method, pattern, RouteTarget::Callback(boxed(handler)))
    }

    /// Sets the module of the controller.
    pub fn with_module<M: Into<String>>(mut self, module: M) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Sets the prefix the pattern is mounted under.
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the middlewares to run before the target.
    pub fn with_middlewares(mut self, middlewares: &[&str]) -> Self {
        self.middlewares = middlewares.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// Names the route for reverse lookups.
    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the method the route responds to.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the pattern of the route, relative to its prefix.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns what the route invokes.
    pub fn target(&self) -> &RouteTarget {
        &self.target
    }

    /// Returns the module of the controller, if any.
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Returns the prefix the pattern is mounted under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the names of the middlewares of the route.
    pub fn middlewares(&self) -> &[String] {
        &self.middlewares
    }

    /// Returns the name of the route, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the pattern joined with the prefix, normalized to a single leading slash and no
    /// trailing slash.
    pub fn full_pattern(&self) -> String {
        normalize_path(&format!("{}/{}", self.prefix, self.pattern))
    }
}

/// Collapses repeated slashes in `path` and drops any trailing slash.
pub(crate) fn normalize_path(path: &str) -> String {
    let segments = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<&str>>();
    format!("/{}", segments.join("/"))
}

/// Route definition as found in configuration files.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteRecord {
    /// Path pattern.
    route: String,

    /// HTTP method, in any case.
    method: String,

    /// Name of the controller.
    controller: String,

    /// Name of the action.
    action: String,

    /// Module of the controller.
    #[serde(default)]
    module: Option<String>,

    /// Path prefix.
    #[serde(default)]
    prefix: String,

    /// Names of the middlewares.
    #[serde(default)]
    middlewares: Vec<String>,

    /// Name for reverse lookups.
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<RouteRecord> for Route {
    type Error = WebError;

    fn try_from(record: RouteRecord) -> WebResult<Self> {
        let method = Method::from_bytes(record.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| WebError::InvalidRoute(format!("Bad method {}: {}", record.method, e)))?;
        let mut route = Route::controller(method, record.route, record.controller, record.action)
            .with_prefix(record.prefix);
        route.module = record.module;
        route.middlewares = record.middlewares;
        route.name = record.name;
        Ok(route)
    }
}

/// Routes that share a prefix, a module and leading middlewares.
#[derive(Debug)]
pub struct RouteGroup {
    /// Prefix prepended to the prefix of every route.
    prefix: String,

    /// Module given to routes that do not set their own.
    module: Option<String>,

    /// Middlewares that run before those of every route.
    middlewares: Vec<String>,

    /// Routes in the group.
    routes: Vec<Route>,
}

impl RouteGroup {
    /// Creates an empty group mounted under `prefix`.
    pub fn new<P: Into<String>>(prefix: P) -> Self {
        Self { prefix: prefix.into(), module: None, middlewares: vec![], routes: vec![] }
    }

    /// Sets the module of the group.
    pub fn with_module<M: Into<String>>(mut self, module: M) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Sets the middlewares shared by the group.
    pub fn with_middlewares(mut self, middlewares: &[&str]) -> Self {
        self.middlewares = middlewares.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// Adds `route` to the group.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Applies the group settings to its routes and returns them in order.
    fn into_routes(self) -> Vec<Route> {
        let Self { prefix, module, middlewares, routes } = self;
        routes
            .into_iter()
            .map(|mut route| {
                route.prefix = normalize_path(&format!("{}/{}", prefix, route.prefix));
                if route.module.is_none() {
                    route.module = module.clone();
                }
                let mut all = middlewares.clone();
                all.append(&mut route.middlewares);
                route.middlewares = all;
                route
            })
            .collect()
    }
}

/// Ordered collection of routes.
///
/// Routes are matched in the order they are added and the first match wins, so more specific
/// routes must come before more generic ones that would also match.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    /// Routes in registration order.
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `route` to the table.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Appends all routes of `group` to the table.
    pub fn group(mut self, group: RouteGroup) -> Self {
        self.routes.extend(group.into_routes());
        self
    }

    /// Parses a table from a JSON array of route records.
    pub fn from_json(json: &str) -> WebResult<Self> {
        let records: Vec<RouteRecord> = serde_json::from_str(json)
            .map_err(|e| WebError::InvalidRoute(format!("Cannot parse route table: {}", e)))?;
        let routes = records.into_iter().map(Route::try_from).collect::<WebResult<Vec<Route>>>()?;
        Ok(Self { routes })
    }

    /// Returns the routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Returns the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
