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

//! Matching of requests against the route table.

use crate::route::normalize_path;
use crate::{Route, RouteTable, WebError, WebResult};
use http::Method;
use log::debug;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use trellis_core::rest::BaseUrls;
use url::Url;

/// A route that matched a request, together with the parameters extracted from the path.
#[derive(Clone, Debug)]
pub struct MatchedRoute {
    /// The route that matched.
    route: Arc<Route>,

    /// Values of the placeholders in the route pattern, as raw strings.
    params: BTreeMap<String, String>,
}

impl MatchedRoute {
    /// Returns the route that matched.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Returns the path parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// Piece of a compiled route pattern.
#[derive(Debug)]
enum Piece {
    /// Text that must appear verbatim.
    Literal(String),

    /// Named placeholder.
    Placeholder(String),
}

/// A route along with its pattern compiled for matching.
#[derive(Debug)]
struct CompiledRoute {
    /// The route definition.
    route: Arc<Route>,

    /// Anchored expression matching the full path of the route.
    regex: Regex,

    /// The full pattern split into literals and placeholders.
    pieces: Vec<Piece>,
}

/// Returns true if `name` is a valid placeholder name.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Compiles the full pattern of `route` into a matching expression.
///
/// Placeholders take the form `{name}` or `{name:hint}` where `hint` is one of `num`, `alpha` or
/// `any`.  Plain placeholders match one path segment and `any` matches the rest of the path,
/// slashes included.
fn compile(route: Route) -> WebResult<CompiledRoute> {
    let full = route.full_pattern();

    let mut re = String::from("^");
    let mut pieces = vec![];
    let mut names: Vec<&str> = vec![];
    let mut rest = full.as_str();
    while let Some(start) = rest.find('{') {
        let literal = &rest[..start];
        if literal.contains('}') {
            return Err(WebError::InvalidRoute(format!("Unbalanced braces in {}", full)));
        }
        re.push_str(&regex::escape(literal));
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal.to_owned()));
        }

        let end = match rest[start..].find('}') {
            Some(end) => start + end,
            None => return Err(WebError::InvalidRoute(format!("Unclosed placeholder in {}", full))),
        };
        let placeholder = &rest[start + 1..end];
        let (name, hint) = match placeholder.split_once(':') {
            Some((name, hint)) => (name, Some(hint)),
            None => (placeholder, None),
        };
        if !is_valid_name(name) {
            return Err(WebError::InvalidRoute(format!(
                "Bad placeholder name '{}' in {}",
                name, full
            )));
        }
        if names.contains(&name) {
            return Err(WebError::InvalidRoute(format!(
                "Duplicate placeholder {} in {}",
                name, full
            )));
        }
        let expr = match hint {
            None => "[^/]+",
            Some("num") => "[0-9]+",
            Some("alpha") => "[A-Za-z]+",
            Some("any") => ".+",
            Some(hint) => {
                return Err(WebError::InvalidRoute(format!(
                    "Unknown placeholder type {} in {}",
                    hint, full
                )));
            }
        };
        re.push_str(&format!("(?P<{}>{})", name, expr));
        pieces.push(Piece::Placeholder(name.to_owned()));
        names.push(name);

        rest = &rest[end + 1..];
    }
    if rest.contains('}') {
        return Err(WebError::InvalidRoute(format!("Unbalanced braces in {}", full)));
    }
    re.push_str(&regex::escape(rest));
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest.to_owned()));
    }
    re.push('$');

    let regex = Regex::new(&re)
        .map_err(|e| WebError::InvalidRoute(format!("Cannot compile {}: {}", full, e)))?;
    Ok(CompiledRoute { route: Arc::from(route), regex, pieces })
}

/// Matches requests against an ordered list of routes.
///
/// Matching walks the routes in registration order and stops at the first route whose method
/// and full pattern match.  There is no reordering by specificity: a generic route registered
/// before a more specific one shadows it.
#[derive(Debug, Default)]
pub struct Router {
    /// Compiled routes in registration order.
    routes: Vec<CompiledRoute>,
}

impl Router {
    /// Creates a router for the routes in `table`.
    pub fn new(table: RouteTable) -> WebResult<Self> {
        let mut router = Self::default();
        router.set_routes(table)?;
        Ok(router)
    }

    /// Replaces all routes with those in `table`.  On error, the previous routes stay in place.
    pub fn set_routes(&mut self, table: RouteTable) -> WebResult<()> {
        let routes = table.routes().iter().cloned().map(compile).collect::<WebResult<Vec<_>>>()?;
        debug!("Loaded {} routes", routes.len());
        self.routes = routes;
        Ok(())
    }

    /// Returns the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the first route that matches `method` and `path`.
    pub fn find_route(&self, method: &Method, path: &str) -> WebResult<MatchedRoute> {
        let path = normalize_path(path);
        for compiled in &self.routes {
            if !compiled.route.method().as_str().eq_ignore_ascii_case(method.as_str()) {
                continue;
            }
            let Some(captures) = compiled.regex.captures(&path) else {
                continue;
            };

            let mut params = BTreeMap::new();
            for piece in &compiled.pieces {
                if let Piece::Placeholder(name) = piece {
                    if let Some(value) = captures.name(name) {
                        params.insert(name.clone(), value.as_str().to_owned());
                    }
                }
            }
            debug!("Matched {} {} to {}", method, path, compiled.route.full_pattern());
            return Ok(MatchedRoute { route: compiled.route.clone(), params });
        }
        Err(WebError::RouteNotFound { method: method.to_string(), path })
    }

    /// Builds the path of the route called `name` with its placeholders replaced by `params`.
    pub fn url_for(&self, name: &str, params: &BTreeMap<String, String>) -> WebResult<String> {
        let compiled = self
            .routes
            .iter()
            .find(|compiled| compiled.route.name() == Some(name))
            .ok_or_else(|| WebError::InvalidRoute(format!("No route named {}", name)))?;

        let mut path = String::new();
        for piece in &compiled.pieces {
            match piece {
                Piece::Literal(literal) => path.push_str(literal),
                Piece::Placeholder(placeholder) => match params.get(placeholder) {
                    Some(value) => path.push_str(value),
                    None => {
                        return Err(WebError::InvalidRoute(format!(
                            "Missing parameter {} for route {}",
                            placeholder, name
                        )));
                    }
                },
            }
        }
        if !compiled.regex.is_match(&path) {
            return Err(WebError::InvalidRoute(format!(
                "Parameters do not fit route {}: {}",
                name, path
            )));
        }
        Ok(path)
    }

    /// Returns the base URL of the prefix `matched` is mounted under.
    pub fn base_url(&self, matched: &MatchedRoute, urls: &BaseUrls) -> WebResult<Url> {
        Ok(urls.make_prefix_url(matched.route().prefix())?)
    }
}
