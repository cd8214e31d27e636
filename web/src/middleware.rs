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

//! Named middlewares and the chains that run them.

use crate::{Request, Response, WebError, WebResult};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Outcome of running a middleware or a whole chain of them.
#[derive(Debug)]
pub enum Flow {
    /// Processing continues with the given request and response.
    Continue(Request, Response),

    /// Processing stops and the given response is sent as is.
    Halt(Response),
}

/// Permission for a middleware to let processing continue.
#[derive(Debug)]
pub struct Next(());

impl Next {
    /// Hands `request` and `response` over to the rest of the chain.
    pub fn run(self, request: Request, response: Response) -> Flow {
        Flow::Continue(request, response)
    }
}

/// Interceptor that runs before the handler of a route.
///
/// Implementations either call `next.run` to continue, or return `Flow::Halt` with a response of
/// their own to short-circuit the rest of the chain and the handler.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Processes `request` and `response`.
    async fn apply(&self, request: Request, response: Response, next: Next) -> WebResult<Flow>;
}

/// Registry of middlewares by name.
#[derive(Clone, Default)]
pub struct MiddlewareManager {
    /// Registered middlewares.
    middlewares: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `middleware` under `name`, replacing any previous one.
    pub fn register<N: Into<String>, M: Middleware + 'static>(&mut self, name: N, middleware: M) {
        self.middlewares.insert(name.into(), Arc::new(middleware));
    }

    /// Returns true if a middleware is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.middlewares.contains_key(name)
    }

    /// Resolves all `names` up front so that a misconfigured chain fails before any of it runs.
    fn resolve<'a>(&self, names: &'a [String]) -> WebResult<Vec<(&'a str, Arc<dyn Middleware>)>> {
        names
            .iter()
            .map(|name| match self.middlewares.get(name) {
                Some(middleware) => Ok((name.as_str(), middleware.clone())),
                None => Err(WebError::UnknownMiddleware(name.clone())),
            })
            .collect()
    }

    /// Runs the middlewares in `names` in order on `request` and `response`.
    ///
    /// The first middleware that halts ends the chain and its response is returned.  Errors abort
    /// the chain and propagate.
    pub async fn apply_middlewares(
        &self,
        names: &[String],
        mut request: Request,
        mut response: Response,
    ) -> WebResult<Flow> {
        for (name, middleware) in self.resolve(names)? {
            match middleware.apply(request, response, Next(())).await? {
                Flow::Continue(next_request, next_response) => {
                    request = next_request;
                    response = next_response;
                }
                Flow::Halt(response) => {
                    debug!("Middleware {} halted the chain", name);
                    return Ok(Flow::Halt(response));
                }
            }
        }
        Ok(Flow::Continue(request, response))
    }
}

impl fmt::Debug for MiddlewareManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.middlewares.keys().collect::<Vec<&String>>();
        names.sort();
        f.debug_struct("MiddlewareManager").field("middlewares", &names).finish()
    }
}
