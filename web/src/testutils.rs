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

//! Test utilities for the request pipeline.

use crate::{Flow, Middleware, Next, Request, Response, WebError, WebResult};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::{Arc, Mutex};

/// Appends `text` to the body of `response`.
pub(crate) fn append_body(response: Response, text: &str) -> Response {
    let mut body = String::from_utf8_lossy(response.body()).into_owned();
    body.push_str(text);
    response.text(body)
}

/// Middleware that records its name in a shared log and tags the request with it.
pub(crate) struct Recorder {
    /// Name to record.
    name: &'static str,

    /// Log shared with the test.
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    /// Creates a middleware that appends `name` to `log` when it runs.
    pub(crate) fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self { name, log }
    }
}

#[async_trait]
impl Middleware for Recorder {
    async fn apply(&self, mut request: Request, response: Response, next: Next) -> WebResult<Flow> {
        self.log.lock().unwrap().push(self.name.to_owned());
        request.set_attribute("last", self.name);
        Ok(next.run(request, response))
    }
}

/// Middleware that halts the chain with an empty response of a fixed status.
pub(crate) struct Halter {
    /// Status of the response to return.
    status: StatusCode,
}

impl Halter {
    /// Creates a middleware that halts with `status`.
    pub(crate) fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

#[async_trait]
impl Middleware for Halter {
    async fn apply(&self, _request: Request, response: Response, _next: Next) -> WebResult<Flow> {
        Ok(Flow::Halt(response.with_status(self.status)))
    }
}

/// Middleware that always fails.
pub(crate) struct Failer;

#[async_trait]
impl Middleware for Failer {
    async fn apply(&self, _request: Request, _response: Response, _next: Next) -> WebResult<Flow> {
        Err(WebError::Binding("Middleware failed".to_owned()))
    }
}
