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

//! The `Request` and `Response` types that flow through the pipeline.

use crate::{WebError, WebResult};
use axum::response::IntoResponse;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use trellis_core::rest::{RestError, get_unique_header};

/// An incoming request with its body fully read.
#[derive(Clone, Debug)]
pub struct Request {
    /// Method of the request.
    method: Method,

    /// Target of the request.
    uri: Uri,

    /// Headers of the request.
    headers: HeaderMap,

    /// Raw body of the request.
    body: Bytes,

    /// Path parameters extracted by the router.
    params: BTreeMap<String, String>,

    /// Values attached by middlewares for downstream handlers.
    attributes: serde_json::Map<String, Value>,
}

impl Request {
    /// Creates a request for `method` and `uri` with no headers and an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self::from_parts(method, uri, HeaderMap::new(), Bytes::new())
    }

    /// Creates a request from its raw parts.
    pub fn from_parts(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            params: BTreeMap::new(),
            attributes: serde_json::Map::new(),
        }
    }

    /// Adds the header `name` with `value`.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the body.
    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the method of the request.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path of the request, without the query.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the raw query of the request, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Returns the headers of the request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the single value of the header `name` as a string, if present.
    pub fn header(&self, name: &str) -> WebResult<Option<&str>> {
        match get_unique_header(&self.headers, name)? {
            Some(value) => match value.to_str() {
                Ok(s) => Ok(Some(s)),
                Err(e) => Err(WebError::Rest(RestError::InvalidRequest(format!(
                    "Bad encoding in header {}: {}",
                    name, e
                )))),
            },
            None => Ok(None),
        }
    }

    /// Returns the value of the cookie `name`, if present.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Returns the raw body of the request.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the path parameters extracted by the router.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Returns the path parameter `name`, if present.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Replaces the path parameters.
    pub(crate) fn set_params(&mut self, params: BTreeMap<String, String>) {
        self.params = params;
    }

    /// Returns all attributes attached to the request.
    pub fn attributes(&self) -> &serde_json::Map<String, Value> {
        &self.attributes
    }

    /// Returns the attribute `name`, if present.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attaches the attribute `name` with `value`, replacing any previous value.
    pub fn set_attribute<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        self.attributes.insert(name.into(), value.into());
    }
}

/// The response under construction, passed by value through middlewares and handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// Status code.
    status: StatusCode,

    /// Headers.
    headers: HeaderMap,

    /// Raw body.
    body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new() }
    }
}

impl Response {
    /// Creates an empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a response that describes `error`.
    pub fn from_error(error: &RestError) -> Self {
        let mut response = Self::new().with_status(error.status());
        match serde_json::to_vec(&error.body()) {
            Ok(body) => {
                response.set_body(mime_json(), body);
            }
            Err(e) => {
                response.set_body(mime_text(), format!("{}: {}", error, e));
            }
        }
        response
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Returns the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sets the header `name` to `value`, replacing any previous values.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the raw body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replaces the body and its content type.
    fn set_body<B: Into<Bytes>>(&mut self, content_type: HeaderValue, body: B) {
        self.headers.insert(header::CONTENT_TYPE, content_type);
        self.body = body.into();
    }

    /// Sets the body to the JSON serialization of `value`.
    pub fn json<T: Serialize>(mut self, value: &T) -> WebResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| RestError::InternalError(format!("Cannot serialize response: {}", e)))?;
        self.set_body(mime_json(), body);
        Ok(self)
    }

    /// Sets the body to plain `text`.
    pub fn text<T: Into<String>>(mut self, text: T) -> Self {
        self.set_body(mime_text(), text.into());
        self
    }

    /// Parses the body as JSON, for inspection by middlewares that post-process responses.
    pub fn body_json(&self) -> WebResult<Value> {
        Ok(serde_json::from_slice(&self.body).map_err(RestError::from)?)
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(axum::body::Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Content type of JSON bodies.
fn mime_json() -> HeaderValue {
    HeaderValue::from_static("application/json")
}

/// Content type of text bodies.
fn mime_text() -> HeaderValue {
    HeaderValue::from_static("text/plain; charset=utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_accessors() {
        let mut request = Request::new(Method::POST, Uri::from_static("/post/12?draft=1"))
            .with_header(header::COOKIE, HeaderValue::from_static("a=1; csrf_token=xyz"))
            .with_header(HeaderName::from_static("x-one"), HeaderValue::from_static("v"))
            .with_body("payload");
        assert_eq!(&Method::POST, request.method());
        assert_eq!("/post/12", request.path());
        assert_eq!(Some("draft=1"), request.query());
        assert_eq!(Some("xyz"), request.cookie("csrf_token"));
        assert_eq!(Some("1"), request.cookie("a"));
        assert_eq!(None, request.cookie("b"));
        assert_eq!(Some("v"), request.header("x-one").unwrap());
        assert_eq!(None, request.header("x-two").unwrap());
        assert_eq!(&Bytes::from("payload"), request.body());

        request.set_params(BTreeMap::from([("id".to_owned(), "12".to_owned())]));
        assert_eq!(Some("12"), request.param("id"));
        assert_eq!(None, request.param("slug"));

        request.set_attribute("user_id", 5);
        assert_eq!(Some(&json!(5)), request.attribute("user_id"));
    }

    #[test]
    fn test_request_duplicate_header() {
        let request = Request::new(Method::GET, Uri::from_static("/"))
            .with_header(HeaderName::from_static("x-one"), HeaderValue::from_static("a"))
            .with_header(HeaderName::from_static("x-one"), HeaderValue::from_static("b"));
        match request.header("x-one") {
            Err(WebError::Rest(RestError::InvalidRequest(msg))) => {
                assert!(msg.contains("more than one value"))
            }
            e => panic!("Unexpected result {:?}", e),
        }
    }

    #[test]
    fn test_response_json_and_text() {
        let response = Response::new().json(&json!({"id": "12"})).unwrap();
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("application/json", response.headers()[header::CONTENT_TYPE]);
        assert_eq!(json!({"id": "12"}), response.body_json().unwrap());

        let response = Response::new().with_status(StatusCode::CREATED).text("done");
        assert_eq!(StatusCode::CREATED, response.status());
        assert_eq!(&Bytes::from("done"), response.body());
    }

    #[test]
    fn test_response_from_error() {
        let response = Response::from_error(&RestError::NotFound("No route".to_owned()));
        assert_eq!(StatusCode::NOT_FOUND, response.status());
        assert_eq!(json!({"message": "No route"}), response.body_json().unwrap());
    }
}
