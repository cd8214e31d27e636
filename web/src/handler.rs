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

//! Handlers and the binding of their arguments.
//!
//! A handler is any `async` function that takes the in-flight `Response` as its first argument,
//! followed by up to six arguments whose types implement `FromContext`, and returns the
//! `Response` to continue with:
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct PostId {
//!     id: u32,
//! }
//!
//! async fn show(response: Response, Path(post): Path<PostId>, Inject(db): Inject<Arc<Database>>)
//!     -> WebResult<Response>
//! {
//!     ...
//! }
//! ```
//!
//! Arguments are bound before the handler runs.  Path parameters bind by name into the fields of
//! the `Path` payload and container values bind by type through `Inject`.  Wrapping an argument
//! in `Option` turns a binding failure into `None`, and `#[serde(default)]` fields take their
//! default when the parameter is absent.

use crate::{Container, Request, Response, WebError, WebResult};
use futures::future::{self, BoxFuture};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Sources that handler arguments are bound from.
pub struct Context<'a> {
    /// The request being served.
    request: &'a Request,

    /// The dependency container of the application.
    container: &'a Container,
}

impl<'a> Context<'a> {
    /// Creates a binding context for `request` backed by `container`.
    pub fn new(request: &'a Request, container: &'a Container) -> Self {
        Self { request, container }
    }

    /// Returns the request being served.
    pub fn request(&self) -> &'a Request {
        self.request
    }

    /// Returns the dependency container.
    pub fn container(&self) -> &'a Container {
        self.container
    }
}

/// Types that can be bound as handler arguments.
pub trait FromContext: Sized {
    /// Builds the argument from `cx`, failing with `WebError::Binding` if it cannot be bound.
    fn from_context(cx: &Context<'_>) -> WebResult<Self>;
}

/// Binds the path parameters into the fields of `T` by name.
#[derive(Debug)]
pub struct Path<T>(pub T);

impl<T: DeserializeOwned> FromContext for Path<T> {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        let encoded = serde_urlencoded::to_string(cx.request().params())
            .map_err(|e| WebError::Binding(format!("Cannot encode path parameters: {}", e)))?;
        serde_urlencoded::from_str(&encoded)
            .map(Path)
            .map_err(|e| WebError::Binding(format!("Cannot bind path parameters: {}", e)))
    }
}

/// Binds all path parameters as strings.
#[derive(Debug)]
pub struct Params(pub BTreeMap<String, String>);

impl FromContext for Params {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        Ok(Params(cx.request().params().clone()))
    }
}

/// Binds the query string into the fields of `T`.
#[derive(Debug)]
pub struct Query<T>(pub T);

impl<T: DeserializeOwned> FromContext for Query<T> {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        serde_urlencoded::from_str(cx.request().query().unwrap_or(""))
            .map(Query)
            .map_err(|e| WebError::Binding(format!("Cannot bind query: {}", e)))
    }
}

/// Binds a URL-encoded form body into the fields of `T`.
#[derive(Debug)]
pub struct Form<T>(pub T);

impl<T: DeserializeOwned> FromContext for Form<T> {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        serde_urlencoded::from_bytes(cx.request().body())
            .map(Form)
            .map_err(|e| WebError::Binding(format!("Cannot bind form: {}", e)))
    }
}

/// Binds a JSON body into `T`.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromContext for Json<T> {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        serde_json::from_slice(cx.request().body())
            .map(Json)
            .map_err(|e| WebError::Binding(format!("Invalid JSON body: {}", e)))
    }
}

/// Binds the attributes that middlewares attached to the request.
#[derive(Debug)]
pub struct Attributes(pub serde_json::Map<String, Value>);

impl FromContext for Attributes {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        Ok(Attributes(cx.request().attributes().clone()))
    }
}

/// Binds the value of type `T` held by the container.
#[derive(Debug)]
pub struct Inject<T>(pub T);

impl<T: Any + Clone> FromContext for Inject<T> {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        match cx.container().resolve::<T>() {
            Some(value) => Ok(Inject(value)),
            None => {
                Err(WebError::Binding(format!("No value of type {} available", type_name::<T>())))
            }
        }
    }
}

impl FromContext for Request {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        Ok(cx.request().clone())
    }
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(cx: &Context<'_>) -> WebResult<Self> {
        match T::from_context(cx) {
            Ok(value) => Ok(Some(value)),
            Err(WebError::Binding(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Functions that can serve as route callbacks, controller actions, or hooks.
///
/// `Args` is the tuple of bound argument types and only exists to keep the implementations for
/// different arities apart.
pub trait Handler<Args>: Clone + Send + Sync + Sized + 'static {
    /// Binds the arguments from `cx` and returns the future that runs the handler.
    fn call(&self, response: Response, cx: &Context<'_>) -> BoxFuture<'static, WebResult<Response>>;
}

/// Implements `Handler` for functions taking the response plus the given argument types.
macro_rules! impl_handler {
    ( $( $ty:ident ),* ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, $( $ty, )*> Handler<( $( $ty, )* )> for F
        where
            F: Fn(Response, $( $ty, )*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = WebResult<Response>> + Send + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            fn call(
                &self,
                response: Response,
                cx: &Context<'_>,
            ) -> BoxFuture<'static, WebResult<Response>> {
                $(
                    let $ty = match $ty::from_context(cx) {
                        Ok(value) => value,
                        Err(e) => return Box::pin(future::ready(Err(e))),
                    };
                )*
                Box::pin((self)(response, $( $ty, )*))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);

/// Object-safe view of a `Handler` with its argument types erased.
trait ErasedHandler: Send + Sync {
    /// Same as `Handler::call`.
    fn call(&self, response: Response, cx: &Context<'_>) -> BoxFuture<'static, WebResult<Response>>;
}

/// Adapter from a `Handler` to an `ErasedHandler`.
struct Erased<H, Args> {
    /// The wrapped handler.
    handler: H,

    /// Marker for the argument types of `handler`.
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> ErasedHandler for Erased<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn call(
        &self,
        response: Response,
        cx: &Context<'_>,
    ) -> BoxFuture<'static, WebResult<Response>> {
        self.handler.call(response, cx)
    }
}

/// A type-erased handler that can be stored in routes and controllers.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler>);

impl BoxedHandler {
    /// Binds the arguments of the handler from `cx` and runs it on `response`.
    pub fn call(
        &self,
        response: Response,
        cx: &Context<'_>,
    ) -> BoxFuture<'static, WebResult<Response>> {
        self.0.call(response, cx)
    }
}

impl fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedHandler")
    }
}

/// Erases the argument types of `handler`.
pub fn boxed<H, Args>(handler: H) -> BoxedHandler
where
    H: Handler<Args>,
    Args: 'static,
{
    BoxedHandler(Arc::new(Erased { handler, _args: PhantomData }))
}
