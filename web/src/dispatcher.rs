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

//! Invocation of the handlers that matched routes point to.

use crate::handler::{BoxedHandler, Context, Handler, boxed};
use crate::{Container, MatchedRoute, Request, Response, RouteTarget, WebError, WebResult, csrf};
use http::Method;
use log::debug;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// A named set of actions with optional hooks around them.
#[derive(Clone, Debug)]
pub struct Controller {
    /// Name routes use to refer to the controller.
    name: String,

    /// Module the controller belongs to, if any.
    module: Option<String>,

    /// Actions by name.
    actions: HashMap<String, BoxedHandler>,

    /// Hook that runs before every action.
    before: Option<BoxedHandler>,

    /// Hook that runs after every action.
    after: Option<BoxedHandler>,

    /// Whether state-changing requests must pass the CSRF check.
    csrf: bool,
}

impl Controller {
    /// Creates a controller called `name` with no actions and CSRF checks enabled.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            module: None,
            actions: HashMap::new(),
            before: None,
            after: None,
            csrf: true,
        }
    }

    /// Places the controller in `module`.
    pub fn with_module<M: Into<String>>(mut self, module: M) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Adds the action `name` served by `handler`.
    pub fn action<N, H, Args>(mut self, name: N, handler: H) -> Self
    where
        N: Into<String>,
        H: Handler<Args>,
        Args: 'static,
    {
        self.actions.insert(name.into(), boxed(handler));
        self
    }

    /// Sets the hook that runs before every action.
    pub fn before<H: Handler<Args>, Args: 'static>(mut self, handler: H) -> Self {
        self.before = Some(boxed(handler));
        self
    }

    /// Sets the hook that runs after every action.
    pub fn after<H: Handler<Args>, Args: 'static>(mut self, handler: H) -> Self {
        self.after = Some(boxed(handler));
        self
    }

    /// Disables the CSRF check for all actions of the controller.
    pub fn without_csrf(mut self) -> Self {
        self.csrf = false;
        self
    }

    /// Returns the name of the controller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the module of the controller, if any.
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }
}

/// Key of a controller within a registry.
type ControllerKey = (Option<String>, String);

/// Formats the qualified name of a controller for diagnostics.
fn qualified_name(module: Option<&str>, name: &str) -> String {
    match module {
        Some(module) => format!("{}::{}", module, name),
        None => name.to_owned(),
    }
}

/// Controllers indexed by module and name.
#[derive(Default)]
pub struct ControllerRegistry {
    /// Registered controllers.
    controllers: HashMap<ControllerKey, Controller>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `controller`, replacing any previous one with the same module and name.
    pub fn register(&mut self, controller: Controller) {
        let key = (controller.module.clone(), controller.name.clone());
        self.controllers.insert(key, controller);
    }

    /// Looks up the controller `name` in `module`.
    pub fn get(&self, module: Option<&str>, name: &str) -> Option<&Controller> {
        self.controllers.get(&(module.map(str::to_owned), name.to_owned()))
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self
            .controllers
            .keys()
            .map(|(module, name)| qualified_name(module.as_deref(), name))
            .collect::<Vec<String>>();
        names.sort();
        f.debug_struct("ControllerRegistry").field("controllers", &names).finish()
    }
}

/// Runs the target of a matched route with arguments bound from the request and the container.
#[derive(Debug, Default)]
pub struct Dispatcher {
    /// Controllers that routes can point to.
    registry: ControllerRegistry,

    /// Values available for injection into handlers.
    container: Container,
}

impl Dispatcher {
    /// Creates a dispatcher backed by `registry` and `container`.
    pub fn new(registry: ControllerRegistry, container: Container) -> Self {
        Self { registry, container }
    }

    /// Registers `controller`.
    pub fn register(&mut self, controller: Controller) {
        self.registry.register(controller);
    }

    /// Makes `value` available for injection.
    pub fn provide<T: Any + Send + Sync>(&mut self, value: T) {
        self.container.provide(value);
    }

    /// Returns the dependency container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Invokes the target of `matched` for `request` and returns the final response.
    ///
    /// `OPTIONS` requests return `response` untouched.  Controller actions run between the
    /// controller's `before` and `after` hooks, each handing its response to the next, after the
    /// CSRF check unless the controller disabled it.
    pub async fn handle(
        &self,
        matched: &MatchedRoute,
        request: &Request,
        response: Response,
    ) -> WebResult<Response> {
        if request.method() == Method::OPTIONS {
            debug!("Skipping dispatch of OPTIONS {}", request.path());
            return Ok(response);
        }

        let cx = Context::new(request, &self.container);
        let (controller, action) = match matched.route().target() {
            RouteTarget::Callback(handler) => {
                debug!("Invoking callback for {}", request.path());
                return handler.call(response, &cx).await;
            }
            RouteTarget::Controller { controller, action } => (controller, action),
        };

        let module = matched.route().module();
        let controller = self
            .registry
            .get(module, controller)
            .ok_or_else(|| WebError::ControllerNotDefined(qualified_name(module, controller)))?;
        let handler = controller.actions.get(action).ok_or_else(|| WebError::ActionNotDefined {
            controller: qualified_name(module, &controller.name),
            action: action.clone(),
        })?;

        if controller.csrf {
            csrf::verify(request)?;
        }

        let mut response = response;
        if let Some(before) = controller.before.as_ref() {
            debug!("Running before hook of {}", controller.name);
            response = before.call(response, &cx).await?;
        }
        debug!("Invoking {}::{}", controller.name, action);
        response = handler.call(response, &cx).await?;
        if let Some(after) = controller.after.as_ref() {
            debug!("Running after hook of {}", controller.name);
            response = after.call(response, &cx).await?;
        }
        Ok(response)
    }
}
