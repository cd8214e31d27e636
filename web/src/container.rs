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

//! Dependency container keyed by type.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Holds one shared value per type for handlers to request through `Inject`.
///
/// Values are cloned out on every resolution, so large values should be wrapped in an `Arc`
/// before being provided.
#[derive(Clone, Default)]
pub struct Container {
    /// Provided values keyed by their type.
    values: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl Container {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value`, replacing any previous value of the same type.
    pub fn provide<T: Any + Send + Sync>(&mut self, value: T) {
        let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
        self.values.insert(TypeId::of::<T>(), (type_name::<T>(), value));
    }

    /// Returns a copy of the value of type `T`, if one was provided.
    pub fn resolve<T: Any + Clone>(&self) -> Option<T> {
        let (_, value) = self.values.get(&TypeId::of::<T>())?;
        value.downcast_ref::<T>().cloned()
    }

    /// Returns true if a value of type `T` was provided.
    pub fn contains<T: Any>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.values.values().map(|(name, _)| *name).collect::<Vec<&str>>();
        names.sort();
        f.debug_struct("Container").field("types", &names).finish()
    }
}
