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

//! Incremental construction of SQL statements.

use serde_json::Value;
use trellis_core::db::{Dialect, Statement};
use trellis_core::model::Identifier;

/// Accumulates SQL text and parameters for a single statement, taking care of quoting and
/// placeholder numbering for the target dialect.
pub(crate) struct SqlWriter {
    /// Dialect to render for.
    dialect: Dialect,

    /// SQL text written so far.
    sql: String,

    /// Parameters referenced by the placeholders in `sql`.
    params: Vec<Value>,
}

impl SqlWriter {
    /// Creates an empty writer for `dialect`.
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self { dialect, sql: String::new(), params: vec![] }
    }

    /// Appends raw SQL text.
    pub(crate) fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// Appends a quoted identifier.
    pub(crate) fn ident(&mut self, ident: &Identifier) -> &mut Self {
        self.sql.push_str(&ident.quoted(self.dialect.quote()));
        self
    }

    /// Appends a placeholder bound to `value`.
    pub(crate) fn param(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Appends `items` separated by `sep`, rendering each one with `f`.
    pub(crate) fn list<T, F>(&mut self, items: &[T], sep: &str, mut f: F) -> &mut Self
    where
        F: FnMut(&mut Self, &T),
    {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            f(self, item);
        }
        self
    }

    /// Returns the dialect this writer renders for.
    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Consumes the writer and returns the final statement.
    pub(crate) fn finish(self) -> Statement {
        Statement::with_params(self.sql, self.params)
    }
}
