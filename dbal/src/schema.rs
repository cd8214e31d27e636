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

//! Static description of the tables that models map to.

use crate::{DbalResult, QueryBuilder};
use trellis_core::model::Identifier;

/// Describes the table behind a model.
///
/// Schemas are meant to be declared as constants, which is why all fields are static.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Schema {
    /// Name of the table.
    pub table: &'static str,

    /// Name of the primary key column.
    pub id_column: &'static str,

    /// Pairs of `(related_table, column)` declaring the column that links this model with a
    /// related table.
    pub foreign_keys: &'static [(&'static str, &'static str)],

    /// Columns that must never be exposed by `Entity::as_array`.
    pub hidden: &'static [&'static str],
}

impl Schema {
    /// Creates a schema for `table` with an `id` primary key and no relations.
    pub const fn new(table: &'static str) -> Self {
        Self { table, id_column: "id", foreign_keys: &[], hidden: &[] }
    }

    /// Overrides the primary key column.
    pub const fn with_id_column(self, id_column: &'static str) -> Self {
        Self { id_column, ..self }
    }

    /// Sets the foreign keys of the model.
    pub const fn with_foreign_keys(
        self,
        foreign_keys: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self { foreign_keys, ..self }
    }

    /// Sets the hidden columns of the model.
    pub const fn with_hidden(self, hidden: &'static [&'static str]) -> Self {
        Self { hidden, ..self }
    }

    /// Returns the column declared as linking this model with `related_table`, if any.
    pub fn foreign_key(&self, related_table: &str) -> Option<&'static str> {
        self.foreign_keys.iter().find(|(table, _)| *table == related_table).map(|(_, col)| *col)
    }

    /// Returns true if `column` must not be exposed.
    pub fn is_hidden(&self, column: &str) -> bool {
        self.hidden.contains(&column)
    }

    /// Returns the primary key column qualified with the table name.
    pub(crate) fn qualified_id(&self) -> String {
        format!("{}.{}", self.table, self.id_column)
    }

    /// Checks that all names in the schema are valid identifiers.
    pub(crate) fn validate(&self) -> DbalResult<()> {
        Identifier::new(self.table)?;
        Identifier::new(self.id_column)?;
        for (table, column) in self.foreign_keys {
            Identifier::new(*table)?;
            Identifier::new(*column)?;
        }
        Ok(())
    }
}

/// Trait for types that are backed by a database table.
pub trait Model {
    /// Description of the table behind the model.
    const SCHEMA: Schema;

    /// Starts a new query against the table of this model.
    fn query() -> DbalResult<QueryBuilder> {
        QueryBuilder::new(Self::SCHEMA)
    }
}
