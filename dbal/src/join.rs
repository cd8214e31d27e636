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

//! Join clauses, either explicit or derived from model relations.

use crate::sql::SqlWriter;
use crate::{DbalError, DbalResult, Operator, Schema};
use log::debug;
use std::str::FromStr;
use trellis_core::model::Identifier;

/// Kinds of joins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    /// Inner join, rendered as a plain `JOIN`.
    Inner,

    /// `LEFT JOIN`.
    Left,

    /// `RIGHT JOIN`.  Not all backends support it (notably older SQLite versions).
    Right,
}

impl JoinKind {
    /// Returns the SQL keywords for the join kind.
    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// A validated `JOIN table ON left op right` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinClause {
    /// Table being joined.
    table: Identifier,

    /// Left-hand side column of the join condition.
    left: Identifier,

    /// Comparison operator of the join condition.
    operator: Operator,

    /// Right-hand side column of the join condition.
    right: Identifier,

    /// Kind of join.
    kind: JoinKind,
}

impl JoinClause {
    /// Creates a join of `kind` on `table` with the condition `left operator right`.
    ///
    /// Only comparison operators are accepted in join conditions.
    pub fn new(
        kind: JoinKind,
        table: &str,
        (left, operator, right): (&str, &str, &str),
    ) -> DbalResult<Self> {
        let operator = Operator::from_str(operator)?;
        if !operator.is_comparison() {
            return Err(DbalError::UnsupportedOperator(operator.to_string()));
        }
        Ok(Self {
            table: Identifier::new(table)?,
            left: Identifier::new(left)?,
            operator,
            right: Identifier::new(right)?,
            kind,
        })
    }

    /// Derives the join between the `current` model and a `related` one from their foreign keys.
    ///
    /// When `through` is false, a foreign key declared by `related` towards `current` links
    /// `related.<fk>` with `current.<id>`, and a foreign key declared by `current` towards
    /// `related` links `related.<id>` with `current.<fk>`.  When `through` is true, whichever key
    /// is found links `related.<id>` with `current.<fk>`, which is how a pivot table reaches the
    /// far side of a many-to-many relation.
    pub(crate) fn between(current: &Schema, related: &Schema, through: bool) -> DbalResult<Self> {
        let inbound = related.foreign_key(current.table);
        let outbound = current.foreign_key(related.table);

        let (left, right) = match (through, inbound, outbound) {
            (false, Some(col), _) => {
                (format!("{}.{}", related.table, col), current.qualified_id())
            }
            (false, None, Some(col)) | (true, None, Some(col)) | (true, Some(col), _) => {
                (related.qualified_id(), format!("{}.{}", current.table, col))
            }
            (_, None, None) => {
                return Err(DbalError::WrongRelation(
                    current.table.to_owned(),
                    related.table.to_owned(),
                ));
            }
        };

        debug!("Derived join from {} to {}: {} = {}", current.table, related.table, left, right);
        Self::new(JoinKind::Inner, related.table, (&left, "=", &right))
    }

    /// Returns the table being joined.
    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// Returns the kind of join.
    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    /// Renders the clause into `w`.
    pub(crate) fn render(&self, w: &mut SqlWriter) {
        w.push(self.kind.as_sql()).push(" ").ident(&self.table).push(" ON ");
        w.ident(&self.left).push(" ").push(self.operator.as_str()).push(" ").ident(&self.right);
    }
}
