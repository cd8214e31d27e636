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

//! Conditions for `WHERE` and `HAVING` clauses.

use crate::sql::SqlWriter;
use crate::{DbalError, DbalResult};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use trellis_core::model::Identifier;

/// Comparison operators accepted in criteria.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `IN`, which takes a non-empty list.
    In,
    /// `NOT IN`, which takes a non-empty list.
    NotIn,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `IS NULL`, which takes no value.
    Null,
    /// `IS NOT NULL`, which takes no value.
    NotNull,
}

impl Operator {
    /// Returns the operator as written by users.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Null => "NULL",
            Operator::NotNull => "NOT NULL",
        }
    }

    /// Returns true if this operator compares two scalars.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Gt
                | Operator::Gte
                | Operator::Lt
                | Operator::Lte
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = DbalError;

    fn from_str(s: &str) -> DbalResult<Self> {
        let normalized = s.split_whitespace().collect::<Vec<&str>>().join(" ").to_uppercase();
        match normalized.as_str() {
            "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::NotEq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            "LIKE" => Ok(Operator::Like),
            "NOT LIKE" => Ok(Operator::NotLike),
            "NULL" => Ok(Operator::Null),
            "NOT NULL" => Ok(Operator::NotNull),
            _ => Err(DbalError::UnsupportedOperator(s.to_owned())),
        }
    }
}

/// How a criterion combines with the one before it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Connective {
    /// Both conditions must hold.
    And,

    /// Either condition must hold.
    Or,
}

impl Connective {
    /// Returns the SQL keyword for the connective.
    fn as_sql(self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// A single validated condition on a column.
#[derive(Clone, Debug, PartialEq)]
pub struct Criterion {
    /// Column the condition applies to.
    column: Identifier,

    /// Comparison to perform.
    operator: Operator,

    /// Value to compare against.  Lists for `IN`, null for the null checks.
    value: Value,

    /// How this criterion combines with the previous one.
    connective: Connective,
}

impl Criterion {
    /// Creates a new criterion after validating all of its parts.
    pub fn new<V: Into<Value>>(column: &str, operator: &str, value: V) -> DbalResult<Self> {
        let operator = Operator::from_str(operator)?;
        let column = Identifier::new(column)?;
        if column.as_str().ends_with('*') {
            return Err(DbalError::InvalidCriteria(format!(
                "Cannot compare against wildcard {}",
                column
            )));
        }

        let value = value.into();
        let value = match operator {
            Operator::Null | Operator::NotNull => Value::Null,
            Operator::In | Operator::NotIn => match value {
                Value::Array(items) if !items.is_empty() => {
                    if items.iter().any(|v| v.is_array() || v.is_object()) {
                        return Err(DbalError::InvalidCriteria(format!(
                            "Operator {} on {} expects a list of scalars",
                            operator, column
                        )));
                    }
                    Value::Array(items)
                }
                _ => {
                    return Err(DbalError::InvalidCriteria(format!(
                        "Operator {} on {} expects a non-empty list",
                        operator, column
                    )));
                }
            },
            _ => {
                if value.is_array() || value.is_object() {
                    return Err(DbalError::InvalidCriteria(format!(
                        "Operator {} on {} expects a scalar",
                        operator, column
                    )));
                }
                value
            }
        };

        Ok(Self { column, operator, value, connective: Connective::And })
    }

    /// Returns the column the criterion applies to.
    pub fn column(&self) -> &Identifier {
        &self.column
    }

    /// Returns the operator of the criterion.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Returns the value of the criterion.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns how the criterion combines with the previous one.
    pub fn connective(&self) -> Connective {
        self.connective
    }

    /// Renders the criterion into `w`.
    fn render(&self, w: &mut SqlWriter) {
        w.ident(&self.column);
        match self.operator {
            Operator::Null => {
                w.push(" IS NULL");
            }
            Operator::NotNull => {
                w.push(" IS NOT NULL");
            }
            Operator::In | Operator::NotIn => {
                w.push(" ").push(self.operator.as_str()).push(" (");
                let items = match &self.value {
                    Value::Array(items) => items.as_slice(),
                    other => std::slice::from_ref(other),
                };
                w.list(items, ", ", |w, v| {
                    w.param(v.clone());
                });
                w.push(")");
            }
            op => {
                w.push(" ").push(op.as_str()).push(" ").param(self.value.clone());
            }
        }
    }
}

/// User-facing description of criteria for `QueryBuilder::criterias`.
///
/// `Any` groups its members with `OR` and composes with the surrounding criteria with `AND`.
#[derive(Clone, Debug, PartialEq)]
pub enum Criteria {
    /// A single condition.
    One {
        /// Column name.
        column: String,
        /// Operator, as accepted by `Operator::from_str`.
        operator: String,
        /// Value to compare against.
        value: Value,
    },

    /// A group of conditions of which at least one must hold.
    Any(Vec<Criteria>),
}

impl Criteria {
    /// Creates a single condition.
    pub fn new<C, O, V>(column: C, operator: O, value: V) -> Self
    where
        C: Into<String>,
        O: Into<String>,
        V: Into<Value>,
    {
        Criteria::One { column: column.into(), operator: operator.into(), value: value.into() }
    }

    /// Creates an `OR` group.
    pub fn any(group: Vec<Criteria>) -> Self {
        Criteria::Any(group)
    }
}

/// A validated top-level condition: either a single criterion or a bracketed group.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Condition {
    /// A single criterion.
    Single(Criterion),

    /// A bracketed group of criteria combined by their connectives.
    Group(Vec<Criterion>),
}

impl Condition {
    /// Validates user-provided `criteria` into a condition.
    pub(crate) fn from_criteria(criteria: Criteria) -> DbalResult<Self> {
        match criteria {
            Criteria::One { column, operator, value } => {
                Ok(Condition::Single(Criterion::new(&column, &operator, value)?))
            }
            Criteria::Any(group) => {
                if group.is_empty() {
                    return Err(DbalError::InvalidCriteria("Empty OR group".to_owned()));
                }
                let mut members = Vec::with_capacity(group.len());
                for (i, member) in group.into_iter().enumerate() {
                    match member {
                        Criteria::One { column, operator, value } => {
                            let mut criterion = Criterion::new(&column, &operator, value)?;
                            if i > 0 {
                                criterion.connective = Connective::Or;
                            }
                            members.push(criterion);
                        }
                        Criteria::Any(_) => {
                            return Err(DbalError::InvalidCriteria(
                                "OR groups cannot be nested".to_owned(),
                            ));
                        }
                    }
                }
                Ok(Condition::Group(members))
            }
        }
    }

    /// Renders the condition into `w`.
    fn render(&self, w: &mut SqlWriter) {
        match self {
            Condition::Single(criterion) => criterion.render(w),
            Condition::Group(members) => {
                w.push("(");
                for (i, criterion) in members.iter().enumerate() {
                    if i > 0 {
                        w.push(" ").push(criterion.connective.as_sql()).push(" ");
                    }
                    criterion.render(w);
                }
                w.push(")");
            }
        }
    }
}

/// Renders `conditions` joined with `AND` into `w`.
pub(crate) fn render_conditions(w: &mut SqlWriter, conditions: &[Condition]) {
    w.list(conditions, " AND ", |w, condition| condition.render(w));
}
