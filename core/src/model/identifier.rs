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

//! The `Identifier` data type.

use crate::model::{ModelError, ModelResult};
use serde::{Deserialize, Serialize, de::Visitor};
use std::fmt;

/// Maximum length of a single segment of an identifier.
pub(crate) const MAX_SEGMENT_LENGTH: usize = 64;

/// Represents a correctly-formatted SQL identifier, such as a table name, a column name, or a
/// table-qualified column name like `users.id` or `users.*`.
///
/// Identifiers are interpolated into generated SQL, so they are restricted to ASCII letters,
/// digits and underscores.  The wildcard `*` is only allowed as the last segment.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Creates a new identifier from an untrusted string `s`, making sure it is valid.
    pub fn new<S: Into<String>>(s: S) -> ModelResult<Self> {
        let s = s.into();

        if s.is_empty() {
            return Err(ModelError("Identifier cannot be empty".to_owned()));
        }

        let segments = s.split('.').collect::<Vec<&str>>();
        if segments.len() > 2 {
            return Err(ModelError(format!("Identifier '{}' has too many segments", s)));
        }
        for (i, segment) in segments.iter().enumerate() {
            if *segment == "*" {
                if i != segments.len() - 1 {
                    return Err(ModelError(format!("Wildcard must be last in '{}'", s)));
                }
                continue;
            }
            if segment.is_empty() {
                return Err(ModelError(format!("Identifier '{}' has an empty segment", s)));
            }
            if segment.len() > MAX_SEGMENT_LENGTH {
                return Err(ModelError(format!("Identifier '{}' is too long", s)));
            }
            if segment.starts_with(|ch: char| ch.is_ascii_digit()) {
                return Err(ModelError(format!("Identifier '{}' cannot start with a digit", s)));
            }
            for ch in segment.chars() {
                if !(ch.is_ascii_alphanumeric() || ch == '_') {
                    return Err(ModelError(format!(
                        "Unsupported character '{}' in identifier '{}'",
                        ch, s
                    )));
                }
            }
        }

        Ok(Self(s))
    }

    /// Returns a string view of the identifier.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the individual segments of the identifier.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Returns the identifier quoted with `quote` on every segment, leaving wildcards alone.
    pub fn quoted(&self, quote: char) -> String {
        let mut output = String::with_capacity(self.0.len() + 4);
        for (i, segment) in self.segments().enumerate() {
            if i > 0 {
                output.push('.');
            }
            if segment == "*" {
                output.push('*');
            } else {
                output.push(quote);
                output.push_str(segment);
                output.push(quote);
            }
        }
        output
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = ModelError;

    fn try_from(s: &str) -> ModelResult<Self> {
        Identifier::new(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ModelError;

    fn try_from(s: String) -> ModelResult<Self> {
        Identifier::new(s)
    }
}

/// A deserialization visitor for an `Identifier`.
struct IdentifierVisitor;

impl Visitor<'_> for IdentifierVisitor {
    type Value = Identifier;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Identifier::new(v).map_err(|e| E::custom(e.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Identifier::new(v).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_string(IdentifierVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{Token, assert_de_tokens_error, assert_tokens};

    #[test]
    fn test_identifier_ok() {
        assert_eq!("users", Identifier::new("users").unwrap().as_str());
        assert_eq!("users.id", Identifier::new("users.id").unwrap().as_str());
        assert_eq!("users.*", Identifier::new("users.*").unwrap().as_str());
        assert_eq!("*", Identifier::new("*").unwrap().as_str());
        assert_eq!("_private2", Identifier::new("_private2").unwrap().as_str());
    }

    #[test]
    fn test_identifier_error() {
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("a b").is_err());
        assert!(Identifier::new("a.b.c").is_err());
        assert!(Identifier::new("*.id").is_err());
        assert!(Identifier::new("users.").is_err());
        assert!(Identifier::new("1users").is_err());
        assert!(Identifier::new("users; DROP TABLE users").is_err());
        assert!(Identifier::new("na\u{00ef}ve").is_err());

        let mut long_string = "a".repeat(MAX_SEGMENT_LENGTH);
        assert!(Identifier::new(&long_string).is_ok());
        long_string.push('x');
        assert!(Identifier::new(&long_string).is_err());
    }

    #[test]
    fn test_identifier_quoted() {
        assert_eq!("`users`", Identifier::new("users").unwrap().quoted('`'));
        assert_eq!("\"users\".\"id\"", Identifier::new("users.id").unwrap().quoted('"'));
        assert_eq!("`users`.*", Identifier::new("users.*").unwrap().quoted('`'));
        assert_eq!("*", Identifier::new("*").unwrap().quoted('`'));
    }

    #[test]
    fn test_identifier_ser_de_ok() {
        let id = Identifier::new("users.id").unwrap();
        assert_tokens(&id, &[Token::String("users.id")]);
    }

    #[test]
    fn test_identifier_de_error() {
        assert_de_tokens_error::<Identifier>(
            &[Token::String("hello world")],
            "Unsupported character ' ' in identifier 'hello world'",
        );
    }
}
