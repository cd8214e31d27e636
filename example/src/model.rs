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

//! High-level data types.

use derive_getters::Getters;
use derive_more::{AsRef, Constructor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_core::db::Record;
use trellis_core::model::{ModelError, ModelResult};
use trellis_dbal::{Entity, Model, Schema};

/// Maximum number of characters in a post title.
const MAX_TITLE_LENGTH: usize = 120;

/// Maximum length of a username as allowed by the schema.
const MAX_USERNAME_LENGTH: usize = 32;

/// Authors of posts.
pub(crate) struct Users;

impl Model for Users {
    const SCHEMA: Schema = Schema::new("users").with_hidden(&["email"]);
}

/// Blog posts.
pub(crate) struct Posts;

impl Model for Posts {
    const SCHEMA: Schema = Schema::new("posts").with_foreign_keys(&[("users", "user_id")]);
}

/// Fetches the integer column `name` from `record`.
fn get_i64(record: &Record, name: &str) -> ModelResult<i64> {
    record
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| ModelError(format!("Missing or invalid integer column {}", name)))
}

/// Fetches the text column `name` from `record`.
fn get_string(record: &Record, name: &str) -> ModelResult<String> {
    record
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ModelError(format!("Missing or invalid text column {}", name)))
}

/// The title of a post, trimmed and guaranteed to be non-empty and of bounded length.
#[derive(AsRef, Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "String")]
pub(crate) struct PostTitle(String);

impl PostTitle {
    /// Validates and creates a title from `title`.
    pub(crate) fn new<S: Into<String>>(title: S) -> ModelResult<Self> {
        let title = title.into();
        let title = title.trim();
        if title.is_empty() {
            return Err(ModelError("Post title cannot be empty".to_owned()));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(ModelError(format!(
                "Post title cannot be longer than {} characters",
                MAX_TITLE_LENGTH
            )));
        }
        Ok(Self(title.to_owned()))
    }

    /// Returns the title as a string.
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PostTitle {
    type Error = ModelError;

    fn try_from(title: String) -> ModelResult<Self> {
        Self::new(title)
    }
}

/// A correctly-formatted, but maybe non-existent, username.
///
/// Usernames are case-insensitive and stored in lowercase.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "String")]
pub(crate) struct Username(String);

impl Username {
    /// Validates and creates a username from `name`.
    pub(crate) fn new<S: Into<String>>(name: S) -> ModelResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ModelError("Username cannot be empty".to_owned()));
        }
        if name.len() > MAX_USERNAME_LENGTH {
            return Err(ModelError("Username is too long".to_owned()));
        }
        for ch in name.chars() {
            if !(ch.is_ascii_alphanumeric() || ".-_".contains(ch)) {
                return Err(ModelError(format!(
                    "Unsupported character '{}' in username '{}'",
                    ch, name
                )));
            }
        }
        Ok(Self(name.to_lowercase()))
    }

    /// Returns the username as a string.
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = ModelError;

    fn try_from(name: String) -> ModelResult<Self> {
        Self::new(name)
    }
}

/// An email address with a non-empty local part and domain.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "String")]
pub(crate) struct EmailAddress(String);

impl EmailAddress {
    /// Validates and creates an email address from `address`.
    pub(crate) fn new<S: Into<String>>(address: S) -> ModelResult<Self> {
        let address = address.into();
        match address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Self(address)),
            _ => Err(ModelError(format!("Invalid email address '{}'", address))),
        }
    }

    /// Returns the address as a string.
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = ModelError;

    fn try_from(address: String) -> ModelResult<Self> {
        Self::new(address)
    }
}

/// Contents submitted to register a user.
#[derive(Deserialize, Getters)]
pub(crate) struct UserForm {
    /// Name of the user.
    username: Username,

    /// Contact address of the user.  Never exposed by the API.
    email: EmailAddress,
}

/// Contents submitted to create or update a post.
#[derive(Deserialize, Getters)]
#[cfg_attr(test, derive(Debug))]
pub(crate) struct PostForm {
    /// Title of the post.
    title: PostTitle,

    /// Body of the post.
    body: String,
}

/// A user as exposed by the API.  The email address never leaves the database layer.
#[derive(Constructor, Getters, Serialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) struct User {
    /// Identifier of the user.
    id: i64,

    /// Public name of the user.
    username: String,
}

impl TryFrom<Entity> for User {
    type Error = ModelError;

    fn try_from(entity: Entity) -> ModelResult<Self> {
        let record = entity.as_array();
        Ok(Self::new(get_i64(&record, "id")?, get_string(&record, "username")?))
    }
}

/// A post as exposed by the API.
#[derive(Constructor, Getters, Serialize)]
#[cfg_attr(test, derive(Debug, Deserialize, PartialEq))]
pub(crate) struct Post {
    /// Identifier of the post.
    id: i64,

    /// Identifier of the author.
    user_id: i64,

    /// Title of the post.
    title: String,

    /// Body of the post.
    body: String,

    /// Username of the author, when the query joined it in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
}

impl TryFrom<Entity> for Post {
    type Error = ModelError;

    fn try_from(entity: Entity) -> ModelResult<Self> {
        let record = entity.as_array();
        let author = match record.get("author") {
            Some(Value::String(author)) => Some(author.clone()),
            _ => None,
        };
        Ok(Self::new(
            get_i64(&record, "id")?,
            get_i64(&record, "user_id")?,
            get_string(&record, "title")?,
            get_string(&record, "body")?,
            author,
        ))
    }
}

/// One page of posts.
#[derive(Serialize)]
#[cfg_attr(test, derive(Debug, Deserialize, PartialEq))]
pub(crate) struct PostPage {
    /// Posts in this page, newest first.
    pub(crate) items: Vec<Post>,

    /// Number of posts across all pages.
    pub(crate) total: u64,

    /// Number of this page, starting at 1.
    pub(crate) current_page: u64,

    /// Number of the last page.
    pub(crate) last_page: u64,
}
