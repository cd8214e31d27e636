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

//! Sample REST service that implements a small blog.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use log::info;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use trellis_core::db::{Database, DbConfig};
use trellis_core::env::get_optional_var;

mod db;
pub(crate) mod model;
mod rest;

/// Port to listen on when none is configured.
const DEFAULT_PORT: u16 = 3000;

/// Runtime settings of the service.
#[derive(Debug, PartialEq)]
pub struct Settings {
    /// Port to listen on.
    pub port: u16,

    /// Connection parameters for the database.
    pub db: DbConfig,
}

impl Settings {
    /// Loads the settings from environment variables whose names start with `prefix`.
    ///
    /// `<prefix>_PORT` is optional and the database is configured by the `<prefix>_DB_*`
    /// variables that `DbConfig::from_env` recognizes.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let port = get_optional_var::<u16>(prefix, "PORT")?.unwrap_or(DEFAULT_PORT);
        let db = DbConfig::from_env(&format!("{}_DB", prefix))?;
        Ok(Self { port, db })
    }
}

/// Connects to the database described by `db_config`, prepares its schema, and serves the blog
/// on `bind_addr` until the server stops.
///
/// This lives here instead of in `main` so that the database and REST layers can stay private to
/// the crate.
pub async fn serve(
    bind_addr: impl Into<SocketAddr>,
    db_config: DbConfig,
) -> Result<(), Box<dyn Error>> {
    let db = Arc::new(Database::new());
    db.connect(db_config).await?;
    db::init_schema(&db).await?;

    let app = rest::app(db.clone())?;
    info!("Serving {} routes", app.router().len());
    let result = app.serve(bind_addr).await;

    db.disconnect().await;
    Ok(result?)
}
