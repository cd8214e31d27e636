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

//! Connection configuration.

use crate::db::{DbError, DbResult, Driver};
use crate::env::{get_optional_var, get_required_var};
use derivative::Derivative;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Default character set for drivers that take one.
pub const DEFAULT_CHARSET: &str = "utf8";

/// Parameters to establish a database connection.
///
/// Which fields matter depends on the driver: SQLite only looks at `database`, which is either a
/// file path or `:memory:`, while the networked drivers look at the host and credentials.
#[derive(Clone, Derivative)]
#[derivative(Debug, PartialEq)]
pub struct DbConfig {
    /// Driver to use for the connection.
    driver: Driver,

    /// Host to connect to.
    pub host: Option<String>,

    /// Port to connect to.
    pub port: Option<u16>,

    /// Name of the database to open on the server.
    pub dbname: Option<String>,

    /// Username to establish the connection with.
    pub username: Option<String>,

    /// Password to establish the connection with.
    #[derivative(Debug = "ignore")]
    pub password: Option<String>,

    /// Character set for the connection.
    pub charset: Option<String>,

    /// Path to the database file for file-based drivers.
    pub database: Option<String>,

    /// Minimum number of connections to keep open against the database.
    pub min_connections: Option<u32>,

    /// Maximum number of connections to allow against the database.
    pub max_connections: Option<u32>,

    /// Maximum number of attempts to retry a connection when the database is unavailable.
    pub max_retries: Option<u16>,
}

impl DbConfig {
    /// Creates an empty configuration for `driver`.
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            host: None,
            port: None,
            dbname: None,
            username: None,
            password: None,
            charset: None,
            database: None,
            min_connections: None,
            max_connections: None,
            max_retries: None,
        }
    }

    /// Creates a configuration for an SQLite database stored at `path`, which may be `:memory:`.
    pub fn sqlite<S: Into<String>>(path: S) -> Self {
        let mut config = Self::new(Driver::Sqlite);
        config.database = Some(path.into());
        config
    }

    /// Returns the driver of this configuration.
    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Creates a configuration from a flat key/value `map`, as would come from a settings file.
    ///
    /// The `driver` key is mandatory and all other keys are optional.
    pub fn from_map(map: &BTreeMap<String, String>) -> DbResult<Self> {
        let driver = match map.get("driver") {
            Some(driver) => Driver::from_str(driver)?,
            None => return Err(DbError::IncorrectConfig("Missing driver".to_owned())),
        };

        fn parse<T: FromStr>(map: &BTreeMap<String, String>, key: &str) -> DbResult<Option<T>> {
            match map.get(key) {
                Some(value) => match value.parse::<T>() {
                    Ok(value) => Ok(Some(value)),
                    Err(_) => Err(DbError::IncorrectConfig(format!(
                        "Invalid value for {}: {}",
                        key, value
                    ))),
                },
                None => Ok(None),
            }
        }

        Ok(Self {
            driver,
            host: map.get("host").cloned(),
            port: parse(map, "port")?,
            dbname: map.get("dbname").cloned(),
            username: map.get("username").cloned(),
            password: map.get("password").cloned(),
            charset: map.get("charset").cloned(),
            database: map.get("database").cloned(),
            min_connections: parse(map, "min_connections")?,
            max_connections: parse(map, "max_connections")?,
            max_retries: parse(map, "max_retries")?,
        })
    }

    /// Creates a configuration from environment variables whose names start with `prefix`.
    ///
    /// `<prefix>_DRIVER` is required.  The other variables (`_HOST`, `_PORT`, `_DBNAME`,
    /// `_USERNAME`, `_PASSWORD`, `_CHARSET`, `_DATABASE`, `_MIN_CONNECTIONS`, `_MAX_CONNECTIONS`
    /// and `_MAX_RETRIES`) are optional.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let driver = get_required_var::<String>(prefix, "DRIVER")?;
        let driver = Driver::from_str(&driver).map_err(|e| e.to_string())?;
        Ok(Self {
            driver,
            host: get_optional_var::<String>(prefix, "HOST")?,
            port: get_optional_var::<u16>(prefix, "PORT")?,
            dbname: get_optional_var::<String>(prefix, "DBNAME")?,
            username: get_optional_var::<String>(prefix, "USERNAME")?,
            password: get_optional_var::<String>(prefix, "PASSWORD")?,
            charset: get_optional_var::<String>(prefix, "CHARSET")?,
            database: get_optional_var::<String>(prefix, "DATABASE")?,
            min_connections: get_optional_var::<u32>(prefix, "MIN_CONNECTIONS")?,
            max_connections: get_optional_var::<u32>(prefix, "MAX_CONNECTIONS")?,
            max_retries: get_optional_var::<u16>(prefix, "MAX_RETRIES")?,
        })
    }

    /// Builds the textual connection string for this configuration.
    ///
    /// Credentials are never part of the string so that it can be logged.
    pub fn connection_string(&self) -> String {
        match self.driver {
            Driver::Sqlite => {
                format!("sqlite:{}", self.database.as_deref().unwrap_or(":memory:"))
            }
            Driver::MySql | Driver::Postgres => {
                let mut parts = vec![];
                if let Some(host) = self.host.as_ref() {
                    parts.push(format!("host={}", host));
                }
                if let Some(dbname) = self.dbname.as_ref() {
                    parts.push(format!("dbname={}", dbname));
                }
                if let Some(port) = self.port {
                    parts.push(format!("port={}", port));
                }
                if self.driver == Driver::MySql {
                    parts.push(format!(
                        "charset={}",
                        self.charset.as_deref().unwrap_or(DEFAULT_CHARSET)
                    ));
                }
                format!("{}:{}", self.driver.as_str(), parts.join(";"))
            }
        }
    }
}
