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

//! Fixture models and data shared by the tests of this crate.

use crate::Schema;
use trellis_core::db::Database;

/// People.
pub(crate) const USERS: Schema = Schema::new("users").with_hidden(&["created_at"]);

/// One profession per user.
pub(crate) const USER_PROFESSIONS: Schema =
    Schema::new("user_professions").with_foreign_keys(&[("users", "user_id")]);

/// Pivot between users and events.
pub(crate) const USER_EVENTS: Schema = Schema::new("user_events")
    .with_foreign_keys(&[("users", "user_id"), ("events", "event_id")]);

/// Events that users attend.
pub(crate) const EVENTS: Schema =
    Schema::new("events").with_foreign_keys(&[("user_events", "event_id")]);

/// Meetings organized by users.
pub(crate) const MEETINGS: Schema =
    Schema::new("meetings").with_foreign_keys(&[("users", "user_id")]);

/// Tickets issued for meetings.
pub(crate) const TICKETS: Schema =
    Schema::new("tickets").with_foreign_keys(&[("meetings", "meeting_id")]);

/// Schema and contents of the fixture database.
const FIXTURE: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        firstname VARCHAR(255),
        lastname VARCHAR(255),
        age INTEGER,
        country VARCHAR(255),
        created_at DATETIME
    );
    INSERT INTO users (firstname, lastname, age, country, created_at) VALUES
        ('John', 'Doe', 45, 'Ireland', '2020-01-04 20:28:33'),
        ('Jane', 'Du', 35, 'England', '2020-02-14 10:15:12');

    CREATE TABLE events (
        id INTEGER PRIMARY KEY,
        title VARCHAR(255),
        country VARCHAR(255),
        started_at DATETIME
    );
    INSERT INTO events (title, country, started_at) VALUES
        ('Dance', 'New Zealand', '2019-01-04 20:28:33'),
        ('Music', 'England', '2019-09-14 10:15:12'),
        ('Design', 'Ireland', '2020-02-14 10:15:12'),
        ('Music', 'Ireland', '2035-09-14 10:15:12'),
        ('Film', 'Ireland', '2040-02-14 10:15:12'),
        ('Art', 'Island', NULL),
        ('Music', 'Island', NULL);

    CREATE TABLE user_events (
        id INTEGER PRIMARY KEY,
        user_id INTEGER,
        event_id INTEGER,
        confirmed VARCHAR(3),
        created_at DATETIME
    );
    INSERT INTO user_events (user_id, event_id, confirmed, created_at) VALUES
        (1, 1, 'Yes', '2020-01-04 20:28:33'),
        (1, 2, 'No', '2020-02-19 05:15:12'),
        (1, 7, 'No', '2020-02-22 11:15:15'),
        (2, 2, 'Yes', '2020-03-10 02:17:12'),
        (2, 3, 'No', '2020-04-17 12:25:18'),
        (2, 5, 'No', '2020-04-15 11:10:12'),
        (100, 200, 'No', '2020-04-15 11:10:12'),
        (110, 220, 'No', '2020-04-15 11:10:12');

    CREATE TABLE user_professions (
        id INTEGER PRIMARY KEY,
        user_id INTEGER,
        title VARCHAR(255)
    );
    INSERT INTO user_professions (user_id, title) VALUES
        (1, 'Writer'),
        (2, 'Singer');

    CREATE TABLE meetings (
        id INTEGER PRIMARY KEY,
        user_id INTEGER,
        title VARCHAR(255),
        start_date DATETIME
    );
    INSERT INTO meetings (user_id, title, start_date) VALUES
        (1, 'Business planning', '2021-11-01 11:00:00'),
        (1, 'Business management', '2021-11-05 11:00:00'),
        (2, 'Marketing', '2021-11-10 13:00:00');

    CREATE TABLE tickets (
        id INTEGER PRIMARY KEY,
        meeting_id INTEGER,
        type VARCHAR(255),
        number VARCHAR(255)
    );
    INSERT INTO tickets (meeting_id, type, number) VALUES
        (1, 'regular', 'R1245'),
        (1, 'regular', 'R4563'),
        (1, 'vip', 'V4563'),
        (2, 'vip', 'V7854'),
        (2, 'vip', 'V7410');
";

/// Creates an in-memory database populated with the fixture data.
pub(crate) async fn setup() -> Database {
    let db = trellis_core::db::sqlite::testutils::setup().await;
    db.run_schema(FIXTURE).await.unwrap();
    db
}

/// Collapses all whitespace runs in `sql` into single spaces for comparisons.
pub(crate) fn squash(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<&str>>().join(" ")
}
