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

//! Foundations shared by all Trellis crates.
//!
//! Applications built on Trellis are organized in the following layers, from the bottom up:
//!
//! 1.  `model`: High-level data types that represent concepts in the domain of the application.
//!     Newtypes validate their contents at construction time so that the rest of the code can
//!     trust them.
//!
//! 1.  `db`: The persistence layer.  This crate offers the connection lifecycle (`Database`), the
//!     per-backend executors, and the conversion of raw rows into `Record`s.  The `trellis-dbal`
//!     crate builds the query builder on top of these primitives.
//!
//! 1.  `web`: The request pipeline (router, middleware, dispatcher) lives in `trellis-web`.
//!
//! 1.  `rest`: The HTTP-visible error type and test utilities to exercise an `axum::Router` in
//!     process.
//!
//! There are result and error types in every layer, such as `DbResult` and `DbError`.  Errors can
//! transparently float to the top of the app using the `?` operator, being translated to HTTP
//! status codes once returned from the REST layer.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

pub mod db;
pub mod env;
pub mod model;
pub mod rest;
