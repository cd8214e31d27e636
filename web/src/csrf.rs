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

//! Double-submit CSRF protection.

use crate::{Request, WebError, WebResult};
use http::Method;

/// Name of the header that must echo the CSRF cookie.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Name of the cookie that holds the CSRF token.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Returns true if requests with `method` can change server state.
fn is_state_changing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Checks that a state-changing `request` carries the same token in the CSRF header and cookie.
pub(crate) fn verify(request: &Request) -> WebResult<()> {
    if !is_state_changing(request.method()) {
        return Ok(());
    }

    let header = match request.header(CSRF_HEADER)? {
        Some(header) if !header.is_empty() => header,
        _ => return Err(WebError::Csrf("Missing CSRF token header".to_owned())),
    };
    let cookie = match request.cookie(CSRF_COOKIE) {
        Some(cookie) if !cookie.is_empty() => cookie,
        _ => return Err(WebError::Csrf("Missing CSRF token cookie".to_owned())),
    };
    if header != cookie {
        return Err(WebError::Csrf("CSRF token mismatch".to_owned()));
    }
    Ok(())
}
