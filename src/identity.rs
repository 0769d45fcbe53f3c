// Copyright 2019 Dmitry Tantsur <divius.inside@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Authentication using Identity API v3.
//!
//! Currently supports [Password](struct.Password.html) and [Token](struct.Token.html)
//! authentication. Identity API v2 is not and will not be supported.
//!
//! Tokens are kept in the process-wide [TokenCache](../cache/struct.TokenCache.html), so all
//! authentication objects with the same credentials share one token.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, FixedOffset, Local};
use log::trace;
use reqwest::Url;

use crate::cache::Validity;

mod internal;
mod password;
pub(crate) mod protocol;
mod token;

pub use self::password::Password;
pub use self::token::Token;
pub use crate::common::IdOrName;

pub(crate) const MISSING_SUBJECT_HEADER: &str = "Missing X-Subject-Token header";
pub(crate) const INVALID_SUBJECT_HEADER: &str = "Invalid X-Subject-Token header";
// Required validity time in minutes. Here we refresh the token if it expires
// in 10 minutes or less.
pub(crate) const TOKEN_MIN_VALIDITY: i64 = 10;

/// A scope of a token.
///
/// Only project scopes are currently supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// A token scoped to a project.
    Project {
        /// Project ID or name.
        project: IdOrName,
        /// ID or name of the project domain.
        domain: Option<IdOrName>,
    },
}

/// Generic trait for authentication using Identity API V3.
pub trait Identity {
    /// Get a reference to the auth URL.
    fn auth_url(&self) -> &Url;
}

/// Authentication token received from the Identity service.
///
/// Its `Debug` representation does not reveal the token itself.
#[derive(Clone)]
pub struct AuthToken {
    value: String,
    body: protocol::Token,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut hasher = DefaultHasher::new();
        self.value.hash(&mut hasher);
        write!(
            f,
            "AuthToken {{ value: hash({}), body: {:?} }}",
            hasher.finish(),
            self.body
        )
    }
}

impl AuthToken {
    pub(crate) fn new(value: String, body: protocol::Token) -> AuthToken {
        AuthToken { value, body }
    }

    /// The token string to pass in the `X-Auth-Token` header.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiration time of the token.
    #[inline]
    pub fn expires_at(&self) -> &DateTime<FixedOffset> {
        &self.body.expires_at
    }

    #[inline]
    pub(crate) fn catalog(&self) -> &[protocol::CatalogRecord] {
        &self.body.catalog
    }
}

impl Validity for AuthToken {
    /// A token is valid if it does not expire in the next `TOKEN_MIN_VALIDITY` minutes.
    fn is_valid(&self) -> bool {
        let validity_time_left = self.body.expires_at.signed_duration_since(Local::now());
        trace!("Token is valid for {:?}", validity_time_left);
        validity_time_left > Duration::minutes(TOKEN_MIN_VALIDITY)
    }
}
