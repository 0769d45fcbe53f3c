// Copyright 2020 Dmitry Tantsur <divius.inside@gmail.com>
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

//! Internal implementation of the identity authentication.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::{debug, error, trace};
use reqwest::{Client, RequestBuilder, Response, Url};

use super::protocol::{self, AuthRoot};
use super::{AuthToken, IdOrName, Scope, INVALID_SUBJECT_HEADER, MISSING_SUBJECT_HEADER};
use crate::cache::TokenCache;
use crate::client::check;
use crate::{EndpointFilters, Error, ErrorKind};

/// Internal identity authentication object.
///
/// Clones share cached tokens.
#[derive(Debug, Clone)]
pub(crate) struct Internal {
    auth_url: Url,
    body: AuthRoot,
    token_endpoint: String,
    cache_key: String,
    token_cache: Arc<TokenCache<AuthToken>>,
    pub filters: EndpointFilters,
}

impl Internal {
    /// Create a new implementation.
    pub fn new(mut auth_url: Url, body: AuthRoot) -> Result<Internal, Error> {
        let _ = auth_url
            .path_segments_mut()
            .map_err(|_| Error::new(ErrorKind::InvalidConfig, "Invalid auth_url: wrong schema?"))?
            .pop_if_empty();

        let token_endpoint = if auth_url.as_str().ends_with("/v3") {
            format!("{}/auth/tokens", auth_url)
        } else {
            format!("{}/v3/auth/tokens", auth_url)
        };

        let mut result = Internal {
            auth_url,
            body,
            token_endpoint,
            cache_key: String::new(),
            token_cache: TokenCache::instance(),
            filters: EndpointFilters::default(),
        };
        result.update_cache_key();
        Ok(result)
    }

    /// Access to the auth URL.
    #[inline]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    /// Key of this identity in the token cache.
    #[cfg(test)]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Get a valid token, fetching a new one if needed.
    pub async fn cached_token(&self, client: &Client) -> Result<AuthToken, Error> {
        self.refresh(client, false).await
    }

    /// Get a URL for the requested service.
    pub async fn get_endpoint(
        &self,
        client: &Client,
        service_type: String,
        filters: EndpointFilters,
    ) -> Result<Url, Error> {
        let real_filters = filters.with_defaults(&self.filters);
        debug!(
            "Requesting a catalog endpoint for service '{}', filters {:?}",
            service_type, real_filters
        );
        let token = self.cached_token(client).await?;
        real_filters.find_in_catalog(token.catalog(), &service_type)
    }

    /// Add a scope to the authentication.
    pub fn set_scope(&mut self, scope: Scope) {
        self.body.auth.scope = Some(match scope {
            Scope::Project { project, domain } => {
                protocol::Scope::Project(protocol::Project { project, domain })
            }
        });
        self.update_cache_key();
    }

    /// Use a different token cache.
    #[inline]
    pub fn set_token_cache(&mut self, token_cache: Arc<TokenCache<AuthToken>>) {
        self.token_cache = token_cache;
    }

    /// User name or ID.
    #[inline]
    pub fn user(&self) -> Option<&IdOrName> {
        match self.body.auth.identity {
            protocol::Identity::Password(ref pw) => Some(&pw.user),
            _ => None,
        }
    }

    /// Project name or ID (if project scoped).
    #[inline]
    pub fn project(&self) -> Option<&IdOrName> {
        match self.body.auth.scope {
            Some(protocol::Scope::Project(ref prj)) => Some(&prj.project),
            _ => None,
        }
    }

    /// Refresh the token (if needed or forced).
    pub async fn refresh(&self, client: &Client, force: bool) -> Result<AuthToken, Error> {
        let fetch = move || async move { self.fetch_token(client).await.map(Some) };
        let token = if force {
            self.token_cache.force_refresh(&self.cache_key, fetch).await?
        } else {
            self.token_cache.get_or_refresh(&self.cache_key, fetch).await?
        };
        token.ok_or_else(|| {
            Error::new(
                ErrorKind::AuthenticationFailed,
                "No token was received from the Identity service",
            )
        })
    }

    /// Add the authentication token to a request.
    pub async fn authenticate(
        &self,
        client: &Client,
        request: RequestBuilder,
    ) -> Result<RequestBuilder, Error> {
        let token = self.cached_token(client).await?;
        Ok(request.header("x-auth-token", token.value()))
    }

    #[cfg(test)]
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    async fn fetch_token(&self, client: &Client) -> Result<AuthToken, Error> {
        debug!("Requesting a new token from {}", self.token_endpoint);
        let resp = client
            .post(&self.token_endpoint)
            .json(&self.body)
            .send()
            .await?;
        token_from_response(check(resp).await?).await
    }

    fn update_cache_key(&mut self) {
        let mut hasher = DefaultHasher::new();
        self.body.hash(&mut hasher);
        self.cache_key = format!("{}#{:x}", self.token_endpoint, hasher.finish());
    }
}

async fn token_from_response(resp: Response) -> Result<AuthToken, Error> {
    let value = match resp.headers().get("x-subject-token") {
        Some(hdr) => match hdr.to_str() {
            Ok(s) => Ok(s.to_string()),
            Err(e) => {
                error!(
                    "Invalid X-Subject-Token {:?} received from {}: {}",
                    hdr,
                    resp.url(),
                    e
                );
                Err(Error::new(
                    ErrorKind::InvalidResponse,
                    INVALID_SUBJECT_HEADER,
                ))
            }
        },
        None => {
            error!("No X-Subject-Token header received from {}", resp.url());
            Err(Error::new(
                ErrorKind::InvalidResponse,
                MISSING_SUBJECT_HEADER,
            ))
        }
    }?;

    let root = resp.json::<protocol::TokenRoot>().await?;
    debug!("Received a token expiring at {}", root.token.expires_at);
    trace!("Received catalog: {:?}", root.token.catalog);
    Ok(AuthToken::new(value, root.token))
}
