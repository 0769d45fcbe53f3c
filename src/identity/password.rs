// Copyright 2019-2020 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Password authentication.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, IntoUrl, RequestBuilder, Url};

use super::internal::Internal;
use super::protocol;
use super::{AuthToken, Identity, Scope};
use crate::cache::TokenCache;
use crate::common::IdOrName;
use crate::{AuthType, EndpointFilters, Error, InterfaceType};

/// Password authentication using Identity API V3.
///
/// Besides the `auth_url` of the Identity service, a user name with its domain and a password are
/// required. Most clouds also expect a project scope, added with
/// [with_project_scope](#method.with_project_scope):
///
/// ```rust,no_run
/// use ossdk::common::IdOrName;
/// let auth = ossdk::identity::Password::new(
///     "https://cloud.local/identity",
///     "admin",
///     "pa$$w0rd",
///     "Default"
/// )
/// .expect("Invalid auth_url")
/// .with_project_scope(IdOrName::from_name("project1"), IdOrName::from_id("default"))
/// .with_region("US-East");
///
/// let session = ossdk::Session::new(auth);
/// ```
///
/// The authentication token is kept in the process-wide
/// [TokenCache](../cache/struct.TokenCache.html) while it's still valid or until
/// [refresh](../trait.AuthType.html#tymethod.refresh) is called. Clones of a `Password` and
/// other objects with the same credentials and scope share the token.
#[derive(Debug, Clone)]
pub struct Password {
    inner: Internal,
}

impl Identity for Password {
    fn auth_url(&self) -> &Url {
        self.inner.auth_url()
    }
}

impl Password {
    /// Create a password authentication.
    pub fn new<U, S1, S2, S3>(
        auth_url: U,
        user_name: S1,
        password: S2,
        user_domain_name: S3,
    ) -> Result<Password, Error>
    where
        U: IntoUrl,
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let auth_url = auth_url.into_url()?;

        let pw = protocol::UserAndPassword {
            user: IdOrName::Name(user_name.into()),
            password: password.into(),
            domain: Some(IdOrName::Name(user_domain_name.into())),
        };
        let body = protocol::AuthRoot {
            auth: protocol::Auth {
                identity: protocol::Identity::Password(pw),
                scope: None,
            },
        };
        Ok(Password {
            inner: Internal::new(auth_url, body)?,
        })
    }

    /// Endpoint filters.
    #[inline]
    pub fn endpoint_filters(&self) -> &EndpointFilters {
        &self.inner.filters
    }

    /// Set the default endpoint interface to use.
    #[inline]
    pub fn set_default_endpoint_interface(&mut self, endpoint_interface: InterfaceType) {
        self.inner.filters.interface = Some(endpoint_interface);
    }

    /// Scope authentication to the given project.
    ///
    /// A convenience wrapper around `set_scope`.
    #[inline]
    pub fn set_project_scope(&mut self, project: IdOrName, domain: impl Into<Option<IdOrName>>) {
        self.set_scope(Scope::Project {
            project,
            domain: domain.into(),
        });
    }

    /// Add a scope to the authentication.
    ///
    /// This is required in the most cases.
    #[inline]
    pub fn set_scope(&mut self, scope: Scope) {
        self.inner.set_scope(scope);
    }

    /// Convert this authentication into one using the given endpoint interface.
    #[inline]
    pub fn with_default_endpoint_interface(mut self, endpoint_interface: InterfaceType) -> Self {
        self.set_default_endpoint_interface(endpoint_interface);
        self
    }

    /// Scope authentication to the given project.
    ///
    /// A convenience wrapper around `with_scope`.
    #[inline]
    pub fn with_project_scope(
        mut self,
        project: IdOrName,
        domain: impl Into<Option<IdOrName>>,
    ) -> Password {
        self.set_project_scope(project, domain);
        self
    }

    /// Set a region for this authentication method.
    #[inline]
    pub fn with_region<S>(mut self, region: S) -> Self
    where
        S: Into<String>,
    {
        self.inner.filters.region = Some(region.into());
        self
    }

    /// Add a scope to the authentication.
    #[inline]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.set_scope(scope);
        self
    }

    /// Keep tokens in the given cache instead of the process-wide one.
    #[inline]
    pub fn with_token_cache(mut self, token_cache: Arc<TokenCache<AuthToken>>) -> Self {
        self.inner.set_token_cache(token_cache);
        self
    }

    /// User name or ID.
    #[inline]
    pub fn user(&self) -> Option<&IdOrName> {
        self.inner.user()
    }

    /// Project name or ID (if project scoped).
    #[inline]
    pub fn project(&self) -> Option<&IdOrName> {
        self.inner.project()
    }
}

#[async_trait]
impl AuthType for Password {
    /// Authenticate a request.
    async fn authenticate(
        &self,
        client: &Client,
        request: RequestBuilder,
    ) -> Result<RequestBuilder, Error> {
        self.inner.authenticate(client, request).await
    }

    /// Get a URL for the requested service.
    async fn get_endpoint(
        &self,
        client: &Client,
        service_type: String,
        filters: EndpointFilters,
    ) -> Result<Url, Error> {
        self.inner.get_endpoint(client, service_type, filters).await
    }

    /// Refresh the cached token and service catalog.
    async fn refresh(&self, client: &Client) -> Result<(), Error> {
        let _ = self.inner.refresh(client, true).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use reqwest::Client;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::Password;
    use crate::cache::TokenCache;
    use crate::identity::{AuthToken, IdOrName, Identity};
    use crate::{AuthType, InterfaceType};

    fn issue_token(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(201)
            .insert_header("x-subject-token", value)
            .set_body_json(json!({"token": {"expires_at": "2099-01-01T00:00:00Z"}}))
    }

    fn password(server: &MockServer, cache: &Arc<TokenCache<AuthToken>>) -> Password {
        Password::new(
            format!("{}/identity", server.uri()).as_str(),
            "admin",
            "pa$$w0rd",
            "Default",
        )
        .unwrap()
        .with_token_cache(Arc::clone(cache))
    }

    async fn sent_token(id: &Password, client: &Client) -> String {
        let request = id
            .authenticate(client, client.get("http://compute.local/servers"))
            .await
            .unwrap()
            .build()
            .unwrap();
        request.headers()["x-auth-token"]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_same_credentials_share_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/v3/auth/tokens"))
            .and(body_partial_json(json!({
                "auth": {"identity": {"password": {"user": {"name": "admin"}}}}
            })))
            .respond_with(issue_token("shared"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let client = Client::new();
        let first = password(&server, &cache);
        let second = password(&server, &cache);
        assert_eq!(sent_token(&first, &client).await, "shared");
        assert_eq!(sent_token(&first.clone(), &client).await, "shared");
        assert_eq!(sent_token(&second, &client).await, "shared");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_scope_has_own_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/v3/auth/tokens"))
            .respond_with(issue_token("token"))
            .expect(2)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let client = Client::new();
        let unscoped = password(&server, &cache);
        let scoped = password(&server, &cache)
            .with_project_scope(IdOrName::from_name("demo"), IdOrName::from_id("default"));
        let _ = sent_token(&unscoped, &client).await;
        let _ = sent_token(&scoped, &client).await;
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_shared_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/v3/auth/tokens"))
            .respond_with(issue_token("token"))
            .expect(2)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new());
        let client = Client::new();
        let id = password(&server, &cache);
        let _ = sent_token(&id, &client).await;
        id.refresh(&client).await.unwrap();
        // The refreshed token is reused.
        let _ = sent_token(&id.clone(), &client).await;
    }

    #[test]
    fn test_builders() {
        let id = Password::new(
            "http://127.0.0.1:8080/identity/v3/",
            "user",
            "pa$$w0rd",
            "example.com",
        )
        .unwrap()
        .with_project_scope(IdOrName::from_name("demo"), None)
        .with_default_endpoint_interface(InterfaceType::Internal)
        .with_region("RegionTwo");
        assert_eq!(id.auth_url().as_str(), "http://127.0.0.1:8080/identity/v3");
        assert_eq!(
            id.inner.token_endpoint(),
            "http://127.0.0.1:8080/identity/v3/auth/tokens"
        );
        assert_eq!(id.user(), Some(&IdOrName::from_name("user")));
        assert_eq!(id.project(), Some(&IdOrName::from_name("demo")));
        assert_eq!(
            id.endpoint_filters().interface,
            Some(InterfaceType::Internal)
        );
        assert_eq!(id.endpoint_filters().region.as_deref(), Some("RegionTwo"));
    }

    #[test]
    fn test_invalid_auth_url() {
        assert!(Password::new("http://127.0.0.1 8080/", "admin", "pa$$w0rd", "Default").is_err());
    }
}
