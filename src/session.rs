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

//! Session structure definition.

use std::collections::HashMap;

use log::{debug, trace};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use static_assertions::assert_impl_all;
use tokio_util::sync::CancellationToken;

use super::client::{AuthenticatedClient, PaginatedResource, RequestBuilder};
use super::services::ServiceType;
use super::url;
use super::{loading, AuthType, EndpointFilters, Error, InterfaceType};

/// An OpenStack API session.
///
/// The session object serves as a wrapper around an [authentication type](trait.AuthType.html),
/// providing convenient methods to make HTTP requests to services from the catalog and to list
/// paginated resources.
///
/// # Note
///
/// All clones of one session share the same authentication. Tokens are kept in the
/// [token cache](cache/struct.TokenCache.html), so sessions with the same credentials share
/// them as well.
#[derive(Debug, Clone)]
pub struct Session {
    client: AuthenticatedClient,
    endpoint_filters: EndpointFilters,
    endpoint_overrides: HashMap<String, Url>,
}

assert_impl_all!(Session: Send, Sync);

impl Session {
    /// Create a new session with a given authentication plugin.
    ///
    /// The authentication is not contacted until the first request.
    #[inline]
    pub fn new<Auth: AuthType + 'static>(auth_type: Auth) -> Session {
        Session::new_with_client(Client::new(), auth_type)
    }

    /// Create a new session with a given authenticated client.
    pub fn new_with_authenticated_client(client: AuthenticatedClient) -> Session {
        Session {
            client,
            endpoint_filters: EndpointFilters::default(),
            endpoint_overrides: HashMap::new(),
        }
    }

    /// Create a new session with a given authentication plugin and an HTTP client.
    #[inline]
    pub fn new_with_client<Auth: AuthType + 'static>(client: Client, auth_type: Auth) -> Session {
        Session::new_with_authenticated_client(AuthenticatedClient::new(client, auth_type))
    }

    /// Create a `Session` from a `clouds.yaml` configuration file.
    ///
    /// See [openstacksdk
    /// documentation](https://docs.openstack.org/openstacksdk/latest/user/guides/connect_from_config.html)
    /// for detailed information on the format of the configuration file.
    ///
    /// The `cloud_name` argument is a name of the cloud entry to use.
    ///
    /// Supported features are:
    /// 1. Password and token authentication.
    /// 2. Clouds without authentication (`auth_type: none`).
    /// 3. Default interface and region.
    /// 4. Custom TLS CA certificates.
    /// 5. Profiles from `clouds-public.yaml`.
    /// 6. Credentials from `secure.yaml`.
    /// 7. Endpoint overrides.
    #[inline]
    pub fn from_config<S: AsRef<str>>(cloud_name: S) -> Result<Session, Error> {
        loading::from_config(cloud_name)
    }

    /// Create a `Session` from environment variables.
    ///
    /// If `OS_CLOUD` is set, the cloud is loaded from `clouds.yaml`.
    #[inline]
    pub fn from_env() -> Result<Session, Error> {
        loading::from_env()
    }

    /// Get a reference to the authenticated client.
    #[inline]
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Get a reference to the authentication type in use.
    #[inline]
    pub fn auth_type(&self) -> &dyn AuthType {
        self.client.auth_type()
    }

    /// Endpoint filters in use.
    #[inline]
    pub fn endpoint_filters(&self) -> &EndpointFilters {
        &self.endpoint_filters
    }

    /// Modify endpoint filters.
    #[inline]
    pub fn endpoint_filters_mut(&mut self) -> &mut EndpointFilters {
        &mut self.endpoint_filters
    }

    /// Endpoint overrides in use.
    #[inline]
    pub fn endpoint_overrides(&self) -> &HashMap<String, Url> {
        &self.endpoint_overrides
    }

    /// Set an endpoint override for the service type.
    ///
    /// The catalog is not used for this service afterwards.
    #[inline]
    pub fn set_endpoint_override<S: Into<String>>(&mut self, service_type: S, url: Url) {
        let _ = self.endpoint_overrides.insert(service_type.into(), url);
    }

    /// Update the authentication.
    ///
    /// # Warning
    ///
    /// Authentication will also be updated for clones of this `Session`, since they share the same
    /// authentication object.
    #[inline]
    pub async fn refresh(&self) -> Result<(), Error> {
        self.client.refresh().await
    }

    /// Set a new authentication for this `Session`.
    ///
    /// It does not affect clones of this `Session`.
    #[inline]
    pub fn set_auth_type<Auth: AuthType + 'static>(&mut self, auth_type: Auth) {
        self.client.set_auth_type(auth_type);
    }

    /// Convert this session into one using the given authentication.
    #[inline]
    pub fn with_auth_type<Auth: AuthType + 'static>(mut self, auth_method: Auth) -> Session {
        self.set_auth_type(auth_method);
        self
    }

    /// Convert this session into one using the given endpoint filters.
    #[inline]
    pub fn with_endpoint_filters(mut self, endpoint_filters: EndpointFilters) -> Session {
        self.endpoint_filters = endpoint_filters;
        self
    }

    /// Convert this session into one using the given endpoint interface.
    #[inline]
    pub fn with_endpoint_interface(mut self, endpoint_interface: InterfaceType) -> Session {
        self.endpoint_filters.set_interface(endpoint_interface);
        self
    }

    /// Convert this session into one using the given endpoint override.
    #[inline]
    pub fn with_endpoint_override<S: Into<String>>(mut self, service_type: S, url: Url) -> Session {
        self.set_endpoint_override(service_type, url);
        self
    }

    /// Construct an endpoint for the given service from the path.
    ///
    /// You won't need to use this call most of the time, since all request calls can fetch the
    /// endpoint automatically.
    pub async fn get_endpoint<Srv, I>(&self, service: Srv, path: I) -> Result<Url, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let catalog_type = service.catalog_type();
        let endpoint = if let Some(endp) = self.endpoint_overrides.get(catalog_type) {
            trace!("Using override {} for service {}", endp, catalog_type);
            endp.clone()
        } else {
            self.client
                .get_endpoint(catalog_type.to_string(), self.endpoint_filters.clone())
                .await?
        };
        debug!("Using endpoint {} for service {}", endpoint, catalog_type);
        url::extend(endpoint, path)
    }

    /// Make an HTTP request to the given service.
    ///
    /// The `service` argument is an object implementing the
    /// [ServiceType](services/trait.ServiceType.html) trait. Some known service types are available
    /// in the [services](services/index.html) module.
    ///
    /// The `path` argument is a URL path without the service endpoint (e.g. `/servers/1234`).
    ///
    /// The result is a `RequestBuilder` that can be customized further.
    ///
    /// ```rust,no_run
    /// # async fn example() -> Result<(), ossdk::Error> {
    /// use reqwest::Method;
    ///
    /// let session = ossdk::Session::from_env()?;
    /// let response = session
    ///     .request(ossdk::services::COMPUTE, Method::HEAD, &["servers", "1234"])
    ///     .await?
    ///     .send()
    ///     .await?;
    /// println!("Response: {:?}", response);
    /// # Ok(()) }
    /// # #[tokio::main]
    /// # async fn main() { example().await.unwrap(); }
    /// ```
    ///
    /// This is the most generic call to make a request. You may prefer to use more specific `get`,
    /// `post`, `put` or `delete` calls instead.
    pub async fn request<Srv, I>(
        &self,
        service: Srv,
        method: Method,
        path: I,
    ) -> Result<RequestBuilder, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let url = self.get_endpoint(service, path).await?;
        trace!("Starting HTTP {} request to {}", method, url);
        Ok(self.client.request(method, url))
    }

    /// Start a GET request.
    #[inline]
    pub async fn get<Srv, I>(&self, service: Srv, path: I) -> Result<RequestBuilder, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.request(service, Method::GET, path).await
    }

    /// Fetch a JSON using the GET request.
    ///
    /// ```rust,no_run
    /// # async fn example() -> Result<(), ossdk::Error> {
    /// use serde::Deserialize;
    ///
    /// #[derive(Debug, Deserialize)]
    /// pub struct Server {
    ///     pub id: String,
    ///     pub name: String,
    /// }
    ///
    /// #[derive(Debug, Deserialize)]
    /// pub struct ServersRoot {
    ///     pub servers: Vec<Server>,
    /// }
    ///
    /// let session = ossdk::Session::from_env()?;
    ///
    /// let servers: ServersRoot = session
    ///     .get_json(ossdk::services::COMPUTE, &["servers"])
    ///     .await?;
    /// for srv in servers.servers {
    ///     println!("ID = {}, Name = {}", srv.id, srv.name);
    /// }
    /// # Ok(()) }
    /// # #[tokio::main]
    /// # async fn main() { example().await.unwrap(); }
    /// ```
    #[inline]
    pub async fn get_json<Srv, I, T>(&self, service: Srv, path: I) -> Result<T, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
        T: DeserializeOwned + Send,
    {
        self.get(service, path).await?.fetch_json().await
    }

    /// List all resources from all pages.
    ///
    /// Pages of at most `limit` items are requested one by one until an empty page or the last
    /// page. See [collect_all_pages](pagination/fn.collect_all_pages.html) for the details.
    pub async fn list_all<T, Srv, I>(
        &self,
        service: Srv,
        path: I,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: PaginatedResource,
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.get(service, path).await?.fetch_all(limit, cancel).await
    }

    /// Start a POST request.
    #[inline]
    pub async fn post<Srv, I>(&self, service: Srv, path: I) -> Result<RequestBuilder, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.request(service, Method::POST, path).await
    }

    /// Start a PUT request.
    #[inline]
    pub async fn put<Srv, I>(&self, service: Srv, path: I) -> Result<RequestBuilder, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.request(service, Method::PUT, path).await
    }

    /// Start a DELETE request.
    #[inline]
    pub async fn delete<Srv, I>(&self, service: Srv, path: I) -> Result<RequestBuilder, Error>
    where
        Srv: ServiceType + Send,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.request(service, Method::DELETE, path).await
    }
}
