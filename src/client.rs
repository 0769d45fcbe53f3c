// Copyright 2021 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Low-level authenticated client and paginated resources.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "stream")]
use futures::{pin_mut, Stream, TryStreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Error as HttpError;
use log::{error, trace};
use reqwest::{Body, Client, Method, Request, RequestBuilder as HttpRequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use static_assertions::{assert_eq_size, assert_impl_all};
use tokio_util::sync::CancellationToken;

use super::pagination::{collect_all_pages, Page};
use super::{AuthType, EndpointFilters, Error, ErrorKind};

/// A properly typed constant for use with root paths.
///
/// The problem with just using `None` is that the exact type of `Option` is not known.
///
/// An example:
///
/// ```rust,no_run
/// # async fn example() -> Result<(), ossdk::Error> {
/// let session = ossdk::Session::from_env()?;
/// let response = session
///     .get(ossdk::services::OBJECT_STORAGE, ossdk::client::NO_PATH)
///     .await?
///     .send()
///     .await?;
/// # Ok(()) }
/// # #[tokio::main]
/// # async fn main() { example().await.unwrap(); }
/// ```
pub const NO_PATH: Option<&'static str> = None;

/// Authenticated HTTP client.
///
/// Uses `Arc` internally and should be reused when possible by cloning it.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    client: Client,
    auth: Arc<dyn AuthType>,
}

assert_eq_size!(AuthenticatedClient, Option<AuthenticatedClient>);
assert_impl_all!(AuthenticatedClient: Send, Sync);

impl AuthenticatedClient {
    /// Create a new authenticated client.
    ///
    /// No requests are made until the client is used: the authentication is fetched lazily.
    #[inline]
    pub fn new<Auth: AuthType + 'static>(client: Client, auth_type: Auth) -> AuthenticatedClient {
        AuthenticatedClient::new_internal(client, Arc::new(auth_type))
    }

    #[inline]
    pub(crate) fn new_internal(client: Client, auth: Arc<dyn AuthType>) -> AuthenticatedClient {
        AuthenticatedClient { client, auth }
    }

    /// Get a reference to the authentication type in use.
    #[inline]
    pub fn auth_type(&self) -> &dyn AuthType {
        self.auth.as_ref()
    }

    #[inline]
    async fn authenticate(&self, request: HttpRequestBuilder) -> Result<Request, Error> {
        self.auth
            .authenticate(&self.client, request)
            .await?
            .build()
            .map_err(Error::from)
    }

    /// Get a URL for the requested service.
    #[inline]
    pub async fn get_endpoint(
        &self,
        service_type: String,
        filters: EndpointFilters,
    ) -> Result<Url, Error> {
        self.auth
            .get_endpoint(&self.client, service_type, filters)
            .await
    }

    /// Get a reference to the inner (non-authenticated) client.
    #[inline]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Update the authentication.
    ///
    /// # Warning
    ///
    /// Authentication will also be updated for clones of this client, since they share the same
    /// authentication object.
    #[inline]
    pub async fn refresh(&self) -> Result<(), Error> {
        self.auth.refresh(&self.client).await
    }

    /// Set a new authentication for this client.
    #[inline]
    pub fn set_auth_type<Auth: AuthType + 'static>(&mut self, auth_type: Auth) {
        self.auth = Arc::new(auth_type);
    }

    /// Start an authenticated request.
    #[inline]
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        RequestBuilder {
            inner: self.client.request(method, url),
            client: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_noauth(endpoint: &str) -> AuthenticatedClient {
        use crate::NoAuth;
        AuthenticatedClient::new(Client::new(), NoAuth::new(endpoint).unwrap())
    }
}

impl From<AuthenticatedClient> for Client {
    fn from(value: AuthenticatedClient) -> Client {
        value.client
    }
}

/// A request builder with error handling.
#[derive(Debug)]
#[must_use = "preparing a request is not enough to run it"]
pub struct RequestBuilder {
    inner: HttpRequestBuilder,
    client: AuthenticatedClient,
}

#[derive(Debug, Deserialize)]
struct Message {
    message: Option<String>,
    faultstring: Option<String>,
    title: Option<String>,
    // Ironic legacy format: JSON inside JSON (sigh)
    error_message: Option<String>,
}

impl Message {
    fn convert(self, recursive: bool) -> Option<String> {
        if let Some(value) = self.message.or(self.faultstring).or(self.title) {
            Some(value)
        } else if recursive {
            self.error_message.and_then(|json| {
                serde_json::from_str::<Message>(&json)
                    .ok()
                    .and_then(|msg| msg.convert(false))
            })
        } else {
            None
        }
    }
}

impl From<Message> for Option<String> {
    fn from(value: Message) -> Option<String> {
        value.convert(true)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorResponse {
    Map(HashMap<String, Message>),
    Message(Message),
}

fn extract_message(text: String) -> String {
    serde_json::from_str::<ErrorResponse>(&text)
        .ok()
        .and_then(|body| match body {
            ErrorResponse::Map(map) => map.into_iter().next().and_then(|(_k, v)| v.into()),
            ErrorResponse::Message(msg) => msg.into(),
        })
        .unwrap_or(text)
}

/// Check for OpenStack errors in the response.
pub async fn check(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let message = extract_message(response.text().await?);
        trace!("HTTP request returned {}; error: {}", status, message);
        Err(Error::new(status.into(), message).with_status(status))
    } else {
        trace!(
            "HTTP request to {} returned {}",
            response.url(),
            response.status()
        );
        Ok(response)
    }
}

impl RequestBuilder {
    /// Add a body to the request.
    pub fn body<T: Into<Body>>(self, body: T) -> RequestBuilder {
        RequestBuilder {
            inner: self.inner.body(body),
            ..self
        }
    }

    /// Add a header to the request.
    pub fn header<K, V>(self, key: K, value: V) -> RequestBuilder
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<HttpError>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<HttpError>,
    {
        RequestBuilder {
            inner: self.inner.header(key, value),
            ..self
        }
    }

    /// Add headers to a request.
    pub fn headers(self, headers: HeaderMap) -> RequestBuilder {
        RequestBuilder {
            inner: self.inner.headers(headers),
            ..self
        }
    }

    /// Add a JSON body to the request.
    pub fn json<T: Serialize + ?Sized>(self, json: &T) -> RequestBuilder {
        RequestBuilder {
            inner: self.inner.json(json),
            ..self
        }
    }

    /// Send a query with the request.
    pub fn query<T: Serialize + ?Sized>(self, query: &T) -> RequestBuilder {
        RequestBuilder {
            inner: self.inner.query(query),
            ..self
        }
    }

    /// Override the timeout for the request.
    pub fn timeout(self, timeout: Duration) -> RequestBuilder {
        RequestBuilder {
            inner: self.inner.timeout(timeout),
            ..self
        }
    }

    /// Send the request and receive JSON in response.
    pub async fn fetch_json<T>(self) -> Result<T, Error>
    where
        T: DeserializeOwned + Send,
    {
        self.send().await?.json::<T>().await.map_err(Error::from)
    }

    /// Send the request and check for errors.
    pub async fn send(self) -> Result<Response, Error> {
        check(self.send_unchecked().await?).await
    }

    /// Send the request without checking for HTTP and OpenStack errors.
    pub async fn send_unchecked(self) -> Result<Response, Error> {
        let req = self.client.authenticate(self.inner).await?;
        trace!("Sending HTTP {} request to {}", req.method(), req.url());
        self.client.client.execute(req).await.map_err(Error::from)
    }

    /// Attempt to clone this request builder.
    ///
    /// Fails for requests with a streaming body.
    pub fn try_clone(&self) -> Option<RequestBuilder> {
        self.inner.try_clone().map(|inner| RequestBuilder {
            inner,
            client: self.client.clone(),
        })
    }

    /// Send the request and receive the first page of a paginated resource.
    ///
    /// `limit` and `marker` are added to the query. For resources using `Pagination::Marker`,
    /// the following pages repeat this request with a new marker. For `Pagination::Link`, they
    /// follow the links returned by the server.
    ///
    /// Fails with `InvalidInput` if the request has a streaming body.
    pub async fn fetch_page<T>(
        self,
        limit: Option<usize>,
        marker: Option<T::Id>,
    ) -> Result<ResourcePage<T>, Error>
    where
        T: PaginatedResource,
    {
        let template = self.template()?;
        let response = self
            .query(&Query {
                limit,
                marker: marker.as_ref(),
            })
            .send()
            .await?;
        ResourcePage::from_response(template, limit, response).await
    }

    /// Send the request and collect all items from all pages.
    ///
    /// See [collect_all_pages](../pagination/fn.collect_all_pages.html) for the details.
    pub async fn fetch_all<T>(
        self,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: PaginatedResource,
    {
        let first = self.fetch_page::<T>(limit, None).await?;
        collect_all_pages(Some(first), cancel).await
    }

    /// Send the request and receive JSON in response with pagination.
    ///
    /// Note that the actual requests will happen only on iteration over the results.
    ///
    /// ```rust,no_run
    /// # async fn example() -> Result<(), ossdk::Error> {
    /// use futures::pin_mut;
    /// use futures::stream::TryStreamExt;
    /// use serde::Deserialize;
    /// use tokio_util::sync::CancellationToken;
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
    /// impl ossdk::client::PaginatedResource for Server {
    ///     type Id = String;
    ///     type Root = ServersRoot;
    ///     fn resource_id(&self) -> Self::Id {
    ///         self.id.clone()
    ///     }
    /// }
    ///
    /// impl From<ServersRoot> for Vec<Server> {
    ///     fn from(value: ServersRoot) -> Vec<Server> {
    ///         value.servers
    ///     }
    /// }
    ///
    /// let session = ossdk::Session::from_env()?;
    ///
    /// let servers = session
    ///     .get(ossdk::services::COMPUTE, &["servers"])
    ///     .await?
    ///     .fetch_paginated::<Server>(Some(100), CancellationToken::new());
    ///
    /// pin_mut!(servers);
    /// while let Some(srv) = servers.try_next().await? {
    ///     println!("ID = {}, Name = {}", srv.id, srv.name);
    /// }
    /// # Ok(()) }
    /// # #[tokio::main]
    /// # async fn main() { example().await.unwrap(); }
    /// ```
    #[cfg(feature = "stream")]
    pub fn fetch_paginated<T>(
        self,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<T, Error>>
    where
        T: PaginatedResource,
    {
        async_stream::try_stream! {
            let first = self.fetch_page::<T>(limit, None).await?;
            let items = crate::pagination::into_stream(first, cancel);
            pin_mut!(items);
            while let Some(item) = items.try_next().await? {
                yield item;
            }
        }
    }

    fn template(&self) -> Result<RequestBuilder, Error> {
        self.try_clone().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                "Paginated requests cannot have a streaming body",
            )
        })
    }
}

/// How a resource listing links its pages together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// The ID of the last item is passed as a `marker` to get the next page.
    Marker,
    /// Every page carries a link to the next one.
    Link,
}

/// A single resource that can be listed in pages.
///
/// An example for the Compute servers:
///
/// ```rust
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
/// // This implementatin defines the relationship between the root resource and its items.
/// impl ossdk::client::PaginatedResource for Server {
///     type Id = String;
///     type Root = ServersRoot;
///     fn resource_id(&self) -> Self::Id {
///         self.id.clone()
///     }
/// }
///
/// // This is another required part of the pagination contract.
/// impl From<ServersRoot> for Vec<Server> {
///     fn from(value: ServersRoot) -> Vec<Server> {
///         value.servers
///     }
/// }
/// ```
pub trait PaginatedResource: fmt::Debug + Send + Sync + Sized {
    /// Type of an ID.
    type Id: fmt::Debug + Serialize + Send + Sync;

    /// Root type of the listing.
    type Root: DeserializeOwned + Into<Vec<Self>> + Send;

    /// How the pages are linked.
    const PAGINATION: Pagination = Pagination::Marker;

    /// Retrieve a copy of the ID.
    fn resource_id(&self) -> Self::Id;

    /// Link to the next page, if any.
    ///
    /// Only used with `Pagination::Link`. Relative links are resolved against the URL of the
    /// current page.
    fn next_link(_root: &Self::Root) -> Option<String> {
        None
    }
}

#[derive(Serialize)]
struct Query<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<T>,
}

enum NextPage<I> {
    Marker(Option<I>),
    Link(Option<Url>),
}

/// A page of resources fetched over HTTP.
///
/// Created by [RequestBuilder::fetch_page](struct.RequestBuilder.html#method.fetch_page).
pub struct ResourcePage<T: PaginatedResource> {
    items: Vec<T>,
    next: NextPage<T::Id>,
    template: RequestBuilder,
    url: Url,
    limit: Option<usize>,
}

impl<T: PaginatedResource> fmt::Debug for ResourcePage<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut dbg = f.debug_struct("ResourcePage");
        let _ = dbg.field("url", &self.url.as_str()).field("items", &self.items);
        let _ = match self.next {
            NextPage::Marker(ref marker) => dbg.field("marker", marker),
            NextPage::Link(ref link) => dbg.field("next", &link.as_ref().map(Url::as_str)),
        };
        dbg.finish()
    }
}

impl<T: PaginatedResource> ResourcePage<T> {
    async fn from_response(
        template: RequestBuilder,
        limit: Option<usize>,
        response: Response,
    ) -> Result<ResourcePage<T>, Error> {
        let url = response.url().clone();
        let root = response.json::<T::Root>().await?;
        let link = match T::PAGINATION {
            Pagination::Marker => None,
            Pagination::Link => T::next_link(&root),
        };

        let items: Vec<T> = root.into();
        let next = match T::PAGINATION {
            Pagination::Marker => NextPage::Marker(items.last().map(T::resource_id)),
            Pagination::Link => NextPage::Link(match link {
                Some(link) => Some(crate::url::resolve_link(&url, &link).map_err(|e| {
                    error!("Invalid next page link {} received from {}: {}", link, url, e);
                    Error::new(
                        ErrorKind::InvalidResponse,
                        format!("Invalid next page link {}: {}", link, e),
                    )
                })?),
                None => None,
            }),
        };

        trace!("Received a page of {} item(s) from {}", items.len(), url);
        Ok(ResourcePage {
            items,
            next,
            template,
            url,
            limit,
        })
    }

    /// URL this page was received from.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl<T: PaginatedResource> Page for ResourcePage<T> {
    type Item = T;

    fn items(&self) -> &[T] {
        &self.items
    }

    fn take_items(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    fn can_have_next_page(&self) -> bool {
        match self.next {
            NextPage::Marker(ref marker) => marker.is_some(),
            NextPage::Link(ref link) => link.is_some(),
        }
    }

    async fn fetch_next_page(&self, cancel: &CancellationToken) -> Result<Self, Error> {
        let request = match self.next {
            NextPage::Marker(Some(ref marker)) => self.template.template()?.query(&Query {
                limit: self.limit,
                marker: Some(marker),
            }),
            NextPage::Link(Some(ref link)) => {
                self.template.client.request(Method::GET, link.clone())
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "This is the last page of the collection",
                ))
            }
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::new(ErrorKind::Cancelled, "Page request has been cancelled"));
            }
            response = request.send() => response?,
        };
        ResourcePage::from_response(self.template.template()?, self.limit, response).await
    }
}
