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

//! Asynchronous OpenStack SDK core: sessions, paginated listings and credential caching.
//!
//! The central pieces are:
//!
//! * [Session](struct.Session.html) to make authenticated requests to services from the catalog.
//! * [collect_all_pages](pagination/fn.collect_all_pages.html) to walk paginated collections
//!   (see also [Session::list_all](struct.Session.html#method.list_all)).
//! * [TokenCache](cache/struct.TokenCache.html) to share expiring credentials between clients.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), ossdk::Error> {
//! use serde::Deserialize;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Deserialize)]
//! pub struct Server {
//!     pub id: String,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! pub struct ServersRoot {
//!     pub servers: Vec<Server>,
//! }
//!
//! impl From<ServersRoot> for Vec<Server> {
//!     fn from(value: ServersRoot) -> Vec<Server> {
//!         value.servers
//!     }
//! }
//!
//! impl ossdk::client::PaginatedResource for Server {
//!     type Id = String;
//!     type Root = ServersRoot;
//!     fn resource_id(&self) -> Self::Id {
//!         self.id.clone()
//!     }
//! }
//!
//! let session = ossdk::Session::from_env()?;
//! let servers: Vec<Server> = session
//!     .list_all(ossdk::services::COMPUTE, &["servers"], Some(100), &CancellationToken::new())
//!     .await?;
//! println!("{} servers", servers.len());
//! # Ok(()) }
//! # #[tokio::main]
//! # async fn main() { example().await.unwrap(); }
//! ```

#![crate_name = "ossdk"]
#![crate_type = "lib"]
#![doc(html_root_url = "https://docs.rs/ossdk/0.1.0")]
// NOTE: we do not use generic deny(warnings) to avoid breakages with new
// versions of the compiler. Add more warnings here as you discover them.
// Taken from https://github.com/rust-unofficial/patterns/
#![deny(
    dead_code,
    improper_ctypes,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    trivial_casts,
    trivial_numeric_casts,
    unconditional_recursion,
    unsafe_code,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_doc_comments,
    unused_import_braces,
    unused_parens,
    unused_qualifications,
    unused_results,
    while_true
)]
#![allow(
    clippy::new_ret_no_self,
    clippy::should_implement_trait,
    clippy::wrong_self_convention
)]

mod auth;
pub mod cache;
pub mod client;
pub mod common;
mod endpointfilters;
mod error;
pub mod identity;
mod loading;
pub mod pagination;
pub mod services;
mod session;
mod url;
mod utils;

pub use crate::auth::{AuthType, NoAuth};
pub use crate::cache::{TokenCache, Validity};
pub use crate::endpointfilters::{EndpointFilters, InterfaceType};
pub use crate::error::{Error, ErrorKind};
pub use crate::loading::{from_config, from_env, CloudConfig};
pub use crate::pagination::{collect_all_pages, Page};
pub use crate::session::Session;
