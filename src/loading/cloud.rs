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

//! Cloud configuration: the common ground of `clouds.yaml` and environment variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use reqwest::Url;
use serde::{Deserialize, Deserializer};

use crate::client::AuthenticatedClient;
use crate::common::IdOrName;
use crate::identity::{Password, Scope, Token};
use crate::{AuthType, Error, ErrorKind, InterfaceType, NoAuth, Session};

const ENDPOINT_OVERRIDE_SUFFIX: &str = "_endpoint_override";

// YAML happily parses IDs like 1234 or passwords like 12345678 as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
}

fn scalar_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|value| match value {
        Scalar::String(s) => s,
        Scalar::Integer(i) => i.to_string(),
        Scalar::Unsigned(u) => u.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Auth {
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) auth_url: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) endpoint: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) password: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) project_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) project_name: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) project_domain_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) project_domain_name: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) token: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) username: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub(crate) user_domain_name: Option<String>,
}

/// Cloud configuration.
///
/// Can be loaded from a `clouds.yaml` entry or from `OS_*` environment variables and then
/// turned into a [Session](../struct.Session.html).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub(crate) auth: Option<Auth>,
    #[serde(default)]
    pub(crate) auth_type: Option<String>,
    #[serde(default)]
    pub(crate) cacert: Option<String>,
    #[serde(default)]
    pub(crate) interface: Option<String>,
    #[serde(default)]
    pub(crate) region_name: Option<String>,
    #[serde(flatten)]
    pub(crate) options: HashMap<String, serde_yaml::Value>,
}

#[inline]
fn require(value: Option<String>, message: &str) -> Result<String, Error> {
    value.ok_or_else(|| Error::new(ErrorKind::InvalidConfig, message))
}

impl Auth {
    fn scope(&mut self) -> Option<Scope> {
        let project = self
            .project_id
            .take()
            .map(IdOrName::Id)
            .or_else(|| self.project_name.take().map(IdOrName::Name))?;
        let domain = self
            .project_domain_id
            .take()
            .map(IdOrName::Id)
            .or_else(|| self.project_domain_name.take().map(IdOrName::Name));
        // Projects are only unique by name within a domain.
        let domain = match (&project, domain) {
            (IdOrName::Name(_), None) => Some(IdOrName::from_name("Default")),
            (_, domain) => domain,
        };
        Some(Scope::Project { project, domain })
    }

    fn create_password_auth(mut self) -> Result<Password, Error> {
        let scope = self.scope();
        let auth_url = require(
            self.auth_url,
            "Password authentication requires an authentication URL",
        )?;
        let username = require(self.username, "Password authentication requires a username")?;
        let password = require(self.password, "Password authentication requires a password")?;
        let user_domain = self
            .user_domain_name
            .unwrap_or_else(|| String::from("Default"));

        let mut id = Password::new(auth_url.as_str(), username, password, user_domain)?;
        if let Some(scope) = scope {
            id.set_scope(scope);
        }
        Ok(id)
    }

    fn create_token_auth(mut self) -> Result<Token, Error> {
        let scope = self.scope();
        let auth_url = require(
            self.auth_url,
            "Token authentication requires an authentication URL",
        )?;
        let token = require(self.token, "Token authentication requires a token")?;

        let mut id = Token::new(auth_url.as_str(), token)?;
        if let Some(scope) = scope {
            id.set_scope(scope);
        }
        Ok(id)
    }

    fn create_auth(self, auth_type: Option<&str>) -> Result<Arc<dyn AuthType>, Error> {
        let auth_type = auth_type.unwrap_or(if self.token.is_some() {
            "v3token"
        } else {
            "password"
        });
        debug!("Creating {} authentication", auth_type);

        let auth: Arc<dyn AuthType> = match auth_type {
            "password" => Arc::new(self.create_password_auth()?),
            "v3token" | "token" => Arc::new(self.create_token_auth()?),
            "none" => match self.endpoint {
                Some(endpoint) => Arc::new(NoAuth::new(endpoint)?),
                None => Arc::new(NoAuth::new_without_endpoint()),
            },
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidConfig,
                    format!("Unsupported authentication type: {}", other),
                ))
            }
        };
        Ok(auth)
    }
}

impl CloudConfig {
    /// Load a cloud config from `clouds.yaml`, `clouds-public.yaml` and `secure.yaml`.
    #[inline]
    pub fn from_config<S: AsRef<str>>(cloud_name: S) -> Result<CloudConfig, Error> {
        super::config::cloud_from_config(cloud_name.as_ref())
    }

    /// Load a cloud config from `OS_*` environment variables.
    #[inline]
    pub fn from_env() -> Result<CloudConfig, Error> {
        super::env::cloud_from_env()
    }

    fn endpoint_overrides(&self) -> Result<HashMap<String, Url>, Error> {
        let mut result = HashMap::new();
        for (key, value) in &self.options {
            let service_type = match key.strip_suffix(ENDPOINT_OVERRIDE_SUFFIX) {
                Some(service_type) => service_type,
                None => continue,
            };
            let value = value.as_str().ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidConfig,
                    format!("{} must be a string, got {:?}", key, value),
                )
            })?;
            let url = Url::parse(value).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidConfig,
                    format!("Invalid {} `{}`: {}", key, value, e),
                )
            })?;
            // Service types use dashes, configuration keys use underscores
            let _ = result.insert(service_type.replace('_', "-"), url);
        }
        Ok(result)
    }

    fn create_auth(&self) -> Result<Arc<dyn AuthType>, Error> {
        match self.auth {
            Some(ref auth) => auth.clone().create_auth(self.auth_type.as_deref()),
            None if self.auth_type.as_deref() == Some("none") => {
                Ok(Arc::new(NoAuth::new_without_endpoint()))
            }
            None => Err(Error::new(
                ErrorKind::InvalidConfig,
                "Credentials can be missing only for none authentication",
            )),
        }
    }

    /// Create a session from this configuration.
    ///
    /// No network requests are made.
    pub fn create_session(self) -> Result<Session, Error> {
        let auth = self.create_auth()?;
        let client = AuthenticatedClient::new_internal(super::get_client(self.cacert.as_deref())?, auth);

        let mut result = Session::new_with_authenticated_client(client);
        for (service_type, url) in self.endpoint_overrides()? {
            result.set_endpoint_override(service_type, url);
        }

        let filters = result.endpoint_filters_mut();
        if let Some(ref interface) = self.interface {
            filters.set_interface(InterfaceType::from_str(interface)?);
        }
        if let Some(region) = self.region_name {
            filters.set_region(region);
        }
        Ok(result)
    }
}
