// Copyright 2020 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Endpoint filters for looking up endpoints.

use std::fmt;
use std::str::FromStr;

use log::{debug, error};
use reqwest::Url;

use super::{Error, ErrorKind};
use crate::identity::protocol::{CatalogRecord, Endpoint};

/// Interface type: public, internal or admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterfaceType {
    /// Public interface (used by default).
    #[default]
    Public,
    /// Internal interface.
    Internal,
    /// Administrator interface.
    Admin,
}

/// Endpoint filters for looking up endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct EndpointFilters {
    /// Endpoint interface, public if not set.
    pub interface: Option<InterfaceType>,
    /// Cloud region.
    pub region: Option<String>,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.write_str(match self {
            InterfaceType::Public => "public",
            InterfaceType::Internal => "internal",
            InterfaceType::Admin => "admin",
        })
    }
}

impl FromStr for InterfaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" | "publicURL" => Ok(InterfaceType::Public),
            "internal" | "internalURL" => Ok(InterfaceType::Internal),
            "admin" | "adminURL" => Ok(InterfaceType::Admin),
            other => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Unknown interface type: {}", other),
            )),
        }
    }
}

impl EndpointFilters {
    /// Create filters with an interface and a region.
    ///
    /// Hint: use `default` to create empty filters (and `with_*` methods to populate it).
    pub fn new<S>(interface: InterfaceType, region: S) -> EndpointFilters
    where
        S: Into<String>,
    {
        EndpointFilters {
            interface: Some(interface),
            region: Some(region.into()),
        }
    }

    /// Whether the filters match the provided endpoint.
    pub(crate) fn check(&self, endpoint: &Endpoint) -> bool {
        let interface = self.interface.unwrap_or_default();
        if InterfaceType::from_str(&endpoint.interface).ok() != Some(interface) {
            return false;
        }

        if let Some(ref region) = self.region {
            endpoint.region == *region
        } else {
            true
        }
    }

    /// Set the interface.
    #[inline]
    pub fn set_interface(&mut self, value: InterfaceType) {
        self.interface = Some(value);
    }

    /// Set region.
    #[inline]
    pub fn set_region<T: Into<String>>(&mut self, value: T) {
        self.region = Some(value.into());
    }

    /// Add an interface.
    #[inline]
    pub fn with_interface(mut self, value: InterfaceType) -> Self {
        self.set_interface(value);
        self
    }

    /// Add a region.
    #[inline]
    pub fn with_region<T: Into<String>>(mut self, value: T) -> Self {
        self.set_region(value);
        self
    }

    /// Fill in missing values from other filters.
    pub fn with_defaults(mut self, defaults: &EndpointFilters) -> Self {
        if self.interface.is_none() {
            self.interface = defaults.interface;
        }
        if self.region.is_none() {
            self.region.clone_from(&defaults.region);
        }
        self
    }

    /// Extract an endpoint URL for the service from the service catalog.
    pub(crate) fn find_in_catalog(
        &self,
        catalog: &[CatalogRecord],
        service_type: &str,
    ) -> Result<Url, Error> {
        let svc = catalog
            .iter()
            .find(|x| x.service_type == service_type)
            .ok_or_else(|| Error::new_endpoint_not_found(service_type))?;

        let endp = svc
            .endpoints
            .iter()
            .find(|x| self.check(x))
            .ok_or_else(|| Error::new_endpoint_not_found(service_type))?;

        debug!("Received {:?} for {}", endp, service_type);
        Url::parse(&endp.url).map_err(|e| {
            error!(
                "Invalid URL {} received from service catalog for service \
                 '{}', filters {:?}: {}",
                endp.url, service_type, self, e
            );
            Error::new(
                ErrorKind::InvalidResponse,
                format!("Invalid URL {} for {} - {}", endp.url, service_type, e),
            )
        })
    }
}

#[cfg(test)]
pub mod test {
    use std::str::FromStr;

    use super::{EndpointFilters, InterfaceType};
    use crate::identity::protocol::{CatalogRecord, Endpoint};
    use crate::{Error, ErrorKind};

    fn endpoint(interface: &str, region: &str, url: &str) -> Endpoint {
        Endpoint {
            interface: interface.to_string(),
            region: region.to_string(),
            url: url.to_string(),
        }
    }

    pub fn demo_catalog() -> Vec<CatalogRecord> {
        vec![
            CatalogRecord {
                service_type: String::from("identity"),
                endpoints: vec![
                    endpoint("public", "RegionOne", "https://host.one/identity"),
                    endpoint("internal", "RegionOne", "http://192.168.22.1/identity"),
                    endpoint("public", "RegionTwo", "https://host.two:5000"),
                ],
            },
            CatalogRecord {
                service_type: String::from("object-store"),
                endpoints: vec![
                    endpoint("public", "RegionOne", "https://host.one/swift"),
                    endpoint("public", "RegionTwo", "not a URL"),
                ],
            },
        ]
    }

    fn find(filters: EndpointFilters, service_type: &str) -> Result<String, Error> {
        filters
            .find_in_catalog(&demo_catalog(), service_type)
            .map(|u| u.to_string())
    }

    #[test]
    fn test_interface_from_str() {
        assert_eq!(
            InterfaceType::from_str("publicURL").unwrap(),
            InterfaceType::Public
        );
        assert_eq!(
            InterfaceType::from_str("internal").unwrap(),
            InterfaceType::Internal
        );
        assert_eq!(
            InterfaceType::from_str("nope").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(InterfaceType::Admin.to_string(), "admin");
    }

    #[test]
    fn test_find_in_catalog() {
        assert_eq!(
            find(EndpointFilters::default(), "identity").unwrap(),
            "https://host.one/identity"
        );
        assert_eq!(
            find(
                EndpointFilters::default().with_interface(InterfaceType::Internal),
                "identity"
            )
            .unwrap(),
            "http://192.168.22.1/identity"
        );
        assert_eq!(
            find(EndpointFilters::default().with_region("RegionTwo"), "identity").unwrap(),
            "https://host.two:5000/"
        );
    }

    #[test]
    fn test_find_in_catalog_not_found() {
        assert_eq!(
            find(EndpointFilters::default(), "compute").unwrap_err().kind(),
            ErrorKind::EndpointNotFound
        );
        assert_eq!(
            find(
                EndpointFilters::new(InterfaceType::Internal, "RegionTwo"),
                "identity"
            )
            .unwrap_err()
            .kind(),
            ErrorKind::EndpointNotFound
        );
    }

    #[test]
    fn test_find_in_catalog_invalid_url() {
        assert_eq!(
            find(
                EndpointFilters::default().with_region("RegionTwo"),
                "object-store"
            )
            .unwrap_err()
            .kind(),
            ErrorKind::InvalidResponse
        );
    }

    #[test]
    fn test_with_defaults() {
        let defaults = EndpointFilters::new(InterfaceType::Admin, "RegionOne");
        let filters = EndpointFilters::default()
            .with_region("RegionTwo")
            .with_defaults(&defaults);
        assert_eq!(filters.interface, Some(InterfaceType::Admin));
        assert_eq!(filters.region, Some("RegionTwo".to_string()));
    }
}
