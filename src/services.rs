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

//! OpenStack service types.

/// Trait representing a service type.
pub trait ServiceType {
    /// Service type to pass to the catalog.
    fn catalog_type(&self) -> &'static str;
}

/// A generic service.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GenericService {
    catalog_type: &'static str,
}

impl GenericService {
    /// Create a new generic service.
    pub const fn new(catalog_type: &'static str) -> GenericService {
        GenericService { catalog_type }
    }
}

impl ServiceType for GenericService {
    fn catalog_type(&self) -> &'static str {
        self.catalog_type
    }
}

/// Block Storage service.
pub const BLOCK_STORAGE: GenericService = GenericService::new("block-storage");

/// Compute service.
pub const COMPUTE: GenericService = GenericService::new("compute");

/// Identity service.
pub const IDENTITY: GenericService = GenericService::new("identity");

/// Image service.
pub const IMAGE: GenericService = GenericService::new("image");

/// Networking service.
pub const NETWORK: GenericService = GenericService::new("network");

/// Object Storage service.
pub const OBJECT_STORAGE: GenericService = GenericService::new("object-store");
