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

//! Cloud configuration from `clouds.yaml` and friends.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::CloudConfig;
use crate::utils;
use crate::{Error, ErrorKind, Session};

#[derive(Debug, Deserialize)]
struct Root {
    clouds: HashMap<String, CloudConfig>,
}

#[inline]
fn invalid<S: Into<String>>(message: S) -> Error {
    Error::new(ErrorKind::InvalidConfig, message)
}

fn get_mapping_mut<'m>(
    root: &'m mut Mapping,
    key: &str,
    file: &str,
) -> Result<&'m mut Mapping, Error> {
    match root.get_mut(key) {
        Some(Value::Mapping(map)) => Ok(map),
        Some(other) => Err(invalid(format!(
            "{} object in {} must be a mapping, got {:?}",
            key, file, other
        ))),
        None => Err(invalid(format!("{} must contain a {} object", file, key))),
    }
}

/// Inject profiles from clouds-public.yaml into clouds.yaml.
///
/// Values from a profile never override values from the cloud itself.
fn inject_profiles(clouds_public: &mut Mapping, clouds: &mut Mapping) -> Result<(), Error> {
    let profiles = get_mapping_mut(clouds_public, "public-clouds", "clouds-public.yaml")?;
    let clouds = get_mapping_mut(clouds, "clouds", "clouds.yaml")?;

    for (cloud_name, cloud) in clouds.iter_mut() {
        let cloud = match cloud.as_mapping_mut() {
            Some(cloud) => cloud,
            None => {
                warn!("Cloud record {:?} is not a mapping, ignoring", cloud_name);
                continue;
            }
        };

        let profile_name = match cloud.get("profile") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(invalid(format!("Profile name {:?} is not a string", other)))
            }
            None => continue,
        };

        match profiles.get(profile_name.as_str()) {
            Some(Value::Mapping(profile)) => {
                debug!("Applying profile {} to cloud {:?}", profile_name, cloud_name);
                utils::merge_mappings(profile.clone(), cloud, false);
            }
            Some(other) => {
                return Err(invalid(format!(
                    "Profile {} must be a mapping, got {:?}",
                    profile_name, other
                )))
            }
            None => {
                return Err(invalid(format!(
                    "Missing profile {} in clouds-public.yaml",
                    profile_name
                )))
            }
        }
    }

    Ok(())
}

/// Look for the file in the current directory, the user configuration and `/etc/openstack`.
fn find_config(filename: &str) -> Option<PathBuf> {
    let current = Path::new(filename);
    if current.is_file() {
        match current.canonicalize() {
            Ok(val) => return Some(val),
            Err(e) => warn!("Cannot canonicalize {:?}: {}", current, e),
        }
    }

    if let Some(mut config) = dirs::config_dir() {
        config.push("openstack");
        config.push(filename);
        if config.is_file() {
            return Some(config);
        }
    } else {
        warn!("Cannot find the user configuration directory");
    }

    let abs = Path::new("/etc/openstack").join(filename);
    if abs.is_file() {
        Some(abs)
    } else {
        None
    }
}

#[inline]
fn with_one_key(key: &str) -> Mapping {
    let mut result = Mapping::with_capacity(1);
    let _ = result.insert(key.into(), Value::Mapping(Mapping::new()));
    result
}

fn read_yaml_file(path: &Path) -> Result<Mapping, Error> {
    let content = File::open(path)
        .map_err(|e| invalid(format!("Cannot read {}: {}", path.display(), e)))?;
    match serde_yaml::from_reader::<_, Value>(content)
        .map_err(|e| invalid(format!("Cannot parse {}: {}", path.display(), e)))?
    {
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(invalid(format!(
            "Root of {} is {:?}, not a mapping",
            path.display(),
            other
        ))),
    }
}

/// Read an optional configuration file, defaulting to an empty `default_root_key` object.
fn read_yaml(filename: &str, default_root_key: Option<&str>) -> Result<Mapping, Error> {
    match (find_config(filename), default_root_key) {
        (Some(path), _) => {
            debug!("Reading configuration from {}", path.display());
            read_yaml_file(&path)
        }
        (None, Some(default)) => Ok(with_one_key(default)),
        (None, None) => Err(invalid(format!(
            "{} was not found in any location",
            filename
        ))),
    }
}

fn from_files(
    name: &str,
    mut clouds: Mapping,
    mut clouds_public: Mapping,
    secure: Mapping,
) -> Result<CloudConfig, Error> {
    utils::merge_mappings(secure, &mut clouds, true);
    inject_profiles(&mut clouds_public, &mut clouds)?;

    let mut root: Root = serde_yaml::from_value(Value::Mapping(clouds)).map_err(|e| {
        invalid(format!(
            "Cannot parse the merged cloud configuration: {}",
            e
        ))
    })?;

    root.clouds
        .remove(name)
        .ok_or_else(|| invalid(format!("No such cloud: {}", name)))
}

pub(crate) fn cloud_from_config(cloud_name: &str) -> Result<CloudConfig, Error> {
    let clouds = read_yaml("clouds.yaml", None)?;
    let clouds_public = read_yaml("clouds-public.yaml", Some("public-clouds"))?;
    let secure = read_yaml("secure.yaml", Some("clouds"))?;

    from_files(cloud_name, clouds, clouds_public, secure)
}

/// Create a `Session` from a `clouds.yaml` configuration file.
///
/// See [Session::from_config](../struct.Session.html#method.from_config) for details.
#[inline]
pub fn from_config<S: AsRef<str>>(cloud_name: S) -> Result<Session, Error> {
    cloud_from_config(cloud_name.as_ref())?.create_session()
}
