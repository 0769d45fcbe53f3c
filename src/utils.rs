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

//! Various utilities.

use log::warn;
use serde_yaml::{Mapping, Value};

/// Merge `src` into `dest` recursively.
///
/// Nested mappings are merged key by key. Other values from `src` replace the ones in `dest`
/// only if `overwrite` is true.
pub fn merge_mappings(src: Mapping, dest: &mut Mapping, overwrite: bool) {
    for (key, value) in src {
        let existing = dest.get_mut(&key);
        match (value, existing) {
            (Value::Mapping(src_map), Some(Value::Mapping(dest_map))) => {
                merge_mappings(src_map, dest_map, overwrite)
            }
            (value, None) => {
                let _ = dest.insert(key, value);
            }
            (value @ Value::Mapping(_), Some(existing)) => {
                warn!(
                    "Cannot merge a mapping into {:?} at key {:?}, replacing it",
                    existing, key
                );
                *existing = value;
            }
            (value, Some(existing)) => {
                if overwrite {
                    *existing = value;
                }
            }
        }
    }
}

#[cfg(test)]
pub mod test {
    use serde_yaml::{Mapping, Value};

    use super::merge_mappings;

    pub(crate) fn to_yaml<S: AsRef<str>>(source: S) -> Mapping {
        match serde_yaml::from_str(source.as_ref()).unwrap() {
            Value::Mapping(map) => map,
            other => panic!("Unexpected {:?}", other),
        }
    }

    fn lookup<'m>(map: &'m Mapping, path: &[&str]) -> &'m Value {
        let (last, parents) = path.split_last().unwrap();
        let parent = parents.iter().fold(map, |acc, key| {
            acc.get(*key).and_then(Value::as_mapping).unwrap()
        });
        parent.get(*last).unwrap()
    }

    const DEST: &str = r#"
clouds:
  cloud_name:
    auth:
      username: user1
      project_name: project1
      auth_url: "url1"
    region_name: region1"#;

    const SRC: &str = r#"
clouds:
  cloud_name:
    auth:
      username: user2
      password: password1
    region_name: region2
  other_cloud:
    region_name: region3"#;

    #[test]
    fn test_merge_overwrite() {
        let mut dest = to_yaml(DEST);
        merge_mappings(to_yaml(SRC), &mut dest, true);

        let cloud = ["clouds", "cloud_name"];
        let get = |key: &[&str]| {
            let path: Vec<&str> = cloud.iter().chain(key.iter()).copied().collect();
            lookup(&dest, &path).as_str().unwrap().to_string()
        };
        assert_eq!(get(&["region_name"]), "region2");
        assert_eq!(get(&["auth", "username"]), "user2");
        assert_eq!(get(&["auth", "password"]), "password1");
        assert_eq!(get(&["auth", "project_name"]), "project1");
        assert_eq!(get(&["auth", "auth_url"]), "url1");
        assert_eq!(
            lookup(&dest, &["clouds", "other_cloud", "region_name"]),
            &Value::from("region3")
        );
    }

    #[test]
    fn test_merge_keep_existing() {
        let mut dest = to_yaml(DEST);
        merge_mappings(to_yaml(SRC), &mut dest, false);

        assert_eq!(
            lookup(&dest, &["clouds", "cloud_name", "auth", "username"]),
            &Value::from("user1")
        );
        assert_eq!(
            lookup(&dest, &["clouds", "cloud_name", "auth", "password"]),
            &Value::from("password1")
        );
    }

    #[test]
    fn test_merge_type_mismatch() {
        let src = to_yaml("map1:\n  map2:\n    auth:\n      password: password1");
        let mut dest = to_yaml("map1:\n  map2: 123");
        merge_mappings(src.clone(), &mut dest, true);
        assert_eq!(src, dest);
    }
}
