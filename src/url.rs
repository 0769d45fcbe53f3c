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

//! Handy primitives for working with URLs.

use reqwest::Url;
use url::ParseError;

use super::{Error, ErrorKind};

fn cannot_be_a_base(url: &Url) -> Error {
    Error::new(
        ErrorKind::InvalidResponse,
        format!("URL {} cannot be used as a base", url),
    )
}

/// Append path segments to the URL, ignoring a trailing slash.
#[allow(unused_results)]
pub fn extend<I>(mut url: Url, segments: I) -> Result<Url, Error>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    if url.cannot_be_a_base() {
        return Err(cannot_be_a_base(&url));
    }

    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

/// Resolve a link received in a response against the URL of that response.
///
/// Services behind a path prefix (e.g. `http://host/image`) return root-relative links without
/// the prefix, so it is restored from the base URL.
pub fn resolve_link(base: &Url, link: &str) -> Result<Url, ParseError> {
    let mut resolved = base.join(link)?;
    if !link.starts_with('/') || link.starts_with("//") {
        return Ok(resolved);
    }

    let first = match resolved.path_segments().and_then(|mut s| s.next()) {
        Some(first) if !first.is_empty() => first.to_string(),
        _ => return Ok(resolved),
    };
    let base_segments: Vec<&str> = match base.path_segments() {
        Some(segments) => segments.collect(),
        None => return Ok(resolved),
    };

    match base_segments.iter().position(|s| *s == first) {
        Some(prefix_len) if prefix_len > 0 => {
            let path = format!("/{}{}", base_segments[..prefix_len].join("/"), resolved.path());
            resolved.set_path(&path);
        }
        _ => {}
    }
    Ok(resolved)
}
