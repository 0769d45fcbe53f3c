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

use std::env;
use std::str::FromStr;

use ossdk::client::{PaginatedResource, Pagination};
use ossdk::pagination::collect_all_pages_with_progress;
use ossdk::Page;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImagesRoot {
    pub images: Vec<Image>,
    #[serde(default)]
    pub next: Option<String>,
}

impl From<ImagesRoot> for Vec<Image> {
    fn from(value: ImagesRoot) -> Vec<Image> {
        value.images
    }
}

impl PaginatedResource for Image {
    type Id = String;
    type Root = ImagesRoot;
    const PAGINATION: Pagination = Pagination::Link;

    fn resource_id(&self) -> Self::Id {
        self.id.clone()
    }

    fn next_link(root: &ImagesRoot) -> Option<String> {
        root.next.clone()
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let limit = env::args()
        .nth(1)
        .map(|s| FromStr::from_str(&s).expect("Expected a number"));

    let session = ossdk::Session::from_env()
        .expect("Failed to create a session from the environment");

    let first = session
        .get(ossdk::services::IMAGE, &["v2", "images"])
        .await
        .expect("Failed to find the image endpoint")
        .fetch_page::<Image>(limit, None)
        .await
        .expect("Failed to fetch the first page");

    let images = collect_all_pages_with_progress(
        Some(first),
        &CancellationToken::new(),
        |page: &ossdk::client::ResourcePage<Image>| {
            println!("Fetched a page of {} images", page.count())
        },
    )
    .await
    .expect("Failed to collect images");

    for img in &images {
        println!(
            "ID = {}, Name = {}",
            img.id,
            img.name.as_deref().unwrap_or("<none>")
        );
    }
    println!("Done listing {} images", images.len());
}
