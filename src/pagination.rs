// Copyright 2019 Dmitry Tantsur <dtantsur@protonmail.com>
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

//! Walking paginated collections.
//!
//! A listing API returns its results in pages, each page knowing how to fetch the following one.
//! The [Page](trait.Page.html) trait captures this contract, while
//! [collect_all_pages](fn.collect_all_pages.html) and [into_stream](fn.into_stream.html) walk
//! the chain of pages until it is exhausted.
//!
//! # Termination
//!
//! Walking stops at the first page that either cannot have a next page or contains no items.
//! The latter means that a non-empty page following an empty one is never reached. Some
//! backends may legitimately return such sequences, but the walker treats an empty page as the
//! end of the collection.

use std::fmt::Debug;

use async_trait::async_trait;
use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use super::{Error, ErrorKind};

/// One page of a remotely paginated collection.
///
/// Implementations are normally provided by the HTTP layer, see
/// [ResourcePage](../client/struct.ResourcePage.html).
#[async_trait]
pub trait Page: Debug + Send + Sync + Sized {
    /// Type of an item on the page.
    type Item: Send;

    /// Items on this page in the server order.
    fn items(&self) -> &[Self::Item];

    /// Move the items out of this page.
    ///
    /// The page must still be able to fetch its successor afterwards.
    fn take_items(&mut self) -> Vec<Self::Item>;

    /// Number of items on this page.
    #[inline]
    fn count(&self) -> usize {
        self.items().len()
    }

    /// Whether fetching the next page is possible at all.
    ///
    /// A `true` value does not guarantee that the next page is not empty.
    fn can_have_next_page(&self) -> bool;

    /// Fetch the page following this one.
    ///
    /// Implementations should stop early if `cancel` is triggered.
    async fn fetch_next_page(&self, cancel: &CancellationToken) -> Result<Self, Error>;
}

/// Whether the walker proceeds after this page.
#[inline]
fn has_next_page<P: Page>(page: &P) -> bool {
    page.can_have_next_page() && page.count() > 0
}

fn cancelled() -> Error {
    Error::new(
        ErrorKind::Cancelled,
        "Fetching the next page has been cancelled",
    )
}

async fn next_page<P: Page>(page: &P, cancel: &CancellationToken) -> Result<P, Error> {
    if cancel.is_cancelled() {
        debug!("Pagination cancelled before fetching the next page");
        return Err(cancelled());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Pagination cancelled while fetching the next page");
            Err(cancelled())
        }
        result = page.fetch_next_page(cancel) => result,
    }
}

async fn walk<P, F>(
    first_page: Option<P>,
    cancel: &CancellationToken,
    mut on_progress: Option<F>,
) -> Result<Vec<P::Item>, Error>
where
    P: Page,
    F: FnMut(&P),
{
    let mut current = first_page.ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidInput,
            "The first page of a collection is required",
        )
    })?;

    let mut result = Vec::with_capacity(current.count());
    let mut pages = 1;
    loop {
        if let Some(ref mut callback) = on_progress {
            callback(&current);
        }

        let proceed = has_next_page(&current);
        trace!(
            "Page {} has {} item(s), proceeding: {}",
            pages,
            current.count(),
            proceed
        );
        result.extend(current.take_items());

        if !proceed {
            break;
        }

        current = next_page(&current, cancel).await?;
        pages += 1;
    }

    debug!(
        "Collected {} item(s) from {} page(s)",
        result.len(),
        pages
    );
    Ok(result)
}

/// Collect items from all pages starting with `first_page`.
///
/// Pages are fetched strictly one after another. The walking stops on a page that has no items
/// or cannot have a next page. Any failure when fetching a page is returned as it is, and the
/// items collected so far are discarded.
///
/// Fails with `InvalidInput` if `first_page` is `None` and with `Cancelled` if `cancel` is
/// triggered before or during fetching a page.
///
/// ```rust,no_run
/// # async fn example() -> Result<(), ossdk::Error> {
/// use ossdk::client::PaginatedResource;
/// use serde::Deserialize;
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Debug, Deserialize)]
/// pub struct Image {
///     pub id: String,
/// }
///
/// #[derive(Debug, Deserialize)]
/// pub struct ImagesRoot {
///     pub images: Vec<Image>,
/// }
///
/// impl From<ImagesRoot> for Vec<Image> {
///     fn from(value: ImagesRoot) -> Vec<Image> {
///         value.images
///     }
/// }
///
/// impl PaginatedResource for Image {
///     type Id = String;
///     type Root = ImagesRoot;
///     fn resource_id(&self) -> Self::Id {
///         self.id.clone()
///     }
/// }
///
/// let session = ossdk::Session::from_env()?;
/// let first = session
///     .get(ossdk::services::IMAGE, &["v2", "images"])
///     .await?
///     .fetch_page::<Image>(Some(100), None)
///     .await?;
/// let images = ossdk::pagination::collect_all_pages(Some(first), &CancellationToken::new()).await?;
/// println!("{} images", images.len());
/// # Ok(()) }
/// ```
#[inline]
pub async fn collect_all_pages<P: Page>(
    first_page: Option<P>,
    cancel: &CancellationToken,
) -> Result<Vec<P::Item>, Error> {
    walk::<P, fn(&P)>(first_page, cancel, None).await
}

/// Collect items from all pages, reporting every page before its items are collected.
///
/// The callback is invoked once per page, in the page order, and receives the page itself.
/// Otherwise identical to [collect_all_pages](fn.collect_all_pages.html).
#[inline]
pub async fn collect_all_pages_with_progress<P, F>(
    first_page: Option<P>,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<Vec<P::Item>, Error>
where
    P: Page,
    F: FnMut(&P),
{
    walk(first_page, cancel, Some(on_progress)).await
}

/// Lazily walk all pages starting with `first_page`.
///
/// Items of a page are yielded before the next page is requested. The termination rules are
/// the same as for [collect_all_pages](fn.collect_all_pages.html).
#[cfg(feature = "stream")]
pub fn into_stream<P>(
    first_page: P,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = Result<P::Item, Error>>
where
    P: Page,
{
    async_stream::try_stream! {
        let mut current = first_page;
        loop {
            let proceed = has_next_page(&current);
            for item in current.take_items() {
                yield item;
            }

            if !proceed {
                break;
            }

            current = next_page(&current, &cancel).await?;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{collect_all_pages, collect_all_pages_with_progress, Page};
    use crate::{Error, ErrorKind};

    /// A page served from a fixed list of chunks.
    #[derive(Debug)]
    pub struct FakePage {
        chunks: Arc<Vec<Vec<u32>>>,
        index: usize,
        items: Vec<u32>,
        fetches: Arc<AtomicUsize>,
        fail_at: Option<usize>,
        delay: Option<Duration>,
    }

    impl FakePage {
        pub fn new(chunks: Vec<Vec<u32>>) -> FakePage {
            FakePage {
                items: chunks[0].clone(),
                chunks: Arc::new(chunks),
                index: 0,
                fetches: Arc::new(AtomicUsize::new(0)),
                fail_at: None,
                delay: None,
            }
        }

        pub fn failing_at(mut self, index: usize) -> FakePage {
            self.fail_at = Some(index);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> FakePage {
            self.delay = Some(delay);
            self
        }

        pub fn fetches(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.fetches)
        }
    }

    #[async_trait]
    impl Page for FakePage {
        type Item = u32;

        fn items(&self) -> &[u32] {
            &self.items
        }

        fn take_items(&mut self) -> Vec<u32> {
            std::mem::take(&mut self.items)
        }

        fn can_have_next_page(&self) -> bool {
            self.index + 1 < self.chunks.len()
        }

        async fn fetch_next_page(&self, _cancel: &CancellationToken) -> Result<Self, Error> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let index = self.index + 1;
            if self.fail_at == Some(index) {
                return Err(Error::new(ErrorKind::InternalServerError, "page is broken"));
            }

            Ok(FakePage {
                chunks: Arc::clone(&self.chunks),
                index,
                items: self.chunks[index].clone(),
                fetches: Arc::clone(&self.fetches),
                fail_at: self.fail_at,
                delay: self.delay,
            })
        }
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let page = FakePage::new(vec![vec![1, 2, 3], vec![4, 5], vec![6]]);
        let fetches = page.fetches();
        let result = collect_all_pages(Some(page), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_two_pages() {
        let page = FakePage::new(vec![vec![1, 2], vec![3]]);
        let fetches = page.fetches();
        let result = collect_all_pages(Some(page), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec![1, 2, 3]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_first_page_stops() {
        let page = FakePage::new(vec![vec![], vec![1, 2]]);
        assert!(page.can_have_next_page());
        let fetches = page.fetches();
        let result = collect_all_pages(Some(page), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_middle_page_stops() {
        let page = FakePage::new(vec![vec![1], vec![], vec![2]]);
        let fetches = page.fetches();
        let result = collect_all_pages(Some(page), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec![1]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_page_stops() {
        let page = FakePage::new(vec![vec![1, 2]]);
        assert!(!page.can_have_next_page());
        let fetches = page.fetches();
        let result = collect_all_pages(Some(page), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec![1, 2]);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_progress_sees_every_page() {
        let page = FakePage::new(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        let mut seen = Vec::new();
        let result =
            collect_all_pages_with_progress(Some(page), &CancellationToken::new(), |p| {
                seen.push(p.items().to_vec())
            })
            .await
            .unwrap();
        assert_eq!(result, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(seen, vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
    }

    #[tokio::test]
    async fn test_missing_first_page() {
        let err = collect_all_pages::<FakePage>(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_failure_propagated() {
        let page = FakePage::new(vec![vec![1], vec![2], vec![3]]).failing_at(2);
        let fetches = page.fetches();
        let err = collect_all_pages(Some(page), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalServerError);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let page = FakePage::new(vec![vec![1], vec![2]]);
        let fetches = page.fetches();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collect_all_pages(Some(page), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_fetch() {
        let page =
            FakePage::new(vec![vec![1], vec![2]]).with_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            collect_all_pages(Some(page), &cancel),
        )
        .await
        .expect("cancellation was not observed")
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[cfg(feature = "stream")]
    #[tokio::test]
    async fn test_stream_is_lazy() {
        use futures::pin_mut;
        use futures::stream::TryStreamExt;

        let page = FakePage::new(vec![vec![1, 2], vec![3], vec![]]);
        let fetches = page.fetches();
        let stream = super::into_stream(page, CancellationToken::new());
        pin_mut!(stream);

        assert_eq!(stream.try_next().await.unwrap(), Some(1));
        assert_eq!(stream.try_next().await.unwrap(), Some(2));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert_eq!(stream.try_next().await.unwrap(), Some(3));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(stream.try_next().await.unwrap(), None);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[cfg(feature = "stream")]
    #[tokio::test]
    async fn test_stream_failure() {
        use futures::stream::TryStreamExt;

        let page = FakePage::new(vec![vec![1], vec![2]]).failing_at(1);
        let err = super::into_stream(page, CancellationToken::new())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalServerError);
    }
}
