//! Lazy offset pagination.
//!
//! A `PageCursor` wraps a page-fetching function and exposes it as a stream
//! of pages or of individual items. All offset state lives inside each
//! stream, so a cursor can be iterated any number of times and dropping a
//! stream mid-way cancels the in-flight fetch without affecting the cursor.

use std::{fmt, future::Future, sync::Arc};

use cryptopay_core::{CryptoPayError, Page, Result};
use futures::{
    future::BoxFuture,
    stream::{self, BoxStream},
    FutureExt, StreamExt, TryStreamExt,
};

type FetchPage<'a, T> = dyn Fn(u64, u32) -> BoxFuture<'a, Result<Page<T>>> + Send + Sync + 'a;

/// Restartable cursor over an offset-paginated source.
///
/// Iteration stops on the first empty page (not yielded) or after a page
/// shorter than `page_size` or without a `next_offset` (yielded).
pub struct PageCursor<'a, T> {
    fetch: Arc<FetchPage<'a, T>>,
    start_offset: u64,
    page_size: u32,
}

impl<T> Clone for PageCursor<'_, T> {
    fn clone(&self) -> Self {
        Self {
            fetch: Arc::clone(&self.fetch),
            start_offset: self.start_offset,
            page_size: self.page_size,
        }
    }
}

impl<T> fmt::Debug for PageCursor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCursor")
            .field("start_offset", &self.start_offset)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Send + 'a> PageCursor<'a, T> {
    /// Creates a cursor.
    ///
    /// `fetch(offset, page_size)` must return at most `page_size` items
    /// starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoPayError::Validation` if `page_size` is zero.
    pub fn new<F, Fut>(fetch: F, start_offset: u64, page_size: u32) -> Result<Self>
    where
        F: Fn(u64, u32) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<Page<T>>> + Send + 'a,
    {
        if page_size == 0 {
            return Err(CryptoPayError::validation("page_size must be at least 1"));
        }

        let fetch: Arc<FetchPage<'a, T>> =
            Arc::new(move |offset, page_size| fetch(offset, page_size).boxed());

        Ok(Self { fetch, start_offset, page_size })
    }

    /// Page size requested on every fetch.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Offset of the first fetch.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Fresh stream of non-empty pages, starting at `start_offset`.
    ///
    /// A fetch error is yielded once and ends the stream.
    pub fn pages(&self) -> BoxStream<'a, Result<Vec<T>>> {
        let fetch = Arc::clone(&self.fetch);
        let page_size = self.page_size;

        stream::try_unfold(Some(self.start_offset), move |next| {
            let fetch = Arc::clone(&fetch);
            async move {
                let Some(offset) = next else {
                    return Ok(None);
                };

                let page = (*fetch)(offset, page_size).await?;
                if page.items.is_empty() {
                    return Ok(None);
                }

                let next = if page.items.len() < page_size as usize {
                    None
                } else {
                    page.next_offset
                };

                Ok(Some((page.items, next)))
            }
        })
        .boxed()
    }

    /// Fresh stream of items across all pages, in source order.
    pub fn items(&self) -> BoxStream<'a, Result<T>> {
        self.pages()
            .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}
