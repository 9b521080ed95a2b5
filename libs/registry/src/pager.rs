//! Lazy iteration over cursor-paginated listings.
//!
//! A [`Pager`] fetches the first page on first demand and follows the
//! continuation cursor only once the buffered page is drained. A not-found
//! response for a tag listing (unknown repository) ends the listing instead
//! of failing it; the catalog itself has no such exemption.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tracing::debug;

use crate::error::RegistryError;
use crate::retry::RetryPolicy;
use crate::source::MetadataSource;
use crate::types::Page;

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// What a pager lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageQuery {
    /// Repository names.
    Catalog,
    /// Tag names of one repository.
    Tags { image: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagerState {
    NotStarted,
    Active,
    Done,
}

/// Restartable lazy sequence over a paginated listing.
pub struct Pager {
    source: Arc<dyn MetadataSource>,
    query: PageQuery,
    page_size: usize,
    retry: RetryPolicy,
    buffer: VecDeque<String>,
    cursor: Option<String>,
    state: PagerState,
}

impl Pager {
    pub fn new(source: Arc<dyn MetadataSource>, query: PageQuery, page_size: usize) -> Self {
        Self {
            source,
            query,
            page_size: page_size.max(1),
            retry: RetryPolicy::default(),
            buffer: VecDeque::new(),
            cursor: None,
            state: PagerState::NotStarted,
        }
    }

    /// Pager over the registry catalog.
    pub fn catalog(source: Arc<dyn MetadataSource>, page_size: usize) -> Self {
        Self::new(source, PageQuery::Catalog, page_size)
    }

    /// Pager over the tags of `image`.
    pub fn tags(source: Arc<dyn MetadataSource>, image: impl Into<String>, page_size: usize) -> Self {
        Self::new(
            source,
            PageQuery::Tags {
                image: image.into(),
            },
            page_size,
        )
    }

    /// Use `retry` for page fetches.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reset cursor and buffer; the next call to [`Pager::next`] refetches
    /// the first page.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.cursor = None;
        self.state = PagerState::NotStarted;
    }

    /// Next item, or `None` at the end of the listing.
    pub async fn next(&mut self) -> Result<Option<String>, RegistryError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }

            match self.state {
                PagerState::Done => return Ok(None),
                PagerState::NotStarted => self.fetch(None).await?,
                PagerState::Active => match self.cursor.take() {
                    Some(cursor) => self.fetch(Some(cursor)).await?,
                    None => {
                        self.state = PagerState::Done;
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Drain the whole listing.
    pub async fn collect_all(mut self) -> Result<Vec<String>, RegistryError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Convert into a `Stream` of items.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, RegistryError>> + Send {
        stream::try_unfold(self, |mut pager| async move {
            Ok(pager.next().await?.map(|item| (item, pager)))
        })
    }

    async fn fetch(&mut self, cursor: Option<String>) -> Result<(), RegistryError> {
        let result = {
            let source = &self.source;
            let query = &self.query;
            let page_size = self.page_size;
            let cursor_ref = cursor.as_deref();
            let operation = match query {
                PageQuery::Catalog => "catalog page".to_string(),
                PageQuery::Tags { image } => format!("tag page for {image}"),
            };

            self.retry
                .run(&operation, move || async move {
                    match query {
                        PageQuery::Catalog => source.catalog_page(page_size, cursor_ref).await,
                        PageQuery::Tags { image } => {
                            source.tags_page(image, page_size, cursor_ref).await
                        }
                    }
                })
                .await
        };

        let page = match result {
            Ok(page) => page,
            // An unknown repository has no tags; a missing catalog is a
            // misconfigured registry and must surface.
            Err(e) if e.is_not_found() && matches!(self.query, PageQuery::Tags { .. }) => {
                debug!(query = ?self.query, error = %e, "Repository not found, no tags");
                self.state = PagerState::Done;
                return Ok(());
            }
            Err(e) => {
                self.state = PagerState::Done;
                return Err(e);
            }
        };

        let Page { items, next } = page;

        // A source that hands back the cursor it was given would loop forever.
        let next = match (&cursor, next) {
            (Some(previous), Some(next)) if *previous == next => None,
            (_, next) => next,
        };

        debug!(
            query = ?self.query,
            items = items.len(),
            has_next = next.is_some(),
            "Fetched page"
        );

        self.buffer.extend(items);
        self.cursor = next;
        self.state = PagerState::Active;
        Ok(())
    }
}
