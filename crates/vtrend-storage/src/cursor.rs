//! Lazy, restartable scans over unbounded collections.
//!
//! A cursor yields `Ok(Some(item))` until the collection is exhausted, then
//! `Ok(None)` forever. Opening a new cursor restarts the scan. A per-item
//! decode failure is returned as `Err` for that item only; calling `next`
//! again continues with the following record.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::StorageError;

pub const DEFAULT_PAGE_SIZE: usize = 500;

#[async_trait]
pub trait RecordCursor<T: Send + 'static>: Send {
    async fn next(&mut self) -> Result<Option<T>, StorageError>;
}

pub type BoxCursor<T> = Box<dyn RecordCursor<T>>;

/// Composite keyset position; single-key collections leave the second part empty.
pub type PageKey = (String, String);

pub struct PageEntry<T> {
    pub key: PageKey,
    pub item: Result<T, StorageError>,
}

/// One page of a keyset-ordered collection, strictly after `after`.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn fetch_page(
        &self,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<PageEntry<Self::Item>>, StorageError>;
}

pub struct PagedCursor<S: PageSource> {
    source: S,
    page_size: usize,
    after: Option<PageKey>,
    buffer: VecDeque<Result<S::Item, StorageError>>,
    exhausted: bool,
}

impl<S: PageSource> PagedCursor<S> {
    pub fn new(source: S, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn boxed(source: S, page_size: usize) -> BoxCursor<S::Item> {
        Box::new(Self::new(source, page_size))
    }
}

#[async_trait]
impl<S: PageSource> RecordCursor<S::Item> for PagedCursor<S> {
    async fn next(&mut self) -> Result<Option<S::Item>, StorageError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .source
                .fetch_page(self.after.as_ref(), self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            for entry in page {
                self.after = Some(entry.key);
                self.buffer.push_back(entry.item);
            }
        }

        match self.buffer.pop_front() {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }
}

/// Drains a cursor, counting records; stops at the first error.
pub async fn count<T: Send + 'static>(cursor: &mut BoxCursor<T>) -> Result<u64, StorageError> {
    let mut total = 0u64;
    while cursor.next().await?.is_some() {
        total += 1;
    }
    Ok(total)
}

pub async fn collect<T: Send + 'static>(mut cursor: BoxCursor<T>) -> Result<Vec<T>, StorageError> {
    let mut out = Vec::new();
    while let Some(item) = cursor.next().await? {
        out.push(item);
    }
    Ok(out)
}
