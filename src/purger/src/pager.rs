//! Sequential page reader.

use std::sync::Arc;

use common::error::PurgeResult;
use common::store::{Continuation, Page, RangeQuery, TableStore};

/// Walks the store's segmented result stream in strict page order. Page
/// `N + 1` is requested only after page `N` has been handed off, and no page
/// is ever re-fetched.
pub struct PageStream {
    client: Arc<dyn TableStore>,
    table: String,
    query: RangeQuery,
    cursor: Option<Continuation>,
    started: bool,
}

impl PageStream {
    pub fn new(client: Arc<dyn TableStore>, table: impl Into<String>, query: RangeQuery) -> Self {
        Self {
            client,
            table: table.into(),
            query,
            cursor: None,
            started: false,
        }
    }

    /// The next page, or `None` once the stream is exhausted. An empty first
    /// page with no cursor is the nothing-to-purge terminal state.
    pub async fn next_page(&mut self) -> PurgeResult<Option<Page>> {
        if self.started && self.cursor.is_none() {
            return Ok(None);
        }

        let page = self
            .client
            .query_segment(&self.table, &self.query, self.cursor.as_ref())
            .await?;
        self.started = true;
        self.cursor = page.continuation.clone();
        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::{InMemoryTableStore, RowKeys};

    fn query_all() -> RangeQuery {
        RangeQuery::build(None, "\u{10FFFF}", "")
    }

    #[tokio::test]
    async fn test_walks_every_page_once_in_order() {
        let store = Arc::new(InMemoryTableStore::with_page_size(2));
        for rk in ["r1", "r2", "r3", "r4", "r5"] {
            store.insert("p1", rk).await;
        }

        let mut pages = PageStream::new(store.clone(), "t", query_all());
        let mut rows: Vec<RowKeys> = Vec::new();
        while let Some(page) = pages.next_page().await.unwrap() {
            rows.extend(page.rows);
        }

        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.queries_served().await, 3);

        // Exhausted stream stays exhausted without further requests.
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(store.queries_served().await, 3);
    }

    #[tokio::test]
    async fn test_empty_store_yields_one_empty_final_page() {
        let store = Arc::new(InMemoryTableStore::new());
        let mut pages = PageStream::new(store, "t", query_all());

        let first = pages.next_page().await.unwrap().unwrap();
        assert!(first.rows.is_empty());
        assert!(first.is_final());
        assert!(pages.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let store = Arc::new(InMemoryTableStore::new());
        store.fail_queries().await;

        let mut pages = PageStream::new(store, "t", query_all());
        assert!(pages.next_page().await.is_err());
    }
}
