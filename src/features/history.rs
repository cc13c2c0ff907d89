use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::types::{HistoryEntry, HistoryPage, ParsedQuery};

pub const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_CAPACITY: usize = 1_000;

/// Bounded, newest-first query history.
///
/// Lives in process memory; the oldest entries are evicted once `capacity`
/// is reached.
#[derive(Debug)]
pub struct QueryHistory {
    entries: RwLock<VecDeque<HistoryEntry>>,
    capacity: usize,
}

impl Default for QueryHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl QueryHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, query: &str, parsed: ParsedQuery) -> HistoryEntry {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            query: query.to_string(),
            parsed,
            created_at: Utc::now(),
        };

        let mut entries = self.entries.write().await;
        entries.push_front(entry.clone());
        entries.truncate(self.capacity);
        entry
    }

    pub async fn page(&self, limit: usize, offset: usize) -> HistoryPage {
        let entries = self.entries.read().await;
        HistoryPage {
            items: entries.iter().skip(offset).take(limit).cloned().collect(),
            total: entries.len(),
            limit,
            offset,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::query::parse_query;

    #[tokio::test]
    async fn pages_are_newest_first() {
        let history = QueryHistory::default();
        for q in ["first", "second", "third"] {
            history.record(q, parse_query(q)).await;
        }

        let page = history.page(2, 0).await;
        assert_eq!(page.total, 3);
        let queries: Vec<_> = page.items.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["third", "second"]);

        let rest = history.page(2, 2).await;
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].query, "first");

        assert!(history.page(10, 50).await.items.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let history = QueryHistory::with_capacity(2);
        for q in ["a", "b", "c"] {
            history.record(q, parse_query(q)).await;
        }
        assert_eq!(history.len().await, 2);
        let page = history.page(10, 0).await;
        assert_eq!(page.items.last().unwrap().query, "b");
    }
}
