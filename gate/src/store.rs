//! Record store seam: flat collections queried and inserted as JSON rows.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use crate::error::StoreError;

/// One row as returned by the store.
pub type Record = serde_json::Value;

/// Equality filter on a single column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

/// Sort key for a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select-all query with optional filters, ordering and row limit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push(Filter { column: column.to_owned(), value: value.to_owned() });
        self
    }

    #[must_use]
    pub fn order_desc(mut self, column: &str) -> Self {
        self.order = Some(Order { column: column.to_owned(), ascending: false });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when `record` satisfies every filter. Non-string columns are
    /// compared by their JSON text.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|filter| match record.get(&filter.column) {
            Some(serde_json::Value::String(s)) => *s == filter.value,
            Some(other) => other.to_string() == filter.value,
            None => false,
        })
    }
}

/// Hosted table API as seen by the gate.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch rows of `collection` matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the store rejects it.
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Insert one row into `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the store rejects the row.
    async fn insert(&self, collection: &str, record: Record) -> Result<(), StoreError>;
}
