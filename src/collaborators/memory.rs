//! In-memory catalog, object store and object query service (not durable).
//!
//! Every client counts its calls so tests can assert on caching and fan-out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{StreamExt, stream};

use super::{CatalogClient, ClientError, ObjectQueryClient, ObjectQueryResponse, ObjectStoreClient};
use crate::models::enums::SelectEvent;
use crate::models::structs::{CatalogPartition, CatalogTable, ObjectListing, ObjectQueryRequest, PartitionPage};
use crate::query_ast::get_limit;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Slices `items` into pages; the continuation token is the next start offset.
fn page<T: Clone>(items: &[T], token: Option<String>, size: usize) -> Result<(Vec<T>, Option<String>), ClientError> {
    let start = match token {
        Some(t) => t.parse::<usize>().map_err(|_| ClientError::new(format!("invalid continuation token `{}`", t)))?,
        None => 0,
    };
    let end = (start + size.max(1)).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    Ok((items.get(start..end).unwrap_or_default().to_vec(), next))
}

#[derive(Default)]
pub struct MemoryCatalog {
    tables: HashMap<(String, String), CatalogTable>,
    partitions: HashMap<(String, String), Vec<CatalogPartition>>,
    page_size: Option<usize>,
    get_table_calls: AtomicUsize,
    get_partitions_calls: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub fn with_table(mut self, database: &str, table: &str, definition: CatalogTable) -> Self {
        self.tables.insert((database.to_string(), table.to_string()), definition);
        self
    }

    pub fn with_partitions(mut self, database: &str, table: &str, partitions: Vec<CatalogPartition>) -> Self {
        self.partitions.insert((database.to_string(), table.to_string()), partitions);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn get_table_calls(&self) -> usize { self.get_table_calls.load(Ordering::SeqCst) }
    pub fn get_partitions_calls(&self) -> usize { self.get_partitions_calls.load(Ordering::SeqCst) }
    pub fn total_calls(&self) -> usize { self.get_table_calls() + self.get_partitions_calls() }
}

#[async_trait::async_trait]
impl CatalogClient for MemoryCatalog {
    async fn get_table(&self, database: &str, table: &str) -> Result<Option<CatalogTable>, ClientError> {
        self.get_table_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.get(&(database.to_string(), table.to_string())).cloned())
    }

    async fn get_partitions(&self, database: &str, table: &str, next_token: Option<String>) -> Result<PartitionPage, ClientError> {
        self.get_partitions_calls.fetch_add(1, Ordering::SeqCst);
        let key = (database.to_string(), table.to_string());
        if !self.tables.contains_key(&key) {
            return Err(ClientError::new(format!("table {}.{} not found", database, table)));
        }
        let all = self.partitions.get(&key).map(Vec::as_slice).unwrap_or_default();
        let (partitions, next_token) = page(all, next_token, self.page_size.unwrap_or(DEFAULT_PAGE_SIZE))?;
        Ok(PartitionPage { partitions, next_token })
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: BTreeMap<String, Vec<String>>,
    page_size: Option<usize>,
    failing: bool,
    list_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_object(mut self, bucket: &str, key: &str) -> Self {
        self.objects.entry(bucket.to_string()).or_default().push(key.to_string());
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Every listing call fails.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: &str, next_token: Option<String>) -> Result<ObjectListing, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(ClientError::new(format!("listing s3://{}/{} failed", bucket, prefix)));
        }
        let matching: Vec<String> = self
            .objects
            .get(bucket)
            .map(|keys| keys.iter().filter(|k| k.starts_with(prefix)).cloned().collect())
            .unwrap_or_default();
        let (keys, next_token) = page(&matching, next_token, self.page_size.unwrap_or(DEFAULT_PAGE_SIZE))?;
        Ok(ObjectListing { keys, next_token })
    }
}

/// Answers every query with `rows_per_key` JSON rows, capped by the statement's LIMIT.
pub struct MemoryObjectQuery {
    rows_per_key: usize,
    rows_by_key: HashMap<String, usize>,
    without_payload: bool,
    never_ends: bool,
    requests: Mutex<Vec<ObjectQueryRequest>>,
}

impl MemoryObjectQuery {
    pub fn new(rows_per_key: usize) -> Self {
        Self { rows_per_key, rows_by_key: HashMap::new(), without_payload: false, never_ends: false, requests: Mutex::new(Vec::new()) }
    }

    pub fn with_rows(mut self, key: &str, rows: usize) -> Self {
        self.rows_by_key.insert(key.to_string(), rows);
        self
    }

    /// Responses carry no event stream.
    pub fn without_payload(mut self) -> Self {
        self.without_payload = true;
        self
    }

    /// Streams stay open after their rows instead of ending.
    pub fn never_ends(mut self) -> Self {
        self.never_ends = true;
        self
    }

    pub fn requests(&self) -> Vec<ObjectQueryRequest> { self.requests.lock().map(|r| r.clone()).unwrap_or_default() }
    pub fn query_calls(&self) -> usize { self.requests.lock().map(|r| r.len()).unwrap_or(0) }
}

#[async_trait::async_trait]
impl ObjectQueryClient for MemoryObjectQuery {
    async fn query(&self, request: ObjectQueryRequest) -> Result<ObjectQueryResponse, ClientError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        if self.without_payload {
            return Ok(ObjectQueryResponse { payload: None });
        }
        let available = self.rows_by_key.get(&request.key).copied().unwrap_or(self.rows_per_key);
        let rows = match get_limit(&request.expression) {
            0 => available,
            limit => available.min(limit as usize),
        };
        let mut events = vec![SelectEvent::Progress { bytes_scanned: 0, bytes_processed: 0, bytes_returned: 0 }];
        events.extend((0..rows).map(|i| SelectEvent::records(format!("{{\"key\":\"{}\",\"row\":{}}}\n", request.key, i))));
        let returned: u64 = events.iter().filter_map(SelectEvent::payload).map(|p| p.len() as u64).sum();
        events.push(SelectEvent::Stats { bytes_scanned: returned, bytes_processed: returned, bytes_returned: returned });
        let body = stream::iter(events.into_iter().map(Ok));
        let payload = if self.never_ends {
            body.chain(stream::pending()).boxed()
        } else {
            body.chain(stream::iter([Ok(SelectEvent::End)])).boxed()
        };
        Ok(ObjectQueryResponse { payload: Some(payload) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_paginates_by_prefix() {
        let store = MemoryObjectStore::new()
            .with_object("b", "t/a=1/x")
            .with_object("b", "t/a=1/y")
            .with_object("b", "t/a=2/z")
            .with_page_size(1);
        let first = store.list_objects("b", "t/a=1/", None).await.unwrap();
        assert_eq!(first.keys, vec!["t/a=1/x"]);
        let second = store.list_objects("b", "t/a=1/", first.next_token).await.unwrap();
        assert_eq!(second.keys, vec!["t/a=1/y"]);
        assert!(second.next_token.is_none());
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn query_honours_limit() {
        let svc = MemoryObjectQuery::new(5);
        let req = ObjectQueryRequest {
            bucket: "b".into(),
            key: "k".into(),
            expression: "SELECT * FROM s3Object LIMIT 2".into(),
            expression_type: "SQL".into(),
            input_format: crate::models::enums::InputFormat::Json,
            output_format: crate::models::enums::OutputFormat::Json,
        };
        let events: Vec<_> = svc.query(req).await.unwrap().payload.unwrap().collect().await;
        assert_eq!(events.iter().filter(|e| e.as_ref().is_ok_and(SelectEvent::is_data)).count(), 2);
        assert_eq!(events.last(), Some(&Ok(SelectEvent::End)));
    }
}
