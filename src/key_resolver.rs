//! Catalog metadata and object listing, cached for the life of one table session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::OnceCell;

use crate::collaborators::{CatalogClient, ObjectStoreClient};
use crate::errors::{Result, SelectableError};
use crate::models::enums::InputFormat;
use crate::models::structs::{ObjectKey, StorageLocation, TableInfo, TableRef};
use crate::partition_index::PartitionIndex;

static LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://([^/]+)(?:/(.*))?$").expect("location regex"));

/// `s3://bucket/prefix`; the prefix may be empty.
pub fn parse_location(location: &str) -> Option<StorageLocation> {
    let caps = LOCATION_RE.captures(location.trim())?;
    Some(StorageLocation {
        bucket: caps[1].to_string(),
        prefix: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
    })
}

/// `col1=v1/col2=v2` for values in partition-column order.
pub fn partition_path(columns: &[String], values: &[String]) -> String {
    columns.iter().zip(values).map(|(c, v)| format!("{}={}", c, v)).collect::<Vec<_>>().join("/")
}

struct Partitions {
    index: PartitionIndex,
    locations: HashMap<String, String>,
}

type KeyCell = Arc<OnceCell<Arc<Vec<ObjectKey>>>>;

pub struct KeyResolver {
    catalog: Arc<dyn CatalogClient>,
    object_store: Arc<dyn ObjectStoreClient>,
    table: TableRef,
    table_info: OnceCell<TableInfo>,
    partitions: OnceCell<Partitions>,
    keys_by_location: Mutex<HashMap<String, KeyCell>>,
}

impl KeyResolver {
    pub fn new(catalog: Arc<dyn CatalogClient>, object_store: Arc<dyn ObjectStoreClient>, table: TableRef) -> Self {
        Self {
            catalog,
            object_store,
            table,
            table_info: OnceCell::new(),
            partitions: OnceCell::new(),
            keys_by_location: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &TableRef { &self.table }

    /// Table definition, fetched from the catalog once per session.
    pub async fn get_table_info(&self) -> Result<&TableInfo> {
        self.table_info.get_or_try_init(|| self.fetch_table_info()).await
    }

    async fn fetch_table_info(&self) -> Result<TableInfo> {
        debug!("fetching table {} from catalog", self.table);
        let definition = self
            .catalog
            .get_table(&self.table.database, &self.table.table)
            .await
            .map_err(SelectableError::ResolverIo)?
            .ok_or_else(|| SelectableError::TableNotFound(self.table.to_string()))?;
        let invalid = || SelectableError::InvalidTableLocation { table: self.table.to_string(), location: definition.location.clone() };
        let location = definition.location.clone().ok_or_else(invalid)?;
        let StorageLocation { bucket, prefix } = parse_location(&location).ok_or_else(invalid)?;
        let input_format = definition
            .serialization_library
            .as_deref()
            .map(InputFormat::from_serialization_library)
            .unwrap_or(InputFormat::Unknown);
        Ok(TableInfo { location, bucket, prefix, partition_columns: definition.partition_columns, input_format })
    }

    /// Every catalog partition as `col=value/...`, empty for unpartitioned tables.
    pub async fn get_partition_paths(&self) -> Result<Vec<String>> {
        Ok(self.partition_index().await?.paths().to_vec())
    }

    /// Index over the session's partitions, built on first use.
    pub async fn partition_index(&self) -> Result<&PartitionIndex> {
        Ok(&self.partitions.get_or_try_init(|| self.fetch_partitions()).await?.index)
    }

    async fn fetch_partitions(&self) -> Result<Partitions> {
        let info = self.get_table_info().await?;
        let columns = info.partition_columns.clone();
        let mut paths = Vec::new();
        let mut locations = HashMap::new();
        if info.is_partitioned() {
            let mut token = None;
            loop {
                debug!("fetching partitions of {} (token {:?})", self.table, token);
                let page = self
                    .catalog
                    .get_partitions(&self.table.database, &self.table.table, token)
                    .await
                    .map_err(SelectableError::ResolverIo)?;
                for p in page.partitions {
                    match p.location {
                        Some(location) if p.values.len() == columns.len() => {
                            let path = partition_path(&columns, &p.values);
                            if locations.insert(path.clone(), location).is_none() {
                                paths.push(path);
                            }
                        }
                        location => warn!("skipping unverified partition of {}: values {:?}, location {:?}", self.table, p.values, location),
                    }
                }
                token = page.next_token;
                if token.is_none() {
                    break;
                }
            }
        }
        debug!("{} has {} partitions", self.table, paths.len());
        Ok(Partitions { index: PartitionIndex::new(columns, paths), locations })
    }

    /// Object keys under each given partition, or under the table location when the
    /// table is unpartitioned.
    pub async fn resolve_keys(&self, partition_paths: &[String]) -> Result<Vec<ObjectKey>> {
        let info = self.get_table_info().await?;
        let locations: Vec<&str> = if info.is_partitioned() {
            let partitions = self.partitions.get_or_try_init(|| self.fetch_partitions()).await?;
            partition_paths
                .iter()
                .map(|path| {
                    partitions.locations.get(path).map(String::as_str).ok_or_else(|| SelectableError::MalformedPartitionPath {
                        path: path.clone(),
                        reason: format!("not a partition of {}", self.table),
                    })
                })
                .collect::<Result<_>>()?
        } else {
            vec![info.location.as_str()]
        };
        let listed = try_join_all(locations.into_iter().map(|l| self.list_location(l))).await?;
        let keys: Vec<ObjectKey> = listed.iter().flat_map(|k| k.iter().cloned()).collect();
        debug!("resolved {} keys for {}", keys.len(), self.table);
        Ok(keys)
    }

    async fn list_location(&self, location: &str) -> Result<Arc<Vec<ObjectKey>>> {
        let cell = {
            let mut cache = self.keys_by_location.lock().unwrap_or_else(|e| e.into_inner());
            cache.entry(location.to_string()).or_default().clone()
        };
        let keys = cell.get_or_try_init(|| self.fetch_keys(location)).await?;
        Ok(keys.clone())
    }

    async fn fetch_keys(&self, location: &str) -> Result<Arc<Vec<ObjectKey>>> {
        let StorageLocation { bucket, mut prefix } = parse_location(location).ok_or_else(|| {
            SelectableError::InvalidTableLocation { table: self.table.to_string(), location: Some(location.to_string()) }
        })?;
        // `t/a=1` would also match `t/a=10/...`
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            debug!("listing s3://{}/{} (token {:?})", bucket, prefix, token);
            let page = self.object_store.list_objects(&bucket, &prefix, token).await.map_err(SelectableError::ResolverIo)?;
            keys.extend(page.keys.into_iter().map(|key| ObjectKey { bucket: bucket.clone(), key }));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        Ok(Arc::new(keys))
    }

    /// Locations whose key listing is cached (an empty listing counts).
    pub fn cached_location_count(&self) -> usize {
        let cache = self.keys_by_location.lock().unwrap_or_else(|e| e.into_inner());
        cache.values().filter(|c| c.initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::{MemoryCatalog, MemoryObjectStore};
    use crate::models::structs::{CatalogPartition, CatalogTable};

    #[test]
    fn locations_parse() {
        assert_eq!(parse_location("s3://bucket/a/b"), Some(StorageLocation { bucket: "bucket".into(), prefix: "a/b".into() }));
        assert_eq!(parse_location("s3://bucket"), Some(StorageLocation { bucket: "bucket".into(), prefix: String::new() }));
        assert_eq!(parse_location("s3://bucket/"), Some(StorageLocation { bucket: "bucket".into(), prefix: String::new() }));
        assert_eq!(parse_location("s3://bucket//a"), Some(StorageLocation { bucket: "bucket".into(), prefix: "/a".into() }));
        assert_eq!(parse_location("s3:///a"), None);
        assert_eq!(parse_location("bucket/a"), None);
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .with_table("db", "t", CatalogTable {
                location: Some("s3://b/t".into()),
                partition_columns: vec!["p".into()],
                serialization_library: Some("org.openx.data.jsonserde.JsonSerDe".into()),
            })
            .with_partitions("db", "t", vec![
                CatalogPartition { values: vec!["1".into()], location: Some("s3://b/t/p=1".into()) },
                CatalogPartition { values: vec!["10".into()], location: Some("s3://b/t/p=10".into()) },
                CatalogPartition { values: vec![], location: Some("s3://b/t/broken".into()) },
                CatalogPartition { values: vec!["2".into()], location: None },
            ])
            .with_page_size(1)
    }

    #[tokio::test]
    async fn unverified_partitions_are_skipped() {
        let catalog = Arc::new(catalog());
        let resolver = KeyResolver::new(catalog.clone(), Arc::new(MemoryObjectStore::new()), TableRef::new("db", "t"));
        assert_eq!(resolver.get_partition_paths().await.unwrap(), vec!["p=1", "p=10"]);
        // one table call, four single-partition pages
        assert_eq!(catalog.get_table_calls(), 1);
        assert_eq!(catalog.get_partitions_calls(), 4);
        assert_eq!(resolver.get_table_info().await.unwrap().input_format, InputFormat::Json);
    }

    #[tokio::test]
    async fn partition_prefix_does_not_leak_into_siblings() {
        let store = Arc::new(MemoryObjectStore::new().with_object("b", "t/p=1/a").with_object("b", "t/p=10/b"));
        let resolver = KeyResolver::new(Arc::new(catalog()), store.clone(), TableRef::new("db", "t"));
        let keys = resolver.resolve_keys(&["p=1".to_string()]).await.unwrap();
        assert_eq!(keys, vec![ObjectKey { bucket: "b".into(), key: "t/p=1/a".into() }]);
        resolver.resolve_keys(&["p=1".to_string()]).await.unwrap();
        assert_eq!(store.list_calls(), 1);
        assert_eq!(resolver.cached_location_count(), 1);
    }

    #[tokio::test]
    async fn empty_listing_is_cached() {
        let store = Arc::new(MemoryObjectStore::new());
        let resolver = KeyResolver::new(Arc::new(catalog()), store.clone(), TableRef::new("db", "t"));
        assert!(resolver.resolve_keys(&["p=10".to_string()]).await.unwrap().is_empty());
        assert!(resolver.resolve_keys(&["p=10".to_string()]).await.unwrap().is_empty());
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn missing_table_and_location() {
        let catalog = MemoryCatalog::new().with_table("db", "nowhere", CatalogTable::default());
        let resolver = KeyResolver::new(Arc::new(catalog), Arc::new(MemoryObjectStore::new()), TableRef::new("db", "nowhere"));
        assert!(matches!(resolver.get_table_info().await, Err(SelectableError::InvalidTableLocation { .. })));
        let resolver = KeyResolver::new(Arc::new(MemoryCatalog::new()), Arc::new(MemoryObjectStore::new()), TableRef::new("db", "t"));
        assert!(matches!(resolver.get_table_info().await, Err(SelectableError::TableNotFound(_))));
    }

    #[tokio::test]
    async fn listing_failure_is_resolver_io() {
        let resolver = KeyResolver::new(Arc::new(catalog()), Arc::new(MemoryObjectStore::new().failing()), TableRef::new("db", "t"));
        assert!(matches!(resolver.resolve_keys(&["p=1".to_string()]).await, Err(SelectableError::ResolverIo(_))));
        assert_eq!(resolver.cached_location_count(), 0);
    }
}
