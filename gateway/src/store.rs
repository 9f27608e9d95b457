//! Keyed item storage behind the declared tables
//!
//! Items are JSON objects. Each table keeps the key schema it was declared
//! with; an item's key is read from its partition and sort attributes.

use async_trait::async_trait;
use serde_json::{Map, Value};
use stack::resources::{KeyAttribute, Table};
use stack::StackGraph;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

pub type Item = Map<String, Value>;

/// Composite key of an item: partition value and optional sort value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub pk: String,
    pub sk: Option<String>,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: Option<&str>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.map(str::to_string),
        }
    }
}

/// Storage contract of a table
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Insert or replace the item under its key
    async fn put(&self, table: &str, item: Item) -> GatewayResult<()>;

    async fn get(&self, table: &str, key: &ItemKey) -> GatewayResult<Option<Item>>;

    /// Remove the item, returning it if it existed
    async fn delete(&self, table: &str, key: &ItemKey) -> GatewayResult<Option<Item>>;

    /// Every item of the table in key order
    async fn scan(&self, table: &str) -> GatewayResult<Vec<Item>>;
}

struct MemoryTable {
    partition_key: KeyAttribute,
    sort_key: Option<KeyAttribute>,
    items: BTreeMap<ItemKey, Item>,
}

impl MemoryTable {
    fn key_of(&self, table: &str, item: &Item) -> GatewayResult<ItemKey> {
        let pk = key_value(table, item, &self.partition_key)?;
        let sk = match &self.sort_key {
            Some(attribute) => Some(key_value(table, item, attribute)?),
            None => None,
        };
        Ok(ItemKey { pk, sk })
    }

    fn check_key(&self, table: &str, key: &ItemKey) -> GatewayResult<()> {
        if key.sk.is_some() != self.sort_key.is_some() {
            return Err(GatewayError::Table(format!(
                "Key does not match the key schema of table {}",
                table
            )));
        }
        Ok(())
    }
}

fn key_value(table: &str, item: &Item, attribute: &KeyAttribute) -> GatewayResult<String> {
    match item.get(&attribute.name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(GatewayError::Table(format!(
            "Key attribute {} of table {} must be a string or number",
            attribute.name, table
        ))),
        None => Err(GatewayError::Table(format!(
            "Item is missing key attribute {} of table {}",
            attribute.name, table
        ))),
    }
}

/// In-memory table store
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with one empty table per table declared in the graph
    pub fn from_graph(graph: &StackGraph) -> Self {
        let tables = graph
            .tables()
            .map(|(_, table)| (table.table_name.clone(), Self::empty(table)))
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }

    fn empty(table: &Table) -> MemoryTable {
        MemoryTable {
            partition_key: table.partition_key.clone(),
            sort_key: table.sort_key.clone(),
            items: BTreeMap::new(),
        }
    }

    pub async fn create_table(&self, table: &Table) {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.table_name.clone())
            .or_insert_with(|| Self::empty(table));
    }

    pub async fn len(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map(|t| t.items.len()).unwrap_or_default()
    }
}

fn no_such_table(table: &str) -> GatewayError {
    GatewayError::Table(format!("Table {} does not exist", table))
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn put(&self, table: &str, item: Item) -> GatewayResult<()> {
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
        let key = target.key_of(table, &item)?;
        debug!("Put item {:?} into {}", key, table);
        target.items.insert(key, item);
        Ok(())
    }

    async fn get(&self, table: &str, key: &ItemKey) -> GatewayResult<Option<Item>> {
        let tables = self.tables.read().await;
        let target = tables.get(table).ok_or_else(|| no_such_table(table))?;
        target.check_key(table, key)?;
        Ok(target.items.get(key).cloned())
    }

    async fn delete(&self, table: &str, key: &ItemKey) -> GatewayResult<Option<Item>> {
        let mut tables = self.tables.write().await;
        let target = tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
        target.check_key(table, key)?;
        Ok(target.items.remove(key))
    }

    async fn scan(&self, table: &str) -> GatewayResult<Vec<Item>> {
        let tables = self.tables.read().await;
        let target = tables.get(table).ok_or_else(|| no_such_table(table))?;
        Ok(target.items.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        Table {
            table_name: "items".to_string(),
            partition_key: KeyAttribute::string("pk"),
            sort_key: Some(KeyAttribute::string("sk")),
        }
    }

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryTableStore::new();
        store.create_table(&table()).await;

        store
            .put("items", item(json!({"pk": "a", "sk": "1", "n": 1})))
            .await
            .unwrap();
        let key = ItemKey::new("a", Some("1"));
        let fetched = store.get("items", &key).await.unwrap().unwrap();
        assert_eq!(fetched["n"], json!(1));

        let removed = store.delete("items", &key).await.unwrap();
        assert!(removed.is_some());
        assert!(store.get("items", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_same_key() {
        let store = MemoryTableStore::new();
        store.create_table(&table()).await;
        store
            .put("items", item(json!({"pk": "a", "sk": "1", "v": "old"})))
            .await
            .unwrap();
        store
            .put("items", item(json!({"pk": "a", "sk": "1", "v": "new"})))
            .await
            .unwrap();
        assert_eq!(store.len("items").await, 1);
    }

    #[tokio::test]
    async fn test_scan_in_key_order() {
        let store = MemoryTableStore::new();
        store.create_table(&table()).await;
        for (pk, sk) in [("b", "1"), ("a", "2"), ("a", "1")] {
            store
                .put("items", item(json!({"pk": pk, "sk": sk})))
                .await
                .unwrap();
        }
        let items = store.scan("items").await.unwrap();
        let keys: Vec<_> = items
            .iter()
            .map(|i| format!("{}/{}", i["pk"].as_str().unwrap(), i["sk"].as_str().unwrap()))
            .collect();
        assert_eq!(keys, vec!["a/1", "a/2", "b/1"]);
    }

    #[tokio::test]
    async fn test_missing_key_attribute_rejected() {
        let store = MemoryTableStore::new();
        store.create_table(&table()).await;
        let err = store
            .put("items", item(json!({"pk": "a"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sk"));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = MemoryTableStore::new();
        assert!(store.scan("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_from_graph_creates_declared_tables() {
        let graph = stack::blueprint::synthesize(stack::StackConfig::default()).unwrap();
        let store = MemoryTableStore::from_graph(&graph);
        let (_, table) = graph.tables().next().unwrap();
        assert!(store.scan(&table.table_name).await.unwrap().is_empty());
    }
}
