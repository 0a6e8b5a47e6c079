//! In-memory fact store
//!
//! Keeps facts per entity in insertion order. Used when no database is
//! configured and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use kbqa_core::{FactStore, FactTriple, Result};
use tokio::sync::RwLock;

/// Fact store held entirely in memory
#[derive(Default)]
pub struct InMemoryFactStore {
    facts: RwLock<HashMap<String, Vec<FactTriple>>>,
}

impl InMemoryFactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given facts
    pub fn from_triples(triples: impl IntoIterator<Item = FactTriple>) -> Self {
        let mut facts: HashMap<String, Vec<FactTriple>> = HashMap::new();
        for triple in triples {
            facts.entry(triple.entity.clone()).or_default().push(triple);
        }

        Self {
            facts: RwLock::new(facts),
        }
    }

    /// Total number of facts
    pub async fn len(&self) -> usize {
        self.facts.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn find_by_entity(&self, entity: &str) -> Result<Vec<FactTriple>> {
        Ok(self
            .facts
            .read()
            .await
            .get(entity)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert(&self, triple: &FactTriple) -> Result<()> {
        self.facts
            .write()
            .await
            .entry(triple.entity.clone())
            .or_default()
            .push(triple.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieval_order_is_insertion_order() {
        let store = InMemoryFactStore::from_triples(vec![
            FactTriple::new("北京", "面积", "16410"),
            FactTriple::new("上海", "面积", "6340"),
            FactTriple::new("北京", "人口", "2100万"),
        ]);

        let facts = store.find_by_entity("北京").await.unwrap();
        let attributes: Vec<&str> = facts.iter().map(|f| f.attribute.as_str()).collect();
        assert_eq!(attributes, vec!["面积", "人口"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_empty_not_error() {
        let store = InMemoryFactStore::new();
        assert!(store.find_by_entity("火星").await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_batch() {
        let store = InMemoryFactStore::new();
        let written = store
            .insert_batch(&[
                FactTriple::new("火星", "直径", "6794公里"),
                FactTriple::new("火星", "卫星", "2颗"),
            ])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.find_by_entity("火星").await.unwrap().len(), 2);
    }
}
