//! In-memory content store.
//!
//! Thread-safe reference implementation of [`ContentStore`] for embedded use
//! and tests. Strict schemas are enforced on `put`; percolation evaluates
//! every standing query registered for the document's type.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use crate::query::Query;
use crate::schema::CompiledSchema;
use crate::store::traits::{ContentStore, Hit, Page, SearchHits, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct Percolator {
    query: Query,
    type_names: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct IndexState {
    schemas: HashMap<String, CompiledSchema>,
    docs: HashMap<String, BTreeMap<String, JsonValue>>,
    percolators: BTreeMap<String, Percolator>,
    percolators_by_type: HashMap<String, BTreeSet<String>>,
}

impl IndexState {
    fn unindex_percolator(&mut self, id: &str) -> bool {
        let Some(prev) = self.percolators.remove(id) else {
            return false;
        };
        for type_name in &prev.type_names {
            if let Some(ids) = self.percolators_by_type.get_mut(type_name) {
                ids.remove(id);
                if ids.is_empty() {
                    self.percolators_by_type.remove(type_name);
                }
            }
        }
        true
    }

    fn page_of<'a>(
        docs: impl Iterator<Item = (&'a String, &'a JsonValue)>,
        page: Page,
    ) -> SearchHits {
        let mut total = 0;
        let mut hits = Vec::new();
        for (id, source) in docs {
            if total >= page.from && hits.len() < page.size {
                hits.push(Hit {
                    id: id.clone(),
                    source: source.clone(),
                });
            }
            total += 1;
        }
        SearchHits { total, hits }
    }
}

/// In-memory document index.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    state: RwLock<Option<IndexState>>,
}

impl InMemoryContentStore {
    /// Creates a store without an index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with its index already created.
    #[must_use]
    pub fn open() -> Self {
        Self {
            state: RwLock::new(Some(IndexState::default())),
        }
    }

    /// Number of registered standing queries.
    pub fn percolator_count(&self) -> Result<usize, StorageError> {
        self.read("percolator_count", |s| Ok(s.percolators.len()))
    }

    fn read<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&IndexState) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.state.read().map_err(|_| lock_err(context))?;
        guard.as_ref().map_or(Err(StorageError::IndexNotFound), f)
    }

    fn write<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&mut IndexState) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.state.write().map_err(|_| lock_err(context))?;
        guard.as_mut().map_or(Err(StorageError::IndexNotFound), f)
    }
}

impl ContentStore for InMemoryContentStore {
    fn create_index(&self) -> Result<(), StorageError> {
        let mut guard = self.state.write().map_err(|_| lock_err("create_index"))?;
        if guard.is_some() {
            return Err(StorageError::IndexExists);
        }
        *guard = Some(IndexState::default());
        Ok(())
    }

    fn delete_index(&self) -> Result<bool, StorageError> {
        let mut guard = self.state.write().map_err(|_| lock_err("delete_index"))?;
        Ok(guard.take().is_some())
    }

    fn index_exists(&self) -> Result<bool, StorageError> {
        let guard = self.state.read().map_err(|_| lock_err("index_exists"))?;
        Ok(guard.is_some())
    }

    fn set_schema(&self, type_name: &str, schema: &CompiledSchema) -> Result<(), StorageError> {
        self.write("set_schema", |s| {
            s.schemas.insert(type_name.to_string(), schema.clone());
            Ok(())
        })
    }

    fn drop_schema(&self, type_name: &str) -> Result<bool, StorageError> {
        self.write("drop_schema", |s| Ok(s.schemas.remove(type_name).is_some()))
    }

    fn type_names(&self) -> Result<Vec<String>, StorageError> {
        self.read("type_names", |s| {
            let mut names: Vec<String> = s.schemas.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn put(&self, type_name: &str, id: &str, doc: JsonValue) -> Result<(), StorageError> {
        self.write("put", |s| {
            if let Some(schema) = s.schemas.get(type_name) {
                schema
                    .check_strict(&doc)
                    .map_err(|field| StorageError::SchemaViolation {
                        type_name: type_name.to_string(),
                        field,
                    })?;
            }
            s.docs
                .entry(type_name.to_string())
                .or_default()
                .insert(id.to_string(), doc);
            Ok(())
        })
    }

    fn get(&self, type_name: &str, id: &str) -> Result<Option<JsonValue>, StorageError> {
        self.read("get", |s| {
            Ok(s.docs.get(type_name).and_then(|docs| docs.get(id)).cloned())
        })
    }

    fn delete(&self, type_name: &str, id: &str) -> Result<bool, StorageError> {
        self.write("delete", |s| {
            Ok(s
                .docs
                .get_mut(type_name)
                .is_some_and(|docs| docs.remove(id).is_some()))
        })
    }

    fn search_all(&self, type_name: &str, page: Page) -> Result<SearchHits, StorageError> {
        self.read("search_all", |s| {
            Ok(s.docs.get(type_name).map_or_else(SearchHits::default, |docs| {
                IndexState::page_of(docs.iter(), page)
            }))
        })
    }

    fn search_by_term(
        &self,
        type_name: &str,
        field: &str,
        value: &JsonValue,
        page: Page,
    ) -> Result<SearchHits, StorageError> {
        let query = Query::term(field, value.clone());
        self.read("search_by_term", |s| {
            Ok(s.docs.get(type_name).map_or_else(SearchHits::default, |docs| {
                IndexState::page_of(docs.iter().filter(|(_, doc)| query.matches(doc)), page)
            }))
        })
    }

    fn register_percolation_query(
        &self,
        id: &str,
        query: &Query,
        type_names: &[String],
    ) -> Result<String, StorageError> {
        if type_names.is_empty() {
            return Err(StorageError::Backend(format!(
                "percolation query '{id}' is not restricted to any type"
            )));
        }
        self.write("register_percolation_query", |s| {
            s.unindex_percolator(id);
            let type_names: BTreeSet<String> = type_names.iter().cloned().collect();
            for type_name in &type_names {
                s.percolators_by_type
                    .entry(type_name.clone())
                    .or_default()
                    .insert(id.to_string());
            }
            s.percolators.insert(
                id.to_string(),
                Percolator {
                    query: query.clone(),
                    type_names,
                },
            );
            Ok(id.to_string())
        })
    }

    fn delete_percolation_query(&self, id: &str) -> Result<bool, StorageError> {
        self.write("delete_percolation_query", |s| Ok(s.unindex_percolator(id)))
    }

    fn percolate(&self, type_name: &str, doc: &JsonValue) -> Result<Vec<String>, StorageError> {
        self.read("percolate", |s| {
            let Some(ids) = s.percolators_by_type.get(type_name) else {
                return Ok(Vec::new());
            };
            Ok(ids
                .iter()
                .filter(|id| {
                    s.percolators
                        .get(id.as_str())
                        .is_some_and(|p| p.query.matches(doc))
                })
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile, FieldType, Mapping};
    use serde_json::json;

    #[test]
    fn operations_require_an_index() {
        let store = InMemoryContentStore::new();
        assert!(!store.index_exists().unwrap());
        assert_eq!(store.get("t", "1"), Err(StorageError::IndexNotFound));

        store.create_index().unwrap();
        assert_eq!(store.create_index(), Err(StorageError::IndexExists));
        store.put("t", "1", json!({"a": 1})).unwrap();
        assert!(store.delete_index().unwrap());
        assert!(!store.delete_index().unwrap());
        assert_eq!(store.put("t", "1", json!({})), Err(StorageError::IndexNotFound));
    }

    #[test]
    fn crud_and_paging() {
        let store = InMemoryContentStore::open();
        for i in 0..5 {
            store.put("t", &format!("id{i}"), json!({"n": i})).unwrap();
        }
        assert_eq!(store.get("t", "id3").unwrap(), Some(json!({"n": 3})));
        assert_eq!(store.get("t", "nope").unwrap(), None);
        assert_eq!(store.get("other", "id3").unwrap(), None);

        let page = store.search_all("t", Page::new(1, 2)).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(
            page.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            vec!["id1", "id2"]
        );

        let by_term = store.search_by_term("t", "n", &json!(4), Page::first(10)).unwrap();
        assert_eq!(by_term.total, 1);
        assert_eq!(by_term.hits[0].id, "id4");

        assert!(store.delete("t", "id4").unwrap());
        assert!(!store.delete("t", "id4").unwrap());
        assert_eq!(store.search_all("t", Page::first(10)).unwrap().total, 4);
        assert_eq!(store.search_all("empty", Page::first(10)).unwrap().total, 0);
    }

    #[test]
    fn strict_schema_rejects_undeclared_fields() {
        let store = InMemoryContentStore::open();
        let schema = compile(&Mapping::new().field("num", FieldType::Integer));
        store.set_schema("ET", &schema).unwrap();
        assert_eq!(store.type_names().unwrap(), vec!["ET".to_string()]);

        store.put("ET", "1", json!({"num": 1})).unwrap();
        assert_eq!(
            store.put("ET", "2", json!({"num": 1, "extra": true})),
            Err(StorageError::SchemaViolation {
                type_name: "ET".to_string(),
                field: "extra".to_string()
            })
        );

        assert!(store.drop_schema("ET").unwrap());
        assert!(!store.drop_schema("ET").unwrap());
        store.put("ET", "2", json!({"num": 1, "extra": true})).unwrap();
    }

    #[test]
    fn percolation_respects_type_restriction_and_replacement() {
        let store = InMemoryContentStore::open();
        let types = vec!["A".to_string()];
        store
            .register_percolation_query("t1", &Query::term("num", 17), &types)
            .unwrap();
        store
            .register_percolation_query("t2", &Query::match_all(), &["A".to_string(), "B".to_string()])
            .unwrap();

        assert_eq!(store.percolate("A", &json!({"num": 17})).unwrap(), vec!["t1", "t2"]);
        assert_eq!(store.percolate("A", &json!({"num": 18})).unwrap(), vec!["t2"]);
        assert_eq!(store.percolate("B", &json!({"num": 17})).unwrap(), vec!["t2"]);
        assert!(store.percolate("C", &json!({"num": 17})).unwrap().is_empty());

        store
            .register_percolation_query("t1", &Query::term("num", 18), &types)
            .unwrap();
        assert_eq!(store.percolator_count().unwrap(), 2);
        assert_eq!(store.percolate("A", &json!({"num": 18})).unwrap(), vec!["t1", "t2"]);

        assert!(store.delete_percolation_query("t2").unwrap());
        assert!(!store.delete_percolation_query("t2").unwrap());
        assert!(store.percolate("B", &json!({})).unwrap().is_empty());
        assert!(store
            .register_percolation_query("t3", &Query::match_all(), &[])
            .is_err());
    }
}
