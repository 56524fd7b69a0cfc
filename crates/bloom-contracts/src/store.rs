use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Field/value pairs a record must match exactly.
pub type FieldFilter = Map<String, Value>;

/// In-memory key/value table.
///
/// There is no internal locking; whoever owns the store serializes access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentStore {
    payload: Map<String, Value>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn create(&mut self, key: &str, value: Value) {
        self.payload.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Looks up every requested key. The result holds exactly the requested
    /// keys, with `None` for the ones that are not stored.
    pub fn get_many<I, K>(&self, keys: I) -> IndexMap<String, Option<Value>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.payload.get(key).cloned())
            })
            .collect()
    }

    /// Top-level records that are objects and match every pair in `filter`.
    pub fn find_by_fields(&self, filter: &FieldFilter) -> Map<String, Value> {
        filter_rows(&self.payload, filter)
    }

    /// Same as [`ContentStore::find_by_fields`], scoped to the rows of the
    /// nested table stored under `table`. A missing or non-object table
    /// yields no rows.
    pub fn find_by_fields_in(&self, table: &str, filter: &FieldFilter) -> Map<String, Value> {
        self.table(table)
            .map(|rows| filter_rows(rows, filter))
            .unwrap_or_default()
    }

    pub fn table(&self, table: &str) -> Option<&Map<String, Value>> {
        self.payload.get(table).and_then(Value::as_object)
    }

    /// Inserts `value` under `key` inside the nested table `table`, creating
    /// the table when absent. A non-object value under `table` is replaced.
    pub fn insert_into(&mut self, table: &str, key: &str, value: Value) {
        let slot = self
            .payload
            .entry(table.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(rows) = slot {
            rows.insert(key.to_string(), value);
        }
    }

    /// Removes `key` from the nested table `table`. Returns `false` when the
    /// table or the key is absent.
    pub fn remove_from(&mut self, table: &str, key: &str) -> bool {
        self.payload
            .get_mut(table)
            .and_then(Value::as_object_mut)
            .map(|rows| rows.remove(key).is_some())
            .unwrap_or(false)
    }

    pub fn update(&mut self, key: &str, value: Value) -> bool {
        match self.payload.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.payload.remove(key).is_some()
    }
}

pub fn matches_fields(value: &Value, filter: &FieldFilter) -> bool {
    let Some(row) = value.as_object() else {
        return false;
    };
    filter
        .iter()
        .all(|(field, expected)| row.get(field) == Some(expected))
}

fn filter_rows(rows: &Map<String, Value>, filter: &FieldFilter) -> Map<String, Value> {
    rows.iter()
        .filter(|(_, value)| matches_fields(value, filter))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
