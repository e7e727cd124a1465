//! Store descriptors and the schema registry.
//!
//! Descriptors are declared once at startup, either programmatically through
//! [`DataStoreDescriptor::builder`] or from JSON:
//!
//! ```json
//! {
//!   "exampleOneDb": {
//!     "version": 1,
//!     "storeName": "objectStore",
//!     "keyConfig": { "keyPath": "id", "autoIncrement": true },
//!     "indexes": [
//!       ["dateTime", "dateTime", { "unique": false }],
//!       { "indexName": "record", "keyPath": "record", "options": { "unique": false } }
//!     ]
//!   }
//! }
//! ```
//!
//! `optionalParameters` is accepted as an alias of `keyConfig`. Entries are validated
//! at load; an invalid entry stays in the registry together with its reason, so a
//! later operation against it fails with `BadConfiguration` instead of a panic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Primary key configuration of an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default)]
    pub auto_increment: bool,
}

impl KeyConfig {
    /// Key path, treating an empty string as absent.
    pub fn key_path(&self) -> Option<&str> {
        self.key_path.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub unique: bool,
}

/// Declared secondary index. Entries with an empty or missing name or key path are
/// kept as declared but skipped when the schema is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub index_name: Option<String>,
    pub key_path: Option<String>,
    #[serde(default)]
    pub options: IndexOptions,
}

impl IndexDescriptor {
    pub fn new(index_name: &str, key_path: &str, unique: bool) -> Self {
        Self {
            index_name: Some(index_name.to_string()),
            key_path: Some(key_path.to_string()),
            options: IndexOptions { unique },
        }
    }

    /// The index as it will be created, or `None` if it must be skipped.
    pub fn spec(&self) -> Option<IndexSpec> {
        let name = self.index_name.as_deref().filter(|s| !s.is_empty())?;
        let key_path = self.key_path.as_deref().filter(|s| !s.is_empty())?;
        Some(IndexSpec {
            name: name.to_string(),
            key_path: key_path.to_string(),
            unique: self.options.unique,
        })
    }
}

/// A validated index ready to be created by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

/// Static declaration of one named data store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStoreDescriptor {
    pub name: String,
    pub version: u32,
    pub store_name: String,
    pub key_config: KeyConfig,
    pub indexes: Vec<IndexDescriptor>,
}

impl DataStoreDescriptor {
    pub fn builder(store_name: &str) -> DescriptorBuilder {
        DescriptorBuilder {
            version: 1,
            store_name: store_name.to_string(),
            key_config: KeyConfig::default(),
            indexes: Vec::new(),
        }
    }

    /// Indexes that will actually be created.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes.iter().filter_map(IndexDescriptor::spec).collect()
    }
}

/// Builder for [`DataStoreDescriptor`]. The registry name is assigned on
/// registration.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    version: u32,
    store_name: String,
    key_config: KeyConfig,
    indexes: Vec<IndexDescriptor>,
}

impl DescriptorBuilder {
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn key_path(mut self, key_path: &str) -> Self {
        self.key_config.key_path = Some(key_path.to_string());
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.key_config.auto_increment = auto_increment;
        self
    }

    pub fn index(mut self, index_name: &str, key_path: &str, unique: bool) -> Self {
        self.indexes
            .push(IndexDescriptor::new(index_name, key_path, unique));
        self
    }

    pub fn build(self) -> DataStoreDescriptor {
        DataStoreDescriptor {
            name: String::new(),
            version: self.version,
            store_name: self.store_name,
            key_config: self.key_config,
            indexes: self.indexes,
        }
    }
}

/// Descriptor as it appears in configuration, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    version: Option<Value>,
    store_name: Option<Value>,
    #[serde(alias = "optionalParameters")]
    key_config: Option<Value>,
    #[serde(default)]
    indexes: Vec<Value>,
}

impl RawDescriptor {
    fn validate(self, name: &str) -> std::result::Result<DataStoreDescriptor, String> {
        let version = self.version.ok_or("missing 'version'")?;
        let version = parse_version(&version)?;

        let store_name = match self.store_name {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(_) => return Err("'storeName' must be a non-empty string".into()),
            None => return Err("missing 'storeName'".into()),
        };

        let key_config = match self.key_config {
            Some(value @ Value::Object(_)) => serde_json::from_value::<KeyConfig>(value)
                .map_err(|e| format!("invalid 'keyConfig': {}", e))?,
            Some(_) => return Err("'keyConfig' must be an object".into()),
            None => return Err("missing 'keyConfig'".into()),
        };

        let indexes = self
            .indexes
            .into_iter()
            .map(parse_index)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(DataStoreDescriptor {
            name: name.to_string(),
            version,
            store_name,
            key_config,
            indexes,
        })
    }
}

/// Accepts whole numbers and numeric strings, like `Number(...)` coercion.
fn parse_version(value: &Value) -> std::result::Result<u32, String> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("'version' is not a number: {}", value))?;

    if number.fract() != 0.0 || number < 1.0 || number > u32::MAX as f64 {
        return Err(format!(
            "'version' must be a positive whole number, got {}",
            value
        ));
    }
    Ok(number as u32)
}

/// Index entries are either `[name, keyPath, options?]` or an object.
fn parse_index(value: Value) -> std::result::Result<IndexDescriptor, String> {
    match value {
        Value::Array(parts) => {
            let text = |i: usize| parts.get(i).and_then(Value::as_str).map(str::to_string);
            let options = match parts.get(2) {
                Some(options @ Value::Object(_)) => {
                    serde_json::from_value::<IndexOptions>(options.clone())
                        .map_err(|e| format!("invalid index options: {}", e))?
                }
                _ => IndexOptions::default(),
            };
            Ok(IndexDescriptor {
                index_name: text(0),
                key_path: text(1),
                options,
            })
        }
        value @ Value::Object(_) => {
            serde_json::from_value(value).map_err(|e| format!("invalid index entry: {}", e))
        }
        other => Err(format!("invalid index entry: {}", other)),
    }
}

/// Immutable set of store descriptors keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entries: BTreeMap<String, std::result::Result<DataStoreDescriptor, String>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under `name`.
    pub fn with_store(mut self, name: &str, mut descriptor: DataStoreDescriptor) -> Self {
        descriptor.name = name.to_string();
        let entry = if descriptor.version == 0 {
            Err("'version' must be a positive whole number, got 0".to_string())
        } else if descriptor.store_name.is_empty() {
            Err("'storeName' must be a non-empty string".to_string())
        } else {
            Ok(descriptor)
        };
        self.entries.insert(name.to_string(), entry);
        self
    }

    /// Load descriptors from a JSON document (see module docs).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(StoreError::Serialization(
                "schema declaration must be a JSON object".into(),
            ));
        };

        let mut entries = BTreeMap::new();
        for (name, raw) in map {
            let entry = match serde_json::from_value::<RawDescriptor>(raw) {
                Ok(raw) => raw.validate(&name),
                Err(e) => Err(e.to_string()),
            };
            if let Err(reason) = &entry {
                tracing::warn!(store = %name, %reason, "invalid store descriptor");
            }
            entries.insert(name, entry);
        }
        Ok(Self { entries })
    }

    /// Whether `name` is registered with a valid descriptor.
    pub fn validate(&self, name: &str) -> bool {
        self.descriptor(name).is_ok()
    }

    /// The validated descriptor for `name`.
    pub fn descriptor(&self, name: &str) -> Result<&DataStoreDescriptor> {
        match self.entries.get(name) {
            Some(Ok(descriptor)) => Ok(descriptor),
            Some(Err(reason)) => Err(StoreError::BadConfiguration {
                name: name.to_string(),
                reason: reason.clone(),
            }),
            None => Err(StoreError::BadConfiguration {
                name: name.to_string(),
                reason: "not declared".to_string(),
            }),
        }
    }

    /// Registered names, valid or not.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXAMPLE: &str = r#"{
        "exampleOneDb": {
            "version": 1,
            "storeName": "objectStore",
            "optionalParameters": {"keyPath": "id", "autoIncrement": true},
            "indexes": [
                ["dateTime", "dateTime", {"unique": false}],
                ["record", "record", {"unique": false}]
            ]
        }
    }"#;

    #[test]
    fn test_load_tuple_indexes() {
        let registry = SchemaRegistry::from_json_str(EXAMPLE).unwrap();
        let descriptor = registry.descriptor("exampleOneDb").unwrap();

        assert_eq!(descriptor.name, "exampleOneDb");
        assert_eq!(descriptor.version, 1);
        assert_eq!(descriptor.store_name, "objectStore");
        assert_eq!(descriptor.key_config.key_path(), Some("id"));
        assert!(descriptor.key_config.auto_increment);
        assert_eq!(
            descriptor.index_specs(),
            vec![
                IndexSpec {
                    name: "dateTime".into(),
                    key_path: "dateTime".into(),
                    unique: false
                },
                IndexSpec {
                    name: "record".into(),
                    key_path: "record".into(),
                    unique: false
                },
            ]
        );
    }

    #[test]
    fn test_load_object_indexes_and_string_version() {
        let registry = SchemaRegistry::from_json_str(
            r#"{"notes": {
                "version": "3",
                "storeName": "notes",
                "keyConfig": {},
                "indexes": [{"indexName": "slug", "keyPath": "slug", "options": {"unique": true}}]
            }}"#,
        )
        .unwrap();

        let descriptor = registry.descriptor("notes").unwrap();
        assert_eq!(descriptor.version, 3);
        assert_eq!(descriptor.key_config, KeyConfig::default());
        assert!(descriptor.index_specs()[0].unique);
    }

    #[test]
    fn test_invalid_index_entries_are_skipped() {
        let registry = SchemaRegistry::from_json_str(
            r#"{"s": {
                "version": 1,
                "storeName": "s",
                "keyConfig": {"keyPath": "id"},
                "indexes": [["", "path"], ["name"], ["ok", "ok"]]
            }}"#,
        )
        .unwrap();

        let specs = registry.descriptor("s").unwrap().index_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "ok");
    }

    #[test]
    fn test_validate_failures() {
        let registry = SchemaRegistry::from_json_str(
            r#"{
                "noVersion": {"storeName": "s", "keyConfig": {}},
                "badVersion": {"version": "abc", "storeName": "s", "keyConfig": {}},
                "zeroVersion": {"version": 0, "storeName": "s", "keyConfig": {}},
                "noStore": {"version": 1, "keyConfig": {}},
                "badKeyConfig": {"version": 1, "storeName": "s", "keyConfig": "id"},
                "noKeyConfig": {"version": 1, "storeName": "s"}
            }"#,
        )
        .unwrap();

        for name in [
            "noVersion",
            "badVersion",
            "zeroVersion",
            "noStore",
            "badKeyConfig",
            "noKeyConfig",
            "undeclared",
        ] {
            assert!(!registry.validate(name), "{} should be invalid", name);
            assert!(matches!(
                registry.descriptor(name),
                Err(StoreError::BadConfiguration { .. })
            ));
        }
    }

    #[test]
    fn test_builder_registration() {
        let registry = SchemaRegistry::new()
            .with_store(
                "events",
                DataStoreDescriptor::builder("events")
                    .version(2)
                    .key_path("id")
                    .index("kind", "kind", false)
                    .build(),
            )
            .with_store(
                "broken",
                DataStoreDescriptor::builder("broken").version(0).build(),
            );

        assert!(registry.validate("events"));
        assert!(!registry.validate("broken"));
        assert_eq!(registry.descriptor("events").unwrap().name, "events");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["broken", "events"]);
    }
}
