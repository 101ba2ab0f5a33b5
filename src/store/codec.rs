//! Cache payload encoding.
//!
//! A `LocationRecord` is stored as a tree of plain JSON objects. Every map,
//! the root included, is wrapped as `{"__isMap": true, "translation": ..., "data": {...}}`
//! so that a decoder can tell it apart from a leaf string. A map's own
//! translated name sits beside the marker, never among its entries, so any
//! province or city name round-trips:
//!
//! ```text
//! {
//!   "__isMap": true,
//!   "translation": "澳大利亚",
//!   "data": {
//!     "Queensland": { "__isMap": true, "translation": "昆士兰州", "data": { "Brisbane": "布里斯班" } }
//!   }
//! }
//! ```

use std::collections::HashMap;

use serde_json::{
    Map,
    Value,
};
use thiserror::Error;

use crate::types::{
    LocationRecord,
    ProvinceRecord,
};

/// Marker field on a wrapped map.
pub const MAP_MARKER: &str = "__isMap";
/// Field holding the entries of a wrapped map.
pub const MAP_DATA: &str = "data";
/// Field holding a wrapped map's own translated name.
pub const TRANSLATION_KEY: &str = "translation";

/// Errors raised when a stored payload cannot be turned back into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload root must be a wrapped map")]
    InvalidRoot,
    #[error("unexpected value at '{0}': expected a string or a wrapped map")]
    UnexpectedValue(String),
    #[error("unexpected nested map at '{0}': cities must be strings")]
    TooDeep(String),
    #[error("expected a wrapped map at '{0}'")]
    ExpectedMap(String),
}

/// A map of the generic tree: its own translated name plus its entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapNode {
    pub translation: String,
    pub entries: HashMap<String, TreeNode>,
}

/// A node of the generic nested-map tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Leaf(String),
    Map(MapNode),
}

/// Encodes a record into its stored JSON form.
#[must_use]
pub fn encode(record: &LocationRecord) -> Value {
    wrap_map(&record_to_tree(record))
}

/// Decodes a stored payload back into a record for `country`.
///
/// # Errors
/// Fails if the payload is not a depth-2 tree of strings.
pub fn decode(country: &str, payload: &Value) -> Result<LocationRecord, CodecError> {
    let root = match payload {
        Value::Object(object) if is_wrapped_map(object) => unwrap_map(object, "")?,
        _ => return Err(CodecError::InvalidRoot),
    };
    tree_to_record(country, root)
}

/// Wraps a map with the marker, its own name and its flattened entries.
#[must_use]
pub fn wrap_map(node: &MapNode) -> Value {
    let mut wrapper = Map::new();
    wrapper.insert(MAP_MARKER.to_string(), Value::Bool(true));
    wrapper.insert(TRANSLATION_KEY.to_string(), Value::String(node.translation.clone()));
    wrapper.insert(MAP_DATA.to_string(), Value::Object(map_to_object(&node.entries)));
    Value::Object(wrapper)
}

/// Flattens map entries into a JSON object, wrapping every nested map.
#[must_use]
pub fn map_to_object(entries: &HashMap<String, TreeNode>) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, node)| {
            let value = match node {
                TreeNode::Leaf(text) => Value::String(text.clone()),
                TreeNode::Map(inner) => wrap_map(inner),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Rebuilds map entries from their flattened form.
///
/// # Errors
/// Fails on values that are neither strings nor wrapped maps.
pub fn object_to_map(
    object: &Map<String, Value>,
    prefix: &str,
) -> Result<HashMap<String, TreeNode>, CodecError> {
    let mut entries = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let path = join_path(prefix, key);
        let node = match value {
            Value::String(text) => TreeNode::Leaf(text.clone()),
            Value::Object(inner) if is_wrapped_map(inner) => TreeNode::Map(unwrap_map(inner, &path)?),
            _ => return Err(CodecError::UnexpectedValue(path)),
        };
        entries.insert(key.clone(), node);
    }
    Ok(entries)
}

/// ラッパーから `MapNode` を取り出す（翻訳名がなければ空文字列）
fn unwrap_map(wrapper: &Map<String, Value>, path: &str) -> Result<MapNode, CodecError> {
    let translation = match wrapper.get(TRANSLATION_KEY) {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(_) => return Err(CodecError::UnexpectedValue(join_path(path, TRANSLATION_KEY))),
    };
    let Some(Value::Object(data)) = wrapper.get(MAP_DATA) else {
        return Err(CodecError::UnexpectedValue(path.to_string()));
    };
    Ok(MapNode { translation, entries: object_to_map(data, path)? })
}

/// オブジェクトがマップのラッパーかどうか
fn is_wrapped_map(object: &Map<String, Value>) -> bool {
    matches!(object.get(MAP_MARKER), Some(Value::Bool(true)))
}

/// エラー表示用のドット区切りパス
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() { key.to_string() } else { format!("{prefix}.{key}") }
}

/// Converts a record into the generic tree used for storage.
#[must_use]
pub fn record_to_tree(record: &LocationRecord) -> MapNode {
    let entries = record
        .provinces
        .iter()
        .map(|(name, province)| {
            let cities = province
                .cities
                .iter()
                .map(|(city, translated)| (city.clone(), TreeNode::Leaf(translated.clone())))
                .collect();
            let node = MapNode { translation: province.translated_name.clone(), entries: cities };
            (name.clone(), TreeNode::Map(node))
        })
        .collect();
    MapNode { translation: record.translated_name.clone(), entries }
}

/// Converts the generic tree back into a record.
///
/// # Errors
/// Fails if a province is stored as a leaf or a city as a map.
pub fn tree_to_record(country: &str, root: MapNode) -> Result<LocationRecord, CodecError> {
    let mut record = LocationRecord::new(country);
    record.translated_name = root.translation;
    for (key, node) in root.entries {
        let TreeNode::Map(province) = node else {
            return Err(CodecError::ExpectedMap(key));
        };
        let province = map_to_province(&key, province)?;
        record.provinces.insert(key, province);
    }
    Ok(record)
}

/// 省のマップを `ProvinceRecord` に変換
fn map_to_province(province: &str, node: MapNode) -> Result<ProvinceRecord, CodecError> {
    let mut record = ProvinceRecord { translated_name: node.translation, cities: HashMap::new() };
    for (city, value) in node.entries {
        match value {
            TreeNode::Leaf(text) => {
                record.cities.insert(city, text);
            }
            TreeNode::Map(_) => return Err(CodecError::TooDeep(join_path(province, &city))),
        }
    }
    Ok(record)
}
