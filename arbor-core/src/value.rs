//! Dynamic Value Model
//!
//! A [`Value`] is the raw data the engine observes: scalars plus two
//! composite kinds, insertion-ordered maps and lists. Composite variants
//! are `Arc`-shared cells, so cloning a `Value` clones a *handle* and two
//! clones of the same composite compare identical. That pointer identity is
//! what the interception layer uses for no-op detection and what the
//! identity registry keys on.
//!
//! # Observation state lives in the cell
//!
//! Each composite cell carries a `OnceLock` slot for its observation state
//! (event bus plus pipe table). The slot is empty until the value is
//! wrapped for the first time, and from then on the bus lives exactly as
//! long as the cell: there is no registry to clean up and dropping the last
//! handle reclaims everything.
//!
//! # Equality
//!
//! `PartialEq` on `Value` is *identity* equality: scalars compare by value,
//! composites by pointer. Two structurally equal maps built independently
//! are **not** equal. This mirrors the host-language `===` the engine's
//! no-op suppression is specified against (note that `Float(NAN)` is not
//! equal to itself, as expected).

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::observe::node::NodeState;

/// A single step in a change-event path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named field of a map.
    Field(String),
    /// A position in a list.
    Index(usize),
    /// The synthetic length field of a list, reported by structural
    /// mutations (`push`, `splice`, ...).
    Length,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(i) => write!(f, "{i}"),
            Key::Length => f.write_str("length"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// The field names from a root value down to a mutation site.
///
/// Short paths (the common case) stay inline.
pub type Path = SmallVec<[Key; 4]>;

/// Shared storage for an observed map.
pub struct MapCell {
    pub(crate) entries: RwLock<IndexMap<String, Value>>,
    pub(crate) node: OnceLock<Arc<NodeState>>,
}

/// Shared storage for an observed list.
pub struct ListCell {
    pub(crate) items: RwLock<Vec<Value>>,
    pub(crate) node: OnceLock<Arc<NodeState>>,
}

/// A dynamic value: scalar, map, or list.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(Arc<MapCell>),
    List(Arc<ListCell>),
}

impl Value {
    /// Create an empty map value.
    pub fn map() -> Self {
        Value::Map(Arc::new(MapCell {
            entries: RwLock::new(IndexMap::new()),
            node: OnceLock::new(),
        }))
    }

    /// Create a map value from `(field, value)` pairs, preserving order.
    pub fn map_from<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<IndexMap<_, _>>();
        Value::Map(Arc::new(MapCell {
            entries: RwLock::new(entries),
            node: OnceLock::new(),
        }))
    }

    /// Create an empty list value.
    pub fn list() -> Self {
        Value::List(Arc::new(ListCell {
            items: RwLock::new(Vec::new()),
            node: OnceLock::new(),
        }))
    }

    /// Create a list value from its items.
    pub fn list_from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Value::List(Arc::new(ListCell {
            items: RwLock::new(items.into_iter().collect()),
            node: OnceLock::new(),
        }))
    }

    /// Whether this value is a map or a list.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    /// A short name for the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Map(_) => "map",
            Value::List(_) => "list",
        }
    }

    /// The observation state for this value, if it was ever wrapped.
    pub(crate) fn node(&self) -> Option<Arc<NodeState>> {
        match self {
            Value::Map(cell) => cell.node.get().cloned(),
            Value::List(cell) => cell.node.get().cloned(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Identity equality. See the module docs.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Map(cell) => {
                let entries = cell.entries.read().expect("map lock poisoned");
                f.debug_map().entries(entries.iter()).finish()
            }
            Value::List(cell) => {
                let items = cell.items.read().expect("list lock poisoned");
                f.debug_list().entries(items.iter()).finish()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

// ----------------------------------------------------------------------------
// JSON interop
// ----------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::list_from(items.into_iter().map(Value::from))
            }
            serde_json::Value::Object(entries) => {
                Value::map_from(entries.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

/// Snapshot serialization of the tree rooted here.
///
/// Cyclic value graphs are not supported and will recurse.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Map(cell) => {
                let entries = cell.entries.read().expect("map lock poisoned");
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::List(cell) => {
                let items = cell.items.read().expect("list lock poisoned");
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON-like value")
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Value, E> {
        if let Ok(i) = i64::try_from(u) {
            Ok(Value::Int(i))
        } else {
            Ok(Value::Float(u as f64))
        }
    }

    fn visit_f64<E: de::Error>(self, x: f64) -> Result<Value, E> {
        Ok(Value::Float(x))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::Str(s.to_owned()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::Str(s))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::list_from(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.push((key, value));
        }
        Ok(Value::map_from(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
