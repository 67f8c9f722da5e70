//! Serde adapter that writes a `Vec<T>` as a JSON object keyed by each
//! element's identifier, preserving element order.
//!
//! Used with `#[serde(with = "keyed")]` for the rubric and test-result maps
//! of the result record.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// An element that carries its own map key.
///
/// The key field itself is `#[serde(skip)]` on the element and restored from
/// the map key on deserialization.
pub trait Keyed {
    fn key(&self) -> &str;
    fn with_key(self, key: String) -> Self;
}

#[allow(clippy::ptr_arg)]
pub fn serialize<S, T>(items: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Keyed + Serialize,
{
    let mut map = serializer.serialize_map(Some(items.len()))?;
    for item in items {
        map.serialize_entry(item.key(), item)?;
    }
    map.end()
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Keyed + Deserialize<'de>,
{
    struct KeyedVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for KeyedVisitor<T>
    where
        T: Keyed + Deserialize<'de>,
    {
        type Value = Vec<T>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map keyed by identifier")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, T>()? {
                items.push(value.with_key(key));
            }
            Ok(items)
        }
    }

    deserializer.deserialize_map(KeyedVisitor(PhantomData))
}
