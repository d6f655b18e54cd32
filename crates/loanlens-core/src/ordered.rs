//! Serialize `(key, value)` pairs as a JSON object without losing their order.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

#[allow(clippy::ptr_arg)]
pub(crate) fn serialize_pairs<S, K, V>(pairs: &Vec<(K, V)>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    K: Serialize,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, value) in pairs {
        map.serialize_entry(key, value)?;
    }
    map.end()
}
