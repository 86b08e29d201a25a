use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single SQL scalar. Represented as a sum type with one branch per
/// primitive, per spec.md §9 ("Dynamic-dispatch SQL value variants") —
/// never as a polymorphic trait object.
///
/// `Serialize`/`Deserialize` are hand-written rather than derived with
/// `#[serde(untagged)]`: untagged decoding relies on `deserialize_any`,
/// which self-describing formats like JSON support but `bincode` (this
/// crate's cluster wire codec, see `cluster::message`) does not — an
/// untagged `Value` would encode fine but could never decode back off
/// the wire. We branch on `Serializer::is_human_readable()`/
/// `Deserializer::is_human_readable()` instead: JSON gets the bare
/// scalar spec.md §4.8 and the glossary call for ("each scalar per the
/// `Value` variant", not a tagged object), while bincode gets an
/// ordinary tagged enum it can decode deterministically.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
    Null,
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            match self {
                Value::Integer(i) => serializer.serialize_i64(*i),
                Value::Float(f) => serializer.serialize_f64(*f),
                Value::Bool(b) => serializer.serialize_bool(*b),
                Value::Bytes(b) => serializer.serialize_bytes(b),
                Value::Text(s) => serializer.serialize_str(s),
                Value::Null => serializer.serialize_unit(),
            }
        } else {
            match self {
                Value::Integer(i) => serializer.serialize_newtype_variant("Value", 0, "Integer", i),
                Value::Float(f) => serializer.serialize_newtype_variant("Value", 1, "Float", f),
                Value::Bool(b) => serializer.serialize_newtype_variant("Value", 2, "Bool", b),
                Value::Bytes(b) => serializer.serialize_newtype_variant("Value", 3, "Bytes", b),
                Value::Text(s) => serializer.serialize_newtype_variant("Value", 4, "Text", s),
                Value::Null => serializer.serialize_unit_variant("Value", 5, "Null"),
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(HumanReadableValueVisitor)
        } else {
            const VARIANTS: &[&str] = &["Integer", "Float", "Bool", "Bytes", "Text", "Null"];
            deserializer.deserialize_enum("Value", VARIANTS, TaggedValueVisitor)
        }
    }
}

/// Untagged-style visitor for self-describing formats: picks the variant
/// from whatever scalar shape the deserializer actually hands back.
struct HumanReadableValueVisitor;

impl<'de> Visitor<'de> for HumanReadableValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a SQL scalar (integer, float, bool, bytes, string, or null)")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Integer(v as i64))
    }
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }
    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }
    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }
    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }
    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(v))
    }
    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
}

#[derive(Deserialize)]
enum ValueVariant {
    Integer,
    Float,
    Bool,
    Bytes,
    Text,
    Null,
}

struct TaggedValueVisitor;

impl<'de> Visitor<'de> for TaggedValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a tagged Value enum")
    }

    fn visit_enum<A: de::EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        use de::VariantAccess;
        let (variant, access) = data.variant::<ValueVariant>()?;
        match variant {
            ValueVariant::Integer => access.newtype_variant::<i64>().map(Value::Integer),
            ValueVariant::Float => access.newtype_variant::<f64>().map(Value::Float),
            ValueVariant::Bool => access.newtype_variant::<bool>().map(Value::Bool),
            ValueVariant::Bytes => access.newtype_variant::<Vec<u8>>().map(Value::Bytes),
            ValueVariant::Text => access.newtype_variant::<String>().map(Value::Text),
            ValueVariant::Null => access.unit_variant().map(|_| Value::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(d) => write!(f, "{d}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Bytes(b) => write!(f, "{}", hex_encode(b)),
            Value::Text(s) => write!(f, "{s}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "real",
            Value::Bool(_) => "boolean",
            Value::Bytes(_) => "blob",
            Value::Text(_) => "text",
            Value::Null => "null",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<Value> {
        vec![
            Value::Integer(-7),
            Value::Float(2.5),
            Value::Bool(true),
            Value::Bytes(vec![1, 2, 3]),
            Value::Text("hi".to_string()),
            Value::Null,
        ]
    }

    #[test]
    fn round_trips_through_json_as_a_bare_scalar() {
        for v in all_variants() {
            let json = serde_json::to_value(&v).unwrap();
            assert!(!json.is_object(), "{v:?} serialised as an object: {json}");
            let back: Value = serde_json::from_value(json).unwrap();
            // Integer <-> Float both round-trip through JSON numbers, so
            // only compare like-for-like variants here.
            match (&v, &back) {
                (Value::Null, Value::Null) => {}
                _ => assert_eq!(v, back),
            }
        }
    }

    #[test]
    fn round_trips_through_bincode_despite_being_non_self_describing() {
        for v in all_variants() {
            let bytes = bincode::serde::encode_to_vec(&v, bincode::config::standard()).unwrap();
            let (back, _): (Value, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
            assert_eq!(v, back);
        }
    }
}
