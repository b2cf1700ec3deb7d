//! Firestore v1 REST wire format: typed values, documents, writes and queries.

use serde::Deserialize;
use serde_json::{json, Map, Number, Value};

use crate::gateway::{Document, EqualityFilter, FieldWrite, FieldWrites, Fields, GatewayError};

#[derive(Debug, Deserialize)]
pub(crate) struct RawDocument {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) fields: Option<Map<String, Value>>,
}

impl RawDocument {
    pub(crate) fn into_document(self) -> Result<Document, GatewayError> {
        let id = document_id(&self.name)?.to_string();
        let fields = decode_fields(self.fields.as_ref())?;
        Ok(Document { id, fields })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListDocumentsResponse {
    #[serde(default)]
    pub(crate) documents: Vec<RawDocument>,
    #[serde(default)]
    pub(crate) next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunQueryItem {
    #[serde(default)]
    pub(crate) document: Option<RawDocument>,
}

/// Last path segment of a fully qualified document name.
pub(crate) fn document_id(name: &str) -> Result<&str, GatewayError> {
    name.rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| GatewayError::Decode(format!("document name '{name}' has no id")))
}

pub(crate) fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => json!({ "integerValue": integer.to_string() }),
            None => json!({ "doubleValue": number.as_f64() }),
        },
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

pub(crate) fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

pub(crate) fn decode_fields(fields: Option<&Map<String, Value>>) -> Result<Fields, GatewayError> {
    let Some(fields) = fields else {
        return Ok(Fields::new());
    };
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_value(value)?)))
        .collect()
}

pub(crate) fn decode_value(value: &Value) -> Result<Value, GatewayError> {
    let typed = value
        .as_object()
        .and_then(|object| object.iter().next())
        .map(|(kind, inner)| (kind.as_str(), inner))
        .ok_or_else(|| GatewayError::Decode(format!("untyped firestore value {value}")))?;

    match typed {
        ("nullValue", _) => Ok(Value::Null),
        ("booleanValue", flag) => Ok(Value::Bool(flag.as_bool().unwrap_or_default())),
        ("integerValue", raw) => decode_integer(raw),
        ("doubleValue", raw) => Ok(decode_double(raw)),
        ("stringValue" | "timestampValue" | "referenceValue" | "bytesValue", text) => {
            Ok(text.clone())
        }
        ("geoPointValue", point) => Ok(point.clone()),
        ("arrayValue", array) => array
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
            .transpose()
            .map(|items| Value::Array(items.unwrap_or_default())),
        ("mapValue", map) => {
            decode_fields(map.get("fields").and_then(Value::as_object)).map(Value::Object)
        }
        (other, _) => Err(GatewayError::Decode(format!(
            "unsupported firestore value type '{other}'"
        ))),
    }
}

fn decode_integer(raw: &Value) -> Result<Value, GatewayError> {
    match raw {
        Value::String(text) => text
            .parse::<i64>()
            .map(|integer| Value::Number(integer.into()))
            .map_err(|_| GatewayError::Decode(format!("integerValue '{text}' is not an i64"))),
        Value::Number(number) => Ok(Value::Number(number.clone())),
        other => Err(GatewayError::Decode(format!(
            "integerValue has unexpected shape {other}"
        ))),
    }
}

// NaN and the infinities arrive as strings and have no JSON representation.
fn decode_double(raw: &Value) -> Value {
    raw.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Quote a field name for use in masks and transforms when it is not a plain identifier.
pub(crate) fn field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

struct SplitWrites {
    fields: Map<String, Value>,
    mask: Vec<String>,
    transforms: Vec<Value>,
    deletes: usize,
}

fn split_writes(writes: &FieldWrites) -> SplitWrites {
    let mut split = SplitWrites {
        fields: Map::new(),
        mask: Vec::new(),
        transforms: Vec::new(),
        deletes: 0,
    };

    for (name, write) in writes {
        match write {
            FieldWrite::Set(value) => {
                split.fields.insert(name.clone(), encode_value(value));
                split.mask.push(field_path(name));
            }
            FieldWrite::Delete => {
                split.mask.push(field_path(name));
                split.deletes += 1;
            }
            FieldWrite::ServerTimestamp => split.transforms.push(json!({
                "fieldPath": field_path(name),
                "setToServerValue": "REQUEST_TIME",
            })),
        }
    }

    split
}

/// Write creating `document_name`; fails at commit time if it already exists.
pub(crate) fn create_write(
    document_name: &str,
    writes: &FieldWrites,
) -> Result<Value, GatewayError> {
    let split = split_writes(writes);
    if split.deletes > 0 {
        return Err(GatewayError::InvalidWrite(
            "field deletion is not allowed when creating a document".to_string(),
        ));
    }

    let mut write = json!({
        "update": { "name": document_name, "fields": split.fields },
        "currentDocument": { "exists": false },
    });
    if !split.transforms.is_empty() {
        write["updateTransforms"] = Value::Array(split.transforms);
    }
    Ok(write)
}

/// Single write applying sets, deletes and server timestamps to an existing document.
///
/// Deleted fields appear in the update mask without a value, which is how the
/// store expresses removal inside the same write.
pub(crate) fn update_write(
    document_name: &str,
    writes: &FieldWrites,
) -> Result<Value, GatewayError> {
    if writes.is_empty() {
        return Err(GatewayError::InvalidWrite(
            "an update needs at least one field write".to_string(),
        ));
    }

    let split = split_writes(writes);
    let mut write = json!({
        "update": { "name": document_name, "fields": split.fields },
        "updateMask": { "fieldPaths": split.mask },
        "currentDocument": { "exists": true },
    });
    if !split.transforms.is_empty() {
        write["updateTransforms"] = Value::Array(split.transforms);
    }
    Ok(write)
}

pub(crate) fn structured_query(collection: &str, filters: &[EqualityFilter]) -> Value {
    let mut field_filters: Vec<Value> = filters
        .iter()
        .map(|filter| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(&filter.field) },
                    "op": "EQUAL",
                    "value": encode_value(&filter.value),
                }
            })
        })
        .collect();

    let mut query = json!({ "from": [{ "collectionId": collection }] });
    match field_filters.len() {
        0 => {}
        1 => query["where"] = field_filters.remove(0),
        _ => {
            query["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": field_filters }
            })
        }
    }

    json!({ "structuredQuery": query })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_nested_values() {
        let encoded = encode_value(&json!({
            "seats": 42,
            "fare": 2.5,
            "tags": ["express", null],
            "active": true
        }));

        assert_eq!(
            encoded,
            json!({ "mapValue": { "fields": {
                "seats": { "integerValue": "42" },
                "fare": { "doubleValue": 2.5 },
                "tags": { "arrayValue": { "values": [
                    { "stringValue": "express" },
                    { "nullValue": null }
                ] } },
                "active": { "booleanValue": true }
            } } })
        );
    }

    #[test]
    fn decodes_store_documents() {
        let raw: RawDocument = serde_json::from_value(json!({
            "name": "projects/demo/databases/(default)/documents/routes/r-17",
            "fields": {
                "vehicle": { "stringValue": "bus" },
                "stops": { "integerValue": "12" },
                "updatedAt": { "timestampValue": "2025-01-02T03:04:05Z" },
                "geometry": { "mapValue": {} },
                "waypoints": { "arrayValue": {} }
            },
            "createTime": "2025-01-01T00:00:00Z"
        }))
        .expect("raw document");

        let document = raw.into_document().expect("decodes");
        assert_eq!(document.id, "r-17");
        assert_eq!(document.fields["vehicle"], json!("bus"));
        assert_eq!(document.fields["stops"], json!(12));
        assert_eq!(document.fields["updatedAt"], json!("2025-01-02T03:04:05Z"));
        assert_eq!(document.fields["geometry"], json!({}));
        assert_eq!(document.fields["waypoints"], json!([]));
    }

    #[test]
    fn rejects_unknown_value_types() {
        assert!(matches!(
            decode_value(&json!({ "mysteryValue": 1 })),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            decode_value(&json!("bare")),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn update_write_deletes_and_stamps_in_one_write() {
        let mut writes = FieldWrites::new();
        writes.insert("authUid".to_string(), FieldWrite::Set(json!("uid-1")));
        writes.insert("migrated".to_string(), FieldWrite::Set(json!(true)));
        writes.insert("migratedAt".to_string(), FieldWrite::ServerTimestamp);
        writes.insert("password".to_string(), FieldWrite::Delete);

        let write = update_write("projects/p/databases/(default)/documents/users/u1", &writes)
            .expect("valid update");

        assert_eq!(
            write["updateMask"]["fieldPaths"],
            json!(["authUid", "migrated", "password"])
        );
        assert!(write["update"]["fields"].get("password").is_none());
        assert_eq!(
            write["update"]["fields"]["authUid"],
            json!({ "stringValue": "uid-1" })
        );
        assert_eq!(
            write["updateTransforms"],
            json!([{ "fieldPath": "migratedAt", "setToServerValue": "REQUEST_TIME" }])
        );
        assert_eq!(write["currentDocument"], json!({ "exists": true }));
    }

    #[test]
    fn create_write_refuses_deletes() {
        let mut writes = FieldWrites::new();
        writes.insert("password".to_string(), FieldWrite::Delete);
        assert!(matches!(
            create_write("projects/p/databases/(default)/documents/transit/t1", &writes),
            Err(GatewayError::InvalidWrite(_))
        ));
    }

    #[test]
    fn quotes_non_identifier_field_paths() {
        assert_eq!(field_path("plateNumber"), "plateNumber");
        assert_eq!(field_path("license-id"), "`license-id`");
        assert_eq!(field_path("9lives"), "`9lives`");
    }

    #[test]
    fn query_combines_filters_with_and() {
        let query = structured_query(
            "routes",
            &[
                EqualityFilter::new("vehicle", "bus"),
                EqualityFilter::new("type", "express"),
            ],
        );
        let filters = &query["structuredQuery"]["where"]["compositeFilter"];
        assert_eq!(filters["op"], json!("AND"));
        assert_eq!(filters["filters"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            query["structuredQuery"]["from"],
            json!([{ "collectionId": "routes" }])
        );

        let single = structured_query("routes", &[EqualityFilter::new("vehicle", "bus")]);
        assert_eq!(
            single["structuredQuery"]["where"]["fieldFilter"]["op"],
            json!("EQUAL")
        );
    }
}
