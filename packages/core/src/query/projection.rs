//! Projection of documents onto a property set

use crate::expressions::PropertyExpression;
use crate::models::PropertyMeta;
use serde_json::{Map, Value};

/// Keep only the requested property paths of `document`
///
/// Nested paths sharing a prefix are merged (`vendor.id` and `vendor.name`
/// yield one `vendor` object). A path with requested descendants only holds
/// those descendants. An empty property set returns the document unchanged.
pub fn project(document: &Value, properties: &[PropertyExpression]) -> Value {
    if properties.is_empty() || !document.is_object() {
        return document.clone();
    }
    let paths: Vec<String> = properties.iter().map(PropertyExpression::path).collect();
    let mut projected = Map::new();
    for (property, path) in properties.iter().zip(&paths) {
        let prefix = format!("{}.", path);
        if paths.iter().any(|other| other.starts_with(&prefix)) {
            continue;
        }
        copy_path(document, &mut projected, &property.segments());
    }
    Value::Object(projected)
}

fn copy_path(source: &Value, target: &mut Map<String, Value>, segments: &[PropertyMeta]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = source.get(head.name()) else {
        return;
    };

    match value {
        Value::Object(_) if !rest.is_empty() => {
            let entry = target
                .entry(head.name().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = entry {
                copy_path(value, child, rest);
            }
        }
        _ if rest.is_empty() => {
            target.insert(head.name().to_string(), value.clone());
        }
        _ => {
            target
                .entry(head.name().to_string())
                .or_insert_with(|| value.clone());
        }
    }
}
