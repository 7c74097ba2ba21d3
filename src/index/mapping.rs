//! Index mapping for metric definitions
//!
//! Downstream search and query code relies on these exact field types:
//! strings are `not_analyzed` (exact match, never tokenized) and timestamps
//! are plain `long`s rather than engine date types.

use serde_json::{json, Value};

/// Document type of definition documents
pub const DOC_TYPE: &str = "metric_index";

/// Dynamic template: every unmapped string field is indexed as an exact value
fn string_template() -> Value {
    json!([
        {
            "strings": {
                "mapping": {
                    "index": "not_analyzed",
                    "type": "string"
                },
                "match_mapping_type": "string"
            }
        }
    ])
}

fn exact_string() -> Value {
    json!({ "type": "string", "index": "not_analyzed" })
}

fn long() -> Value {
    json!({ "type": "long" })
}

/// Body of the index creation request
pub fn metric_mapping() -> Value {
    json!({
        "mappings": {
            "_default_": {
                "dynamic_templates": string_template(),
                "_all": { "enabled": false },
                "properties": {}
            },
            "metric_index": {
                "dynamic_templates": string_template(),
                "_all": { "enabled": false },
                "_timestamp": { "enabled": false },
                "properties": {
                    "id": exact_string(),
                    "interval": long(),
                    "lastUpdate": long(),
                    "metric": exact_string(),
                    "name": exact_string(),
                    "node_count": long(),
                    "org_id": long(),
                    "tags": exact_string(),
                    "target_type": exact_string(),
                    "unit": exact_string()
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_field_types() {
        let mapping = metric_mapping();
        let props = &mapping["mappings"][DOC_TYPE]["properties"];

        for field in ["id", "metric", "name", "tags", "target_type", "unit"] {
            assert_eq!(props[field]["type"], "string", "{}", field);
            assert_eq!(props[field]["index"], "not_analyzed", "{}", field);
        }
        for field in ["interval", "lastUpdate", "org_id", "node_count"] {
            assert_eq!(props[field]["type"], "long", "{}", field);
        }
        assert_eq!(props.as_object().unwrap().len(), 10);
    }

    #[test]
    fn test_mapping_disables_all_and_timestamp() {
        let mapping = metric_mapping();
        let doc = &mapping["mappings"][DOC_TYPE];
        assert_eq!(doc["_all"]["enabled"], false);
        assert_eq!(doc["_timestamp"]["enabled"], false);
        assert_eq!(
            doc["dynamic_templates"][0]["strings"]["mapping"]["index"],
            "not_analyzed"
        );
        assert_eq!(mapping["mappings"]["_default_"]["_all"]["enabled"], false);
    }

    #[test]
    fn test_mapping_matches_definition_fields() {
        let def = crate::types::MetricDefinition {
            id: "1.a".to_string(),
            org_id: 1,
            name: "a".to_string(),
            interval: 10,
            ..Default::default()
        };
        let doc = serde_json::to_value(&def).unwrap();
        let mapping = metric_mapping();
        let props = mapping["mappings"][DOC_TYPE]["properties"]
            .as_object()
            .unwrap();
        for key in doc.as_object().unwrap().keys() {
            assert!(props.contains_key(key), "unmapped field {}", key);
        }
    }
}
