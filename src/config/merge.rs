//! Layering of configuration tables
//!
//! Every layer is a TOML document (or the CLI override table) converted to
//! JSON. Tables merge key by key; any other value, option lists included,
//! replaces what the lower layer had. A repo `.xcbazel.toml` that lists
//! `build_options.Debug` therefore fully replaces the host file's list for
//! that configuration while leaving the other configurations alone.

use serde_json::Value;

/// Fold `layers` from lowest to highest precedence.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    let mut layers = layers.into_iter();
    let mut merged = layers.next().unwrap_or(Value::Null);
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = merge_layers(vec![
            json!({"poll_interval_ms": 100}),
            json!({"poll_interval_ms": 250}),
        ]);
        assert_eq!(result["poll_interval_ms"], 250);
    }

    #[test]
    fn test_nested_tables_merge_by_key() {
        let host = json!({
            "build_options": {"Debug": ["--jobs=8"], "Release": ["--config=opt"]}
        });
        let repo = json!({
            "build_options": {"Debug": ["--config=c"]}
        });
        let result = merge_layers(vec![host, repo]);

        assert_eq!(result["build_options"]["Debug"], json!(["--config=c"]));
        assert_eq!(result["build_options"]["Release"], json!(["--config=opt"]));
    }

    #[test]
    fn test_new_keys_are_added() {
        let result = merge_layers(vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(result, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_layers_apply_in_order() {
        let builtin = json!({
            "tool_tag": "xcbazel:build",
            "build_options": {"all": []}
        });
        let host = json!({"tool_tag": "host"});
        let repo = json!({"build_options": {"all": ["--jobs=4"]}});
        let cli = json!({"tool_tag": "cli"});

        let result = merge_layers(vec![builtin, host, repo, cli]);

        assert_eq!(result["tool_tag"], "cli");
        assert_eq!(result["build_options"]["all"][0], "--jobs=4");
    }

    #[test]
    fn test_no_layers() {
        assert!(merge_layers(Vec::new()).is_null());
    }
}
