//! YAML decoding into structured JSON
//!
//! Import secrets carry manifests as YAML, ManifestWorks carry them as JSON
//! objects. yaml-rust2 does the parsing; the result is converted into
//! `serde_json::Value` so it can be embedded in a ManifestWork verbatim.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Decode raw secret bytes into every non-empty YAML document they contain.
///
/// Documents are split on the `---` separator and returned in order. Empty
/// documents (two separators in a row, a trailing separator) are skipped.
pub fn decode_documents(raw: &[u8]) -> Result<Vec<Value>, YamlError> {
    let text = std::str::from_utf8(raw).map_err(|e| YamlError(format!("not UTF-8: {e}")))?;
    let docs = YamlLoader::load_from_str(text).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .filter(|doc| !doc.is_null())
        .map(yaml_to_json)
        .collect()
}

/// Decode raw secret bytes that must hold exactly one document.
pub fn decode_single(raw: &[u8]) -> Result<Value, YamlError> {
    let mut docs = decode_documents(raw)?;
    match docs.len() {
        1 => Ok(docs.remove(0)),
        0 => Err(YamlError("no YAML document found".to_string())),
        n => Err(YamlError(format!("expected one YAML document, found {n}"))),
    }
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(YamlError("unsupported YAML key type".to_string())),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kubernetes_manifest() {
        let yaml = br#"
apiVersion: v1
kind: Namespace
metadata:
  name: open-cluster-management-agent
"#;
        let docs = decode_documents(yaml).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["kind"], "Namespace");
        assert_eq!(docs[0]["metadata"]["name"], "open-cluster-management-agent");
    }

    #[test]
    fn test_multi_doc_preserves_order() {
        let yaml = b"kind: A\n---\nkind: B\n---\nkind: C\n";
        let docs = decode_documents(yaml).unwrap();
        let kinds: Vec<_> = docs.iter().map(|d| d["kind"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_empty_documents_are_skipped() {
        let yaml = b"---\nkind: A\n---\n---\nkind: B\n---\n";
        let docs = decode_documents(yaml).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_scalars_and_nesting() {
        let yaml = b"replicas: 3\nratio: 1.5\nenabled: true\nnothing: null\nitems:\n  - one\n";
        let doc = decode_single(yaml).unwrap();
        assert_eq!(doc["replicas"], 3);
        assert!((doc["ratio"].as_f64().unwrap() - 1.5).abs() < 0.0001);
        assert_eq!(doc["enabled"], true);
        assert!(doc["nothing"].is_null());
        assert_eq!(doc["items"][0], "one");
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        assert!(decode_documents(b"not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_non_utf8_is_rejected() {
        let err = decode_documents(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_decode_single_requires_exactly_one() {
        assert!(decode_single(b"").is_err());
        assert!(decode_single(b"a: 1\n---\nb: 2\n").is_err());
        assert_eq!(decode_single(b"a: 1\n").unwrap()["a"], 1);
    }
}
