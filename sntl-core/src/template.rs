//! Policy documents

use crate::error::{Error, Result};
use crate::ontology::Ontology;
use regex::Regex;
use std::path::PathBuf;

/// Trust policy letting the function platform assume the execution role
pub const TRUST_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"lambda.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

/// Renders the function's permission policy from the ontology
pub trait PolicyTemplate: Send + Sync {
    fn render(&self, ontology: &Ontology) -> Result<String>;
}

/// A `policy.json` with `{{ context.<field> }}` and `{{ env.<key> }}` placeholders
#[derive(Debug, Clone)]
pub struct FilePolicy {
    path: PathBuf,
}

impl FilePolicy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PolicyTemplate for FilePolicy {
    fn render(&self, ontology: &Ontology) -> Result<String> {
        let source = std::fs::read_to_string(&self.path)?;
        render_str(&source, ontology)
    }
}

/// An in-memory template
#[derive(Debug, Clone)]
pub struct InlinePolicy(pub String);

impl PolicyTemplate for InlinePolicy {
    fn render(&self, ontology: &Ontology) -> Result<String> {
        render_str(&self.0, ontology)
    }
}

/// Substitute placeholders and check the result is a JSON document.
pub fn render_str(source: &str, ontology: &Ontology) -> Result<String> {
    let placeholder = Regex::new(r"\{\{\s*(context|env)\.([A-Za-z0-9_]+)\s*\}\}")
        .map_err(|e| Error::Template(e.to_string()))?;

    let mut rendered = String::with_capacity(source.len());
    let mut last = 0;
    for captures in placeholder.captures_iter(source) {
        let whole = captures.get(0).map_or(0..0, |m| m.range());
        let scope = &captures[1];
        let key = &captures[2];

        let value = match scope {
            "context" => ontology.context.field(key),
            _ => ontology.envs.values.get(key).cloned(),
        }
        .ok_or_else(|| Error::Template(format!("unknown placeholder {scope}.{key}")))?;

        rendered.push_str(&source[last..whole.start]);
        rendered.push_str(&value);
        last = whole.end;
    }
    rendered.push_str(&source[last..]);

    serde_json::from_str::<serde_json::Value>(&rendered)
        .map_err(|e| Error::Template(format!("rendered policy is not JSON: {e}")))?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Context, Provision};
    use std::collections::BTreeMap;

    fn ontology() -> Ontology {
        Ontology::new(
            Context {
                partition: "dev".to_string(),
                region: "us-east-1".to_string(),
                account_id: "123456789012".to_string(),
                caller_id: "AIDA".to_string(),
                repository_name: "app".to_string(),
            },
            BTreeMap::from([("bucket".to_string(), "my-bucket".to_string())]),
            Provision::default(),
        )
    }

    #[test]
    fn test_render_placeholders() {
        let source = r#"{"Resource": ["arn:aws:s3:::{{ env.bucket }}", "arn:aws:ssm:{{context.region}}:{{ context.account_id }}:parameter{{ context.partition }}"]}"#;
        let rendered = render_str(source, &ontology()).unwrap();
        assert!(rendered.contains("arn:aws:s3:::my-bucket"));
        assert!(rendered.contains("arn:aws:ssm:us-east-1:123456789012:parameterdev"));
    }

    #[test]
    fn test_unknown_placeholder() {
        let result = render_str(r#"{"a": "{{ env.missing }}"}"#, &ontology());
        assert!(matches!(result, Err(Error::Template(_))));
    }

    #[test]
    fn test_rendered_must_be_json() {
        let result = InlinePolicy("not json".to_string()).render(&ontology());
        assert!(matches!(result, Err(Error::Template(_))));
    }

    #[test]
    fn test_trust_policy_is_json() {
        let value: serde_json::Value = serde_json::from_str(TRUST_POLICY).unwrap();
        assert_eq!(
            value["Statement"][0]["Principal"]["Service"],
            "lambda.amazonaws.com"
        );
    }
}
