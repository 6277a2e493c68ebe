//! IAM and resource policy documents
//!
//! Policy documents returned by the IAM API are URL-encoded JSON; bucket
//! policies are plain JSON. Both share the same loose schema: `Statement`
//! may be an object or an array, and `Action`/`Resource` may be a string or
//! an array of strings. Decoding goes through an explicit
//! decode -> parse -> validate pipeline so a malformed document surfaces as
//! a structured error at the check boundary instead of a panic.

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;

/// One value or a list of values, as JSON policies allow for several fields
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
  One(T),
  Many(Vec<T>),
}

impl<T> OneOrMany<T> {
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    match self {
      OneOrMany::One(v) => std::slice::from_ref(v).iter(),
      OneOrMany::Many(vs) => vs.iter(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Statement {
  #[serde(rename = "Effect")]
  pub effect: String,

  #[serde(rename = "Action")]
  pub action: Option<OneOrMany<String>>,

  #[serde(rename = "Resource")]
  pub resource: Option<OneOrMany<String>>,

  #[serde(rename = "Condition")]
  pub condition: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PolicyDocument {
  #[serde(rename = "Statement")]
  pub statement: OneOrMany<Statement>,
}

impl PolicyDocument {
  /// Parse a plain JSON policy document
  pub fn parse(document: &str) -> Result<Self> {
    serde_json::from_str(document).context("Invalid policy document")
  }

  /// Decode a URL-encoded policy document (IAM `GetPolicyVersion` form) and parse it
  pub fn parse_url_encoded(document: &str) -> Result<Self> {
    let decoded = percent_decode_str(document)
      .decode_utf8()
      .context("Policy document is not valid UTF-8 after URL decoding")?;
    Self::parse(&decoded)
  }

  pub fn statements(&self) -> impl Iterator<Item = &Statement> {
    self.statement.iter()
  }
}

impl Statement {
  pub fn is_allow(&self) -> bool {
    self.effect.eq_ignore_ascii_case("Allow")
  }

  pub fn is_deny(&self) -> bool {
    self.effect.eq_ignore_ascii_case("Deny")
  }

  /// Whether any action in this statement covers `action`, honoring `*` globs
  /// such as `kms:*` or `*`
  pub fn allows_action(&self, action: &str) -> bool {
    match &self.action {
      Some(actions) => actions.iter().any(|a| action_matches(a, action)),
      None => false,
    }
  }

  /// Whether the statement applies to every resource
  pub fn covers_all_resources(&self) -> bool {
    match &self.resource {
      Some(resources) => resources.iter().any(|r| r == "*"),
      None => false,
    }
  }

  /// Whether the statement's condition restricts `aws:SecureTransport` to false
  pub fn denies_insecure_transport(&self) -> bool {
    let Some(condition) = &self.condition else {
      return false;
    };

    match condition.get("Bool").and_then(|b| b.get("aws:SecureTransport")) {
      Some(Value::String(s)) => s == "false",
      Some(Value::Bool(b)) => !b,
      _ => false,
    }
  }
}

/// Glob-aware comparison of a policy action pattern against a concrete action
///
/// IAM action matching is case-insensitive and `*` matches any run of
/// characters (`kms:*`, `kms:De*`, `*`).
pub fn action_matches(pattern: &str, action: &str) -> bool {
  if !pattern.contains('*') {
    return pattern.eq_ignore_ascii_case(action);
  }

  let escaped = regex_lite::escape(pattern).replace(r"\*", ".*");

  match Regex::new(&format!("(?i)^{escaped}$")) {
    Ok(re) => re.is_match(action),
    Err(_) => false,
  }
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;

  #[rstest]
  #[case("kms:Decrypt", "kms:Decrypt", true)]
  #[case("kms:decrypt", "kms:Decrypt", true)]
  #[case("kms:*", "kms:Decrypt", true)]
  #[case("kms:De*", "kms:Decrypt", true)]
  #[case("*", "kms:Decrypt", true)]
  #[case("kms:Encrypt", "kms:Decrypt", false)]
  #[case("s3:*", "kms:Decrypt", false)]
  #[case("kms:Decrypt*", "kms:ReEncryptFrom", false)]
  fn it_matches_actions(#[case] pattern: &str, #[case] action: &str, #[case] expected: bool) {
    assert_eq!(action_matches(pattern, action), expected);
  }

  #[test]
  fn parses_single_statement_object() {
    let doc = PolicyDocument::parse(
      r#"{"Version": "2012-10-17", "Statement": {"Effect": "Allow", "Action": "kms:Decrypt", "Resource": "*"}}"#,
    )
    .unwrap();

    let statements: Vec<_> = doc.statements().collect();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].is_allow());
    assert!(statements[0].allows_action("kms:Decrypt"));
    assert!(statements[0].covers_all_resources());
  }

  #[test]
  fn parses_statement_array_with_action_lists() {
    let doc = PolicyDocument::parse(
      r#"{"Statement": [
        {"Effect": "Allow", "Action": ["s3:GetObject", "s3:PutObject"], "Resource": ["arn:aws:s3:::bucket/*"]},
        {"Effect": "Deny", "Action": "s3:*", "Resource": "*"}
      ]}"#,
    )
    .unwrap();

    let statements: Vec<_> = doc.statements().collect();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].allows_action("s3:GetObject"));
    assert!(!statements[0].covers_all_resources());
    assert!(statements[1].is_deny());
  }

  #[test]
  fn decodes_url_encoded_document() {
    let encoded = "%7B%22Statement%22%3A%7B%22Effect%22%3A%22Allow%22%2C%22Action%22%3A%22kms%3A%2A%22%2C%22Resource%22%3A%22%2A%22%7D%7D";
    let doc = PolicyDocument::parse_url_encoded(encoded).unwrap();

    let statements: Vec<_> = doc.statements().collect();
    assert!(statements[0].allows_action("kms:Decrypt"));
  }

  #[test]
  fn malformed_document_is_an_error_not_a_panic() {
    assert!(PolicyDocument::parse("not json").is_err());
    assert!(PolicyDocument::parse(r#"{"Statement": 42}"#).is_err());
  }

  #[test]
  fn secure_transport_condition() {
    let doc = PolicyDocument::parse(
      r#"{"Statement": {"Effect": "Deny", "Action": "s3:*", "Resource": "*",
          "Condition": {"Bool": {"aws:SecureTransport": "false"}}}}"#,
    )
    .unwrap();

    assert!(doc.statements().next().unwrap().denies_insecure_transport());

    let unrelated = PolicyDocument::parse(
      r#"{"Statement": {"Effect": "Deny", "Action": "s3:*", "Resource": "*",
          "Condition": {"StringEquals": {"aws:PrincipalOrgID": "o-123"}}}}"#,
    )
    .unwrap();

    assert!(!unrelated.statements().next().unwrap().denies_insecure_transport());
  }
}
