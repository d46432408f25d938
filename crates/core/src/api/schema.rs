//! # レスポンス形式チェック
//!
//! 2xxレスポンスのフィールドを型付き構造体へ変換する前に検査し、
//! 違反をフィールド単位で要約する。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::B2Error;

/// フィールドに期待する型
#[derive(Debug, Clone, Copy)]
pub(crate) enum Kind {
    Str,
    Int,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Str => value.is_string(),
            Kind::Int => value.is_i64() || value.is_u64(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Kind::Str => "文字列",
            Kind::Int => "整数",
        }
    }
}

/// 1フィールド分の規則。`path` はドット区切り。
#[derive(Debug, Clone, Copy)]
pub(crate) struct Field {
    pub path: &'static str,
    pub kind: Kind,
    pub required: bool,
}

pub(crate) const fn required(path: &'static str, kind: Kind) -> Field {
    Field {
        path,
        kind,
        required: true,
    }
}

pub(crate) const fn optional(path: &'static str, kind: Kind) -> Field {
    Field {
        path,
        kind,
        required: false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

/// 規則に違反したフィールドを列挙する。空なら合格。
pub(crate) fn violations(root: &Value, fields: &[Field]) -> Vec<String> {
    let mut issues = Vec::new();
    for field in fields {
        match lookup(root, field.path) {
            None if field.required => issues.push(format!("{}: 必須フィールドがありません", field.path)),
            None => {}
            Some(value) if !field.kind.matches(value) => issues.push(format!(
                "{}: {}が必要です（実際: {}）",
                field.path,
                field.kind.label(),
                json_type(value)
            )),
            Some(_) => {}
        }
    }
    issues
}

/// 本文を検査してから `T` に変換する。
pub(crate) fn parse<T: DeserializeOwned>(
    op: &'static str,
    body: &str,
    fields: &[Field],
) -> Result<T, B2Error> {
    let schema_error = |issues: Vec<String>| B2Error::Schema {
        op,
        issues,
        body: body.to_string(),
    };

    let root: Value = serde_json::from_str(body)
        .map_err(|e| schema_error(vec![format!("JSONとして解析できません: {e}")]))?;
    if !root.is_object() {
        return Err(schema_error(vec![format!(
            "オブジェクトが必要です（実際: {}）",
            json_type(&root)
        )]));
    }

    let issues = violations(&root, fields);
    if !issues.is_empty() {
        tracing::warn!(op, issues = ?issues, "B2レスポンスの形式が不正");
        return Err(schema_error(issues));
    }

    serde_json::from_value(root).map_err(|e| schema_error(vec![e.to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &[Field] = &[
        required("fileId", Kind::Str),
        required("uploadTimestamp", Kind::Int),
        required("allowed.bucketId", Kind::Str),
        optional("action", Kind::Str),
    ];

    #[test]
    fn test_valid_body_has_no_violations() {
        let body = serde_json::json!({
            "fileId": "4_z",
            "uploadTimestamp": 1_700_000_000_000i64,
            "allowed": { "bucketId": "b" },
            "contentMd5": "extra fields are fine"
        });
        assert!(violations(&body, RULES).is_empty());
    }

    #[test]
    fn test_each_violation_is_reported() {
        let body = serde_json::json!({
            "uploadTimestamp": "1700000000000",
            "allowed": {},
            "action": 1
        });
        let issues = violations(&body, RULES);
        assert_eq!(issues.len(), 4);
        assert!(issues[0].starts_with("fileId:"));
        assert!(issues[1].contains("整数が必要です（実際: string）"));
        assert!(issues[2].starts_with("allowed.bucketId:"));
        assert!(issues[3].starts_with("action:"));
    }

    #[test]
    fn test_parse_non_json_is_schema_error() {
        let result: Result<Value, _> = parse("b2_upload_file", "<html>", RULES);
        match result {
            Err(B2Error::Schema { issues, body, .. }) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(body, "<html>");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
