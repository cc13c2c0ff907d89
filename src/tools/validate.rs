//! Declarative request validation.
//!
//! Each route owns a [`RuleSet`]: an ordered list of field rules evaluated
//! against the JSON body (or the query string converted to JSON). All failures
//! are collected so the client gets every field-level message at once.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::error::{ApiError, FieldError};

#[derive(Debug, Clone)]
pub enum Check {
    Required,
    String,
    Boolean,
    Array,
    Object,
    /// Value must be one of the listed strings.
    OneOf(&'static [&'static str]),
    /// String value must not be any of the listed strings.
    NoneOf(&'static [&'static str]),
    /// Character length bounds for strings, inclusive.
    Length { min: usize, max: usize },
    /// Integer bounds, inclusive. Numeric strings (query params) are accepted.
    IntRange { min: i64, max: i64 },
    /// Floating-point bounds, inclusive.
    NumberRange { min: f64, max: f64 },
    /// Absolute http(s) URL.
    HttpUrl,
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    /// Dotted path into the document, e.g. `options.maxPages`.
    pub path: &'static str,
    pub checks: Vec<Check>,
}

impl FieldRule {
    pub fn new(path: &'static str) -> Self {
        Self {
            path,
            checks: Vec::new(),
        }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn required(self) -> Self {
        self.check(Check::Required)
    }

    fn evaluate(&self, root: &Value, errors: &mut Vec<FieldError>) {
        let value = lookup(root, self.path).filter(|v| !v.is_null());
        let Some(value) = value else {
            if self.checks.iter().any(|c| matches!(c, Check::Required)) {
                errors.push(FieldError::new(self.path, format!("{} is required", self.path)));
            }
            return;
        };

        for check in &self.checks {
            if let Some(message) = apply(check, self.path, value) {
                errors.push(FieldError::new(self.path, message));
                // Later checks usually assume the earlier type check passed.
                break;
            }
        }
    }
}

fn apply(check: &Check, path: &str, value: &Value) -> Option<String> {
    match check {
        Check::Required => None,
        Check::String => (!value.is_string()).then(|| format!("{path} must be a string")),
        Check::Boolean => (!value.is_boolean()).then(|| format!("{path} must be a boolean")),
        Check::Array => (!value.is_array()).then(|| format!("{path} must be an array")),
        Check::Object => (!value.is_object()).then(|| format!("{path} must be an object")),
        Check::OneOf(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => None,
            _ => Some(format!("{path} must be one of: {}", allowed.join(", "))),
        },
        Check::NoneOf(denied) => value
            .as_str()
            .filter(|s| denied.contains(s))
            .map(|s| format!("{path} must not be {s:?}")),
        Check::Length { min, max } => {
            let len = value.as_str().map(|s| s.chars().count())?;
            (len < *min || len > *max)
                .then(|| format!("{path} must be between {min} and {max} characters"))
        }
        Check::IntRange { min, max } => match as_int(value) {
            Some(n) if n >= *min && n <= *max => None,
            Some(_) => Some(format!("{path} must be between {min} and {max}")),
            None => Some(format!("{path} must be an integer")),
        },
        Check::NumberRange { min, max } => match value.as_f64() {
            Some(n) if n >= *min && n <= *max => None,
            Some(_) => Some(format!("{path} must be between {min} and {max}")),
            None => Some(format!("{path} must be a number")),
        },
        Check::HttpUrl => {
            let ok = value
                .as_str()
                .and_then(|s| url::Url::parse(s).ok())
                .is_some_and(|u| matches!(u.scheme(), "http" | "https") && u.has_host());
            (!ok).then(|| format!("{path} must be a valid http(s) URL"))
        }
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, key| node.get(key))
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<FieldRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Runs every rule and returns all field errors as one `VALIDATION_ERROR`.
    pub fn validate(&self, document: &Value) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        for rule in &self.rules {
            rule.evaluate(document, &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Query sanitizer
// ---------------------------------------------------------------------------

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("static regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Strips script/style blocks and HTML tags, removes NUL bytes and collapses
/// whitespace. Length validation must run on the output of this function.
pub fn sanitize_query(input: &str) -> String {
    let without_blocks = SCRIPT_BLOCK.replace_all(input, " ");
    let without_tags = TAG.replace_all(&without_blocks, " ");
    let without_nul = without_tags.replace('\0', "");
    WHITESPACE
        .replace_all(&without_nul, " ")
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Route rule sets
// ---------------------------------------------------------------------------

pub const QUERY_MIN_CHARS: usize = 2;
pub const QUERY_MAX_CHARS: usize = 500;

pub fn query_rules() -> RuleSet {
    RuleSet::new().rule(
        FieldRule::new("query")
            .required()
            .check(Check::String)
            .check(Check::Length {
                min: QUERY_MIN_CHARS,
                max: QUERY_MAX_CHARS,
            }),
    )
}

/// Rules applied to a client-supplied `ParsedQuery` before execution.
pub fn parsed_query_rules() -> RuleSet {
    RuleSet::new()
        .rule(
            FieldRule::new("intent")
                .required()
                .check(Check::OneOf(&["STATISTICS", "ELECTION", "VIDEO"])),
        )
        .rule(
            FieldRule::new("confidence")
                .required()
                .check(Check::NumberRange { min: 0.0, max: 1.0 }),
        )
        .rule(FieldRule::new("source").required().check(Check::Object))
        .rule(
            FieldRule::new("source.api")
                .required()
                .check(Check::String)
                .check(Check::Length { min: 1, max: 64 }),
        )
        .rule(FieldRule::new("filters").check(Check::Object))
        .rule(
            FieldRule::new("outputFormat").check(Check::OneOf(&["table", "chart", "csv", "json"])),
        )
}

pub fn crawl_rules(crawler_types: &'static [&'static str]) -> RuleSet {
    RuleSet::new()
        .rule(
            FieldRule::new("crawlerType")
                .required()
                .check(Check::OneOf(crawler_types)),
        )
        .rule(FieldRule::new("options").check(Check::Object))
        .rule(FieldRule::new("options.url").check(Check::HttpUrl))
        .rule(FieldRule::new("options.maxPages").check(Check::IntRange { min: 1, max: 100 }))
        .rule(FieldRule::new("options.downloadAttachments").check(Check::Boolean))
        .rule(FieldRule::new("options.selectors").check(Check::Object))
        .rule(
            FieldRule::new("options.selectors.item")
                .check(Check::String)
                .check(Check::Length { min: 1, max: 500 }),
        )
}

/// `parserId` is only shape-checked; unknown ids are reported by the parser
/// factory as `UNSUPPORTED_PARSER`.
pub fn parse_rules() -> RuleSet {
    RuleSet::new()
        .rule(
            FieldRule::new("parserId")
                .check(Check::String)
                .check(Check::Length { min: 1, max: 64 }),
        )
        .rule(
            FieldRule::new("options.language")
                .check(Check::String)
                .check(Check::Length { min: 2, max: 10 }),
        )
        .rule(FieldRule::new("options.extractTables").check(Check::Boolean))
        .rule(FieldRule::new("options.extractImages").check(Check::Boolean))
        .rule(
            FieldRule::new("options.pageRange.start")
                .check(Check::IntRange { min: 1, max: 10_000 }),
        )
        .rule(
            FieldRule::new("options.pageRange.end").check(Check::IntRange { min: 1, max: 10_000 }),
        )
        .rule(
            FieldRule::new("options.outputFormat")
                .check(Check::OneOf(&["text", "markdown", "json"])),
        )
}

pub fn export_rules() -> RuleSet {
    RuleSet::new()
        .rule(FieldRule::new("data").required().check(Check::Array))
        .rule(
            FieldRule::new("format")
                .required()
                .check(Check::OneOf(&["csv", "json"])),
        )
        .rule(FieldRule::new("options").check(Check::Object))
        .rule(FieldRule::new("options.columns").check(Check::Array))
        .rule(
            FieldRule::new("options.delimiter")
                .check(Check::String)
                .check(Check::Length { min: 1, max: 1 })
                .check(Check::NoneOf(&["\"", "\n", "\r"])),
        )
        .rule(FieldRule::new("options.includeHeader").check(Check::Boolean))
        .rule(
            FieldRule::new("options.filename")
                .check(Check::String)
                .check(Check::Length { min: 1, max: 200 }),
        )
}

pub fn history_rules() -> RuleSet {
    RuleSet::new()
        .rule(FieldRule::new("limit").check(Check::IntRange { min: 1, max: 100 }))
        .rule(FieldRule::new("offset").check(Check::IntRange {
            min: 0,
            max: i64::from(u32::MAX),
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_errors(err: ApiError) -> Vec<FieldError> {
        match err {
            ApiError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn sanitizer_strips_script_tags_nul_and_whitespace() {
        assert_eq!(sanitize_query("<script>x</script>  hi\0"), "hi");
        assert_eq!(sanitize_query("  서울   <b>아파트</b>\n가격 "), "서울 아파트 가격");
        assert_eq!(sanitize_query("<STYLE type=x>a{}</style>ok"), "ok");
    }

    #[test]
    fn sanitize_then_validate_blocks_padding_bypass() {
        let padded = format!("<i>{}</i>a", " ".repeat(600));
        let sanitized = sanitize_query(&padded);
        assert_eq!(sanitized, "a");
        let err = query_rules()
            .validate(&json!({ "query": sanitized }))
            .unwrap_err();
        assert_eq!(field_errors(err)[0].field, "query");
    }

    #[test]
    fn missing_required_fields_are_all_reported() {
        let err = export_rules().validate(&json!({})).unwrap_err();
        let fields: Vec<_> = field_errors(err).into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["data", "format"]);
    }

    #[test]
    fn enum_and_range_checks() {
        let rules = crawl_rules(&["nec_library", "custom"]);
        assert!(rules
            .validate(&json!({ "crawlerType": "custom", "options": { "maxPages": 5 } }))
            .is_ok());

        let err = rules
            .validate(&json!({
                "crawlerType": "bogus",
                "options": { "maxPages": 0, "url": "ftp://example.com" }
            }))
            .unwrap_err();
        let fields: Vec<_> = field_errors(err).into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["crawlerType", "options.url", "options.maxPages"]);
    }

    #[test]
    fn query_string_numbers_are_accepted() {
        assert!(history_rules()
            .validate(&json!({ "limit": "20", "offset": "0" }))
            .is_ok());
        assert!(history_rules().validate(&json!({ "limit": "500" })).is_err());
        assert!(history_rules().validate(&json!({ "limit": "abc" })).is_err());
    }

    #[test]
    fn parsed_query_rules_reject_unknown_intent() {
        let ok = json!({
            "intent": "ELECTION",
            "confidence": 0.8,
            "source": { "api": "nec" },
            "filters": {},
            "outputFormat": "table"
        });
        assert!(parsed_query_rules().validate(&ok).is_ok());

        let bad = json!({ "intent": "UNKNOWN", "confidence": 1.5, "source": {} });
        let fields: Vec<_> = field_errors(parsed_query_rules().validate(&bad).unwrap_err())
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["intent", "confidence", "source.api"]);
    }

    #[test]
    fn delimiter_cannot_collide_with_csv_quoting() {
        for delimiter in ["\"", "\n", "\r"] {
            let err = export_rules()
                .validate(&json!({
                    "data": [],
                    "format": "csv",
                    "options": { "delimiter": delimiter }
                }))
                .unwrap_err();
            assert_eq!(field_errors(err)[0].field, "options.delimiter");
        }
        assert!(export_rules()
            .validate(&json!({ "data": [], "format": "csv", "options": { "delimiter": ";" } }))
            .is_ok());
    }
}
