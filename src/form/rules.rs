use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::controller::{FormError, FormResult};
use super::validation::{Schema, Validator, ValidatorResult};
use super::value::{FieldKey, FieldValue, FormErrors, FormValues};

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'’*+/=?^_`{|}~-]+@[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*$")
        .expect("email pattern is a valid regex")
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:(?:https?|ftp):)?//",
        r"(?:[^\s:@/]+(?::[^\s@/]*)?@)?",
        r"(?:(?:\d{1,3}\.){3}\d{1,3}|(?:[\p{L}\d](?:[\p{L}\d._~-]*[\p{L}\d])?\.)+\p{L}{2,}\.?|localhost)",
        r"(?::\d*)?(?:/[^\s?#]*)?(?:\?[^\s#]*)?(?:#\S*)?$",
    ))
    .expect("url pattern is a valid regex")
});

/// A compiled regex that (de)serializes as its source text.
#[derive(Clone, Debug)]
pub struct RulePattern(Regex);

impl RulePattern {
    pub fn new(source: &str) -> FormResult<Self> {
        Regex::new(source)
            .map(Self)
            .map_err(|error| FormError::InvalidPattern {
                pattern: source.to_string(),
                reason: error.to_string(),
            })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Regex> for RulePattern {
    fn from(regex: Regex) -> Self {
        Self(regex)
    }
}

impl PartialEq for RulePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for RulePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RulePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Regex::new(&source).map(Self).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    Required {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Email {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Url {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    OneOf {
        values: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Max {
        length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Min {
        length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Equals {
        value: FieldValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pattern {
        regex: RulePattern,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Rule {
    fn message_slot(&mut self) -> &mut Option<String> {
        match self {
            Rule::Required { message }
            | Rule::Email { message }
            | Rule::Url { message }
            | Rule::OneOf { message, .. }
            | Rule::Max { message, .. }
            | Rule::Min { message, .. }
            | Rule::Equals { message, .. }
            | Rule::Pattern { message, .. } => message,
        }
    }

    /// Returns the failure message, or `None` when `value` passes. Every rule
    /// except `Required` lets falsy values through.
    pub fn check(&self, name: &FieldKey, value: Option<&FieldValue>) -> Option<String> {
        let truthy = value.filter(|value| value.is_truthy());
        if let Rule::Required { message } = self {
            return match truthy {
                Some(_) => None,
                None => Some(message.clone().unwrap_or_else(|| format!("{name} is required."))),
            };
        }
        let value = truthy?;
        let text = value.to_string();

        let (passed, message, default) = match self {
            Rule::Required { .. } => return None,
            Rule::Email { message } => (
                EMAIL_REGEX.is_match(&text),
                message,
                format!("{name} is not a valid email address."),
            ),
            Rule::Url { message } => (
                URL_REGEX.is_match(&text),
                message,
                format!("{name} is not a valid url."),
            ),
            Rule::OneOf { values, message } => (
                values.iter().any(|candidate| candidate == &text),
                message,
                format!("{name} must match one of {}", values.join(", ")),
            ),
            Rule::Max { length, message } => (
                value.length() <= *length,
                message,
                format!("{name} must be no more than {length} characters."),
            ),
            Rule::Min { length, message } => (
                value.length() >= *length,
                message,
                format!("{name} must be at least {length} characters."),
            ),
            Rule::Equals {
                value: expected,
                message,
            } => (
                value == expected,
                message,
                format!("{name} is not equal to {expected}."),
            ),
            Rule::Pattern { regex, message } => (
                regex.is_match(&text),
                message,
                format!("{name} is not valid."),
            ),
        };
        (!passed).then(|| message.clone().unwrap_or(default))
    }
}

/// Ordered rules for one field. The first failing rule decides the message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldRules(Vec<Rule>);

impl FieldRules {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.0.push(rule);
        self
    }

    pub fn required(self) -> Self {
        self.rule(Rule::Required { message: None })
    }

    pub fn email(self) -> Self {
        self.rule(Rule::Email { message: None })
    }

    pub fn url(self) -> Self {
        self.rule(Rule::Url { message: None })
    }

    pub fn one_of<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule(Rule::OneOf {
            values: values.into_iter().map(Into::into).collect(),
            message: None,
        })
    }

    pub fn max(self, length: usize) -> Self {
        self.rule(Rule::Max {
            length,
            message: None,
        })
    }

    pub fn min(self, length: usize) -> Self {
        self.rule(Rule::Min {
            length,
            message: None,
        })
    }

    pub fn equals(self, value: impl Into<FieldValue>) -> Self {
        self.rule(Rule::Equals {
            value: value.into(),
            message: None,
        })
    }

    pub fn pattern(self, regex: impl Into<RulePattern>) -> Self {
        self.rule(Rule::Pattern {
            regex: regex.into(),
            message: None,
        })
    }

    /// Overrides the message of the most recently added rule.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        if let Some(rule) = self.0.last_mut() {
            *rule.message_slot() = Some(message.into());
        }
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.0
    }

    pub fn check(&self, name: &FieldKey, value: Option<&FieldValue>) -> Option<String> {
        self.0.iter().find_map(|rule| rule.check(name, value))
    }
}

/// Declarative rule table keyed by field name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorSchema(BTreeMap<FieldKey, FieldRules>);

impl ValidatorSchema {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn field(mut self, name: impl Into<FieldKey>, rules: FieldRules) -> Self {
        self.0.insert(name.into(), rules);
        self
    }

    pub fn from_json(source: &str) -> FormResult<Self> {
        serde_json::from_str(source)
            .map_err(|error| FormError::InvalidRuleTable(error.to_string()))
    }

    pub fn rules_for(&self, name: &str) -> Option<&FieldRules> {
        self.0.get(name)
    }
}

impl Validator for ValidatorSchema {
    fn validate(&self, values: &FormValues) -> ValidatorResult {
        let errors = self
            .0
            .iter()
            .filter_map(|(name, rules)| {
                rules
                    .check(name, values.get(name.as_str()))
                    .map(|message| (name.clone(), message))
            })
            .collect::<FormErrors>();
        ValidatorResult { errors }
    }
}

pub fn validator(schema: ValidatorSchema) -> Schema {
    Arc::new(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> FormValues {
        FormValues::new().with("foo", "foo").with("bar", "bar")
    }

    fn errors_of(schema: ValidatorSchema, values: &FormValues) -> FormErrors {
        schema.validate(values).errors
    }

    #[test]
    fn required_uses_default_and_custom_messages() {
        let empty = FormValues::new().with("foo", "");
        let errors = errors_of(
            ValidatorSchema::new().field("foo", FieldRules::new().required()),
            &empty,
        );
        assert_eq!(errors.get("foo").map(String::as_str), Some("foo is required."));

        let errors = errors_of(
            ValidatorSchema::new().field("foo", FieldRules::new().required().message("test")),
            &empty,
        );
        assert_eq!(errors.get("foo").map(String::as_str), Some("test"));
    }

    #[test]
    fn email_and_url_formats() {
        let schema = ValidatorSchema::new()
            .field("foo", FieldRules::new().email())
            .field("bar", FieldRules::new().url());
        let errors = errors_of(schema.clone(), &values());
        assert_eq!(
            errors.get("foo").map(String::as_str),
            Some("foo is not a valid email address.")
        );
        assert_eq!(errors.get("bar").map(String::as_str), Some("bar is not a valid url."));

        let good = FormValues::new()
            .with("foo", "e@e.com")
            .with("bar", "https://foo.com/path?q=1");
        assert!(errors_of(schema, &good).is_empty());
    }

    #[test]
    fn one_of_lists_allowed_values() {
        let errors = errors_of(
            ValidatorSchema::new().field("foo", FieldRules::new().one_of(["foo", "bar"])),
            &FormValues::new().with("foo", "bam"),
        );
        assert_eq!(
            errors.get("foo").map(String::as_str),
            Some("foo must match one of foo, bar")
        );
    }

    #[test]
    fn length_bounds() {
        let errors = errors_of(
            ValidatorSchema::new()
                .field("foo", FieldRules::new().max(2))
                .field("bar", FieldRules::new().min(4)),
            &values(),
        );
        assert_eq!(
            errors.get("foo").map(String::as_str),
            Some("foo must be no more than 2 characters.")
        );
        assert_eq!(
            errors.get("bar").map(String::as_str),
            Some("bar must be at least 4 characters.")
        );
    }

    #[test]
    fn equals_and_pattern() {
        let errors = errors_of(
            ValidatorSchema::new()
                .field("foo", FieldRules::new().equals("bar"))
                .field(
                    "bar",
                    FieldRules::new().pattern(RulePattern::new("boom").expect("valid regex")),
                ),
            &values(),
        );
        assert_eq!(
            errors.get("foo").map(String::as_str),
            Some("foo is not equal to bar.")
        );
        assert_eq!(errors.get("bar").map(String::as_str), Some("bar is not valid."));
    }

    #[test]
    fn first_failing_rule_in_declaration_order_wins() {
        let schema = ValidatorSchema::new().field(
            "foo",
            FieldRules::new()
                .min(10)
                .message("too short")
                .email()
                .message("not an email"),
        );
        let errors = errors_of(schema, &FormValues::new().with("foo", "abc"));
        assert_eq!(errors.get("foo").map(String::as_str), Some("too short"));
    }

    #[test]
    fn non_required_rules_skip_falsy_values() {
        let schema = ValidatorSchema::new().field("foo", FieldRules::new().email().min(3));
        assert!(errors_of(schema.clone(), &FormValues::new().with("foo", "")).is_empty());
        assert!(errors_of(schema, &FormValues::new()).is_empty());
    }

    #[test]
    fn absent_fields_fail_required() {
        let schema = ValidatorSchema::new().field("foo", FieldRules::new().required());
        let errors = errors_of(schema, &FormValues::new().with("bar", "bar"));
        assert!(errors.contains_key("foo"));
    }

    #[test]
    fn rule_table_loads_from_json() {
        let schema = ValidatorSchema::from_json(
            r#"{
                "email": [
                    { "rule": "required", "message": "email please" },
                    { "rule": "email" }
                ],
                "code": [{ "rule": "pattern", "regex": "^[0-9]{4}$" }]
            }"#,
        )
        .expect("rule table parses");
        let errors = errors_of(
            schema,
            &FormValues::new().with("email", "").with("code", "12a4"),
        );
        assert_eq!(errors.get("email").map(String::as_str), Some("email please"));
        assert_eq!(errors.get("code").map(String::as_str), Some("code is not valid."));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        assert!(matches!(
            RulePattern::new("(unclosed"),
            Err(FormError::InvalidPattern { .. })
        ));
        assert!(matches!(
            ValidatorSchema::from_json(r#"{"code": [{ "rule": "pattern", "regex": "(" }]}"#),
            Err(FormError::InvalidRuleTable(_))
        ));
    }
}
