use derive_more::From;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{client::AttributeValue, Error, Result, SubjectAttributes};

/// A targeting rule. When the rule matches, the subject is evaluated against the allocation named
/// by `allocation_key`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub allocation_key: String,
    #[serde(rename = "type", default)]
    pub rule_type: RuleType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    #[default]
    And,
    Or,
}

impl Rule {
    /// Evaluate the rule against `attributes`.
    ///
    /// Conditions on missing attributes evaluate to `false`. Conditions that cannot be applied to
    /// the attribute value fail with [`Error::InvalidArgument`].
    pub fn eval(&self, attributes: &SubjectAttributes) -> Result<bool> {
        match self.rule_type {
            RuleType::And => {
                for condition in &self.conditions {
                    if !condition.eval(attributes)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            RuleType::Or => {
                if self.conditions.is_empty() {
                    return Ok(true);
                }
                for condition in &self.conditions {
                    if condition.eval(attributes)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Return the first rule in `rules` matching `attributes`.
pub fn find_matching_rule<'a>(
    attributes: &SubjectAttributes,
    rules: &'a [Rule],
) -> Result<Option<&'a Rule>> {
    for rule in rules {
        if rule.eval(attributes)? {
            return Ok(Some(rule));
        }
    }
    Ok(None)
}

/// Return `true` if any of `rules` matches `attributes`.
pub fn matches_any_rule(attributes: &SubjectAttributes, rules: &[Rule]) -> Result<bool> {
    Ok(find_matching_rule(attributes, rules)?.is_some())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub operator: Operator,
    pub attribute: String,
    pub value: ConditionValue,
}

impl Condition {
    pub fn eval(&self, attributes: &SubjectAttributes) -> Result<bool> {
        let attribute = match attributes.get(&self.attribute) {
            None | Some(AttributeValue::Null) => return Ok(false),
            Some(value) => value,
        };
        self.operator
            .eval(attribute, &self.value)
            .map_err(|reason| {
                Error::InvalidArgument(format!(
                    "cannot apply {:?} to attribute {:?}: {}",
                    self.operator, self.attribute, reason
                ))
            })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, From)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    String(String),
    Multiple(Vec<String>),
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Vec<&str>> for ConditionValue {
    fn from(value: Vec<&str>) -> Self {
        Self::Multiple(value.into_iter().map(str::to_owned).collect())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Matches,
    Gte,
    Gt,
    Lte,
    Lt,
    OneOf,
    NotOneOf,
}

impl Operator {
    /// Apply the operator to a present attribute value. Returns a description of the problem if
    /// the operator cannot be applied.
    fn eval(
        &self,
        attribute: &AttributeValue,
        condition_value: &ConditionValue,
    ) -> std::result::Result<bool, String> {
        match self {
            Self::Matches => {
                let AttributeValue::String(s) = attribute else {
                    return Err("MATCHES requires a string attribute".to_owned());
                };
                let ConditionValue::String(pattern) = condition_value else {
                    return Err("MATCHES requires a string pattern".to_owned());
                };
                let regex = Regex::new(pattern).map_err(|err| err.to_string())?;
                Ok(regex.is_match(s))
            }

            Self::OneOf | Self::NotOneOf => {
                let s = match attribute {
                    AttributeValue::String(s) => s.clone(),
                    AttributeValue::Number(n) => n.to_string(),
                    AttributeValue::Boolean(b) => b.to_string(),
                    _ => return Err("expected a scalar attribute".to_owned()),
                };
                let ConditionValue::Multiple(values) = condition_value else {
                    return Err("expected a list of values".to_owned());
                };
                let is_one_of = values.iter().any(|v| v == &s);
                Ok(is_one_of == (*self == Self::OneOf))
            }

            Self::Gte | Self::Gt | Self::Lte | Self::Lt => match condition_value {
                ConditionValue::String(s) => {
                    let condition_version = Version::parse(s)
                        .map_err(|_| format!("{:?} is neither a number nor a version", s))?;
                    let AttributeValue::String(attribute) = attribute else {
                        return Err("version comparison requires a string attribute".to_owned());
                    };
                    let attribute_version = Version::parse(attribute)
                        .map_err(|_| format!("{:?} is not a valid version", attribute))?;
                    Ok(self.compare(&attribute_version, &condition_version))
                }
                ConditionValue::Number(condition_value) => {
                    let AttributeValue::Number(attribute_value) = attribute else {
                        return Err("numeric comparison requires a numeric attribute".to_owned());
                    };
                    Ok(self.compare(attribute_value, condition_value))
                }
                ConditionValue::Multiple(_) => Err("expected a single value".to_owned()),
            },
        }
    }

    fn compare<T: PartialOrd>(&self, attribute: &T, condition: &T) -> bool {
        match self {
            Self::Gt => attribute > condition,
            Self::Gte => attribute >= condition,
            Self::Lt => attribute < condition,
            Self::Lte => attribute <= condition,
            // unreachable
            _ => false,
        }
    }
}
