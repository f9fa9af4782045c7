//! Per-attribute validation rules for import rows.
//!
//! Rules other than `Required` pass on blank values, so optional attributes
//! only need the rules they care about.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TableIoError};
use crate::row::Row;
use crate::spec::EnumCellValue;
use crate::util::{parse_bool_text, parse_date_text};

static RE_EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// One validation rule.
#[derive(Debug, Clone)]
pub enum EnumValidationRule {
    /// Value must be present and non-blank.
    Required,
    /// Value must be a number or numeric text.
    Numeric,
    /// Value must be an integer.
    Integer,
    /// Value must be a boolean or boolean text.
    Boolean,
    /// Value must be a date or ISO date text.
    Date,
    /// Value must look like an e-mail address.
    Email,
    /// Text length at least `n` characters.
    MinLength(usize),
    /// Text length at most `n` characters.
    MaxLength(usize),
    /// Numeric value at least.
    Min(f64),
    /// Numeric value at most.
    Max(f64),
    /// Text must be one of the listed values.
    In(Vec<String>),
    /// Text must match the pattern.
    Regex(Regex),
}

impl EnumValidationRule {
    /// Parse a compact rule string: `required`, `numeric`, `integer`,
    /// `boolean`, `date`, `email`, `min_length:3`, `max_length:10`, `min:0`,
    /// `max:99.5`, `in:a,b,c`, `regex:^[A-Z]+$`.
    pub fn parse(text: &str) -> Result<Self> {
        let (c_name, c_arg) = match text.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg)),
            None => (text.trim(), None),
        };
        let derive_invalid =
            || TableIoError::InvalidOption(format!("Invalid validation rule: {text:?}"));
        let parse_usize = |arg: Option<&str>| {
            arg.and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(derive_invalid)
        };
        let parse_f64 = |arg: Option<&str>| {
            arg.and_then(|v| v.trim().parse::<f64>().ok())
                .ok_or_else(derive_invalid)
        };

        let rule = match (c_name.to_ascii_lowercase().as_str(), c_arg) {
            ("required", None) => Self::Required,
            ("numeric", None) => Self::Numeric,
            ("integer", None) => Self::Integer,
            ("boolean", None) => Self::Boolean,
            ("date", None) => Self::Date,
            ("email", None) => Self::Email,
            ("min_length", arg) => Self::MinLength(parse_usize(arg)?),
            ("max_length", arg) => Self::MaxLength(parse_usize(arg)?),
            ("min", arg) => Self::Min(parse_f64(arg)?),
            ("max", arg) => Self::Max(parse_f64(arg)?),
            ("in", Some(arg)) => Self::In(arg.split(',').map(|v| v.trim().to_string()).collect()),
            ("regex", Some(arg)) => Self::Regex(Regex::new(arg).map_err(|err| {
                TableIoError::InvalidOption(format!("Invalid validation pattern {arg:?}: {err}"))
            })?),
            _ => return Err(derive_invalid()),
        };
        Ok(rule)
    }

    /// Error message when `value` breaks the rule for `attribute`.
    pub fn check(&self, attribute: &str, value: &EnumCellValue) -> Option<String> {
        if value.is_blank() {
            return matches!(self, Self::Required)
                .then(|| format!("The {attribute} field is required."));
        }
        let c_text = value.to_text();
        let n_number = value
            .as_f64()
            .or_else(|| c_text.trim().parse::<f64>().ok());
        let if_ok = match self {
            Self::Required => true,
            Self::Numeric => n_number.is_some_and(f64::is_finite),
            Self::Integer => match value {
                EnumCellValue::Int(_) => true,
                EnumCellValue::Number(n) => n.fract() == 0.0,
                _ => c_text.trim().parse::<i64>().is_ok(),
            },
            Self::Boolean => {
                matches!(value, EnumCellValue::Bool(_)) || parse_bool_text(c_text.trim()).is_some()
            }
            Self::Date => {
                matches!(value, EnumCellValue::Date(_) | EnumCellValue::DateTime(_))
                    || parse_date_text(c_text.trim()).is_some()
            }
            Self::Email => RE_EMAIL
                .as_ref()
                .is_some_and(|re| re.is_match(c_text.trim())),
            Self::MinLength(n) => c_text.chars().count() >= *n,
            Self::MaxLength(n) => c_text.chars().count() <= *n,
            Self::Min(n) => n_number.is_some_and(|v| v >= *n),
            Self::Max(n) => n_number.is_some_and(|v| v <= *n),
            Self::In(l_allowed) => l_allowed.iter().any(|v| *v == c_text),
            Self::Regex(re) => re.is_match(&c_text),
        };
        if if_ok {
            return None;
        }
        Some(match self {
            Self::Required => format!("The {attribute} field is required."),
            Self::Numeric => format!("The {attribute} field must be a number."),
            Self::Integer => format!("The {attribute} field must be an integer."),
            Self::Boolean => format!("The {attribute} field must be true or false."),
            Self::Date => format!("The {attribute} field must be a valid date."),
            Self::Email => format!("The {attribute} field must be a valid email address."),
            Self::MinLength(n) => format!("The {attribute} field must be at least {n} characters."),
            Self::MaxLength(n) => {
                format!("The {attribute} field must not be greater than {n} characters.")
            }
            Self::Min(n) => format!("The {attribute} field must be at least {n}."),
            Self::Max(n) => format!("The {attribute} field must not be greater than {n}."),
            Self::In(_) => format!("The selected {attribute} is invalid."),
            Self::Regex(_) => format!("The {attribute} field format is invalid."),
        })
    }
}

/// Rules keyed by attribute (heading key, or 1-based column number as text).
pub type TypeRuleSet = BTreeMap<String, Vec<EnumValidationRule>>;

/// Parse `attribute -> ["rule", ...]` pairs into a rule set.
pub fn parse_rule_set<'a, I, R>(pairs: I) -> Result<TypeRuleSet>
where
    I: IntoIterator<Item = (&'a str, R)>,
    R: IntoIterator<Item = &'a str>,
{
    let mut dict_rules = TypeRuleSet::new();
    for (c_attr, l_rules) in pairs {
        let l_parsed = l_rules
            .into_iter()
            .map(EnumValidationRule::parse)
            .collect::<Result<Vec<_>>>()?;
        dict_rules.entry(c_attr.to_string()).or_default().extend(l_parsed);
    }
    Ok(dict_rules)
}

/// Apply `rules` to `row`; returns error messages per failing attribute.
pub fn validate_row(row: &Row, rules: &TypeRuleSet) -> BTreeMap<String, Vec<String>> {
    let mut dict_errors = BTreeMap::new();
    for (c_attr, l_rules) in rules {
        let value = row
            .get_by_name(c_attr)
            .or_else(|| {
                c_attr
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n_idx| row.get(n_idx))
            })
            .cloned()
            .unwrap_or_default();
        let l_errors: Vec<String> = l_rules
            .iter()
            .filter_map(|rule| rule.check(c_attr, &value))
            .collect();
        if !l_errors.is_empty() {
            dict_errors.insert(c_attr.clone(), l_errors);
        }
    }
    dict_errors
}
