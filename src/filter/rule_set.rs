use serde::{Deserialize, Serialize};

use super::{EventFilter, EventFilterEvent, FilterError};

/// `TryParse` allows an element to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// An ordered list of server-delivered rules, e.g. the triggers of in-app messages.
///
/// A rule the SDK does not understand is kept as [`TryParse::ParseFailed`] and never matches,
/// so one bad rule does not take the others down with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<TryParse<EventFilter>>,
}

impl RuleSet {
    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<RuleSet, FilterError> {
        let rule_set: RuleSet = serde_json::from_str(json)?;
        for (index, rule) in rule_set.rules.iter().enumerate() {
            if let TryParse::ParseFailed(raw) = rule {
                log::warn!(target: "beacon", index; "discarding unsupported rule: {}", raw);
            }
        }
        Ok(rule_set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules that could not be parsed.
    pub fn rejected(&self) -> usize {
        self.rules
            .iter()
            .filter(|rule| matches!(rule, TryParse::ParseFailed(_)))
            .count()
    }

    /// Index of the first rule matching `event`.
    ///
    /// A rule whose evaluation fails is logged and skipped, so a single malformed rule cannot
    /// block the rest of the set.
    pub fn first_match(&self, event: &EventFilterEvent) -> Option<usize> {
        self.rules.iter().enumerate().find_map(|(index, rule)| {
            let rule: Option<&EventFilter> = rule.into();
            match rule?.passes(event) {
                Ok(true) => Some(index),
                Ok(false) => None,
                Err(err) => {
                    log::warn!(target: "beacon",
                               index,
                               event_type:display = event.event_type;
                               "rule evaluation failed: {}", err);
                    None
                }
            }
        })
    }
}
