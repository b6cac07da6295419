use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{
    EventFilterAttribute, EventFilterEvent, EventFilterOperand, FilterError, OperandCount,
    ValueType,
};

/// Comparison applied by a constraint.
///
/// Operators are stateless and identified by their human-readable name, which is also their
/// wire representation (e.g. `"in between"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventFilterOperator {
    // Any attribute type.
    IsSet,
    IsNotSet,
    HasValue,
    HasNoValue,

    // Strings.
    Equals,
    DoesNotEqual,
    In,
    NotIn,
    Contains,
    DoesNotContain,
    StartsWith,
    EndsWith,
    Regex,

    // Numbers.
    EqualTo,
    LessThan,
    GreaterThan,
    InBetween,
    NotBetween,

    // Booleans.
    Is,
}

impl EventFilterOperator {
    /// Every operator, in the order used for name lookup.
    pub const ALL: [EventFilterOperator; 19] = [
        Self::IsSet,
        Self::IsNotSet,
        Self::HasValue,
        Self::HasNoValue,
        Self::Equals,
        Self::DoesNotEqual,
        Self::In,
        Self::NotIn,
        Self::Contains,
        Self::DoesNotContain,
        Self::StartsWith,
        Self::EndsWith,
        Self::Regex,
        Self::EqualTo,
        Self::LessThan,
        Self::GreaterThan,
        Self::InBetween,
        Self::NotBetween,
        Self::Is,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::IsSet => "is set",
            Self::IsNotSet => "is not set",
            Self::HasValue => "has value",
            Self::HasNoValue => "has no value",
            Self::Equals => "equals",
            Self::DoesNotEqual => "does not equal",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Contains => "contains",
            Self::DoesNotContain => "does not contain",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::Regex => "regex",
            Self::EqualTo => "equal to",
            Self::LessThan => "less than",
            Self::GreaterThan => "greater than",
            Self::InBetween => "in between",
            Self::NotBetween => "not between",
            Self::Is => "is",
        }
    }

    /// Look an operator up by its wire name. Names are case-sensitive.
    pub fn from_name(name: &str) -> Option<EventFilterOperator> {
        Self::ALL.into_iter().find(|operator| operator.name() == name)
    }

    pub fn operand_count(self) -> OperandCount {
        match self {
            Self::IsSet | Self::IsNotSet | Self::HasValue | Self::HasNoValue => {
                OperandCount::Exactly(0)
            }
            Self::In | Self::NotIn => OperandCount::Any,
            Self::InBetween | Self::NotBetween => OperandCount::Exactly(2),
            Self::Equals
            | Self::DoesNotEqual
            | Self::Contains
            | Self::DoesNotContain
            | Self::StartsWith
            | Self::EndsWith
            | Self::Regex
            | Self::EqualTo
            | Self::LessThan
            | Self::GreaterThan
            | Self::Is => OperandCount::Exactly(1),
        }
    }

    /// Whether the operator may appear in a constraint of `value_type`.
    pub fn applies_to(self, value_type: ValueType) -> bool {
        match self {
            Self::IsSet | Self::IsNotSet | Self::HasValue | Self::HasNoValue => true,
            Self::Equals
            | Self::DoesNotEqual
            | Self::In
            | Self::NotIn
            | Self::Contains
            | Self::DoesNotContain
            | Self::StartsWith
            | Self::EndsWith
            | Self::Regex => value_type == ValueType::String,
            Self::EqualTo
            | Self::LessThan
            | Self::GreaterThan
            | Self::InBetween
            | Self::NotBetween => value_type == ValueType::Number,
            Self::Is => value_type == ValueType::Boolean,
        }
    }

    /// Evaluate the operator. Operand arity must already have been checked by the caller.
    pub(crate) fn passes(
        self,
        event: &EventFilterEvent,
        attribute: &EventFilterAttribute,
        operands: &[EventFilterOperand],
    ) -> bool {
        let operand = |i: usize| operands.get(i).map(EventFilterOperand::value);
        let value = attribute.value(event);

        match self {
            Self::IsSet => attribute.is_set(event),
            Self::IsNotSet => !attribute.is_set(event),
            Self::HasValue => attribute.is_set(event) && value.is_some(),
            Self::HasNoValue => attribute.is_set(event) && value.is_none(),

            Self::Equals | Self::Is => value.as_deref() == operand(0),
            Self::DoesNotEqual => value.as_deref() != operand(0),
            Self::In | Self::NotIn => {
                let is_in = value
                    .as_deref()
                    .is_some_and(|v| operands.iter().any(|o| o.value() == v));
                is_in == (self == Self::In)
            }
            Self::Contains => matches!((&value, operand(0)), (Some(v), Some(o)) if v.contains(o)),
            Self::DoesNotContain => {
                !matches!((&value, operand(0)), (Some(v), Some(o)) if v.contains(o))
            }
            Self::StartsWith => {
                matches!((&value, operand(0)), (Some(v), Some(o)) if v.starts_with(o))
            }
            Self::EndsWith => matches!((&value, operand(0)), (Some(v), Some(o)) if v.ends_with(o)),
            Self::Regex => {
                let (Some(v), Some(pattern)) = (&value, operand(0)) else {
                    return false;
                };
                match Regex::new(pattern) {
                    Ok(regex) => regex.is_match(v),
                    Err(err) => {
                        log::warn!(target: "beacon", pattern; "invalid regex in rule: {:?}", err);
                        false
                    }
                }
            }

            Self::EqualTo | Self::LessThan | Self::GreaterThan | Self::InBetween
            | Self::NotBetween => self
                .compare_numbers(value.as_deref(), operands)
                .unwrap_or(false),
        }
    }

    /// Numeric comparison on parsed operands, `None` if anything fails to parse.
    fn compare_numbers(self, value: Option<&str>, operands: &[EventFilterOperand]) -> Option<bool> {
        let value: f64 = value?.parse().ok()?;
        let operand = |i: usize| -> Option<f64> { operands.get(i)?.value().parse().ok() };

        Some(match self {
            Self::EqualTo => value == operand(0)?,
            Self::LessThan => value < operand(0)?,
            Self::GreaterThan => value > operand(0)?,
            Self::InBetween => operand(0)? <= value && value <= operand(1)?,
            Self::NotBetween => {
                let (low, high) = (operand(0)?, operand(1)?);
                value < low || value > high
            }
            _ => return None,
        })
    }
}

impl TryFrom<String> for EventFilterOperator {
    type Error = FilterError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        EventFilterOperator::from_name(&name)
            .ok_or_else(|| FilterError::Schema(format!("unknown operator `{name}`")))
    }
}

impl From<EventFilterOperator> for String {
    fn from(operator: EventFilterOperator) -> String {
        operator.name().to_owned()
    }
}
