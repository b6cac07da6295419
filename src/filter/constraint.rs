use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::{EventFilterAttribute, EventFilterEvent, EventFilterOperator, FilterError};

/// Value type a constraint compares, i.e. its `type` discriminant.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    #[display(fmt = "string")]
    String,
    #[display(fmt = "number")]
    Number,
    #[display(fmt = "boolean")]
    Boolean,
}

/// A literal operand. Operands are always text; numeric operators parse them when evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventFilterOperand {
    Constant { value: String },
}

impl EventFilterOperand {
    pub fn value(&self) -> &str {
        match self {
            Self::Constant { value } => value,
        }
    }
}

impl From<&str> for EventFilterOperand {
    fn from(value: &str) -> Self {
        Self::Constant {
            value: value.to_owned(),
        }
    }
}

impl From<String> for EventFilterOperand {
    fn from(value: String) -> Self {
        Self::Constant { value }
    }
}

/// Operator plus operands, bound to the value type it compares.
///
/// Two constraints are equal when they have the same type, operator and operands. Deserializing
/// rejects an operator that does not apply to the constraint's type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", try_from = "WireConstraint")]
pub enum EventFilterConstraint {
    String {
        operator: EventFilterOperator,
        operands: Vec<EventFilterOperand>,
    },
    Number {
        operator: EventFilterOperator,
        operands: Vec<EventFilterOperand>,
    },
    Boolean {
        operator: EventFilterOperator,
        operands: Vec<EventFilterOperand>,
        /// The literal compared by `is`; `"true"` for operators without operands.
        value: String,
    },
}

/// Unchecked form of [`EventFilterConstraint`] as it appears on the wire.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireConstraint {
    String {
        operator: EventFilterOperator,
        operands: Vec<EventFilterOperand>,
    },
    Number {
        operator: EventFilterOperator,
        operands: Vec<EventFilterOperand>,
    },
    Boolean {
        operator: EventFilterOperator,
        operands: Vec<EventFilterOperand>,
        value: String,
    },
}

impl TryFrom<WireConstraint> for EventFilterConstraint {
    type Error = FilterError;

    fn try_from(wire: WireConstraint) -> Result<Self, Self::Error> {
        let constraint = match wire {
            WireConstraint::String { operator, operands } => Self::String { operator, operands },
            WireConstraint::Number { operator, operands } => Self::Number { operator, operands },
            WireConstraint::Boolean {
                operator,
                operands,
                value,
            } => Self::Boolean {
                operator,
                operands,
                value,
            },
        };
        let (operator, value_type) = (constraint.operator(), constraint.value_type());
        if !operator.applies_to(value_type) {
            return Err(FilterError::Schema(format!(
                "operator `{}` does not apply to {} constraints",
                operator.name(),
                value_type
            )));
        }
        Ok(constraint)
    }
}

fn operands<I, S>(values: I) -> Vec<EventFilterOperand>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values
        .into_iter()
        .map(|v| EventFilterOperand::from(v.into()))
        .collect()
}

impl EventFilterConstraint {
    pub fn string<I, S>(operator: EventFilterOperator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::String {
            operator,
            operands: operands(values),
        }
    }

    pub fn number<I, S>(operator: EventFilterOperator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Number {
            operator,
            operands: operands(values),
        }
    }

    /// Boolean constraint. `value` becomes the single operand of operators that take one.
    pub fn boolean(operator: EventFilterOperator, value: bool) -> Self {
        let value = value.to_string();
        let operands = if operator.operand_count().accepts(1) {
            vec![EventFilterOperand::from(value.clone())]
        } else {
            Vec::new()
        };
        Self::Boolean {
            operator,
            operands,
            value,
        }
    }

    pub fn string_equals(value: impl Into<String>) -> Self {
        Self::string(EventFilterOperator::Equals, [value])
    }

    pub fn string_in<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::string(EventFilterOperator::In, values)
    }

    pub fn number_equal_to(value: f64) -> Self {
        Self::number(EventFilterOperator::EqualTo, [value.to_string()])
    }

    pub fn number_in_between(low: f64, high: f64) -> Self {
        Self::number(
            EventFilterOperator::InBetween,
            [low.to_string(), high.to_string()],
        )
    }

    pub fn boolean_is(value: bool) -> Self {
        Self::boolean(EventFilterOperator::Is, value)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String { .. } => ValueType::String,
            Self::Number { .. } => ValueType::Number,
            Self::Boolean { .. } => ValueType::Boolean,
        }
    }

    pub fn operator(&self) -> EventFilterOperator {
        match self {
            Self::String { operator, .. }
            | Self::Number { operator, .. }
            | Self::Boolean { operator, .. } => *operator,
        }
    }

    pub fn operands(&self) -> &[EventFilterOperand] {
        match self {
            Self::String { operands, .. }
            | Self::Number { operands, .. }
            | Self::Boolean { operands, .. } => operands,
        }
    }

    /// Evaluate against `attribute` of `event`.
    ///
    /// # Errors
    ///
    /// [`FilterError::OperatorArity`] if the operand list does not fit the operator. This is
    /// never turned into `false`.
    pub fn passes(
        &self,
        event: &EventFilterEvent,
        attribute: &EventFilterAttribute,
    ) -> Result<bool, FilterError> {
        let operator = self.operator();
        let operands = self.operands();
        let expected = operator.operand_count();
        if !expected.accepts(operands.len()) {
            return Err(FilterError::OperatorArity {
                operator: operator.name(),
                expected,
                found: operands.len(),
            });
        }
        Ok(operator.passes(event, attribute, operands))
    }
}
