use derive_more::Display;

/// Number of operands an operator accepts.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum OperandCount {
    #[display(fmt = "{}", _0)]
    Exactly(usize),
    #[display(fmt = "any number of")]
    Any,
}

impl OperandCount {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            OperandCount::Exactly(expected) => expected == count,
            OperandCount::Any => true,
        }
    }
}

/// Errors raised by rule definitions.
///
/// Both indicate a rule the server should never have sent. They are reported instead of being
/// evaluated as "no match" so that the broken rule gets noticed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FilterError {
    /// The constraint's operand list does not fit its operator.
    #[error("operator `{operator}` expects {expected} operand(s), got {found}")]
    OperatorArity {
        operator: &'static str,
        expected: OperandCount,
        found: usize,
    },

    /// The rule JSON does not match the wire schema (unknown `type`, unknown operator,
    /// missing field).
    #[error("invalid rule definition: {0}")]
    Schema(String),
}

impl From<serde_json::Error> for FilterError {
    fn from(value: serde_json::Error) -> Self {
        FilterError::Schema(value.to_string())
    }
}
