use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventFilterEvent;

/// What part of an event a constraint looks at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventFilterAttribute {
    /// A named event property.
    Property { property: String },
    /// The event timestamp.
    Timestamp,
}

impl EventFilterAttribute {
    pub fn property(name: impl Into<String>) -> Self {
        Self::Property {
            property: name.into(),
        }
    }

    /// Whether the event carries this attribute at all (a property set to `null` counts).
    pub fn is_set(&self, event: &EventFilterEvent) -> bool {
        match self {
            Self::Property { property } => event.properties.contains_key(property),
            Self::Timestamp => event.timestamp.is_some(),
        }
    }

    /// Textual value of the attribute, `None` when it is missing or `null`.
    ///
    /// Numbers and booleans are rendered as their JSON text, so `10` resolves to `"10"` and
    /// `true` to `"true"`.
    pub fn value(&self, event: &EventFilterEvent) -> Option<String> {
        match self {
            Self::Property { property } => match event.properties.get(property)? {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
            Self::Timestamp => event.timestamp.map(|t| t.to_string()),
        }
    }
}
