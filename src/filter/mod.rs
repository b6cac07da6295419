//! Serializable event rules.
//!
//! An [`EventFilter`] matches an event type plus a list of property filters, each pairing an
//! [`EventFilterAttribute`] with an [`EventFilterConstraint`]. Rules are delivered by the server
//! as JSON:
//!
//! ```json
//! {
//!   "type": "purchase",
//!   "filter": [
//!     {
//!       "attribute": { "type": "property", "property": "price" },
//!       "constraint": {
//!         "type": "number",
//!         "operator": "in between",
//!         "operands": [{ "type": "constant", "value": "10" }, { "type": "constant", "value": "20" }]
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Unknown `type` discriminants and unknown operator names are rejected, never guessed.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ExportedEvent;

mod attribute;
mod constraint;
mod error;
mod operator;
mod rule_set;

pub use attribute::EventFilterAttribute;
pub use constraint::{EventFilterConstraint, EventFilterOperand, ValueType};
pub use error::{FilterError, OperandCount};
pub use operator::EventFilterOperator;
pub use rule_set::{RuleSet, TryParse};

/// The shape rules are evaluated against. Built on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilterEvent {
    pub event_type: String,
    pub properties: HashMap<String, Value>,
    pub timestamp: Option<f64>,
}

impl EventFilterEvent {
    pub fn new(
        event_type: impl Into<String>,
        properties: HashMap<String, Value>,
        timestamp: Option<f64>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            properties,
            timestamp,
        }
    }
}

impl From<&ExportedEvent> for EventFilterEvent {
    fn from(event: &ExportedEvent) -> Self {
        Self {
            event_type: event.event_type.clone().unwrap_or_default(),
            properties: event.properties.clone(),
            timestamp: Some(event.timestamp),
        }
    }
}

/// A rule: target event type plus property filters that must all pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(rename = "type")]
    pub event_type: String,
    pub filter: Vec<EventPropertyFilter>,
}

impl EventFilter {
    pub fn new(event_type: impl Into<String>, filter: Vec<EventPropertyFilter>) -> Self {
        Self {
            event_type: event_type.into(),
            filter,
        }
    }

    /// Parse a single rule from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, FilterError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, FilterError> {
        Ok(serde_json::to_string(self)?)
    }

    /// `false` on event type mismatch; otherwise every property filter must pass (an empty
    /// list passes).
    ///
    /// # Errors
    ///
    /// Propagates [`FilterError::OperatorArity`] from the first malformed constraint reached.
    pub fn passes(&self, event: &EventFilterEvent) -> Result<bool, FilterError> {
        if event.event_type != self.event_type {
            return Ok(false);
        }
        for property_filter in &self.filter {
            if !property_filter.passes(event)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// One attribute/constraint pair of an [`EventFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventPropertyFilter {
    pub attribute: EventFilterAttribute,
    pub constraint: EventFilterConstraint,
}

impl EventPropertyFilter {
    pub fn property(name: impl Into<String>, constraint: EventFilterConstraint) -> Self {
        Self {
            attribute: EventFilterAttribute::property(name),
            constraint,
        }
    }

    pub fn timestamp(constraint: EventFilterConstraint) -> Self {
        Self {
            attribute: EventFilterAttribute::Timestamp,
            constraint,
        }
    }

    pub fn passes(&self, event: &EventFilterEvent) -> Result<bool, FilterError> {
        self.constraint.passes(event, &self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::{
        EventFilter, EventFilterAttribute, EventFilterConstraint, EventFilterEvent,
        EventFilterOperand, EventFilterOperator as Op, EventPropertyFilter, FilterError,
        OperandCount,
    };

    fn event(event_type: &str, properties: serde_json::Value) -> EventFilterEvent {
        EventFilterEvent::new(
            event_type,
            serde_json::from_value(properties).unwrap(),
            Some(1_000.0),
        )
    }

    fn passes_with(constraint: EventFilterConstraint, value: serde_json::Value) -> bool {
        EventFilter::new("e", vec![EventPropertyFilter::property("p", constraint)])
            .passes(&event("e", json!({ "p": value })))
            .unwrap()
    }

    #[test]
    fn string_equals() {
        assert!(passes_with(EventFilterConstraint::string_equals("10"), json!("10")));
        assert!(!passes_with(EventFilterConstraint::string_equals("10"), json!("9")));
    }

    #[test]
    fn number_in_between() {
        let constraint = EventFilterConstraint::number_in_between(1.0, 2.0);
        assert!(passes_with(constraint.clone(), json!("1.5")));
        assert!(!passes_with(constraint.clone(), json!("3")));
        assert!(!passes_with(constraint, json!("abc")));
    }

    #[test]
    fn boolean_is() {
        let constraint = EventFilterConstraint::boolean_is(false);
        assert!(passes_with(constraint.clone(), json!("false")));
        assert!(passes_with(constraint.clone(), json!(false)));
        assert!(!passes_with(constraint.clone(), json!("true")));
        assert!(!passes_with(constraint.clone(), json!("False")));
        assert!(!passes_with(constraint, json!(0)));
    }

    #[test]
    fn type_mismatch_short_circuits() {
        // The constraint is malformed, but it is never reached.
        let filter = EventFilter::new(
            "purchase",
            vec![EventPropertyFilter::property(
                "p",
                EventFilterConstraint::string(Op::Equals, Vec::<String>::new()),
            )],
        );
        assert_eq!(filter.passes(&event("view", json!({}))), Ok(false));
    }

    #[test]
    fn empty_filter_list_matches_any_event_of_the_type() {
        let filter = EventFilter::new("session_start", vec![]);
        assert_eq!(filter.passes(&event("session_start", json!({}))), Ok(true));
        assert_eq!(filter.passes(&event("session_end", json!({}))), Ok(false));
    }

    #[test]
    fn all_property_filters_must_pass() {
        let filter = EventFilter::new(
            "purchase",
            vec![
                EventPropertyFilter::property("brand", EventFilterConstraint::string_equals("acme")),
                EventPropertyFilter::property(
                    "price",
                    EventFilterConstraint::number(Op::GreaterThan, ["100"]),
                ),
            ],
        );
        assert_eq!(
            filter.passes(&event("purchase", json!({ "brand": "acme", "price": 150 }))),
            Ok(true)
        );
        assert_eq!(
            filter.passes(&event("purchase", json!({ "brand": "acme", "price": 50 }))),
            Ok(false)
        );
    }

    #[test]
    fn wrong_operand_count_is_an_error() {
        let filter = EventFilter::new(
            "e",
            vec![EventPropertyFilter::property(
                "p",
                EventFilterConstraint::string(Op::Equals, Vec::<String>::new()),
            )],
        );
        assert_eq!(
            filter.passes(&event("e", json!({ "p": "x" }))),
            Err(FilterError::OperatorArity {
                operator: "equals",
                expected: OperandCount::Exactly(1),
                found: 0,
            })
        );

        let between = EventFilterConstraint::number(Op::InBetween, ["1"]);
        assert!(between
            .passes(&event("e", json!({})), &EventFilterAttribute::Timestamp)
            .is_err());

        // `in` takes any number of operands, including none.
        let any = EventFilterConstraint::string_in(Vec::<String>::new());
        assert_eq!(
            any.passes(&event("e", json!({ "p": "x" })), &EventFilterAttribute::property("p")),
            Ok(false)
        );
    }

    #[test]
    fn wire_format_matches_server_schema() {
        let filter = EventFilter::new(
            "purchase",
            vec![
                EventPropertyFilter::property("price", EventFilterConstraint::number_in_between(10.0, 20.0)),
                EventPropertyFilter::timestamp(EventFilterConstraint::number(Op::IsSet, Vec::<String>::new())),
                EventPropertyFilter::property("gift", EventFilterConstraint::boolean_is(true)),
            ],
        );

        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({
                "type": "purchase",
                "filter": [
                    {
                        "attribute": { "type": "property", "property": "price" },
                        "constraint": {
                            "type": "number",
                            "operator": "in between",
                            "operands": [
                                { "type": "constant", "value": "10" },
                                { "type": "constant", "value": "20" }
                            ]
                        }
                    },
                    {
                        "attribute": { "type": "timestamp" },
                        "constraint": { "type": "number", "operator": "is set", "operands": [] }
                    },
                    {
                        "attribute": { "type": "property", "property": "gift" },
                        "constraint": {
                            "type": "boolean",
                            "operator": "is",
                            "operands": [{ "type": "constant", "value": "true" }],
                            "value": "true"
                        }
                    }
                ]
            })
        );
    }

    #[test]
    fn every_operator_survives_serialization() {
        for op in Op::ALL {
            let count = match op.operand_count() {
                OperandCount::Exactly(n) => n,
                OperandCount::Any => 3,
            };
            let values: Vec<String> = (0..count).map(|i| i.to_string()).collect();
            for constraint in [
                EventFilterConstraint::string(op, values.clone()),
                EventFilterConstraint::number(op, values.clone()),
                EventFilterConstraint::boolean(op, true),
            ] {
                let well_typed = op.applies_to(constraint.value_type());
                let filter = EventFilter::new(
                    "e",
                    vec![
                        EventPropertyFilter::property("p", constraint.clone()),
                        EventPropertyFilter::timestamp(constraint),
                    ],
                );
                let json = filter.to_json().unwrap();
                if well_typed {
                    assert_eq!(EventFilter::from_json(&json).unwrap(), filter, "{json}");
                } else {
                    assert!(
                        matches!(EventFilter::from_json(&json), Err(FilterError::Schema(_))),
                        "{json}"
                    );
                }
            }
        }
    }

    #[test]
    fn unknown_discriminants_are_rejected() {
        let with_attribute = |attribute: serde_json::Value| {
            json!({
                "type": "e",
                "filter": [{
                    "attribute": attribute,
                    "constraint": { "type": "string", "operator": "equals", "operands": [{ "type": "constant", "value": "x" }] }
                }]
            })
            .to_string()
        };
        assert!(EventFilter::from_json(&with_attribute(json!({ "type": "property", "property": "p" }))).is_ok());
        assert!(matches!(
            EventFilter::from_json(&with_attribute(json!({ "type": "customer_property", "property": "p" }))),
            Err(FilterError::Schema(_))
        ));

        let with_constraint = |constraint: serde_json::Value| {
            json!({
                "type": "e",
                "filter": [{ "attribute": { "type": "timestamp" }, "constraint": constraint }]
            })
            .to_string()
        };
        assert!(EventFilter::from_json(&with_constraint(
            json!({ "type": "date", "operator": "equals", "operands": [] })
        ))
        .is_err());
        assert!(EventFilter::from_json(&with_constraint(
            json!({ "type": "string", "operator": "sounds like", "operands": [] })
        ))
        .is_err());
        assert!(EventFilter::from_json(&with_constraint(
            json!({ "type": "string", "operator": "equals", "operands": [{ "type": "variable", "value": "x" }] })
        ))
        .is_err());
    }

    #[test]
    fn operator_must_apply_to_constraint_type() {
        let with_constraint = |constraint: serde_json::Value| {
            json!({
                "type": "e",
                "filter": [{ "attribute": { "type": "property", "property": "p" }, "constraint": constraint }]
            })
            .to_string()
        };

        let number_equals = EventFilter::from_json(&with_constraint(json!({
            "type": "number",
            "operator": "equals",
            "operands": [{ "type": "constant", "value": "1" }]
        })));
        assert!(
            matches!(
                &number_equals,
                Err(FilterError::Schema(message))
                    if message.contains("operator `equals` does not apply to number constraints")
            ),
            "{number_equals:?}"
        );

        assert!(EventFilter::from_json(&with_constraint(json!({
            "type": "string",
            "operator": "is",
            "operands": [{ "type": "constant", "value": "true" }]
        })))
        .is_err());
        assert!(EventFilter::from_json(&with_constraint(json!({
            "type": "number",
            "operator": "equal to",
            "operands": [{ "type": "constant", "value": "1" }]
        })))
        .is_ok());
        assert!(EventFilter::from_json(&with_constraint(json!({
            "type": "boolean",
            "operator": "has value",
            "operands": [],
            "value": "true"
        })))
        .is_ok());
    }

    #[test]
    fn constraints_compare_by_operator_and_operands() {
        assert_eq!(
            EventFilterConstraint::string_equals("a"),
            EventFilterConstraint::String {
                operator: Op::from_name("equals").unwrap(),
                operands: vec![EventFilterOperand::from("a")],
            }
        );
        assert_ne!(
            EventFilterConstraint::string_equals("a"),
            EventFilterConstraint::number(Op::Equals, ["a"])
        );
    }

    #[test]
    fn builds_from_exported_event() {
        use crate::event::{ExportedEvent, Project, Route};

        let exported = ExportedEvent::new(Project::new("t"), Route::TrackEvents, 12.0)
            .with_event_type("purchase")
            .with_properties(HashMap::from([("price".to_owned(), json!(15))]));
        let filter = EventFilter::new(
            "purchase",
            vec![EventPropertyFilter::property(
                "price",
                EventFilterConstraint::number_in_between(10.0, 20.0),
            )],
        );
        assert_eq!(filter.passes(&EventFilterEvent::from(&exported)), Ok(true));
    }
}
