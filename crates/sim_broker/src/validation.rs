//! Specification compatibility gate and runtime payload validation.
//!
//! Before a run starts, every module's `/spec` document is checked against
//! all the others: one shared version URI, feature cover in both directions
//! per event type, and — for every Tx↔Rx pairing of a common event type —
//! the receiver's required-field graph must be a subset of the sender's,
//! resolved recursively through `$ref`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use sim_core::event::{DepartedArrivedDetails, Event, EventType};
use sim_core::spec::{EventDefinition, FeatureDefinition, ModuleSpecification, TxRx};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("mismatch in event schema version: {0:?}")]
    MismatchVersion(Vec<String>),
    #[error("mismatch in event[{event_type}] features between {tx} and {rx}")]
    MismatchFeature {
        event_type: String,
        tx: String,
        rx: String,
    },
    #[error("mismatch in event[{event_type}] schemas between tx {tx} and rx {rx}")]
    MismatchSchema {
        event_type: String,
        tx: String,
        rx: String,
    },
    #[error("cannot resolve {reference} in a schema of {module}")]
    UnresolvedRef { module: String, reference: String },
    #[error("event[{event_type}] from {module} is missing required field {field}")]
    MissingRequired {
        event_type: String,
        module: String,
        field: String,
    },
    #[error("event[{event_type}] from {module} carries userId/demandId unpaired")]
    UnpairedIdentity { event_type: String, module: String },
}

/// A node of a JSON schema with its document root, for `$ref` resolution.
#[derive(Debug, Clone, Copy)]
struct SchemaNode<'a> {
    root: &'a Value,
    current: &'a Value,
}

impl<'a> SchemaNode<'a> {
    fn new(root: &'a Value) -> Self {
        Self {
            root,
            current: root,
        }
    }

    fn resolve(self, module: &str) -> Result<Self, ValidationError> {
        let Some(reference) = self.current.get("$ref").and_then(Value::as_str) else {
            return Ok(self);
        };
        let mut node = self.root;
        for part in reference.split('/') {
            if part == "#" {
                node = self.root;
            } else {
                node = node.get(part).ok_or_else(|| ValidationError::UnresolvedRef {
                    module: module.to_owned(),
                    reference: reference.to_owned(),
                })?;
            }
        }
        Ok(Self {
            root: self.root,
            current: node,
        })
    }

    fn required(&self) -> BTreeSet<&'a str> {
        self.current
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn property(&self, name: &str) -> Option<SchemaNode<'a>> {
        self.current
            .get("properties")
            .and_then(|properties| properties.get(name))
            .map(|current| SchemaNode {
                root: self.root,
                current,
            })
    }
}

/// The receiver's required fields must be a subset of the sender's,
/// recursively through every shared required property.
fn check_schema_pair(
    event_type: &str,
    tx_name: &str,
    rx_name: &str,
    tx: SchemaNode<'_>,
    rx: SchemaNode<'_>,
) -> Result<(), ValidationError> {
    let tx = tx.resolve(tx_name)?;
    let rx = rx.resolve(rx_name)?;
    let tx_required = tx.required();
    let rx_required = rx.required();
    if !rx_required.is_subset(&tx_required) {
        error!(
            event_type,
            tx = tx_name,
            rx = rx_name,
            ?rx_required,
            ?tx_required,
            "rx required fields must be contained in tx required fields"
        );
        return Err(ValidationError::MismatchSchema {
            event_type: event_type.to_owned(),
            tx: tx_name.to_owned(),
            rx: rx_name.to_owned(),
        });
    }
    for name in rx_required {
        if let (Some(tx_def), Some(rx_def)) = (tx.property(name), rx.property(name)) {
            check_schema_pair(event_type, tx_name, rx_name, tx_def, rx_def)?;
        }
    }
    Ok(())
}

fn feature_covered(required: &FeatureDefinition, other: &FeatureDefinition) -> bool {
    let needed: BTreeSet<&String> = required.required.iter().flatten().collect();
    let declared: BTreeSet<&String> = other
        .declared
        .iter()
        .flatten()
        .chain(other.required.iter().flatten())
        .collect();
    declared.is_superset(&needed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorOptions {
    pub ignore_feature: bool,
    pub ignore_schema: bool,
    pub ignore_in_process: bool,
}

/// Checks module specifications against each other and validates event
/// payloads exchanged during the run.
#[derive(Debug)]
pub struct EventValidator {
    options: ValidatorOptions,
    specs: BTreeMap<String, ModuleSpecification>,
}

impl EventValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self {
            options,
            specs: BTreeMap::new(),
        }
    }

    pub fn add_module(&mut self, name: &str, spec: ModuleSpecification) {
        self.specs.insert(name.to_owned(), spec);
    }

    fn events(
        &self,
        dir: TxRx,
    ) -> impl Iterator<Item = (&String, &String, &EventDefinition)> {
        self.specs.iter().flat_map(move |(name, spec)| {
            spec.events
                .iter()
                .flatten()
                .filter(move |(_, definition)| definition.dir == dir)
                .map(move |(event_type, definition)| (name, event_type, definition))
        })
    }

    pub fn check_versions(&self) -> Result<(), ValidationError> {
        let versions: BTreeSet<&String> =
            self.specs.values().map(|spec| &spec.version).collect();
        if versions.len() > 1 {
            return Err(ValidationError::MismatchVersion(
                versions.into_iter().cloned().collect(),
            ));
        }
        Ok(())
    }

    pub fn check_features(&self) -> Result<(), ValidationError> {
        if self.options.ignore_feature {
            return Ok(());
        }
        for main_dir in [TxRx::Tx, TxRx::Rx] {
            for (name, event_type, definition) in self.events(main_dir) {
                let Some(feature) = &definition.feature else {
                    continue;
                };
                for (other_name, other_type, other) in self.events(main_dir.opposite()) {
                    if other_type != event_type {
                        continue;
                    }
                    let Some(other_feature) = &other.feature else {
                        continue;
                    };
                    if !feature_covered(feature, other_feature) {
                        error!(
                            event_type = %event_type,
                            required_by = %name,
                            declared_by = %other_name,
                            "event features required on one side are not declared on the other"
                        );
                        return Err(ValidationError::MismatchFeature {
                            event_type: event_type.clone(),
                            tx: name.clone(),
                            rx: other_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn check_schemas(&self) -> Result<(), ValidationError> {
        if self.options.ignore_schema {
            return Ok(());
        }
        for (rx_name, event_type, rx_definition) in self.events(TxRx::Rx) {
            let Some(rx_schema) = &rx_definition.schema else {
                continue;
            };
            for (tx_name, tx_type, tx_definition) in self.events(TxRx::Tx) {
                if tx_type != event_type {
                    continue;
                }
                let Some(tx_schema) = &tx_definition.schema else {
                    continue;
                };
                check_schema_pair(
                    event_type,
                    tx_name,
                    rx_name,
                    SchemaNode::new(tx_schema),
                    SchemaNode::new(rx_schema),
                )?;
            }
        }
        Ok(())
    }

    /// The full gate: versions, features, schemas.
    pub fn check_compatibility(&self) -> Result<(), ValidationError> {
        self.check_versions()?;
        self.check_features()?;
        self.check_schemas()?;
        Ok(())
    }

    fn schema_for(&self, module: &str, event_type: &str, dir: TxRx) -> Option<&Value> {
        self.specs
            .get(module)?
            .events
            .as_ref()?
            .get(event_type)
            .filter(|definition| definition.dir == dir)?
            .schema
            .as_ref()
    }

    fn check_event(
        &self,
        module: &str,
        event: &Event,
        dir: TxRx,
    ) -> Result<(), ValidationError> {
        if self.options.ignore_in_process {
            return Ok(());
        }
        let event_type = event.event_type.as_str();
        if matches!(event.event_type, EventType::Departed | EventType::Arrived) {
            let identity_ok = event
                .details_as::<DepartedArrivedDetails>()
                .map(|details| details.check_identity().is_ok())
                .unwrap_or(true);
            if !identity_ok {
                return Err(ValidationError::UnpairedIdentity {
                    event_type: event_type.to_owned(),
                    module: module.to_owned(),
                });
            }
        }
        let Some(schema) = self.schema_for(module, event_type, dir) else {
            return Ok(());
        };
        let raw = serde_json::to_value(event).unwrap_or(Value::Null);
        validate_required(
            module,
            event_type,
            SchemaNode::new(schema),
            &raw,
        )
    }

    /// Validate an event a module just emitted on `step`.
    pub fn check_step_event(&self, module: &str, event: &Event) -> Result<(), ValidationError> {
        self.check_event(module, event, TxRx::Tx)
    }

    /// Validate an event before delivering it to a module on `triggered`.
    pub fn check_triggered_event(
        &self,
        module: &str,
        event: &Event,
    ) -> Result<(), ValidationError> {
        self.check_event(module, event, TxRx::Rx)
    }
}

/// Check that every (recursively) required field of the schema is present in
/// the payload.
fn validate_required(
    module: &str,
    event_type: &str,
    schema: SchemaNode<'_>,
    value: &Value,
) -> Result<(), ValidationError> {
    let schema = schema.resolve(module)?;
    for field in schema.required() {
        let Some(child) = value.get(field).filter(|child| !child.is_null()) else {
            return Err(ValidationError::MissingRequired {
                event_type: event_type.to_owned(),
                module: module.to_owned(),
                field: field.to_owned(),
            });
        };
        if let Some(child_schema) = schema.property(field) {
            validate_required(module, event_type, child_schema, child)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sim_core::spec::{schemas, SpecificationBuilder, VERSION_1};

    fn tx_reserved_spec() -> ModuleSpecification {
        SpecificationBuilder::new()
            .tx(EventType::Reserved, schemas::reserved())
            .build(VERSION_1)
    }

    fn rx_reserved_spec() -> ModuleSpecification {
        SpecificationBuilder::new()
            .rx(EventType::Reserved, schemas::reserved())
            .build(VERSION_1)
    }

    #[test]
    fn matching_specs_pass_the_gate() {
        let mut validator = EventValidator::new(ValidatorOptions::default());
        validator.add_module("ondemand", tx_reserved_spec());
        validator.add_module("user", rx_reserved_spec());
        assert!(validator.check_compatibility().is_ok());
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let mut validator = EventValidator::new(ValidatorOptions::default());
        validator.add_module("ondemand", tx_reserved_spec());
        let mut other = rx_reserved_spec();
        other.version = "https://example.invalid/other".into();
        validator.add_module("user", other);
        assert!(matches!(
            validator.check_versions(),
            Err(ValidationError::MismatchVersion(_))
        ));
    }

    #[test]
    fn tx_schema_missing_an_rx_required_field_is_rejected() {
        // The sender omits demandId from its required set.
        let tx_schema = json!({
            "type": "object",
            "required": ["eventType", "time", "details"],
            "properties": {
                "details": {
                    "type": "object",
                    "required": ["success", "userId"],
                    "properties": {
                        "success": { "type": "boolean" },
                        "userId": { "type": "string" }
                    }
                }
            }
        });
        let mut validator = EventValidator::new(ValidatorOptions::default());
        validator.add_module(
            "ondemand",
            SpecificationBuilder::new()
                .tx(EventType::Reserved, tx_schema)
                .build(VERSION_1),
        );
        validator.add_module("user", rx_reserved_spec());
        assert!(matches!(
            validator.check_schemas(),
            Err(ValidationError::MismatchSchema { .. })
        ));
    }

    #[test]
    fn feature_requirements_must_be_declared_on_the_other_side() {
        let mut validator = EventValidator::new(ValidatorOptions::default());
        validator.add_module(
            "ondemand",
            SpecificationBuilder::new()
                .tx(EventType::Reserved, schemas::reserved())
                .feature(EventType::Reserved, &[], &["pre_reserve"])
                .build(VERSION_1),
        );
        validator.add_module(
            "user",
            SpecificationBuilder::new()
                .rx(EventType::Reserved, schemas::reserved())
                .feature(EventType::Reserved, &["demand_id"], &[])
                .build(VERSION_1),
        );
        assert!(matches!(
            validator.check_features(),
            Err(ValidationError::MismatchFeature { .. })
        ));

        let mut validator = EventValidator::new(ValidatorOptions {
            ignore_feature: true,
            ..Default::default()
        });
        validator.add_module(
            "ondemand",
            SpecificationBuilder::new()
                .tx(EventType::Reserved, schemas::reserved())
                .feature(EventType::Reserved, &[], &["pre_reserve"])
                .build(VERSION_1),
        );
        assert!(validator.check_features().is_ok());
    }

    #[test]
    fn runtime_validation_requires_declared_fields() {
        let mut validator = EventValidator::new(ValidatorOptions::default());
        validator.add_module("ondemand", tx_reserved_spec());

        let event = Event {
            event_type: EventType::Reserved,
            source: None,
            time: 480.0,
            service: None,
            details: json!({ "success": true, "userId": "User1" }),
        };
        assert!(matches!(
            validator.check_step_event("ondemand", &event),
            Err(ValidationError::MissingRequired { field, .. }) if field == "demandId"
        ));
    }

    #[test]
    fn departed_identity_must_be_paired_at_runtime() {
        let validator = EventValidator::new(ValidatorOptions::default());
        let event = Event {
            event_type: EventType::Departed,
            source: None,
            time: 480.0,
            service: None,
            details: json!({
                "userId": "User1",
                "demandId": null,
                "location": { "locationId": "Stop1", "lat": 0.0, "lng": 0.0 }
            }),
        };
        assert!(matches!(
            validator.check_step_event("ondemand", &event),
            Err(ValidationError::UnpairedIdentity { .. })
        ));
    }
}
