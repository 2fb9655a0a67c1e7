/// Tests for the attribute store: reads, writes, decorators and teardown
use crate::access::{AccessPolicy, VisibilityRules};
use crate::def::{AttributeDef, AttributeDefSet, AttributeType, Visibility};
use crate::error::AttributeError;
use crate::store::{AttributeStore, SetOutcome};
use serde_json::json;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use trellis_common::{
    ComponentHost, ComponentId, Computed, LazyKind, LazyValue, MapRef, MockHost, RecordingReporter,
    Value,
};

const OWNER: ComponentId = ComponentId(1);

/// Non-global reference into a plain map, enough to observe delegation
#[derive(Debug)]
struct MapReference {
    target: MapRef,
    key: String,
}

impl LazyValue for MapReference {
    fn evaluate(&self) -> Value {
        self.target.borrow().get(&self.key).cloned().unwrap_or_default()
    }

    fn kind(&self) -> LazyKind {
        LazyKind::Reference { global: false }
    }

    fn assign(&self, value: Value) -> bool {
        self.target.borrow_mut().insert(self.key.clone(), value);
        true
    }

    fn reference_key(&self) -> Option<(Option<ComponentId>, &str)> {
        Some((None, &self.key))
    }
}

fn defs() -> Rc<AttributeDefSet> {
    Rc::new(AttributeDefSet::new(vec![
        AttributeDef::new("label", AttributeType::String).with_default(json!("Hello")),
        AttributeDef::new("count", AttributeType::Number).with_default(json!(3)),
        AttributeDef::new("items", AttributeType::List).with_default(json!([])),
        AttributeDef::new("data", AttributeType::Object),
        AttributeDef::new("secret", AttributeType::String).with_visibility(Visibility::Private),
        AttributeDef::new("body", AttributeType::ComponentList),
    ]))
}

fn config(entries: Vec<(&str, Value)>) -> BTreeMap<String, Value> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[test]
fn test_defaults_after_initialize() {
    let store = AttributeStore::new(defs());
    store.initialize(&BTreeMap::new(), OWNER);

    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("Hello"));
    assert_eq!(store.get("count", OWNER).unwrap(), Value::from(3));
    assert_eq!(store.get("items", OWNER).unwrap().len(), Some(0));
    assert!(store.get("data", OWNER).unwrap().is_undefined());
    assert!(store.has_attribute("data"));
    assert_eq!(store.get_default("count"), Some(json!(3)));

    println!("✓ Declared defaults are applied");
}

#[test]
fn test_config_wins_and_reinitialize_keeps_values() {
    let store = AttributeStore::new(defs());
    store.initialize(&config(vec![("label", Value::from("Configured"))]), OWNER);
    store.set("count", Value::from(10), OWNER).unwrap();

    store.initialize(&BTreeMap::new(), OWNER);

    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("Configured"));
    assert_eq!(store.get("count", OWNER).unwrap(), Value::from(10));
}

#[test]
fn test_set_materializes_intermediate_containers() {
    let store = AttributeStore::new(defs());
    store.initialize(&BTreeMap::new(), OWNER);

    store.set("data.user.name", Value::from("ada"), OWNER).unwrap();
    store.set("data.rows.1", Value::from("second"), OWNER).unwrap();

    assert_eq!(store.get("data.user.name", OWNER).unwrap(), Value::from("ada"));
    let rows = store.get("data.rows", OWNER).unwrap();
    assert!(rows.is_list());
    assert_eq!(rows.len(), Some(2));
    assert!(store.get("data.rows.0", OWNER).unwrap().is_undefined());
}

#[test]
fn test_scalar_wrapped_for_list_attribute() {
    let store = AttributeStore::new(defs());
    store.initialize(&BTreeMap::new(), OWNER);

    store.set("items", Value::from("only"), OWNER).unwrap();

    let items = store.get("items", OWNER).unwrap();
    assert_eq!(items.items(), vec![Value::from("only")]);
}

#[test]
fn test_computed_slot_rejects_writes() {
    let reporter = Rc::new(RecordingReporter::new());
    let store = AttributeStore::new(defs()).with_reporter(reporter.clone());
    store.initialize(
        &config(vec![("label", Value::lazy(Computed::new("label", || Value::from("fixed"))))]),
        OWNER,
    );

    let outcome = store.set("label", Value::from("changed"), OWNER).unwrap();

    assert_eq!(outcome, SetOutcome::Rejected);
    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("fixed"));
    assert_eq!(reporter.warnings().len(), 1);
    assert!(reporter.warnings()[0].contains("constant"));
}

#[test]
fn test_reference_slot_delegates_writes() {
    let target: MapRef = Rc::new(RefCell::new(BTreeMap::new()));
    let reference = Value::lazy(MapReference {
        target: target.clone(),
        key: "label".to_string(),
    });
    let store = AttributeStore::new(defs());
    store.initialize(&config(vec![("label", reference)]), OWNER);

    let outcome = store.set("label", Value::from("through"), OWNER).unwrap();

    assert_eq!(outcome, SetOutcome::Delegated);
    assert_eq!(target.borrow().get("label"), Some(&Value::from("through")));
    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("through"));
    assert!(store.get_raw("label").is_lazy());
}

#[test]
fn test_decorators_see_partial_value_on_reentry() {
    let store = Rc::new(AttributeStore::new(defs()));
    store.initialize(&config(vec![("label", Value::from("base"))]), OWNER);

    let weak = Rc::downgrade(&store);
    let exclaim = Computed::new("exclaim", move || match weak.upgrade() {
        Some(store) => store.get_value("label").add(&Value::from("!")),
        None => Value::Undefined,
    });
    store.initialize(&config(vec![("label", Value::lazy(exclaim))]), OWNER);

    let weak = Rc::downgrade(&store);
    let question = Computed::new("question", move || match weak.upgrade() {
        Some(store) => store.get_value("label").add(&Value::from("?")),
        None => Value::Undefined,
    });
    store.initialize(&config(vec![("label", Value::lazy(question))]), OWNER);

    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("base!?"));
    // Idle again: a second read runs the whole chain from the stored value
    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("base!?"));
    assert_eq!(store.get_raw("label"), Value::from("base"));
}

#[test]
fn test_shadow_value_added_to_computed_slot() {
    let store = AttributeStore::new(defs());
    store.initialize(
        &config(vec![
            ("label", Value::lazy(Computed::new("label", || Value::from("Total: ")))),
            ("count", Value::from(1)),
        ]),
        OWNER,
    );

    assert_eq!(store.get_shadow_value("label"), Value::from(""));
    store.set_shadow_value("label", Value::from("42"));
    store.set_shadow_value("count", Value::from(5));

    assert_eq!(store.get("label", OWNER).unwrap(), Value::from("Total: 42"));
    assert_eq!(store.get("count", OWNER).unwrap(), Value::from(1));
    assert!(store.get_shadow_value("count").is_undefined());
}

#[test]
fn test_access_strict_and_lenient() {
    let rules = Rc::new(VisibilityRules::new(false));
    let reporter = Rc::new(RecordingReporter::new());

    let strict = AttributeStore::new(defs())
        .with_access(rules.clone(), AccessPolicy::strict())
        .with_reporter(reporter.clone());
    strict.initialize(&config(vec![("secret", Value::from("s3cr3t"))]), OWNER);

    let err = strict.get("secret", OWNER).unwrap_err();
    assert!(matches!(err, AttributeError::AccessDenied { operation: "get", .. }));
    assert!(strict.set("secret", Value::from("x"), OWNER).is_err());
    assert_eq!(reporter.errors().len(), 2);

    rules.set_accessor(Some(OWNER));
    assert_eq!(strict.get("secret", OWNER).unwrap(), Value::from("s3cr3t"));

    rules.set_accessor(None);
    let lenient = AttributeStore::new(defs())
        .with_access(rules, AccessPolicy::default())
        .with_reporter(reporter.clone());
    lenient.initialize(&config(vec![("secret", Value::from("open"))]), OWNER);
    assert_eq!(lenient.get("secret", OWNER).unwrap(), Value::from("open"));
    assert_eq!(reporter.warnings().len(), 1);
}

#[test]
fn test_body_is_keyed_by_owner() {
    let store = AttributeStore::new(defs());
    store.initialize(&BTreeMap::new(), OWNER);
    let inner = ComponentId(2);

    store
        .set("body", Value::list([Value::from(ComponentId(10))]), OWNER)
        .unwrap();
    store
        .set("body", Value::from(ComponentId(11)), inner)
        .unwrap();

    assert_eq!(store.get_body(OWNER).items(), vec![Value::from(ComponentId(10))]);
    assert_eq!(store.get_body(inner).items(), vec![Value::from(ComponentId(11))]);
    assert_eq!(store.get("body", inner).unwrap().len(), Some(1));
}

#[test]
fn test_destroy_is_idempotent() {
    let host = MockHost::new();
    host.pin(ComponentId(21));
    let store = AttributeStore::new(defs());
    store.initialize(
        &config(vec![
            ("data", Value::from(ComponentId(20))),
            ("items", Value::list([Value::from(ComponentId(21)), Value::from(1)])),
            ("label", Value::lazy(Computed::new("label", || Value::from("x")))),
        ]),
        OWNER,
    );
    store
        .set("body", Value::list([Value::from(ComponentId(30))]), OWNER)
        .unwrap();

    let expressions = store.destroy(&host);
    assert_eq!(expressions.keys().collect::<Vec<_>>(), vec!["label"]);
    assert_eq!(host.destroyed(), vec![ComponentId(30), ComponentId(20)]);
    assert!(store.is_destroyed());

    let again = store.destroy(&host);
    assert!(again.is_empty());
    assert_eq!(host.destroyed().len(), 2);
    assert!(host.is_valid(ComponentId(21)));
}

#[test]
fn test_clear_reference() {
    let target: MapRef = Rc::new(RefCell::new(BTreeMap::new()));
    let store = AttributeStore::new(defs());
    store.initialize(
        &config(vec![(
            "label",
            Value::lazy(MapReference {
                target,
                key: "x".to_string(),
            }),
        )]),
        OWNER,
    );

    assert!(store.clear_reference("count").is_none());
    let cleared = store.clear_reference("label").unwrap();
    assert_eq!(cleared.lazy_kind(), Some(LazyKind::Reference { global: false }));
    assert!(store.get_raw("label").is_undefined());
}
