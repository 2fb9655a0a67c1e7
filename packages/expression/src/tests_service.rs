/// Tests for expression resolution, the reference graph and change fan-out
use crate::error::ExpressionError;
use crate::factory::{ExpressionValueFactory, ProviderLookup};
use crate::service::{ExpressionService, Notification, RecordingNotifier, ScopeNotifier};
use serde_json::json;
use std::rc::{Rc, Weak};
use trellis_attributes::ValueFactory;
use trellis_common::{put, ComponentId, LazyKind, LazyValue, MapProvider, Value, ValueProvider};

const C1: ComponentId = ComponentId(1);
const C2: ComponentId = ComponentId(2);

struct Fixture {
    service: Rc<ExpressionService>,
    notifier: Rc<RecordingNotifier>,
    globals: Rc<MapProvider>,
    label_section: Value,
    _keep: (Rc<dyn ValueProvider>, Rc<dyn ScopeNotifier>),
}

fn fixture() -> Fixture {
    let label_section = Value::map([("name", Value::from("Hello"))]);
    let globals = Rc::new(MapProvider::new(Value::map([(
        "$Label",
        Value::map([("section", label_section.clone())]),
    )])));
    let notifier = Rc::new(RecordingNotifier::new());
    let service = Rc::new(ExpressionService::new(false));

    let provider: Rc<dyn ValueProvider> = globals.clone();
    let scope_notifier: Rc<dyn ScopeNotifier> = notifier.clone();
    service.set_global_provider(Rc::downgrade(&provider));
    service.set_notifier(Rc::downgrade(&scope_notifier));

    Fixture {
        service,
        notifier,
        globals,
        label_section,
        _keep: (provider, scope_notifier),
    }
}

#[test]
fn test_resolve_paths() {
    let service = ExpressionService::default();
    let data = Value::from_json(&json!({"a": {"b": 5}}));

    assert_eq!(service.resolve(&["a", "b"], &data, false).unwrap(), Value::from(5));
    assert!(service.resolve(&["a", "c"], &data, false).unwrap().is_undefined());
    assert_eq!(
        service.resolve_expression("a.b", &data, false).unwrap(),
        Value::from(5)
    );

    println!("✓ Path resolution works");
}

#[test]
fn test_case_sensitivity_diagnostic() {
    let data = Value::from_json(&json!({"user": {"firstName": "Ada"}}));

    let lenient = ExpressionService::new(false);
    assert!(lenient
        .resolve_expression("user.firstname", &data, false)
        .unwrap()
        .is_undefined());

    let strict = ExpressionService::new(true);
    let err = strict
        .resolve_expression("user.firstname", &data, false)
        .unwrap_err();
    assert_eq!(
        err,
        ExpressionError::CaseSensitivity {
            expression: "user.firstname".to_string(),
            segment: "firstname".to_string(),
            suggestion: "firstName".to_string(),
        }
    );
    assert!(strict.resolve_expression("user.lastName", &data, false).unwrap().is_undefined());
}

#[test]
fn test_references_are_canonical() {
    let f = fixture();
    let provider: Rc<dyn ValueProvider> = f.globals.clone();

    let a = f.service.get_reference("{!v.label}", C1, Rc::downgrade(&provider));
    let b = f.service.get_reference("v.label", C1, Rc::downgrade(&provider));
    let other_scope = f.service.get_reference("v.label", C2, Rc::downgrade(&provider));
    let global = f.service.get_reference("$Label.section.name", C1, Rc::downgrade(&provider));
    let global_again = f.service.get_global_reference("{!$Label.section.name}");

    assert!(Rc::ptr_eq(&a, &b));
    assert!(!Rc::ptr_eq(&a, &other_scope));
    assert!(Rc::ptr_eq(&global, &global_again));
    assert!(global.is_global());
    assert_eq!(global.kind(), LazyKind::Reference { global: true });
    assert_eq!(f.service.scope_count(), 2);
    assert_eq!(f.service.global_reference_count(), 1);
}

#[test]
fn test_global_update_notifies_once_per_change() {
    let f = fixture();
    let reference = f.service.get_global_reference("$Label.section.name");
    assert_eq!(reference.evaluate(), Value::from("Hello"));
    f.service
        .add_expression_listener(&reference, "v.title", C1)
        .unwrap();

    put(&f.label_section, "name", Value::from("Bonjour"));
    let notified = f
        .service
        .update_global_reference("$Label.section.name", &Value::from("Hello"), &Value::from("Bonjour"));

    assert_eq!(notified, 1);
    assert_eq!(f.notifier.dirty_count(C1), 1);
    assert!(f.notifier.events().contains(&Notification::Change {
        scope: C1,
        expression: "v.title".to_string(),
        old: Value::from("Hello"),
        new: Value::from("Bonjour"),
    }));

    // Same value again: the reference already holds it
    let again = f
        .service
        .update_global_reference("$Label.section.name", &Value::from("Bonjour"), &Value::from("Bonjour"));
    assert_eq!(again, 0);
    assert_eq!(f.notifier.dirty_count(C1), 1);

    assert!(f
        .service
        .remove_expression_listener(&reference, "v.title", C1)
        .unwrap());
    put(&f.label_section, "name", Value::from("Hola"));
    f.service
        .update_global_reference("$Label.section.name", &Value::from("Bonjour"), &Value::from("Hola"));
    assert_eq!(f.notifier.dirty_count(C1), 1);
    assert_eq!(reference.last_result(), Value::from("Hola"));
}

#[test]
fn test_nested_global_updates_reach_every_depth() {
    let f = fixture();
    for (expression, consumer) in [
        ("$Label", "v.all"),
        ("$Label.section", "v.section"),
        ("$Label.section.name", "v.name"),
    ] {
        let reference = f.service.get_global_reference(expression);
        reference.evaluate();
        f.service
            .add_expression_listener(&reference, consumer, C1)
            .unwrap();
    }

    put(&f.label_section, "name", Value::from("Updated"));
    let payload = Value::from_json(&json!({"section": {"name": "Updated"}}));
    let notified = f.service.update_global_references("$Label", &payload);

    assert_eq!(notified, 3);
    let dirty: Vec<String> = f
        .notifier
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Notification::Dirty { expression, .. } => Some(expression),
            _ => None,
        })
        .collect();
    assert_eq!(dirty, vec!["v.all", "v.section", "v.name"]);
}

#[test]
fn test_listener_on_unknown_reference_fails() {
    let f = fixture();
    let other = ExpressionService::default();
    let foreign = other.get_global_reference("$Global.x");

    let err = f
        .service
        .add_expression_listener(&foreign, "v.x", C1)
        .unwrap_err();
    assert!(matches!(err, ExpressionError::UnknownReference { .. }));
}

#[test]
fn test_clear_references_releases_scope() {
    let f = fixture();
    let local = Rc::new(MapProvider::new(Value::map([(
        "v",
        Value::map([("value", Value::from(1))]),
    )])));
    let provider: Rc<dyn ValueProvider> = local.clone();

    let owned = f.service.get_reference("v.value", C1, Rc::downgrade(&provider));
    f.service.add_expression_listener(&owned, "v.text", C2).unwrap();
    let global = f.service.get_global_reference("$Label.section.name");
    f.service.add_expression_listener(&global, "v.title", C1).unwrap();

    f.service.clear_references(C1);

    assert_eq!(
        f.notifier.events(),
        vec![Notification::Cleared {
            scope: C2,
            expression: "v.text".to_string()
        }]
    );
    assert_eq!(f.service.scope_count(), 0);
    assert_eq!(f.service.listening_to(C1), 0);
    assert_eq!(f.service.listening_to(C2), 0);
    assert!(f.service.consumers_of(&global).is_empty());
}

#[test]
fn test_local_update_notifies_consumers() {
    let f = fixture();
    let data = Value::map([("value", Value::from(1))]);
    let local: Rc<dyn ValueProvider> = Rc::new(MapProvider::new(Value::map([("v", data.clone())])));

    let reference = f.service.get_reference("v.value", C1, Rc::downgrade(&local));
    reference.evaluate();
    f.service.add_expression_listener(&reference, "v.text", C2).unwrap();

    put(&data, "value", Value::from(2));
    assert_eq!(f.service.update_reference("v.value", C1), 1);
    assert!(f.notifier.events().contains(&Notification::Change {
        scope: C2,
        expression: "v.text".to_string(),
        old: Value::from(1),
        new: Value::from(2),
    }));
}

#[test]
fn test_update_references_under_a_root() {
    let f = fixture();
    let local: Rc<dyn ValueProvider> = Rc::new(MapProvider::new(Value::map([
        ("row", Value::map([("label", Value::from("milk"))])),
        ("rows", Value::from(3)),
    ])));

    for (expression, consumer) in [("row", "v.item"), ("row.label", "v.label"), ("rows", "v.count")] {
        let reference = f.service.get_reference(expression, C1, Rc::downgrade(&local));
        reference.evaluate();
        f.service.add_expression_listener(&reference, consumer, C1).unwrap();
    }

    assert_eq!(f.service.update_references_under("row", C1), 2);
    assert_eq!(f.notifier.dirty_count(C1), 2);
    assert_eq!(f.service.update_references_under("row", C2), 0);
}

struct SingleProvider(Rc<dyn ValueProvider>);

impl ProviderLookup for SingleProvider {
    fn provider_for(&self, owner: ComponentId) -> Option<Weak<dyn ValueProvider>> {
        (owner == C1).then(|| Rc::downgrade(&self.0))
    }
}

#[test]
fn test_expression_value_factory() {
    let f = fixture();
    let data = Value::map([("name", Value::from("Ada"))]);
    let local: Rc<dyn ValueProvider> = Rc::new(MapProvider::new(Value::map([("v", data.clone())])));
    let lookup: Rc<dyn ProviderLookup> = Rc::new(SingleProvider(local));
    let factory = ExpressionValueFactory::new(f.service.clone(), Rc::downgrade(&lookup));

    let bound = factory.create(&json!("{!v.name}"), C1);
    let unbound = factory.create(&json!("{#v.name}"), C1);
    let global = factory.create(&json!("{!$Label.section.name}"), C1);
    let literal = factory.create(&json!({"a": [1, 2]}), C1);
    let orphan = factory.create(&json!("{!v.name}"), C2);

    put(&data, "name", Value::from("Grace"));

    assert_eq!(bound.lazy_kind(), Some(LazyKind::Reference { global: false }));
    assert_eq!(bound.evaluated(), Value::from("Grace"));
    assert_eq!(unbound, Value::from("Ada"));
    assert_eq!(global.evaluated(), Value::from("Hello"));
    assert_eq!(literal.to_json(), json!({"a": [1, 2]}));
    assert!(orphan.is_undefined());
}
