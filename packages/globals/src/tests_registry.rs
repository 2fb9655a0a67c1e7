/// Tests for the in-memory side of the global value registry
use crate::config::GlobalsConfig;
use crate::error::GlobalsError;
use crate::provider::{GlobalValueProvider, ObjectValueProvider};
use crate::registry::{GlobalEntry, GlobalValueRegistry, DEFAULT_PROVIDERS};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use trellis_common::{ComponentId, LazyValue, RecordingReporter, Value, ValueProvider};
use trellis_expression::{ExpressionService, Notification, RecordingNotifier, ScopeNotifier};

const C1: ComponentId = ComponentId(1);

fn registry_with(config: GlobalsConfig) -> (Rc<GlobalValueRegistry>, Rc<ExpressionService>) {
    let expressions = Rc::new(ExpressionService::default());
    let registry = GlobalValueRegistry::builder(expressions.clone())
        .config(config)
        .build();
    (registry, expressions)
}

fn bootstrap(entries: serde_json::Value) -> GlobalsConfig {
    GlobalsConfig {
        bootstrap: serde_json::from_value(entries).unwrap(),
        ..Default::default()
    }
}

#[test]
fn test_default_providers_exist() {
    let (registry, _) = registry_with(GlobalsConfig::default());
    for key in DEFAULT_PROVIDERS {
        assert!(registry.has_provider(key), "missing {}", key);
    }
    assert!(!registry.loaded_from_persistent_storage());
}

#[test]
fn test_bootstrap_values() {
    let (registry, _) = registry_with(bootstrap(json!({
        "$Locale": {"lang": "en", "currency": "EUR"},
        "$Custom": {"flag": true}
    })));

    assert_eq!(registry.get("$Locale.lang").unwrap(), Value::from("en"));
    assert_eq!(registry.get("{!$Custom.flag}").unwrap(), Value::from(true));
    assert!(registry.get("$Locale.missing").unwrap().is_undefined());
}

#[test]
fn test_unknown_provider_is_an_error() {
    let (registry, _) = registry_with(GlobalsConfig::default());
    let err = registry.get("$Nope.value").unwrap_err();
    assert_eq!(
        err,
        GlobalsError::UnknownProvider {
            provider: "$Nope".to_string()
        }
    );
    assert!(registry.get_value("$Nope.value").is_undefined());
}

#[test]
fn test_label_placeholder_still_calls_back() {
    let (registry, _) = registry_with(bootstrap(json!({
        "$Label": {"common": {"ok": "OK"}}
    })));

    let seen = RefCell::new(Vec::new());
    registry
        .get_with("$Label.common.ok", |v| seen.borrow_mut().push(v.clone()))
        .unwrap();
    registry
        .get_with("$Label.common.missing", |v| seen.borrow_mut().push(v.clone()))
        .unwrap();

    assert_eq!(
        seen.into_inner(),
        vec![Value::from("OK"), Value::from("[common.missing]")]
    );
}

#[test]
fn test_first_registration_wins() {
    let (registry, _) = registry_with(GlobalsConfig::default());
    let first = ObjectValueProvider::with_values("$Theme", &json!({"color": "blue"})).unwrap();
    let second = ObjectValueProvider::with_values("$Theme", &json!({"color": "red"})).unwrap();

    assert!(registry.add_value_provider("$Theme", Box::new(first)));
    assert!(!registry.add_value_provider("$Theme", Box::new(second)));
    assert!(!registry.add_value_provider("$Label", Box::new(ObjectValueProvider::new("$Label"))));
    assert_eq!(registry.get("$Theme.color").unwrap(), Value::from("blue"));
}

#[test]
fn test_apply_fans_out_to_consumers() {
    let (registry, expressions) = registry_with(bootstrap(json!({"$Locale": {"lang": "en"}})));
    let notifier = Rc::new(RecordingNotifier::new());
    let scope_notifier: Rc<dyn ScopeNotifier> = notifier.clone();
    expressions.set_notifier(Rc::downgrade(&scope_notifier));

    let reference = expressions.get_global_reference("$Locale.lang");
    assert_eq!(reference.evaluate(), Value::from("en"));
    expressions
        .add_expression_listener(&reference, "v.lang", C1)
        .unwrap();

    let notified = registry.apply(&[GlobalEntry::new("$Locale", json!({"lang": "fr"}))]);

    assert_eq!(notified, 1);
    assert_eq!(registry.get("$Locale.lang").unwrap(), Value::from("fr"));
    assert!(notifier.events().contains(&Notification::Change {
        scope: C1,
        expression: "v.lang".to_string(),
        old: Value::from("en"),
        new: Value::from("fr"),
    }));

    println!("✓ Merged global values reach their consumers");
}

#[test]
fn test_unknown_types_get_object_providers() {
    let (registry, _) = registry_with(GlobalsConfig::default());
    registry.apply(&[GlobalEntry::new("$Session", json!({"id": "abc"}))]);

    assert!(registry.has_provider("$Session"));
    assert_eq!(registry.get("$Session.id").unwrap(), Value::from("abc"));
}

#[test]
fn test_merge_error_is_reported_and_skipped() {
    let expressions = Rc::new(ExpressionService::default());
    let reporter = Rc::new(RecordingReporter::new());
    let registry = GlobalValueRegistry::builder(expressions)
        .reporter(reporter.clone())
        .build();

    registry.apply(&[
        GlobalEntry::new("$Locale", json!("not an object")),
        GlobalEntry::new("$Global", json!({"ok": 1})),
    ]);

    assert_eq!(reporter.errors().len(), 1);
    assert!(reporter.errors()[0].contains("$Locale"));
    assert_eq!(registry.get("$Global.ok").unwrap(), Value::from(1));
}

#[test]
fn test_set_value_writes_through_provider() {
    let (registry, expressions) = registry_with(bootstrap(json!({"$Global": {"theme": "light"}})));
    let reference = expressions.get_global_reference("$Global.theme");
    assert_eq!(reference.evaluate(), Value::from("light"));

    assert!(registry.set_value("$Global.theme", Value::from("dark")));
    assert_eq!(reference.last_result(), Value::from("dark"));
    assert!(!registry.set_value("$Nope.theme", Value::from("dark")));
}

#[test]
fn test_storable_entries_skip_opted_out_providers() {
    struct Volatile;

    impl GlobalValueProvider for Volatile {
        fn merge(&mut self, _values: &serde_json::Value) -> crate::error::GlobalsResult<()> {
            Ok(())
        }

        fn values(&self) -> Value {
            Value::empty_map()
        }

        fn is_storable(&self) -> bool {
            false
        }
    }

    let (registry, _) = registry_with(GlobalsConfig::default());
    registry.add_value_provider("$Volatile", Box::new(Volatile));

    let types: Vec<String> = registry
        .storable_entries()
        .into_iter()
        .map(|e| e.provider_type)
        .collect();
    assert_eq!(types, vec!["$Browser", "$Global", "$Label", "$Locale"]);
}
