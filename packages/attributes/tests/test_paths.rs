//! Tests for path-qualified writes into list attributes

use std::rc::Rc;
use trellis_attributes::{AttributeDef, AttributeDefSet, AttributeError, AttributeStore, AttributeType, SetOutcome};
use trellis_common::{CommonError, ComponentId, Value};

const OWNER: ComponentId = ComponentId(1);

fn store() -> AttributeStore {
    AttributeStore::new(Rc::new(AttributeDefSet::new(vec![AttributeDef::new(
        "items",
        AttributeType::List,
    )])))
}

#[test]
fn test_out_of_range_index_is_an_error() {
    let store = store();
    let err = store
        .set("items.18446744073709551615", Value::from("x"), OWNER)
        .unwrap_err();
    assert!(matches!(
        err,
        AttributeError::Path(CommonError::IndexOutOfRange { index: usize::MAX, .. })
    ));
    assert_eq!(store.get("items.0", OWNER).unwrap(), Value::Undefined);
}

#[test]
fn test_nested_index_write_materializes_list() {
    let store = store();
    let outcome = store.set("items.1", Value::from("b"), OWNER).unwrap();
    assert_eq!(outcome, SetOutcome::Assigned);
    assert_eq!(store.get("items.1", OWNER).unwrap(), Value::from("b"));
    assert_eq!(store.get("items", OWNER).unwrap().len(), Some(2));
    println!("✓ index writes grow the list");
}
