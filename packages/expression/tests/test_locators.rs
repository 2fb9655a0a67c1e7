//! Tests for locator resolution and container walks

use serde_json::json;
use std::collections::HashMap;
use std::rc::Rc;
use trellis_common::{resolve_path, split_path, ComponentId, Value};
use trellis_expression::{
    ComponentTree, ExpressionService, LocatorDef, LocatorDefs, WrapperKind, PRIMITIVE_SEPARATOR,
};

#[derive(Default)]
struct Node {
    owner: Option<ComponentId>,
    wrapper: Option<WrapperKind>,
    local_id: Option<String>,
    super_of: Option<ComponentId>,
    def_name: String,
    locators: Option<Rc<LocatorDefs>>,
    values: Value,
}

#[derive(Default)]
struct MockTree {
    nodes: HashMap<ComponentId, Node>,
}

impl MockTree {
    fn add(&mut self, id: u64, node: Node) {
        self.nodes.insert(ComponentId(id), node);
    }

    fn node(&self, id: ComponentId) -> Option<&Node> {
        self.nodes.get(&id)
    }
}

impl ComponentTree for MockTree {
    fn owner(&self, id: ComponentId) -> Option<ComponentId> {
        self.node(id)?.owner
    }

    fn wrapper_kind(&self, id: ComponentId) -> Option<WrapperKind> {
        self.node(id)?.wrapper
    }

    fn local_id(&self, id: ComponentId) -> Option<String> {
        self.node(id)?.local_id.clone()
    }

    fn super_of(&self, id: ComponentId) -> Option<ComponentId> {
        self.node(id)?.super_of
    }

    fn concrete(&self, id: ComponentId) -> ComponentId {
        id
    }

    fn locator_defs(&self, id: ComponentId) -> Option<Rc<LocatorDefs>> {
        self.node(id)?.locators.clone()
    }

    fn def_name(&self, id: ComponentId) -> String {
        self.node(id).map(|n| n.def_name.clone()).unwrap_or_default()
    }

    fn is_valid(&self, id: ComponentId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn evaluate_in(&self, id: ComponentId, expression: &str) -> Value {
        match self.node(id) {
            Some(node) => resolve_path(&split_path(expression), &node.values, false),
            None => Value::Undefined,
        }
    }
}

fn locators(json: serde_json::Value) -> Option<Rc<LocatorDefs>> {
    let defs: LocatorDefs = serde_json::from_value(json).unwrap();
    Some(Rc::new(defs))
}

/// page(1) > list(2) > iteration(3) > field(5) > input(4)
fn tree() -> MockTree {
    let mut tree = MockTree::default();
    tree.add(
        1,
        Node {
            def_name: "markup://app:page".into(),
            locators: locators(json!({
                "list": {"alias": "itemList", "context": {"page": "home", "row": "outer"}}
            })),
            ..Default::default()
        },
    );
    tree.add(
        2,
        Node {
            owner: Some(ComponentId(1)),
            local_id: Some("list".into()),
            def_name: "markup://ui:list".into(),
            locators: locators(json!({
                "field": {"alias": "fieldDef", "description": "a field", "context": {"row": "{!v.row}"}},
                "save": {"context": {"row": "{!v.row}"}}
            })),
            values: Value::from_json(&json!({"v": {"row": 7}})),
            ..Default::default()
        },
    );
    tree.add(
        3,
        Node {
            owner: Some(ComponentId(2)),
            wrapper: Some(WrapperKind::Iteration),
            def_name: "markup://aura:iteration".into(),
            ..Default::default()
        },
    );
    tree.add(
        5,
        Node {
            owner: Some(ComponentId(3)),
            local_id: Some("field".into()),
            def_name: "markup://ui:field".into(),
            locators: locators(json!({
                "input": {"isPrimitive": true, "context": {"kind": "text"}}
            })),
            ..Default::default()
        },
    );
    tree.add(
        4,
        Node {
            owner: Some(ComponentId(5)),
            local_id: Some("input".into()),
            def_name: "markup://ui:input".into(),
            ..Default::default()
        },
    );
    tree.add(
        6,
        Node {
            owner: Some(ComponentId(3)),
            local_id: Some("save".into()),
            def_name: "markup://ui:button".into(),
            ..Default::default()
        },
    );
    tree
}

#[test]
fn test_container_skips_wrappers() {
    let tree = tree();
    let service = ExpressionService::default();

    assert_eq!(service.get_container(&tree, ComponentId(5)), Some(ComponentId(2)));
    assert_eq!(service.get_container(&tree, ComponentId(2)), Some(ComponentId(1)));
    assert_eq!(service.get_container(&tree, ComponentId(1)), None);
}

#[test]
fn test_container_walk_stops_on_cycles() {
    let mut tree = MockTree::default();
    for (id, owner) in [(10, 11), (11, 10)] {
        tree.add(
            id,
            Node {
                owner: Some(ComponentId(owner)),
                wrapper: Some(WrapperKind::Conditional),
                ..Default::default()
            },
        );
    }
    tree.add(
        12,
        Node {
            owner: Some(ComponentId(10)),
            ..Default::default()
        },
    );

    let service = ExpressionService::default();
    let container = service.get_container(&tree, ComponentId(12));
    assert!(matches!(container, Some(ComponentId(10)) | Some(ComponentId(11))));
}

#[test]
fn test_simple_locator_merges_context() {
    let tree = tree();
    let service = ExpressionService::default();

    let locator = service
        .resolve_locator(&tree, ComponentId(2), ComponentId(6), false, None)
        .unwrap();

    assert_eq!(locator.target, "save");
    assert_eq!(locator.scope, "itemList");
    let context = locator.context.unwrap();
    assert_eq!(context.get("page"), Some(&json!("home")));
    // Root context wins over parent context
    assert_eq!(context.get("row"), Some(&json!(7)));
    assert!(locator.metadata.is_none());
}

#[test]
fn test_primitive_locator_is_rerooted() {
    let tree = tree();
    let service = ExpressionService::default();

    let locator = service
        .resolve_locator(&tree, ComponentId(5), ComponentId(4), true, None)
        .unwrap();

    assert_eq!(locator.target, format!("fieldDef{}input", PRIMITIVE_SEPARATOR));
    assert_eq!(locator.scope, "itemList");
    let context = locator.context.unwrap();
    assert_eq!(context.get("kind"), Some(&json!("text")));
    assert_eq!(context.get("row"), Some(&json!(7)));

    let metadata = locator.metadata.unwrap();
    assert_eq!(metadata.root, "markup://ui:field");
    assert_eq!(metadata.root_id, "field");
    assert_eq!(metadata.parent, "markup://ui:list");
    assert_eq!(metadata.grandparent, "markup://app:page");
    assert_eq!(metadata.target_description.as_deref(), Some("a field"));

    println!("✓ Primitive locators carry their target one level up");
}

#[test]
fn test_missing_declarations_yield_none() {
    let tree = tree();
    let service = ExpressionService::default();

    assert!(service
        .resolve_locator(&tree, ComponentId(1), ComponentId(2), false, None)
        .is_none());
    assert!(service
        .resolve_locator(&tree, ComponentId(2), ComponentId(3), false, None)
        .is_none());
}

#[test]
fn test_locator_def_defaults() {
    let def: LocatorDef = serde_json::from_value(json!({})).unwrap();
    assert!(!def.is_primitive);
    assert!(def.alias.is_none());
    assert!(def.context.is_empty());
}
