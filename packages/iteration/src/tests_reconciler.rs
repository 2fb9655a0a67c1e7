use crate::factory::MockFactory;
use crate::reconciler::*;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use trellis_attributes::AttributeStore;
use trellis_common::{ComponentId, MapProvider, MockHost, RecordingReporter, Value, ValueProvider};

const ITERATION: ComponentId = ComponentId(1);

struct Fixture {
    iteration: Iteration,
    factory: Rc<MockFactory>,
    host: Rc<MockHost>,
    reporter: Rc<RecordingReporter>,
}

fn row_template() -> Value {
    Value::list([Value::map([("descriptor", Value::from("markup://ui:row"))])])
}

fn fixture(config: Vec<(&str, Value)>) -> Fixture {
    let mut values: BTreeMap<String, Value> = config
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    values.entry(TEMPLATE.to_string()).or_insert_with(row_template);

    let attributes = Rc::new(AttributeStore::new(Rc::new(iteration_defs())));
    attributes.initialize(&values, ITERATION);

    let factory = Rc::new(MockFactory::new());
    let host = Rc::new(MockHost::new());
    let reporter = Rc::new(RecordingReporter::new());
    let iteration = Iteration::new(ITERATION, attributes, factory.clone(), host.clone())
        .with_owner(ComponentId(0))
        .with_reporter(reporter.clone());
    Fixture {
        iteration,
        factory,
        host,
        reporter,
    }
}

fn numbers(n: i32) -> Value {
    Value::list((1..=n).map(Value::from))
}

fn rows(labels: &[&str]) -> Vec<Value> {
    labels
        .iter()
        .map(|label| Value::map([("label", Value::from(*label))]))
        .collect()
}

/// Marks every completed body as rendered and records operations
struct Renderer {
    host: Rc<MockHost>,
    operations: RefCell<Vec<IterationOperation>>,
}

impl IterationListener for Renderer {
    fn iteration_complete(&self, _iteration: ComponentId, report: &BodyReport) {
        for id in &report.body {
            self.host.mark_rendered(*id);
        }
        self.operations.borrow_mut().push(report.operation);
    }
}

fn render_on_complete(f: &Fixture) -> Rc<Renderer> {
    let renderer = Rc::new(Renderer {
        host: f.host.clone(),
        operations: RefCell::new(Vec::new()),
    });
    f.iteration.add_listener(renderer.clone());
    renderer
}

fn indexes(f: &Fixture, body: &[ComponentId]) -> Vec<usize> {
    body.iter()
        .map(|id| f.factory.scope_of(*id).map(|s| s.index()).unwrap_or(usize::MAX))
        .collect()
}

#[tokio::test]
async fn test_scenario_a_builds_three_children_in_order() {
    let f = fixture(vec![
        (ITEMS, numbers(3)),
        (START, Value::from(0)),
        (END, Value::from(3)),
    ]);

    assert_eq!(f.iteration.end(), 3);
    let report = f.iteration.create_body(true).await;

    assert_eq!(report.operation, IterationOperation::Initialize);
    assert_eq!(report.body.len(), 3);
    assert_eq!(report.built, 3);
    assert_eq!(indexes(&f, &report.body), vec![0, 1, 2]);
    assert_eq!(f.iteration.body(), report.body);
    assert!(f.iteration.is_loaded());

    println!("✓ Three children built in index order");
}

#[tokio::test]
async fn test_async_builds_keep_item_order() {
    let f = fixture(vec![(ITEMS, numbers(5))]);

    let report = f.iteration.create_body(false).await;

    assert_eq!(f.factory.completed(), vec![4, 3, 2, 1, 0]);
    assert_eq!(report.body, (100..105).map(ComponentId).collect::<Vec<_>>());
    assert_eq!(indexes(&f, &report.body), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_unchanged_items_reuse_identical_components() {
    let f = fixture(vec![(ITEMS, Value::list(rows(&["a", "b", "c"])))]);
    render_on_complete(&f);

    let first = f.iteration.create_body(true).await;
    let second = f.iteration.update_body().await.unwrap();
    let third = f.iteration.update_body().await.unwrap();

    assert_eq!(second.body, first.body);
    assert_eq!(third.body, first.body);
    assert_eq!((second.reused, second.built), (3, 0));
    assert_eq!(f.factory.builds(), 3);
    assert!(f.reporter.warnings().is_empty());
    assert!(f.host.destroyed().is_empty());
}

#[tokio::test]
async fn test_moved_items_relocate_their_scopes() {
    let items = rows(&["a", "b", "c"]);
    let f = fixture(vec![(ITEMS, Value::list(items.clone()))]);
    render_on_complete(&f);
    let first = f.iteration.create_body(true).await;
    let component_of_a = first.body[0];

    let reordered = vec![items[2].clone(), items[0].clone(), items[1].clone()];
    f.iteration
        .attributes()
        .set(ITEMS, Value::list(reordered), ITERATION)
        .unwrap();
    let report = f.iteration.on_change(ITEMS).await.unwrap();

    assert_eq!(report.reused, 3);
    assert_eq!(report.body, vec![first.body[2], first.body[0], first.body[1]]);
    let scope = f.factory.scope_of(component_of_a).unwrap();
    assert_eq!(scope.index(), 1);
    assert_eq!(scope.get_value("index"), Value::from(1));
    assert_eq!(scope.get_value("item.label"), Value::from("a"));
}

#[tokio::test]
async fn test_equal_but_distinct_items_are_rebuilt() {
    let items = rows(&["a", "b"]);
    let f = fixture(vec![(ITEMS, Value::list(items.clone()))]);
    render_on_complete(&f);
    let first = f.iteration.create_body(true).await;

    let lookalike = Value::map([("label", Value::from("b"))]);
    f.iteration
        .attributes()
        .set(ITEMS, Value::list([items[0].clone(), lookalike]), ITERATION)
        .unwrap();
    let report = f.iteration.update_body().await.unwrap();

    assert_eq!((report.reused, report.built, report.orphaned), (1, 1, 1));
    assert_eq!(report.body[0], first.body[0]);
    assert_ne!(report.body[1], first.body[1]);
}

#[tokio::test]
async fn test_unrendered_body_is_cleared_with_warning() {
    let f = fixture(vec![(ITEMS, numbers(2))]);
    let first = f.iteration.create_body(true).await;

    let report = f.iteration.update_body().await.unwrap();

    assert_eq!(f.host.destroyed(), first.body);
    assert_eq!((report.reused, report.built), (0, 2));
    let warnings = f.reporter.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].starts_with("[Performance degradation]"));
    assert!(warnings[0].contains("[id:1]"));
}

#[tokio::test]
async fn test_update_during_build_is_queued() {
    let f = fixture(vec![(ITEMS, numbers(3))]);
    let renderer = render_on_complete(&f);

    let (created, updated) = futures::join!(f.iteration.create_body(false), f.iteration.update_body());

    assert!(updated.is_none());
    assert_eq!(created.operation, IterationOperation::Update);
    assert_eq!(created.reused, 3);
    assert!(!f.iteration.is_queued());
    assert_eq!(
        *renderer.operations.borrow(),
        vec![IterationOperation::Initialize, IterationOperation::Update]
    );
}

#[tokio::test]
async fn test_failed_items_are_reported_individually() {
    let f = fixture(vec![(ITEMS, numbers(3))]);
    f.factory.fail_at(1);
    f.factory.panic_at(2);

    let report = f.iteration.create_body(true).await;

    assert_eq!(report.body.len(), 1);
    assert_eq!((report.built, report.failed), (1, 2));
    let errors = f.reporter.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.contains("item 1 rejected")));
    assert!(errors.iter().any(|e| e.contains("exploded")));
}

#[tokio::test]
async fn test_range_change_keeps_surviving_items() {
    let f = fixture(vec![(ITEMS, numbers(4)), (END, Value::from(3))]);
    render_on_complete(&f);
    let first = f.iteration.create_body(true).await;

    f.iteration
        .attributes()
        .set(START, Value::from(1), ITERATION)
        .unwrap();
    let report = f.iteration.on_change(START).await.unwrap();

    assert_eq!(report.body, first.body[1..].to_vec());
    assert_eq!((report.reused, report.orphaned), (2, 1));
    assert_eq!(f.iteration.on_change("var").await, None);
}

#[tokio::test]
async fn test_empty_template_or_items_build_nothing() {
    let f = fixture(vec![(ITEMS, Value::empty_list())]);
    let report = f.iteration.create_body(true).await;
    assert!(report.body.is_empty());
    assert!(f.iteration.is_loaded());

    let f = fixture(vec![(ITEMS, numbers(2)), (TEMPLATE, Value::empty_list())]);
    assert!(f.iteration.create_body(true).await.body.is_empty());
}

#[tokio::test]
async fn test_init_moves_body_into_template() {
    let f = fixture(vec![(ITEMS, numbers(2)), (TEMPLATE, Value::empty_list())]);
    f.iteration
        .attributes()
        .set("body", row_template(), ITERATION)
        .unwrap();

    let report = f.iteration.init().await;

    assert_eq!(report.body.len(), 2);
    assert_eq!(f.iteration.attributes().get_value(TEMPLATE).len(), Some(1));
}

#[tokio::test]
async fn test_item_scopes_fall_through_to_template_provider() {
    let template: Rc<dyn ValueProvider> =
        Rc::new(MapProvider::new(Value::map([("title", Value::from("groceries"))])));
    let attributes = Rc::new(AttributeStore::new(Rc::new(iteration_defs())));
    let config = BTreeMap::from([
        (ITEMS.to_string(), numbers(1)),
        (TEMPLATE.to_string(), row_template()),
        (VAR.to_string(), Value::from("n")),
    ]);
    attributes.initialize(&config, ITERATION);
    let factory = Rc::new(MockFactory::new());
    let iteration = Iteration::new(ITERATION, attributes, factory.clone(), Rc::new(MockHost::new()))
        .with_template_provider(Rc::downgrade(&template));

    let report = iteration.create_body(true).await;
    let scope = factory.scope_of(report.body[0]).unwrap();

    assert_eq!(scope.get_value("n"), Value::from(1));
    assert_eq!(scope.get_value("index"), Value::from(0));
    assert_eq!(scope.get_value("title"), Value::from("groceries"));
}
