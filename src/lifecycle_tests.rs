//! Element lifecycle: connection, the update pipeline, resource gating and events.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::component::ComponentConfig;
use crate::element::{Element, Event, LifecycleState, UpdateOptions};
use crate::error::{ComponentError, ResourceLoadError};
use crate::factory::{RegisterOptions, UiFactory};
use crate::host::{Document, MemoryFetcher, Resource, ResourceLoader, Target};

fn props(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn factory_with(fetcher: MemoryFetcher) -> UiFactory {
    UiFactory::builder().fetcher(Rc::new(fetcher)).build().unwrap()
}

fn define(factory: &UiFactory, config: ComponentConfig) {
    assert!(factory.register_component(config, RegisterOptions::default()).unwrap());
}

/// Connect and drive the loop until the first render has happened.
fn mount(factory: &UiFactory, element: &Element) {
    element.connect().unwrap();
    factory.run_until_stalled();
}

fn record(element: &Element, kinds: &[&str]) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for kind in kinds {
        let log = log.clone();
        element.add_event_listener(*kind, move |event: &Event| log.borrow_mut().push(event.kind.clone()));
    }
    log
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONNECTION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_connect_renders_after_the_loop_runs() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-hello", "<p><%= who %></p>").property("who", "world"));
    let el = factory.create_element("x-hello").unwrap();
    let log = record(&el, &["preconnect", "connect", "prerender", "render"]);
    assert_eq!(el.state(), LifecycleState::Constructed);

    el.connect().unwrap();
    assert_eq!(el.state(), LifecycleState::Connecting);
    assert_eq!(el.inner_html(), "");
    assert!(!el.is_ready());

    factory.run_until_stalled();
    assert_eq!(el.state(), LifecycleState::Connected);
    assert_eq!(el.inner_html(), "<p>world</p>");
    assert_eq!(*log.borrow(), vec!["preconnect", "connect", "prerender", "render"]);
    assert!(el.is_ready());
}

#[test]
fn test_lifecycle_events_bubble_to_the_document() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-bubble", "b"));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    factory
        .realm()
        .document()
        .add_event_listener("render", move |event: &Event| sink.borrow_mut().push(event.target.tag_name().to_string()));

    let el = factory.create_element("x-bubble").unwrap();
    mount(&factory, &el);
    el.disconnect();
    assert_eq!(*seen.borrow(), vec!["x-bubble"]);
    assert_eq!(factory.realm().document().dispatched(), 5);
}

#[test]
fn test_preconnect_sees_no_attribute_data() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-pre", "<%= x %>").property("x", "a"));
    let el = factory.realm().create_element_with("x-pre", &[("x", "b")], "").unwrap();
    let at_preconnect = Rc::new(RefCell::new(None));
    let slot = at_preconnect.clone();
    el.add_event_listener("preconnect", move |event: &Event| {
        *slot.borrow_mut() = Some(event.target.data());
    });
    mount(&factory, &el);
    assert_eq!(at_preconnect.borrow().as_ref().map(Map::len), Some(0));
}

#[test]
fn test_instance_attribute_wins_over_default() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-prec", "<%= x %>").property("x", "a"));
    let el = factory.realm().create_element_with("x-prec", &[("x", "b")], "").unwrap();
    mount(&factory, &el);
    assert_eq!(el.get("x"), Some(json!("b")));
    assert_eq!(el.inner_html(), "b");
}

#[test]
fn test_defaults_are_parsed_by_declared_type() {
    let factory = UiFactory::new();
    define(
        &factory,
        ComponentConfig::new("x-typed", "<%= n + 1 %> <%= on ? 'y' : 'n' %> <%= list.length %>")
            .property("n:number", "41")
            .property("on:boolean", "true")
            .property("list:array", "[1, 2, 3]"),
    );
    let el = factory.create_element("x-typed").unwrap();
    mount(&factory, &el);
    assert_eq!(el.get("n"), Some(json!(41)));
    assert_eq!(el.inner_html(), "42 y 3");
}

#[test]
fn test_typed_instance_attribute_declares_property() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-count", "<%= typeof count == 'number' ? count * 2 : '-' %>"));
    let el = factory
        .realm()
        .create_element_with("x-count", &[("count:number", "5")], "")
        .unwrap();
    mount(&factory, &el);
    assert_eq!(el.get("count"), Some(json!(5)));
    assert_eq!(el.properties()["count"].type_name.as_deref(), Some("number"));
    assert_eq!(el.inner_html(), "10");
}

#[test]
fn test_typed_mutations_are_batched_and_asynchronous() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-batch", "<%= count %>"));
    let el = factory
        .realm()
        .create_element_with("x-batch", &[("count:number", "1")], "")
        .unwrap();
    mount(&factory, &el);
    let renders = record(&el, &["render"]);

    el.set_attribute("count:number", "2").unwrap();
    el.set_attribute("count:number", "3").unwrap();
    assert_eq!(el.get("count"), Some(json!(1)));

    factory.run_until_stalled();
    assert_eq!(el.get("count"), Some(json!(3)));
    assert_eq!(el.inner_html(), "3");
    assert_eq!(renders.borrow().len(), 1);

    // Untyped mutations alone do not update
    el.set_attribute("plain", "x").unwrap();
    factory.run_until_stalled();
    assert_eq!(renders.borrow().len(), 1);
}

#[test]
fn test_untyped_instances_ignore_unobserved_attributes() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-plain", "<%= label %>").property("label", "a"));
    let el = factory.create_element("x-plain").unwrap();
    mount(&factory, &el);

    el.set_attribute("count:number", "2").unwrap();
    factory.run_until_stalled();
    assert_eq!(el.get("count"), None);
}

#[test]
fn test_observed_attribute_updates_synchronously() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-obs", "[<%= label %>]").property("label", "a"));
    let el = factory.create_element("x-obs").unwrap();
    mount(&factory, &el);

    el.set_attribute("label", "b").unwrap();
    assert_eq!(el.inner_html(), "[b]");
    el.remove_attribute("label").unwrap();
    assert_eq!(el.get("label"), Some(Value::Null));
    assert_eq!(el.inner_html(), "[]");
}

#[test]
fn test_update_before_connect_is_ignored() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-early", "<%= v %>").property("v", "a"));
    let el = factory.create_element("x-early").unwrap();
    el.update(props(json!({"v": "b"})), UpdateOptions::default()).unwrap();
    assert!(el.data().is_empty());
    assert_eq!(el.attribute("v"), None);
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPDATE PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_update_is_idempotent() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-idem", "<b><%= n %></b>").property("n:number", "0"));
    let el = factory.create_element("x-idem").unwrap();
    mount(&factory, &el);

    el.update(props(json!({"n": "7"})), UpdateOptions::default()).unwrap();
    let (data, html) = (el.get("n"), el.inner_html());
    el.update(props(json!({"n": "7"})), UpdateOptions::default()).unwrap();
    assert_eq!(el.get("n"), data);
    assert_eq!(el.inner_html(), html);
    assert_eq!(html, "<b>7</b>");
}

#[test]
fn test_reflection_into_attributes() {
    let factory = UiFactory::new();
    define(
        &factory,
        ComponentConfig::new("x-reflect", "")
            .property("items:array", "[]")
            .property("font-size", "1em")
            .property("data:urljson", ""),
    );
    let el = factory.create_element("x-reflect").unwrap();
    mount(&factory, &el);

    el.update(props(json!({"items": [1, 2]})), UpdateOptions::default()).unwrap();
    assert_eq!(el.attribute("items").as_deref(), Some("[1,2]"));

    el.update(props(json!({"font-size": "2em"})), UpdateOptions::default()).unwrap();
    assert_eq!(el.attribute("font-size").as_deref(), Some("2em"));
    assert_eq!(el.get("fontSize"), Some(json!("2em")));

    // A url-typed object value never clobbers the attribute
    el.update(props(json!({"data": {"a": 1}})), UpdateOptions::default()).unwrap();
    assert_eq!(el.attribute("data"), None);
    assert_eq!(el.get("data"), Some(json!({"a": 1})));

    el.update(props(json!({"items": [3]})), UpdateOptions::default().attr(false)).unwrap();
    assert_eq!(el.attribute("items").as_deref(), Some("[1,2]"));
}

#[test]
fn test_compound_keys_override_type() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-compound", "").property("v", "a"));
    let el = factory.create_element("x-compound").unwrap();
    mount(&factory, &el);
    el.update(props(json!({"v:json": "{\"k\": true}"})), UpdateOptions::default()).unwrap();
    assert_eq!(el.get("v"), Some(json!({"k": true})));
    assert_eq!(el.attribute("v").as_deref(), Some("{\"k\": true}"));
}

#[test]
fn test_noparse_stores_strings_verbatim() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-noparse", "").property("n:number", "1"));
    let el = factory.create_element("x-noparse").unwrap();
    mount(&factory, &el);
    el.update(props(json!({"n": "12"})), UpdateOptions::quiet().noparse(true)).unwrap();
    assert_eq!(el.get("n"), Some(json!("12")));
}

#[test]
fn test_parse_errors_propagate() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-bad", "<%= n %>").property("n:number", "1"));
    let el = factory.create_element("x-bad").unwrap();
    mount(&factory, &el);
    let err = el.update(props(json!({"n": "{oops"})), UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, ComponentError::Parse { ref type_name, .. } if type_name == "number"));
    // The guard was released
    el.update(props(json!({"n": "2"})), UpdateOptions::default()).unwrap();
    assert_eq!(el.inner_html(), "2");
}

#[test]
fn test_runaway_js_values_are_parse_errors() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-js", "<%= v %>").property("v:js", "1"));
    let el = factory.create_element("x-js").unwrap();
    mount(&factory, &el);
    assert_eq!(el.inner_html(), "1");

    let nested = format!("{}1{}", "[".repeat(50_000), "]".repeat(50_000));
    for raw in ["'ab'.repeat(1e19)".to_string(), "'x'.padStart(1e15)".to_string(), nested] {
        let err = el.update(props(json!({"v": raw})), UpdateOptions::default()).unwrap_err();
        assert!(matches!(err, ComponentError::Parse { ref type_name, .. } if type_name == "js"));
    }
    assert_eq!(el.inner_html(), "1");

    // A typed instance attribute fails the connect without taking the host down
    let el = factory
        .realm()
        .parse_element(r#"<x-js v:js="'ab'.repeat(1e19)"></x-js>"#)
        .unwrap();
    mount(&factory, &el);
    assert!(!el.is_ready());
}

#[test]
fn test_render_error_keeps_previous_content() {
    let factory = UiFactory::new();
    define(
        &factory,
        ComponentConfig::new("x-fail", "<% if (boom) { %><%= nope.x %><% } %>ok").property("boom:boolean", "false"),
    );
    let el = factory.create_element("x-fail").unwrap();
    mount(&factory, &el);
    assert_eq!(el.inner_html(), "ok");

    let err = el.update(props(json!({"boom": "true"})), UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, ComponentError::Script(_)));
    assert_eq!(el.inner_html(), "ok");
    assert_eq!(el.state(), LifecycleState::Connected);
}

#[test]
fn test_reentrant_update_is_dropped() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-reentrant", "<%= n %>").property("n", "0"));
    let el = factory.create_element("x-reentrant").unwrap();
    mount(&factory, &el);

    let renders = Rc::new(RefCell::new(0));
    let counter = renders.clone();
    el.add_event_listener("render", move |event: &Event| {
        *counter.borrow_mut() += 1;
        event
            .target
            .update(props(json!({"n": "99"})), UpdateOptions::default())
            .unwrap();
    });

    el.update(props(json!({"n": "1"})), UpdateOptions::default()).unwrap();
    assert_eq!(*renders.borrow(), 1);
    assert_eq!(el.get("n"), Some(json!("1")));
    assert_eq!(el.inner_html(), "1");
}

#[test]
fn test_deferred_parse_schedules_follow_up() {
    let fetcher = MemoryFetcher::new();
    fetcher.route("/info.json", r#"{"a": 1}"#);
    let factory = factory_with(fetcher);
    define(
        &factory,
        ComponentConfig::new("x-url", "<%= info ? info.a : 'none' %>").property("info:urljson", "/info.json"),
    );
    let el = factory.create_element("x-url").unwrap();
    let outputs = Rc::new(RefCell::new(Vec::new()));
    let sink = outputs.clone();
    el.add_event_listener("render", move |event: &Event| sink.borrow_mut().push(event.target.inner_html()));

    mount(&factory, &el);
    assert_eq!(*outputs.borrow(), vec!["none", "1"]);
    assert_eq!(el.get("info"), Some(json!({"a": 1})));
    assert_eq!(el.attribute("info"), None);
}

#[test]
fn test_deferred_result_applies_after_disconnect() {
    let fetcher = MemoryFetcher::new();
    fetcher.route("/late.txt", "late");
    let factory = factory_with(fetcher);
    define(&factory, ComponentConfig::new("x-late", "").property("body:urltext", ""));
    let el = factory.create_element("x-late").unwrap();
    mount(&factory, &el);

    el.update(props(json!({"body": "/late.txt"})), UpdateOptions::default()).unwrap();
    assert_eq!(el.get("body"), Some(Value::Null));
    el.disconnect();
    factory.run_until_stalled();
    assert_eq!(el.get("body"), Some(json!("late")));
    assert_eq!(el.state(), LifecycleState::Disconnected);
}

#[test]
fn test_failed_deferred_parse_leaves_placeholder() {
    let factory = factory_with(MemoryFetcher::new());
    define(&factory, ComponentConfig::new("x-404", "").property("doc:urljson", "/missing.json"));
    let el = factory.create_element("x-404").unwrap();
    mount(&factory, &el);
    assert_eq!(el.get("doc"), Some(Value::Null));
    assert_eq!(el.state(), LifecycleState::Connected);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCESSORS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_property_accessors() {
    let factory = UiFactory::new();
    define(
        &factory,
        ComponentConfig::new("x-acc", "<%= fontSize %>")
            .property("font-size", "1em")
            .property("title", "t"),
    );
    let el = factory.create_element("x-acc").unwrap();
    mount(&factory, &el);

    assert_eq!(el.accessors(), vec!["fontSize"]);
    assert_eq!(el.property("fontSize"), Some(json!("1em")));
    assert!(el.set_property("fontSize", "12px").unwrap());
    assert_eq!(el.attribute("font-size").as_deref(), Some("12px"));
    assert_eq!(el.inner_html(), "12px");

    // Built-in capabilities are never shadowed
    assert_eq!(el.property("title"), None);
    assert!(!el.set_property("title", "x").unwrap());
    assert!(!el.set_property("missing", 1).unwrap());
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_event_scripts_write_back_and_request_updates() {
    let factory = UiFactory::new();
    define(
        &factory,
        ComponentConfig::new(
            "x-events",
            r#"<script onclick>count += 1</script>
<script onping="ev">update({label: ev.detail})</script><i><%= count %>:<%= label %></i>"#,
        )
        .property("count:number", "0")
        .property("label", "x"),
    );
    let el = factory.create_element("x-events").unwrap();
    mount(&factory, &el);
    assert_eq!(el.inner_html().trim(), "<i>0:x</i>");

    el.dispatch(Event::new("click", &el));
    assert_eq!(el.get("count"), Some(json!(1)));
    assert_eq!(el.inner_html().trim(), "<i>0:x</i>");

    el.dispatch(Event::new("ping", &el).with_detail(json!("hi")));
    assert_eq!(el.inner_html().trim(), "<i>1:hi</i>");
}

#[test]
fn test_once_event_scripts_run_once() {
    let factory = UiFactory::new();
    define(
        &factory,
        ComponentConfig::new("x-once", "<script onrender once>hits += 1</script>").property("hits:number", "0"),
    );
    let el = factory.create_element("x-once").unwrap();
    mount(&factory, &el);
    el.render().unwrap();
    el.render().unwrap();
    assert_eq!(el.get("hits"), Some(json!(1)));
}

#[test]
fn test_listener_once() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-listen", ""));
    let el = factory.create_element("x-listen").unwrap();
    let hits = Rc::new(RefCell::new(0));
    let counter = hits.clone();
    el.add_event_listener_once("render", move |_: &Event| *counter.borrow_mut() += 1);
    mount(&factory, &el);
    el.render().unwrap();
    assert_eq!(*hits.borrow(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// READY, DISCONNECT, RECONNECT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_ready_resolves_after_first_render() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-ready", "done"));
    let el = factory.create_element("x-ready").unwrap();
    el.connect().unwrap();
    assert_eq!(factory.block_on(el.ready()), Some(true));
    assert_eq!(el.inner_html(), "done");
    // Already resolved
    assert_eq!(factory.block_on(el.ready()), Some(true));
}

#[test]
fn test_reconnect_keeps_original_contents() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-again", "<u><slot></slot></u>"));
    let el = factory.realm().create_element_with("x-again", &[], "child").unwrap();
    let log = record(&el, &["disconnect", "connect"]);
    mount(&factory, &el);
    assert_eq!(el.inner_html(), "<u>child</u>");

    el.disconnect();
    assert_eq!(el.state(), LifecycleState::Disconnected);
    mount(&factory, &el);
    assert_eq!(el.state(), LifecycleState::Connected);
    assert_eq!(el.inner_html(), "<u>child</u>");
    assert_eq!(el.contents().unwrap().html(), "child");
    assert_eq!(*log.borrow(), vec!["connect", "disconnect", "connect"]);
}

#[test]
fn test_disconnect_before_scripts_load_skips_connect() {
    let factory = UiFactory::new();
    define(&factory, ComponentConfig::new("x-gone", "x"));
    let el = factory.create_element("x-gone").unwrap();
    el.connect().unwrap();
    el.disconnect();
    factory.run_until_stalled();
    assert_eq!(el.inner_html(), "");
    assert!(!el.is_ready());
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE LOADING
// ═══════════════════════════════════════════════════════════════════════════════

/// Holds external scripts pending until the test settles them. A script settled before it is
/// injected completes as soon as it is injected.
#[derive(Default)]
struct ScriptedLoader {
    log: RefCell<Vec<String>>,
    pending: RefCell<IndexMap<String, oneshot::Sender<Result<(), ResourceLoadError>>>>,
    settled: RefCell<IndexMap<String, Result<(), ResourceLoadError>>>,
}

impl ScriptedLoader {
    fn settle(&self, src: &str, result: Result<(), ResourceLoadError>) {
        self.log.borrow_mut().push(format!("settle {src}"));
        let sender = self.pending.borrow_mut().shift_remove(src);
        match sender {
            Some(sender) => sender.send(result).unwrap(),
            None => {
                self.settled.borrow_mut().insert(src.to_string(), result);
            }
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

impl ResourceLoader for ScriptedLoader {
    fn inject(&self, target: Target, resource: &Resource) -> LocalBoxFuture<'static, Result<(), ResourceLoadError>> {
        let label = resource
            .src()
            .map(str::to_string)
            .unwrap_or_else(|| format!("inline {}", resource.text.trim()));
        self.log.borrow_mut().push(format!("{target:?} {label}"));
        if !resource.is_external_script() {
            return future::ready(Ok(())).boxed_local();
        }
        if let Some(result) = self.settled.borrow_mut().shift_remove(&label) {
            return future::ready(result).boxed_local();
        }
        let (sender, receiver) = oneshot::channel();
        self.pending.borrow_mut().insert(label, sender);
        async move { receiver.await.unwrap_or(Ok(())) }.boxed_local()
    }
}

fn scripted_factory() -> (UiFactory, Rc<ScriptedLoader>) {
    let loader = Rc::new(ScriptedLoader::default());
    let shared = loader.clone();
    let factory = UiFactory::builder()
        .fetcher(Rc::new(MemoryFetcher::new()))
        .loader(move |_: &Document| shared.clone() as Rc<dyn ResourceLoader>)
        .build()
        .unwrap();
    (factory, loader)
}

#[test]
fn test_scripts_load_strictly_in_order() {
    let (factory, loader) = scripted_factory();
    define(
        &factory,
        ComponentConfig::new(
            "x-scripts",
            r#"<style>p{}</style><script src="a.js"></script><script>after_a()</script><script src="b.js"></script><p>ok</p>"#,
        ),
    );
    let el = factory.create_element("x-scripts").unwrap();
    mount(&factory, &el);
    assert_eq!(loader.log(), vec!["Head inline p{}", "Body a.js"]);
    assert!(!el.is_ready());

    loader.settle("a.js", Ok(()));
    factory.run_until_stalled();
    assert_eq!(
        loader.log(),
        vec!["Head inline p{}", "Body a.js", "settle a.js", "Body inline after_a()", "Body b.js"]
    );
    assert!(!el.is_ready());

    loader.settle("b.js", Ok(()));
    factory.run_until_stalled();
    assert!(el.is_ready());
    assert_eq!(el.inner_html(), "<p>ok</p>");
}

#[test]
fn test_fast_script_waits_for_a_slow_earlier_one() {
    let (factory, loader) = scripted_factory();
    define(
        &factory,
        ComponentConfig::new("x-slow", r#"<script src="a.js"></script><script src="b.js"></script>ok"#),
    );
    // b.js is already done the moment it is injected; a.js is not
    loader.settle("b.js", Ok(()));
    let el = factory.create_element("x-slow").unwrap();
    mount(&factory, &el);
    factory.run_until_stalled();
    assert_eq!(loader.log(), vec!["settle b.js", "Body a.js"]);
    assert!(!el.is_ready());

    loader.settle("a.js", Ok(()));
    factory.run_until_stalled();
    assert_eq!(
        loader.log(),
        vec!["settle b.js", "Body a.js", "settle a.js", "Body b.js"]
    );
    assert!(el.is_ready());
    assert_eq!(el.inner_html(), "ok");
}

#[test]
fn test_failed_script_still_opens_the_gate() {
    let (factory, loader) = scripted_factory();
    define(&factory, ComponentConfig::new("x-broken", r#"<script src="gone.js"></script>ok"#));
    let el = factory.create_element("x-broken").unwrap();
    mount(&factory, &el);

    loader.settle(
        "gone.js",
        Err(ResourceLoadError {
            url: "gone.js".into(),
            reason: "HTTP 404".into(),
        }),
    );
    factory.run_until_stalled();
    assert_eq!(el.inner_html(), "ok");
}

#[test]
fn test_resources_load_once_per_definition() {
    let (factory, loader) = scripted_factory();
    define(&factory, ComponentConfig::new("x-shared", r#"<script src="lib.js"></script>"#));
    let first = factory.create_element("x-shared").unwrap();
    let second = factory.create_element("x-shared").unwrap();
    mount(&factory, &first);
    mount(&factory, &second);
    loader.settle("lib.js", Ok(()));
    factory.run_until_stalled();

    assert_eq!(loader.log(), vec!["Body lib.js", "settle lib.js"]);
    assert!(first.is_ready() && second.is_ready());
}

#[test]
fn test_default_loader_records_resources_in_the_document() {
    let fetcher = MemoryFetcher::new();
    fetcher.route("/lib.js", "window.lib = 1");
    let factory = factory_with(fetcher);
    define(
        &factory,
        ComponentConfig::new("x-doc", r#"<link rel="stylesheet" href="/a.css"><script src="/lib.js"></script>ok"#),
    );
    let el = factory.create_element("x-doc").unwrap();
    mount(&factory, &el);

    let document = factory.realm().document();
    assert_eq!(document.head().len(), 1);
    assert_eq!(document.body()[0].src(), Some("/lib.js"));
    assert_eq!(el.inner_html(), "ok");
}
