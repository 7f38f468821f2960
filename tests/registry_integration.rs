//! Registry, capabilities and aggregation through the public API.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use serde_json::json;
use treebus::{
    any_true, registry::capability_list_topic, Aggregator, Broker, BusResult, Callable,
    ClassDescriptor, DType, Flags, MetaFlags, Metadata, Registrable, StatusCode, Value,
};

#[derive(Default)]
struct Scope {
    fs: RefCell<Option<Value>>,
    runs: Cell<u32>,
    registered_as: RefCell<Option<String>>,
    unregistered: Cell<bool>,
}

impl Scope {
    fn on_fs(
        &self,
        value: &Value,
    ) {
        *self.fs.borrow_mut() = Some(value.clone());
    }

    fn run(
        &self,
        broker: &Broker,
        topic: &str,
        _value: &Value,
    ) -> BusResult<()> {
        self.runs.set(self.runs.get() + 1);
        let id = topic
            .strip_prefix("registry/")
            .and_then(|t| t.split('/').next())
            .unwrap_or_default();
        broker.publish(&format!("registry/{id}/events/ran"), self.runs.get())
    }
}

impl Registrable for Scope {
    const NAME: &'static str = "scope";

    fn descriptor() -> ClassDescriptor<Self> {
        ClassDescriptor::new("Oscilloscope")
            .capability("widget@")
            .capability("view")
            .setting_with(
                "fs",
                Metadata::new(DType::U32, "Sample rate")
                    .with_options(json!([[1000000, "1 MHz"], [1000, "1 kHz"]]))
                    .with_default(1000),
                Scope::on_fs,
            )
            .setting(
                "session",
                Metadata::new(DType::Str, "Session")
                    .with_default("new")
                    .with_flags(MetaFlags::NOINIT),
            )
            .action("run", Scope::run)
            .class_action("create", |v: &Value| {
                assert!(v.is_null());
            })
            .event("ran", Metadata::new(DType::U32, "Run count"))
    }

    fn on_register(
        &self,
        _broker: &Broker,
        id: &str,
    ) -> BusResult<()> {
        *self.registered_as.borrow_mut() = Some(id.to_string());
        Ok(())
    }

    fn on_unregister(
        &self,
        _broker: &Broker,
        _id: &str,
    ) {
        self.unregistered.set(true);
    }
}

struct Device;

impl Registrable for Device {
    const NAME: &'static str = "device";

    fn descriptor() -> ClassDescriptor<Self> {
        ClassDescriptor::new("Device").capability("dev").setting(
            "state",
            Metadata::new(DType::Bool, "Streaming").with_default(false),
        )
    }
}

/// Class registration lays out the class subtree and class actions.
#[test]
fn test_class_layout() {
    let broker = Broker::new();
    assert_eq!(broker.register_class::<Scope>().unwrap(), "scope");
    assert_eq!(broker.register_class::<Scope>().unwrap(), "scope");

    for topic in [
        "registry/scope/settings/fs",
        "registry/scope/settings/session",
        "registry/scope/actions/!create",
        "registry/scope/events/ran",
        "registry/scope/children",
    ] {
        assert!(broker.contains(topic), "{topic}");
    }
    assert!(!broker.contains("registry/scope/instance_of"));
    assert_eq!(broker.capability_members("widget.class"), vec!["scope".to_string()]);
    assert_eq!(broker.capability_members("view"), vec!["scope".to_string()]);
    broker.publish("registry/scope/actions/!create", Value::Null).unwrap();
}

/// Hooks, settings, actions and events on an instance.
#[test]
fn test_instance_lifecycle() {
    let broker = Broker::new();
    let scope = Rc::new(Scope::default());
    broker.register_class::<Scope>().unwrap();
    broker.publish("registry/scope/settings/session", "class").unwrap();
    broker.publish("registry/scope/settings/fs", "1 MHz").unwrap();

    let id = broker.register(&scope, None, None).unwrap();
    assert_eq!(scope.registered_as.borrow().as_deref(), Some(id.as_str()));
    assert_eq!(*scope.fs.borrow(), Some(json!(1000000)));
    assert_eq!(
        broker.query(&format!("registry/{id}/settings/session")).unwrap(),
        json!("new")
    );

    let ran = Rc::new(RefCell::new(Vec::new()));
    let sink = ran.clone();
    broker
        .subscribe(
            &format!("registry/{id}/events/ran"),
            Callable::from_fn(move |v: &Value| sink.borrow_mut().push(v.clone())),
            Flags::PUB,
        )
        .unwrap();
    broker
        .publish(&format!("registry/{id}/actions/!run"), Value::Null)
        .unwrap();
    assert_eq!(scope.runs.get(), 1);
    assert_eq!(*ran.borrow(), vec![json!(1)]);

    broker.unregister(&id, true).unwrap();
    assert!(scope.unregistered.get());
    assert!(!broker.contains(&format!("registry/{id}")));
    assert!(broker.capability_members("widget.object").is_empty());
}

/// Generated ids count up and skip ids already present in the tree.
#[test]
fn test_generated_ids() {
    let broker = Broker::new();
    let a = Rc::new(Scope::default());
    let b = Rc::new(Scope::default());
    let first = broker.register(&a, None, None).unwrap();
    broker.unregister(&first, false).unwrap();
    let second = broker.register(&b, None, None).unwrap();
    assert_eq!(first, "scope:0001");
    assert_eq!(second, "scope:0002");
    assert_eq!(broker.registered_ids(), vec!["scope", "scope:0002"]);
}

/// A dropped object can still be unregistered and no longer receives
/// publishes.
#[test]
fn test_dropped_object_unregister() {
    let broker = Broker::new();
    let scope = Rc::new(Scope::default());
    broker.register(&scope, Some("s1"), None).unwrap();
    drop(scope);

    broker.unregister("s1", false).unwrap();
    broker.publish("registry/s1/settings/fs", 1000000).unwrap();
    assert_eq!(broker.query("registry/s1/settings/fs").unwrap(), json!(1000000));
}

/// Setting lookup falls back from instance to class to default.
#[test]
fn test_setting_fallback() {
    let broker = Broker::new();
    let scope = Rc::new(Scope::default());
    broker.register(&scope, Some("s1"), None).unwrap();
    assert_eq!(broker.setting("s1", "fs").unwrap(), json!(1000));

    broker.topic_remove("registry/s1/settings/fs").unwrap();
    broker.publish("registry/scope/settings/fs", 1000000).unwrap();
    assert_eq!(broker.setting("s1", "fs").unwrap(), json!(1000000));
    assert_eq!(
        broker.setting("s1", "nope").unwrap_err().status_code(),
        StatusCode::NotFound
    );
}

/// Two devices feeding an any-true aggregator.
#[test]
fn test_any_true_aggregation() {
    let broker = Broker::new();
    broker
        .topic_add("app/streaming", Metadata::new(DType::Bool, "Any device streaming"))
        .unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    broker
        .subscribe(
            "app/streaming",
            Callable::from_fn(move |v: &Value| sink.borrow_mut().push(v.clone())),
            Flags::PUB,
        )
        .unwrap();

    let aggregator =
        Aggregator::new(&broker, "dev", "settings/state", any_true, "app/streaming").unwrap();
    let d1 = Rc::new(Device);
    let d2 = Rc::new(Device);
    broker.register(&d1, Some("d1"), None).unwrap();
    broker.register(&d2, Some("d2"), None).unwrap();
    assert_eq!(aggregator.members(), vec!["d1".to_string(), "d2".to_string()]);
    assert_eq!(
        broker.query(&capability_list_topic("dev")).unwrap(),
        json!(["d1", "d2"])
    );
    seen.borrow_mut().clear();

    broker.publish("registry/d1/settings/state", true).unwrap();
    assert_eq!(*seen.borrow(), vec![json!(true)]);

    broker.publish("registry/d2/settings/state", true).unwrap();
    broker.publish("registry/d1/settings/state", false).unwrap();
    assert_eq!(*seen.borrow(), vec![json!(true)]);

    broker.publish("registry/d2/settings/state", false).unwrap();
    assert_eq!(*seen.borrow(), vec![json!(true), json!(false)]);

    aggregator.close(&broker).unwrap();
}
