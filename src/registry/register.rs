use std::rc::Rc;

use serde_json::json;
use tracing::{debug, info, warn};
use treebus_error::{ensure, BusResult, RegistryError, StackError, TopicError};

use super::{
    descriptor::ClassDescriptor, registry_topic, resolve_capability, Record, Registrable,
    CAPABILITIES, CAPABILITY_ADD, CAPABILITY_REMOVE, COMMON_SETTINGS, NEXT_UNIQUE_ID, REGISTRY,
    REGISTRY_MANAGER,
};
use crate::{
    broker::Broker,
    callable::Callable,
    metadata::{DType, MetaFlags, Metadata},
    topic::Flags,
    value::Value,
};

const GROUPS: [&str; 4] = ["actions", "callbacks", "events", "settings"];

impl Record {
    fn new(class_id: Option<String>) -> Self {
        Self {
            class_id,
            bindings: Vec::new(),
            capabilities: Vec::new(),
            settings: Vec::new(),
            on_unregister: None,
        }
    }
}

fn validate_id(id: &str) -> Result<(), RegistryError> {
    let bad = id.is_empty()
        || id.starts_with('!')
        || id.contains(|c| matches!(c, '/' | '$' | '~' | '#'));
    if bad {
        Err(RegistryError::InvalidId { id: id.to_string() })
    } else {
        Ok(())
    }
}

impl Broker {
    /// Creates the registry and capability topics. Safe to call repeatedly.
    pub fn registry_initialize(&self) -> BusResult<()> {
        if self.registry.borrow().initialized {
            return Ok(());
        }
        self.untracked(|| -> BusResult<()> {
            self.topic_add_with(REGISTRY_MANAGER, Metadata::node("Registry manager"), true)?;
            self.topic_add_with(
                NEXT_UNIQUE_ID,
                Metadata::new(DType::U64, "Next instance number").with_default(1),
                true,
            )?;
            self.topic_add_with(CAPABILITIES, Metadata::node("Capabilities"), true)?;
            for (topic, add) in [(CAPABILITY_ADD, true), (CAPABILITY_REMOVE, false)] {
                self.topic_add_with(topic, Metadata::new(DType::Str, "Capability name"), true)?;
                let handler = Callable::from_fn(move |b: &Broker, _: &str, v: &Value| {
                    b.on_capability_registry_action(v, add)
                });
                self.subscribe(topic, handler, Flags::COMMAND)?;
            }
            self.topic_add_with(REGISTRY, Metadata::node("Registered classes and instances"), true)?;
            self.topic_add_with(COMMON_SETTINGS, Metadata::node("Application settings"), true)?;
            Ok(())
        })?;
        self.registry.borrow_mut().initialized = true;
        debug!("registry initialized");
        Ok(())
    }

    pub(crate) fn ensure_registry(&self) -> BusResult<()> {
        ensure!(self.registry.borrow().initialized, RegistryError::Uninitialized);
        Ok(())
    }

    pub fn registered(
        &self,
        id: &str,
    ) -> bool {
        self.registry.borrow().records.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.borrow().records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Class id of a registered instance.
    pub fn instance_of(
        &self,
        id: &str,
    ) -> Option<String> {
        self.registry
            .borrow()
            .records
            .get(id)
            .and_then(|r| r.class_id.clone())
    }

    fn has_typed(
        &self,
        topic: &str,
    ) -> bool {
        self.tree
            .borrow()
            .get(topic)
            .is_some_and(|n| n.meta.is_some())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Registration
    ////////////////////////////////////////////////////////////////////////////

    /// Registers class `T` under `T::NAME`. Idempotent.
    pub fn register_class<T: Registrable>(&self) -> BusResult<String> {
        self.registry_initialize()?;
        let id = T::NAME;
        if self.registered(id) {
            return Ok(id.to_string());
        }
        validate_id(id)?;
        let descriptor = T::descriptor();
        let root = registry_topic(id);
        let created = !self.contains(&root);

        let mut record = Record::new(None);
        let built = self.untracked(|| self.bind_class(id, &descriptor, &mut record));
        if let Err(e) = built {
            self.untracked(|| self.release(id, &record, created));
            return Err(e);
        }
        self.registry
            .borrow_mut()
            .records
            .insert(id.to_string(), record);

        let caps: Vec<String> = descriptor
            .capabilities
            .iter()
            .map(|c| resolve_capability(c, false))
            .collect();
        if let Err(e) = self.capabilities_append(id, &caps) {
            return Err(self.abandon(id, created, e));
        }
        info!(id, "class registered");
        Ok(id.to_string())
    }

    /// Registers an instance of `T`, registering the class first if needed.
    ///
    /// Without an explicit `id` one is generated as `<class>:<n>`. The
    /// broker keeps only weak references to `obj`.
    pub fn register<T: Registrable>(
        &self,
        obj: &Rc<T>,
        id: Option<&str>,
        parent: Option<&str>,
    ) -> BusResult<String> {
        let class_id = self.register_class::<T>()?;
        let id = match id {
            Some(id) => {
                validate_id(id)?;
                id.to_string()
            }
            None => self.untracked(|| self.next_instance_id(&class_id))?,
        };
        if self.registered(&id) {
            warn!(id = %id, "already registered, replacing");
            self.unregister(&id, false)?;
        }

        let descriptor = T::descriptor();
        let root = registry_topic(&id);
        let created = !self.contains(&root);

        let mut record = Record::new(Some(class_id.clone()));
        let built = self.untracked(|| {
            self.bind_instance(obj, &id, &class_id, parent, &descriptor, &mut record)
        });
        if let Err(e) = built {
            self.untracked(|| self.release(&id, &record, created));
            return Err(e);
        }
        let weak = Rc::downgrade(obj);
        record.on_unregister = Some(Box::new(move |broker: &Broker, id: &str| {
            if let Some(obj) = weak.upgrade() {
                obj.on_unregister(broker, id);
            }
        }));
        self.registry.borrow_mut().records.insert(id.clone(), record);

        if let Err(e) = obj.on_register(self, &id) {
            warn!(id = %id, error = %e, "registration hook failed, rolling back");
            let record = self.registry.borrow_mut().records.remove(&id);
            if let Some(record) = record {
                self.untracked(|| self.release(&id, &record, created));
            }
            return Err(RegistryError::HookFailed {
                id,
                reason: e.to_string(),
            }
            .into());
        }

        if let Some(parent) = parent.filter(|p| self.registered(p)) {
            self.untracked(|| self.edit_children(parent, &id, true))?;
        }
        let caps: Vec<String> = descriptor
            .capabilities
            .iter()
            .map(|c| resolve_capability(c, true))
            .collect();
        if let Err(e) = self.capabilities_append(&id, &caps) {
            return Err(self.abandon(&id, created, e));
        }
        info!(id = %id, class = %class_id, "instance registered");
        Ok(id)
    }

    /// Unregisters an id whose capability setup failed after it was
    /// recorded. The subtree is deleted if this registration created it.
    fn abandon(
        &self,
        id: &str,
        created: bool,
        cause: StackError,
    ) -> StackError {
        warn!(id, error = %cause, "capability setup failed, rolling back");
        if let Err(e) = self.unregister(id, created) {
            warn!(id, error = %e, "rollback unregister failed");
        }
        RegistryError::Incomplete {
            id: id.to_string(),
            reason: cause.to_string(),
        }
        .into()
    }

    fn next_instance_id(
        &self,
        class_id: &str,
    ) -> BusResult<String> {
        loop {
            let n = self.query(NEXT_UNIQUE_ID)?.as_u64().unwrap_or(1);
            self.publish(NEXT_UNIQUE_ID, n + 1)?;
            let id = format!("{class_id}:{n:04x}");
            if !self.contains(&registry_topic(&id)) {
                return Ok(id);
            }
        }
    }

    fn create_subtree(
        &self,
        root: &str,
        brief: &str,
        instance: bool,
    ) -> BusResult<()> {
        self.topic_add_with(root, Metadata::node(brief), true)?;
        for group in GROUPS {
            self.topic_add_with(&format!("{root}/{group}"), Metadata::node(group), true)?;
        }
        self.topic_add_with(
            &format!("{root}/instance"),
            Metadata::new(DType::Bool, "Object bound")
                .with_default(false)
                .with_flags(MetaFlags::TMP | MetaFlags::RO),
            true,
        )?;
        if instance {
            self.topic_add_with(
                &format!("{root}/instance_of"),
                Metadata::new(DType::Str, "Class id").with_flags(MetaFlags::RO),
                true,
            )?;
        }
        self.topic_add_with(
            &format!("{root}/parent"),
            Metadata::new(DType::Str, "Parent id").with_default(""),
            true,
        )?;
        self.topic_add_with(
            &format!("{root}/children"),
            Metadata::new(DType::UniqueStrings, "Child ids").with_default(json!([])),
            true,
        )?;
        Ok(())
    }

    fn bind_command(
        &self,
        topic: &str,
        callable: Callable,
        record: &mut Record,
    ) -> BusResult<()> {
        self.topic_add_with(topic, Metadata::new(DType::Obj, topic), true)?;
        self.subscribe(topic, callable.clone(), Flags::COMMAND)?;
        record
            .bindings
            .push((topic.to_string(), callable, Flags::COMMAND));
        Ok(())
    }

    fn bind_class<T>(
        &self,
        id: &str,
        descriptor: &ClassDescriptor<T>,
        record: &mut Record,
    ) -> BusResult<()> {
        let root = registry_topic(id);
        self.create_subtree(&root, &descriptor.brief, false)?;
        for decl in &descriptor.settings {
            let topic = format!("{root}/settings/{}", decl.name);
            self.topic_add_with(&topic, decl.meta.clone(), true)?;
            record.settings.push((decl.name.clone(), decl.meta.clone()));
        }
        for (name, callable) in &descriptor.class_actions {
            self.bind_command(&format!("{root}/actions/!{name}"), callable.clone(), record)?;
        }
        for (name, callable) in &descriptor.class_callbacks {
            self.bind_command(&format!("{root}/callbacks/!{name}"), callable.clone(), record)?;
        }
        for (name, meta) in &descriptor.events {
            self.topic_add_with(&format!("{root}/events/{name}"), meta.clone(), true)?;
        }
        Ok(())
    }

    fn bind_instance<T: Registrable>(
        &self,
        obj: &Rc<T>,
        id: &str,
        class_id: &str,
        parent: Option<&str>,
        descriptor: &ClassDescriptor<T>,
        record: &mut Record,
    ) -> BusResult<()> {
        let root = registry_topic(id);
        let class_root = registry_topic(class_id);
        self.create_subtree(&root, &descriptor.brief, true)?;
        self.publish(&format!("{root}/instance_of"), class_id)?;
        self.publish(&format!("{root}/parent"), parent.unwrap_or(""))?;

        for decl in &descriptor.settings {
            let topic = format!("{root}/settings/{}", decl.name);
            if !self.has_typed(&topic) {
                let inherited = if decl.meta.has_flag(MetaFlags::NOINIT) {
                    None
                } else {
                    self.query(&format!("{class_root}/settings/{}", decl.name))
                        .ok()
                        .filter(|v| !v.is_null())
                };
                self.topic_add_with(&topic, decl.meta.clone(), true)?;
                if let Some(value) = inherited {
                    self.publish(&topic, value)?;
                }
            }
            if let Some(binder) = &decl.handler {
                let callable = binder(obj);
                let flags = Flags::PUB | Flags::RETAIN;
                record.bindings.push((topic.clone(), callable.clone(), flags));
                self.subscribe(&topic, callable, flags)?;
            }
            record.settings.push((decl.name.clone(), decl.meta.clone()));
        }
        for (name, binder) in &descriptor.actions {
            self.bind_command(&format!("{root}/actions/!{name}"), binder(obj), record)?;
        }
        for (name, binder) in &descriptor.callbacks {
            self.bind_command(&format!("{root}/callbacks/!{name}"), binder(obj), record)?;
        }
        for (name, meta) in &descriptor.events {
            self.topic_add_with(&format!("{root}/events/{name}"), meta.clone(), true)?;
        }
        self.publish(&format!("{root}/instance"), true)?;
        Ok(())
    }

    /// Undoes a partial registration.
    fn release(
        &self,
        id: &str,
        record: &Record,
        delete: bool,
    ) {
        for (topic, callable, flags) in &record.bindings {
            if let Err(e) = self.unsubscribe(topic, callable, *flags) {
                warn!(id, topic = %topic, error = %e, "rollback unsubscribe failed");
            }
        }
        let root = registry_topic(id);
        let outcome = if delete {
            self.topic_remove(&root)
        } else if self.contains(&format!("{root}/instance")) {
            self.publish(&format!("{root}/instance"), false)
        } else {
            Ok(())
        };
        if let Err(e) = outcome {
            warn!(id, error = %e, "rollback failed");
        }
    }

    fn edit_children(
        &self,
        parent: &str,
        child: &str,
        add: bool,
    ) -> BusResult<()> {
        let topic = format!("{}/children", registry_topic(parent));
        let mut children = self
            .query(&topic)?
            .as_array()
            .cloned()
            .unwrap_or_default();
        if add {
            if !children.iter().any(|c| c.as_str() == Some(child)) {
                children.push(json!(child));
            }
        } else {
            children.retain(|c| c.as_str() != Some(child));
        }
        self.publish(&topic, Value::Array(children))
    }

    ////////////////////////////////////////////////////////////////////////////
    // Unregistration
    ////////////////////////////////////////////////////////////////////////////

    /// Unregisters `id` and, recursively, its children.
    ///
    /// The topics stay in place unless `delete` is set, so settings survive
    /// for the next registration of the same id.
    pub fn unregister(
        &self,
        id: &str,
        delete: bool,
    ) -> BusResult<()> {
        let record = self.registry.borrow_mut().records.remove(id);
        let Some(record) = record else {
            return Err(RegistryError::NotRegistered { id: id.to_string() }.into());
        };
        self.untracked(|| self.teardown(id, record, delete));
        info!(id, delete, "unregistered");
        Ok(())
    }

    fn teardown(
        &self,
        id: &str,
        record: Record,
        delete: bool,
    ) {
        for cap in &record.capabilities {
            if let Err(e) = self.capability_member(cap, id, false) {
                warn!(id, capability = %cap, error = %e, "capability removal failed");
            }
        }
        for (topic, callable, flags) in &record.bindings {
            if let Err(e) = self.unsubscribe(topic, callable, *flags) {
                warn!(id, topic = %topic, error = %e, "unsubscribe failed");
            }
        }
        if let Some(hook) = &record.on_unregister {
            hook(self, id);
        }

        let root = registry_topic(id);
        let parent = self.query_or(&format!("{root}/parent"), Value::Null);
        if let Some(parent) = parent.as_str().filter(|p| !p.is_empty()) {
            if self.contains(&format!("{}/children", registry_topic(parent))) {
                if let Err(e) = self.edit_children(parent, id, false) {
                    warn!(id, parent, error = %e, "detach from parent failed");
                }
            }
        }
        let children: Vec<String> = self
            .query_or(&format!("{root}/children"), json!([]))
            .as_array()
            .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        for child in children.iter().filter(|c| self.registered(c)) {
            if let Err(e) = self.unregister(child, delete) {
                warn!(id, child = %child, error = %e, "child unregister failed");
            }
        }

        let outcome = if delete {
            self.topic_remove(&root)
        } else if self.contains(&format!("{root}/instance")) {
            self.publish(&format!("{root}/instance"), false)
        } else {
            Ok(())
        };
        if let Err(e) = outcome {
            warn!(id, error = %e, "unregister cleanup failed");
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Settings
    ////////////////////////////////////////////////////////////////////////////

    /// Resolves a setting: the instance value, then the class value, then the
    /// declared default.
    pub fn setting(
        &self,
        id: &str,
        name: &str,
    ) -> BusResult<Value> {
        let topic = format!("{}/settings/{name}", registry_topic(id));
        if let Ok(value) = self.query(&topic) {
            return Ok(value);
        }
        let class = self
            .instance_of(id)
            .or_else(|| {
                self.query(&format!("{}/instance_of", registry_topic(id)))
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
            })
            .filter(|c| !c.is_empty());
        if let Some(class) = class {
            if let Ok(value) = self.query(&format!("{}/settings/{name}", registry_topic(&class))) {
                return Ok(value);
            }
        }
        let default = self.registry.borrow().records.get(id).and_then(|r| {
            r.settings
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, m)| m.default.clone())
        });
        default.ok_or_else(|| TopicError::NotFound { topic }.into())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use treebus_error::{GenericError, StatusCode};

    use super::*;

    #[derive(Default)]
    struct Lamp {
        levels: RefCell<Vec<Value>>,
        toggles: Cell<usize>,
    }

    impl Lamp {
        fn on_level(
            &self,
            value: &Value,
        ) {
            self.levels.borrow_mut().push(value.clone());
        }

        fn toggle(&self) {
            self.toggles.set(self.toggles.get() + 1);
        }
    }

    impl Registrable for Lamp {
        const NAME: &'static str = "lamp";

        fn descriptor() -> ClassDescriptor<Self> {
            ClassDescriptor::new("Lamp")
                .setting_with(
                    "level",
                    Metadata::new(DType::U8, "Level").with_default(10),
                    Lamp::on_level,
                )
                .setting("label", Metadata::new(DType::Str, "Label").with_default("lamp"))
                .action("toggle", Lamp::toggle)
                .event("changed", Metadata::new(DType::None, "Changed"))
        }
    }

    struct Faulty;

    impl Registrable for Faulty {
        const NAME: &'static str = "faulty";

        fn descriptor() -> ClassDescriptor<Self> {
            ClassDescriptor::new("Always fails")
        }

        fn on_register(
            &self,
            _broker: &Broker,
            _id: &str,
        ) -> BusResult<()> {
            Err(GenericError::new(StatusCode::InvalidArgs, "refused").into())
        }
    }

    thread_local! {
        static GAUGE_CAPABILITY: RefCell<&'static str> = const { RefCell::new("gauge") };
        static GAUGE_RELEASED: Cell<usize> = const { Cell::new(0) };
    }

    /// Advertises whatever capability the test selected.
    struct Gauge;

    impl Registrable for Gauge {
        const NAME: &'static str = "gauge";

        fn descriptor() -> ClassDescriptor<Self> {
            ClassDescriptor::new("Gauge").capability(GAUGE_CAPABILITY.with(|c| *c.borrow()))
        }

        fn on_unregister(
            &self,
            _broker: &Broker,
            _id: &str,
        ) {
            GAUGE_RELEASED.with(|n| n.set(n.get() + 1));
        }
    }

    /// A generated id gets the full subtree and the retained setting value.
    #[test]
    fn test_register_instance() {
        let broker = Broker::new();
        let lamp = Rc::new(Lamp::default());
        let id = broker.register(&lamp, None, None).unwrap();

        assert_eq!(id, "lamp:0001");
        assert!(broker.registered("lamp"));
        assert!(broker.registered(&id));
        assert_eq!(broker.query("registry/lamp:0001/instance").unwrap(), json!(true));
        assert_eq!(broker.query("registry/lamp:0001/instance_of").unwrap(), json!("lamp"));
        assert!(broker.contains("registry/lamp:0001/actions/!toggle"));
        assert!(broker.contains("registry/lamp:0001/events/changed"));
        assert_eq!(*lamp.levels.borrow(), vec![json!(10)]);
        assert_eq!(broker.instance_of(&id).as_deref(), Some("lamp"));
        assert_eq!(broker.undo_len(), 0);
    }

    /// Settings and actions reach the bound methods.
    #[test]
    fn test_bound_handlers() {
        let broker = Broker::new();
        let lamp = Rc::new(Lamp::default());
        let id = broker.register(&lamp, Some("desk"), None).unwrap();

        broker.publish("registry/desk/settings/level", 42).unwrap();
        broker.publish("registry/desk/actions/!toggle", Value::Null).unwrap();

        assert_eq!(*lamp.levels.borrow(), vec![json!(10), json!(42)]);
        assert_eq!(lamp.toggles.get(), 1);
        assert_eq!(broker.setting(&id, "label").unwrap(), json!("lamp"));
        assert_eq!(
            broker.setting(&id, "missing").unwrap_err().status_code(),
            StatusCode::NotFound
        );
    }

    /// New instances start from the class value.
    #[test]
    fn test_class_value_inherited() {
        let broker = Broker::new();
        broker.register_class::<Lamp>().unwrap();
        broker.publish("registry/lamp/settings/level", 5).unwrap();

        let lamp = Rc::new(Lamp::default());
        broker.register(&lamp, Some("hall"), None).unwrap();
        assert_eq!(broker.query("registry/hall/settings/level").unwrap(), json!(5));
        assert_eq!(*lamp.levels.borrow(), vec![json!(5)]);
    }

    /// Unregistering keeps the topics unless asked to delete them.
    #[test]
    fn test_unregister() {
        let broker = Broker::new();
        let lamp = Rc::new(Lamp::default());
        broker.register(&lamp, Some("desk"), None).unwrap();
        broker.unregister("desk", false).unwrap();

        assert!(!broker.registered("desk"));
        assert_eq!(broker.query("registry/desk/instance").unwrap(), json!(false));
        broker.publish("registry/desk/settings/level", 7).unwrap();
        assert_eq!(lamp.levels.borrow().len(), 1);

        broker.register(&lamp, Some("desk"), None).unwrap();
        assert_eq!(*lamp.levels.borrow().last().unwrap(), json!(7));
        broker.unregister("desk", true).unwrap();
        assert!(!broker.contains("registry/desk"));

        let err = broker.unregister("desk", true).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NotRegistered);
    }

    /// A failing hook rolls the registration back.
    #[test]
    fn test_hook_failure_rolls_back() {
        let broker = Broker::new();
        let err = broker.register(&Rc::new(Faulty), Some("f"), None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::RegistrationFailed);
        assert!(!broker.registered("f"));
        assert!(!broker.contains("registry/f"));
    }

    /// A capability that cannot be created undoes an instance registration
    /// whose hook already ran.
    #[test]
    fn test_capability_failure_rolls_back_instance() {
        let broker = Broker::new();
        GAUGE_CAPABILITY.with(|c| *c.borrow_mut() = "gauge");
        broker.register_class::<Gauge>().unwrap();
        broker.register(&Rc::new(Gauge), Some("g0"), None).unwrap();
        assert_eq!(broker.capability_members("gauge"), vec!["gauge", "g0"]);

        GAUGE_CAPABILITY.with(|c| *c.borrow_mut() = "bad#gauge");
        GAUGE_RELEASED.with(|n| n.set(0));
        let gauge = Rc::new(Gauge);
        let err = broker.register(&gauge, Some("g1"), None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::RegistrationFailed);
        assert!(!broker.registered("g1"));
        assert!(!broker.contains("registry/g1"));
        assert_eq!(GAUGE_RELEASED.with(Cell::get), 1);

        assert!(broker.registered("gauge"));
        assert!(broker.registered("g0"));
        assert_eq!(broker.capability_members("gauge"), vec!["gauge", "g0"]);
        GAUGE_CAPABILITY.with(|c| *c.borrow_mut() = "gauge");
    }

    /// The same applies to class registration.
    #[test]
    fn test_capability_failure_rolls_back_class() {
        let broker = Broker::new();
        GAUGE_CAPABILITY.with(|c| *c.borrow_mut() = "bad~gauge");
        let err = broker.register_class::<Gauge>().unwrap_err();
        GAUGE_CAPABILITY.with(|c| *c.borrow_mut() = "gauge");
        assert_eq!(err.status_code(), StatusCode::RegistrationFailed);
        assert!(!broker.registered("gauge"));
        assert!(!broker.contains("registry/gauge"));
    }

    /// Children are listed on the parent and unregistered with it.
    #[test]
    fn test_parent_child() {
        let broker = Broker::new();
        let parent = Rc::new(Lamp::default());
        let child = Rc::new(Lamp::default());
        broker.register(&parent, Some("room"), None).unwrap();
        broker.register(&child, Some("bulb"), Some("room")).unwrap();

        assert_eq!(broker.query("registry/room/children").unwrap(), json!(["bulb"]));
        assert_eq!(broker.query("registry/bulb/parent").unwrap(), json!("room"));

        broker.unregister("room", false).unwrap();
        assert!(!broker.registered("bulb"));
    }

    /// Dropping the object retires its bound subscribers.
    #[test]
    fn test_dropped_instance() {
        let broker = Broker::new();
        let lamp = Rc::new(Lamp::default());
        broker.register(&lamp, Some("desk"), None).unwrap();
        drop(lamp);

        broker.publish("registry/desk/settings/level", 3).unwrap();
        let node_subs = broker
            .tree
            .borrow()
            .get("registry/desk/settings/level")
            .map(|n| n.subscribers(Flags::PUB).len());
        assert_eq!(node_subs, Some(0));
    }

    /// Ids with separators or suffix characters are rejected.
    #[test]
    fn test_invalid_id() {
        let broker = Broker::new();
        let lamp = Rc::new(Lamp::default());
        for id in ["", "a/b", "x$", "!act"] {
            let err = broker.register(&lamp, Some(id), None).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::InvalidKey, "{id}");
        }
    }
}
