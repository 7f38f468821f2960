//! Capability aggregation.
//!
//! An [`Aggregator`] follows the member list of one capability, watches the
//! same subtopic of every member and publishes a single reduced value, e.g.
//! "any device is streaming".

use std::{cell::RefCell, fmt, rc::Rc};

use tracing::{info, warn};
use treebus_error::BusResult;

use crate::{
    broker::Broker,
    callable::Callable,
    registry::{capability_list_topic, registry_topic, REGISTRY},
    topic::Flags,
    value::{self, Value},
};

pub type Reducer = Box<dyn Fn(&[Value]) -> Value>;

/// `true` when any member value is truthy.
pub fn any_true(values: &[Value]) -> Value {
    Value::Bool(values.iter().any(value::is_truthy))
}

/// `true` when every member value is truthy, `false` without members.
pub fn all_except_empty(values: &[Value]) -> Value {
    Value::Bool(!values.is_empty() && values.iter().all(value::is_truthy))
}

#[derive(Default)]
struct State {
    /// Member id and its last subtopic value, in join order.
    values: Vec<(String, Value)>,
    /// Last published reduction; `None` until the first publish.
    prev: Option<Value>,
}

struct Bindings {
    on_list: Callable,
    on_member: Callable,
}

pub struct Aggregator {
    capability: String,
    subtopic: String,
    aggregated_topic: String,
    reducer: Reducer,
    state: RefCell<State>,
    bindings: RefCell<Option<Bindings>>,
}

impl Aggregator {
    /// Starts aggregating `registry/<member>/<subtopic>` over the members of
    /// `capability` into `aggregated_topic`.
    ///
    /// The capability is registered if needed. The broker holds only weak
    /// references; dropping the returned `Rc` stops the aggregation.
    pub fn new<F>(
        broker: &Broker,
        capability: &str,
        subtopic: &str,
        reducer: F,
        aggregated_topic: &str,
    ) -> BusResult<Rc<Self>>
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        broker.registry_initialize()?;
        broker.register_capability(capability)?;

        let aggregator = Rc::new(Self {
            capability: capability.to_string(),
            subtopic: subtopic.trim_matches('/').to_string(),
            aggregated_topic: aggregated_topic.to_string(),
            reducer: Box::new(reducer),
            state: RefCell::new(State::default()),
            bindings: RefCell::new(None),
        });
        let on_list = Callable::bound(&aggregator, Self::on_list);
        let on_member = Callable::bound(&aggregator, Self::on_member);
        *aggregator.bindings.borrow_mut() = Some(Bindings {
            on_list: on_list.clone(),
            on_member,
        });

        let list = capability_list_topic(capability);
        broker.untracked(|| broker.subscribe(&list, on_list, Flags::PUB | Flags::RETAIN))?;
        Ok(aggregator)
    }

    pub fn aggregated_topic(&self) -> &str {
        &self.aggregated_topic
    }

    /// Member ids currently aggregated.
    pub fn members(&self) -> Vec<String> {
        self.state
            .borrow()
            .values
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Unsubscribes from the capability list and every member.
    pub fn close(
        &self,
        broker: &Broker,
    ) -> BusResult<()> {
        let Some(bindings) = self.bindings.borrow_mut().take() else {
            return Ok(());
        };
        let members = std::mem::take(&mut self.state.borrow_mut().values);
        broker.untracked(|| -> BusResult<()> {
            broker.unsubscribe(
                &capability_list_topic(&self.capability),
                &bindings.on_list,
                Flags::empty(),
            )?;
            for (id, _) in &members {
                broker.unsubscribe(&self.member_topic(id), &bindings.on_member, Flags::empty())?;
            }
            Ok(())
        })
    }

    fn member_topic(
        &self,
        id: &str,
    ) -> String {
        format!("{}/{}", registry_topic(id), self.subtopic)
    }

    /// Member id of an exact `registry/<id>/<subtopic>` topic.
    fn member_id<'a>(
        &self,
        topic: &'a str,
    ) -> Option<&'a str> {
        topic
            .strip_prefix(REGISTRY)?
            .strip_prefix('/')?
            .strip_suffix(self.subtopic.as_str())?
            .strip_suffix('/')
    }

    fn on_list(
        &self,
        broker: &Broker,
        _topic: &str,
        value: &Value,
    ) -> BusResult<()> {
        let Some(on_member) = self.bindings.borrow().as_ref().map(|b| b.on_member.clone()) else {
            return Ok(());
        };
        let members: Vec<&str> = value
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut joined = Vec::new();
        let mut departed = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            for id in &members {
                if state.values.iter().any(|(m, _)| m == id) {
                    continue;
                }
                let Ok(current) = broker.query(&self.member_topic(id)) else {
                    continue;
                };
                info!(member = %id, topic = %self.aggregated_topic, "aggregator member added");
                state.values.push((id.to_string(), current));
                joined.push(self.member_topic(id));
            }
            state.values.retain(|(id, _)| {
                let keep = members.contains(&id.as_str());
                if !keep {
                    info!(member = %id, topic = %self.aggregated_topic, "aggregator member removed");
                    departed.push(self.member_topic(id));
                }
                keep
            });
        }

        broker.untracked(|| -> BusResult<()> {
            for topic in &departed {
                broker.unsubscribe(topic, &on_member, Flags::empty())?;
            }
            for topic in &joined {
                broker.subscribe(topic, on_member.clone(), Flags::PUB | Flags::RETAIN)?;
            }
            Ok(())
        })?;
        self.publish(broker)
    }

    fn on_member(
        &self,
        broker: &Broker,
        topic: &str,
        value: &Value,
    ) -> BusResult<()> {
        let Some(id) = self.member_id(topic) else {
            return Ok(());
        };
        let known = {
            let mut state = self.state.borrow_mut();
            match state.values.iter_mut().find(|(m, _)| m == id) {
                Some(slot) => {
                    slot.1 = value.clone();
                    true
                }
                None => false,
            }
        };
        if !known {
            warn!(member = id, topic = %self.aggregated_topic, "unknown aggregator member");
            return Ok(());
        }
        self.publish(broker)
    }

    /// Publishes the reduction unless it equals the last one.
    fn publish(
        &self,
        broker: &Broker,
    ) -> BusResult<()> {
        let values: Vec<Value> = self
            .state
            .borrow()
            .values
            .iter()
            .map(|(_, v)| v.clone())
            .collect();
        let reduced = (self.reducer)(&values);
        {
            let mut state = self.state.borrow_mut();
            if state.prev.as_ref() == Some(&reduced) {
                return Ok(());
            }
            state.prev = Some(reduced.clone());
        }
        broker.publish(&self.aggregated_topic, reduced)
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("capability", &self.capability)
            .field("subtopic", &self.subtopic)
            .field("aggregated_topic", &self.aggregated_topic)
            .field("members", &self.members())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        metadata::{DType, MetaFlags, Metadata},
        registry::{ClassDescriptor, Registrable},
    };

    const RESULT: &str = "app/!result";

    struct Device;

    impl Registrable for Device {
        const NAME: &'static str = "device";

        fn descriptor() -> ClassDescriptor<Self> {
            ClassDescriptor::new("Device").capability("device@").setting(
                "state",
                Metadata::new(DType::Int, "State")
                    .with_default(0)
                    .with_flags(MetaFlags::RO | MetaFlags::SKIP_UNDO),
            )
        }
    }

    fn setup(
        reducer: fn(&[Value]) -> Value
    ) -> (Broker, Rc<Aggregator>, Rc<RefCell<Vec<Value>>>) {
        let broker = Broker::new();
        broker.registry_initialize().unwrap();
        broker
            .topic_add(RESULT, Metadata::new(DType::Bool, "Aggregated"))
            .unwrap();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        broker
            .subscribe(
                RESULT,
                Callable::from_fn(move |v: &Value| sink.borrow_mut().push(v.clone())),
                Flags::PUB,
            )
            .unwrap();
        let aggregator =
            Aggregator::new(&broker, "device.object", "settings/state", reducer, RESULT).unwrap();
        (broker, aggregator, calls)
    }

    /// Reducers over empty and mixed inputs.
    #[rstest]
    #[case(vec![], false, false)]
    #[case(vec![json!(0), json!(1)], true, false)]
    #[case(vec![json!(1), json!(2)], true, true)]
    #[case(vec![json!(0)], false, false)]
    fn test_reducers(
        #[case] values: Vec<Value>,
        #[case] any: bool,
        #[case] all: bool,
    ) {
        assert_eq!(any_true(&values), json!(any));
        assert_eq!(all_except_empty(&values), json!(all));
    }

    /// The first reduction is published even without members.
    #[test]
    fn test_initial_publish() {
        let (broker, aggregator, calls) = setup(any_true);
        assert_eq!(*calls.borrow(), vec![json!(false)]);

        let devices: Vec<_> = (0..2).map(|_| Rc::new(Device)).collect();
        for (i, d) in devices.iter().enumerate() {
            broker.register(d, Some(&format!("d{i}")), None).unwrap();
        }
        assert_eq!(*calls.borrow(), vec![json!(false)]);
        assert_eq!(aggregator.members(), vec!["d0".to_string(), "d1".to_string()]);
    }

    /// Any-true publishes once on the first true and once when the last
    /// true member clears.
    #[test]
    fn test_any_true() {
        let (broker, _aggregator, calls) = setup(any_true);
        let devices: Vec<_> = (0..5).map(|_| Rc::new(Device)).collect();
        for (i, d) in devices.iter().enumerate() {
            broker.register(d, Some(&format!("d{i}")), None).unwrap();
        }
        for i in 0..5 {
            calls.borrow_mut().clear();
            broker.publish(&format!("registry/d{i}/settings/state"), 1).unwrap();
            let expected = if i == 0 { vec![json!(true)] } else { vec![] };
            assert_eq!(*calls.borrow(), expected);
        }
        for i in 0..5 {
            calls.borrow_mut().clear();
            broker.publish(&format!("registry/d{i}/settings/state"), 0).unwrap();
            let expected = if i == 4 { vec![json!(false)] } else { vec![] };
            assert_eq!(*calls.borrow(), expected);
        }
    }

    /// All-except-empty flips only when every member agrees.
    #[test]
    fn test_all_except_empty() {
        let (broker, _aggregator, calls) = setup(all_except_empty);
        let devices: Vec<_> = (0..3).map(|_| Rc::new(Device)).collect();
        for (i, d) in devices.iter().enumerate() {
            broker.register(d, Some(&format!("d{i}")), None).unwrap();
        }
        for i in 0..3 {
            calls.borrow_mut().clear();
            broker.publish(&format!("registry/d{i}/settings/state"), 1).unwrap();
            let expected = if i == 2 { vec![json!(true)] } else { vec![] };
            assert_eq!(*calls.borrow(), expected);
        }
        calls.borrow_mut().clear();
        broker.publish("registry/d0/settings/state", 0).unwrap();
        assert_eq!(*calls.borrow(), vec![json!(false)]);
    }

    /// A departing member no longer contributes.
    #[test]
    fn test_member_departs() {
        let (broker, aggregator, calls) = setup(any_true);
        let device = Rc::new(Device);
        broker.register(&device, Some("d0"), None).unwrap();
        broker.publish("registry/d0/settings/state", 1).unwrap();
        assert_eq!(calls.borrow().last(), Some(&json!(true)));

        broker.unregister("d0", false).unwrap();
        assert!(aggregator.members().is_empty());
        assert_eq!(calls.borrow().last(), Some(&json!(false)));

        calls.borrow_mut().clear();
        broker.publish("registry/d0/settings/state", 0).unwrap();
        broker.publish("registry/d0/settings/state", 1).unwrap();
        assert!(calls.borrow().is_empty());
    }

    /// After `close` nothing is published.
    #[test]
    fn test_close() {
        let (broker, aggregator, calls) = setup(any_true);
        let device = Rc::new(Device);
        broker.register(&device, Some("d0"), None).unwrap();
        aggregator.close(&broker).unwrap();
        calls.borrow_mut().clear();

        broker.publish("registry/d0/settings/state", 1).unwrap();
        assert!(calls.borrow().is_empty());
        assert!(aggregator.members().is_empty());
    }

    /// Only the exact member subtopic is accepted.
    #[test]
    fn test_member_id() {
        let (_broker, aggregator, _calls) = setup(any_true);
        assert_eq!(aggregator.member_id("registry/d0/settings/state"), Some("d0"));
        assert_eq!(aggregator.member_id("registry/d0/settings/state/x"), None);
        assert_eq!(aggregator.member_id("other/d0/settings/state"), None);
    }
}
