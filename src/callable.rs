//! Callable adapter.
//!
//! Subscribers take zero to three positional arguments:
//!
//! | Form                                | Marker       |
//! |-------------------------------------|--------------|
//! | `fn()`                              | [`NoArgs`]   |
//! | `fn(&Value)`                        | [`ValueArg`] |
//! | `fn(&str, &Value)`                  | [`TopicValue`] |
//! | `fn(&Broker, &str, &Value)`         | [`Full`]     |
//!
//! The arity is picked at compile time by the [`Handler`] and
//! [`MethodHandler`] traits and normalized into a single three-argument call.
//! Methods bound to an `Rc<T>` hold only a `Weak<T>`; once the instance is
//! gone the callable reports [`Invocation::Dead`] and the broker purges it.

use std::{
    any::{type_name, Any, TypeId},
    fmt,
    rc::{Rc, Weak},
};

use treebus_error::StackError;

use crate::{broker::Broker, value::Value};

/// Outcome of a command handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Reply {
    /// Nothing to record in the undo history.
    #[default]
    None,
    /// Publishes that revert and re-apply the command.
    ///
    /// An empty `redo` list replays the original publish.
    Revert {
        undo: Vec<(String, Value)>,
        redo: Vec<(String, Value)>,
    },
}

impl Reply {
    pub fn revert(undo: Vec<(String, Value)>) -> Self {
        Reply::Revert {
            undo,
            redo: Vec::new(),
        }
    }
}

pub type HandlerResult = Result<Reply, StackError>;

/// Return types a handler may produce.
pub trait IntoReply {
    fn into_reply(self) -> HandlerResult;
}

impl IntoReply for () {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::None)
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> HandlerResult {
        Ok(self)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<StackError>,
{
    fn into_reply(self) -> HandlerResult {
        match self {
            Ok(reply) => reply.into_reply(),
            Err(e) => Err(e.into()),
        }
    }
}

/// Marker: the handler takes no arguments.
pub struct NoArgs;
/// Marker: the handler takes the value.
pub struct ValueArg;
/// Marker: the handler takes the topic and the value.
pub struct TopicValue;
/// Marker: the handler takes the broker, the topic and the value.
pub struct Full;

/// Free functions and closures usable as subscribers.
pub trait Handler<Args>: 'static {
    fn call(
        &self,
        broker: &Broker,
        topic: &str,
        value: &Value,
    ) -> HandlerResult;
}

impl<F, R> Handler<NoArgs> for F
where
    F: Fn() -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        _: &Broker,
        _: &str,
        _: &Value,
    ) -> HandlerResult {
        self().into_reply()
    }
}

impl<F, R> Handler<ValueArg> for F
where
    F: Fn(&Value) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        _: &Broker,
        _: &str,
        value: &Value,
    ) -> HandlerResult {
        self(value).into_reply()
    }
}

impl<F, R> Handler<TopicValue> for F
where
    F: Fn(&str, &Value) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        _: &Broker,
        topic: &str,
        value: &Value,
    ) -> HandlerResult {
        self(topic, value).into_reply()
    }
}

impl<F, R> Handler<Full> for F
where
    F: Fn(&Broker, &str, &Value) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        broker: &Broker,
        topic: &str,
        value: &Value,
    ) -> HandlerResult {
        self(broker, topic, value).into_reply()
    }
}

/// Methods of `T` usable as subscribers; the receiver comes first.
pub trait MethodHandler<T, Args>: 'static {
    fn call(
        &self,
        this: &T,
        broker: &Broker,
        topic: &str,
        value: &Value,
    ) -> HandlerResult;
}

impl<T, F, R> MethodHandler<T, NoArgs> for F
where
    F: Fn(&T) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        this: &T,
        _: &Broker,
        _: &str,
        _: &Value,
    ) -> HandlerResult {
        self(this).into_reply()
    }
}

impl<T, F, R> MethodHandler<T, ValueArg> for F
where
    F: Fn(&T, &Value) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        this: &T,
        _: &Broker,
        _: &str,
        value: &Value,
    ) -> HandlerResult {
        self(this, value).into_reply()
    }
}

impl<T, F, R> MethodHandler<T, TopicValue> for F
where
    F: Fn(&T, &str, &Value) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        this: &T,
        _: &Broker,
        topic: &str,
        value: &Value,
    ) -> HandlerResult {
        self(this, topic, value).into_reply()
    }
}

impl<T, F, R> MethodHandler<T, Full> for F
where
    F: Fn(&T, &Broker, &str, &Value) -> R + 'static,
    R: IntoReply,
{
    fn call(
        &self,
        this: &T,
        broker: &Broker,
        topic: &str,
        value: &Value,
    ) -> HandlerResult {
        self(this, broker, topic, value).into_reply()
    }
}

/// Result of invoking a [`Callable`].
#[derive(Debug)]
pub enum Invocation {
    Done(HandlerResult),
    /// The bound instance was dropped; nothing was called.
    Dead,
}

type InvokeFn = dyn Fn(&Broker, &str, &Value) -> Invocation;

struct Inner {
    func: TypeId,
    name: &'static str,
    /// Zero-sized functions compare by type; everything else by pointer.
    stateless: bool,
    instance: Option<Weak<dyn Any>>,
    invoke: Box<InvokeFn>,
}

/// A subscriber stored in a topic's flag lists.
///
/// Cloning is cheap and clones compare equal.
#[derive(Clone)]
pub struct Callable(Rc<Inner>);

impl Callable {
    /// Wraps a free function or closure.
    pub fn from_fn<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        Callable(Rc::new(Inner {
            func: TypeId::of::<H>(),
            name: type_name::<H>(),
            stateless: std::mem::size_of::<H>() == 0,
            instance: None,
            invoke: Box::new(move |broker, topic, value| {
                Invocation::Done(handler.call(broker, topic, value))
            }),
        }))
    }

    /// Binds `method` to `instance` without keeping the instance alive.
    pub fn bound<T, M, Args>(
        instance: &Rc<T>,
        method: M,
    ) -> Self
    where
        T: 'static,
        M: MethodHandler<T, Args>,
        Args: 'static,
    {
        let weak = Rc::downgrade(instance);
        let erased: Weak<dyn Any> = weak.clone();
        Callable(Rc::new(Inner {
            func: TypeId::of::<M>(),
            name: type_name::<M>(),
            stateless: std::mem::size_of::<M>() == 0,
            instance: Some(erased),
            invoke: Box::new(move |broker, topic, value| match weak.upgrade() {
                Some(this) => Invocation::Done(method.call(&this, broker, topic, value)),
                None => Invocation::Dead,
            }),
        }))
    }

    pub fn invoke(
        &self,
        broker: &Broker,
        topic: &str,
        value: &Value,
    ) -> Invocation {
        (self.0.invoke)(broker, topic, value)
    }

    /// `false` once a bound instance has been dropped.
    pub fn is_alive(&self) -> bool {
        self.0
            .instance
            .as_ref()
            .map_or(true, |w| w.strong_count() > 0)
    }

    pub fn is_bound(&self) -> bool {
        self.0.instance.is_some()
    }

    /// Type name of the wrapped function, for log records.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    fn instance_addr(&self) -> Option<*const ()> {
        self.0
            .instance
            .as_ref()
            .map(|w| Weak::as_ptr(w) as *const ())
    }
}

impl PartialEq for Callable {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.stateless
            && other.0.stateless
            && self.0.func == other.0.func
            && self.instance_addr() == other.instance_addr()
    }
}

impl Eq for Callable {}

impl fmt::Debug for Callable {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.0.name)
            .field("bound", &self.is_bound())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;
    use treebus_error::{GenericError, StatusCode};

    use super::*;

    struct Counter {
        hits: Cell<u32>,
    }

    impl Counter {
        fn bump(&self) {
            self.hits.set(self.hits.get() + 1);
        }

        fn add(
            &self,
            value: &Value,
        ) {
            let n = value.as_u64().unwrap_or(0) as u32;
            self.hits.set(self.hits.get() + n);
        }
    }

    fn on_value(_: &Value) {}

    /// Every arity is normalized into the same call.
    #[test]
    fn test_arities() {
        let broker = Broker::new();
        let v = json!(1);
        let forms = [
            Callable::from_fn(|| ()),
            Callable::from_fn(|_: &Value| ()),
            Callable::from_fn(|_: &str, _: &Value| ()),
            Callable::from_fn(|_: &Broker, _: &str, _: &Value| Reply::None),
        ];
        for c in forms {
            assert!(matches!(c.invoke(&broker, "a", &v), Invocation::Done(Ok(Reply::None))));
        }
    }

    /// Handler errors come back through the invocation.
    #[test]
    fn test_error_result() {
        let broker = Broker::new();
        let c = Callable::from_fn(|_: &Value| -> Result<(), GenericError> {
            Err(GenericError::new(StatusCode::InvalidArgs, "nope"))
        });
        match c.invoke(&broker, "a", &Value::Null) {
            Invocation::Done(Err(e)) => assert_eq!(e.status_code(), StatusCode::InvalidArgs),
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Bound methods see the live instance and go dead with it.
    #[test]
    fn test_bound_weak() {
        let broker = Broker::new();
        let obj = Rc::new(Counter { hits: Cell::new(0) });
        let c = Callable::bound(&obj, Counter::add);
        assert!(matches!(c.invoke(&broker, "a", &json!(3)), Invocation::Done(Ok(_))));
        assert_eq!(obj.hits.get(), 3);
        assert!(c.is_alive());

        drop(obj);
        assert!(!c.is_alive());
        assert!(matches!(c.invoke(&broker, "a", &json!(3)), Invocation::Dead));
    }

    /// Equality: same function and same instance.
    #[test]
    fn test_equality() {
        let a = Rc::new(Counter { hits: Cell::new(0) });
        let b = Rc::new(Counter { hits: Cell::new(0) });

        assert_eq!(Callable::bound(&a, Counter::bump), Callable::bound(&a, Counter::bump));
        assert_ne!(Callable::bound(&a, Counter::bump), Callable::bound(&b, Counter::bump));
        assert_ne!(Callable::bound(&a, Counter::bump), Callable::bound(&a, Counter::add));
        assert_eq!(Callable::from_fn(on_value), Callable::from_fn(on_value));

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let closure = Callable::from_fn(move || h.set(h.get() + 1));
        assert_eq!(closure, closure.clone());
        let h = hits.clone();
        assert_ne!(closure, Callable::from_fn(move || h.set(h.get() + 1)));
    }
}
