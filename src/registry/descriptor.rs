use std::rc::Rc;

use treebus_error::BusResult;

use crate::{
    broker::Broker,
    callable::{Callable, Handler, MethodHandler},
    metadata::Metadata,
};

/// Produces the callable for one instance.
pub(crate) type Binder<T> = Rc<dyn Fn(&Rc<T>) -> Callable>;

/// A type that can be registered with the broker.
///
/// ```ignore
/// struct Meter { /* ... */ }
///
/// impl Registrable for Meter {
///     const NAME: &'static str = "meter";
///
///     fn descriptor() -> ClassDescriptor<Self> {
///         ClassDescriptor::new("Multimeter")
///             .capability("widget@")
///             .setting_with("units", Metadata::new(DType::Str, "Units"), Meter::on_units)
///             .action("clear", Meter::clear)
///     }
/// }
/// ```
pub trait Registrable: Sized + 'static {
    /// Class id, also the prefix of generated instance ids.
    const NAME: &'static str;

    fn descriptor() -> ClassDescriptor<Self>;

    /// Runs after the instance's topics exist. An error rolls the
    /// registration back.
    fn on_register(
        &self,
        _broker: &Broker,
        _id: &str,
    ) -> BusResult<()> {
        Ok(())
    }

    fn on_unregister(
        &self,
        _broker: &Broker,
        _id: &str,
    ) {
    }
}

pub(crate) struct SettingDecl<T> {
    pub name: String,
    pub meta: Metadata,
    pub handler: Option<Binder<T>>,
}

/// Declarative table of a class's topics and handlers.
pub struct ClassDescriptor<T> {
    pub(crate) brief: String,
    pub(crate) capabilities: Vec<String>,
    pub(crate) settings: Vec<SettingDecl<T>>,
    pub(crate) actions: Vec<(String, Binder<T>)>,
    pub(crate) callbacks: Vec<(String, Binder<T>)>,
    pub(crate) class_actions: Vec<(String, Callable)>,
    pub(crate) class_callbacks: Vec<(String, Callable)>,
    pub(crate) events: Vec<(String, Metadata)>,
}

fn binder<T, M, Args>(method: M) -> Binder<T>
where
    T: 'static,
    M: MethodHandler<T, Args> + Clone,
    Args: 'static,
{
    Rc::new(move |obj: &Rc<T>| Callable::bound(obj, method.clone()))
}

impl<T: 'static> ClassDescriptor<T> {
    pub fn new(brief: impl Into<String>) -> Self {
        Self {
            brief: brief.into(),
            capabilities: Vec::new(),
            settings: Vec::new(),
            actions: Vec::new(),
            callbacks: Vec::new(),
            class_actions: Vec::new(),
            class_callbacks: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Capability joined on registration; `name@` expands per class/object.
    pub fn capability(
        mut self,
        cap: impl Into<String>,
    ) -> Self {
        self.capabilities.push(cap.into());
        self
    }

    /// A setting without a handler; read it with
    /// [`Broker::setting`](crate::Broker::setting).
    pub fn setting(
        mut self,
        name: impl Into<String>,
        meta: Metadata,
    ) -> Self {
        self.settings.push(SettingDecl {
            name: name.into(),
            meta,
            handler: None,
        });
        self
    }

    /// A setting whose changes, including the initial value, go to `method`.
    pub fn setting_with<M, Args>(
        mut self,
        name: impl Into<String>,
        meta: Metadata,
        method: M,
    ) -> Self
    where
        M: MethodHandler<T, Args> + Clone,
        Args: 'static,
    {
        self.settings.push(SettingDecl {
            name: name.into(),
            meta,
            handler: Some(binder(method)),
        });
        self
    }

    /// Instance action at `actions/!<name>`.
    pub fn action<M, Args>(
        mut self,
        name: impl Into<String>,
        method: M,
    ) -> Self
    where
        M: MethodHandler<T, Args> + Clone,
        Args: 'static,
    {
        self.actions.push((name.into(), binder(method)));
        self
    }

    /// Instance callback at `callbacks/!<name>`.
    pub fn callback<M, Args>(
        mut self,
        name: impl Into<String>,
        method: M,
    ) -> Self
    where
        M: MethodHandler<T, Args> + Clone,
        Args: 'static,
    {
        self.callbacks.push((name.into(), binder(method)));
        self
    }

    /// Class-level action, e.g. a factory `!create`.
    pub fn class_action<H, Args>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.class_actions
            .push((name.into(), Callable::from_fn(handler)));
        self
    }

    pub fn class_callback<H, Args>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.class_callbacks
            .push((name.into(), Callable::from_fn(handler)));
        self
    }

    /// Event topic at `events/<name>`.
    pub fn event(
        mut self,
        name: impl Into<String>,
        meta: Metadata,
    ) -> Self {
        self.events.push((name.into(), meta));
        self
    }
}
