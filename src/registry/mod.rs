//! Object registry and capability index.
//!
//! Registered classes and instances live under `registry/<id>`:
//!
//! ```text
//! registry/<id>/actions/!<name>     command handlers
//! registry/<id>/callbacks/!<name>   command handlers
//! registry/<id>/events/<name>
//! registry/<id>/settings/<name>     persisted settings
//! registry/<id>/instance            true while an object is bound
//! registry/<id>/instance_of         class id (instances only)
//! registry/<id>/parent
//! registry/<id>/children
//! ```
//!
//! Capabilities are member lists under
//! `registry_manager/capabilities/<cap>/list`, maintained through the
//! `!add` / `!remove` actions next to them.
//!
//! - `descriptor`: the [`Registrable`] trait and [`ClassDescriptor`] builder.
//! - `register`: registration and unregistration.
//! - `capability`: capability lists.

mod capability;
mod descriptor;
mod register;

use rustc_hash::FxHashMap;

pub use descriptor::{ClassDescriptor, Registrable};

use crate::{broker::Broker, callable::Callable, metadata::Metadata, topic::Flags};

pub const REGISTRY: &str = "registry";
pub const REGISTRY_MANAGER: &str = "registry_manager";
pub const NEXT_UNIQUE_ID: &str = "registry_manager/next_unique_id";
pub const CAPABILITIES: &str = "registry_manager/capabilities";
pub const CAPABILITY_ADD: &str = "registry_manager/actions/capability/!add";
pub const CAPABILITY_REMOVE: &str = "registry_manager/actions/capability/!remove";
/// Application-wide settings; persisted together with `registry`.
pub const COMMON_SETTINGS: &str = "common/settings";

/// `registry/<id>`.
pub fn registry_topic(id: &str) -> String {
    format!("{REGISTRY}/{id}")
}

/// `registry_manager/capabilities/<cap>`.
pub fn capability_topic(cap: &str) -> String {
    format!("{CAPABILITIES}/{cap}")
}

/// `registry_manager/capabilities/<cap>/list`.
pub fn capability_list_topic(cap: &str) -> String {
    format!("{CAPABILITIES}/{cap}/list")
}

/// Expands a `name@` capability into `name.class` or `name.object`.
pub fn resolve_capability(
    cap: &str,
    instance: bool,
) -> String {
    match cap.strip_suffix('@') {
        Some(base) if instance => format!("{base}.object"),
        Some(base) => format!("{base}.class"),
        None => cap.to_string(),
    }
}

pub(crate) type UnregisterHook = Box<dyn Fn(&Broker, &str)>;

/// Bookkeeping for one registered class or instance.
pub(crate) struct Record {
    pub class_id: Option<String>,
    /// Subscriptions made on behalf of the object.
    pub bindings: Vec<(String, Callable, Flags)>,
    pub capabilities: Vec<String>,
    pub settings: Vec<(String, Metadata)>,
    pub on_unregister: Option<UnregisterHook>,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    pub initialized: bool,
    pub records: FxHashMap<String, Record>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `@` capabilities pick the class or object form.
    #[test]
    fn test_resolve_capability() {
        assert_eq!(resolve_capability("widget@", false), "widget.class");
        assert_eq!(resolve_capability("widget@", true), "widget.object");
        assert_eq!(resolve_capability("device", true), "device");
    }

    /// Topic helpers.
    #[test]
    fn test_topics() {
        assert_eq!(registry_topic("dev:0001"), "registry/dev:0001");
        assert_eq!(
            capability_list_topic("device.object"),
            "registry_manager/capabilities/device.object/list"
        );
    }
}
