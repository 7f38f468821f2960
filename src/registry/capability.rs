use serde_json::json;
use tracing::{debug, warn};
use treebus_error::{ensure, BusResult, RegistryError, ValidationError};

use super::{capability_list_topic, capability_topic};
use crate::{
    broker::Broker,
    callable::Callable,
    metadata::{DType, MetaFlags, Metadata},
    topic::Flags,
    value::{self, Value},
};

fn expect_str<'a>(
    value: &'a Value,
    what: &str,
) -> Result<&'a str, ValidationError> {
    value
        .as_str()
        .ok_or_else(|| ValidationError::new("str", value::preview(value), format!("expected {what}")))
}

impl Broker {
    pub(crate) fn on_capability_registry_action(
        &self,
        value: &Value,
        add: bool,
    ) -> BusResult<()> {
        let cap = expect_str(value, "a capability name")?;
        if add {
            self.register_capability(cap)
        } else {
            self.unregister_capability(cap)
        }
    }

    /// Creates the member list and the `!add`, `!remove` and `!delta`
    /// actions of `cap`. Idempotent.
    pub fn register_capability(
        &self,
        cap: &str,
    ) -> BusResult<()> {
        self.ensure_registry()?;
        let base = capability_topic(cap);
        let list = capability_list_topic(cap);
        if self.contains(&list) {
            return Ok(());
        }
        self.untracked(|| -> BusResult<()> {
            self.topic_add_with(&base, Metadata::node(cap), true)?;
            self.topic_add_with(
                &list,
                Metadata::new(DType::UniqueStrings, "Members")
                    .with_default(json!([]))
                    .with_flags(MetaFlags::TMP | MetaFlags::RO),
                true,
            )?;
            for (action, add) in [("!add", true), ("!remove", false)] {
                let topic = format!("{base}/{action}");
                self.topic_add_with(&topic, Metadata::new(DType::Str, "Member id"), true)?;
                let cap = cap.to_string();
                let handler = Callable::from_fn(move |b: &Broker, _: &str, v: &Value| {
                    b.on_member_action(&cap, v, add)
                });
                self.subscribe(&topic, handler, Flags::COMMAND)?;
            }
            self.topic_add_with(
                &format!("{base}/!delta"),
                Metadata::new(DType::Str, "Membership change, +id or -id"),
                true,
            )?;
            Ok(())
        })?;
        debug!(capability = cap, "capability registered");
        Ok(())
    }

    pub fn unregister_capability(
        &self,
        cap: &str,
    ) -> BusResult<()> {
        self.ensure_registry()?;
        self.untracked(|| self.topic_remove(&capability_topic(cap)))?;
        for record in self.registry.borrow_mut().records.values_mut() {
            record.capabilities.retain(|c| c != cap);
        }
        debug!(capability = cap, "capability unregistered");
        Ok(())
    }

    /// Current members of `cap`, in join order.
    pub fn capability_members(
        &self,
        cap: &str,
    ) -> Vec<String> {
        self.query_or(&capability_list_topic(cap), json!([]))
            .as_array()
            .map(|a| a.iter().filter_map(|m| m.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    fn on_member_action(
        &self,
        cap: &str,
        value: &Value,
        add: bool,
    ) -> BusResult<()> {
        let id = expect_str(value, "a registered id")?;
        let list = capability_list_topic(cap);
        let mut members = self.query(&list)?.as_array().cloned().unwrap_or_default();
        let present = members.iter().any(|m| m.as_str() == Some(id));
        if add == present {
            return Ok(());
        }
        if add {
            members.push(json!(id));
        } else {
            members.retain(|m| m.as_str() != Some(id));
        }
        self.publish(&list, Value::Array(members))?;
        let sign = if add { '+' } else { '-' };
        self.publish(&format!("{}/!delta", capability_topic(cap)), format!("{sign}{id}"))
    }

    /// Publishes to the capability's `!add` or `!remove` action.
    pub(crate) fn capability_member(
        &self,
        cap: &str,
        id: &str,
        add: bool,
    ) -> BusResult<()> {
        let action = if add { "!add" } else { "!remove" };
        self.untracked(|| self.publish(&format!("{}/{action}", capability_topic(cap)), id))
    }

    /// Adds a registered id to each capability, registering unknown ones.
    pub fn capabilities_append<S: AsRef<str>>(
        &self,
        id: &str,
        caps: &[S],
    ) -> BusResult<()> {
        self.ensure_registry()?;
        ensure!(
            self.registered(id),
            RegistryError::NotRegistered { id: id.to_string() }
        );
        for cap in caps {
            let cap = cap.as_ref();
            if !self.contains(&capability_list_topic(cap)) {
                warn!(capability = cap, "unknown capability, registering it");
                self.register_capability(cap)?;
            }
            self.capability_member(cap, id, true)?;
            if let Some(record) = self.registry.borrow_mut().records.get_mut(id) {
                if !record.capabilities.iter().any(|c| c == cap) {
                    record.capabilities.push(cap.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn capabilities_remove<S: AsRef<str>>(
        &self,
        id: &str,
        caps: &[S],
    ) -> BusResult<()> {
        self.ensure_registry()?;
        for cap in caps {
            let cap = cap.as_ref();
            if !self.contains(&capability_list_topic(cap)) {
                warn!(capability = cap, "unknown capability");
                continue;
            }
            self.capability_member(cap, id, false)?;
            if let Some(record) = self.registry.borrow_mut().records.get_mut(id) {
                record.capabilities.retain(|c| c != cap);
            }
        }
        Ok(())
    }
}
