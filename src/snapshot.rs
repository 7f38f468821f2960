//! Whole-tree persistence.
//!
//! A snapshot stores the `common/settings` and `registry` subtrees as nested
//! nodes:
//!
//! ```json
//! {
//!   "type": "treebus_snapshot",
//!   "version": 1,
//!   "settings": {"topic": "common/settings", "value": null, "meta": {...}, "children": [...]},
//!   "registry": {"topic": "registry", "value": null, "meta": {...}, "children": [...]},
//!   "next_unique_id": 7
//! }
//! ```
//!
//! Actions and `hide` subtrees are not written. `tmp` values are written as
//! null and never restored. Files go through [`VersionedFile`] so earlier
//! snapshots stay available as numbered backups.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use treebus_error::{BusResult, GenericError, ResultExt, SnapshotError, StatusCode};

use crate::{
    broker::Broker,
    metadata::{MetaFlags, Metadata},
    registry::{COMMON_SETTINGS, NEXT_UNIQUE_ID, REGISTRY},
    topic::{name, TopicTree},
    value::Value,
    versioned_file::{self, VersionedFile},
};

pub const SNAPSHOT_TYPE: &str = "treebus_snapshot";
pub const SNAPSHOT_VERSION: u64 = 1;

/// One persisted topic and its persisted descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub topic: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Metadata>,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    fn is_tmp(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(|m| m.has_flag(MetaFlags::TMP))
    }

    fn child(
        &self,
        subtopic: &str,
    ) -> Option<&SnapshotNode> {
        self.children
            .iter()
            .find(|c| name::subtopic(&c.topic) == subtopic)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(rename = "type")]
    kind: String,
    version: u64,
    #[serde(default)]
    settings: Option<SnapshotNode>,
    #[serde(default)]
    registry: Option<SnapshotNode>,
    #[serde(default)]
    next_unique_id: Option<u64>,
}

fn collect(
    tree: &TopicTree,
    topic: &str,
) -> Option<SnapshotNode> {
    let node = tree.get(topic)?;
    if node.is_action() || node.has_flag(MetaFlags::HIDE) {
        return None;
    }
    let value = if node.has_flag(MetaFlags::TMP) {
        Value::Null
    } else {
        node.value.clone()
    };
    let children = node
        .children()
        .iter()
        .filter_map(|child| collect(tree, &name::join(topic, child)))
        .collect();
    Some(SnapshotNode {
        topic: topic.to_string(),
        value,
        meta: node.meta.clone(),
        children,
    })
}

impl Broker {
    /// The persistable state as a JSON document.
    pub fn snapshot(&self) -> BusResult<Value> {
        let document = {
            let tree = self.tree.borrow();
            Snapshot {
                kind: SNAPSHOT_TYPE.to_string(),
                version: SNAPSHOT_VERSION,
                settings: collect(&tree, COMMON_SETTINGS),
                registry: collect(&tree, REGISTRY),
                next_unique_id: tree.get(NEXT_UNIQUE_ID).and_then(|n| n.value.as_u64()),
            }
        };
        Ok(serde_json::to_value(document)?)
    }

    /// Writes a snapshot to `path`, rotating earlier versions.
    pub fn save<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> BusResult<()> {
        let path = path.as_ref();
        let document = self.snapshot()?;
        let mut file = VersionedFile::create(path, self.config().version_count)
            .with_context(|| format!("creating snapshot {}", path.display()))?;
        serde_json::to_writer_pretty(&mut file, &document)?;
        file.commit()
            .with_context(|| format!("committing snapshot {}", path.display()))?;
        info!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// Saves to the configured `snapshot_path`.
    pub fn save_default(&self) -> BusResult<PathBuf> {
        let path = self.snapshot_path()?;
        self.save(&path)?;
        Ok(path)
    }

    /// Loads a snapshot file. See [`restore`](Self::restore).
    pub fn load<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> BusResult<bool> {
        let path = path.as_ref();
        let bytes = versioned_file::read(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let document: Value = serde_json::from_slice(&bytes).context("parsing snapshot")?;
        let loaded = self.restore(document)?;
        if loaded {
            info!(path = %path.display(), "snapshot loaded");
        }
        Ok(loaded)
    }

    /// Loads from the configured `snapshot_path`; `Ok(false)` when no file
    /// exists yet.
    pub fn load_default(&self) -> BusResult<bool> {
        let path = self.snapshot_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot yet");
            return Ok(false);
        }
        self.load(&path)
    }

    fn snapshot_path(&self) -> BusResult<PathBuf> {
        self.config().snapshot_path.clone().ok_or_else(|| {
            GenericError::new(StatusCode::InvalidArgs, "no snapshot path configured").into()
        })
    }

    /// Applies a snapshot document.
    ///
    /// Returns `Ok(false)` when the document has another type or version.
    /// Existing topics receive their values through normal dispatch, missing
    /// ones are created without notification. Instances of classes that are
    /// not registered are dropped. The undo and redo history is cleared.
    pub fn restore(
        &self,
        document: Value,
    ) -> BusResult<bool> {
        let kind = document.get("type").and_then(Value::as_str);
        let version = document.get("version").and_then(Value::as_u64);
        if kind != Some(SNAPSHOT_TYPE) || version != Some(SNAPSHOT_VERSION) {
            warn!(?kind, ?version, "snapshot type or version mismatch, ignored");
            return Ok(false);
        }
        let snapshot: Snapshot = serde_json::from_value(document)?;
        if snapshot.registry.as_ref().is_some_and(|r| r.topic != REGISTRY)
            || snapshot
                .settings
                .as_ref()
                .is_some_and(|s| s.topic != COMMON_SETTINGS)
        {
            return Err(SnapshotError::Structure {
                reason: "unexpected root topic".to_string(),
            }
            .into());
        }
        self.registry_initialize()?;

        self.untracked(|| -> BusResult<()> {
            if let Some(mut registry) = snapshot.registry {
                self.prune_unregistered(&mut registry);
                self.restore_node(&registry)?;
            }
            if let Some(settings) = snapshot.settings {
                self.restore_node(&settings)?;
            }
            if let Some(next) = snapshot.next_unique_id {
                let current = self.query(NEXT_UNIQUE_ID)?.as_u64().unwrap_or(1);
                self.publish(NEXT_UNIQUE_ID, next.max(current))?;
            }
            Ok(())
        })?;

        let mut history = self.history.borrow_mut();
        history.clear_undo();
        history.clear_redo();
        Ok(true)
    }

    fn prune_unregistered(
        &self,
        registry: &mut SnapshotNode,
    ) {
        registry.children.retain(|entry| {
            let class = entry
                .child("instance_of")
                .and_then(|n| n.value.as_str())
                .filter(|c| !c.is_empty());
            match class {
                Some(class) if !self.registered(class) => {
                    warn!(topic = %entry.topic, class, "class not registered, instance dropped");
                    false
                }
                _ => true,
            }
        });
    }

    fn restore_node(
        &self,
        node: &SnapshotNode,
    ) -> BusResult<()> {
        if self.contains(&node.topic) {
            if !node.is_tmp() {
                if let Err(e) = self.publish(&node.topic, node.value.clone()) {
                    warn!(topic = %node.topic, error = %e, "snapshot value rejected");
                }
            }
        } else if let Some(meta) = &node.meta {
            let value = if node.is_tmp() {
                meta.initial_value()
            } else {
                meta.validate(&node.value).unwrap_or_else(|e| {
                    warn!(topic = %node.topic, error = %e, "snapshot value rejected, using default");
                    meta.initial_value()
                })
            };
            let mut tree = self.tree.borrow_mut();
            tree.insert(&node.topic, meta.clone())?;
            if let Some(n) = tree.get_mut(&node.topic) {
                n.value = value;
            }
        }
        for child in &node.children {
            self.restore_node(child)?;
        }
        Ok(())
    }
}
