//! Attribute registry: named groups of named read/write text attributes.
//!
//! Governors publish their tunables here while started. The IPC server and
//! the daemon configuration both go through this surface, so every write
//! follows the same parsing and clamping rules.

use crate::error::GovernorError;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A group of text attributes owned by one component.
pub trait AttributeGroup: Send + Sync {
    /// Group name, unique within a registry.
    fn name(&self) -> &str;

    /// Attribute names in listing order.
    fn attributes(&self) -> Vec<&'static str>;

    /// Current value of an attribute, newline terminated.
    fn show(&self, attribute: &str) -> Result<String, GovernorError>;

    /// Parse and store a new value.
    fn store(&self, attribute: &str, value: &str) -> Result<(), GovernorError>;
}

/// Registry of attribute groups.
#[derive(Default)]
pub struct AttributeRegistry {
    groups: RwLock<BTreeMap<String, Arc<dyn AttributeGroup>>>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a group. Fails if a group with the same name exists.
    pub fn create_group(&self, group: Arc<dyn AttributeGroup>) -> Result<(), GovernorError> {
        let name = group.name().to_string();
        let mut groups = self.groups.write().map_err(|_| {
            GovernorError::registration(&name, "attribute registry lock poisoned")
        })?;

        if groups.contains_key(&name) {
            return Err(GovernorError::registration(
                &name,
                "attribute group already exists",
            ));
        }

        groups.insert(name, group);
        Ok(())
    }

    /// Withdraw a group. Removing an absent group is a no-op.
    pub fn remove_group(&self, name: &str) {
        if let Ok(mut groups) = self.groups.write() {
            groups.remove(name);
        }
    }

    /// Whether a group is currently published.
    pub fn contains(&self, name: &str) -> bool {
        self.groups
            .read()
            .map(|groups| groups.contains_key(name))
            .unwrap_or(false)
    }

    /// All published attributes as `(group, attribute)` pairs.
    pub fn list(&self) -> Vec<(String, &'static str)> {
        self.groups
            .read()
            .map(|groups| {
                groups
                    .iter()
                    .flat_map(|(name, group)| {
                        group
                            .attributes()
                            .into_iter()
                            .map(move |attribute| (name.clone(), attribute))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn show(&self, group: &str, attribute: &str) -> Result<String, GovernorError> {
        self.group(group, attribute)?.show(attribute)
    }

    pub fn store(&self, group: &str, attribute: &str, value: &str) -> Result<(), GovernorError> {
        self.group(group, attribute)?.store(attribute, value)
    }

    // The group Arc is cloned out so the registry lock is not held while the
    // group takes its own lock.
    fn group(&self, group: &str, attribute: &str) -> Result<Arc<dyn AttributeGroup>, GovernorError> {
        self.groups
            .read()
            .ok()
            .and_then(|groups| groups.get(group).cloned())
            .ok_or_else(|| GovernorError::unknown_attribute(group, attribute))
    }
}
