//! Governor framework: registration, selection and event dispatch.
//!
//! Exactly one governor is active at a time. Selecting a governor stops the
//! previous one (waiting for its pending work to be cancelled) before the new
//! one is started. Events arriving while no governor is active are dropped.

use crate::attributes::AttributeRegistry;
use crate::error::GovernorError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Hardware context handed to a governor when it starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwContext {
    /// Whether the GPU was busy at the moment the governor was selected.
    pub active: bool,
}

/// Lifecycle and event hooks a governor implements.
#[async_trait]
pub trait Governor: Send + Sync {
    /// Name used for registration and selection.
    fn name(&self) -> &'static str;

    /// Initialize state and publish attributes.
    async fn start(&self, ctx: &HwContext) -> Result<(), GovernorError>;

    /// Cancel pending work and withdraw attributes. No governor callback
    /// runs after this returns.
    async fn stop(&self);

    /// The GPU went from idle to busy.
    fn on_active(&self);

    /// A unit of rendering work completed.
    fn on_frame_done(&self);
}

/// Registry of governors with a single active selection.
pub struct FreqFramework {
    attributes: Arc<AttributeRegistry>,
    governors: RwLock<BTreeMap<&'static str, Arc<dyn Governor>>>,
    active: RwLock<Option<Arc<dyn Governor>>>,
    /// Serializes select/stop so two transitions never interleave.
    transition: Mutex<()>,
}

impl FreqFramework {
    pub fn new(attributes: Arc<AttributeRegistry>) -> Self {
        Self {
            attributes,
            governors: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            transition: Mutex::new(()),
        }
    }

    /// Attribute registry shared with the governors.
    pub fn attributes(&self) -> &Arc<AttributeRegistry> {
        &self.attributes
    }

    /// Make a governor available for selection.
    pub fn register_governor(&self, governor: Arc<dyn Governor>) -> Result<(), GovernorError> {
        let name = governor.name();
        let mut governors = self
            .governors
            .write()
            .map_err(|_| GovernorError::registration(name, "governor registry lock poisoned"))?;

        if governors.contains_key(name) {
            return Err(GovernorError::registration(name, "governor already registered"));
        }

        governors.insert(name, governor);
        info!("Registered governor '{}'", name);
        Ok(())
    }

    /// Names of all registered governors.
    pub fn governor_names(&self) -> Vec<&'static str> {
        self.governors
            .read()
            .map(|governors| governors.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Name of the active governor, if any.
    pub fn active_name(&self) -> Option<&'static str> {
        self.current().map(|governor| governor.name())
    }

    /// Stop the active governor and start `name`.
    ///
    /// Selecting the already active governor restarts it. If the new
    /// governor fails to start, no governor is active afterwards.
    pub async fn select(&self, name: &str, ctx: &HwContext) -> Result<(), GovernorError> {
        let _transition = self.transition.lock().await;

        let next = self
            .governors
            .read()
            .ok()
            .and_then(|governors| governors.get(name).cloned())
            .ok_or_else(|| GovernorError::UnknownGovernor(name.to_string()))?;

        if let Some(previous) = self.take_active() {
            previous.stop().await;
            info!("Governor '{}' stopped", previous.name());
        }

        next.start(ctx).await?;
        if let Ok(mut active) = self.active.write() {
            *active = Some(next);
        }
        info!("Governor '{}' selected", name);
        Ok(())
    }

    /// Stop the active governor, if any.
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;

        if let Some(previous) = self.take_active() {
            previous.stop().await;
            info!("Governor '{}' stopped", previous.name());
        }
    }

    /// Forward an idle->busy transition to the active governor.
    pub fn on_active(&self) {
        match self.current() {
            Some(governor) => governor.on_active(),
            None => debug!("Active event dropped, no governor selected"),
        }
    }

    /// Forward a frame completion to the active governor.
    pub fn on_frame_done(&self) {
        match self.current() {
            Some(governor) => governor.on_frame_done(),
            None => debug!("Frame-done event dropped, no governor selected"),
        }
    }

    fn current(&self) -> Option<Arc<dyn Governor>> {
        self.active.read().ok().and_then(|active| active.clone())
    }

    fn take_active(&self) -> Option<Arc<dyn Governor>> {
        self.active.write().ok().and_then(|mut active| active.take())
    }
}
