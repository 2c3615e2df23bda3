//! Cross-channel ducking rules
//!
//! A trigger channel maps to a set of target channels. While the trigger is
//! marked active by the control path, each target's effective gain is
//! multiplied by its own duck level. Activation is an external signal; the
//! controller never looks at audio levels.

use super::ChannelId;
use crate::domain::dsp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Engine-wide ducking configuration
///
/// `duck_level` seeds the duck level of newly created channels. The attack,
/// release and threshold fields are carried in configuration and snapshots
/// but nothing evaluates them yet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingSettings {
    pub duck_level: f32,
    pub attack_ms: u32,
    pub release_ms: u32,
    pub threshold: f32,
}

impl Default for DuckingSettings {
    fn default() -> Self {
        Self {
            duck_level: 0.3,
            attack_ms: 50,
            release_ms: 200,
            threshold: 0.1,
        }
    }
}

impl DuckingSettings {
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            duck_level: dsp::clamp_or(self.duck_level, 0.0, 1.0, defaults.duck_level),
            attack_ms: self.attack_ms.min(10_000),
            release_ms: self.release_ms.min(10_000),
            threshold: dsp::clamp_or(self.threshold, 0.0, 1.0, defaults.threshold),
        }
    }
}

/// Trigger → targets registry plus the set of active triggers
#[derive(Debug, Clone, Default)]
pub struct DuckingController {
    settings: DuckingSettings,
    rules: BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    active: BTreeSet<ChannelId>,
}

impl DuckingController {
    pub fn new(settings: DuckingSettings) -> Self {
        Self {
            settings: settings.sanitized(),
            ..Default::default()
        }
    }

    pub fn settings(&self) -> DuckingSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: DuckingSettings) {
        self.settings = settings.sanitized();
    }

    /// Register (or replace) the targets of `trigger`
    ///
    /// A channel never ducks itself, so `trigger` is dropped from `targets`.
    pub fn set_trigger(&mut self, trigger: ChannelId, targets: impl IntoIterator<Item = ChannelId>) {
        let targets: BTreeSet<ChannelId> = targets.into_iter().filter(|t| *t != trigger).collect();
        debug!("Ducking trigger {} -> {:?}", trigger, targets);
        self.rules.insert(trigger, targets);
    }

    /// Deregister `trigger`; returns whether it was registered
    pub fn remove_trigger(&mut self, trigger: ChannelId) -> bool {
        let removed = self.rules.remove(&trigger).is_some();
        if removed {
            debug!("Ducking trigger {} removed", trigger);
        }
        removed
    }

    /// Mark `trigger` as currently sounding (or not)
    pub fn set_active(&mut self, trigger: ChannelId, active: bool) {
        if active {
            self.active.insert(trigger);
        } else {
            self.active.remove(&trigger);
        }
    }

    pub fn is_active(&self, trigger: ChannelId) -> bool {
        self.active.contains(&trigger)
    }

    pub fn targets(&self, trigger: ChannelId) -> Option<&BTreeSet<ChannelId>> {
        self.rules.get(&trigger)
    }

    pub fn rules(&self) -> impl Iterator<Item = (ChannelId, &BTreeSet<ChannelId>)> {
        self.rules.iter().map(|(t, targets)| (*t, targets))
    }

    /// Purge a channel from both sides of every rule
    pub fn remove_channel(&mut self, id: ChannelId) {
        self.rules.remove(&id);
        self.active.remove(&id);
        for targets in self.rules.values_mut() {
            targets.remove(&id);
        }
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.active.clear();
    }

    /// Channels ducked by at least one active, registered trigger
    pub fn ducked_targets(&self) -> BTreeSet<ChannelId> {
        self.active
            .iter()
            .filter_map(|t| self.rules.get(t))
            .flatten()
            .copied()
            .collect()
    }

    pub fn is_ducked(&self, target: ChannelId) -> bool {
        self.active
            .iter()
            .filter_map(|t| self.rules.get(t))
            .any(|targets| targets.contains(&target))
    }
}
