//! Installed-breakpoint bookkeeping.

use std::collections::HashMap;

use crate::probe::{BatchId, Probe, ProbeId, ProbeLocation};
use crate::protocol::BreakpointId;

/// Breakpoint installed on behalf of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBreakpoint {
    pub breakpoint_id: BreakpointId,
    pub probe: Probe,
    pub batch_id: BatchId,
    /// Resolved script url the breakpoint was set in.
    pub url: String,
    pub location: ProbeLocation,
}

/// Maps runtime breakpoint ids to the probes that requested them, and back.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    by_breakpoint: HashMap<BreakpointId, InstalledBreakpoint>,
    by_probe: HashMap<ProbeId, BreakpointId>,
}

impl BreakpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed breakpoint, returning any entry it displaced.
    pub fn insert(&mut self, entry: InstalledBreakpoint) -> Option<InstalledBreakpoint> {
        let probe_id = entry.probe.id;
        let mut displaced = None;
        if let Some(previous) = self.by_probe.insert(probe_id, entry.breakpoint_id.clone()) {
            if previous != entry.breakpoint_id {
                displaced = self.by_breakpoint.remove(&previous);
            }
        }
        if let Some(previous) = self.by_breakpoint.insert(entry.breakpoint_id.clone(), entry) {
            if previous.probe.id != probe_id {
                self.by_probe.remove(&previous.probe.id);
            }
            displaced = displaced.or(Some(previous));
        }
        displaced
    }

    #[must_use]
    pub fn get(&self, breakpoint_id: &str) -> Option<&InstalledBreakpoint> {
        self.by_breakpoint.get(breakpoint_id)
    }

    /// First tracked entry among the breakpoints a pause reports.
    #[must_use]
    pub fn first_hit<'a>(
        &self,
        hit_breakpoints: impl IntoIterator<Item = &'a BreakpointId>,
    ) -> Option<&InstalledBreakpoint> {
        hit_breakpoints
            .into_iter()
            .find_map(|breakpoint_id| self.by_breakpoint.get(breakpoint_id))
    }

    /// Detach the first tracked entry among the breakpoints a pause reports.
    /// A probe fires once, so its entry leaves the registry on its hit.
    pub fn take_first_hit<'a>(
        &mut self,
        hit_breakpoints: impl IntoIterator<Item = &'a BreakpointId>,
    ) -> Option<InstalledBreakpoint> {
        let breakpoint_id = self.first_hit(hit_breakpoints)?.breakpoint_id.clone();
        self.remove(&breakpoint_id)
    }

    #[must_use]
    pub fn breakpoint_for(&self, probe_id: &ProbeId) -> Option<&BreakpointId> {
        self.by_probe.get(probe_id)
    }

    pub fn remove(&mut self, breakpoint_id: &str) -> Option<InstalledBreakpoint> {
        let entry = self.by_breakpoint.remove(breakpoint_id)?;
        if self.by_probe.get(&entry.probe.id) == Some(&entry.breakpoint_id) {
            self.by_probe.remove(&entry.probe.id);
        }
        Some(entry)
    }

    pub fn remove_probe(&mut self, probe_id: &ProbeId) -> Option<InstalledBreakpoint> {
        let breakpoint_id = self.by_probe.remove(probe_id)?;
        self.by_breakpoint.remove(&breakpoint_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_breakpoint.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_breakpoint.is_empty()
    }
}
