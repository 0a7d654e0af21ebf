//! Assignment strategies - selección de devices para transport tasks
//!
//! A strategy looks at one task plus a snapshot of the idle fleet and picks
//! at most one eligible device. Strategies are pure over their inputs except
//! for the round-robin counter shared across calls.

use crate::devices::DeviceInfo;
use crate::shared_kernel::{CommandType, DeviceId, DeviceProfile, Location};
use crate::tasks::TransportTask;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The round-robin counter wraps here to avoid unbounded growth.
const ROUND_ROBIN_BOUND: usize = 1_000_000;

/// Snapshot handed to a strategy for one assignment decision.
#[derive(Debug)]
pub struct AssignmentContext<'a> {
    pub task: &'a TransportTask,
    /// Idle devices with their last read location.
    pub idle_devices: &'a [DeviceInfo],
    /// Full fleet configuration, keyed by device id.
    pub profiles: &'a HashMap<DeviceId, DeviceProfile>,
    /// Devices that already carry an assignment right now.
    pub assigning: &'a HashSet<DeviceId>,
}

/// Trait for device assignment
pub trait AssignmentStrategy: Send + Sync {
    /// Pick an eligible device for the task, or none.
    fn select_device(&self, context: &AssignmentContext<'_>) -> Option<DeviceProfile>;

    /// Nombre de la estrategia
    fn strategy_name(&self) -> &str;
}

/// Default strategy: honor the device pin, otherwise pick among the nearest
/// idle devices with a shared round-robin counter.
///
/// Distance ties are broken by round-robin; under load this intentionally
/// trades strict closest-first for fleet-wide fairness.
pub struct PinnedOrNearestStrategy {
    round_robin: AtomicUsize,
    reference_locations: HashMap<CommandType, Location>,
}

impl PinnedOrNearestStrategy {
    pub fn new() -> Self {
        let mut reference_locations = HashMap::new();
        // Inbound tasks have no source yet; rank devices against the
        // infeed area agreed with the PLC programs.
        reference_locations.insert(CommandType::Inbound, Location::new(1, 14, 5));
        Self {
            round_robin: AtomicUsize::new(0),
            reference_locations,
        }
    }

    pub fn with_reference_locations(references: HashMap<CommandType, Location>) -> Self {
        Self {
            round_robin: AtomicUsize::new(0),
            reference_locations: references,
        }
    }

    fn reference_for(&self, task: &TransportTask) -> Option<Location> {
        match task.command_type {
            CommandType::Outbound | CommandType::Transfer => task.source_location,
            CommandType::Inbound => self.reference_locations.get(&task.command_type).copied(),
        }
    }

    fn next_round_robin(&self) -> usize {
        let n = self.round_robin.fetch_add(1, Ordering::Relaxed);
        if n >= ROUND_ROBIN_BOUND {
            self.round_robin.store(0, Ordering::Relaxed);
        }
        n
    }
}

impl Default for PinnedOrNearestStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentStrategy for PinnedOrNearestStrategy {
    fn select_device(&self, context: &AssignmentContext<'_>) -> Option<DeviceProfile> {
        // Pinned tasks never fall back to another device.
        if let Some(pinned) = &context.task.device_id {
            let is_idle = context
                .idle_devices
                .iter()
                .any(|d| &d.device_id == pinned);
            if is_idle && !context.assigning.contains(pinned) {
                return context.profiles.get(pinned).cloned();
            }
            return None;
        }

        let reference = self.reference_for(context.task)?;

        let mut candidates: Vec<&DeviceInfo> = context
            .idle_devices
            .iter()
            .filter(|d| {
                !context.assigning.contains(&d.device_id)
                    && context.profiles.contains_key(&d.device_id)
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by_key(|d| {
            d.location
                .map(|loc| loc.manhattan_distance_to(&reference))
                .unwrap_or(i32::MAX)
        });

        let chosen = candidates[self.next_round_robin() % candidates.len()];
        context.profiles.get(&chosen.device_id).cloned()
    }

    fn strategy_name(&self) -> &str {
        "pinned_or_nearest"
    }
}
