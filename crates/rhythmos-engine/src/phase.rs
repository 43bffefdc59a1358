// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordered phases and their registered work.
//!
//! A phase bundles three ordered lists of callbacks executed once per step:
//! serial subsystems on the driver thread, parallel range tasks over the
//! phase's element domain, and reductions on the driver thread after every
//! range task has completed.

use std::sync::Arc;

/// Serial subsystem callback: `(frame, dt)`, driver thread only.
pub type SerialFn = Box<dyn FnMut(u64, f64) + Send + 'static>;

/// Parallel range task callback: `(begin, end, frame, dt)` over a disjoint
/// half-open interval. Invoked concurrently from several workers, so it must
/// be re-entrant and may mutate only memory governed by its interval.
pub type RangeTaskFn = Arc<dyn Fn(usize, usize, u64, f64) + Send + Sync + 'static>;

/// Reduction callback: `(frame, dt)`, driver thread, after all range tasks
/// of the phase have completed.
pub type ReductionFn = Box<dyn FnMut(u64, f64) + Send + 'static>;

/// Stable identifier of a registered phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseId(usize);

impl PhaseId {
    /// Position of the phase in step order.
    pub fn index(self) -> usize {
        self.0
    }
}

pub(crate) struct Phase {
    pub name: String,
    pub serial: Vec<SerialFn>,
    pub range_tasks: Vec<RangeTaskFn>,
    pub reductions: Vec<ReductionFn>,
    pub element_count: usize,
    pub enabled: bool,
    // Scope labels are built at registration so the hot loop never formats.
    pub phase_scope: String,
    pub range_scopes: Vec<String>,
    pub reduction_scope: String,
}

impl Phase {
    fn new(name: &str, element_count: usize) -> Self {
        Self {
            name: name.to_owned(),
            serial: Vec::new(),
            range_tasks: Vec::new(),
            reductions: Vec::new(),
            element_count,
            enabled: true,
            phase_scope: format!("Phase:{name}"),
            range_scopes: Vec::new(),
            reduction_scope: format!("Reduction:{name}"),
        }
    }

    pub fn push_range_task(&mut self, task: RangeTaskFn) {
        let index = self.range_tasks.len();
        self.range_scopes.push(format!("Range:{}:{}", self.name, index));
        self.range_tasks.push(task);
    }
}

/// Ordered collection of phases, frozen while a run is in progress.
#[derive(Default)]
pub(crate) struct PhaseRegistry {
    phases: Vec<Phase>,
}

impl PhaseRegistry {
    pub fn add(&mut self, name: &str, element_count: usize) -> PhaseId {
        self.phases.push(Phase::new(name, element_count));
        PhaseId(self.phases.len() - 1)
    }

    /// Panics when `id` does not name a registered phase; identifiers only
    /// come from [`PhaseRegistry::add`], so a miss is a caller bug.
    pub fn phase_mut(&mut self, id: PhaseId) -> &mut Phase {
        &mut self.phases[id.0]
    }

    pub fn phases_mut(&mut self) -> impl Iterator<Item = &mut Phase> {
        self.phases.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_stable_insertion_indices() {
        let mut reg = PhaseRegistry::default();
        let a = reg.add("Integrate", 100);
        let b = reg.add("Collide", 50);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.phase_mut(a).name, "Integrate");
        assert_eq!(reg.phase_mut(b).element_count, 50);
    }

    #[test]
    fn scope_labels_are_prebuilt() {
        let mut reg = PhaseRegistry::default();
        let id = reg.add("Phys", 10);
        let phase = reg.phase_mut(id);
        phase.push_range_task(Arc::new(|_, _, _, _| {}));
        phase.push_range_task(Arc::new(|_, _, _, _| {}));
        assert_eq!(phase.phase_scope, "Phase:Phys");
        assert_eq!(phase.range_scopes, vec!["Range:Phys:0", "Range:Phys:1"]);
        assert_eq!(phase.reduction_scope, "Reduction:Phys");
    }

    #[test]
    fn new_phases_start_enabled() {
        let mut reg = PhaseRegistry::default();
        let id = reg.add("Idle", 0);
        assert!(reg.phase_mut(id).enabled);
    }
}
