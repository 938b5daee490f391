// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Placement and capacity directory.
//!
//! Routers and schedulers never consult a global registry; they are handed
//! this read-only directory at the call sites that need it. Only the
//! provisioning layer mutates it, through the explicit registration calls.

use petgraph::prelude::*;
use rand::Rng;
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::collections::HashMap;

use crate::task::UnitId;

#[derive(Clone, Debug, Default)]
pub struct Directory {
    /// Current physical placement of each execution unit.
    placement: HashMap<UnitId, NodeIndex>,
    /// Per-PE allocated capacity for each unit, refreshed by the
    /// provisioning layer.
    shares: HashMap<UnitId, Vec<f64>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_unit(&mut self, unit: UnitId, host: NodeIndex, share: Vec<f64>) {
        self.placement.insert(unit, host);
        self.shares.insert(unit, share);
    }

    pub fn resolve_host(&self, unit: UnitId) -> Option<NodeIndex> {
        self.placement.get(&unit).copied()
    }

    pub fn capacity_share(&self, unit: UnitId) -> &[f64] {
        self.shares.get(&unit).map_or(&[], |share| share.as_slice())
    }

    pub fn set_capacity_share(&mut self, unit: UnitId, share: Vec<f64>) {
        self.shares.insert(unit, share);
    }

    pub fn unit_count(&self) -> usize {
        self.placement.len()
    }
}

/// Pick a host for each of `count` units, uniformly at random.
///
/// Deterministic for a given seed, so scenarios with random placement stay
/// reproducible.
pub fn random_placement(hosts: &[NodeIndex], count: usize, seed: u64) -> Vec<NodeIndex> {
    assert!(!hosts.is_empty());
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    (0..count)
        .map(|_| hosts[rng.gen_range(0..hosts.len())])
        .collect()
}
