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

//! Canned topology generators.

use petgraph::prelude::*;

use crate::config::{HostConfiguration, SwitchConfiguration};
use crate::host::PhysicalNode;
use crate::switch::{SwitchLevel, SwitchNode};
use crate::topology::{FabricLink, FabricSpec};

/// Build a three-tier tree: one root switch, `agg_count` aggregate
/// switches below it, `edges_per_agg` edge switches below each
/// aggregate, and `hosts_per_edge` hosts below each edge switch.
///
/// ```text
///                     root
///                 /          \
///             agg0            agg1
///            /    \          /    \
///        edge0   edge1   edge2   edge3
///        /   \   /   \   /   \   /   \
///       h0   h1 h2   h3 h4   h5 h6   h7
/// ```
///
/// Returns the wired spec and the host node indices in creation order.
pub fn three_tier(
    agg_count: usize,
    edges_per_agg: usize,
    hosts_per_edge: usize,
    host_config: &HostConfiguration,
    switch_config: &SwitchConfiguration,
) -> (FabricSpec, Vec<NodeIndex>) {
    let mut spec = FabricSpec::new();
    let root = spec.add_switch(SwitchNode::new("root", SwitchLevel::Root, switch_config));
    let mut hosts = Vec::with_capacity(agg_count * edges_per_agg * hosts_per_edge);
    for a in 0..agg_count {
        let agg = spec.add_switch(SwitchNode::new(
            &format!("agg{}", a),
            SwitchLevel::Aggregate,
            switch_config,
        ));
        spec.attach_switch(
            agg,
            root,
            FabricLink {
                bandwidth: switch_config.uplink_bandwidth,
            },
        );
        for e in 0..edges_per_agg {
            let edge = spec.add_switch(SwitchNode::new(
                &format!("edge{}", a * edges_per_agg + e),
                SwitchLevel::Edge,
                switch_config,
            ));
            spec.attach_switch(
                edge,
                agg,
                FabricLink {
                    bandwidth: switch_config.uplink_bandwidth,
                },
            );
            for _ in 0..hosts_per_edge {
                let host = spec.add_host(PhysicalNode::new(
                    &format!("host{}", hosts.len()),
                    host_config,
                ));
                spec.attach_host(
                    host,
                    edge,
                    FabricLink {
                        bandwidth: host_config.uplink_bandwidth,
                    },
                );
                hosts.push(host);
            }
        }
    }
    (spec, hosts)
}

/// A single edge switch with `host_count` hosts, handy for small
/// scenarios that do not exercise the upper tiers.
pub fn single_edge(
    host_count: usize,
    host_config: &HostConfiguration,
    switch_config: &SwitchConfiguration,
) -> (FabricSpec, Vec<NodeIndex>) {
    let mut spec = FabricSpec::new();
    let edge = spec.add_switch(SwitchNode::new("edge0", SwitchLevel::Edge, switch_config));
    let hosts = (0..host_count)
        .map(|i| {
            let host = spec.add_host(PhysicalNode::new(&format!("host{}", i), host_config));
            spec.attach_host(
                host,
                edge,
                FabricLink {
                    bandwidth: host_config.uplink_bandwidth,
                },
            );
            host
        })
        .collect();
    (spec, hosts)
}
