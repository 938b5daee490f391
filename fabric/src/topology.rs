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

//! Fabric topology: hosts and switches wired into a petgraph graph,
//! plus the precomputed next-hop routing table.

pub mod tree;

use petgraph::prelude::*;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::host::PhysicalNode;
use crate::switch::SwitchNode;

/// Closed set of node kinds in the fabric.
pub enum Element {
    Host(PhysicalNode),
    Switch(SwitchNode),
}

impl Element {
    pub fn name(&self) -> &str {
        match self {
            Element::Host(host) => host.name(),
            Element::Switch(switch) => switch.name(),
        }
    }

    pub fn as_host(&self) -> Option<&PhysicalNode> {
        match self {
            Element::Host(host) => Some(host),
            _ => None,
        }
    }

    pub fn as_host_mut(&mut self) -> Option<&mut PhysicalNode> {
        match self {
            Element::Host(host) => Some(host),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<&SwitchNode> {
        match self {
            Element::Switch(switch) => Some(switch),
            _ => None,
        }
    }

    pub fn as_switch_mut(&mut self) -> Option<&mut SwitchNode> {
        match self {
            Element::Switch(switch) => Some(switch),
            _ => None,
        }
    }
}

/// A duplex cable between two fabric elements.
pub struct FabricLink {
    pub bandwidth: f64,
}

/// The physical shape of the fabric. Nodes are shared behind
/// `Rc<RefCell<...>>` so the simulation driver can hold the graph while
/// mutating individual elements.
#[derive(Default)]
pub struct FabricSpec {
    pub topo: Graph<Rc<RefCell<Element>>, FabricLink, Undirected>,
}

impl FabricSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, host: PhysicalNode) -> NodeIndex {
        self.topo.add_node(Rc::new(RefCell::new(Element::Host(host))))
    }

    pub fn add_switch(&mut self, switch: SwitchNode) -> NodeIndex {
        self.topo
            .add_node(Rc::new(RefCell::new(Element::Switch(switch))))
    }

    pub fn get_node(&self, id: NodeIndex) -> Rc<RefCell<Element>> {
        Rc::clone(&self.topo[id])
    }

    /// Like [FabricSpec::get_node], but `None` for an index with no
    /// element behind it instead of panicking.
    pub fn try_get_node(&self, id: NodeIndex) -> Option<Rc<RefCell<Element>>> {
        self.topo.node_weight(id).map(Rc::clone)
    }

    pub fn hosts(&self) -> Vec<NodeIndex> {
        self.topo
            .node_indices()
            .filter(|id| self.topo[*id].borrow().as_host().is_some())
            .collect()
    }

    pub fn switches(&self) -> Vec<NodeIndex> {
        self.topo
            .node_indices()
            .filter(|id| self.topo[*id].borrow().as_switch().is_some())
            .collect()
    }

    /// Cable a host below an edge switch. The host's single uplink
    /// points at the switch; the switch lists the host as a child.
    pub fn attach_host(&mut self, host: NodeIndex, switch: NodeIndex, link: FabricLink) {
        self.topo[host]
            .borrow_mut()
            .as_host_mut()
            .unwrap()
            .set_uplink(switch);
        self.topo[switch]
            .borrow_mut()
            .as_switch_mut()
            .unwrap()
            .attach_child(host);
        self.topo.add_edge(host, switch, link);
    }

    /// Cable a switch below a higher-level switch.
    pub fn attach_switch(&mut self, child: NodeIndex, parent: NodeIndex, link: FabricLink) {
        self.topo[child]
            .borrow_mut()
            .as_switch_mut()
            .unwrap()
            .add_uplink(parent);
        self.topo[parent]
            .borrow_mut()
            .as_switch_mut()
            .unwrap()
            .attach_child(child);
        self.topo.add_edge(child, parent, link);
    }

    pub fn bandwidth(&self, a: NodeIndex, b: NodeIndex) -> Option<f64> {
        self.topo
            .find_edge(a, b)
            .map(|edge| self.topo[edge].bandwidth)
    }
}

/// Precomputed next hops: `(at, destination_host) -> neighbor`.
///
/// Built once per topology by a reverse breadth-first walk from every
/// host, so lookups during routing are a single map probe.
#[derive(Default)]
pub struct RouteTable {
    next: HashMap<(NodeIndex, NodeIndex), NodeIndex>,
}

impl RouteTable {
    pub fn build(spec: &FabricSpec) -> Self {
        let mut next = HashMap::new();
        for dest in spec.hosts() {
            let mut frontier = VecDeque::from(vec![dest]);
            let mut seen = vec![dest];
            while let Some(at) = frontier.pop_front() {
                for neighbor in spec.topo.neighbors(at) {
                    if seen.contains(&neighbor) {
                        continue;
                    }
                    seen.push(neighbor);
                    // First discovery wins: BFS order makes it a
                    // shortest path toward dest.
                    next.insert((neighbor, dest), at);
                    frontier.push_back(neighbor);
                }
            }
        }
        Self { next }
    }

    pub fn next_hop(&self, at: NodeIndex, dest: NodeIndex) -> Option<NodeIndex> {
        self.next.get(&(at, dest)).copied()
    }
}
