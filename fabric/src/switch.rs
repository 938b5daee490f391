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

//! Hierarchical switching elements.
//!
//! A switch buffers packets per next hop and flushes them after a fixed
//! switching delay, dividing each link's bandwidth evenly across the
//! packets queued for it in that tick. Flushes are debounced with a
//! generation token: every arrival invalidates the previously scheduled
//! flush, so only the most recently scheduled one runs.

use itertools::Itertools;
use petgraph::prelude::*;
use std::collections::{HashMap, VecDeque};

use crate::config::SwitchConfiguration;
use crate::directory::Directory;
use crate::engine::{Dispatch, EventKind};
use crate::packet::Packet;
use crate::topology::RouteTable;
use crate::Error;
use crate::SimTime;

/// Position of a switch in the fabric hierarchy. Edge switches attach
/// hosts; aggregate and root switches attach other switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchLevel {
    Edge,
    Aggregate,
    Root,
}

pub struct SwitchNode {
    name: String,
    level: SwitchLevel,
    switching_delay: SimTime,
    downlink_bandwidth: f64,
    uplink_bandwidth: f64,
    /// Hosts if this is an edge switch, child switches otherwise.
    attached: Vec<NodeIndex>,
    uplinks: Vec<NodeIndex>,
    /// Pending queues toward attached children.
    to_child: HashMap<NodeIndex, VecDeque<Packet>>,
    /// Pending queues toward uplink neighbors.
    to_uplink: HashMap<NodeIndex, VecDeque<Packet>>,
    /// Generation token of the most recently scheduled flush.
    flush_token: u64,
}

impl SwitchNode {
    pub fn new(name: &str, level: SwitchLevel, config: &SwitchConfiguration) -> Self {
        Self {
            name: String::from(name),
            level,
            switching_delay: config.switching_delay,
            downlink_bandwidth: config.downlink_bandwidth,
            uplink_bandwidth: config.uplink_bandwidth,
            attached: Vec::new(),
            uplinks: Vec::new(),
            to_child: HashMap::new(),
            to_uplink: HashMap::new(),
            flush_token: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> SwitchLevel {
        self.level
    }

    pub fn attach_child(&mut self, child: NodeIndex) {
        self.attached.push(child);
    }

    pub fn add_uplink(&mut self, uplink: NodeIndex) {
        self.uplinks.push(uplink);
    }

    pub fn attached(&self) -> &[NodeIndex] {
        &self.attached
    }

    pub fn pending(&self) -> usize {
        self.to_child.values().map(VecDeque::len).sum::<usize>()
            + self.to_uplink.values().map(VecDeque::len).sum::<usize>()
    }

    /// Accept a packet and queue it toward its next hop.
    ///
    /// Returns the (debounced) flush to schedule: the token invalidates
    /// every flush scheduled before this arrival.
    pub fn receive_upward(
        &mut self,
        packet: Packet,
        self_id: NodeIndex,
        directory: &Directory,
        routes: &RouteTable,
    ) -> Result<Dispatch, Error> {
        let dest_host = directory
            .resolve_host(packet.receiver_unit)
            .ok_or(Error::DetachedUnit(packet.receiver_unit))?;
        let hop = if self.level == SwitchLevel::Edge && self.attached.contains(&dest_host) {
            dest_host
        } else {
            routes
                .next_hop(self_id, dest_host)
                .ok_or(Error::RoutingDeadEnd(self_id, packet.receiver_unit))?
        };
        let queue = if self.attached.contains(&hop) {
            self.to_child.entry(hop).or_insert_with(VecDeque::new)
        } else if self.uplinks.contains(&hop) {
            self.to_uplink.entry(hop).or_insert_with(VecDeque::new)
        } else {
            log::error!(
                "{}: next hop {} is neither attached nor an uplink",
                self.name,
                hop.index()
            );
            return Err(Error::RoutingDeadEnd(self_id, packet.receiver_unit));
        };
        log::trace!(
            "{}: queued {} -> {} toward {}",
            self.name,
            packet.sender_task,
            packet.receiver_task,
            hop.index()
        );
        queue.push_back(packet);
        self.flush_token += 1;
        Ok(Dispatch {
            delay: self.switching_delay,
            target: self_id,
            kind: EventKind::SwitchFlush {
                token: self.flush_token,
            },
        })
    }

    /// Forward every queued packet to its next hop.
    ///
    /// A stale token means a newer flush has been scheduled since; this
    /// one is a no-op. Otherwise each per-hop queue divides the link
    /// bandwidth evenly across its packets.
    pub fn flush(&mut self, token: u64, scale_factor: f64) -> Vec<Dispatch> {
        if token != self.flush_token {
            log::trace!("{}: stale flush token {} ignored", self.name, token);
            return Vec::new();
        }
        let mut dispatches = Vec::new();
        let level = self.level;
        let name = self.name.as_str();
        let mut drain = |queues: &mut HashMap<NodeIndex, VecDeque<Packet>>,
                         bandwidth: f64,
                         downward: bool| {
            // Sorted so event order does not depend on hash iteration.
            for (hop, queue) in queues.drain().sorted_by_key(|(hop, _)| hop.index()) {
                if queue.is_empty() {
                    continue;
                }
                let share = bandwidth / queue.len() as f64;
                for packet in queue {
                    let delay = packet.payload_bytes / (share * scale_factor);
                    log::debug!(
                        "{}: forwarding {} -> {} via {} (delay {:.6})",
                        name,
                        packet.sender_task,
                        packet.receiver_task,
                        hop.index(),
                        delay
                    );
                    let kind = if downward && level == SwitchLevel::Edge {
                        EventKind::PacketToHost(packet)
                    } else {
                        EventKind::PacketToSwitch(packet)
                    };
                    dispatches.push(Dispatch {
                        delay,
                        target: hop,
                        kind,
                    });
                }
            }
        };
        drain(&mut self.to_child, self.downlink_bandwidth, true);
        drain(&mut self.to_uplink, self.uplink_bandwidth, false);
        dispatches
    }
}
