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

//! Physical nodes and their packet router.
//!
//! A node hosts execution units and owns the boundary between task-level
//! sends and the network: every processing update first delivers arrived
//! packets (possibly unblocking Receive stages), then advances all hosted
//! schedulers, and finally classifies produced packets as local (delivered
//! back into a sibling unit's inbox with zero delay) or remote (handed to
//! the uplink switch under fair bandwidth sharing).

use petgraph::prelude::*;

use crate::config::{HostConfiguration, UnitConfiguration};
use crate::directory::Directory;
use crate::engine::{Dispatch, EventKind};
use crate::packet::Packet;
use crate::scheduler::StageScheduler;
use crate::task::UnitId;
use crate::Error;
use crate::SimTime;

/// A virtual slice of compute capacity hosting tasks.
pub struct ExecutionUnit {
    id: UnitId,
    pe_count: usize,
    capacity_per_pe: f64,
    memory: usize,
    pub scheduler: StageScheduler,
}

impl ExecutionUnit {
    pub fn new(
        id: UnitId,
        config: &UnitConfiguration,
        min_quantum: SimTime,
        receive_timeout: Option<SimTime>,
    ) -> Self {
        let mut scheduler = StageScheduler::new(id, min_quantum, receive_timeout);
        scheduler.set_capacity(&vec![config.capacity_per_pe; config.pe_count]);
        Self {
            id,
            pe_count: config.pe_count,
            capacity_per_pe: config.capacity_per_pe,
            memory: config.memory,
            scheduler,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn pe_count(&self) -> usize {
        self.pe_count
    }

    pub fn memory(&self) -> usize {
        self.memory
    }

    /// The capacity-share vector this unit is provisioned with.
    pub fn nominal_share(&self) -> Vec<f64> {
        vec![self.capacity_per_pe; self.pe_count]
    }
}

/// Result of one processing update.
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Events for the driver to schedule (remote packet handoffs).
    pub dispatches: Vec<Dispatch>,
    /// Earliest compute deadline across hosted units, or `0.0` when every
    /// unit is idle or blocked.
    pub next_wake: SimTime,
}

pub struct PhysicalNode {
    name: String,
    uplink: Option<NodeIndex>,
    uplink_bandwidth: f64,
    units: Vec<ExecutionUnit>,
    /// Packets delivered by the network, pending ingestion on the next
    /// update.
    inbound: Vec<Packet>,
}

impl PhysicalNode {
    pub fn new(name: &str, config: &HostConfiguration) -> Self {
        Self {
            name: String::from(name),
            uplink: None,
            uplink_bandwidth: config.uplink_bandwidth,
            units: Vec::new(),
            inbound: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_uplink(&mut self, switch: NodeIndex) {
        self.uplink = Some(switch);
    }

    pub fn uplink(&self) -> Option<NodeIndex> {
        self.uplink
    }

    pub fn uplink_bandwidth(&self) -> f64 {
        self.uplink_bandwidth
    }

    pub fn attach_unit(&mut self, unit: ExecutionUnit) {
        self.units.push(unit);
    }

    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut ExecutionUnit> {
        self.units.iter_mut().find(|u| u.id() == id)
    }

    pub fn unit(&self, id: UnitId) -> Option<&ExecutionUnit> {
        self.units.iter().find(|u| u.id() == id)
    }

    /// Queue a network-delivered packet for the next processing update.
    pub fn enqueue_inbound(&mut self, packet: Packet) {
        self.inbound.push(packet);
    }

    /// One full processing update at `now`.
    ///
    /// `self_id` is this node's index in the fabric graph; locality of a
    /// packet is decided by comparing it against the directory's placement
    /// of the receiver unit.
    pub fn update(
        &mut self,
        now: SimTime,
        self_id: NodeIndex,
        directory: &Directory,
        scale_factor: f64,
    ) -> Result<UpdateOutcome, Error> {
        self.deliver_inbound(now)?;

        // Advance all hosted schedulers, re-running the pass whenever a
        // local delivery lands: one packet arrival can cascade several
        // stage transitions within the same tick.
        let mut next_wake: SimTime = 0.0;
        let mut remote: Vec<Packet> = Vec::new();
        let mut rerun = true;
        while rerun {
            rerun = false;
            let mut candidate: Option<SimTime> = None;
            let mut produced: Vec<Packet> = Vec::new();
            for unit in self.units.iter_mut() {
                let share = directory.capacity_share(unit.id());
                let wake = unit.scheduler.advance(now, share)?;
                if wake > 0.0 {
                    candidate = Some(candidate.map_or(wake, |c: SimTime| c.min(wake)));
                }
                produced.append(&mut unit.scheduler.take_outbound());
            }
            next_wake = candidate.unwrap_or(0.0);
            for mut packet in produced {
                let dest = directory
                    .resolve_host(packet.receiver_unit)
                    .ok_or(Error::DetachedUnit(packet.receiver_unit))?;
                if dest == self_id {
                    log::trace!(
                        "{}: local delivery {} -> {}",
                        self.name,
                        packet.sender_task,
                        packet.receiver_task
                    );
                    packet.receive_time = Some(now);
                    let receiver = packet.receiver_unit;
                    let unit = self
                        .unit_mut(receiver)
                        .ok_or(Error::DetachedUnit(receiver))?;
                    unit.scheduler.deposit(packet);
                    rerun = true;
                } else {
                    packet.origin_node = Some(self_id);
                    packet.dest_node = Some(dest);
                    remote.push(packet);
                }
            }
        }

        // Remote packets leaving in the same tick divide the uplink evenly.
        let mut dispatches = Vec::with_capacity(remote.len());
        if !remote.is_empty() {
            let uplink = self.uplink.ok_or(Error::InvalidHost(self_id))?;
            let bandwidth_share = self.uplink_bandwidth / remote.len() as f64;
            for packet in remote {
                let delay = packet.payload_bytes / (bandwidth_share * scale_factor);
                log::debug!(
                    "{}: uplink {} -> {} ({} bytes, delay {:.6})",
                    self.name,
                    packet.sender_task,
                    packet.receiver_task,
                    packet.payload_bytes,
                    delay
                );
                dispatches.push(Dispatch {
                    delay,
                    target: uplink,
                    kind: EventKind::PacketToSwitch(packet),
                });
            }
        }
        Ok(UpdateOutcome {
            dispatches,
            next_wake,
        })
    }

    fn deliver_inbound(&mut self, now: SimTime) -> Result<(), Error> {
        if self.inbound.is_empty() {
            return Ok(());
        }
        let inbound = std::mem::take(&mut self.inbound);
        for mut packet in inbound {
            packet.receive_time = Some(now);
            let receiver = packet.receiver_unit;
            match self.unit_mut(receiver) {
                Some(unit) => unit.scheduler.deposit(packet),
                None => {
                    log::error!(
                        "{}: packet for {} but the unit is not hosted here",
                        self.name,
                        receiver
                    );
                    return Err(Error::DetachedUnit(receiver));
                }
            }
        }
        Ok(())
    }

    pub fn has_work(&self) -> bool {
        !self.inbound.is_empty() || self.units.iter().any(|u| u.scheduler.has_work())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricConfiguration;
    use crate::engine::MIN_EVENT_QUANTUM;
    use crate::task::{NetworkTask, TaskId, TaskStage, TaskStatus};

    fn host_with_units(count: usize) -> (PhysicalNode, Directory, NodeIndex) {
        let self_id = NodeIndex::new(0);
        let mut host = PhysicalNode::new("host", &HostConfiguration::default());
        let mut directory = Directory::new();
        for i in 0..count {
            let unit = ExecutionUnit::new(
                UnitId(i),
                &UnitConfiguration::default(),
                MIN_EVENT_QUANTUM,
                None,
            );
            directory.register_unit(UnitId(i), self_id, unit.nominal_share());
            host.attach_unit(unit);
        }
        (host, directory, self_id)
    }

    #[test]
    fn local_send_receive_cascades_in_one_update() {
        let config = FabricConfiguration::default();
        let (mut host, directory, self_id) = host_with_units(2);

        // Task A on unit 0 sends to task B on unit 1, which receives it.
        let a = NetworkTask::new(
            TaskId(1),
            0,
            1,
            0,
            0.0,
            vec![TaskStage::send(0, 100.0, UnitId(1), TaskId(2))],
        );
        let b = NetworkTask::new(
            TaskId(2),
            0,
            1,
            0,
            0.0,
            vec![TaskStage::receive(0, 100.0, UnitId(0), TaskId(1))],
        );
        host.update(0.0, self_id, &directory, config.scale_factor)
            .unwrap();
        host.unit_mut(UnitId(0)).unwrap().scheduler.submit(a, 0.0, 0.0);
        host.unit_mut(UnitId(1)).unwrap().scheduler.submit(b, 0.0, 0.0);
        let outcome = host
            .update(0.0, self_id, &directory, config.scale_factor)
            .unwrap();
        assert!(outcome.dispatches.is_empty());
        assert_eq!(
            host.unit(UnitId(0)).unwrap().scheduler.status(TaskId(1)),
            TaskStatus::Finished
        );
        assert_eq!(
            host.unit(UnitId(1)).unwrap().scheduler.status(TaskId(2)),
            TaskStatus::Finished
        );
    }

    #[test]
    fn remote_packets_share_the_uplink() {
        let config = FabricConfiguration::default();
        let (mut host, mut directory, self_id) = host_with_units(1);
        let switch_id = NodeIndex::new(7);
        let remote_host = NodeIndex::new(8);
        host.set_uplink(switch_id);
        // Peer units placed elsewhere.
        directory.register_unit(UnitId(10), remote_host, vec![1000.0]);
        host.update(0.0, self_id, &directory, config.scale_factor)
            .unwrap();

        let task = NetworkTask::new(
            TaskId(1),
            0,
            1,
            0,
            0.0,
            vec![
                TaskStage::send(0, 1000.0, UnitId(10), TaskId(20)),
                TaskStage::send(1, 3000.0, UnitId(10), TaskId(20)),
            ],
        );
        host.unit_mut(UnitId(0)).unwrap().scheduler.submit(task, 0.0, 0.0);
        let outcome = host
            .update(0.0, self_id, &directory, config.scale_factor)
            .unwrap();
        assert_eq!(outcome.dispatches.len(), 2);
        // Two packets halve the uplink bandwidth.
        let share = host.uplink_bandwidth() / 2.0;
        let delays = outcome
            .dispatches
            .iter()
            .map(|d| d.delay)
            .collect::<Vec<_>>();
        assert!((delays[0] - 1000.0 / share).abs() < 1e-12);
        assert!((delays[1] - 3000.0 / share).abs() < 1e-12);
        assert!(outcome
            .dispatches
            .iter()
            .all(|d| d.target == switch_id
                && matches!(d.kind, EventKind::PacketToSwitch(_))));
    }

    #[test]
    fn unresolvable_destination_is_a_hard_error() {
        let config = FabricConfiguration::default();
        let (mut host, directory, self_id) = host_with_units(1);
        host.update(0.0, self_id, &directory, config.scale_factor)
            .unwrap();
        let task = NetworkTask::new(
            TaskId(1),
            0,
            1,
            0,
            0.0,
            // Unit 99 is registered nowhere.
            vec![TaskStage::send(0, 100.0, UnitId(99), TaskId(2))],
        );
        host.unit_mut(UnitId(0)).unwrap().scheduler.submit(task, 0.0, 0.0);
        let err = host
            .update(0.0, self_id, &directory, config.scale_factor)
            .unwrap_err();
        assert_eq!(err, Error::DetachedUnit(UnitId(99)));
    }
}
