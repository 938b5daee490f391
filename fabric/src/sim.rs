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

//! The simulation driver: owns the topology, the event queue, the unit
//! directory and the route table, and runs the event loop.

use petgraph::prelude::*;
use std::collections::HashMap;

use crate::config::{FabricConfiguration, UnitConfiguration};
use crate::engine::{Event, EventKind, EventQueue};
use crate::host::ExecutionUnit;
use crate::task::{NetworkTask, TaskId, TaskStatus, UnitId};
use crate::topology::{FabricSpec, RouteTable};
use crate::Error;
use crate::SimTime;

pub struct FabricSimulation {
    spec: FabricSpec,
    engine: EventQueue,
    directory: crate::directory::Directory,
    routes: RouteTable,
    config: FabricConfiguration,
    next_unit: usize,
    next_task: usize,
    /// Which unit each submitted task was bound to.
    task_home: HashMap<TaskId, UnitId>,
}

impl FabricSimulation {
    pub fn new(spec: FabricSpec, config: FabricConfiguration) -> Self {
        let routes = RouteTable::build(&spec);
        let engine = EventQueue::new(config.min_event_quantum);
        Self {
            spec,
            engine,
            directory: crate::directory::Directory::new(),
            routes,
            config,
            next_unit: 0,
            next_task: 0,
            task_home: HashMap::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.engine.now()
    }

    pub fn spec(&self) -> &FabricSpec {
        &self.spec
    }

    pub fn directory(&self) -> &crate::directory::Directory {
        &self.directory
    }

    /// Hand out the next task id.
    pub fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    /// Create an execution unit on `host` and register its placement and
    /// capacity share with the directory.
    pub fn provision_unit(
        &mut self,
        host: NodeIndex,
        config: &UnitConfiguration,
    ) -> Result<UnitId, Error> {
        let id = UnitId(self.next_unit);
        let unit = ExecutionUnit::new(
            id,
            config,
            self.config.min_event_quantum,
            self.config.receive_timeout,
        );
        let share = unit.nominal_share();
        let node = self.spec.get_node(host);
        let mut element = node.borrow_mut();
        let physical = element.as_host_mut().ok_or(Error::InvalidHost(host))?;
        physical.attach_unit(unit);
        self.next_unit += 1;
        self.directory.register_unit(id, host, share);
        log::info!("provisioned {} on {}", id, physical.name());
        Ok(id)
    }

    /// Submit a task to `unit`, charging `file_transfer_time` of input
    /// staging against its compute length.
    ///
    /// Returns the scheduler's finish estimate, `0.0` when the task was
    /// queued behind others.
    pub fn submit(
        &mut self,
        task: NetworkTask,
        unit: UnitId,
        file_transfer_time: SimTime,
    ) -> Result<SimTime, Error> {
        let host = self
            .directory
            .resolve_host(unit)
            .ok_or(Error::DetachedUnit(unit))?;
        let id = task.id;
        let now = self.engine.now();
        let estimate = {
            let node = self.spec.get_node(host);
            let mut element = node.borrow_mut();
            let physical = element.as_host_mut().ok_or(Error::InvalidHost(host))?;
            let unit = physical.unit_mut(unit).ok_or(Error::DetachedUnit(unit))?;
            unit.scheduler.submit(task, file_transfer_time, now)
        };
        self.task_home.insert(id, unit);
        self.engine
            .schedule_at(host, 0.0, EventKind::UpdateProcessing);
        Ok(estimate)
    }

    /// Cancel a task wherever it currently is. Returns the task with its
    /// final state, or `None` for an unknown id.
    pub fn cancel(&mut self, task: TaskId) -> Option<NetworkTask> {
        let (host, unit) = self.locate(task)?;
        let now = self.engine.now();
        let canceled = {
            let node = self.spec.get_node(host);
            let mut element = node.borrow_mut();
            let physical = element.as_host_mut()?;
            physical.unit_mut(unit)?.scheduler.cancel(task, now)
        };
        if canceled.is_some() {
            // Freed PEs may promote a waiting task.
            self.engine
                .schedule_at(host, 0.0, EventKind::UpdateProcessing);
        }
        canceled
    }

    /// Take a task off its processing elements, preserving progress.
    pub fn pause(&mut self, task: TaskId) -> bool {
        let (host, unit) = match self.locate(task) {
            Some(found) => found,
            None => return false,
        };
        let now = self.engine.now();
        let paused = {
            let node = self.spec.get_node(host);
            let mut element = node.borrow_mut();
            match element.as_host_mut().and_then(|p| p.unit_mut(unit)) {
                Some(unit) => unit.scheduler.pause(task, now),
                None => false,
            }
        };
        if paused {
            self.engine
                .schedule_at(host, 0.0, EventKind::UpdateProcessing);
        }
        paused
    }

    /// Put a paused task back, mid-stage. Returns the new finish estimate,
    /// `0.0` when the task went back to the waiting queue.
    pub fn resume(&mut self, task: TaskId) -> SimTime {
        let (host, unit) = match self.locate(task) {
            Some(found) => found,
            None => return 0.0,
        };
        let now = self.engine.now();
        let estimate = {
            let node = self.spec.get_node(host);
            let mut element = node.borrow_mut();
            match element.as_host_mut().and_then(|p| p.unit_mut(unit)) {
                Some(unit) => unit.scheduler.resume(task, now),
                None => 0.0,
            }
        };
        self.engine
            .schedule_at(host, 0.0, EventKind::UpdateProcessing);
        estimate
    }

    pub fn status(&self, task: TaskId) -> TaskStatus {
        let (host, unit) = match self.locate(task) {
            Some(found) => found,
            None => return TaskStatus::Unknown,
        };
        let node = self.spec.get_node(host);
        let element = node.borrow();
        element
            .as_host()
            .and_then(|p| p.unit(unit))
            .map_or(TaskStatus::Unknown, |u| u.scheduler.status(task))
    }

    /// Completion time of a finished task, if it has one.
    pub fn finish_time(&self, task: TaskId) -> Option<SimTime> {
        let (host, unit) = self.locate(task)?;
        let node = self.spec.get_node(host);
        let element = node.borrow();
        element
            .as_host()?
            .unit(unit)?
            .scheduler
            .finished_tasks()
            .iter()
            .find(|t| t.id == task)
            .and_then(|t| t.finish_time)
    }

    fn locate(&self, task: TaskId) -> Option<(NodeIndex, UnitId)> {
        let unit = *self.task_home.get(&task)?;
        let host = self.directory.resolve_host(unit)?;
        Some((host, unit))
    }

    /// Run until the event queue drains.
    pub fn run(&mut self) -> Result<SimTime, Error> {
        self.run_until(f64::INFINITY)
    }

    /// Run events up to and including `deadline`. Later events stay queued.
    pub fn run_until(&mut self, deadline: SimTime) -> Result<SimTime, Error> {
        while let Some(time) = self.engine.peek_time() {
            if time > deadline {
                break;
            }
            let event = match self.engine.pop() {
                Some(event) => event,
                None => break,
            };
            self.handle(event)?;
        }
        Ok(self.engine.now())
    }

    fn handle(&mut self, event: Event) -> Result<(), Error> {
        let now = self.engine.now();
        let node = self
            .spec
            .try_get_node(event.target)
            .ok_or(Error::UnknownEntity(event.target))?;
        match event.kind {
            EventKind::UpdateProcessing => {
                let outcome = {
                    let mut element = node.borrow_mut();
                    let physical = element
                        .as_host_mut()
                        .ok_or(Error::InvalidHost(event.target))?;
                    physical.update(now, event.target, &self.directory, self.config.scale_factor)?
                };
                for dispatch in outcome.dispatches {
                    self.engine
                        .schedule_at(dispatch.target, dispatch.delay, dispatch.kind);
                }
                if outcome.next_wake > 0.0 {
                    // Only the freshest wake for a node is meaningful.
                    self.engine.cancel_matching(event.target, |kind| {
                        matches!(kind, EventKind::UpdateProcessing)
                    });
                    let delay = (outcome.next_wake - now).max(0.0);
                    self.engine
                        .schedule_at(event.target, delay, EventKind::UpdateProcessing);
                }
            }
            EventKind::PacketToSwitch(packet) => {
                let dispatch = {
                    let mut element = node.borrow_mut();
                    let switch = element
                        .as_switch_mut()
                        .ok_or(Error::InvalidSwitch(event.target))?;
                    switch.receive_upward(packet, event.target, &self.directory, &self.routes)?
                };
                self.engine
                    .schedule_at(dispatch.target, dispatch.delay, dispatch.kind);
            }
            EventKind::SwitchFlush { token } => {
                let dispatches = {
                    let mut element = node.borrow_mut();
                    let switch = element
                        .as_switch_mut()
                        .ok_or(Error::InvalidSwitch(event.target))?;
                    switch.flush(token, self.config.scale_factor)
                };
                for dispatch in dispatches {
                    self.engine
                        .schedule_at(dispatch.target, dispatch.delay, dispatch.kind);
                }
            }
            EventKind::PacketToHost(packet) => {
                {
                    let mut element = node.borrow_mut();
                    let physical = element
                        .as_host_mut()
                        .ok_or(Error::InvalidHost(event.target))?;
                    physical.enqueue_inbound(packet);
                }
                self.engine
                    .schedule_at(event.target, 0.0, EventKind::UpdateProcessing);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostConfiguration, SwitchConfiguration};
    use crate::task::TaskStage;
    use crate::topology::tree::single_edge;

    fn compute_only(sim: &mut FabricSimulation, duration: f64) -> NetworkTask {
        // Default units run one PE at capacity 1000.
        NetworkTask::new(
            sim.allocate_task_id(),
            0,
            1,
            1 << 20,
            duration * 1000.0,
            vec![TaskStage::compute(0, duration), TaskStage::terminal(1)],
        )
    }

    #[test]
    fn compute_task_runs_to_completion() {
        let (spec, hosts) = single_edge(
            1,
            &HostConfiguration::default(),
            &SwitchConfiguration::default(),
        );
        let mut sim = FabricSimulation::new(spec, FabricConfiguration::default());
        let unit = sim
            .provision_unit(hosts[0], &UnitConfiguration::default())
            .unwrap();
        let task = compute_only(&mut sim, 2.0);
        let id = task.id;
        let estimate = sim.submit(task, unit, 0.0).unwrap();
        // 2000 compute units on a 1000-capacity PE.
        assert!((estimate - 2.0).abs() < 1e-9);
        sim.run().unwrap();
        assert_eq!(sim.status(id), TaskStatus::Finished);
        assert!((sim.finish_time(id).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_ids_are_soft_errors() {
        let (spec, _hosts) = single_edge(
            1,
            &HostConfiguration::default(),
            &SwitchConfiguration::default(),
        );
        let mut sim = FabricSimulation::new(spec, FabricConfiguration::default());
        assert_eq!(sim.status(TaskId(7)), TaskStatus::Unknown);
        assert!(sim.cancel(TaskId(7)).is_none());
        assert!(!sim.pause(TaskId(7)));
        assert_eq!(sim.resume(TaskId(7)), 0.0);
    }

    #[test]
    fn provisioning_needs_a_host() {
        let (spec, _hosts) = single_edge(
            1,
            &HostConfiguration::default(),
            &SwitchConfiguration::default(),
        );
        let switch = spec.switches()[0];
        let mut sim = FabricSimulation::new(spec, FabricConfiguration::default());
        let err = sim
            .provision_unit(switch, &UnitConfiguration::default())
            .unwrap_err();
        assert_eq!(err, Error::InvalidHost(switch));
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let (spec, hosts) = single_edge(
            1,
            &HostConfiguration::default(),
            &SwitchConfiguration::default(),
        );
        let mut sim = FabricSimulation::new(spec, FabricConfiguration::default());
        let unit = sim
            .provision_unit(hosts[0], &UnitConfiguration::default())
            .unwrap();
        let task = compute_only(&mut sim, 4.0);
        let id = task.id;
        sim.submit(task, unit, 0.0).unwrap();
        sim.run_until(1.0).unwrap();
        assert!(sim.pause(id));
        assert_eq!(sim.status(id), TaskStatus::Paused);
        let estimate = sim.resume(id);
        assert!(estimate > 0.0);
        sim.run().unwrap();
        assert_eq!(sim.status(id), TaskStatus::Finished);
    }
}
