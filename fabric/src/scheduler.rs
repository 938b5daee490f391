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

//! Per-execution-unit stage scheduler.
//!
//! The scheduler owns admission control (which tasks occupy processing
//! elements now), drives each admitted task's stage state machine, and
//! keeps the per-peer receive buffers. It is single-owner state: the
//! hosting node calls [StageScheduler::advance] to completion on every
//! tick, so no entry point ever observes concurrent mutation.
//!
//! Task state machine:
//!
//!```text
//!   Unstarted -> Stage(0) -> ... -> Stage(n-1) -> Finished
//!                    |  ^
//!             pause  v  | resume
//!                  Paused          (Canceled is a side-exit from any stage)
//!```

use std::collections::{HashMap, VecDeque};

use crate::packet::Packet;
use crate::task::{NetworkTask, StageCursor, StageKind, TaskId, TaskStatus, UnitId};
use crate::Error;
use crate::SimTime;

// Tolerance when comparing a compute deadline against the clock; event
// timestamps go through enough float arithmetic that an exact >= misses
// deadlines by one ulp.
const TIME_EPSILON: f64 = 1e-9;

/// Scheduler for the tasks bound to one execution unit.
pub struct StageScheduler {
    unit: UnitId,
    /// Sum of the capacity-share vector, recomputed each tick.
    total_capacity: f64,
    /// Count of non-zero entries in the capacity-share vector.
    total_pes: usize,
    used_pes: usize,
    waiting: VecDeque<NetworkTask>,
    executing: Vec<NetworkTask>,
    paused: Vec<NetworkTask>,
    finished: Vec<NetworkTask>,
    /// Receive buffers, keyed by the sending peer's execution unit.
    inbox: HashMap<UnitId, VecDeque<Packet>>,
    /// Packets produced by Send stages this tick, keyed by this unit.
    outbox: HashMap<UnitId, Vec<Packet>>,
    min_quantum: SimTime,
    receive_timeout: Option<SimTime>,
}

impl StageScheduler {
    pub fn new(unit: UnitId, min_quantum: SimTime, receive_timeout: Option<SimTime>) -> Self {
        Self {
            unit,
            total_capacity: 0.0,
            total_pes: 0,
            used_pes: 0,
            waiting: VecDeque::new(),
            executing: Vec::new(),
            paused: Vec::new(),
            finished: Vec::new(),
            inbox: HashMap::new(),
            outbox: HashMap::new(),
            min_quantum,
            receive_timeout,
        }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn used_pes(&self) -> usize {
        self.used_pes
    }

    pub fn total_pes(&self) -> usize {
        self.total_pes
    }

    pub fn executing_count(&self) -> usize {
        self.executing.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    /// Tasks in terminal state, in completion order.
    pub fn finished_tasks(&self) -> &[NetworkTask] {
        &self.finished
    }

    /// Seed the capacity view before the first `advance`, so submission
    /// estimates are meaningful from time zero.
    pub fn set_capacity(&mut self, capacity_share: &[f64]) {
        self.refresh_capacity(capacity_share);
    }

    fn refresh_capacity(&mut self, capacity_share: &[f64]) {
        self.total_pes = capacity_share.iter().filter(|c| **c > 0.0).count();
        self.total_capacity = capacity_share.iter().sum();
    }

    fn capacity_per_pe(&self) -> f64 {
        if self.total_pes == 0 {
            0.0
        } else {
            self.total_capacity / self.total_pes as f64
        }
    }

    /// Submit a task for execution, with a one-time input-transfer penalty.
    ///
    /// Returns the expected finish interval under the current capacity, or
    /// `0.0` when the task was queued instead of admitted (insufficient
    /// free PEs, or capacity not yet known). Queueing is not an error; the
    /// caller observes progress through [StageScheduler::status].
    pub fn submit(
        &mut self,
        mut task: NetworkTask,
        file_transfer_time: SimTime,
        now: SimTime,
    ) -> SimTime {
        task.submit_time = now;
        task.bound_unit = Some(self.unit);
        if self.total_pes == 0 || self.total_pes - self.used_pes < task.required_pes {
            log::debug!(
                "{}: queueing {} (required {} PEs, {} of {} free)",
                self.unit,
                task.id,
                task.required_pes,
                self.total_pes.saturating_sub(self.used_pes),
                self.total_pes
            );
            task.status = TaskStatus::Waiting;
            self.waiting.push_back(task);
            return 0.0;
        }
        let capacity = self.capacity_per_pe();
        task.status = TaskStatus::Executing;
        task.remaining_compute_length += file_transfer_time * capacity;
        self.used_pes += task.required_pes;
        let estimate = task.remaining_compute_length / capacity;
        log::debug!(
            "{}: admitted {} ({} PEs, estimate {:.4})",
            self.unit,
            task.id,
            task.required_pes,
            estimate
        );
        self.executing.push(task);
        estimate
    }

    /// Drive every executing task as far as the current time allows.
    ///
    /// Returns the next wake time (a compute deadline or timeout, clamped
    /// at least one event quantum past `now`), or `0.0` when the unit is
    /// idle or every remaining task is blocked on a packet arrival.
    pub fn advance(&mut self, now: SimTime, capacity_share: &[f64]) -> Result<SimTime, Error> {
        self.refresh_capacity(capacity_share);
        if self.total_pes == 0 {
            if self.executing.is_empty() {
                return Ok(0.0);
            }
            log::error!("{}: executing tasks with zero allocated PEs", self.unit);
            return Err(Error::ZeroCapacity(self.unit));
        }
        let capacity = self.capacity_per_pe();
        let mut candidate: Option<SimTime> = None;

        let unit = self.unit;
        let timeout = self.receive_timeout;
        let inbox = &mut self.inbox;
        let outbox = &mut self.outbox;
        for task in self.executing.iter_mut() {
            step_task(unit, task, now, capacity, inbox, outbox, timeout, &mut candidate);
        }

        // Retire terminal tasks and release their PEs.
        let mut idx = 0;
        while idx < self.executing.len() {
            match self.executing[idx].status {
                TaskStatus::Finished | TaskStatus::Canceled => {
                    let task = self.executing.remove(idx);
                    self.used_pes -= task.required_pes;
                    log::debug!("{}: {} retired as {:?}", self.unit, task.id, task.status);
                    self.finished.push(task);
                }
                _ => idx += 1,
            }
        }

        // Promote waiting tasks, FIFO, into whatever capacity freed up.
        let mut promoted = false;
        loop {
            let free = self.total_pes - self.used_pes;
            let slot = self
                .waiting
                .iter()
                .position(|task| task.required_pes <= free);
            match slot {
                Some(pos) => {
                    let mut task = self.waiting.remove(pos).unwrap();
                    task.status = TaskStatus::Executing;
                    self.used_pes += task.required_pes;
                    log::debug!("{}: promoted {} from waiting", self.unit, task.id);
                    self.executing.push(task);
                    promoted = true;
                }
                None => break,
            }
        }
        if promoted {
            // Freshly promoted tasks start their first stage on the next
            // advance call; make sure one happens promptly.
            candidate = Some(candidate.map_or(now, |c| c.min(now)));
        }

        if self.executing.is_empty() && self.waiting.is_empty() {
            return Ok(0.0);
        }
        Ok(candidate.map_or(0.0, |c| c.max(now + self.min_quantum)))
    }

    /// Deliver a packet into the receive buffer for its sending unit.
    pub fn deposit(&mut self, packet: Packet) {
        log::trace!(
            "{}: inbox packet {} -> {} ({} bytes)",
            self.unit,
            packet.sender_task,
            packet.receiver_task,
            packet.payload_bytes
        );
        self.inbox
            .entry(packet.sender_unit)
            .or_insert_with(VecDeque::new)
            .push_back(packet);
    }

    /// Drain every packet produced by Send stages since the last call.
    pub fn take_outbound(&mut self) -> Vec<Packet> {
        self.outbox.drain().flat_map(|(_, queue)| queue).collect()
    }

    /// Remove a task, searching finished, executing, paused, then waiting.
    ///
    /// An executing task whose remaining compute length is exactly zero is
    /// finalized as completed rather than canceled, so canceling a task
    /// that already ran to completion is indistinguishable from letting it
    /// finish. Unknown ids are a no-op (`None`).
    pub fn cancel(&mut self, id: TaskId, now: SimTime) -> Option<NetworkTask> {
        if let Some(pos) = self.finished.iter().position(|t| t.id == id) {
            return Some(self.finished.remove(pos));
        }
        if let Some(pos) = self.executing.iter().position(|t| t.id == id) {
            let mut task = self.executing.remove(pos);
            self.used_pes -= task.required_pes;
            if task.remaining_compute_length == 0.0 {
                task.status = TaskStatus::Finished;
                task.cursor = StageCursor::Finished;
                if task.finish_time.is_none() {
                    task.finish_time = Some(now);
                }
            } else {
                task.status = TaskStatus::Canceled;
                task.finish_time = Some(now);
            }
            return Some(task);
        }
        if let Some(pos) = self.paused.iter().position(|t| t.id == id) {
            let mut task = self.paused.remove(pos);
            task.status = TaskStatus::Canceled;
            task.finish_time = Some(now);
            return Some(task);
        }
        if let Some(pos) = self.waiting.iter().position(|t| t.id == id) {
            let mut task = self.waiting.remove(pos).unwrap();
            task.status = TaskStatus::Canceled;
            task.finish_time = Some(now);
            return Some(task);
        }
        None
    }

    /// Move an executing or waiting task into the paused set. In-stage
    /// compute progress is recorded so resume continues where the stage
    /// left off.
    pub fn pause(&mut self, id: TaskId, now: SimTime) -> bool {
        if let Some(pos) = self.executing.iter().position(|t| t.id == id) {
            let mut task = self.executing.remove(pos);
            self.used_pes -= task.required_pes;
            if let Some(stage) = task.current_stage() {
                if stage.kind == StageKind::Compute {
                    task.elapsed_in_stage = now - task.stage_start_time;
                }
            }
            task.status = TaskStatus::Paused;
            self.paused.push(task);
            return true;
        }
        if let Some(pos) = self.waiting.iter().position(|t| t.id == id) {
            let mut task = self.waiting.remove(pos).unwrap();
            task.status = TaskStatus::Paused;
            self.paused.push(task);
            return true;
        }
        false
    }

    /// Re-admit a paused task through the same capacity check as `submit`.
    ///
    /// Returns the expected remaining run time under current capacity, or
    /// `0.0` if the task went to the waiting queue (or the id is unknown).
    pub fn resume(&mut self, id: TaskId, now: SimTime) -> SimTime {
        let pos = match self.paused.iter().position(|t| t.id == id) {
            Some(pos) => pos,
            None => return 0.0,
        };
        let mut task = self.paused.remove(pos);
        if self.total_pes == 0 || self.total_pes - self.used_pes < task.required_pes {
            task.status = TaskStatus::Waiting;
            self.waiting.push_back(task);
            return 0.0;
        }
        task.status = TaskStatus::Executing;
        // Restore the interrupted stage's elapsed time.
        task.stage_start_time = now - task.elapsed_in_stage;
        self.used_pes += task.required_pes;
        let estimate = task.remaining_compute_length / self.capacity_per_pe();
        self.executing.push(task);
        estimate
    }

    pub fn status(&self, id: TaskId) -> TaskStatus {
        self.executing
            .iter()
            .chain(self.waiting.iter())
            .chain(self.paused.iter())
            .chain(self.finished.iter())
            .find(|t| t.id == id)
            .map_or(TaskStatus::Unknown, |t| t.status)
    }

    /// True if any task could still make progress or produce packets.
    pub fn has_work(&self) -> bool {
        !self.executing.is_empty() || !self.waiting.is_empty()
    }
}

/// Advance one task as far as the clock permits.
///
/// Consecutive instantaneous stages drain in a single call: a completed
/// Compute stage followed by Sends emits all of those packets now, stopping
/// only at the next Compute (timer restarted) or Receive (blocked until a
/// matching packet is buffered) or at the end of the stage list.
#[allow(clippy::too_many_arguments)]
fn step_task(
    unit: UnitId,
    task: &mut NetworkTask,
    now: SimTime,
    capacity: f64,
    inbox: &mut HashMap<UnitId, VecDeque<Packet>>,
    outbox: &mut HashMap<UnitId, Vec<Packet>>,
    receive_timeout: Option<SimTime>,
    candidate: &mut Option<SimTime>,
) {
    let push_candidate = |time: SimTime, candidate: &mut Option<SimTime>| {
        *candidate = Some(candidate.map_or(time, |c: SimTime| c.min(time)));
    };
    if task.cursor == StageCursor::Unstarted {
        task.cursor = StageCursor::Index(0);
        task.stage_start_time = now;
    }
    loop {
        let index = match task.cursor {
            StageCursor::Index(i) => i,
            StageCursor::Finished => return,
            StageCursor::Unstarted => unreachable!(),
        };
        if index >= task.stages().len() {
            finalize(task, now);
            return;
        }
        let stage = task.stages()[index].clone();
        match stage.kind {
            StageKind::Compute => {
                let elapsed = now - task.stage_start_time;
                if elapsed + TIME_EPSILON >= stage.demand {
                    task.elapsed_in_stage = elapsed;
                    task.remaining_compute_length =
                        (task.remaining_compute_length - stage.demand * capacity).max(0.0);
                    log::trace!("{}: {} compute stage {} done", unit, task.id, index);
                    bump_cursor(task, now);
                } else {
                    push_candidate(task.stage_start_time + stage.demand, candidate);
                    return;
                }
            }
            StageKind::Send => {
                let packet = Packet::new(
                    task.id,
                    stage.peer_task.expect("Send stage without a peer task"),
                    unit,
                    stage.peer_unit.expect("Send stage without a peer unit"),
                    stage.demand,
                    now,
                );
                log::trace!(
                    "{}: {} stage {} sends {} bytes to {}",
                    unit,
                    task.id,
                    index,
                    stage.demand,
                    packet.receiver_unit
                );
                outbox.entry(unit).or_insert_with(Vec::new).push(packet);
                bump_cursor(task, now);
            }
            StageKind::Receive => {
                let peer_unit = stage.peer_unit.expect("Receive stage without a peer unit");
                let peer_task = stage.peer_task.expect("Receive stage without a peer task");
                let matched = inbox.get_mut(&peer_unit).and_then(|queue| {
                    queue
                        .iter()
                        .position(|p| p.sender_task == peer_task)
                        .and_then(|pos| queue.remove(pos))
                });
                match matched {
                    Some(packet) => {
                        // The stage's actual duration is the full transit
                        // time of the packet it consumed.
                        task.elapsed_in_stage = now - packet.send_time;
                        log::trace!(
                            "{}: {} stage {} received {} bytes from {}",
                            unit,
                            task.id,
                            index,
                            packet.payload_bytes,
                            packet.sender_unit
                        );
                        bump_cursor(task, now);
                    }
                    None => {
                        // Blocked. No timer in the base model; the task is
                        // woken by a future packet delivery.
                        if let Some(limit) = receive_timeout {
                            if now - task.stage_start_time + TIME_EPSILON >= limit {
                                log::debug!(
                                    "{}: {} receive stage {} timed out",
                                    unit,
                                    task.id,
                                    index
                                );
                                task.status = TaskStatus::Canceled;
                                task.finish_time = Some(now);
                            } else {
                                push_candidate(task.stage_start_time + limit, candidate);
                            }
                        }
                        return;
                    }
                }
            }
            StageKind::Terminal => {
                finalize(task, now);
                return;
            }
        }
    }
}

fn bump_cursor(task: &mut NetworkTask, now: SimTime) {
    if let StageCursor::Index(i) = task.cursor {
        if i + 1 >= task.stages().len() {
            finalize(task, now);
        } else {
            task.cursor = StageCursor::Index(i + 1);
            task.stage_start_time = now;
        }
    }
}

fn finalize(task: &mut NetworkTask, now: SimTime) {
    task.cursor = StageCursor::Finished;
    task.status = TaskStatus::Finished;
    task.remaining_compute_length = 0.0;
    task.finish_time = Some(now);
}
