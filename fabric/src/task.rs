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

//! Tasks and their stage lists.
//!
//! A task alternates between local computation and message exchange with
//! peer tasks. Its behavior is fully described by an ordered list of
//! [TaskStage]s which is immutable once assigned; execution state is a
//! cursor over that list plus timing bookkeeping.

use std::fmt::{Display, Formatter};

use crate::SimTime;

/// Stable identifier of a task, handed out by the simulation driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "task-{}", self.0)
    }
}

/// Stable identifier of an execution unit (a virtual slice of compute
/// capacity hosted on a physical node).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub usize);

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "unit-{}", self.0)
    }
}

/// The kind of one phase of a task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageKind {
    /// Local computation; `demand` is the stage duration in simulation time.
    Compute,
    /// Emit a packet to the peer; `demand` is the payload size in bytes.
    /// Sending never blocks.
    Send,
    /// Wait for a packet from the peer; `demand` is the expected payload
    /// size in bytes. Blocks until a matching packet arrives.
    Receive,
    /// End marker; the cursor moves straight to `Finished`.
    Terminal,
}

/// One phase of a task's execution.
#[derive(Clone, Debug)]
pub struct TaskStage {
    pub kind: StageKind,
    /// Compute duration or payload bytes, depending on `kind`.
    pub demand: f64,
    /// Position in the owning task's stage list.
    pub sequence: usize,
    /// Counterpart execution unit for Send/Receive stages.
    pub peer_unit: Option<UnitId>,
    /// Counterpart task for Send/Receive stages.
    pub peer_task: Option<TaskId>,
}

impl TaskStage {
    pub fn compute(sequence: usize, duration: SimTime) -> Self {
        Self {
            kind: StageKind::Compute,
            demand: duration,
            sequence,
            peer_unit: None,
            peer_task: None,
        }
    }

    pub fn send(sequence: usize, bytes: f64, peer_unit: UnitId, peer_task: TaskId) -> Self {
        Self {
            kind: StageKind::Send,
            demand: bytes,
            sequence,
            peer_unit: Some(peer_unit),
            peer_task: Some(peer_task),
        }
    }

    pub fn receive(sequence: usize, bytes: f64, peer_unit: UnitId, peer_task: TaskId) -> Self {
        Self {
            kind: StageKind::Receive,
            demand: bytes,
            sequence,
            peer_unit: Some(peer_unit),
            peer_task: Some(peer_task),
        }
    }

    pub fn terminal(sequence: usize) -> Self {
        Self {
            kind: StageKind::Terminal,
            demand: 0.0,
            sequence,
            peer_unit: None,
            peer_task: None,
        }
    }
}

/// Progress of a task through its stage list. The cursor never regresses
/// except on an explicit [NetworkTask::reset].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageCursor {
    Unstarted,
    Index(usize),
    Finished,
}

/// Externally observable task state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TaskStatus {
    Waiting,
    Executing,
    Paused,
    Finished,
    Canceled,
    Unknown,
}

/// A schedulable unit: an ordered stage list plus execution state.
#[derive(Clone, Debug)]
pub struct NetworkTask {
    pub id: TaskId,
    /// The requesting actor (broker/service layer identity).
    pub owner_id: usize,
    /// Execution unit the task is bound to; `None` until placement.
    pub bound_unit: Option<UnitId>,
    stages: Vec<TaskStage>,
    pub cursor: StageCursor,
    pub status: TaskStatus,
    pub memory_footprint: usize,
    pub required_pes: usize,
    /// Outstanding compute demand, in compute units. Reaches zero exactly
    /// when the task finishes naturally.
    pub remaining_compute_length: f64,
    pub submit_time: SimTime,
    pub stage_start_time: SimTime,
    pub elapsed_in_stage: SimTime,
    pub finish_time: Option<SimTime>,
}

impl NetworkTask {
    pub fn new(
        id: TaskId,
        owner_id: usize,
        required_pes: usize,
        memory_footprint: usize,
        compute_length: f64,
        stages: Vec<TaskStage>,
    ) -> Self {
        debug_assert!(stages
            .iter()
            .enumerate()
            .all(|(i, stage)| stage.sequence == i));
        Self {
            id,
            owner_id,
            bound_unit: None,
            stages,
            cursor: StageCursor::Unstarted,
            status: TaskStatus::Unknown,
            memory_footprint,
            required_pes,
            remaining_compute_length: compute_length,
            submit_time: 0.0,
            stage_start_time: 0.0,
            elapsed_in_stage: 0.0,
            finish_time: None,
        }
    }

    pub fn stages(&self) -> &[TaskStage] {
        &self.stages
    }

    /// The stage under the cursor, if the task is mid-list.
    pub fn current_stage(&self) -> Option<&TaskStage> {
        match self.cursor {
            StageCursor::Index(i) => self.stages.get(i),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == StageCursor::Finished
    }

    /// Clear the stage list and cursor so the owner can reuse the task
    /// object for a new submission.
    pub fn reset(&mut self) {
        self.stages.clear();
        self.cursor = StageCursor::Unstarted;
        self.status = TaskStatus::Unknown;
        self.remaining_compute_length = 0.0;
        self.stage_start_time = 0.0;
        self.elapsed_in_stage = 0.0;
        self.finish_time = None;
    }

    pub fn assign_stages(&mut self, stages: Vec<TaskStage>, compute_length: f64) {
        assert!(
            self.stages.is_empty(),
            "A task's stage list is immutable once assigned; reset first."
        );
        self.stages = stages;
        self.remaining_compute_length = compute_length;
    }
}
