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

mod directory;
mod engine;
mod error;
mod host;
mod packet;
mod scheduler;
mod sim;
mod switch;
mod task;

pub mod config;
pub mod topology;

// Public types
// type to use for simulation timestamps (seconds)
pub type SimTime = f64;

pub use crate::config::{
    Config, FabricConfiguration, HostConfiguration, SwitchConfiguration, UnitConfiguration,
};
pub use crate::directory::{random_placement, Directory};
pub use crate::engine::{Dispatch, Event, EventKind, EventQueue, MIN_EVENT_QUANTUM};
pub use crate::error::Error;
pub use crate::host::{ExecutionUnit, PhysicalNode, UpdateOutcome};
pub use crate::packet::Packet;
pub use crate::scheduler::StageScheduler;
pub use crate::sim::FabricSimulation;
pub use crate::switch::{SwitchLevel, SwitchNode};
pub use crate::task::{
    NetworkTask, StageCursor, StageKind, TaskId, TaskStage, TaskStatus, UnitId,
};
pub use crate::topology::tree::{single_edge, three_tier};
pub use crate::topology::{Element, FabricLink, FabricSpec, RouteTable};
pub use petgraph::graph::NodeIndex;
