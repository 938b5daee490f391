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

use petgraph::prelude::*;

use crate::task::{TaskId, UnitId};
use crate::SimTime;

/// An in-flight message between two tasks.
///
/// A packet is owned by exactly one queue at a time: the producing unit's
/// outbox, then the node's local-or-uplink classification, then (for remote
/// deliveries) one switch queue per hop, then the receiving unit's inbox.
/// Moves between queues transfer ownership; a packet is never duplicated.
#[derive(Clone, Debug)]
pub struct Packet {
    pub sender_task: TaskId,
    pub receiver_task: TaskId,
    pub sender_unit: UnitId,
    pub receiver_unit: UnitId,
    pub payload_bytes: f64,
    pub send_time: SimTime,
    /// Unset until the packet lands in the receiver's inbox.
    pub receive_time: Option<SimTime>,
    /// Physical endpoints, set only once routing resolves the destination
    /// to a different node than the origin.
    pub origin_node: Option<NodeIndex>,
    pub dest_node: Option<NodeIndex>,
}

impl Packet {
    pub fn new(
        sender_task: TaskId,
        receiver_task: TaskId,
        sender_unit: UnitId,
        receiver_unit: UnitId,
        payload_bytes: f64,
        send_time: SimTime,
    ) -> Self {
        Self {
            sender_task,
            receiver_task,
            sender_unit,
            receiver_unit,
            payload_bytes,
            send_time,
            receive_time: None,
            origin_node: None,
            dest_node: None,
        }
    }
}
