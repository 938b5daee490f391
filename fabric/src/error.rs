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
use std::fmt;

use crate::task::UnitId;

/// Structural failures of the fabric.
///
/// Recoverable conditions (a task queued for lack of capacity, an unknown
/// task id handed to `cancel`) are communicated through return values and
/// never through this type. Only invariant violations that leave a packet
/// or a tick with no correct continuation surface as errors.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// No next hop exists from the given switch toward the destination unit.
    RoutingDeadEnd(NodeIndex, UnitId),
    /// An execution unit has no recorded host placement.
    DetachedUnit(UnitId),
    /// A scheduler was asked to advance with tasks executing but no
    /// processing elements allocated.
    ZeroCapacity(UnitId),
    /// An event targeted a graph index with no element behind it.
    UnknownEntity(NodeIndex),
    InvalidHost(NodeIndex),
    InvalidSwitch(NodeIndex),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RoutingDeadEnd(switch, unit) => {
                write!(
                    f,
                    "ERROR: no route from switch {} toward unit {}",
                    switch.index(),
                    unit
                )
            }
            Self::ZeroCapacity(unit) => {
                write!(
                    f,
                    "ERROR: unit {} has executing tasks but zero allocated PEs",
                    unit
                )
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

// Allows `anyhow::Result` to absorb our errors at the configuration and
// driver boundaries.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
