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

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::engine::MIN_EVENT_QUANTUM;
use crate::SimTime;

/// A default host uplink bandwidth, in bytes per simulation-time unit.
pub const UPLINK_BANDWIDTH: f64 = 100_000_000.0;

/// A default switch port bandwidth.
pub const SWITCH_BANDWIDTH: f64 = 100_000_000.0;

/// A default switching (store-and-forward) delay.
pub const SWITCHING_DELAY: SimTime = 0.00157;

/// Parameters for one execution unit hosted on a physical node.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnitConfiguration {
    /// Number of processing elements.
    pub pe_count: usize,
    /// Capacity allocated to each PE, in compute units per time unit.
    pub capacity_per_pe: f64,
    /// Memory available to hosted tasks, in bytes.
    pub memory: usize,
}

impl Default for UnitConfiguration {
    fn default() -> Self {
        Self {
            pe_count: 1,
            capacity_per_pe: 1000.0,
            memory: 1 << 30,
        }
    }
}

/// Parameters for a physical node.
///
/// Constructed programmatically or read from a config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HostConfiguration {
    /// Bandwidth of the node's single uplink attachment, shared evenly by
    /// all remote packets dispatched in one tick.
    pub uplink_bandwidth: f64,
    pub units: Vec<UnitConfiguration>,
}

impl Default for HostConfiguration {
    fn default() -> Self {
        Self {
            uplink_bandwidth: UPLINK_BANDWIDTH,
            units: Vec::new(),
        }
    }
}

/// Parameters for a switch, at any level of the hierarchy.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SwitchConfiguration {
    pub switching_delay: SimTime,
    /// Bandwidth of each link toward attached children.
    pub downlink_bandwidth: f64,
    /// Bandwidth of each link toward uplink neighbors.
    pub uplink_bandwidth: f64,
}

impl Default for SwitchConfiguration {
    fn default() -> Self {
        Self {
            switching_delay: SWITCHING_DELAY,
            downlink_bandwidth: SWITCH_BANDWIDTH,
            uplink_bandwidth: SWITCH_BANDWIDTH,
        }
    }
}

/// Simulation-wide knobs.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FabricConfiguration {
    /// Multiplier applied to every bandwidth share when computing transfer
    /// delays.
    pub scale_factor: f64,
    /// Floor for near-zero positive event delays.
    pub min_event_quantum: SimTime,
    /// Optional limit on how long a Receive stage may block. `None`
    /// preserves the base model: a missing peer send stalls the task
    /// forever. When set, a task blocked past the limit is finalized as
    /// canceled.
    pub receive_timeout: Option<SimTime>,
}

impl Default for FabricConfiguration {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            min_event_quantum: MIN_EVENT_QUANTUM,
            receive_timeout: None,
        }
    }
}

/// A full fabric description: global knobs plus per-element configurations,
/// in the order the topology builder consumes them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub fabric: FabricConfiguration,
    pub hosts: Vec<HostConfiguration>,
    pub switches: Vec<SwitchConfiguration>,
}

impl Config {
    pub fn from_file(file_name: &str) -> anyhow::Result<Self> {
        let file = File::open(Path::new(file_name))
            .with_context(|| format!("config file {} not found", file_name))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("failed to parse config {}", file_name))
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(config).context("failed to parse config string")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_yaml_config() {
        let conf_str = "---
fabric:
  scale_factor: 1.0
  min_event_quantum: 0.01
  receive_timeout: ~
hosts:
  - uplink_bandwidth: 10000.0
    units:
      - pe_count: 2
        capacity_per_pe: 1000.0
        memory: 1024
      - pe_count: 1
        capacity_per_pe: 500.0
        memory: 2048
  - uplink_bandwidth: 20000.0
    units:
      - pe_count: 4
        capacity_per_pe: 250.0
        memory: 4096
switches:
  - switching_delay: 0.002
    downlink_bandwidth: 10000.0
    uplink_bandwidth: 40000.0
";
        let config = Config::from_str(conf_str).unwrap();
        assert_eq!(config.fabric.scale_factor, 1.0);
        assert_eq!(config.fabric.receive_timeout, None);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].uplink_bandwidth, 10000.0);
        assert_eq!(config.hosts[0].units.len(), 2);
        assert_eq!(config.hosts[0].units[0].pe_count, 2);
        assert_eq!(config.hosts[0].units[1].capacity_per_pe, 500.0);
        assert_eq!(config.hosts[1].units[0].memory, 4096);
        assert_eq!(config.switches.len(), 1);
        assert_eq!(config.switches[0].switching_delay, 0.002);
        assert_eq!(config.switches[0].uplink_bandwidth, 40000.0);
    }

    #[test]
    fn write_yaml_config() {
        let mut host = HostConfiguration::default();
        host.units.push(UnitConfiguration::default());
        let config = Config {
            fabric: FabricConfiguration::default(),
            hosts: vec![host],
            switches: vec![SwitchConfiguration::default()],
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_str(&yaml).unwrap();
        assert_eq!(parsed.hosts.len(), 1);
        assert_eq!(parsed.hosts[0].units[0].pe_count, 1);
    }
}
