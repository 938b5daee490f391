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

//! End-to-end scenarios driving the full stack: tasks on execution units,
//! packet exchange through hosts and switches, admission control.

use fabric::{
    single_edge, FabricConfiguration, FabricSimulation, HostConfiguration, NetworkTask,
    SwitchConfiguration, TaskId, TaskStage, TaskStatus, UnitConfiguration,
};

fn sim_with_hosts(host_count: usize, uplink_bandwidth: f64) -> FabricSimulation {
    let _ = env_logger::builder().is_test(true).try_init();
    let host_config = HostConfiguration {
        uplink_bandwidth,
        units: Vec::new(),
    };
    let (spec, _hosts) = single_edge(host_count, &host_config, &SwitchConfiguration::default());
    FabricSimulation::new(spec, FabricConfiguration::default())
}

#[test]
fn same_host_ping_pong_completes_in_one_tick() {
    let mut sim = sim_with_hosts(1, 10_000.0);
    let host = sim.spec().hosts()[0];
    let unit_a = sim.provision_unit(host, &UnitConfiguration::default()).unwrap();
    let unit_b = sim.provision_unit(host, &UnitConfiguration::default()).unwrap();

    // A computes one second, pings B, waits for the pong; B mirrors it.
    let a = NetworkTask::new(
        TaskId(1),
        0,
        1,
        1 << 20,
        1000.0,
        vec![
            TaskStage::compute(0, 1.0),
            TaskStage::send(1, 100.0, unit_b, TaskId(2)),
            TaskStage::receive(2, 100.0, unit_b, TaskId(2)),
            TaskStage::terminal(3),
        ],
    );
    let b = NetworkTask::new(
        TaskId(2),
        0,
        1,
        1 << 20,
        0.0,
        vec![
            TaskStage::receive(0, 100.0, unit_a, TaskId(1)),
            TaskStage::send(1, 100.0, unit_a, TaskId(1)),
            TaskStage::terminal(2),
        ],
    );
    sim.submit(a, unit_a, 0.0).unwrap();
    sim.submit(b, unit_b, 0.0).unwrap();
    sim.run().unwrap();

    assert_eq!(sim.status(TaskId(1)), TaskStatus::Finished);
    assert_eq!(sim.status(TaskId(2)), TaskStatus::Finished);
    // Sibling units exchange packets with zero network delay, so the whole
    // ping-pong resolves the moment A's compute stage ends.
    let finish_a = sim.finish_time(TaskId(1)).unwrap();
    let finish_b = sim.finish_time(TaskId(2)).unwrap();
    assert!((finish_a - 1.0).abs() < 1e-9, "finish_a = {}", finish_a);
    assert_eq!(finish_a, finish_b);
}

#[test]
fn cross_host_transfer_pays_for_the_uplink() {
    // 1000-byte payload over a 10000-wide uplink costs at least 0.1.
    let mut sim = sim_with_hosts(2, 10_000.0);
    let hosts = sim.spec().hosts();
    let unit_a = sim
        .provision_unit(hosts[0], &UnitConfiguration::default())
        .unwrap();
    let unit_b = sim
        .provision_unit(hosts[1], &UnitConfiguration::default())
        .unwrap();

    let a = NetworkTask::new(
        TaskId(1),
        0,
        1,
        1 << 20,
        1000.0,
        vec![
            TaskStage::compute(0, 1.0),
            TaskStage::send(1, 1000.0, unit_b, TaskId(2)),
            TaskStage::terminal(2),
        ],
    );
    let b = NetworkTask::new(
        TaskId(2),
        0,
        1,
        1 << 20,
        0.0,
        vec![
            TaskStage::receive(0, 1000.0, unit_a, TaskId(1)),
            TaskStage::terminal(1),
        ],
    );
    sim.submit(a, unit_a, 0.0).unwrap();
    sim.submit(b, unit_b, 0.0).unwrap();
    sim.run().unwrap();

    assert_eq!(sim.status(TaskId(1)), TaskStatus::Finished);
    assert_eq!(sim.status(TaskId(2)), TaskStatus::Finished);
    let finish_a = sim.finish_time(TaskId(1)).unwrap();
    let finish_b = sim.finish_time(TaskId(2)).unwrap();
    // A is done as soon as it hands the packet to the network.
    assert!((finish_a - 1.0).abs() < 1e-9);
    // B cannot unblock before the compute finishes plus the uplink
    // serialization of the payload; the switch hop adds a little more.
    assert!(finish_b >= 1.1, "finish_b = {}", finish_b);
    assert!(finish_b < 1.2, "finish_b = {}", finish_b);
}

#[test]
fn admission_promotes_waiting_tasks_fifo() {
    let mut sim = sim_with_hosts(1, 10_000.0);
    let host = sim.spec().hosts()[0];
    let unit = sim
        .provision_unit(
            host,
            &UnitConfiguration {
                pe_count: 2,
                capacity_per_pe: 1000.0,
                memory: 1 << 30,
            },
        )
        .unwrap();

    let compute_task = |id: usize| {
        NetworkTask::new(
            TaskId(id),
            0,
            1,
            1 << 20,
            1000.0,
            vec![TaskStage::compute(0, 1.0), TaskStage::terminal(1)],
        )
    };
    let first = sim.submit(compute_task(1), unit, 0.0).unwrap();
    let second = sim.submit(compute_task(2), unit, 0.0).unwrap();
    let third = sim.submit(compute_task(3), unit, 0.0).unwrap();
    assert!(first > 0.0);
    assert!(second > 0.0);
    // The third task overflows the two PEs and queues.
    assert_eq!(third, 0.0);

    sim.run_until(0.5).unwrap();
    assert_eq!(sim.status(TaskId(1)), TaskStatus::Executing);
    assert_eq!(sim.status(TaskId(3)), TaskStatus::Waiting);

    sim.run().unwrap();
    for id in 1..=3 {
        assert_eq!(sim.status(TaskId(id)), TaskStatus::Finished);
    }
    let early = sim.finish_time(TaskId(1)).unwrap();
    let late = sim.finish_time(TaskId(3)).unwrap();
    assert!((early - 1.0).abs() < 1e-9);
    // Promoted when the first wave retired, then ran its full second.
    assert!(late >= 2.0, "late = {}", late);
    assert!(late < 2.1, "late = {}", late);
}

#[test]
fn gather_consumes_every_packet_exactly_once() {
    // Three senders on separate hosts, one receiver gathering from all of
    // them. Every packet crosses the edge switch and must be matched by
    // exactly one receive stage, buffered until its turn.
    let mut sim = sim_with_hosts(4, 10_000.0);
    let hosts = sim.spec().hosts();
    let units = hosts
        .iter()
        .map(|&h| sim.provision_unit(h, &UnitConfiguration::default()).unwrap())
        .collect::<Vec<_>>();

    let receiver_unit = units[3];
    for i in 0..3 {
        let sender = NetworkTask::new(
            TaskId(i + 1),
            0,
            1,
            1 << 20,
            0.0,
            vec![
                TaskStage::send(0, 100.0, receiver_unit, TaskId(9)),
                TaskStage::terminal(1),
            ],
        );
        sim.submit(sender, units[i], 0.0).unwrap();
    }
    let gatherer = NetworkTask::new(
        TaskId(9),
        0,
        1,
        1 << 20,
        0.0,
        vec![
            TaskStage::receive(0, 100.0, units[0], TaskId(1)),
            TaskStage::receive(1, 100.0, units[1], TaskId(2)),
            TaskStage::receive(2, 100.0, units[2], TaskId(3)),
            TaskStage::terminal(3),
        ],
    );
    sim.submit(gatherer, receiver_unit, 0.0).unwrap();
    sim.run().unwrap();

    for i in 1..=3 {
        assert_eq!(sim.status(TaskId(i)), TaskStatus::Finished);
    }
    assert_eq!(sim.status(TaskId(9)), TaskStatus::Finished);
    // The gather completes only after the slowest transfer, and the drained
    // queue means no packet was lost or delivered twice.
    let finish = sim.finish_time(TaskId(9)).unwrap();
    assert!(finish > 0.0, "finish = {}", finish);
    assert!(finish < 0.1, "finish = {}", finish);
}

#[test]
fn receiver_without_a_sender_blocks_until_canceled() {
    let mut sim = sim_with_hosts(1, 10_000.0);
    let host = sim.spec().hosts()[0];
    let unit = sim.provision_unit(host, &UnitConfiguration::default()).unwrap();

    // Compute still outstanding after the receive, so cancellation is a
    // genuine cancel rather than a finalize-as-finished.
    let orphan = NetworkTask::new(
        TaskId(1),
        0,
        1,
        1 << 20,
        1000.0,
        vec![
            TaskStage::receive(0, 100.0, unit, TaskId(99)),
            TaskStage::compute(1, 1.0),
            TaskStage::terminal(2),
        ],
    );
    sim.submit(orphan, unit, 0.0).unwrap();
    // The queue drains with the task still blocked on its phantom peer.
    sim.run().unwrap();
    assert_eq!(sim.status(TaskId(1)), TaskStatus::Executing);

    let canceled = sim.cancel(TaskId(1)).unwrap();
    assert_eq!(canceled.status, TaskStatus::Canceled);
    assert!(canceled.remaining_compute_length > 0.0);
}

#[test]
fn receive_timeout_finalizes_blocked_tasks() {
    let host_config = HostConfiguration {
        uplink_bandwidth: 10_000.0,
        units: Vec::new(),
    };
    let (spec, _hosts) = single_edge(1, &host_config, &SwitchConfiguration::default());
    let config = FabricConfiguration {
        receive_timeout: Some(0.5),
        ..FabricConfiguration::default()
    };
    let mut sim = FabricSimulation::new(spec, config);
    let host = sim.spec().hosts()[0];
    let unit = sim.provision_unit(host, &UnitConfiguration::default()).unwrap();

    let orphan = NetworkTask::new(
        TaskId(1),
        0,
        1,
        1 << 20,
        0.0,
        vec![
            TaskStage::receive(0, 100.0, unit, TaskId(99)),
            TaskStage::terminal(1),
        ],
    );
    sim.submit(orphan, unit, 0.0).unwrap();
    sim.run().unwrap();
    assert_eq!(sim.status(TaskId(1)), TaskStatus::Canceled);
    assert!((sim.finish_time(TaskId(1)).unwrap() - 0.5).abs() < 1e-9);
}

#[test]
fn file_transfer_time_extends_the_estimate() {
    let mut sim = sim_with_hosts(1, 10_000.0);
    let host = sim.spec().hosts()[0];
    let unit = sim.provision_unit(host, &UnitConfiguration::default()).unwrap();
    let task = NetworkTask::new(
        TaskId(1),
        0,
        1,
        1 << 20,
        1000.0,
        vec![TaskStage::compute(0, 1.0), TaskStage::terminal(1)],
    );
    // Half a second of input staging on top of one second of compute.
    let estimate = sim.submit(task, unit, 0.5).unwrap();
    assert!((estimate - 1.5).abs() < 1e-9, "estimate = {}", estimate);
}
