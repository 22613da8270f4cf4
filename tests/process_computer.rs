//! Graphs with nodes hosted in worker processes

use livegraph::nodes::{Counter, Delay, Print, Scale};
use livegraph::runtime::bridge::PeerDirectory;
use livegraph::{
    Computer, ComputerState, EngineConfig, Graph, Location, NodeRegistry, Pipeline,
    ProcessComputer,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn worker_config() -> EngineConfig {
    EngineConfig {
        worker_program: Some(PathBuf::from(env!("CARGO_BIN_EXE_livegraph"))),
        ..Default::default()
    }
}

#[test]
fn test_chain_through_worker_process() {
    let mut pipeline = Pipeline::new();
    let count = pipeline.add_node("count", Location::Same, Counter::new(5)).unwrap();
    let scale = pipeline
        .add_node("scale", Location::process("worker"), Scale::new(2.0))
        .unwrap();
    let print = pipeline.add_node("print", Location::Same, Print::new()).unwrap();
    pipeline.add_input(scale, count, "value", "in").unwrap();
    pipeline.add_input(print, scale, "out", "in").unwrap();

    let mut graph = Graph::new(pipeline, count)
        .with_config(worker_config())
        .with_registry(NodeRegistry::with_builtin());
    let frames = graph.draw_frames();
    graph.start_all().unwrap();
    assert!(graph.computers().contains(&"process:worker"));

    assert!(graph.join(Duration::from_secs(20)), "pipeline did not finish");
    assert!(graph.stop_all(Duration::from_secs(2)));

    let mut values: Vec<(u64, f64)> = frames
        .try_iter()
        .filter(|frame| frame.node == "print")
        .map(|frame| (frame.ctr, frame.value.as_f64().unwrap()))
        .collect();
    values.sort_by_key(|&(ctr, _)| ctr);
    assert_eq!(
        values,
        vec![(1, 0.0), (2, 2.0), (3, 4.0), (4, 6.0), (5, 8.0)]
    );
}

#[test]
fn test_stuck_worker_is_killed_on_close() {
    let mut pipeline = Pipeline::new();
    let count = pipeline
        .add_node("count", Location::process("slow"), Counter::endless())
        .unwrap();
    let delay = pipeline
        .add_node("delay", Location::process("slow"), Delay::new(Duration::from_secs(30)))
        .unwrap();
    pipeline.add_input(delay, count, "value", "in").unwrap();

    let mut computer = ProcessComputer::new(
        "slow",
        pipeline.to_doc(),
        &worker_config(),
        PeerDirectory::new(),
        None,
    );
    computer.setup().unwrap();
    computer.start().unwrap();
    let pid = computer.pid().unwrap();

    // delay is now sleeping inside its first call
    std::thread::sleep(Duration::from_millis(300));
    computer.request_stop();
    assert!(!computer.join(Duration::from_millis(200)));

    let timeout = Duration::from_secs(1);
    let started = Instant::now();
    computer.close(timeout);
    assert!(started.elapsed() < timeout + Duration::from_millis(500));
    assert_eq!(computer.state(), ComputerState::Closed);
    assert!(computer.pid().is_none());
    #[cfg(target_os = "linux")]
    assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    let _ = pid;
}

#[test]
fn test_stop_all_with_stuck_worker() {
    let mut pipeline = Pipeline::new();
    let count = pipeline
        .add_node("count", Location::Same, Counter::endless().with_interval_ms(10))
        .unwrap();
    let delay = pipeline
        .add_node("delay", Location::process("slow"), Delay::new(Duration::from_secs(30)))
        .unwrap();
    let print = pipeline.add_node("print", Location::Same, Print::new().quiet()).unwrap();
    pipeline.add_input(delay, count, "value", "in").unwrap();
    pipeline.add_input(print, delay, "out", "in").unwrap();

    let config = EngineConfig {
        stop_timeout_ms: 200,
        close_timeout_ms: 500,
        ..worker_config()
    };
    let mut graph = Graph::new(pipeline, count)
        .with_config(config)
        .with_registry(NodeRegistry::with_builtin());
    graph.start_all().unwrap();
    std::thread::sleep(Duration::from_millis(300));

    // bounded stop and close for each of the two computers
    let started = Instant::now();
    assert!(!graph.stop_all(Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!graph.is_running());
}
