//! End-to-end scenarios over real TCP on ephemeral localhost ports.
//!
//! Each test wires up a coordinator, one or more workers, and (where the
//! metric matters) evaluator pools, then asserts on the run report the
//! coordinator leaves behind.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use geodist_core::coordinator::{Coordinator, CoordinatorConfig, RunReport};
use geodist_core::geometry::{MassMatrix, Point};
use geodist_core::metric::potential::GaussianPotential;
use geodist_core::metric::{Evaluator, MetricError, MetricPool, MetricSample, MetricSource};
use geodist_core::protocol::{
    authenticate_outbound, read_message, write_message, AuthKey, Message,
};
use geodist_core::solver::SolverOptions;
use geodist_core::worker::{Worker, WorkerConfig};

/// In-process metric source: a(p), ∇a(p) from a closure, with an optional
/// per-batch delay to stretch task windows.
struct AnalyticMetric<F> {
    metric: F,
    delay: Duration,
}

#[async_trait]
impl<F> MetricSource for AnalyticMetric<F>
where
    F: Fn(&[f64]) -> MetricSample + Send + Sync,
{
    async fn evaluate(&self, points: &[Point]) -> Result<Vec<MetricSample>, MetricError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(points.iter().map(|p| (self.metric)(p)).collect())
    }
}

fn constant_metric(delay: Duration) -> AnalyticMetric<impl Fn(&[f64]) -> MetricSample + Send + Sync> {
    AnalyticMetric {
        metric: |p: &[f64]| MetricSample {
            value: 1.0,
            gradient: vec![0.0; p.len()],
        },
        delay,
    }
}

fn worker_config(id: &str, coordinator: String, local_nodes: usize, dimension: usize) -> WorkerConfig {
    WorkerConfig {
        worker_id: id.to_string(),
        coordinator,
        callback_delay: Duration::from_millis(10),
        local_nodes,
        mass: MassMatrix::uniform(dimension),
        solver: SolverOptions::default(),
    }
}

async fn spawn_coordinator(
    curve: geodist_core::curve::GlobalCurve,
    tolerance: f64,
    task_timeout: Duration,
    key: &AuthKey,
) -> (String, JoinHandle<RunReport>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let coordinator = Coordinator::new(
        curve,
        CoordinatorConfig {
            task_timeout,
            tolerance,
        },
        key.clone(),
    );
    let handle = tokio::spawn(async move { coordinator.run(listener).await.unwrap() });
    (addr, handle)
}

async fn spawn_evaluators(
    count: usize,
    key: &AuthKey,
    energy: f64,
    height: f64,
    width: f64,
) -> (Vec<String>, Vec<JoinHandle<()>>) {
    let mut endpoints = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..count {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        endpoints.push(listener.local_addr().unwrap().to_string());
        let evaluator = Evaluator::new(
            Arc::new(GaussianPotential { height, width }),
            key.clone(),
            energy,
        );
        handles.push(tokio::spawn(async move {
            evaluator.run(listener).await.unwrap();
        }));
    }
    (endpoints, handles)
}

/// One raw request/response against the coordinator, bypassing Worker.
async fn raw_call(addr: &str, key: &AuthKey, message: Message) -> Message {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate_outbound(&mut stream, key).await.unwrap();
    write_message(&mut stream, &message).await.unwrap();
    read_message(&mut stream).await.unwrap()
}

/// Scenario A: constant metric, straight endpoints. The curve is already a
/// geodesic; the first sweep moves nothing and the run terminates at once.
#[tokio::test]
async fn test_straight_line_constant_metric_converges_immediately() {
    let key = AuthKey::new("scenario-a");
    let start = vec![0.0, 0.0];
    let end = vec![4.0, 0.0];
    // G=1, L=3: three interior nodes at integer x; L odd makes the
    // reported midpoint the true chord midpoint.
    let local_nodes = 3;
    let curve = geodist_core::curve::GlobalCurve::new(start.clone(), end.clone(), 3).unwrap();

    let (addr, coordinator) =
        spawn_coordinator(curve, 1e-6, Duration::from_secs(60), &key).await;

    let worker = Worker::new(
        worker_config("w-a", addr, local_nodes, 2),
        key.clone(),
        constant_metric(Duration::ZERO),
    );
    let worker = tokio::spawn(async move { worker.run().await.unwrap() });

    let report = coordinator.await.unwrap();
    worker.await.unwrap();

    // Termination in at most two sweeps, with movement under tolerance.
    assert!(report.sweeps <= 2, "sweeps = {}", report.sweeps);
    assert!(*report.movement_history.last().unwrap() < 1e-6);

    // Endpoint immutability, bit for bit.
    assert_eq!(report.curve.point(0), &start);
    assert_eq!(report.curve.point(4), &end);

    // The curve is the straight line.
    for (k, point) in report.curve.points().iter().enumerate() {
        assert!((point[0] - k as f64).abs() < 1e-9);
        assert!(point[1].abs() < 1e-9);
    }
}

/// Scenario B: symmetric barrier metric served by a real evaluator pool.
/// The converged curve bends away from the origin and is symmetric about
/// x = 0.
#[tokio::test]
async fn test_symmetric_barrier_bends_curve() {
    let key = AuthKey::new("scenario-b");
    // Endpoints sit slightly off the barrier axis: on the axis the
    // y-gradient vanishes by symmetry and no deterministic descent can
    // leave the saddle.
    let y0 = 0.05;
    let start = vec![-1.0, y0];
    let end = vec![1.0, y0];
    // G=2, L=3: five interior nodes.
    let interior = 5;
    let local_nodes = 3;
    let curve = geodist_core::curve::GlobalCurve::new(start.clone(), end.clone(), interior).unwrap();

    let (addr, coordinator) =
        spawn_coordinator(curve, 1e-4, Duration::from_secs(60), &key).await;

    // A Gaussian well deepens E − U near the origin:
    // a = sqrt(2 + 3·exp(−4·‖p‖²)), a barrier in the metric.
    let (endpoints, evaluators) = spawn_evaluators(2, &key, 2.0, -3.0, 4.0).await;
    let pool = MetricPool::new(endpoints, key.clone()).unwrap();
    let worker = Worker::new(worker_config("w-b", addr, local_nodes, 2), key.clone(), pool);
    let worker = tokio::spawn(async move { worker.run().await });

    let report = coordinator.await.unwrap();
    worker.await.unwrap().unwrap();
    for evaluator in evaluators {
        evaluator.await.unwrap();
    }

    assert!(*report.movement_history.last().unwrap() < 1e-4);
    assert_eq!(report.curve.point(0), &start);
    assert_eq!(report.curve.point(interior + 1), &end);

    let points = report.curve.points();
    // The middle of the curve pushed away from the barrier.
    let middle = &points[(interior + 1) / 2];
    assert!(middle[1] > y0, "middle y = {}", middle[1]);

    // Symmetry about x = 0 at the converged fixed point.
    for k in 1..=interior {
        let mirror = interior + 1 - k;
        assert!(
            (points[k][0] + points[mirror][0]).abs() < 1e-2,
            "x symmetry broken at node {k}: {} vs {}",
            points[k][0],
            points[mirror][0]
        );
        assert!(
            (points[k][1] - points[mirror][1]).abs() < 1e-2,
            "y symmetry broken at node {k}: {} vs {}",
            points[k][1],
            points[mirror][1]
        );
    }
}

/// Scenario C: a worker that sleeps past the dispatch timeout. Its node is
/// re-dispatched, its late result discarded, and the final curve matches a
/// clean single-worker run.
#[tokio::test]
async fn test_worker_timeout_recovery() {
    let key = AuthKey::new("scenario-c");
    let start = vec![0.0, 0.0];
    let end = vec![4.0, 0.0];
    let local_nodes = 3;

    // Reference run: one well-behaved worker.
    let reference = {
        let curve = geodist_core::curve::GlobalCurve::new(start.clone(), end.clone(), 3).unwrap();
        let (addr, coordinator) =
            spawn_coordinator(curve, 1e-6, Duration::from_secs(60), &key).await;
        let worker = Worker::new(
            worker_config("w-ref", addr, local_nodes, 2),
            key.clone(),
            constant_metric(Duration::ZERO),
        );
        let worker = tokio::spawn(async move { worker.run().await.unwrap() });
        let report = coordinator.await.unwrap();
        worker.await.unwrap();
        report
    };

    // Contended run, fully scripted for determinism: a slow client claims
    // node 1 and oversleeps the 100ms timeout while a fast client does all
    // the work with exact chord midpoints (what the solver computes under
    // a constant metric).
    let curve = geodist_core::curve::GlobalCurve::new(start.clone(), end.clone(), 3).unwrap();
    let (addr, coordinator) =
        spawn_coordinator(curve, 1e-6, Duration::from_millis(100), &key).await;

    let hello = |id: &str| Message::Hello {
        worker_id: id.to_string(),
    };
    let midpoint = |left: &[f64], right: &[f64]| -> Vec<f64> {
        left.iter().zip(right).map(|(l, r)| 0.5 * (l + r)).collect()
    };

    let Message::Task { node_index, .. } = raw_call(&addr, &key, hello("slow")).await else {
        panic!("slow client expected the first task");
    };
    assert_eq!(node_index, 1);

    // The fast client picks up node 3 (node 2 is excluded, adjacent to the
    // slow client's node 1) and completes it.
    let Message::Task {
        node_index, left, right,
    } = raw_call(&addr, &key, hello("fast")).await
    else {
        panic!("fast client expected a task");
    };
    assert_eq!(node_index, 3);
    let reply = raw_call(
        &addr,
        &key,
        Message::Result {
            worker_id: "fast".to_string(),
            node_index: 3,
            new_position: midpoint(&left, &right),
        },
    )
    .await;
    // Nothing else dispatchable while the slow client squats on node 1.
    assert!(matches!(reply, Message::Wait));

    // Oversleep the timeout; the next poll releases node 1 to the fast
    // client.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let Message::Task {
        node_index, left, right,
    } = raw_call(&addr, &key, hello("fast")).await
    else {
        panic!("fast client expected the released node");
    };
    assert_eq!(node_index, 1);
    let Message::Task {
        node_index: second,
        left: left2,
        right: right2,
    } = raw_call(
        &addr,
        &key,
        Message::Result {
            worker_id: "fast".to_string(),
            node_index: 1,
            new_position: midpoint(&left, &right),
        },
    )
    .await
    else {
        panic!("fast client expected node 2");
    };
    assert_eq!(second, 2);

    // The slow client's result finally lands and is discarded.
    let reply = raw_call(
        &addr,
        &key,
        Message::Result {
            worker_id: "slow".to_string(),
            node_index: 1,
            new_position: vec![9.0, 9.0],
        },
    )
    .await;
    assert!(matches!(reply, Message::Wait));

    // The fast client finishes the sweep; zero movement terminates the
    // run.
    let reply = raw_call(
        &addr,
        &key,
        Message::Result {
            worker_id: "fast".to_string(),
            node_index: 2,
            new_position: midpoint(&left2, &right2),
        },
    )
    .await;
    assert!(matches!(reply, Message::Wait));

    let report = coordinator.await.unwrap();

    // The stale position never landed.
    for point in report.curve.points() {
        assert!(point[0] < 8.0 && point[1] < 8.0, "stale result leaked in");
    }
    // Same answer as the clean run.
    for (a, b) in report.curve.points().iter().zip(reference.curve.points()) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-8);
        }
    }
}

/// Scenario D: evaluator loss. The worker broadcasts KILL to the rest of
/// its pool and exits abnormally; the coordinator stalls with no workers.
#[tokio::test]
async fn test_evaluator_loss_kills_pool_and_worker() {
    let key = AuthKey::new("scenario-d");
    let start = vec![-1.0, 0.05];
    let end = vec![1.0, 0.05];
    let curve = geodist_core::curve::GlobalCurve::new(start, end, 5).unwrap();
    let (addr, coordinator) =
        spawn_coordinator(curve, 1e-9, Duration::from_secs(60), &key).await;

    // One healthy evaluator plus one that dies after serving a single
    // POINTS/FETCH cycle.
    let (mut endpoints, mut handles) = spawn_evaluators(1, &key, 2.0, -3.0, 4.0).await;
    let flaky_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    endpoints.push(flaky_listener.local_addr().unwrap().to_string());
    let flaky_key = key.clone();
    let flaky = tokio::spawn(async move {
        use geodist_core::metric::potential::{metric_sample, METRIC_FLOOR};
        use geodist_core::protocol::{authenticate_inbound, ValueEntry};

        let potential = GaussianPotential {
            height: -3.0,
            width: 4.0,
        };
        let mut pending: Vec<ValueEntry> = Vec::new();
        loop {
            let (mut stream, _) = flaky_listener.accept().await.unwrap();
            authenticate_inbound(&mut stream, &flaky_key).await.unwrap();
            match read_message(&mut stream).await.unwrap() {
                Message::Points { entries } => {
                    drop(stream);
                    pending = entries
                        .into_iter()
                        .map(|entry| ValueEntry {
                            sample: metric_sample(&potential, &entry.point, 2.0, METRIC_FLOOR),
                            index: entry.index,
                        })
                        .collect();
                }
                Message::Fetch => {
                    write_message(
                        &mut stream,
                        &Message::Values {
                            entries: std::mem::take(&mut pending),
                        },
                    )
                    .await
                    .unwrap();
                    // First full cycle served; die with the listener.
                    break;
                }
                _ => break,
            }
        }
    });

    let pool = MetricPool::new(endpoints, key.clone()).unwrap();
    let worker = Worker::new(worker_config("w-d", addr, 3, 2), key.clone(), pool);
    let result = worker.run().await;

    // The worker died abnormally...
    assert!(result.is_err());
    // ...after killing the healthy evaluator, whose task now completes.
    handles.remove(0).await.unwrap();
    flaky.await.unwrap();

    // The coordinator is stalled, not finished: no report arrives.
    let stalled =
        tokio::time::timeout(Duration::from_millis(300), coordinator).await;
    assert!(stalled.is_err(), "coordinator terminated without workers");
}

/// Scenario E: three workers over five interior nodes. The dispatch log
/// must show no two concurrently open windows on adjacent nodes.
#[tokio::test]
async fn test_neighbour_exclusion_under_load() {
    let key = AuthKey::new("scenario-e");
    let start = vec![0.0, 0.0];
    let end = vec![6.0, 0.0];
    let curve = geodist_core::curve::GlobalCurve::new(start, end, 5).unwrap();
    let (addr, coordinator) =
        spawn_coordinator(curve, 1e-6, Duration::from_secs(60), &key).await;

    let mut workers = Vec::new();
    for id in ["w-1", "w-2", "w-3"] {
        let worker = Worker::new(
            worker_config(id, addr.clone(), 3, 2),
            key.clone(),
            // The delay stretches every task window so the three workers
            // genuinely overlap.
            constant_metric(Duration::from_millis(30)),
        );
        workers.push(tokio::spawn(async move { worker.run().await.unwrap() }));
    }

    let report = coordinator.await.unwrap();
    for worker in workers {
        worker.await.unwrap();
    }

    let log = report.dispatch_log;
    assert!(!log.is_empty());
    // No two windows on the same or adjacent nodes may be open at once.
    for (i, a) in log.iter().enumerate() {
        for b in &log[i + 1..] {
            if a.node.abs_diff(b.node) > 1 {
                continue;
            }
            let a_end = a.closed_at.expect("window left open");
            let b_end = b.closed_at.expect("window left open");
            let overlap = a.dispatched_at < b_end && b.dispatched_at < a_end;
            assert!(
                !overlap,
                "nodes {} and {} held concurrently",
                a.node, b.node
            );
        }
    }
}
