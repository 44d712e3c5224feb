//! Decision tests for the Traffic Optimizer, driven through the engine
//!
//! - Dominant variant gains weight, vector still sums to 100
//! - Below the sample threshold nothing changes
//! - A reversed winner loses weight back to control
//! - Repeated passes converge gradually, never in one jump
//! - A pass overlapping a delete aborts without writing
//! - The scheduler optimizes auto-pilot experiments only, on the configured interval

use std::sync::Arc;
use std::time::Duration;

use pagesplit::aggregator::EventRequest;
use pagesplit::config::{EngineConfig, OptimizerConfig};
use pagesplit::experiment::{DistributionMode, Experiment, OptimizationGoal, Variant};
use pagesplit::optimizer::{
    scheduler, BoundedStepPolicy, OptimizationOutcome, ReallocationPolicy, TrafficOptimizer,
    VariantReport, Verdict,
};
use pagesplit::registry::{RegistryChange, VariantRegistry, WEIGHT_TOLERANCE};
use pagesplit::{Engine, Error};

/// Deletes the experiment while the pass is computing, then proposes a move.
struct DeletingPolicy {
    registry: Arc<VariantRegistry>,
    experiment_id: &'static str,
}

impl ReallocationPolicy for DeletingPolicy {
    fn reallocate(&self, reports: &[VariantReport]) -> Vec<f64> {
        self.registry.delete(self.experiment_id).unwrap();
        BoundedStepPolicy::default().reallocate(reports)
    }
}

async fn engine_with(
    experiment_id: &str,
    mode: DistributionMode,
    goal: OptimizationGoal,
    weights: (f64, f64),
) -> Engine {
    let engine = Engine::builder().build().unwrap();
    engine
        .create_experiment(
            Experiment::builder(experiment_id, "Headline", "article-1")
                .distribution_mode(mode)
                .optimization_goal(goal)
                .min_sample_size(1000)
                .confidence_level(0.95)
                .build(),
            vec![
                Variant::control("a", experiment_id, weights.0),
                Variant::new("b", experiment_id, weights.1),
            ],
        )
        .await
        .unwrap();
    engine.start(experiment_id).await.unwrap();
    engine
}

/// `sessions` first views on `variant`, the first `successes` of which also
/// produce a `kind` event.
async fn traffic(
    engine: &Engine,
    experiment_id: &str,
    variant: &str,
    sessions: usize,
    successes: usize,
    kind: &str,
) {
    for i in 0..sessions {
        let session = format!("{experiment_id}-{variant}-{i}");
        engine
            .record_event(EventRequest::new(experiment_id, variant, session.as_str(), "view"))
            .await
            .unwrap();
        if i < successes {
            engine
                .record_event(EventRequest::new(experiment_id, variant, session.as_str(), kind))
                .await
                .unwrap();
        }
    }
}

fn weight_sum(engine: &Engine, experiment_id: &str) -> f64 {
    engine
        .experiment(experiment_id)
        .unwrap()
        .weights()
        .iter()
        .map(|(_, w)| w)
        .sum()
}

#[tokio::test]
async fn test_dominant_variant_shifts_weight_and_republishes() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ConversionRate,
        (50.0, 50.0),
    )
    .await;
    traffic(&engine, "exp-1", "a", 1000, 5, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 80, "conversion").await;

    let outcome = engine.optimize("exp-1").await.unwrap();
    let OptimizationOutcome::Rebalanced { weights, leader, .. } = &outcome else {
        panic!("expected rebalance, got {outcome:?}");
    };
    assert_eq!(leader.as_deref(), Some("b"));
    assert!(weights[1].1 > 50.0 && weights[1].1 < 100.0);
    assert!((weight_sum(&engine, "exp-1") - 100.0).abs() <= WEIGHT_TOLERANCE);

    let snapshot = engine.snapshot("article-1").await.unwrap().unwrap();
    let published = &snapshot.experiment("exp-1").unwrap().variants;
    assert!((published[1].weight - weights[1].1).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_click_goal_uses_clicks() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ClickRate,
        (50.0, 50.0),
    )
    .await;
    // Conversions favour `a`, clicks favour `b`.
    traffic(&engine, "exp-1", "a", 1000, 100, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 200, "click").await;

    let report = engine.report("exp-1").unwrap();
    assert_eq!(report[1].verdict, Verdict::Better);
    assert_eq!(report[1].successes, 200);
}

#[tokio::test]
async fn test_below_min_sample_size_is_insufficient() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ConversionRate,
        (50.0, 50.0),
    )
    .await;
    traffic(&engine, "exp-1", "a", 999, 5, "conversion").await;
    traffic(&engine, "exp-1", "b", 999, 500, "conversion").await;
    let before = engine.experiment("exp-1").unwrap();

    let outcome = engine.optimize("exp-1").await.unwrap();
    assert!(matches!(outcome, OptimizationOutcome::InsufficientData { .. }));

    let after = engine.experiment("exp-1").unwrap();
    assert_eq!(before.weights(), after.weights());
    assert_eq!(before.version(), after.version());
}

#[tokio::test]
async fn test_reversed_winner_gives_weight_back() {
    // `b` had been promoted to 80%, but the data now shows it losing.
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ConversionRate,
        (20.0, 80.0),
    )
    .await;
    traffic(&engine, "exp-1", "a", 1000, 80, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 5, "conversion").await;

    let outcome = engine.optimize("exp-1").await.unwrap();
    let OptimizationOutcome::Rebalanced { weights, leader, .. } = outcome else {
        panic!("expected rebalance");
    };
    assert_eq!(leader, None);
    assert!(weights[0].1 > 20.0);
    assert!(weights[1].1 < 80.0);
}

#[tokio::test]
async fn test_repeated_passes_converge_gradually() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ConversionRate,
        (50.0, 50.0),
    )
    .await;
    traffic(&engine, "exp-1", "a", 1000, 5, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 80, "conversion").await;

    let mut previous = 50.0;
    let mut passes = 0;
    loop {
        let outcome = engine.optimize("exp-1").await.unwrap();
        if outcome == OptimizationOutcome::Converged {
            break;
        }
        assert!(outcome.is_rebalanced(), "{outcome:?}");
        let current = engine.experiment("exp-1").unwrap().weights()[1].1;
        assert!(current > previous);
        // Default step moves a quarter of the remaining gap.
        assert!(current - previous <= 0.25 * (95.0 - previous) + 0.01);
        previous = current;
        passes += 1;
        assert!(passes < 100, "did not converge");
    }
    assert!(passes > 3);
    assert!((previous - 95.0).abs() < 0.1);
}

#[tokio::test]
async fn test_manual_mode_is_never_optimized() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::Manual,
        OptimizationGoal::ConversionRate,
        (50.0, 50.0),
    )
    .await;
    traffic(&engine, "exp-1", "a", 1000, 5, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 80, "conversion").await;

    assert_eq!(
        engine.optimize("exp-1").await.unwrap(),
        OptimizationOutcome::ManualDistribution
    );
}

#[tokio::test]
async fn test_deleted_experiment_cannot_be_optimized() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ConversionRate,
        (50.0, 50.0),
    )
    .await;
    engine.delete("exp-1").await.unwrap();
    assert!(matches!(
        engine.optimize("exp-1").await,
        Err(Error::UnknownExperiment(_))
    ));
}

#[tokio::test]
async fn test_delete_during_pass_aborts_the_write() {
    let engine = engine_with(
        "exp-1",
        DistributionMode::AutoPilot,
        OptimizationGoal::ConversionRate,
        (50.0, 50.0),
    )
    .await;
    traffic(&engine, "exp-1", "a", 1000, 5, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 80, "conversion").await;

    let optimizer = TrafficOptimizer::new(
        Arc::clone(engine.registry()),
        DeletingPolicy {
            registry: Arc::clone(engine.registry()),
            experiment_id: "exp-1",
        },
    );
    let mut feed = engine.registry().subscribe();

    assert!(matches!(
        optimizer.optimize("exp-1", engine.aggregator()),
        Err(Error::ExperimentDeleted(id)) if id == "exp-1"
    ));

    // The delete is the only change: no weights were written after it.
    assert!(matches!(feed.try_recv(), Ok(RegistryChange::Deleted { .. })));
    assert!(feed.try_recv().is_err());
    assert!(engine.registry().get("exp-1").is_none());

    // The published artifact still carries the weights from before the pass.
    let snapshot = engine.snapshot("article-1").await.unwrap().unwrap();
    let published: Vec<f64> = snapshot
        .experiment("exp-1")
        .unwrap()
        .variants
        .iter()
        .map(|v| v.weight)
        .collect();
    assert_eq!(published, vec![50.0, 50.0]);
}

#[tokio::test(start_paused = true)]
async fn test_engine_scheduler_uses_configured_interval() {
    let config = EngineConfig {
        optimizer: OptimizerConfig {
            interval_secs: 60,
            ..OptimizerConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = Engine::builder().config(config).build().unwrap();
    engine
        .create_experiment(
            Experiment::builder("exp-1", "Headline", "article-1")
                .distribution_mode(DistributionMode::AutoPilot)
                .min_sample_size(1000)
                .build(),
            vec![
                Variant::control("a", "exp-1", 50.0),
                Variant::new("b", "exp-1", 50.0),
            ],
        )
        .await
        .unwrap();
    engine.start("exp-1").await.unwrap();
    traffic(&engine, "exp-1", "a", 1000, 5, "conversion").await;
    traffic(&engine, "exp-1", "b", 1000, 80, "conversion").await;

    let engine = Arc::new(engine);
    let handle = Arc::clone(&engine).spawn_scheduler();

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!((engine.experiment("exp-1").unwrap().weights()[1].1 - 50.0).abs() < f64::EPSILON);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(engine.experiment("exp-1").unwrap().weights()[1].1 > 50.0);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_rebalances_auto_pilot_only() {
    let engine = Engine::builder().build().unwrap();
    for (id, mode) in [
        ("exp-auto", DistributionMode::AutoPilot),
        ("exp-manual", DistributionMode::Manual),
    ] {
        engine
            .create_experiment(
                Experiment::builder(id, "Headline", format!("article-{id}"))
                    .distribution_mode(mode)
                    .min_sample_size(1000)
                    .build(),
                vec![Variant::control("a", id, 50.0), Variant::new("b", id, 50.0)],
            )
            .await
            .unwrap();
        engine.start(id).await.unwrap();
        traffic(&engine, id, "a", 1000, 5, "conversion").await;
        traffic(&engine, id, "b", 1000, 80, "conversion").await;
    }

    let engine = Arc::new(engine);
    let handle = scheduler::spawn(Arc::clone(&engine), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    let auto = engine.experiment("exp-auto").unwrap().weights();
    let manual = engine.experiment("exp-manual").unwrap().weights();
    assert!(auto[1].1 > 50.0);
    assert!((manual[1].1 - 50.0).abs() < f64::EPSILON);
}
