//! Crate-level test suite for plumetrace
//!
//! Includes:
//! - End-to-end recovery of a synthetic source
//! - Evaluation cache and parallel evaluator properties
//! - Optimizer invariants (bounds, elitism, reproducibility)
//! - Adaptive and multi-objective behaviour
//! - Scenario files and CSV output

use crate::config;
use crate::io;
use crate::*;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn truth() -> Source {
    Source::new(150.0, 200.0, 25.0, 2.5)
}

fn recovery_bounds() -> SearchBounds {
    SearchBounds {
        x: ParamRange::new(-500.0, 500.0),
        y: ParamRange::new(-500.0, 500.0),
        height: ParamRange::new(0.0, 100.0),
        emission_rate: ParamRange::new(0.001, 10.0),
    }
}

/// 7x7 grid at 100 m spacing observing `truth()` under class C conditions
fn synthetic(noise_level: f64) -> (ScenarioConfig, SensorObservations) {
    let network = SyntheticNetwork {
        noise_level,
        min_concentration: None,
        ..SyntheticNetwork::default()
    };
    let met = Meteorology::default();
    let mut rng = InversionRng::seed_from_u64(7);
    let (receptors, observations) = network
        .observe(&GaussianPlume::default(), &truth(), &met, &mut rng)
        .unwrap();
    let scenario = ScenarioConfig::new(met, receptors, recovery_bounds()).unwrap();
    (scenario, observations)
}

fn quick_options(policy: Policy) -> RunOptions {
    RunOptions {
        population_size: 30,
        max_generations: 25,
        workers: 4,
        ..RunOptions::for_policy(policy)
    }
}

/// Forward model that counts its invocations
struct CountingModel {
    inner: GaussianPlume,
    calls: AtomicUsize,
}

impl CountingModel {
    fn new() -> Self {
        Self {
            inner: GaussianPlume::default(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ForwardModel for CountingModel {
    fn predict(
        &self,
        source: &Source,
        receptors: &[Receptor],
        meteorology: &Meteorology,
    ) -> std::result::Result<Vec<f64>, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(source, receptors, meteorology)
    }
}

/// Predicts zero everywhere, so every candidate scores the same
struct FlatModel;

impl ForwardModel for FlatModel {
    fn predict(
        &self,
        _source: &Source,
        receptors: &[Receptor],
        _meteorology: &Meteorology,
    ) -> std::result::Result<Vec<f64>, DomainError> {
        Ok(vec![0.0; receptors.len()])
    }
}

fn flat_driver() -> InversionDriver {
    let (scenario, _) = synthetic(0.0);
    let observations = SensorObservations::new((0..5).map(|i| SensorReading::new(i, 0.0)).collect());
    InversionDriver::new(scenario, observations).with_forward_model(Arc::new(FlatModel))
}

// =============================================================================
// End-to-End Scenarios
// =============================================================================

#[test]
fn test_recovers_synthetic_source() {
    let (scenario, observations) = synthetic(0.0);
    let options = RunOptions {
        policy: Policy::Standard,
        population_size: 100,
        max_generations: 2000,
        epsilon: 0.0,
        target_fitness: Some(1e-10),
        base_mutation_rate: 0.02,
        workers: 4,
        ..RunOptions::default()
    };

    let result = InversionDriver::new(scenario, observations)
        .with_ground_truth(truth())
        .run(&options)
        .unwrap();

    let v = result.validation.expect("ground truth was configured");
    assert!(v.position_error < 5.0, "position error {} m", v.position_error);
    assert!(v.emission_error < 5.0, "emission error {} %", v.emission_error);
    assert!(matches!(
        result.termination,
        TerminationReason::TargetReached | TerminationReason::MaxGenerations
    ));
}

#[test]
fn test_empty_observations_are_a_configuration_error() {
    let (scenario, _) = synthetic(0.0);
    let err = InversionDriver::new(scenario, SensorObservations::default())
        .run(&quick_options(Policy::Standard))
        .unwrap_err();
    assert!(err.is_configuration(), "{err}");
}

#[test]
fn test_unusable_observations_are_a_configuration_error() {
    let (scenario, _) = synthetic(0.0);
    let observations = SensorObservations::new(vec![
        SensorReading::missing(0),
        SensorReading::new(1, 3.0).flagged(),
    ]);
    let err = InversionDriver::new(scenario, observations)
        .run(&quick_options(Policy::Adaptive))
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_invalid_options_fail_before_running() {
    let (scenario, observations) = synthetic(0.0);
    let driver = InversionDriver::new(scenario, observations);

    let mut options = quick_options(Policy::Standard);
    options.population_size = 1;
    assert!(driver.run(&options).unwrap_err().is_configuration());

    let mut options = quick_options(Policy::Standard);
    options.elite_count = options.population_size;
    assert!(driver.run(&options).unwrap_err().is_configuration());
}

// =============================================================================
// Cache and Evaluator
// =============================================================================

#[test]
fn test_forward_model_runs_once_per_distinct_candidate() {
    let (scenario, observations) = synthetic(0.0);
    let bounds = *scenario.bounds();
    let objective = Objective::new(
        &observations,
        scenario.receptors().len(),
        ErrorMetric::Squared,
        ObjectiveMode::Single,
    )
    .unwrap();
    let model = Arc::new(CountingModel::new());
    let evaluator = ParallelEvaluator::new(
        8,
        model.clone(),
        Arc::new(objective),
        Arc::new(scenario),
        Arc::new(EvaluationCache::new()),
        6,
    )
    .unwrap();

    let distinct: Vec<Candidate> = (0..10)
        .map(|i| Candidate::new(Source::new(10.0 * i as f64, -20.0, 5.0 + i as f64, 1.0), &bounds))
        .collect();
    let batch: Vec<Candidate> = (0..200).map(|i| distinct[(i * 7) % 10]).collect();

    let evaluated = evaluator.evaluate(batch.clone()).unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 10);
    assert_eq!(evaluated.len(), 200);
    for (input, output) in batch.iter().zip(&evaluated) {
        assert_eq!(*input, output.candidate);
    }

    // A second batch is served entirely from the cache
    evaluator.evaluate(distinct).unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 10);

    let stats = evaluator.cache_stats();
    assert_eq!(stats.computations, 10);
    assert_eq!(stats.requests, 210);
    assert_eq!(stats.entries, 10);
    assert_eq!(evaluator.forward_evaluations(), 10);
}

#[test]
fn test_domain_errors_become_penalties() {
    let (scenario, observations) = synthetic(0.0);
    let bounds = SearchBounds {
        height: ParamRange::new(-10.0, 10.0),
        ..*scenario.bounds()
    };
    let scenario = ScenarioConfig::new(
        scenario.meteorology().clone(),
        scenario.receptors().to_vec(),
        bounds,
    )
    .unwrap();
    let objective = Objective::new(
        &observations,
        scenario.receptors().len(),
        ErrorMetric::Squared,
        ObjectiveMode::Multi,
    )
    .unwrap();
    let evaluator = ParallelEvaluator::new(
        2,
        Arc::new(GaussianPlume::default()),
        Arc::new(objective),
        Arc::new(scenario),
        Arc::new(EvaluationCache::new()),
        6,
    )
    .unwrap();

    let below_ground = Candidate::new(Source::new(0.0, 0.0, -5.0, 1.0), &bounds);
    let above_ground = Candidate::new(Source::new(0.0, 0.0, 5.0, 1.0), &bounds);
    let out = evaluator.evaluate(vec![below_ground, above_ground]).unwrap();

    assert!(out[0].evaluation.is_penalized());
    assert_eq!(out[0].objectives(), &[PENALTY_FITNESS, PENALTY_FITNESS]);
    assert!(!out[1].evaluation.is_penalized());
    assert!(out[1].fitness() < PENALTY_FITNESS);
}

#[test]
fn test_invalid_wind_does_not_abort_the_run() {
    let (scenario, observations) = synthetic(0.0);
    let met = Meteorology {
        wind_speed: 0.0,
        ..scenario.meteorology().clone()
    };
    let scenario = ScenarioConfig::new(met, scenario.receptors().to_vec(), *scenario.bounds()).unwrap();

    let mut options = quick_options(Policy::Standard);
    options.max_generations = 3;
    let result = InversionDriver::new(scenario, observations).run(&options).unwrap();

    assert_eq!(result.best_fitness, vec![PENALTY_FITNESS]);
    assert_eq!(result.uncertainty.sample_size, 0);
}

/// Evaluator over the 7x7 grid with every sensor reading zero
fn zero_reading_evaluator(metric: ErrorMetric, mode: ObjectiveMode) -> (ParallelEvaluator, SearchBounds) {
    let (scenario, _) = synthetic(0.0);
    let bounds = SearchBounds {
        height: ParamRange::new(-10.0, 100.0),
        ..*scenario.bounds()
    };
    let receptors = scenario.receptors().to_vec();
    let observations =
        SensorObservations::new((0..receptors.len()).map(|i| SensorReading::new(i, 0.0)).collect());
    let scenario = ScenarioConfig::new(scenario.meteorology().clone(), receptors, bounds).unwrap();
    let objective = Objective::new(&observations, scenario.receptors().len(), metric, mode).unwrap();
    let evaluator = ParallelEvaluator::new(
        2,
        Arc::new(GaussianPlume::default()),
        Arc::new(objective),
        Arc::new(scenario),
        Arc::new(EvaluationCache::new()),
        6,
    )
    .unwrap();
    (evaluator, bounds)
}

#[test]
fn test_penalized_candidates_rank_behind_every_scored_one() {
    for metric in [ErrorMetric::Squared, ErrorMetric::Relative] {
        for policy in Policy::ALL {
            let mode = match policy {
                Policy::MultiObjective => ObjectiveMode::Multi,
                _ => ObjectiveMode::Single,
            };
            let (evaluator, bounds) = zero_reading_evaluator(metric, mode);
            let candidates: Vec<Candidate> = [
                Source::new(-50.0, -50.0, 2.0, 2.5),
                Source::new(100.0, 100.0, 10.0, 1.0),
                // Strong release 2 m from the corner sensor
                Source::new(-298.6, -298.6, 2.0, 50.0),
                Source::new(0.0, 0.0, -5.0, 1.0),
                Source::new(-298.6, -298.6, -1.0, 50.0),
            ]
            .iter()
            .map(|s| Candidate::new(*s, &bounds))
            .collect();

            let mut members = evaluator.evaluate(candidates).unwrap();
            let (penalized, scored): (Vec<_>, Vec<_>) =
                members.iter().partition(|m| m.evaluation.is_penalized());
            assert_eq!(penalized.len(), 2, "{} {}", metric, policy);
            for m in &scored {
                assert!(m.objectives().iter().all(|f| *f <= MAX_SCORED_FITNESS));
                for p in &penalized {
                    assert!(m.fitness() < p.fitness(), "{} {}", metric, policy);
                }
            }

            strategy::for_options(&RunOptions::for_policy(policy)).rank(&mut members);
            assert_eq!(members.len(), 5);
            assert!(members[..3].iter().all(|m| !m.evaluation.is_penalized()), "{} {}", metric, policy);
            assert!(members[3..].iter().all(|m| m.evaluation.is_penalized()), "{} {}", metric, policy);
            for pair in members.windows(2) {
                assert!(pair[0].rank <= pair[1].rank);
            }
        }
    }
}

// =============================================================================
// Optimizer Invariants
// =============================================================================

#[test]
fn test_candidates_never_leave_bounds() {
    let (scenario, observations) = synthetic(0.1);
    let bounds = *scenario.bounds();
    let driver = InversionDriver::new(scenario, observations);

    for policy in Policy::ALL {
        let mut options = quick_options(policy);
        options.retain_populations = true;
        options.base_mutation_rate = 0.5;
        let result = driver.run(&options).unwrap();

        assert_eq!(result.history.len(), result.generations + 1);
        for record in &result.history {
            let population = record.population.as_ref().expect("populations retained");
            assert_eq!(population.generation, record.generation);
            assert_eq!(population.len(), options.population_size);
            for m in &population.members {
                assert!(m.candidate.within(&bounds), "{policy}: {:?}", m.candidate);
            }
        }
    }
}

#[test]
fn test_elitism_keeps_best_fitness_monotone() {
    let (scenario, observations) = synthetic(0.1);
    let driver = InversionDriver::new(scenario, observations);

    for policy in [Policy::Standard, Policy::Adaptive] {
        let mut options = quick_options(policy);
        options.max_generations = 60;
        options.epsilon = 0.0;
        let result = driver.run(&options).unwrap();

        for pair in result.history.windows(2) {
            assert!(pair[1].best_so_far <= pair[0].best_so_far);
            assert!(pair[1].best_fitness <= pair[0].best_fitness, "{policy} lost its elite");
        }
        let last = result.history.last().unwrap();
        assert_eq!(result.best_fitness[0], last.best_so_far);
    }
}

#[test]
fn test_best_so_far_monotone_for_multi_objective() {
    let (scenario, observations) = synthetic(0.1);
    let result = InversionDriver::new(scenario, observations)
        .run(&quick_options(Policy::MultiObjective))
        .unwrap();
    for pair in result.history.windows(2) {
        assert!(pair[1].best_so_far <= pair[0].best_so_far);
    }
}

#[test]
fn test_runs_are_reproducible() {
    let (scenario, observations) = synthetic(0.1);
    let driver = InversionDriver::new(scenario, observations).with_ground_truth(truth());

    for policy in Policy::ALL {
        let options = quick_options(policy);
        let a = driver.run(&options).unwrap();
        let b = driver.run(&RunOptions { workers: 1, ..options.clone() }).unwrap();
        assert_eq!(a, b, "{policy} differs between runs");
    }
}

#[test]
fn test_latin_hypercube_initialization() {
    let (scenario, observations) = synthetic(0.1);
    let mut options = quick_options(Policy::Standard);
    options.initialization = Initialization::LatinHypercube;
    options.max_generations = 5;
    let result = InversionDriver::new(scenario, observations).run(&options).unwrap();
    assert_eq!(result.history[0].generation, 0);
    assert!(result.history[0].diversity > 0.0);
}

// =============================================================================
// Termination
// =============================================================================

#[test]
fn test_max_generations_is_a_normal_outcome() {
    let (scenario, observations) = synthetic(0.1);
    let mut options = quick_options(Policy::Standard);
    options.max_generations = 4;
    options.epsilon = 0.0;
    let result = InversionDriver::new(scenario, observations).run(&options).unwrap();
    assert_eq!(result.termination, TerminationReason::MaxGenerations);
    assert_eq!(result.generations, 4);
    assert_eq!(result.history.len(), 5);
}

#[test]
fn test_target_reached_stops_at_initial_population() {
    let (scenario, observations) = synthetic(0.1);
    let mut options = quick_options(Policy::Standard);
    options.target_fitness = Some(1e300);
    let result = InversionDriver::new(scenario, observations).run(&options).unwrap();
    assert_eq!(result.termination, TerminationReason::TargetReached);
    assert_eq!(result.generations, 0);
}

#[test]
fn test_time_limit_returns_best_so_far() {
    let (scenario, observations) = synthetic(0.1);
    let mut options = quick_options(Policy::Adaptive);
    options.max_generations = 10_000;
    options.epsilon = 0.0;
    options.time_limit = Some(Duration::from_nanos(1));
    let result = InversionDriver::new(scenario, observations).run(&options).unwrap();
    assert_eq!(result.termination, TerminationReason::Timeout);
    assert!(result.estimate().is_some());
}

#[test]
fn test_flat_landscape_stagnates() {
    let mut options = quick_options(Policy::Standard);
    options.stagnation_window = 8;
    options.max_generations = 500;
    let result = flat_driver().run(&options).unwrap();
    assert_eq!(result.termination, TerminationReason::Stagnation);
    assert_eq!(result.generations, 8);
}

// =============================================================================
// Adaptive Policy
// =============================================================================

#[test]
fn test_adaptive_raises_mutation_rate_on_flat_landscape() {
    let mut options = quick_options(Policy::Adaptive);
    options.stagnation_window = 10;
    options.max_generations = 500;
    let base = options.base_mutation_rate;

    let result = flat_driver().run(&options).unwrap();

    let raised = result
        .history
        .iter()
        .filter(|r| (1..=options.stagnation_window).contains(&r.generation))
        .any(|r| r.mutation_rate > base);
    assert!(raised, "rates: {:?}", result.history.iter().map(|r| r.mutation_rate).collect::<Vec<_>>());
    assert!(result
        .history
        .iter()
        .all(|r| r.mutation_rate <= options.adaptive.max_rate));
}

#[test]
fn test_standard_rate_stays_fixed_on_flat_landscape() {
    let mut options = quick_options(Policy::Standard);
    options.stagnation_window = 10;
    let result = flat_driver().run(&options).unwrap();
    assert!(result
        .history
        .iter()
        .all(|r| r.mutation_rate == options.base_mutation_rate));
}

// =============================================================================
// Multi-Objective Policy
// =============================================================================

#[test]
fn test_multi_objective_exposes_pareto_front() {
    let (scenario, observations) = synthetic(0.1);
    let mut options = quick_options(Policy::MultiObjective);
    options.max_generations = 40;
    let result = InversionDriver::new(scenario, observations)
        .with_ground_truth(truth())
        .run(&options)
        .unwrap();

    let front = match &result.best {
        BestEstimate::ParetoFront(front) => front,
        other => panic!("expected a Pareto front, got {other:?}"),
    };
    assert!(!front.is_empty());
    assert!(front.iter().all(|m| m.rank == 0 && m.objectives().len() == 2));
    for a in front {
        for b in front {
            assert!(!pareto::dominates(a.objectives(), b.objectives()));
        }
    }
    for pair in front.windows(2) {
        assert!(pair[0].objectives()[0] <= pair[1].objectives()[0]);
    }

    // The representative is the lowest primary fitness on the front
    assert_eq!(result.best_fitness, front[0].objectives().to_vec());
    assert_eq!(result.estimate(), Some(*front[0].candidate.source()));

    let hv = result.hypervolume.expect("multi-objective runs report hypervolume");
    assert!((0.0..=1.0).contains(&hv));
    assert!(result.validation.is_some());
}

#[test]
fn test_single_objective_runs_report_no_hypervolume() {
    let (scenario, observations) = synthetic(0.1);
    let result = InversionDriver::new(scenario, observations)
        .run(&quick_options(Policy::Standard))
        .unwrap();
    assert!(result.hypervolume.is_none());
    assert!(matches!(result.best, BestEstimate::Single(_)));
    assert_eq!(result.best_fitness.len(), 1);
    assert!(result.uncertainty.sample_size >= 2);
}

// =============================================================================
// Driver Extras
// =============================================================================

#[test]
fn test_progress_channel_receives_every_generation() {
    let (scenario, observations) = synthetic(0.1);
    let (tx, rx) = mpsc::channel();
    let driver = InversionDriver::new(scenario, observations).with_progress(tx);
    let result = driver.run(&quick_options(Policy::Standard)).unwrap();
    drop(driver);

    let streamed: Vec<GenerationRecord> = rx.iter().collect();
    assert_eq!(streamed.len(), result.history.len());
    assert_eq!(streamed.last().map(|r| r.generation), Some(result.generations));
}

#[test]
fn test_compare_ranks_policies() {
    let (scenario, observations) = synthetic(0.1);
    let driver = InversionDriver::new(scenario, observations).with_ground_truth(truth());
    let runs: Vec<RunOptions> = Policy::ALL.iter().map(|p| quick_options(*p)).collect();

    let summary = driver.compare(&runs).unwrap();

    assert_eq!(summary.entries.len(), 3);
    assert_eq!(summary.runs.len(), 3);
    for pair in summary.entries.windows(2) {
        assert!(pair[0].score <= pair[1].score);
    }
    assert_eq!(summary.best_policy(), Some(summary.entries[0].policy));
    for entry in &summary.entries {
        assert!(entry.position_error.is_some());
        let result = summary.result(entry.policy).unwrap();
        assert_eq!(result.policy, entry.policy);
        assert_eq!(entry.evaluations, result.cache.computations);
    }
}

#[test]
fn test_compare_progress_records_carry_their_policy() {
    let (scenario, observations) = synthetic(0.1);
    let (tx, rx) = mpsc::channel();
    let driver = InversionDriver::new(scenario, observations).with_progress(tx);
    let runs: Vec<RunOptions> = Policy::ALL
        .iter()
        .map(|p| RunOptions {
            max_generations: 5,
            ..quick_options(*p)
        })
        .collect();
    let summary = driver.compare(&runs).unwrap();
    drop(driver);

    let streamed: Vec<GenerationRecord> = rx.iter().collect();
    for policy in Policy::ALL {
        let result = summary.result(policy).unwrap();
        let count = streamed.iter().filter(|r| r.policy == policy).count();
        assert_eq!(count, result.history.len(), "{}", policy);
        assert!(result.history.iter().all(|r| r.policy == policy));
    }
}

#[test]
fn test_compare_propagates_configuration_errors() {
    let (scenario, observations) = synthetic(0.1);
    let driver = InversionDriver::new(scenario, observations);
    let mut bad = quick_options(Policy::Adaptive);
    bad.tournament_size = 0;
    let err = driver
        .compare(&[quick_options(Policy::Standard), bad])
        .unwrap_err();
    assert!(err.is_configuration());
}

// =============================================================================
// Scenario Files
// =============================================================================

const SYNTHETIC_TOML: &str = r#"
[scenario]
name = "grid"

[meteorology]
wind_speed = 3.5
wind_direction = 225.0
solar_radiation = 500.0
cloud_cover = 0.3

[synthetic]
grid_size = 5
noise_level = 0.0

[truth]
x = 150.0
y = 200.0
height = 25.0
emission_rate = 2.5

[run]
policy = "adaptive"
population_size = 24
max_generations = 5
crossover = "blend"
time_limit_secs = 30.0

[run.adaptive]
max_rate = 0.4
"#;

#[test]
fn test_config_builds_synthetic_scenario() {
    let cfg: config::Root = toml::from_str(SYNTHETIC_TOML).unwrap();
    cfg.validate().unwrap();

    let inv = cfg.build().unwrap();
    assert_eq!(inv.scenario.receptors().len(), 25);
    assert_eq!(inv.observations.usable_count(), 25);
    assert_eq!(inv.truth, Some(truth()));
    let b = inv.scenario.bounds();
    assert_eq!((b.x.lower, b.x.upper), (-350.0, 350.0));
    assert_eq!((b.height.lower, b.height.upper), (0.0, 100.0));

    let options = cfg.run.to_options(None).unwrap();
    assert_eq!(options.policy, Policy::Adaptive);
    assert_eq!(options.population_size, 24);
    assert_eq!(options.stagnation_window, 50);
    assert_eq!(options.crossover, Crossover::Blend { probability: 0.9 });
    assert_eq!(options.time_limit, Some(Duration::from_secs(30)));
    assert_eq!(options.adaptive.max_rate, 0.4);
    assert_eq!(options.adaptive.diversity_threshold, 0.1);

    let result = InversionDriver::new(inv.scenario, inv.observations).run(&options).unwrap();
    assert_eq!(result.policy, Policy::Adaptive);
}

#[test]
fn test_config_policy_override() {
    let cfg: config::Root = toml::from_str(SYNTHETIC_TOML).unwrap();
    let options = cfg.run.to_options(Some(Policy::MultiObjective)).unwrap();
    assert_eq!(options.policy, Policy::MultiObjective);
    assert_eq!(options.population_size, 24);
    assert_eq!(options.adaptive.diversity_threshold, 0.15);
}

#[test]
fn test_config_explicit_sensors() {
    let text = r#"
[meteorology]
wind_speed = 5.0
wind_direction = 90.0

[bounds]
x = [-200.0, 200.0]
y = [-200.0, 200.0]
height = [0.0, 50.0]
emission_rate = [0.01, 5.0]

[[sensors]]
id = "N"
x = 0.0
y = 100.0
concentration = 4.2
uncertainty = 0.5

[[sensors]]
id = "E"
x = 100.0
y = 0.0
valid = false
concentration = 1.0

[[sensors]]
id = "W"
x = -100.0
y = 0.0
"#;
    let cfg: config::Root = toml::from_str(text).unwrap();
    cfg.validate().unwrap();
    let inv = cfg.build().unwrap();

    assert_eq!(inv.scenario.receptors()[0].z, 2.0);
    assert_eq!(inv.observations.len(), 3);
    assert_eq!(inv.observations.usable_count(), 1);
    assert_eq!(inv.observations.readings()[0].uncertainty, Some(0.5));
    assert_eq!(inv.scenario.bounds().emission_rate, ParamRange::new(0.01, 5.0));
    assert!(inv.truth.is_none());
}

#[test]
fn test_config_rejects_bad_input() {
    let both = SYNTHETIC_TOML.replace(
        "[truth]",
        "[[sensors]]\nid = \"S\"\nx = 0.0\ny = 0.0\n\n[truth]",
    );
    let cfg: config::Root = toml::from_str(&both).unwrap();
    assert!(cfg.validate().is_err());

    let calm = SYNTHETIC_TOML.replace("wind_speed = 3.5", "wind_speed = 0.0");
    let cfg: config::Root = toml::from_str(&calm).unwrap();
    assert!(cfg.validate().is_err());

    let crossover = SYNTHETIC_TOML.replace("\"blend\"", "\"uniform\"");
    let cfg: config::Root = toml::from_str(&crossover).unwrap();
    assert!(cfg.run.to_options(None).is_err());

    let no_truth = SYNTHETIC_TOML.replace("[truth]", "[unused]");
    let cfg: config::Root = toml::from_str(&no_truth).unwrap();
    assert!(cfg.validate().is_err());
}

// =============================================================================
// CSV Output
// =============================================================================

#[test]
fn test_csv_outputs() {
    let (scenario, observations) = synthetic(0.1);
    let driver = InversionDriver::new(scenario, observations);
    let single = driver.run(&quick_options(Policy::Standard)).unwrap();
    let multi = driver.run(&quick_options(Policy::MultiObjective)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("nested/history.csv");
    let estimates = dir.path().join("nested/estimates.csv");
    io::write_history(&history, &[&single, &multi]).unwrap();
    io::write_estimates(&estimates, &[&single, &multi]).unwrap();

    let text = std::fs::read_to_string(&history).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("policy,generation,best_fitness"));
    assert_eq!(lines.len(), 1 + single.history.len() + multi.history.len());
    assert!(lines[1].starts_with("standard,0,"));
    assert!(lines.last().unwrap().starts_with("multi_objective,"));

    let text = std::fs::read_to_string(&estimates).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1 + 1 + multi.best.members().len());
    assert!(lines[1].starts_with("standard,0,"));
    assert!(lines[1].ends_with(",scored"));
}
