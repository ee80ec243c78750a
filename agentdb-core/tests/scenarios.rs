//! End-to-end scenarios across the core subsystems.

use agentdb_core::capability::CapabilityIndex;
use agentdb_core::compress::{CompressionConfig, CompressionManager, PqConfig, Tier};
use agentdb_core::embeddings::{FixtureEmbedder, MockEmbedder};
use agentdb_core::episode::{EpisodeStore, NewEpisode, RetrievalOptions};
use agentdb_core::index::{HnswConfig, HnswIndex};
use agentdb_core::routing::{ConfirmationLevel, PipelineGenerator, RoutingConfig, RoutingEngine};
use agentdb_core::vector::{magnitude, mean_squared_error, normalize};
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tempfile::TempDir;

fn unit_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    normalize(&mut v);
    v
}

/// Store three axis vectors; the nearest neighbor of the first axis is
/// itself at similarity 1.0 and the runner-up is orthogonal.
#[test]
fn store_and_retrieve_axis_vectors() {
    let e1 = vec![1.0, 0.0, 0.0, 0.0];
    let e2 = vec![0.0, 1.0, 0.0, 0.0];
    let e3 = vec![0.0, 0.0, 1.0, 0.0];

    let mut index = HnswIndex::new(HnswConfig::new(4));
    index.add("a", e1.clone()).unwrap();
    index.add("b", e2).unwrap();
    index.add("c", e3).unwrap();

    let hits = index.search(&e1, 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert!((1.0 - hits[0].distance - 1.0).abs() < 1e-5, "similarity 1.0");
    assert!(hits[1].id == "b" || hits[1].id == "c");
    assert!((1.0 - hits[1].distance).abs() < 1e-5, "similarity 0.0");
}

/// Twenty touches keep a vector hot; sleeping past the decay window
/// demotes it, and the tier sequence never moves backward.
#[test]
fn tier_sequence_never_regresses() {
    let mut config = CompressionConfig::new(16);
    config.pq = PqConfig {
        num_subvectors: 4,
        seed: Some(5),
        ..PqConfig::default()
    };
    let mut manager = CompressionManager::new(config);

    let mut rng = StdRng::seed_from_u64(11);
    for i in 0..120 {
        manager
            .store(&format!("seed{i}"), unit_vector(&mut rng, 16))
            .unwrap();
    }
    manager.store("x", unit_vector(&mut rng, 16)).unwrap();
    manager.train_codebooks().unwrap();

    let mut observed = vec![manager.tier_of("x").unwrap()];
    let start = Utc::now();
    for _ in 0..20 {
        manager.retrieve_at("x", start).unwrap();
        observed.push(manager.tier_of("x").unwrap());
    }
    assert_eq!(manager.tier_of("x"), Some(Tier::Hot));

    // Sleep past the decay window, then run the transition check.
    manager.decay_heat_at(start + Duration::hours(80));
    manager.check_transitions();
    observed.push(manager.tier_of("x").unwrap());

    for pair in observed.windows(2) {
        assert!(pair[0] <= pair[1], "tier regressed: {observed:?}");
    }
}

/// Uniformly plausible candidates force a low-confidence select decision
/// that lists five alternatives.
#[tokio::test]
async fn low_confidence_routing_selects_from_top_five() {
    let agents = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    for i in 0..8 {
        std::fs::write(
            agents.path().join(format!("agent{i}.md")),
            format!("# agent{i}\nGeneralist number {i}"),
        )
        .unwrap();
    }
    let mut index = CapabilityIndex::new(
        agents.path().to_path_buf(),
        cache.path().to_path_buf(),
        32,
    );
    let embedder = MockEmbedder::new(32);
    index.load_or_rebuild(&embedder).await.unwrap();

    let engine = RoutingEngine::new(RoutingConfig {
        min_similarity: -1.0,
        top_k: 8,
        ..RoutingConfig::default()
    });
    let decision = engine
        .route("an unrelated task", &[], &embedder, &index)
        .await
        .unwrap();

    assert_eq!(decision.level, ConfirmationLevel::Select);
    assert_eq!(decision.alternatives.len(), 5);
    assert!(decision.confidence < 0.5);
}

/// The four-stage writing pipeline from task text to stage plan.
#[tokio::test]
async fn four_stage_pipeline_plan() {
    let agents = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    for key in ["researcher", "drafter", "writer", "reviewer"] {
        std::fs::write(
            agents.path().join(format!("{key}.md")),
            format!("# {key}\nHandles {key} work"),
        )
        .unwrap();
    }
    let mut index = CapabilityIndex::new(
        agents.path().to_path_buf(),
        cache.path().to_path_buf(),
        32,
    );
    let embedder = MockEmbedder::new(32);
    index.load_or_rebuild(&embedder).await.unwrap();

    let engine = RoutingEngine::new(RoutingConfig {
        min_similarity: -1.0,
        ..RoutingConfig::default()
    });
    let pipeline = PipelineGenerator::default()
        .generate(
            "research current lit then draft an outline then write chapter 1 then review",
            &engine,
            &embedder,
            &index,
        )
        .await
        .unwrap();

    assert_eq!(pipeline.stages.len(), 4);
    for (stage, prefix) in pipeline.stages.iter().zip(["research", "draft", "write", "review"]) {
        assert!(
            stage.name.starts_with(prefix),
            "stage '{}' does not start with '{prefix}'",
            stage.name
        );
    }
    let deps: Vec<Vec<usize>> = pipeline.stages.iter().map(|s| s.depends_on.clone()).collect();
    assert_eq!(deps, vec![vec![], vec![0], vec![1], vec![2]]);
    let min = pipeline
        .stages
        .iter()
        .map(|s| s.confidence)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(pipeline.overall_confidence, min);
}

/// Reconstruction norms stay within each tier's bound.
#[test]
fn reconstruction_norms_stay_within_tier_bounds() {
    let dim = 32;
    let mut config = CompressionConfig::new(dim);
    config.pq = PqConfig {
        num_subvectors: 8,
        seed: Some(17),
        ..PqConfig::default()
    };
    let mut manager = CompressionManager::new(config);

    let mut rng = StdRng::seed_from_u64(23);
    for i in 0..200 {
        manager
            .store(&format!("v{i}"), unit_vector(&mut rng, dim))
            .unwrap();
    }
    manager.train_codebooks().unwrap();

    for (tier, bound) in [
        (Tier::Warm, 0.0001f32),
        (Tier::Cool, 0.02),
        (Tier::Cold, 0.05),
        (Tier::Frozen, 0.10),
    ] {
        let id = format!("v{}", match tier {
            Tier::Warm => 1,
            Tier::Cool => 2,
            Tier::Cold => 3,
            _ => 4,
        });
        let original = manager.peek(&id).unwrap().unwrap();
        manager.transition_tier(&id, tier).unwrap();
        let decoded = manager.peek(&id).unwrap().unwrap();

        if tier == Tier::Frozen {
            // Binary decode is similarity-preserving, not faithful; its
            // norm is unit by construction.
            assert!((magnitude(&decoded) - 1.0).abs() <= bound);
        } else {
            assert!(
                mean_squared_error(&original, &decoded) <= bound,
                "{tier} reconstruction out of bound"
            );
            assert!((magnitude(&decoded) - 1.0).abs() <= bound.sqrt() + 0.01);
        }
    }
}

/// Episode flow: store, retrieve with fixture geometry, record outcomes.
#[tokio::test]
async fn episode_flow_with_fixture_embeddings() {
    let embedder = FixtureEmbedder::new(
        4,
        vec![
            ("deploy the api".into(), vec![1.0, 0.0, 0.0, 0.0]),
            ("deploy the service".into(), vec![0.98, 0.199, 0.0, 0.0]),
            ("write a poem".into(), vec![0.0, 0.0, 1.0, 0.0]),
        ],
    );
    let mut store = EpisodeStore::with_dimension(4);
    for task in ["deploy the api", "write a poem"] {
        store
            .store(
                NewEpisode {
                    task_text: task.into(),
                    answer_text: format!("how to {task}"),
                    agent_type: "agent".into(),
                    reasoning_trace: None,
                    domain: "general".into(),
                    tags: Vec::new(),
                },
                &embedder,
            )
            .await
            .unwrap();
    }

    let results = store
        .retrieve("deploy the service", &RetrievalOptions::default(), &embedder)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].episode.task_text, "deploy the api");
    assert!(results[0].similarity > 0.9);
}
