extern crate cutforest;

use cutforest::common::datagen::MixtureStream;
use cutforest::state::ForestState;
use cutforest::{forest, forest_from_state, ForestBuilder, RandomCutForest};

fn trained_forest(seed: u64) -> Box<dyn RandomCutForest<f32>> {
    let config = ForestBuilder::new(3)
        .sample_size(64)
        .number_of_trees(10)
        .random_seed(seed)
        .store_sequence_indexes(true)
        .center_of_mass(true)
        .config();
    let mut model = forest(config).unwrap();
    let stream = MixtureStream::<f32>::uniform(600, 3, -2.0, 2.0, seed + 1);
    for (i, point) in stream.data.iter().enumerate() {
        model.update(point, i as u64).unwrap();
    }
    model
}

#[test]
fn state_round_trip_preserves_answers() {
    let model = trained_forest(71);
    let state = model.state().unwrap();
    let encoded = serde_json::to_string(&state).unwrap();
    let decoded: ForestState<f32> = serde_json::from_str(&encoded).unwrap();
    let restored = forest_from_state(&decoded).unwrap();

    assert_eq!(restored.mass(), model.mass());
    assert_eq!(restored.entries_seen(), model.entries_seen());
    for probe in [
        vec![0.0f32, 0.0, 0.0],
        vec![1.5, -1.5, 0.3],
        vec![10.0, 10.0, 10.0],
    ] {
        let before = model.score(&probe).unwrap();
        let after = restored.score(&probe).unwrap();
        assert!(
            (before - after).abs() <= 1e-4,
            "score drifted across the round trip: {} vs {}",
            before,
            after
        );
    }
}

#[test]
fn restored_forest_continues_identically() {
    let mut original = trained_forest(83);
    let state = original.state().unwrap();
    let mut restored = forest_from_state(&state).unwrap();

    let stream = MixtureStream::<f32>::uniform(200, 3, -2.0, 2.0, 12);
    for (i, point) in stream.data.iter().enumerate() {
        let seq = 600 + i as u64;
        original.update(point, seq).unwrap();
        restored.update(point, seq).unwrap();
    }
    assert_eq!(original.mass(), restored.mass());
    for probe in [vec![0.5f32, 0.5, 0.5], vec![-3.0, 3.0, 0.0]] {
        let a = original.score(&probe).unwrap();
        let b = restored.score(&probe).unwrap();
        assert!(
            (a - b).abs() <= 1e-4,
            "continuation diverged: {} vs {}",
            a,
            b
        );
    }
}

#[test]
fn incompatible_precision_is_rejected() {
    let model = trained_forest(91);
    let state = model.state().unwrap();
    let encoded = serde_json::to_string(&state).unwrap();
    // a single-precision capture cannot restore a double-precision forest
    let decoded: Result<ForestState<f64>, _> = serde_json::from_str(&encoded);
    if let Ok(state) = decoded {
        assert!(forest_from_state::<f64>(&state).is_err());
    }
}

#[test]
fn capture_is_deterministic_per_seed() {
    let first = trained_forest(101).state().unwrap();
    let second = trained_forest(101).state().unwrap();
    assert_eq!(first.entries_seen, second.entries_seen);
    assert_eq!(first.trees.len(), second.trees.len());
    for (a, b) in first.trees.iter().zip(&second.trees) {
        assert_eq!(a.root, b.root);
        assert_eq!(a.mass, b.mass);
        assert_eq!(a.seeds, b.seeds);
        assert_eq!(a.columns, b.columns);
        assert_eq!(a.sampler.entries, b.sampler.entries);
    }
}
