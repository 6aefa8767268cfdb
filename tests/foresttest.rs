extern crate cutforest;

use cutforest::common::datagen::MixtureStream;
use cutforest::{forest, ForestBuilder, ForestError, RandomCutForest};

fn two_cluster_stream(num: usize, dimensions: usize, seed: u64) -> MixtureStream<f32> {
    let mut near = vec![0.0f32; dimensions];
    let mut far = vec![0.0f32; dimensions];
    near[0] = 5.0;
    far[0] = -5.0;
    let means = vec![near, far];
    let scales = vec![vec![0.1f32; dimensions], vec![0.1f32; dimensions]];
    MixtureStream::mixture(num, &means, &scales, &[0.5, 0.5], seed)
}

#[test]
fn scores_separate_outliers_from_clusters() {
    let dimensions = 4;
    let config = ForestBuilder::new(dimensions)
        .sample_size(128)
        .number_of_trees(30)
        .random_seed(17)
        .time_decay(0.1 / 128.0)
        .config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();

    let stream = two_cluster_stream(4000, dimensions, 3);
    for (i, point) in stream.data.iter().enumerate() {
        model.update(point, i as u64).unwrap();
    }
    assert!(model.is_output_ready());

    let mut inlier = vec![0.0f32; dimensions];
    inlier[0] = 5.0;
    let origin = vec![0.0f32; dimensions];
    let inlier_score = model.score(&inlier).unwrap();
    let origin_score = model.score(&origin).unwrap();
    assert!(
        origin_score > 1.3,
        "the gap between clusters should look anomalous, got {}",
        origin_score
    );
    assert!(inlier_score < origin_score);
}

#[test]
fn attribution_totals_the_score_and_names_the_axis() {
    let dimensions = 3;
    let config = ForestBuilder::new(dimensions)
        .sample_size(128)
        .number_of_trees(30)
        .random_seed(29)
        .config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();

    let means = vec![vec![0.0f32; dimensions]];
    let scales = vec![vec![1.0f32; dimensions]];
    let stream = MixtureStream::<f32>::mixture(2000, &means, &scales, &[1.0], 11);
    for (i, point) in stream.data.iter().enumerate() {
        model.update(point, i as u64).unwrap();
    }

    // anomalous only in dimension 1, on the high side
    let probe = [0.0f32, 20.0, 0.0];
    let score = model.score(&probe).unwrap();
    let attribution = model.attribution(&probe).unwrap();
    assert!((attribution.total() - score).abs() < 0.3 * score);
    assert!(attribution.high[1] > 0.7 * attribution.total());
    assert!(attribution.high[1] > 10.0 * attribution.low[1].max(attribution.high[0]));
}

#[test]
fn parallel_and_sequential_agree() {
    let run = |parallel: bool| {
        let config = ForestBuilder::new(2)
            .sample_size(64)
            .number_of_trees(10)
            .random_seed(99)
            .parallel_enabled(parallel)
            .config();
        let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
        let stream = MixtureStream::<f32>::uniform(500, 2, 0.0, 1.0, 13);
        for (i, point) in stream.data.iter().enumerate() {
            model.update(point, i as u64).unwrap();
        }
        (
            model.score(&[0.5, 0.5]).unwrap(),
            model.score(&[4.0, 4.0]).unwrap(),
            model.impute_missing_values(&[1], &[0.25, 0.0]).unwrap(),
            model.mass(),
        )
    };
    assert_eq!(run(false), run(true));
}

#[test]
fn cache_fraction_is_invisible_in_results() {
    let run = |fraction: f64| {
        let config = ForestBuilder::new(2)
            .sample_size(64)
            .number_of_trees(10)
            .random_seed(7)
            .bounding_box_cache_fraction(fraction)
            .config();
        let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
        let stream = MixtureStream::<f32>::uniform(400, 2, 0.0, 1.0, 21);
        for (i, point) in stream.data.iter().enumerate() {
            model.update(point, i as u64).unwrap();
        }
        (
            model.score(&[10.0, 10.0]).unwrap(),
            model.score(&[0.3, 0.7]).unwrap(),
            model.mass(),
        )
    };
    let full = run(1.0);
    assert_eq!(full, run(0.0));
    assert_eq!(full, run(0.3));
}

#[test]
fn reservoir_turns_over_under_time_decay() {
    let sample_size = 32;
    let config = ForestBuilder::new(1)
        .sample_size(sample_size)
        .number_of_trees(5)
        .random_seed(41)
        .time_decay(0.1 / sample_size as f64)
        .config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();

    // distribution shifts midway; decay lets the sample follow
    for i in 0..2000u64 {
        model.update(&[0.0f32], i).unwrap();
    }
    for i in 2000..4000u64 {
        model.update(&[100.0f32], i).unwrap();
    }
    assert_eq!(model.mass(), 5 * sample_size);
    let old_regime = model.score(&[0.0f32]).unwrap();
    let new_regime = model.score(&[100.0f32]).unwrap();
    assert!(
        old_regime > new_regime,
        "the old regime should have decayed out: {} vs {}",
        old_regime,
        new_regime
    );
}

#[test]
fn sequence_numbers_must_not_decrease() {
    let config = ForestBuilder::new(2).sample_size(32).number_of_trees(2).config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
    model.update(&[0.0, 0.0], 10).unwrap();
    assert_eq!(
        model.update(&[1.0, 1.0], 5),
        Err(ForestError::InvalidConfig {
            msg: "sequence numbers must be non-decreasing"
        })
    );
}

#[test]
fn constant_stream_with_dedup_shares_one_slot() {
    let config = ForestBuilder::new(2)
        .sample_size(32)
        .number_of_trees(8)
        .random_seed(3)
        .dedup_points(true)
        .output_after(1)
        .config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
    for i in 0..500u64 {
        model.update(&[7.0, -7.0], i).unwrap();
    }
    // every tree holds the same logical point with mass equal to its sample
    assert_eq!(model.mass(), 8 * 32);
    let on_point = model.score(&[7.0, -7.0]).unwrap();
    let off_point = model.score(&[0.0, 0.0]).unwrap();
    assert!(on_point < off_point);
    assert!(off_point.is_finite());
}

#[test]
fn impute_recovers_a_correlated_coordinate() {
    let config = ForestBuilder::new(2)
        .sample_size(128)
        .number_of_trees(30)
        .random_seed(53)
        .config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
    // y tracks x tightly
    let stream = MixtureStream::<f32>::uniform(2000, 1, 0.0, 1.0, 31);
    for (i, point) in stream.data.iter().enumerate() {
        let x = point[0];
        model.update(&[x, 2.0 * x], i as u64).unwrap();
    }
    let imputed = model.impute_missing_values(&[1], &[0.5, 0.0]).unwrap();
    assert_eq!(imputed.len(), 2);
    assert!(
        (imputed[1] - 1.0).abs() < 0.25,
        "expected y near 1.0, got {}",
        imputed[1]
    );
}

#[test]
fn double_precision_forest_works() {
    let config = ForestBuilder::new(2)
        .sample_size(64)
        .number_of_trees(10)
        .random_seed(61)
        .config();
    let mut model: Box<dyn RandomCutForest<f64>> = forest(config).unwrap();
    let stream = MixtureStream::<f64>::uniform(500, 2, 0.0, 1.0, 19);
    for (i, point) in stream.data.iter().enumerate() {
        model.update(point, i as u64).unwrap();
    }
    let outlier = model.score(&[50.0, 50.0]).unwrap();
    let typical = model.score(&[0.5, 0.5]).unwrap();
    assert!(outlier > typical);
}

#[test]
fn medium_tier_is_selected_for_larger_samples() {
    // sample_size above the small-tier bound forces the u16 column tier
    let config = ForestBuilder::new(2)
        .sample_size(512)
        .number_of_trees(3)
        .random_seed(5)
        .output_after(10)
        .config();
    let mut model: Box<dyn RandomCutForest<f32>> = forest(config).unwrap();
    let stream = MixtureStream::<f32>::uniform(800, 2, 0.0, 1.0, 43);
    for (i, point) in stream.data.iter().enumerate() {
        model.update(point, i as u64).unwrap();
    }
    assert!(model.score(&[5.0, 5.0]).unwrap() > 0.0);
}
