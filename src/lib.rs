#![deny(missing_docs)]
//! # reckit
//!
//! `reckit` prepares interaction logs for training implicit-feedback
//! recommenders and scores trained models against held-out data. It
//! covers the plumbing around a model rather than the model itself:
//! filtering and splitting raw logs, sampling negatives that never
//! collide with a user's known positives, generating per-epoch training
//! instances, and computing top-K ranking metrics in parallel over
//! users. The model stays a black box that turns candidate items into
//! scores.
//!
//! ## Example
//!
//! Split a raw log, generate an epoch of training pairs, and evaluate a
//! score matrix:
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_xorshift::XorShiftRng;
//!
//! use reckit::evaluation::{Metric, RankingEvaluator};
//! use reckit::generation::{generate_epoch, Context, Strategy, Style};
//! use reckit::split::{DatasetPreparer, SplitConfig, SplitProtocol};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let log = dir.path().join("interactions.tsv");
//!
//! let mut rows = String::new();
//! for (user, item, time) in &[
//!     ("u0", "i0", 0), ("u0", "i1", 1), ("u0", "i2", 2), ("u0", "i3", 3),
//!     ("u1", "i1", 0), ("u1", "i2", 1), ("u1", "i3", 2), ("u1", "i4", 3),
//!     ("u2", "i0", 0), ("u2", "i4", 1), ("u2", "i5", 2),
//! ] {
//!     rows.push_str(&format!("{}\t{}\t1\t{}\n", user, item, time));
//! }
//! std::fs::write(&log, rows).unwrap();
//!
//! let config = SplitConfig::new(&log, "example")
//!     .output_dir(dir.path())
//!     .protocol(SplitProtocol::LeaveOneOut)
//!     .test_negatives(2);
//!
//! let mut rng = XorShiftRng::seed_from_u64(42);
//! let dataset = DatasetPreparer::new(&config)
//!     .load_or_prepare(&mut rng)
//!     .unwrap();
//!
//! let strategy = Strategy {
//!     style: Style::Pairwise,
//!     context: Context::None,
//! };
//! let batch = generate_epoch(&dataset, &strategy, &mut rng).unwrap();
//! assert!(!batch.is_empty());
//!
//! let evaluator = RankingEvaluator::with_num_threads(3, 2).unwrap();
//! let scores = ndarray::arr2(&[[0.9, 0.3, 0.1]]);
//! let metrics = evaluator.evaluate_loo(scores.view(), &[0]).unwrap();
//! assert_eq!(metrics.get(Metric::HitRatio, 1), Some(1.0));
//! ```

use failure::Fail;

pub mod data;
pub mod evaluation;
pub mod generation;
pub mod sampling;
pub mod split;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "invalid prediction value: non-finite or not a number")]
    InvalidPredictionValue,
}

/// Trait describing trained models as black boxes that, given a user
/// and candidate items, return one score per item.
pub trait ItemScorer {
    /// Scores `item_ids` for `user_id`; higher means more likely to be
    /// interacted with.
    fn score(&self, user_id: UserId, item_ids: &[ItemId]) -> Result<Vec<f32>, PredictionError>;
}
