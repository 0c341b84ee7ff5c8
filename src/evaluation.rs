//! Top-K ranking evaluation.
//!
//! The evaluator turns a dense per-user score matrix into averaged
//! ranking metrics. Per-user work is independent, so rows fan out over a
//! dedicated worker pool; per-user metric vectors are collected in row
//! order and reduced sequentially, which makes the result identical for
//! any pool size.

use std::fmt;

use failure::{Error, Fail};
use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::data::Dataset;
use crate::{ItemId, ItemScorer};

/// Workers per available core, the thread heuristic evaluation was tuned
/// with.
const THREAD_MULTIPLIER: usize = 5;

/// Ranking metrics the evaluator reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// Indicator of a relevant item within the cutoff.
    HitRatio,
    /// Reciprocal rank of the first relevant item within the cutoff.
    Mrr,
    /// Log2-discounted gain of the first relevant item within the cutoff.
    Ndcg,
    /// Relevant items within the cutoff over the cutoff.
    Precision,
    /// Relevant items within the cutoff over the ground-truth size.
    Recall,
}

impl Metric {
    /// Short name used in metric headers.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::HitRatio => "HR",
            Metric::Mrr => "MRR",
            Metric::Ndcg => "NDCG",
            Metric::Precision => "Precision",
            Metric::Recall => "Recall",
        }
    }
}

/// Evaluation error types.
#[derive(Debug, Fail)]
pub enum EvaluationError {
    /// Score matrix and ground truth disagree on the number of users.
    #[fail(
        display = "score matrix has {} rows but ground truth has {} entries",
        rows, truths
    )]
    LengthMismatch {
        /// Score matrix rows.
        rows: usize,
        /// Ground truth entries.
        truths: usize,
    },
    /// A ground-truth column lies outside the score matrix.
    #[fail(
        display = "ground truth column {} of row {} is out of range ({} columns)",
        column, row, columns
    )]
    TruthOutOfRange {
        /// The offending row.
        row: usize,
        /// The offending column.
        column: usize,
        /// Number of score columns.
        columns: usize,
    },
    /// The worker pool could not be constructed.
    #[fail(display = "could not build the evaluation worker pool: {}", reason)]
    PoolConstruction {
        /// The underlying builder error.
        reason: String,
    },
}

/// Averaged per-cutoff ranking metrics.
#[derive(Clone, Debug)]
pub struct MetricsTable {
    top_k: usize,
    num_users: usize,
    metrics: Vec<(Metric, Vec<f32>)>,
}

impl MetricsTable {
    fn new(top_k: usize, num_users: usize, metrics: Vec<(Metric, Vec<f32>)>) -> Self {
        MetricsTable {
            top_k,
            num_users,
            metrics,
        }
    }

    /// The largest cutoff evaluated.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Number of users with valid ground truth that were aggregated.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// The mean value of a metric at a 1-based cutoff.
    pub fn get(&self, metric: Metric, cutoff: usize) -> Option<f32> {
        if cutoff == 0 || cutoff > self.top_k {
            return None;
        }

        self.metrics
            .iter()
            .find(|(name, _)| *name == metric)
            .map(|(_, values)| values[cutoff - 1])
    }

    /// Iterates over (metric, per-cutoff means) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, &[f32])> {
        self.metrics
            .iter()
            .map(|(metric, values)| (*metric, values.as_slice()))
    }

    /// Human-readable column descriptors (`HR@1`, …, `NDCG@k`), in the
    /// order `iter` yields values.
    pub fn headers(&self) -> Vec<String> {
        self.metrics
            .iter()
            .flat_map(|(metric, _)| {
                (1..=self.top_k).map(move |cutoff| format!("{}@{}", metric.name(), cutoff))
            })
            .collect()
    }
}

impl fmt::Display for MetricsTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (metric, values) in &self.metrics {
            writeln!(
                f,
                "{}@{}: {:.4}",
                metric.name(),
                self.top_k,
                values[self.top_k - 1]
            )?;
        }

        write!(f, "averaged over {} users", self.num_users)
    }
}

/// Computes top-K ranking metrics over a dense score matrix, in parallel
/// over users.
pub struct RankingEvaluator {
    top_k: usize,
    pool: rayon::ThreadPool,
}

impl RankingEvaluator {
    /// Creates an evaluator reporting cutoffs `1..=top_k`, with the
    /// default worker pool.
    pub fn new(top_k: usize) -> Result<Self, EvaluationError> {
        Self::with_num_threads(top_k, default_num_threads())
    }

    /// Creates an evaluator with an explicit worker-pool size.
    pub fn with_num_threads(top_k: usize, num_threads: usize) -> Result<Self, EvaluationError> {
        assert!(top_k > 0, "top_k must be positive");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .build()
            .map_err(|error| EvaluationError::PoolConstruction {
                reason: error.to_string(),
            })?;

        Ok(RankingEvaluator { top_k, pool })
    }

    /// Leave-one-out evaluation: one ground-truth column per score row.
    ///
    /// Scores must be finite; ties rank by ascending column index.
    pub fn evaluate_loo(
        &self,
        scores: ArrayView2<f32>,
        truth: &[usize],
    ) -> Result<MetricsTable, EvaluationError> {
        self.validate(scores, truth.iter().map(std::slice::from_ref))?;

        let top_k = self.top_k;
        let rows: Vec<ArrayView1<f32>> = scores.outer_iter().collect();
        let per_user: Vec<Vec<f32>> = self.pool.install(|| {
            rows.par_iter()
                .zip(truth.par_iter())
                .map(|(row, &column)| loo_user_metrics(*row, column, top_k))
                .collect()
        });

        debug!("leave-one-out evaluation over {} users", per_user.len());

        Ok(reduce(
            per_user.into_iter().map(Some).collect(),
            &[Metric::HitRatio, Metric::Mrr, Metric::Ndcg],
            top_k,
        ))
    }

    /// Fold-out evaluation: a ground-truth column set per score row.
    /// Rows with an empty set are excluded from aggregation.
    pub fn evaluate_foldout(
        &self,
        scores: ArrayView2<f32>,
        truth: &[Vec<usize>],
    ) -> Result<MetricsTable, EvaluationError> {
        self.validate(scores, truth.iter().map(|x| x.as_slice()))?;

        let top_k = self.top_k;
        let rows: Vec<ArrayView1<f32>> = scores.outer_iter().collect();
        let per_user: Vec<Option<Vec<f32>>> = self.pool.install(|| {
            rows.par_iter()
                .zip(truth.par_iter())
                .map(|(row, columns)| {
                    if columns.is_empty() {
                        None
                    } else {
                        Some(foldout_user_metrics(*row, columns, top_k))
                    }
                })
                .collect()
        });

        debug!(
            "fold-out evaluation over {} users ({} with ground truth)",
            truth.len(),
            per_user.iter().filter(|x| x.is_some()).count()
        );

        Ok(reduce(
            per_user,
            &[
                Metric::HitRatio,
                Metric::Mrr,
                Metric::Ndcg,
                Metric::Precision,
                Metric::Recall,
            ],
            top_k,
        ))
    }

    /// Leave-one-out evaluation of a black-box scorer against a prepared
    /// dataset.
    ///
    /// Users with a held-out item are scored over their negative
    /// evaluation candidates plus the held-out item (or over all items
    /// when the split has no candidates).
    pub fn evaluate_loo_scorer<T: ItemScorer>(
        &self,
        scorer: &T,
        dataset: &Dataset,
    ) -> Result<MetricsTable, Error> {
        let mut rows = Vec::new();
        let mut truth = Vec::new();
        let mut num_columns = None;

        for user in dataset.test().iter_users() {
            let held_out = match user.item_ids.first() {
                Some(&item) => item,
                None => continue,
            };

            let negatives = &dataset.negative_candidates()[user.user_id];
            let candidates: Vec<ItemId> = if negatives.is_empty() {
                (0..dataset.num_items()).collect()
            } else {
                let mut candidates = negatives.clone();
                candidates.push(held_out);
                candidates
            };

            let truth_column = if negatives.is_empty() {
                held_out
            } else {
                candidates.len() - 1
            };

            let scores = scorer.score(user.user_id, &candidates)?;
            match num_columns {
                None => num_columns = Some(scores.len()),
                Some(columns) => assert_eq!(
                    columns,
                    scores.len(),
                    "scorer returned rows of differing widths"
                ),
            }

            rows.push(scores);
            truth.push(truth_column);
        }

        let columns = num_columns.unwrap_or(0);
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let matrix = Array2::from_shape_vec((truth.len(), columns), flat)?;

        Ok(self.evaluate_loo(matrix.view(), &truth)?)
    }

    /// Fold-out evaluation of a black-box scorer against a prepared
    /// dataset: every user with held-out items is scored over all items.
    pub fn evaluate_foldout_scorer<T: ItemScorer>(
        &self,
        scorer: &T,
        dataset: &Dataset,
    ) -> Result<MetricsTable, Error> {
        let all_items: Vec<ItemId> = (0..dataset.num_items()).collect();
        let mut rows = Vec::new();
        let mut truth = Vec::new();

        for user in dataset.test().iter_users() {
            if user.item_ids.is_empty() {
                continue;
            }

            rows.push(scorer.score(user.user_id, &all_items)?);
            truth.push(user.item_ids.to_vec());
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let matrix = Array2::from_shape_vec((truth.len(), all_items.len()), flat)?;

        Ok(self.evaluate_foldout(matrix.view(), &truth)?)
    }

    fn validate<'a, I>(&self, scores: ArrayView2<f32>, truth: I) -> Result<(), EvaluationError>
    where
        I: ExactSizeIterator<Item = &'a [usize]>,
    {
        if scores.nrows() != truth.len() {
            return Err(EvaluationError::LengthMismatch {
                rows: scores.nrows(),
                truths: truth.len(),
            });
        }

        for (row, columns) in truth.enumerate() {
            for &column in columns {
                if column >= scores.ncols() {
                    return Err(EvaluationError::TruthOutOfRange {
                        row,
                        column,
                        columns: scores.ncols(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|x| x.get())
        .unwrap_or(1)
        * THREAD_MULTIPLIER
}

/// 1-based rank of `column` when columns order by descending score,
/// ties by ascending column index.
fn rank_of(row: ArrayView1<f32>, column: usize) -> usize {
    let target = row[column];
    let mut rank = 1;

    for (idx, &score) in row.iter().enumerate() {
        if score > target || (score == target && idx < column) {
            rank += 1;
        }
    }

    rank
}

fn loo_user_metrics(row: ArrayView1<f32>, column: usize, top_k: usize) -> Vec<f32> {
    let rank = rank_of(row, column);
    let mut metrics = Vec::with_capacity(3 * top_k);

    // HR, then MRR, then NDCG, each over cutoffs 1..=top_k.
    for cutoff in 1..=top_k {
        metrics.push(if rank <= cutoff { 1.0 } else { 0.0 });
    }
    for cutoff in 1..=top_k {
        metrics.push(if rank <= cutoff { 1.0 / rank as f32 } else { 0.0 });
    }
    for cutoff in 1..=top_k {
        metrics.push(if rank <= cutoff {
            1.0 / ((rank + 1) as f32).log2()
        } else {
            0.0
        });
    }

    metrics
}

fn foldout_user_metrics(row: ArrayView1<f32>, columns: &[usize], top_k: usize) -> Vec<f32> {
    let mut ranks: Vec<usize> = columns.iter().map(|&column| rank_of(row, column)).collect();
    ranks.sort_unstable();

    let first = ranks[0];
    let mut metrics = Vec::with_capacity(5 * top_k);

    for cutoff in 1..=top_k {
        metrics.push(if first <= cutoff { 1.0 } else { 0.0 });
    }
    for cutoff in 1..=top_k {
        metrics.push(if first <= cutoff { 1.0 / first as f32 } else { 0.0 });
    }
    for cutoff in 1..=top_k {
        metrics.push(if first <= cutoff {
            1.0 / ((first + 1) as f32).log2()
        } else {
            0.0
        });
    }
    for cutoff in 1..=top_k {
        let hits = ranks.iter().take_while(|&&rank| rank <= cutoff).count();
        metrics.push(hits as f32 / cutoff as f32);
    }
    for cutoff in 1..=top_k {
        let hits = ranks.iter().take_while(|&&rank| rank <= cutoff).count();
        metrics.push(hits as f32 / columns.len() as f32);
    }

    metrics
}

/// Sums per-user metric vectors in row order and divides by the number
/// of contributing users. The reduction is order-independent with
/// respect to worker scheduling because the inputs arrive already
/// ordered.
fn reduce(per_user: Vec<Option<Vec<f32>>>, metrics: &[Metric], top_k: usize) -> MetricsTable {
    let width = metrics.len() * top_k;
    let mut sums = vec![0.0f64; width];
    let mut count = 0usize;

    for user in per_user.into_iter().flatten() {
        for (sum, value) in sums.iter_mut().zip(user) {
            *sum += f64::from(value);
        }
        count += 1;
    }

    let denominator = count.max(1) as f64;
    let means: Vec<f32> = sums.into_iter().map(|x| (x / denominator) as f32).collect();

    let table = metrics
        .iter()
        .enumerate()
        .map(|(idx, metric)| (*metric, means[idx * top_k..(idx + 1) * top_k].to_vec()))
        .collect();

    MetricsTable::new(top_k, count, table)
}
