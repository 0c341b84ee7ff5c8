//! Epoch training-instance generation.
//!
//! Each strategy walks the training matrix and produces one epoch's worth
//! of aligned instance vectors: every eligible (user, positive) pair is
//! covered exactly once, and negatives are drawn through the exclusion
//! sampler so they never collide with the user's training items. Batches
//! are ephemeral; callers regenerate them every epoch.

use std::collections::HashSet;

use failure::Fail;
use itertools::izip;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::sampling::{sample_excluding, SamplingError};
use crate::{ItemId, UserId};

/// Whether instances pair positives with negatives or carry labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    /// One (positive, negative) pair per drawn negative.
    Pairwise,
    /// One instance labeled 1.0 per positive plus `num_negatives`
    /// instances labeled 0.0.
    Pointwise {
        /// Negatives drawn per positive.
        num_negatives: usize,
    },
}

/// The context each instance carries alongside its positive item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Context {
    /// No context.
    None,
    /// The single item preceding the positive in the user's ordered
    /// history.
    FirstOrder,
    /// The fixed-size window of items preceding the positive.
    HighOrder(usize),
    /// The user's full history with the positive removed; negatives see
    /// the unmodified history.
    FullHistory,
    /// Full-history context plus a recency window of the given size.
    FullHistoryWindowed(usize),
}

/// A generation strategy: instance style plus context shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    /// Pairwise or pointwise.
    pub style: Style,
    /// Context shape.
    pub context: Context,
}

/// Instance-generation error types.
#[derive(Debug, Fail)]
pub enum GenerationError {
    /// A sequential context was requested on a split without timestamps.
    #[fail(display = "strategy requires time-ordered histories, but the split has no timestamps")]
    MissingTimestamps,
    /// Negative sampling failed; the sampler error is reported unchanged.
    #[fail(display = "{}", _0)]
    Sampling(#[fail(cause)] SamplingError),
}

impl From<SamplingError> for GenerationError {
    fn from(error: SamplingError) -> Self {
        GenerationError::Sampling(error)
    }
}

/// Aligned (user, positive, negative) triplets.
#[derive(Clone, Debug, Default)]
pub struct PairwiseInstances {
    /// User per instance.
    pub users: Vec<UserId>,
    /// Positive item per instance.
    pub positives: Vec<ItemId>,
    /// Negative item per instance.
    pub negatives: Vec<ItemId>,
}

/// Pairwise triplets with a recent-item window per instance.
#[derive(Clone, Debug, Default)]
pub struct PairwiseRecencyInstances {
    /// User per instance.
    pub users: Vec<UserId>,
    /// Positive item per instance.
    pub positives: Vec<ItemId>,
    /// Items preceding the positive, chronological order.
    pub recent: Vec<Vec<ItemId>>,
    /// Negative item per instance.
    pub negatives: Vec<ItemId>,
}

/// Pairwise triplets with full-history contexts.
#[derive(Clone, Debug, Default)]
pub struct PairwiseHistoryInstances {
    /// User per instance.
    pub users: Vec<UserId>,
    /// The user's history minus the positive item.
    pub positive_histories: Vec<Vec<ItemId>>,
    /// Lengths of `positive_histories`.
    pub positive_lengths: Vec<usize>,
    /// The user's unmodified history, seen by the negative side.
    pub negative_histories: Vec<Vec<ItemId>>,
    /// Lengths of `negative_histories`.
    pub negative_lengths: Vec<usize>,
    /// Positive item per instance.
    pub positives: Vec<ItemId>,
    /// Negative item per instance.
    pub negatives: Vec<ItemId>,
}

/// Full-history pairwise triplets plus a recency window per instance.
#[derive(Clone, Debug, Default)]
pub struct PairwiseHistoryRecencyInstances {
    /// The underlying full-history instances.
    pub history: PairwiseHistoryInstances,
    /// Items preceding the positive, most recent first.
    pub recent: Vec<Vec<ItemId>>,
}

/// Aligned (user, item, label) instances.
#[derive(Clone, Debug, Default)]
pub struct PointwiseInstances {
    /// User per instance.
    pub users: Vec<UserId>,
    /// Scored item per instance.
    pub items: Vec<ItemId>,
    /// 1.0 for positives, 0.0 for sampled negatives.
    pub labels: Vec<f32>,
}

/// Pointwise instances with a recent-item window per instance.
#[derive(Clone, Debug, Default)]
pub struct PointwiseRecencyInstances {
    /// User per instance.
    pub users: Vec<UserId>,
    /// Scored item per instance.
    pub items: Vec<ItemId>,
    /// Items preceding the target, chronological order.
    pub recent: Vec<Vec<ItemId>>,
    /// 1.0 for positives, 0.0 for sampled negatives.
    pub labels: Vec<f32>,
}

/// Pointwise instances with full-history contexts.
#[derive(Clone, Debug, Default)]
pub struct PointwiseHistoryInstances {
    /// User per instance.
    pub users: Vec<UserId>,
    /// Context history: minus the target for positives, unmodified for
    /// negatives.
    pub histories: Vec<Vec<ItemId>>,
    /// Lengths of `histories`.
    pub lengths: Vec<usize>,
    /// Scored item per instance.
    pub items: Vec<ItemId>,
    /// 1.0 for positives, 0.0 for sampled negatives.
    pub labels: Vec<f32>,
}

/// Full-history pointwise instances plus a recency window per instance.
#[derive(Clone, Debug, Default)]
pub struct PointwiseHistoryRecencyInstances {
    /// The underlying full-history instances.
    pub history: PointwiseHistoryInstances,
    /// Items preceding the target, most recent first.
    pub recent: Vec<Vec<ItemId>>,
}

/// One epoch of training instances, shaped by the strategy that
/// produced them.
#[derive(Clone, Debug)]
pub enum EpochInstances {
    /// Plain pairwise triplets.
    Pairwise(PairwiseInstances),
    /// Pairwise with recency windows.
    PairwiseRecency(PairwiseRecencyInstances),
    /// Pairwise with full-history contexts.
    PairwiseHistory(PairwiseHistoryInstances),
    /// Pairwise with full-history contexts and recency windows.
    PairwiseHistoryRecency(PairwiseHistoryRecencyInstances),
    /// Plain pointwise instances.
    Pointwise(PointwiseInstances),
    /// Pointwise with recency windows.
    PointwiseRecency(PointwiseRecencyInstances),
    /// Pointwise with full-history contexts.
    PointwiseHistory(PointwiseHistoryInstances),
    /// Pointwise with full-history contexts and recency windows.
    PointwiseHistoryRecency(PointwiseHistoryRecencyInstances),
}

impl EpochInstances {
    /// Number of instances in the batch.
    pub fn len(&self) -> usize {
        match self {
            EpochInstances::Pairwise(x) => x.users.len(),
            EpochInstances::PairwiseRecency(x) => x.users.len(),
            EpochInstances::PairwiseHistory(x) => x.users.len(),
            EpochInstances::PairwiseHistoryRecency(x) => x.history.users.len(),
            EpochInstances::Pointwise(x) => x.users.len(),
            EpochInstances::PointwiseRecency(x) => x.users.len(),
            EpochInstances::PointwiseHistory(x) => x.users.len(),
            EpochInstances::PointwiseHistoryRecency(x) => x.history.users.len(),
        }
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces one epoch of training instances for the given strategy.
///
/// Users with no eligible positives under the strategy are skipped;
/// insufficient-candidate failures from the negative sampler are
/// reported unchanged.
pub fn generate_epoch<R: Rng>(
    dataset: &Dataset,
    strategy: &Strategy,
    rng: &mut R,
) -> Result<EpochInstances, GenerationError> {
    let sequential = matches!(
        strategy.context,
        Context::FirstOrder | Context::HighOrder(_) | Context::FullHistoryWindowed(_)
    );
    if sequential && !dataset.train().has_timestamps() {
        return Err(GenerationError::MissingTimestamps);
    }

    match (strategy.style, strategy.context) {
        (Style::Pairwise, Context::None) => Ok(EpochInstances::Pairwise(pairwise_plain(dataset, rng)?)),
        (Style::Pairwise, Context::FirstOrder) => Ok(EpochInstances::PairwiseRecency(
            pairwise_recency(dataset, 1, rng)?,
        )),
        (Style::Pairwise, Context::HighOrder(order)) => Ok(EpochInstances::PairwiseRecency(
            pairwise_recency(dataset, order, rng)?,
        )),
        (Style::Pairwise, Context::FullHistory) => Ok(EpochInstances::PairwiseHistory(
            pairwise_history(dataset, rng)?,
        )),
        (Style::Pairwise, Context::FullHistoryWindowed(order)) => Ok(
            EpochInstances::PairwiseHistoryRecency(pairwise_history_recency(dataset, order, rng)?),
        ),
        (Style::Pointwise { num_negatives }, Context::None) => Ok(EpochInstances::Pointwise(
            pointwise_plain(dataset, num_negatives, rng)?,
        )),
        (Style::Pointwise { num_negatives }, Context::FirstOrder) => Ok(
            EpochInstances::PointwiseRecency(pointwise_recency(dataset, 1, num_negatives, rng)?),
        ),
        (Style::Pointwise { num_negatives }, Context::HighOrder(order)) => Ok(
            EpochInstances::PointwiseRecency(pointwise_recency(dataset, order, num_negatives, rng)?),
        ),
        (Style::Pointwise { num_negatives }, Context::FullHistory) => Ok(
            EpochInstances::PointwiseHistory(pointwise_history(dataset, num_negatives, rng)?),
        ),
        (Style::Pointwise { num_negatives }, Context::FullHistoryWindowed(order)) => {
            Ok(EpochInstances::PointwiseHistoryRecency(
                pointwise_history_recency(dataset, order, num_negatives, rng)?,
            ))
        }
    }
}

fn item_set(items: &[ItemId]) -> HashSet<usize> {
    items.iter().cloned().collect()
}

fn pairwise_plain<R: Rng>(
    dataset: &Dataset,
    rng: &mut R,
) -> Result<PairwiseInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PairwiseInstances::default();

    for user in dataset.train().iter_users() {
        if user.item_ids.is_empty() {
            continue;
        }

        let exclusion = item_set(user.item_ids);
        let negatives = sample_excluding(num_items, user.item_ids.len(), true, &exclusion, rng)?;

        instances
            .users
            .extend(std::iter::repeat(user.user_id).take(user.item_ids.len()));
        instances.positives.extend_from_slice(user.item_ids);
        instances.negatives.extend(negatives);
    }

    Ok(instances)
}

fn pairwise_recency<R: Rng>(
    dataset: &Dataset,
    order: usize,
    rng: &mut R,
) -> Result<PairwiseRecencyInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PairwiseRecencyInstances::default();

    for user in dataset.train().iter_users() {
        let history = user.item_ids;
        if history.len() <= order {
            continue;
        }

        let exclusion = item_set(history);
        let negatives =
            sample_excluding(num_items, history.len() - order, true, &exclusion, rng)?;

        for (idx, negative) in izip!(order..history.len(), negatives) {
            instances.users.push(user.user_id);
            instances.positives.push(history[idx]);
            instances.recent.push(history[idx - order..idx].to_vec());
            instances.negatives.push(negative);
        }
    }

    Ok(instances)
}

fn pairwise_history<R: Rng>(
    dataset: &Dataset,
    rng: &mut R,
) -> Result<PairwiseHistoryInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PairwiseHistoryInstances::default();

    for user in dataset.train().iter_users() {
        let history = user.item_ids;
        if history.len() < 2 {
            continue;
        }

        let exclusion = item_set(history);
        let negatives = sample_excluding(num_items, history.len(), true, &exclusion, rng)?;

        for (idx, &positive) in history.iter().enumerate() {
            // Each instance works on its own copy; the shared history
            // stays untouched.
            let mut without_target = history.to_vec();
            without_target.remove(idx);

            instances.users.push(user.user_id);
            instances.positive_lengths.push(without_target.len());
            instances.positive_histories.push(without_target);
            instances.negative_lengths.push(history.len());
            instances.negative_histories.push(history.to_vec());
            instances.positives.push(positive);
            instances.negatives.push(negatives[idx]);
        }
    }

    Ok(instances)
}

fn pairwise_history_recency<R: Rng>(
    dataset: &Dataset,
    order: usize,
    rng: &mut R,
) -> Result<PairwiseHistoryRecencyInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PairwiseHistoryRecencyInstances::default();

    for user in dataset.train().iter_users() {
        let history = user.item_ids;
        if history.len() <= order {
            continue;
        }

        let exclusion = item_set(history);
        let negatives =
            sample_excluding(num_items, history.len() - order, true, &exclusion, rng)?;

        for (idx, negative) in izip!(order..history.len(), negatives) {
            let positive = history[idx];
            let mut without_target = history.to_vec();
            without_target.remove(idx);

            // Recency window is most recent first.
            let recent: Vec<ItemId> = history[idx - order..idx].iter().rev().cloned().collect();

            instances.history.users.push(user.user_id);
            instances.history.positive_lengths.push(without_target.len());
            instances.history.positive_histories.push(without_target);
            instances.history.negative_lengths.push(history.len());
            instances.history.negative_histories.push(history.to_vec());
            instances.history.positives.push(positive);
            instances.history.negatives.push(negative);
            instances.recent.push(recent);
        }
    }

    Ok(instances)
}

fn pointwise_plain<R: Rng>(
    dataset: &Dataset,
    num_negatives: usize,
    rng: &mut R,
) -> Result<PointwiseInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PointwiseInstances::default();

    for user in dataset.train().iter_users() {
        if user.item_ids.is_empty() {
            continue;
        }

        let exclusion = item_set(user.item_ids);
        let negatives = sample_excluding(
            num_items,
            user.item_ids.len() * num_negatives,
            true,
            &exclusion,
            rng,
        )?;

        let mut index = 0;
        for &positive in user.item_ids {
            instances.users.push(user.user_id);
            instances.items.push(positive);
            instances.labels.push(1.0);

            for &negative in &negatives[index..index + num_negatives] {
                instances.users.push(user.user_id);
                instances.items.push(negative);
                instances.labels.push(0.0);
            }
            index += num_negatives;
        }
    }

    Ok(instances)
}

fn pointwise_recency<R: Rng>(
    dataset: &Dataset,
    order: usize,
    num_negatives: usize,
    rng: &mut R,
) -> Result<PointwiseRecencyInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PointwiseRecencyInstances::default();

    for user in dataset.train().iter_users() {
        let history = user.item_ids;
        if history.len() <= order {
            continue;
        }

        let exclusion = item_set(history);
        let negatives = sample_excluding(
            num_items,
            (history.len() - order) * num_negatives,
            true,
            &exclusion,
            rng,
        )?;

        let mut index = 0;
        for idx in order..history.len() {
            let window = &history[idx - order..idx];

            instances.users.push(user.user_id);
            instances.items.push(history[idx]);
            instances.recent.push(window.to_vec());
            instances.labels.push(1.0);

            for &negative in &negatives[index..index + num_negatives] {
                instances.users.push(user.user_id);
                instances.items.push(negative);
                instances.recent.push(window.to_vec());
                instances.labels.push(0.0);
            }
            index += num_negatives;
        }
    }

    Ok(instances)
}

fn pointwise_history<R: Rng>(
    dataset: &Dataset,
    num_negatives: usize,
    rng: &mut R,
) -> Result<PointwiseHistoryInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PointwiseHistoryInstances::default();

    for user in dataset.train().iter_users() {
        let history = user.item_ids;
        if history.is_empty() {
            continue;
        }

        let exclusion = item_set(history);
        let negatives =
            sample_excluding(num_items, history.len() * num_negatives, true, &exclusion, rng)?;

        let mut index = 0;
        for (idx, &positive) in history.iter().enumerate() {
            let mut without_target = history.to_vec();
            without_target.remove(idx);

            instances.users.push(user.user_id);
            instances.lengths.push(without_target.len());
            instances.histories.push(without_target);
            instances.items.push(positive);
            instances.labels.push(1.0);

            for &negative in &negatives[index..index + num_negatives] {
                instances.users.push(user.user_id);
                instances.lengths.push(history.len());
                instances.histories.push(history.to_vec());
                instances.items.push(negative);
                instances.labels.push(0.0);
            }
            index += num_negatives;
        }
    }

    Ok(instances)
}

fn pointwise_history_recency<R: Rng>(
    dataset: &Dataset,
    order: usize,
    num_negatives: usize,
    rng: &mut R,
) -> Result<PointwiseHistoryRecencyInstances, GenerationError> {
    let num_items = dataset.num_items();
    let mut instances = PointwiseHistoryRecencyInstances::default();

    for user in dataset.train().iter_users() {
        let history = user.item_ids;
        if history.len() <= order {
            continue;
        }

        let exclusion = item_set(history);
        let negatives = sample_excluding(
            num_items,
            (history.len() - order) * num_negatives,
            true,
            &exclusion,
            rng,
        )?;

        let mut index = 0;
        for idx in order..history.len() {
            let positive = history[idx];
            let mut without_target = history.to_vec();
            without_target.remove(idx);

            // Recency window is most recent first.
            let recent: Vec<ItemId> = history[idx - order..idx].iter().rev().cloned().collect();

            instances.history.users.push(user.user_id);
            instances.history.lengths.push(without_target.len());
            instances.history.histories.push(without_target);
            instances.history.items.push(positive);
            instances.history.labels.push(1.0);
            instances.recent.push(recent.clone());

            for &negative in &negatives[index..index + num_negatives] {
                instances.history.users.push(user.user_id);
                instances.history.lengths.push(history.len());
                instances.history.histories.push(history.to_vec());
                instances.history.items.push(negative);
                instances.history.labels.push(0.0);
                instances.recent.push(recent.clone());
            }
            index += num_negatives;
        }
    }

    Ok(instances)
}
