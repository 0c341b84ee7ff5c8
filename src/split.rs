//! Dataset preparation: filtering, id remapping, train/test splitting,
//! negative-candidate sampling, and split-artifact persistence.
//!
//! The preparer turns a raw delimited interaction log into the five split
//! artifacts (`.train`, `.test`, `.neg`, `.user2id`, `.item2id`) and the
//! in-memory [`Dataset`] built from them. A missing split is recoverable:
//! [`DatasetPreparer::load_or_prepare`] re-runs the split instead of
//! erroring when the artifacts are not on disk.

use std::collections::{HashMap, HashSet};
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use failure::{Error, Fail};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::{Dataset, IdMap, Interaction, Interactions};
use crate::sampling::sample_excluding;
use crate::{ItemId, Timestamp};

/// Column layout of a raw interaction log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    /// `user item` rows; ratings default to 1.0.
    UI,
    /// `user item rating` rows.
    UIR,
    /// `user item rating time` rows.
    UIRT,
}

impl DataFormat {
    /// Number of columns a row carries in this format.
    pub fn num_columns(&self) -> usize {
        match self {
            DataFormat::UI => 2,
            DataFormat::UIR => 3,
            DataFormat::UIRT => 4,
        }
    }

    /// Whether rows carry an explicit rating.
    pub fn has_ratings(&self) -> bool {
        *self != DataFormat::UI
    }

    /// Whether rows carry a timestamp.
    pub fn has_timestamps(&self) -> bool {
        *self == DataFormat::UIRT
    }
}

impl FromStr for DataFormat {
    type Err = SplitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "UI" => Ok(DataFormat::UI),
            "UIR" => Ok(DataFormat::UIR),
            "UIRT" => Ok(DataFormat::UIRT),
            _ => Err(SplitError::UnknownDataFormat {
                name: value.to_owned(),
            }),
        }
    }
}

/// Protocol used to hold out test interactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitProtocol {
    /// Per user, the first `ceil(ratio * count)` interactions train, the
    /// remainder test.
    Ratio,
    /// Per user, exactly the last interaction is held out; users with
    /// three or fewer interactions contribute nothing to test.
    LeaveOneOut,
}

impl SplitProtocol {
    /// Short protocol tag used in artifact file names.
    pub fn name(&self) -> &'static str {
        match self {
            SplitProtocol::Ratio => "ratio",
            SplitProtocol::LeaveOneOut => "loo",
        }
    }
}

impl FromStr for SplitProtocol {
    type Err = SplitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ratio" => Ok(SplitProtocol::Ratio),
            "loo" => Ok(SplitProtocol::LeaveOneOut),
            _ => Err(SplitError::UnknownProtocol {
                name: value.to_owned(),
            }),
        }
    }
}

/// Split configuration and persistence errors.
#[derive(Debug, Fail)]
pub enum SplitError {
    /// The configured data format is not recognised.
    #[fail(display = "unknown data format '{}'", name)]
    UnknownDataFormat {
        /// The offending format string.
        name: String,
    },
    /// The configured split protocol is not recognised.
    #[fail(display = "unknown split protocol '{}'", name)]
    UnknownProtocol {
        /// The offending protocol string.
        name: String,
    },
    /// The split ratio is outside (0, 1).
    #[fail(display = "split ratio {} is outside (0, 1)", ratio)]
    InvalidRatio {
        /// The offending ratio.
        ratio: f32,
    },
    /// A persisted artifact row could not be parsed.
    #[fail(
        display = "malformed row {} in '{}': expected {} fields, found {}",
        line, path, expected, found
    )]
    MalformedRow {
        /// Path of the offending artifact.
        path: String,
        /// 1-based row number.
        line: usize,
        /// Fields the format requires.
        expected: usize,
        /// Fields found on the row.
        found: usize,
    },
    /// A persisted row names a user outside the id map.
    #[fail(
        display = "user id {} out of range ({} users) in '{}'",
        user_id, num_users, path
    )]
    UserOutOfRange {
        /// Path of the offending artifact.
        path: String,
        /// The offending user id.
        user_id: usize,
        /// Number of mapped users.
        num_users: usize,
    },
}

/// Configuration consumed by the preparer.
///
/// Owned by the caller and passed by reference; the library keeps no
/// process-wide configuration state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitConfig {
    input: PathBuf,
    output_dir: PathBuf,
    name: String,
    format: DataFormat,
    separator: u8,
    user_min: usize,
    item_min: usize,
    protocol: SplitProtocol,
    ratio: f32,
    by_time: bool,
    test_negatives: usize,
}

impl SplitConfig {
    /// Creates a configuration for the raw log at `input`, with the
    /// defaults of the original splitting tool: tab-separated `UIRT`
    /// rows, no minimum counts, a 0.8 time-ordered ratio split, and no
    /// negative evaluation candidates.
    pub fn new<P: Into<PathBuf>>(input: P, name: &str) -> Self {
        SplitConfig {
            input: input.into(),
            output_dir: PathBuf::from("."),
            name: name.to_owned(),
            format: DataFormat::UIRT,
            separator: b'\t',
            user_min: 0,
            item_min: 0,
            protocol: SplitProtocol::Ratio,
            ratio: 0.8,
            by_time: true,
            test_negatives: 0,
        }
    }

    /// Sets the directory the split artifacts are written to.
    pub fn output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Sets the raw log's column format.
    pub fn format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the column separator byte.
    pub fn separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Sets the minimum interaction count a user must have.
    pub fn user_min(mut self, user_min: usize) -> Self {
        self.user_min = user_min;
        self
    }

    /// Sets the minimum interaction count an item must have.
    pub fn item_min(mut self, item_min: usize) -> Self {
        self.item_min = item_min;
        self
    }

    /// Sets the split protocol.
    pub fn protocol(mut self, protocol: SplitProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the train fraction for the ratio protocol.
    pub fn ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }

    /// Sets whether per-user interactions order by timestamp (otherwise
    /// they are shuffled). Formats without timestamps always shuffle.
    pub fn by_time(mut self, by_time: bool) -> Self {
        self.by_time = by_time;
        self
    }

    /// Sets the number of negative evaluation candidates per user.
    pub fn test_negatives(mut self, test_negatives: usize) -> Self {
        self.test_negatives = test_negatives;
        self
    }

    /// The raw log's column format.
    pub fn data_format(&self) -> DataFormat {
        self.format
    }

    /// The configured separator byte.
    pub fn separator_byte(&self) -> u8 {
        self.separator
    }

    /// Paths of the five split artifacts for this configuration.
    pub fn artifact_paths(&self) -> ArtifactPaths {
        let prefix = format!(
            "{}_{}_u{}_i{}",
            self.name,
            self.protocol.name(),
            self.user_min,
            self.item_min
        );
        let base = self.output_dir.join(prefix);

        ArtifactPaths {
            train: base.with_extension("train"),
            test: base.with_extension("test"),
            neg: base.with_extension("neg"),
            user2id: base.with_extension("user2id"),
            item2id: base.with_extension("item2id"),
        }
    }

    fn effective_by_time(&self) -> bool {
        self.by_time && self.format.has_timestamps()
    }

    fn validate(&self) -> Result<(), SplitError> {
        if self.protocol == SplitProtocol::Ratio && !(self.ratio > 0.0 && self.ratio < 1.0) {
            return Err(SplitError::InvalidRatio { ratio: self.ratio });
        }

        Ok(())
    }
}

/// Locations of the five persisted split artifacts.
#[derive(Clone, Debug)]
pub struct ArtifactPaths {
    /// Training interactions.
    pub train: PathBuf,
    /// Held-out test interactions.
    pub test: PathBuf,
    /// Per-user negative evaluation candidates.
    pub neg: PathBuf,
    /// Raw-to-dense user id map.
    pub user2id: PathBuf,
    /// Raw-to-dense item id map.
    pub item2id: PathBuf,
}

impl ArtifactPaths {
    /// Whether a previously persisted split is present.
    pub fn split_exists(&self) -> bool {
        self.train.exists() && self.test.exists()
    }
}

struct RawInteraction {
    user: String,
    item: String,
    rating: f32,
    timestamp: Option<Timestamp>,
}

/// Filters, remaps, splits, and persists a raw interaction log.
pub struct DatasetPreparer<'a> {
    config: &'a SplitConfig,
}

impl<'a> DatasetPreparer<'a> {
    /// Creates a preparer for the given configuration.
    pub fn new(config: &'a SplitConfig) -> Self {
        DatasetPreparer { config }
    }

    /// Loads the persisted split if its artifacts exist, otherwise runs
    /// the full preparation pipeline.
    pub fn load_or_prepare<R: Rng>(&self, rng: &mut R) -> Result<Dataset, Error> {
        if self.config.artifact_paths().split_exists() {
            self.load()
        } else {
            self.prepare(rng)
        }
    }

    /// Runs the full pipeline on the raw log: filter, remap, sample
    /// negative candidates, split, persist, and return the dataset.
    ///
    /// Nothing is written when the configuration is invalid.
    pub fn prepare<R: Rng>(&self, rng: &mut R) -> Result<Dataset, Error> {
        let config = self.config;
        config.validate()?;

        debug!("loading raw interactions from {:?}", config.input);
        let raw = read_raw_log(&config.input, config.format, config.separator)?;

        debug!("filtering {} interactions", raw.len());
        let filtered = filter_interactions(raw, config.user_min, config.item_min);

        let (remapped, user_ids, item_ids) = remap_interactions(&filtered);

        // Evaluation candidates exclude everything the user interacted
        // with, so they are drawn before the split while train and test
        // are still together.
        let negative_candidates = if config.test_negatives > 0 {
            sample_negative_candidates(&remapped, config.test_negatives, rng)?
        } else {
            vec![Vec::new(); remapped.num_users()]
        };

        let by_time = config.effective_by_time();
        let (train, test) = match config.protocol {
            SplitProtocol::Ratio => split_by_ratio(&remapped, config.ratio, by_time, rng),
            SplitProtocol::LeaveOneOut => split_by_loo(&remapped, by_time, rng),
        };

        create_dir_all(&config.output_dir)?;
        let paths = config.artifact_paths();
        write_interactions(&paths.train, &train, config.format, config.separator)?;
        write_interactions(&paths.test, &test, config.format, config.separator)?;
        if config.test_negatives > 0 {
            write_negative_candidates(&paths.neg, &negative_candidates, config.separator)?;
        }
        write_id_map(&paths.user2id, &user_ids, config.separator)?;
        write_id_map(&paths.item2id, &item_ids, config.separator)?;

        let dataset = Dataset::new(
            train.to_compressed(),
            test.to_compressed(),
            negative_candidates,
            user_ids,
            item_ids,
        );

        let num_interactions = remapped.len();
        info!("split '{}' written to {:?}", config.name, config.output_dir);
        info!("number of users: {}", dataset.num_users());
        info!("number of items: {}", dataset.num_items());
        info!("number of interactions: {}", num_interactions);
        info!(
            "average actions per user: {:.2}",
            num_interactions as f64 / dataset.num_users().max(1) as f64
        );
        info!(
            "average actions per item: {:.2}",
            num_interactions as f64 / dataset.num_items().max(1) as f64
        );
        info!("{}", dataset);

        Ok(dataset)
    }

    /// Loads a previously persisted split.
    pub fn load(&self) -> Result<Dataset, Error> {
        let config = self.config;
        let paths = config.artifact_paths();

        let user_ids = read_id_map(&paths.user2id, config.separator)?;
        let item_ids = read_id_map(&paths.item2id, config.separator)?;

        let num_users = user_ids.len();
        let num_items = item_ids.len();

        let train = read_interactions(
            &paths.train,
            config.format,
            config.separator,
            num_users,
            num_items,
        )?;
        let test = read_interactions(
            &paths.test,
            config.format,
            config.separator,
            num_users,
            num_items,
        )?;

        let negative_candidates = if config.test_negatives > 0 && paths.neg.exists() {
            read_negative_candidates(&paths.neg, config.separator, num_users)?
        } else {
            vec![Vec::new(); num_users]
        };

        Ok(Dataset::new(
            train.to_compressed(),
            test.to_compressed(),
            negative_candidates,
            user_ids,
            item_ids,
        ))
    }
}

fn read_raw_log(
    path: &Path,
    format: DataFormat,
    separator: u8,
) -> Result<Vec<RawInteraction>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut interactions = Vec::new();
    let mut dropped = 0;

    for record in reader.records() {
        let record = record?;

        match parse_raw_row(&record, format) {
            Some(interaction) => interactions.push(interaction),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("dropped {} malformed raw rows", dropped);
    }

    Ok(interactions)
}

fn parse_raw_row(record: &csv::StringRecord, format: DataFormat) -> Option<RawInteraction> {
    if record.len() < format.num_columns() {
        return None;
    }

    let user = record.get(0)?.trim();
    let item = record.get(1)?.trim();
    if user.is_empty() || item.is_empty() {
        return None;
    }

    let rating = if format.has_ratings() {
        record.get(2)?.trim().parse::<f32>().ok()?
    } else {
        1.0
    };

    let timestamp = if format.has_timestamps() {
        let field = record.get(3)?.trim();
        let value = field
            .parse::<Timestamp>()
            .ok()
            .or_else(|| field.parse::<f64>().ok().map(|x| x as Timestamp))?;
        Some(value)
    } else {
        None
    };

    Some(RawInteraction {
        user: user.to_owned(),
        item: item.to_owned(),
        rating,
        timestamp,
    })
}

/// Drops interactions of infrequent items, then of infrequent users.
///
/// Deliberately a single pass: item counts come from the unfiltered log
/// and user counts from the item-filtered log. Removing items can push a
/// user below `user_min` for the following (final) user pass only; there
/// is no fixed-point iteration.
fn filter_interactions(
    mut interactions: Vec<RawInteraction>,
    user_min: usize,
    item_min: usize,
) -> Vec<RawInteraction> {
    if item_min > 0 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for interaction in &interactions {
            *counts.entry(interaction.item.as_str()).or_insert(0) += 1;
        }
        let keep: HashSet<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= item_min)
            .map(|(item, _)| item.to_owned())
            .collect();

        interactions.retain(|x| keep.contains(&x.item));
    }

    if user_min > 0 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for interaction in &interactions {
            *counts.entry(interaction.user.as_str()).or_insert(0) += 1;
        }
        let keep: HashSet<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= user_min)
            .map(|(user, _)| user.to_owned())
            .collect();

        interactions.retain(|x| keep.contains(&x.user));
    }

    interactions
}

fn remap_interactions(raw: &[RawInteraction]) -> (Interactions, IdMap, IdMap) {
    let mut user_ids = IdMap::new();
    let mut item_ids = IdMap::new();

    let dense: Vec<Interaction> = raw
        .iter()
        .map(|x| {
            Interaction::new(
                user_ids.insert_or_get(&x.user),
                item_ids.insert_or_get(&x.item),
                x.rating,
                x.timestamp,
            )
        })
        .collect();

    let mut interactions = Interactions::new(user_ids.len(), item_ids.len());
    for interaction in dense {
        interactions.push(interaction);
    }

    (interactions, user_ids, item_ids)
}

fn group_by_user(interactions: &Interactions) -> Vec<Vec<Interaction>> {
    let mut groups = vec![Vec::new(); interactions.num_users()];

    for interaction in interactions.data() {
        groups[interaction.user_id()].push(interaction.clone());
    }

    groups
}

fn order_group<R: Rng>(group: &mut Vec<Interaction>, by_time: bool, rng: &mut R) {
    if by_time {
        group.sort_by_key(|x| x.timestamp());
    } else {
        group.shuffle(rng);
    }
}

/// Splits per user: the first `ceil(ratio * count)` interactions (by
/// timestamp when `by_time`, else in shuffled order) go to train, the
/// remainder to test.
pub fn split_by_ratio<R: Rng>(
    interactions: &Interactions,
    ratio: f32,
    by_time: bool,
    rng: &mut R,
) -> (Interactions, Interactions) {
    let (num_users, num_items) = interactions.shape();
    let mut train = Interactions::new(num_users, num_items);
    let mut test = Interactions::new(num_users, num_items);

    for mut group in group_by_user(interactions) {
        order_group(&mut group, by_time, rng);

        let cutoff = (ratio as f64 * group.len() as f64).ceil() as usize;

        for (idx, interaction) in group.into_iter().enumerate() {
            if idx < cutoff {
                train.push(interaction);
            } else {
                test.push(interaction);
            }
        }
    }

    (train, test)
}

/// Splits per user: exactly the last interaction (by timestamp when
/// `by_time`, else in shuffled order) is held out for test. Users with
/// three or fewer interactions go entirely to train.
pub fn split_by_loo<R: Rng>(
    interactions: &Interactions,
    by_time: bool,
    rng: &mut R,
) -> (Interactions, Interactions) {
    let (num_users, num_items) = interactions.shape();
    let mut train = Interactions::new(num_users, num_items);
    let mut test = Interactions::new(num_users, num_items);

    for mut group in group_by_user(interactions) {
        if group.len() <= 3 {
            for interaction in group {
                train.push(interaction);
            }
            continue;
        }

        order_group(&mut group, by_time, rng);

        let last = group.pop().expect("group checked non-empty");
        for interaction in group {
            train.push(interaction);
        }
        test.push(last);
    }

    (train, test)
}

/// Draws `test_negatives` distinct evaluation candidates per user,
/// excluding every item the user interacted with.
pub fn sample_negative_candidates<R: Rng>(
    interactions: &Interactions,
    test_negatives: usize,
    rng: &mut R,
) -> Result<Vec<Vec<ItemId>>, Error> {
    let num_items = interactions.num_items();
    let mut interacted: Vec<HashSet<usize>> = vec![HashSet::new(); interactions.num_users()];

    for interaction in interactions.data() {
        interacted[interaction.user_id()].insert(interaction.item_id());
    }

    interacted
        .iter()
        .map(|exclusion| {
            let sampled = sample_excluding(num_items, test_negatives, false, exclusion, rng)?;
            Ok(sampled)
        })
        .collect()
}

fn write_interactions(
    path: &Path,
    interactions: &Interactions,
    format: DataFormat,
    separator: u8,
) -> Result<(), Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .from_path(path)?;

    for interaction in interactions.data() {
        let mut row = vec![
            interaction.user_id().to_string(),
            interaction.item_id().to_string(),
        ];

        if format.has_ratings() {
            row.push(interaction.rating().to_string());
        }
        if format.has_timestamps() {
            row.push(interaction.timestamp().unwrap_or(0).to_string());
        }

        writer.write_record(&row)?;
    }

    writer.flush()?;

    Ok(())
}

fn write_negative_candidates(
    path: &Path,
    candidates: &[Vec<ItemId>],
    separator: u8,
) -> Result<(), Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    for (user_id, items) in candidates.iter().enumerate() {
        let mut row = Vec::with_capacity(items.len() + 1);
        row.push(user_id.to_string());
        row.extend(items.iter().map(|x| x.to_string()));

        writer.write_record(&row)?;
    }

    writer.flush()?;

    Ok(())
}

fn write_id_map(path: &Path, map: &IdMap, separator: u8) -> Result<(), Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .from_path(path)?;

    for (raw, id) in map.iter() {
        let id = id.to_string();
        writer.write_record(&[raw, id.as_str()])?;
    }

    writer.flush()?;

    Ok(())
}

fn read_interactions(
    path: &Path,
    format: DataFormat,
    separator: u8,
    num_users: usize,
    num_items: usize,
) -> Result<Interactions, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .from_path(path)?;

    let mut interactions = Interactions::new(num_users, num_items);

    for (idx, record) in reader.records().enumerate() {
        let record = record?;

        if record.len() < format.num_columns() {
            return Err(SplitError::MalformedRow {
                path: path.display().to_string(),
                line: idx + 1,
                expected: format.num_columns(),
                found: record.len(),
            }
            .into());
        }

        let user_id: usize = record[0].trim().parse()?;
        let item_id: usize = record[1].trim().parse()?;
        let rating: f32 = if format.has_ratings() {
            record[2].trim().parse()?
        } else {
            1.0
        };
        let timestamp = if format.has_timestamps() {
            Some(record[3].trim().parse::<Timestamp>()?)
        } else {
            None
        };

        interactions.push(Interaction::new(user_id, item_id, rating, timestamp));
    }

    Ok(interactions)
}

fn read_negative_candidates(
    path: &Path,
    separator: u8,
    num_users: usize,
) -> Result<Vec<Vec<ItemId>>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut candidates = vec![Vec::new(); num_users];

    for record in reader.records() {
        let record = record?;

        if record.is_empty() {
            continue;
        }

        let user_id: usize = record[0].trim().parse()?;
        if user_id >= num_users {
            return Err(SplitError::UserOutOfRange {
                path: path.display().to_string(),
                user_id,
                num_users,
            }
            .into());
        }

        candidates[user_id] = record
            .iter()
            .skip(1)
            .map(|x| x.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()?;
    }

    Ok(candidates)
}

fn read_id_map(path: &Path, separator: u8) -> Result<IdMap, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .from_path(path)?;

    let mut map = IdMap::new();

    for (idx, record) in reader.records().enumerate() {
        let record = record?;

        if record.len() < 2 {
            return Err(SplitError::MalformedRow {
                path: path.display().to_string(),
                line: idx + 1,
                expected: 2,
                found: record.len(),
            }
            .into());
        }

        let id: usize = record[1].trim().parse()?;
        map.insert_mapped(record[0].trim(), id);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;
    use tempfile::TempDir;

    use super::*;
    use crate::UserId;

    fn timed(user_id: UserId, item_id: ItemId, timestamp: Timestamp) -> Interaction {
        Interaction::new(user_id, item_id, 1.0, Some(timestamp))
    }

    fn as_pairs(interactions: &Interactions) -> HashSet<(UserId, ItemId)> {
        interactions
            .data()
            .iter()
            .map(|x| (x.user_id(), x.item_id()))
            .collect()
    }

    fn scenario_interactions() -> Interactions {
        // users {0, 1, 2}, 5 items; user 0 history (time-ordered)
        // [0, 1, 2, 3], user 1 = [2], user 2 = [0, 3, 4].
        let mut interactions = Interactions::new(3, 5);
        for (idx, item) in [0, 1, 2, 3].iter().enumerate() {
            interactions.push(timed(0, *item, idx));
        }
        interactions.push(timed(1, 2, 0));
        for (idx, item) in [0, 3, 4].iter().enumerate() {
            interactions.push(timed(2, *item, idx));
        }

        interactions
    }

    #[test]
    fn loo_scenario_holds_out_exactly_one_item() {
        let mut rng = XorShiftRng::seed_from_u64(42);
        let interactions = scenario_interactions();

        let (train, test) = split_by_loo(&interactions, true, &mut rng);

        let train_pairs = as_pairs(&train);
        let test_pairs = as_pairs(&test);

        assert_eq!(
            train_pairs,
            vec![(0, 0), (0, 1), (0, 2), (1, 2), (2, 0), (2, 3), (2, 4)]
                .into_iter()
                .collect()
        );
        assert_eq!(test_pairs, vec![(0, 3)].into_iter().collect());
    }

    #[test]
    fn splits_are_disjoint_and_cover_the_input() {
        let mut rng = XorShiftRng::seed_from_u64(7);

        let mut interactions = Interactions::new(10, 20);
        for user in 0..10 {
            for item in 0..(user + 2) {
                interactions.push(timed(user, item, item));
            }
        }

        for protocol in &[SplitProtocol::Ratio, SplitProtocol::LeaveOneOut] {
            let (train, test) = match protocol {
                SplitProtocol::Ratio => split_by_ratio(&interactions, 0.8, false, &mut rng),
                SplitProtocol::LeaveOneOut => split_by_loo(&interactions, false, &mut rng),
            };

            let train_pairs = as_pairs(&train);
            let test_pairs = as_pairs(&test);

            assert!(train_pairs.is_disjoint(&test_pairs));
            let union: HashSet<_> = train_pairs.union(&test_pairs).cloned().collect();
            assert_eq!(union, as_pairs(&interactions));
            assert_eq!(train.len() + test.len(), interactions.len());
        }
    }

    #[test]
    fn ratio_split_takes_the_ceil_into_train() {
        let mut rng = XorShiftRng::seed_from_u64(3);

        let mut interactions = Interactions::new(1, 10);
        for item in 0..5 {
            interactions.push(timed(0, item, item));
        }

        // ceil(0.8 * 5) = 4 training interactions.
        let (train, test) = split_by_ratio(&interactions, 0.8, true, &mut rng);

        assert_eq!(train.len(), 4);
        assert_eq!(test.len(), 1);
        assert_eq!(test.data()[0].item_id(), 4);
    }

    #[test]
    fn filter_is_a_single_pass() {
        let raw = vec![
            ("a", "x"),
            ("a", "y"),
            ("b", "x"),
            ("b", "z"),
            ("c", "z"),
        ];
        let interactions: Vec<RawInteraction> = raw
            .into_iter()
            .map(|(user, item)| RawInteraction {
                user: user.to_owned(),
                item: item.to_owned(),
                rating: 1.0,
                timestamp: None,
            })
            .collect();

        // Item pass drops 'y' (count 1); user pass then counts 'a' at 1
        // and drops it. 'z' keeps count 2 from the raw log.
        let filtered = filter_interactions(interactions, 2, 2);

        let kept: Vec<(&str, &str)> = filtered
            .iter()
            .map(|x| (x.user.as_str(), x.item.as_str()))
            .collect();
        assert_eq!(kept, vec![("b", "x"), ("b", "z"), ("c", "z")]);
    }

    #[test]
    fn remap_assigns_ids_in_first_seen_order() {
        let raw: Vec<RawInteraction> = vec![("u9", "i5"), ("u2", "i5"), ("u9", "i1")]
            .into_iter()
            .map(|(user, item)| RawInteraction {
                user: user.to_owned(),
                item: item.to_owned(),
                rating: 1.0,
                timestamp: None,
            })
            .collect();

        let (interactions, user_ids, item_ids) = remap_interactions(&raw);

        assert_eq!(user_ids.get("u9"), Some(0));
        assert_eq!(user_ids.get("u2"), Some(1));
        assert_eq!(item_ids.get("i5"), Some(0));
        assert_eq!(item_ids.get("i1"), Some(1));
        assert_eq!(interactions.shape(), (2, 2));
    }

    #[test]
    fn negative_candidates_never_collide_with_positives() {
        let mut rng = XorShiftRng::seed_from_u64(13);
        let interactions = scenario_interactions();

        let candidates = sample_negative_candidates(&interactions, 1, &mut rng).unwrap();

        assert_eq!(candidates.len(), 3);
        // User 0 interacted with everything but item 4.
        assert_eq!(candidates[0], vec![4]);
        assert!(!candidates[1].contains(&2));
        assert!([1, 2].contains(&candidates[2][0]));
    }

    #[test]
    fn unknown_format_and_protocol_fail_parsing() {
        assert!(matches!(
            "UIRTX".parse::<DataFormat>(),
            Err(SplitError::UnknownDataFormat { .. })
        ));
        assert!(matches!(
            "halfsies".parse::<SplitProtocol>(),
            Err(SplitError::UnknownProtocol { .. })
        ));
        assert_eq!("uirt".parse::<DataFormat>().unwrap(), DataFormat::UIRT);
        assert_eq!("LOO".parse::<SplitProtocol>().unwrap(), SplitProtocol::LeaveOneOut);
    }

    #[test]
    fn invalid_ratio_fails_before_writing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("log.tsv");
        fs::write(&input, "a\t1\t5\t100\n").unwrap();

        let config = SplitConfig::new(&input, "ml")
            .output_dir(dir.path())
            .ratio(1.5);

        let mut rng = XorShiftRng::seed_from_u64(1);
        assert!(DatasetPreparer::new(&config).prepare(&mut rng).is_err());
        assert!(!config.artifact_paths().split_exists());
    }

    fn write_scenario_log(path: &Path) {
        let mut rows = String::new();
        for (user, item, time) in &[
            ("u0", "i0", 0),
            ("u0", "i1", 1),
            ("u0", "i2", 2),
            ("u0", "i3", 3),
            ("u1", "i2", 0),
            ("u2", "i0", 0),
            ("u2", "i3", 1),
            ("u2", "i4", 2),
        ] {
            rows.push_str(&format!("{}\t{}\t1\t{}\n", user, item, time));
        }
        fs::write(path, rows).unwrap();
    }

    #[test]
    fn prepare_persists_artifacts_that_load_back() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("log.tsv");
        write_scenario_log(&input);

        let config = SplitConfig::new(&input, "scenario")
            .output_dir(dir.path())
            .protocol(SplitProtocol::LeaveOneOut)
            .user_min(1)
            .item_min(1)
            .test_negatives(1);

        let mut rng = XorShiftRng::seed_from_u64(42);
        let prepared = DatasetPreparer::new(&config).prepare(&mut rng).unwrap();

        let paths = config.artifact_paths();
        assert!(paths.split_exists());
        assert!(paths.neg.exists());

        let loaded = DatasetPreparer::new(&config).load().unwrap();

        assert_eq!(loaded.num_users(), prepared.num_users());
        assert_eq!(loaded.num_items(), prepared.num_items());
        assert_eq!(loaded.train().len(), prepared.train().len());
        assert_eq!(loaded.test().len(), prepared.test().len());
        assert_eq!(
            loaded.negative_candidates(),
            prepared.negative_candidates()
        );
        assert_eq!(loaded.ordered_history(0), prepared.ordered_history(0));

        // LOO scenario: user 0 holds out its last item, the others are
        // too short to contribute to test.
        assert_eq!(loaded.test().get_user(0).unwrap().item_ids.len(), 1);
        assert!(loaded.test().get_user(1).unwrap().item_ids.is_empty());
        assert!(loaded.test().get_user(2).unwrap().item_ids.is_empty());
    }

    #[test]
    fn load_or_prepare_reuses_an_existing_split() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("log.tsv");
        write_scenario_log(&input);

        let config = SplitConfig::new(&input, "scenario")
            .output_dir(dir.path())
            .protocol(SplitProtocol::LeaveOneOut);

        let mut rng = XorShiftRng::seed_from_u64(42);
        let preparer = DatasetPreparer::new(&config);
        preparer.prepare(&mut rng).unwrap();

        // Removing the raw log proves the second call reads artifacts
        // instead of re-splitting.
        fs::remove_file(&input).unwrap();
        let reloaded = preparer.load_or_prepare(&mut rng).unwrap();

        assert_eq!(reloaded.num_users(), 3);
        assert_eq!(reloaded.num_items(), 5);
    }
}
