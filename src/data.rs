//! Interaction logs, their compressed (per-user) representation, id maps,
//! and the dataset handle consumed by the generator and evaluator.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ItemId, Timestamp, UserId};

/// A single user-item interaction.
///
/// Ids are dense indices once the log has gone through remapping; the
/// rating defaults to 1.0 for presence-only data, and the timestamp is
/// present only for time-stamped formats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
    timestamp: Option<Timestamp>,
}

impl Interaction {
    /// Builds a new interaction.
    pub fn new(
        user_id: UserId,
        item_id: ItemId,
        rating: f32,
        timestamp: Option<Timestamp>,
    ) -> Self {
        Interaction {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }

    /// The user index.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The item index.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The rating (1.0 for presence-only data).
    pub fn rating(&self) -> f32 {
        self.rating
    }

    /// The timestamp, when the source format carries one.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }
}

/// A collection of interactions with known matrix dimensions.
#[derive(Clone, Debug)]
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Creates an empty collection with the given dimensions.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Interactions {
            num_users,
            num_items,
            interactions: Vec::new(),
        }
    }

    /// Appends an interaction.
    ///
    /// Panics if its indices fall outside the declared dimensions.
    pub fn push(&mut self, interaction: Interaction) {
        assert!(
            interaction.user_id() < self.num_users && interaction.item_id() < self.num_items,
            "interaction ({}, {}) outside {}x{}",
            interaction.user_id(),
            interaction.item_id(),
            self.num_users,
            self.num_items
        );
        self.interactions.push(interaction);
    }

    /// The underlying interaction slice.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Number of user rows.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of item columns.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The (`num_users`, `num_items`) dimensions.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }

    /// Converts to the compressed per-user representation.
    pub fn to_compressed(&self) -> CompressedInteractions {
        CompressedInteractions::from(self)
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_id()).max().map_or(0, |x| x + 1);
        let num_items = data.iter().map(|x| x.item_id()).max().map_or(0, |x| x + 1);

        Interactions {
            num_users,
            num_items,
            interactions: data,
        }
    }
}

fn cmp_user_time(x: &Interaction, y: &Interaction) -> Ordering {
    x.user_id()
        .cmp(&y.user_id())
        .then(x.timestamp().cmp(&y.timestamp()))
}

/// Interactions compressed into per-user rows (CSR layout).
///
/// Rows are sorted by timestamp where timestamps exist; ties and untimed
/// data keep their input order. Once built, a compressed matrix is
/// immutable, so per-user slices can be handed out freely.
#[derive(Clone, Debug)]
pub struct CompressedInteractions {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
    ratings: Vec<f32>,
    timestamps: Option<Vec<Timestamp>>,
}

impl<'a> From<&'a Interactions> for CompressedInteractions {
    fn from(interactions: &Interactions) -> CompressedInteractions {
        let mut data = interactions.data().to_owned();

        // Stable sort: within a user, timestamped rows order by time and
        // untimed rows keep their input order.
        data.sort_by(cmp_user_time);

        let has_timestamps = data.iter().any(|x| x.timestamp().is_some());

        let mut user_pointers = vec![0; interactions.num_users() + 1];
        let mut item_ids = Vec::with_capacity(data.len());
        let mut ratings = Vec::with_capacity(data.len());
        let mut timestamps = Vec::with_capacity(if has_timestamps { data.len() } else { 0 });

        for datum in &data {
            item_ids.push(datum.item_id());
            ratings.push(datum.rating());

            if has_timestamps {
                timestamps.push(datum.timestamp().unwrap_or(0));
            }

            user_pointers[datum.user_id() + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        CompressedInteractions {
            num_users: interactions.num_users(),
            num_items: interactions.num_items(),
            user_pointers,
            item_ids,
            ratings,
            timestamps: if has_timestamps { Some(timestamps) } else { None },
        }
    }
}

impl CompressedInteractions {
    /// Iterates over all user rows, including empty ones.
    pub fn iter_users(&self) -> CompressedInteractionsUserIterator {
        CompressedInteractionsUserIterator {
            interactions: self,
            idx: 0,
        }
    }

    /// Returns a single user's row, or `None` if out of range.
    pub fn get_user(&self, user_id: UserId) -> Option<CompressedInteractionsUser> {
        if user_id >= self.num_users {
            return None;
        }

        let start = self.user_pointers[user_id];
        let stop = self.user_pointers[user_id + 1];

        Some(CompressedInteractionsUser {
            user_id,
            item_ids: &self.item_ids[start..stop],
            ratings: &self.ratings[start..stop],
            timestamps: self.timestamps.as_ref().map(|x| &x[start..stop]),
        })
    }

    /// Total number of stored interactions.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether no interactions are stored.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Whether the matrix carries timestamps.
    pub fn has_timestamps(&self) -> bool {
        self.timestamps.is_some()
    }

    /// Number of user rows.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of item columns.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The (`num_users`, `num_items`) dimensions.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// Iterator over the users of a [`CompressedInteractions`].
pub struct CompressedInteractionsUserIterator<'a> {
    interactions: &'a CompressedInteractions,
    idx: usize,
}

/// A single user's interactions inside a [`CompressedInteractions`].
#[derive(Debug)]
pub struct CompressedInteractionsUser<'a> {
    /// The user index.
    pub user_id: UserId,
    /// Item indices, in row order.
    pub item_ids: &'a [ItemId],
    /// Ratings aligned with `item_ids`.
    pub ratings: &'a [f32],
    /// Timestamps aligned with `item_ids`, when present.
    pub timestamps: Option<&'a [Timestamp]>,
}

impl<'a> Iterator for CompressedInteractionsUserIterator<'a> {
    type Item = CompressedInteractionsUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = if self.idx >= self.interactions.num_users {
            None
        } else {
            self.interactions.get_user(self.idx)
        };

        self.idx += 1;

        value
    }
}

/// A bijection from raw identifiers to dense indices in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct IdMap {
    forward: HashMap<String, usize>,
    reverse: Vec<String>,
}

impl IdMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        IdMap::default()
    }

    /// Returns the index for `raw`, assigning the next free index on
    /// first sight.
    pub fn insert_or_get(&mut self, raw: &str) -> usize {
        if let Some(&id) = self.forward.get(raw) {
            return id;
        }

        let id = self.reverse.len();
        self.forward.insert(raw.to_owned(), id);
        self.reverse.push(raw.to_owned());

        id
    }

    /// Inserts a known (raw, index) pair, as read back from a persisted
    /// map. Panics if the pair breaks contiguity.
    pub fn insert_mapped(&mut self, raw: &str, id: usize) {
        assert_eq!(
            id,
            self.reverse.len(),
            "id map rows must arrive in index order"
        );
        self.forward.insert(raw.to_owned(), id);
        self.reverse.push(raw.to_owned());
    }

    /// Looks up the index of a raw identifier.
    pub fn get(&self, raw: &str) -> Option<usize> {
        self.forward.get(raw).cloned()
    }

    /// Looks up the raw identifier of an index.
    pub fn raw(&self, id: usize) -> Option<&str> {
        self.reverse.get(id).map(|x| x.as_str())
    }

    /// Number of mapped identifiers.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Iterates over (raw, index) pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.reverse
            .iter()
            .enumerate()
            .map(|(id, raw)| (raw.as_str(), id))
    }
}

/// The prepared dataset: split matrices, per-user negative evaluation
/// candidates, and the id maps that produced them.
///
/// Built once (from scratch or from persisted artifacts) and passed by
/// reference into the generator and evaluator; there is no hidden global
/// instance.
#[derive(Debug)]
pub struct Dataset {
    train: CompressedInteractions,
    test: CompressedInteractions,
    negative_candidates: Vec<Vec<ItemId>>,
    user_ids: IdMap,
    item_ids: IdMap,
}

impl Dataset {
    /// Assembles a dataset from its parts.
    pub fn new(
        train: CompressedInteractions,
        test: CompressedInteractions,
        negative_candidates: Vec<Vec<ItemId>>,
        user_ids: IdMap,
        item_ids: IdMap,
    ) -> Self {
        assert_eq!(train.shape(), test.shape());

        Dataset {
            train,
            test,
            negative_candidates,
            user_ids,
            item_ids,
        }
    }

    /// The training matrix.
    pub fn train(&self) -> &CompressedInteractions {
        &self.train
    }

    /// The held-out test matrix.
    pub fn test(&self) -> &CompressedInteractions {
        &self.test
    }

    /// Per-user negative evaluation candidates; empty when the split was
    /// prepared without them.
    pub fn negative_candidates(&self) -> &[Vec<ItemId>] {
        &self.negative_candidates
    }

    /// The user id bijection.
    pub fn user_ids(&self) -> &IdMap {
        &self.user_ids
    }

    /// The item id bijection.
    pub fn item_ids(&self) -> &IdMap {
        &self.item_ids
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.train.num_users()
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.train.num_items()
    }

    /// A user's training items in stored (time) order.
    pub fn ordered_history(&self, user_id: UserId) -> &[ItemId] {
        self.train
            .get_user(user_id)
            .map(|user| user.item_ids)
            .unwrap_or(&[])
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let num_interactions = self.train.len() + self.test.len();
        let cells = (self.num_users() * self.num_items()).max(1);
        let sparsity = 1.0 - num_interactions as f64 / cells as f64;

        write!(
            f,
            "Dataset statistics:\nusers:\t{}\nitems:\t{}\ninteractions:\t{}\nsparsity:\t{:.4}%",
            self.num_users(),
            self.num_items(),
            num_interactions,
            sparsity * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untimed(user_id: UserId, item_id: ItemId) -> Interaction {
        Interaction::new(user_id, item_id, 1.0, None)
    }

    #[test]
    fn dimensions_from_data() {
        let interactions = Interactions::from(vec![untimed(0, 4), untimed(2, 1), untimed(1, 0)]);

        assert_eq!(interactions.shape(), (3, 5));
    }

    #[test]
    fn compressed_rows_order_by_time() {
        let mut interactions = Interactions::new(2, 5);
        interactions.push(Interaction::new(0, 3, 1.0, Some(30)));
        interactions.push(Interaction::new(0, 1, 1.0, Some(10)));
        interactions.push(Interaction::new(1, 4, 1.0, Some(5)));
        interactions.push(Interaction::new(0, 2, 1.0, Some(20)));

        let compressed = interactions.to_compressed();

        assert_eq!(compressed.get_user(0).unwrap().item_ids, &[1, 2, 3]);
        assert_eq!(
            compressed.get_user(0).unwrap().timestamps,
            Some(&[10, 20, 30][..])
        );
        assert_eq!(compressed.get_user(1).unwrap().item_ids, &[4]);
    }

    #[test]
    fn compressed_rows_keep_input_order_without_time() {
        let mut interactions = Interactions::new(1, 5);
        interactions.push(untimed(0, 3));
        interactions.push(untimed(0, 0));
        interactions.push(untimed(0, 4));

        let compressed = interactions.to_compressed();
        let user = compressed.get_user(0).unwrap();

        assert_eq!(user.item_ids, &[3, 0, 4]);
        assert!(user.timestamps.is_none());
    }

    #[test]
    fn empty_users_have_empty_rows() {
        let mut interactions = Interactions::new(3, 2);
        interactions.push(untimed(2, 1));

        let compressed = interactions.to_compressed();

        assert!(compressed.get_user(0).unwrap().item_ids.is_empty());
        assert!(compressed.get_user(1).unwrap().item_ids.is_empty());
        assert_eq!(compressed.get_user(2).unwrap().item_ids, &[1]);
        assert!(compressed.get_user(3).is_none());
    }

    #[test]
    fn id_map_is_bijective_and_contiguous() {
        let mut map = IdMap::new();

        assert_eq!(map.insert_or_get("u42"), 0);
        assert_eq!(map.insert_or_get("u7"), 1);
        assert_eq!(map.insert_or_get("u42"), 0);
        assert_eq!(map.insert_or_get("u99"), 2);

        assert_eq!(map.len(), 3);
        for id in 0..map.len() {
            let raw = map.raw(id).unwrap();
            assert_eq!(map.get(raw), Some(id));
        }
    }
}
