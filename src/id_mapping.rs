use clap::ValueEnum;
use log::warn;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::dataset::{DataError, RatingTriple};
use crate::rating_matrix::{Rating, UNOBSERVED};

/// What to do with ratings whose ids fall outside the configured matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BoundsPolicy {
    /// Abort with [`DataError::IdOutOfRange`].
    #[default]
    Strict,
    /// Drop the rating and report the number of dropped ratings once.
    Lenient,
}

/// Converts 1-based external user/item ids into 0-based matrix indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    num_users: usize,
    num_items: usize,
    policy: BoundsPolicy,
}

impl IdMapping {
    pub fn new(num_users: usize, num_items: usize, policy: BoundsPolicy) -> Self {
        IdMapping {
            num_users,
            num_items,
            policy,
        }
    }

    pub fn user_index(&self, user_id: u32) -> Option<usize> {
        to_index(user_id, self.num_users)
    }

    pub fn item_index(&self, item_id: u32) -> Option<usize> {
        to_index(item_id, self.num_items)
    }

    pub fn user_id(index: usize) -> usize {
        index + 1
    }

    pub fn item_id(index: usize) -> usize {
        index + 1
    }

    /// Maps every triple to a [`Rating`], applying the bounds policy
    /// uniformly. A zero rating is always an error.
    pub fn map_all(&self, triples: &[RatingTriple]) -> Result<Vec<Rating>, DataError> {
        let mut ratings = Vec::with_capacity(triples.len());
        let mut unknown_users = FxHashSet::default();
        let mut unknown_items = FxHashSet::default();
        let mut dropped = 0;

        for (index, triple) in triples.iter().enumerate() {
            let position = index + 1;
            if triple.rating == UNOBSERVED {
                return Err(DataError::UnobservedRating { position });
            }

            let user = self.user_index(triple.user_id);
            let item = self.item_index(triple.item_id);

            match (user, item) {
                (Some(user), Some(item)) => ratings.push(Rating {
                    user,
                    item,
                    value: triple.rating,
                }),
                _ if self.policy == BoundsPolicy::Lenient => {
                    if user.is_none() {
                        unknown_users.insert(triple.user_id);
                    }
                    if item.is_none() {
                        unknown_items.insert(triple.item_id);
                    }
                    dropped += 1;
                }
                (None, _) => {
                    return Err(DataError::IdOutOfRange {
                        position,
                        kind: "user",
                        id: triple.user_id,
                        bound: self.num_users,
                    })
                }
                (_, None) => {
                    return Err(DataError::IdOutOfRange {
                        position,
                        kind: "item",
                        id: triple.item_id,
                        bound: self.num_items,
                    })
                }
            }
        }

        if dropped > 0 {
            warn!(
                "Dropped {} ratings outside the {}x{} matrix ({} unknown users, {} unknown items)",
                dropped,
                self.num_users,
                self.num_items,
                unknown_users.len(),
                unknown_items.len()
            );
        }

        Ok(ratings)
    }
}

fn to_index(id: u32, bound: usize) -> Option<usize> {
    let index = (id as usize).checked_sub(1)?;
    (index < bound).then_some(index)
}
