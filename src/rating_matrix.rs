use log::warn;
use ndarray::{Array2, ArrayView2};

use crate::dataset::DataError;

/// Cell value marking a user-item pair without a recorded rating.
pub const UNOBSERVED: u32 = 0;

/// A single observed rating addressed by 0-based user and item indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating {
    pub user: usize,
    pub item: usize,
    pub value: u32,
}

/// Dense users x items grid of observed ratings.
///
/// Every cell holds either a positive rating or [`UNOBSERVED`]. The shape is
/// fixed when the matrix is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingMatrix {
    ratings: Array2<u32>,
}

impl RatingMatrix {
    /// Creates a matrix where every cell is unobserved.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        RatingMatrix {
            ratings: Array2::from_elem((num_users, num_items), UNOBSERVED),
        }
    }

    /// Builds a matrix from already mapped ratings. When a cell is rated more
    /// than once, the last rating wins.
    pub fn from_ratings(
        num_users: usize,
        num_items: usize,
        ratings: &[Rating],
    ) -> Result<Self, DataError> {
        let mut matrix = RatingMatrix::new(num_users, num_items);
        let mut overwritten = 0;

        for (position, rating) in ratings.iter().enumerate() {
            if rating.user >= num_users || rating.item >= num_items {
                return Err(DataError::CellOutOfBounds {
                    user: rating.user,
                    item: rating.item,
                    num_users,
                    num_items,
                });
            }
            if rating.value == UNOBSERVED {
                return Err(DataError::UnobservedRating {
                    position: position + 1,
                });
            }

            let cell = &mut matrix.ratings[[rating.user, rating.item]];
            if *cell != UNOBSERVED {
                overwritten += 1;
            }
            *cell = rating.value;
        }

        if overwritten > 0 {
            warn!(
                "{} ratings were given more than once for the same user and item, kept the last one",
                overwritten
            );
        }

        Ok(matrix)
    }

    pub fn num_users(&self) -> usize {
        self.ratings.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.ratings.ncols()
    }

    /// Returns the rating at `(user, item)`, or `None` when the cell is
    /// unobserved or outside the matrix.
    pub fn get(&self, user: usize, item: usize) -> Option<u32> {
        self.ratings
            .get([user, item])
            .copied()
            .filter(|&value| value != UNOBSERVED)
    }

    pub fn num_observed(&self) -> usize {
        self.ratings.iter().filter(|&&value| value != UNOBSERVED).count()
    }

    /// Iterates the observed cells in row-major (user-major) order.
    pub fn observed(&self) -> impl Iterator<Item = Rating> + '_ {
        self.ratings
            .indexed_iter()
            .filter(|&(_, &value)| value != UNOBSERVED)
            .map(|((user, item), &value)| Rating { user, item, value })
    }

    pub fn view(&self) -> ArrayView2<'_, u32> {
        self.ratings.view()
    }
}
