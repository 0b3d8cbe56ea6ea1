use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::prelude::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("The number of latent features must be at least 1.")]
    NoLatentFeatures,
    #[error("User index {index} is out of range for a model with {num_users} users.")]
    UserOutOfRange { index: usize, num_users: usize },
    #[error("Item index {index} is out of range for a model with {num_items} items.")]
    ItemOutOfRange { index: usize, num_items: usize },
}

/// User and item latent factor vectors. Row `u` of `user_factors` is the
/// vector of user `u`, row `i` of `item_factors` the vector of item `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentFactorModel {
    pub(crate) user_factors: Array2<f64>,
    pub(crate) item_factors: Array2<f64>,
}

impl LatentFactorModel {
    /// Creates a model with every component drawn uniformly from [0, 1)
    /// using a generator seeded with `seed`.
    pub fn initialize(
        num_users: usize,
        num_items: usize,
        num_features: usize,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::with_rng(num_users, num_items, num_features, &mut rng)
    }

    /// Same as [`LatentFactorModel::initialize`] but draws from a caller-owned generator.
    pub fn with_rng<R: Rng>(
        num_users: usize,
        num_items: usize,
        num_features: usize,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        if num_features == 0 {
            return Err(ModelError::NoLatentFeatures);
        }

        let user_factors = Array2::from_shape_fn((num_users, num_features), |_| rng.gen::<f64>());
        let item_factors = Array2::from_shape_fn((num_items, num_features), |_| rng.gen::<f64>());

        Ok(LatentFactorModel {
            user_factors,
            item_factors,
        })
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    pub fn num_features(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn user_factors(&self) -> ArrayView2<'_, f64> {
        self.user_factors.view()
    }

    pub fn item_factors(&self) -> ArrayView2<'_, f64> {
        self.item_factors.view()
    }

    pub fn user_vector(&self, user: usize) -> Result<ArrayView1<'_, f64>, ModelError> {
        self.check_user(user)?;
        Ok(self.user_factors.row(user))
    }

    pub fn item_vector(&self, item: usize) -> Result<ArrayView1<'_, f64>, ModelError> {
        self.check_item(item)?;
        Ok(self.item_factors.row(item))
    }

    /// Predicted rating for a 0-based user and item index.
    pub fn predict(&self, user: usize, item: usize) -> Result<f64, ModelError> {
        self.check_user(user)?;
        self.check_item(item)?;
        Ok(self.score(user, item))
    }

    /// Dense users x items grid of predicted ratings.
    pub fn predicted_matrix(&self) -> Array2<f64> {
        self.user_factors.dot(&self.item_factors.t())
    }

    // Callers guarantee the indices are in range.
    pub(crate) fn score(&self, user: usize, item: usize) -> f64 {
        self.user_factors.row(user).dot(&self.item_factors.row(item))
    }

    fn check_user(&self, index: usize) -> Result<(), ModelError> {
        if index < self.num_users() {
            Ok(())
        } else {
            Err(ModelError::UserOutOfRange {
                index,
                num_users: self.num_users(),
            })
        }
    }

    fn check_item(&self, index: usize) -> Result<(), ModelError> {
        if index < self.num_items() {
            Ok(())
        } else {
            Err(ModelError::ItemOutOfRange {
                index,
                num_items: self.num_items(),
            })
        }
    }
}
