//! k-fold cross-validation over observed ratings.
//!
//! The splitter cuts the instance list into `k` contiguous folds without
//! shuffling. The runner trains a fresh model for every fold on the other
//! folds' ratings and predicts the held-out ones.

use itertools::Itertools;
use log::{debug, info, warn};
use rand::Rng;
use thiserror::Error;

use crate::dataset::DataError;
use crate::evaluation::{self, Prediction};
use crate::latent_factors::{LatentFactorModel, ModelError};
use crate::matrix_factorization_sgd::{SgdTrainer, TrainingSummary};
use crate::rating_matrix::{Rating, RatingMatrix};

#[derive(Error, Debug)]
pub enum CrossValidationError {
    #[error("k-fold cross-validation needs at least one fold.")]
    NoFolds,
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One train/test split. `test` is a contiguous slice of the input and
/// `train` is everything before it followed by everything after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold<T> {
    pub index: usize,
    pub train: Vec<T>,
    pub test: Vec<T>,
}

/// Splits `instances` into `k` folds. All test slices have `total / k`
/// instances except the last one, which also takes the remainder.
pub fn split<T: Clone>(instances: &[T], k: usize) -> Result<Vec<Fold<T>>, CrossValidationError> {
    if k == 0 {
        return Err(CrossValidationError::NoFolds);
    }

    let total = instances.len();
    if k > total {
        warn!(
            "{} folds requested for {} instances, the first {} test folds are empty",
            k,
            total,
            k - 1
        );
    }

    let fold_size = total / k;
    let folds = (0..k)
        .map(|index| {
            let start = index * fold_size;
            let end = if index == k - 1 { total } else { start + fold_size };
            Fold {
                index,
                train: instances[..start]
                    .iter()
                    .chain(&instances[end..])
                    .cloned()
                    .collect_vec(),
                test: instances[start..end].to_vec(),
            }
        })
        .collect_vec();

    Ok(folds)
}

/// Where the runner is in its Idle -> (BuildingFold -> Training -> Evaluating)* -> Done cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    BuildingFold(usize),
    Training(usize),
    Evaluating(usize),
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    pub fold: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub training: TrainingSummary,
    pub predictions: Vec<Prediction>,
    pub rmse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationReport {
    pub folds: Vec<FoldOutcome>,
}

impl CrossValidationReport {
    /// Test RMSE averaged over folds that held out at least one rating.
    pub fn mean_rmse(&self) -> f64 {
        let scored = self
            .folds
            .iter()
            .filter(|fold| fold.test_size > 0)
            .map(|fold| fold.rmse)
            .collect_vec();
        if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f64>() / scored.len() as f64
        }
    }
}

/// Trains and evaluates one model per fold. Nothing but the configuration
/// and the random generator is carried from one fold to the next.
pub struct CrossValidationRunner<R: Rng> {
    num_users: usize,
    num_items: usize,
    num_features: usize,
    fold_count: usize,
    trainer: SgdTrainer,
    rng: R,
    state: RunnerState,
}

impl<R: Rng> CrossValidationRunner<R> {
    pub fn new(
        num_users: usize,
        num_items: usize,
        num_features: usize,
        fold_count: usize,
        trainer: SgdTrainer,
        rng: R,
    ) -> Self {
        CrossValidationRunner {
            num_users,
            num_items,
            num_features,
            fold_count,
            trainer,
            rng,
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn run(&mut self, ratings: &[Rating]) -> Result<CrossValidationReport, CrossValidationError> {
        self.transition(RunnerState::Idle);
        let folds = split(ratings, self.fold_count)?;
        info!(
            "Cross-validating {} ratings over {} folds",
            ratings.len(),
            folds.len()
        );

        let mut outcomes = Vec::with_capacity(folds.len());
        for fold in &folds {
            outcomes.push(self.run_fold(fold)?);
        }

        self.transition(RunnerState::Done);
        Ok(CrossValidationReport { folds: outcomes })
    }

    fn run_fold(&mut self, fold: &Fold<Rating>) -> Result<FoldOutcome, CrossValidationError> {
        self.transition(RunnerState::BuildingFold(fold.index));
        let training_matrix = RatingMatrix::from_ratings(self.num_users, self.num_items, &fold.train)?;
        let mut model = LatentFactorModel::with_rng(
            self.num_users,
            self.num_items,
            self.num_features,
            &mut self.rng,
        )?;

        self.transition(RunnerState::Training(fold.index));
        let training = self.trainer.train(&training_matrix, &mut model);

        self.transition(RunnerState::Evaluating(fold.index));
        let predictions = evaluation::predict(&model, &fold.test)?;
        let outcome = FoldOutcome {
            fold: fold.index,
            train_size: fold.train.len(),
            test_size: fold.test.len(),
            training,
            rmse: evaluation::rmse(&predictions),
            mae: evaluation::mae(&predictions),
            predictions,
        };

        info!(
            "Fold {}/{}: {} train, {} test, {} epochs, test RMSE {:.4}, MAE {:.4}",
            fold.index + 1,
            self.fold_count,
            outcome.train_size,
            outcome.test_size,
            outcome.training.epochs,
            outcome.rmse,
            outcome.mae
        );

        Ok(outcome)
    }

    fn transition(&mut self, next: RunnerState) {
        debug!("cross-validation: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
