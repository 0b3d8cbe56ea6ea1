use std::time::Instant;

use clap::ValueEnum;
use log::{debug, info};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::evaluation::{mean_squared_error, RegularizationScope};
use crate::latent_factors::LatentFactorModel;
use crate::rating_matrix::{Rating, RatingMatrix};

/// When the SGD loop is allowed to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Stop once the training error drops below the accepted error, or at the epoch cap.
    #[default]
    AcceptedError,
    /// Always run until the epoch cap.
    MaxEpochs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    AcceptedError,
    EpochLimit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdParameters {
    pub learning_rate: f64,
    pub lambda: f64,
    pub max_epochs: usize,
    pub accepted_squared_error: f64,
    /// Measure the training error after epoch 1 and then every this many epochs.
    pub error_check_interval: usize,
    pub termination_policy: TerminationPolicy,
    pub regularization_scope: RegularizationScope,
}

impl Default for SgdParameters {
    fn default() -> Self {
        SgdParameters {
            learning_rate: 0.01,
            lambda: 0.01,
            max_epochs: 5000,
            accepted_squared_error: 0.1,
            error_check_interval: 1,
            termination_policy: TerminationPolicy::AcceptedError,
            regularization_scope: RegularizationScope::PerObservation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Regularized training error after the last epoch.
    pub final_error: f64,
    pub stop_reason: StopReason,
    /// Number of per-cell updates applied over all epochs.
    pub updates: usize,
}

impl TrainingSummary {
    pub fn converged(&self) -> bool {
        self.stop_reason == StopReason::AcceptedError
    }
}

/// Sequential stochastic gradient descent over the observed cells.
///
/// Each epoch visits the observed cells in row-major order and applies the
/// update for each cell immediately, so later cells see earlier updates.
#[derive(Debug, Clone)]
pub struct SgdTrainer {
    params: SgdParameters,
}

impl SgdTrainer {
    pub fn new(params: SgdParameters) -> Self {
        SgdTrainer { params }
    }

    pub fn params(&self) -> &SgdParameters {
        &self.params
    }

    pub fn train(&self, ratings: &RatingMatrix, model: &mut LatentFactorModel) -> TrainingSummary {
        let start_time = Instant::now();
        let params = &self.params;
        let observed: Vec<Rating> = ratings.observed().collect();
        let check_interval = params.error_check_interval.max(1);

        let mut epochs = 0;
        let mut last_error = None;
        let mut stop_reason = StopReason::EpochLimit;

        while epochs < params.max_epochs {
            for rating in &observed {
                self.update(model, rating);
            }
            epochs += 1;

            if (epochs - 1) % check_interval != 0 {
                last_error = None;
                continue;
            }

            let error = self.training_error(ratings, model);
            last_error = Some(error);
            debug!(
                "sgd: [{:>5}/{}] regularized MSE {:.10}",
                epochs, params.max_epochs, error
            );

            if params.termination_policy == TerminationPolicy::AcceptedError
                && error < params.accepted_squared_error
            {
                stop_reason = StopReason::AcceptedError;
                break;
            }
        }

        let final_error = last_error.unwrap_or_else(|| self.training_error(ratings, model));
        let summary = TrainingSummary {
            epochs,
            final_error,
            stop_reason,
            updates: epochs * observed.len(),
        };

        info!(
            "sgd: {:?} after {} epochs, regularized MSE {:.6} ({} ratings, {} features) in {}ms",
            summary.stop_reason,
            summary.epochs,
            summary.final_error,
            observed.len(),
            model.num_features(),
            start_time.elapsed().as_millis()
        );

        summary
    }

    fn training_error(&self, ratings: &RatingMatrix, model: &LatentFactorModel) -> f64 {
        mean_squared_error(
            ratings,
            model,
            self.params.lambda,
            self.params.regularization_scope,
        )
    }

    /// Moves the user and item vectors of one observed cell along the
    /// regularized error gradient. Both vectors are updated from the same
    /// pre-update values.
    fn update(&self, model: &mut LatentFactorModel, rating: &Rating) {
        let learning_rate = self.params.learning_rate;
        let lambda = self.params.lambda;

        let LatentFactorModel {
            user_factors,
            item_factors,
        } = model;
        let mut user_vector = user_factors.row_mut(rating.user);
        let mut item_vector = item_factors.row_mut(rating.item);

        let error = rating.value as f64 - user_vector.dot(&item_vector);

        Zip::from(&mut user_vector)
            .and(&mut item_vector)
            .for_each(|user_value, item_value| {
                let (u, v) = (*user_value, *item_value);
                *user_value = u + learning_rate * (error * v - lambda * u);
                *item_value = v + learning_rate * (error * u - lambda * v);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn rating(user: usize, item: usize, value: u32) -> Rating {
        Rating { user, item, value }
    }

    fn dense_5x5() -> RatingMatrix {
        let values = [
            [5, 3, 4, 4, 1],
            [3, 1, 2, 3, 3],
            [4, 3, 4, 3, 5],
            [3, 3, 1, 5, 4],
            [1, 5, 5, 2, 1],
        ];
        let ratings: Vec<Rating> = values
            .iter()
            .enumerate()
            .flat_map(|(user, row)| {
                row.iter()
                    .enumerate()
                    .map(move |(item, &value)| rating(user, item, value))
            })
            .collect();
        RatingMatrix::from_ratings(5, 5, &ratings).unwrap()
    }

    #[test]
    fn test_single_update_uses_pre_update_snapshot() {
        let ratings = RatingMatrix::from_ratings(1, 1, &[rating(0, 0, 3)]).unwrap();
        let mut model = LatentFactorModel {
            user_factors: arr2(&[[1.0, 0.5]]),
            item_factors: arr2(&[[2.0, 1.0]]),
        };
        let trainer = SgdTrainer::new(SgdParameters {
            learning_rate: 0.1,
            lambda: 0.5,
            max_epochs: 1,
            termination_policy: TerminationPolicy::MaxEpochs,
            ..SgdParameters::default()
        });

        let summary = trainer.train(&ratings, &mut model);

        // predicted 2.5, error 0.5
        // user: 1.0 + 0.1 * (0.5 * 2.0 - 0.5 * 1.0) = 1.05, 0.5 + 0.1 * (0.5 * 1.0 - 0.5 * 0.5) = 0.525
        // item: 2.0 + 0.1 * (0.5 * 1.0 - 0.5 * 2.0) = 1.95, 1.0 + 0.1 * (0.5 * 0.5 - 0.5 * 1.0) = 0.975
        assert_relative_eq!(model.user_factors[[0, 0]], 1.05, epsilon = 1e-12);
        assert_relative_eq!(model.user_factors[[0, 1]], 0.525, epsilon = 1e-12);
        assert_relative_eq!(model.item_factors[[0, 0]], 1.95, epsilon = 1e-12);
        assert_relative_eq!(model.item_factors[[0, 1]], 0.975, epsilon = 1e-12);
        assert_eq!(summary.epochs, 1);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.stop_reason, StopReason::EpochLimit);
    }

    #[test]
    fn test_unobserved_cells_are_never_touched() {
        // Only user 0 and item 0 appear in an observed cell.
        let ratings = RatingMatrix::from_ratings(2, 2, &[rating(0, 0, 4)]).unwrap();
        let mut model = LatentFactorModel::initialize(2, 2, 3, 11).unwrap();
        let before = model.clone();
        let trainer = SgdTrainer::new(SgdParameters {
            max_epochs: 20,
            termination_policy: TerminationPolicy::MaxEpochs,
            ..SgdParameters::default()
        });

        let summary = trainer.train(&ratings, &mut model);

        assert_eq!(summary.updates, 20);
        assert_eq!(model.user_factors.row(1), before.user_factors.row(1));
        assert_eq!(model.item_factors.row(1), before.item_factors.row(1));
        assert_ne!(model.user_factors.row(0), before.user_factors.row(0));
    }

    #[test]
    fn test_all_unobserved_matrix_makes_no_updates() {
        let ratings = RatingMatrix::new(3, 3);
        let mut model = LatentFactorModel::initialize(3, 3, 2, 5).unwrap();
        let before = model.clone();

        let summary = SgdTrainer::new(SgdParameters::default()).train(&ratings, &mut model);

        assert_eq!(model, before);
        assert_eq!(summary.updates, 0);
        assert_eq!(summary.final_error, 0.0);
        assert_eq!(summary.epochs, 1);
        assert!(summary.converged());
    }

    #[test]
    fn test_dense_matrix_converges_or_hits_the_cap() {
        let ratings = dense_5x5();
        let mut model = LatentFactorModel::initialize(5, 5, 2, 42).unwrap();
        let params = SgdParameters {
            accepted_squared_error: 1.0,
            ..SgdParameters::default()
        };
        let initial_error =
            mean_squared_error(&ratings, &model, params.lambda, params.regularization_scope);

        let summary = SgdTrainer::new(params).train(&ratings, &mut model);

        assert!(summary.final_error < params.accepted_squared_error || summary.epochs == params.max_epochs);
        assert!(summary.final_error < initial_error);
    }

    #[test]
    fn test_error_trends_down_over_epochs() {
        let ratings = dense_5x5();
        let mut model = LatentFactorModel::initialize(5, 5, 2, 3).unwrap();
        let trainer = SgdTrainer::new(SgdParameters {
            max_epochs: 100,
            termination_policy: TerminationPolicy::MaxEpochs,
            ..SgdParameters::default()
        });

        let initial_error = mean_squared_error(
            &ratings,
            &model,
            trainer.params().lambda,
            trainer.params().regularization_scope,
        );

        let mut errors = Vec::new();
        for _ in 0..10 {
            errors.push(trainer.train(&ratings, &mut model).final_error);
        }

        assert!(errors.iter().all(|&error| error < initial_error));
        assert!(errors[9] <= errors[0] + 1e-9);
    }

    #[test]
    fn test_same_seed_gives_identical_training() {
        let ratings = dense_5x5();
        let trainer = SgdTrainer::new(SgdParameters {
            max_epochs: 300,
            ..SgdParameters::default()
        });

        let mut first = LatentFactorModel::initialize(5, 5, 2, 1234).unwrap();
        let mut second = LatentFactorModel::initialize(5, 5, 2, 1234).unwrap();
        let first_summary = trainer.train(&ratings, &mut first);
        let second_summary = trainer.train(&ratings, &mut second);

        assert_eq!(first, second);
        assert_eq!(first_summary, second_summary);
        assert_eq!(first.predicted_matrix(), second.predicted_matrix());
    }

    #[test]
    fn test_diverging_learning_rate_stops_at_the_cap() {
        let ratings = dense_5x5();
        let mut model = LatentFactorModel::initialize(5, 5, 2, 9).unwrap();
        let params = SgdParameters {
            learning_rate: 0.5,
            max_epochs: 50,
            ..SgdParameters::default()
        };

        let summary = SgdTrainer::new(params).train(&ratings, &mut model);

        assert_eq!(summary.epochs, 50);
        assert_eq!(summary.stop_reason, StopReason::EpochLimit);
        assert!(!summary.converged());
    }

    #[test]
    fn test_error_check_interval_delays_the_stop() {
        let ratings = RatingMatrix::from_ratings(
            2,
            2,
            &[rating(0, 0, 5), rating(0, 1, 3), rating(1, 0, 4), rating(1, 1, 2)],
        )
        .unwrap();
        let every_epoch = SgdParameters::default();
        let every_hundred = SgdParameters {
            error_check_interval: 100,
            ..SgdParameters::default()
        };

        let mut model = LatentFactorModel::initialize(2, 2, 1, 8).unwrap();
        let eager = SgdTrainer::new(every_epoch).train(&ratings, &mut model);
        let mut model = LatentFactorModel::initialize(2, 2, 1, 8).unwrap();
        let sparse = SgdTrainer::new(every_hundred).train(&ratings, &mut model);

        assert!(eager.converged());
        assert!(sparse.converged());
        assert!(sparse.epochs >= eager.epochs);
        assert_eq!((sparse.epochs - 1) % 100, 0);
    }

    #[test]
    fn test_end_to_end_two_by_two() {
        let ratings = RatingMatrix::from_ratings(
            2,
            2,
            &[rating(0, 0, 5), rating(0, 1, 3), rating(1, 0, 4), rating(1, 1, 2)],
        )
        .unwrap();
        let mut model = LatentFactorModel::initialize(2, 2, 1, 2024).unwrap();
        let params = SgdParameters::default();

        let summary = SgdTrainer::new(params).train(&ratings, &mut model);

        assert!(summary.converged());
        assert!(summary.epochs < params.max_epochs);
        assert!(summary.final_error < 0.1);
        assert!((model.predict(0, 0).unwrap() - 5.0).abs() < 0.5);
    }
}
