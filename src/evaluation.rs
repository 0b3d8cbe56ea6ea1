use clap::ValueEnum;
use log::debug;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::latent_factors::{LatentFactorModel, ModelError};
use crate::rating_matrix::{Rating, RatingMatrix};

/// How the L2 penalty enters the regularized mean squared error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationScope {
    /// Adds `lambda * (|user|^2 + |item|^2)` for every observed cell, so a
    /// user or item with many ratings is penalized many times. This is the
    /// same per-sample penalty the SGD update minimizes.
    #[default]
    PerObservation,
    /// Adds `lambda * (sum |user|^2 + sum |item|^2)` once over all vectors.
    PerEntity,
}

/// Regularized mean squared error over the observed cells of `ratings`.
///
/// Returns 0.0 when there are no observed cells.
pub fn mean_squared_error(
    ratings: &RatingMatrix,
    model: &LatentFactorModel,
    lambda: f64,
    scope: RegularizationScope,
) -> f64 {
    let mut squared_error = 0.0;
    let mut penalty = 0.0;
    let mut num_observed = 0;

    for Rating { user, item, value } in ratings.observed() {
        let user_vector = model.user_factors.row(user);
        let item_vector = model.item_factors.row(item);
        let error = value as f64 - user_vector.dot(&item_vector);
        squared_error += error * error;
        if scope == RegularizationScope::PerObservation {
            penalty += squared_norm(user_vector) + squared_norm(item_vector);
        }
        num_observed += 1;
    }

    if num_observed == 0 {
        debug!("No observed ratings, mean squared error defaults to 0");
        return 0.0;
    }

    if scope == RegularizationScope::PerEntity {
        penalty = model.user_factors.iter().map(|x| x * x).sum::<f64>()
            + model.item_factors.iter().map(|x| x * x).sum::<f64>();
    }

    (squared_error + lambda * penalty) / num_observed as f64
}

fn squared_norm(vector: ArrayView1<f64>) -> f64 {
    vector.dot(&vector)
}

/// A held-out rating next to the model's prediction for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub user: usize,
    pub item: usize,
    pub actual: u32,
    pub predicted: f64,
}

impl Prediction {
    pub fn error(&self) -> f64 {
        self.actual as f64 - self.predicted
    }
}

/// Predicts every test rating without touching the model.
pub fn predict(
    model: &LatentFactorModel,
    test_ratings: &[Rating],
) -> Result<Vec<Prediction>, ModelError> {
    test_ratings
        .iter()
        .map(|rating| {
            Ok(Prediction {
                user: rating.user,
                item: rating.item,
                actual: rating.value,
                predicted: model.predict(rating.user, rating.item)?,
            })
        })
        .collect()
}

/// Root mean squared error of the predictions, 0.0 for an empty slice.
pub fn rmse(predictions: &[Prediction]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let sum: f64 = predictions.iter().map(|p| p.error().powi(2)).sum();
    (sum / predictions.len() as f64).sqrt()
}

/// Mean absolute error of the predictions, 0.0 for an empty slice.
pub fn mae(predictions: &[Prediction]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let sum: f64 = predictions.iter().map(|p| p.error().abs()).sum();
    sum / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn model() -> LatentFactorModel {
        LatentFactorModel {
            user_factors: arr2(&[[1.0, 1.0], [2.0, 0.0]]),
            item_factors: arr2(&[[1.0, 2.0], [0.5, 0.5]]),
        }
    }

    fn ratings() -> RatingMatrix {
        RatingMatrix::from_ratings(
            2,
            2,
            &[
                Rating { user: 0, item: 0, value: 4 },
                Rating { user: 1, item: 1, value: 2 },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_per_observation_penalty() {
        // (0,0): predicted 3, error 1, norms 2 + 5
        // (1,1): predicted 1, error 1, norms 4 + 0.5
        let expected = (1.0 + 1.0 + 0.1 * (7.0 + 4.5)) / 2.0;
        let mse = mean_squared_error(&ratings(), &model(), 0.1, RegularizationScope::PerObservation);
        assert_relative_eq!(mse, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_per_entity_penalty() {
        // users: 2 + 4, items: 5 + 0.5
        let expected = (1.0 + 1.0 + 0.1 * 11.5) / 2.0;
        let mse = mean_squared_error(&ratings(), &model(), 0.1, RegularizationScope::PerEntity);
        assert_relative_eq!(mse, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_without_regularization_is_plain_mse() {
        let mse = mean_squared_error(&ratings(), &model(), 0.0, RegularizationScope::PerObservation);
        assert_relative_eq!(mse, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_observed_cells_gives_zero() {
        let empty = RatingMatrix::new(2, 2);
        for scope in [RegularizationScope::PerObservation, RegularizationScope::PerEntity] {
            assert_eq!(mean_squared_error(&empty, &model(), 0.01, scope), 0.0);
        }
    }

    #[test]
    fn test_predict_pairs_actual_with_predicted() {
        let model = model();
        let before = model.clone();
        let test = [
            Rating { user: 0, item: 1, value: 3 },
            Rating { user: 1, item: 0, value: 1 },
        ];

        let predictions = predict(&model, &test).unwrap();

        assert_eq!(model, before);
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].actual, 3);
        assert_relative_eq!(predictions[0].predicted, 1.0);
        assert_eq!(predictions[1].actual, 1);
        assert_relative_eq!(predictions[1].predicted, 2.0);

        assert_relative_eq!(rmse(&predictions), (5.0f64 / 2.0).sqrt());
        assert_relative_eq!(mae(&predictions), 1.5);
    }

    #[test]
    fn test_predict_rejects_unknown_users() {
        let test = [Rating { user: 5, item: 0, value: 3 }];
        assert!(predict(&model(), &test).is_err());
    }

    #[test]
    fn test_empty_prediction_metrics() {
        assert_eq!(rmse(&[]), 0.0);
        assert_eq!(mae(&[]), 0.0);
    }
}
