pub mod config;
pub mod cross_validation;
pub mod dataset;
pub mod evaluation;
pub mod id_mapping;
pub mod latent_factors;
pub mod matrix_factorization_sgd;
pub mod rating_matrix;
pub mod report;
