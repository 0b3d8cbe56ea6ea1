use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use factor_cf::config::Config;
use factor_cf::cross_validation::CrossValidationRunner;
use factor_cf::dataset::load_ratings;
use factor_cf::evaluation::RegularizationScope;
use factor_cf::id_mapping::BoundsPolicy;
use factor_cf::latent_factors::LatentFactorModel;
use factor_cf::matrix_factorization_sgd::{SgdTrainer, TerminationPolicy};
use factor_cf::rating_matrix::RatingMatrix;
use factor_cf::report::{self, DirectorySink};

#[derive(Parser, Debug)]
#[clap(
    name = "factor-cf",
    version,
    about = "Latent factor collaborative filtering trained with stochastic gradient descent."
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on every rating and print the completed matrix.
    Train(RunArgs),
    /// Estimate prediction error with k-fold cross-validation.
    CrossValidate(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Whitespace-separated `user item rating` file with 1-based ids.
    ratings: PathBuf,

    /// TOML file with run settings. Flags below override it.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Directory for CSV artifacts. Nothing is written without it.
    #[clap(long)]
    output_dir: Option<PathBuf>,

    #[clap(long)]
    num_users: Option<usize>,
    #[clap(long)]
    num_items: Option<usize>,
    #[clap(long)]
    num_latent_features: Option<usize>,
    #[clap(long)]
    learning_rate: Option<f64>,
    #[clap(long)]
    max_epochs: Option<usize>,
    #[clap(long)]
    accepted_squared_error: Option<f64>,
    #[clap(long)]
    lambda: Option<f64>,
    #[clap(long)]
    fold_count: Option<usize>,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long)]
    error_check_interval: Option<usize>,
    #[clap(long, value_enum)]
    termination_policy: Option<TerminationPolicy>,
    #[clap(long, value_enum)]
    regularization_scope: Option<RegularizationScope>,
    #[clap(long, value_enum)]
    bounds_policy: Option<BoundsPolicy>,
}

impl RunArgs {
    fn config(&self) -> Result<Config, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(value) = self.num_users {
            config.num_users = value;
        }
        if let Some(value) = self.num_items {
            config.num_items = value;
        }
        if let Some(value) = self.num_latent_features {
            config.num_latent_features = value;
        }
        if let Some(value) = self.learning_rate {
            config.learning_rate = value;
        }
        if let Some(value) = self.max_epochs {
            config.max_epochs = value;
        }
        if let Some(value) = self.accepted_squared_error {
            config.accepted_squared_error = value;
        }
        if let Some(value) = self.lambda {
            config.lambda = value;
        }
        if let Some(value) = self.fold_count {
            config.fold_count = value;
        }
        if self.seed.is_some() {
            config.rng_seed = self.seed;
        }
        if let Some(value) = self.error_check_interval {
            config.error_check_interval = value;
        }
        if let Some(value) = self.termination_policy {
            config.termination_policy = value;
        }
        if let Some(value) = self.regularization_scope {
            config.regularization_scope = value;
        }
        if let Some(value) = self.bounds_policy {
            config.bounds_policy = value;
        }

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Train(args) => train(&args),
        Command::CrossValidate(args) => cross_validate(&args),
    }
}

fn train(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = args.config()?;
    config.validate()?;

    let triples = load_ratings(&args.ratings)?;
    let ratings = config.id_mapping().map_all(&triples)?;
    let matrix = RatingMatrix::from_ratings(config.num_users, config.num_items, &ratings)?;
    info!(
        "Training on {} observed ratings of a {}x{} matrix",
        matrix.num_observed(),
        config.num_users,
        config.num_items
    );

    let mut model = match config.rng_seed {
        Some(seed) => LatentFactorModel::initialize(
            config.num_users,
            config.num_items,
            config.num_latent_features,
            seed,
        )?,
        None => LatentFactorModel::with_rng(
            config.num_users,
            config.num_items,
            config.num_latent_features,
            &mut StdRng::from_entropy(),
        )?,
    };

    let summary = SgdTrainer::new(config.sgd_parameters()).train(&matrix, &mut model);
    if !summary.converged() {
        info!(
            "Stopped after {} epochs with error {:.6} above the accepted {}",
            summary.epochs, summary.final_error, config.accepted_squared_error
        );
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    report::render_ratings(&matrix, &mut out)?;
    writeln!(out)?;
    report::render_predictions(&model, &mut out)?;

    if let Some(dir) = &args.output_dir {
        let mut sink = DirectorySink::new(dir)?;
        report::write_training_artifacts(&mut sink, &matrix, &model)?;
        info!("Wrote artifacts to {}", dir.display());
    }

    Ok(())
}

fn cross_validate(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = args.config()?;
    config.validate_for_cross_validation()?;

    let triples = load_ratings(&args.ratings)?;
    let ratings = config.id_mapping().map_all(&triples)?;

    let rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut runner = CrossValidationRunner::new(
        config.num_users,
        config.num_items,
        config.num_latent_features,
        config.fold_count,
        SgdTrainer::new(config.sgd_parameters()),
        rng,
    );
    let cv_report = runner.run(&ratings)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    report::render_cross_validation(&cv_report, &mut out)?;

    if let Some(dir) = &args.output_dir {
        let mut sink = DirectorySink::new(dir)?;
        report::write_cross_validation_artifacts(&mut sink, &cv_report)?;
        info!("Wrote artifacts to {}", dir.display());
    }

    Ok(())
}
