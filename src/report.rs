//! Console tables and CSV artifacts for training and cross-validation runs.
//!
//! Nothing here touches the filesystem directly: tables go to any
//! `io::Write`, and named artifacts go through an [`ArtifactSink`].

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::cross_validation::CrossValidationReport;
use crate::id_mapping::IdMapping;
use crate::latent_factors::LatentFactorModel;
use crate::rating_matrix::{RatingMatrix, UNOBSERVED};

pub const RATINGS_ARTIFACT: &str = "ratings.csv";
pub const PREDICTIONS_ARTIFACT: &str = "predictions.csv";
pub const CROSS_VALIDATION_ARTIFACT: &str = "cross_validation.csv";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Destination for named report artifacts.
pub trait ArtifactSink {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn Write + '_>>;
}

/// Writes every artifact as a file inside one directory.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DirectorySink { root })
    }
}

impl ArtifactSink for DirectorySink {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn Write + '_>> {
        let file = File::create(self.root.join(name))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn csv_writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out)
}

/// One row per user, one comma-terminated column per item, blank where unobserved.
pub fn write_rating_matrix<W: Write>(ratings: &RatingMatrix, out: W) -> Result<(), ReportError> {
    let mut writer = csv_writer(out);
    for row in ratings.view().rows() {
        let fields = row
            .iter()
            .map(|&value| {
                if value == UNOBSERVED {
                    String::new()
                } else {
                    value.to_string()
                }
            })
            .chain(std::iter::once(String::new()));
        writer.write_record(fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Same layout as [`write_rating_matrix`], filled with rounded predictions.
pub fn write_predicted_matrix<W: Write>(
    model: &LatentFactorModel,
    out: W,
) -> Result<(), ReportError> {
    let mut writer = csv_writer(out);
    for row in model.predicted_matrix().rows() {
        let fields = row
            .iter()
            .map(|value| format!("{}", value.round()))
            .chain(std::iter::once(String::new()));
        writer.write_record(fields)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct HeldOutRecord {
    fold: usize,
    user: usize,
    item: usize,
    actual: u32,
    predicted: f64,
}

/// Every held-out prediction of a cross-validation run, with external ids.
pub fn write_cross_validation<W: Write>(
    report: &CrossValidationReport,
    out: W,
) -> Result<(), ReportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);
    for outcome in &report.folds {
        for prediction in &outcome.predictions {
            writer.serialize(HeldOutRecord {
                fold: outcome.fold + 1,
                user: IdMapping::user_id(prediction.user),
                item: IdMapping::item_id(prediction.item),
                actual: prediction.actual,
                predicted: prediction.predicted,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_training_artifacts<S: ArtifactSink>(
    sink: &mut S,
    ratings: &RatingMatrix,
    model: &LatentFactorModel,
) -> Result<(), ReportError> {
    write_rating_matrix(ratings, sink.create(RATINGS_ARTIFACT)?)?;
    write_predicted_matrix(model, sink.create(PREDICTIONS_ARTIFACT)?)?;
    Ok(())
}

pub fn write_cross_validation_artifacts<S: ArtifactSink>(
    sink: &mut S,
    report: &CrossValidationReport,
) -> Result<(), ReportError> {
    write_cross_validation(report, sink.create(CROSS_VALIDATION_ARTIFACT)?)
}

/// `DATA` table of the training matrix, `?` for unobserved cells.
pub fn render_ratings<W: Write>(ratings: &RatingMatrix, out: &mut W) -> io::Result<()> {
    writeln!(out, "DATA")?;
    for (user, row) in ratings.view().rows().into_iter().enumerate() {
        let cells = row
            .iter()
            .map(|&value| {
                if value == UNOBSERVED {
                    "?".to_string()
                } else {
                    value.to_string()
                }
            })
            .join("    ");
        writeln!(out, "User {}:    {}", IdMapping::user_id(user), cells)?;
    }
    Ok(())
}

/// `RESULT` table of every predicted rating.
pub fn render_predictions<W: Write>(model: &LatentFactorModel, out: &mut W) -> io::Result<()> {
    writeln!(out, "RESULT")?;
    for (user, row) in model.predicted_matrix().rows().into_iter().enumerate() {
        let cells = row.iter().map(|value| format!("{:.4}", value)).join("    ");
        writeln!(out, "User {}:    {}", IdMapping::user_id(user), cells)?;
    }
    Ok(())
}

/// Per-fold summary followed by one line per held-out rating.
pub fn render_cross_validation<W: Write>(
    report: &CrossValidationReport,
    out: &mut W,
) -> io::Result<()> {
    for outcome in &report.folds {
        writeln!(
            out,
            "Fold {}/{}: train {}, test {}, epochs {}, training MSE {:.4}, test RMSE {:.4}, test MAE {:.4}",
            outcome.fold + 1,
            report.folds.len(),
            outcome.train_size,
            outcome.test_size,
            outcome.training.epochs,
            outcome.training.final_error,
            outcome.rmse,
            outcome.mae
        )?;
        for prediction in &outcome.predictions {
            writeln!(
                out,
                "Rating: {} -- Predicted: {:.4}",
                prediction.actual, prediction.predicted
            )?;
        }
    }
    writeln!(out, "Mean test RMSE: {:.4}", report.mean_rmse())?;
    Ok(())
}
