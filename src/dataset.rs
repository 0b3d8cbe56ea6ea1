use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

/// A rating as it appears in the input file, with 1-based user and item ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingTriple {
    pub user_id: u32,
    pub item_id: u32,
    pub rating: u32,
}

/// Failures while reading ratings or turning them into matrix cells.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read rating file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Line {line}: expected 3 whitespace-separated fields (user item rating), found {found}.")]
    FieldCount { line: usize, found: usize },
    #[error("Line {line}: '{value}' is not a positive integer.")]
    NotAPositiveInteger { line: usize, value: String },
    #[error("Rating #{position}: {kind} id {id} is outside the configured range 1..={bound}.")]
    IdOutOfRange {
        position: usize,
        kind: &'static str,
        id: u32,
        bound: usize,
    },
    #[error("Rating #{position} has the value 0, which is reserved for unobserved cells.")]
    UnobservedRating { position: usize },
    #[error("Cell ({user}, {item}) lies outside a {num_users}x{num_items} rating matrix.")]
    CellOutOfBounds {
        user: usize,
        item: usize,
        num_users: usize,
        num_items: usize,
    },
}

/// Reads `<user> <item> <rating>` triples from a whitespace-separated file.
///
/// Any malformed line fails the whole load, so training never starts on a
/// partially valid file.
pub fn load_ratings(path: &Path) -> Result<Vec<RatingTriple>, DataError> {
    let io_error = |source: std::io::Error| DataError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let triples = parse_ratings(BufReader::new(file)).map_err(|error| match error {
        DataError::Io { source, .. } => io_error(source),
        other => other,
    })?;

    info!("Read {} ratings from {}", triples.len(), path.display());
    Ok(triples)
}

pub fn parse_ratings<R: BufRead>(reader: R) -> Result<Vec<RatingTriple>, DataError> {
    let mut triples = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|source| DataError::Io {
            path: PathBuf::new(),
            source,
        })?;

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 3 {
            return Err(DataError::FieldCount {
                line: line_number,
                found: fields.len(),
            });
        }

        triples.push(RatingTriple {
            user_id: parse_positive(fields[0], line_number)?,
            item_id: parse_positive(fields[1], line_number)?,
            rating: parse_positive(fields[2], line_number)?,
        });
    }

    Ok(triples)
}

fn parse_positive(field: &str, line: usize) -> Result<u32, DataError> {
    match field.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(DataError::NotAPositiveInteger {
            line,
            value: field.to_string(),
        }),
    }
}
