//! Error types shared by the maze crates.

use std::path::PathBuf;

use thiserror::Error;

use crate::{Action, Position};

/// Problems with a maze or learner configuration, reported at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("grid must have at least one row and one column, got {rows}x{cols}")]
    EmptyGrid { rows: usize, cols: usize },

    #[error("a {rows}x{cols} grid does not fit in memory")]
    GridTooLarge { rows: usize, cols: usize },

    #[error("{what} {position} is out of bounds for a {rows}x{cols} grid")]
    OutOfBounds {
        what: &'static str,
        position: Position,
        rows: usize,
        cols: usize,
    },

    #[error("{what} {position} is placed on an obstacle")]
    OnObstacle {
        what: &'static str,
        position: Position,
    },

    #[error("goal {goal} cannot be reached from start {start}")]
    Unreachable { start: Position, goal: Position },

    #[error("parameter {name} = {value} must lie in {expected}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("maze line {line}: {message}")]
    MazeParse { line: usize, message: String },
}

/// Domain errors raised by the learner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LearnerError {
    #[error("invalid action '{0}', expected one of up, down, left, right")]
    InvalidAction(String),

    #[error("state {position} is outside the {rows}x{cols} value table")]
    StateOutOfBounds {
        position: Position,
        rows: usize,
        cols: usize,
    },

    #[error("value table is {found_rows}x{found_cols}, expected {rows}x{cols}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("value table has no entry for {position}")]
    MissingEntry { position: Position },

    #[error("value table has no value for {action} at {position}")]
    IncompleteTable { position: Position, action: Action },

    #[error("value table lists {position} more than once")]
    DuplicateEntry { position: Position },

    #[error("value for {action} at {position} is not finite: {value}")]
    NonFiniteValue {
        position: Position,
        action: Action,
        value: f64,
    },
}

/// Failures while writing a value table to disk.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to {operation} {path:?}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode value table: {0}")]
    Encode(#[from] serde_json::Error),
}
