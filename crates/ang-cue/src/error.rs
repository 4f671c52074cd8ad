use thiserror::Error;

use crate::value::Pos;

#[derive(Debug, Error)]
pub enum CueError {
    #[error("{file}:{line}:{column}: {message}")]
    Syntax {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("{path}: {message}:\n    {pos}")]
    Conflict {
        path: String,
        message: String,
        pos: Pos,
    },

    #[error("found packages {first} and {second} in the same directory ({file})")]
    PackageMismatch {
        first: String,
        second: String,
        file: String,
    },

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CueError {
    /// Position of the failure, when the error carries one
    pub fn location(&self) -> Option<(String, u32, u32)> {
        match self {
            CueError::Syntax {
                file, line, column, ..
            } => Some((file.clone(), *line, *column)),
            CueError::Conflict { pos, .. } if pos.is_valid() => {
                Some((pos.file.clone(), pos.line, pos.column))
            }
            _ => None,
        }
    }
}
