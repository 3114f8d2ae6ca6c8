use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed shift table at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("tensor `{0}` not found in shift table")]
    NotFound(String),

    #[error("inference runtime {} failed with exit code {code:?}", .program.display())]
    ExternalInvocation { program: PathBuf, code: Option<i32> },

    #[error("runtime output has {actual} values, expected {expected}")]
    OutputLength { expected: usize, actual: usize },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("shape holds {expected} elements but {actual} were given")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("no samples were scored")]
    NoSamplesScored,

    #[error(
        "test failed, accuracy is {:.1}% < {:.0}%",
        .accuracy * 100.0,
        .threshold * 100.0
    )]
    ValidationFailure { accuracy: f64, threshold: f64 },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
