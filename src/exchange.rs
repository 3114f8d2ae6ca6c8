//! File-based exchange with the compiled inference runtime.
//!
//! The runtime reads one q7 input tensor from [`ExchangeFiles::input`], runs the model
//! and writes the q7 output tensor to [`ExchangeFiles::output`]. Both files are raw
//! signed bytes in row-major order. There is exactly one writer and one reader, in
//! strict alternation, so no locking is involved.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

pub const DEFAULT_INPUT: &str = "tmp/input.raw";
pub const DEFAULT_OUTPUT: &str = "tmp/Softmax1.raw";
pub const DEFAULT_PROGRAM: &str = "./mnist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFiles {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Default for ExchangeFiles {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

impl ExchangeFiles {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Overwrites the input file, creating its directory if needed
    pub fn write_input(&self, bytes: &[u8]) -> Result<()> {
        if let Some(dir) = self.input.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        fs::write(&self.input, bytes).map_err(|e| Error::io(&self.input, e))
    }

    /// Removes the output file left by a previous invocation, if any
    pub fn clear_output(&self) -> Result<()> {
        match fs::remove_file(&self.output) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::io(&self.output, e)),
            _ => Ok(()),
        }
    }

    /// Reads the output file, which must hold exactly `expected_len` bytes
    pub fn read_output(&self, expected_len: usize) -> Result<Vec<u8>> {
        let bytes = fs::read(&self.output).map_err(|e| Error::io(&self.output, e))?;
        if bytes.len() != expected_len {
            return Err(Error::OutputLength {
                expected: expected_len,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }
}

/// An inference runtime driven through [`ExchangeFiles`].
///
/// `invoke` is called after the input file was written and must leave the output file
/// in place when it returns `Ok`. A runtime that ran but reported failure returns
/// [`Error::ExternalInvocation`]; any other error means it could not be run at all.
pub trait Runtime {
    fn invoke(&mut self, files: &ExchangeFiles) -> Result<()>;
}

/// Runs an external program with no arguments and its stdout discarded.
///
/// The call blocks until the program exits. There is no timeout: a runtime that hangs
/// hangs the caller.
#[derive(Debug, Clone)]
pub struct ExternalBinary {
    program: PathBuf,
}

impl ExternalBinary {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Runtime for ExternalBinary {
    fn invoke(&mut self, _files: &ExchangeFiles) -> Result<()> {
        let status = Command::new(&self.program)
            .stdout(Stdio::null())
            .status()
            .map_err(|e| Error::io(&self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::ExternalInvocation {
                program: self.program.clone(),
                code: status.code(),
            })
        }
    }
}
