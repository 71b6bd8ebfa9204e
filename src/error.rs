// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by the config front-end and the daemon binary.

use std::{error, fmt, io, path::PathBuf};

/// Where in the loaded config files something was defined. Kept on hotkeys
/// so duplicate-definition errors can point at both sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
  pub file: PathBuf,
  pub line: u32,
  pub column: u32,
}

impl fmt::Display for SourceLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
  }
}

/// A positioned error produced while tokenizing or parsing a config file.
///
/// Renders as `path:line:col: message`, one line per error, which is the
/// format the binary prints on a failed (re)load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
  pub file: PathBuf,
  pub line: u32,
  pub column: u32,
  pub message: String,
}

impl ParseError {
  pub fn new(file: impl Into<PathBuf>, line: u32, column: u32, message: impl Into<String>) -> Self {
    ParseError {
      file: file.into(),
      line,
      column,
      message: message.into(),
    }
  }
}

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}:{}: {}",
      self.file.display(),
      self.line,
      self.column,
      self.message
    )
  }
}

impl error::Error for ParseError {}

/// Top-level failure of the daemon surface.
#[derive(Debug)]
pub enum Error {
  /// No config file was given and none of the probed locations exist.
  ConfigNotFound(Vec<PathBuf>),
  /// Reading a config file failed.
  Io(PathBuf, io::Error),
  /// One or more parse errors; the load was aborted and no mappings were
  /// published.
  Parse(Vec<ParseError>),
  /// The OS integration refused to start (tap creation, permissions, ...).
  Os(String),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::ConfigNotFound(probed) => {
        write!(f, "no config file found; probed:")?;
        for path in probed {
          write!(f, " {}", path.display())?;
        }
        Ok(())
      }
      Error::Io(path, err) => write!(f, "{}: {}", path.display(), err),
      Error::Parse(errors) => {
        let mut first = true;
        for err in errors {
          if !first {
            writeln!(f)?;
          }
          write!(f, "{}", err)?;
          first = false;
        }
        Ok(())
      }
      Error::Os(msg) => f.pad(msg),
    }
  }
}

impl error::Error for Error {}

impl From<Vec<ParseError>> for Error {
  fn from(errors: Vec<ParseError>) -> Self {
    Error::Parse(errors)
  }
}
