//! Error taxonomy for the FSL transpiler
//!
//! Every failure is attributed to one unit of work (one shader on one
//! platform) and printed in the `file(line): ERROR: message` form that IDE
//! problem matchers already understand for native shader compilers.
//!
//! Author: Moroya Sakamoto

use crate::types::Platform;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Position of a construct in an FSL source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File the line came from (after include expansion)
    pub file: PathBuf,
    /// 1-based line number, 0 when unknown
    pub line: usize,
}

impl SourceLocation {
    /// Create a location
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self { file: file.into(), line }
    }

    /// Location covering a whole file
    pub fn file(file: impl AsRef<Path>) -> Self {
        Self::new(file.as_ref(), 0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file.display())
        } else {
            write!(f, "{}({})", self.file.display(), self.line)
        }
    }
}

/// Transpiler errors
#[derive(Error, Debug)]
pub enum FslError {
    /// Malformed or unrecognized declaration in FSL source
    #[error("{location}: ERROR: {message}")]
    Declaration {
        /// Where the declaration was found
        location: SourceLocation,
        /// What is wrong with it
        message: String,
    },

    /// Construct the target language cannot express
    #[error("{location}: ERROR: {construct} is not supported on {platform}")]
    Unsupported {
        /// Where the construct was found
        location: SourceLocation,
        /// Target being generated
        platform: Platform,
        /// Offending construct
        construct: String,
    },

    /// Native compiler rejected generated text
    #[error("{diagnostics}")]
    Toolchain {
        /// Generated source handed to the compiler
        file: PathBuf,
        /// Compiler output, reformatted where possible
        diagnostics: String,
    },

    /// Missing compiler or environment configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dependency manifest could not be read or written
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Shader container failed validation
    #[error("Invalid container: {0}")]
    InvalidContainer(String),
}

impl FslError {
    /// Declaration error at a location
    pub fn declaration(location: SourceLocation, message: impl Into<String>) -> Self {
        FslError::Declaration { location, message: message.into() }
    }

    /// Unsupported construct error
    pub fn unsupported(
        location: SourceLocation,
        platform: Platform,
        construct: impl Into<String>,
    ) -> Self {
        FslError::Unsupported { location, platform, construct: construct.into() }
    }

    /// Process exit code for this class of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            FslError::Declaration { .. } | FslError::Unsupported { .. } => 1,
            FslError::Toolchain { .. } => 2,
            FslError::Config(_) => 3,
            FslError::Io(_) | FslError::Manifest(_) | FslError::InvalidContainer(_) => 4,
        }
    }
}

impl From<serde_json::Error> for FslError {
    fn from(e: serde_json::Error) -> Self {
        FslError::Manifest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_display_matches_toolchain_convention() {
        let err = FslError::declaration(SourceLocation::new("shaders/basic.frag.fsl", 12), "bad RES");
        assert_eq!(err.to_string(), "shaders/basic.frag.fsl(12): ERROR: bad RES");
    }

    #[test]
    fn test_unknown_line_omits_parentheses() {
        let loc = SourceLocation::file("list.fsl");
        assert_eq!(loc.to_string(), "list.fsl");
    }

    #[test]
    fn test_exit_codes_distinguish_classes() {
        let io = FslError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(io.exit_code(), 4);
        assert_eq!(FslError::Config("x".into()).exit_code(), 3);
        let unsupported = FslError::unsupported(SourceLocation::file("a"), Platform::Gles, "x");
        assert_eq!(unsupported.exit_code(), 1);
    }
}
