// src/error.rs
use thiserror::Error;

/// Failures raised while turning a source document into topics.
///
/// Only the package-level variants abort a run; everything else is logged by
/// the component that hit it and the offending unit is skipped.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("malformed {unit}: {reason}")]
    MalformedInput { unit: String, reason: String },

    #[error("no heading structure found in {0}")]
    MissingRequiredStructure(String),

    #[error("could not retrieve {resource}: {reason}")]
    ExternalResource { resource: String, reason: String },

    #[error("cannot open source document: {0}")]
    FatalEnvironment(String),
}

impl ConversionError {
    pub fn malformed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn external(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalResource {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error aborts the whole conversion.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Zip(_) | Self::Xml(_) | Self::FatalEnvironment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
