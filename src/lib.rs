pub mod core {
    pub mod classifier;
    pub mod color;
    pub mod content;
    pub mod docx;
    pub mod structure;
    pub mod table;
    pub mod topics;
}

pub mod utils {
    pub mod document_processor;
    pub mod text;
}

pub mod config;
pub mod error;
pub mod markup;
pub mod model;
pub mod source;

pub use crate::config::ConverterConfig;
pub use crate::core::docx::DocxSource;
pub use crate::core::topics::{NavigationNode, NavigationTree, TopicDocument};
pub use crate::error::{ConversionError, Result};
pub use crate::utils::document_processor::{ConversionOutput, DocumentProcessor};
