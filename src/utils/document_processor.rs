// src/utils/document_processor.rs
use crate::config::ConverterConfig;
use crate::core::classifier::StyleClassifier;
use crate::core::content::ContentAssembler;
use crate::core::docx::DocxSource;
use crate::core::structure::{RoleResolver, StructureBuilder};
use crate::core::topics::{NavigationTree, TopicDocument, TopicSynthesizer};
use crate::error::{ConversionError, Result};
use crate::source::{DocumentSource, ImageFetcher};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Everything produced for one source document.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub source: String,
    pub topics: BTreeMap<String, TopicDocument>,
    /// Topic ids in navigation order.
    pub topic_order: Vec<String>,
    pub navigation: NavigationTree,
    /// File name to bytes.
    #[serde(skip)]
    pub images: BTreeMap<String, Vec<u8>>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary<'a> {
    pub source: &'a str,
    pub topics: &'a [String],
    pub images: Vec<&'a str>,
    pub metadata: &'a BTreeMap<String, String>,
}

impl ConversionOutput {
    /// Topics in navigation order.
    pub fn ordered_topics(&self) -> impl Iterator<Item = &TopicDocument> {
        self.topic_order.iter().filter_map(|id| self.topics.get(id))
    }

    pub fn summary(&self) -> ConversionSummary<'_> {
        ConversionSummary {
            source: &self.source,
            topics: &self.topic_order,
            images: self.images.keys().map(String::as_str).collect(),
            metadata: &self.metadata,
        }
    }
}

/// Runs the conversion pipeline for single documents or whole directories.
pub struct DocumentProcessor {
    config: ConverterConfig,
    fetcher: Option<Box<dyn ImageFetcher>>,
}

impl DocumentProcessor {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config, fetcher: None }
    }

    /// Enables linked (non-embedded) images.
    pub fn with_image_fetcher(mut self, fetcher: Box<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn convert(&self, source: &dyn DocumentSource) -> Result<ConversionOutput> {
        let blocks = source.blocks();
        info!("Converting {} ({} blocks)", source.name(), blocks.len());

        let levels = StyleClassifier::new(&self.config).classify(source.styles(), blocks);
        debug!("{} heading style(s) resolved", levels.len());

        let mut tree = StructureBuilder::new(&levels).build(blocks);
        RoleResolver::resolve(&mut tree);

        let mut assembler = ContentAssembler::new(&self.config, source).with_fetcher(self.fetcher.as_deref());
        let synthesis = TopicSynthesizer::new(&self.config).synthesize(&tree, blocks, source.name(), &mut assembler);
        let images = assembler.into_images();

        let topic_order: Vec<String> = synthesis.topics.iter().map(|t| t.id.clone()).collect();
        let topics = synthesis
            .topics
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        info!(
            "Converted {}: {} topic(s), {} image(s)",
            source.name(),
            topic_order.len(),
            images.len()
        );
        Ok(ConversionOutput {
            source: source.name().to_string(),
            topics,
            topic_order,
            navigation: synthesis.navigation,
            images,
            metadata: source.metadata().clone(),
        })
    }

    /// Opens a `.docx` package and converts it. Failing to open it is fatal.
    pub fn convert_path<P: AsRef<Path>>(&self, path: P) -> Result<ConversionOutput> {
        let source = DocxSource::open(path.as_ref())?;
        self.convert(&source)
    }

    /// Converts every `.docx` in `dir`; files that fail are logged and skipped.
    pub fn convert_directory<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<ConversionOutput>> {
        let dir = dir.as_ref();
        info!("Starting to process documents from: {}", dir.display());

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_docx = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("docx"));
            if path.is_file() && is_docx {
                files.push(path);
            } else {
                debug!("Skipping entry: {:?}", path.file_name());
            }
        }
        files.sort();

        let mut outputs = Vec::with_capacity(files.len());
        for path in files {
            match self.convert_path(&path) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    let skipped = ConversionError::malformed(path.display().to_string(), e.to_string());
                    if e.is_fatal() {
                        error!("{}", skipped);
                    } else {
                        warn!("{}", skipped);
                    }
                }
            }
        }

        info!("Completed {} document(s) from {}", outputs.len(), dir.display());
        Ok(outputs)
    }
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, Paragraph, Run};
    use crate::source::{MemoryDocument, MemoryStyles, StyleDefinition};

    fn para(style: &str, text: &str) -> Block {
        Block::Paragraph(Paragraph::new(Some(style), text))
    }

    #[test]
    fn converts_in_memory_documents() {
        let mut picture = Paragraph::default();
        picture.runs.push(Run::image("rId1"));
        let mut doc = MemoryDocument::new("spec sheet.docx", vec![
            para("Chapter Title", "Overview"),
            para("Normal", "text"),
            Block::Paragraph(picture),
            para("Chapter Title", "Details"),
        ])
        .with_styles(MemoryStyles::new().with_style(StyleDefinition::new("Chapter Title").outline(1)))
        .with_media("rId1", "media/image1.emf", vec![0xEF]);
        doc.metadata.insert("manual_code".into(), "SP-9".into());

        let output = DocumentProcessor::default().convert(&doc).unwrap();
        assert_eq!(output.topic_order, vec!["overview", "details"]);
        assert_eq!(output.images.keys().collect::<Vec<_>>(), vec!["image1.emf"]);
        assert_eq!(output.metadata.get("manual_code").map(String::as_str), Some("SP-9"));

        let overview = output.ordered_topics().next().unwrap();
        assert_eq!(
            overview.to_xml(),
            r#"<topic id="overview"><title>Overview</title><body><p>text</p><sl><sli><image href="images/image1.emf"/></sli></sl></body></topic>"#
        );
    }

    #[test]
    fn summary_lists_topics_and_images_but_not_bytes() {
        let doc = MemoryDocument::new("a.docx", vec![para("Normal", "only")]);
        let output = DocumentProcessor::default().convert(&doc).unwrap();
        let json = serde_json::to_value(output.summary()).unwrap();
        assert_eq!(json["topics"], serde_json::json!(["a"]));
        assert_eq!(json["images"], serde_json::json!([]));
        let full = serde_json::to_value(&output).unwrap();
        assert!(full.get("images").is_none());
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = DocumentProcessor::default()
            .convert_path("/definitely/not/here.docx")
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
