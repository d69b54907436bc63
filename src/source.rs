// src/source.rs
//! Collaborator interfaces consumed by the conversion engine, plus in-memory
//! implementations used by the `.docx` reader and by tests.
use crate::error::Result;
use crate::model::{Block, RawCell, Run};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingRef {
    pub num_id: String,
    /// Zero-based list depth (`ilvl`).
    pub depth: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDefinition {
    pub name: String,
    pub based_on: Option<String>,
    /// Explicit outline level, already 1-based.
    pub outline_level: Option<u8>,
    pub numbering: Option<NumberingRef>,
}

impl StyleDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn based_on(mut self, parent: &str) -> Self {
        self.based_on = Some(parent.to_string());
        self
    }

    pub fn outline(mut self, level: u8) -> Self {
        self.outline_level = Some(level);
        self
    }

    pub fn numbered(mut self, num_id: &str, depth: u8) -> Self {
        self.numbering = Some(NumberingRef {
            num_id: num_id.to_string(),
            depth,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberFormat {
    Decimal,
    UpperRoman,
    LowerRoman,
    UpperLetter,
    LowerLetter,
    Bullet,
    Other(String),
}

impl NumberFormat {
    /// Maps a WordprocessingML `numFmt` value.
    pub fn from_ooxml(val: &str) -> Self {
        match val {
            "decimal" | "decimalZero" => NumberFormat::Decimal,
            "upperRoman" => NumberFormat::UpperRoman,
            "lowerRoman" => NumberFormat::LowerRoman,
            "upperLetter" => NumberFormat::UpperLetter,
            "lowerLetter" => NumberFormat::LowerLetter,
            "bullet" => NumberFormat::Bullet,
            other => NumberFormat::Other(other.to_string()),
        }
    }

    pub fn is_ordered(&self) -> bool {
        !matches!(self, NumberFormat::Bullet | NumberFormat::Other(_))
    }
}

/// Read-only style and numbering lookups.
pub trait StyleRepository {
    fn style(&self, name: &str) -> Option<&StyleDefinition>;

    fn style_names(&self) -> Vec<String>;

    fn numbering_format(&self, num_id: &str, depth: u8) -> Option<NumberFormat>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    /// Lowercase file extension without the dot.
    pub extension: String,
}

/// A parsed source document.
pub trait DocumentSource {
    /// File name the document was loaded from.
    fn name(&self) -> &str;

    fn blocks(&self) -> &[Block];

    fn styles(&self) -> &dyn StyleRepository;

    /// Bytes of media embedded in the package.
    fn embedded_image(&self, rel_id: &str) -> Option<ImageData>;

    /// Target of a relationship (hyperlink URL, media path or external image URL).
    fn relationship_target(&self, rel_id: &str) -> Option<&str>;

    /// RGB hex of a theme colour slot.
    fn theme_color(&self, name: &str) -> Option<&str>;

    fn metadata(&self) -> &BTreeMap<String, String>;
}

/// Retrieves images that are linked rather than embedded.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Uniform view over table cell content, whatever container it came from.
pub trait CellRef {
    fn blocks(&self) -> &[Block];

    fn runs(&self) -> Vec<&Run> {
        self.blocks()
            .iter()
            .filter_map(Block::as_paragraph)
            .flat_map(|p| p.runs.iter())
            .collect()
    }

    fn text(&self) -> String {
        self.blocks()
            .iter()
            .filter_map(Block::as_paragraph)
            .map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl CellRef for RawCell {
    fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl CellRef for [Block] {
    fn blocks(&self) -> &[Block] {
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStyles {
    styles: BTreeMap<String, StyleDefinition>,
    numbering: HashMap<String, Vec<NumberFormat>>,
}

impl MemoryStyles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, style: StyleDefinition) {
        self.styles.insert(style.name.clone(), style);
    }

    pub fn with_style(mut self, style: StyleDefinition) -> Self {
        self.insert(style);
        self
    }

    /// Registers the formats of a numbering definition, one per depth.
    pub fn insert_numbering(&mut self, num_id: &str, formats: Vec<NumberFormat>) {
        self.numbering.insert(num_id.to_string(), formats);
    }

    pub fn with_numbering(mut self, num_id: &str, formats: Vec<NumberFormat>) -> Self {
        self.insert_numbering(num_id, formats);
        self
    }
}

impl StyleRepository for MemoryStyles {
    fn style(&self, name: &str) -> Option<&StyleDefinition> {
        self.styles.get(name)
    }

    fn style_names(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }

    fn numbering_format(&self, num_id: &str, depth: u8) -> Option<NumberFormat> {
        self.numbering
            .get(num_id)
            .and_then(|levels| levels.get(depth as usize))
            .cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    pub name: String,
    pub blocks: Vec<Block>,
    pub styles: MemoryStyles,
    pub media: HashMap<String, ImageData>,
    pub relationships: HashMap<String, String>,
    pub theme: HashMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl MemoryDocument {
    pub fn new(name: &str, blocks: Vec<Block>) -> Self {
        Self {
            name: name.to_string(),
            blocks,
            ..Default::default()
        }
    }

    pub fn with_styles(mut self, styles: MemoryStyles) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_media(mut self, rel_id: &str, target: &str, bytes: Vec<u8>) -> Self {
        let extension = target
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string());
        self.relationships
            .insert(rel_id.to_string(), target.to_string());
        self.media
            .insert(rel_id.to_string(), ImageData { bytes, extension });
        self
    }

    pub fn with_relationship(mut self, rel_id: &str, target: &str) -> Self {
        self.relationships
            .insert(rel_id.to_string(), target.to_string());
        self
    }

    pub fn with_theme_color(mut self, name: &str, hex: &str) -> Self {
        self.theme.insert(name.to_string(), hex.to_ascii_uppercase());
        self
    }
}

impl DocumentSource for MemoryDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn styles(&self) -> &dyn StyleRepository {
        &self.styles
    }

    fn embedded_image(&self, rel_id: &str) -> Option<ImageData> {
        self.media.get(rel_id).cloned()
    }

    fn relationship_target(&self, rel_id: &str) -> Option<&str> {
        self.relationships.get(rel_id).map(String::as_str)
    }

    fn theme_color(&self, name: &str) -> Option<&str> {
        self.theme.get(name).map(String::as_str)
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Paragraph;

    #[test]
    fn ordered_formats_exclude_bullets() {
        assert!(NumberFormat::from_ooxml("decimal").is_ordered());
        assert!(NumberFormat::from_ooxml("lowerRoman").is_ordered());
        assert!(NumberFormat::from_ooxml("upperLetter").is_ordered());
        assert!(!NumberFormat::from_ooxml("bullet").is_ordered());
        assert!(!NumberFormat::from_ooxml("none").is_ordered());
    }

    #[test]
    fn numbering_lookup_by_depth() {
        let styles = MemoryStyles::new()
            .with_numbering("7", vec![NumberFormat::Decimal, NumberFormat::Bullet]);
        assert_eq!(styles.numbering_format("7", 1), Some(NumberFormat::Bullet));
        assert_eq!(styles.numbering_format("7", 4), None);
        assert_eq!(styles.numbering_format("8", 0), None);
    }

    #[test]
    fn cell_text_joins_paragraphs() {
        let cell = RawCell {
            blocks: vec![
                Block::Paragraph(Paragraph::new(None, "first")),
                Block::Paragraph(Paragraph::new(None, "second")),
            ],
            ..Default::default()
        };
        assert_eq!(cell.text(), "first\nsecond");
        assert_eq!(cell.runs().len(), 2);
    }

    #[test]
    fn media_extension_comes_from_target() {
        let doc = MemoryDocument::new("a.docx", vec![]).with_media("rId5", "media/Pic.PNG", vec![1, 2]);
        let image = doc.embedded_image("rId5").unwrap();
        assert_eq!(image.extension, "png");
        assert_eq!(doc.relationship_target("rId5"), Some("media/Pic.PNG"));
    }
}
