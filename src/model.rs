// src/model.rs
use serde::{Deserialize, Serialize};

/// One top-level unit of the source document, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Paragraph(Paragraph),
    Table(TableBlock),
}

impl Block {
    pub fn as_paragraph(&self) -> Option<&Paragraph> {
        match self {
            Block::Paragraph(p) => Some(p),
            Block::Table(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    #[default]
    Start,
    Center,
    End,
    Justify,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    /// Display name of the paragraph style.
    pub style: Option<String>,
    pub runs: Vec<Run>,
    /// Carries a list marker (bullet or number) of its own.
    pub list_marker: bool,
    pub alignment: Alignment,
    /// Background fill as uppercase hex, without `#`.
    pub shading: Option<String>,
    /// Text found in non-standard containers (text boxes, content controls).
    pub nested_text: bool,
}

impl Paragraph {
    pub fn new(style: Option<&str>, text: &str) -> Self {
        Self {
            style: style.map(str::to_string),
            runs: if text.is_empty() {
                Vec::new()
            } else {
                vec![Run::text(text)]
            },
            ..Default::default()
        }
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn has_text(&self) -> bool {
        self.runs.iter().any(|r| !r.text.trim().is_empty())
    }

    pub fn has_image(&self) -> bool {
        self.runs.iter().any(|r| r.image.is_some())
    }

    pub fn style_name(&self) -> &str {
        self.style.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub superscript: bool,
}

/// Raw colour information carried by a run, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunColor {
    /// Explicit RGB hex; `auto` is stored as `None`.
    pub explicit: Option<String>,
    /// Theme colour name such as `accent1` or `text2`.
    pub theme: Option<String>,
    pub tint: Option<u8>,
    pub shade: Option<u8>,
    /// Named highlight (`yellow`, `darkRed`, ...).
    pub highlight: Option<String>,
    /// Run background fill hex.
    pub fill: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub rel_id: String,
    /// Linked rather than embedded in the package.
    pub external: bool,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub rel_id: Option<String>,
    pub anchor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    pub format: RunFormat,
    pub color: RunColor,
    pub image: Option<ImageRef>,
    pub hyperlink: Option<Hyperlink>,
}

impl Run {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn image(rel_id: &str) -> Self {
        Self {
            image: Some(ImageRef {
                rel_id: rel_id.to_string(),
                external: false,
                alt: None,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VMerge {
    Restart,
    Continue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCell {
    pub blocks: Vec<Block>,
    pub grid_span: Option<usize>,
    pub v_merge: Option<VMerge>,
    /// Declared cell width in twips.
    pub width: Option<u32>,
}

impl RawCell {
    pub fn with_text(text: &str) -> Self {
        Self {
            blocks: vec![Block::Paragraph(Paragraph::new(None, text))],
            ..Default::default()
        }
    }

    pub fn spanning(mut self, span: usize) -> Self {
        self.grid_span = Some(span);
        self
    }

    pub fn merged(mut self, state: VMerge) -> Self {
        self.v_merge = Some(state);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub cells: Vec<RawCell>,
    /// Grid columns omitted before the first cell.
    pub grid_before: usize,
    /// Grid columns omitted after the last cell.
    pub grid_after: usize,
    /// Explicitly flagged as a repeating header row.
    pub header: bool,
}

impl RawRow {
    pub fn new(cells: Vec<RawCell>) -> Self {
        Self {
            cells,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableBlock {
    /// Declared grid column widths in twips.
    pub grid_widths: Vec<u32>,
    pub rows: Vec<RawRow>,
}
