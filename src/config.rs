// src/config.rs
use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings threaded through the classifier, assembler and synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Style name to heading level; applied last. Level 0 removes the style.
    pub style_overrides: BTreeMap<String, u8>,
    /// Accept `heading N` / `titre N` style names nobody else classified.
    pub generic_heading_pattern: bool,
    pub structural_analysis: StructuralAnalysisConfig,
    pub colors: ColorRules,
    /// Paragraph fills rendered as shaded boxes.
    pub shaded_box_fills: Vec<String>,
    /// `{n}` counter, `{ext}` extension, `{stem}` document stem.
    pub image_name_pattern: String,
    pub image_dir: String,
    /// Pull images out of text paragraphs into their own centered paragraph.
    pub separate_image_paragraphs: bool,
    pub topic_extension: String,
    /// Slack in twips when inferring a colspan from cell widths.
    pub width_tolerance: u32,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            style_overrides: BTreeMap::new(),
            generic_heading_pattern: true,
            structural_analysis: StructuralAnalysisConfig::default(),
            colors: ColorRules::default(),
            shaded_box_fills: vec!["D9D9D9".to_string(), "F2F2F2".to_string()],
            image_name_pattern: "image{n}.{ext}".to_string(),
            image_dir: "images".to_string(),
            separate_image_paragraphs: false,
            topic_extension: "dita".to_string(),
            width_tolerance: 30,
        }
    }
}

impl ConverterConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConversionError::malformed("configuration", e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralAnalysisConfig {
    pub enabled: bool,
    /// Minimum average number of body paragraphs following a candidate style.
    pub threshold: f64,
    /// Blocks inspected after each occurrence.
    pub lookahead: usize,
    /// Averages at or above these map to levels 1, 2 and 3; anything lower is 4.
    pub level_buckets: [f64; 3],
}

impl Default for StructuralAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 3.0,
            lookahead: 20,
            level_buckets: [15.0, 8.0, 4.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsvRule {
    pub class: String,
    /// Hue centre in degrees.
    pub hue: f64,
    pub hue_tolerance: f64,
    pub min_saturation: f64,
    pub min_value: f64,
}

/// Colour to output-class classification tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorRules {
    /// Uppercase RGB hex to class.
    pub exact: BTreeMap<String, String>,
    /// Theme slot name to class.
    pub theme: BTreeMap<String, String>,
    pub tolerance: Vec<HsvRule>,
}

impl Default for ColorRules {
    fn default() -> Self {
        let exact = [
            ("FF0000", "red"),
            ("C00000", "red"),
            ("0000FF", "blue"),
            ("0070C0", "blue"),
            ("00B050", "green"),
            ("008000", "green"),
            ("FFC000", "orange"),
            ("7030A0", "purple"),
        ]
        .into_iter()
        .map(|(hex, class)| (hex.to_string(), class.to_string()))
        .collect();

        let rule = |class: &str, hue: f64, hue_tolerance: f64| HsvRule {
            class: class.to_string(),
            hue,
            hue_tolerance,
            min_saturation: 0.45,
            min_value: 0.35,
        };

        Self {
            exact,
            theme: BTreeMap::new(),
            tolerance: vec![
                rule("red", 0.0, 15.0),
                rule("orange", 32.0, 15.0),
                rule("green", 120.0, 40.0),
                rule("blue", 215.0, 35.0),
                rule("purple", 275.0, 25.0),
            ],
        }
    }
}
