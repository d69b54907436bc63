// src/utils/text.rs
use crate::model::Paragraph;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Private-use-area glyphs (Wingdings checkboxes and ticks) and their portable equivalents.
const GLYPHS: &[(char, char)] = &[
    ('\u{F06F}', '\u{2610}'),
    ('\u{F0A8}', '\u{2610}'),
    ('\u{F0FE}', '\u{2611}'),
    ('\u{F078}', '\u{2612}'),
    ('\u{F0FD}', '\u{2612}'),
    ('\u{F0FC}', '\u{2714}'),
    ('\u{F0FB}', '\u{2718}'),
];

pub fn map_glyphs(text: &str) -> String {
    text.chars()
        .map(|c| {
            GLYPHS
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect()
}

static ORDINAL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+(?:\.\d+)+[.)]?|\d{1,3}[.)]?|[IVXLCDM]+[.)]|[A-Za-z][.)])\s+").unwrap()
});

/// Strips a leading `1.`, `2.3.1`, `IV.`, `b)` style numbering token. Bare numbers
/// longer than three digits are kept as text.
pub fn strip_ordinal(text: &str) -> String {
    let trimmed = text.trim();
    ORDINAL_PREFIX.replace(trimmed, "").trim().to_string()
}

const TOC_STYLE_WORDS: &[&str] = &["toc", "tdm"];
const TOC_STYLE_PHRASES: &[&str] = &["table of contents", "contents", "sommaire"];
const TOC_TITLE_KEYWORDS: &[&str] = &[
    "table of contents",
    "contents",
    "sommaire",
    "table des matières",
    "table des matieres",
    "inhaltsverzeichnis",
];

/// Style names such as `TOC 1`, `toc 2`, `TOC Heading`.
pub fn is_toc_style(style: &str) -> bool {
    let lower = style.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| TOC_STYLE_WORDS.contains(&word))
        || TOC_STYLE_PHRASES.iter().any(|k| lower.contains(k))
}

pub fn is_toc_title(text: &str) -> bool {
    let lower = strip_ordinal(text).to_lowercase();
    TOC_TITLE_KEYWORDS.iter().any(|k| lower == *k)
}

pub fn is_toc_paragraph(paragraph: &Paragraph) -> bool {
    is_toc_style(paragraph.style_name())
}

/// A paragraph is kept as content only when it carries something visible.
pub fn has_content(paragraph: &Paragraph) -> bool {
    paragraph.has_text() || paragraph.list_marker || paragraph.has_image() || paragraph.nested_text
}

/// Produces unique, XML-safe topic identifiers from titles.
#[derive(Debug, Default)]
pub struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, title: &str) -> String {
        let base = slugify(title);
        let mut candidate = base.clone();
        let mut n = 1;
        while self.used.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        return "topic".to_string();
    }
    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        slug.insert_str(0, "t_");
    }
    slug
}

/// File name without directories and without its last extension.
pub fn file_stem(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base.to_string(),
    }
}
