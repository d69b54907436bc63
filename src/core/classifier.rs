// src/core/classifier.rs
use crate::config::ConverterConfig;
use crate::error::{ConversionError, Result};
use crate::model::Block;
use crate::source::StyleRepository;
use crate::utils::text::is_toc_style;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const MAX_LEVEL: u8 = 9;

/// How a strategy's results merge into the map built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// Only adds styles that have no level yet.
    FillOnly,
    /// Replaces whatever is there.
    Override,
}

/// One named way of deriving a heading level from a style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    OutlineLevel,
    Inheritance,
    BuiltinName,
    OrderedNumbering,
    StructuralPattern,
    GenericNamePattern,
    LegacyMap,
    UserOverrides,
}

impl Strategy {
    pub fn precedence(self) -> Precedence {
        match self {
            Strategy::OutlineLevel
            | Strategy::Inheritance
            | Strategy::BuiltinName
            | Strategy::OrderedNumbering
            | Strategy::UserOverrides => Precedence::Override,
            Strategy::StructuralPattern | Strategy::GenericNamePattern | Strategy::LegacyMap => {
                Precedence::FillOnly
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::OutlineLevel => "outline-level",
            Strategy::Inheritance => "inheritance",
            Strategy::BuiltinName => "builtin-name",
            Strategy::OrderedNumbering => "ordered-numbering",
            Strategy::StructuralPattern => "structural-pattern",
            Strategy::GenericNamePattern => "generic-name",
            Strategy::LegacyMap => "legacy-map",
            Strategy::UserOverrides => "user-override",
        }
    }

    /// Derived-level strategies leave styles with their own outline level alone.
    fn yields_to_explicit_outline(self) -> bool {
        matches!(
            self,
            Strategy::Inheritance | Strategy::BuiltinName | Strategy::OrderedNumbering
        )
    }
}

pub const DEFAULT_STRATEGIES: [Strategy; 8] = [
    Strategy::OutlineLevel,
    Strategy::Inheritance,
    Strategy::BuiltinName,
    Strategy::OrderedNumbering,
    Strategy::StructuralPattern,
    Strategy::GenericNamePattern,
    Strategy::LegacyMap,
    Strategy::UserOverrides,
];

/// Immutable style name to heading level mapping for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleLevelMap {
    levels: BTreeMap<String, (u8, Strategy)>,
}

impl StyleLevelMap {
    pub fn resolve(&self, style: &str) -> Option<u8> {
        self.levels.get(style).map(|(level, _)| *level)
    }

    /// Which strategy produced the level of `style`.
    pub fn source_of(&self, style: &str) -> Option<Strategy> {
        self.levels.get(style).map(|(_, strategy)| *strategy)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn merge(&mut self, style: &str, level: u8, strategy: Strategy) {
        match strategy.precedence() {
            Precedence::Override => {
                self.levels.insert(style.to_string(), (level, strategy));
            }
            Precedence::FillOnly => {
                self.levels
                    .entry(style.to_string())
                    .or_insert((level, strategy));
            }
        }
    }
}

static BUILTIN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*heading\s*([1-9])\s*$").unwrap());

static GENERIC_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:heading|titre)\D*?(\d+)").unwrap());

/// Localised and historical heading style names.
const LEGACY_LEVELS: &[(&str, u8)] = &[
    ("Title", 1),
    ("Subtitle", 2),
    ("Titre", 1),
    ("Sous-titre", 2),
    ("Chapter", 1),
    ("Chapitre", 1),
    ("Überschrift 1", 1),
    ("Überschrift 2", 2),
    ("Überschrift 3", 3),
    ("Kop 1", 1),
    ("Kop 2", 2),
    ("Kop 3", 3),
    ("Titolo 1", 1),
    ("Titolo 2", 2),
    ("Titolo 3", 3),
    ("Título 1", 1),
    ("Título 2", 2),
    ("Título 3", 3),
    ("Rubrik 1", 1),
    ("Rubrik 2", 2),
    ("Rubrik 3", 3),
];

/// Resolves paragraph styles to heading levels through an ordered strategy list.
pub struct StyleClassifier<'a> {
    config: &'a ConverterConfig,
    strategies: Vec<Strategy>,
}

impl<'a> StyleClassifier<'a> {
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self::with_strategies(config, DEFAULT_STRATEGIES.to_vec())
    }

    pub fn with_strategies(config: &'a ConverterConfig, strategies: Vec<Strategy>) -> Self {
        Self { config, strategies }
    }

    /// Builds the level map for one document.
    pub fn classify(&self, styles: &dyn StyleRepository, blocks: &[Block]) -> StyleLevelMap {
        let candidates = candidate_styles(styles, blocks);
        let mut map = StyleLevelMap::default();

        for &strategy in &self.strategies {
            match strategy {
                Strategy::StructuralPattern => {
                    if !self.config.structural_analysis.enabled {
                        continue;
                    }
                    for (style, level) in self.structural_levels(blocks) {
                        debug!("style {:?} -> level {} ({})", style, level, strategy.name());
                        map.merge(&style, level, strategy);
                    }
                }
                Strategy::UserOverrides => {
                    for (style, &level) in &self.config.style_overrides {
                        if level == 0 {
                            map.levels.remove(style);
                            continue;
                        }
                        match checked_level(style, level as u32) {
                            Ok(level) => map.merge(style, level, strategy),
                            Err(e) => debug!("ignoring override: {}", e),
                        }
                    }
                }
                _ => {
                    for style in &candidates {
                        if strategy.yields_to_explicit_outline()
                            && styles.style(style).and_then(|s| s.outline_level).is_some()
                        {
                            continue;
                        }
                        match self.evaluate(strategy, style, styles) {
                            Ok(Some(level)) => {
                                debug!("style {:?} -> level {} ({})", style, level, strategy.name());
                                map.merge(style, level, strategy);
                            }
                            Ok(None) => {}
                            Err(e) => debug!("{} skipped: {}", strategy.name(), e),
                        }
                    }
                    if strategy.yields_to_explicit_outline()
                        && self.strategies.contains(&Strategy::Inheritance)
                    {
                        inherit_resolved_levels(&mut map, &candidates, styles);
                    }
                }
            }
        }

        map
    }

    fn evaluate(
        &self,
        strategy: Strategy,
        style: &str,
        styles: &dyn StyleRepository,
    ) -> Result<Option<u8>> {
        match strategy {
            Strategy::OutlineLevel => match styles.style(style).and_then(|s| s.outline_level) {
                Some(level) => checked_level(style, level as u32).map(Some),
                None => Ok(None),
            },
            Strategy::Inheritance => inherited_outline_level(style, styles),
            Strategy::BuiltinName => match BUILTIN_HEADING.captures(style) {
                Some(caps) => parse_level(style, &caps[1]).map(Some),
                None => Ok(None),
            },
            Strategy::OrderedNumbering => {
                let Some(numbering) = styles.style(style).and_then(|s| s.numbering.as_ref()) else {
                    return Ok(None);
                };
                match styles.numbering_format(&numbering.num_id, numbering.depth) {
                    Some(format) if format.is_ordered() => {
                        checked_level(style, numbering.depth as u32 + 1).map(Some)
                    }
                    _ => Ok(None),
                }
            }
            Strategy::GenericNamePattern => {
                if !self.config.generic_heading_pattern {
                    return Ok(None);
                }
                match GENERIC_HEADING.captures(style) {
                    Some(caps) => parse_level(style, &caps[1]).map(Some),
                    None => Ok(None),
                }
            }
            Strategy::LegacyMap => Ok(LEGACY_LEVELS
                .iter()
                .find(|(name, _)| name.to_lowercase() == style.trim().to_lowercase())
                .map(|(_, level)| *level)),
            Strategy::StructuralPattern | Strategy::UserOverrides => Ok(None),
        }
    }

    /// Styles whose occurrences are regularly followed by runs of body paragraphs.
    fn structural_levels(&self, blocks: &[Block]) -> BTreeMap<String, u8> {
        let cfg = &self.config.structural_analysis;
        let mut occurrences: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (i, block) in blocks.iter().enumerate() {
            let Block::Paragraph(p) = block else { continue };
            let Some(style) = p.style.as_deref() else { continue };
            if p.has_text() && !p.list_marker && !is_toc_style(style) {
                occurrences.entry(style).or_default().push(i);
            }
        }

        let mut result = BTreeMap::new();
        for (style, positions) in occurrences {
            let followers: usize = positions
                .iter()
                .map(|&i| followers_until_repeat(blocks, i, style, cfg.lookahead))
                .sum();
            let avg = followers as f64 / positions.len() as f64;
            let qualifies =
                avg >= cfg.threshold && (positions.len() >= 2 || avg >= 2.0 * cfg.threshold);
            if !qualifies {
                continue;
            }
            let level = keyword_level(style).unwrap_or_else(|| {
                let [first, second, third] = cfg.level_buckets;
                if avg >= first {
                    1
                } else if avg >= second {
                    2
                } else if avg >= third {
                    3
                } else {
                    4
                }
            });
            debug!(
                "structural candidate {:?}: {} occurrences, {:.1} followers on average",
                style,
                positions.len(),
                avg
            );
            result.insert(style.to_string(), level);
        }
        result
    }
}

fn candidate_styles(styles: &dyn StyleRepository, blocks: &[Block]) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = styles.style_names().into_iter().collect();
    names.extend(
        blocks
            .iter()
            .filter_map(Block::as_paragraph)
            .filter_map(|p| p.style.clone()),
    );
    names
}

/// Level of the first ancestor with an explicit outline level.
fn inherited_outline_level(style: &str, styles: &dyn StyleRepository) -> Result<Option<u8>> {
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(style);
    let mut current = styles.style(style).and_then(|s| s.based_on.as_deref());

    while let Some(name) = current {
        if !visited.insert(name) {
            return Err(ConversionError::malformed(
                format!("style {:?}", style),
                format!("based-on cycle through {:?}", name),
            ));
        }
        let Some(definition) = styles.style(name) else {
            return Ok(None);
        };
        if let Some(level) = definition.outline_level {
            return checked_level(style, level as u32).map(Some);
        }
        current = definition.based_on.as_deref();
    }
    Ok(None)
}

/// Gives unresolved styles the level of their nearest resolved ancestor.
fn inherit_resolved_levels(
    map: &mut StyleLevelMap,
    candidates: &BTreeSet<String>,
    styles: &dyn StyleRepository,
) {
    for style in candidates {
        if map.levels.contains_key(style.as_str())
            || styles.style(style).and_then(|s| s.outline_level).is_some()
        {
            continue;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(style.as_str());
        let mut current = styles.style(style).and_then(|s| s.based_on.as_deref());
        while let Some(name) = current {
            if !visited.insert(name) {
                break;
            }
            if let Some(level) = map.resolve(name) {
                debug!("style {:?} -> level {} (inherited from {:?})", style, level, name);
                map.levels.insert(style.clone(), (level, Strategy::Inheritance));
                break;
            }
            current = styles.style(name).and_then(|s| s.based_on.as_deref());
        }
    }
}

/// Non-empty paragraphs after `start` before `style` shows up again.
fn followers_until_repeat(blocks: &[Block], start: usize, style: &str, lookahead: usize) -> usize {
    blocks[start + 1..]
        .iter()
        .take(lookahead)
        .take_while(|b| match b {
            Block::Paragraph(p) => !(p.has_text() && p.style.as_deref() == Some(style)),
            Block::Table(_) => true,
        })
        .filter(|b| matches!(b, Block::Paragraph(p) if p.has_text()))
        .count()
}

fn keyword_level(style: &str) -> Option<u8> {
    let lower = style.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let any = |keys: &[&str]| words.iter().any(|w| keys.contains(w));

    if words.iter().any(|w| w.starts_with("sub")) || any(&["sous"]) {
        Some(3)
    } else if any(&["chapter", "chapitre", "part", "partie", "title", "titre"]) {
        Some(1)
    } else if any(&["section", "heading", "rubrique"]) {
        Some(2)
    } else {
        None
    }
}

fn parse_level(style: &str, digits: &str) -> Result<u8> {
    let value: u32 = digits
        .parse()
        .map_err(|_| ConversionError::malformed(format!("style {:?}", style), "level is not a number"))?;
    checked_level(style, value)
}

fn checked_level(style: &str, level: u32) -> Result<u8> {
    if (1..=MAX_LEVEL as u32).contains(&level) {
        Ok(level as u8)
    } else {
        Err(ConversionError::malformed(
            format!("style {:?}", style),
            format!("heading level {} outside 1..={}", level, MAX_LEVEL),
        ))
    }
}
