// src/core/docx.rs
//! `.docx` package reader producing the block model.
use crate::error::{ConversionError, Result};
use crate::model::{
    Alignment, Block, Hyperlink, ImageRef, Paragraph, RawCell, RawRow, Run, RunColor, RunFormat, TableBlock, VMerge,
};
use crate::source::{
    DocumentSource, ImageData, MemoryDocument, MemoryStyles, NumberFormat, StyleDefinition, StyleRepository,
};
use chrono::{DateTime, NaiveDate};
use log::{debug, info, warn};
use memmap2::Mmap;
use roxmltree::{Document, Node};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const MC_NS: &str = "http://schemas.openxmlformats.org/markup-compatibility/2006";
const V_NS: &str = "urn:schemas-microsoft-com:vml";

/// Packages above this size are memory-mapped instead of read into memory.
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Theme slots and the names runs use for them.
const THEME_ALIASES: &[(&str, &str)] = &[
    ("text1", "dk1"),
    ("background1", "lt1"),
    ("text2", "dk2"),
    ("background2", "lt2"),
];

/// A Word document loaded from its package.
#[derive(Debug)]
pub struct DocxSource {
    document: MemoryDocument,
}

#[derive(Debug, Clone)]
struct Relationship {
    target: String,
    external: bool,
    image: bool,
}

impl DocxSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.to_string_lossy().into_owned();
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        if size > MMAP_THRESHOLD {
            debug!("mapping {} ({} bytes)", name, size);
            // The package is treated as read-only for the lifetime of the map.
            let mmap = unsafe { Mmap::map(&file)? };
            Self::from_reader(&name, Cursor::new(&mmap[..]))
        } else {
            Self::from_reader(&name, Cursor::new(std::fs::read(path)?))
        }
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(name, Cursor::new(bytes))
    }

    fn from_reader<R: Read + Seek>(name: &str, reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        let document_xml = read_part(&mut archive, "word/document.xml")?
            .ok_or_else(|| ConversionError::FatalEnvironment(format!("{}: word/document.xml missing", name)))?;

        let (ids, mut styles) =
            optional_part(&mut archive, name, "word/styles.xml", parse_styles).unwrap_or_default();
        if let Some(numbering) = optional_part(&mut archive, name, "word/numbering.xml", parse_numbering) {
            for (num_id, formats) in numbering {
                styles.insert_numbering(&num_id, formats);
            }
        }
        let relationships =
            optional_part(&mut archive, name, "word/_rels/document.xml.rels", parse_relationships)
                .unwrap_or_default();
        let theme = optional_part(&mut archive, name, "word/theme/theme1.xml", parse_theme).unwrap_or_default();

        let mut metadata =
            optional_part(&mut archive, name, "docProps/core.xml", parse_core_properties).unwrap_or_default();
        if let Some(custom) = optional_part(&mut archive, name, "docProps/custom.xml", parse_custom_properties) {
            metadata.extend(custom);
        }

        let mut media = HashMap::new();
        for (id, rel) in relationships.iter().filter(|(_, r)| r.image && !r.external) {
            let path = part_path(&rel.target);
            match read_binary(&mut archive, &path) {
                Ok(Some(bytes)) => {
                    let extension = rel
                        .target
                        .rsplit_once('.')
                        .map(|(_, ext)| ext.to_ascii_lowercase())
                        .unwrap_or_else(|| "bin".to_string());
                    media.insert(id.clone(), ImageData { bytes, extension });
                }
                Ok(None) => warn!("{}: media {} referenced by {} is missing", name, path, id),
                Err(e) => warn!("{}: media {} skipped: {}", name, path, e),
            }
        }

        let external: HashSet<String> = relationships
            .iter()
            .filter(|(_, r)| r.external)
            .map(|(id, _)| id.clone())
            .collect();
        let blocks = {
            let doc = Document::parse(&document_xml)?;
            let reader = BodyReader {
                style_ids: &ids,
                styles: &styles,
                external: &external,
            };
            reader.body(doc.root_element())
        };

        info!(
            "{}: {} block(s), {} style(s), {} media part(s)",
            name,
            blocks.len(),
            ids.len(),
            media.len()
        );

        let mut document = MemoryDocument::new(name, blocks).with_styles(styles);
        document.media = media;
        document.relationships = relationships.into_iter().map(|(id, r)| (id, r.target)).collect();
        document.theme = theme;
        document.metadata = metadata;
        Ok(Self { document })
    }

    pub fn document(&self) -> &MemoryDocument {
        &self.document
    }

    pub fn into_document(self) -> MemoryDocument {
        self.document
    }
}

impl DocumentSource for DocxSource {
    fn name(&self) -> &str {
        self.document.name()
    }

    fn blocks(&self) -> &[Block] {
        self.document.blocks()
    }

    fn styles(&self) -> &dyn StyleRepository {
        self.document.styles()
    }

    fn embedded_image(&self, rel_id: &str) -> Option<ImageData> {
        self.document.embedded_image(rel_id)
    }

    fn relationship_target(&self, rel_id: &str) -> Option<&str> {
        self.document.relationship_target(rel_id)
    }

    fn theme_color(&self, name: &str) -> Option<&str> {
        self.document.theme_color(name)
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        self.document.metadata()
    }
}

/// Logs and drops the error of an optional part.
fn optional<T>(name: &str, part: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: {} skipped: {}", name, part, e);
            None
        }
    }
}

/// Reads and parses a part the conversion can do without.
fn optional_part<R, T>(
    archive: &mut ZipArchive<R>,
    name: &str,
    part: &str,
    parse: impl FnOnce(&str) -> Result<T>,
) -> Option<T>
where
    R: Read + Seek,
{
    let xml = optional(name, part, read_part(archive, part)).flatten()?;
    optional(name, part, parse(&xml))
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, part: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(part) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

fn read_binary<R: Read + Seek>(archive: &mut ZipArchive<R>, part: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(part) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::with_capacity((file.size() as usize).min(MMAP_THRESHOLD as usize));
    file.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

/// Package path of a relationship target relative to `word/`.
fn part_path(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = vec!["word"];
    for segment in target.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn w_child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name((W_NS, name)))
}

fn w_val<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute((W_NS, "val"))
}

/// `<w:b/>`, `<w:b w:val="1"/>` are on; `0`, `false`, `off` are off.
fn on_off(node: Option<Node<'_, '_>>) -> bool {
    node.map_or(false, |n| !matches!(w_val(n), Some("0" | "false" | "off")))
}

fn hex_value(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.eq_ignore_ascii_case("auto"))
        .map(str::to_ascii_uppercase)
}

/// Style id to display name, and the definitions keyed by display name.
fn parse_styles(xml: &str) -> Result<(HashMap<String, String>, MemoryStyles)> {
    let doc = Document::parse(xml)?;
    let style_nodes: Vec<Node> = doc
        .root_element()
        .children()
        .filter(|n| n.has_tag_name((W_NS, "style")))
        .collect();

    let mut ids = HashMap::new();
    for node in &style_nodes {
        if let Some(id) = node.attribute((W_NS, "styleId")) {
            let name = w_child(*node, "name").and_then(w_val).unwrap_or(id);
            ids.insert(id.to_string(), name.to_string());
        }
    }

    let mut styles = MemoryStyles::new();
    for node in style_nodes {
        if !matches!(node.attribute((W_NS, "type")), None | Some("paragraph")) {
            continue;
        }
        let Some(id) = node.attribute((W_NS, "styleId")) else { continue };
        let mut style = StyleDefinition::new(&ids[id]);
        style.based_on = w_child(node, "basedOn")
            .and_then(w_val)
            .map(|parent| ids.get(parent).cloned().unwrap_or_else(|| parent.to_string()));

        if let Some(ppr) = w_child(node, "pPr") {
            // Level 9 is "body text".
            style.outline_level = w_child(ppr, "outlineLvl")
                .and_then(w_val)
                .and_then(|v| v.parse::<u8>().ok())
                .filter(|&lvl| lvl < 9)
                .map(|lvl| lvl + 1);
            if let Some(num_pr) = w_child(ppr, "numPr") {
                let num_id = w_child(num_pr, "numId").and_then(w_val);
                let depth = w_child(num_pr, "ilvl")
                    .and_then(w_val)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                if let Some(num_id) = num_id.filter(|id| *id != "0") {
                    style = style.numbered(num_id, depth);
                }
            }
        }
        styles.insert(style);
    }
    Ok((ids, styles))
}

/// `num` id to the formats of its abstract definition, indexed by depth.
fn parse_numbering(xml: &str) -> Result<Vec<(String, Vec<NumberFormat>)>> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    let mut abstracts: HashMap<&str, Vec<NumberFormat>> = HashMap::new();
    for node in root.children().filter(|n| n.has_tag_name((W_NS, "abstractNum"))) {
        let Some(id) = node.attribute((W_NS, "abstractNumId")) else { continue };
        let mut levels: Vec<NumberFormat> = Vec::new();
        for lvl in node.children().filter(|n| n.has_tag_name((W_NS, "lvl"))) {
            let Some(depth) = lvl
                .attribute((W_NS, "ilvl"))
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&d| d < 9)
            else {
                continue;
            };
            let format = w_child(lvl, "numFmt").and_then(w_val).unwrap_or("decimal");
            if levels.len() <= depth {
                levels.resize(depth + 1, NumberFormat::Other(String::new()));
            }
            levels[depth] = NumberFormat::from_ooxml(format);
        }
        abstracts.insert(id, levels);
    }

    Ok(root
        .children()
        .filter(|n| n.has_tag_name((W_NS, "num")))
        .filter_map(|num| {
            let num_id = num.attribute((W_NS, "numId"))?;
            let abstract_id = w_child(num, "abstractNumId").and_then(w_val)?;
            let formats = abstracts.get(abstract_id)?.clone();
            Some((num_id.to_string(), formats))
        })
        .collect())
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, Relationship>> {
    let doc = Document::parse(xml)?;
    Ok(doc
        .root_element()
        .children()
        .filter(|n| n.tag_name().name() == "Relationship")
        .filter_map(|rel| {
            let id = rel.attribute("Id")?;
            let target = rel.attribute("Target")?;
            let kind = rel.attribute("Type").unwrap_or("");
            Some((
                id.to_string(),
                Relationship {
                    target: target.to_string(),
                    external: rel.attribute("TargetMode") == Some("External"),
                    image: kind.ends_with("/image"),
                },
            ))
        })
        .collect())
}

fn parse_theme(xml: &str) -> Result<HashMap<String, String>> {
    let doc = Document::parse(xml)?;
    let mut colors = HashMap::new();
    let Some(scheme) = doc.descendants().find(|n| n.has_tag_name((A_NS, "clrScheme"))) else {
        return Ok(colors);
    };
    for slot in scheme.children().filter(Node::is_element) {
        let value = slot.children().find_map(|c| {
            if c.has_tag_name((A_NS, "srgbClr")) {
                c.attribute("val")
            } else if c.has_tag_name((A_NS, "sysClr")) {
                c.attribute("lastClr")
            } else {
                None
            }
        });
        if let Some(hex) = value {
            colors.insert(slot.tag_name().name().to_string(), hex.to_ascii_uppercase());
        }
    }
    for (alias, slot) in THEME_ALIASES {
        if let Some(hex) = colors.get(*slot).cloned() {
            colors.insert(alias.to_string(), hex);
        }
    }
    Ok(colors)
}

fn parse_core_properties(xml: &str) -> Result<BTreeMap<String, String>> {
    let doc = Document::parse(xml)?;
    let mut props = BTreeMap::new();
    for node in doc.root_element().children().filter(Node::is_element) {
        let Some(value) = node.text().map(str::trim).filter(|v| !v.is_empty()) else { continue };
        let key = match node.tag_name().name() {
            "title" => "title",
            "creator" => "creator",
            "subject" => "subject",
            "keywords" => "keywords",
            "description" => "description",
            "lastModifiedBy" => "last_modified_by",
            "revision" => "revision",
            "modified" => {
                match iso_date(value) {
                    Some(date) => {
                        props.insert("revision_date".to_string(), date);
                    }
                    None => debug!("unparseable modification date {:?}", value),
                }
                continue;
            }
            "created" => {
                if let Some(date) = iso_date(value) {
                    props.insert("created_date".to_string(), date);
                }
                continue;
            }
            _ => continue,
        };
        props.insert(key.to_string(), value.to_string());
    }
    Ok(props)
}

/// `YYYY-MM-DD` from a W3CDTF timestamp.
fn iso_date(value: &str) -> Option<String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.format("%Y-%m-%d").to_string());
    }
    let day = value.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_custom_properties(xml: &str) -> Result<BTreeMap<String, String>> {
    let doc = Document::parse(xml)?;
    Ok(doc
        .root_element()
        .children()
        .filter(|n| n.tag_name().name() == "property")
        .filter_map(|prop| {
            let name = prop.attribute("name")?;
            let value = prop.children().find(Node::is_element)?.text().unwrap_or("");
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect())
}

/// Accumulates text of one run and splits it around images.
struct RunBuilder {
    format: RunFormat,
    color: RunColor,
    link: Option<Hyperlink>,
    text: String,
    runs: Vec<Run>,
}

impl RunBuilder {
    fn flush(&mut self) {
        if self.text.is_empty() {
            return;
        }
        self.runs.push(Run {
            text: std::mem::take(&mut self.text),
            format: self.format,
            color: self.color.clone(),
            image: None,
            hyperlink: self.link.clone(),
        });
    }

    fn image(&mut self, image: ImageRef) {
        self.flush();
        self.runs.push(Run {
            image: Some(image),
            hyperlink: self.link.clone(),
            ..Default::default()
        });
    }

    fn finish(mut self) -> Vec<Run> {
        self.flush();
        self.runs
    }
}

struct BodyReader<'p> {
    style_ids: &'p HashMap<String, String>,
    styles: &'p MemoryStyles,
    external: &'p HashSet<String>,
}

impl BodyReader<'_> {
    fn body(&self, root: Node<'_, '_>) -> Vec<Block> {
        let mut blocks = Vec::new();
        if let Some(body) = w_child(root, "body") {
            self.blocks_into(body, &mut blocks);
        }
        blocks
    }

    /// Block-level children; content controls are flattened.
    fn blocks_into(&self, parent: Node<'_, '_>, out: &mut Vec<Block>) {
        for child in parent.children().filter(|n| n.tag_name().namespace() == Some(W_NS)) {
            match child.tag_name().name() {
                "p" => out.push(Block::Paragraph(self.paragraph(child))),
                "tbl" => out.push(Block::Table(self.table(child))),
                "sdt" => {
                    if let Some(content) = w_child(child, "sdtContent") {
                        self.blocks_into(content, out);
                    }
                }
                "customXml" | "ins" => self.blocks_into(child, out),
                _ => {}
            }
        }
    }

    fn style_name(&self, id: &str) -> String {
        self.style_ids.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn paragraph(&self, node: Node<'_, '_>) -> Paragraph {
        let mut para = Paragraph::default();

        if let Some(ppr) = w_child(node, "pPr") {
            para.style = w_child(ppr, "pStyle").and_then(w_val).map(|id| self.style_name(id));
            para.alignment = match w_child(ppr, "jc").and_then(w_val) {
                Some("center") => Alignment::Center,
                Some("both" | "distribute" | "justify") => Alignment::Justify,
                Some("right" | "end") => Alignment::End,
                _ => Alignment::Start,
            };
            para.shading = hex_value(w_child(ppr, "shd").and_then(|s| s.attribute((W_NS, "fill"))));
            if let Some(num_pr) = w_child(ppr, "numPr") {
                let num_id = w_child(num_pr, "numId").and_then(w_val);
                para.list_marker = num_id.map_or(false, |id| id != "0");
            }
        }
        if !para.list_marker {
            para.list_marker = para.style.as_deref().map_or(false, |s| self.bulleted_style(s));
        }

        self.inline_into(node, None, &mut para);
        para
    }

    /// Bullet styles such as `List Bullet` carry their marker in the style.
    fn bulleted_style(&self, style: &str) -> bool {
        self.styles
            .style(style)
            .and_then(|s| s.numbering.as_ref())
            .and_then(|n| self.styles.numbering_format(&n.num_id, n.depth))
            .map_or(false, |f| f == NumberFormat::Bullet)
    }

    fn inline_into(&self, parent: Node<'_, '_>, link: Option<&Hyperlink>, para: &mut Paragraph) {
        for child in parent.children().filter(|n| n.tag_name().namespace() == Some(W_NS)) {
            match child.tag_name().name() {
                "r" => self.run(child, link, para),
                "hyperlink" => {
                    let own = Hyperlink {
                        rel_id: child.attribute((R_NS, "id")).map(str::to_string),
                        anchor: child.attribute((W_NS, "anchor")).map(str::to_string),
                    };
                    let own = (own.rel_id.is_some() || own.anchor.is_some()).then_some(own);
                    self.inline_into(child, own.as_ref().or(link), para);
                }
                "ins" | "smartTag" | "customXml" | "fldSimple" | "dir" | "bdo" => self.inline_into(child, link, para),
                "sdt" => {
                    if let Some(content) = w_child(child, "sdtContent") {
                        self.inline_into(content, link, para);
                    }
                }
                _ => {}
            }
        }
    }

    fn run(&self, node: Node<'_, '_>, link: Option<&Hyperlink>, para: &mut Paragraph) {
        let (format, color) = w_child(node, "rPr").map(run_properties).unwrap_or_default();
        let mut builder = RunBuilder {
            format,
            color,
            link: link.cloned(),
            text: String::new(),
            runs: Vec::new(),
        };
        for child in node.children().filter(Node::is_element) {
            self.run_content(child, &mut builder, para);
        }
        para.runs.extend(builder.finish());
    }

    fn run_content(&self, node: Node<'_, '_>, builder: &mut RunBuilder, para: &mut Paragraph) {
        let ns = node.tag_name().namespace();
        match (ns, node.tag_name().name()) {
            (Some(W_NS), "t") => builder.text.push_str(node.text().unwrap_or("")),
            (Some(W_NS), "tab") => builder.text.push('\t'),
            (Some(W_NS), "br" | "cr") => builder.text.push('\n'),
            (Some(W_NS), "noBreakHyphen") => builder.text.push('-'),
            (Some(W_NS), "sym") => {
                let glyph = node
                    .attribute((W_NS, "char"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .and_then(char::from_u32);
                if let Some(c) = glyph {
                    builder.text.push(c);
                }
            }
            (Some(W_NS), "drawing") => {
                let alt = node
                    .descendants()
                    .find(|n| n.has_tag_name((WP_NS, "docPr")))
                    .and_then(|d| d.attribute("descr"))
                    .filter(|d| !d.is_empty())
                    .map(str::to_string);
                for blip in node.descendants().filter(|n| n.has_tag_name((A_NS, "blip"))) {
                    let image = if let Some(id) = blip.attribute((R_NS, "embed")) {
                        ImageRef {
                            rel_id: id.to_string(),
                            external: self.external.contains(id),
                            alt: alt.clone(),
                        }
                    } else if let Some(id) = blip.attribute((R_NS, "link")) {
                        ImageRef {
                            rel_id: id.to_string(),
                            external: true,
                            alt: alt.clone(),
                        }
                    } else {
                        continue;
                    };
                    builder.image(image);
                }
                self.text_boxes(node, builder, para);
            }
            (Some(W_NS), "pict" | "object") => {
                for data in node.descendants().filter(|n| n.has_tag_name((V_NS, "imagedata"))) {
                    if let Some(id) = data.attribute((R_NS, "id")) {
                        builder.image(ImageRef {
                            rel_id: id.to_string(),
                            external: self.external.contains(id),
                            alt: data.attribute("title").map(str::to_string),
                        });
                    }
                }
                self.text_boxes(node, builder, para);
            }
            (Some(MC_NS), "AlternateContent") => {
                // Only one branch describes the object.
                let branch = node
                    .children()
                    .find(|n| n.has_tag_name((MC_NS, "Choice")))
                    .or_else(|| node.children().find(|n| n.has_tag_name((MC_NS, "Fallback"))));
                if let Some(branch) = branch {
                    for child in branch.children().filter(Node::is_element) {
                        self.run_content(child, builder, para);
                    }
                }
            }
            _ => {}
        }
    }

    fn text_boxes(&self, node: Node<'_, '_>, builder: &mut RunBuilder, para: &mut Paragraph) {
        for content in node.descendants().filter(|n| n.has_tag_name((W_NS, "txbxContent"))) {
            let lines: Vec<String> = content
                .descendants()
                .filter(|n| n.has_tag_name((W_NS, "p")))
                .map(|p| {
                    p.descendants()
                        .filter(|t| t.has_tag_name((W_NS, "t")))
                        .filter_map(|t| t.text())
                        .collect::<String>()
                })
                .filter(|line| !line.trim().is_empty())
                .collect();
            if lines.is_empty() {
                continue;
            }
            if !builder.text.is_empty() && !builder.text.ends_with(' ') {
                builder.text.push(' ');
            }
            builder.text.push_str(&lines.join(" "));
            para.nested_text = true;
        }
    }

    fn table(&self, node: Node<'_, '_>) -> TableBlock {
        let grid_widths = w_child(node, "tblGrid")
            .map(|grid| {
                grid.children()
                    .filter(|n| n.has_tag_name((W_NS, "gridCol")))
                    .map(|col| col.attribute((W_NS, "w")).and_then(|w| w.parse().ok()).unwrap_or(0))
                    .collect()
            })
            .unwrap_or_default();

        let mut rows = Vec::new();
        for tr in flattened(node, "tr") {
            let mut row = RawRow::default();
            if let Some(trpr) = w_child(tr, "trPr") {
                row.header = on_off(w_child(trpr, "tblHeader"));
                row.grid_before = w_child(trpr, "gridBefore")
                    .and_then(w_val)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                row.grid_after = w_child(trpr, "gridAfter")
                    .and_then(w_val)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
            }
            row.cells = flattened(tr, "tc").into_iter().map(|tc| self.cell(tc)).collect();
            rows.push(row);
        }
        TableBlock { grid_widths, rows }
    }

    fn cell(&self, node: Node<'_, '_>) -> RawCell {
        let mut cell = RawCell::default();
        if let Some(tcpr) = w_child(node, "tcPr") {
            cell.grid_span = w_child(tcpr, "gridSpan")
                .and_then(w_val)
                .and_then(|v| v.parse().ok())
                .filter(|&span: &usize| span > 0);
            cell.v_merge = w_child(tcpr, "vMerge").map(|m| match w_val(m) {
                Some("restart") => VMerge::Restart,
                _ => VMerge::Continue,
            });
            cell.width = w_child(tcpr, "tcW")
                .filter(|w| matches!(w.attribute((W_NS, "type")), None | Some("dxa")))
                .and_then(|w| w.attribute((W_NS, "w")))
                .and_then(|w| w.parse().ok());
        }
        self.blocks_into(node, &mut cell.blocks);
        cell
    }
}

/// Children named `name`, looking through content controls.
fn flattened<'a, 'i>(parent: Node<'a, 'i>, name: &str) -> Vec<Node<'a, 'i>> {
    let mut found = Vec::new();
    for child in parent.children() {
        if child.has_tag_name((W_NS, name)) {
            found.push(child);
        } else if child.has_tag_name((W_NS, "sdt")) {
            if let Some(content) = w_child(child, "sdtContent") {
                found.extend(flattened(content, name));
            }
        }
    }
    found
}

fn run_properties(rpr: Node<'_, '_>) -> (RunFormat, RunColor) {
    let format = RunFormat {
        bold: on_off(w_child(rpr, "b")),
        italic: on_off(w_child(rpr, "i")),
        underline: w_child(rpr, "u").map_or(false, |u| !matches!(w_val(u), Some("none"))),
        superscript: w_child(rpr, "vertAlign").and_then(w_val) == Some("superscript"),
    };

    let mut color = RunColor::default();
    if let Some(c) = w_child(rpr, "color") {
        color.explicit = hex_value(w_val(c));
        color.theme = c.attribute((W_NS, "themeColor")).map(str::to_string);
        color.tint = c
            .attribute((W_NS, "themeTint"))
            .and_then(|v| u8::from_str_radix(v, 16).ok());
        color.shade = c
            .attribute((W_NS, "themeShade"))
            .and_then(|v| u8::from_str_radix(v, 16).ok());
    }
    color.highlight = w_child(rpr, "highlight")
        .and_then(w_val)
        .filter(|v| *v != "none")
        .map(str::to_string);
    color.fill = hex_value(w_child(rpr, "shd").and_then(|s| s.attribute((W_NS, "fill"))));
    (format, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn package(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in parts {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn document(body: &str) -> String {
        format!(
            concat!(
                r#"<w:document xmlns:w="{}" xmlns:r="{}" xmlns:a="{}" xmlns:wp="{}" xmlns:mc="{}" xmlns:v="{}">"#,
                "<w:body>{}</w:body></w:document>"
            ),
            W_NS, R_NS, A_NS, WP_NS, MC_NS, V_NS, body
        )
    }

    fn load(parts: &[(&str, &str)]) -> MemoryDocument {
        DocxSource::from_bytes("test.docx", package(parts)).unwrap().into_document()
    }

    const STYLES: &str = r#"<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
        <w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style>
        <w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/>
            <w:pPr><w:outlineLvl w:val="0"/></w:pPr></w:style>
        <w:style w:type="paragraph" w:styleId="MyChapter"><w:name w:val="My Chapter"/><w:basedOn w:val="Heading1"/></w:style>
        <w:style w:type="paragraph" w:styleId="ListBullet"><w:name w:val="List Bullet"/>
            <w:pPr><w:numPr><w:numId w:val="3"/></w:numPr></w:pPr></w:style>
        <w:style w:type="character" w:styleId="Strong"><w:name w:val="Strong"/></w:style>
    </w:styles>"#;

    const NUMBERING: &str = r#"<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
        <w:abstractNum w:abstractNumId="0"><w:lvl w:ilvl="0"><w:numFmt w:val="bullet"/></w:lvl></w:abstractNum>
        <w:abstractNum w:abstractNumId="1"><w:lvl w:ilvl="1"><w:numFmt w:val="lowerRoman"/></w:lvl>
            <w:lvl w:ilvl="0"><w:numFmt w:val="decimal"/></w:lvl></w:abstractNum>
        <w:num w:numId="3"><w:abstractNumId w:val="0"/></w:num>
        <w:num w:numId="4"><w:abstractNumId w:val="1"/></w:num>
    </w:numbering>"#;

    #[test]
    fn styles_are_keyed_by_display_name() {
        let body = document(r#"<w:p><w:pPr><w:pStyle w:val="MyChapter"/></w:pPr><w:r><w:t>One</w:t></w:r></w:p>"#);
        let doc = load(&[
            ("word/document.xml", &body),
            ("word/styles.xml", STYLES),
            ("word/numbering.xml", NUMBERING),
        ]);

        let styles = doc.styles();
        let heading = styles.style("heading 1").unwrap();
        assert_eq!(heading.outline_level, Some(1));
        assert_eq!(heading.based_on.as_deref(), Some("Normal"));
        assert_eq!(styles.style("My Chapter").unwrap().based_on.as_deref(), Some("heading 1"));
        assert!(styles.style("Strong").is_none());
        assert_eq!(styles.numbering_format("4", 1), Some(NumberFormat::LowerRoman));
        assert_eq!(styles.numbering_format("4", 0), Some(NumberFormat::Decimal));

        let para = doc.blocks()[0].as_paragraph().unwrap();
        assert_eq!(para.style.as_deref(), Some("My Chapter"));
        assert_eq!(para.text(), "One");
    }

    #[test]
    fn list_markers_come_from_paragraph_or_bullet_style() {
        let body = document(concat!(
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="2"/><w:numId w:val="4"/></w:numPr></w:pPr><w:r><w:t>a</w:t></w:r></w:p>"#,
            r#"<w:p><w:pPr><w:pStyle w:val="ListBullet"/></w:pPr><w:r><w:t>b</w:t></w:r></w:p>"#,
            r#"<w:p><w:pPr><w:numPr><w:numId w:val="0"/></w:numPr></w:pPr><w:r><w:t>c</w:t></w:r></w:p>"#,
        ));
        let doc = load(&[
            ("word/document.xml", &body),
            ("word/styles.xml", STYLES),
            ("word/numbering.xml", NUMBERING),
        ]);
        let paras: Vec<_> = doc.blocks().iter().filter_map(Block::as_paragraph).collect();
        assert!(paras[0].list_marker);
        assert!(paras[1].list_marker);
        assert!(!paras[2].list_marker);
    }

    #[test]
    fn run_properties_and_inline_content() {
        let body = document(concat!(
            r#"<w:p><w:pPr><w:jc w:val="both"/><w:shd w:val="clear" w:fill="d9d9d9"/></w:pPr>"#,
            r#"<w:r><w:rPr><w:b/><w:i w:val="0"/><w:u w:val="single"/><w:vertAlign w:val="superscript"/>"#,
            r#"<w:color w:val="auto" w:themeColor="accent1" w:themeTint="99"/><w:highlight w:val="yellow"/></w:rPr>"#,
            r#"<w:t xml:space="preserve">A </w:t><w:tab/><w:t>B</w:t><w:br/><w:sym w:font="Wingdings" w:char="F0FC"/></w:r>"#,
            r#"<w:hyperlink r:id="rId9"><w:r><w:t>link</w:t></w:r></w:hyperlink>"#,
            r#"<w:hyperlink w:anchor="_Toc1"><w:r><w:t>jump</w:t></w:r></w:hyperlink>"#,
            r#"</w:p>"#
        ));
        let doc = load(&[("word/document.xml", &body)]);
        let para = doc.blocks()[0].as_paragraph().unwrap();

        assert_eq!(para.alignment, Alignment::Justify);
        assert_eq!(para.shading.as_deref(), Some("D9D9D9"));
        assert_eq!(para.runs.len(), 3);

        let first = &para.runs[0];
        assert_eq!(first.text, "A \tB\n\u{F0FC}");
        assert_eq!(
            first.format,
            RunFormat {
                bold: true,
                italic: false,
                underline: true,
                superscript: true
            }
        );
        assert_eq!(first.color.explicit, None);
        assert_eq!(first.color.theme.as_deref(), Some("accent1"));
        assert_eq!(first.color.tint, Some(0x99));
        assert_eq!(first.color.highlight.as_deref(), Some("yellow"));

        assert_eq!(para.runs[1].hyperlink.as_ref().and_then(|h| h.rel_id.as_deref()), Some("rId9"));
        assert_eq!(para.runs[2].hyperlink.as_ref().and_then(|h| h.anchor.as_deref()), Some("_Toc1"));
    }

    #[test]
    fn tables_keep_grid_and_merge_markers() {
        let body = document(concat!(
            r#"<w:tbl><w:tblGrid><w:gridCol w:w="2000"/><w:gridCol w:w="3000"/></w:tblGrid>"#,
            r#"<w:tr><w:trPr><w:tblHeader/></w:trPr><w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p><w:r><w:t>H</w:t></w:r></w:p></w:tc></w:tr>"#,
            r#"<w:tr><w:trPr><w:gridBefore w:val="1"/></w:trPr><w:tc><w:tcPr><w:tcW w:w="3000" w:type="dxa"/><w:vMerge w:val="restart"/></w:tcPr><w:p/></w:tc></w:tr>"#,
            r#"<w:sdt><w:sdtContent><w:tr><w:tc><w:tcPr><w:vMerge/></w:tcPr><w:p/></w:tc></w:tr></w:sdtContent></w:sdt>"#,
            r#"</w:tbl>"#
        ));
        let doc = load(&[("word/document.xml", &body)]);
        let Block::Table(table) = &doc.blocks()[0] else { panic!("expected a table") };

        assert_eq!(table.grid_widths, vec![2000, 3000]);
        assert_eq!(table.rows.len(), 3);
        assert!(table.rows[0].header);
        assert_eq!(table.rows[0].cells[0].grid_span, Some(2));
        assert_eq!(table.rows[1].grid_before, 1);
        assert_eq!(table.rows[1].cells[0].width, Some(3000));
        assert_eq!(table.rows[1].cells[0].v_merge, Some(VMerge::Restart));
        assert_eq!(table.rows[2].cells[0].v_merge, Some(VMerge::Continue));
    }

    #[test]
    fn media_relationships_and_drawings() {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
            <Relationship Id="rId6" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="https://cdn.test/logo.gif" TargetMode="External"/>
            <Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.org/" TargetMode="External"/>
        </Relationships>"#;
        let body = document(concat!(
            r#"<w:p><w:r><mc:AlternateContent><mc:Choice Requires="wps"><w:drawing><wp:inline><wp:docPr id="1" name="Picture 1" descr="Wiring"/>"#,
            r#"<a:graphic><a:graphicData><a:blip r:embed="rId5"/></a:graphicData></a:graphic></wp:inline></w:drawing></mc:Choice>"#,
            r#"<mc:Fallback><w:pict><v:shape><v:imagedata r:id="rId5"/></v:shape></w:pict></mc:Fallback></mc:AlternateContent></w:r></w:p>"#,
            r#"<w:p><w:r><w:drawing><a:blip r:link="rId6"/></w:drawing></w:r></w:p>"#,
        ));
        let doc = load(&[
            ("word/document.xml", &body),
            ("word/_rels/document.xml.rels", rels),
            ("word/media/image1.png", "PNGDATA"),
        ]);

        let first = doc.blocks()[0].as_paragraph().unwrap();
        assert_eq!(first.runs.len(), 1);
        let image = first.runs[0].image.as_ref().unwrap();
        assert_eq!(image.rel_id, "rId5");
        assert!(!image.external);
        assert_eq!(image.alt.as_deref(), Some("Wiring"));

        let linked = doc.blocks()[1].as_paragraph().unwrap().runs[0].image.as_ref().unwrap();
        assert!(linked.external);

        let data = doc.embedded_image("rId5").unwrap();
        assert_eq!(data.bytes, b"PNGDATA".to_vec());
        assert_eq!(data.extension, "png");
        assert!(doc.embedded_image("rId6").is_none());
        assert_eq!(doc.relationship_target("rId9"), Some("https://example.org/"));
    }

    #[test]
    fn text_boxes_and_content_controls() {
        let body = document(concat!(
            r#"<w:sdt><w:sdtContent><w:p><w:r><w:t>inside control</w:t></w:r></w:p></w:sdtContent></w:sdt>"#,
            r#"<w:p><w:r><w:pict><v:shape><v:textbox><w:txbxContent><w:p><w:r><w:t>boxed</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>note</w:t></w:r></w:p></w:txbxContent></v:textbox></v:shape></w:pict></w:r></w:p>"#,
        ));
        let doc = load(&[("word/document.xml", &body)]);
        assert_eq!(doc.blocks().len(), 2);
        assert_eq!(doc.blocks()[0].as_paragraph().unwrap().text(), "inside control");
        let boxed = doc.blocks()[1].as_paragraph().unwrap();
        assert!(boxed.nested_text);
        assert_eq!(boxed.text(), "boxed note");
    }

    #[test]
    fn theme_and_document_properties() {
        let theme = r#"<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><a:themeElements>
            <a:clrScheme name="Office"><a:dk1><a:sysClr val="windowText" lastClr="000000"/></a:dk1>
            <a:lt1><a:sysClr val="window" lastClr="FFFFFF"/></a:lt1><a:accent1><a:srgbClr val="4472c4"/></a:accent1>
            </a:clrScheme></a:themeElements></a:theme>"#;
        let core = r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"
            xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/">
            <dc:title>Pump Manual</dc:title><cp:revision>7</cp:revision>
            <dcterms:modified>2024-03-05T10:20:00Z</dcterms:modified></cp:coreProperties>"#;
        let custom = r#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/custom-properties"
            xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes">
            <property fmtid="{D5CDD505-2E9C-101B-9397-08002B2CF9AE}" pid="2" name="ManualCode"><vt:lpwstr>PM-100</vt:lpwstr></property>
            </Properties>"#;
        let doc = load(&[
            ("word/document.xml", &document("")),
            ("word/theme/theme1.xml", theme),
            ("docProps/core.xml", core),
            ("docProps/custom.xml", custom),
        ]);

        assert_eq!(doc.theme_color("accent1"), Some("4472C4"));
        assert_eq!(doc.theme_color("text1"), Some("000000"));
        assert_eq!(doc.theme_color("background1"), Some("FFFFFF"));
        let meta = doc.metadata();
        assert_eq!(meta.get("title").map(String::as_str), Some("Pump Manual"));
        assert_eq!(meta.get("revision").map(String::as_str), Some("7"));
        assert_eq!(meta.get("revision_date").map(String::as_str), Some("2024-03-05"));
        assert_eq!(meta.get("ManualCode").map(String::as_str), Some("PM-100"));
    }

    #[test]
    fn broken_optional_parts_are_skipped() {
        let doc = load(&[
            ("word/document.xml", &document(r#"<w:p><w:r><w:t>x</w:t></w:r></w:p>"#)),
            ("word/styles.xml", "<w:styles"),
        ]);
        assert_eq!(doc.blocks().len(), 1);
        assert!(doc.styles().style_names().is_empty());
    }

    #[test]
    fn unusable_packages_are_fatal() {
        let missing = DocxSource::from_bytes("a.docx", package(&[("word/styles.xml", STYLES)])).unwrap_err();
        assert!(matches!(missing, ConversionError::FatalEnvironment(_)));
        assert!(missing.is_fatal());

        let garbage = DocxSource::from_bytes("b.docx", b"not a zip".to_vec()).unwrap_err();
        assert!(matches!(garbage, ConversionError::Zip(_)));

        let bad_xml = DocxSource::from_bytes("c.docx", package(&[("word/document.xml", "<w:document")])).unwrap_err();
        assert!(bad_xml.is_fatal());
    }

    #[test]
    fn numbering_levels_are_indexed_by_ilvl() {
        let xml = r#"<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:abstractNum w:abstractNumId="9"><w:lvl w:ilvl="2"><w:numFmt w:val="upperLetter"/></w:lvl>
                <w:lvl w:ilvl="0"><w:numFmt w:val="bullet"/></w:lvl></w:abstractNum>
            <w:num w:numId="12"><w:abstractNumId w:val="9"/></w:num>
        </w:numbering>"#;
        let numbering = parse_numbering(xml).unwrap();
        assert_eq!(numbering.len(), 1);
        let (num_id, levels) = &numbering[0];
        assert_eq!(num_id, "12");
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], NumberFormat::Bullet);
        assert!(!levels[1].is_ordered());
        assert_eq!(levels[2], NumberFormat::UpperLetter);
    }

    #[test]
    fn declared_entry_size_is_not_trusted() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("word/media/image1.png", options).unwrap();
        zip.write_all(b"PNGDATA").unwrap();
        let mut bytes = zip.finish().unwrap().into_inner();

        let central = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0x7FFF_FFFFu32.to_le_bytes());

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let data = read_binary(&mut archive, "word/media/image1.png").unwrap();
        assert_eq!(data.as_deref(), Some(b"PNGDATA".as_slice()));
    }

    #[test]
    fn relationship_targets_resolve_to_package_paths() {
        assert_eq!(part_path("media/image1.png"), "word/media/image1.png");
        assert_eq!(part_path("../customXml/item1.xml"), "customXml/item1.xml");
        assert_eq!(part_path("/word/media/a.emf"), "word/media/a.emf");
    }

    #[test]
    fn dates_are_normalised() {
        assert_eq!(iso_date("2023-12-31T23:59:59+02:00").as_deref(), Some("2023-12-31"));
        assert_eq!(iso_date("2023-01-02").as_deref(), Some("2023-01-02"));
        assert_eq!(iso_date("yesterday"), None);
    }
}
