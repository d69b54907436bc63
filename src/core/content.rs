// src/core/content.rs
use crate::config::ConverterConfig;
use crate::core::color::{resolve_color, ColorClassifier};
use crate::core::table::{emit_table, TableReconstructor};
use crate::error::{ConversionError, Result};
use crate::markup::{Element, Node};
use crate::model::{Alignment, Block, Hyperlink, ImageRef, Paragraph, RawCell, Run, RunFormat, TableBlock};
use crate::source::{CellRef, DocumentSource, ImageFetcher};
use crate::utils::text::{file_stem, has_content, map_glyphs};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Output images named after the configured pattern, one file per relationship.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    by_rel: HashMap<String, String>,
    failed: HashSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl ImageRegistry {
    pub fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }

    fn file_name(&self, pattern: &str, stem: &str, extension: &str) -> String {
        let mut n = self.files.len() + 1;
        loop {
            let name = pattern
                .replace("{n}", &n.to_string())
                .replace("{ext}", extension)
                .replace("{stem}", stem);
            if !self.files.contains_key(&name) || !pattern.contains("{n}") {
                return name;
            }
            n += 1;
        }
    }
}

/// Lowercase extension of a URL path, `png` when there is none worth keeping.
fn url_extension(url: &str) -> String {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => "png".to_string(),
    }
}

#[derive(Clone, PartialEq)]
struct RunKey {
    format: RunFormat,
    class: Option<String>,
    link: Option<Hyperlink>,
}

/// Container currently collecting items.
enum OpenList {
    Bullets(Element),
    Images(Element),
}

impl OpenList {
    fn into_node(self) -> Node {
        match self {
            OpenList::Bullets(e) | OpenList::Images(e) => Node::Element(e),
        }
    }
}

/// Turns block sequences into topic body markup.
pub struct ContentAssembler<'a> {
    config: &'a ConverterConfig,
    source: &'a dyn DocumentSource,
    fetcher: Option<&'a dyn ImageFetcher>,
    colors: ColorClassifier<'a>,
    tables: TableReconstructor,
    images: ImageRegistry,
    stem: String,
}

impl<'a> ContentAssembler<'a> {
    pub fn new(config: &'a ConverterConfig, source: &'a dyn DocumentSource) -> Self {
        Self {
            config,
            source,
            fetcher: None,
            colors: ColorClassifier::new(&config.colors),
            tables: TableReconstructor::new(config),
            images: ImageRegistry::default(),
            stem: file_stem(source.name()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Option<&'a dyn ImageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn into_images(self) -> BTreeMap<String, Vec<u8>> {
        self.images.into_files()
    }

    pub fn assemble<'b, I>(&mut self, blocks: I) -> Vec<Node>
    where
        I: IntoIterator<Item = &'b Block>,
    {
        let mut out = Vec::new();
        let mut open: Option<OpenList> = None;

        for block in blocks {
            match block {
                Block::Table(table) => {
                    close(&mut out, &mut open);
                    out.push(Node::Element(self.table(table)));
                }
                Block::Paragraph(p) if !p.has_text() && p.has_image() => {
                    let images: Vec<Node> = self.images_of(p).into_iter().map(Node::Element).collect();
                    if images.is_empty() {
                        continue;
                    }
                    if !matches!(open, Some(OpenList::Images(_))) {
                        close(&mut out, &mut open);
                        open = Some(OpenList::Images(Element::new("sl")));
                    }
                    if let Some(OpenList::Images(sl)) = open.as_mut() {
                        let mut item = Element::new("sli");
                        item.children = images;
                        sl.push(item);
                    }
                }
                Block::Paragraph(p) if p.list_marker => {
                    if !matches!(open, Some(OpenList::Bullets(_))) {
                        close(&mut out, &mut open);
                        open = Some(OpenList::Bullets(Element::new("ul")));
                    }
                    let (inline, trailing) = self.inline(p);
                    let mut item = Element::new("li");
                    item.children = inline;
                    item.children.extend(trailing);
                    if let Some(OpenList::Bullets(ul)) = open.as_mut() {
                        ul.push(item);
                    }
                }
                Block::Paragraph(p) => {
                    close(&mut out, &mut open);
                    if !has_content(p) {
                        continue;
                    }
                    out.extend(self.paragraph(p));
                }
            }
        }
        close(&mut out, &mut open);
        out
    }

    fn paragraph(&mut self, p: &Paragraph) -> Vec<Node> {
        let (inline, trailing) = self.inline(p);
        let mut out = Vec::new();
        if !inline.is_empty() {
            let mut element = Element::new("p");
            let mut classes = Vec::new();
            match p.alignment {
                Alignment::Center => classes.push("center"),
                Alignment::Justify => classes.push("justify"),
                Alignment::Start | Alignment::End => {}
            }
            if self.is_shaded_box(p) {
                classes.push("shaded-box");
            }
            if !classes.is_empty() {
                element.set_attr("outputclass", classes.join(" "));
            }
            element.children = inline;
            out.push(Node::Element(element));
        }
        out.extend(trailing);
        out
    }

    fn is_shaded_box(&self, p: &Paragraph) -> bool {
        p.shading.as_deref().map_or(false, |fill| {
            self.config
                .shaded_box_fills
                .iter()
                .any(|f| f.eq_ignore_ascii_case(fill))
        })
    }

    /// Inline markup of a paragraph, plus images pulled out into their own paragraphs.
    fn inline(&mut self, p: &Paragraph) -> (Vec<Node>, Vec<Node>) {
        let mut nodes = Vec::new();
        let mut trailing = Vec::new();
        let mut group: Option<(RunKey, String)> = None;

        for run in &p.runs {
            if let Some(image) = &run.image {
                self.flush(&mut nodes, group.take());
                let Some(element) = self.image(image) else { continue };
                if self.config.separate_image_paragraphs {
                    trailing.push(Node::Element(
                        Element::new("p")
                            .with_attr("outputclass", "center")
                            .with_child(element),
                    ));
                } else {
                    nodes.push(Node::Element(element));
                }
                continue;
            }
            if run.text.is_empty() {
                continue;
            }
            let key = self.run_key(run);
            let text = map_glyphs(&run.text);
            match group.as_mut() {
                Some((current, buf)) if *current == key => buf.push_str(&text),
                _ => {
                    self.flush(&mut nodes, group.take());
                    group = Some((key, text));
                }
            }
        }
        self.flush(&mut nodes, group.take());
        (nodes, trailing)
    }

    fn run_key(&self, run: &Run) -> RunKey {
        let source = self.source;
        let class = resolve_color(&run.color, |name| source.theme_color(name))
            .and_then(|color| self.colors.classify(&color));
        RunKey {
            format: run.format,
            class,
            link: run.hyperlink.clone(),
        }
    }

    fn flush(&self, nodes: &mut Vec<Node>, group: Option<(RunKey, String)>) {
        let Some((key, text)) = group else { return };
        let mut node = Node::Text(text);
        // Innermost first, so the colour wrapper ends up outermost.
        let wrappers = [
            (key.format.superscript, "sup"),
            (key.format.underline, "u"),
            (key.format.italic, "i"),
            (key.format.bold, "b"),
        ];
        for (on, name) in wrappers {
            if on {
                node = Node::Element(Element::new(name).with_child(node));
            }
        }
        if let Some(class) = &key.class {
            node = Node::Element(Element::new("ph").with_attr("outputclass", class.as_str()).with_child(node));
        }
        if let Some(link) = &key.link {
            match self.link_target(link) {
                Some((href, external)) => {
                    let mut xref = Element::new("xref").with_attr("href", href);
                    if external {
                        xref.set_attr("scope", "external");
                    }
                    node = Node::Element(xref.with_child(node));
                }
                None => debug!("unresolvable hyperlink {:?} kept as text", link),
            }
        }
        nodes.push(node);
    }

    fn link_target(&self, link: &Hyperlink) -> Option<(String, bool)> {
        if let Some(target) = link.rel_id.as_deref().and_then(|id| self.source.relationship_target(id)) {
            return Some((target.to_string(), true));
        }
        link.anchor
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| (format!("#{}", a), false))
    }

    fn images_of(&mut self, p: &Paragraph) -> Vec<Element> {
        p.runs
            .iter()
            .filter_map(|r| r.image.as_ref())
            .filter_map(|image| self.image(image))
            .collect()
    }

    fn image(&mut self, image: &ImageRef) -> Option<Element> {
        match self.register(image) {
            Ok(name) => {
                let mut element =
                    Element::new("image").with_attr("href", format!("{}/{}", self.config.image_dir, name));
                if let Some(alt) = image.alt.as_deref().filter(|a| !a.is_empty()) {
                    element.set_attr("alt", alt);
                }
                Some(element)
            }
            Err(e) => {
                warn!("image {} skipped: {}", image.rel_id, e);
                None
            }
        }
    }

    /// Stores the image bytes once per relationship and returns the file name.
    fn register(&mut self, image: &ImageRef) -> Result<String> {
        if let Some(name) = self.images.by_rel.get(&image.rel_id) {
            return Ok(name.clone());
        }
        if self.images.failed.contains(&image.rel_id) {
            return Err(ConversionError::external(&image.rel_id, "failed earlier"));
        }
        match self.load(image) {
            Ok((bytes, extension)) => {
                let name = self
                    .images
                    .file_name(&self.config.image_name_pattern, &self.stem, &extension);
                self.images.by_rel.insert(image.rel_id.clone(), name.clone());
                self.images.files.insert(name.clone(), bytes);
                Ok(name)
            }
            Err(e) => {
                self.images.failed.insert(image.rel_id.clone());
                Err(e)
            }
        }
    }

    fn load(&self, image: &ImageRef) -> Result<(Vec<u8>, String)> {
        if !image.external {
            if let Some(data) = self.source.embedded_image(&image.rel_id) {
                return Ok((data.bytes, data.extension));
            }
        }
        let url = self
            .source
            .relationship_target(&image.rel_id)
            .filter(|_| image.external)
            .ok_or_else(|| ConversionError::malformed(format!("image {}", image.rel_id), "no media for relationship"))?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| ConversionError::external(url, "no fetcher configured"))?;
        let bytes = fetcher.fetch(url)?;
        Ok((bytes, url_extension(url)))
    }

    fn table(&mut self, table: &TableBlock) -> Element {
        let grid = self.tables.reconstruct(table);
        emit_table(&grid, |cell: &RawCell| self.cell(cell))
    }

    fn cell(&mut self, cell: &dyn CellRef) -> Vec<Node> {
        let mut nodes = self.assemble(cell.blocks());
        // A lone plain paragraph reads better as bare entry text.
        if matches!(nodes.as_slice(), [Node::Element(p)] if p.name == "p" && p.attrs.is_empty()) {
            if let Some(Node::Element(p)) = nodes.pop() {
                return p.children;
            }
        }
        nodes
    }
}

fn close(out: &mut Vec<Node>, open: &mut Option<OpenList>) {
    if let Some(list) = open.take() {
        out.push(list.into_node());
    }
}
