// src/core/topics.rs
use crate::config::ConverterConfig;
use crate::core::classifier::MAX_LEVEL;
use crate::core::content::ContentAssembler;
use crate::core::structure::{HeadingTree, NodeId, Role};
use crate::error::ConversionError;
use crate::markup::{Element, Node};
use crate::model::Block;
use crate::utils::text::{file_stem, IdAllocator};
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDocument {
    pub id: String,
    pub title: String,
    pub body: Vec<Node>,
}

impl TopicDocument {
    pub fn to_element(&self) -> Element {
        let mut body = Element::new("body");
        body.children = self.body.clone();
        Element::new("topic")
            .with_attr("id", self.id.as_str())
            .with_child(Element::new("title").with_text(self.title.as_str()))
            .with_child(body)
    }

    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavigationNode {
    TopicRef {
        href: String,
        title: String,
        toc_index: String,
        children: Vec<NavigationNode>,
    },
    SectionHead {
        title: String,
        toc_index: String,
        children: Vec<NavigationNode>,
    },
}

impl NavigationNode {
    pub fn title(&self) -> &str {
        match self {
            NavigationNode::TopicRef { title, .. } | NavigationNode::SectionHead { title, .. } => title,
        }
    }

    pub fn toc_index(&self) -> &str {
        match self {
            NavigationNode::TopicRef { toc_index, .. } | NavigationNode::SectionHead { toc_index, .. } => toc_index,
        }
    }

    pub fn children(&self) -> &[NavigationNode] {
        match self {
            NavigationNode::TopicRef { children, .. } | NavigationNode::SectionHead { children, .. } => children,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<NavigationNode> {
        match self {
            NavigationNode::TopicRef { children, .. } | NavigationNode::SectionHead { children, .. } => children,
        }
    }

    fn to_element(&self) -> Element {
        let mut element = match self {
            NavigationNode::TopicRef { href, title, .. } => Element::new("topicref")
                .with_attr("href", href.as_str())
                .with_attr("navtitle", title.as_str()),
            NavigationNode::SectionHead { title, .. } => {
                Element::new("topichead").with_attr("navtitle", title.as_str())
            }
        };
        for child in self.children() {
            element.push(child.to_element());
        }
        element
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NavigationTree {
    pub entries: Vec<NavigationNode>,
}

impl NavigationTree {
    /// Renders the tree as a map titled `title`.
    pub fn to_xml(&self, title: &str) -> String {
        let mut map = Element::new("map").with_child(Element::new("title").with_text(title));
        for entry in &self.entries {
            map.push(entry.to_element());
        }
        map.to_xml()
    }

    /// Depth-first listing of every navigation entry.
    pub fn flatten(&self) -> Vec<&NavigationNode> {
        fn walk<'n>(nodes: &'n [NavigationNode], out: &mut Vec<&'n NavigationNode>) {
            for node in nodes {
                out.push(node);
                walk(node.children(), out);
            }
        }
        let mut out = Vec::new();
        walk(&self.entries, &mut out);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Synthesis {
    /// Topics in navigation order.
    pub topics: Vec<TopicDocument>,
    pub navigation: NavigationTree,
}

/// Walks a resolved heading tree and emits topics plus navigation.
pub struct TopicSynthesizer<'c> {
    config: &'c ConverterConfig,
}

struct Walk<'s, 'x> {
    ids: IdAllocator,
    counters: [u32; MAX_LEVEL as usize + 1],
    topics: Vec<TopicDocument>,
    assembler: &'s mut ContentAssembler<'x>,
}

impl Walk<'_, '_> {
    fn step(&mut self, level: u8) -> String {
        let level = (level as usize).clamp(1, MAX_LEVEL as usize);
        self.counters[level] += 1;
        for deeper in &mut self.counters[level + 1..] {
            *deeper = 0;
        }
        self.counters[1..=level]
            .iter()
            .filter(|&&n| n > 0)
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl<'c> TopicSynthesizer<'c> {
    pub fn new(config: &'c ConverterConfig) -> Self {
        Self { config }
    }

    pub fn synthesize(
        &self,
        tree: &HeadingTree<'_>,
        blocks: &[Block],
        source_name: &str,
        assembler: &mut ContentAssembler<'_>,
    ) -> Synthesis {
        let mut walk = Walk {
            ids: IdAllocator::new(),
            counters: [0; MAX_LEVEL as usize + 1],
            topics: Vec::new(),
            assembler,
        };

        let mut entries = Vec::new();
        for &root in tree.roots() {
            entries.push(self.visit(tree, root, &mut walk));
        }

        if walk.topics.is_empty() {
            info!("{}", ConversionError::MissingRequiredStructure(source_name.to_string()));
            let title = file_stem(source_name);
            let body = walk.assembler.assemble(blocks);
            let entry = self.topic(&mut walk, title, body, "1".to_string());
            return Synthesis {
                topics: walk.topics,
                navigation: NavigationTree { entries: vec![entry] },
            };
        }

        debug!("{} topic(s) from {} heading(s)", walk.topics.len(), tree.len());
        Synthesis {
            topics: walk.topics,
            navigation: NavigationTree { entries },
        }
    }

    fn visit(&self, tree: &HeadingTree<'_>, id: NodeId, walk: &mut Walk<'_, '_>) -> NavigationNode {
        let node = tree.node(id);
        let toc_index = walk.step(node.level);

        let mut entry = match node.role {
            Role::Section => NavigationNode::SectionHead {
                title: node.text.clone(),
                toc_index,
                children: Vec::new(),
            },
            Role::Module | Role::Unassigned => {
                let body = walk.assembler.assemble(node.content.iter().copied());
                self.topic(walk, node.text.clone(), body, toc_index)
            }
        };

        if node.role == Role::Section && !node.content.is_empty() {
            let body = walk.assembler.assemble(node.content.iter().copied());
            if !body.is_empty() {
                // Numbered as if it were the first structural child.
                let level = tree.node(node.children[0]).level;
                let index = walk.step(level);
                let implicit = self.topic(walk, node.text.clone(), body, index);
                entry.children_mut().push(implicit);
            }
        }

        for &child in &node.children {
            let nav = self.visit(tree, child, walk);
            entry.children_mut().push(nav);
        }
        entry
    }

    fn topic(&self, walk: &mut Walk<'_, '_>, title: String, body: Vec<Node>, toc_index: String) -> NavigationNode {
        let id = walk.ids.allocate(&title);
        let href = format!("{}.{}", id, self.config.topic_extension);
        walk.topics.push(TopicDocument {
            id,
            title: title.clone(),
            body,
        });
        NavigationNode::TopicRef {
            href,
            title,
            toc_index,
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::StyleClassifier;
    use crate::core::structure::{RoleResolver, StructureBuilder};
    use crate::model::Paragraph;
    use crate::source::{DocumentSource, MemoryDocument};

    fn para(style: &str, text: &str) -> Block {
        Block::Paragraph(Paragraph::new(Some(style), text))
    }

    fn run(doc: &MemoryDocument) -> Synthesis {
        let config = ConverterConfig::default();
        let levels = StyleClassifier::new(&config).classify(doc.styles(), doc.blocks());
        let mut tree = StructureBuilder::new(&levels).build(doc.blocks());
        RoleResolver::resolve(&mut tree);
        let mut assembler = ContentAssembler::new(&config, doc);
        TopicSynthesizer::new(&config).synthesize(&tree, doc.blocks(), doc.name(), &mut assembler)
    }

    fn outline(nodes: &[NavigationNode]) -> Vec<String> {
        NavigationTree {
            entries: nodes.to_vec(),
        }
        .flatten()
        .iter()
        .map(|n| format!("{} {}", n.toc_index(), n.title()))
        .collect()
    }

    #[test]
    fn sections_wrap_modules() {
        let doc = MemoryDocument::new("guide.docx", vec![
            para("Heading 1", "Intro"),
            para("Heading 2", "Background"),
            para("Normal", "why"),
            para("Heading 1", "Setup"),
            para("Normal", "how"),
        ]);
        let out = run(&doc);

        assert_eq!(out.navigation.entries.len(), 2);
        assert!(matches!(&out.navigation.entries[0], NavigationNode::SectionHead { title, .. } if title == "Intro"));
        assert!(matches!(&out.navigation.entries[1], NavigationNode::TopicRef { href, .. } if href == "setup.dita"));
        assert_eq!(outline(&out.navigation.entries), vec!["1 Intro", "1.1 Background", "2 Setup"]);

        let ids: Vec<_> = out.topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["background", "setup"]);
        assert_eq!(
            out.topics[1].to_xml(),
            r#"<topic id="setup"><title>Setup</title><body><p>how</p></body></topic>"#
        );
    }

    #[test]
    fn section_content_becomes_an_implicit_first_module() {
        let doc = MemoryDocument::new("guide.docx", vec![
            para("Heading 1", "Intro"),
            para("Normal", "overview"),
            para("Heading 2", "Background"),
            para("Heading 2", "Scope"),
        ]);
        let out = run(&doc);

        assert_eq!(
            outline(&out.navigation.entries),
            vec!["1 Intro", "1.1 Intro", "1.2 Background", "1.3 Scope"]
        );
        let ids: Vec<_> = out.topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["intro", "background", "scope"]);
        assert_eq!(out.topics[0].body.len(), 1);
    }

    #[test]
    fn counters_reset_below_the_current_level() {
        let doc = MemoryDocument::new("guide.docx", vec![
            para("Heading 1", "A"),
            para("Heading 2", "A1"),
            para("Heading 2", "A2"),
            para("Heading 1", "B"),
            para("Heading 3", "B-deep"),
        ]);
        let out = run(&doc);
        assert_eq!(
            outline(&out.navigation.entries),
            vec!["1 A", "1.1 A1", "1.2 A2", "2 B", "2.1 B-deep"]
        );
    }

    #[test]
    fn duplicate_titles_get_distinct_ids() {
        let doc = MemoryDocument::new("guide.docx", vec![
            para("Heading 1", "Notes"),
            para("Heading 1", "Notes"),
        ]);
        let out = run(&doc);
        let hrefs: Vec<_> = out
            .navigation
            .flatten()
            .iter()
            .filter_map(|n| match n {
                NavigationNode::TopicRef { href, .. } => Some(href.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(hrefs, vec!["notes.dita", "notes_2.dita"]);
    }

    #[test]
    fn headingless_document_becomes_one_topic() {
        let doc = MemoryDocument::new("/data/Field Guide.docx", vec![
            para("Normal", "first"),
            para("Normal", "second"),
        ]);
        let out = run(&doc);

        assert_eq!(out.topics.len(), 1);
        let topic = &out.topics[0];
        assert_eq!(topic.title, "Field Guide");
        assert_eq!(topic.id, "field_guide");
        let texts: Vec<_> = topic.body.iter().map(Node::plain_text).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(outline(&out.navigation.entries), vec!["1 Field Guide"]);
    }

    #[test]
    fn map_markup() {
        let tree = NavigationTree {
            entries: vec![NavigationNode::SectionHead {
                title: "Intro".into(),
                toc_index: "1".into(),
                children: vec![NavigationNode::TopicRef {
                    href: "a.dita".into(),
                    title: "A".into(),
                    toc_index: "1.1".into(),
                    children: vec![],
                }],
            }],
        };
        assert_eq!(
            tree.to_xml("Guide"),
            r#"<map><title>Guide</title><topichead navtitle="Intro"><topicref href="a.dita" navtitle="A"/></topichead></map>"#
        );
    }
}
