// src/core/structure.rs
use crate::core::classifier::StyleLevelMap;
use crate::model::{Block, Paragraph};
use crate::utils::text::{has_content, is_toc_paragraph, is_toc_style, is_toc_title, map_glyphs, strip_ordinal};
use log::debug;
use serde::Serialize;

/// Index of a node inside its [`HeadingTree`].
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Unassigned,
    /// Has structural children.
    Section,
    /// Leaf, becomes a topic of its own.
    Module,
}

#[derive(Debug, Clone)]
pub struct HeadingNode<'a> {
    /// Heading text with its numbering prefix removed.
    pub text: String,
    pub level: u8,
    pub style: String,
    pub content: Vec<&'a Block>,
    pub children: Vec<NodeId>,
    /// Back link only; ownership runs through `children`.
    pub parent: Option<NodeId>,
    pub role: Role,
}

/// Arena of heading nodes. Children always sit at higher indices than their parent.
#[derive(Debug, Clone, Default)]
pub struct HeadingTree<'a> {
    nodes: Vec<HeadingNode<'a>>,
    roots: Vec<NodeId>,
}

impl<'a> HeadingTree<'a> {
    pub fn node(&self, id: NodeId) -> &HeadingNode<'a> {
        &self.nodes[id]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &HeadingNode<'a>)> {
        self.nodes.iter().enumerate()
    }

    pub fn parent(&self, id: NodeId) -> Option<&HeadingNode<'a>> {
        self.nodes[id].parent.map(|p| &self.nodes[p])
    }

    fn add(&mut self, mut node: HeadingNode<'a>, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        node.parent = parent;
        self.nodes.push(node);
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }
}

/// Turns the flat block stream into a heading tree.
pub struct StructureBuilder<'m> {
    levels: &'m StyleLevelMap,
}

impl<'m> StructureBuilder<'m> {
    pub fn new(levels: &'m StyleLevelMap) -> Self {
        Self { levels }
    }

    pub fn build<'a>(&self, blocks: &'a [Block]) -> HeadingTree<'a> {
        let mut tree = HeadingTree::default();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut dropped = 0usize;

        for block in blocks {
            match block {
                Block::Paragraph(p) => {
                    if let Some((level, text)) = self.heading_of(p) {
                        while let Some(&top) = stack.last() {
                            if tree.nodes[top].level < level {
                                break;
                            }
                            stack.pop();
                        }
                        let node = HeadingNode {
                            text,
                            level,
                            style: p.style_name().to_string(),
                            content: Vec::new(),
                            children: Vec::new(),
                            parent: None,
                            role: Role::Unassigned,
                        };
                        let id = tree.add(node, stack.last().copied());
                        stack.push(id);
                        continue;
                    }
                    if is_toc_paragraph(p) || is_toc_title(&p.text()) || !has_content(p) {
                        continue;
                    }
                }
                Block::Table(_) => {}
            }

            match stack.last() {
                Some(&top) => tree.nodes[top].content.push(block),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!("{} block(s) before the first heading dropped", dropped);
        }
        tree
    }

    /// Level and cleaned title when the paragraph opens a heading.
    fn heading_of(&self, p: &Paragraph) -> Option<(u8, String)> {
        let style = p.style.as_deref()?;
        let level = self.levels.resolve(style)?;
        if is_toc_style(style) {
            return None;
        }
        let text = map_glyphs(&strip_ordinal(&p.text()));
        if text.is_empty() || is_toc_title(&text) {
            return None;
        }
        Some((level, text))
    }
}

/// Marks every node as a section or a module from the tree shape alone.
pub struct RoleResolver;

impl RoleResolver {
    pub fn resolve(tree: &mut HeadingTree<'_>) {
        // Reverse arena order visits children before their parents.
        for node in tree.nodes.iter_mut().rev() {
            node.role = if node.children.is_empty() {
                Role::Module
            } else {
                Role::Section
            };
        }
    }
}
