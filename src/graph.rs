//! Target-side annotation graph
//!
//! One `DocumentGraph` per output document: a single textual datasource,
//! token/span/structure nodes and typed relations between them. Nodes are
//! addressed by `NodeId`, an index into the graph's node list.

use crate::tiger::Annotation;
use std::fmt;

/// Index of a node inside its `DocumentGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The text all tokens of a document point into.
/// Offsets are character positions, not byte positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextualDatasource {
    text: String,
}

impl TextualDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: String) {
        self.text = text;
    }

    /// Characters in `[start, end)`, or `None` if out of range
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        if start > end {
            return None;
        }
        let byte_at = |pos: usize| {
            self.text
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(self.text.len()))
                .nth(pos)
        };
        let from = byte_at(start)?;
        let to = byte_at(end)?;
        Some(&self.text[from..to])
    }
}

/// Kind tag of an output node, used for relation classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputNodeKind {
    Token,
    Span,
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Token { start: usize, end: usize },
    Span { tokens: Vec<NodeId> },
    Structure,
}

impl NodeKind {
    pub fn output_kind(&self) -> OutputNodeKind {
        match self {
            NodeKind::Token { .. } => OutputNodeKind::Token,
            NodeKind::Span { .. } => OutputNodeKind::Span,
            NodeKind::Structure => OutputNodeKind::Structure,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Id of the source node this was mapped from, if any
    pub name: Option<String>,
    pub kind: NodeKind,
    pub annotations: Vec<Annotation>,
}

impl Node {
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|anno| anno.name == name)
            .map(|anno| anno.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Dominance,
    Pointing,
    Spanning,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::Dominance => "dominance",
            RelationKind::Pointing => "pointing",
            RelationKind::Spanning => "spanning",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    pub source: NodeId,
    pub target: NodeId,
    pub rel_type: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl Relation {
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|anno| anno.name == name)
            .map(|anno| anno.value.as_str())
    }
}

/// Output graph of one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentGraph {
    pub id: String,
    /// Display name, taken from the corpus meta name
    pub name: Option<String>,
    pub meta: Vec<Annotation>,
    pub text: TextualDatasource,
    nodes: Vec<Node>,
    relations: Vec<Relation>,
}

impl DocumentGraph {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    fn push_node(
        &mut self,
        name: Option<&str>,
        kind: NodeKind,
        annotations: Vec<Annotation>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            name: name.map(str::to_string),
            kind,
            annotations,
        });
        id
    }

    /// Add a token covering `[start, end)` of the textual datasource
    pub fn add_token(
        &mut self,
        name: Option<&str>,
        start: usize,
        end: usize,
        annotations: Vec<Annotation>,
    ) -> NodeId {
        self.push_node(name, NodeKind::Token { start, end }, annotations)
    }

    pub fn add_structure(&mut self, name: Option<&str>, annotations: Vec<Annotation>) -> NodeId {
        self.push_node(name, NodeKind::Structure, annotations)
    }

    /// Add a span over the given tokens together with one spanning
    /// relation from the span to each token
    pub fn add_span(&mut self, tokens: Vec<NodeId>) -> NodeId {
        let targets = tokens.clone();
        let span = self.push_node(None, NodeKind::Span { tokens }, Vec::new());
        for token in targets {
            self.add_relation(RelationKind::Spanning, span, token, None, Vec::new());
        }
        span
    }

    pub fn add_relation(
        &mut self,
        kind: RelationKind,
        source: NodeId,
        target: NodeId,
        rel_type: Option<String>,
        annotations: Vec<Annotation>,
    ) -> usize {
        self.relations.push(Relation {
            kind,
            source,
            target,
            rel_type,
            annotations,
        });
        self.relations.len() - 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Find a node by the id of the source node it was mapped from
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name.as_deref() == Some(name))
    }

    pub fn nodes_of_kind(&self, kind: OutputNodeKind) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(move |n| n.kind.output_kind() == kind)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of_kind(OutputNodeKind::Token)
    }

    pub fn structures(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of_kind(OutputNodeKind::Structure)
    }

    pub fn spans(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of_kind(OutputNodeKind::Span)
    }

    pub fn relations_of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.source == id)
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.target == id)
    }

    /// The covered text of a token, `None` for other node kinds
    pub fn token_text(&self, id: NodeId) -> Option<&str> {
        match self.node(id)?.kind {
            NodeKind::Token { start, end } => self.text.slice(start, end),
            _ => None,
        }
    }

    pub fn meta_annotation(&self, name: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|anno| anno.name == name)
            .map(|anno| anno.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_counts_characters() {
        let mut ds = TextualDatasource::new();
        ds.set_text("Der Hund läuft".to_string());

        assert_eq!(ds.slice(0, 3), Some("Der"));
        assert_eq!(ds.slice(9, 14), Some("läuft"));
        assert_eq!(ds.slice(14, 14), Some(""));
        assert_eq!(ds.slice(9, 15), None);
        assert_eq!(ds.slice(4, 3), None);
    }

    #[test]
    fn test_span_creates_spanning_relations() {
        let mut graph = DocumentGraph::new("doc1");
        let t1 = graph.add_token(Some("t1"), 0, 3, Vec::new());
        let t2 = graph.add_token(Some("t2"), 4, 8, Vec::new());
        let span = graph.add_span(vec![t1, t2]);

        assert_eq!(graph.spans().count(), 1);
        let targets: Vec<_> = graph.outgoing(span).map(|r| r.target).collect();
        assert_eq!(targets, vec![t1, t2]);
        assert!(
            graph
                .outgoing(span)
                .all(|r| r.kind == RelationKind::Spanning && r.rel_type.is_none())
        );
    }

    #[test]
    fn test_kind_queries() {
        let mut graph = DocumentGraph::new("doc1");
        graph.text.set_text("Ein Hund".to_string());
        let tok = graph.add_token(Some("s1_1"), 0, 3, vec![Annotation::new("pos", "ART")]);
        let np = graph.add_structure(Some("s1_500"), Vec::new());
        graph.add_relation(
            RelationKind::Dominance,
            np,
            tok,
            Some("prim".to_string()),
            vec![Annotation::new("label", "NK")],
        );

        assert_eq!(graph.tokens().count(), 1);
        assert_eq!(graph.structures().count(), 1);
        assert_eq!(graph.token_text(tok), Some("Ein"));
        assert_eq!(graph.token_text(np), None);
        assert_eq!(graph.node_by_name("s1_500").map(|n| n.id), Some(np));
        assert_eq!(graph.incoming(tok).count(), 1);
        assert_eq!(graph.relations_of_kind(RelationKind::Pointing).count(), 0);
    }

    #[test]
    fn test_add_keeps_annotations() {
        let mut graph = DocumentGraph::new("doc1");
        let tok = graph.add_token(Some("s1_1"), 0, 3, vec![Annotation::new("pos", "ART")]);
        let np = graph.add_structure(Some("s1_500"), vec![Annotation::new("cat", "NP")]);
        let index = graph.add_relation(
            RelationKind::Dominance,
            np,
            tok,
            None,
            vec![Annotation::new("label", "NK")],
        );

        assert_eq!(graph.node(tok).and_then(|n| n.annotation("pos")), Some("ART"));
        assert_eq!(graph.node(np).and_then(|n| n.annotation("cat")), Some("NP"));
        assert_eq!(graph.relations()[index].annotation("label"), Some("NK"));
    }
}
