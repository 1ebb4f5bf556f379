//! Source-side treebank model
//!
//! In-memory representation of one parsed TigerXML/tiger2 corpus: segments
//! holding graphs, graphs holding terminals, non-terminals and edges.
//! Edges refer to their endpoints by node id; resolution happens per graph.

/// A name/value pair attached to a node, edge or output element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}

impl Annotation {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

fn find_annotation<'a>(annotations: &'a [Annotation], name: &str) -> Option<&'a str> {
    annotations
        .iter()
        .find(|anno| anno.name == name)
        .map(|anno| anno.value.as_str())
}

/// A leaf node carrying one word of the primary text
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    pub id: String,
    pub word: String,
    pub annotations: Vec<Annotation>,
}

impl Terminal {
    pub fn new(id: &str, word: &str) -> Self {
        Self {
            id: id.to_string(),
            word: word.to_string(),
            annotations: Vec::new(),
        }
    }

    /// Builder-style helper to attach an annotation
    pub fn with_annotation(mut self, name: &str, value: &str) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        find_annotation(&self.annotations, name)
    }
}

/// An internal syntax node; owns no text
#[derive(Debug, Clone, PartialEq)]
pub struct NonTerminal {
    pub id: String,
    pub annotations: Vec<Annotation>,
}

impl NonTerminal {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            annotations: Vec::new(),
        }
    }

    pub fn with_annotation(mut self, name: &str, value: &str) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        find_annotation(&self.annotations, name)
    }
}

/// Directed, typed link between two syntactic nodes of the same graph
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    pub edge_type: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl Edge {
    pub fn new(source: &str, target: &str, edge_type: &str) -> Self {
        Self {
            id: None,
            source: source.to_string(),
            target: target.to_string(),
            edge_type: if edge_type.is_empty() {
                None
            } else {
                Some(edge_type.to_string())
            },
            annotations: Vec::new(),
        }
    }

    pub fn with_annotation(mut self, name: &str, value: &str) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        find_annotation(&self.annotations, name)
    }

    /// Human-readable identification used in error messages
    pub fn describe(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!(
                "{} -[{}]-> {}",
                self.source,
                self.edge_type.as_deref().unwrap_or(""),
                self.target
            ),
        }
    }
}

/// One sentence tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub id: Option<String>,
    pub root: Option<String>,
    pub terminals: Vec<Terminal>,
    pub nonterminals: Vec<NonTerminal>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A named unit holding one or more alternative graphs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    pub id: String,
    pub graphs: Vec<Graph>,
}

impl Segment {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            graphs: Vec::new(),
        }
    }

    pub fn with_graph(mut self, graph: Graph) -> Self {
        self.graphs.push(graph);
        self
    }
}

/// Corpus-level metadata from `<head><meta>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusMeta {
    pub name: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub history: Option<String>,
}

impl CorpusMeta {
    /// Meta fields in a fixed order, skipping unset ones. The name is excluded;
    /// it becomes the document's display name instead.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("author", self.author.as_deref()),
            ("date", self.date.as_deref()),
            ("description", self.description.as_deref()),
            ("format", self.format.as_deref()),
            ("history", self.history.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
    }

    pub fn set(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "name" => &mut self.name,
            "author" => &mut self.author,
            "date" => &mut self.date,
            "description" => &mut self.description,
            "format" => &mut self.format,
            "history" => &mut self.history,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Top-level treebank container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    pub id: Option<String>,
    pub meta: CorpusMeta,
    pub segments: Vec<Segment>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_lookup() {
        let t = Terminal::new("t1", "lief")
            .with_annotation("pos", "VVFIN")
            .with_annotation("morph", "3.Sg.Past.Ind");
        assert_eq!(t.annotation("pos"), Some("VVFIN"));
        assert_eq!(t.annotation("morph"), Some("3.Sg.Past.Ind"));
        assert_eq!(t.annotation("lemma"), None);

        let nt = NonTerminal::new("n1").with_annotation("cat", "NP");
        assert_eq!(nt.annotation("cat"), Some("NP"));
    }

    #[test]
    fn test_corpus_builders() {
        let mut graph = Graph::new();
        graph.terminals.push(Terminal::new("s1_1", "Der"));
        graph.edges.push(Edge::new("s1_500", "s1_1", "prim").with_annotation("label", "NK"));
        let corpus = Corpus::new().with_segment(Segment::new("s1").with_graph(graph));

        assert_eq!(corpus.segments[0].graphs[0].terminals[0].word, "Der");
        assert_eq!(corpus.segments[0].graphs[0].edges[0].annotation("label"), Some("NK"));
    }

    #[test]
    fn test_meta_fields_skip_name_and_unset() {
        let mut meta = CorpusMeta::default();
        assert!(meta.set("name", "tiger".to_string()));
        assert!(meta.set("author", "someone".to_string()));
        assert!(!meta.set("license", "cc".to_string()));

        let fields: Vec<_> = meta.fields().collect();
        assert_eq!(fields, vec![("author", "someone")]);
    }

    #[test]
    fn test_edge_describe() {
        let edge = Edge::new("a", "b", "secedge");
        assert_eq!(edge.describe(), "a -[secedge]-> b");
        assert_eq!(Edge::new("a", "b", "").edge_type, None);
    }
}
