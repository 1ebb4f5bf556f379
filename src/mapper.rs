//! Tree-to-graph mapping
//!
//! Turns one parsed `Corpus` into one `DocumentGraph`. Terminals become
//! tokens over a shared text buffer, non-terminals become structures and
//! edges become dominance, pointing or spanning relations depending on the
//! kinds of their endpoints.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MappingConfig;
use crate::graph::{DocumentGraph, NodeId, OutputNodeKind, RelationKind};
use crate::tiger::{Annotation, Corpus, Edge, Graph};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Document '{document}': edge {edge} has unknown {endpoint} node '{node}'")]
    UnresolvedEndpoint {
        document: String,
        edge: String,
        endpoint: &'static str,
        node: String,
    },
}

/// Relation kind chosen for an edge, and whether its endpoints must be swapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: RelationKind,
    pub swap: bool,
}

impl Classification {
    fn keep(kind: RelationKind) -> Self {
        Self { kind, swap: false }
    }
}

/// Decide the relation kind for an edge between two output nodes.
///
/// `requested` is the kind configured for the edge's type, if any. Rules are
/// tried in order:
/// 1. a token source gives a pointing relation, unless dominance is
///    requested; dominance is then kept but the endpoints are swapped, as a
///    dominance relation may not start at a token
/// 2. a span pointing at a token gives a spanning relation, unless pointing
///    is requested
/// 3. a structure source gives dominance, unless pointing is requested
/// 4. anything else is pointing
pub fn classify(
    source: OutputNodeKind,
    target: OutputNodeKind,
    requested: Option<RelationKind>,
) -> Classification {
    use OutputNodeKind::*;

    match (source, target) {
        (Token, _) => match requested {
            Some(RelationKind::Dominance) => Classification {
                kind: RelationKind::Dominance,
                swap: true,
            },
            _ => Classification::keep(RelationKind::Pointing),
        },
        (Span, Token) => match requested {
            Some(RelationKind::Pointing) => Classification::keep(RelationKind::Pointing),
            _ => Classification::keep(RelationKind::Spanning),
        },
        (Structure, _) => match requested {
            Some(RelationKind::Pointing) => Classification::keep(RelationKind::Pointing),
            _ => Classification::keep(RelationKind::Dominance),
        },
        _ => Classification::keep(RelationKind::Pointing),
    }
}

/// Maps corpora to document graphs under one configuration
#[derive(Debug, Clone, Copy)]
pub struct TigerMapper<'c> {
    config: &'c MappingConfig,
}

impl<'c> TigerMapper<'c> {
    pub fn new(config: &'c MappingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &'c MappingConfig {
        self.config
    }

    /// Build the graph of one document from its corpus fragment
    pub fn map_corpus(
        &self,
        document_id: &str,
        corpus: &Corpus,
    ) -> Result<DocumentGraph, MappingError> {
        let mut run = MappingRun::new(self.config, document_id);
        run.map_meta(corpus);

        let mut ordinal = 0;
        for segment in &corpus.segments {
            let mut segment_tokens = Vec::new();
            for graph in &segment.graphs {
                segment_tokens.extend(run.map_terminals(ordinal, graph));
                run.map_nonterminals(ordinal, graph);
                run.map_edges(ordinal, graph)?;
                ordinal += 1;
            }
            if self.config.create_span_per_segment && !segment_tokens.is_empty() {
                run.document.add_span(segment_tokens);
            }
        }

        Ok(run.finish())
    }
}

/// State owned by a single `map_corpus` call
struct MappingRun<'c, 's> {
    config: &'c MappingConfig,
    document: DocumentGraph,
    /// (graph ordinal, source node id) -> output node and its kind
    identity: FxHashMap<(usize, &'s str), (NodeId, OutputNodeKind)>,
    text: String,
    /// Length of `text` in characters
    text_len: usize,
    separator_len: usize,
}

impl<'c, 's> MappingRun<'c, 's> {
    fn new(config: &'c MappingConfig, document_id: &str) -> Self {
        Self {
            config,
            document: DocumentGraph::new(document_id),
            identity: FxHashMap::default(),
            text: String::new(),
            text_len: 0,
            separator_len: config.separator.chars().count(),
        }
    }

    fn map_meta(&mut self, corpus: &Corpus) {
        self.document.meta = corpus
            .meta
            .fields()
            .map(|(name, value)| Annotation::new(name, value))
            .collect();
        self.document.name = corpus.meta.name.clone();
    }

    fn renamed(&self, annotations: &[Annotation]) -> Vec<Annotation> {
        annotations
            .iter()
            .map(|anno| Annotation {
                name: self.config.annotation_renaming.rename(&anno.name).to_string(),
                value: anno.value.clone(),
            })
            .collect()
    }

    fn map_terminals(&mut self, ordinal: usize, graph: &'s Graph) -> Vec<NodeId> {
        let mut tokens = Vec::with_capacity(graph.terminals.len());
        for terminal in &graph.terminals {
            if !self.text.is_empty() {
                self.text.push_str(&self.config.separator);
                self.text_len += self.separator_len;
            }
            let start = self.text_len;
            self.text.push_str(&terminal.word);
            self.text_len += terminal.word.chars().count();

            let annotations = self.renamed(&terminal.annotations);
            let token = self.document.add_token(
                Some(terminal.id.as_str()),
                start,
                self.text_len,
                annotations,
            );
            self.identity.insert(
                (ordinal, terminal.id.as_str()),
                (token, OutputNodeKind::Token),
            );
            tokens.push(token);
        }
        tokens
    }

    fn map_nonterminals(&mut self, ordinal: usize, graph: &'s Graph) {
        for nonterminal in &graph.nonterminals {
            let annotations = self.renamed(&nonterminal.annotations);
            let structure = self
                .document
                .add_structure(Some(nonterminal.id.as_str()), annotations);
            self.identity.insert(
                (ordinal, nonterminal.id.as_str()),
                (structure, OutputNodeKind::Structure),
            );
        }
    }

    fn resolve(
        &self,
        ordinal: usize,
        edge: &Edge,
        node: &'s str,
        endpoint: &'static str,
    ) -> Result<(NodeId, OutputNodeKind), MappingError> {
        self.identity
            .get(&(ordinal, node))
            .copied()
            .ok_or_else(|| MappingError::UnresolvedEndpoint {
                document: self.document.id.clone(),
                edge: edge.describe(),
                endpoint,
                node: node.to_string(),
            })
    }

    fn map_edges(&mut self, ordinal: usize, graph: &'s Graph) -> Result<(), MappingError> {
        for edge in &graph.edges {
            let edge_type = edge.edge_type.as_deref();
            let mut source = self.resolve(ordinal, edge, &edge.source, "source")?;
            let mut target = self.resolve(ordinal, edge, &edge.target, "target")?;
            if self.config.is_reversed(edge_type) {
                std::mem::swap(&mut source, &mut target);
            }

            let classification = classify(
                source.1,
                target.1,
                self.config.relation_kind_for(edge_type),
            );
            if classification.swap {
                warn!(
                    "Document '{}': edge {} would make a token dominate; reversing it",
                    self.document.id,
                    edge.describe()
                );
                std::mem::swap(&mut source, &mut target);
            }

            let rel_type = edge_type
                .map(|t| self.config.edge_type_renaming.rename(t))
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            let annotations = self.renamed(&edge.annotations);
            self.document.add_relation(
                classification.kind,
                source.0,
                target.0,
                rel_type,
                annotations,
            );
        }
        Ok(())
    }

    fn finish(mut self) -> DocumentGraph {
        debug!(
            "Mapped document '{}': {} nodes, {} relations, {} characters",
            self.document.id,
            self.document.nodes().len(),
            self.document.relations().len(),
            self.text_len
        );
        self.document.text.set_text(self.text);
        self.document
    }
}
