//! Tigermap: TigerXML treebanks as annotation graphs
//!
//! Streams TigerXML/tiger2 corpora, cuts them into documents and maps each
//! document's syntax trees onto tokens, spans, structures and relations.

pub mod config; // Mapping configuration and property parsing
pub mod graph; // Output annotation graph
pub mod importer; // Corpus discovery and the import pipeline
pub mod mapper; // Tree-to-graph mapping
pub mod splitter; // Streaming segment splitter
pub mod tiger; // Source treebank model
pub mod tigerxml; // TigerXML / tiger2 reader

// Re-exports for convenience
pub use config::{ConfigError, MappingConfig, RenamingTable, SplitHeuristic};
pub use graph::{DocumentGraph, Node, NodeId, NodeKind, OutputNodeKind, Relation, RelationKind};
pub use importer::{CorpusStructure, FragmentStorage, ImportError, TigerImporter};
pub use mapper::{Classification, MappingError, TigerMapper, classify};
pub use splitter::{
    DocumentFragment, FileSink, FragmentSink, MemorySink, PendingSegment, ResourceLocation,
    ResourceTable, SegmentSplitter, SplitError, SplitReport,
};
pub use tiger::{Annotation, Corpus, Edge, Graph, NonTerminal, Segment, Terminal};
pub use tigerxml::{ReadError, read_corpus_file, read_corpus_str};
