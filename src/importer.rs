//! Corpus import pipeline
//!
//! Drives the two stages over a corpus path:
//! - corpus-structure import: find the corpus files and decide which document
//!   lives where, splitting files when the configuration asks for it
//! - mapping: load each document's fragment and map it to a `DocumentGraph`
//!
//! Structure import fails as a whole on unreadable or malformed input. Mapping
//! failures are reported per document and never stop the other documents.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, MappingConfig};
use crate::graph::DocumentGraph;
use crate::mapper::{MappingError, TigerMapper};
use crate::splitter::{
    FileSink, FragmentSink, MemorySink, ResourceLocation, ResourceTable, SegmentSplitter,
    SplitError, SplitReport,
};
use crate::tigerxml::ReadError;

/// File endings recognized as TigerXML corpora, each optionally followed by `.gz`
pub const CORPUS_FILE_ENDINGS: &[&str] = &["xml", "tiger2", "tigerxml", "tig"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Invalid corpus file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Corpus path {} does not exist", .0.display())]
    MissingCorpusPath(PathBuf),

    #[error("Unknown document '{0}'")]
    UnknownDocument(String),

    #[error("Failed to create a temporary directory for fragments: {0}")]
    TempDir(#[source] std::io::Error),
}

/// Where split fragments are kept until they are mapped.
/// Fragments go to disk by default so that memory use does not grow with
/// the size of the corpus file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FragmentStorage {
    /// Parsed corpora held in memory; only for small corpora
    InMemory,
    /// XML files in a temporary directory removed with the `CorpusStructure`
    #[default]
    TempDir,
    /// XML files in the given directory, left in place
    Directory(PathBuf),
}

/// Find the corpus files below `path`, in sorted order.
/// A path naming a file is returned as is.
pub fn discover_corpus_files(path: &Path) -> Result<Vec<PathBuf>, ImportError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(ImportError::MissingCorpusPath(path.to_path_buf()));
    }

    let base = glob::Pattern::escape(&path.to_string_lossy());
    let mut files = Vec::new();
    for ending in CORPUS_FILE_ENDINGS {
        for suffix in [ending.to_string(), format!("{ending}.gz")] {
            let pattern = format!("{base}/**/*.{suffix}");
            let paths = glob::glob(&pattern).map_err(|source| ImportError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            files.extend(paths.filter_map(Result::ok).filter(|p| p.is_file()));
        }
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        warn!("No corpus files found in {}", path.display());
    }
    Ok(files)
}

/// Document id for a whole corpus file: its name without corpus endings
pub fn document_id_for_file(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    let stem = CORPUS_FILE_ENDINGS
        .iter()
        .find_map(|ending| name.strip_suffix(&format!(".{ending}")))
        .unwrap_or(name);
    stem.to_string()
}

/// Documents of a corpus and where their fragments are
#[derive(Debug)]
pub struct CorpusStructure {
    resources: ResourceTable,
    reports: Vec<(PathBuf, SplitReport)>,
    /// Keeps temporary fragment files alive
    _temp_dir: Option<TempDir>,
}

impl CorpusStructure {
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.ids()
    }

    pub fn location(&self, document_id: &str) -> Option<&ResourceLocation> {
        self.resources.get(document_id)
    }

    /// Split reports per corpus file; empty when no splitting happened
    pub fn reports(&self) -> &[(PathBuf, SplitReport)] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Imports TigerXML corpora into document graphs
#[derive(Debug, Clone, Default)]
pub struct TigerImporter {
    config: MappingConfig,
    storage: FragmentStorage,
}

impl TigerImporter {
    pub fn new(config: MappingConfig) -> Self {
        Self {
            config,
            storage: FragmentStorage::default(),
        }
    }

    /// Build an importer from `.properties` text
    pub fn from_properties_str(text: &str) -> Result<Self, ImportError> {
        Ok(Self::new(MappingConfig::from_properties_str(text)?))
    }

    pub fn with_storage(mut self, storage: FragmentStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Discover the documents of the corpus at `path`
    pub fn import_corpus_structure(&self, path: &Path) -> Result<CorpusStructure, ImportError> {
        let files = discover_corpus_files(path)?;
        let mut resources = ResourceTable::new();
        let mut reports = Vec::new();
        let mut temp_dir = None;

        if !self.config.needs_splitting() {
            for file in files {
                let wanted = document_id_for_file(&file);
                let document_id = resources.unique_id(&wanted);
                if document_id != wanted {
                    warn!(
                        "Document id '{}' is already taken, using '{}' for {}",
                        wanted,
                        document_id,
                        file.display()
                    );
                }
                resources.insert(document_id, ResourceLocation::File(file));
            }
        } else {
            let mut sink: Box<dyn FragmentSink> = match &self.storage {
                FragmentStorage::InMemory => Box::new(MemorySink),
                FragmentStorage::TempDir => {
                    let dir = tempfile::tempdir().map_err(ImportError::TempDir)?;
                    let sink = FileSink::new(dir.path());
                    temp_dir = Some(dir);
                    Box::new(sink)
                }
                FragmentStorage::Directory(dir) => Box::new(FileSink::new(dir.clone())),
            };
            let splitter = SegmentSplitter::new(&self.config);
            for file in files {
                let report = splitter.split_file(&file, sink.as_mut(), &mut resources)?;
                reports.push((file, report));
            }
        }

        info!(
            "Found {} documents in {}",
            resources.len(),
            path.display()
        );
        Ok(CorpusStructure {
            resources,
            reports,
            _temp_dir: temp_dir,
        })
    }

    /// Load and map a single document
    pub fn map_document(
        &self,
        structure: &CorpusStructure,
        document_id: &str,
    ) -> Result<DocumentGraph, ImportError> {
        let location = structure
            .location(document_id)
            .ok_or_else(|| ImportError::UnknownDocument(document_id.to_string()))?;
        let corpus = location.load()?;
        let document = TigerMapper::new(&self.config).map_corpus(document_id, &corpus)?;
        Ok(document)
    }

    /// Map every document in order, one result per document
    pub fn map_all<'a>(
        &'a self,
        structure: &'a CorpusStructure,
    ) -> impl Iterator<Item = (String, Result<DocumentGraph, ImportError>)> + 'a {
        structure.document_ids().map(move |document_id| {
            let result = self.map_document(structure, document_id);
            if let Err(err) = &result {
                warn!("Document '{}' failed: {}", document_id, err);
            }
            (document_id.to_string(), result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitHeuristic;
    use std::fs;

    const TWO_SENTENCES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<corpus id="mini">
  <head><meta><name>mini</name></meta></head>
  <body>
    <s id="s1">
      <graph root="s1_500">
        <terminals>
          <t id="s1_1" word="Ein" pos="ART"/>
          <t id="s1_2" word="Hund" pos="NN"/>
        </terminals>
        <nonterminals>
          <nt id="s1_500" cat="NP">
            <edge label="NK" idref="s1_1"/>
            <edge label="NK" idref="s1_2"/>
          </nt>
        </nonterminals>
      </graph>
    </s>
    <s id="s2">
      <graph root="s2_500">
        <terminals>
          <t id="s2_1" word="bellt" pos="VVFIN"/>
        </terminals>
        <nonterminals>
          <nt id="s2_500" cat="S">
            <edge label="HD" idref="s2_1"/>
            <edge label="SB" idref="s1_500"/>
          </nt>
        </nonterminals>
      </graph>
    </s>
  </body>
</corpus>
"#;

    fn write_corpus(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_discover_corpus_files() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "b.xml", TWO_SENTENCES);
        write_corpus(dir.path(), "sub/a.tiger2", TWO_SENTENCES);
        write_corpus(dir.path(), "notes.txt", "not a corpus");

        let files = discover_corpus_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("b.xml"), dir.path().join("sub/a.tiger2")]);

        let single = discover_corpus_files(&dir.path().join("b.xml")).unwrap();
        assert_eq!(single.len(), 1);

        let missing = discover_corpus_files(&dir.path().join("nope"));
        assert!(matches!(missing, Err(ImportError::MissingCorpusPath(_))));
    }

    #[test]
    fn test_document_id_for_file() {
        assert_eq!(document_id_for_file(Path::new("/c/tiger_release.xml")), "tiger_release");
        assert_eq!(document_id_for_file(Path::new("c/part.tiger2.gz")), "part");
        assert_eq!(document_id_for_file(Path::new("c/plain")), "plain");
    }

    #[test]
    fn test_whole_file_documents() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "mini.xml", TWO_SENTENCES);
        let importer = TigerImporter::default();

        let structure = importer.import_corpus_structure(dir.path()).unwrap();
        assert_eq!(structure.document_ids().collect::<Vec<_>>(), vec!["mini"]);
        assert!(structure.reports().is_empty());

        // cross-graph edge s2_500 -> s1_500 does not resolve
        let result = importer.map_document(&structure, "mini");
        assert!(matches!(result, Err(ImportError::Mapping(_))));
    }

    #[test]
    fn test_failed_document_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "mini.xml", TWO_SENTENCES);
        let config = MappingConfig::new().with_split_heuristic(SplitHeuristic::Segment);
        let importer = TigerImporter::new(config);

        let structure = importer.import_corpus_structure(dir.path()).unwrap();
        let results: Vec<_> = importer.map_all(&structure).collect();

        assert_eq!(results.len(), 2);
        let first = results[0].1.as_ref().unwrap();
        assert_eq!(first.text.text(), "Ein Hund");
        assert_eq!(first.name.as_deref(), Some("mini"));
        assert!(matches!(results[1].1, Err(ImportError::Mapping(_))));
    }

    #[test]
    fn test_default_split_writes_fragment_files() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "mini.xml", TWO_SENTENCES);
        let config = MappingConfig::new().with_split_heuristic(SplitHeuristic::Segment);
        let importer = TigerImporter::new(config);

        let structure = importer.import_corpus_structure(dir.path()).unwrap();
        assert_eq!(structure.len(), 2);
        assert!(
            structure
                .resources()
                .iter()
                .all(|(_, location)| matches!(location, ResourceLocation::File(_)))
        );
    }

    #[test]
    fn test_in_memory_storage() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "mini.xml", TWO_SENTENCES);
        let config = MappingConfig::new().with_split_heuristic(SplitHeuristic::Segment);
        let importer = TigerImporter::new(config).with_storage(FragmentStorage::InMemory);

        let structure = importer.import_corpus_structure(dir.path()).unwrap();
        assert!(matches!(structure.location("s1"), Some(ResourceLocation::Memory(_))));
        let document = importer.map_document(&structure, "s1").unwrap();
        assert_eq!(document.text.text(), "Ein Hund");
    }

    #[test]
    fn test_temp_dir_storage() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "mini.xml", TWO_SENTENCES);
        let config = MappingConfig::new().with_split_heuristic(SplitHeuristic::Segment);
        let importer = TigerImporter::new(config).with_storage(FragmentStorage::TempDir);

        let structure = importer.import_corpus_structure(dir.path()).unwrap();
        let fragment = match structure.location("s1") {
            Some(ResourceLocation::File(path)) => path.clone(),
            other => panic!("expected a fragment file, got {other:?}"),
        };
        assert!(fragment.exists());
        let document = importer.map_document(&structure, "s1").unwrap();
        assert_eq!(document.tokens().count(), 2);

        drop(structure);
        assert!(!fragment.exists());
    }

    #[test]
    fn test_directory_storage() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_corpus(input.path(), "mini.xml", TWO_SENTENCES);
        let config = MappingConfig::new().with_split_heuristic(SplitHeuristic::Segment);
        let importer = TigerImporter::new(config)
            .with_storage(FragmentStorage::Directory(output.path().join("fragments")));

        let structure = importer.import_corpus_structure(input.path()).unwrap();
        assert_eq!(structure.len(), 2);
        assert!(output.path().join("fragments/s1.xml").exists());
        assert!(output.path().join("fragments/s2.xml").exists());
    }

    #[test]
    fn test_unknown_document() {
        let importer = TigerImporter::default();
        let dir = tempfile::tempdir().unwrap();
        let structure = importer.import_corpus_structure(dir.path()).unwrap();

        assert!(structure.is_empty());
        let err = importer.map_document(&structure, "ghost").unwrap_err();
        assert!(matches!(err, ImportError::UnknownDocument(id) if id == "ghost"));
    }

    #[test]
    fn test_malformed_file_aborts_structure_import() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "bad.xml", "<corpus><body><s id=\"s1\"></body>");
        let config = MappingConfig::new().with_split_heuristic(SplitHeuristic::Segment);
        let importer = TigerImporter::new(config);

        let err = importer.import_corpus_structure(dir.path()).unwrap_err();
        assert!(matches!(err, ImportError::Split(SplitError::Xml { .. })));
    }

    #[test]
    fn test_importer_from_properties() {
        let importer = TigerImporter::from_properties_str("splitHeuristic=segment\n").unwrap();
        assert_eq!(importer.config().split_heuristic, SplitHeuristic::Segment);

        let err = TigerImporter::from_properties_str("edge.type=broken\n").unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }
}
