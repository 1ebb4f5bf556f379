//! Streaming segment splitter
//!
//! Walks a TigerXML body forward-only and cuts its segment sequence into
//! per-document groups. Each segment is buffered as a small list of XML
//! events; the corpus prolog (`<corpus>` start, `<head>`, `<body>` start) is
//! captured once and replayed in front of every emitted fragment, so each
//! fragment is a complete corpus document on its own.
//!
//! Only the segments of the group currently being collected are kept in
//! memory. The segment that opens the next document is handed from one read
//! step to the next instead of being stored on the splitter.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, info, warn};
use xml::name::OwnedName;
use xml::namespace::Namespace;
use xml::reader::{EventReader, XmlEvent};
use xml::writer::EmitterConfig;

use crate::config::{CONTINUATION_MARKER, MappingConfig, SplitHeuristic};
use crate::tiger::Corpus;
use crate::tigerxml::{self, ReadError};

/// Root id suffix of graphs whose root is a virtual node
pub const VIRTUAL_ROOT_SUFFIX: &str = "_VROOT";

/// Final word that marks a virtual-root segment as continuing
pub const CONTINUATION_WORD: &str = "/";

#[derive(Debug, Error)]
pub enum SplitError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("Malformed XML in {origin}: {source}")]
    Xml {
        origin: String,
        source: xml::reader::Error,
    },

    #[error("Failed to write fragment of document '{document}': {source}")]
    Write {
        document: String,
        source: xml::writer::Error,
    },

    #[error("Failed to store fragment at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One `<segment>` read from the stream, kept as raw events
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSegment {
    pub id: String,
    /// `root` attribute of the segment's first graph
    pub root: Option<String>,
    /// Word of the segment's last terminal
    pub last_word: Option<String>,
    events: Vec<XmlEvent>,
}

impl PendingSegment {
    /// A segment without buffered content, for boundary decisions
    pub fn new(id: &str, root: Option<&str>, last_word: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            root: root.map(str::to_string),
            last_word: last_word.map(str::to_string),
            events: Vec::new(),
        }
    }

    pub fn has_virtual_root(&self) -> bool {
        self.root
            .as_deref()
            .is_some_and(|root| root.ends_with(VIRTUAL_ROOT_SUFFIX))
    }

    /// Virtual-root segment whose last word does not mark a continuation
    pub fn closes_virtual_group(&self) -> bool {
        self.has_virtual_root() && self.last_word.as_deref() != Some(CONTINUATION_WORD)
    }

    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }
}

/// Corpus prolog shared by all fragments of one input file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusTemplate {
    prolog: Vec<XmlEvent>,
    /// Elements still open at the end of the prolog, outermost first
    open: Vec<OwnedName>,
}

impl CorpusTemplate {
    fn synthesized() -> Self {
        let start = |name: &str| XmlEvent::StartElement {
            name: OwnedName::local(name),
            attributes: Vec::new(),
            namespace: Namespace::empty(),
        };
        Self {
            prolog: vec![
                start(tigerxml::ELEMENT_CORPUS),
                start(tigerxml::ELEMENT_BODY),
            ],
            open: vec![
                OwnedName::local(tigerxml::ELEMENT_CORPUS),
                OwnedName::local(tigerxml::ELEMENT_BODY),
            ],
        }
    }

    fn from_prolog(prolog: Vec<XmlEvent>, open: Vec<OwnedName>) -> Self {
        let has_root = prolog
            .iter()
            .any(|e| matches!(e, XmlEvent::StartElement { .. }));
        if has_root {
            Self { prolog, open }
        } else {
            Self::synthesized()
        }
    }

    fn closing_events(&self) -> impl Iterator<Item = XmlEvent> + '_ {
        self.open
            .iter()
            .rev()
            .map(|name| XmlEvent::EndElement { name: name.clone() })
    }
}

/// The segments of one output document together with the corpus prolog
#[derive(Debug, Clone)]
pub struct DocumentFragment {
    pub document_id: String,
    template: Arc<CorpusTemplate>,
    segments: Vec<PendingSegment>,
}

impl DocumentFragment {
    pub fn segment_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Full event sequence of the fragment as a standalone document
    pub fn events(&self) -> impl Iterator<Item = XmlEvent> + '_ {
        self.template
            .prolog
            .iter()
            .chain(self.segments.iter().flat_map(|s| s.events.iter()))
            .cloned()
            .chain(self.template.closing_events())
    }

    pub fn write_xml<W: Write>(&self, output: W) -> Result<(), xml::writer::Error> {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(output);
        for event in self.events() {
            if let Some(event) = event.as_writer_event() {
                writer.write(event)?;
            }
        }
        Ok(())
    }

    /// Parse the fragment without going through serialized XML
    pub fn to_corpus(&self) -> Result<Corpus, ReadError> {
        let origin = format!("fragment of document '{}'", self.document_id);
        tigerxml::read_corpus_events(self.events().map(Ok), &origin)
    }
}

/// Where the fragment of a document can be loaded from
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceLocation {
    File(PathBuf),
    Memory(Box<Corpus>),
}

impl ResourceLocation {
    pub fn load(&self) -> Result<Cow<'_, Corpus>, ReadError> {
        match self {
            ResourceLocation::File(path) => tigerxml::read_corpus_file(path).map(Cow::Owned),
            ResourceLocation::Memory(corpus) => Ok(Cow::Borrowed(corpus)),
        }
    }
}

/// Document id to resource association, in insertion order
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    entries: Vec<(String, ResourceLocation)>,
    index: FxHashMap<String, usize>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `wanted` if unused, otherwise the first free `wanted_N` for N >= 2
    pub fn unique_id(&self, wanted: &str) -> String {
        if !self.index.contains_key(wanted) {
            return wanted.to_string();
        }
        (2..)
            .map(|n| format!("{wanted}_{n}"))
            .find(|candidate| !self.index.contains_key(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }

    /// Register a document; an existing entry with the same id is replaced
    pub fn insert(&mut self, document_id: String, location: ResourceLocation) {
        match self.index.get(&document_id) {
            Some(&i) => self.entries[i].1 = location,
            None => {
                self.index.insert(document_id.clone(), self.entries.len());
                self.entries.push((document_id, location));
            }
        }
    }

    pub fn get(&self, document_id: &str) -> Option<&ResourceLocation> {
        self.index.get(document_id).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.index.contains_key(document_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceLocation)> {
        self.entries.iter().map(|(id, loc)| (id.as_str(), loc))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Destination for finished fragments
pub trait FragmentSink {
    fn store(&mut self, fragment: &DocumentFragment) -> Result<ResourceLocation, SplitError>;
}

/// Parses fragments straight into `Corpus` values
#[derive(Debug, Default)]
pub struct MemorySink;

impl FragmentSink for MemorySink {
    fn store(&mut self, fragment: &DocumentFragment) -> Result<ResourceLocation, SplitError> {
        Ok(ResourceLocation::Memory(Box::new(fragment.to_corpus()?)))
    }
}

/// Writes each fragment as `<document id>.xml` into a directory.
/// Existing files are never overwritten; the name gets a numeric suffix instead.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    used: FxHashSet<String>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            used: FxHashSet::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&mut self, document_id: &str) -> String {
        let stem: String = document_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let mut name = format!("{stem}.xml");
        let mut n = 2;
        while self.used.contains(&name) || self.dir.join(&name).exists() {
            name = format!("{stem}_{n}.xml");
            n += 1;
        }
        self.used.insert(name.clone());
        name
    }
}

impl FragmentSink for FileSink {
    fn store(&mut self, fragment: &DocumentFragment) -> Result<ResourceLocation, SplitError> {
        fs::create_dir_all(&self.dir).map_err(|source| SplitError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let file_name = self.file_name(&fragment.document_id);
        let path = self.dir.join(file_name);
        let io_error = |source| SplitError::Io {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        fragment
            .write_xml(&mut writer)
            .map_err(|source| SplitError::Write {
                document: fragment.document_id.clone(),
                source,
            })?;
        writer.flush().map_err(io_error)?;
        Ok(ResourceLocation::File(path))
    }
}

/// Outcome of splitting one input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Document ids in the order they were emitted
    pub documents: Vec<String>,
    pub skipped_segments: usize,
    pub warnings: Vec<String>,
}

/// Forward-only reader yielding the segments of a TigerXML body
pub struct SegmentStream<R: Read> {
    reader: EventReader<R>,
    origin: String,
    prolog: Vec<XmlEvent>,
    open: Vec<OwnedName>,
    template: Option<Arc<CorpusTemplate>>,
    skipped: usize,
    warnings: Vec<String>,
    finished: bool,
}

impl<R: Read> SegmentStream<R> {
    pub fn new(input: R, origin: &str) -> Self {
        Self {
            reader: EventReader::new_with_config(input, tigerxml::parser_config()),
            origin: origin.to_string(),
            prolog: Vec::new(),
            open: Vec::new(),
            template: None,
            skipped: 0,
            warnings: Vec::new(),
            finished: false,
        }
    }

    /// The prolog seen before the first segment
    pub fn template(&self) -> Arc<CorpusTemplate> {
        match &self.template {
            Some(template) => Arc::clone(template),
            None => Arc::new(CorpusTemplate::from_prolog(
                self.prolog.clone(),
                self.open.clone(),
            )),
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn next_event(&mut self) -> Result<XmlEvent, SplitError> {
        self.reader.next().map_err(|source| SplitError::Xml {
            origin: self.origin.clone(),
            source,
        })
    }

    fn seal_template(&mut self) {
        if self.template.is_none() {
            let prolog = std::mem::take(&mut self.prolog);
            let open = std::mem::take(&mut self.open);
            self.template = Some(Arc::new(CorpusTemplate::from_prolog(prolog, open)));
        }
    }

    fn record_prolog(&mut self, event: XmlEvent) {
        if self.template.is_some() {
            // closing tags after the last segment are regenerated per fragment
            return;
        }
        match &event {
            XmlEvent::StartElement { name, .. } => self.open.push(name.clone()),
            XmlEvent::EndElement { .. } => {
                self.open.pop();
            }
            XmlEvent::Characters(_) | XmlEvent::CData(_) => {}
            _ => return,
        }
        self.prolog.push(event);
    }

    fn next_segment(&mut self) -> Result<Option<PendingSegment>, SplitError> {
        loop {
            let event = self.next_event()?;
            let segment_id = match &event {
                XmlEvent::EndDocument => return Ok(None),
                XmlEvent::StartElement {
                    name, attributes, ..
                } if tigerxml::is_segment(&name.local_name) => {
                    Some(tigerxml::attribute(attributes, tigerxml::ATTRIBUTE_ID).map(str::to_string))
                }
                _ => None,
            };
            match segment_id {
                Some(Some(id)) => {
                    self.seal_template();
                    return self.read_segment(id, event).map(Some);
                }
                Some(None) => {
                    self.seal_template();
                    self.skip_segment()?;
                }
                None => self.record_prolog(event),
            }
        }
    }

    fn read_segment(&mut self, id: String, start: XmlEvent) -> Result<PendingSegment, SplitError> {
        let mut segment = PendingSegment {
            id,
            root: None,
            last_word: None,
            events: vec![start],
        };
        let mut seen_graph = false;
        let mut depth = 1;
        while depth > 0 {
            let event = self.next_event()?;
            match &event {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    depth += 1;
                    let local_name = name.local_name.as_str();
                    if local_name == tigerxml::ELEMENT_GRAPH && !seen_graph {
                        seen_graph = true;
                        segment.root = tigerxml::attribute(attributes, tigerxml::ATTRIBUTE_ROOT)
                            .map(|root| root.trim_start_matches('#').to_string());
                    } else if tigerxml::is_terminal(local_name) {
                        segment.last_word = tigerxml::attribute(attributes, tigerxml::ATTRIBUTE_WORD)
                            .map(str::to_string);
                    }
                }
                XmlEvent::EndElement { .. } => depth -= 1,
                XmlEvent::Characters(_) | XmlEvent::CData(_) => {}
                _ => continue,
            }
            segment.events.push(event);
        }
        Ok(segment)
    }

    fn skip_segment(&mut self) -> Result<(), SplitError> {
        let message = format!(
            "Found a segment without id in {}; it will be ignored",
            self.origin
        );
        warn!("{}", message);
        self.warnings.push(message);
        self.skipped += 1;

        let mut depth = 1;
        while depth > 0 {
            match self.next_event()? {
                XmlEvent::StartElement { .. } => depth += 1,
                XmlEvent::EndElement { .. } => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for SegmentStream<R> {
    type Item = Result<PendingSegment, SplitError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_segment();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result.transpose()
    }
}

/// Segments collected for one output document
#[derive(Debug, Clone, PartialEq)]
struct SegmentGroup {
    document_id: String,
    /// Opened by a manual split ending in the continuation marker
    continued: bool,
    segments: Vec<PendingSegment>,
}

/// Cuts a TigerXML file into documents according to the configured
/// heuristic and manual splits
#[derive(Debug, Clone, Copy)]
pub struct SegmentSplitter<'c> {
    config: &'c MappingConfig,
}

impl<'c> SegmentSplitter<'c> {
    pub fn new(config: &'c MappingConfig) -> Self {
        Self { config }
    }

    /// Document id and continuation flag of a manual split keyed on `segment_id`
    pub fn manual_target(&self, segment_id: &str) -> Option<(String, bool)> {
        let value = self.config.manual_splits.get(segment_id)?;
        let continued = value.ends_with(CONTINUATION_MARKER);
        let id = value
            .strip_suffix(CONTINUATION_MARKER)
            .unwrap_or(value)
            .trim();
        let id = if id.is_empty() { segment_id } else { id };
        Some((id.to_string(), continued))
    }

    /// Whether `current` starts a new document after `previous`
    pub fn is_boundary(
        &self,
        previous: &PendingSegment,
        current: &PendingSegment,
        continued: bool,
    ) -> bool {
        if self.config.manual_splits.contains_key(&current.id) {
            return true;
        }
        if continued {
            return false;
        }
        match self.config.split_heuristic {
            SplitHeuristic::None => false,
            SplitHeuristic::Segment => true,
            SplitHeuristic::VirtualRoot => {
                previous.closes_virtual_group() && !current.has_virtual_root()
            }
        }
    }

    fn start_group(&self, first: PendingSegment) -> SegmentGroup {
        let (document_id, continued) = self
            .manual_target(&first.id)
            .unwrap_or_else(|| (first.id.clone(), false));
        SegmentGroup {
            document_id,
            continued,
            segments: vec![first],
        }
    }

    /// Collect one document's segments. `carry` is the segment that ended the
    /// previous group; the returned segment, if any, opens the next one.
    fn read_group<I>(
        &self,
        carry: Option<PendingSegment>,
        segments: &mut I,
    ) -> Result<(Option<SegmentGroup>, Option<PendingSegment>), SplitError>
    where
        I: Iterator<Item = Result<PendingSegment, SplitError>>,
    {
        let first = match carry {
            Some(segment) => segment,
            None => match segments.next().transpose()? {
                Some(segment) => segment,
                None => return Ok((None, None)),
            },
        };
        let mut group = self.start_group(first);
        for segment in segments {
            let segment = segment?;
            let boundary = group
                .segments
                .last()
                .is_some_and(|previous| self.is_boundary(previous, &segment, group.continued));
            if boundary {
                return Ok((Some(group), Some(segment)));
            }
            group.segments.push(segment);
        }
        Ok((Some(group), None))
    }

    /// Split one TigerXML stream, storing every document through `sink` and
    /// registering it in `table`. `origin` names the input in messages.
    pub fn split<R, S>(
        &self,
        input: R,
        origin: &str,
        sink: &mut S,
        table: &mut ResourceTable,
    ) -> Result<SplitReport, SplitError>
    where
        R: Read,
        S: FragmentSink + ?Sized,
    {
        let mut stream = SegmentStream::new(input, origin);
        let mut report = SplitReport::default();
        let mut carry = None;
        loop {
            let (group, next) = self.read_group(carry, &mut stream)?;
            let Some(group) = group else {
                break;
            };
            let document_id = table.unique_id(&group.document_id);
            if document_id != group.document_id {
                let message = format!(
                    "Document id '{}' is already taken, using '{}'",
                    group.document_id, document_id
                );
                warn!("{}", message);
                report.warnings.push(message);
            }
            let fragment = DocumentFragment {
                document_id,
                template: stream.template(),
                segments: group.segments,
            };
            let location = sink.store(&fragment)?;
            debug!(
                "Stored document '{}' ({} segments) at {:?}",
                fragment.document_id,
                fragment.len(),
                location_label(&location)
            );
            report.documents.push(fragment.document_id.clone());
            table.insert(fragment.document_id, location);
            carry = next;
        }
        report.skipped_segments = stream.skipped();
        report.warnings.extend_from_slice(stream.warnings());
        info!(
            "Split {} into {} documents ({} segments skipped)",
            origin,
            report.documents.len(),
            report.skipped_segments
        );
        Ok(report)
    }

    pub fn split_file<S>(
        &self,
        path: &Path,
        sink: &mut S,
        table: &mut ResourceTable,
    ) -> Result<SplitReport, SplitError>
    where
        S: FragmentSink + ?Sized,
    {
        let input = tigerxml::open_input(path)?;
        self.split(input, &path.display().to_string(), sink, table)
    }
}

fn location_label(location: &ResourceLocation) -> Cow<'_, str> {
    match location {
        ResourceLocation::File(path) => path.to_string_lossy(),
        ResourceLocation::Memory(_) => Cow::Borrowed("memory"),
    }
}
