//! TigerXML / tiger2 reading
//!
//! Builds a `Corpus` from an XML event stream. The stream can come from a
//! file (optionally gzip-compressed), a string, or events replayed from a
//! split document fragment. Both TigerXML 1.0 names (`s`, `t`, `nt`,
//! `idref`) and tiger2 names (`segment`, `terminal`, `nonterminal`,
//! `target`) are understood; attributes are matched by local name.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use thiserror::Error;
use tracing::warn;
use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, ParserConfig, XmlEvent};

use crate::tiger::{Annotation, Corpus, Edge, Graph, NonTerminal, Segment, Terminal};

pub const ELEMENT_CORPUS: &str = "corpus";
pub const ELEMENT_HEAD: &str = "head";
pub const ELEMENT_META: &str = "meta";
pub const ELEMENT_BODY: &str = "body";
pub const ELEMENT_SEGMENT: &str = "segment";
pub const ELEMENT_GRAPH: &str = "graph";
pub const ELEMENT_TERMINALS: &str = "terminals";
pub const ELEMENT_TERMINAL: &str = "terminal";
pub const ELEMENT_NONTERMINALS: &str = "nonterminals";
pub const ELEMENT_NONTERMINAL: &str = "nonterminal";
pub const ELEMENT_EDGE: &str = "edge";
pub const ELEMENT_SECEDGE: &str = "secedge";

pub const ATTRIBUTE_ID: &str = "id";
pub const ATTRIBUTE_ROOT: &str = "root";
pub const ATTRIBUTE_WORD: &str = "word";
pub const ATTRIBUTE_IDREF: &str = "idref";
pub const ATTRIBUTE_SOURCE: &str = "source";
pub const ATTRIBUTE_TARGET: &str = "target";
pub const ATTRIBUTE_TYPE: &str = "type";

pub const EDGE_TYPE_PRIMARY: &str = "prim";
pub const EDGE_TYPE_SECONDARY: &str = "secedge";

pub fn is_segment(local_name: &str) -> bool {
    local_name == ELEMENT_SEGMENT || local_name == "s"
}

pub fn is_terminal(local_name: &str) -> bool {
    local_name == ELEMENT_TERMINAL || local_name == "t"
}

pub fn is_nonterminal(local_name: &str) -> bool {
    local_name == ELEMENT_NONTERMINAL || local_name == "nt"
}

/// Error while reading a TigerXML document
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Failed to open {}: {source}", .path.display())]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed XML in {origin}: {source}")]
    Xml {
        origin: String,
        source: xml::reader::Error,
    },

    #[error("No <corpus> element found in {origin}")]
    MissingCorpus { origin: String },

    #[error("<{element}> in {origin} has no '{attribute}' attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
        origin: String,
    },

    #[error("<{element}> in {origin} appears outside of a <graph>")]
    Misplaced { element: String, origin: String },
}

/// Parser settings shared by the reader and the segment splitter
pub fn parser_config() -> ParserConfig {
    ParserConfig::new()
        .trim_whitespace(true)
        .whitespace_to_characters(false)
        .cdata_to_characters(true)
        .ignore_comments(true)
}

/// Open a corpus file, decompressing `.gz` files transparently
pub fn open_input(path: &Path) -> Result<Box<dyn Read>, ReadError> {
    let file = File::open(path).map_err(|source| ReadError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            file,
        )))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Value of the attribute with the given local name
pub fn attribute<'a>(attributes: &'a [OwnedAttribute], local_name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|attr| attr.name.local_name == local_name)
        .map(|attr| attr.value.as_str())
}

/// Remaining attributes as annotations, in document order
fn annotations_except(attributes: &[OwnedAttribute], excluded: &[&str]) -> Vec<Annotation> {
    attributes
        .iter()
        .filter(|attr| !excluded.contains(&attr.name.local_name.as_str()))
        .map(|attr| Annotation::new(&attr.name.local_name, &attr.value))
        .collect()
}

/// Strip the `#` of tiger2 URI fragment references
fn reference(raw: &str) -> &str {
    raw.strip_prefix('#').unwrap_or(raw)
}

/// Read a corpus from a file path
pub fn read_corpus_file(path: &Path) -> Result<Corpus, ReadError> {
    let input = open_input(path)?;
    let reader = EventReader::new_with_config(input, parser_config());
    read_corpus_events(reader, &path.display().to_string())
}

/// Read a corpus from an in-memory string
pub fn read_corpus_str(text: &str) -> Result<Corpus, ReadError> {
    let reader = EventReader::new_with_config(text.as_bytes(), parser_config());
    read_corpus_events(reader, "<string>")
}

/// Read a corpus from any stream of XML events.
/// `origin` names the source in error messages.
pub fn read_corpus_events<I>(events: I, origin: &str) -> Result<Corpus, ReadError>
where
    I: IntoIterator<Item = Result<XmlEvent, xml::reader::Error>>,
{
    let mut builder = CorpusBuilder::new(origin);
    for event in events {
        let event = event.map_err(|source| ReadError::Xml {
            origin: origin.to_string(),
            source,
        })?;
        if matches!(event, XmlEvent::EndDocument) {
            break;
        }
        builder.handle(event)?;
    }
    builder.finish()
}

/// Incremental state while walking the event stream
struct CorpusBuilder<'o> {
    origin: &'o str,
    corpus: Corpus,
    saw_corpus: bool,
    /// Local names of the currently open elements
    open: Vec<String>,
    segment: Option<Segment>,
    graph: Option<Graph>,
    /// Id of the enclosing terminal or non-terminal
    current_node: Option<String>,
    meta_field: Option<String>,
    text: String,
    /// Depth inside a segment that is being skipped
    skip_depth: usize,
}

impl<'o> CorpusBuilder<'o> {
    fn new(origin: &'o str) -> Self {
        Self {
            origin,
            corpus: Corpus::new(),
            saw_corpus: false,
            open: Vec::new(),
            segment: None,
            graph: None,
            current_node: None,
            meta_field: None,
            text: String::new(),
            skip_depth: 0,
        }
    }

    fn missing(&self, element: &str, attribute: &'static str) -> ReadError {
        ReadError::MissingAttribute {
            element: element.to_string(),
            attribute,
            origin: self.origin.to_string(),
        }
    }

    fn handle(&mut self, event: XmlEvent) -> Result<(), ReadError> {
        match event {
            XmlEvent::StartElement {
                name, attributes, ..
            } => {
                if self.skip_depth > 0 {
                    self.skip_depth += 1;
                    return Ok(());
                }
                self.start_element(&name.local_name, &attributes)?;
                // a skipped element's closing tag is consumed by the skip counter
                if self.skip_depth == 0 {
                    self.open.push(name.local_name);
                }
            }
            XmlEvent::EndElement { name } => {
                if self.skip_depth > 0 {
                    self.skip_depth -= 1;
                    return Ok(());
                }
                self.open.pop();
                self.end_element(&name.local_name);
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                if self.meta_field.is_some() {
                    self.text.push_str(&text);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn start_element(
        &mut self,
        local_name: &str,
        attributes: &[OwnedAttribute],
    ) -> Result<(), ReadError> {
        let in_meta = self.open.last().is_some_and(|parent| parent == ELEMENT_META);
        match local_name {
            ELEMENT_CORPUS => {
                self.saw_corpus = true;
                self.corpus.id = attribute(attributes, ATTRIBUTE_ID).map(str::to_string);
            }
            _ if in_meta => {
                self.meta_field = Some(local_name.to_string());
                self.text.clear();
            }
            name if is_segment(name) => match attribute(attributes, ATTRIBUTE_ID) {
                Some(id) => self.segment = Some(Segment::new(id)),
                None => {
                    warn!(
                        "Found a segment without id in {}; it will be ignored",
                        self.origin
                    );
                    self.skip_depth = 1;
                }
            },
            ELEMENT_GRAPH => {
                self.graph = Some(Graph {
                    id: attribute(attributes, ATTRIBUTE_ID).map(str::to_string),
                    root: attribute(attributes, ATTRIBUTE_ROOT).map(reference).map(str::to_string),
                    ..Graph::default()
                });
            }
            name if is_terminal(name) => {
                let id = attribute(attributes, ATTRIBUTE_ID)
                    .ok_or_else(|| self.missing(name, ATTRIBUTE_ID))?;
                let word = attribute(attributes, ATTRIBUTE_WORD)
                    .ok_or_else(|| self.missing(name, ATTRIBUTE_WORD))?;
                let terminal = Terminal {
                    id: id.to_string(),
                    word: word.to_string(),
                    annotations: annotations_except(attributes, &[ATTRIBUTE_ID, ATTRIBUTE_WORD]),
                };
                self.current_graph(name)?.terminals.push(terminal);
                self.current_node = Some(id.to_string());
            }
            name if is_nonterminal(name) => {
                let id = attribute(attributes, ATTRIBUTE_ID)
                    .ok_or_else(|| self.missing(name, ATTRIBUTE_ID))?;
                let nonterminal = NonTerminal {
                    id: id.to_string(),
                    annotations: annotations_except(attributes, &[ATTRIBUTE_ID]),
                };
                self.current_graph(name)?.nonterminals.push(nonterminal);
                self.current_node = Some(id.to_string());
            }
            ELEMENT_EDGE | ELEMENT_SECEDGE => {
                let edge = self.build_edge(local_name, attributes)?;
                self.current_graph(local_name)?.edges.push(edge);
            }
            _ => {}
        }
        Ok(())
    }

    fn build_edge(&self, local_name: &str, attributes: &[OwnedAttribute]) -> Result<Edge, ReadError> {
        let source = match attribute(attributes, ATTRIBUTE_SOURCE) {
            Some(source) => reference(source).to_string(),
            None => self
                .current_node
                .clone()
                .ok_or_else(|| self.missing(local_name, ATTRIBUTE_SOURCE))?,
        };
        let target = attribute(attributes, ATTRIBUTE_IDREF)
            .or_else(|| attribute(attributes, ATTRIBUTE_TARGET))
            .map(reference)
            .ok_or_else(|| self.missing(local_name, ATTRIBUTE_TARGET))?;
        let edge_type = match attribute(attributes, ATTRIBUTE_TYPE) {
            Some(t) => t,
            None if local_name == ELEMENT_SECEDGE => EDGE_TYPE_SECONDARY,
            None => EDGE_TYPE_PRIMARY,
        };
        let mut edge = Edge::new(&source, target, edge_type);
        edge.id = attribute(attributes, ATTRIBUTE_ID).map(str::to_string);
        edge.annotations = annotations_except(
            attributes,
            &[
                ATTRIBUTE_ID,
                ATTRIBUTE_IDREF,
                ATTRIBUTE_SOURCE,
                ATTRIBUTE_TARGET,
                ATTRIBUTE_TYPE,
            ],
        );
        Ok(edge)
    }

    fn current_graph(&mut self, element: &str) -> Result<&mut Graph, ReadError> {
        let origin = self.origin;
        self.graph.as_mut().ok_or_else(|| ReadError::Misplaced {
            element: element.to_string(),
            origin: origin.to_string(),
        })
    }

    fn end_element(&mut self, local_name: &str) {
        match local_name {
            name if is_terminal(name) || is_nonterminal(name) => self.current_node = None,
            ELEMENT_GRAPH => {
                if let Some(graph) = self.graph.take() {
                    match self.segment.as_mut() {
                        Some(segment) => segment.graphs.push(graph),
                        None => {
                            // a graph without an enclosing segment becomes its own segment
                            let id = graph.id.clone().unwrap_or_default();
                            self.corpus.segments.push(Segment::new(&id).with_graph(graph));
                        }
                    }
                }
            }
            name if is_segment(name) => {
                if let Some(segment) = self.segment.take() {
                    self.corpus.segments.push(segment);
                }
            }
            _ => {
                if self.meta_field.as_deref() == Some(local_name) {
                    if let Some(field) = self.meta_field.take() {
                        let value = self.text.trim().to_string();
                        self.corpus.meta.set(&field, value);
                    }
                    self.text.clear();
                }
            }
        }
    }

    fn finish(self) -> Result<Corpus, ReadError> {
        if !self.saw_corpus && self.corpus.segments.is_empty() {
            return Err(ReadError::MissingCorpus {
                origin: self.origin.to_string(),
            });
        }
        Ok(self.corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TIGER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<corpus id="sample">
  <head>
    <meta>
      <name>sample corpus</name>
      <author>Jane Doe</author>
      <date>2009</date>
      <format>NeGra</format>
    </meta>
    <annotation>
      <feature name="pos" domain="T"><value name="NN">noun</value></feature>
    </annotation>
  </head>
  <body>
    <s id="s1">
      <graph root="s1_500">
        <terminals>
          <t id="s1_1" word="Der" lemma="der" pos="ART" morph="Nom.Sg.Masc"/>
          <t id="s1_2" word="Hund" lemma="Hund" pos="NN" morph="Nom.Sg.Masc"/>
          <t id="s1_3" word="läuft" lemma="laufen" pos="VVFIN" morph="3.Sg.Pres.Ind">
            <secedge label="SB" idref="s1_500"/>
          </t>
        </terminals>
        <nonterminals>
          <nt id="s1_500" cat="NP">
            <edge label="NK" idref="s1_1"/>
            <edge label="NK" idref="s1_2"/>
          </nt>
          <nt id="s1_501" cat="S">
            <edge label="SB" idref="s1_500"/>
            <edge label="HD" idref="s1_3"/>
          </nt>
        </nonterminals>
      </graph>
    </s>
    <s>
      <graph root="x"><terminals><t id="x1" word="lost"/></terminals></graph>
    </s>
    <s id="s2">
      <graph root="s2_VROOT">
        <terminals>
          <t id="s2_1" word="Ja" pos="ITJ"/>
        </terminals>
        <nonterminals/>
      </graph>
    </s>
  </body>
</corpus>
"#;

    const TIGER2_XML: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<corpus xmlns="http://korpling.german.hu-berlin.de/tiger2/V2.0.5/"
        xmlns:tiger2="http://korpling.german.hu-berlin.de/tiger2/V2.0.5/" xml:id="c1">
  <head/>
  <body>
    <segment xml:id="seg1">
      <graph xml:id="g1" root="#n1">
        <terminals>
          <terminal xml:id="t1" tiger2:word="Hallo" tiger2:pos="ITJ"/>
          <terminal xml:id="t2" tiger2:word="Welt" tiger2:pos="NN"/>
        </terminals>
        <nonterminals>
          <nonterminal xml:id="n1" tiger2:cat="S">
            <edge xml:id="e1" tiger2:type="prim" target="#t1" label="HD"/>
          </nonterminal>
        </nonterminals>
        <edges>
          <edge xml:id="e2" source="#n1" target="#t2" tiger2:type="dep"/>
        </edges>
      </graph>
    </segment>
  </body>
</corpus>
"##;

    #[test]
    fn test_read_tiger_xml() {
        let corpus = read_corpus_str(TIGER_XML).unwrap();

        assert_eq!(corpus.id.as_deref(), Some("sample"));
        assert_eq!(corpus.meta.name.as_deref(), Some("sample corpus"));
        assert_eq!(corpus.meta.author.as_deref(), Some("Jane Doe"));
        assert_eq!(corpus.meta.format.as_deref(), Some("NeGra"));
        assert_eq!(corpus.meta.history, None);

        // the segment without id is skipped
        assert_eq!(corpus.segments.len(), 2);
        assert_eq!(corpus.segments[0].id, "s1");
        assert_eq!(corpus.segments[1].id, "s2");

        let graph = &corpus.segments[0].graphs[0];
        assert_eq!(graph.root.as_deref(), Some("s1_500"));
        assert_eq!(graph.terminals.len(), 3);
        assert_eq!(graph.terminals[2].word, "läuft");
        assert_eq!(graph.terminals[0].annotation("pos"), Some("ART"));
        assert_eq!(graph.terminals[0].annotations[0], Annotation::new("lemma", "der"));
        assert_eq!(graph.nonterminals[1].annotation("cat"), Some("S"));
    }

    #[test]
    fn test_read_edges() {
        let corpus = read_corpus_str(TIGER_XML).unwrap();
        let graph = &corpus.segments[0].graphs[0];

        assert_eq!(graph.edges.len(), 5);
        let secedge = &graph.edges[0];
        assert_eq!(secedge.source, "s1_3");
        assert_eq!(secedge.target, "s1_500");
        assert_eq!(secedge.edge_type.as_deref(), Some("secedge"));
        assert_eq!(secedge.annotation("label"), Some("SB"));

        let prim = &graph.edges[1];
        assert_eq!(prim.source, "s1_500");
        assert_eq!(prim.target, "s1_1");
        assert_eq!(prim.edge_type.as_deref(), Some("prim"));
        let mother = graph
            .edges
            .iter()
            .find(|e| e.target == "s1_500" && e.edge_type.as_deref() == Some(EDGE_TYPE_PRIMARY));
        assert_eq!(mother.map(|e| e.source.as_str()), Some("s1_501"));
    }

    #[test]
    fn test_read_tiger2() {
        let corpus = read_corpus_str(TIGER2_XML).unwrap();

        assert_eq!(corpus.id.as_deref(), Some("c1"));
        assert_eq!(corpus.segments.len(), 1);
        let graph = &corpus.segments[0].graphs[0];
        assert_eq!(graph.root.as_deref(), Some("n1"));
        assert_eq!(graph.terminals[1].word, "Welt");
        assert_eq!(graph.terminals[1].annotation("pos"), Some("NN"));
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].id.as_deref(), Some("e1"));
        assert_eq!(graph.edges[0].target, "t1");
        assert_eq!(graph.edges[1].source, "n1");
        assert_eq!(graph.edges[1].edge_type.as_deref(), Some("dep"));
    }

    #[test]
    fn test_malformed_xml() {
        let err = read_corpus_str("<corpus><body><s id=\"s1\"></body></corpus>").unwrap_err();
        assert!(matches!(err, ReadError::Xml { .. }));
    }

    #[test]
    fn test_missing_word() {
        let xml = r#"<corpus><body><s id="s1"><graph><terminals><t id="t1"/></terminals></graph></s></body></corpus>"#;
        let err = read_corpus_str(xml).unwrap_err();
        assert!(matches!(err, ReadError::MissingAttribute { attribute: "word", .. }));
    }

    #[test]
    fn test_empty_corpus() {
        let corpus = read_corpus_str("<corpus><head/><body/></corpus>").unwrap();
        assert!(corpus.segments.is_empty());

        let err = read_corpus_str("<treebank/>").unwrap_err();
        assert!(matches!(err, ReadError::MissingCorpus { .. }));
    }

    #[test]
    fn test_read_gzip_file() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.xml.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(TIGER_XML.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let corpus = read_corpus_file(&path).unwrap();
        assert_eq!(corpus.segments.len(), 2);
    }

    #[test]
    fn test_open_missing_file() {
        let err = read_corpus_file(Path::new("/nonexistent/corpus.xml")).unwrap_err();
        assert!(matches!(err, ReadError::FileOpen { .. }));
    }
}
