//! Mapping and splitting configuration
//!
//! All tables are parsed once, when the configuration is built, and are
//! read-only afterwards. Property names follow the established module
//! options (`separator`, `createSSpan4Segment`, `map`, `edge.type`,
//! `annotation.name`, `edge.reverse`, `splitHeuristic`, `manualSplits`).

use pest::Parser;
use pest_derive::Parser;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::RelationKind;

#[derive(Parser)]
#[grammar = "properties.pest"]
struct PropertyParser;

pub const PROP_SEPARATOR: &str = "separator";
pub const PROP_CREATE_SPAN: &str = "createSSpan4Segment";
pub const PROP_EDGE_TO_RELATION: &str = "map";
pub const PROP_RENAME_EDGE_TYPE: &str = "edge.type";
pub const PROP_RENAME_ANNOTATION_NAME: &str = "annotation.name";
pub const PROP_EDGE_REVERSE: &str = "edge.reverse";
pub const PROP_SPLIT_HEURISTIC: &str = "splitHeuristic";
pub const PROP_MANUAL_SPLITS: &str = "manualSplits";

pub const DEFAULT_SEPARATOR: &str = " ";
pub const DEFAULT_EDGE_TO_RELATION: &str = "secedge:SDOMINANCE_RELATION";
pub const DEFAULT_EDGE_REVERSE: &str = "secedge,sec";

/// Suffix of a manual document id meaning "more segments follow"
pub const CONTINUATION_MARKER: &str = "++";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Cannot parse value '{value}' of property '{key}': it does not follow the form {expected}: {message}"
    )]
    Syntax {
        key: String,
        value: String,
        expected: &'static str,
        message: String,
    },

    #[error("Unknown relation kind '{kind}' for edge type '{edge_type}' in property '{key}'")]
    UnknownRelationKind {
        key: String,
        edge_type: String,
        kind: String,
    },

    #[error("Property '{key}' expects true or false, got '{value}'")]
    InvalidBool { key: String, value: String },
}

/// Policy deciding where one corpus file is cut into documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitHeuristic {
    /// Never split; one document per corpus file
    #[default]
    None,
    /// One document per segment
    Segment,
    /// Split after a virtual-root continuation sentence followed by a regular one
    VirtualRoot,
}

impl SplitHeuristic {
    /// Parse a heuristic name; unknown names fall back to `None`
    pub fn from_name(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "" | "none" => SplitHeuristic::None,
            "segment" => SplitHeuristic::Segment,
            "vroot" | "virtualroot" => SplitHeuristic::VirtualRoot,
            other => {
                warn!("Unknown split heuristic '{}', falling back to 'none'", other);
                SplitHeuristic::None
            }
        }
    }
}

/// `old -> new` lookup table for names and types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamingTable {
    table: FxHashMap<String, String>,
}

impl RenamingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `OLD=NEW(,OLD=NEW)*`; all whitespace is removed first
    pub fn parse(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let mut table = FxHashMap::default();
        let pairs = PropertyParser::parse(Rule::renaming_table, &stripped).map_err(|e| {
            ConfigError::Syntax {
                key: key.to_string(),
                value: raw.to_string(),
                expected: "OLDNAME=NEWNAME(,OLDNAME=NEWNAME)*",
                message: e.to_string(),
            }
        })?;
        for pair in pairs.flat_map(|p| p.into_inner()) {
            if pair.as_rule() != Rule::rename_pair {
                continue;
            }
            let mut names = pair.into_inner().map(|p| p.as_str().to_string());
            if let (Some(old), Some(new)) = (names.next(), names.next()) {
                table.insert(old, new);
            }
        }
        Ok(Self { table })
    }

    pub fn insert(&mut self, old: &str, new: &str) {
        self.table.insert(old.to_string(), new.to_string());
    }

    /// The renamed value, or the original when no entry exists
    pub fn rename<'a>(&'a self, name: &'a str) -> &'a str {
        self.table.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.table.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

fn parse_relation_kind(raw: &str) -> Option<RelationKind> {
    match raw.to_uppercase().as_str() {
        "SDOMINANCE_RELATION" | "DOMINANCE" => Some(RelationKind::Dominance),
        "SPOINTING_RELATION" | "POINTING" => Some(RelationKind::Pointing),
        "SSPANNING_RELATION" | "SPANNING" => Some(RelationKind::Spanning),
        _ => None,
    }
}

/// Parse `type:KIND(,type:KIND)*`
pub fn parse_relation_map(
    key: &str,
    raw: &str,
) -> Result<FxHashMap<String, RelationKind>, ConfigError> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut map = FxHashMap::default();
    let pairs =
        PropertyParser::parse(Rule::relation_map, &stripped).map_err(|e| ConfigError::Syntax {
            key: key.to_string(),
            value: raw.to_string(),
            expected: "type:RELATION_KIND(,type:RELATION_KIND)*",
            message: e.to_string(),
        })?;
    for pair in pairs.flat_map(|p| p.into_inner()) {
        if pair.as_rule() != Rule::kind_pair {
            continue;
        }
        let mut parts = pair.into_inner().map(|p| p.as_str());
        let (Some(edge_type), Some(kind)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some(relation_kind) = parse_relation_kind(kind) else {
            return Err(ConfigError::UnknownRelationKind {
                key: key.to_string(),
                edge_type: edge_type.to_string(),
                kind: kind.to_string(),
            });
        };
        map.insert(edge_type.to_string(), relation_kind);
    }
    Ok(map)
}

/// Comma separated list; entries trimmed, empty entries dropped
pub fn parse_type_set(raw: &str) -> FxHashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// `segId=docId(,segId=docId)*`; a bare `segId` maps to the empty string
pub fn parse_manual_splits(raw: &str) -> FxHashMap<String, String> {
    let mut splits = FxHashMap::default();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('=') {
            Some((segment, document)) => {
                splits.insert(segment.trim().to_string(), document.trim().to_string())
            }
            None => splits.insert(entry.to_string(), String::new()),
        };
    }
    splits
}

/// Split one `.properties` line into key and value. The key ends at the first
/// `=`, `:` or whitespace; blanks around that separator are skipped, trailing
/// blanks belong to the value.
fn split_property_line(line: &str) -> (&str, &str) {
    let line = line.trim_end_matches('\r');
    let key_end = line
        .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
        .unwrap_or(line.len());
    let (key, rest) = line.split_at(key_end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
    (key, rest.trim_start())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Resolved configuration shared read-only by the splitter and all mappers
#[derive(Debug, Clone, PartialEq)]
pub struct MappingConfig {
    pub separator: String,
    pub create_span_per_segment: bool,
    /// Explicit relation kind per edge type
    pub relation_kinds: FxHashMap<String, RelationKind>,
    pub edge_type_renaming: RenamingTable,
    pub annotation_renaming: RenamingTable,
    pub reversed_edge_types: FxHashSet<String>,
    pub split_heuristic: SplitHeuristic,
    /// Segment id -> document id overrides
    pub manual_splits: FxHashMap<String, String>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        let mut relation_kinds = FxHashMap::default();
        relation_kinds.insert("secedge".to_string(), RelationKind::Dominance);
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            create_span_per_segment: false,
            relation_kinds,
            edge_type_renaming: RenamingTable::new(),
            annotation_renaming: RenamingTable::new(),
            reversed_edge_types: parse_type_set(DEFAULT_EDGE_REVERSE),
            split_heuristic: SplitHeuristic::None,
            manual_splits: FxHashMap::default(),
        }
    }
}

impl MappingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from key/value properties.
    /// Unset properties keep their defaults; unknown keys are ignored.
    pub fn from_properties<'a, I>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            match key.trim() {
                PROP_SEPARATOR => config.separator = value.to_string(),
                PROP_CREATE_SPAN => config.create_span_per_segment = parse_bool(key, value)?,
                PROP_EDGE_TO_RELATION => config.relation_kinds = parse_relation_map(key, value)?,
                PROP_RENAME_EDGE_TYPE => {
                    config.edge_type_renaming = RenamingTable::parse(key, value)?
                }
                PROP_RENAME_ANNOTATION_NAME => {
                    config.annotation_renaming = RenamingTable::parse(key, value)?
                }
                PROP_EDGE_REVERSE => config.reversed_edge_types = parse_type_set(value),
                PROP_SPLIT_HEURISTIC => config.split_heuristic = SplitHeuristic::from_name(value),
                PROP_MANUAL_SPLITS => config.manual_splits = parse_manual_splits(value),
                other => debug!("Ignoring unknown property '{}'", other),
            }
        }
        Ok(config)
    }

    /// Parse `.properties` text: `key=value`, `key: value` or bare `key`
    /// lines, `#`/`!` comments
    pub fn from_properties_str(text: &str) -> Result<Self, ConfigError> {
        let entries: Vec<(&str, &str)> = text
            .lines()
            .map(str::trim_start)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .map(split_property_line)
            .collect();
        Self::from_properties(entries)
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn with_span_per_segment(mut self, enabled: bool) -> Self {
        self.create_span_per_segment = enabled;
        self
    }

    pub fn with_relation_kind(mut self, edge_type: &str, kind: RelationKind) -> Self {
        self.relation_kinds.insert(edge_type.to_string(), kind);
        self
    }

    pub fn with_edge_type_renaming(mut self, table: RenamingTable) -> Self {
        self.edge_type_renaming = table;
        self
    }

    pub fn with_annotation_renaming(mut self, table: RenamingTable) -> Self {
        self.annotation_renaming = table;
        self
    }

    pub fn with_reversed_edge_types(mut self, types: &[&str]) -> Self {
        self.reversed_edge_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_split_heuristic(mut self, heuristic: SplitHeuristic) -> Self {
        self.split_heuristic = heuristic;
        self
    }

    pub fn with_manual_split(mut self, segment_id: &str, document_id: &str) -> Self {
        self.manual_splits
            .insert(segment_id.to_string(), document_id.to_string());
        self
    }

    pub fn relation_kind_for(&self, edge_type: Option<&str>) -> Option<RelationKind> {
        edge_type.and_then(|t| self.relation_kinds.get(t).copied())
    }

    pub fn is_reversed(&self, edge_type: Option<&str>) -> bool {
        edge_type.is_some_and(|t| self.reversed_edge_types.contains(t))
    }

    /// Whether corpus files have to be streamed through the splitter at all
    pub fn needs_splitting(&self) -> bool {
        self.split_heuristic != SplitHeuristic::None || !self.manual_splits.is_empty()
    }
}
