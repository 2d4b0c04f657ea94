use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::names::NameParser;

/// Number of core rows sampled to classify an archive.
pub const SAMPLE_SIZE: usize = 1000;

const VOTE_CAP: usize = 100;
const FLAT_RANKS: [&str; 7] = [
    "kingdom", "phylum", "class", "order", "family", "genus", "species",
];
const SYNONYM_HINTS: [&str; 4] = ["synonym", "miss", "invalid", "unavailable"];

/// Term to value mapping for one sampled row.
pub type SampleRow = HashMap<String, String>;

/// How complete the `scientificName` values are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameCompleteness {
    #[default]
    Unknown,
    /// Names carry their authorship.
    Full,
    /// Authorship lives in `scientificNameAuthorship`.
    Canonical,
    /// Names have to be assembled from epithet columns.
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynonymStyle {
    #[default]
    Unknown,
    AcceptedId,
    /// Synonyms point to their accepted name through the parent link.
    Hierarchy,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyStyle {
    #[default]
    Unknown,
    Tree,
    Flat,
}

impl fmt::Display for NameCompleteness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NameCompleteness::Unknown => "unknown",
            NameCompleteness::Full => "full",
            NameCompleteness::Canonical => "canonical",
            NameCompleteness::Composite => "composite",
        };
        f.write_str(name)
    }
}

impl fmt::Display for SynonymStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynonymStyle::Unknown => "unknown",
            SynonymStyle::AcceptedId => "accepted id",
            SynonymStyle::Hierarchy => "hierarchy",
            SynonymStyle::Extension => "extension",
        };
        f.write_str(name)
    }
}

impl fmt::Display for HierarchyStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HierarchyStyle::Unknown => "unknown",
            HierarchyStyle::Tree => "tree",
            HierarchyStyle::Flat => "flat",
        };
        f.write_str(name)
    }
}

/// Shape of an archive, fixed once per load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Diagnosis {
    pub names: NameCompleteness,
    pub synonyms: SynonymStyle,
    pub hierarchy: HierarchyStyle,
}

impl Diagnosis {
    pub fn classify(
        parser: &mut dyn NameParser,
        sample: &[SampleRow],
        extensions: &[String],
    ) -> Self {
        Self {
            names: name_completeness(parser, sample),
            synonyms: synonym_style(sample, extensions),
            hierarchy: hierarchy_style(sample),
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "names: {}, synonyms: {}, hierarchy: {}",
            self.names, self.synonyms, self.hierarchy
        )
    }
}

fn hierarchy_style(sample: &[SampleRow]) -> HierarchyStyle {
    let Some(row) = sample.first() else {
        return HierarchyStyle::Unknown;
    };
    let ranks = row
        .keys()
        .filter(|term| FLAT_RANKS.contains(&term.as_str()))
        .count();
    if ranks > 2 {
        return HierarchyStyle::Flat;
    }
    if row.contains_key("parentnameusageid") || row.contains_key("highertaxonid") {
        return HierarchyStyle::Tree;
    }
    HierarchyStyle::Unknown
}

fn synonym_style(sample: &[SampleRow], extensions: &[String]) -> SynonymStyle {
    if sample.is_empty() {
        return SynonymStyle::Unknown;
    }
    if extensions.iter().any(|name| {
        let name = name.trim().to_lowercase();
        !name.is_empty() && (name.contains("synonym") || "synonym".contains(name.as_str()))
    }) {
        return SynonymStyle::Extension;
    }
    if sample[0].contains_key("acceptednameusageid") {
        return SynonymStyle::AcceptedId;
    }
    if sample.iter().any(synonym_by_parent) {
        return SynonymStyle::Hierarchy;
    }
    SynonymStyle::Unknown
}

fn synonym_by_parent(row: &SampleRow) -> bool {
    let status = row
        .get("taxonomicstatus")
        .map(|value| value.to_lowercase())
        .unwrap_or_default();
    if !SYNONYM_HINTS.iter().any(|hint| status.contains(hint)) {
        return false;
    }
    ["parentnameusageid", "highertaxonid"]
        .iter()
        .any(|term| row.get(*term).is_some_and(|value| !value.trim().is_empty()))
}

fn name_completeness(parser: &mut dyn NameParser, sample: &[SampleRow]) -> NameCompleteness {
    let (mut full, mut canonical, mut composite) = (0usize, 0usize, 0usize);
    let field = |row: &SampleRow, term: &str| {
        row.get(term)
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    };

    for row in sample {
        let name = field(row, "scientificname");
        if name.is_empty() && !field(row, "specificepithet").is_empty() {
            composite += 1;
            if composite >= VOTE_CAP {
                break;
            }
            continue;
        }

        let parsed = parser.parse(&name);
        if !parsed.parsed {
            continue;
        }
        if parsed.has_authorship {
            full += 1;
            if full >= VOTE_CAP {
                break;
            }
        } else if !field(row, "scientificnameauthorship").is_empty() {
            canonical += 1;
            if canonical >= VOTE_CAP {
                break;
            }
        }
    }

    match (full, canonical, composite) {
        (f, 0, 0) if f > 0 => NameCompleteness::Full,
        (0, c, 0) if c > 0 => NameCompleteness::Canonical,
        (0, 0, c) if c > 0 => NameCompleteness::Composite,
        _ => NameCompleteness::Unknown,
    }
}
