use tracing::debug;

use crate::diagnose::{Diagnosis, NameCompleteness, SynonymStyle};
use crate::dialect::Row;
use crate::error::DwcaError;
use crate::hierarchy::{Breadcrumbs, Hierarchy};
use crate::names::NameParser;
use crate::taxon::TaxonLocator;

pub const SFG_NAMESPACE: &str = "https://terms.speciesfilegroup.org/";
pub const ACCEPTED_ID_TERM: &str = "http://rs.tdwg.org/dwc/terms/acceptedNameUsageID";

const NAME_TERMS: [&str; 4] = [
    "scientificNameString",
    "canonicalFormFull",
    "canonicalForm",
    "canonicalFormStemmed",
];
const BREADCRUMB_TERMS: [&str; 3] = ["breadcrumbNames", "breadcrumbRanks", "breadcrumbIds"];

/// Pads short rows with empty fields and cuts everything past `width`.
pub fn fit_width(mut row: Row, width: usize) -> Row {
    row.resize(width, String::new());
    row
}

/// Name with its authorship attached unless the name already carries one.
pub fn full_name(parser: &mut dyn NameParser, name: &str, authorship: &str) -> String {
    let name = name.trim();
    let authorship = authorship.trim();
    let parsed = parser.parse(name);
    if parsed.parsed && !authorship.is_empty() && !parsed.has_authorship {
        return format!("{name} {authorship}");
    }
    name.to_string()
}

/// Composite names would have to be assembled from epithet columns, which
/// is not supported; the run is rejected before any row is read.
pub fn ensure_supported(diagnosis: Diagnosis, passthrough: bool) -> Result<(), DwcaError> {
    if !passthrough && diagnosis.names == NameCompleteness::Composite {
        return Err(DwcaError::UnsupportedNameShape);
    }
    Ok(())
}

/// Turns a raw core row into its normalized form.
#[derive(Debug)]
pub struct CoreEnricher<'a> {
    diagnosis: Diagnosis,
    locator: &'a TaxonLocator,
    hierarchy: &'a Hierarchy,
    id_index: Option<usize>,
    width: usize,
    passthrough: bool,
}

impl<'a> CoreEnricher<'a> {
    /// `width` is the highest described column plus one. A `passthrough`
    /// enricher copies rows untouched.
    pub fn new(
        diagnosis: Diagnosis,
        locator: &'a TaxonLocator,
        hierarchy: &'a Hierarchy,
        id_index: Option<usize>,
        width: usize,
        passthrough: bool,
    ) -> Result<Self, DwcaError> {
        ensure_supported(diagnosis, passthrough)?;
        Ok(Self {
            diagnosis,
            locator,
            hierarchy,
            id_index,
            width,
            passthrough,
        })
    }

    /// Full term URIs of the columns added after `width`, in order.
    pub fn appended_terms(&self) -> Vec<String> {
        if self.passthrough {
            return Vec::new();
        }
        let mut terms: Vec<String> = NAME_TERMS
            .iter()
            .chain(BREADCRUMB_TERMS.iter())
            .map(|term| format!("{SFG_NAMESPACE}{term}"))
            .collect();
        if self.diagnosis.synonyms == SynonymStyle::Hierarchy {
            terms.push(ACCEPTED_ID_TERM.to_string());
        }
        terms
    }

    pub fn enrich(&self, parser: &mut dyn NameParser, row: Row) -> Result<Row, DwcaError> {
        if self.passthrough {
            return Ok(row);
        }
        let mut row = fit_width(row, self.width);

        let (name, authorship) = self.locator.name_and_authorship(&row);
        let name_string = match self.diagnosis.names {
            NameCompleteness::Canonical => {
                let joined = format!("{name} {authorship}");
                full_name(parser, &joined, "")
            }
            NameCompleteness::Full | NameCompleteness::Unknown => {
                full_name(parser, &name, &authorship)
            }
            NameCompleteness::Composite => return Err(DwcaError::UnsupportedNameShape),
        };
        let parsed = parser.parse(&name_string);

        if self.diagnosis.synonyms == SynonymStyle::AcceptedId {
            self.drop_self_accepted(&mut row);
        }
        let accepted = (self.diagnosis.synonyms == SynonymStyle::Hierarchy).then(|| {
            if self.locator.is_synonym(&row) {
                self.locator.parent(&row)
            } else {
                String::new()
            }
        });
        let breadcrumbs = self.breadcrumbs(&row);

        row.push(name_string);
        row.push(parsed.canonical_full);
        row.push(parsed.canonical_simple);
        row.push(parsed.canonical_stemmed);
        row.extend(breadcrumbs.into_fields());
        row.extend(accepted);
        Ok(row)
    }

    fn id<'r>(&self, row: &'r [String]) -> Option<&'r str> {
        self.id_index
            .and_then(|index| row.get(index))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn drop_self_accepted(&self, row: &mut [String]) {
        let Some(id) = self.id(row).map(str::to_string) else {
            return;
        };
        if let Some(accepted) = self.locator.accepted_id.and_then(|index| row.get_mut(index))
            && accepted.trim() == id
        {
            debug!(id = %id, "clearing self-referencing accepted id");
            accepted.clear();
        }
    }

    /// Tree breadcrumbs when the row is in the hierarchy, rank columns
    /// otherwise, empty placeholders when neither is available.
    fn breadcrumbs(&self, row: &[String]) -> Breadcrumbs {
        if !self.hierarchy.is_empty()
            && let Some(id) = self.id(row)
        {
            let crumbs = self.hierarchy.breadcrumbs(id);
            if !crumbs.is_empty() {
                return crumbs;
            }
        }
        flat_breadcrumbs(self.locator, row)
    }
}

fn flat_breadcrumbs(locator: &TaxonLocator, row: &[String]) -> Breadcrumbs {
    let present: Vec<(&str, &str)> = locator
        .ranks
        .iter()
        .filter_map(|column| {
            let value = row.get(column.index)?.trim();
            (!value.is_empty()).then_some((column.rank, value))
        })
        .collect();
    Breadcrumbs {
        names: present
            .iter()
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join("|"),
        ranks: present
            .iter()
            .map(|(rank, _)| *rank)
            .collect::<Vec<_>>()
            .join("|"),
        ids: vec![""; present.len()].join("|"),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::diagnose::HierarchyStyle;
    use crate::hierarchy::HierarchyNode;
    use crate::names::BasicNameParser;
    use crate::taxon::RankColumn;

    fn strings(values: &[&str]) -> Row {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn diagnosis(names: NameCompleteness, synonyms: SynonymStyle) -> Diagnosis {
        Diagnosis {
            names,
            synonyms,
            hierarchy: HierarchyStyle::Tree,
        }
    }

    #[test]
    fn canonical_names_get_authorship_appended() {
        let locator = TaxonLocator {
            scientific_name: Some(1),
            authorship: Some(2),
            ..TaxonLocator::default()
        };
        let hierarchy = Hierarchy::new();
        let enricher = CoreEnricher::new(
            diagnosis(NameCompleteness::Canonical, SynonymStyle::Unknown),
            &locator,
            &hierarchy,
            Some(0),
            3,
            false,
        )
        .unwrap();
        let row = enricher
            .enrich(
                &mut BasicNameParser::new(),
                strings(&["1", "Homo sapiens", "Linnaeus, 1758"]),
            )
            .unwrap();
        assert_eq!(row.len(), 3 + enricher.appended_terms().len());
        assert_eq!(row[3], "Homo sapiens Linnaeus, 1758");
        assert_eq!(row[5], "Homo sapiens");
        assert_eq!(&row[7..10], &["", "", ""]);
    }

    #[test]
    fn full_name_keeps_embedded_authorship() {
        let mut parser = BasicNameParser::new();
        assert_eq!(
            full_name(&mut parser, "Homo sapiens L.", "Linnaeus"),
            "Homo sapiens L."
        );
        assert_eq!(full_name(&mut parser, " Aves ", " Linnaeus "), "Aves Linnaeus");
        assert_eq!(full_name(&mut parser, "?? bird", "Linnaeus"), "?? bird");
    }

    #[test]
    fn tree_breadcrumbs_are_appended() {
        let locator = TaxonLocator {
            scientific_name: Some(1),
            parent_id: Some(3),
            ..TaxonLocator::default()
        };
        let hierarchy: Hierarchy = [
            HierarchyNode {
                id: "1".into(),
                parent_id: "2".into(),
                name: "Homo sapiens".into(),
                ..HierarchyNode::default()
            },
            HierarchyNode {
                id: "2".into(),
                name: "Animalia".into(),
                ..HierarchyNode::default()
            },
        ]
        .into_iter()
        .collect();
        let enricher = CoreEnricher::new(
            diagnosis(NameCompleteness::Full, SynonymStyle::Unknown),
            &locator,
            &hierarchy,
            Some(0),
            4,
            false,
        )
        .unwrap();
        let row = enricher
            .enrich(&mut BasicNameParser::new(), strings(&["1", "Homo sapiens", "", "2"]))
            .unwrap();
        assert_eq!(&row[8..11], &["Animalia|Homo sapiens", "|", "2|1"]);
    }

    #[test]
    fn flat_breadcrumbs_fill_in_without_tree() {
        let locator = TaxonLocator {
            scientific_name: Some(1),
            ranks: vec![
                RankColumn {
                    rank: "kingdom",
                    weight: 10,
                    index: 2,
                },
                RankColumn {
                    rank: "family",
                    weight: 60,
                    index: 3,
                },
            ],
            ..TaxonLocator::default()
        };
        let hierarchy = Hierarchy::new();
        let enricher = CoreEnricher::new(
            diagnosis(NameCompleteness::Full, SynonymStyle::Unknown),
            &locator,
            &hierarchy,
            Some(0),
            4,
            false,
        )
        .unwrap();
        let row = enricher
            .enrich(
                &mut BasicNameParser::new(),
                strings(&["1", "Homo sapiens", "Animalia", "Hominidae", "extra"]),
            )
            .unwrap();
        assert_eq!(row.len(), 11);
        assert_eq!(&row[8..11], &["Animalia|Hominidae", "kingdom|family", "|"]);
    }

    #[test]
    fn synonym_corrections() {
        let locator = TaxonLocator {
            scientific_name: Some(1),
            parent_id: Some(2),
            accepted_id: Some(3),
            taxonomic_status: Some(4),
            ..TaxonLocator::default()
        };
        let hierarchy = Hierarchy::new();
        let enricher = CoreEnricher::new(
            diagnosis(NameCompleteness::Unknown, SynonymStyle::AcceptedId),
            &locator,
            &hierarchy,
            Some(0),
            5,
            false,
        )
        .unwrap();
        let row = enricher
            .enrich(
                &mut BasicNameParser::new(),
                strings(&["5", "Aus bus", "", "5", "accepted"]),
            )
            .unwrap();
        assert_eq!(row[3], "");

        let enricher = CoreEnricher::new(
            diagnosis(NameCompleteness::Unknown, SynonymStyle::Hierarchy),
            &locator,
            &hierarchy,
            Some(0),
            5,
            false,
        )
        .unwrap();
        assert_eq!(enricher.appended_terms().last().unwrap(), ACCEPTED_ID_TERM);
        let row = enricher
            .enrich(
                &mut BasicNameParser::new(),
                strings(&["6", "Aus cus", "5", "", "synonym"]),
            )
            .unwrap();
        assert_eq!(row.last().unwrap(), "5");
    }

    #[test]
    fn composite_is_rejected_up_front() {
        let locator = TaxonLocator::default();
        let hierarchy = Hierarchy::new();
        let result = CoreEnricher::new(
            diagnosis(NameCompleteness::Composite, SynonymStyle::Unknown),
            &locator,
            &hierarchy,
            Some(0),
            1,
            false,
        );
        assert_matches!(result, Err(DwcaError::UnsupportedNameShape));
    }

    #[test]
    fn passthrough_leaves_rows_alone() {
        let locator = TaxonLocator::default();
        let hierarchy = Hierarchy::new();
        let enricher = CoreEnricher::new(
            diagnosis(NameCompleteness::Composite, SynonymStyle::Unknown),
            &locator,
            &hierarchy,
            Some(0),
            1,
            true,
        )
        .unwrap();
        assert!(enricher.appended_terms().is_empty());
        let row = strings(&["1", "a", "b"]);
        assert_eq!(enricher.enrich(&mut BasicNameParser::new(), row.clone()).unwrap(), row);
    }
}
