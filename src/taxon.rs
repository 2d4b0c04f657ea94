use crate::schema::FileSchema;

/// A Linnaean rank column present in the core file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankColumn {
    pub rank: &'static str,
    pub weight: u16,
    pub index: usize,
}

const RANKS: [(&str, u16); 11] = [
    ("domain", 5),
    ("kingdom", 10),
    ("phylum", 20),
    ("class", 30),
    ("order", 40),
    ("superfamily", 50),
    ("family", 60),
    ("subfamily", 70),
    ("tribe", 80),
    ("subtribe", 90),
    ("genus", 100),
];

const SYNONYM_STATUSES: [&str; 4] = ["synonym", "homonym", "misapplied", "ambiguous"];
const SYNONYM_FRAGMENTS: [&str; 3] = ["synonym", "miss", "un"];

/// Column positions of the taxonomic terms the normalizer cares about.
/// `None` means the term is not in the core file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonLocator {
    pub scientific_name: Option<usize>,
    pub authorship: Option<usize>,
    pub taxon_id: Option<usize>,
    pub parent_id: Option<usize>,
    pub higher_taxon_id: Option<usize>,
    pub accepted_id: Option<usize>,
    pub taxonomic_status: Option<usize>,
    pub taxon_rank: Option<usize>,
    pub specific_epithet: Option<usize>,
    /// Ordered from domain down to genus.
    pub ranks: Vec<RankColumn>,
}

impl TaxonLocator {
    pub fn locate(core: &FileSchema) -> Self {
        let mut ranks: Vec<RankColumn> = RANKS
            .iter()
            .filter_map(|(rank, weight)| {
                core.column(rank).map(|index| RankColumn {
                    rank,
                    weight: *weight,
                    index,
                })
            })
            .collect();
        ranks.sort_by_key(|column| column.weight);

        Self {
            scientific_name: core.column("scientificname"),
            authorship: core.column("scientificnameauthorship"),
            taxon_id: core.column("taxonid"),
            parent_id: core.column("parentnameusageid"),
            higher_taxon_id: core.column("highertaxonid"),
            accepted_id: core.column("acceptednameusageid"),
            taxonomic_status: core.column("taxonomicstatus"),
            taxon_rank: core.column("taxonrank"),
            specific_epithet: core.column("specificepithet"),
            ranks,
        }
    }

    pub fn has_tree_links(&self) -> bool {
        self.parent_id.is_some() || self.higher_taxon_id.is_some()
    }

    /// Trimmed scientific name and authorship; empty strings when absent.
    pub fn name_and_authorship(&self, row: &[String]) -> (String, String) {
        let Some(name) = value(row, self.scientific_name) else {
            return (String::new(), String::new());
        };
        let authorship = value(row, self.authorship).unwrap_or_default();
        (name.to_string(), authorship.to_string())
    }

    /// Parent usage id, falling back to the higher taxon id when the parent
    /// column is absent or empty.
    pub fn parent(&self, row: &[String]) -> String {
        value(row, self.parent_id)
            .filter(|parent| !parent.is_empty())
            .or_else(|| value(row, self.higher_taxon_id))
            .unwrap_or_default()
            .to_string()
    }

    pub fn accepted(&self, row: &[String]) -> String {
        value(row, self.accepted_id).unwrap_or_default().to_string()
    }

    pub fn rank(&self, row: &[String]) -> String {
        value(row, self.taxon_rank).unwrap_or_default().to_string()
    }

    pub fn is_synonym(&self, row: &[String]) -> bool {
        let Some(status) = value(row, self.taxonomic_status) else {
            return false;
        };
        let status = status.to_lowercase();
        SYNONYM_STATUSES.contains(&status.as_str())
            || SYNONYM_FRAGMENTS
                .iter()
                .any(|fragment| status.contains(fragment))
    }
}

fn value(row: &[String], index: Option<usize>) -> Option<&str> {
    index.and_then(|index| row.get(index)).map(|value| value.trim())
}
