use std::collections::HashMap;
use std::path::Path;

use crate::dialect::Dialect;
use crate::meta::{ArchiveMeta, TableMeta, local_term};

/// One field of a resolved descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub index: usize,
    /// Lower-cased local term name, e.g. `scientificname`.
    pub term: String,
    pub term_full: String,
    pub default: Option<String>,
}

/// Lookup tables for one data file of the archive.
#[derive(Debug, Clone)]
pub struct FileSchema {
    pub name: String,
    pub location: String,
    pub row_type: Option<String>,
    pub id_index: Option<usize>,
    pub max_index: Option<usize>,
    pub dialect: Dialect,
    by_term: HashMap<String, FieldInfo>,
    by_index: HashMap<usize, FieldInfo>,
}

impl FileSchema {
    fn from_table(name: String, table: &TableMeta) -> Self {
        let mut by_term = HashMap::new();
        let mut by_index = HashMap::new();
        for field in &table.fields {
            let Some(index) = field.column() else {
                continue;
            };
            let info = FieldInfo {
                index,
                term: local_term(&field.term).to_lowercase(),
                term_full: field.term.clone(),
                default: field.default.clone(),
            };
            // a repeated local name silently replaces the earlier field
            by_term.insert(info.term.clone(), info.clone());
            by_index.insert(index, info);
        }

        Self {
            name,
            location: table.location().to_string(),
            row_type: table.row_type.clone(),
            id_index: table.id_index(),
            max_index: table.max_index(),
            dialect: Dialect::from_table(table),
            by_term,
            by_index,
        }
    }

    pub fn field(&self, term: &str) -> Option<&FieldInfo> {
        self.by_term.get(&term.to_lowercase())
    }

    pub fn column(&self, term: &str) -> Option<usize> {
        self.field(term).map(|field| field.index)
    }

    pub fn has_term(&self, term: &str) -> bool {
        self.by_term.contains_key(&term.to_lowercase())
    }

    pub fn field_at(&self, index: usize) -> Option<&FieldInfo> {
        self.by_index.get(&index)
    }

    pub fn terms(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_term.values()
    }

    /// Maps a raw row to `term -> value` using the column lookup.
    pub fn term_values(&self, row: &[String]) -> HashMap<String, String> {
        row.iter()
            .enumerate()
            .filter_map(|(index, value)| {
                self.by_index
                    .get(&index)
                    .map(|field| (field.term.clone(), value.clone()))
            })
            .collect()
    }
}

/// Read-only view of `meta.xml` shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub core: FileSchema,
    pub extensions: Vec<FileSchema>,
}

impl ResolvedSchema {
    pub fn resolve(meta: &ArchiveMeta) -> Self {
        let core_name = meta
            .core
            .row_type
            .as_deref()
            .map(|row_type| local_term(row_type).to_lowercase())
            .unwrap_or_else(|| "core".to_string());
        let core = FileSchema::from_table(core_name, &meta.core);
        let extensions = meta
            .extensions
            .iter()
            .map(|ext| FileSchema::from_table(extension_name(ext), ext))
            .collect();
        Self { core, extensions }
    }

    pub fn extension(&self, name: &str) -> Option<&FileSchema> {
        let name = name.to_lowercase();
        self.extensions.iter().find(|ext| ext.name == name)
    }

    pub fn extension_names(&self) -> Vec<String> {
        self.extensions.iter().map(|ext| ext.name.clone()).collect()
    }
}

/// Row type wins over the file stem.
pub fn extension_name(ext: &TableMeta) -> String {
    if let Some(row_type) = ext.row_type.as_deref().filter(|value| !value.trim().is_empty()) {
        return local_term(row_type).to_lowercase();
    }
    Path::new(ext.location())
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Field, Files, IdField};

    fn table(location: &str, fields: Vec<Field>) -> TableMeta {
        TableMeta {
            fields_terminated_by: Some(",".to_string()),
            ignore_header_lines: Some("1".to_string()),
            files: Files {
                location: location.to_string(),
            },
            id: Some(IdField {
                index: Some("0".to_string()),
                term: None,
            }),
            fields,
            ..TableMeta::default()
        }
    }

    #[test]
    fn term_and_index_lookups_agree() {
        let meta = ArchiveMeta {
            xmlns: None,
            metadata: None,
            core: table(
                "taxa.csv",
                vec![
                    Field::new(1, "http://rs.tdwg.org/dwc/terms/scientificName"),
                    Field::new(2, "http://rs.tdwg.org/dwc/terms/taxonRank"),
                ],
            ),
            extensions: Vec::new(),
        };
        let schema = ResolvedSchema::resolve(&meta);
        for field in schema.core.terms() {
            let by_index = schema.core.field_at(field.index).unwrap();
            assert_eq!(by_index.term, field.term);
        }
        assert_eq!(schema.core.column("scientificName"), Some(1));
        assert_eq!(schema.core.column("SCIENTIFICNAME"), Some(1));
    }

    #[test]
    fn last_field_wins_on_term_collision() {
        let meta = ArchiveMeta {
            xmlns: None,
            metadata: None,
            core: table(
                "taxa.csv",
                vec![
                    Field::new(1, "http://rs.tdwg.org/dwc/terms/scientificName"),
                    Field::new(5, "http://example.org/other/scientificName"),
                ],
            ),
            extensions: Vec::new(),
        };
        let schema = ResolvedSchema::resolve(&meta);
        assert_eq!(schema.core.column("scientificname"), Some(5));
        assert_eq!(schema.core.field_at(1).unwrap().term, "scientificname");
    }

    #[test]
    fn extension_name_prefers_row_type() {
        let mut ext = table("synonyms.txt", Vec::new());
        assert_eq!(extension_name(&ext), "synonyms");
        ext.row_type = Some("http://rs.gbif.org/terms/1.0/VernacularName".to_string());
        assert_eq!(extension_name(&ext), "vernacularname");
    }
}
