//! Serde model of the `meta.xml` star-schema descriptor.
//!
//! The descriptor is kept close to its XML shape so it can be written back
//! after the normalizer rewrites locations, delimiters and appended fields.

use serde::{Deserialize, Serialize};

use crate::error::DwcaError;

pub const DEFAULT_EML_FILE: &str = "eml.xml";

/// Highest column index accepted in a descriptor.
pub const MAX_FIELD_INDEX: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename = "archive")]
pub struct ArchiveMeta {
    #[serde(rename = "@xmlns", default, skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(rename = "@metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub core: TableMeta,
    #[serde(rename = "extension", default)]
    pub extensions: Vec<TableMeta>,
}

/// Core or extension file description. Core carries `id`, extensions
/// carry `coreid`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TableMeta {
    #[serde(rename = "@encoding", default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(
        rename = "@fieldsTerminatedBy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fields_terminated_by: Option<String>,
    #[serde(
        rename = "@linesTerminatedBy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub lines_terminated_by: Option<String>,
    #[serde(
        rename = "@fieldsEnclosedBy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fields_enclosed_by: Option<String>,
    #[serde(
        rename = "@ignoreHeaderLines",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ignore_header_lines: Option<String>,
    #[serde(rename = "@rowType", default, skip_serializing_if = "Option::is_none")]
    pub row_type: Option<String>,
    pub files: Files,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<IdField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coreid: Option<IdField>,
    #[serde(rename = "field", default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Files {
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct IdField {
    #[serde(rename = "@index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(rename = "@term", default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Field {
    #[serde(rename = "@index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(rename = "@term", default)]
    pub term: String,
    #[serde(rename = "@default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(
        rename = "@vocabulary",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vocabulary: Option<String>,
}

impl ArchiveMeta {
    pub fn parse(content: &str) -> Result<Self, DwcaError> {
        let meta: ArchiveMeta =
            quick_xml::de::from_str(content).map_err(|err| DwcaError::MetaDecode(err.to_string()))?;
        meta.core.validate("core")?;
        for ext in &meta.extensions {
            ext.validate("extension")?;
        }
        Ok(meta)
    }

    pub fn to_xml(&self) -> Result<String, DwcaError> {
        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut body);
        serializer.indent(' ', 2);
        self.serialize(serializer)
            .map_err(|err| DwcaError::MetaDecode(err.to_string()))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}\n"))
    }

    pub fn eml_file(&self) -> &str {
        match self.metadata.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_EML_FILE,
        }
    }
}

impl TableMeta {
    fn validate(&self, kind: &str) -> Result<(), DwcaError> {
        if self.files.location.trim().is_empty() {
            return Err(DwcaError::MissingLocation(kind.to_string()));
        }
        for id in [&self.id, &self.coreid].into_iter().flatten() {
            parse_index(id.index.as_deref(), id.term.as_deref().unwrap_or(kind))?;
        }
        for field in &self.fields {
            parse_index(field.index.as_deref(), &field.term)?;
        }
        Ok(())
    }

    pub fn location(&self) -> &str {
        self.files.location.trim()
    }

    /// Column of the row identifier (`id` for core, `coreid` for extensions).
    pub fn id_index(&self) -> Option<usize> {
        let id = self.id.as_ref().or(self.coreid.as_ref())?;
        parse_index(id.index.as_deref(), "id").ok().flatten()
    }

    pub fn delimiter(&self) -> u8 {
        match self.fields_terminated_by.as_deref().map(unescape) {
            Some(value) if !value.is_empty() => value.as_bytes()[0],
            _ => b',',
        }
    }

    /// `None` means the file is read without quote handling.
    pub fn quote(&self) -> Option<u8> {
        match self.fields_enclosed_by.as_deref().map(unescape) {
            None => Some(b'"'),
            Some(value) if value.is_empty() => None,
            Some(value) => Some(value.as_bytes()[0]),
        }
    }

    pub fn skips_header(&self) -> bool {
        self.ignore_header_lines
            .as_deref()
            .and_then(|value| value.trim().parse::<u32>().ok())
            .map(|value| value > 0)
            .unwrap_or(false)
    }

    /// Highest column index referenced by a field or the identifier.
    pub fn max_index(&self) -> Option<usize> {
        self.fields
            .iter()
            .filter_map(Field::column)
            .chain(self.id_index())
            .max()
    }
}

impl Field {
    pub fn new(index: usize, term: impl Into<String>) -> Self {
        Self {
            index: Some(index.to_string()),
            term: term.into(),
            default: None,
            vocabulary: None,
        }
    }

    pub fn column(&self) -> Option<usize> {
        parse_index(self.index.as_deref(), &self.term).ok().flatten()
    }

    pub fn local_name(&self) -> &str {
        local_term(&self.term)
    }
}

fn parse_index(index: Option<&str>, term: &str) -> Result<Option<usize>, DwcaError> {
    let Some(raw) = index.map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i64>() {
        Ok(value) if value < 0 => Ok(None),
        Ok(value) if value as u64 <= MAX_FIELD_INDEX as u64 => Ok(Some(value as usize)),
        _ => Err(DwcaError::InvalidFieldIndex {
            index: raw.to_string(),
            term: term.to_string(),
        }),
    }
}

/// Last path segment of a term URI.
pub fn local_term(uri: &str) -> &str {
    let trimmed = uri.trim().trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Decodes the escaped control characters used in delimiter attributes.
pub fn unescape(value: &str) -> String {
    match value {
        "\\t" => "\t".to_string(),
        "\\n" => "\n".to_string(),
        "\\r\\n" => "\r\n".to_string(),
        "\\r" => "\r".to_string(),
        "\\\\" => "\\".to_string(),
        other => other.to_string(),
    }
}

/// Header names for an output file: the local term of the field at each
/// column, `taxonID` for an undescribed identifier column, `unknownN`
/// otherwise.
pub fn headers(id_index: Option<usize>, fields: &[Field]) -> Vec<String> {
    let Some(last) = fields.iter().filter_map(Field::column).chain(id_index).max() else {
        return Vec::new();
    };
    let mut names = vec![None; last + 1];
    for field in fields {
        if let Some(column) = field.column() {
            names[column] = Some(field.local_name().to_string());
        }
    }

    let mut unknown = 0;
    names
        .into_iter()
        .enumerate()
        .map(|(column, name)| match name {
            Some(name) => name,
            None if Some(column) == id_index => "taxonID".to_string(),
            None => {
                unknown += 1;
                format!("unknown{unknown}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const META: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<archive xmlns="http://rs.tdwg.org/dwc/text/" metadata="eml.xml">
  <core encoding="UTF-8" fieldsTerminatedBy="\t" linesTerminatedBy="\n" fieldsEnclosedBy="" ignoreHeaderLines="1" rowType="http://rs.tdwg.org/dwc/terms/Taxon">
    <files>
      <location>taxon.txt</location>
    </files>
    <id index="0" />
    <field index="1" term="http://rs.tdwg.org/dwc/terms/scientificName"/>
    <field index="3" term="http://rs.tdwg.org/dwc/terms/parentNameUsageID"/>
    <field term="http://rs.tdwg.org/dwc/terms/nomenclaturalCode" default="ICZN"/>
  </core>
  <extension fieldsTerminatedBy="," ignoreHeaderLines="1" rowType="http://rs.gbif.org/terms/1.0/VernacularName">
    <files>
      <location>vernacular.csv</location>
    </files>
    <coreid index="0" />
    <field index="1" term="http://rs.tdwg.org/dwc/terms/vernacularName"/>
  </extension>
</archive>"#;

    #[test]
    fn parses_core_and_extension() {
        let meta = ArchiveMeta::parse(META).unwrap();
        assert_eq!(meta.eml_file(), "eml.xml");
        assert_eq!(meta.core.location(), "taxon.txt");
        assert_eq!(meta.core.delimiter(), b'\t');
        assert_eq!(meta.core.quote(), None);
        assert!(meta.core.skips_header());
        assert_eq!(meta.core.id_index(), Some(0));
        assert_eq!(meta.core.max_index(), Some(3));
        assert_eq!(meta.core.fields[2].column(), None);

        let ext = &meta.extensions[0];
        assert_eq!(ext.delimiter(), b',');
        assert_eq!(ext.quote(), Some(b'"'));
        assert_eq!(ext.id_index(), Some(0));
    }

    #[test]
    fn rejects_non_numeric_index() {
        let broken = META.replace(r#"index="3""#, r#"index="three""#);
        let err = ArchiveMeta::parse(&broken).unwrap_err();
        assert_matches!(err, DwcaError::InvalidFieldIndex { .. });
    }

    #[test]
    fn rejects_huge_index() {
        let broken = META.replace(r#"index="3""#, r#"index="4000000000""#);
        let err = ArchiveMeta::parse(&broken).unwrap_err();
        assert_matches!(err, DwcaError::InvalidFieldIndex { index, .. } if index == "4000000000");

        let broken = META.replace(r#"<id index="0" />"#, r#"<id index="10001" />"#);
        assert_matches!(
            ArchiveMeta::parse(&broken),
            Err(DwcaError::InvalidFieldIndex { .. })
        );
        assert!(ArchiveMeta::parse(&META.replace(r#"index="3""#, r#"index="10000""#)).is_ok());
    }

    #[test]
    fn writes_back_parseable_xml() {
        let meta = ArchiveMeta::parse(META).unwrap();
        let xml = meta.to_xml().unwrap();
        let again = ArchiveMeta::parse(&xml).unwrap();
        assert_eq!(again.core.fields.len(), 3);
        assert_eq!(again.core.delimiter(), b'\t');
        assert_eq!(again.extensions[0].location(), "vernacular.csv");
    }

    #[test]
    fn headers_fill_identifier_and_gaps() {
        let fields = vec![
            Field::new(1, "http://rs.tdwg.org/dwc/terms/scientificName"),
            Field::new(4, "http://rs.tdwg.org/dwc/terms/taxonRank"),
        ];
        let names = headers(Some(0), &fields);
        assert_eq!(
            names,
            vec!["taxonID", "scientificName", "unknown1", "unknown2", "taxonRank"]
        );
    }
}
