use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{self, ArchiveKind, META_FILE};
use crate::config::{Config, OutputDelimiter};
use crate::diagnose::{Diagnosis, SAMPLE_SIZE, SampleRow};
use crate::dialect::{Dialect, DialectReader, DialectWriter, Row};
use crate::enrich::{self, CoreEnricher};
use crate::error::DwcaError;
use crate::fetch::{self, ArchiveFetcher, HttpFetcher};
use crate::hierarchy::Hierarchy;
use crate::meta::{self, ArchiveMeta, DEFAULT_EML_FILE, Field, TableMeta};
use crate::names::{BasicNameParser, ParserPool};
use crate::pipeline::{CancelToken, Pipeline};
use crate::schema::{FileSchema, ResolvedSchema};
use crate::taxon::TaxonLocator;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionSummary {
    pub name: String,
    pub location: String,
    pub rows: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeSummary {
    pub input: String,
    pub output_dir: String,
    pub archive: Option<String>,
    pub diagnosis: Diagnosis,
    pub core_rows: u64,
    pub core_skipped: u64,
    pub hierarchy_nodes: usize,
    pub appended_terms: Vec<String>,
    pub extensions: Vec<ExtensionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectSummary {
    pub input: String,
    pub core: String,
    pub sampled_rows: usize,
    pub diagnosis: Diagnosis,
    pub extensions: Vec<String>,
}

#[derive(Debug, Default)]
struct StreamStats {
    rows: u64,
    skipped: u64,
}

/// A loaded Darwin Core Archive: extracted, described and classified.
pub struct Archive {
    config: Config,
    workspace: Workspace,
    input: String,
    data_dir: PathBuf,
    meta: ArchiveMeta,
    eml: Option<PathBuf>,
    schema: ResolvedSchema,
    locator: TaxonLocator,
    diagnosis: Diagnosis,
    cancel: CancelToken,
}

impl Archive {
    /// Opens a local archive, an extracted directory or an http(s) URL.
    pub fn open(config: Config, input: &str) -> Result<Self, DwcaError> {
        if fetch::is_remote(input) {
            let fetcher = HttpFetcher::new()?;
            return Self::open_with(config, input, &fetcher);
        }
        Self::load(config, input, Path::new(input))
    }

    pub fn open_with(
        config: Config,
        input: &str,
        fetcher: &dyn ArchiveFetcher,
    ) -> Result<Self, DwcaError> {
        if !fetch::is_remote(input) {
            return Self::load(config, input, Path::new(input));
        }
        let workspace = Workspace::from_config(&config);
        workspace.reset()?;
        let destination = workspace
            .download_root()
            .join(fetch::file_name_from_url(input));
        fetcher.fetch(input, destination.as_std_path())?;
        Self::load(config, input, destination.as_std_path())
    }

    fn load(config: Config, input: &str, source: &Path) -> Result<Self, DwcaError> {
        let workspace = Workspace::from_config(&config);
        workspace.reset()?;

        let root = if source.is_dir() {
            source.to_path_buf()
        } else {
            if !source.exists() {
                return Err(DwcaError::FileRead {
                    path: source.to_path_buf(),
                    message: "no such file".to_string(),
                });
            }
            let target = workspace.extract_root().as_std_path().to_path_buf();
            archive::extract(source, ArchiveKind::detect(source), &target)?;
            target
        };
        let data_dir = archive::locate_meta_dir(&root)?;

        let meta_path = data_dir.join(META_FILE);
        let content = fs::read_to_string(&meta_path).map_err(|err| DwcaError::FileRead {
            path: meta_path.clone(),
            message: err.to_string(),
        })?;
        let meta = ArchiveMeta::parse(&content)?;

        let eml_path = data_dir.join(meta.eml_file());
        let eml = eml_path.is_file().then_some(eml_path);
        if eml.is_none() {
            warn!(file = meta.eml_file(), "metadata file is missing");
        }

        let mut schema = ResolvedSchema::resolve(&meta);
        schema.core.dialect = schema.core.dialect.with_policy(config.bad_row);
        for ext in &mut schema.extensions {
            ext.dialect = ext.dialect.with_policy(config.bad_row);
        }
        let locator = TaxonLocator::locate(&schema.core);

        let mut archive = Self {
            config,
            workspace,
            input: input.to_string(),
            data_dir,
            meta,
            eml,
            schema,
            locator,
            diagnosis: Diagnosis::default(),
            cancel: CancelToken::new(),
        };
        archive.diagnosis = archive.diagnose()?;
        info!(
            input = %archive.input,
            core = %archive.schema.core.location,
            extensions = archive.schema.extensions.len(),
            names = %archive.diagnosis.names,
            synonyms = %archive.diagnosis.synonyms,
            hierarchy = %archive.diagnosis.hierarchy,
            "archive loaded"
        );
        Ok(archive)
    }

    fn diagnose(&self) -> Result<Diagnosis, DwcaError> {
        let sample: Vec<SampleRow> = self
            .core_slice(0, SAMPLE_SIZE)?
            .iter()
            .map(|row| self.schema.core.term_values(row))
            .collect();
        if sample.is_empty() {
            return Err(DwcaError::NoCoreData);
        }
        Ok(Diagnosis::classify(
            &mut BasicNameParser::new(),
            &sample,
            &self.schema.extension_names(),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn meta(&self) -> &ArchiveMeta {
        &self.meta
    }

    pub fn schema(&self) -> &ResolvedSchema {
        &self.schema
    }

    pub fn diagnosis(&self) -> Diagnosis {
        self.diagnosis
    }

    pub fn locator(&self) -> &TaxonLocator {
        &self.locator
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn eml_path(&self) -> Option<&Path> {
        self.eml.as_deref()
    }

    /// Token shared by every pipeline this archive runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn extension_schema(&self, index: usize) -> Result<&FileSchema, DwcaError> {
        self.schema.extensions.get(index).ok_or_else(|| {
            DwcaError::InvalidOption(format!(
                "extension index {index} is out of range (archive has {})",
                self.schema.extensions.len()
            ))
        })
    }

    fn reader(&self, file: &FileSchema) -> Result<DialectReader, DwcaError> {
        DialectReader::open(&self.data_dir.join(&file.location), file.dialect)
    }

    /// `limit == 0` reads to the end.
    pub fn core_slice(&self, offset: usize, limit: usize) -> Result<Vec<Row>, DwcaError> {
        self.reader(&self.schema.core)?.read_slice(offset, limit)
    }

    pub fn extension_slice(
        &self,
        index: usize,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Row>, DwcaError> {
        self.reader(self.extension_schema(index)?)?
            .read_slice(offset, limit)
    }

    pub fn core_stream(&self, tx: &Sender<Row>, cancel: &CancelToken) -> Result<u64, DwcaError> {
        Ok(self.stream(&self.schema.core, tx, cancel)?.rows)
    }

    pub fn extension_stream(
        &self,
        index: usize,
        tx: &Sender<Row>,
        cancel: &CancelToken,
    ) -> Result<u64, DwcaError> {
        Ok(self.stream(self.extension_schema(index)?, tx, cancel)?.rows)
    }

    fn stream(
        &self,
        file: &FileSchema,
        tx: &Sender<Row>,
        cancel: &CancelToken,
    ) -> Result<StreamStats, DwcaError> {
        let mut reader = self.reader(file)?;
        let rows = reader.stream(tx, cancel)?;
        Ok(StreamStats {
            rows,
            skipped: reader.skipped(),
        })
    }

    /// Writes the normalized core, extensions, `meta.xml` and `eml.xml`
    /// into the workspace output directory.
    pub fn normalize(&self) -> Result<NormalizeSummary, DwcaError> {
        let core = &self.schema.core;
        let passthrough = core.has_term("scientificnamestring");
        enrich::ensure_supported(self.diagnosis, passthrough)?;

        let jobs = self.config.jobs;
        let pool = ParserPool::basic(jobs);
        let hierarchy = if !passthrough
            && self.locator.scientific_name.is_some()
            && self.locator.has_tree_links()
        {
            Hierarchy::build(
                |tx, cancel| self.core_stream(tx, cancel),
                &self.locator,
                core.id_index,
                &pool,
                jobs,
                &self.cancel,
            )?
        } else {
            Hierarchy::new()
        };

        let width = core.max_index.map_or(0, |max| max + 1);
        let enricher = CoreEnricher::new(
            self.diagnosis,
            &self.locator,
            &hierarchy,
            core.id_index,
            width,
            passthrough,
        )?;
        let appended_terms = enricher.appended_terms();

        let mut core_fields = self.meta.core.fields.clone();
        core_fields.extend(
            appended_terms
                .iter()
                .enumerate()
                .map(|(offset, term)| Field::new(width + offset, term.as_str())),
        );
        let delimiter = self.config.output_delimiter;
        let mut output_meta = ArchiveMeta {
            xmlns: self.meta.xmlns.clone(),
            metadata: Some(DEFAULT_EML_FILE.to_string()),
            core: output_table(&self.meta.core, core_fields, delimiter),
            extensions: Vec::new(),
        };

        let mut stats = StreamStats::default();
        let headers = meta::headers(core.id_index, &output_meta.core.fields);
        let mut writer = self.create_writer(output_meta.core.location(), &headers)?;
        Pipeline::new("core", jobs, self.cancel.clone()).run(
            |tx, cancel| {
                stats = self.stream(core, tx, cancel)?;
                Ok(stats.rows)
            },
            || {
                let mut parser = pool.checkout()?;
                let enricher = &enricher;
                Ok(move |row: Row| enricher.enrich(&mut *parser, row))
            },
            |row: Row| writer.write_row(&row),
        )?;
        let core_rows = writer.finish()?;
        info!(file = output_meta.core.location(), rows = core_rows, "core written");

        let mut extensions = Vec::with_capacity(self.schema.extensions.len());
        for (ext_schema, ext_meta) in self.schema.extensions.iter().zip(&self.meta.extensions) {
            let table = output_table(ext_meta, ext_meta.fields.clone(), delimiter);
            let summary = self.copy_extension(ext_schema, &table)?;
            extensions.push(summary);
            output_meta.extensions.push(table);
        }

        self.write_metadata(&output_meta)?;

        Ok(NormalizeSummary {
            input: self.input.clone(),
            output_dir: self.workspace.output_root().to_string(),
            archive: None,
            diagnosis: self.diagnosis,
            core_rows,
            core_skipped: stats.skipped,
            hierarchy_nodes: hierarchy.len(),
            appended_terms,
            extensions,
        })
    }

    fn create_writer(&self, location: &str, headers: &[String]) -> Result<DialectWriter, DwcaError> {
        let path = self.workspace.output_path(location);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DwcaError::Filesystem(format!("create {parent}: {err}")))?;
        }
        DialectWriter::create(
            path.as_std_path(),
            &Dialect::output(self.config.output_delimiter),
            headers,
        )
    }

    fn copy_extension(
        &self,
        file: &FileSchema,
        table: &TableMeta,
    ) -> Result<ExtensionSummary, DwcaError> {
        info!(extension = %file.name, "processing extension");
        let width = file.max_index.map_or(0, |max| max + 1);
        let headers = meta::headers(file.id_index, &table.fields);
        let mut writer = self.create_writer(table.location(), &headers)?;
        let mut stats = StreamStats::default();
        Pipeline::new("extension", self.config.jobs, self.cancel.clone()).run(
            |tx, cancel| {
                stats = self.stream(file, tx, cancel)?;
                Ok(stats.rows)
            },
            || Ok(move |row: Row| Ok(enrich::fit_width(row, width))),
            |row: Row| writer.write_row(&row),
        )?;
        let rows = writer.finish()?;
        Ok(ExtensionSummary {
            name: file.name.clone(),
            location: table.location().to_string(),
            rows,
            skipped: stats.skipped,
        })
    }

    fn write_metadata(&self, output_meta: &ArchiveMeta) -> Result<(), DwcaError> {
        let xml = output_meta.to_xml()?;
        Workspace::write_bytes_atomic(&self.workspace.output_path(META_FILE), xml.as_bytes())?;
        match &self.eml {
            Some(eml) => {
                Workspace::copy_file_atomic(eml, &self.workspace.output_path(DEFAULT_EML_FILE))?
            }
            None => warn!("no metadata file to copy into the normalized archive"),
        }
        Ok(())
    }

    /// Packs the output directory into `target`.
    pub fn compress_normalized(&self, target: &Path) -> Result<(), DwcaError> {
        archive::compress(
            self.workspace.output_root().as_std_path(),
            target,
            self.config.archive_format,
        )
    }

    /// Normalizes and packs the result in one go.
    pub fn normalize_to(&self, target: &Path) -> Result<NormalizeSummary, DwcaError> {
        let mut summary = self.normalize()?;
        self.compress_normalized(target)?;
        summary.archive = Some(target.display().to_string());
        Ok(summary)
    }

    pub fn inspect(&self) -> Result<InspectSummary, DwcaError> {
        Ok(InspectSummary {
            input: self.input.clone(),
            core: self.schema.core.location.clone(),
            sampled_rows: self.core_slice(0, SAMPLE_SIZE)?.len(),
            diagnosis: self.diagnosis,
            extensions: self.schema.extension_names(),
        })
    }

    /// Removes every scratch directory of the workspace.
    pub fn close(self) -> Result<(), DwcaError> {
        self.workspace.clear()
    }
}

/// Default output file for `input`: `<input>.norm.<zip|tar.gz>`.
pub fn default_output_path(input: &str, config: &Config) -> Utf8PathBuf {
    let base = if fetch::is_remote(input) {
        fetch::file_name_from_url(input)
    } else {
        input.trim_end_matches(['/', '\\']).to_string()
    };
    Utf8PathBuf::from(format!(
        "{base}.norm.{}",
        config.archive_format.extension()
    ))
}

/// Descriptor of a rewritten file: `.txt` location, output delimiter,
/// one header line.
fn output_table(source: &TableMeta, fields: Vec<Field>, delimiter: OutputDelimiter) -> TableMeta {
    let location = Path::new(source.location())
        .with_extension("txt")
        .to_string_lossy()
        .replace('\\', "/");
    TableMeta {
        encoding: Some("UTF-8".to_string()),
        fields_terminated_by: Some(delimiter.meta_value().to_string()),
        lines_terminated_by: Some("\\n".to_string()),
        fields_enclosed_by: Some(delimiter.meta_quote().to_string()),
        ignore_header_lines: Some("1".to_string()),
        row_type: source.row_type.clone(),
        files: meta::Files { location },
        id: source.id.clone(),
        coreid: source.coreid.clone(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Files, IdField};

    #[test]
    fn output_table_rewrites_layout() {
        let source = TableMeta {
            fields_terminated_by: Some("\\t".to_string()),
            fields_enclosed_by: Some(String::new()),
            ignore_header_lines: Some("0".to_string()),
            files: Files {
                location: "taxa.tsv".to_string(),
            },
            id: Some(IdField {
                index: Some("0".to_string()),
                term: None,
            }),
            ..TableMeta::default()
        };
        let table = output_table(&source, Vec::new(), OutputDelimiter::Csv);
        assert_eq!(table.location(), "taxa.txt");
        assert_eq!(table.delimiter(), b',');
        assert_eq!(table.quote(), Some(b'"'));
        assert!(table.skips_header());
        assert_eq!(table.id_index(), Some(0));

        let table = output_table(&source, Vec::new(), OutputDelimiter::Tsv);
        assert_eq!(table.delimiter(), b'\t');
        assert_eq!(table.quote(), None);
    }

    #[test]
    fn default_output_name() {
        let config = Config::new(Utf8PathBuf::from("/tmp/dwca"));
        assert_eq!(
            default_output_path("data/vascan.zip", &config),
            Utf8PathBuf::from("data/vascan.zip.norm.zip")
        );
        assert_eq!(
            default_output_path("https://example.org/ioc.tar.gz", &config),
            Utf8PathBuf::from("ioc.tar.gz.norm.zip")
        );
    }
}
