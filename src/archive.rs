use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};
use xz2::read::XzDecoder;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::config::ArchiveFormat;
use crate::error::DwcaError;
use crate::workspace::walk_dir;

pub const META_FILE: &str = "meta.xml";

/// Container formats recognised by file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveKind {
    /// Unknown suffixes are treated as zip.
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            ArchiveKind::TarBz2
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            ArchiveKind::TarXz
        } else if name.ends_with(".tar") {
            ArchiveKind::Tar
        } else {
            if !name.ends_with(".zip") {
                info!(file = %name, "unknown archive suffix, trying zip");
            }
            ArchiveKind::Zip
        }
    }
}

pub fn extract(path: &Path, kind: ArchiveKind, target_dir: &Path) -> Result<(), DwcaError> {
    debug!(archive = %path.display(), ?kind, target = %target_dir.display(), "extracting");
    fs::create_dir_all(target_dir).map_err(|err| extract_error(target_dir, err))?;
    match kind {
        ArchiveKind::Zip => extract_zip(path, target_dir),
        ArchiveKind::Tar => {
            let file = fs::File::open(path).map_err(|err| extract_error(path, err))?;
            unpack_tar(path, file, target_dir)
        }
        ArchiveKind::TarGz => {
            let file = fs::File::open(path).map_err(|err| extract_error(path, err))?;
            unpack_tar(path, GzDecoder::new(file), target_dir)
        }
        ArchiveKind::TarBz2 => {
            let file = fs::File::open(path).map_err(|err| extract_error(path, err))?;
            unpack_tar(path, BzDecoder::new(file), target_dir)
        }
        ArchiveKind::TarXz => {
            let file = fs::File::open(path).map_err(|err| extract_error(path, err))?;
            unpack_tar(path, XzDecoder::new(file), target_dir)
        }
    }
}

fn extract_error(path: &Path, err: impl ToString) -> DwcaError {
    DwcaError::Extract {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), DwcaError> {
    let file = fs::File::open(zip_path).map_err(|err| extract_error(zip_path, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| extract_error(zip_path, err))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| extract_error(zip_path, err))?;
        let Some(entry_path) = entry.enclosed_name().map(|path| target_dir.join(path)) else {
            return Err(extract_error(zip_path, "zip entry path traversal detected"));
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| extract_error(&entry_path, err))?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| extract_error(parent, err))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| extract_error(&entry_path, err))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| extract_error(&entry_path, err))?;
    }
    Ok(())
}

fn unpack_tar(path: &Path, reader: impl io::Read, target_dir: &Path) -> Result<(), DwcaError> {
    let mut archive = tar::Archive::new(reader);
    archive
        .unpack(target_dir)
        .map_err(|err| extract_error(path, err))
}

/// Directory holding the archive's only `meta.xml`.
pub fn locate_meta_dir(root: &Path) -> Result<PathBuf, DwcaError> {
    let found: Vec<PathBuf> = walk_dir(root)?
        .into_iter()
        .filter(|path| path.is_file() && path.file_name().is_some_and(|name| name == META_FILE))
        .collect();
    match found.as_slice() {
        [] => Err(DwcaError::MetaNotFound(root.to_path_buf())),
        [meta] => Ok(meta
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf())),
        _ => Err(DwcaError::MultipleMetaFiles(root.to_path_buf())),
    }
}

/// Packs every file below `dir` into `target`, with paths relative to `dir`.
pub fn compress(dir: &Path, target: &Path, format: ArchiveFormat) -> Result<(), DwcaError> {
    let mut files: Vec<(PathBuf, String)> = walk_dir(dir)?
        .into_iter()
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let name = path
                .strip_prefix(dir)
                .ok()?
                .components()
                .map(|part| part.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            Some((path, name))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| write_error(parent, err))?;
    }
    let out = fs::File::create(target).map_err(|err| write_error(target, err))?;
    match format {
        ArchiveFormat::Zip => {
            let mut writer = zip::ZipWriter::new(out);
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            for (path, name) in &files {
                writer
                    .start_file(name.as_str(), options)
                    .map_err(|err| write_error(target, err))?;
                let mut input = fs::File::open(path).map_err(|err| write_error(path, err))?;
                io::copy(&mut input, &mut writer).map_err(|err| write_error(target, err))?;
            }
            writer.finish().map_err(|err| write_error(target, err))?;
        }
        ArchiveFormat::Tar => {
            let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
            for (path, name) in &files {
                builder
                    .append_path_with_name(path, name)
                    .map_err(|err| write_error(target, err))?;
            }
            builder
                .into_inner()
                .and_then(|encoder| encoder.finish())
                .map_err(|err| write_error(target, err))?;
        }
    }
    info!(archive = %target.display(), files = files.len(), "archive written");
    Ok(())
}

fn write_error(path: &Path, err: impl ToString) -> DwcaError {
    DwcaError::FileWrite {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn detects_by_suffix() {
        assert_eq!(ArchiveKind::detect(Path::new("a/b.ZIP")), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::detect(Path::new("b.tar.gz")), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect(Path::new("b.tgz")), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect(Path::new("b.tar")), ArchiveKind::Tar);
        assert_eq!(ArchiveKind::detect(Path::new("b.tar.xz")), ArchiveKind::TarXz);
        assert_eq!(ArchiveKind::detect(Path::new("b.tar.bz2")), ArchiveKind::TarBz2);
        assert_eq!(ArchiveKind::detect(Path::new("dataset")), ArchiveKind::Zip);
    }

    #[test]
    fn meta_dir_must_be_unique() {
        let temp = tempfile::tempdir().unwrap();
        let err = locate_meta_dir(temp.path()).unwrap_err();
        assert_matches!(err, DwcaError::MetaNotFound(_));

        let nested = temp.path().join("dwca");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(META_FILE), "<archive/>").unwrap();
        assert_eq!(locate_meta_dir(temp.path()).unwrap(), nested);

        fs::write(temp.path().join(META_FILE), "<archive/>").unwrap();
        let err = locate_meta_dir(temp.path()).unwrap_err();
        assert_matches!(err, DwcaError::MultipleMetaFiles(_));
    }

    #[test]
    fn compressed_tree_extracts_back() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("source");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join(META_FILE), "<archive/>").unwrap();
        fs::write(source.join("nested").join("taxon.txt"), "id\n1\n").unwrap();

        for (format, name) in [(ArchiveFormat::Zip, "out.zip"), (ArchiveFormat::Tar, "out.tar.gz")] {
            let target = temp.path().join(name);
            compress(&source, &target, format).unwrap();
            let back = temp.path().join(format!("back-{name}"));
            extract(&target, ArchiveKind::detect(&target), &back).unwrap();
            let content = fs::read_to_string(back.join("nested").join("taxon.txt")).unwrap();
            assert_eq!(content, "id\n1\n");
            assert_eq!(locate_meta_dir(&back).unwrap(), back);
        }
    }

    fn packed_source(temp: &Path) -> PathBuf {
        let source = temp.join("source");
        fs::create_dir_all(source.join("dwca")).unwrap();
        fs::write(source.join("dwca").join(META_FILE), "<archive/>").unwrap();
        fs::write(source.join("dwca").join("taxon.txt"), "id\n1\n").unwrap();
        source
    }

    fn pack_tar(source: &Path, writer: impl io::Write) -> impl io::Write {
        let mut builder = tar::Builder::new(writer);
        builder.append_dir_all(".", source).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn bzip2_tar_extracts() {
        let temp = tempfile::tempdir().unwrap();
        let source = packed_source(temp.path());
        let target = temp.path().join("data.tar.bz2");
        let file = fs::File::create(&target).unwrap();
        let encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        drop(pack_tar(&source, encoder));

        let back = temp.path().join("back");
        extract(&target, ArchiveKind::detect(&target), &back).unwrap();
        let dir = locate_meta_dir(&back).unwrap();
        assert_eq!(fs::read_to_string(dir.join("taxon.txt")).unwrap(), "id\n1\n");
    }

    #[test]
    fn xz_tar_extracts() {
        let temp = tempfile::tempdir().unwrap();
        let source = packed_source(temp.path());
        let target = temp.path().join("data.tar.xz");
        let file = fs::File::create(&target).unwrap();
        drop(pack_tar(&source, xz2::write::XzEncoder::new(file, 6)));

        let back = temp.path().join("back");
        extract(&target, ArchiveKind::detect(&target), &back).unwrap();
        let dir = locate_meta_dir(&back).unwrap();
        assert_eq!(fs::read_to_string(dir.join("taxon.txt")).unwrap(), "id\n1\n");
    }

    #[test]
    fn corrupt_xz_is_an_extract_error() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("data.tar.xz");
        fs::write(&target, b"not xz at all").unwrap();
        let err = extract(&target, ArchiveKind::TarXz, &temp.path().join("out")).unwrap_err();
        assert_matches!(err, DwcaError::Extract { .. });
    }
}
