//! File placement
//!
//! Materializes a task's `files` before its actions run: fetch, extract,
//! verify, template, set permissions and link, in that order.

use crate::config::File;
use crate::error::{FileError, FileResult};
use crate::runner::template::TemplateStore;
use crate::utils::{copy_path, download_to_file, is_url, remove_path};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256, Sha512};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Bytes inspected when deciding whether a file is text
const TEXT_SNIFF_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Sha256,
    Sha512,
}

/// Place every file in order, stopping at the first failure
pub fn place_files(files: &[File], store: &TemplateStore, working_dir: &Path) -> FileResult<()> {
    for file in files {
        place_file(file, store, working_dir)?;
    }
    Ok(())
}

/// Place a single file
pub fn place_file(file: &File, store: &TemplateStore, working_dir: &Path) -> FileResult<()> {
    let source = store.substitute(&file.source);
    let target = working_dir.join(store.substitute(&file.target));
    info!(source = %source, target = %target.display(), "placing file");

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| FileError::Copy {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if is_url(&source) {
        download_to_file(&source, &target).map_err(|error| FileError::Download {
            url: source.clone(),
            error,
        })?;
    } else {
        let from = working_dir.join(&source);
        copy_path(&from, &target).map_err(|source| FileError::Copy { path: from, source })?;
    }

    let placed = match &file.extract_path {
        Some(extract) => {
            let dest = working_dir.join(store.substitute(extract));
            let format = archive_format(&source)
                .or_else(|| archive_format(&target.to_string_lossy()))
                .ok_or_else(|| FileError::Extract {
                    archive: target.clone(),
                    dest: dest.clone(),
                    error: "unsupported archive format".to_string(),
                })?;
            extract_archive(&target, &dest, format)?;
            dest
        }
        None => target.clone(),
    };

    if let Some(shasum) = &file.shasum {
        verify_checksum(&placed, shasum)?;
    }

    template_files(&placed, store)?;
    set_permissions(&target, file.executable)?;

    for link in &file.symlinks {
        let link = working_dir.join(store.substitute(link));
        create_symlink(&target, &link)?;
    }

    Ok(())
}

fn archive_format(name: &str) -> Option<ArchiveFormat> {
    let name = name.to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

/// Replace `dest` with the contents of `archive`
fn extract_archive(archive: &Path, dest: &Path, format: ArchiveFormat) -> FileResult<()> {
    let extract_error = |error: String| FileError::Extract {
        archive: archive.to_path_buf(),
        dest: dest.to_path_buf(),
        error,
    };

    remove_path(dest).map_err(|e| extract_error(e.to_string()))?;
    fs::create_dir_all(dest).map_err(|e| extract_error(e.to_string()))?;
    let reader = fs::File::open(archive).map_err(|e| extract_error(e.to_string()))?;

    debug!(archive = %archive.display(), dest = %dest.display(), ?format, "extracting");
    match format {
        ArchiveFormat::Tar => tar::Archive::new(reader)
            .unpack(dest)
            .map_err(|e| extract_error(e.to_string())),
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(reader))
            .unpack(dest)
            .map_err(|e| extract_error(e.to_string())),
        ArchiveFormat::Zip => zip::ZipArchive::new(reader)
            .and_then(|mut zip| zip.extract(dest))
            .map_err(|e| extract_error(e.to_string())),
    }
}

/// Parse `<hex>` (sha256) or `<algo>:<hex>`
fn parse_checksum(shasum: &str) -> FileResult<(Algorithm, String)> {
    let (algorithm, expected) = match shasum.split_once(':') {
        Some((algo, hex)) => match algo.to_lowercase().as_str() {
            "sha256" => (Algorithm::Sha256, hex),
            "sha512" => (Algorithm::Sha512, hex),
            _ => return Err(FileError::InvalidChecksum(shasum.to_string())),
        },
        None => (Algorithm::Sha256, shasum),
    };

    if expected.is_empty() || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FileError::InvalidChecksum(shasum.to_string()));
    }
    Ok((algorithm, expected.to_lowercase()))
}

fn verify_checksum(path: &Path, shasum: &str) -> FileResult<()> {
    let (algorithm, expected) = parse_checksum(shasum)?;
    let actual = match algorithm {
        Algorithm::Sha256 => digest_path::<Sha256>(path),
        Algorithm::Sha512 => digest_path::<Sha512>(path),
    }
    .map_err(|source| FileError::Copy {
        path: path.to_path_buf(),
        source,
    })?;

    if actual != expected {
        return Err(FileError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Hex digest of a file, or of a directory as ordered relative paths and contents
fn digest_path<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut hasher = D::new();
    if path.is_dir() {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
            hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update(fs::read(entry.path())?);
        }
    } else {
        hasher.update(fs::read(path)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn files_under(path: &Path) -> Vec<PathBuf> {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Substitute `${NAME}` in every text file at or under `path`
fn template_files(path: &Path, store: &TemplateStore) -> FileResult<()> {
    for file in files_under(path) {
        let template_error = |source| FileError::Template {
            path: file.clone(),
            source,
        };
        if !is_text_file(&file).map_err(template_error)? {
            continue;
        }

        let contents = fs::read_to_string(&file).map_err(template_error)?;
        let rendered = store
            .substitute_file_content(&contents)
            .map_err(template_error)?;
        if rendered != contents {
            debug!(file = %file.display(), "templated file");
            fs::write(&file, rendered).map_err(template_error)?;
        }
    }
    Ok(())
}

/// No NUL byte in the first few KiB and valid UTF-8 throughout
fn is_text_file(path: &Path) -> std::io::Result<bool> {
    let mut head = Vec::with_capacity(TEXT_SNIFF_LEN);
    fs::File::open(path)?
        .take(TEXT_SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    if head.contains(&0) {
        return Ok(false);
    }
    Ok(std::str::from_utf8(&fs::read(path)?).is_ok())
}

/// Mode of the fetched target only; extracted entries keep their archive modes
#[cfg(unix)]
fn set_permissions(path: &Path, executable: bool) -> FileResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if executable || path.is_dir() { 0o700 } else { 0o600 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        FileError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _executable: bool) -> FileResult<()> {
    Ok(())
}

fn create_symlink(target: &Path, link: &Path) -> FileResult<()> {
    let symlink_error = |source| FileError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        source,
    };

    remove_path(link).map_err(symlink_error)?;
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(symlink_error)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link).map_err(symlink_error)?;
    #[cfg(windows)]
    {
        if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link).map_err(symlink_error)?;
        } else {
            std::os::windows::fs::symlink_file(target, link).map_err(symlink_error)?;
        }
    }
    Ok(())
}
