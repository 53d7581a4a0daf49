//! Local image archives in the legacy `docker save` layout
//!
//! An archive is a plain tar file holding a `repositories` index, which maps
//! one repository name to one tag to one image ID, plus a directory per layer
//! that contains that layer's `layer.tar`. Other entries (`VERSION`, `json`,
//! `manifest.json`, ...) may be present and are ignored.
//!
//! Archives written by [pack] are flat instead: one `sha256:<hex>` entry per
//! layer blob, in manifest order.

use crate::{
    errors::ImageError,
    image::{ContentDigest, DigestWriter},
};
use std::{
    collections::BTreeMap,
    env,
    ffi::OsStr,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Component, Path, PathBuf},
};
use tar::{Archive, EntryType, Header};
use tempfile::TempDir;

/// Name of the index entry at the top of an archive
pub const INDEX_NAME: &str = "repositories";

/// Name of the payload file inside each layer directory
pub const LAYER_NAME: &str = "layer.tar";

/// Mapping of repository name to tag to image ID
type ArchiveIndex = BTreeMap<String, BTreeMap<String, String>>;

/// One layer extracted from an archive
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalLayer {
    /// Name of the layer's directory inside the archive
    pub id: String,
    /// Extracted `layer.tar`, inside the scratch directory
    pub path: PathBuf,
}

/// The usable parts of an archive, extracted to a scratch directory
///
/// The scratch directory and everything in it is removed when this is
/// dropped.
#[derive(Debug)]
pub struct UnpackedArchive {
    scratch: TempDir,
    /// Repository name as written in the index. Not validated; archives made
    /// by `docker save` may include a registry host here.
    pub index_repository: String,
    pub index_tag: String,
    pub image_id: String,
    /// Layers in the order their directories first appear in the archive
    pub layers: Vec<LocalLayer>,
}

impl UnpackedArchive {
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }
}

/// Check that an archive entry name stays inside the directory it is
/// extracted to, returning it as a relative path
fn relative_path(name: &str) -> Result<PathBuf, ImageError> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => (),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ImageError::UnsafeArchivePath(name.to_owned()))
            }
        }
    }
    Ok(path)
}

/// First path component of an archive entry, which names its layer directory
fn layer_id(path: &Path) -> Option<String> {
    match path.components().next() {
        Some(Component::Normal(part)) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Extract an image archive to a new scratch directory under the system
/// temporary directory
pub fn unpack(archive_path: &Path) -> Result<UnpackedArchive, ImageError> {
    unpack_in(archive_path, &env::temp_dir())
}

/// Extract an image archive to a new scratch directory under `scratch_root`
///
/// Only the index and the `layer.tar` files are written out. On any error,
/// the scratch directory is already gone by the time this returns.
pub fn unpack_in(
    archive_path: &Path,
    scratch_root: &Path,
) -> Result<UnpackedArchive, ImageError> {
    let scratch = tempfile::Builder::new()
        .prefix("dockyard-unpack-")
        .tempdir_in(scratch_root)?;
    log::debug!("unpacking {:?} into {:?}", archive_path, scratch.path());

    let mut archive = Archive::new(BufReader::new(File::open(archive_path)?));
    let mut layer_order: Vec<String> = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let rel_path = relative_path(&name)?;
        let is_dir = entry.header().entry_type() == EntryType::Directory || name.ends_with('/');
        let is_index = rel_path == Path::new(INDEX_NAME);
        let is_layer = !is_dir
            && rel_path.components().count() >= 2
            && rel_path.file_name() == Some(OsStr::new(LAYER_NAME));

        if (is_dir || is_layer) && !is_index {
            if let Some(id) = layer_id(&rel_path) {
                if !layer_order.contains(&id) {
                    layer_order.push(id);
                }
            }
        }

        let dest = scratch.path().join(&rel_path);
        if is_dir {
            fs::create_dir_all(&dest)?;
        } else if is_index || is_layer {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = BufWriter::new(File::create(&dest)?);
            let written = io::copy(&mut entry, &mut file)?;
            file.flush()?;
            if written == 0 {
                return Err(ImageError::EmptyFile(PathBuf::from(name)));
            }
            log::trace!("extracted {:?}, {} bytes", name, written);
        } else {
            log::trace!("skipping archive entry {:?}", name);
        }
    }

    let (index_repository, index_tag, image_id) = read_index(&scratch.path().join(INDEX_NAME))?;

    let mut layers = Vec::with_capacity(layer_order.len());
    for id in layer_order {
        let path = scratch.path().join(&id).join(LAYER_NAME);
        if !path.is_file() {
            return Err(ImageError::MissingLayerPayload(id));
        }
        layers.push(LocalLayer { id, path });
    }
    log::info!(
        "unpacked {:?}, {}:{} with {} layers",
        archive_path,
        index_repository,
        index_tag,
        layers.len()
    );

    Ok(UnpackedArchive {
        scratch,
        index_repository,
        index_tag,
        image_id,
        layers,
    })
}

/// Read the `repositories` index, which must name exactly one repository with
/// exactly one tag
fn read_index(path: &Path) -> Result<(String, String, String), ImageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ImageError::MalformedArchiveIndex(format!(
                "archive has no {:?} entry",
                INDEX_NAME
            )))
        }
        Err(err) => return Err(err.into()),
    };
    let index: ArchiveIndex = serde_json::from_slice(&bytes)
        .map_err(|err| ImageError::MalformedArchiveIndex(err.to_string()))?;
    if index.len() != 1 {
        return Err(ImageError::MalformedArchiveIndex(format!(
            "expected exactly one repository, found {}",
            index.len()
        )));
    }
    let (repository, tags) = match index.into_iter().next() {
        Some(entry) => entry,
        None => return Err(ImageError::MalformedArchiveIndex("empty index".into())),
    };
    if tags.len() != 1 {
        return Err(ImageError::MalformedArchiveIndex(format!(
            "expected exactly one tag for {}, found {}",
            repository,
            tags.len()
        )));
    }
    match tags.into_iter().next() {
        Some((tag, image_id)) => Ok((repository, tag, image_id)),
        None => Err(ImageError::MalformedArchiveIndex("empty tag list".into())),
    }
}

/// Build an archive at `dest` holding one entry per layer blob
///
/// Each blob comes from `fetch`, is staged in a scratch file while its digest
/// is checked, then appended as `sha256:<hex>` with mode 0600. Nothing is
/// left at `dest` unless every layer succeeds.
pub fn pack<F, R>(dest: &Path, layers: &[ContentDigest], mut fetch: F) -> Result<(), ImageError>
where
    F: FnMut(&ContentDigest) -> Result<R, ImageError>,
    R: Read,
{
    let scratch = tempfile::Builder::new()
        .prefix("dockyard-pack-")
        .tempdir()?;
    let dest_dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let output = tempfile::Builder::new()
        .prefix(".dockyard-")
        .tempfile_in(dest_dir)?;
    let mut builder = tar::Builder::new(BufWriter::new(output));

    for digest in layers {
        let staged = scratch.path().join(digest.hex_str());
        let size = stage_blob(&staged, digest, fetch(digest)?)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o600);
        builder.append_data(&mut header, digest.as_str(), File::open(&staged)?)?;
        fs::remove_file(&staged)?;
        log::debug!("packed {}, {} bytes", digest, size);
    }

    let output = builder
        .into_inner()?
        .into_inner()
        .map_err(|err| err.into_error())?;
    output.persist(dest).map_err(|err| err.error)?;
    log::info!("wrote {:?} with {} layers", dest, layers.len());
    Ok(())
}

/// Copy one blob to a scratch file, checking it is non-empty and has the
/// expected digest
fn stage_blob<R: Read>(
    path: &Path,
    expected: &ContentDigest,
    mut blob: R,
) -> Result<u64, ImageError> {
    let mut writer = DigestWriter::new(BufWriter::new(File::create(path)?));
    io::copy(&mut blob, &mut writer)?;
    let size = writer.written();
    let (mut file, found) = writer.finalize();
    file.flush()?;
    if size == 0 {
        return Err(ImageError::EmptyFile(path.to_path_buf()));
    }
    if &found != expected {
        return Err(ImageError::ContentDigestMismatch {
            expected: expected.clone(),
            found,
        });
    }
    Ok(size)
}

/// Write an archive in the `docker save` layout, from in-memory layer
/// contents
///
/// Each layer is `(id, layer.tar bytes)`, and gets a directory named by its
/// ID with a `VERSION` file alongside the payload.
pub fn write_archive(
    dest: &Path,
    repository: &str,
    tag: &str,
    image_id: &str,
    layers: &[(&str, &[u8])],
) -> Result<(), ImageError> {
    let mut builder = tar::Builder::new(BufWriter::new(File::create(dest)?));

    for (id, content) in layers {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        builder.append_data(&mut header, format!("{}/", id), io::empty())?;

        append_file(&mut builder, &format!("{}/VERSION", id), b"1.0")?;
        append_file(&mut builder, &format!("{}/{}", id, LAYER_NAME), content)?;
    }

    let mut index = ArchiveIndex::new();
    index
        .entry(repository.to_owned())
        .or_default()
        .insert(tag.to_owned(), image_id.to_owned());
    append_file(&mut builder, INDEX_NAME, &serde_json::to_vec(&index)?)?;

    builder.into_inner()?.flush()?;
    Ok(())
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    content: &[u8],
) -> Result<(), ImageError> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, content)?;
    Ok(())
}
