//! Places images can be kept: a registry server, or a plain local directory
//!
//! Both implement [ImageStore], so callers like the command line tool can
//! move images around without caring which one they were configured with.

use crate::{
    archive,
    errors::ImageError,
    image::{Repository, Tag},
    registry::{Client, ClientBuilder},
};
use std::{
    fmt, fs,
    fs::File,
    io,
    path::{Path, PathBuf},
};

/// Directory holding the tags of one repository in a [LocalStore]
const TAGS_DIR: &str = "_tags";

/// Operations shared by every image store
pub trait ImageStore: fmt::Debug {
    fn image_exists(&self, repository: &Repository, tag: &Tag) -> Result<bool, ImageError>;

    /// Write the image to a local archive file at `dest`
    fn get_image(&self, repository: &Repository, tag: &Tag, dest: &Path)
        -> Result<(), ImageError>;

    /// Store the local image archive at `archive_path` as `repository:tag`
    fn push_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        archive_path: &Path,
    ) -> Result<(), ImageError>;

    fn delete_image(&self, repository: &Repository, tag: &Tag) -> Result<(), ImageError>;
}

/// How to construct an [ImageStore]
#[derive(Debug)]
pub enum StoreConfig {
    /// Keep archives in this directory
    Local(PathBuf),
    /// Talk to a registry; the registry is pinged when the store opens
    Registry(ClientBuilder),
}

impl StoreConfig {
    pub fn open(self) -> Result<Box<dyn ImageStore>, ImageError> {
        Ok(match self {
            StoreConfig::Local(path) => Box::new(LocalStore::new(path)),
            StoreConfig::Registry(builder) => Box::new(RegistryStore::new(builder.open()?)),
        })
    }
}

/// An [ImageStore] backed by a registry server
#[derive(Clone, Debug)]
pub struct RegistryStore {
    client: Client,
}

impl RegistryStore {
    pub fn new(client: Client) -> Self {
        RegistryStore { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ImageStore for RegistryStore {
    fn image_exists(&self, repository: &Repository, tag: &Tag) -> Result<bool, ImageError> {
        self.client.image_exists(repository, tag)
    }

    fn get_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        dest: &Path,
    ) -> Result<(), ImageError> {
        self.client.get_image(repository, tag, dest)?;
        Ok(())
    }

    fn push_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        archive_path: &Path,
    ) -> Result<(), ImageError> {
        self.client.push_image(repository, tag, archive_path)?;
        Ok(())
    }

    fn delete_image(&self, repository: &Repository, tag: &Tag) -> Result<(), ImageError> {
        self.client.delete_image(repository, tag)
    }
}

fn create_parent_dirs(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            // The write that follows will report the real problem
            log::warn!("error creating directory at {:?}, {:?}", parent, err);
        }
    }
}

/// An [ImageStore] that keeps each image as an archive file in a directory
///
/// Images live at `<root>/images/<repository>/<tag>.tar`, exactly as they
/// were pushed. Archives are checked to be readable image archives on the way
/// in, and written under a temporary name before being renamed into place.
#[derive(Clone, Debug)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: PathBuf) -> Self {
        LocalStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn image_path(&self, repository: &Repository, tag: &Tag) -> PathBuf {
        let mut path = self.path.join("images");
        for component in repository.iter() {
            path.push(component);
        }
        // Repository components never start with '_', so this can't collide
        path.push(TAGS_DIR);
        path.push(format!("{}.tar", tag));
        path
    }

    fn open(&self, repository: &Repository, tag: &Tag) -> Result<File, ImageError> {
        match File::open(self.image_path(repository, tag)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ImageError::ImageNotFound(
                format!("{}:{}", repository, tag),
            )),
            Err(err) => Err(err.into()),
            Ok(file) => Ok(file),
        }
    }

    /// Copy `source` to `dest` via a temporary file in the same directory
    fn insert(source: &mut File, dest: &Path) -> Result<(), ImageError> {
        create_parent_dirs(dest);
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".dockyard-")
            .tempfile_in(dir)?;
        io::copy(source, &mut temp)?;
        temp.persist(dest).map_err(|err| err.error)?;
        Ok(())
    }
}

impl ImageStore for LocalStore {
    fn image_exists(&self, repository: &Repository, tag: &Tag) -> Result<bool, ImageError> {
        match fs::metadata(self.image_path(repository, tag)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
            Ok(metadata) => Ok(metadata.is_file()),
        }
    }

    fn get_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        dest: &Path,
    ) -> Result<(), ImageError> {
        let mut source = self.open(repository, tag)?;
        LocalStore::insert(&mut source, dest)?;
        log::info!("copied {}:{} to {:?}", repository, tag, dest);
        Ok(())
    }

    fn push_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        archive_path: &Path,
    ) -> Result<(), ImageError> {
        // Only stored if it unpacks cleanly
        archive::unpack(archive_path)?;
        let dest = self.image_path(repository, tag);
        LocalStore::insert(&mut File::open(archive_path)?, &dest)?;
        log::info!("stored {}:{} at {:?}", repository, tag, dest);
        Ok(())
    }

    fn delete_image(&self, repository: &Repository, tag: &Tag) -> Result<(), ImageError> {
        match fs::remove_file(self.image_path(repository, tag)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ImageError::ImageNotFound(
                format!("{}:{}", repository, tag),
            )),
            Err(err) => Err(err.into()),
            Ok(()) => {
                log::info!("removed {}:{}", repository, tag);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn name() -> (Repository, Tag) {
        ("acme/app".parse().unwrap(), "v1".parse().unwrap())
    }

    fn sample_archive(dir: &Path) -> PathBuf {
        let path = dir.join("image.tar");
        archive::write_archive(
            &path,
            "acme/app",
            "v1",
            "img0",
            &[("l1", &b"first layer"[..]), ("l2", &b"second layer"[..])],
        )
        .unwrap();
        path
    }

    fn round_trip(store: &dyn ImageStore, work: &Path) {
        let (repo, tag) = name();
        assert!(!store.image_exists(&repo, &tag).unwrap());
        store.push_image(&repo, &tag, &sample_archive(work)).unwrap();
        assert!(store.image_exists(&repo, &tag).unwrap());

        let pulled = work.join("pulled.tar");
        store.get_image(&repo, &tag, &pulled).unwrap();
        assert!(fs::metadata(&pulled).unwrap().len() > 0);

        store.delete_image(&repo, &tag).unwrap();
        assert!(!store.image_exists(&repo, &tag).unwrap());
    }

    #[test]
    fn local_store_round_trip() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = StoreConfig::Local(root.path().to_path_buf()).open().unwrap();
        round_trip(store.as_ref(), work.path());
    }

    #[test]
    fn registry_store_round_trip() {
        let work = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let builder = Client::builder()
            .registry(&"localhost:5000".parse().unwrap())
            .transport(registry.clone());
        let store = StoreConfig::Registry(builder).open().unwrap();
        round_trip(store.as_ref(), work.path());
        assert_eq!(registry.blob_count(), 0);
    }

    #[test]
    fn local_store_layout() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = LocalStore::new(root.path().to_path_buf());
        let (repo, tag) = name();
        let archive_path = sample_archive(work.path());
        store.push_image(&repo, &tag, &archive_path).unwrap();
        let stored = root
            .path()
            .join("images")
            .join("acme")
            .join("app")
            .join(TAGS_DIR)
            .join("v1.tar");
        assert_eq!(fs::read(stored).unwrap(), fs::read(&archive_path).unwrap());
    }

    #[test]
    fn local_store_tag_and_nested_repository_stay_apart() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = LocalStore::new(root.path().to_path_buf());
        let archive_path = sample_archive(work.path());
        let short: Repository = "a".parse().unwrap();
        let nested: Repository = "a/v1.tar".parse().unwrap();
        let tag: Tag = "v1".parse().unwrap();

        store.push_image(&short, &tag, &archive_path).unwrap();
        store.push_image(&nested, &tag, &archive_path).unwrap();
        assert!(store.image_exists(&short, &tag).unwrap());
        assert!(store.image_exists(&nested, &tag).unwrap());

        store.delete_image(&short, &tag).unwrap();
        assert!(!store.image_exists(&short, &tag).unwrap());
        assert!(store.image_exists(&nested, &tag).unwrap());
    }

    #[test]
    fn local_store_rejects_non_archive() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = LocalStore::new(root.path().to_path_buf());
        let (repo, tag) = name();
        let bogus = work.path().join("bogus.tar");
        fs::write(&bogus, b"not a tar").unwrap();
        assert!(store.push_image(&repo, &tag, &bogus).is_err());
        assert!(!store.image_exists(&repo, &tag).unwrap());
    }

    #[test]
    fn local_store_missing_image() {
        let root = TempDir::new().unwrap();
        let store = LocalStore::new(root.path().to_path_buf());
        let (repo, tag) = name();
        let dest = root.path().join("out.tar");
        assert!(matches!(
            store.get_image(&repo, &tag, &dest),
            Err(ImageError::ImageNotFound(_))
        ));
        assert!(matches!(
            store.delete_image(&repo, &tag),
            Err(ImageError::ImageNotFound(_))
        ));
        assert!(!dest.exists());
    }
}
