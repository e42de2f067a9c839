//! Local seed tree: `images/` (recursive), `prompt.txt` and
//! `sam3-model.tar.gz`, re-keyed for upload.

use std::path::{Path, PathBuf};

use future::Either as E;
use futures::prelude::*;
use tokio::fs;
use tokio::io;

use super::error::Error;
use super::file_entry::FileEntry;
use super::layout;

#[derive(Debug, Clone)]
pub struct SeedObject {
    pub key: String,
    pub entry: FileEntry,
}

#[derive(Debug, Clone)]
pub struct SeedSource {
    root: PathBuf,
    objects: Vec<SeedObject>,
}

impl SeedSource {
    /// Scans `root`. Every required path must exist before any object is
    /// returned, so a bad seed directory never leads to a wiped bucket.
    pub async fn scan(root: &Path) -> Result<SeedSource, Error> {
        let images_dir = root.join(layout::IMAGES_PREFIX.trim_end_matches('/'));
        if !is_dir(root).await {
            return Err(Error::SeedNotFound(root.to_path_buf()));
        }
        if !is_dir(&images_dir).await {
            return Err(Error::SeedNotFound(images_dir));
        }

        let mut images: Vec<SeedObject> = read_dir_recur(images_dir.clone())
            .map_err(Error::from)
            .and_then(|(path, size)| {
                let images_dir = images_dir.clone();
                async move {
                    let key = layout::image_key(&relative_key(&images_dir, &path)?);
                    Ok(SeedObject { key, entry: FileEntry::new(path, size) })
                }
            })
            .try_collect()
            .await?;
        images.sort_by(|a, b| a.key.cmp(&b.key));

        let mut objects = images;
        for key in layout::SEED_ROOT_KEYS.iter() {
            let path = root.join(key);
            let metadata = match fs::metadata(&path).await {
                Ok(m) if m.is_file() => m,
                _ => return Err(Error::SeedNotFound(path)),
            };
            objects.push(SeedObject {
                key: key.to_string(),
                entry: FileEntry::new(path, metadata.len()),
            });
        }

        Ok(SeedSource { root: root.to_path_buf(), objects })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Upload order: images first, then the root seed files.
    pub fn objects(&self) -> &[SeedObject] {
        &self.objects
    }

    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.entry.size()).sum()
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Path of `path` below `base`, joined with `/` whatever the platform separator.
fn relative_key(base: &Path, path: &Path) -> Result<String, Error> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| Error::config(format!("{} is outside {}", path.display(), base.display())))?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            Error::config(format!("non-UTF-8 seed path: {}", path.display()))
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Regular files below `dir`, recursively, as `(path, size)`. Symlinks are
/// followed and keyed by their own path; a dangling link is an error.
pub fn read_dir_recur(dir: PathBuf) -> stream::BoxStream<'static, io::Result<(PathBuf, u64)>> {
    fs::read_dir(dir)
        .try_flatten_stream()
        .and_then(|entry| async move {
            let path = entry.path();
            let mut metadata = entry.metadata().await?;
            if metadata.file_type().is_symlink() {
                metadata = fs::metadata(&path).await?;
            }
            if metadata.is_dir() {
                return Ok(E::Left(E::Left(read_dir_recur(path))));
            } else if metadata.is_file() {
                let size = metadata.len();
                return Ok(E::Left(E::Right(stream::once(async move { Ok((path, size)) }))));
            }
            tracing::warn!(path = %path.display(), "skipping seed entry that is not a file or directory");
            Ok(E::Right(stream::empty()))
        })
        .try_flatten()
        .boxed()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Kind;
    use std::fs as std_fs;

    /// Writes a seed tree with the given image paths and returns its root.
    pub fn seed_tree(images: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std_fs::create_dir_all(dir.path().join("images")).unwrap();
        for image in images {
            let path = dir.path().join("images").join(image);
            std_fs::create_dir_all(path.parent().unwrap()).unwrap();
            std_fs::write(path, image.as_bytes()).unwrap();
        }
        std_fs::write(dir.path().join("prompt.txt"), b"find the roofs").unwrap();
        std_fs::write(dir.path().join("sam3-model.tar.gz"), b"model-bytes").unwrap();
        dir
    }

    #[tokio::test]
    async fn scan_keys_images_under_prefix_and_roots_last() {
        let dir = seed_tree(&["dog.png", "street/b.jpg", "street/a.jpg"]);
        let seed = SeedSource::scan(dir.path()).await.unwrap();
        let keys: Vec<&str> = seed.objects().iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "images/dog.png",
                "images/street/a.jpg",
                "images/street/b.jpg",
                "prompt.txt",
                "sam3-model.tar.gz",
            ]
        );
        assert_eq!(seed.objects()[0].entry.size(), "dog.png".len() as u64);
    }

    #[tokio::test]
    async fn missing_seed_files_are_not_found() {
        let dir = seed_tree(&["dog.png"]);
        std_fs::remove_file(dir.path().join("sam3-model.tar.gz")).unwrap();
        match SeedSource::scan(dir.path()).await {
            Err(Error::SeedNotFound(path)) => assert!(path.ends_with("sam3-model.tar.gz")),
            other => panic!("expected SeedNotFound, got {:?}", other),
        }

        let missing = dir.path().join("nope");
        assert!(matches!(
            SeedSource::scan(&missing).await,
            Err(Error::SeedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_images_dir_is_not_found() {
        let dir = seed_tree(&[]);
        std_fs::remove_dir(dir.path().join("images")).unwrap();
        assert!(matches!(
            SeedSource::scan(dir.path()).await,
            Err(Error::SeedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn symlinked_images_are_followed() {
        let dir = seed_tree(&["dog.png"]);
        let elsewhere = tempfile::tempdir().unwrap();
        std_fs::write(elsewhere.path().join("cat.png"), b"meow").unwrap();
        std_fs::create_dir(elsewhere.path().join("street")).unwrap();
        std_fs::write(elsewhere.path().join("street").join("a.jpg"), b"asphalt").unwrap();

        let images = dir.path().join("images");
        std::os::unix::fs::symlink(elsewhere.path().join("cat.png"), images.join("cat.png")).unwrap();
        std::os::unix::fs::symlink(elsewhere.path().join("street"), images.join("street")).unwrap();

        let seed = SeedSource::scan(dir.path()).await.unwrap();
        let keys: Vec<&str> = seed.objects().iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "images/cat.png",
                "images/dog.png",
                "images/street/a.jpg",
                "prompt.txt",
                "sam3-model.tar.gz",
            ]
        );
        assert_eq!(seed.objects()[0].entry.size(), 4);
    }

    #[tokio::test]
    async fn dangling_image_symlink_fails_the_scan() {
        let dir = seed_tree(&["dog.png"]);
        let images = dir.path().join("images");
        std::os::unix::fs::symlink(dir.path().join("gone.png"), images.join("gone.png")).unwrap();

        let err = SeedSource::scan(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }
}
