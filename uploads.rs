use crate::error::{Error, Result};
use crate::normalizer::Upload;
use std::fs;
use std::path::PathBuf;
use xxhash_rust::xxh3::xxh3_128;

/// Content-addressed storage for images whose diagnosis is being recorded.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes the bytes once and returns the stored file name, which doubles as
    /// the history row's image reference.
    pub fn save(&self, upload: &Upload) -> Result<String> {
        if upload.bytes.is_empty() {
            return Err(Error::EmptyUpload);
        }
        let name = match upload.extension() {
            Some(ext) => format!("{}.{ext}", content_hash(&upload.bytes)),
            None => content_hash(&upload.bytes),
        };
        let path = self.dir.join(&name);
        if path.exists() {
            log::debug!("Upload already stored: {}", path.display());
            return Ok(name);
        }
        fs::create_dir_all(&self.dir)?;
        // rename into place so the hashed name never points at a partial file
        let tmp = self.dir.join(format!(".{name}.{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &upload.bytes)?;
        fs::rename(&tmp, &path)?;
        log::debug!("Stored upload {}", path.display());
        Ok(name)
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:032x}", xxh3_128(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UploadStore {
        UploadStore::new(std::env::temp_dir().join(format!("pd_uploads_{}", uuid::Uuid::new_v4())))
    }

    #[test]
    fn saves_under_content_hash_with_extension() {
        let store = store();
        let upload = Upload::new("Leaf.JPG", vec![1, 2, 3, 4]);
        let name = store.save(&upload).unwrap();
        assert_eq!(name, format!("{}.jpg", content_hash(&[1, 2, 3, 4])));
        assert_eq!(fs::read(store.dir.join(&name)).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn identical_bytes_share_one_file() {
        let store = store();
        let a = store.save(&Upload::new("a.png", vec![9; 32])).unwrap();
        let b = store.save(&Upload::new("b.png", vec![9; 32])).unwrap();
        assert_eq!(a, b);
        let files = fs::read_dir(&store.dir).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn hash_is_fixed_width_hex() {
        let hash = content_hash(b"");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
