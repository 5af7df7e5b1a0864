//! Local store of published genes.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   <sha256 hex>/            one directory per gene, named by its identity
//!     manifest.json
//!     gene.yaml              optional source document
//!     <sha1 hex>.part        sealed chunks
//!   .scratch-XXXXXX/         in-progress packs, renamed into place on publish
//! ```

use crate::error::{GeneError, Result};
use crate::pack::digest::{ChunkDigest, GeneId};
use crate::pack::manifest::{Manifest, MANIFEST_FILE};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const SCRATCH_PREFIX: &str = ".scratch-";

#[derive(Debug, Clone)]
pub struct GeneStore {
    root: PathBuf,
}

impl GeneStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gene_dir(&self, id: &GeneId) -> PathBuf {
        self.root.join(id.to_hex())
    }

    pub fn manifest_path(&self, id: &GeneId) -> PathBuf {
        self.gene_dir(id).join(MANIFEST_FILE)
    }

    pub fn chunk_path(&self, id: &GeneId, chunk: &ChunkDigest) -> PathBuf {
        self.gene_dir(id).join(chunk.file_name())
    }

    pub fn contains(&self, id: &GeneId) -> bool {
        self.manifest_path(id).is_file()
    }

    pub fn load_manifest(&self, id: &GeneId) -> Result<Manifest> {
        let bytes = match fs::read(self.manifest_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GeneError::GeneNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Manifest::from_json(&bytes)
    }

    /// Identities of all published genes, sorted.
    pub fn list(&self) -> Result<Vec<GeneId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.len() != 64 {
                continue;
            }
            if let Ok(id) = GeneId::from_hex(name) {
                if self.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Fresh, uniquely named scratch directory on the same filesystem as
    /// the published genes. Removed on drop unless published.
    pub fn scratch_dir(&self) -> Result<TempDir> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.root)?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(dir)
    }

    /// Move a finished scratch directory to its identity path.
    ///
    /// An existing directory for the same identity holds the same content
    /// and is replaced.
    pub fn publish(&self, scratch: TempDir, id: &GeneId) -> Result<PathBuf> {
        let target = self.gene_dir(id);
        if target.exists() {
            debug!(gene = %id, "Replacing existing gene directory");
            fs::remove_dir_all(&target)?;
        }
        fs::rename(scratch.path(), &target)?;
        // The scratch path no longer exists; dropping the guard is a no-op.
        drop(scratch);
        info!(gene = %id, path = %target.display(), "Published gene");
        Ok(target)
    }

    /// Delete a published gene. Returns false if it was not present.
    pub fn remove(&self, id: &GeneId) -> Result<bool> {
        match fs::remove_dir_all(self.gene_dir(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove scratch directories left behind by interrupted packs.
    pub fn sweep_scratch(&self, older_than: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove scratch directory"),
            }
        }
        if removed > 0 {
            info!(removed, "Swept abandoned scratch directories");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::manifest::Manifest;

    fn manifest(name: &str) -> Manifest {
        Manifest {
            version: "1.0.0".to_string(),
            name: name.to_string(),
            gene_type: String::new(),
            format: Default::default(),
            filename: String::new(),
            parts: Vec::new(),
            size: 0,
            original_size: 0,
            architecture: Default::default(),
            source: None,
        }
    }

    fn publish_manifest(store: &GeneStore, manifest: &Manifest) -> GeneId {
        let json = manifest.canonical_json().unwrap();
        let id = GeneId::compute(&json);
        let scratch = store.scratch_dir().unwrap();
        fs::write(scratch.path().join(MANIFEST_FILE), &json).unwrap();
        store.publish(scratch, &id).unwrap();
        id
    }

    #[test]
    fn test_publish_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GeneStore::open(tmp.path().join("genes")).unwrap();

        let id = publish_manifest(&store, &manifest("alpha"));
        assert!(store.contains(&id));
        assert_eq!(store.load_manifest(&id).unwrap().name, "alpha");
        assert_eq!(store.list().unwrap(), vec![id]);
    }

    #[test]
    fn test_publish_overwrites_without_residue() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GeneStore::open(tmp.path()).unwrap();

        let id = publish_manifest(&store, &manifest("alpha"));
        fs::write(store.gene_dir(&id).join("stale.part"), b"old").unwrap();

        publish_manifest(&store, &manifest("alpha"));
        assert!(!store.gene_dir(&id).join("stale.part").exists());
        assert!(store.contains(&id));
    }

    #[test]
    fn test_missing_gene_reports_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GeneStore::open(tmp.path()).unwrap();
        let id = GeneId::compute(b"nothing");
        assert!(matches!(
            store.load_manifest(&id),
            Err(GeneError::GeneNotFound(_))
        ));
        assert!(!store.remove(&id).unwrap());
    }

    #[test]
    fn test_list_ignores_scratch_and_foreign_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GeneStore::open(tmp.path()).unwrap();
        let id = publish_manifest(&store, &manifest("alpha"));

        let _pending = store.scratch_dir().unwrap();
        fs::create_dir(tmp.path().join("notes")).unwrap();
        fs::create_dir(tmp.path().join("0".repeat(64))).unwrap();

        assert_eq!(store.list().unwrap(), vec![id]);
    }

    #[test]
    fn test_sweep_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GeneStore::open(tmp.path()).unwrap();
        let id = publish_manifest(&store, &manifest("alpha"));

        let abandoned = store.scratch_dir().unwrap();
        let abandoned_path = abandoned.path().to_path_buf();
        std::mem::forget(abandoned);

        assert_eq!(store.sweep_scratch(Duration::from_secs(3600)).unwrap(), 0);
        assert!(abandoned_path.exists());

        assert_eq!(store.sweep_scratch(Duration::ZERO).unwrap(), 1);
        assert!(!abandoned_path.exists());
        assert!(store.contains(&id));
    }

    #[test]
    fn test_scratch_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GeneStore::open(tmp.path()).unwrap();
        let path = {
            let scratch = store.scratch_dir().unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
