// Artifact Store
// Run-lifetime storage of declared job outputs, keyed by (instance, kind)

use crate::spec::{ArtifactDecl, ArtifactKind};

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One captured file inside a record.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    /// Path relative to the producing instance's workspace.
    pub rel_path: String,
    /// Opaque content; the engine never parses it.
    pub content: Vec<u8>,
}

/// A captured artifact: owned by the producing instance's identity,
/// shared by reference with downstream consumers.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub instance_id: String,
    pub kind: ArtifactKind,
    pub files: Vec<ArtifactFile>,
}

impl ArtifactRecord {
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }
}

/// Shared store of artifact records for one run. Writes are serialized per
/// key behind the mutex; records persist for the run's lifetime.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    records: Mutex<HashMap<(String, ArtifactKind), Arc<ArtifactRecord>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any prior record for the same key.
    pub fn put(
        &self,
        instance_id: impl Into<String>,
        kind: ArtifactKind,
        files: Vec<ArtifactFile>,
    ) -> Arc<ArtifactRecord> {
        let instance_id = instance_id.into();
        let record = Arc::new(ArtifactRecord {
            instance_id: instance_id.clone(),
            kind,
            files,
        });
        self.records
            .lock()
            .expect("artifact store lock poisoned")
            .insert((instance_id, kind), Arc::clone(&record));
        record
    }

    pub fn get(&self, instance_id: &str, kind: ArtifactKind) -> Option<Arc<ArtifactRecord>> {
        self.records
            .lock()
            .expect("artifact store lock poisoned")
            .get(&(instance_id.to_string(), kind))
            .cloned()
    }

    /// Every record of a kind, across all producing instances, in a
    /// deterministic (identity-sorted) order.
    pub fn records_of_kind(&self, kind: ArtifactKind) -> Vec<Arc<ArtifactRecord>> {
        let mut records: Vec<Arc<ArtifactRecord>> = self
            .records
            .lock()
            .expect("artifact store lock poisoned")
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, r)| Arc::clone(r))
            .collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        records
    }

    /// Capture a declared artifact path out of an instance workspace.
    ///
    /// A file path yields a single-file record; a directory path captures
    /// every file under it. Returns Ok(None) when the path does not exist.
    pub fn capture(
        &self,
        instance_id: &str,
        workspace: &Path,
        decl: &ArtifactDecl,
    ) -> io::Result<Option<Arc<ArtifactRecord>>> {
        let target = workspace.join(&decl.path);
        if !target.exists() {
            return Ok(None);
        }

        let mut files = Vec::new();
        if target.is_file() {
            files.push(ArtifactFile {
                rel_path: decl.path.clone(),
                content: std::fs::read(&target)?,
            });
        } else {
            collect_files(&target, Path::new(&decl.path), &mut files)?;
        }

        Ok(Some(self.put(instance_id, decl.kind, files)))
    }

    /// Write every stored record's files into a directory, so a later
    /// stage's instance sees all prior artifacts in its workspace.
    pub fn materialize_into(&self, dir: &Path) -> io::Result<()> {
        let records: Vec<Arc<ArtifactRecord>> = self
            .records
            .lock()
            .expect("artifact store lock poisoned")
            .values()
            .cloned()
            .collect();

        for record in records {
            for file in &record.files {
                let dest = dir.join(&file.rel_path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest, &file.content)?;
            }
        }
        Ok(())
    }
}

fn collect_files(dir: &Path, rel_base: &Path, out: &mut Vec<ArtifactFile>) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let rel = rel_base.join(entry.file_name());
        if path.is_dir() {
            collect_files(&path, &rel, out)?;
        } else {
            out.push(ArtifactFile {
                rel_path: rel.to_string_lossy().to_string(),
                content: std::fs::read(&path)?,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(rel_path: &str, content: &str) -> ArtifactFile {
        ArtifactFile {
            rel_path: rel_path.to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_put_get() {
        let store = ArtifactStore::new();
        store.put("unit", ArtifactKind::Report, vec![file("coverage.xml", "92%")]);

        let record = store.get("unit", ArtifactKind::Report).unwrap();
        assert_eq!(record.files[0].rel_path, "coverage.xml");
        assert!(store.get("unit", ArtifactKind::Bundle).is_none());
        assert!(store.get("other", ArtifactKind::Report).is_none());
    }

    #[test]
    fn test_records_of_kind_sorted() {
        let store = ArtifactStore::new();
        store.put("b-job", ArtifactKind::Report, vec![]);
        store.put("a-job", ArtifactKind::Report, vec![]);
        store.put("c-job", ArtifactKind::Bundle, vec![]);

        let reports = store.records_of_kind(ArtifactKind::Report);
        let ids: Vec<&str> = reports.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["a-job", "b-job"]);
    }

    #[test]
    fn test_capture_file_and_missing() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("coverage.xml"), "total: 92").unwrap();

        let store = ArtifactStore::new();
        let decl = ArtifactDecl {
            path: "coverage.xml".to_string(),
            kind: ArtifactKind::Report,
        };
        let record = store.capture("unit", workspace.path(), &decl).unwrap().unwrap();
        assert_eq!(record.files.len(), 1);
        assert_eq!(record.files[0].content, b"total: 92");

        let missing = ArtifactDecl {
            path: "nope.txt".to_string(),
            kind: ArtifactKind::Report,
        };
        assert!(store.capture("unit", workspace.path(), &missing).unwrap().is_none());
    }

    #[test]
    fn test_capture_directory_recursive() {
        let workspace = tempfile::tempdir().unwrap();
        let public = workspace.path().join("public");
        std::fs::create_dir_all(public.join("api")).unwrap();
        std::fs::write(public.join("index.html"), "<html>").unwrap();
        std::fs::write(public.join("api").join("ref.html"), "<html>").unwrap();

        let store = ArtifactStore::new();
        let decl = ArtifactDecl {
            path: "public".to_string(),
            kind: ArtifactKind::Bundle,
        };
        let record = store.capture("pages", workspace.path(), &decl).unwrap().unwrap();
        assert_eq!(record.files.len(), 2);
    }

    #[test]
    fn test_materialize_round_trip() {
        let store = ArtifactStore::new();
        store.put(
            "unit",
            ArtifactKind::Report,
            vec![file("reports/coverage.xml", "total: 92")],
        );

        let next_workspace = tempfile::tempdir().unwrap();
        store.materialize_into(next_workspace.path()).unwrap();

        let content =
            std::fs::read_to_string(next_workspace.path().join("reports/coverage.xml")).unwrap();
        assert_eq!(content, "total: 92");
    }
}
