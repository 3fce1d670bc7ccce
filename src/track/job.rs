// src/track/job.rs
//! Pending writes produced by the session recorder

use super::gpx;
use crate::error::Result;
use crate::gps::Fix;
use crate::storage::TrackStorage;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    /// Periodic flush: splice these fixes into the existing document
    Append(Vec<Fix>),
    /// Session end: overwrite with a fully rendered document
    Replace(String),
}

/// One write against a track file, run off the recorder's context
#[derive(Debug, Clone, PartialEq)]
pub struct WriteJob {
    pub dir: PathBuf,
    pub file_name: String,
    pub kind: WriteKind,
}

impl WriteJob {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Perform the write, creating the directory first if needed
    pub fn run<S: TrackStorage + ?Sized>(&self, storage: &S) -> Result<()> {
        if !storage.exists(&self.dir) {
            storage.make_dirs(&self.dir)?;
        }

        let path = self.path();
        match &self.kind {
            WriteKind::Append(fixes) => {
                let existing = storage.read_text(&path)?;
                let merged = gpx::merge_append(existing.as_deref(), fixes);
                storage.write_text(&path, &merged)?;
                log::debug!("Flushed {} point(s) to {}", fixes.len(), path.display());
            }
            WriteKind::Replace(document) => {
                storage.write_text(&path, document)?;
                log::info!("Wrote track {}", path.display());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::path::Path;

    const T0: i64 = 1_700_000_000_000;

    fn append_job(fixes: Vec<Fix>) -> WriteJob {
        WriteJob {
            dir: PathBuf::from("/tracks"),
            file_name: "2023-11-14-221320.gpx".to_string(),
            kind: WriteKind::Append(fixes),
        }
    }

    #[test]
    fn test_append_creates_then_merges() {
        let storage = MemoryStorage::new();
        let f1 = Fix::new(1.0, 2.0, T0);
        let f2 = Fix::new(3.0, 4.0, T0 + 1_000);

        append_job(vec![f1]).run(&storage).unwrap();
        assert!(storage.exists(Path::new("/tracks")));

        let job = append_job(vec![f2]);
        job.run(&storage).unwrap();

        assert_eq!(storage.file(&job.path()), Some(gpx::render(&[f1, f2], &[])));
        assert_eq!(storage.write_count(), 2);
    }

    #[test]
    fn test_replace_overwrites() {
        let storage = MemoryStorage::new();
        append_job(vec![Fix::new(1.0, 2.0, T0)]).run(&storage).unwrap();

        let document = gpx::render(&[], &[]);
        let job = WriteJob {
            kind: WriteKind::Replace(document.clone()),
            ..append_job(Vec::new())
        };
        job.run(&storage).unwrap();

        assert_eq!(storage.file(&job.path()), Some(document));
    }

    #[test]
    fn test_failed_write_reports_error() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(append_job(vec![Fix::new(1.0, 2.0, T0)]).run(&storage).is_err());
    }
}
