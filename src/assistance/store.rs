//! Durable assistance cache: one file per [AssistanceKind].
use std::{
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use log::{debug, error, info};

use thiserror::Error;

use crate::assistance::{
    AssistanceKind, AssistanceRecord, AssistanceSet, Source,
    fd::{FileDescriptor, ReadDescriptor},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} record is not network sourced")]
    NotNetworkSourced(AssistanceKind),

    #[error("stored record kind mismatch: expecting {expected}, found {found}")]
    KindMismatch {
        expected: AssistanceKind,
        found: AssistanceKind,
    },
}

/// Local assistance cache. A missing entry is a valid state, not an error.
#[derive(Debug, Clone)]
pub struct AssistanceStore {
    directory: PathBuf,
    gzip: bool,
}

impl AssistanceStore {
    /// Builds a new [AssistanceStore] located in this directory
    pub fn new<P: Into<PathBuf>>(directory: P, gzip: bool) -> Self {
        Self {
            directory: directory.into(),
            gzip,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Storage location for this [AssistanceKind]
    pub fn path(&self, kind: AssistanceKind) -> PathBuf {
        let mut filename = format!("{}.json", kind.file_stem());
        if self.gzip {
            filename.push_str(".gz");
        }
        self.directory.join(filename)
    }

    /// Loads a single record. Returns Ok(None) when nothing is stored for this kind.
    pub fn load(&self, kind: AssistanceKind) -> Result<Option<AssistanceRecord>, StoreError> {
        let path = self.path(kind);

        let fd = match ReadDescriptor::open(self.gzip, &path) {
            Ok(fd) => fd,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} - no cached record ({})", kind, path.display());
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };

        let record: AssistanceRecord = serde_json::from_reader(fd)?;

        if record.kind() != kind {
            return Err(StoreError::KindMismatch {
                expected: kind,
                found: record.kind(),
            });
        }

        Ok(Some(record.with_source(Source::Cache)))
    }

    /// Loads every cached record. Missing or unreadable entries are absent from the result.
    pub fn load_cached(&self) -> AssistanceSet {
        let mut set = AssistanceSet::default();

        for kind in AssistanceKind::ALL {
            match self.load(kind) {
                Ok(Some(record)) => {
                    debug!("loaded cached {}", record);
                    set.insert(record);
                },
                Ok(None) => {},
                Err(e) => {
                    error!(
                        "{} - failed to load cached record ({}): {}",
                        kind,
                        self.path(kind).display(),
                        e
                    );
                },
            }
        }

        info!(
            "{} cached assistance record(s) loaded from {}",
            set.len(),
            self.directory.display()
        );

        set
    }

    /// Persists a [Source::Network] record, replacing any prior record of the same kind.
    /// Content is written aside then renamed, so a stored entry is always complete.
    pub fn save_cached(&self, record: &AssistanceRecord) -> Result<(), StoreError> {
        let kind = record.kind();

        if record.source != Source::Network {
            return Err(StoreError::NotNetworkSourced(kind));
        }

        std::fs::create_dir_all(&self.directory)?;

        let path = self.path(kind);
        let tmp = path.with_extension("tmp");

        let mut writer = BufWriter::new(FileDescriptor::create(self.gzip, &tmp)?);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;

        let fd = writer.into_inner().map_err(|e| e.into_error())?;
        fd.finish()?;

        std::fs::rename(&tmp, &path)?;

        debug!("{} - cached ({})", kind, path.display());
        Ok(())
    }
}
