//! ---
//! meter_section: "03-persistence-logging"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Persistence abstractions and storage bindings."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{Result, StorageError};

/// Current table envelope version.
pub const TABLE_VERSION: u16 = 1;

#[derive(Serialize)]
struct TableEnvelopeRef<'a, T> {
    version: u16,
    saved_at: DateTime<Utc>,
    hash: String,
    rows: &'a [T],
}

#[derive(Debug, Deserialize)]
struct TableEnvelope<T> {
    #[allow(dead_code)]
    version: u16,
    #[allow(dead_code)]
    saved_at: DateTime<Utc>,
    hash: String,
    rows: Vec<T>,
}

/// Persist a full table snapshot to the provided filesystem path.
///
/// The envelope is written to a uniquely named temp file in the target
/// directory and renamed into place, so a concurrent reader never observes a
/// partially written table and concurrent saves of the same table cannot
/// clobber each other's temp file. The last rename wins.
pub fn save_table<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let hash = compute_hash(rows)?;
    let envelope = TableEnvelopeRef {
        version: TABLE_VERSION,
        saved_at: Utc::now(),
        hash,
        rows,
    };

    let tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        let json = serde_json::to_vec_pretty(&envelope)?;
        writer.write_all(&json)?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    debug!(path = %path.display(), rows = rows.len(), "table snapshot saved");
    Ok(())
}

/// Load a table snapshot from disk, verifying its row hash.
///
/// A missing file loads as an empty table; an envelope whose hash does not
/// match its rows fails with [`StorageError::HashMismatch`].
pub fn load_table<T: DeserializeOwned + Serialize>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let envelope: TableEnvelope<T> = serde_json::from_slice(&bytes)?;
    let expected = compute_hash(&envelope.rows)?;
    if envelope.hash != expected {
        return Err(StorageError::HashMismatch);
    }
    Ok(envelope.rows)
}

// Generic over a borrowed slice so save and load hash the same bytes.
fn compute_hash<T: Serialize>(rows: &[T]) -> Result<String> {
    let bytes = serde_json::to_vec(rows)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
