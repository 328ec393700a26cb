//! Storage provisioning for series artifacts.
//!
//! Directory layout and artifact creation are defined here, once, instead of
//! being scattered through every resource type. A data directory belongs to
//! one [`SeriesSpec`]; it holds a `spec.json` sidecar describing the schema
//! (with its stable hash) and one `<key>.slab` artifact per entity.
//!
//! ```text
//! <data-dir>/
//! ├── spec.json        <- schema + stable hash
//! ├── entities.json    <- sanitized key -> raw entity id (see registry)
//! ├── eth0.slab
//! └── sda.slab
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, Result};
use crate::schema::SeriesSpec;
use crate::series::Series;

/// Name of the schema sidecar file in a data directory.
pub const SPEC_SIDECAR_FILE: &str = "spec.json";

/// Sidecar format version.
const SIDECAR_VERSION: u32 = 1;

/// On-disk shape of the schema sidecar.
#[derive(Debug, Serialize, Deserialize)]
struct SpecSidecar {
    version: u32,
    hash: u64,
    spec: SeriesSpec,
}

/// Creates the data directory if it does not exist.
///
/// # Errors
///
/// Returns [`ArtifactError::Io`] if the directory cannot be created — the
/// storage medium being unwritable at creation time is unrecoverable for
/// everything below this directory.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        ArtifactError::Io {
            path: dir.display().to_string(),
            source: e,
        }
        .into()
    })
}

/// Path of the artifact for a sanitized entity key.
pub fn artifact_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.slab"))
}

/// Writes the schema sidecar on first use, or validates it on every later
/// one.
///
/// # Errors
///
/// Returns [`ArtifactError::SchemaMismatch`] if the directory was
/// provisioned with a different schema, and I/O or parse errors otherwise.
pub fn ensure_spec_sidecar(dir: &Path, spec: &SeriesSpec) -> Result<()> {
    let path = dir.join(SPEC_SIDECAR_FILE);
    if path.exists() {
        let existing = read_spec_sidecar(dir)?;
        if existing.stable_hash() != spec.stable_hash() {
            return Err(ArtifactError::SchemaMismatch {
                path: path.display().to_string(),
                existing: existing.stable_hash(),
                expected: spec.stable_hash(),
            }
            .into());
        }
        return Ok(());
    }

    let sidecar = SpecSidecar {
        version: SIDECAR_VERSION,
        hash: spec.stable_hash(),
        spec: spec.clone(),
    };
    let json = serde_json::to_string_pretty(&sidecar).map_err(|e| ArtifactError::Sidecar {
        path: path.display().to_string(),
        source: e,
    })?;
    fs::write(&path, json).map_err(|e| {
        ArtifactError::Io {
            path: path.display().to_string(),
            source: e,
        }
        .into()
    })
}

/// Reads and validates the schema sidecar of a data directory.
///
/// # Errors
///
/// Returns [`ArtifactError`] if the sidecar is missing, unparseable, or its
/// stored hash does not match its own schema (a hand-edited file).
pub fn read_spec_sidecar(dir: &Path) -> Result<SeriesSpec> {
    let path = dir.join(SPEC_SIDECAR_FILE);
    let json = fs::read_to_string(&path).map_err(|e| ArtifactError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let sidecar: SpecSidecar =
        serde_json::from_str(&json).map_err(|e| ArtifactError::Sidecar {
            path: path.display().to_string(),
            source: e,
        })?;

    if sidecar.version != SIDECAR_VERSION {
        return Err(ArtifactError::Corrupted {
            path: path.display().to_string(),
            reason: format!(
                "unsupported sidecar version: expected {SIDECAR_VERSION}, found {}",
                sidecar.version
            ),
        }
        .into());
    }
    if sidecar.hash != sidecar.spec.stable_hash() {
        return Err(ArtifactError::Corrupted {
            path: path.display().to_string(),
            reason: "stored hash does not match the stored schema".to_string(),
        }
        .into());
    }
    sidecar.spec.validate()?;

    Ok(sidecar.spec)
}

/// Provisions the artifact for one entity: directory, sidecar, and slab,
/// created on first sighting and opened (schema-validated) afterwards.
///
/// # Errors
///
/// Returns [`ArtifactError`] on I/O failure, corruption, or schema mismatch.
pub fn ensure_series_artifact(dir: &Path, key: &str, spec: &SeriesSpec) -> Result<Series> {
    ensure_dir(dir)?;
    ensure_spec_sidecar(dir, spec)?;
    Series::open_or_create(artifact_path(dir, key), spec)
}
