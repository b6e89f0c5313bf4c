//! Filesystem credential store.
//!
//! The protocol client persists its pairing material as a directory of
//! opaque files. This crate owns the layout
//! `{root}/{tenant_id}/{device_id}/…`, migrates the legacy flat layout
//! `{root}/{device_id}/…` on first touch, and extracts the paired
//! identity for mirroring into the relational store. The directory — not
//! the database — is the source of truth for pairing material.

use std::{
    fs,
    path::{Path, PathBuf},
};

use {
    serde::Deserialize,
    tracing::{debug, warn},
};

mod error;

pub use error::{Error, Result};

/// Name of the primary credentials file written by the protocol client.
pub const CREDS_FILE: &str = "creds.json";

/// Identity extracted from a paired credentials file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedIdentity {
    pub jid: Option<String>,
    pub name: Option<String>,
}

/// One credential directory found during a boot scan.
#[derive(Debug, Clone)]
pub struct SessionDirEntry {
    /// `None` for directories still in the legacy flat layout.
    pub tenant_id: Option<String>,
    pub device_id: String,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct SessionFs {
    root: PathBuf,
}

#[derive(Deserialize)]
struct CredsFile {
    me: Option<CredsMe>,
}

#[derive(Deserialize)]
struct CredsMe {
    id: Option<String>,
    name: Option<String>,
}

impl SessionFs {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve (and create) the credential directory for a device,
    /// migrating a legacy flat-layout directory by atomic rename first.
    pub async fn resolve(&self, tenant_id: &str, device_id: &str) -> Result<PathBuf> {
        validate_segment(tenant_id)?;
        validate_segment(device_id)?;

        let legacy = self.root.join(device_id);
        let target = self.root.join(tenant_id).join(device_id);
        let device_id = device_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            if legacy.is_dir() && !target.exists() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&legacy, &target)?;
                debug!(device_id, "migrated legacy session directory");
            }
            fs::create_dir_all(&target)?;
            Ok(target)
        })
        .await?
    }

    /// Read the paired identity out of the primary credentials file, if
    /// the device has ever completed pairing.
    pub async fn identity(&self, tenant_id: &str, device_id: &str) -> Result<Option<PairedIdentity>> {
        validate_segment(tenant_id)?;
        validate_segment(device_id)?;

        let path = self.root.join(tenant_id).join(device_id).join(CREDS_FILE);
        tokio::task::spawn_blocking(move || -> Result<Option<PairedIdentity>> {
            if !path.is_file() {
                return Ok(None);
            }
            let raw = fs::read_to_string(&path)?;
            let creds: CredsFile = match serde_json::from_str(&raw) {
                Ok(creds) => creds,
                Err(e) => {
                    warn!(path = %path.display(), "unreadable credentials file: {e}");
                    return Ok(None);
                }
            };
            Ok(creds.me.map(|me| PairedIdentity {
                jid: me.id,
                name: me.name,
            }))
        })
        .await?
    }

    /// Remove all pairing material for a device, in both layouts.
    pub async fn delete(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        validate_segment(tenant_id)?;
        validate_segment(device_id)?;

        let scoped = self.root.join(tenant_id).join(device_id);
        let legacy = self.root.join(device_id);
        tokio::task::spawn_blocking(move || -> Result<()> {
            for dir in [scoped, legacy] {
                if dir.is_dir() {
                    fs::remove_dir_all(&dir)?;
                }
            }
            Ok(())
        })
        .await?
    }

    /// Enumerate every session directory on disk, in both layouts. Used
    /// once at boot to decide which devices to resurrect.
    pub async fn scan(&self) -> Result<Vec<SessionDirEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<SessionDirEntry>> {
            let mut entries = Vec::new();
            if !root.is_dir() {
                return Ok(entries);
            }
            for top in fs::read_dir(&root)? {
                let top = top?;
                if !top.file_type()?.is_dir() {
                    continue;
                }
                let name = top.file_name().to_string_lossy().into_owned();
                if name.starts_with("tenant_") {
                    for child in fs::read_dir(top.path())? {
                        let child = child?;
                        if !child.file_type()?.is_dir() {
                            continue;
                        }
                        entries.push(SessionDirEntry {
                            tenant_id: Some(name.clone()),
                            device_id: child.file_name().to_string_lossy().into_owned(),
                            path: child.path(),
                        });
                    }
                } else {
                    // Legacy flat layout: a device directory at the root.
                    entries.push(SessionDirEntry {
                        tenant_id: None,
                        device_id: name,
                        path: top.path(),
                    });
                }
            }
            Ok(entries)
        })
        .await?
    }
}

/// Ids become path segments; refuse anything that could escape the root.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(Error::BadId {
            id: segment.to_string(),
        });
    }
    Ok(())
}
