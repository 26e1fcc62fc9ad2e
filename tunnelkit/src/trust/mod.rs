//! Persistent mapping from server public key to acceptance record (§3, §4.A).

mod fingerprint;
mod policy;

pub use fingerprint::fingerprint;
pub use policy::{classify, require_known_ok, Advisory, HostState};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::TrustStoreError;

/// A single accepted-or-banned server key, keyed by its authorized-keys text form.
///
/// Invariant: at most one record per distinct `human_key`; `banned` records are retained
/// forever and always veto (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerPubKeyRecord {
    pub hostname: String,
    pub remote_addr: String,
    pub human_key: String,
    #[serde(default)]
    pub banned: bool,
}

/// Durable key -> record mapping, loaded at startup and synced on every modification.
///
/// Encoding is JSON Lines, one record per line (§6): only a `.json` extension is
/// accepted, a differently-suffixed path is a configuration error rather than a
/// silently-ignored one.
pub struct TrustStore {
    path: PathBuf,
    records: HashMap<String, ServerPubKeyRecord>,
}

impl TrustStore {
    /// Loads the store from `path`, creating an empty one if the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TrustStoreError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") | None => {}
            Some(other) => return Err(TrustStoreError::UnsupportedEncoding(other.to_owned())),
        }

        let mut records = HashMap::new();
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    let record: ServerPubKeyRecord = serde_json::from_str(line)?;
                    records.insert(record.human_key.clone(), record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(path = %path.display(), count = records.len(), "trust store loaded");
        Ok(Self {
            path: path.to_owned(),
            records,
        })
    }

    /// Looks up a record by its exact authorized-keys byte form.
    pub fn lookup(&self, human_key: &str) -> Option<&ServerPubKeyRecord> {
        self.records.get(human_key)
    }

    /// Inserts or replaces the record for `record.human_key` and durably persists the
    /// change: the caller does not observe success until the write would survive a
    /// crash (§3, §4.A).
    pub async fn upsert(&mut self, record: ServerPubKeyRecord) -> Result<(), TrustStoreError> {
        self.records.insert(record.human_key.clone(), record);
        self.sync().await
    }

    /// Forces durability of the current in-memory state. Called implicitly by
    /// [`Self::upsert`]; exposed so callers can batch mutations if they construct their
    /// own wrapper and sync once at the end.
    pub async fn sync(&self) -> Result<(), TrustStoreError> {
        let mut buf = String::new();
        for record in self.records.values() {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(buf.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, hostname: &str) -> ServerPubKeyRecord {
        ServerPubKeyRecord {
            hostname: hostname.to_owned(),
            remote_addr: "127.0.0.1:22".to_owned(),
            human_key: key.to_owned(),
            banned: false,
        }
    }

    #[tokio::test]
    async fn round_trips_across_reopen() {
        let dir = tempdir();
        let path = dir.join("trust.json");

        let mut store = TrustStore::open(&path).await.unwrap();
        store.upsert(record("ssh-ed25519 AAAA", "a.example")).await.unwrap();

        let reopened = TrustStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.lookup("ssh-ed25519 AAAA"),
            Some(&record("ssh-ed25519 AAAA", "a.example"))
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record_for_same_key() {
        let dir = tempdir();
        let path = dir.join("trust.json");
        let mut store = TrustStore::open(&path).await.unwrap();

        store.upsert(record("ssh-ed25519 AAAA", "a.example")).await.unwrap();
        store.upsert(record("ssh-ed25519 AAAA", "b.example")).await.unwrap();

        assert_eq!(store.records.len(), 1);
        assert_eq!(store.lookup("ssh-ed25519 AAAA").unwrap().hostname, "b.example");

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn rejects_non_json_extension() {
        let dir = tempdir();
        let path = dir.join("trust.json.snappy");
        let err = TrustStore::open(&path).await.unwrap_err();
        assert!(matches!(err, TrustStoreError::UnsupportedEncoding(_)));
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tunnelkit-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
