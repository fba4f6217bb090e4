//! Storage persistence: repository layout, atomic writes, content-address
//! verification, and disk/quota admission (spec §3's Repository, §4.6).

use std::io::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::error::DaemonError;
use crate::hash::to_hex;

/// One of the five artifact categories a repository holds (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactType {
    Data,
    Keys,
    Locks,
    Snapshots,
    Index,
}

impl ArtifactType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "data" => Self::Data,
            "keys" => Self::Keys,
            "locks" => Self::Locks,
            "snapshots" => Self::Snapshots,
            "index" => Self::Index,
            _ => return None,
        })
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Keys => "keys",
            Self::Locks => "locks",
            Self::Snapshots => "snapshots",
            Self::Index => "index",
        }
    }
}

const MIN_FREE_HEADROOM_BYTES: u64 = 100 * 1024 * 1024;

/// Owns the on-disk filesystem tree rooted at `base_path` (spec §3's
/// Ownership model).
#[derive(Debug, Clone)]
pub struct Storage {
    base_path: Utf8PathBuf,
}

impl Storage {
    pub fn new(base_path: Utf8PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Utf8Path {
        &self.base_path
    }

    fn repo_dir(&self, repo: &str) -> Utf8PathBuf {
        self.base_path.join(repo)
    }

    fn artifact_dir(&self, repo: &str, kind: ArtifactType) -> Utf8PathBuf {
        self.repo_dir(repo).join(kind.dir_name())
    }

    /// The path of a single artifact. For `data`, shards by the first two
    /// hex characters of its name (spec §3, R2).
    pub fn artifact_path(&self, repo: &str, kind: ArtifactType, name: &str) -> Utf8PathBuf {
        let dir = self.artifact_dir(repo, kind);
        if kind == ArtifactType::Data && name.len() >= 2 {
            dir.join(&name[..2]).join(name)
        } else {
            dir.join(name)
        }
    }

    fn config_path(&self, repo: &str) -> Utf8PathBuf {
        self.repo_dir(repo).join("config")
    }

    /// The path of the serialized policy file (spec §6's persisted state
    /// layout).
    pub fn policy_path(&self) -> Utf8PathBuf {
        self.base_path.join(".airgapper-policy.json")
    }

    /// The path of the registered-tickets store (spec §6's persisted state
    /// layout).
    pub fn tickets_path(&self) -> Utf8PathBuf {
        self.base_path.join(".airgapper-verification").join("tickets.json")
    }

    /// The path of the hash-chained audit log (spec §6's persisted state
    /// layout).
    pub fn audit_path(&self) -> Utf8PathBuf {
        self.base_path.join(".airgapper-verification").join("audit.json")
    }

    /// The path of the daemon's self-owned audit-signing key, PKCS#8
    /// encoded. Unlike a policy's owner/host keys, the lifecycle of this
    /// key belongs entirely to the daemon: it is generated on first use
    /// and reused thereafter.
    pub fn audit_signing_key_path(&self) -> Utf8PathBuf {
        self.base_path.join(".airgapper-verification").join("audit-signing-key.pkcs8")
    }

    pub fn repo_exists(&self, repo: &str) -> bool {
        self.repo_dir(repo).is_dir()
    }

    /// POST `/{repo}/`: create the repository and its subdirectories.
    pub fn create_repo(&self, repo: &str) -> Result<(), DaemonError> {
        std::fs::create_dir_all(self.repo_dir(repo))?;
        for kind in [
            ArtifactType::Data,
            ArtifactType::Keys,
            ArtifactType::Locks,
            ArtifactType::Snapshots,
            ArtifactType::Index,
        ] {
            std::fs::create_dir_all(self.artifact_dir(repo, kind))?;
        }
        Ok(())
    }

    /// POST `/{repo}/config`: write-once (R1). Fails with `Forbidden` if a
    /// config already exists.
    pub fn write_config(&self, repo: &str, body: &[u8]) -> Result<(), DaemonError> {
        let path = self.config_path(repo);
        if path.exists() {
            return Err(DaemonError::Forbidden("config already exists".to_string()));
        }
        crate::util::write_file(&path, body)?;
        Ok(())
    }

    pub fn read_config(&self, repo: &str) -> Result<Vec<u8>, DaemonError> {
        std::fs::read(self.config_path(repo)).map_err(|err| read_error(err))
    }

    pub fn config_exists(&self, repo: &str) -> bool {
        self.config_path(repo).exists()
    }

    pub fn delete_config(&self, repo: &str) -> Result<(), DaemonError> {
        std::fs::remove_file(self.config_path(repo)).map_err(|err| read_error(err))
    }

    /// List the artifacts of one category, walking the two-level shard
    /// tree for `data`.
    pub fn list(&self, repo: &str, kind: ArtifactType) -> Result<Vec<(String, u64)>, DaemonError> {
        let dir = self.artifact_dir(repo, kind);
        let mut out = Vec::new();
        if !dir.is_dir() {
            return Ok(out);
        }

        if kind == ArtifactType::Data {
            for shard in std::fs::read_dir(&dir)? {
                let shard = shard?;
                if !shard.file_type()?.is_dir() {
                    continue;
                }
                for entry in std::fs::read_dir(shard.path())? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let size = entry.metadata()?.len();
                    out.push((name, size));
                }
            }
        } else {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let size = entry.metadata()?.len();
                out.push((name, size));
            }
        }

        Ok(out)
    }

    pub fn read(&self, repo: &str, kind: ArtifactType, name: &str) -> Result<Vec<u8>, DaemonError> {
        std::fs::read(self.artifact_path(repo, kind, name)).map_err(read_error)
    }

    pub fn exists(&self, repo: &str, kind: ArtifactType, name: &str) -> bool {
        self.artifact_path(repo, kind, name).exists()
    }

    /// The artifact's mtime as a Unix timestamp, used by the authorizer as
    /// a proxy for its creation time (spec §4.5).
    pub fn mtime(&self, repo: &str, kind: ArtifactType, name: &str) -> Result<i64, DaemonError> {
        let meta = std::fs::metadata(self.artifact_path(repo, kind, name)).map_err(read_error)?;
        let modified = meta.modified().map_err(DaemonError::internal)?;
        Ok(modified
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0))
    }

    pub fn delete(&self, repo: &str, kind: ArtifactType, name: &str) -> Result<(), DaemonError> {
        std::fs::remove_file(self.artifact_path(repo, kind, name)).map_err(read_error)
    }

    /// Atomically write an artifact body, enforcing disk/quota admission
    /// (spec §4.6) and, when `expected_hash` is set, content-address
    /// verification (spec §3, R2).
    pub fn write_artifact(
        &self,
        repo: &str,
        kind: ArtifactType,
        name: &str,
        body: &[u8],
        expected_hash: Option<&str>,
        admission: &AdmissionLimits,
        repo_bytes_used: u64,
    ) -> Result<(), DaemonError> {
        admission.check(self.base_path(), body.len() as u64, repo_bytes_used)?;

        if let Some(expected) = expected_hash {
            let digest = to_hex(&Sha256::digest(body));
            if digest != expected {
                return Err(DaemonError::BadRequest("hash mismatch".to_string()));
            }
        }

        let path = self.artifact_path(repo, kind, name);
        let dir = path.parent().expect("artifact path always has a parent");
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::Builder::new().tempfile_in(dir)?;
        tmp.as_file_mut().write_all(body)?;
        // On any write error above, `tmp`'s Drop unlinks the temp file
        // (spec R3: "on any write error the temp file is removed").
        tmp.persist(&path).map_err(|err| DaemonError::internal(err.error))?;
        Ok(())
    }

    /// Total bytes stored under one repository's `data` directory, used for
    /// per-repo quota accounting.
    pub fn repo_bytes_used(&self, repo: &str) -> Result<u64, DaemonError> {
        directory_size(&self.repo_dir(repo))
    }

    /// The fraction of the underlying filesystem currently in use, if the
    /// platform exposes it (spec §4.7's "disk usage").
    pub fn disk_used_pct(&self) -> Option<f64> {
        let (free, total) = disk_stats(&self.base_path)?;
        if total == 0 {
            return None;
        }
        Some(((total - free) as f64 / total as f64) * 100.0)
    }
}

fn read_error(err: std::io::Error) -> DaemonError {
    if err.kind() == std::io::ErrorKind::NotFound {
        DaemonError::NotFound
    } else {
        DaemonError::internal(err)
    }
}

fn directory_size(dir: &Utf8Path) -> Result<u64, DaemonError> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            if let Ok(sub) = Utf8PathBuf::from_path_buf(entry.path()) {
                total += directory_size(&sub)?;
            }
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Disk and per-repository quota limits checked before accepting a write.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionLimits {
    pub max_disk_pct: u8,
    pub quota_bytes_per_repo: u64,
}

impl AdmissionLimits {
    fn check(&self, base_path: &Utf8Path, body_len: u64, repo_bytes_used: u64) -> Result<(), DaemonError> {
        if self.quota_bytes_per_repo != 0 && repo_bytes_used + body_len > self.quota_bytes_per_repo {
            return Err(DaemonError::Capacity("per-repository quota exceeded".to_string()));
        }

        if let Some((free, total)) = disk_stats(base_path) {
            if total > 0 {
                let used_pct = ((total - free) as f64 / total as f64) * 100.0;
                if used_pct >= self.max_disk_pct as f64 {
                    return Err(DaemonError::Capacity("disk usage threshold exceeded".to_string()));
                }
            }
            if free.saturating_sub(body_len) < MIN_FREE_HEADROOM_BYTES {
                return Err(DaemonError::Capacity("insufficient free disk space".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn disk_stats(path: &Utf8Path) -> Option<(u64, u64)> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_str()).ok()?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is a valid NUL-terminated string for the lifetime of
    // the call, and `stat` is a valid, correctly-sized out-pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: `statvfs` returned success, so `stat` is now initialized.
    let stat = unsafe { stat.assume_init() };
    let block_size = stat.f_frsize as u64;
    Some((stat.f_bavail as u64 * block_size, stat.f_blocks as u64 * block_size))
}

#[cfg(not(unix))]
fn disk_stats(_path: &Utf8Path) -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, Storage::new(base))
    }

    fn no_limits() -> AdmissionLimits {
        AdmissionLimits {
            max_disk_pct: 100,
            quota_bytes_per_repo: 0,
        }
    }

    #[test]
    fn r1_config_is_write_once() {
        let (_dir, storage) = storage();
        storage.create_repo("r1").unwrap();
        storage.write_config("r1", b"hello").unwrap();
        assert!(matches!(
            storage.write_config("r1", b"again"),
            Err(DaemonError::Forbidden(_))
        ));
    }

    #[test]
    fn scenario_1_content_address_enforcement() {
        let (_dir, storage) = storage();
        storage.create_repo("r1").unwrap();
        let digest = to_hex(&Sha256::digest(b"hello"));

        storage
            .write_artifact("r1", ArtifactType::Data, &digest, b"hello", Some(&digest), &no_limits(), 0)
            .unwrap();
        assert!(storage.exists("r1", ArtifactType::Data, &digest));

        let err = storage
            .write_artifact("r1", ArtifactType::Data, &digest, b"world", Some(&digest), &no_limits(), 0)
            .unwrap_err();
        assert!(matches!(err, DaemonError::BadRequest(_)));
    }

    #[test]
    fn quota_rejects_oversized_repo() {
        let (_dir, storage) = storage();
        storage.create_repo("r1").unwrap();
        let limits = AdmissionLimits {
            max_disk_pct: 100,
            quota_bytes_per_repo: 4,
        };
        let err = storage
            .write_artifact("r1", ArtifactType::Keys, "k1", b"toolong", None, &limits, 0)
            .unwrap_err();
        assert!(matches!(err, DaemonError::Capacity(_)));
    }

    #[test]
    fn data_listing_walks_shard_tree() {
        let (_dir, storage) = storage();
        storage.create_repo("r1").unwrap();
        let digest = to_hex(&Sha256::digest(b"payload"));
        storage
            .write_artifact("r1", ArtifactType::Data, &digest, b"payload", None, &no_limits(), 0)
            .unwrap();

        let listing = storage.list("r1", ArtifactType::Data).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, digest);
    }
}
