//! The download registry for finished output documents.
//!
//! Output artifacts are the only state shared across requests. Each artifact
//! lives for a bounded window after its request succeeds: the first
//! successful download removes it, and a background sweeper removes anything
//! that outlives its deadline. Downloads after either event fail as
//! "not found", never as a server fault.

use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Args;
use tokio::time::Instant;
use uuid::Uuid;

use crate::prelude::*;

/// How often the background sweeper looks for expired artifacts.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Retention options for finished output documents.
#[derive(Args, Clone, Debug)]
pub struct ArtifactOptions {
    /// Directory holding finished documents awaiting download.
    #[clap(long, default_value = "/tmp/textpress/artifacts")]
    pub artifact_dir: PathBuf,

    /// Seconds a finished document stays downloadable.
    #[clap(long, default_value = "90")]
    pub artifact_ttl_secs: u64,
}

impl ArtifactOptions {
    fn ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }
}

/// A registered output document, as reported to the client.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Generated filename under the artifact directory.
    pub filename: String,
}

/// Registry state for one stored artifact.
struct ArtifactEntry {
    path: PathBuf,
    expires_at: Instant,
}

/// Owns every finished output document from creation until deletion.
#[derive(Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, ArtifactEntry>>>,
}

impl ArtifactStore {
    /// Create a store over the configured artifact directory.
    pub fn new(options: &ArtifactOptions) -> Result<Self> {
        fs::create_dir_all(&options.artifact_dir).with_context(|| {
            format!(
                "failed to create artifact directory {:?}",
                options.artifact_dir.display()
            )
        })?;
        Ok(Self {
            dir: options.artifact_dir.clone(),
            ttl: options.ttl(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Persist a finished document and register it for download.
    #[instrument(level = "debug", skip_all)]
    pub async fn register(&self, bytes: &[u8]) -> Result<Artifact> {
        let filename = format!("{}.docx", Uuid::new_v4());
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write artifact {:?}", path.display()))?;
        let expires_at = Instant::now() + self.ttl;
        self.lock_entries()
            .insert(filename.clone(), ArtifactEntry { path, expires_at });
        info!(
            filename = %filename,
            ttl_secs = self.ttl.as_secs(),
            "registered output artifact"
        );
        Ok(Artifact { filename })
    }

    /// Serve an artifact's bytes and delete it.
    ///
    /// The artifact is gone after the first successful download; a later
    /// request, or one past the retention deadline, gets
    /// [`PipelineError::ArtifactExpired`].
    #[instrument(level = "debug", skip_all, fields(filename = %filename))]
    pub async fn serve_and_expire(&self, filename: &str) -> Result<Vec<u8>> {
        let Some(entry) = self.lock_entries().remove(filename) else {
            return Err(PipelineError::ArtifactExpired(filename.to_owned()).into());
        };
        if Instant::now() >= entry.expires_at {
            remove_artifact_file(&entry.path);
            return Err(PipelineError::ArtifactExpired(filename.to_owned()).into());
        }
        let bytes = tokio::fs::read(&entry.path).await.with_context(|| {
            format!("failed to read artifact {:?}", entry.path.display())
        })?;
        remove_artifact_file(&entry.path);
        debug!(filename = %filename, "served and expired artifact");
        Ok(bytes)
    }

    /// Delete every artifact past its retention deadline. Returns the number
    /// of artifacts removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired = {
            let mut entries = self.lock_entries();
            let filenames = entries
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(filename, _)| filename.clone())
                .collect::<Vec<_>>();
            filenames
                .into_iter()
                .filter_map(|filename| entries.remove_entry(&filename))
                .collect::<Vec<_>>()
        };
        // Files are deleted after the registry lock is released, so requests
        // registering new artifacts never wait on sweep disk I/O.
        for (filename, entry) in &expired {
            remove_artifact_file(&entry.path);
            debug!(filename = %filename, "swept expired artifact");
        }
        expired.len()
    }

    /// Spawn the background expiry sweep.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                store.sweep_expired();
            }
        })
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, ArtifactEntry>> {
        self.entries.lock().expect("artifact registry lock poisoned")
    }
}

/// Best-effort deletion of an artifact file; the registry entry is already
/// gone, so a leftover file only wastes disk until the host cleans /tmp.
fn remove_artifact_file(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(
            path = %path.display(),
            "failed to delete artifact file: {}",
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(dir: &Path, ttl_secs: u64) -> Result<ArtifactStore> {
        ArtifactStore::new(&ArtifactOptions {
            artifact_dir: dir.to_owned(),
            artifact_ttl_secs: ttl_secs,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_download_consumes_the_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path(), 90)?;
        let artifact = store.register(b"docx bytes").await?;

        let bytes = store.serve_and_expire(&artifact.filename).await?;
        assert_eq!(bytes, b"docx bytes");
        assert!(!dir.path().join(&artifact.filename).exists());

        // Second download must fail; the bytes are gone, never stale.
        let err = store
            .serve_and_expire(&artifact.filename)
            .await
            .expect_err("second download should fail");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ArtifactExpired(_))
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn download_after_expiry_is_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path(), 90)?;
        let artifact = store.register(b"docx bytes").await?;

        tokio::time::advance(Duration::from_secs(91)).await;
        let err = store
            .serve_and_expire(&artifact.filename)
            .await
            .expect_err("expired artifact should not be served");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ArtifactExpired(_))
        ));
        assert!(!dir.path().join(&artifact.filename).exists());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_artifacts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path(), 90)?;
        let old = store.register(b"old").await?;
        tokio::time::advance(Duration::from_secs(60)).await;
        let fresh = store.register(b"fresh").await?;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.sweep_expired(), 1);
        assert!(!dir.path().join(&old.filename).exists());
        assert!(dir.path().join(&fresh.filename).exists());

        let bytes = store.serve_and_expire(&fresh.filename).await?;
        assert_eq!(bytes, b"fresh");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn registry_stays_usable_across_sweeps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path(), 90)?;
        let old = store.register(b"old").await?;
        tokio::time::advance(Duration::from_secs(91)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert!(!dir.path().join(&old.filename).exists());

        // Registration and download keep working after a sweep has removed
        // entries and deleted their files.
        let fresh = store.register(b"fresh").await?;
        assert_eq!(store.serve_and_expire(&fresh.filename).await?, b"fresh");
        assert_eq!(store.sweep_expired(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_filename_is_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path(), 90)?;
        let err = store
            .serve_and_expire("no-such-file.docx")
            .await
            .expect_err("unknown artifact should not be served");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ArtifactExpired(_))
        ));
        Ok(())
    }
}
