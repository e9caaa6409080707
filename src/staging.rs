//! Per-request staging workspaces.
//!
//! Every conversion request gets its own UUID-named subdirectory of the
//! staging root, so concurrent requests can never see each other's
//! intermediate files, and no stage ever needs a directory-wide glob outside
//! its own workspace. The workspace doubles as the request's temp-file set:
//! after the request reaches a terminal state, [`RequestWorkspace::cleanup`]
//! deletes every tracked file and the directory itself, exactly once.

use std::fs;

use uuid::Uuid;

use crate::prelude::*;

/// The staging directory of a single in-flight conversion request.
pub struct RequestWorkspace {
    /// Collision-resistant request identifier. Also the directory name.
    id: String,
    /// The workspace directory. Everything a request writes lives in here.
    dir: PathBuf,
    /// Intermediate files registered for deletion.
    tracked: Vec<PathBuf>,
    /// Whether cleanup has already run.
    cleaned: bool,
}

impl RequestWorkspace {
    /// Create a fresh workspace under `staging_root`.
    pub fn create(staging_root: &Path) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let dir = staging_root.join(&id);
        fs::create_dir_all(&dir).with_context(|| {
            format!("failed to create staging workspace {:?}", dir.display())
        })?;
        debug!(request_id = %id, "created staging workspace");
        Ok(Self {
            id,
            dir,
            tracked: vec![],
            cleaned: false,
        })
    }

    /// The request identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register an intermediate file for deletion at cleanup.
    pub fn track(&mut self, path: PathBuf) {
        debug_assert!(
            path.starts_with(&self.dir),
            "tracked file must live inside the workspace"
        );
        self.tracked.push(path);
    }

    /// Delete every tracked file and the workspace directory.
    ///
    /// Runs on success and on failure; calling it twice is a no-op. Deletion
    /// errors are logged rather than propagated, because cleanup must never
    /// mask the request's real outcome.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        for path in self.tracked.drain(..) {
            if path.exists()
                && let Err(err) = fs::remove_file(&path)
            {
                warn!(
                    request_id = %self.id,
                    path = %path.display(),
                    "failed to delete intermediate file: {}",
                    err
                );
            }
        }
        // Catch anything a stage wrote without tracking it.
        if self.dir.exists()
            && let Err(err) = fs::remove_dir_all(&self.dir)
        {
            warn!(
                request_id = %self.id,
                directory = %self.dir.display(),
                "failed to delete staging workspace: {}",
                err
            );
        }
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}
