use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::routing::RoutingSnapshot;

/// Owns the per-project files in the proxy's watched directory
#[derive(Debug, Clone)]
pub struct RoutingWriter {
    dir: PathBuf,
}

impl RoutingWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, project_id: Uuid) -> PathBuf {
        self.dir.join(format!("project_{}.yml", project_id))
    }

    /// Replace the project's file with `snapshot`, or remove it when the
    /// snapshot routes nothing.
    pub async fn apply(&self, project_id: Uuid, snapshot: &RoutingSnapshot) -> AppResult<()> {
        if snapshot.is_empty() {
            return self.remove(project_id).await;
        }

        let contents = snapshot.render()?;
        self.write_atomic(&self.path_for(project_id), contents.as_bytes())
            .await
    }

    pub async fn remove(&self, project_id: Uuid) -> AppResult<()> {
        let path = self.path_for(project_id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(project_id = %project_id, "Routing file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Current file contents, `None` when there is no file
    pub async fn read(&self, project_id: Uuid) -> AppResult<Option<String>> {
        let path = self.path_for(project_id);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Write to a temp file in the same directory, fsync, then rename over
    /// the target. The proxy only ever sees a complete file.
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> AppResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        // Unique per writer; the proxy ignores the .tmp extension
        let temp_path = self.dir.join(format!(
            ".{}.{}.tmp",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("routing"),
            Uuid::new_v4().simple()
        ));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(path, e));
        }

        Ok(())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> AppError {
    AppError::Routing(format!("{}: {}", path.display(), err))
}
