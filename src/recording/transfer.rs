//! Moving artifacts into the destination directory
//!
//! The artifact is copied to a hidden `.partial` file beside its final name,
//! synced, then published with a hard link so an existing recording is never
//! replaced and a half-written file is never visible under its final name.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::runtime::ContainerRuntime;
use crate::{Result, TapedeckError};

/// Copy `source` out of the container to `destination/file_name`
///
/// # Errors
///
/// Returns `DestinationWrite` if the destination cannot receive the file,
/// `ContainerGone` if the artifact vanished, or `Runtime` if it cannot be read
pub(crate) async fn transfer(
    runtime: &dyn ContainerRuntime,
    source: &Path,
    destination: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| destination_error(destination, e))?;

    let final_path = destination.join(file_name);
    let partial_path = partial_path_for(destination, file_name);

    let result = copy_and_publish(runtime, source, &partial_path, &final_path).await;

    match tokio::fs::remove_file(&partial_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove {}: {}", partial_path.display(), e),
    }

    result.map(|()| final_path)
}

async fn copy_and_publish(
    runtime: &dyn ContainerRuntime,
    source: &Path,
    partial_path: &Path,
    final_path: &Path,
) -> Result<()> {
    // Only the runtime knows which side of the copy failed
    runtime
        .copy_out(source, partial_path)
        .await
        .map_err(|e| match e {
            TapedeckError::Io(io_err) => TapedeckError::Runtime {
                operation: "copy_out",
                details: io_err.to_string(),
            },
            other => other,
        })?;

    sync_file(partial_path)
        .await
        .map_err(|e| destination_error(partial_path, e))?;

    publish(partial_path, final_path)
        .await
        .map_err(|e| destination_error(final_path, e))
}

async fn sync_file(path: &Path) -> io::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    file.sync_all().await
}

/// Expose `partial` under `target`, failing if `target` exists
async fn publish(partial: &Path, target: &Path) -> io::Result<()> {
    match tokio::fs::hard_link(partial, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            // No hard links on this filesystem
            debug!("hard link failed ({}), falling back to rename", e);
            if tokio::fs::try_exists(target).await? {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", target.display()),
                ));
            }
            tokio::fs::rename(partial, target).await
        }
    }
}

fn partial_path_for(destination: &Path, file_name: &str) -> PathBuf {
    destination.join(format!(".{file_name}.partial"))
}

fn destination_error(path: &Path, source: io::Error) -> TapedeckError {
    TapedeckError::DestinationWrite {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ScriptedRuntime, SessionHandle, FINALIZED_CONTENT};
    use tempfile::TempDir;

    async fn finalized_artifact(runtime: &ScriptedRuntime, container_id: &str) -> PathBuf {
        let session = SessionHandle::new(container_id, ":99").unwrap();
        let process = runtime.start_capture(&session).await.unwrap();
        runtime.stop_capture(&process).await.unwrap().path
    }

    fn visible_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_transfer_creates_destination() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let runtime = ScriptedRuntime::new(scratch.path().to_path_buf());
        let source = finalized_artifact(&runtime, "t1").await;
        let destination = out.path().join("nested").join("videos");

        let path = transfer(&runtime, &source, &destination, "PASSED-a.flv")
            .await
            .unwrap();

        assert_eq!(path, destination.join("PASSED-a.flv"));
        assert_eq!(std::fs::read(&path).unwrap(), FINALIZED_CONTENT);
        assert_eq!(visible_entries(&destination), vec!["PASSED-a.flv"]);
    }

    #[tokio::test]
    async fn test_transfer_never_overwrites() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let runtime = ScriptedRuntime::new(scratch.path().to_path_buf());
        let source = finalized_artifact(&runtime, "t2").await;

        std::fs::write(out.path().join("FAILED-a.flv"), b"earlier").unwrap();
        let result = transfer(&runtime, &source, out.path(), "FAILED-a.flv").await;

        assert!(matches!(
            result,
            Err(TapedeckError::DestinationWrite { .. })
        ));
        assert_eq!(
            std::fs::read(out.path().join("FAILED-a.flv")).unwrap(),
            b"earlier"
        );
        assert_eq!(visible_entries(out.path()), vec!["FAILED-a.flv"]);
    }

    #[tokio::test]
    async fn test_transfer_missing_source() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let runtime = ScriptedRuntime::new(scratch.path().to_path_buf());

        let result = transfer(
            &runtime,
            &scratch.path().join("gone.flv"),
            out.path(),
            "PASSED-b.flv",
        )
        .await;

        assert!(matches!(result, Err(TapedeckError::ContainerGone(_))));
        assert!(visible_entries(out.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transfer_unreadable_source_is_not_a_destination_error() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let runtime = ScriptedRuntime::new(scratch.path().to_path_buf());
        let source = scratch.path().join("capture-dir.flv");
        std::fs::create_dir(&source).unwrap();

        let result = transfer(&runtime, &source, out.path(), "FAILED-d.flv").await;

        assert!(matches!(
            result,
            Err(TapedeckError::Runtime {
                operation: "copy_out",
                ..
            })
        ));
        assert!(visible_entries(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_refused_copy() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let runtime = ScriptedRuntime::new(scratch.path().to_path_buf());
        let source = finalized_artifact(&runtime, "t4").await;
        runtime.refuse_copy("t4");

        let result = transfer(&runtime, &source, out.path(), "FAILED-e.flv").await;

        assert!(matches!(result, Err(TapedeckError::Runtime { .. })));
        assert!(visible_entries(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_destination_is_file() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let runtime = ScriptedRuntime::new(scratch.path().to_path_buf());
        let source = finalized_artifact(&runtime, "t3").await;
        let blocker = out.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let result = transfer(&runtime, &source, &blocker, "PASSED-c.flv").await;

        assert!(matches!(
            result,
            Err(TapedeckError::DestinationWrite { .. })
        ));
    }
}
