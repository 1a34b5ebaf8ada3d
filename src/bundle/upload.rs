use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use log::{error, info};
use tokio::task::JoinHandle;

/// Ships a finished bundle somewhere. Implemented by the host; the recorder
/// only decides when to call it.
pub trait BundleUploader: Send + Sync {
    fn upload(&self, bundle_dir: &Path, destination: &str) -> Result<()>;
}

/// Runs the upload on the blocking pool. Fire-and-forget: the outcome is only
/// logged, but the handle can be awaited by callers that care.
pub(crate) fn spawn_upload(
    uploader: Arc<dyn BundleUploader>,
    bundle_dir: PathBuf,
    destination: String,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        match uploader.upload(&bundle_dir, &destination) {
            Ok(()) => info!(
                "Uploaded bundle {} to {}",
                bundle_dir.display(),
                destination
            ),
            Err(err) => error!(
                "Upload of bundle {} to {} failed: {err:#}",
                bundle_dir.display(),
                destination
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(PathBuf, String)>>,
    }

    impl BundleUploader for Recording {
        fn upload(&self, bundle_dir: &Path, destination: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((bundle_dir.to_path_buf(), destination.to_string()));
            Ok(())
        }
    }

    struct Failing;

    impl BundleUploader for Failing {
        fn upload(&self, _: &Path, _: &str) -> Result<()> {
            bail!("network down")
        }
    }

    #[tokio::test]
    async fn upload_runs_with_destination() {
        let uploader = Arc::new(Recording::default());
        spawn_upload(uploader.clone(), PathBuf::from("/bundles/a"), "bucket".into())
            .await
            .unwrap();
        let calls = uploader.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(PathBuf::from("/bundles/a"), "bucket".to_string())]);
    }

    #[tokio::test]
    async fn upload_failure_is_contained() {
        let handle = spawn_upload(Arc::new(Failing), PathBuf::from("/bundles/b"), "bucket".into());
        assert!(handle.await.is_ok());
    }
}
