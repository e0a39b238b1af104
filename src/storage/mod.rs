/// Filesystem-backed byte store (spec.md §4.1).
///
/// Two roots: a staging root for uploads-in-progress and assembled source
/// videos, and an output root holding per-job subdirectories.
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::upload::UploadSession;

#[derive(Clone, Debug)]
pub struct Storage {
    staging_root: PathBuf,
    output_root: PathBuf,
}

impl Storage {
    /// Create the staging and output roots if absent; failure is fatal.
    pub async fn init(staging_root: PathBuf, output_root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&staging_root).await?;
        fs::create_dir_all(&output_root).await?;
        tracing::info!(
            staging_root = %staging_root.display(),
            output_root = %output_root.display(),
            "storage roots ready"
        );
        Ok(Self {
            staging_root,
            output_root,
        })
    }

    fn chunk_path(&self, upload_id: &str, seq: u64) -> PathBuf {
        self.staging_root.join(format!("{upload_id}_{seq}"))
    }

    /// Write one chunk's bytes in full; no partial writes visible.
    pub async fn put_chunk(&self, upload_id: &str, seq: u64, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.chunk_path(upload_id, seq);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(path)
    }

    /// Mint a fresh video id, concatenate chunk files in ascending sequence
    /// order, and delete each chunk file as it is consumed. Fails without
    /// leaving a partial output file visible if a sequence is missing.
    pub async fn assemble(&self, session: &UploadSession) -> Result<(String, PathBuf)> {
        let total_chunks = session.total_chunks.ok_or_else(|| {
            AppError::ValidationError("cannot assemble: total_chunks unknown".to_string())
        })?;

        let video_id = Uuid::new_v4().to_string();
        let final_path = self
            .staging_root
            .join(format!("{video_id}{}", session.extension()));
        let tmp_path = final_path.with_extension("assembling");

        let result: Result<()> = async {
            let mut out = fs::File::create(&tmp_path).await?;
            for seq in 0..total_chunks {
                let chunk_path = session.chunks.get(&seq).ok_or_else(|| {
                    AppError::Internal(format!("missing chunk seq {seq} during assembly"))
                })?;
                let bytes = fs::read(chunk_path).await?;
                tokio::io::AsyncWriteExt::write_all(&mut out, &bytes).await?;
            }
            tokio::io::AsyncWriteExt::flush(&mut out).await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        fs::rename(&tmp_path, &final_path).await?;

        for seq in 0..total_chunks {
            if let Some(chunk_path) = session.chunks.get(&seq) {
                let _ = fs::remove_file(chunk_path).await;
            }
        }

        Ok((video_id, final_path))
    }

    /// Creates `<output>/<job_id>/`.
    pub async fn create_job_output_dir(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.output_root.join(job_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// `<output>/<job_id>/<video_id>_<format_name>.<container>`
    pub fn output_path(
        &self,
        job_id: &str,
        video_id: &str,
        format_name: &str,
        container: &str,
    ) -> PathBuf {
        self.output_root
            .join(job_id)
            .join(format!("{video_id}_{format_name}.{container}"))
    }

    /// Returns the first file in the staging root whose name starts with
    /// `video_id`; ambiguity is not defined behavior.
    pub async fn locate_video(&self, video_id: &str) -> Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(&self.staging_root).await?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(video_id) {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }
}
