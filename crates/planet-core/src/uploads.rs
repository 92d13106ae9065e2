//! Upload lifecycle tracking.
//!
//! Validation happens before anything touches the network: one
//! disallowed file blocks the whole batch. Per-file progress is coarse
//! (uploading 0% -> processing 50% -> completed 100%, or error 0%),
//! and terminal rows linger for a fixed grace period before leaving the
//! active view. No automatic retry on failure.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::store::{now_millis, short_suffix};
use crate::tasks::{UPLOAD_EXPIRY_MS, UiEffect, UiTask};

/// The backend refuses everything else; rejecting locally keeps bad
/// batches off the network entirely.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".txt", ".png", ".jpg", ".jpeg", ".mp3", ".wav",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("no files selected")]
    Empty,
    #[error("unsupported file type(s): {}", names.join(", "))]
    UnsupportedFiles { names: Vec<String> },
    #[error("unknown upload task: {file_id}")]
    UnknownTask { file_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    /// `{filename}-{timestamp}`: disambiguates same-named files
    /// submitted in the same batch.
    pub file_id: String,
    pub file_name: String,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, UploadStatus::Completed | UploadStatus::Error)
    }
}

/// Tracks the active upload set for the current planet.
#[derive(Debug, Default)]
pub struct UploadCoordinator {
    active: Vec<UploadTask>,
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &[UploadTask] {
        &self.active
    }

    /// Validate the batch and create one task handle per file. Any
    /// disallowed file rejects the entire batch, listing only the
    /// offending names; no partial submission of the valid subset.
    pub fn submit(&mut self, file_names: &[String]) -> Result<Vec<UploadTask>, UploadError> {
        if file_names.is_empty() {
            return Err(UploadError::Empty);
        }
        let offenders: Vec<String> = file_names
            .iter()
            .filter(|name| !extension_allowed(name))
            .cloned()
            .collect();
        if !offenders.is_empty() {
            return Err(UploadError::UnsupportedFiles { names: offenders });
        }

        let mut handles = Vec::with_capacity(file_names.len());
        for file_name in file_names {
            let task = UploadTask {
                file_id: format!("{file_name}-{}-{}", now_millis(), short_suffix()),
                file_name: file_name.clone(),
                status: UploadStatus::Uploading,
                progress_percent: 0,
                error: None,
            };
            info!(file_id = %task.file_id, "upload submitted");
            handles.push(task.clone());
            self.active.push(task);
        }
        Ok(handles)
    }

    /// The request body has been handed to the network; the backend is
    /// now chunking and indexing.
    pub fn mark_processing(&mut self, file_id: &str) -> Result<(), UploadError> {
        let task = self.task_mut(file_id)?;
        task.status = UploadStatus::Processing;
        task.progress_percent = 50;
        Ok(())
    }

    /// Terminal success. Returns the expiry task that removes the row
    /// after the grace period.
    pub fn complete(&mut self, file_id: &str, planet_id: &str) -> Result<UiTask, UploadError> {
        let task = self.task_mut(file_id)?;
        task.status = UploadStatus::Completed;
        task.progress_percent = 100;
        info!(%file_id, "upload completed");
        Ok(expiry_task(file_id, planet_id))
    }

    /// Terminal failure. The row shows the message until it expires;
    /// the user reissues the upload explicitly if they want a retry.
    pub fn fail(
        &mut self,
        file_id: &str,
        planet_id: &str,
        message: impl Into<String>,
    ) -> Result<UiTask, UploadError> {
        let task = self.task_mut(file_id)?;
        task.status = UploadStatus::Error;
        task.progress_percent = 0;
        task.error = Some(message.into());
        Ok(expiry_task(file_id, planet_id))
    }

    /// Drop an expired terminal row. Already-gone rows are no-ops; the
    /// coordinator is reset wholesale on planet switch, so a row never
    /// outlives its planet.
    pub fn task_fired(&mut self, task: &UiTask) {
        if let UiEffect::ExpireUpload { file_id } = &task.effect {
            debug!(%file_id, "expiring upload row");
            self.active.retain(|upload| upload.file_id != *file_id);
        }
    }

    fn task_mut(&mut self, file_id: &str) -> Result<&mut UploadTask, UploadError> {
        self.active
            .iter_mut()
            .find(|task| task.file_id == file_id)
            .ok_or_else(|| UploadError::UnknownTask {
                file_id: file_id.to_string(),
            })
    }
}

pub fn extension_allowed(file_name: &str) -> bool {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()));
    match extension {
        Some(ext) => ALLOWED_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

fn expiry_task(file_id: &str, planet_id: &str) -> UiTask {
    UiTask {
        planet_id: planet_id.to_string(),
        delay: Duration::from_millis(UPLOAD_EXPIRY_MS),
        effect: UiEffect::ExpireUpload {
            file_id: file_id.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn allow_list_covers_documents_images_and_audio() {
        for name in [
            "a.pdf", "b.doc", "c.docx", "d.txt", "e.png", "f.jpg", "g.jpeg", "h.mp3", "i.wav",
            "UPPER.PDF",
        ] {
            assert!(extension_allowed(name), "{name} should be allowed");
        }
        for name in ["malware.exe", "script.sh", "archive.zip", "noextension"] {
            assert!(!extension_allowed(name), "{name} should be rejected");
        }
    }

    #[test]
    fn one_bad_file_blocks_the_entire_batch() {
        let mut uploads = UploadCoordinator::new();

        let error = uploads
            .submit(&names(&["notes.pdf", "malware.exe"]))
            .expect_err("batch must be rejected");

        assert_eq!(
            error,
            UploadError::UnsupportedFiles {
                names: vec!["malware.exe".to_string()]
            }
        );
        assert!(error.to_string().contains("malware.exe"));
        assert!(!error.to_string().contains("notes.pdf"));
        assert!(uploads.active().is_empty(), "no partial submission");
    }

    #[test]
    fn same_named_files_in_one_batch_get_distinct_ids() {
        let mut uploads = UploadCoordinator::new();
        let handles = uploads
            .submit(&names(&["notes.pdf", "notes.pdf"]))
            .expect("submit");

        assert_eq!(handles.len(), 2);
        assert_ne!(handles[0].file_id, handles[1].file_id);
    }

    #[test]
    fn lifecycle_progresses_through_coarse_percentages() {
        let mut uploads = UploadCoordinator::new();
        let handles = uploads.submit(&names(&["notes.pdf"])).expect("submit");
        let file_id = handles[0].file_id.clone();

        assert_eq!(uploads.active()[0].status, UploadStatus::Uploading);
        assert_eq!(uploads.active()[0].progress_percent, 0);

        uploads.mark_processing(&file_id).expect("processing");
        assert_eq!(uploads.active()[0].status, UploadStatus::Processing);
        assert_eq!(uploads.active()[0].progress_percent, 50);

        let expiry = uploads.complete(&file_id, "planet-1").expect("complete");
        assert_eq!(uploads.active()[0].status, UploadStatus::Completed);
        assert_eq!(uploads.active()[0].progress_percent, 100);
        assert_eq!(expiry.delay, Duration::from_millis(UPLOAD_EXPIRY_MS));

        uploads.task_fired(&expiry);
        assert!(uploads.active().is_empty());
    }

    #[test]
    fn failed_uploads_expire_on_the_same_grace_period() {
        let mut uploads = UploadCoordinator::new();
        let handles = uploads.submit(&names(&["notes.pdf"])).expect("submit");
        let file_id = handles[0].file_id.clone();

        let expiry = uploads
            .fail(&file_id, "planet-1", "server rejected the file")
            .expect("fail");
        let row = &uploads.active()[0];
        assert_eq!(row.status, UploadStatus::Error);
        assert_eq!(row.progress_percent, 0);
        assert_eq!(row.error.as_deref(), Some("server rejected the file"));
        assert_eq!(expiry.delay, Duration::from_millis(UPLOAD_EXPIRY_MS));

        uploads.task_fired(&expiry);
        assert!(uploads.active().is_empty());
    }
}
