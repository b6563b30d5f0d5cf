use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorModel {
    PalmDetector,
    HandposeEstimator,
}

impl DetectorModel {
    pub fn filename(&self) -> &'static str {
        match self {
            DetectorModel::PalmDetector => "palm_detection_mediapipe_2023feb.onnx",
            DetectorModel::HandposeEstimator => "handpose_estimation_mediapipe_2023feb.onnx",
        }
    }

    fn url(&self) -> &'static str {
        match self {
            DetectorModel::PalmDetector => {
                "https://github.com/opencv/opencv_zoo/raw/main/models/palm_detection_mediapipe/palm_detection_mediapipe_2023feb.onnx"
            }
            DetectorModel::HandposeEstimator => {
                "https://github.com/opencv/opencv_zoo/raw/main/models/handpose_estimation_mediapipe/handpose_estimation_mediapipe_2023feb.onnx"
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DetectorModel::PalmDetector => "palm detector",
            DetectorModel::HandposeEstimator => "handpose estimator",
        }
    }

    pub fn path_in(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(self.filename())
    }
}

/// Makes sure `model` exists under `models_dir`, downloading it unless
/// `offline` is set. Returns the model path.
pub fn ensure_detector_model_ready(
    model: DetectorModel,
    models_dir: &Path,
    offline: bool,
) -> anyhow::Result<PathBuf> {
    let model_path = model.path_in(models_dir);
    if model_path.exists() {
        log::debug!("{} model present at {}", model.label(), model_path.display());
        return Ok(model_path);
    }
    if offline {
        bail!(
            "{} model missing at {} and downloads are disabled",
            model.label(),
            model_path.display()
        );
    }

    fs::create_dir_all(models_dir)
        .with_context(|| format!("failed to create model directory {}", models_dir.display()))?;

    download_to_path(model, &model_path).with_context(|| {
        format!(
            "failed to download {} model to {}",
            model.label(),
            model_path.display()
        )
    })?;
    Ok(model_path)
}

fn download_to_path(model: DetectorModel, dest: &Path) -> anyhow::Result<()> {
    let url = model.url();
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let progress = create_progress_bar(response.content_length());

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        progress.set_position(downloaded);
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    progress.finish_with_message(format!("{} model ready", model.label()));
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_model_is_used_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = DetectorModel::PalmDetector.path_in(dir.path());
        fs::write(&path, b"onnx").unwrap();

        let ready = ensure_detector_model_ready(DetectorModel::PalmDetector, dir.path(), true)
            .unwrap();
        assert_eq!(ready, path);
    }

    #[test]
    fn offline_mode_refuses_to_download() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_detector_model_ready(DetectorModel::HandposeEstimator, dir.path(), true)
            .unwrap_err();
        assert!(err.to_string().contains("downloads are disabled"));
        assert!(!DetectorModel::HandposeEstimator.path_in(dir.path()).exists());
    }
}
