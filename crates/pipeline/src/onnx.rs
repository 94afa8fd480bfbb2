//! ONNX Runtime frame classifier
//!
//! Image-classification model exported with NHWC input `[1, size, size, 3]`,
//! pixels scaled to `[-1, 1]`, and one score per label.

use std::path::Path;

use camera_capture::VideoFrame;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session};
use tracing::info;

use crate::labels::load_labels;
use crate::{Classification, ClassifyError, FrameClassifier};

pub struct OnnxClassifier {
    session: Session,
    labels: Vec<String>,
    input_size: u32,
}

impl OnnxClassifier {
    /// Load the model and its label file
    pub fn load(model_path: &Path, labels_path: &Path, input_size: u32) -> Result<Self, ClassifyError> {
        let labels = load_labels(labels_path)?;

        info!("Loading classifier model from {}", model_path.display());
        let session = Session::builder()
            .map_err(|e| ClassifyError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ClassifyError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| ClassifyError::ModelLoad(e.to_string()))?;

        info!("Classifier ready: {} labels, {}x{} input", labels.len(), input_size, input_size);
        Ok(Self {
            session,
            labels,
            input_size,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn preprocess(&self, frame: &VideoFrame) -> Result<Array4<f32>, ClassifyError> {
        let image = frame
            .to_rgb_image()
            .ok_or_else(|| ClassifyError::InvalidFrame(format!("{}x{} frame", frame.width, frame.height)))?;
        let size = self.input_size;
        let resized = imageops::resize(&image, size, size, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, size as usize, size as usize, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, y as usize, x as usize, c]] = (pixel[c] as f32 / 127.5) - 1.0;
            }
        }
        Ok(input)
    }
}

impl FrameClassifier for OnnxClassifier {
    fn classify(&self, frame: &VideoFrame) -> Result<Classification, ClassifyError> {
        let input = self.preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| ClassifyError::Inference(e.to_string()))?)
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;
        let scores: Vec<f32> = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifyError::Inference(e.to_string()))?
            .iter()
            .copied()
            .collect();

        best_label(&self.labels, &scores)
    }
}

/// Highest-probability label. Scores that do not already sum to one are
/// treated as logits and passed through softmax.
fn best_label(labels: &[String], scores: &[f32]) -> Result<Classification, ClassifyError> {
    if scores.len() != labels.len() {
        return Err(ClassifyError::Inference(format!(
            "model produced {} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    let sum: f32 = scores.iter().sum();
    let is_distribution = scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
    let probabilities = if is_distribution { scores.to_vec() } else { softmax(scores) };

    probabilities
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, p)| Classification::new(&labels[index], *p))
        .ok_or_else(|| ClassifyError::Inference("empty model output".to_string()))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
