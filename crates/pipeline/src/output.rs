//! Rendering, display and recording collaborators

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use camera_capture::VideoFrame;
use face_analysis::{AnalysisResult, EmotionCategory};
use image::Rgb;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, info};

use crate::SinkError;

/// Draws the latest analysis onto a frame
pub trait Renderer: Send {
    /// Pure: returns a new frame, `frame` is untouched
    fn render(&self, frame: &VideoFrame, result: Option<&AnalysisResult>) -> VideoFrame;
}

/// What the hosting UI wants after showing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayControl {
    Continue,
    Quit,
}

/// Hosting UI
pub trait Display: Send {
    fn show(&mut self, camera: &str, frame: &VideoFrame) -> DisplayControl;
}

/// Recording target for rendered frames
pub trait VideoSink: Send {
    fn write(&mut self, frame: &VideoFrame) -> Result<(), SinkError>;

    /// Flush and close
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Creates one sink per camera
pub trait SinkFactory: Send {
    fn create(&self, camera: &str, width: u32, height: u32) -> Result<Box<dyn VideoSink>, SinkError>;
}

/// Headless display
#[derive(Debug, Default)]
pub struct NullDisplay {
    shown: u64,
}

impl NullDisplay {
    pub fn frames_shown(&self) -> u64 {
        self.shown
    }
}

impl Display for NullDisplay {
    fn show(&mut self, _camera: &str, _frame: &VideoFrame) -> DisplayControl {
        self.shown += 1;
        DisplayControl::Continue
    }
}

/// Sink discarding every frame
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl VideoSink for NullSink {
    fn write(&mut self, _frame: &VideoFrame) -> Result<(), SinkError> {
        Ok(())
    }
}

impl SinkFactory for NullSink {
    fn create(&self, _camera: &str, _width: u32, _height: u32) -> Result<Box<dyn VideoSink>, SinkError> {
        Ok(Box::new(NullSink))
    }
}

/// Appends raw RGB24 frames to `<dir>/<camera>_<w>x<h>.rgb`.
///
/// Conversion to a container format happens outside the pipeline.
pub struct RawFrameSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    frames: u64,
}

impl RawFrameSink {
    pub fn create(dir: &Path, camera: &str, width: u32, height: u32) -> Result<Self, SinkError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_{}x{}.rgb", camera, width, height));
        let file = File::create(&path)?;
        info!("Recording {} to {}", camera, path.display());

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            width,
            height,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl VideoSink for RawFrameSink {
    fn write(&mut self, frame: &VideoFrame) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        if frame.width != self.width || frame.height != self.height {
            return Err(SinkError::Dimensions {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }
        writer.write_all(&frame.data)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("Closed {} after {} frames", self.path.display(), self.frames);
        }
        Ok(())
    }
}

/// Factory for [`RawFrameSink`]s in one directory
#[derive(Debug, Clone)]
pub struct RawSinkFactory {
    pub dir: PathBuf,
}

impl SinkFactory for RawSinkFactory {
    fn create(&self, camera: &str, width: u32, height: u32) -> Result<Box<dyn VideoSink>, SinkError> {
        Ok(Box::new(RawFrameSink::create(&self.dir, camera, width, height)?))
    }
}

/// Overlay: a band colored by emotion category and a confidence bar
#[derive(Debug, Clone, Copy)]
pub struct OverlayRenderer {
    /// Mirror left-to-right before drawing
    pub mirror: bool,
}

impl OverlayRenderer {
    pub fn new(mirror: bool) -> Self {
        Self { mirror }
    }

    fn category_color(category: EmotionCategory) -> Rgb<u8> {
        match category {
            EmotionCategory::Positive => Rgb([40, 200, 80]),
            EmotionCategory::Negative => Rgb([220, 50, 50]),
            EmotionCategory::Neutral => Rgb([160, 160, 160]),
        }
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Renderer for OverlayRenderer {
    fn render(&self, frame: &VideoFrame, result: Option<&AnalysisResult>) -> VideoFrame {
        let base = if self.mirror { frame.flip_horizontal() } else { frame.clone() };

        let Some(result) = result else {
            return base;
        };
        let Some(mut image) = base.to_rgb_image() else {
            return base;
        };

        let (width, height) = image.dimensions();
        let band = (height / 12).max(1);
        draw_filled_rect_mut(
            &mut image,
            Rect::at(0, 0).of_size(width, band),
            Self::category_color(result.emotion.category()),
        );

        let confidence = result.emotion_confidence.clamp(0.0, 1.0);
        let bar = (width as f32 * confidence).round() as u32;
        if bar > 0 && height > band {
            let bar_height = (band / 3).max(1).min(height - band);
            draw_filled_rect_mut(
                &mut image,
                Rect::at(0, band as i32).of_size(bar, bar_height),
                Rgb([255, 255, 255]),
            );
        }

        VideoFrame::from_rgb_image(image, frame.timestamp_ns, frame.sequence)
    }
}
