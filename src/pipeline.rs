//! Per-frame detection and overlay loop

use std::time::Instant;

use image::RgbaImage;

use crate::error::{AppError, CameraError, DetectorError};
use crate::geometry::{Point, Rect};
use crate::ml::Detector;
use crate::render::skeleton::{draw_subject, subject_color};
use crate::render::{Canvas, OverlayTarget, PrivacyOverlay, PrivacyStyle, BLACK};
use crate::selector::{filter_confident, select_main};
use crate::subject::{DetectedSubject, MIN_PART_CONFIDENCE};

/// UI state read at the start of every iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSettings {
    pub privacy_enabled: bool,
    pub style: PrivacyStyle,
    pub target: OverlayTarget,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameState {
    /// No frame processed yet
    #[default]
    Idle,
    Rendering,
}

/// Diagnostics for one iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Subjects that passed the confidence filter
    pub confident: usize,
    /// Subjects the detector returned
    pub total: usize,
    /// Index of the main subject among the confident ones
    pub main: Option<usize>,
    /// Detector error, if inference failed this frame
    pub error: Option<String>,
}

impl FrameReport {
    /// `"<confident> / <total>"`
    pub fn summary(&self) -> String {
        format!("{} / {}", self.confident, self.total)
    }
}

/// Drives detection and rendering one frame at a time
pub struct FrameLoop {
    detector: Box<dyn Detector>,
    overlay: PrivacyOverlay,
    state: FrameState,
    frames: u64,
}

impl FrameLoop {
    pub fn new(detector: Box<dyn Detector>, overlay: PrivacyOverlay) -> Self {
        Self {
            detector,
            overlay,
            state: FrameState::Idle,
            frames: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames processed so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run one iteration: detect, filter, pick the main subject, then draw
    /// the mirrored frame, every confident subject and the privacy overlays
    /// onto `canvas`.
    ///
    /// A detector failure is logged and the frame is drawn without
    /// overlays.
    pub fn tick(
        &mut self,
        frame: &RgbaImage,
        settings: &FrameSettings,
        canvas: &mut dyn Canvas,
    ) -> FrameReport {
        let kind = self.detector.kind();
        let layout = kind.layout();

        let (subjects, error) = match self.detector.detect(frame) {
            Ok(subjects) => (subjects, None),
            Err(e) => {
                tracing::warn!(model = kind.name(), frame = self.frames, "Detection failed: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        let confident = filter_confident(&subjects, layout.min_confidence);
        let center = Point::new(frame.width() as f32 / 2.0, frame.height() as f32 / 2.0);
        let main = if confident.is_empty() {
            None
        } else {
            select_main(&confident, layout, center)
        };

        self.draw(frame, &confident, main, settings, canvas);

        if self.state == FrameState::Idle {
            tracing::debug!(model = kind.name(), "First frame rendered");
            self.state = FrameState::Rendering;
        }
        self.frames += 1;

        FrameReport {
            confident: confident.len(),
            total: subjects.len(),
            main,
            error,
        }
    }

    fn draw(
        &self,
        frame: &RgbaImage,
        subjects: &[DetectedSubject],
        main: Option<usize>,
        settings: &FrameSettings,
        canvas: &mut dyn Canvas,
    ) {
        let layout = self.detector.kind().layout();
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);

        canvas.clear(BLACK);

        canvas.save();
        canvas.scale(-1.0, 1.0);
        canvas.translate(-w, 0.0);
        canvas.draw_image(frame, Rect::new(0.0, 0.0, w, h));
        canvas.restore();

        if frame.width() == 0 || frame.height() == 0 {
            return;
        }

        // subjects are in frame pixels
        canvas.save();
        canvas.scale(w / frame.width() as f32, h / frame.height() as f32);

        for (index, subject) in subjects.iter().enumerate() {
            draw_subject(canvas, subject, layout, MIN_PART_CONFIDENCE, subject_color(index));
        }

        if settings.privacy_enabled {
            for (index, subject) in subjects.iter().enumerate() {
                if settings.target.applies_to(main == Some(index)) {
                    self.overlay.render(canvas, subject, layout, settings.style);
                }
            }
        }

        canvas.restore();
    }
}

/// Open the frame source, then create the detector.
///
/// Either failure is returned and nothing keeps running: a source opened
/// before the detector failed is dropped.
pub fn start_pipeline<S>(
    open_source: impl FnOnce() -> Result<S, CameraError>,
    create_detector: impl FnOnce() -> Result<Box<dyn Detector>, DetectorError>,
    overlay: PrivacyOverlay,
) -> Result<(S, FrameLoop), AppError> {
    let source = open_source()?;
    let detector = create_detector()?;
    Ok((source, FrameLoop::new(detector, overlay)))
}

/// Processed frames per second, measured on capture timestamps and
/// refreshed about once a second
#[derive(Debug, Clone, Default)]
pub struct FrameRate {
    window_start: Option<Instant>,
    frames: u32,
    fps: f64,
}

impl FrameRate {
    /// Record a frame that went through the loop, captured at `at`
    pub fn record(&mut self, at: Instant) {
        let start = *self.window_start.get_or_insert(at);
        self.frames += 1;

        let elapsed = at.saturating_duration_since(start).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = f64::from(self.frames - 1) / elapsed;
            self.window_start = Some(at);
            self.frames = 1;
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}
