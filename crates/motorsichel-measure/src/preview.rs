//! Operator-driven preview loops.
//!
//! A loop renders one frame per [`PreviewLoop::step`] from the latest
//! parameters and checks its [`StopFlag`] once per step. The flag is
//! level-triggered: a step that has started always finishes. Hosts either
//! call `step` from their own event loop or hand control to
//! [`PreviewLoop::run`], which sleeps one tick between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{GrayImage, RgbImage};
use log::debug;

use crate::segmentation::{binarize, SegmentationParams, Segmenter};

/// Poll interval between preview frames.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Cooperative stop signal shared between a loop and its host.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub enum PreviewStep {
    /// Masked object photo for the latest parameters.
    Rendered(RgbImage),
    Stopped,
}

/// Live HSV thresholding preview over one object photo.
pub struct PreviewLoop {
    segmenter: Segmenter,
    params: SegmentationParams,
    stop: StopFlag,
    tick: Duration,
    last_mask: Option<GrayImage>,
    frames: u64,
}

impl PreviewLoop {
    pub fn new(object: &RgbImage, params: SegmentationParams) -> Self {
        Self {
            segmenter: Segmenter::new(object),
            params,
            stop: StopFlag::new(),
            tick: DEFAULT_TICK,
            last_mask: None,
            frames: 0,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    /// Takes effect on the next step.
    pub fn set_params(&mut self, params: SegmentationParams) {
        self.params = params;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn step(&mut self) -> PreviewStep {
        if self.stop.is_stopped() {
            return PreviewStep::Stopped;
        }
        let mask = self.segmenter.mask(&self.params);
        let preview = self.segmenter.masked(&mask);
        self.last_mask = Some(mask);
        self.frames += 1;
        PreviewStep::Rendered(preview)
    }

    /// Step until stopped. `on_frame` sees every rendered preview and may
    /// return new parameters for the next frame.
    pub fn run<F>(&mut self, mut on_frame: F)
    where
        F: FnMut(&RgbImage) -> Option<SegmentationParams>,
    {
        while let PreviewStep::Rendered(preview) = self.step() {
            if let Some(params) = on_frame(&preview) {
                self.params = params;
            }
            thread::sleep(self.tick);
        }
        debug!("preview stopped after {} frames", self.frames);
    }

    /// Binary image handed to contour extraction: the last rendered mask
    /// thresholded at 120, or an all-zero image if nothing was rendered.
    pub fn finish(self) -> GrayImage {
        match self.last_mask {
            Some(mask) => binarize(&mask),
            None => {
                let (w, h) = self.segmenter.dimensions();
                GrayImage::new(w, h)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hsv::HsvRange;
    use crate::morphology::MorphMode;
    use image::Rgb;

    fn photo() -> RgbImage {
        RgbImage::from_fn(16, 16, |x, y| {
            if (4..12).contains(&x) && (4..12).contains(&y) {
                Rgb([250, 250, 250])
            } else {
                Rgb([10, 10, 10])
            }
        })
    }

    fn bright_only() -> SegmentationParams {
        SegmentationParams {
            channel1: HsvRange::new([0, 0, 200], [179, 255, 255]),
            channel2: None,
            morph: MorphMode::None,
        }
    }

    #[test]
    fn stop_before_any_frame_yields_blank_binary() {
        let preview = PreviewLoop::new(&photo(), bright_only());
        preview.stop_flag().stop();
        let mut preview = preview;
        assert!(matches!(preview.step(), PreviewStep::Stopped));
        let bin = preview.finish();
        assert_eq!(bin.dimensions(), (16, 16));
        assert!(bin.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn run_exits_at_the_next_iteration_boundary() {
        let mut preview = PreviewLoop::new(&photo(), bright_only()).with_tick(Duration::ZERO);
        let stop = preview.stop_flag();
        let mut seen = 0;
        preview.run(|_| {
            seen += 1;
            if seen == 3 {
                stop.stop();
            }
            None
        });
        assert_eq!(seen, 3);
        assert_eq!(preview.frames(), 3);
        let bin = preview.finish();
        assert_eq!(bin.get_pixel(8, 8)[0], 255);
        assert_eq!(bin.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn new_parameters_apply_on_next_step() {
        let mut preview = PreviewLoop::new(&photo(), bright_only());
        let _ = preview.step();
        let mut none = bright_only();
        none.channel1 = HsvRange::new([0, 0, 0], [0, 0, 0]);
        preview.set_params(none);
        let _ = preview.step();
        assert!(preview.finish().pixels().all(|p| p[0] == 0));
    }
}
