#![cfg(feature = "annotate")]

//! Annotated detection runs in the style of the YOLO-family tooling.
//!
//! A run takes a source image file, applies confidence and IoU (greedy
//! non-maximum suppression) thresholds, draws box borders onto a copy of
//! the image, and writes the artifact under
//! `<outputs_root>/<run_name>/pred/` where `run_name` is the source file
//! stem. The outcome extends the plain detection contract with the
//! artifact path and per-call timing.

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;

use crate::detect::{DetectionItem, DetectionPipeline};
use crate::error::VisionError;
use crate::ingest::{self, SourceKind};

/// Border colors cycled by class id.
const BOX_COLORS: [[u8; 3]; 6] = [
    [230, 57, 70],
    [29, 53, 87],
    [42, 157, 143],
    [233, 196, 106],
    [108, 99, 255],
    [0, 109, 119],
];

/// Result of one annotated run.
#[derive(Clone, Debug, Serialize)]
pub struct YoloOutcome {
    /// Where the annotated artifact was written.
    pub output_path: PathBuf,
    /// Labels of surviving detections, ranked by score.
    pub classes: Vec<String>,
    /// Scores parallel to `classes`.
    pub confs: Vec<f32>,
    /// Detector id that produced the run.
    pub model: String,
    pub duration_ms: i64,
    /// Confidence threshold the run used.
    pub conf: f32,
    /// IoU threshold the run used.
    pub iou: f32,
}

/// Runs detection over source files and persists annotated artifacts.
pub struct YoloRunner {
    outputs_root: PathBuf,
}

impl YoloRunner {
    pub fn new(outputs_root: impl Into<PathBuf>) -> Self {
        Self {
            outputs_root: outputs_root.into(),
        }
    }

    /// Run an annotated detection pass over `source`.
    ///
    /// Video sources are part of the persisted schema but not of this
    /// runner; they are rejected up front rather than half-processed.
    pub fn run(
        &self,
        pipeline: &DetectionPipeline,
        source: &Path,
        conf: f32,
        iou: f32,
    ) -> Result<YoloOutcome, VisionError> {
        let filename = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| VisionError::validation("source", "path has no file name"))?;
        match ingest::source_kind(filename) {
            Some(SourceKind::Image) => {}
            Some(SourceKind::Video) => {
                return Err(VisionError::validation(
                    "source",
                    "video annotation is not supported; provide an image",
                ));
            }
            None => {
                return Err(VisionError::validation(
                    "source",
                    format!("unsupported source file '{}'", filename),
                ));
            }
        }

        let image = ingest::open_rgb_image(source)?;
        let started = Instant::now();

        let result = pipeline.detect(&image, conf)?;
        let kept = suppress(result.items, iou);

        let mut annotated = image;
        for item in &kept {
            draw_border(&mut annotated, item);
        }

        let run_name = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("run");
        let out_dir = self.outputs_root.join(run_name).join("pred");
        std::fs::create_dir_all(&out_dir).map_err(|e| {
            VisionError::validation("outputs", format!("{}: {}", out_dir.display(), e))
        })?;
        let output_path = out_dir.join(artifact_name(filename, run_name));
        annotated.save(&output_path).map_err(|e| {
            VisionError::validation("outputs", format!("{}: {}", output_path.display(), e))
        })?;

        let duration_ms = started.elapsed().as_millis() as i64;
        log::info!(
            "annotated run '{}': {} detections in {} ms -> {}",
            run_name,
            kept.len(),
            duration_ms,
            output_path.display()
        );

        Ok(YoloOutcome {
            output_path,
            classes: kept.iter().map(|item| item.label.clone()).collect(),
            confs: kept.iter().map(|item| item.score).collect(),
            model: pipeline.detector_id().to_string(),
            duration_ms,
            conf,
            iou,
        })
    }
}

/// Artifact filename: keep the source name when its format is encodable,
/// otherwise fall back to a PNG named after the run.
fn artifact_name(filename: &str, run_name: &str) -> String {
    let encodable = filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "png" | "jpg" | "jpeg" | "gif" | "bmp"
            )
        })
        .unwrap_or(false);
    if encodable {
        filename.to_string()
    } else {
        format!("{}.png", run_name)
    }
}

/// Greedy non-maximum suppression over score-ranked items.
fn suppress(items: Vec<DetectionItem>, iou_threshold: f32) -> Vec<DetectionItem> {
    let mut kept: Vec<DetectionItem> = Vec::with_capacity(items.len());
    for item in items {
        let overlaps = kept
            .iter()
            .any(|other| iou(&item.box_normalized, &other.box_normalized) > iou_threshold);
        if !overlaps {
            kept.push(item);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Draw a 2-px hollow border for one detection.
fn draw_border(image: &mut RgbImage, item: &DetectionItem) {
    let color = Rgb(BOX_COLORS[(item.class_id.unsigned_abs() as usize) % BOX_COLORS.len()]);
    let (width, height) = (image.width() as i64, image.height() as i64);

    let x1 = item.box_pixels[0].clamp(0, width - 1) as i32;
    let y1 = item.box_pixels[1].clamp(0, height - 1) as i32;
    let x2 = item.box_pixels[2].clamp(0, width - 1) as i32;
    let y2 = item.box_pixels[3].clamp(0, height - 1) as i32;
    if x2 <= x1 || y2 <= y1 {
        return;
    }

    let outer = Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32);
    draw_hollow_rect_mut(image, outer, color);
    if x2 - x1 > 2 && y2 - y1 > 2 {
        let inner = Rect::at(x1 + 1, y1 + 1).of_size((x2 - x1 - 2) as u32, (y2 - y1 - 2) as u32);
        draw_hollow_rect_mut(image, inner, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(boxn: [f32; 4], score: f32) -> DetectionItem {
        DetectionItem {
            box_pixels: [
                (boxn[0] * 100.0) as i64,
                (boxn[1] * 100.0) as i64,
                (boxn[2] * 100.0) as i64,
                (boxn[3] * 100.0) as i64,
            ],
            box_normalized: boxn,
            score,
            class_id: 1,
            label: "person".to_string(),
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = [0.1, 0.1, 0.5, 0.5];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[0.6, 0.6, 0.9, 0.9]), 0.0);
    }

    #[test]
    fn suppression_drops_heavy_overlaps_and_keeps_the_rest() {
        let items = vec![
            item([0.1, 0.1, 0.5, 0.5], 0.9),
            item([0.11, 0.11, 0.51, 0.51], 0.8),
            item([0.6, 0.6, 0.9, 0.9], 0.7),
        ];
        let kept = suppress(items, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn artifact_name_falls_back_for_unencodable_formats() {
        assert_eq!(artifact_name("dog.jpg", "dog"), "dog.jpg");
        assert_eq!(artifact_name("dog.webp", "dog"), "dog.png");
    }

    #[test]
    fn run_writes_an_artifact_and_reports_timing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scene.png");
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 200]));
        image.save(&source).unwrap();

        let cfg = crate::config::ServeConfig::default();
        let (id, loader) = crate::model::builtin_detector(&cfg);
        let pipeline = DetectionPipeline::new(id, loader);

        let runner = YoloRunner::new(dir.path().join("outputs"));
        let outcome = runner.run(&pipeline, &source, 0.25, 0.45).unwrap();

        assert!(outcome.output_path.ends_with("scene/pred/scene.png"));
        assert!(outcome.output_path.exists());
        assert_eq!(outcome.classes.len(), outcome.confs.len());
        assert!(!outcome.classes.is_empty());
        assert!(outcome.duration_ms >= 0);
        assert_eq!(outcome.model, "ssd_mobilenet_v2");
    }

    #[test]
    fn run_rejects_video_sources() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"not really a video").unwrap();

        let cfg = crate::config::ServeConfig::default();
        let (id, loader) = crate::model::builtin_detector(&cfg);
        let pipeline = DetectionPipeline::new(id, loader);

        let runner = YoloRunner::new(dir.path().join("outputs"));
        let err = runner.run(&pipeline, &source, 0.25, 0.45).unwrap_err();
        assert!(matches!(err, VisionError::Validation { .. }));
    }
}
