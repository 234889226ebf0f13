use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// COCO class ids the detector is expected to emit.
pub const PERSON_CLASS: i32 = 0;
pub const BICYCLE_CLASS: i32 = 1;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Contains (x,y) of the center and (width,height) of bbox
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
}

impl Detection {
    #[inline(always)]
    pub fn centroid(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }
}

/// Keeps detections with `confidence > threshold`, preserving order.
pub fn filter_confident(detections: &[Detection], threshold: f32) -> Vec<Detection> {
    detections
        .iter()
        .filter(|d| d.confidence > threshold)
        .copied()
        .collect()
}

/// Keeps detections whose class is in `classes`. An empty list keeps everything.
pub fn filter_classes(detections: &mut Vec<Detection>, classes: &[i32]) {
    if classes.is_empty() {
        return;
    }

    detections.retain(|d| classes.contains(&d.class));
}
