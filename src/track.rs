use crate::detection::{Detection, BICYCLE_CLASS};
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// One tracker report for a single frame.
///
/// Ids are owned by the external tracker and stay stable across short
/// occlusions. The timestamp comes from the frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Track {
    #[serde(rename = "id")]
    pub track_id: u32,
    pub x: f32,
    pub y: f32,
    #[serde(rename = "p", default = "full_confidence")]
    pub confidence: f32,
    #[serde(rename = "c", default = "bicycle")]
    pub class: i32,
}

fn full_confidence() -> f32 {
    1.0
}

fn bicycle() -> i32 {
    BICYCLE_CLASS
}

impl Track {
    pub fn new(track_id: u32, centroid: na::Point2<f32>) -> Self {
        Self {
            track_id,
            x: centroid.x,
            y: centroid.y,
            confidence: 1.0,
            class: BICYCLE_CLASS,
        }
    }

    /// Associates a detection with a tracker id, taking its center as centroid.
    pub fn from_detection(track_id: u32, det: &Detection) -> Self {
        Self {
            confidence: det.confidence,
            class: det.class,
            ..Self::new(track_id, det.centroid())
        }
    }

    #[inline(always)]
    pub fn centroid(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }
}
