use crate::detection::Detection;
use crate::Timestamp;

pub struct Frame {
    pub dims: (u32, u32),
    pub detections: Vec<Detection>,
    pub timestamp: Timestamp, // in seconds since session start
}

impl Frame {
    pub fn new(dims: (u32, u32), timestamp: Timestamp, detections: Vec<Detection>) -> Self {
        Self {
            dims,
            detections,
            timestamp,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
