pub mod config;
pub mod counter;
pub mod crossing;
pub mod detection;
pub mod error;
pub mod frame;
pub mod line;
pub mod metrics;
pub mod pipeline;
pub mod track;

mod circular_queue;

pub use config::CounterConfig;
pub use counter::{CounterHandle, Counts};
pub use crossing::{CrossingEvent, Direction};
pub use detection::Detection;
pub use error::Error;
pub use frame::Frame;
pub use line::{Side, VirtualLine};
pub use metrics::{Granularity, MetricsHandle, RatePoint};
pub use pipeline::LineCounter;
pub use track::Track;

use std::rc::Rc;

/// Seconds since the start of the session.
pub type Timestamp = f64;

/// The external multi-object tracker.
///
/// It receives the detections that passed the confidence filter and owns
/// association and identity; the counter only reads its tracks.
pub trait Tracking {
    fn update(&mut self, detections: &[Detection], timestamp: Timestamp) -> Result<(), Error>;
    fn tracks(&self) -> Rc<[Track]>;
}
