use crate::config::CounterConfig;
use crate::counter::{Counter, CounterHandle, Counts};
use crate::crossing::{CrossingEvent, CrossingStateMachine, Direction};
use crate::detection::{self, Detection};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::line::VirtualLine;
use crate::metrics::{
    Granularity, HourlyRate, MetricsAggregator, MetricsHandle, MetricsWindow, RatePoint,
};
use crate::track::Track;
use crate::{Timestamp, Tracking};

use nalgebra as na;
use serde_derive::Serialize;
use tracing::{debug, info, warn};

const LOW_FLOW_PER_HOUR: f64 = 50.0;
const HIGH_FLOW_PER_HOUR: f64 = 150.0;
const DOMINANCE_MARGIN: f64 = 0.3;

/// What a single frame did to the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub events: Vec<CrossingEvent>,
    pub skipped: bool,
    pub detections_kept: usize,
    pub tracks_dropped: usize,
    pub rejected_events: usize,
}

/// Running drift indicators, cleared with the session.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub detections_dropped: u64,
    pub tracks_dropped: u64,
    pub tracks_purged: u64,
    pub track_restarts: u64,
    pub rejected_events: u64,
}

/// Cycling infrastructure tiers by crossings per hour.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowLevel {
    /// Below 50/h, shared signage is enough.
    Low,
    /// 50 to 150/h, a shared lane.
    Moderate,
    /// Above 150/h, a segregated lane.
    High,
}

impl FlowLevel {
    pub fn from_hourly(per_hour: f64) -> Self {
        if per_hour < LOW_FLOW_PER_HOUR {
            FlowLevel::Low
        } else if per_hour < HIGH_FLOW_PER_HOUR {
            FlowLevel::Moderate
        } else {
            FlowLevel::High
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub counts: Counts,
    pub duration_secs: f64,
    pub per_minute: f64,
    /// Projection of the per-minute rate over an hour.
    pub per_hour: f64,
    pub flow_level: FlowLevel,
    pub dominant_direction: Option<Direction>,
}

/// The per-frame counting pipeline.
///
/// Detections pass the confidence filter, tracker output is classified
/// against the line, crossings go to the counter and then to the rate
/// windows. Readers on other threads use [`LineCounter::counter_handle`] and
/// [`LineCounter::metrics_handle`].
pub struct LineCounter {
    config: CounterConfig,
    machine: Option<CrossingStateMachine>,
    counter: Counter,
    metrics: MetricsHandle,
    diagnostics: Diagnostics,
    frame_index: u64,
}

impl Default for LineCounter {
    fn default() -> Self {
        Self::new(CounterConfig::default())
    }
}

impl LineCounter {
    fn new(config: CounterConfig) -> Self {
        let metrics =
            MetricsAggregator::new(config.window_secs, config.max_closed_windows).into_shared();

        Self {
            config,
            machine: None,
            counter: Counter::new(),
            metrics,
            diagnostics: Diagnostics::default(),
            frame_index: 0,
        }
    }

    /// Builds a counter from a config, rejecting values the pipeline cannot
    /// run with (zero stride, empty windows).
    pub fn with_config(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    #[inline]
    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn line(&self) -> Option<&VirtualLine> {
        self.machine.as_ref().map(CrossingStateMachine::line)
    }

    /// Places the counting line. Any previous side history is dropped.
    pub fn configure_line(
        &mut self,
        p1: na::Point2<f32>,
        p2: na::Point2<f32>,
        cooldown_secs: f64,
        confidence_threshold: f32,
    ) -> Result<()> {
        let line = VirtualLine::new(p1, p2)?;

        let mut config = self.config.clone();
        config.cooldown_secs = cooldown_secs;
        config.confidence_threshold = confidence_threshold;
        config.validate()?;
        self.config = config;

        self.set_line(line);

        Ok(())
    }

    /// Replaces the line keeping cooldown and threshold.
    pub fn set_line(&mut self, line: VirtualLine) {
        let (p1, p2) = line.endpoints();
        info!(?p1, ?p2, cooldown = self.config.cooldown_secs, "line configured");

        match self.machine.as_mut() {
            Some(machine) => {
                machine.set_line(line);
                machine.set_cooldown(self.config.cooldown_secs);
            }
            None => {
                self.machine = Some(CrossingStateMachine::new(
                    line,
                    self.config.cooldown_secs,
                    self.config.lost_track_timeout_secs,
                ))
            }
        }
    }

    /// Detections that may be handed to the tracker.
    pub fn filter_detections(&self, detections: &[Detection]) -> Vec<Detection> {
        let mut kept = detection::filter_confident(detections, self.config.confidence_threshold);
        detection::filter_classes(&mut kept, &self.config.classes);
        kept
    }

    /// Counts one frame whose tracker output was computed by the caller.
    pub fn process_frame(
        &mut self,
        detections: &[Detection],
        tracks: &[Track],
        timestamp: Timestamp,
    ) -> Result<FrameReport> {
        self.ensure_line()?;

        if self.skip_frame(timestamp) {
            return Ok(FrameReport {
                skipped: true,
                ..Default::default()
            });
        }

        let kept = self.filter_frame(detections);
        self.count_tracks(kept, tracks, timestamp)
    }

    /// Runs filter, tracker and counting for one frame.
    pub fn process_with_tracker<T: Tracking>(
        &mut self,
        frame: &Frame,
        tracker: &mut T,
    ) -> Result<FrameReport> {
        self.ensure_line()?;

        if self.skip_frame(frame.timestamp) {
            return Ok(FrameReport {
                skipped: true,
                ..Default::default()
            });
        }

        let kept = self.filter_frame(&frame.detections);
        tracker.update(&kept, frame.timestamp)?;
        let tracks = tracker.tracks();

        debug!(
            detections = frame.len(),
            kept = kept.len(),
            tracks = tracks.len(),
            ts = frame.timestamp,
            "frame tracked"
        );

        self.count_tracks(kept, &tracks, frame.timestamp)
    }

    fn ensure_line(&self) -> Result<()> {
        match self.machine {
            Some(_) => Ok(()),
            None => Err(Error::InvalidLine("no counting line configured".into())),
        }
    }

    fn skip_frame(&mut self, timestamp: Timestamp) -> bool {
        self.frame_index += 1;

        if self.frame_index % self.config.frame_stride as u64 == 0 {
            return false;
        }

        self.diagnostics.frames_skipped += 1;
        self.tick(timestamp);

        true
    }

    fn filter_frame(&mut self, detections: &[Detection]) -> Vec<Detection> {
        let kept = self.filter_detections(detections);
        self.diagnostics.detections_dropped += (detections.len() - kept.len()) as u64;
        kept
    }

    fn admits(&self, track: &Track) -> bool {
        track.confidence > self.config.confidence_threshold
            && (self.config.classes.is_empty() || self.config.classes.contains(&track.class))
    }

    fn count_tracks(
        &mut self,
        kept: Vec<Detection>,
        tracks: &[Track],
        timestamp: Timestamp,
    ) -> Result<FrameReport> {
        let mut report = FrameReport {
            detections_kept: kept.len(),
            ..Default::default()
        };

        let admitted: Vec<&Track> = tracks.iter().filter(|t| self.admits(t)).collect();
        report.tracks_dropped = tracks.len() - admitted.len();

        let machine = self
            .machine
            .as_mut()
            .ok_or_else(|| Error::InvalidLine("no counting line configured".into()))?;
        let counter = &self.counter;
        let diagnostics = &mut self.diagnostics;

        self.metrics.write(|metrics| {
            for track in admitted {
                let (event, restarted) = machine.observe(track, timestamp);

                if restarted {
                    diagnostics.track_restarts += 1;
                }

                let Some(event) = event else { continue };

                // rejected events are dropped before counting so the totals
                // keep matching the windows
                match metrics.record(&event) {
                    Ok(()) => {
                        counter.record(&event);
                        report.events.push(event);
                    }
                    Err(err) => {
                        warn!(%err, track_id = event.track_id, "crossing rejected");
                        report.rejected_events += 1;
                    }
                }
            }

            metrics.advance(timestamp);
        });

        diagnostics.tracks_purged += machine.purge_stale(timestamp) as u64;
        diagnostics.tracks_dropped += report.tracks_dropped as u64;
        diagnostics.rejected_events += report.rejected_events as u64;
        diagnostics.frames_processed += 1;

        Ok(report)
    }

    /// External clock: closes windows and purges lost tracks without a frame.
    pub fn tick(&mut self, now: Timestamp) {
        self.metrics.write(|m| m.advance(now));

        if let Some(machine) = self.machine.as_mut() {
            self.diagnostics.tracks_purged += machine.purge_stale(now) as u64;
        }
    }

    /// Stops the session: the open window joins the series, flagged partial.
    pub fn finish(&mut self, now: Timestamp) -> Option<MetricsWindow> {
        self.tick(now);
        let flushed = self.metrics.write(MetricsAggregator::finish);

        let counts = self.counter.snapshot();
        info!(
            a_to_b = counts.a_to_b,
            b_to_a = counts.b_to_a,
            total = counts.total,
            "session finished"
        );

        flushed
    }

    pub fn get_counts(&self) -> Counts {
        self.counter.snapshot()
    }

    pub fn get_rate_series(&self, granularity: Granularity) -> Vec<RatePoint> {
        self.metrics.series(granularity)
    }

    pub fn hourly_rate(&self) -> HourlyRate {
        self.metrics.hourly_rate()
    }

    pub fn counter_handle(&self) -> CounterHandle {
        self.counter.handle()
    }

    pub fn metrics_handle(&self) -> MetricsHandle {
        self.metrics.clone()
    }

    #[inline]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    pub fn active_tracks(&self) -> usize {
        self.machine.as_ref().map_or(0, CrossingStateMachine::len)
    }

    /// Clears counters, windows, track state and diagnostics. The line stays.
    pub fn reset_session(&mut self) {
        self.counter.reset();
        self.metrics.write(MetricsAggregator::reset);

        if let Some(machine) = self.machine.as_mut() {
            machine.reset();
        }

        self.diagnostics = Diagnostics::default();
        self.frame_index = 0;

        info!("session reset");
    }

    /// Session totals projected over time, as reported at the end of a run.
    pub fn summary(&self, duration_secs: f64) -> SessionSummary {
        let counts = self.counter.snapshot();
        let minutes = duration_secs / 60.0;

        let per_minute = if minutes > 0.0 {
            counts.total as f64 / minutes
        } else {
            0.0
        };
        let per_hour = per_minute * 60.0;

        let dominant_direction = if counts.total > 0 {
            let share = |d| counts.get(d) as f64 / counts.total as f64;
            let (a, b) = (share(Direction::AToB), share(Direction::BToA));

            if (a - b).abs() > DOMINANCE_MARGIN {
                Some(if a > b { Direction::AToB } else { Direction::BToA })
            } else {
                None
            }
        } else {
            None
        };

        SessionSummary {
            counts,
            duration_secs,
            per_minute,
            per_hour,
            flow_level: FlowLevel::from_hourly(per_hour),
            dominant_direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> LineCounter {
        let mut lc = LineCounter::default();
        lc.configure_line(
            na::Point2::new(0.0, 100.0),
            na::Point2::new(200.0, 100.0),
            2.0,
            0.25,
        )
        .unwrap();
        lc
    }

    fn at(id: u32, y: f32) -> Track {
        Track::new(id, na::Point2::new(50.0, y))
    }

    #[test]
    fn unconfigured_line_is_an_error() {
        let mut lc = LineCounter::default();
        assert!(matches!(
            lc.process_frame(&[], &[], 0.0),
            Err(Error::InvalidLine(_))
        ));
    }

    #[test]
    fn invalid_config_is_refused_up_front() {
        let stride = CounterConfig {
            frame_stride: 0,
            ..Default::default()
        };
        assert!(matches!(
            LineCounter::with_config(stride),
            Err(Error::InvalidConfig(_))
        ));

        let window = CounterConfig {
            window_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            LineCounter::with_config(window),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn degenerate_line_is_rejected_and_keeps_previous() {
        let mut lc = counter();
        let p = na::Point2::new(3.0, 3.0);
        assert!(lc.configure_line(p, p, 2.0, 0.25).is_err());
        assert_eq!(lc.line().unwrap().endpoints().0, na::Point2::new(0.0, 100.0));
    }

    #[test]
    fn crossing_is_counted_and_windowed() {
        let mut lc = counter();
        lc.process_frame(&[], &[at(1, 150.0)], 0.0).unwrap();
        let report = lc.process_frame(&[], &[at(1, 50.0)], 0.5).unwrap();

        assert_eq!(report.events.len(), 1);
        assert_eq!(lc.get_counts().a_to_b, 1);

        let series = lc.get_rate_series(Granularity::Minute);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].a_to_b, 1);
        assert!(series[0].partial);
    }

    #[test]
    fn low_confidence_tracks_never_count() {
        let mut lc = counter();
        let mut t = at(2, 150.0);
        t.confidence = 0.2;
        lc.process_frame(&[], &[t], 0.0).unwrap();
        t.y = 50.0;
        let report = lc.process_frame(&[], &[t], 0.5).unwrap();

        assert_eq!(report.tracks_dropped, 1);
        assert!(report.events.is_empty());
        assert_eq!(lc.get_counts().total, 0);
    }

    #[test]
    fn frame_stride_skips_frames() {
        let mut config = CounterConfig::default();
        config.frame_stride = 2;
        let mut lc = LineCounter::with_config(config).unwrap();
        lc.set_line(VirtualLine::horizontal((200, 200), 0.5).unwrap());

        assert!(lc.process_frame(&[], &[at(1, 150.0)], 0.0).unwrap().skipped);
        assert!(!lc.process_frame(&[], &[at(1, 150.0)], 0.1).unwrap().skipped);
        assert!(lc.process_frame(&[], &[at(1, 50.0)], 0.2).unwrap().skipped);
        assert_eq!(lc.get_counts().total, 0);

        let d = lc.diagnostics();
        assert_eq!((d.frames_processed, d.frames_skipped), (1, 2));
    }

    #[test]
    fn lost_tracks_are_purged_by_the_clock() {
        let mut lc = counter();
        lc.process_frame(&[], &[at(1, 150.0)], 0.0).unwrap();
        assert_eq!(lc.active_tracks(), 1);

        lc.tick(5.0);
        assert_eq!(lc.active_tracks(), 0);
        assert_eq!(lc.diagnostics().tracks_purged, 1);
    }

    #[test]
    fn summary_projects_rates() {
        let mut lc = counter();
        for id in 0..3 {
            let t0 = id as f64;
            lc.process_frame(&[], &[at(id, 150.0)], t0).unwrap();
            lc.process_frame(&[], &[at(id, 50.0)], t0 + 0.5).unwrap();
        }

        let summary = lc.summary(60.0);
        assert_eq!(summary.counts.a_to_b, 3);
        assert_eq!(summary.per_minute, 3.0);
        assert_eq!(summary.per_hour, 180.0);
        assert_eq!(summary.flow_level, FlowLevel::High);
        assert_eq!(summary.dominant_direction, Some(Direction::AToB));

        assert_eq!(lc.summary(0.0).per_hour, 0.0);
    }

    #[test]
    fn flow_levels() {
        assert_eq!(FlowLevel::from_hourly(10.0), FlowLevel::Low);
        assert_eq!(FlowLevel::from_hourly(50.0), FlowLevel::Moderate);
        assert_eq!(FlowLevel::from_hourly(150.0), FlowLevel::High);
    }
}
