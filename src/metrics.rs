use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use crate::crossing::{CrossingEvent, Direction};
use crate::error::{Error, Result};
use crate::Timestamp;

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

pub const SECONDS_IN_HOUR: f64 = 3600.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
}

/// Tumbling window `[start, start + width)`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct MetricsWindow {
    #[serde(skip)]
    index: i64,
    pub start: Timestamp,
    pub width: f64,
    pub a_to_b: u32,
    pub b_to_a: u32,
    /// Set while the window is open, or when it was flushed before its end.
    pub partial: bool,
}

impl MetricsWindow {
    fn empty(index: i64, width: f64) -> Self {
        Self {
            index,
            start: index as f64 * width,
            width,
            a_to_b: 0,
            b_to_a: 0,
            partial: false,
        }
    }

    #[inline]
    pub fn end(&self) -> Timestamp {
        self.start + self.width
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.a_to_b as u64 + self.b_to_a as u64
    }

    fn add(&mut self, direction: Direction) {
        match direction {
            Direction::AToB => self.a_to_b += 1,
            Direction::BToA => self.b_to_a += 1,
        }
    }
}

/// One point of a flow-over-time series.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub window_start: Timestamp,
    pub a_to_b: u32,
    pub b_to_a: u32,
    pub partial: bool,
}

impl From<&MetricsWindow> for RatePoint {
    fn from(w: &MetricsWindow) -> Self {
        Self {
            window_start: w.start,
            a_to_b: w.a_to_b,
            b_to_a: w.b_to_a,
            partial: w.partial,
        }
    }
}

/// Crossings over the trailing hour.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct HourlyRate {
    pub a_to_b: u32,
    pub b_to_a: u32,
    pub total: u64,
    /// Number of windows summed.
    pub windows: usize,
    /// `true` while less than an hour of data backs the rate.
    pub partial: bool,
}

/// Buckets crossing events into fixed-width tumbling windows.
#[derive(Debug)]
pub struct MetricsAggregator {
    width: f64,
    max_closed: usize,
    closed: VecDeque<MetricsWindow>,
    open: Option<MetricsWindow>,
    origin: Option<Timestamp>,
    latest: Timestamp,
}

impl MetricsAggregator {
    pub fn new(width: f64, max_closed: usize) -> Self {
        Self {
            width,
            max_closed: max_closed.max(1),
            closed: VecDeque::new(),
            open: None,
            origin: None,
            latest: 0.0,
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    #[inline]
    fn index_of(&self, ts: Timestamp) -> i64 {
        (ts / self.width).floor() as i64
    }

    /// Oldest timestamp still accepted.
    pub fn floor(&self) -> Option<Timestamp> {
        match (&self.open, self.closed.back()) {
            (Some(open), _) => Some(open.start),
            (None, Some(last)) => Some(last.end()),
            (None, None) => None,
        }
    }

    pub fn open_window(&self) -> Option<&MetricsWindow> {
        self.open.as_ref()
    }

    pub fn closed_windows(&self) -> impl Iterator<Item = &MetricsWindow> {
        self.closed.iter()
    }

    /// Adds an event to the window covering its timestamp, closing every
    /// window that ends at or before it.
    pub fn record(&mut self, event: &CrossingEvent) -> Result<()> {
        if let Some(floor) = self.floor() {
            if event.timestamp < floor {
                return Err(Error::OutOfOrderEvent {
                    timestamp: event.timestamp,
                    floor,
                });
            }
        }

        self.advance(event.timestamp);

        if let Some(open) = self.open.as_mut() {
            open.add(event.direction);
        }

        Ok(())
    }

    /// Moves the clock forward. Windows close even when nothing crossed.
    /// A clock older than the open window is ignored.
    pub fn advance(&mut self, now: Timestamp) {
        if let Some(floor) = self.floor() {
            if now < floor {
                return;
            }
        }

        self.origin.get_or_insert(now);
        self.latest = self.latest.max(now);

        let target = self.index_of(now);
        let next = match self.open.take() {
            Some(open) if open.index >= target => {
                self.open = Some(open);
                return;
            }
            Some(open) => {
                let next = open.index + 1;
                self.close(open);
                next
            }
            // after a flush the series continues from the last closed window
            None => self.closed.back().map_or(target, |last| last.index + 1),
        };

        let first_gap = next.max(target - self.max_closed as i64);
        for index in first_gap..target {
            self.close(MetricsWindow::empty(index, self.width));
        }

        self.open = Some(self.new_open(target));
    }

    fn new_open(&self, index: i64) -> MetricsWindow {
        let mut window = MetricsWindow::empty(index, self.width);
        window.partial = true;
        window
    }

    fn close(&mut self, mut window: MetricsWindow) {
        debug!(
            start = window.start,
            a_to_b = window.a_to_b,
            b_to_a = window.b_to_a,
            "window closed"
        );

        window.partial = false;
        self.closed.push_back(window);

        while self.closed.len() > self.max_closed {
            self.closed.pop_front();
        }
    }

    /// Flushes the open window into the closed series, flagged partial.
    pub fn finish(&mut self) -> Option<MetricsWindow> {
        let mut open = self.open.take()?;
        open.partial = true;

        self.closed.push_back(open);
        while self.closed.len() > self.max_closed {
            self.closed.pop_front();
        }

        Some(open)
    }

    fn windows(&self) -> impl Iterator<Item = &MetricsWindow> {
        self.closed.iter().chain(self.open.iter())
    }

    pub fn series(&self, granularity: Granularity) -> Vec<RatePoint> {
        match granularity {
            Granularity::Minute => self.windows().map(Into::into).collect(),
            Granularity::Hour => self.hour_series(),
        }
    }

    /// Sums windows per clock hour. An hour is partial unless fully covered by
    /// closed, complete windows.
    fn hour_series(&self) -> Vec<RatePoint> {
        let mut points: Vec<(RatePoint, f64)> = Vec::new();

        for w in self.windows() {
            let hour = (w.start / SECONDS_IN_HOUR).floor() * SECONDS_IN_HOUR;

            if let Some((p, covered)) = points
                .last_mut()
                .filter(|entry| entry.0.window_start == hour)
            {
                p.a_to_b += w.a_to_b;
                p.b_to_a += w.b_to_a;
                p.partial |= w.partial;
                *covered += w.width;
                continue;
            }

            points.push((
                RatePoint {
                    window_start: hour,
                    a_to_b: w.a_to_b,
                    b_to_a: w.b_to_a,
                    partial: w.partial,
                },
                w.width,
            ));
        }

        points
            .into_iter()
            .map(|(mut p, covered)| {
                p.partial |= covered + f64::EPSILON < SECONDS_IN_HOUR;
                p
            })
            .collect()
    }

    /// Crossings in the trailing hour, open window included.
    pub fn hourly_rate(&self) -> HourlyRate {
        let wanted = (SECONDS_IN_HOUR / self.width).ceil() as usize;
        let all: Vec<_> = self.windows().collect();
        let trailing = &all[all.len().saturating_sub(wanted)..];

        let mut rate = HourlyRate {
            windows: trailing.len(),
            ..Default::default()
        };

        for w in trailing {
            rate.a_to_b += w.a_to_b;
            rate.b_to_a += w.b_to_a;
        }

        rate.total = rate.a_to_b as u64 + rate.b_to_a as u64;

        let age = self.origin.map_or(0.0, |o| self.latest - o);
        rate.partial = age < SECONDS_IN_HOUR || trailing.len() < wanted;

        rate
    }

    pub fn reset(&mut self) {
        self.closed.clear();
        self.open = None;
        self.origin = None;
        self.latest = 0.0;
    }

    pub fn into_shared(self) -> MetricsHandle {
        MetricsHandle {
            inner: Arc::new(RwLock::new(self)),
        }
    }
}

/// Shared aggregator, readers take the read lock only while copying a series.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    inner: Arc<RwLock<MetricsAggregator>>,
}

impl MetricsHandle {
    pub fn series(&self, granularity: Granularity) -> Vec<RatePoint> {
        self.read(|m| m.series(granularity))
    }

    pub fn hourly_rate(&self) -> HourlyRate {
        self.read(MetricsAggregator::hourly_rate)
    }

    pub fn read<R>(&self, f: impl FnOnce(&MetricsAggregator) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut MetricsAggregator) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }
}
