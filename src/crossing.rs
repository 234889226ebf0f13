use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::circular_queue::CircularQueue;
use crate::error::Error;
use crate::line::{Side, VirtualLine};
use crate::track::Track;
use crate::Timestamp;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

const SIDE_HISTORY_LEN: usize = 2;

/// Crossing direction. Side A is the negative side of the line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    /// Direction of a transition between two known sides, `None` if there is
    /// no transition.
    pub fn from_transition(prev: Side, next: Side) -> Option<Self> {
        match (prev, next) {
            (Side::Negative, Side::Positive) => Some(Direction::AToB),
            (Side::Positive, Side::Negative) => Some(Direction::BToA),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AToB => "A->B",
            Direction::BToA => "B->A",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CrossingEvent {
    pub track_id: u32,
    pub timestamp: Timestamp,
    pub direction: Direction,
}

/// Where a track stands in the crossing state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackPhase {
    Unseen,
    /// Only on-line samples so far.
    Undecided,
    SeenSide(Side),
    Cooldown { side: Side, until: Timestamp },
}

#[derive(Debug, Clone)]
pub struct TrackState {
    /// Known (non-zero) sides, newest first.
    sides: CircularQueue<Side>,
    pub position: na::Point2<f32>,
    pub cooldown_until: Option<Timestamp>,
    pub last_seen: Timestamp,
}

impl TrackState {
    fn new(position: na::Point2<f32>, now: Timestamp) -> Self {
        Self {
            sides: CircularQueue::with_capacity(SIDE_HISTORY_LEN),
            position,
            cooldown_until: None,
            last_seen: now,
        }
    }

    #[inline]
    pub fn side(&self) -> Option<Side> {
        self.sides.latest().copied()
    }

    fn phase(&self) -> TrackPhase {
        match (self.side(), self.cooldown_until) {
            (None, _) => TrackPhase::Undecided,
            (Some(side), Some(until)) => TrackPhase::Cooldown { side, until },
            (Some(side), None) => TrackPhase::SeenSide(side),
        }
    }

    fn step(
        &mut self,
        track_id: u32,
        side: Side,
        now: Timestamp,
        cooldown: f64,
    ) -> Option<CrossingEvent> {
        if !side.is_known() {
            return None;
        }

        let prev = self.side();
        self.sides.push(side);

        if let Some(until) = self.cooldown_until {
            if now >= until {
                // first sample after the cooldown becomes the new reference
                self.cooldown_until = None;
            } else if prev != Some(side) {
                debug!(track_id, now, until, "flip absorbed by cooldown");
            }

            return None;
        }

        let direction = Direction::from_transition(prev?, side)?;
        if cooldown > 0.0 {
            self.cooldown_until = Some(now + cooldown);
        }

        Some(CrossingEvent {
            track_id,
            timestamp: now,
            direction,
        })
    }
}

/// Per-track side bookkeeping against a single line configuration.
///
/// Replacing the line drops every track, side samples taken against the old
/// line carry no meaning for the new one.
pub struct CrossingStateMachine {
    line: VirtualLine,
    cooldown: f64,
    lost_track_timeout: f64,
    tracks: HashMap<u32, TrackState>,
}

impl CrossingStateMachine {
    pub fn new(line: VirtualLine, cooldown: f64, lost_track_timeout: f64) -> Self {
        Self {
            line,
            cooldown,
            lost_track_timeout,
            tracks: HashMap::with_capacity(64),
        }
    }

    #[inline]
    pub fn line(&self) -> &VirtualLine {
        &self.line
    }

    pub fn set_line(&mut self, line: VirtualLine) {
        self.line = line;
        self.tracks.clear();
    }

    pub fn set_cooldown(&mut self, cooldown: f64) {
        self.cooldown = cooldown;
    }

    pub fn set_lost_track_timeout(&mut self, timeout: f64) {
        self.lost_track_timeout = timeout;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn phase(&self, track_id: u32) -> TrackPhase {
        self.tracks
            .get(&track_id)
            .map_or(TrackPhase::Unseen, TrackState::phase)
    }

    pub fn get(&self, track_id: u32) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    /// Feeds one tracker sample, returns the crossing it completes if any.
    ///
    /// The boolean is `true` when the id had to be restarted as a fresh track.
    pub fn observe(&mut self, track: &Track, now: Timestamp) -> (Option<CrossingEvent>, bool) {
        let position = track.centroid();
        let side = self.line.side(&position);

        if self.is_lost(track.track_id, now) {
            debug!(track_id = track.track_id, now, "lost track reappeared");
            self.tracks.remove(&track.track_id);
        }

        let restarted = match self.check_order(track.track_id, now) {
            Ok(()) => false,
            Err(err) => {
                debug!(%err, now, "restarting track");
                true
            }
        };

        let state = match self.tracks.entry(track.track_id) {
            Entry::Occupied(e) => {
                let state = e.into_mut();
                if restarted {
                    *state = TrackState::new(position, now);
                }
                state
            }
            Entry::Vacant(e) => e.insert(TrackState::new(position, now)),
        };

        state.position = position;
        state.last_seen = now;

        let event = state.step(track.track_id, side, now, self.cooldown);

        if let Some(ev) = &event {
            debug!(
                track_id = ev.track_id,
                direction = ev.direction.as_str(),
                ts = ev.timestamp,
                "crossing"
            );
        }

        (event, restarted)
    }

    /// Not reported for longer than the lost-track timeout. Such a track is
    /// forgotten whether or not a purge ran in between.
    fn is_lost(&self, track_id: u32, now: Timestamp) -> bool {
        self.tracks
            .get(&track_id)
            .map_or(false, |t| now - t.last_seen > self.lost_track_timeout)
    }

    /// A sample older than the last one seen for the id means the tracker
    /// reused it for another object.
    fn check_order(&self, track_id: u32, now: Timestamp) -> Result<(), Error> {
        match self.tracks.get(&track_id) {
            Some(state) if now < state.last_seen => Err(Error::UnknownTrack(track_id)),
            _ => Ok(()),
        }
    }

    /// Drops tracks not reported for longer than the lost-track timeout.
    pub fn purge_stale(&mut self, now: Timestamp) -> usize {
        let timeout = self.lost_track_timeout;
        let before = self.tracks.len();

        self.tracks.retain(|id, t| {
            let keep = now - t.last_seen <= timeout;
            if !keep {
                debug!(track_id = *id, last_seen = t.last_seen, "track lost");
            }
            keep
        });

        before - self.tracks.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // horizontal line at y = 100, side A (negative) below it
    fn machine(cooldown: f64) -> CrossingStateMachine {
        let line =
            VirtualLine::new(na::Point2::new(0.0, 100.0), na::Point2::new(200.0, 100.0)).unwrap();
        CrossingStateMachine::new(line, cooldown, 10.0)
    }

    fn a(id: u32) -> Track {
        Track::new(id, na::Point2::new(50.0, 150.0))
    }

    fn b(id: u32) -> Track {
        Track::new(id, na::Point2::new(50.0, 50.0))
    }

    fn on_line(id: u32) -> Track {
        Track::new(id, na::Point2::new(50.0, 100.0))
    }

    fn event(m: &mut CrossingStateMachine, t: &Track, ts: f64) -> Option<CrossingEvent> {
        m.observe(t, ts).0
    }

    #[test]
    fn first_sample_records_side_only() {
        let mut m = machine(2.0);
        assert_eq!(m.phase(1), TrackPhase::Unseen);
        assert!(event(&mut m, &b(1), 0.0).is_none());
        assert_eq!(m.phase(1), TrackPhase::SeenSide(Side::Positive));
    }

    #[test]
    fn one_sided_track_never_counts() {
        let mut m = machine(0.0);
        for i in 0..50 {
            let t = Track::new(3, na::Point2::new(i as f32 * 4.0, 120.0 + (i % 7) as f32));
            assert!(event(&mut m, &t, i as f64 * 0.04).is_none());
        }
    }

    #[test]
    fn flip_emits_direction() {
        let mut m = machine(2.0);
        event(&mut m, &a(1), 0.0);
        let ev = event(&mut m, &b(1), 0.1).unwrap();
        assert_eq!(ev.direction, Direction::AToB);
        assert_eq!(ev.track_id, 1);
        assert_eq!(ev.timestamp, 0.1);

        event(&mut m, &b(2), 0.0);
        let ev = event(&mut m, &a(2), 0.1).unwrap();
        assert_eq!(ev.direction, Direction::BToA);
    }

    #[test]
    fn on_line_sample_does_not_break_transition() {
        let mut m = machine(2.0);
        event(&mut m, &a(1), 0.0);
        assert!(event(&mut m, &on_line(1), 0.1).is_none());
        let state = m.get(1).unwrap();
        assert_eq!(state.position, na::Point2::new(50.0, 100.0));
        assert_eq!(state.side(), Some(Side::Negative));
        assert_eq!(m.phase(1), TrackPhase::SeenSide(Side::Negative));

        let ev = event(&mut m, &b(1), 0.2).unwrap();
        assert_eq!(ev.direction, Direction::AToB);
    }

    #[test]
    fn track_starting_on_line_is_undecided() {
        let mut m = machine(2.0);
        event(&mut m, &on_line(4), 0.0);
        assert_eq!(m.phase(4), TrackPhase::Undecided);
        assert!(event(&mut m, &b(4), 0.1).is_none());
    }

    #[test]
    fn jitter_inside_cooldown_counts_once() {
        let mut m = machine(2.0);
        event(&mut m, &a(1), 0.0);
        assert!(event(&mut m, &b(1), 1.0).is_some());
        assert!(matches!(m.phase(1), TrackPhase::Cooldown { until, .. } if until == 3.0));
        assert!(event(&mut m, &a(1), 1.2).is_none());
        assert!(event(&mut m, &b(1), 1.4).is_none());
        assert!(event(&mut m, &a(1), 1.6).is_none());
    }

    #[test]
    fn zero_cooldown_counts_every_flip() {
        let mut m = machine(0.0);
        event(&mut m, &a(1), 0.0);
        assert!(event(&mut m, &b(1), 0.1).is_some());
        assert!(event(&mut m, &a(1), 0.2).is_some());
        assert_eq!(m.phase(1), TrackPhase::SeenSide(Side::Negative));
    }

    #[test]
    fn track_seven_scenario() {
        let mut m = machine(2.0);
        let samples = [
            (0.0, a(7)),
            (1.0, a(7)),
            (2.0, b(7)),
            (2.5, a(7)),
            (2.8, b(7)),
            (5.0, a(7)),
            (6.0, b(7)),
        ];

        let events: Vec<_> = samples
            .iter()
            .filter_map(|(ts, t)| event(&mut m, t, *ts))
            .collect();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.direction == Direction::AToB));
        assert_eq!(events[0].timestamp, 2.0);
        assert_eq!(events[1].timestamp, 6.0);
    }

    #[test]
    fn stale_tracks_are_purged() {
        let mut m = machine(2.0);
        m.set_lost_track_timeout(1.0);
        event(&mut m, &a(1), 0.0);
        event(&mut m, &a(2), 0.5);

        assert_eq!(m.purge_stale(1.0), 0);
        assert_eq!(m.purge_stale(1.2), 1);
        assert_eq!(m.phase(1), TrackPhase::Unseen);
        assert_eq!(m.len(), 1);

        // a reappearing id starts over
        assert!(event(&mut m, &b(1), 1.3).is_none());
    }

    #[test]
    fn lost_track_starts_over_without_a_purge() {
        let mut m = machine(2.0);
        m.set_lost_track_timeout(1.0);
        event(&mut m, &a(1), 0.0);

        // no frame in the gap, the old side must still be forgotten
        let (ev, restarted) = m.observe(&b(1), 5.0);
        assert!(ev.is_none());
        assert!(!restarted);
        assert_eq!(m.phase(1), TrackPhase::SeenSide(Side::Positive));

        // within the timeout the side carries over
        assert!(event(&mut m, &a(1), 6.0).is_some());
    }

    #[test]
    fn timestamp_going_backwards_restarts_track() {
        let mut m = machine(2.0);
        event(&mut m, &a(9), 5.0);
        let (ev, restarted) = m.observe(&b(9), 4.0);
        assert!(ev.is_none());
        assert!(restarted);
        assert_eq!(m.phase(9), TrackPhase::SeenSide(Side::Positive));
    }

    #[test]
    fn new_line_clears_history() {
        let mut m = machine(2.0);
        event(&mut m, &a(1), 0.0);
        let line =
            VirtualLine::new(na::Point2::new(100.0, 0.0), na::Point2::new(100.0, 200.0)).unwrap();
        m.set_line(line);
        assert!(m.is_empty());
        assert!(event(&mut m, &b(1), 0.1).is_none());
    }
}
