use std::collections::HashMap;

use log::debug;

use crate::map::GeoPoint;
use crate::tree::dates::{date_from_decimal_year, format_date};
use crate::tree::{NodeId, Tree};

/// Wall-clock seconds a full playback sweep across the domain takes.
pub const PLAYBACK_SECONDS: f64 = 25.0;
/// Tolerance applied to the cutoff comparison.
pub const CUTOFF_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Appearance {
    pub node: NodeId,
    pub year: f64,
    pub coord: Option<GeoPoint>,
}

/// A parent -> child transition spanning the two appearance years.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationEvent {
    pub parent: NodeId,
    pub child: NodeId,
    pub start_year: f64,
    pub end_year: f64,
    pub start: Option<GeoPoint>,
    pub end: Option<GeoPoint>,
}

impl MigrationEvent {
    pub fn has_coordinates(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDomain {
    pub min: f64,
    pub max: f64,
}

impl TimeDomain {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, year: f64) -> f64 {
        year.clamp(self.min, self.max)
    }
}

/// Playback clock advanced by explicit ticks from the host frame loop.
/// Pausing drops the pending timestamp so the next tick does not jump.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackClock {
    pub playing: bool,
    last_timestamp: Option<f64>,
}

impl PlaybackClock {
    fn start(&mut self) {
        self.playing = true;
        self.last_timestamp = None;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.last_timestamp = None;
    }

    /// Seconds since the previous tick; the first tick only records `now`.
    fn elapsed(&mut self, now: f64) -> Option<f64> {
        let previous = self.last_timestamp.replace(now);
        previous.map(|previous| (now - previous).max(0.0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    appearances: Vec<Appearance>,
    events: Vec<MigrationEvent>,
    appearance_by_node: HashMap<NodeId, usize>,
    domain: Option<TimeDomain>,
    cursor: Option<f64>,
    filter_active: bool,
    clock: PlaybackClock,
}

impl Timeline {
    /// Derive appearances and migration events from node ages. `coords` is
    /// indexed by node id.
    pub fn build(tree: &Tree, coords: &[Option<GeoPoint>], reference_year: f64) -> Self {
        let mut appearances: Vec<Appearance> = (0..tree.len())
            .filter_map(|id| {
                let age = tree.age(id).filter(|age| age.is_finite())?;
                Some(Appearance {
                    node: id,
                    year: reference_year - age,
                    coord: coords.get(id).copied().flatten(),
                })
            })
            .collect();
        appearances.sort_by(|a, b| a.year.total_cmp(&b.year));

        let appearance_by_node: HashMap<NodeId, usize> = appearances
            .iter()
            .enumerate()
            .map(|(index, appearance)| (appearance.node, index))
            .collect();

        let mut events: Vec<MigrationEvent> = tree
            .edges
            .iter()
            .filter_map(|&(parent, child)| {
                let start = appearances.get(*appearance_by_node.get(&parent)?)?;
                let end = appearances.get(*appearance_by_node.get(&child)?)?;
                Some(MigrationEvent {
                    parent,
                    child,
                    start_year: start.year,
                    end_year: end.year,
                    start: start.coord,
                    end: end.coord,
                })
            })
            .collect();
        events.sort_by(|a, b| a.end_year.total_cmp(&b.end_year));

        let (min, max) = appearances
            .iter()
            .map(|appearance| appearance.year)
            .chain(events.iter().flat_map(|event| [event.start_year, event.end_year]))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), year| {
                (lo.min(year), hi.max(year))
            });
        let domain = (min.is_finite() && max.is_finite() && max > min)
            .then_some(TimeDomain { min, max });
        if domain.is_none() {
            debug!(
                "Timeline disabled: {} appearances without a usable time range",
                appearances.len()
            );
        }

        Self {
            appearances,
            events,
            appearance_by_node,
            domain,
            cursor: domain.map(|domain| domain.min),
            filter_active: false,
            clock: PlaybackClock::default(),
        }
    }

    /// Rebuild after a payload or reference-date change. The previous cursor
    /// survives, clamped into the new domain; filtering switches off.
    pub fn rebuild(&mut self, tree: &Tree, coords: &[Option<GeoPoint>], reference_year: f64) {
        let previous = self.cursor;
        let mut next = Self::build(tree, coords, reference_year);
        if let (Some(domain), Some(previous)) = (next.domain, previous) {
            next.cursor = Some(domain.clamp(previous));
        }
        *self = next;
    }

    pub fn domain(&self) -> Option<TimeDomain> {
        self.domain
    }

    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    pub fn appearances(&self) -> &[Appearance] {
        &self.appearances
    }

    pub fn events(&self) -> &[MigrationEvent] {
        &self.events
    }

    pub fn appearance(&self, id: NodeId) -> Option<&Appearance> {
        self.appearance_by_node
            .get(&id)
            .and_then(|&index| self.appearances.get(index))
    }

    pub fn is_playing(&self) -> bool {
        self.clock.playing
    }

    /// True when a domain exists and the cutoff gates the views.
    pub fn filter_active(&self) -> bool {
        self.filter_active && self.domain.is_some()
    }

    pub fn has_data(&self) -> bool {
        !self.appearances.is_empty() || !self.events.is_empty()
    }

    /// Direct cursor placement; returns false when no domain exists.
    pub fn scrub(&mut self, year: f64) -> bool {
        let Some(domain) = self.domain else {
            return false;
        };
        if !year.is_finite() {
            return false;
        }
        self.filter_active = true;
        self.cursor = Some(domain.clamp(year));
        if self.clock.playing {
            self.clock.last_timestamp = None;
        }
        true
    }

    /// Start playback from the domain minimum, or pause when already playing.
    pub fn toggle_play(&mut self) -> bool {
        let Some(domain) = self.domain else {
            return false;
        };
        if self.clock.playing {
            self.clock.stop();
        } else {
            self.clock.start();
            self.filter_active = true;
            self.cursor = Some(domain.min);
        }
        true
    }

    pub fn pause(&mut self) {
        self.clock.stop();
    }

    /// Turn the cutoff filter off without moving the cursor.
    pub fn disable_filter(&mut self) {
        self.clock.stop();
        self.filter_active = false;
    }

    /// Advance the playback cursor by the real time elapsed since the last
    /// tick. Returns true when the cursor moved. Reaching the domain maximum
    /// stops playback.
    pub fn tick(&mut self, now_seconds: f64) -> bool {
        let Some(domain) = self.domain else {
            self.clock.stop();
            return false;
        };
        if !self.clock.playing {
            return false;
        }
        let Some(elapsed) = self.clock.elapsed(now_seconds) else {
            return false;
        };
        let current = self.cursor.unwrap_or(domain.min);
        let next = current + elapsed * domain.span() / PLAYBACK_SECONDS;
        if next >= domain.max {
            self.cursor = Some(domain.max);
            self.clock.stop();
        } else {
            self.cursor = Some(next);
        }
        true
    }

    fn cutoff(&self) -> Option<f64> {
        if !self.filter_active() {
            return None;
        }
        self.cursor
    }

    /// Appeared by the cutoff. Nodes without a finite age are never gated.
    pub fn is_node_visible(&self, id: NodeId) -> bool {
        let Some(cutoff) = self.cutoff() else {
            return true;
        };
        self.appearance(id)
            .map_or(true, |appearance| appearance.year <= cutoff + CUTOFF_EPSILON)
    }

    pub fn is_edge_visible(&self, parent: NodeId, child: NodeId) -> bool {
        self.is_node_visible(parent) && self.is_node_visible(child)
    }

    /// Appearances at or before `cutoff`, in ascending year order.
    pub fn appeared_by(&self, cutoff: f64) -> impl Iterator<Item = &Appearance> {
        self.appearances
            .iter()
            .take_while(move |appearance| appearance.year <= cutoff + CUTOFF_EPSILON)
    }

    /// Events that have finished by `cutoff`, in ascending end-year order.
    pub fn events_ended_by(&self, cutoff: f64) -> impl Iterator<Item = &MigrationEvent> {
        self.events
            .iter()
            .take_while(move |event| event.end_year <= cutoff + CUTOFF_EPSILON)
    }

    pub fn label(&self) -> String {
        match (self.domain, self.cursor) {
            (Some(_), Some(year)) => {
                let date = date_from_decimal_year(year)
                    .map(format_date)
                    .unwrap_or_default();
                format!("{year:.2} ({date})")
            }
            _ if self.has_data() => String::from("Timeline unavailable"),
            _ => String::from("No timeline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;

    fn coords_for(tree: &Tree) -> Vec<Option<GeoPoint>> {
        (0..tree.len())
            .map(|id| Some(GeoPoint::new(id as f64, -(id as f64))))
            .collect()
    }

    fn timeline() -> (Tree, Timeline) {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let coords = coords_for(&tree);
        let timeline = Timeline::build(&tree, &coords, 2024.0);
        (tree, timeline)
    }

    #[test]
    fn domain_spans_appearance_years() {
        let (_, timeline) = timeline();
        let domain = timeline.domain().unwrap();
        assert_eq!(domain.min, 2014.0);
        assert_eq!(domain.max, 2024.0);
        assert_eq!(timeline.cursor(), Some(2014.0));
        assert!(!timeline.filter_active());
    }

    #[test]
    fn records_are_sorted() {
        let (_, timeline) = timeline();
        let years: Vec<f64> = timeline.appearances().iter().map(|a| a.year).collect();
        assert!(years.windows(2).all(|pair| pair[0] <= pair[1]));
        let ends: Vec<f64> = timeline.events().iter().map(|e| e.end_year).collect();
        assert!(ends.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(timeline.events().len(), 6);
    }

    #[test]
    fn visibility_grows_with_cutoff() {
        let (tree, mut timeline) = timeline();
        let visible_at = |timeline: &mut Timeline, year: f64| -> Vec<NodeId> {
            timeline.scrub(year);
            (0..tree.len())
                .filter(|&id| timeline.is_node_visible(id))
                .collect()
        };
        let mut previous = visible_at(&mut timeline, 2014.0);
        for year in [2016.0, 2018.0, 2020.0, 2022.5, 2023.0, 2024.0] {
            let current = visible_at(&mut timeline, year);
            assert!(previous.iter().all(|id| current.contains(id)));
            previous = current;
        }
        assert_eq!(previous.len(), tree.len());
    }

    #[test]
    fn edge_needs_both_endpoints() {
        let (tree, mut timeline) = timeline();
        let root = tree.lookup("Root").unwrap();
        let r = tree.lookup("R").unwrap();
        let a = tree.lookup("A").unwrap();
        timeline.scrub(2019.0);
        assert!(timeline.is_edge_visible(root, r));
        assert!(!timeline.is_edge_visible(r, a));
    }

    #[test]
    fn scrub_clamps_and_enables_filter() {
        let (_, mut timeline) = timeline();
        assert!(timeline.scrub(3000.0));
        assert_eq!(timeline.cursor(), Some(2024.0));
        assert!(timeline.filter_active());
        timeline.scrub(1000.0);
        assert_eq!(timeline.cursor(), Some(2014.0));
    }

    #[test]
    fn playback_advances_and_stops_at_max() {
        let (_, mut timeline) = timeline();
        timeline.scrub(2020.0);
        assert!(timeline.toggle_play());
        assert_eq!(timeline.cursor(), Some(2014.0));
        assert!(!timeline.tick(100.0));
        assert!(timeline.tick(102.5));
        assert!((timeline.cursor().unwrap() - 2015.0).abs() < 1e-9);
        timeline.tick(200.0);
        assert_eq!(timeline.cursor(), Some(2024.0));
        assert!(!timeline.is_playing());
    }

    #[test]
    fn pause_resets_tick_origin() {
        let (_, mut timeline) = timeline();
        timeline.toggle_play();
        timeline.tick(0.0);
        timeline.tick(2.5);
        timeline.toggle_play();
        assert!(!timeline.is_playing());
        let cursor = timeline.cursor();
        assert!(!timeline.tick(50.0));
        assert_eq!(timeline.cursor(), cursor);
    }

    #[test]
    fn rebuild_keeps_clamped_cursor() {
        let (tree, mut timeline) = timeline();
        timeline.scrub(2020.0);
        let coords = coords_for(&tree);
        timeline.rebuild(&tree, &coords, 2030.0);
        assert_eq!(timeline.cursor(), Some(2020.0));
        assert!(!timeline.filter_active());
        timeline.rebuild(&tree, &coords, 2010.0);
        assert_eq!(timeline.cursor(), Some(2010.0));
    }

    #[test]
    fn single_year_disables_timeline() {
        let tree = Tree::from_payload(&payload(vec![
            node("R", None, Some(0.0)),
            node("A", Some("R"), Some(0.0)),
        ]))
        .unwrap();
        let timeline = Timeline::build(&tree, &[], 2024.0);
        assert!(timeline.domain().is_none());
        assert_eq!(timeline.label(), "Timeline unavailable");
        assert!(timeline.is_node_visible(0));

        let undated = Tree::from_payload(&payload(vec![node("R", None, None)])).unwrap();
        assert_eq!(Timeline::build(&undated, &[], 2024.0).label(), "No timeline");
    }

    #[test]
    fn label_shows_year_and_date() {
        let (_, mut timeline) = timeline();
        timeline.scrub(2020.0);
        assert_eq!(timeline.label(), "2020.00 (2020-01-01)");
    }
}
