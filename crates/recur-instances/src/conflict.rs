//! Overlap detection between time-boxed items.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Occurrence, TimeWindow};

/// Anything occupying a half-open `[start, end)` interval.
pub trait TimeBoxed {
    fn window(&self) -> TimeWindow;
}

impl TimeBoxed for TimeWindow {
    fn window(&self) -> TimeWindow {
        *self
    }
}

impl TimeBoxed for Occurrence {
    fn window(&self) -> TimeWindow {
        self.time_window
    }
}

/// A maximal run of mutually chained overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictGroup {
    /// Indices into the input slice, ordered by start.
    pub members: Vec<usize>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Group items whose windows overlap.
///
/// Touching windows (`a.end == b.start`) do not conflict. Zero-length items
/// conflict only with other zero-length items at the same instant. Only
/// groups of two or more are returned, ordered by start.
pub fn detect_conflicts<T: TimeBoxed>(items: &[T]) -> Vec<ConflictGroup> {
    let mut spans: Vec<(usize, TimeWindow)> = Vec::with_capacity(items.len());
    let mut instants: BTreeMap<DateTime<Utc>, Vec<usize>> = BTreeMap::new();
    for (idx, item) in items.iter().enumerate() {
        let window = item.window();
        if window.is_instant() {
            instants.entry(window.start).or_default().push(idx);
        } else {
            spans.push((idx, window));
        }
    }
    spans.sort_by_key(|(idx, w)| (w.start, *idx));

    let mut groups = Vec::new();
    let mut current: Option<ConflictGroup> = None;
    for (idx, window) in spans {
        if let Some(group) = current.as_mut().filter(|g| window.start < g.end) {
            group.members.push(idx);
            group.end = group.end.max(window.end);
            continue;
        }
        let fresh = ConflictGroup {
            members: vec![idx],
            start: window.start,
            end: window.end,
        };
        groups.extend(current.replace(fresh));
    }
    groups.extend(current);
    groups.retain(|g| g.members.len() > 1);

    groups.extend(
        instants
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(at, members)| ConflictGroup { members, start: at, end: at }),
    );
    groups.sort_by_key(|g| (g.start, g.members[0]));
    groups
}
