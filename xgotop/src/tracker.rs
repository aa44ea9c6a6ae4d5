//! # Goroutine Tracker
//!
//! Folds the event stream into the state shown by the live view and the
//! replay summary:
//!
//! - `GOROUTINE_CREATED` registers the child with its parent and birth time
//! - `STATUS_CHANGE` records the subject's latest status; a transition to
//!   `_Gdead` retires the goroutine into a bounded recently-dead window
//! - `GOROUTINE_EXITED` records the lifetime and forgets the goroutine
//! - allocations accumulate per goroutine and per Go [`Kind`]
//!
//! Events may arrive slightly out of order when several workers apply them,
//! so every handler tolerates a goroutine it has not seen yet.
//!
//! Goroutine id 0 is the runtime's "no goroutine" (system stack, or a `g`
//! before `newproc1` assigns its id). Its events are counted but never
//! tracked as a goroutine.

use std::collections::{BTreeMap, HashMap, VecDeque};

use xgotop_common::layout::{Kind, G_DEAD};
use xgotop_common::{EventType, GoRuntimeEvent};

/// Allocation totals for one goroutine or one kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub count: u64,
    pub bytes: u64,
}

impl KindStats {
    fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes = self.bytes.saturating_add(bytes);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoroutineStats {
    pub id: u64,
    pub parent: u64,
    /// Latest observed status, `None` until the first `STATUS_CHANGE`
    pub status: Option<u32>,
    /// Timestamp of its `GOROUTINE_CREATED` event, if seen
    pub created_ns: Option<u64>,
    pub allocations: KindStats,
    pub last_seen_ns: u64,
}

/// Bytes requested by an allocation event, attributed to a [`Kind`]
///
/// Objects count under their own kind. Slices count `elem_size * cap` under
/// [`Kind::Slice`], maps `(key_size + elem_size) * hint` under [`Kind::Map`].
#[must_use]
pub fn allocation_bytes(event: &GoRuntimeEvent) -> Option<(Kind, u64)> {
    let a = &event.attributes;
    match event.kind()? {
        EventType::AllocateObject => Some((Kind::from_raw(a[1]).unwrap_or(Kind::Invalid), a[0])),
        EventType::AllocateSlice => Some((Kind::Slice, a[0].saturating_mul(a[3]))),
        EventType::AllocateMap => Some((Kind::Map, a[0].saturating_add(a[2]).saturating_mul(a[4]))),
        _ => None,
    }
}

/// Dead goroutines remembered while their `GOROUTINE_EXITED` may still arrive
///
/// The exit event can be sampled out, evicted or dropped, and Go never reuses
/// ids, so anything older than this window is forgotten.
pub const DEAD_WINDOW: usize = 4096;

#[derive(Debug, Default)]
pub struct Tracker {
    goroutines: HashMap<u64, GoroutineStats>,
    /// Retired id → birth timestamp, oldest first in `dead_order`
    dead: HashMap<u64, Option<u64>>,
    dead_order: VecDeque<u64>,
    kinds: BTreeMap<Kind, KindStats>,
    event_counts: [u64; EventType::ALL.len()],
    unknown_events: u64,
    created: u64,
    exited: u64,
    lifetime_sum_ns: u64,
    lifetime_count: u64,
    handler_sum_ns: u64,
    first_ts: Option<u64>,
    last_ts: u64,
}

impl Tracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &GoRuntimeEvent) {
        let Some(kind) = event.kind() else {
            self.unknown_events += 1;
            return;
        };

        self.event_counts[kind as usize] += 1;
        self.handler_sum_ns += u64::from(event.handler_duration_ns);
        self.first_ts.get_or_insert(event.timestamp_ns);
        self.last_ts = self.last_ts.max(event.timestamp_ns);

        match kind {
            EventType::GoroutineCreated => {
                self.created += 1;
                let child = event.attributes[1];
                if let Some(born) = self.dead.get_mut(&child) {
                    // Workers applied the death first
                    *born = Some(event.timestamp_ns);
                } else if let Some(g) = self.goroutine(child, event.timestamp_ns) {
                    g.parent = event.attributes[0];
                    g.created_ns = Some(event.timestamp_ns);
                }
            }
            EventType::StatusChange => {
                #[allow(clippy::cast_possible_truncation)]
                let status = event.attributes[1] as u32;
                if status == G_DEAD {
                    self.retire(event.goroutine);
                } else if let Some(g) = self.goroutine(event.goroutine, event.timestamp_ns) {
                    if event.parent_goroutine != 0 {
                        g.parent = event.parent_goroutine;
                    }
                    g.status = Some(status);
                }
            }
            EventType::GoroutineExited => {
                self.exited += 1;
                let id = event.attributes[0];
                let born = match self.goroutines.remove(&id) {
                    Some(g) => g.created_ns,
                    None => self.dead.remove(&id).flatten(),
                };
                if let Some(born) = born {
                    self.lifetime_sum_ns += event.timestamp_ns.saturating_sub(born);
                    self.lifetime_count += 1;
                }
            }
            EventType::AllocateObject | EventType::AllocateSlice | EventType::AllocateMap => {
                let Some((alloc_kind, bytes)) = allocation_bytes(event) else {
                    return;
                };
                self.kinds.entry(alloc_kind).or_default().add(bytes);
                if let Some(g) = self.goroutine(event.goroutine, event.timestamp_ns) {
                    g.allocations.add(bytes);
                }
            }
        }
    }

    /// Move a goroutine that reached `_Gdead` out of the live set
    fn retire(&mut self, id: u64) {
        if id == 0 || self.dead.contains_key(&id) {
            return;
        }
        let born = self.goroutines.remove(&id).and_then(|g| g.created_ns);
        self.dead.insert(id, born);
        self.dead_order.push_back(id);

        while self.dead_order.len() > DEAD_WINDOW {
            if let Some(oldest) = self.dead_order.pop_front() {
                self.dead.remove(&oldest);
            }
        }
    }

    fn goroutine(&mut self, id: u64, now_ns: u64) -> Option<&mut GoroutineStats> {
        if id == 0 || self.dead.contains_key(&id) {
            return None;
        }
        let g = self
            .goroutines
            .entry(id)
            .or_insert_with(|| GoroutineStats { id, ..Default::default() });
        g.last_seen_ns = g.last_seen_ns.max(now_ns);
        Some(g)
    }

    /// Goroutines seen and not known to be dead
    #[must_use]
    pub fn live(&self) -> usize {
        self.goroutines.len()
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    #[must_use]
    pub fn exited(&self) -> u64 {
        self.exited
    }

    #[must_use]
    pub fn event_count(&self, event_type: EventType) -> u64 {
        self.event_counts[event_type as usize]
    }

    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.event_counts.iter().sum::<u64>() + self.unknown_events
    }

    #[must_use]
    pub fn unknown_events(&self) -> u64 {
        self.unknown_events
    }

    #[must_use]
    pub fn mean_handler_ns(&self) -> Option<u64> {
        let n: u64 = self.event_counts.iter().sum();
        (n > 0).then(|| self.handler_sum_ns / n)
    }

    #[must_use]
    pub fn mean_lifetime_ns(&self) -> Option<u64> {
        (self.lifetime_count > 0).then(|| self.lifetime_sum_ns / self.lifetime_count)
    }

    /// Span between the earliest and latest event timestamps
    #[must_use]
    pub fn span_ns(&self) -> u64 {
        self.first_ts.map_or(0, |first| self.last_ts.saturating_sub(first))
    }

    #[must_use]
    pub fn last_timestamp_ns(&self) -> u64 {
        self.last_ts
    }

    #[must_use]
    pub fn goroutine_stats(&self, id: u64) -> Option<&GoroutineStats> {
        self.goroutines.get(&id)
    }

    /// Live goroutines, heaviest allocators first (ties by id)
    #[must_use]
    pub fn top_goroutines(&self, limit: usize) -> Vec<GoroutineStats> {
        let mut rows: Vec<_> = self.goroutines.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.allocations.bytes.cmp(&a.allocations.bytes).then_with(|| a.id.cmp(&b.id))
        });
        rows.truncate(limit);
        rows
    }

    /// Allocation totals per kind, most bytes first
    #[must_use]
    pub fn kinds(&self) -> Vec<(Kind, KindStats)> {
        let mut rows: Vec<_> = self.kinds.iter().map(|(k, s)| (*k, *s)).collect();
        rows.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    #[must_use]
    pub fn total_allocated(&self) -> KindStats {
        self.kinds.values().fold(KindStats::default(), |acc, s| KindStats {
            count: acc.count + s.count,
            bytes: acc.bytes.saturating_add(s.bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgotop_common::layout::{G_RUNNABLE, G_RUNNING};

    fn ev(ty: EventType, ts: u64, g: u64, parent: u64, attrs: [u64; 5]) -> GoRuntimeEvent {
        GoRuntimeEvent::stamped(ty, ts - 100, ts, g, parent, attrs)
    }

    #[test]
    fn test_lifecycle() {
        let mut t = Tracker::new();
        t.apply(&ev(EventType::GoroutineCreated, 1_000, 2, 1, [1, 2, 0, 0, 0]));
        t.apply(&ev(EventType::StatusChange, 1_100, 2, 1, [u64::from(G_RUNNABLE), u64::from(G_RUNNING), 2, 0, 0]));

        let g = t.goroutine_stats(2).unwrap();
        assert_eq!(g.parent, 1);
        assert_eq!(g.status, Some(G_RUNNING));
        assert_eq!(g.created_ns, Some(1_000));
        assert_eq!(t.live(), 1);

        t.apply(&ev(EventType::StatusChange, 5_000, 2, 1, [u64::from(G_RUNNING), u64::from(G_DEAD), 2, 0, 0]));
        assert_eq!(t.live(), 0);
        t.apply(&ev(EventType::GoroutineExited, 5_000, 2, 1, [2, 4_900, 0, 0, 0]));

        assert!(t.goroutine_stats(2).is_none());
        assert_eq!((t.created(), t.exited()), (1, 1));
        assert_eq!(t.mean_lifetime_ns(), Some(4_000));
        assert_eq!(t.mean_handler_ns(), Some(100));
    }

    #[test]
    fn test_dead_goroutines_without_exit_stay_bounded() {
        let mut t = Tracker::new();
        for g in 1..=10_000u64 {
            t.apply(&ev(EventType::StatusChange, 1_000 + g, g, 1, [u64::from(G_RUNNABLE), u64::from(G_RUNNING), g, 0, 0]));
            t.apply(&ev(EventType::StatusChange, 2_000 + g, g, 1, [u64::from(G_RUNNING), u64::from(G_DEAD), g, 0, 0]));
        }
        assert_eq!(t.live(), 0);
        assert!(t.goroutines.is_empty());
        assert_eq!(t.dead.len(), DEAD_WINDOW);
        assert_eq!(t.dead_order.len(), DEAD_WINDOW);
        // Oldest ids were forgotten, newest are still awaiting their exit
        assert!(!t.dead.contains_key(&1));
        assert!(t.dead.contains_key(&10_000));
    }

    #[test]
    fn test_late_events_for_dead_goroutine() {
        let mut t = Tracker::new();
        // Death applied before the creation it follows
        t.apply(&ev(EventType::StatusChange, 900, 7, 1, [u64::from(G_RUNNING), u64::from(G_DEAD), 7, 0, 0]));
        t.apply(&ev(EventType::GoroutineCreated, 500, 1, 0, [1, 7, 0, 0, 0]));
        t.apply(&ev(EventType::AllocateObject, 800, 7, 1, [16, 25, 0, 0, 0]));
        assert_eq!(t.live(), 0);
        assert!(t.goroutine_stats(7).is_none());
        // Counted by kind even though the goroutine is gone
        assert_eq!(t.total_allocated().bytes, 16);

        t.apply(&ev(EventType::GoroutineExited, 1_000, 7, 1, [7, 950, 0, 0, 0]));
        assert_eq!(t.mean_lifetime_ns(), Some(500));
        assert!(t.dead.is_empty());
    }

    #[test]
    fn test_allocation_attribution() {
        let mut t = Tracker::new();
        // object: 24-byte struct
        t.apply(&ev(EventType::AllocateObject, 10, 5, 1, [24, 25, 0, 0, 0]));
        // slice: elem 8 bytes, len 10, cap 16
        t.apply(&ev(EventType::AllocateSlice, 20, 5, 1, [8, 2, 10, 16, 0]));
        // map[string]int, hint 10
        t.apply(&ev(EventType::AllocateMap, 30, 5, 1, [16, 24, 8, 2, 10]));

        assert_eq!(
            t.kinds(),
            vec![
                (Kind::Map, KindStats { count: 1, bytes: 240 }),
                (Kind::Slice, KindStats { count: 1, bytes: 128 }),
                (Kind::Struct, KindStats { count: 1, bytes: 24 }),
            ]
        );
        assert_eq!(t.goroutine_stats(5).unwrap().allocations, KindStats { count: 3, bytes: 392 });
        assert_eq!(t.total_allocated(), KindStats { count: 3, bytes: 392 });
    }

    #[test]
    fn test_goroutine_zero_is_not_tracked() {
        let mut t = Tracker::new();
        t.apply(&ev(EventType::AllocateObject, 10, 0, 0, [64, 25, 0, 0, 0]));
        t.apply(&ev(EventType::StatusChange, 20, 0, 0, [0, u64::from(G_DEAD), 0, 0, 0]));
        assert_eq!(t.live(), 0);
        assert_eq!(t.total_events(), 2);
        assert_eq!(t.total_allocated().bytes, 64);
    }

    #[test]
    fn test_exit_before_status_is_tolerated() {
        let mut t = Tracker::new();
        t.apply(&ev(EventType::GoroutineExited, 50, 9, 1, [9, 40, 0, 0, 0]));
        t.apply(&ev(EventType::AllocateObject, 60, 3, 1, [8, 2, 0, 0, 0]));
        assert_eq!(t.exited(), 1);
        assert_eq!(t.mean_lifetime_ns(), None);
        assert_eq!(t.span_ns(), 10);
    }

    #[test]
    fn test_top_goroutines_ordering() {
        let mut t = Tracker::new();
        t.apply(&ev(EventType::AllocateObject, 10, 3, 1, [8, 2, 0, 0, 0]));
        t.apply(&ev(EventType::AllocateObject, 11, 4, 1, [64, 25, 0, 0, 0]));
        t.apply(&ev(EventType::AllocateObject, 12, 2, 1, [8, 2, 0, 0, 0]));
        let ids: Vec<_> = t.top_goroutines(2).into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![4, 2]);
    }

    #[test]
    fn test_unknown_event_type() {
        let mut t = Tracker::new();
        let mut e = ev(EventType::StatusChange, 10, 1, 0, [0; 5]);
        e.event_type = 42;
        t.apply(&e);
        assert_eq!(t.unknown_events(), 1);
        assert_eq!(t.total_events(), 1);
        assert_eq!(t.mean_handler_ns(), None);
    }
}
