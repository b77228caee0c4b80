//! The four counter kinds of §3, their uniform update callback, and the
//! grouping/history machinery of §4.5/§4.6.
//!
//! Per the design note in §9 ("polymorphic counter callbacks"), counters
//! are represented as a sealed variant rather than an open trait
//! hierarchy; [`CounterKind::notify`] is a single match on the variant.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ir::{author_of, day_of, AuthorIndex, Day, Tag, MISSING_AUTHOR, SELF_AUTHOR};

/// A `day -> count` map, backing both the global and the per-file private
/// counters (§3, kinds 1 and 2).
#[derive(Debug, Default, Clone)]
pub struct DayCounter {
    pub counts: HashMap<Day, i64>,
}

impl DayCounter {
    pub fn add(&mut self, day: Day, delta: i64) {
        *self.counts.entry(day).or_insert(0) += delta;
    }

    pub fn get(&self, day: Day) -> i64 {
        self.counts.get(&day).copied().unwrap_or(0)
    }

    pub fn max_day(&self) -> Option<Day> {
        self.counts.keys().copied().max()
    }
}

/// `author -> (day -> count)` (§3, kind 3). `MISSING` authors are ignored
/// per §4.5's people-counter semantics.
#[derive(Debug, Default, Clone)]
pub struct PeopleCounter {
    pub people: HashMap<AuthorIndex, DayCounter>,
}

impl PeopleCounter {
    pub fn add(&mut self, author: AuthorIndex, day: Day, delta: i64) {
        if author == MISSING_AUTHOR {
            return;
        }
        self.people.entry(author).or_default().add(day, delta);
    }
}

/// `old_author -> (new_author | SELF | MISSING -> count)` (§3, kind 4).
#[derive(Debug, Default, Clone)]
pub struct InteractionMatrix {
    pub rows: HashMap<AuthorIndex, HashMap<AuthorIndex, i64>>,
}

impl InteractionMatrix {
    /// Applies the §4.5 interaction-matrix semantics for a displacement of
    /// `delta` lines tagged `old_tag` being overwritten by `new_tag`.
    ///
    /// `delta` arrives signed the same way every other counter sees it: a
    /// displaced run is notified with a negative delta (the lines that
    /// disappeared), while a fresh insert is notified with a positive one.
    /// §6/§8 want the matrix itself to hold positive counts of lines
    /// removed, so an ordinary (non-`SELF`) key stores the magnitude of
    /// the displacement; only the `SELF` key (reached exclusively through
    /// a positive insert delta) is already the right sign.
    pub fn add(&mut self, new_author: AuthorIndex, old_author: AuthorIndex, delta: i64) {
        if old_author == MISSING_AUTHOR {
            return;
        }
        let key = if new_author == old_author && delta > 0 { SELF_AUTHOR } else { new_author };
        let magnitude = if key == SELF_AUTHOR { delta } else { delta.abs() };
        *self.rows.entry(old_author).or_default().entry(key).or_insert(0) += magnitude;
    }
}

/// Sealed set of counter kinds a file model may have attached. Shared
/// kinds (global day, people, matrix) wrap `Rc<RefCell<_>>` state owned by
/// the burndown engine; the private kind is created fresh per file and
/// typically held directly by the file, not shared, but is expressed the
/// same way for uniform dispatch.
#[derive(Clone)]
pub enum CounterKind {
    GlobalDay(Rc<RefCell<DayCounter>>),
    PrivateDay(Rc<RefCell<DayCounter>>),
    People(Rc<RefCell<PeopleCounter>>),
    Matrix(Rc<RefCell<InteractionMatrix>>),
}

impl CounterKind {
    /// The uniform callback of §3: `update(state, new_tag, old_tag, delta)`.
    pub fn notify(&self, new_tag: Tag, old_tag: Tag, delta: i64) {
        if delta == 0 {
            return;
        }
        match self {
            CounterKind::GlobalDay(c) => c.borrow_mut().add(day_of(old_tag), delta),
            CounterKind::PrivateDay(c) => c.borrow_mut().add(day_of(old_tag), delta),
            CounterKind::People(c) => c.borrow_mut().add(author_of(old_tag), day_of(old_tag), delta),
            CounterKind::Matrix(c) => {
                c.borrow_mut().add(author_of(new_tag), author_of(old_tag), delta)
            }
        }
    }
}

/// Groups a `day -> count` counter into fixed-width bands of `granularity`
/// days, per §4.5/§4.6: band `b` sums `counter[i]` for `i` in
/// `[b*granularity, (b+1)*granularity)`, truncated to `current_day + 1` at
/// the tail. `band_count = ceil((current_day + 1) / granularity)`.
pub fn group(counter: &DayCounter, current_day: Day, granularity: u32) -> Vec<i64> {
    let day_bound = current_day as u64 + 1;
    let band_count = ((day_bound + granularity as u64 - 1) / granularity as u64).max(1) as usize;
    let mut bands = vec![0i64; band_count];

    for (&day, &count) in &counter.counts {
        if (day as u64) >= day_bound {
            continue;
        }
        let band = (day as u64 / granularity as u64) as usize;
        if band < bands.len() {
            bands[band] += count;
        }
    }

    bands
}

/// A history of grouped snapshots, one row per sample (§3 "Histories").
#[derive(Debug, Default, Clone)]
pub struct History {
    pub rows: Vec<Vec<i64>>,
}

impl History {
    /// Appends `row` `times` times (the §4.5 "history update" rule for
    /// multiple sampling steps elapsed since the last snapshot).
    pub fn push_repeated(&mut self, row: &[i64], times: u32) {
        for _ in 0..times {
            self.rows.push(row.to_vec());
        }
    }

    /// Widens every row to `width` columns by appending trailing zero
    /// bands. A row captured earlier, when fewer bands had come into
    /// existence, is simply narrower than one captured later in the same
    /// history — the band axis only ever grows to the right as later
    /// days introduce new bands — so the missing columns belong at the
    /// end, not the start (§4.5 finalize, §8 "history dimension
    /// alignment").
    pub fn widen_rows_to(&mut self, width: usize) {
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, 0);
            }
        }
    }

    /// Prepends leading zero rows (each `width` columns wide) until this
    /// history has `target_samples` rows. A file or author that didn't
    /// exist yet during the run's earliest samples gets zero rows for
    /// those samples, aligning every history to the same sample count as
    /// `global_history` (§4.5 finalize, §8 "history dimension
    /// alignment").
    pub fn pad_leading_rows_to(&mut self, target_samples: usize, width: usize) {
        if self.rows.len() < target_samples {
            let missing = target_samples - self.rows.len();
            let mut padded = vec![vec![0i64; width]; missing];
            padded.append(&mut self.rows);
            self.rows = padded;
        }
    }

    pub fn sample_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_counter_conservation() {
        let mut c = DayCounter::default();
        c.add(3, 10);
        c.add(3, -4);
        assert_eq!(c.get(3), 6);
    }

    #[test]
    fn people_counter_ignores_missing() {
        let mut p = PeopleCounter::default();
        p.add(MISSING_AUTHOR, 0, 100);
        assert!(p.people.is_empty());
        p.add(1, 0, 5);
        assert_eq!(p.people[&1].get(0), 5);
    }

    #[test]
    fn interaction_matrix_self_vs_cross() {
        let mut m = InteractionMatrix::default();
        // author 1 overwrites their own lines -> SELF column
        m.add(1, 1, 10);
        assert_eq!(m.rows[&1][&SELF_AUTHOR], 10);

        // author 2 removes lines originally by author 1 -> column 2
        m.add(2, 1, 3);
        assert_eq!(m.rows[&1][&2], 3);
    }

    #[test]
    fn interaction_matrix_ignores_missing_row() {
        let mut m = InteractionMatrix::default();
        m.add(1, MISSING_AUTHOR, 7);
        assert!(m.rows.is_empty());
    }

    #[test]
    fn grouping_matches_literal_example() {
        // §8 scenario 5: granularity=30, sampling=30, 10 lines added on day 0.
        let mut c = DayCounter::default();
        c.add(0, 10);
        let bands = group(&c, 0, 30);
        assert_eq!(bands, vec![10]);
    }

    #[test]
    fn grouping_band_count_ceils() {
        let c = DayCounter::default();
        // current_day=59, granularity=30 -> day_bound=60 -> 2 bands
        let bands = group(&c, 59, 30);
        assert_eq!(bands.len(), 2);
    }

    #[test]
    fn widen_rows_appends_trailing_zero_bands() {
        let mut h = History::default();
        h.rows.push(vec![5]);
        h.widen_rows_to(3);
        assert_eq!(h.rows[0], vec![5, 0, 0]);
    }

    #[test]
    fn pad_leading_rows_prepends_zero_rows() {
        let mut h = History::default();
        h.rows.push(vec![1, 2]);
        h.pad_leading_rows_to(3, 2);
        assert_eq!(h.rows, vec![vec![0, 0], vec![0, 0], vec![1, 2]]);
    }

    #[test]
    fn pad_leading_rows_is_a_no_op_when_already_wide_enough() {
        let mut h = History::default();
        h.rows.push(vec![1]);
        h.rows.push(vec![2]);
        h.pad_leading_rows_to(2, 1);
        assert_eq!(h.rows, vec![vec![1], vec![2]]);
    }
}
