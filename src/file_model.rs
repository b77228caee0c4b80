//! C1: the per-file ordered interval structure (§4.1).
//!
//! A file of length `L` is represented as an ordered map from
//! non-negative byte^H^H^Hline offsets to a packed [`Tag`], plus a
//! terminal sentinel `(L, END)` that is always the maximum entry. The
//! structure is grounded on the change-point/cohort pattern shown in the
//! retrieval pack's blame reference implementation, adapted to the exact
//! operation contract, tie-breaks, and counter-notification rules of
//! spec §4.1.

use std::collections::BTreeMap;

use crate::counters::CounterKind;
use crate::error::{HerculesError, Result};
use crate::ir::{Tag, END};

#[derive(Clone)]
pub struct FileModel {
    breakpoints: BTreeMap<u64, Tag>,
    counters: Vec<CounterKind>,
}

impl FileModel {
    /// §4.1 `new`: if `length > 0`, inserts `(0, initial_tag)` and
    /// notifies every counter of a `+length` delta for `initial_tag`
    /// (with `old_tag == initial_tag`, since nothing is displaced by
    /// creating a file). Always inserts the sentinel.
    pub fn new(initial_tag: Tag, length: i64, counters: Vec<CounterKind>) -> Result<Self> {
        if length < 0 {
            return Err(HerculesError::InvariantViolation(format!(
                "file model length must be non-negative, got {length}"
            )));
        }
        let length = length as u64;
        let mut breakpoints = BTreeMap::new();
        if length > 0 {
            breakpoints.insert(0, initial_tag);
        }
        breakpoints.insert(length, END);

        let model = Self { breakpoints, counters };
        if length > 0 {
            model.notify(initial_tag, initial_tag, length as i64);
        }
        Ok(model)
    }

    /// §4.1 `length`: the key of the maximum entry (the sentinel).
    pub fn length(&self) -> u64 {
        *self.breakpoints.keys().next_back().expect("sentinel is always present")
    }

    /// The tag active at offset `k` for `k` in `[0, length]`. Returns
    /// [`END`] exactly when `k == length` (there is no run there, only
    /// the sentinel).
    fn tag_at(&self, k: u64) -> Tag {
        *self
            .breakpoints
            .range(..=k)
            .next_back()
            .map(|(_, t)| t)
            .expect("breakpoints always contains an entry at or before any valid offset")
    }

    fn notify(&self, new_tag: Tag, old_tag: Tag, delta: i64) {
        for counter in &self.counters {
            counter.notify(new_tag, old_tag, delta);
        }
    }

    /// Notifies counters of every bit of content displaced by deleting
    /// `[position, end)`, one call per maximal overlapping run.
    fn notify_overlaps(&self, new_tag: Tag, position: u64, end: u64, length: u64) {
        let start_key = self
            .breakpoints
            .range(..=position)
            .next_back()
            .map(|(&k, _)| k)
            .expect("a run covering `position` always exists");

        let mut iter = self.breakpoints.range(start_key..).peekable();
        while let Some((&k, &tag)) = iter.next() {
            if k >= end {
                break;
            }
            let run_end = iter.peek().map(|(&k2, _)| k2).unwrap_or(length);
            let overlap_start = k.max(position);
            let overlap_end = run_end.min(end);
            if overlap_end > overlap_start {
                self.notify(new_tag, tag, -((overlap_end - overlap_start) as i64));
            }
            if run_end >= end {
                break;
            }
        }
    }

    /// §4.1 `update`: atomically "at `position`, delete `delete_length`
    /// lines then insert `insert_length` lines tagged `new_tag`".
    pub fn update(
        &mut self,
        new_tag: Tag,
        position: u64,
        insert_length: u64,
        delete_length: u64,
    ) -> Result<()> {
        let length = self.length();
        if position > length {
            return Err(HerculesError::InvariantViolation(format!(
                "update position {position} exceeds file length {length}"
            )));
        }
        if position + delete_length > length {
            return Err(HerculesError::InvariantViolation(format!(
                "update range [{position}, {}) exceeds file length {length}",
                position + delete_length
            )));
        }
        if insert_length == 0 && delete_length == 0 {
            // Idempotence-of-zero-update law (§8): a no-op.
            return Ok(());
        }

        let end = position + delete_length;
        let origin_tag = self.tag_at(position);
        let tail_tag = self.tag_at(end);

        if delete_length > 0 {
            self.notify_overlaps(new_tag, position, end, length);
            let interior: Vec<u64> = self.breakpoints.range(position..end).map(|(&k, _)| k).collect();
            for k in interior {
                self.breakpoints.remove(&k);
            }
        }

        let delta = insert_length as i64 - delete_length as i64;

        // When nothing is deleted and a breakpoint sits exactly at
        // `position` whose tag already equals `new_tag`, the inserted
        // lines simply extend that run in place: leave the marker where
        // it is instead of sweeping it into the shift below.
        let keep_position_marker = delete_length == 0
            && insert_length > 0
            && origin_tag == new_tag
            && self.breakpoints.contains_key(&position);

        let shift_from = if keep_position_marker { position + 1 } else { end };
        let tail_entries: Vec<(u64, Tag)> =
            self.breakpoints.range(shift_from..).map(|(&k, &t)| (k, t)).collect();
        for (k, _) in &tail_entries {
            self.breakpoints.remove(k);
        }
        for (k, t) in tail_entries {
            self.breakpoints.insert((k as i64 + delta) as u64, t);
        }

        if insert_length > 0 {
            if !keep_position_marker {
                self.breakpoints.insert(position, new_tag);
            }
            // Net +insert_length for new_tag; no displacement notification
            // here, per §4.1's "inserting the same tag as the origin does
            // not call the counter update with a displacement" rule.
            self.notify(new_tag, new_tag, insert_length as i64);
        }

        if tail_tag != END {
            // Resumes the run that used to continue past `end`. Mandatory
            // coalescing (below) absorbs this marker if it turns out to
            // duplicate an adjacent tag.
            self.breakpoints.insert(position + insert_length, tail_tag);
        }

        self.coalesce();
        Ok(())
    }

    /// Merges adjacent entries sharing a tag, maintaining the "no
    /// adjacent duplicates" invariant (§3, §8) after every mutation.
    fn coalesce(&mut self) {
        let mut to_remove = Vec::new();
        let mut prev_tag: Option<Tag> = None;
        for (&k, &tag) in self.breakpoints.iter() {
            if let Some(prev) = prev_tag {
                if prev == tag {
                    to_remove.push(k);
                    continue;
                }
            }
            prev_tag = Some(tag);
        }
        for k in to_remove {
            self.breakpoints.remove(&k);
        }
    }

    /// Returns `(key, tag)` pairs in order, including the terminal sentinel.
    pub fn dump(&self) -> Vec<(u64, Tag)> {
        self.breakpoints.iter().map(|(&k, &t)| (k, t)).collect()
    }

    /// §4.1 `validate`: first key is 0 (or the file is empty with only the
    /// sentinel), last value is [`END`], keys strictly increasing, no two
    /// adjacent entries share a tag.
    pub fn validate(&self) -> Result<()> {
        let entries = self.dump();
        let (&(first_key, _), &(last_key, last_tag)) =
            match (entries.first(), entries.last()) {
                (Some(f), Some(l)) => (&f, &l),
                _ => {
                    return Err(HerculesError::InvariantViolation(
                        "file model has no entries at all".into(),
                    ))
                }
            };

        if last_tag != END {
            return Err(HerculesError::InvariantViolation("last entry is not the END sentinel".into()));
        }
        if entries.len() > 1 && first_key != 0 {
            return Err(HerculesError::InvariantViolation("first key is not 0".into()));
        }
        if entries.len() == 1 && first_key != 0 {
            return Err(HerculesError::InvariantViolation(
                "empty file's sentinel must sit at key 0".into(),
            ));
        }

        let mut prev_key = None;
        let mut prev_tag = None;
        for &(k, t) in &entries {
            if let Some(pk) = prev_key {
                if k <= pk {
                    return Err(HerculesError::InvariantViolation("keys are not strictly increasing".into()));
                }
            }
            if let Some(pt) = prev_tag {
                if pt == t {
                    return Err(HerculesError::InvariantViolation(
                        "adjacent entries share a tag".into(),
                    ));
                }
            }
            prev_key = Some(k);
            prev_tag = Some(t);
        }
        let _ = last_key;
        Ok(())
    }

    /// §4.1 `status(k)`: access to the k-th attached counter.
    pub fn status(&self, k: usize) -> Option<&CounterKind> {
        self.counters.get(k)
    }
}
