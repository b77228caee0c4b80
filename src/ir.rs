//! Core data model (§3): commit records, change entries, blobs, and the
//! packed `(author, day)` tag that annotates every surviving line.

use git2::Oid;
use time::OffsetDateTime;

/// Non-negative day index: whole days since the first commit of the
/// analyzed sequence.
pub type Day = u32;

/// Index assigned by the identity resolver; `MISSING` marks an author the
/// resolver could not fold a signature into.
pub type AuthorIndex = u32;

/// Sentinel author index for unresolved signatures (§3).
pub const MISSING_AUTHOR: AuthorIndex = AuthorIndex::MAX;

/// Sentinel interaction-matrix row/column key for "author overwrote their
/// own lines" (§3, §4.5).
pub const SELF_AUTHOR: AuthorIndex = AuthorIndex::MAX - 1;

/// A single machine integer packing `(author, day)` (§3).
///
/// The low [`DAY_BITS`] bits hold the day (range `0..16384`, a little
/// over 44 years); the remaining high bits hold the author index. When
/// author tracking is disabled the author field is always `0`, so the
/// packed tag degenerates to the day value itself, matching §3's
/// requirement.
pub type Tag = u64;

/// Width of the day field within a packed [`Tag`]. Widening this is a
/// compile-time choice (§9) and must stay documented here if changed.
pub const DAY_BITS: u32 = 14;
pub const DAY_MASK: u64 = (1u64 << DAY_BITS) - 1;
pub const MAX_DAY: Day = DAY_MASK as Day;

/// Reserved tag value for the sentinel terminal entry of a file model;
/// distinct from any value `pack` can produce (`pack` never sets every
/// bit, since a valid author index is at most `u32::MAX - 2`).
pub const END: Tag = Tag::MAX;

/// Packs an `(author, day)` pair into a single comparable tag.
///
/// Equality of two packed tags is equality of "same author on same day";
/// it must never be conflated with an equality test on the day alone.
pub fn pack(author: AuthorIndex, day: Day) -> Tag {
    debug_assert!((day as u64) <= DAY_MASK, "day {} overflows the {}-bit day field", day, DAY_BITS);
    ((author as u64) << DAY_BITS) | (day as u64 & DAY_MASK)
}

pub fn day_of(tag: Tag) -> Day {
    (tag & DAY_MASK) as Day
}

pub fn author_of(tag: Tag) -> AuthorIndex {
    (tag >> DAY_BITS) as AuthorIndex
}

/// A commit record as supplied by the git2-backed driver (§3, §6).
#[derive(Debug, Clone, derive_new::new)]
pub struct CommitRecord {
    pub id: Oid,
    pub author_name: String,
    pub author_email: String,
    pub author_time: OffsetDateTime,
    pub tree: Oid,
}

/// One side of a [`ChangeEntry`]: either empty (insertion/deletion on
/// that side) or a concrete tree entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSide {
    pub path: String,
    pub content_hash: Oid,
    pub mode: i32,
}

impl ChangeSide {
    pub fn new(path: String, content_hash: Oid, mode: i32) -> Self {
        Self { path, content_hash, mode }
    }

    /// Submodules and commit-links are reported by git2 as mode
    /// `0o160000` (`GIT_FILEMODE_COMMIT`).
    pub fn is_submodule(&self) -> bool {
        self.mode == 0o160000
    }
}

/// A pair `(From, To)` classifying a tree-diff entry (§3).
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub from: Option<ChangeSide>,
    pub to: Option<ChangeSide>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Delete,
    Modify,
}

impl ChangeEntry {
    pub fn new(from: Option<ChangeSide>, to: Option<ChangeSide>) -> Self {
        Self { from, to }
    }

    pub fn kind(&self) -> ChangeKind {
        match (&self.from, &self.to) {
            (None, Some(_)) => ChangeKind::Insert,
            (Some(_), None) => ChangeKind::Delete,
            (Some(_), Some(_)) => ChangeKind::Modify,
            (None, None) => unreachable!("a change entry must have at least one side"),
        }
    }
}

/// `{hash, size, bytes}` (§3). The distinguished dummy blob represents
/// submodule entries and tolerated missing objects.
#[derive(Debug, Clone)]
pub struct Blob {
    pub hash: Oid,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(hash: Oid, bytes: Vec<u8>) -> Self {
        Self { hash, bytes }
    }

    pub fn dummy() -> Self {
        Self { hash: Oid::zero(), bytes: Vec::new() }
    }

    pub fn is_dummy(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// UTF-8 decode, per §4.3's binary-content detection: any blob whose
    /// bytes are not valid UTF-8 is treated as not-a-text-file.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn line_count(&self) -> Option<usize> {
        let text = self.as_text()?;
        if text.is_empty() {
            return Some(0);
        }
        Some(text.split_inclusive('\n').count())
    }
}

/// Computes the day index for a commit timestamp relative to the first
/// commit's timestamp (§3), clamped to `previous_day` on apparent
/// regression (rebase artifact, §4.5's state machine).
pub fn day_index(commit_time: OffsetDateTime, first_time: OffsetDateTime, previous_day: Day) -> Day {
    let delta = commit_time - first_time;
    let days = delta.whole_seconds() / (24 * 60 * 60);
    if days < 0 {
        return previous_day;
    }
    let day = days as Day;
    if day < previous_day {
        previous_day
    } else {
        day.min(MAX_DAY)
    }
}
