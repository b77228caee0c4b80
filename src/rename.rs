//! C3: tree-diff rename detector (§4.3).
//!
//! Takes the unrefined change list produced by a plain tree-to-tree diff
//! (where same-path changes already arrive as `Modify` and everything
//! else is a same-side `Insert`/`Delete`) and coalesces as many
//! `Insert`+`Delete` pairs as it can into `Modify(from, to)` entries with
//! `from.path != to.path`, via hash-exact matching then size/content
//! similarity, mirroring the teacher's tree-diff handling in spirit
//! (`main.rs`'s old `get_diff_delta_path`/`ChangedFile` bookkeeping) but
//! implementing the three-stage algorithm spec.md actually specifies.

use crate::blob_cache::BlobCache;
use crate::error::{HerculesError, Result};
use crate::ir::{ChangeEntry, ChangeSide};
use crate::line_diff::{diff_lines, LineEdit};

/// Refines `changes` in place order, returning the list with as many
/// rename pairs coalesced as the three stages can find.
pub fn detect_renames(
    changes: Vec<ChangeEntry>,
    cache: &mut BlobCache,
    similarity_threshold: u8,
) -> Result<Vec<ChangeEntry>> {
    let mut modifies = Vec::new();
    let mut inserts = Vec::new();
    let mut deletes = Vec::new();

    for change in changes {
        match (change.from, change.to) {
            (None, Some(to)) => inserts.push(to),
            (Some(from), None) => deletes.push(from),
            (Some(from), Some(to)) => modifies.push(ChangeEntry::new(Some(from), Some(to))),
            (None, None) => {
                return Err(HerculesError::InvariantViolation(
                    "a change entry must have at least one side".into(),
                ))
            }
        }
    }

    let (renames, inserts, deletes) = stage1_hash_exact(inserts, deletes);
    modifies.extend(renames);

    let (renames, inserts, deletes) = stage2_similarity(inserts, deletes, cache, similarity_threshold)?;
    modifies.extend(renames);

    // Stage 3: residue passes through unchanged.
    modifies.extend(inserts.into_iter().map(|to| ChangeEntry::new(None, Some(to))));
    modifies.extend(deletes.into_iter().map(|from| ChangeEntry::new(Some(from), None)));

    Ok(modifies)
}

/// Stage 1 (§4.3): sort both sides by content hash and do a single
/// linear merge, matching exact hashes.
fn stage1_hash_exact(
    mut inserts: Vec<ChangeSide>,
    mut deletes: Vec<ChangeSide>,
) -> (Vec<ChangeEntry>, Vec<ChangeSide>, Vec<ChangeSide>) {
    inserts.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
    deletes.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));

    let mut renames = Vec::new();
    let mut leftover_inserts = Vec::new();
    let mut leftover_deletes = Vec::new();

    let mut i = 0;
    let mut j = 0;
    while i < inserts.len() && j < deletes.len() {
        use std::cmp::Ordering::*;
        match inserts[i].content_hash.cmp(&deletes[j].content_hash) {
            Equal => {
                renames.push(ChangeEntry::new(Some(deletes[j].clone()), Some(inserts[i].clone())));
                i += 1;
                j += 1;
            }
            Less => {
                leftover_inserts.push(inserts[i].clone());
                i += 1;
            }
            Greater => {
                leftover_deletes.push(deletes[j].clone());
                j += 1;
            }
        }
    }
    leftover_inserts.extend(inserts.into_iter().skip(i));
    leftover_deletes.extend(deletes.into_iter().skip(j));

    (renames, leftover_inserts, leftover_deletes)
}

/// "Close sizes" test from §4.3: `|s_A - s_D| * 100 / max(1, min(s_A,
/// s_D)) <= 100 - T`.
fn sizes_are_close(size_a: usize, size_d: usize, threshold: u8) -> bool {
    let diff = size_a.abs_diff(size_d);
    let denom = size_a.min(size_d).max(1);
    diff * 100 / denom <= (100 - threshold as usize)
}

/// Stage 2 (§4.3): sort the residue by blob size; for each insertion,
/// scan deletions within the close-size window and accept the first
/// whose line-set similarity clears the threshold.
fn stage2_similarity(
    mut inserts: Vec<ChangeSide>,
    mut deletes: Vec<ChangeSide>,
    cache: &mut BlobCache,
    threshold: u8,
) -> Result<(Vec<ChangeEntry>, Vec<ChangeSide>, Vec<ChangeSide>)> {
    let mut renames = Vec::new();

    inserts.sort_by_key(|s| cache.resolve_from(s.content_hash).size());
    deletes.sort_by_key(|s| cache.resolve_from(s.content_hash).size());

    let mut leftover_inserts = Vec::new();
    let mut matched = vec![false; deletes.len()];

    for insert in inserts {
        let to_blob = cache.resolve_from(insert.content_hash);
        let size_a = to_blob.size();

        let mut accepted = None;
        for (idx, del) in deletes.iter().enumerate() {
            if matched[idx] {
                continue;
            }
            let from_blob = cache.resolve_from(del.content_hash);
            let size_d = from_blob.size();
            if !sizes_are_close(size_a, size_d, threshold) {
                continue;
            }
            if line_set_similarity(&from_blob.bytes, &to_blob.bytes) >= threshold {
                accepted = Some(idx);
                break;
            }
        }

        match accepted {
            Some(idx) => {
                matched[idx] = true;
                renames.push(ChangeEntry::new(Some(deletes[idx].clone()), Some(insert)));
            }
            None => leftover_inserts.push(insert),
        }
    }

    let leftover_deletes = deletes
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !matched[*idx])
        .map(|(_, d)| d)
        .collect();

    Ok((renames, leftover_inserts, leftover_deletes))
}

/// Line-set similarity (§4.3): line-diff the two blobs and express the
/// common (`equal`) line count as a percentage of `max(1, min(|src|,
/// |dst|))`. Binary content (either side not UTF-8) is treated as zero
/// similarity, since C4 cannot diff it.
fn line_set_similarity(from_bytes: &[u8], to_bytes: &[u8]) -> u8 {
    let Some(script) = diff_lines(from_bytes, to_bytes, true) else {
        return 0;
    };
    let common: u64 = script
        .iter()
        .filter_map(|e| match e {
            LineEdit::Equal(n) => Some(*n as u64),
            _ => None,
        })
        .sum();

    let src_lines = count_lines(from_bytes);
    let dst_lines = count_lines(to_bytes);
    let denom = src_lines.min(dst_lines).max(1) as u64;

    ((common * 100) / denom).min(100) as u8
}

fn count_lines(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.is_empty() => 0,
        Ok(s) => s.split_inclusive('\n').count(),
        Err(_) => 0,
    }
}
