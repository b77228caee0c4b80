//! C5: the burndown engine (§4.5).
//!
//! Owns every file model, the four shared counter kinds, and the
//! histories accumulated from them. This is the component that turns a
//! refined per-commit change list into file-model mutations and,
//! periodically, into grouped history snapshots.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::blob_cache::BlobCache;
use crate::config::Config;
use crate::counters::{group, CounterKind, DayCounter, History, InteractionMatrix, PeopleCounter};
use crate::error::{HerculesError, Result};
use crate::file_model::FileModel;
use crate::ir::{pack, AuthorIndex, ChangeEntry, Day, Tag, MISSING_AUTHOR};
use crate::line_diff::{diff_lines, LineEdit};
use crate::refine::{DiffRefiner, NoopRefiner};

/// Final, exported shape of the engine's accumulated state (§6).
pub struct BurndownReport {
    pub global_history: Vec<Vec<i64>>,
    pub file_histories: HashMap<String, Vec<Vec<i64>>>,
    pub people_histories: HashMap<AuthorIndex, Vec<Vec<i64>>>,
    /// `people_matrix[i][0]` = lines of author `i` removed by an
    /// unresolved author; `[i][1]` = author `i`'s self-overwrites;
    /// `[i][2 + j]` = lines of author `i` removed by author `j` (§6).
    pub people_matrix: Vec<Vec<i64>>,
}

pub struct BurndownEngine {
    config: Config,
    files: HashMap<String, FileModel>,
    file_private_counters: HashMap<String, Rc<RefCell<DayCounter>>>,
    global_counter: Rc<RefCell<DayCounter>>,
    people_counter: Option<Rc<RefCell<PeopleCounter>>>,
    matrix: Option<Rc<RefCell<InteractionMatrix>>>,
    global_history: History,
    file_histories: HashMap<String, History>,
    people_histories: HashMap<AuthorIndex, History>,
    /// Grouping bookkeeping day (§4.6): only advances when a sampling
    /// boundary is actually crossed, per §4.5 step 1's literal wording.
    previous_day: Day,
    /// High-water mark of every day seen, used as `finalize`'s grouping
    /// basis regardless of sampling bookkeeping.
    current_day: Day,
    refiner: Box<dyn DiffRefiner>,
}

impl BurndownEngine {
    pub fn new(config: Config) -> Self {
        let people_counter = config.people_enabled().then(|| Rc::new(RefCell::new(PeopleCounter::default())));
        let matrix = config.people_enabled().then(|| Rc::new(RefCell::new(InteractionMatrix::default())));
        Self {
            config,
            files: HashMap::new(),
            file_private_counters: HashMap::new(),
            global_counter: Rc::new(RefCell::new(DayCounter::default())),
            people_counter,
            matrix,
            global_history: History::default(),
            file_histories: HashMap::new(),
            people_histories: HashMap::new(),
            previous_day: 0,
            current_day: 0,
            refiner: Box::new(NoopRefiner),
        }
    }

    pub fn with_refiner(mut self, refiner: Box<dyn DiffRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    fn counters_for_new_file(&mut self, path: &str) -> Vec<CounterKind> {
        let mut counters = vec![CounterKind::GlobalDay(self.global_counter.clone())];
        if self.config.track_files {
            let private = Rc::new(RefCell::new(DayCounter::default()));
            self.file_private_counters.insert(path.to_string(), private.clone());
            counters.push(CounterKind::PrivateDay(private));
        }
        if let Some(people) = &self.people_counter {
            counters.push(CounterKind::People(people.clone()));
        }
        if let Some(matrix) = &self.matrix {
            counters.push(CounterKind::Matrix(matrix.clone()));
        }
        counters
    }

    /// §4.5 step 1: snapshot if a sampling boundary was crossed since the
    /// last commit, then process every refined change in `commit`'s
    /// change list.
    pub fn process_commit(
        &mut self,
        day: Day,
        author: AuthorIndex,
        changes: &[ChangeEntry],
        cache: &mut BlobCache,
    ) -> Result<()> {
        let delta = (day / self.config.sampling) as i64 - (self.previous_day / self.config.sampling) as i64;
        if delta > 0 {
            self.snapshot(delta as u32, self.previous_day);
            self.previous_day = day;
        }
        self.current_day = self.current_day.max(day);

        let tag = pack(author, day);
        for change in changes {
            self.apply_change(change, tag, cache)?;
            if self.config.debug {
                for (path, model) in &self.files {
                    model.validate().map_err(|e| {
                        HerculesError::InvariantViolation(format!("file '{path}' failed validation: {e}"))
                    })?;
                }
            }
        }
        Ok(())
    }

    fn apply_change(&mut self, change: &ChangeEntry, tag: Tag, cache: &mut BlobCache) -> Result<()> {
        match (&change.from, &change.to) {
            (None, Some(to)) => self.apply_insert(&to.path, to.content_hash, to.is_submodule(), tag, cache),
            (Some(from), None) => self.apply_delete(&from.path, from.content_hash, tag, cache),
            (Some(from), Some(to)) => self.apply_modify(from, to, tag, cache),
            (None, None) => Err(HerculesError::InvariantViolation(
                "a change entry must have at least one side".into(),
            )),
        }
    }

    fn apply_insert(
        &mut self,
        path: &str,
        hash: git2::Oid,
        is_submodule: bool,
        tag: Tag,
        cache: &mut BlobCache,
    ) -> Result<()> {
        let blob = cache.resolve_to(path, hash, is_submodule, self.config.ignore_missing_submodules)?;
        let Some(length) = blob.line_count() else {
            // Binary content: silently skipped (§4.3).
            return Ok(());
        };
        if self.files.contains_key(path) {
            return Err(HerculesError::InvariantViolation(format!(
                "insert of '{path}' but a file model already exists for that path"
            )));
        }
        let counters = self.counters_for_new_file(path);
        let model = FileModel::new(tag, length as i64, counters)?;
        self.files.insert(path.to_string(), model);
        Ok(())
    }

    fn apply_delete(&mut self, path: &str, hash: git2::Oid, tag: Tag, cache: &mut BlobCache) -> Result<()> {
        let blob = cache.resolve_from(hash);
        let Some(length) = blob.line_count() else {
            // Never tracked as text in the first place; nothing to do.
            return Ok(());
        };

        let Some(model) = self.files.get_mut(path) else {
            return Err(HerculesError::InvariantViolation(format!(
                "delete of untracked path '{path}'"
            )));
        };
        if model.length() != length as u64 {
            return Err(HerculesError::InvariantViolation(format!(
                "delete of '{path}': blob has {length} lines but model tracks {}",
                model.length()
            )));
        }
        model.update(tag, 0, 0, length as u64)?;
        self.files.remove(path);
        self.file_private_counters.remove(path);
        Ok(())
    }

    fn apply_modify(
        &mut self,
        from: &crate::ir::ChangeSide,
        to: &crate::ir::ChangeSide,
        tag: Tag,
        cache: &mut BlobCache,
    ) -> Result<()> {
        if !self.files.contains_key(&from.path) {
            // §4.5: no prior model means treat this as an Insert.
            return self.apply_insert(&to.path, to.content_hash, to.is_submodule(), tag, cache);
        }

        if from.path != to.path {
            let model = self.files.remove(&from.path).expect("checked above");
            self.files.insert(to.path.clone(), model);
            if let Some(private) = self.file_private_counters.remove(&from.path) {
                self.file_private_counters.insert(to.path.clone(), private);
            }
            if let Some(histories) = self.file_histories.remove(&from.path) {
                self.file_histories.insert(to.path.clone(), histories);
            }
        }

        let from_blob = cache.resolve_from(from.content_hash);
        let to_blob = cache.resolve_to(&to.path, to.content_hash, to.is_submodule(), self.config.ignore_missing_submodules)?;

        let Some(edits) = diff_lines(&from_blob.bytes, &to_blob.bytes, !self.config.diff_cleanup_disabled) else {
            // Either side is binary: treat as not-a-text-file and leave
            // the existing model untouched for this commit.
            return Ok(());
        };
        let edits = self.refiner.refine(&to.path, edits, &from_blob.bytes, &to_blob.bytes);

        let old_count = from_blob.line_count().unwrap_or(0) as u64;
        let new_count = to_blob.line_count().unwrap_or(0) as u64;

        let model = self.files.get_mut(&to.path).expect("re-keyed above");
        if model.length() != old_count {
            return Err(HerculesError::InvariantViolation(format!(
                "modify of '{}': line-diff old count {old_count} but model tracks {}",
                to.path,
                model.length()
            )));
        }

        fold_edit_script(model, tag, &edits)?;

        if model.length() != new_count {
            return Err(HerculesError::InvariantViolation(format!(
                "modify of '{}': model length {} does not match line-diff new count {new_count}",
                to.path,
                model.length()
            )));
        }
        Ok(())
    }

    fn snapshot(&mut self, times: u32, current_day: Day) {
        let g = self.config.granularity;
        {
            let global = self.global_counter.borrow();
            let row = group(&global, current_day, g);
            self.global_history.push_repeated(&row, times);
        }

        if self.config.track_files {
            for (path, counter) in &self.file_private_counters {
                let row = group(&counter.borrow(), current_day, g);
                self.file_histories.entry(path.clone()).or_default().push_repeated(&row, times);
            }
            let alive: std::collections::HashSet<&String> = self.file_private_counters.keys().collect();
            self.file_histories.retain(|path, _| alive.contains(path));
        }

        if let Some(people) = &self.people_counter {
            let people = people.borrow();
            for (&author, counter) in &people.people {
                let row = group(counter, current_day, g);
                self.people_histories.entry(author).or_default().push_repeated(&row, times);
            }
        }
    }

    /// §4.5 finalize: one last group-and-snapshot with `delta = 1`, then
    /// rectangularize every history to `global_history`'s final shape and
    /// project the interaction matrix into its export layout.
    ///
    /// Two independent dimensions need normalizing. Rows captured earlier
    /// in the run saw fewer bands than the final snapshot (the band axis
    /// only grows as later days are seen), so `global_history` itself can
    /// be ragged — every row, across every history, is widened with
    /// trailing zero bands to the final band count. Separately, a file or
    /// author that appeared after the run's first sample has fewer rows
    /// than `global_history`; those histories get leading zero rows
    /// prepended up to `global_history`'s sample count (§8 "history
    /// dimension alignment").
    pub fn finalize(mut self) -> BurndownReport {
        self.snapshot(1, self.current_day);

        let width = self.global_history.rows.last().map(Vec::len).unwrap_or(0);
        self.global_history.widen_rows_to(width);
        let samples = self.global_history.sample_count();

        for history in self.file_histories.values_mut() {
            history.widen_rows_to(width);
            history.pad_leading_rows_to(samples, width);
        }
        for history in self.people_histories.values_mut() {
            history.widen_rows_to(width);
            history.pad_leading_rows_to(samples, width);
        }

        let people_matrix = self.matrix.map(|m| export_matrix(&m.borrow())).unwrap_or_default();

        BurndownReport {
            global_history: self.global_history.rows,
            file_histories: self.file_histories.into_iter().map(|(k, v)| (k, v.rows)).collect(),
            people_histories: self.people_histories.into_iter().map(|(k, v)| (k, v.rows)).collect(),
            people_matrix,
        }
    }
}

/// Folds a §4.4 edit script into a sequence of [`FileModel::update`]
/// calls using the §4.5 one-edit look-ahead buffer: a lone `delete` is
/// held until the following edit resolves whether it pairs with an
/// `insert` or must be flushed alone.
fn fold_edit_script(model: &mut FileModel, tag: Tag, edits: &[LineEdit]) -> Result<()> {
    let mut position: u64 = 0;
    let mut pending: Option<u32> = None; // a buffered delete length

    let flush = |model: &mut FileModel, position: u64, pending: &mut Option<u32>| -> Result<u64> {
        match pending.take() {
            Some(del) => {
                model.update(tag, position, 0, del as u64)?;
                Ok(position)
            }
            None => Ok(position),
        }
    };

    for &edit in edits {
        match edit {
            LineEdit::Equal(n) => {
                position = flush(model, position, &mut pending)?;
                position += n as u64;
            }
            LineEdit::Delete(m) => {
                if pending.is_some() {
                    return Err(HerculesError::InvariantViolation(
                        "line-diff edit script has two deletes without an intervening equal/insert".into(),
                    ));
                }
                pending = Some(m);
            }
            LineEdit::Insert(n) => match pending.take() {
                Some(m) => {
                    model.update(tag, position, n as u64, m as u64)?;
                    position += n as u64;
                }
                None => {
                    model.update(tag, position, n as u64, 0)?;
                    position += n as u64;
                }
            },
        }
    }
    flush(model, position, &mut pending)?;
    Ok(())
}

fn export_matrix(matrix: &InteractionMatrix) -> Vec<Vec<i64>> {
    let max_author = matrix
        .rows
        .keys()
        .copied()
        .chain(matrix.rows.values().flat_map(|row| row.keys().copied()))
        .filter(|&a| a != MISSING_AUTHOR && a != crate::ir::SELF_AUTHOR)
        .max();
    let Some(max_author) = max_author else {
        return Vec::new();
    };
    let n = max_author as usize + 1;
    let mut out = vec![vec![0i64; n + 2]; n];

    for (&original, row) in &matrix.rows {
        if original == MISSING_AUTHOR {
            continue;
        }
        let out_row = &mut out[original as usize];
        for (&remover, &count) in row {
            if remover == MISSING_AUTHOR {
                out_row[0] += count;
            } else if remover == crate::ir::SELF_AUTHOR {
                out_row[1] += count;
            } else {
                out_row[2 + remover as usize] += count;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ChangeSide;
    use git2::Repository;

    fn repo_with(content: &[u8]) -> (tempfile::TempDir, Repository, git2::Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let oid = repo.blob(content).unwrap();
        (dir, repo, oid)
    }

    #[test]
    fn insert_then_delete_round_trips_global_counter() {
        let (_dir, repo, oid) = repo_with(b"a\nb\nc\n");
        let mut cache = BlobCache::new(&repo);
        let mut engine = BurndownEngine::new(Config::default());

        let insert = ChangeEntry::new(None, Some(ChangeSide::new("f.txt".into(), oid, 0o100644)));
        engine.process_commit(0, 0, &[insert], &mut cache).unwrap();
        assert_eq!(engine.global_counter.borrow().get(0), 3);

        let delete = ChangeEntry::new(Some(ChangeSide::new("f.txt".into(), oid, 0o100644)), None);
        engine.process_commit(5, 0, std::slice::from_ref(&delete), &mut cache).unwrap();
        assert_eq!(engine.global_counter.borrow().get(0), 0);
        assert!(!engine.files.contains_key("f.txt"));
    }

    #[test]
    fn modify_applies_line_diff_and_updates_counters() {
        let (_dir, repo, old_oid) = repo_with(b"a\nb\nc\n");
        let new_oid = repo.blob(b"a\nb\nc\nd\n").unwrap();
        let mut cache = BlobCache::new(&repo);
        let mut engine = BurndownEngine::new(Config::default());

        let insert = ChangeEntry::new(None, Some(ChangeSide::new("f.txt".into(), old_oid, 0o100644)));
        engine.process_commit(0, 0, &[insert], &mut cache).unwrap();

        let modify = ChangeEntry::new(
            Some(ChangeSide::new("f.txt".into(), old_oid, 0o100644)),
            Some(ChangeSide::new("f.txt".into(), new_oid, 0o100644)),
        );
        engine.process_commit(1, 1, &[modify], &mut cache).unwrap();

        let model = &engine.files["f.txt"];
        assert_eq!(model.length(), 4);
        assert_eq!(engine.global_counter.borrow().get(0), 3);
        assert_eq!(engine.global_counter.borrow().get(1), 1);
    }

    #[test]
    fn finalize_pads_file_histories_to_global_width() {
        let mut cfg = Config::default();
        cfg.track_files = true;
        cfg.granularity = 1;
        cfg.sampling = 1;
        let (_dir, repo, oid) = repo_with(b"a\n");
        let mut cache = BlobCache::new(&repo);
        let mut engine = BurndownEngine::new(cfg);

        // A file created on day 2 sees fewer snapshots than the global history.
        engine
            .process_commit(0, 0, &[ChangeEntry::new(None, Some(ChangeSide::new("x.txt".into(), oid, 0o100644)))], &mut cache)
            .unwrap();
        engine
            .process_commit(2, 0, &[ChangeEntry::new(None, Some(ChangeSide::new("y.txt".into(), oid, 0o100644)))], &mut cache)
            .unwrap();

        let report = engine.finalize();
        let global_width = report.global_history.len();
        let band_width = report.global_history.last().map(Vec::len).unwrap_or(0);
        assert!(report.global_history.iter().all(|row| row.len() == band_width), "global_history is ragged");
        for rows in report.file_histories.values() {
            assert_eq!(rows.len(), global_width, "file history has fewer samples than global_history");
            assert!(rows.iter().all(|row| row.len() == band_width), "file history row is narrower than the final band count");
        }
    }

    #[test]
    fn interaction_matrix_exports_self_and_cross_author_columns() {
        let mut cfg = Config::default();
        cfg.people_number = 2;
        let (_dir, repo, old_oid) = repo_with(b"a\nb\nc\n");
        let new_oid = repo.blob(b"x\ny\nz\n").unwrap();
        let mut cache = BlobCache::new(&repo);
        let mut engine = BurndownEngine::new(cfg);

        engine
            .process_commit(0, 0, &[ChangeEntry::new(None, Some(ChangeSide::new("f.txt".into(), old_oid, 0o100644)))], &mut cache)
            .unwrap();
        engine
            .process_commit(
                1,
                1,
                &[ChangeEntry::new(
                    Some(ChangeSide::new("f.txt".into(), old_oid, 0o100644)),
                    Some(ChangeSide::new("f.txt".into(), new_oid, 0o100644)),
                )],
                &mut cache,
            )
            .unwrap();

        let report = engine.finalize();
        // Author 0's lines were all removed by author 1: row 0, column (2+1)=3.
        assert_eq!(report.people_matrix[0][3], 3);
    }

    #[test]
    fn rename_with_unchanged_content_preserves_tags_and_produces_no_interaction() {
        // §8 scenario 5: day-0 author-0 introduces "A"; day-30 author-1
        // renames "A" -> "B" with identical content. The surviving lines
        // keep their original (author 0, day 0) tag, the burndown total
        // is unaffected, and no cross-author removal is recorded.
        let mut cfg = Config::default();
        cfg.track_files = true;
        cfg.people_number = 2;
        cfg.granularity = 30;
        cfg.sampling = 30;
        let (_dir, repo, oid) = repo_with(b"a\nb\nc\nd\ne\nf\ng\nh\ni\nj\n");
        let mut cache = BlobCache::new(&repo);
        let mut engine = BurndownEngine::new(cfg);

        engine
            .process_commit(0, 0, &[ChangeEntry::new(None, Some(ChangeSide::new("A".into(), oid, 0o100644)))], &mut cache)
            .unwrap();

        let rename = ChangeEntry::new(
            Some(ChangeSide::new("A".into(), oid, 0o100644)),
            Some(ChangeSide::new("B".into(), oid, 0o100644)),
        );
        engine.process_commit(30, 1, &[rename], &mut cache).unwrap();

        assert!(!engine.files.contains_key("A"));
        let model = &engine.files["B"];
        assert_eq!(model.length(), 10);

        let report = engine.finalize();
        assert_eq!(*report.global_history.last().unwrap().iter().next().unwrap(), 10);
        assert!(report.file_histories.contains_key("B"));
        // No line changed author, so no row records a removal of author
        // 0's lines by author 1.
        assert!(report.people_matrix.get(0).map_or(true, |row| row.iter().skip(2).all(|&c| c == 0)));
    }
}
