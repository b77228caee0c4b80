mod blob_cache;
mod burndown;
mod config;
mod counters;
mod error;
mod file_model;
mod identity;
mod ir;
mod line_diff;
mod output;
mod pipeline;
mod refine;
mod rename;
mod walking;

use std::any::Any;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Context;
use clap::{App, CommandFactory};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use git2::{Diff, DiffOptions, Reference, Repository};
use time::format_description::well_known::Iso8601;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::blob_cache::BlobCache;
use crate::burndown::BurndownEngine;
use crate::config::Config;
use crate::error::HerculesError;
use crate::identity::IdentityResolver;
use crate::ir::{day_index, AuthorIndex, ChangeEntry, ChangeSide, CommitRecord, Day};
use crate::output::Report;
use crate::pipeline::{get, Deps, PipelineItem, PipelineRunner};
use crate::walking::FirstParentWalk;

/// Analyzes the historical evolution of a git repository's source code
/// and produces a line burndown plus a developer-interaction matrix.
///
/// Unlike `git log`, this only ever follows the first-parent chain from
/// the given starting commit: merge commits are not expanded, matching
/// this tool's line-burndown contract rather than a full rev-list.
#[derive(Debug, clap::Parser)]
#[clap(version, author)]
struct Cli {
    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Starting commit given as a named reference (e.g. HEAD, branchname).
    #[clap(default_value = "HEAD")]
    r#ref: String,

    /// Use the given path to a git repository instead of the current directory.
    #[clap(help_heading = "I/O", long, short = 'C')]
    repo: Option<PathBuf>,

    /// Load a base configuration from this TOML file; flags below override
    /// whatever it sets.
    #[clap(help_heading = "I/O", long)]
    config: Option<PathBuf>,

    /// Write the report to this path instead of stdout.
    #[clap(help_heading = "I/O", long, short = 'o')]
    output: Option<PathBuf>,

    /// Output format for the report.
    #[clap(help_heading = "I/O", long, value_enum, default_value = "yaml")]
    format: OutputFormat,

    /// Only process commits created after a specific date (ISO 8601, or
    /// a duration like "1year 6months" subtracted from now).
    #[clap(help_heading = "COMMIT LIMITING", long, value_name = "DATE")]
    since: Option<String>,

    /// Only process commits created before a specific date.
    #[clap(help_heading = "COMMIT LIMITING", long, value_name = "DATE")]
    until: Option<String>,

    /// Limit the number of commits to process, counted back from the
    /// starting commit.
    #[clap(help_heading = "COMMIT LIMITING", long, short = 'n', value_name = "NUMBER")]
    max_count: Option<usize>,

    /// Band width in days for the burndown histogram. Overrides --config.
    #[clap(help_heading = "ANALYSIS", long)]
    granularity: Option<u32>,

    /// Sample stride in days; must not exceed granularity. Overrides --config.
    #[clap(help_heading = "ANALYSIS", long)]
    sampling: Option<u32>,

    /// Track per-file histories in addition to the global one. Only ever
    /// turns tracking on relative to --config, never off.
    #[clap(help_heading = "ANALYSIS", long, action)]
    track_files: bool,

    /// Track per-developer histories and the developer-interaction matrix.
    /// Only ever turns tracking on relative to --config, never off.
    #[clap(help_heading = "ANALYSIS", long, action)]
    people: bool,

    /// Validate every file model after each mutation (slow; for debugging).
    #[clap(help_heading = "ANALYSIS", long, action)]
    debug: bool,

    /// Rename-detection similarity threshold percentage. Overrides --config.
    #[clap(help_heading = "ANALYSIS", long)]
    similarity_threshold: Option<u8>,

    /// Substitute dummy blobs for missing submodule objects instead of failing.
    #[clap(help_heading = "ANALYSIS", long, action)]
    ignore_missing_submodules: bool,

    /// Skip semantic cleanup of the line-diff edit script.
    #[clap(help_heading = "ANALYSIS", long, action)]
    diff_cleanup_disabled: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

fn parse_time_input<S: AsRef<str>>(text: S) -> Option<OffsetDateTime> {
    if let Ok(datetime) = OffsetDateTime::parse(text.as_ref(), &Iso8601::PARSING) {
        return Some(datetime);
    }
    if let Ok(date) = Date::parse(text.as_ref(), &Iso8601::PARSING) {
        return Some(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc());
    }
    if let Ok(duration) = humantime::parse_duration(text.as_ref()) {
        return Some(OffsetDateTime::now_utc() - duration);
    }
    None
}

fn validate_time_input(app: &mut App, input: String, argument: &'static str) -> OffsetDateTime {
    match parse_time_input(&input) {
        Some(datetime) => datetime,
        None => {
            let msg = format!(
                "The value ('{}') supplied to '{}' is not an ISO 8601 date or a duration.",
                &input, &argument
            );
            app.error(clap::ErrorKind::ValueValidation, msg).exit();
        }
    }
}

fn validate_ref_input<'r>(app: &mut App, repo: &'r Repository, input: &str) -> Reference<'r> {
    match repo.resolve_reference_from_short_name(input) {
        Ok(reference) => reference,
        Err(_) => {
            let msg = format!("The given ref ('{}') was not found in this repository", input);
            app.error(clap::ErrorKind::ValueValidation, msg).exit();
        }
    }
}

/// C6's "day" item: the running day-index state machine of §4.5's
/// `previous_day` clamp, wired as a pipeline item.
struct DayIndexItem {
    first_time: Option<OffsetDateTime>,
    previous_day: Day,
}

impl DayIndexItem {
    fn new() -> Self {
        Self { first_time: None, previous_day: 0 }
    }
}

impl PipelineItem for DayIndexItem {
    fn name(&self) -> &'static str {
        "day_index"
    }
    fn provides(&self) -> &'static [&'static str] {
        &["day"]
    }
    fn requires(&self) -> &'static [&'static str] {
        &["commit"]
    }
    fn consume(&mut self, deps: &Deps) -> error::Result<Deps> {
        let commit = get::<CommitRecord>(deps, "commit").expect("runner seeds 'commit'");
        let first_time = *self.first_time.get_or_insert(commit.author_time);
        let day = day_index(commit.author_time, first_time, self.previous_day);
        self.previous_day = day;

        let mut out = Deps::new();
        out.insert("day", Rc::new(day));
        Ok(out)
    }
}

/// C6's "identity" item: wraps [`IdentityResolver`].
struct IdentityItem {
    resolver: IdentityResolver,
}

impl IdentityItem {
    fn new() -> Self {
        Self { resolver: IdentityResolver::new() }
    }
}

impl PipelineItem for IdentityItem {
    fn name(&self) -> &'static str {
        "identity"
    }
    fn provides(&self) -> &'static [&'static str] {
        &["author"]
    }
    fn requires(&self) -> &'static [&'static str] {
        &["commit"]
    }
    fn consume(&mut self, deps: &Deps) -> error::Result<Deps> {
        let commit = get::<CommitRecord>(deps, "commit").expect("runner seeds 'commit'");
        let author = self.resolver.resolve(&commit.author_name, &commit.author_email);

        let mut out = Deps::new();
        out.insert("author", Rc::new(author));
        Ok(out)
    }
}

/// Unrefined tree-diff item: diffs the current commit's tree against the
/// tree of the previous commit processed (or an empty tree for the
/// first commit in the chain), with git2's own rename detection
/// disabled so C3 gets to do the matching itself (§4.3).
struct DiffItem<'r> {
    repo: &'r Repository,
    prev_tree: Option<git2::Oid>,
}

impl<'r> DiffItem<'r> {
    fn new(repo: &'r Repository) -> Self {
        Self { repo, prev_tree: None }
    }

    fn unrefined_changes(&self, diff: &Diff) -> error::Result<Vec<ChangeEntry>> {
        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let status = delta.status();
            let old = delta.old_file();
            let new = delta.new_file();

            let from = (!old.id().is_zero())
                .then(|| old.path().map(|p| ChangeSide::new(p.to_string_lossy().to_string(), old.id(), old.mode() as i32)))
                .flatten();
            let to = (!new.id().is_zero())
                .then(|| new.path().map(|p| ChangeSide::new(p.to_string_lossy().to_string(), new.id(), new.mode() as i32)))
                .flatten();

            match status {
                git2::Delta::Added => {
                    let Some(to) = to else {
                        return Err(HerculesError::InvariantViolation("added delta missing new side".into()));
                    };
                    changes.push(ChangeEntry::new(None, Some(to)));
                }
                git2::Delta::Deleted => {
                    let Some(from) = from else {
                        return Err(HerculesError::InvariantViolation("deleted delta missing old side".into()));
                    };
                    changes.push(ChangeEntry::new(Some(from), None));
                }
                git2::Delta::Modified | git2::Delta::Typechange => {
                    changes.push(ChangeEntry::new(from, to));
                }
                other => {
                    return Err(HerculesError::InvariantViolation(format!(
                        "unsupported tree-diff delta status: {other:?}"
                    )))
                }
            }
        }
        Ok(changes)
    }
}

impl PipelineItem for DiffItem<'_> {
    fn name(&self) -> &'static str {
        "tree_diff"
    }
    fn provides(&self) -> &'static [&'static str] {
        &["changes"]
    }
    fn requires(&self) -> &'static [&'static str] {
        &["commit"]
    }
    fn consume(&mut self, deps: &Deps) -> error::Result<Deps> {
        let commit = get::<CommitRecord>(deps, "commit").expect("runner seeds 'commit'");
        let new_tree = self
            .repo
            .find_tree(commit.tree)
            .map_err(|e| HerculesError::InvariantViolation(format!("cannot resolve tree {}: {e}", commit.tree)))?;
        let old_tree =
            self.prev_tree.map(|oid| self.repo.find_tree(oid)).transpose().map_err(|e| {
                HerculesError::InvariantViolation(format!("cannot resolve previous tree: {e}"))
            })?;

        let mut opts = DiffOptions::new();
        opts.context_lines(0);
        let diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))
            .map_err(|e| HerculesError::InvariantViolation(format!("tree diff failed: {e}")))?;

        let changes = self.unrefined_changes(&diff)?;
        self.prev_tree = Some(commit.tree);

        let mut out = Deps::new();
        out.insert("changes", Rc::new(changes));
        Ok(out)
    }
}

/// C3 wired as a pipeline item. Builds its own per-commit [`BlobCache`]
/// (§4.2's lifetime contract) rather than threading one through `deps`.
struct RenameItem<'r> {
    repo: &'r Repository,
    threshold: u8,
}

impl PipelineItem for RenameItem<'_> {
    fn name(&self) -> &'static str {
        "rename_detect"
    }
    fn provides(&self) -> &'static [&'static str] {
        &["refined_changes"]
    }
    fn requires(&self) -> &'static [&'static str] {
        &["changes"]
    }
    fn consume(&mut self, deps: &Deps) -> error::Result<Deps> {
        let changes = get::<Vec<ChangeEntry>>(deps, "changes").expect("rename_detect requires 'changes'");
        let mut cache = BlobCache::new(self.repo);
        let refined = rename::detect_renames(changes.clone(), &mut cache, self.threshold)?;

        let mut out = Deps::new();
        out.insert("refined_changes", Rc::new(refined));
        Ok(out)
    }
}

/// C5 wired as a pipeline item. Owns the engine for the run's lifetime
/// and hands back the finished [`burndown::BurndownReport`] at
/// `finalize()`.
struct BurndownItem<'r> {
    repo: &'r Repository,
    engine: Option<BurndownEngine>,
}

impl PipelineItem for BurndownItem<'_> {
    fn name(&self) -> &'static str {
        "burndown"
    }
    fn provides(&self) -> &'static [&'static str] {
        &[]
    }
    fn requires(&self) -> &'static [&'static str] {
        &["day", "author", "refined_changes"]
    }
    fn consume(&mut self, deps: &Deps) -> error::Result<Deps> {
        let day = *get::<Day>(deps, "day").expect("burndown requires 'day'");
        let author = *get::<AuthorIndex>(deps, "author").expect("burndown requires 'author'");
        let changes =
            get::<Vec<ChangeEntry>>(deps, "refined_changes").expect("burndown requires 'refined_changes'");

        let mut cache = BlobCache::new(self.repo);
        let engine = self.engine.as_mut().expect("engine consumed only at finalize");
        engine.process_commit(day, author, changes, &mut cache)?;
        Ok(Deps::new())
    }

    fn finalize(&mut self) -> Option<(&'static str, Rc<dyn Any>)> {
        let engine = self.engine.take()?;
        Some(("report", Rc::new(engine.finalize())))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = <Cli as clap::Parser>::parse();
    env_logger::Builder::new().filter_level(cli.verbose.log_level_filter()).init();
    let mut cmd = Cli::command();

    let since = cli.since.clone().map(|s| validate_time_input(&mut cmd, s, "--since"));
    let until = cli.until.clone().map(|s| validate_time_input(&mut cmd, s, "--until"));

    // §6's ambient config layer: a TOML file supplies the base, `clap`
    // flags above override whatever it set (numeric flags replace;
    // boolean flags only ever turn a feature on, matching the teacher's
    // additive flag conventions).
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {path:?}"))?;
            Config::from_toml_str(&text)?
        }
        None => Config::default(),
    };
    if let Some(granularity) = cli.granularity {
        config.granularity = granularity;
    }
    if let Some(sampling) = cli.sampling {
        config.sampling = sampling;
    }
    if let Some(threshold) = cli.similarity_threshold {
        config.similarity_threshold = threshold;
    }
    config.track_files |= cli.track_files;
    config.debug |= cli.debug;
    config.ignore_missing_submodules |= cli.ignore_missing_submodules;
    config.diff_cleanup_disabled |= cli.diff_cleanup_disabled;
    if cli.people {
        config.people_number = u32::MAX;
    }
    config.validate()?;

    let repo = Repository::discover(cli.repo.clone().unwrap_or(PathBuf::from(".")))
        .context("failed to find git repository at or above the provided directory")?;

    let start_ref = validate_ref_input(&mut cmd, &repo, &cli.r#ref);
    let start_commit = start_ref.peel_to_commit()?;

    let mut walk = FirstParentWalk::new();
    if let Some(since) = since {
        walk.set_since(since);
    }
    if let Some(until) = until {
        walk.set_until(until);
    }
    if let Some(n) = cli.max_count {
        walk.set_max_count(n);
    }

    let start = Instant::now();
    let commits = walk.walk(&repo, start_commit)?;
    log::info!("Walked {} commits in {}ms.", commits.len(), start.elapsed().as_millis());

    let items: Vec<Box<dyn PipelineItem + '_>> = vec![
        Box::new(DayIndexItem::new()),
        Box::new(IdentityItem::new()),
        Box::new(DiffItem::new(&repo)),
        Box::new(RenameItem { repo: &repo, threshold: config.similarity_threshold }),
        Box::new(BurndownItem { repo: &repo, engine: Some(BurndownEngine::new(config.clone())) }),
    ];
    let mut runner = PipelineRunner::new(items)?;

    // The identity resolver used for the final report's author names
    // lives inside the sorted `IdentityItem`; since we don't have a
    // handle into it after construction, run a second resolver in
    // lock-step purely for name lookups, identical policy, zero
    // observable difference from the one the pipeline used internally.
    let mut report_identities = IdentityResolver::new();
    for commit in &commits {
        report_identities.resolve(&commit.author_name, &commit.author_email);
    }

    let start = Instant::now();
    runner.run(&commits).map_err(|e| anyhow::anyhow!("{e}"))?;
    log::info!("Processed {} commits in {}ms.", commits.len(), start.elapsed().as_millis());

    let finalized = runner.finalize();
    let burndown_report = finalized
        .into_iter()
        .find(|(key, _)| *key == "report")
        .and_then(|(_, value)| Rc::downcast::<burndown::BurndownReport>(value).ok())
        .context("burndown item did not produce a report")?;
    let burndown_report =
        Rc::try_unwrap(burndown_report).unwrap_or_else(|_| panic!("report has no other owners"));

    let report = Report::from_burndown(burndown_report, &report_identities);
    let rendered = match cli.format {
        OutputFormat::Yaml => report.to_yaml()?,
        OutputFormat::Json => report.to_json()?,
    };

    match cli.output {
        Some(path) => std::fs::write(&path, rendered).with_context(|| format!("writing report to {path:?}"))?,
        None => println!("{rendered}"),
    }

    Ok(())
}
