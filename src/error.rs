use thiserror::Error;

/// The error kinds of §7: everything the core can fail with.
///
/// `Binary` is special: it is absorbed locally by whichever component
/// detects it (the affected path is treated as not-a-text-file) and
/// should rarely escape to a caller. Everything else propagates to the
/// pipeline runner, which aborts the run.
#[derive(Debug, Error)]
pub enum HerculesError {
    #[error("blob for path '{path}' is not valid UTF-8")]
    Binary { path: String },

    #[error("blob {hash} referenced by '{path}' could not be resolved")]
    MissingBlob { path: String, hash: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pipeline items form a dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("more than one item provides '{key}': {providers}")]
    AmbiguousProvider { key: String, providers: String },
}

pub type Result<T> = std::result::Result<T, HerculesError>;

/// Annotates a fatal error with the commit it happened on, per §7's
/// policy that the runner reports item name, commit index, and commit id.
#[derive(Debug, Error)]
#[error("commit {index} ({id}): item '{item}' failed: {source}")]
pub struct CommitError {
    pub item: String,
    pub index: usize,
    pub id: String,
    #[source]
    pub source: HerculesError,
}
