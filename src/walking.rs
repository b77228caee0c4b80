//! First-parent commit walk: the concrete VCS driver spec.md's §1 leaves
//! external, restricted to the single linear parent chain the core
//! requires (§1 Non-goals: "neither interprets merges nor inspects more
//! than the one linear parent chain supplied to it").
//!
//! Adapted from the teacher's `CommitWalk`/`RefGlobKind` (which drove a
//! general multi-ref `git2::Revwalk`) down to the narrower contract this
//! spec actually needs: start at one commit and always take parent #0,
//! optionally bounded by a date range and a maximum count, yielding
//! commits oldest-first the way the burndown engine needs to process
//! them.

use git2::{Commit, Repository};
use time::{OffsetDateTime, UtcOffset};

use crate::ir::CommitRecord;

#[derive(Debug, Clone, Default)]
pub struct FirstParentWalk {
    since: Option<OffsetDateTime>,
    until: Option<OffsetDateTime>,
    max_count: Option<usize>,
}

impl FirstParentWalk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_since(&mut self, since: OffsetDateTime) {
        self.since = Some(since);
    }

    pub fn set_until(&mut self, until: OffsetDateTime) {
        self.until = Some(until);
    }

    pub fn set_max_count(&mut self, max_count: usize) {
        self.max_count = Some(max_count);
    }

    /// Walks backward from `start` taking parent #0 at every step,
    /// applying the since/until/max-count filters the same way the
    /// teacher's `CommitWalkIterator` did, then reverses the result so
    /// callers receive the chain oldest-first (the order the burndown
    /// engine's day index assumes).
    pub fn walk<'r>(&self, repo: &'r Repository, start: Commit<'r>) -> anyhow::Result<Vec<CommitRecord>> {
        let mut chain = Vec::new();
        let mut current = Some(start);

        while let Some(commit) = current {
            if chain.len() >= self.max_count.unwrap_or(usize::MAX) {
                break;
            }

            let commit_time = time_of(&commit)?;
            let past_since = self.since.map(|s| commit_time >= s).unwrap_or(true);
            if !past_since {
                break;
            }

            let before_until = self.until.map(|u| commit_time <= u).unwrap_or(true);
            current = commit.parent(0).ok();
            if !before_until {
                continue;
            }

            chain.push(to_commit_record(repo, &commit, commit_time)?);
        }

        chain.reverse();
        Ok(chain)
    }
}

fn time_of(commit: &Commit) -> anyhow::Result<OffsetDateTime> {
    let commit_time = commit.time();
    let datetime = OffsetDateTime::from_unix_timestamp(commit_time.seconds())?;
    let offset = UtcOffset::from_whole_seconds(commit_time.offset_minutes() * 60)?;
    Ok(datetime.replace_offset(offset))
}

fn to_commit_record(_repo: &Repository, commit: &Commit, time: OffsetDateTime) -> anyhow::Result<CommitRecord> {
    let author = commit.author();
    Ok(CommitRecord::new(
        commit.id(),
        author.name().unwrap_or("").to_string(),
        author.email().unwrap_or("").to_string(),
        time,
        commit.tree_id(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit(repo: &Repository, parent: Option<&Commit>, msg: &str, time: i64) -> git2::Oid {
        let sig = Signature::new("A", "a@example.com", &git2::Time::new(time, 0)).unwrap();
        let tree_oid = {
            let tree_builder = repo.treebuilder(None).unwrap();
            tree_builder.write().unwrap()
        };
        let tree = repo.find_tree(tree_oid).unwrap();
        let parents: Vec<&Commit> = parent.into_iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parents).unwrap()
    }

    #[test]
    fn walks_linear_chain_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, None, "first", 1000);
        let c1 = repo.find_commit(c1).unwrap();
        let c2 = commit(&repo, Some(&c1), "second", 2000);
        let c2 = repo.find_commit(c2).unwrap();

        let walk = FirstParentWalk::new();
        let chain = walk.walk(&repo, c2.clone()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, c1.id());
        assert_eq!(chain[1].id, c2.id());
    }

    #[test]
    fn max_count_limits_from_the_tip_backward() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, None, "first", 1000);
        let c1 = repo.find_commit(c1).unwrap();
        let c2 = commit(&repo, Some(&c1), "second", 2000);
        let c2 = repo.find_commit(c2).unwrap();

        let mut walk = FirstParentWalk::new();
        walk.set_max_count(1);
        let chain = walk.walk(&repo, c2.clone()).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].id, c2.id());
    }
}
