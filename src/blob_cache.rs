//! C2: resolves content-hashes referenced by the current commit's change
//! list into bytes, over a single `git2::Repository`.
//!
//! Lives for exactly one commit (§4.2, §5): the burndown engine creates
//! one, drains it while processing the commit's refined change list, and
//! drops it.

use std::collections::HashMap;
use std::rc::Rc;

use git2::{Oid, Repository};

use crate::error::{HerculesError, Result};
use crate::ir::Blob;

pub struct BlobCache<'repo> {
    repo: &'repo Repository,
    cache: HashMap<Oid, Rc<Blob>>,
}

impl<'repo> BlobCache<'repo> {
    pub fn new(repo: &'repo Repository) -> Self {
        Self { repo, cache: HashMap::new() }
    }

    fn load(&mut self, hash: Oid) -> std::result::Result<Rc<Blob>, ()> {
        if let Some(blob) = self.cache.get(&hash) {
            return Ok(blob.clone());
        }
        let blob = self.repo.find_blob(hash).map_err(|_| ())?;
        let blob = Rc::new(Blob::new(hash, blob.content().to_vec()));
        self.cache.insert(hash, blob.clone());
        Ok(blob)
    }

    /// Resolves the `To` side of an `Insert`/`Modify` (§4.2). A missing
    /// hash is tolerated only when the tree entry marks a submodule, or
    /// `ignore_missing_submodules` is set (which silences the lookup
    /// entirely rather than also consulting `.gitmodules`).
    pub fn resolve_to(
        &mut self,
        path: &str,
        hash: Oid,
        is_submodule: bool,
        ignore_missing_submodules: bool,
    ) -> Result<Rc<Blob>> {
        match self.load(hash) {
            Ok(blob) => Ok(blob),
            Err(()) if is_submodule || ignore_missing_submodules => Ok(Rc::new(Blob::dummy())),
            Err(()) => Err(HerculesError::MissingBlob { path: path.to_string(), hash: hash.to_string() }),
        }
    }

    /// Resolves the `From` side of a `Delete`/`Modify` (§4.2). Deletions
    /// tolerate absent source bytes unconditionally: a missing blob
    /// degrades to the dummy blob rather than failing the commit.
    pub fn resolve_from(&mut self, hash: Oid) -> Rc<Blob> {
        self.load(hash).unwrap_or_else(|()| Rc::new(Blob::dummy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_with_blob(content: &[u8]) -> (tempfile::TempDir, Repository, Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let oid = repo.blob(content).unwrap();
        (dir, repo, oid)
    }

    #[test]
    fn resolves_and_caches_an_existing_blob() {
        let (_dir, repo, oid) = repo_with_blob(b"hello\nworld\n");
        let mut cache = BlobCache::new(&repo);
        let first = cache.resolve_to("a.txt", oid, false, false).unwrap();
        let second = cache.resolve_to("a.txt", oid, false, false).unwrap();
        assert_eq!(first.bytes, b"hello\nworld\n");
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_to_blob_is_fatal_when_not_a_submodule() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut cache = BlobCache::new(&repo);
        let bogus = Oid::zero();
        let err = cache.resolve_to("a.txt", bogus, false, false).unwrap_err();
        assert!(matches!(err, HerculesError::MissingBlob { .. }));
    }

    #[test]
    fn missing_to_blob_is_dummy_when_submodule() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut cache = BlobCache::new(&repo);
        let bogus = Oid::zero();
        let blob = cache.resolve_to("vendor/sub", bogus, true, false).unwrap();
        assert!(blob.is_dummy());
    }

    #[test]
    fn missing_from_blob_degrades_to_dummy() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut cache = BlobCache::new(&repo);
        let bogus = Oid::zero();
        let blob = cache.resolve_from(bogus);
        assert!(blob.is_dummy());
    }
}
