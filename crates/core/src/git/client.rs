//! Local Git repository operations via `git2`.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Instant;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Commit, Cred, ErrorCode, FetchOptions, Index, IndexEntry, IndexTime, Oid, PushOptions,
    RemoteCallbacks, Repository, RepositoryInitOptions, Signature, Status, StatusOptions, Tree,
};
use tracing::{debug, info, instrument, warn};

use super::engine::{
    Author, Credentials, MergeAnalysis, MergeSides, PathResolution, RepositoryEngine,
};
use crate::errors::GitError;

/// Branch created by [`GitEngine::init`].
pub const DEFAULT_BRANCH: &str = "main";

const FILE_MODE: u32 = 0o100644;

/// An in-memory merge of a fetched tip into HEAD.
struct PendingMerge {
    index: Index,
    base: Option<Oid>,
    local: Oid,
    remote: Oid,
}

/// [`RepositoryEngine`] over a `git2::Repository` with a working copy.
pub struct GitEngine {
    repo: Repository,
    workdir: PathBuf,
    merge: Option<PendingMerge>,
}

impl GitEngine {
    /// Open an existing working copy.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Self::from_repo(repo, path)
    }

    /// Create a repository at `path` on [`DEFAULT_BRANCH`], optionally with
    /// a remote named `remote` pointing at `url`.
    #[instrument(fields(path = %path.display()))]
    pub fn init(path: &Path, remote: &str, url: Option<&str>) -> Result<Self, GitError> {
        info!("initializing git repository");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(DEFAULT_BRANCH);
        let repo = Repository::init_opts(path, &opts)?;
        if let Some(url) = url {
            repo.remote(remote, url)?;
            debug!(remote, url, "remote added");
        }
        Self::from_repo(repo, path)
    }

    /// Clone `url` into `path`.
    #[instrument(skip(credentials), fields(path = %path.display()))]
    pub fn clone(url: &str, path: &Path, credentials: &Credentials) -> Result<Self, GitError> {
        info!("cloning git repository");
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(credentials));
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        let repo = builder.clone(url, path)?;
        info!("clone completed");
        Self::from_repo(repo, path)
    }

    fn from_repo(repo: Repository, path: &Path) -> Result<Self, GitError> {
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::NoWorkdir(path.display().to_string()))?;
        Ok(Self {
            repo,
            workdir,
            merge: None,
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Full name of the branch HEAD points at, born or not.
    fn head_ref_name(&self) -> Result<String, GitError> {
        let head = self.repo.find_reference("HEAD")?;
        head.symbolic_target()
            .map(str::to_string)
            .ok_or_else(|| GitError::RefNotFound("HEAD is detached".into()))
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn pending(&self) -> Result<&PendingMerge, GitError> {
        self.merge.as_ref().ok_or(GitError::NoMergeInProgress)
    }

    fn checkout(&self, tree: &Tree<'_>) -> Result<(), GitError> {
        // Safe mode skips files with local edits instead of overwriting them.
        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true);
        self.repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;

        let mut index = self.repo.index()?;
        index.read_tree(tree)?;
        index.write()?;
        Ok(())
    }

    fn blob_in_tree(&self, tree: &Tree<'_>, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some(self.repo.find_blob(entry.id())?.content().to_vec())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Oid and mode of `path` in the tree of `commit`.
    fn tree_entry(&self, commit: Oid, path: &str) -> Result<Option<(Oid, u32)>, GitError> {
        let tree = self.repo.find_commit(commit)?.tree()?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some((entry.id(), entry.filemode() as u32))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn signature(author: &Author) -> Result<Signature<'static>, GitError> {
        Ok(Signature::now(&author.name, &author.email)?)
    }
}

impl RepositoryEngine for GitEngine {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn current_branch(&self) -> Result<String, GitError> {
        let name = self.head_ref_name()?;
        Ok(name
            .strip_prefix("refs/heads/")
            .map(str::to_string)
            .unwrap_or(name))
    }

    fn head(&self) -> Result<Option<String>, GitError> {
        Ok(self.head_commit()?.map(|c| c.id().to_string()))
    }

    #[instrument(skip(self, credentials))]
    fn fetch_all(&self, credentials: &Credentials) -> Result<(), GitError> {
        let remotes = self.repo.remotes()?;
        for name in remotes.iter().flatten() {
            info!(remote = name, "fetching");
            let mut remote = self.repo.find_remote(name)?;
            let mut fetch_opts = FetchOptions::new();
            fetch_opts.remote_callbacks(remote_callbacks(credentials));
            remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        }
        debug!("fetch completed");
        Ok(())
    }

    fn remote_tip(&self, remote: &str, branch: &str) -> Result<Option<String>, GitError> {
        let name = format!("refs/remotes/{remote}/{branch}");
        match self.repo.find_reference(&name) {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?.id().to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_blob(&self, commit: &str, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let tree = self.repo.find_commit(Oid::from_str(commit)?)?.tree()?;
        self.blob_in_tree(&tree, path)
    }

    fn analyze(&self, tip: &str) -> Result<MergeAnalysis, GitError> {
        let annotated = self.repo.find_annotated_commit(Oid::from_str(tip)?)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;
        let result = if analysis.is_up_to_date() {
            MergeAnalysis::UpToDate
        } else if analysis.is_fast_forward() || analysis.is_unborn() {
            MergeAnalysis::FastForward
        } else {
            MergeAnalysis::Normal
        };
        debug!(tip, ?result, "merge analysis");
        Ok(result)
    }

    #[instrument(skip(self))]
    fn fast_forward(&self, tip: &str) -> Result<(), GitError> {
        let oid = Oid::from_str(tip)?;
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let head_ref = self.head_ref_name()?;

        self.checkout(&tree)?;
        self.repo
            .reference(&head_ref, oid, true, "megsync: fast-forward")?;
        info!(branch = %head_ref, "fast-forwarded");
        Ok(())
    }

    fn changed_paths(&self) -> Result<Vec<String>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut paths = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            if status == Status::CURRENT || status.is_ignored() {
                continue;
            }
            let path = entry
                .path()
                .ok_or_else(|| GitError::InvalidPath(String::from_utf8_lossy(entry.path_bytes()).into_owned()))?;
            paths.push(path.to_string());
        }
        paths.sort();
        paths.dedup();
        debug!(count = paths.len(), "changed paths");
        Ok(paths)
    }

    fn stage(&self, paths: &[String]) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        match self.head_commit()? {
            Some(head) => index.read_tree(&head.tree()?)?,
            None => index.clear()?,
        }
        for path in paths {
            let rel = Path::new(path);
            if self.workdir.join(rel).symlink_metadata().is_ok() {
                index.add_path(rel)?;
            } else {
                ignore_not_found(index.remove_path(rel))?;
            }
        }
        index.write()?;
        debug!(count = paths.len(), "paths staged");
        Ok(())
    }

    #[instrument(skip(self, author))]
    fn commit_index(&self, message: &str, author: &Author) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;
        let sig = Self::signature(author)?;
        let parent = self.head_commit()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        info!(sha = %oid, "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self))]
    fn start_merge(&mut self, tip: &str) -> Result<Vec<MergeSides>, GitError> {
        let (index, base, local, remote) = {
            let local = self
                .head_commit()?
                .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?;
            let remote = self.repo.find_commit(Oid::from_str(tip)?)?;
            let base = match self.repo.merge_base(local.id(), remote.id()) {
                Ok(oid) => Some(oid),
                Err(e) if e.code() == ErrorCode::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            let index = self.repo.merge_commits(&local, &remote, None)?;
            (index, base, local.id(), remote.id())
        };

        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict
                .our
                .or(conflict.their)
                .or(conflict.ancestor);
            if let Some(entry) = entry {
                let path = String::from_utf8(entry.path)
                    .map_err(|e| GitError::InvalidPath(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
                paths.push(path);
            }
        }
        paths.sort();
        paths.dedup();

        self.merge = Some(PendingMerge {
            index,
            base,
            local,
            remote,
        });
        info!(conflicts = paths.len(), "merge started");

        paths.iter().map(|p| self.merge_sides(p)).collect()
    }

    fn merge_sides(&self, path: &str) -> Result<MergeSides, GitError> {
        let pending = self.pending()?;
        let blob_at = |commit: Option<Oid>| -> Result<Option<Vec<u8>>, GitError> {
            match commit {
                Some(oid) => self.blob_in_tree(&self.repo.find_commit(oid)?.tree()?, path),
                None => Ok(None),
            }
        };
        Ok(MergeSides {
            path: path.to_string(),
            ancestor: blob_at(pending.base)?,
            local: blob_at(Some(pending.local))?,
            remote: blob_at(Some(pending.remote))?,
        })
    }

    fn merged_blob(&self, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let pending = self.pending()?;
        match pending.index.get_path(Path::new(path), 0) {
            Some(entry) => Ok(Some(self.repo.find_blob(entry.id)?.content().to_vec())),
            None => Ok(None),
        }
    }

    fn resolve(&mut self, path: &str, resolution: PathResolution) -> Result<(), GitError> {
        let (local, remote) = {
            let pending = self.pending()?;
            (pending.local, pending.remote)
        };
        let chosen = match &resolution {
            PathResolution::Local => self.tree_entry(local, path)?,
            PathResolution::Remote => self.tree_entry(remote, path)?,
            PathResolution::Content(_) => None,
        };
        let mode = match chosen {
            Some((_, mode)) => mode,
            None => self
                .tree_entry(local, path)?
                .map_or(FILE_MODE, |(_, mode)| mode),
        };

        let repo = &self.repo;
        let pending = self.merge.as_mut().ok_or(GitError::NoMergeInProgress)?;
        let rel = Path::new(path);
        ignore_not_found(pending.index.conflict_remove(rel))?;

        match (resolution, chosen) {
            // The merge index has no owning repository, so blobs are written
            // to the object database before being added.
            (PathResolution::Content(bytes), _) => {
                let oid = repo.blob(&bytes)?;
                pending.index.add(&index_entry(path, oid, mode, bytes.len()))?;
            }
            (_, Some((oid, _))) => {
                let size = repo.find_blob(oid)?.size();
                pending.index.add(&index_entry(path, oid, mode, size))?;
            }
            (_, None) => {
                ignore_not_found(pending.index.remove(rel, 0))?;
            }
        }
        debug!(path, "merge path resolved");
        Ok(())
    }

    fn conflict_count(&self) -> Result<usize, GitError> {
        Ok(self.pending()?.index.conflicts()?.count())
    }

    #[instrument(skip(self, author))]
    fn commit_merge(&mut self, message: &str, author: &Author) -> Result<String, GitError> {
        let mut pending = self.merge.take().ok_or(GitError::NoMergeInProgress)?;
        let tree = self.repo.find_tree(pending.index.write_tree_to(&self.repo)?)?;
        let local = self.repo.find_commit(pending.local)?;
        let remote = self.repo.find_commit(pending.remote)?;

        self.checkout(&tree)?;
        let sig = Self::signature(author)?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&local, &remote])?;
        info!(sha = %oid, "merge committed");
        Ok(oid.to_string())
    }

    fn abort_merge(&mut self) {
        if self.merge.take().is_some() {
            debug!("pending merge dropped");
        }
    }

    #[instrument(skip(self, credentials))]
    fn push(&self, remote: &str, branch: &str, credentials: &Credentials) -> Result<(), GitError> {
        info!("pushing");
        let mut git_remote = self.repo.find_remote(remote)?;
        let rejection = RefCell::new(None::<String>);
        let mut callbacks = remote_callbacks(credentials);
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *rejection.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        git_remote.push(&[&refspec], Some(&mut push_opts))?;
        drop(push_opts);

        if let Some(detail) = rejection.into_inner() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }
}

fn remote_callbacks(credentials: &Credentials) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(password) = credentials.password.as_deref() {
        let username = credentials.username.as_str();
        callbacks.credentials(move |_url, url_user, _allowed| {
            Cred::userpass_plaintext(url_user.unwrap_or(username), password)
        });
    }
    if let Some(deadline) = credentials.deadline {
        // Returning false from a progress callback cancels the transfer.
        callbacks.transfer_progress(move |_| Instant::now() < deadline);
        callbacks.sideband_progress(move |_| Instant::now() < deadline);
        callbacks.push_negotiation(move |_| {
            if Instant::now() < deadline {
                Ok(())
            } else {
                Err(git2::Error::from_str("deadline exceeded before upload"))
            }
        });
    }
    callbacks
}

fn index_entry(path: &str, id: Oid, mode: u32, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: u32::try_from(size).unwrap_or(u32::MAX),
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

fn ignore_not_found(result: Result<(), git2::Error>) -> Result<(), GitError> {
    match result {
        Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
        other => Ok(other?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author::new("Test", "test@test.com")
    }

    fn engine_with_commit(dir: &Path) -> GitEngine {
        let engine = GitEngine::init(dir, "origin", None).unwrap();
        std::fs::write(dir.join("hello.txt"), "hello world").unwrap();
        engine.stage(&["hello.txt".to_string()]).unwrap();
        engine.commit_index("initial commit", &author()).unwrap();
        engine
    }

    #[test]
    fn test_init_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let engine = GitEngine::init(dir.path(), "origin", None).unwrap();
        assert_eq!(engine.head().unwrap(), None);
        assert_eq!(engine.current_branch().unwrap(), DEFAULT_BRANCH);

        std::fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
        assert_eq!(engine.changed_paths().unwrap(), vec!["hello.txt"]);
        engine.stage(&["hello.txt".to_string()]).unwrap();
        let sha = engine.commit_index("initial commit", &author()).unwrap();
        assert_eq!(engine.head().unwrap(), Some(sha));
        assert!(engine.changed_paths().unwrap().is_empty());
    }

    #[test]
    fn test_stage_only_given_paths() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_commit(dir.path());
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::remove_file(dir.path().join("hello.txt")).unwrap();

        assert_eq!(
            engine.changed_paths().unwrap(),
            vec!["a.txt", "b.txt", "hello.txt"]
        );
        engine
            .stage(&["a.txt".to_string(), "hello.txt".to_string()])
            .unwrap();
        engine.commit_index("partial", &author()).unwrap();
        assert_eq!(engine.changed_paths().unwrap(), vec!["b.txt"]);
    }

    #[test]
    fn test_remote_tip_missing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_commit(dir.path());
        assert_eq!(engine.remote_tip("origin", "main").unwrap(), None);
    }

    #[test]
    fn test_no_merge_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_commit(dir.path());
        assert!(matches!(
            engine.merged_blob("hello.txt"),
            Err(GitError::NoMergeInProgress)
        ));
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitEngine::open("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }
}
