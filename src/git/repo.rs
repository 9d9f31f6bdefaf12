//! Repository discovery
//!
//! Walks a starting folder and its ancestors looking for a valid `.git`
//! entry, stopping after the home directory. Resolutions are cached
//! process-wide for the session; a repository moved or renamed while the
//! host is running is not detected. [`reset_repo_caches`] exists for tests
//! and settings reloads.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};

static REPO_ROOTS: LazyLock<Mutex<HashMap<PathBuf, PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
static GIT_DIRS: LazyLock<Mutex<HashMap<PathBuf, PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Clear both path caches. Next lookups re-probe the filesystem.
pub fn reset_repo_caches() {
    REPO_ROOTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    GIT_DIRS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// The path itself, then each ancestor up to the filesystem root.
pub fn paths_upwards(path: &Path) -> impl Iterator<Item = &Path> {
    std::iter::successors(Some(path), |p| p.parent())
}

/// Whether `suspect` is a usable `.git` entry.
///
/// A directory qualifies only if it directly contains `HEAD`. A plain file
/// is the worktree/submodule pointer form and is accepted as-is; the
/// indirection is followed later by [`resolve_git_dir`].
fn is_git_entry(suspect: &Path) -> bool {
    let metadata = match fs::metadata(suspect) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !metadata.is_dir() {
        return true;
    }
    let ok = suspect.join("HEAD").exists();
    if !ok {
        tracing::debug!(path = %suspect.display(), "skipping .git without HEAD");
    }
    ok
}

fn search_upwards(folder: &Path) -> Option<PathBuf> {
    let home = dirs::home_dir();
    for candidate in paths_upwards(folder) {
        if is_git_entry(&candidate.join(".git")) {
            return Some(candidate.to_path_buf());
        }
        if Some(candidate) == home.as_deref() {
            break;
        }
    }
    None
}

/// Identity check for two directories, immune to symlink spelling.
#[cfg(unix)]
fn same_directory(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// The search proper, reconciling the literal starting folder with its
/// symlink-free spelling.
///
/// When the two spellings differ, both are searched; the literal answer is
/// kept only if it names the same directory as the resolved one, otherwise
/// the resolved answer wins. This keeps repo-root detection stable when a
/// file is opened through a symlinked path.
fn find_toplevel(start: &Path) -> Option<PathBuf> {
    let real_start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    let real_root = search_upwards(&real_start);
    if real_start == start {
        return real_root;
    }
    let real_root = real_root?;

    if let Some(literal_root) = search_upwards(start) {
        if same_directory(&real_root, &literal_root) {
            return Some(literal_root);
        }
    }
    Some(real_root)
}

/// Find the repository root governing `start`, walking upwards to the home
/// directory (or filesystem root). Successful resolutions are cached per
/// starting folder and never re-probed within this process.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    {
        let cache = REPO_ROOTS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(start) {
            return Some(hit.clone());
        }
    }

    // Probed outside the lock: resolution is a pure function of the key,
    // so racing first-time populations are idempotent (last write wins).
    let found = search_toplevel_logged(start);
    if let Some(root) = &found {
        REPO_ROOTS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(start.to_path_buf(), root.clone());
    }
    found
}

fn search_toplevel_logged(start: &Path) -> Option<PathBuf> {
    tracing::debug!(start = %start.display(), "searching for .git repo");
    let found = find_toplevel(start);
    match &found {
        Some(root) => tracing::debug!(repo = %root.join(".git").display(), "repo path"),
        None => tracing::debug!(start = %start.display(), "found no .git path"),
    }
    found
}

/// The actual git metadata directory for `repo_root`.
///
/// A `.git` *file* starting with `gitdir: ` is the worktree/submodule
/// pointer form; the trimmed target is followed, relative targets joined
/// onto the repo root. Cached per root.
pub fn resolve_git_dir(repo_root: &Path) -> PathBuf {
    {
        let cache = GIT_DIRS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(repo_root) {
            return hit.clone();
        }
    }

    let dotgit = repo_root.join(".git");
    let git_dir = if dotgit.is_file() {
        match fs::read_to_string(&dotgit) {
            Ok(content) => match content.strip_prefix("gitdir: ") {
                Some(target) => {
                    let target = Path::new(target.trim());
                    if target.is_absolute() {
                        target.to_path_buf()
                    } else {
                        repo_root.join(target)
                    }
                }
                None => dotgit,
            },
            Err(_) => dotgit,
        }
    } else {
        dotgit
    };

    GIT_DIRS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(repo_root.to_path_buf(), git_dir.clone());
    git_dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    /// `<root>/.git/` with a HEAD file, i.e. a valid plain repository.
    fn make_repo(root: &Path) {
        let git = root.join(".git");
        fs::create_dir_all(&git).expect("mkdir .git");
        fs::write(git.join("HEAD"), "ref: refs/heads/main\n").expect("write HEAD");
    }

    #[test]
    #[serial]
    fn finds_root_from_a_nested_folder() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("a");
        let nested = root.join("b").join("c");
        fs::create_dir_all(&nested).expect("mkdirs");
        make_repo(&root);

        assert_eq!(find_repository_root(&nested), Some(root));
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn tree_without_a_repo_resolves_to_none() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let nested = tmp.path().join("x").join("y");
        fs::create_dir_all(&nested).expect("mkdirs");

        // The walk escapes the tempdir; this only holds when no ancestor of
        // the system temp dir is itself a repository, which is the case in
        // any sane environment.
        assert_eq!(find_repository_root(&nested), None);
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn git_dir_without_head_is_not_a_repo() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("a");
        fs::create_dir_all(root.join(".git")).expect("mkdir bare .git");

        assert_eq!(find_repository_root(&root), None);
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn git_pointer_file_is_accepted_without_validation() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let worktree = tmp.path().join("wt");
        fs::create_dir_all(&worktree).expect("mkdir");
        fs::write(worktree.join(".git"), "gitdir: /elsewhere/.git/worktrees/wt\n")
            .expect("write pointer");

        assert_eq!(find_repository_root(&worktree), Some(worktree));
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn second_lookup_hits_the_cache_without_reprobing() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("repo");
        let nested = root.join("src");
        fs::create_dir_all(&nested).expect("mkdirs");
        make_repo(&root);

        assert_eq!(find_repository_root(&nested), Some(root.clone()));

        // Deleting .git makes any re-probe fail, so a successful second
        // lookup can only have come from the cache.
        fs::remove_dir_all(root.join(".git")).expect("rm .git");
        assert_eq!(find_repository_root(&nested), Some(root));
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn plain_git_dir_resolves_to_itself() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("repo");
        fs::create_dir_all(&root).expect("mkdir");
        make_repo(&root);

        assert_eq!(resolve_git_dir(&root), root.join(".git"));
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn gitdir_pointer_is_followed_relative_to_the_root() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("sub");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join(".git"), "gitdir: ../../modules/foo\n").expect("write pointer");

        assert_eq!(resolve_git_dir(&root), root.join("../../modules/foo"));
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn absolute_gitdir_pointer_passes_through() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("wt");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join(".git"), "gitdir: /srv/repos/main/.git/worktrees/wt\n")
            .expect("write pointer");

        assert_eq!(
            resolve_git_dir(&root),
            PathBuf::from("/srv/repos/main/.git/worktrees/wt")
        );
        reset_repo_caches();
    }

    #[test]
    #[serial]
    fn git_file_without_gitdir_prefix_is_used_as_is() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("odd");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join(".git"), "something else entirely\n").expect("write file");

        assert_eq!(resolve_git_dir(&root), root.join(".git"));
        reset_repo_caches();
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn symlinked_start_keeps_the_literal_spelling_when_identical() {
        reset_repo_caches();
        let tmp = TempDir::new().expect("tempdir");
        let real = tmp.path().join("real");
        let nested = real.join("src");
        fs::create_dir_all(&nested).expect("mkdirs");
        make_repo(&real);

        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        // Both spellings name the same directory, so the literal one wins.
        let found = find_repository_root(&link.join("src")).expect("repo found");
        assert_eq!(found, link);
        reset_repo_caches();
    }

    #[test]
    fn paths_upwards_yields_self_then_ancestors() {
        let walked: Vec<&Path> = paths_upwards(Path::new("/a/b/c")).collect();
        assert_eq!(
            walked,
            [
                Path::new("/a/b/c"),
                Path::new("/a/b"),
                Path::new("/a"),
                Path::new("/")
            ]
        );
    }
}
