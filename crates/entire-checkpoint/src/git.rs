//! Thin wrapper over the `git` CLI. Only plumbing commands are used, so
//! nothing here touches the user's index, HEAD, or working tree except
//! [`Git::staged_files`], which only reads.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Expected old value for `update-ref` meaning "ref must not exist yet".
pub const ZERO_OID: &str = "0000000000000000000000000000000000000000";

/// Identity used for tool commits when the repository has none configured.
const FALLBACK_NAME: &str = "Entire";
const FALLBACK_EMAIL: &str = "entire@localhost";

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {args} failed ({status}): {stderr}")]
    Failed {
        args: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected git output from {args}: {detail}")]
    Parse { args: String, detail: String },
}

/// A file entry from `git ls-tree -r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub oid: String,
    pub path: String,
}

/// One staged change to a tree built by [`Git::build_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEdit {
    Upsert { path: String, mode: String, oid: String },
    Remove { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub oid: String,
    pub parents: Vec<String>,
    pub time: OffsetDateTime,
    pub message: String,
}

/// Change status from `git diff-tree --name-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Locate the enclosing worktree root from any directory inside it.
    pub fn discover(start: &Path) -> Result<Self, GitError> {
        let top = Git::new(start).run(&["rev-parse", "--show-toplevel"])?;
        Ok(Git::new(top))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");
        cmd
    }

    fn exec(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
        stdin: Option<&[u8]>,
    ) -> Result<Output, GitError> {
        let mut cmd = self.command(args);
        for (k, v) in envs {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        let spawn_err = |source| GitError::Spawn {
            args: args.join(" "),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).map_err(spawn_err)?;
        }
        child.wait_with_output().map_err(spawn_err)
    }

    fn checked(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>, GitError> {
        let out = self.exec(args, envs, stdin)?;
        if out.status.success() {
            Ok(out.stdout)
        } else {
            Err(GitError::Failed {
                args: args.join(" "),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            })
        }
    }

    /// Run and return stdout with the trailing newline removed.
    pub fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let out = self.checked(args, &[], None)?;
        Ok(String::from_utf8_lossy(&out).trim_end().to_string())
    }

    /// Run, mapping a non-zero exit to `None`.
    fn run_optional(&self, args: &[&str]) -> Result<Option<String>, GitError> {
        let out = self.exec(args, &[], None)?;
        if out.status.success() {
            Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// The git directory shared by all worktrees.
    pub fn common_dir(&self) -> Result<PathBuf, GitError> {
        let dir = PathBuf::from(self.run(&["rev-parse", "--git-common-dir"])?);
        Ok(if dir.is_absolute() {
            dir
        } else {
            self.workdir.join(dir)
        })
    }

    /// `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<String>, GitError> {
        self.resolve_commit("HEAD")
    }

    /// Full commit id for `rev`, or `None` if it does not name a commit.
    pub fn resolve_commit(&self, rev: &str) -> Result<Option<String>, GitError> {
        let spec = format!("{rev}^{{commit}}");
        self.run_optional(&["rev-parse", "--verify", "--quiet", &spec])
    }

    pub fn ref_tip(&self, name: &str) -> Result<Option<String>, GitError> {
        self.run_optional(&["rev-parse", "--verify", "--quiet", name])
    }

    /// Compare-and-swap `name` from `expected` (`None`: must not exist) to
    /// `new`. Returns `false` when another writer moved the ref first.
    pub fn update_ref(&self, name: &str, new: &str, expected: Option<&str>) -> Result<bool, GitError> {
        let old = expected.unwrap_or(ZERO_OID);
        let args = ["update-ref", "-m", "entire", name, new, old];
        let out = self.exec(&args, &[], None)?;
        if out.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let current = self.ref_tip(name)?;
        // Another writer holding the ref lock is also a lost race.
        if current.as_deref() != expected || stderr.contains("cannot lock ref") {
            tracing::debug!(ref_name = name, ?current, ?expected, "ref moved under us");
            return Ok(false);
        }
        Err(GitError::Failed {
            args: args.join(" "),
            status: out.status.to_string(),
            stderr,
        })
    }

    pub fn delete_ref(&self, name: &str) -> Result<(), GitError> {
        self.run(&["update-ref", "-d", name]).map(|_| ())
    }

    /// `(refname, oid)` for every ref under `prefix`.
    pub fn refs_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, GitError> {
        let out = self.run(&["for-each-ref", "--format=%(refname) %(objectname)", prefix])?;
        Ok(out
            .lines()
            .filter_map(|l| l.split_once(' '))
            .map(|(r, o)| (r.to_string(), o.to_string()))
            .collect())
    }

    /// Write `data` as a blob.
    pub fn hash_object(&self, data: &[u8]) -> Result<String, GitError> {
        let out = self.checked(&["hash-object", "-w", "--stdin"], &[], Some(data))?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Write a working-tree file as a blob, byte for byte.
    pub fn hash_file(&self, path: &Path) -> Result<String, GitError> {
        let p = path.to_string_lossy();
        self.run(&["hash-object", "-w", "--no-filters", "--", &p])
    }

    pub fn cat_blob(&self, oid: &str) -> Result<Vec<u8>, GitError> {
        self.checked(&["cat-file", "blob", oid], &[], None)
    }

    /// Tree id of a commit.
    pub fn tree_of(&self, commit: &str) -> Result<String, GitError> {
        self.run(&["rev-parse", &format!("{commit}^{{tree}}")])
    }

    /// Build a tree from `base_tree` (or empty) plus `edits`, using a
    /// throwaway index so the user's index is never touched.
    pub fn build_tree(&self, base_tree: Option<&str>, edits: &[TreeEdit]) -> Result<String, GitError> {
        let scratch = tempfile::Builder::new()
            .prefix("entire-index")
            .tempdir()
            .map_err(|source| GitError::Spawn {
                args: "read-tree".into(),
                source,
            })?;
        let index = scratch.path().join("index");
        let index = index.to_string_lossy();
        let env = [("GIT_INDEX_FILE", index.as_ref())];

        match base_tree {
            Some(tree) => self.checked(&["read-tree", tree], &env, None)?,
            None => self.checked(&["read-tree", "--empty"], &env, None)?,
        };

        if !edits.is_empty() {
            let mut info = Vec::new();
            for edit in edits {
                let written = match edit {
                    TreeEdit::Upsert { path, mode, oid } => {
                        write!(info, "{mode} {oid}\t{path}\0")
                    }
                    TreeEdit::Remove { path } => write!(info, "0 {ZERO_OID}\t{path}\0"),
                };
                written.map_err(|source| GitError::Spawn {
                    args: "update-index".into(),
                    source,
                })?;
            }
            self.checked(
                &["update-index", "--replace", "-z", "--index-info"],
                &env,
                Some(&info),
            )?;
        }

        let out = self.checked(&["write-tree"], &env, None)?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Create a commit object without moving any ref.
    pub fn commit_tree(&self, tree: &str, parents: &[&str], message: &str) -> Result<String, GitError> {
        let mut args = vec!["commit-tree", tree];
        for p in parents {
            args.push("-p");
            args.push(p);
        }
        args.extend(["-F", "-"]);
        let identity = self.fallback_identity()?;
        let envs: Vec<(&str, &str)> = identity.iter().map(|(k, v)| (*k, *v)).collect();
        let out = self.checked(&args, &envs, Some(message.as_bytes()))?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    fn fallback_identity(&self) -> Result<Vec<(&'static str, &'static str)>, GitError> {
        if self.run_optional(&["var", "GIT_COMMITTER_IDENT"])?.is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![
            ("GIT_AUTHOR_NAME", FALLBACK_NAME),
            ("GIT_AUTHOR_EMAIL", FALLBACK_EMAIL),
            ("GIT_COMMITTER_NAME", FALLBACK_NAME),
            ("GIT_COMMITTER_EMAIL", FALLBACK_EMAIL),
        ])
    }

    /// Blob entries of `treeish`, optionally restricted to `paths`.
    pub fn ls_tree(&self, treeish: &str, paths: &[String]) -> Result<Vec<TreeEntry>, GitError> {
        let mut args = vec!["ls-tree", "-r", "-z", "--full-tree", treeish, "--"];
        args.extend(paths.iter().map(String::as_str));
        let out = self.checked(&args, &[], None)?;
        let text = String::from_utf8_lossy(&out);
        let mut entries = Vec::new();
        for record in text.split('\0').filter(|r| !r.is_empty()) {
            let (meta, path) = record.split_once('\t').ok_or_else(|| GitError::Parse {
                args: args.join(" "),
                detail: record.to_string(),
            })?;
            let mut fields = meta.split(' ');
            let (Some(mode), Some(kind), Some(oid)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if kind != "blob" {
                continue;
            }
            entries.push(TreeEntry {
                mode: mode.to_string(),
                oid: oid.to_string(),
                path: path.to_string(),
            });
        }
        Ok(entries)
    }

    /// Commits in `range`, newest first. Extra arguments go before the range.
    pub fn log(&self, range: &str, extra: &[&str]) -> Result<Vec<CommitInfo>, GitError> {
        let mut args = vec!["log", "--format=%H%x00%P%x00%cI%x00%B%x1e"];
        args.extend_from_slice(extra);
        args.extend([range, "--"]);
        let out = self.run(&args)?;
        out.split('\x1e')
            .map(|r| r.trim_start_matches('\n'))
            .filter(|r| !r.is_empty())
            .map(|r| parse_commit_record(r, &args))
            .collect()
    }

    pub fn commit_info(&self, rev: &str) -> Result<CommitInfo, GitError> {
        self.log(rev, &["-n", "1"])?
            .into_iter()
            .next()
            .ok_or_else(|| GitError::Parse {
                args: format!("log {rev}"),
                detail: "no commit".into(),
            })
    }

    /// Files changed by `commit` relative to its first parent.
    pub fn diff_tree(&self, commit: &CommitInfo) -> Result<Vec<(ChangeStatus, String)>, GitError> {
        let mut args = vec!["diff-tree", "-r", "--no-commit-id", "--name-status", "-z"];
        match commit.parents.first() {
            Some(parent) => args.extend([parent.as_str(), commit.oid.as_str()]),
            None => args.extend(["--root", commit.oid.as_str()]),
        }
        let out = self.checked(&args, &[], None)?;
        let text = String::from_utf8_lossy(&out);
        let mut fields = text.split('\0').filter(|f| !f.is_empty());
        let mut changes = Vec::new();
        while let (Some(status), Some(path)) = (fields.next(), fields.next()) {
            let status = match status.chars().next() {
                Some('A') => ChangeStatus::Added,
                Some('D') => ChangeStatus::Deleted,
                _ => ChangeStatus::Modified,
            };
            changes.push((status, path.to_string()));
        }
        Ok(changes)
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let out = self.exec(&args, &[], None)?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitError::Failed {
                args: args.join(" "),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            }),
        }
    }

    /// Paths staged in the user's index relative to HEAD.
    pub fn staged_files(&self) -> Result<Vec<String>, GitError> {
        let out = self.checked(&["diff", "--cached", "--name-only", "-z"], &[], None)?;
        Ok(String::from_utf8_lossy(&out)
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn parse_commit_record(record: &str, args: &[&str]) -> Result<CommitInfo, GitError> {
    let parse_err = |detail: &str| GitError::Parse {
        args: args.join(" "),
        detail: detail.to_string(),
    };
    let mut parts = record.splitn(4, '\0');
    let (Some(oid), Some(parents), Some(time), Some(message)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(parse_err("truncated log record"));
    };
    let time = OffsetDateTime::parse(time, &Rfc3339).map_err(|e| parse_err(&e.to_string()))?;
    Ok(CommitInfo {
        oid: oid.to_string(),
        parents: parents.split_whitespace().map(str::to_string).collect(),
        time,
        message: message.trim_end().to_string(),
    })
}

/// Git mode for a working-tree file.
pub fn file_mode(path: &Path) -> std::io::Result<&'static str> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok("120000");
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 != 0 {
            return Ok("100755");
        }
    }
    Ok("100644")
}
