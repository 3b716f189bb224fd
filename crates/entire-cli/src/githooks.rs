//! Git hook shims that forward to `entire git-hook`.
//!
//! A hook the user already had is moved aside to `<hook>.pre-entire` and
//! run first by the shim; uninstalling puts it back.

use std::fs;
use std::path::{Path, PathBuf};

use entire_checkpoint::Git;

const MARKER: &str = "# entire-managed hook";
const BACKUP_SUFFIX: &str = ".pre-entire";

/// Hook name and the arguments forwarded to `entire git-hook`.
const HOOKS: &[(&str, &str)] = &[
    ("prepare-commit-msg", r#"prepare-commit-msg "$1" "$2""#),
    ("commit-msg", r#"commit-msg "$1""#),
    ("post-commit", "post-commit"),
];

fn hooks_dir(git: &Git) -> anyhow::Result<PathBuf> {
    let dir = PathBuf::from(git.run(&["rev-parse", "--git-path", "hooks"])?);
    Ok(if dir.is_absolute() {
        dir
    } else {
        git.workdir().join(dir)
    })
}

fn shim(program: &str, args: &str) -> String {
    format!(
        "#!/bin/sh\n{MARKER}\n\
         if [ -x \"$0{BACKUP_SUFFIX}\" ]; then \"$0{BACKUP_SUFFIX}\" \"$@\" || exit $?; fi\n\
         {program} git-hook {args} || true\n"
    )
}

fn is_ours(path: &Path) -> bool {
    fs::read_to_string(path).is_ok_and(|c| c.contains(MARKER))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// Install every shim calling `program`. Returns how many were written.
pub fn install(git: &Git, program: &str) -> anyhow::Result<usize> {
    let dir = hooks_dir(git)?;
    fs::create_dir_all(&dir)?;
    for (name, args) in HOOKS {
        let path = dir.join(name);
        let backup = backup_path(&path);
        if path.exists() && !is_ours(&path) && !backup.exists() {
            fs::rename(&path, &backup)?;
            tracing::info!(hook = name, "existing hook kept as {}", backup.display());
        }
        entire_store::write_atomic(&path, shim(program, args).as_bytes())?;
        make_executable(&path)?;
    }
    Ok(HOOKS.len())
}

/// Remove our shims and restore hooks they displaced.
pub fn uninstall(git: &Git) -> anyhow::Result<()> {
    let dir = hooks_dir(git)?;
    for (name, _) in HOOKS {
        let path = dir.join(name);
        if is_ours(&path) {
            fs::remove_file(&path)?;
            let backup = backup_path(&path);
            if backup.exists() {
                fs::rename(&backup, &path)?;
            }
        }
    }
    Ok(())
}

pub fn is_installed(git: &Git) -> bool {
    hooks_dir(git).is_ok_and(|dir| HOOKS.iter().all(|(name, _)| is_ours(&dir.join(name))))
}
