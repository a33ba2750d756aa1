// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Per-attempt scratch directories.
//!
//! Each variant attempt gets a uniquely-named directory under the per-run
//! temp root, holding a copy of the canonical test case and of every
//! auxiliary file, all by their basenames. The pass and the interestingness
//! test only ever see these copies, so a misbehaving attempt can never
//! touch the canonical inputs.

use anyhow::{anyhow, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Prefix for the per-run temp root and for each sandbox inside it.
pub const TEMP_PREFIX: &str = "whittle-";

#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
    test_case: String,
    aux_files: Vec<String>,
}

impl Sandbox {
    /// Create a sandbox under `root` holding copies of the test case and
    /// every auxiliary file.
    pub fn new(root: &Path, test_case: &Path, aux_files: &[PathBuf]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("failed to create a sandbox under `{}`", root.display()))?;

        let name = basename(test_case)?;
        copy_into(test_case, dir.path(), &name)?;

        let mut aux = Vec::with_capacity(aux_files.len());
        for f in aux_files {
            let name = basename(f)?;
            copy_into(f, dir.path(), &name)?;
            aux.push(name);
        }

        Ok(Sandbox {
            dir,
            test_case: name,
            aux_files: aux,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn test_case_name(&self) -> &str {
        &self.test_case
    }

    pub fn aux_names(&self) -> &[String] {
        &self.aux_files
    }

    /// The sandboxed copy of the test case.
    pub fn test_case_path(&self) -> PathBuf {
        self.dir.path().join(&self.test_case)
    }

    /// Copy the sandbox contents plus the interestingness test into `dst`,
    /// for a crash report.
    pub fn dump(&self, dst: &Path, test_script: &Path) -> Result<()> {
        copy_into(&self.test_case_path(), dst, &self.test_case)?;
        for name in &self.aux_files {
            copy_into(&self.dir.path().join(name), dst, name)?;
        }
        let script_name = basename(test_script)?;
        copy_into(test_script, dst, &script_name)?;
        Ok(())
    }

    /// Release the directory. With `save_temps` it is left on disk;
    /// otherwise it is removed, and removal errors are ignored since
    /// best-effort cleanup is all we can do for a directory a cancelled
    /// worker may still be touching.
    pub fn release(self, save_temps: bool) {
        if save_temps {
            let _ = self.dir.keep();
        }
    }
}

fn basename(p: &Path) -> Result<String> {
    p.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("path `{}` has no usable file name", p.display()))
}

fn copy_into(src: &Path, dir: &Path, name: &str) -> Result<()> {
    let dst = dir.join(name);
    fs::copy(src, &dst)
        .with_context(|| format!("failed to copy `{}` to `{}`", src.display(), dst.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_files_by_basename() {
        let root = tempfile::tempdir().unwrap();
        let case = root.path().join("case.txt");
        let aux = root.path().join("extra.h");
        fs::write(&case, "contents").unwrap();
        fs::write(&aux, "aux").unwrap();

        let sandbox = Sandbox::new(root.path(), &case, &[aux]).unwrap();
        assert_eq!(sandbox.test_case_name(), "case.txt");
        assert_eq!(sandbox.aux_names(), ["extra.h"]);
        assert_eq!(fs::read(sandbox.test_case_path()).unwrap(), b"contents");
        assert_eq!(fs::read(sandbox.path().join("extra.h")).unwrap(), b"aux");
    }

    #[test]
    fn release_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let case = root.path().join("case.txt");
        fs::write(&case, "contents").unwrap();

        let sandbox = Sandbox::new(root.path(), &case, &[]).unwrap();
        let path = sandbox.path().to_path_buf();
        sandbox.release(false);
        assert!(!path.exists());
    }

    #[test]
    fn save_temps_keeps_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let case = root.path().join("case.txt");
        fs::write(&case, "contents").unwrap();

        let sandbox = Sandbox::new(root.path(), &case, &[]).unwrap();
        let path = sandbox.path().to_path_buf();
        sandbox.release(true);
        assert!(path.exists());
    }
}
