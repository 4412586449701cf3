//! Isolated remotes and scratch space for update runs.
//!
//! Remotes are bare repositories under `remotes/`, so the updater's
//! `github_base_url` can point at a plain directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use image_updater::config::UpdaterSettings;
use image_updater::credentials::StaticTokenProvider;
use image_updater::secrets::SecretSource;
use image_updater::Updater;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Base directory standing in for the git host.
    pub remotes: PathBuf,
    /// Parent of the updater's scratch clones.
    pub scratch: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let remotes = temp_dir.path().join("remotes");
        let scratch = temp_dir.path().join("scratch");
        std::fs::create_dir_all(&remotes).expect("Failed to create remotes dir");
        std::fs::create_dir_all(&scratch).expect("Failed to create scratch dir");
        Self {
            temp_dir,
            remotes,
            scratch,
        }
    }

    /// Creates bare remote `<owner>/<repo>` with one commit holding `files`.
    pub fn seed_remote(&self, slug: &str, files: &[(&str, &str)]) -> PathBuf {
        let work = self.temp_dir.path().join("seed").join(slug);
        std::fs::create_dir_all(&work).expect("Failed to create seed dir");
        git(&work, &["init", "--quiet"]);
        for (path, content) in files {
            let file = work.join(path);
            std::fs::create_dir_all(file.parent().expect("file has a parent"))
                .expect("Failed to create manifest dir");
            std::fs::write(&file, content).expect("Failed to write seed file");
        }
        git(&work, &["add", "-A"]);
        git(
            &work,
            &[
                "-c",
                "user.name=seed",
                "-c",
                "user.email=seed@example.com",
                "commit",
                "--quiet",
                "-m",
                "seed",
            ],
        );

        let bare = self.remotes.join(slug);
        std::fs::create_dir_all(bare.parent().expect("slug has an owner"))
            .expect("Failed to create owner dir");
        git(
            self.temp_dir.path(),
            &[
                "clone",
                "--quiet",
                "--bare",
                work.to_str().expect("utf-8 path"),
                bare.to_str().expect("utf-8 path"),
            ],
        );
        bare
    }

    pub fn settings(&self) -> UpdaterSettings {
        UpdaterSettings {
            github_base_url: self.remotes.to_string_lossy().into_owned(),
            scratch_root: self.scratch.clone(),
            git_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Updater with a static token; local remotes never ask for it.
    pub fn updater(&self) -> Updater {
        let provider = StaticTokenProvider::new(
            "x-access-token",
            SecretSource {
                value: Some("test-token".to_string()),
                ..Default::default()
            },
        );
        Updater::new(self.settings(), Arc::new(provider))
    }

    /// Updater whose credential source is empty, so every run fails
    /// transiently before touching git.
    pub fn updater_without_credentials(&self) -> Updater {
        let provider = StaticTokenProvider::new("x-access-token", SecretSource::default());
        Updater::new(self.settings(), Arc::new(provider))
    }

    /// Reads `path` at `reference` from a bare remote.
    pub fn read_remote(&self, bare: &Path, reference: &str, path: &str) -> Option<String> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(bare)
            .args(["show", &format!("{}:{}", reference, path)])
            .output()
            .expect("Failed to run git show");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn remote_branches(&self, bare: &Path) -> Vec<String> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(bare)
            .args(["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .output()
            .expect("Failed to list branches");
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Entries left in the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(&self.scratch)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .env("LC_ALL", "C")
        .args(args)
        .status()
        .expect("Failed to run git");
    assert!(status.success(), "git {:?} failed", args);
}
