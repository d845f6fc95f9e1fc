//! Image artifacts: names, reproduction scripts, logs and the skip policy
//!
//! Everything is staged under the sandbox test directory before the
//! container is committed, so the image reproduces the measurement
//! without any bind mount.

use crate::model::{CommitPair, RepoId};
use crate::persist::{read_json, write_json_atomic};
use crate::sandbox::{shell_quote, ContainerHost, Sandbox};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const TAG_MAX: usize = 128;
const HUB_API: &str = "https://hub.docker.com/v2";
const HUB_PAGE_LIMIT: usize = 50;

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// `<owner>-<name>-<sha[..12]>`
pub fn image_tag(repo: &RepoId, sha: &str) -> String {
    let short = &sha[..sha.len().min(12)];
    let mut tag = format!("{}-{}-{}", sanitize(&repo.owner), sanitize(&repo.name), sanitize(short));
    if tag.len() > TAG_MAX {
        tag = tag[tag.len() - TAG_MAX..].trim_start_matches(['-', '.']).to_string();
    }
    tag
}

/// `<prefix>:<owner>-<name>-<sha[..12]>`
pub fn image_name(prefix: &str, pair: &CommitPair) -> String {
    format!("{}:{}", prefix, image_tag(&pair.repo, &pair.new_sha))
}

/// `#!/bin/bash` followed by one command per line.
pub fn render_script(commands: &[String]) -> String {
    let mut script = String::from("#!/bin/bash\n");
    for command in commands {
        script.push_str(command);
        script.push('\n');
    }
    script
}

/// A test command line that runs in `workdir`.
pub fn test_command(argv: &[String], workdir: &str) -> String {
    let command = argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
    format!("cd {} && {}", shell_quote(workdir), command)
}

/// Per-candidate logs written into the image.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLogs {
    pub config: String,
    pub build: String,
    pub test: String,
    /// Chronological record of the whole evaluation
    pub full: String,
}

impl ArtifactLogs {
    /// Append a section to `full.log`.
    pub fn note(&mut self, section: &str, body: &str) {
        self.full.push_str(&format!("===== {} =====\n{}\n", section, body.trim_end()));
    }
}

/// Files staged into `<test_dir>` before commit.
#[derive(Debug, Clone, Default)]
pub struct ArtifactBundle {
    pub new_build: Vec<String>,
    pub old_build: Vec<String>,
    pub new_test: Vec<String>,
    pub old_test: Vec<String>,
    pub logs: ArtifactLogs,
    pub results_json: String,
}

impl ArtifactBundle {
    /// (relative path, contents, executable)
    pub fn files(&self) -> Vec<(String, String, bool)> {
        vec![
            ("new_build.sh".to_string(), render_script(&self.new_build), true),
            ("old_build.sh".to_string(), render_script(&self.old_build), true),
            ("new_test.sh".to_string(), render_script(&self.new_test), true),
            ("old_test.sh".to_string(), render_script(&self.old_test), true),
            ("logs/config.log".to_string(), self.logs.config.clone(), false),
            ("logs/build.log".to_string(), self.logs.build.clone(), false),
            ("logs/test.log".to_string(), self.logs.test.clone(), false),
            ("logs/full.log".to_string(), self.logs.full.clone(), false),
            ("logs/results.json".to_string(), self.results_json.clone(), false),
        ]
    }

    /// Write every file under `scratch` on the host and copy it into the sandbox.
    pub fn stage(&self, sandbox: &Sandbox, scratch: &Path) -> Result<()> {
        let test_dir = sandbox.test_dir().trim_end_matches('/').to_string();
        for (relative, contents, executable) in self.files() {
            let host_path = scratch.join(&relative);
            if let Some(parent) = host_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&host_path, contents)
                .with_context(|| format!("Failed to write {}", host_path.display()))?;
            let target = format!("{}/{}", test_dir, relative);
            sandbox.copy_in(&host_path, &target)?;
            if executable {
                sandbox.shell(&format!("chmod +x {}", shell_quote(&target)), None, None)?;
            }
        }
        tracing::debug!("Staged artifacts into {}:{}", sandbox.name(), test_dir);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Tags of `user/repo` on Docker Hub.
pub fn fetch_hub_tags(user: &str, repo: &str) -> Result<BTreeSet<String>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;
    let mut url = Some(format!(
        "{}/repositories/{}/{}/tags?page_size=100",
        HUB_API, user, repo
    ));
    let mut tags = BTreeSet::new();
    let mut pages = 0;
    while let Some(next) = url.take() {
        pages += 1;
        let response = client.get(&next).send().context("Docker Hub request failed")?;
        if response.status().as_u16() == 404 {
            break;
        }
        let page: TagPage = response
            .error_for_status()
            .context("Docker Hub returned an error")?
            .json()
            .context("Malformed Docker Hub tag listing")?;
        tags.extend(page.results.into_iter().map(|t| t.name));
        if pages < HUB_PAGE_LIMIT {
            url = page.next;
        }
    }
    Ok(tags)
}

/// Remote tags, read from `cache` or fetched once and cached there.
pub fn load_hub_tags(cache: &Path, user: &str, repo: &str) -> Result<BTreeSet<String>> {
    if let Some(tags) = read_json::<BTreeSet<String>>(cache)? {
        tracing::debug!("Loaded {} cached Docker Hub tags", tags.len());
        return Ok(tags);
    }
    let tags = fetch_hub_tags(user, repo)?;
    tracing::info!("Fetched {} Docker Hub tags for {}/{}", tags.len(), user, repo);
    write_json_atomic(cache, &tags)?;
    Ok(tags)
}

/// Decides whether a pair's image already exists.
pub struct ImagePolicy {
    host: Arc<dyn ContainerHost>,
    prefix: String,
    remote_tags: BTreeSet<String>,
    force: bool,
}

impl ImagePolicy {
    pub fn new(host: Arc<dyn ContainerHost>, prefix: impl Into<String>, force: bool) -> Self {
        Self {
            host,
            prefix: prefix.into(),
            remote_tags: BTreeSet::new(),
            force,
        }
    }

    pub fn with_remote_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.remote_tags = tags;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn image_for(&self, pair: &CommitPair) -> String {
        image_name(&self.prefix, pair)
    }

    /// Why the pair is skipped, or `None` when it should be evaluated.
    pub fn skip_reason(&self, pair: &CommitPair) -> Result<Option<String>> {
        if self.force {
            return Ok(None);
        }
        let image = self.image_for(pair);
        if self.remote_tags.contains(&image_tag(&pair.repo, &pair.new_sha)) {
            return Ok(Some(format!("image {} exists remotely", image)));
        }
        if self.host.image_exists(&image)? {
            return Ok(Some(format!("image {} exists locally", image)));
        }
        Ok(None)
    }
}

/// Tarball path for an exported image.
pub fn tarball_path(dir: &Path, pair: &CommitPair) -> PathBuf {
    dir.join(format!("{}.tar", image_tag(&pair.repo, &pair.new_sha)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeHost;

    fn pair() -> CommitPair {
        CommitPair::new(
            RepoId::new("Google", "benchmark"),
            "0123456789abcdef0123456789abcdef01234567",
            "fedcba9",
        )
    }

    #[test]
    fn test_image_name() {
        assert_eq!(
            image_name("perfminer", &pair()),
            "perfminer:google-benchmark-0123456789ab"
        );
    }

    #[test]
    fn test_scripts_start_with_shebang() {
        let script = render_script(&["cmake -S a -B a/build".into(), "cmake --build a/build".into()]);
        assert_eq!(script, "#!/bin/bash\ncmake -S a -B a/build\ncmake --build a/build\n");
        assert_eq!(
            test_command(&["./unit".into(), "--gtest_filter=A.B".into()], "/t/new/build"),
            "cd /t/new/build && ./unit --gtest_filter=A.B"
        );
    }

    #[test]
    fn test_skip_policy() {
        let host = Arc::new(FakeHost::new());
        let policy = ImagePolicy::new(host.clone(), "perfminer", false);
        assert_eq!(policy.skip_reason(&pair()).unwrap(), None);

        host.add_image("perfminer:google-benchmark-0123456789ab");
        assert!(policy.skip_reason(&pair()).unwrap().unwrap().contains("locally"));

        let forced = ImagePolicy::new(host, "perfminer", true);
        assert_eq!(forced.skip_reason(&pair()).unwrap(), None);
    }

    #[test]
    fn test_remote_tags_skip() {
        let host = Arc::new(FakeHost::new());
        let tags: BTreeSet<String> = ["google-benchmark-0123456789ab".to_string()].into();
        let policy = ImagePolicy::new(host, "me/perf", false).with_remote_tags(tags);
        assert!(policy.skip_reason(&pair()).unwrap().unwrap().contains("remotely"));
    }

    #[test]
    fn test_cached_hub_tags_are_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("dockerhub_tags.json");
        fs::write(&cache, r#"["a-b-123"]"#).unwrap();
        // would hit the network if the cache were ignored
        let tags = load_hub_tags(&cache, "nobody", "nothing").unwrap();
        assert!(tags.contains("a-b-123"));
    }
}
