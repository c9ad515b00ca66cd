use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use gix::bstr::BStr;
use tokio::process::Command;
use tracing::debug;

use crate::config::SmelltrailConfig;
use crate::error::{TrailError, VcsError};
use crate::types::{Commit, LogFilter, Signature};

use super::CommitHistoryAdapter;

const FIELD: char = '\u{1f}';
const RECORD: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%aI%x1f%cn%x1f%ce%x1f%cI%x1f%B%x1e";

/// Registered working copies, read through `gix` and the `git` CLI.
///
/// Commit objects are decoded in-process; listings, blobs, log walks and
/// ancestry checks shell out to `git`. Every child is spawned with
/// `kill_on_drop`, so aborting the task that awaits it kills the process.
#[derive(Debug, Clone, Default)]
pub struct GitRepositories {
    repositories: BTreeMap<String, PathBuf>,
}

impl GitRepositories {
    pub fn new(repositories: BTreeMap<String, PathBuf>) -> Self {
        Self { repositories }
    }

    /// Registry from config; relative paths are taken from `root`.
    pub fn from_config(config: &SmelltrailConfig, root: &Path) -> Self {
        let repositories = config
            .repositories
            .iter()
            .map(|(name, path)| {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    root.join(path)
                };
                (name.clone(), path)
            })
            .collect();
        Self { repositories }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    fn path(&self, repository: &str) -> Result<&Path, VcsError> {
        self.repositories
            .get(repository)
            .map(PathBuf::as_path)
            .ok_or_else(|| VcsError::UnknownRepository(repository.to_string()))
    }

    async fn git<S: AsRef<std::ffi::OsStr>>(
        &self,
        repository: &str,
        args: &[S],
    ) -> Result<Output, VcsError> {
        let path = self.path(repository)?;
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Full commit id of `revision`.
    async fn resolve(&self, repository: &str, revision: &str) -> Result<String, VcsError> {
        let unknown = || VcsError::UnknownRevision {
            repository: repository.to_string(),
            revision: revision.to_string(),
        };
        if revision.is_empty() || revision.starts_with('-') {
            return Err(unknown());
        }
        let spec = format!("{revision}^{{commit}}");
        let output = self
            .git(repository, &["rev-parse", "--verify", "--quiet", spec.as_str()])
            .await?;
        if !output.status.success() {
            return Err(unknown());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn failed(command: &str, output: &Output) -> VcsError {
    VcsError::Command {
        command: command.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn gix_time_to_chrono(time: &gix::date::Time) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(time.offset).unwrap_or_else(|| Utc.fix());
    DateTime::from_timestamp(time.seconds, 0)
        .unwrap_or_default()
        .with_timezone(&offset)
}

fn signature(name: &BStr, email: &BStr, time: Option<gix::date::Time>) -> Signature {
    Signature {
        name: name.to_string(),
        email: email.to_string(),
        date: time.map_or_else(
            || DateTime::<Utc>::default().fixed_offset(),
            |t| gix_time_to_chrono(&t),
        ),
    }
}

fn decode_commit(commit: &gix::Commit<'_>) -> Result<Commit, VcsError> {
    let author = commit
        .author()
        .map_err(|e| VcsError::Git(format!("bad author encoding: {e}")))?;
    let committer = commit
        .committer()
        .map_err(|e| VcsError::Git(format!("bad committer encoding: {e}")))?;
    Ok(Commit {
        oid: commit.id().to_string(),
        message: commit.message_raw_sloppy().to_string().trim_end().to_string(),
        author: signature(author.name, author.email, author.time().ok()),
        committer: signature(committer.name, committer.email, committer.time().ok()),
        parents: commit.parent_ids().map(|id| id.to_string()).collect(),
    })
}

/// Blocking object-database pass over `revisions`.
fn read_commits(path: &Path, revisions: &[String]) -> Result<HashMap<String, Commit>, VcsError> {
    let repo = gix::open(path).map_err(|e| VcsError::Git(e.to_string()))?;
    let mut found = HashMap::with_capacity(revisions.len());
    for revision in revisions {
        if revision.starts_with('-') {
            continue;
        }
        let Some(commit) = repo
            .rev_parse_single(revision.as_str())
            .ok()
            .and_then(|id| id.object().ok()?.try_into_commit().ok())
        else {
            continue;
        };
        found.insert(revision.clone(), decode_commit(&commit)?);
    }
    Ok(found)
}

fn parse_date(raw: &str) -> Result<DateTime<FixedOffset>, VcsError> {
    DateTime::parse_from_rfc3339(raw).map_err(|e| VcsError::Git(format!("bad date {raw:?}: {e}")))
}

fn parse_log(stdout: &str) -> Result<Vec<Commit>, VcsError> {
    let mut commits = Vec::new();
    for record in stdout.split(RECORD) {
        let record = record.trim_start_matches('\n');
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(9, FIELD).collect();
        let [oid, parents, an, ae, ad, cn, ce, cd, message] = fields.as_slice() else {
            return Err(VcsError::Git(format!("unexpected log record: {record:?}")));
        };
        commits.push(Commit {
            oid: (*oid).to_string(),
            message: message.trim_end().to_string(),
            author: Signature {
                name: (*an).to_string(),
                email: (*ae).to_string(),
                date: parse_date(ad)?,
            },
            committer: Signature {
                name: (*cn).to_string(),
                email: (*ce).to_string(),
                date: parse_date(cd)?,
            },
            parents: parents.split_whitespace().map(String::from).collect(),
        });
    }
    Ok(commits)
}

#[async_trait::async_trait]
impl CommitHistoryAdapter for GitRepositories {
    async fn get_commits(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<HashMap<String, Commit>> {
        let path = self.path(repository)?.to_path_buf();
        let revisions = revisions.to_vec();
        let requested = revisions.len();
        let commits = tokio::task::spawn_blocking(move || read_commits(&path, &revisions))
            .await
            .map_err(|e| VcsError::Git(format!("commit reader panicked: {e}")))??;
        debug!(repository, requested, found = commits.len(), "commits read");
        Ok(commits)
    }

    async fn list_files(
        &self,
        repository: &str,
        commit: &str,
        dir: Option<&str>,
    ) -> crate::error::Result<Vec<String>> {
        let oid = self.resolve(repository, commit).await?;
        let mut args = vec!["ls-tree", "-r", "--name-only", "-z", oid.as_str()];
        if let Some(dir) = dir {
            args.extend(["--", dir]);
        }
        let output = self.git(repository, &args).await?;
        if !output.status.success() {
            return Err(failed("ls-tree", &output).into());
        }
        Ok(output
            .stdout
            .split(|b| *b == 0)
            .filter(|p| !p.is_empty())
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect())
    }

    async fn file_content(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> crate::error::Result<Vec<u8>> {
        let oid = self.resolve(repository, commit).await?;
        let object = format!("{oid}:{path}");
        let output = self
            .git(repository, &["cat-file", "blob", object.as_str()])
            .await?;
        if !output.status.success() {
            return Err(VcsError::UnknownPath {
                repository: repository.to_string(),
                revision: commit.to_string(),
                path: path.to_string(),
            }
            .into());
        }
        Ok(output.stdout)
    }

    async fn log(
        &self,
        repository: &str,
        filter: &LogFilter,
        skip: u32,
        max_count: Option<u32>,
    ) -> crate::error::Result<Vec<Commit>> {
        let start = self
            .resolve(repository, filter.revision.as_deref().unwrap_or("HEAD"))
            .await?;

        let mut args = vec!["log".to_string(), LOG_FORMAT.to_string()];
        if skip > 0 {
            args.push(format!("--skip={skip}"));
        }
        if let Some(n) = max_count {
            args.push(format!("--max-count={n}"));
        }
        if let Some(pattern) = &filter.message_pattern {
            args.push("--extended-regexp".to_string());
            args.push(format!("--grep={pattern}"));
        }
        if let Some(after) = filter.after {
            args.push(format!("--since={}", after.to_rfc3339()));
        }
        if let Some(before) = filter.before {
            args.push(format!("--until={}", before.to_rfc3339()));
        }
        args.push(start);
        if let Some(path) = &filter.path {
            args.push("--".to_string());
            args.push(path.clone());
        }

        let output = self.git(repository, &args).await?;
        if !output.status.success() {
            return Err(failed("log", &output).into());
        }
        Ok(parse_log(&String::from_utf8_lossy(&output.stdout))?)
    }

    async fn topological_order(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<Vec<String>> {
        if revisions.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_oid: HashMap<String, Vec<&String>> = HashMap::new();
        for revision in revisions {
            let oid = self.resolve(repository, revision).await?;
            by_oid.entry(oid).or_default().push(revision);
        }

        let mut args = vec!["rev-list", "--topo-order", "--reverse"];
        args.extend(by_oid.keys().map(String::as_str));
        let output = self.git(repository, &args).await?;
        if !output.status.success() {
            return Err(failed("rev-list", &output).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|oid| by_oid.get(oid.trim()))
            .flat_map(|requested| requested.iter().map(|r| (*r).clone()))
            .collect())
    }

    async fn is_ancestor(
        &self,
        repository: &str,
        ancestor: &str,
        descendant: &str,
    ) -> crate::error::Result<bool> {
        let ancestor = self.resolve(repository, ancestor).await?;
        let descendant = self.resolve(repository, descendant).await?;
        let output = self
            .git(
                repository,
                &["merge-base", "--is-ancestor", ancestor.as_str(), descendant.as_str()],
            )
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(TrailError::Vcs(failed("merge-base", &output))),
        }
    }
}
