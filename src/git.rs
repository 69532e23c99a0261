//! Git metadata for the report header.
//!
//! Everything here is best effort: a missing repository or git binary leaves
//! the report without a `git` object.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{GatherError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub id: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// Full commit description, or just its hash in partial reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GitHead {
    Full(Head),
    Id(String),
}

impl GitHead {
    pub fn id(&self) -> &str {
        match self {
            GitHead::Full(head) => &head.id,
            GitHead::Id(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: String,
    pub head: GitHead,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
}

impl GitInfo {
    /// The `{"branch", "head": "<sha>"}` form.
    pub fn head_only(&self) -> GitInfo {
        GitInfo {
            branch: self.branch.clone(),
            head: GitHead::Id(self.head.id().to_string()),
            remotes: Vec::new(),
        }
    }
}

/// Describe HEAD of the repository at `repo`, or `None` when that is not
/// possible.
pub fn collect(git: &Path, repo: &Path) -> Option<GitInfo> {
    match try_collect(git, repo) {
        Ok(info) => Some(info),
        Err(e) => {
            log::warn!(
                "git metadata unavailable for {}: {}; the report will not carry a git object",
                repo.display(),
                e
            );
            None
        }
    }
}

fn try_collect(git: &Path, repo: &Path) -> Result<GitInfo> {
    let branch = run_git(git, repo, &["rev-parse", "--abbrev-ref", "HEAD"])?
        .trim()
        .to_string();
    let pretty = run_git(
        git,
        repo,
        &["log", "-1", "--pretty=format:%H%n%aN%n%aE%n%cN%n%cE"],
    )?;
    let message = run_git(git, repo, &["log", "-1", "--pretty=format:%B"])?;
    let remotes = run_git(git, repo, &["remote", "-v"])?;

    let head = parse_head(&pretty, &message).ok_or_else(|| GatherError::Tool {
        program: git.display().to_string(),
        status: "unexpected output".to_string(),
        stderr: format!("cannot read commit description from {:?}", pretty),
    })?;

    Ok(GitInfo {
        branch,
        head: GitHead::Full(head),
        remotes: parse_remotes(&remotes),
    })
}

fn run_git(git: &Path, repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(git).args(args).current_dir(repo).output()?;
    if !output.status.success() {
        return Err(GatherError::Tool {
            program: format!("{} {}", git.display(), args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `%H%n%aN%n%aE%n%cN%n%cE` output plus the `%B` message.
fn parse_head(pretty: &str, message: &str) -> Option<Head> {
    let mut fields = pretty.trim().lines().map(str::trim);
    let id = fields.next().filter(|id| !id.is_empty())?;
    Some(Head {
        id: id.to_string(),
        author_name: fields.next()?.to_string(),
        author_email: fields.next()?.to_string(),
        committer_name: fields.next()?.to_string(),
        committer_email: fields.next()?.to_string(),
        message: message.trim_end().to_string(),
    })
}

/// Fetch URLs from `git remote -v`.
fn parse_remotes(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let url = parts.next()?;
            match parts.next() {
                Some("(fetch)") | None => Some(Remote {
                    name: name.to_string(),
                    url: url.to_string(),
                }),
                _ => None,
            }
        })
        .collect();
    remotes.dedup();
    remotes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head() {
        let pretty = "0123abcd\nAda\nada@example.com\nBob\nbob@example.com";
        let head = parse_head(pretty, "Fix the thing\n\nDetails.\n\n").unwrap();
        assert_eq!(head.id, "0123abcd");
        assert_eq!(head.committer_email, "bob@example.com");
        assert_eq!(head.message, "Fix the thing\n\nDetails.");

        assert!(parse_head("", "").is_none());
        assert!(parse_head("0123abcd\nAda", "").is_none());
    }

    #[test]
    fn test_parse_remotes_keeps_fetch_urls() {
        let output = "\
origin\tgit@example.com:me/proj.git (fetch)
origin\tgit@example.com:me/proj.git (push)
upstream\thttps://example.com/them/proj.git (fetch)
upstream\thttps://example.com/them/proj.git (push)
";
        let remotes = parse_remotes(output);
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[1].url, "https://example.com/them/proj.git");
    }

    #[test]
    fn test_head_only_serializes_short_form() {
        let info = GitInfo {
            branch: "main".to_string(),
            head: GitHead::Full(Head {
                id: "abc".to_string(),
                author_name: String::new(),
                author_email: String::new(),
                committer_name: String::new(),
                committer_email: String::new(),
                message: String::new(),
            }),
            remotes: vec![Remote {
                name: "origin".to_string(),
                url: "u".to_string(),
            }],
        };
        let json = serde_json::to_value(info.head_only()).unwrap();
        assert_eq!(json, serde_json::json!({"branch": "main", "head": "abc"}));

        let back: GitInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.head, GitHead::Id("abc".to_string()));
    }

    #[test]
    fn test_missing_git_binary() {
        let dir = std::env::temp_dir();
        assert!(collect(Path::new("/nonexistent/git"), &dir).is_none());
    }
}
