//! CI service detection for the Coveralls report header.

use serde::{Deserialize, Serialize};

/// Service fields of a Coveralls job. Absent values are left out of the
/// JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_job_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_build_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_job_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_pull_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_attempt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

/// A detected service: a human-readable job description and its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub description: String,
    pub header: ServiceHeader,
}

/// Detect the CI service from the process environment.
pub fn detect_from_env() -> Service {
    detect(|name| std::env::var(name).ok())
}

/// Detect the CI service. `env` looks up one environment variable.
pub fn detect<F>(env: F) -> Service
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| env(name).filter(|v| !v.is_empty());

    travis(&lookup)
        .or_else(|| appveyor(&lookup))
        .or_else(|| github(&lookup))
        .unwrap_or_else(local)
}

fn travis(env: &dyn Fn(&str) -> Option<String>) -> Option<Service> {
    env("TRAVIS")?;
    let job = env("TRAVIS_JOB_NUMBER");
    Some(Service {
        description: format!("Travis CI job {}", job.as_deref().unwrap_or("?")),
        header: ServiceHeader {
            service_name: Some("travis-ci".to_string()),
            service_number: env("TRAVIS_BUILD_NUMBER"),
            service_branch: env("TRAVIS_BRANCH"),
            service_job_id: job,
            service_build_url: env("TRAVIS_BUILD_WEB_URL"),
            service_pull_request: env("TRAVIS_PULL_REQUEST").filter(|pr| pr != "false"),
            ..Default::default()
        },
    })
}

fn appveyor(env: &dyn Fn(&str) -> Option<String>) -> Option<Service> {
    env("APPVEYOR")?;
    let build_url = match (env("APPVEYOR_REPO_NAME"), env("APPVEYOR_BUILD_VERSION")) {
        (Some(repo), Some(version)) => Some(format!(
            "https://ci.appveyor.com/project/{}/build/{}",
            repo, version
        )),
        _ => None,
    };
    let id = env("APPVEYOR_BUILD_ID");
    Some(Service {
        description: format!("AppVeyor job {}", id.as_deref().unwrap_or("?")),
        header: ServiceHeader {
            service_name: Some("appveyor".to_string()),
            service_number: env("APPVEYOR_BUILD_VERSION"),
            service_job_number: env("APPVEYOR_BUILD_NUMBER"),
            service_job_id: id,
            service_branch: env("APPVEYOR_REPO_BRANCH"),
            commit_sha: env("APPVEYOR_REPO_COMMIT"),
            service_build_url: build_url,
            ..Default::default()
        },
    })
}

fn github(env: &dyn Fn(&str) -> Option<String>) -> Option<Service> {
    env("GITHUB_ACTIONS")?;
    let build_url = match (
        env("GITHUB_SERVER_URL"),
        env("GITHUB_REPOSITORY"),
        env("GITHUB_RUN_ID"),
    ) {
        (Some(server), Some(repo), Some(run)) => {
            Some(format!("{}/{}/actions/runs/{}", server, repo, run))
        }
        _ => None,
    };
    let pull_request = env("GITHUB_REF").and_then(|r| pr_number_from_ref(&r));
    let job = env("GITHUB_JOB");

    Some(Service {
        description: format!(
            "GitHub job {} #{}{}",
            job.as_deref().unwrap_or("?"),
            env("GITHUB_RUN_NUMBER").as_deref().unwrap_or("?"),
            pull_request
                .as_deref()
                .map(|pr| format!(" (PR#{})", pr))
                .unwrap_or_default()
        ),
        header: ServiceHeader {
            service_name: Some("github".to_string()),
            repo_name: env("GITHUB_REPOSITORY"),
            service_number: env("GITHUB_RUN_ID"),
            service_job_id: job,
            service_branch: env("GITHUB_HEAD_REF").or_else(|| env("GITHUB_REF_NAME")),
            service_job_url: build_url.clone(),
            service_build_url: build_url,
            service_pull_request: pull_request,
            service_event_type: env("GITHUB_EVENT_NAME"),
            service_attempt: env("GITHUB_RUN_ATTEMPT"),
            commit_sha: env("GITHUB_SHA"),
            ..Default::default()
        },
    })
}

fn local() -> Service {
    Service {
        description: "local build".to_string(),
        header: ServiceHeader {
            service_name: Some("coveralls-gather".to_string()),
            service_event_type: Some("manual".to_string()),
            ..Default::default()
        },
    }
}

/// Extract the PR number from a ref like `refs/pull/42/merge`.
fn pr_number_from_ref(github_ref: &str) -> Option<String> {
    let parts: Vec<&str> = github_ref.split('/').collect();
    if parts.len() >= 3 && parts[0] == "refs" && parts[1] == "pull" {
        parts[2].parse::<u64>().ok().map(|n| n.to_string())
    } else {
        None
    }
}
