use crate::model::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comment keywords that suggest a comment explains how an issue was resolved
const RESOLUTION_KEYWORDS: [&str; 7] = [
    "fix",
    "patch",
    "cause",
    "pr",
    "pull request",
    "solution",
    "resolved",
];

/// A validated Jira issue
///
/// Built once by the validator and never modified afterwards; the
/// persistence sink only serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Globally unique issue key (e.g. `HADOOP-1234`)
    pub key: String,

    /// Project key; derived from the issue key when Jira omits it
    pub project: String,

    pub fields: IssueFields,

    /// Comments in the order Jira returned them
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Structured metadata of an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
    pub summary: String,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub status: Attributes,
    #[serde(default)]
    pub priority: Attributes,
    #[serde(default)]
    pub assignee: Attributes,
    #[serde(default)]
    pub reporter: Attributes,
    #[serde(rename = "issuetype", default)]
    pub issue_type: Attributes,
    #[serde(default)]
    pub resolution: Attributes,
    #[serde(rename = "resolutiondate")]
    pub resolution_date: Option<DateTime<Utc>>,
}

/// A comment on an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub author: Attributes,
    pub body: String,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
}

impl Issue {
    /// Last update time of the issue; drives checkpoint advancement
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.fields.updated
    }

    /// Project key of this issue, falling back to the key prefix
    ///
    /// Returns `None` when neither yields a non-empty project.
    pub fn resolve_project(&self) -> Option<&str> {
        if !self.project.is_empty() {
            return Some(&self.project);
        }
        project_from_key(&self.key)
    }

    /// Comments that likely describe the resolution, newest first
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of comments returned
    pub fn resolution_comments(&self, limit: usize) -> Vec<&Comment> {
        let mut comments: Vec<&Comment> = self
            .comments
            .iter()
            .filter(|c| c.mentions_resolution())
            .collect();
        comments.sort_by(|a, b| b.created.cmp(&a.created));
        comments.truncate(limit);
        comments
    }
}

impl Comment {
    /// Whether the body contains one of the resolution keywords
    ///
    /// Matching is a case-insensitive substring test.
    pub fn mentions_resolution(&self) -> bool {
        let body = self.body.to_lowercase();
        RESOLUTION_KEYWORDS.iter().any(|kw| body.contains(kw))
    }
}

/// Whether `key` has the Jira issue key shape, e.g. `HADOOP-1234`
///
/// The project part starts with a letter and holds only ASCII letters,
/// digits and underscores; the number is all digits.
pub fn is_issue_key(key: &str) -> bool {
    let Some((project, number)) = key.rsplit_once('-') else {
        return false;
    };
    project.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && project.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

/// Extracts the project prefix of an issue key (`"HADOOP-125"` -> `"HADOOP"`)
pub fn project_from_key(key: &str) -> Option<&str> {
    match key.split_once('-') {
        Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
        _ => None,
    }
}
