//! Issue data model
//!
//! Typed representation of the Jira issues this crate harvests and persists.

mod attributes;
mod issue;
mod timestamp;

pub use attributes::Attributes;
pub use issue::{is_issue_key, project_from_key, Comment, Issue, IssueFields};
pub use timestamp::{format_jql_date, parse_timestamp};
