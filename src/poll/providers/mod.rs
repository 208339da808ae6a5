pub mod jira;

pub use jira::JiraExecutor;
