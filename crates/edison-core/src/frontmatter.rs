//! Frontmatter-header document format used for Task/QA entities: a
//! structured header followed by a free-text markdown body.
//!
//! The header is YAML between `---` fences, matching the YAML convention
//! the rest of the repository already uses for structured data (see
//! [`crate::config`]) rather than inventing a second syntax.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use serde::{de::DeserializeOwned, Serialize};

const FENCE: &str = "---";

/// Renders `header` as a YAML frontmatter block followed by `body`.
pub fn render<H: Serialize>(header: &H, body: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(header)?;
    Ok(format!("{FENCE}\n{yaml}{FENCE}\n\n{body}"))
}

/// Splits a frontmatter document into its typed header and body.
///
/// # Errors
/// Returns an error if the document does not start with a `---` fence, the
/// closing fence is missing, or the header fails to deserialize as `H`:
/// missing required keys abort the load the same way they abort a save.
pub fn parse<H: DeserializeOwned>(document: &str) -> Result<(H, String), FrontmatterError> {
    let rest = document
        .strip_prefix(FENCE)
        .ok_or(FrontmatterError::MissingOpeningFence)?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let end = rest
        .find("\n---")
        .ok_or(FrontmatterError::MissingClosingFence)?;
    let yaml = &rest[..end];
    let after_fence = &rest[end + 4..];
    let body = after_fence
        .strip_prefix('\n')
        .unwrap_or(after_fence)
        .trim_start_matches('\n');

    let header: H = serde_yaml::from_str(yaml)?;
    Ok((header, body.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    #[error("document does not start with a '---' frontmatter fence")]
    MissingOpeningFence,
    #[error("frontmatter block is not closed with a '---' fence")]
    MissingClosingFence,
    #[error("frontmatter header failed to parse: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
