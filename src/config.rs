use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::comment::Comment;
use crate::options::ChatRenderOptions;

pub fn load_and_validate_options(path: &Path) -> Result<ChatRenderOptions> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read render options {}", path.display()))?;
    let options = parse_options_yaml(&contents).with_context(|| {
        format!("failed to parse render options {}", path.display())
    })?;
    options
        .validate()
        .with_context(|| format!("invalid render options in {}", path.display()))?;
    Ok(options)
}

pub fn parse_options_yaml(contents: &str) -> Result<ChatRenderOptions> {
    if contents.trim().is_empty() {
        return Ok(ChatRenderOptions::default());
    }
    serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!("yaml error at {}: {}", location, error)
    })
}

/// Reads a transcript JSON document: either a bare comment array or an object with
/// a `comments` array.
pub fn load_transcript(path: &Path) -> Result<Vec<Comment>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    parse_transcript_json(&contents)
        .with_context(|| format!("failed to parse transcript {}", path.display()))
}

pub fn parse_transcript_json(contents: &str) -> Result<Vec<Comment>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum TranscriptDocument {
        Wrapped { comments: Vec<Comment> },
        Bare(Vec<Comment>),
    }

    let document: TranscriptDocument =
        serde_json::from_str(contents).context("transcript is not valid JSON")?;
    let mut comments = match document {
        TranscriptDocument::Wrapped { comments } => comments,
        TranscriptDocument::Bare(comments) => comments,
    };
    comments.sort_by(|a, b| a.content_offset_seconds.total_cmp(&b.content_offset_seconds));
    Ok(comments)
}
