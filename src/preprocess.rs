use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::comment::Comment;
use crate::options::ChatRenderOptions;

/// Normalizes offsets and drops filtered comments in place. Leaves the list ordered
/// by offset.
pub fn preprocess_comments(comments: &mut Vec<Comment>, options: &ChatRenderOptions) -> Result<()> {
    for comment in comments.iter_mut() {
        if options.dispersion {
            disperse_offset(comment);
        }
        floor_offset(comment, options.update_rate);
    }

    let filter = CommentFilter::new(&options.ignore_users, &options.banned_words)?;
    let removed = filter.apply(comments);
    if removed > 0 {
        debug!(removed, "filtered comments from ignored users or with banned words");
    }

    comments.sort_by(|a, b| a.content_offset_seconds.total_cmp(&b.content_offset_seconds));
    Ok(())
}

/// Spreads comments that share a truncated whole-second offset back across their
/// original second using the creation timestamp's milliseconds.
pub fn disperse_offset(comment: &mut Comment) {
    let offset = comment.content_offset_seconds;
    let millisecond = comment.created_millisecond();
    if offset.fract() != 0.0 || millisecond == 0 {
        return;
    }
    comment.content_offset_seconds = offset + (f64::from(millisecond) - 500.0) / 1000.0;
}

/// Floors an offset to the first update boundary that may show it.
pub fn floor_offset(comment: &mut Comment, update_rate: f64) {
    if update_rate <= 0.0 {
        return;
    }
    let offset = comment.content_offset_seconds;
    comment.content_offset_seconds = if update_rate > 1.0 {
        offset.floor()
    } else {
        let interval = 1.0 / update_rate;
        (offset / interval).floor() * interval
    };
}

pub struct CommentFilter {
    ignored_users: HashSet<String>,
    banned_words: Option<Regex>,
}

impl CommentFilter {
    pub fn new(ignore_users: &[String], banned_words: &[String]) -> Result<Self> {
        let ignored_users = ignore_users
            .iter()
            .map(|user| user.trim().to_lowercase())
            .filter(|user| !user.is_empty())
            .collect::<HashSet<_>>();

        let words = banned_words
            .iter()
            .map(|word| word.trim())
            .filter(|word| !word.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>();
        let banned_words = if words.is_empty() {
            None
        } else {
            let pattern = format!(
                r"(?i)(?:^|[\s\p{{P}}\p{{S}}])(?:{})(?:$|[\s\p{{P}}\p{{S}}])",
                words.join("|")
            );
            Some(Regex::new(&pattern).context("failed to compile banned word pattern")?)
        };

        Ok(Self {
            ignored_users,
            banned_words,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.ignored_users.is_empty() && self.banned_words.is_none()
    }

    pub fn rejects(&self, comment: &Comment) -> bool {
        if let Some(commenter) = &comment.commenter {
            if self.ignored_users.contains(&commenter.name.to_lowercase()) {
                return true;
            }
            if !commenter.display_name.is_ascii()
                && self
                    .ignored_users
                    .contains(&commenter.display_name.to_lowercase())
            {
                return true;
            }
        }
        self.banned_words
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&comment.message.body))
    }

    /// Removes rejected comments, returning how many were dropped.
    pub fn apply(&self, comments: &mut Vec<Comment>) -> usize {
        if self.is_noop() {
            return 0;
        }
        let before = comments.len();
        for index in (0..comments.len()).rev() {
            if self.rejects(&comments[index]) {
                comments.remove(index);
            }
        }
        before - comments.len()
    }
}
