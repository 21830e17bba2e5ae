use chrono::{DateTime, Timelike, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content_offset_seconds: f64,
    #[serde(default)]
    pub commenter: Option<Commenter>,
    pub message: Message,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commenter {
    pub display_name: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    /// Login name.
    pub name: String,
    /// Avatar URL.
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub bits_spent: u32,
    #[serde(default)]
    pub fragments: Option<Vec<Fragment>>,
    #[serde(default)]
    pub user_badges: Option<Vec<UserBadge>>,
    #[serde(default)]
    pub user_color: Option<String>,
    #[serde(default)]
    pub user_notice_params: Option<UserNoticeParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Fragment {
    pub text: String,
    #[serde(default)]
    pub emoticon: Option<EmoticonRef>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emoticon: None,
        }
    }

    pub fn emote(text: impl Into<String>, emoticon_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emoticon: Some(EmoticonRef {
                emoticon_id: emoticon_id.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmoticonRef {
    pub emoticon_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserBadge {
    #[serde(rename = "_id")]
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserNoticeParams {
    #[serde(default)]
    pub msg_id: Option<String>,
}

impl Comment {
    /// Plain text comment, mainly for tests and synthetic transcripts.
    pub fn plain(
        id: &str,
        offset_seconds: f64,
        created_at: DateTime<Utc>,
        login: &str,
        display_name: &str,
        body: &str,
    ) -> Self {
        Self {
            id: id.to_owned(),
            created_at,
            content_offset_seconds: offset_seconds,
            commenter: Some(Commenter {
                display_name: display_name.to_owned(),
                id: String::new(),
                name: login.to_owned(),
                logo: None,
            }),
            message: Message {
                body: body.to_owned(),
                bits_spent: 0,
                fragments: Some(vec![Fragment::text(body)]),
                user_badges: None,
                user_color: None,
                user_notice_params: None,
            },
        }
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.message
            .user_notice_params
            .as_ref()
            .and_then(|params| params.msg_id.as_deref())
    }

    pub fn created_millisecond(&self) -> u32 {
        self.created_at.nanosecond() % 1_000_000_000 / 1_000_000
    }

    pub fn badge_version(&self, badge_name: &str) -> Option<&str> {
        self.message
            .user_badges
            .as_ref()?
            .iter()
            .find(|badge| badge.name == badge_name)
            .map(|badge| badge.version.as_str())
    }
}

impl Commenter {
    /// Name shown in chat: the display name, with the login appended when the
    /// display name is a localized (non-ASCII) name that differs from it.
    pub fn shown_name(&self) -> String {
        if !self.display_name.is_ascii()
            && !self.display_name.eq_ignore_ascii_case(&self.name)
            && !self.name.is_empty()
        {
            format!("{} ({})", self.display_name, self.name)
        } else {
            self.display_name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Comment, Commenter};

    #[test]
    fn created_millisecond_reads_subsecond() {
        let created = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 5)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::milliseconds(734);
        let comment = Comment::plain("1", 5.0, created, "a", "A", "x");
        assert_eq!(comment.created_millisecond(), 734);
    }

    #[test]
    fn localized_names_show_login() {
        let commenter = Commenter {
            display_name: "日本語".to_owned(),
            id: String::new(),
            name: "nihongo".to_owned(),
            logo: None,
        };
        assert_eq!(commenter.shown_name(), "日本語 (nihongo)");

        let ascii = Commenter {
            display_name: "Alice".to_owned(),
            id: String::new(),
            name: "alice".to_owned(),
            logo: None,
        };
        assert_eq!(ascii.shown_name(), "Alice");
    }
}
