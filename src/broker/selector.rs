//! Message selectors
//!
//! A subscription filters messages by tag. The expression is either empty or `*`
//! (match everything) or a `||`-separated list of tags.

use std::collections::HashSet;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageSelector {
    #[default]
    All,
    Tags(HashSet<String>),
}

impl MessageSelector {
    pub fn all() -> Self {
        Self::All
    }

    /// Parses a tag expression such as `"create || pay"`.
    pub fn parse(expression: &str) -> Self {
        let tags: HashSet<String> = expression
            .split("||")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        if tags.is_empty() || tags.contains("*") {
            Self::All
        } else {
            Self::Tags(tags)
        }
    }

    pub fn matches(&self, tag: &str) -> bool {
        match self {
            Self::All => true,
            Self::Tags(tags) => tags.contains(tag),
        }
    }
}

impl Display for MessageSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Tags(tags) => {
                let mut sorted: Vec<_> = tags.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                write!(f, "{}", sorted.join(" || "))
            }
        }
    }
}
