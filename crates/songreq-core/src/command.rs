//! Song-request command recognition.

use regex::Regex;

/// A recognised request, alive for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCommand {
    pub query: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parse {
    /// Not a request command at all.
    Miss,
    /// The prefix was typed with nothing usable after it.
    Empty { user: String },
    Request(RequestCommand),
}

#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: String,
    url: Regex,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            url: Regex::new(r"https?://\S+").expect("static URL pattern"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn parse(&self, line: &str, user: &str) -> Parse {
        let Some(rest) = line.strip_prefix(self.prefix.as_str()) else {
            return Parse::Miss;
        };
        // `!srfoo` is some other command, not a request for "foo".
        if rest.chars().next().is_some_and(|c| !c.is_whitespace()) {
            return Parse::Miss;
        }

        let query = self.url.replace_all(rest, "");
        let query = query.trim();
        if query.is_empty() {
            return Parse::Empty {
                user: user.to_string(),
            };
        }

        Parse::Request(RequestCommand {
            query: query.to_string(),
            user: user.to_string(),
        })
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("!sr")
    }
}
