use treebus_error::TopicError;

use super::Flags;

/// Segment separator.
pub const SEPARATOR: char = '/';
/// Leading character of an action segment.
pub const ACTION_PREFIX: char = '!';

/// Suffix characters that alias a flag list of the base topic.
const SUFFIXES: [(char, Flags); 3] = [
    ('$', Flags::METADATA),
    ('~', Flags::REMOVE),
    ('#', Flags::COMPLETION),
];

/// A publish target split into its base topic and optional flag alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicName<'a> {
    pub base: &'a str,
    /// `None` for a plain publish.
    pub suffix: Option<Flags>,
}

impl<'a> TopicName<'a> {
    /// Splits a trailing `$`, `~` or `#` off `name`.
    pub fn parse(name: &'a str) -> Self {
        for (c, flag) in SUFFIXES {
            if let Some(base) = name.strip_suffix(c) {
                return Self {
                    base,
                    suffix: Some(flag),
                };
            }
        }
        Self {
            base: name,
            suffix: None,
        }
    }
}

/// Checks a topic name used for `topic_add`.
pub fn validate(name: &str) -> Result<(), TopicError> {
    let invalid = |reason: &str| TopicError::InvalidName {
        topic: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    let segments: Vec<&str> = name.split(SEPARATOR).collect();
    let last = segments.len() - 1;
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if segment.contains(|c| SUFFIXES.iter().any(|(s, _)| *s == c)) {
            return Err(invalid("reserved suffix character"));
        }
        if idx != last && segment.starts_with(ACTION_PREFIX) {
            return Err(invalid("actions cannot have children"));
        }
    }
    Ok(())
}

/// Last path segment.
pub fn subtopic(name: &str) -> &str {
    name.rsplit(SEPARATOR).next().unwrap_or(name)
}

/// Parent topic; the root (`""`) for top-level names.
pub fn parent(name: &str) -> &str {
    name.rsplit_once(SEPARATOR).map_or("", |(p, _)| p)
}

/// `true` when the last segment marks an action.
pub fn is_action(name: &str) -> bool {
    subtopic(name).starts_with(ACTION_PREFIX)
}

pub fn join(
    parent: &str,
    child: &str,
) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}
