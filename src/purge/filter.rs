//! Page filtering: decide which search results are deletable.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::api::Message;

/// Message types eligible for deletion: regular messages (0) and the
/// system-notice range (6..=21).
fn is_deletable_kind(kind: u8) -> bool {
    kind == 0 || (6..=21).contains(&kind)
}

/// Compile the optional content pattern case-insensitively.
///
/// A malformed pattern is ignored with a warning rather than aborting the
/// run; `warned` suppresses repeats across pages.
pub(crate) fn compile_pattern(pattern: Option<&str>, warned: &mut bool) -> Option<Regex> {
    let pattern = pattern?;
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            if !*warned {
                warn!(pattern, error = %e, "Ignoring malformed content pattern");
                *warned = true;
            }
            None
        }
    }
}

/// Split a flattened page into the to-delete set and the skipped set.
///
/// Skipped entries are still consumed for pagination purposes. Order is
/// preserved in both halves.
pub(crate) fn partition_page(
    messages: Vec<Message>,
    include_pinned: bool,
    pattern: Option<&Regex>,
) -> (Vec<Message>, Vec<Message>) {
    let mut to_delete = Vec::new();
    let mut skipped = Vec::new();
    for message in messages {
        let eligible = !message.id.is_empty()
            && message.author.is_some()
            && is_deletable_kind(message.kind)
            && (!message.pinned || include_pinned)
            && pattern.is_none_or(|re| re.is_match(&message.content));
        if eligible {
            to_delete.push(message);
        } else {
            skipped.push(message);
        }
    }
    (to_delete, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Author;

    fn message(id: &str, kind: u8, pinned: bool, content: &str) -> Message {
        Message {
            id: id.to_string(),
            channel_id: "channel-1".to_string(),
            author: Some(Author {
                id: "author-1".to_string(),
                username: "tester".to_string(),
                display_name: None,
            }),
            content: content.to_string(),
            timestamp: None,
            pinned,
            kind,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_partitions_by_kind() {
        let page = vec![
            message("1", 0, false, "keep"),
            message("2", 5, false, "call notice"),
            message("3", 7, false, "system notice"),
            message("4", 22, false, "too new"),
        ];
        let (to_delete, skipped) = partition_page(page, false, None);
        assert_eq!(to_delete.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["1", "3"]);
        assert_eq!(skipped.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["2", "4"]);
    }

    #[test]
    fn test_pinned_skipped_unless_included() {
        let page = vec![message("1", 0, true, "pinned")];
        let (to_delete, skipped) = partition_page(page.clone(), false, None);
        assert!(to_delete.is_empty());
        assert_eq!(skipped.len(), 1);

        let (to_delete, skipped) = partition_page(page, true, None);
        assert_eq!(to_delete.len(), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_missing_author_or_id_skipped() {
        let mut no_author = message("1", 0, false, "x");
        no_author.author = None;
        let no_id = message("", 0, false, "x");
        let (to_delete, skipped) = partition_page(vec![no_author, no_id], false, None);
        assert!(to_delete.is_empty());
        assert_eq!(skipped.len(), 2);
    }

    #[test]
    fn test_pattern_is_case_insensitive() {
        let mut warned = false;
        let regex = compile_pattern(Some("^hello"), &mut warned).unwrap();
        let page = vec![
            message("1", 0, false, "HELLO there"),
            message("2", 0, false, "goodbye"),
        ];
        let (to_delete, skipped) = partition_page(page, false, Some(&regex));
        assert_eq!(to_delete.len(), 1);
        assert_eq!(to_delete[0].id, "1");
        assert_eq!(skipped.len(), 1);
        assert!(!warned);
    }

    #[test]
    fn test_malformed_pattern_ignored_with_single_warning() {
        let mut warned = false;
        assert!(compile_pattern(Some("([unclosed"), &mut warned).is_none());
        assert!(warned);
        // Second compile stays quiet but still yields no regex.
        assert!(compile_pattern(Some("([unclosed"), &mut warned).is_none());
    }
}
