//! Commit message trailers linking user commits and shadow snapshots to checkpoints.
//!
//! Trailers live in the last paragraph of a commit message as `Key: value`
//! lines. Git comment lines (`#`) and everything below a scissors line are
//! ignored on parse and preserved on append.

use crate::types::CheckpointId;

pub const CHECKPOINT_TRAILER: &str = "Entire-Checkpoint";
pub const SESSION_TRAILER: &str = "Entire-Session";
pub const STRATEGY_TRAILER: &str = "Entire-Strategy";

const SCISSORS_MARKER: &str = "------------------------ >8 ------------------------";

pub fn format_trailer(key: &str, value: &str) -> String {
    format!("{key}: {value}")
}

/// Split a message into the editable body and the git comment tail.
fn split_comment_tail(message: &str) -> (Vec<&str>, Vec<&str>) {
    let lines: Vec<&str> = message.lines().collect();
    let mut cut = lines
        .iter()
        .position(|l| l.starts_with('#') && l.contains(SCISSORS_MARKER))
        .unwrap_or(lines.len());
    while cut > 0 {
        let l = lines[cut - 1];
        if l.starts_with('#') || l.trim().is_empty() {
            cut -= 1;
        } else {
            break;
        }
    }
    (lines[..cut].to_vec(), lines[cut..].to_vec())
}

fn parse_trailer_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let valid_key = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid_key {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Lines of the last body paragraph, if that paragraph is a trailer block.
fn trailer_block<'a>(body: &[&'a str]) -> Vec<&'a str> {
    let content: Vec<&str> = body
        .iter()
        .copied()
        .filter(|l| !l.starts_with('#'))
        .collect();
    let end = content
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    let start = content[..end]
        .iter()
        .rposition(|l| l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    let para = &content[start..end];
    // A lone subject line is never a trailer block.
    if start > 0 && !para.is_empty() && para.iter().all(|l| parse_trailer_line(l).is_some()) {
        para.to_vec()
    } else {
        Vec::new()
    }
}

/// All trailers in the message's final paragraph, in order.
pub fn parse_trailers(message: &str) -> Vec<(String, String)> {
    let (body, _) = split_comment_tail(message);
    trailer_block(&body)
        .into_iter()
        .filter_map(parse_trailer_line)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// First value of `key` among the trailers.
pub fn trailer_value(message: &str, key: &str) -> Option<String> {
    parse_trailers(message)
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// The checkpoint id referenced by `Entire-Checkpoint`, if present and well-formed.
pub fn parse_checkpoint_trailer(message: &str) -> Option<CheckpointId> {
    trailer_value(message, CHECKPOINT_TRAILER).and_then(|v| CheckpointId::parse(&v).ok())
}

/// Append `key: value` to the message's trailer block, inserting it above any
/// git comment tail so it survives comment stripping.
pub fn append_trailer(message: &str, key: &str, value: &str) -> String {
    let (mut body, tail) = split_comment_tail(message);
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    let line = format_trailer(key, value);

    let mut out = String::new();
    if body.is_empty() {
        // Room for the subject the user is about to type in the editor.
        out.push_str("\n\n");
    } else {
        out.push_str(&body.join("\n"));
        out.push('\n');
        if trailer_block(&body).is_empty() {
            out.push('\n');
        }
    }
    out.push_str(&line);
    out.push('\n');
    if !tail.is_empty() {
        out.push_str(&tail.join("\n"));
        out.push('\n');
    }
    out
}

/// True when the message, ignoring comments, holds nothing but trailers.
/// Such a message means the user left the editor empty.
pub fn is_trailer_only(message: &str) -> bool {
    let (body, _) = split_comment_tail(message);
    let content: Vec<&str> = body
        .iter()
        .copied()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .collect();
    !content.is_empty() && content.iter().all(|l| parse_trailer_line(l).is_some())
}

/// Remove every trailer line with `key`, leaving the rest of the message intact.
pub fn strip_trailer(message: &str, key: &str) -> String {
    let prefix = format!("{key}:");
    let kept: Vec<&str> = message
        .lines()
        .filter(|l| !l.starts_with(&prefix))
        .collect();
    let mut out = kept.join("\n");
    if message.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_plain_message_adds_blank_line() {
        let msg = append_trailer("Fix parser\n\nLonger body.\n", CHECKPOINT_TRAILER, "a1b2c3d4e5f6");
        assert_eq!(
            msg,
            "Fix parser\n\nLonger body.\n\nEntire-Checkpoint: a1b2c3d4e5f6\n"
        );
        assert_eq!(
            parse_checkpoint_trailer(&msg).unwrap().as_str(),
            "a1b2c3d4e5f6"
        );
    }

    #[test]
    fn append_joins_existing_trailer_block() {
        let msg = append_trailer(
            "Fix parser\n\nSigned-off-by: Dev <dev@example.com>\n",
            CHECKPOINT_TRAILER,
            "a1b2c3d4e5f6",
        );
        assert_eq!(
            msg,
            "Fix parser\n\nSigned-off-by: Dev <dev@example.com>\nEntire-Checkpoint: a1b2c3d4e5f6\n"
        );
        assert_eq!(parse_trailers(&msg).len(), 2);
    }

    #[test]
    fn append_goes_above_comment_tail() {
        let template = "\n# Please enter the commit message for your changes.\n#\n# On branch main\n";
        let msg = append_trailer(template, CHECKPOINT_TRAILER, "0123456789ab");
        assert!(msg.starts_with("\n\nEntire-Checkpoint: 0123456789ab\n\n# Please enter"));
        assert!(is_trailer_only(&msg));
        assert_eq!(
            parse_checkpoint_trailer(&msg).unwrap().as_str(),
            "0123456789ab"
        );
    }

    #[test]
    fn scissors_section_is_ignored() {
        let msg = "Subject\n\nEntire-Checkpoint: 0123456789ab\n# ------------------------ >8 ------------------------\n# Do not modify\ndiff --git a/x b/x\nFoo: bar\n";
        assert_eq!(
            parse_checkpoint_trailer(msg).unwrap().as_str(),
            "0123456789ab"
        );
        assert_eq!(parse_trailers(msg).len(), 1);
    }

    #[test]
    fn prose_colon_is_not_a_trailer() {
        let msg = "Subject\n\nNote: this paragraph has prose after it\nand continues here\n";
        assert!(parse_trailers(msg).is_empty());
        assert!(parse_checkpoint_trailer(msg).is_none());

        let subject_only = append_trailer("fix: parser\n", CHECKPOINT_TRAILER, "0123456789ab");
        assert_eq!(subject_only, "fix: parser\n\nEntire-Checkpoint: 0123456789ab\n");
    }

    #[test]
    fn malformed_checkpoint_value_is_ignored() {
        let msg = "Subject\n\nEntire-Checkpoint: not-an-id\n";
        assert_eq!(
            trailer_value(msg, CHECKPOINT_TRAILER).as_deref(),
            Some("not-an-id")
        );
        assert!(parse_checkpoint_trailer(msg).is_none());
    }

    #[test]
    fn trailer_only_detection_and_strip() {
        let msg = "Entire-Checkpoint: 0123456789ab\n# comment\n";
        assert!(is_trailer_only(msg));
        assert!(!is_trailer_only("Real subject\n\nEntire-Checkpoint: 0123456789ab\n"));
        let stripped = strip_trailer(msg, CHECKPOINT_TRAILER);
        assert_eq!(stripped, "# comment\n");
        assert!(!is_trailer_only(&stripped));
    }
}
