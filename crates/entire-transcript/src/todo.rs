use serde_json::Value;

/// Pick the todo item describing current work from a todo-list tool input
/// (`{"todos": [...]}` or a bare array).
///
/// Preference: the first `in_progress` item, then the first `pending` item.
/// When neither exists but some item carries a status we do not recognise,
/// the first item's content is used. A list where everything is completed
/// yields `None`.
// TODO: revisit the unrecognised-status fallback once agents document their todo statuses.
pub fn current_todo(input: &Value) -> Option<String> {
    let items = input
        .get("todos")
        .and_then(Value::as_array)
        .or_else(|| input.as_array())?;

    let content_of = |item: &Value| {
        item.get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    for wanted in ["in_progress", "pending"] {
        if let Some(found) = items
            .iter()
            .filter(|&i| status_of(i) == wanted)
            .find_map(content_of)
        {
            return Some(found);
        }
    }
    let unrecognised = items
        .iter()
        .any(|i| !matches!(status_of(i), "in_progress" | "pending" | "completed"));
    if unrecognised {
        return items.first().and_then(content_of);
    }
    None
}

fn status_of(item: &Value) -> &str {
    item.get("status").and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_in_progress_then_pending() {
        let input = json!({"todos": [
            {"content": "write tests", "status": "pending"},
            {"content": "fix bug", "status": "in_progress"},
        ]});
        assert_eq!(current_todo(&input).as_deref(), Some("fix bug"));

        let input = json!([
            {"content": "done", "status": "completed"},
            {"content": "next", "status": "pending"},
        ]);
        assert_eq!(current_todo(&input).as_deref(), Some("next"));
    }

    #[test]
    fn unrecognised_status_falls_back_to_first_item() {
        let input = json!({"todos": [
            {"content": "first", "status": "blocked"},
            {"content": "second", "status": "completed"},
        ]});
        assert_eq!(current_todo(&input).as_deref(), Some("first"));

        let input = json!({"todos": [
            {"content": "no status yet"},
            {"content": "later", "status": "completed"},
        ]});
        assert_eq!(current_todo(&input).as_deref(), Some("no status yet"));
    }

    #[test]
    fn all_completed_or_empty_is_none() {
        assert!(current_todo(&json!({"todos": [{"content": "a", "status": "completed"}]})).is_none());
        assert!(current_todo(&json!({"todos": []})).is_none());
        assert!(current_todo(&json!({"other": 1})).is_none());
    }
}
