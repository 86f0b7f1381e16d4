use serde_json::{json, Value};

/// Flatten an Atlassian Document Format (ADF) document to plain text.
///
/// Block nodes (paragraphs, headings, list items) end up on their own lines;
/// inline text inside a block is concatenated. Returns `None` when the
/// document holds no text.
pub fn adf_to_text(value: &Value) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    collect(value, &mut lines, &mut current);
    flush(&mut lines, &mut current);

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn collect(value: &Value, lines: &mut Vec<String>, current: &mut String) {
    match value {
        Value::String(s) => current.push_str(s),
        Value::Array(nodes) => {
            for node in nodes {
                collect(node, lines, current);
            }
        }
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = obj.get("text").and_then(Value::as_str) {
                    current.push_str(text);
                }
            }
            Some("hardBreak") => flush(lines, current),
            Some("mention") => {
                if let Some(text) = obj
                    .get("attrs")
                    .and_then(|a| a.get("text"))
                    .and_then(Value::as_str)
                {
                    current.push_str(text);
                }
            }
            Some("paragraph") | Some("heading") | Some("codeBlock") | Some("listItem") => {
                flush(lines, current);
                if let Some(content) = obj.get("content") {
                    collect(content, lines, current);
                }
                flush(lines, current);
            }
            _ => {
                if let Some(content) = obj.get("content") {
                    collect(content, lines, current);
                }
            }
        },
        _ => {}
    }
}

fn flush(lines: &mut Vec<String>, current: &mut String) {
    let line = current.trim();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
    current.clear();
}

/// Build an ADF document with one paragraph per non-empty line.
pub fn text_to_adf(text: &str) -> Value {
    let content: Vec<Value> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            json!({
                "type": "paragraph",
                "content": [{"type": "text", "text": line}]
            })
        })
        .collect();

    json!({
        "type": "doc",
        "version": 1,
        "content": content
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_lines() {
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "Login fails "},
                    {"type": "text", "text": "on Safari", "marks": [{"type": "strong"}]}
                ]},
                {"type": "bulletList", "content": [
                    {"type": "listItem", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "step one"}]}
                    ]}
                ]},
                {"type": "paragraph", "content": [
                    {"type": "mention", "attrs": {"id": "1", "text": "@sam"}}
                ]}
            ]
        });

        assert_eq!(
            adf_to_text(&doc).as_deref(),
            Some("Login fails on Safari\nstep one\n@sam")
        );
    }

    #[test]
    fn empty_documents_have_no_text() {
        assert_eq!(adf_to_text(&Value::Null), None);
        assert_eq!(adf_to_text(&json!({"type": "doc", "content": []})), None);
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(adf_to_text(&json!("legacy text")).as_deref(), Some("legacy text"));
    }

    #[test]
    fn text_round_trips_through_paragraphs() {
        let doc = text_to_adf("first line\n\nsecond line");
        assert_eq!(doc["content"].as_array().unwrap().len(), 2);
        assert_eq!(adf_to_text(&doc).as_deref(), Some("first line\nsecond line"));
    }
}
