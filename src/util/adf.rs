use serde_json::{json, Value};

fn text(s: &str) -> Value {
    json!({ "type": "text", "text": s })
}

/// Build a Jira Atlassian Document Format (ADF) body from titled sections.
///
/// Blank-line separated blocks become paragraphs. ADF rejects empty text
/// nodes, so empty blocks are dropped.
pub fn document(sections: &[(&str, &str)], footer: Option<&str>) -> Value {
    let mut content = Vec::new();
    for (heading, body) in sections {
        content.push(json!({
            "type": "heading",
            "attrs": { "level": 3 },
            "content": [text(heading)],
        }));
        for block in body.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
            content.push(json!({ "type": "paragraph", "content": [text(block)] }));
        }
    }
    if let Some(footer) = footer.filter(|f| !f.is_empty()) {
        content.push(json!({ "type": "paragraph", "content": [text(footer)] }));
    }
    json!({ "type": "doc", "version": 1, "content": content })
}
