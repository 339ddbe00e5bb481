//! Block builders for page bodies.
//!
//! Each builder produces a small, fixed slice of the page body; the client
//! composes them in a fixed order (AI summary, description, metadata,
//! source link, divider-separated).

use serde_json::{json, Value};

fn paragraph(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": [{"type": "text", "text": {"content": text}}]
        }
    })
}

fn heading(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_3",
        "heading_3": {
            "rich_text": [{"type": "text", "text": {"content": text}}]
        }
    })
}

/// A divider block.
pub fn divider() -> Value {
    json!({"object": "block", "type": "divider", "divider": {}})
}

/// Heading plus paragraph for the AI-generated thread summary.
pub fn ai_summary_blocks(summary: &str) -> Vec<Value> {
    vec![heading("AI Summary"), paragraph(summary)]
}

/// Heading plus paragraph for the task description.
pub fn description_blocks(description: &str) -> Vec<Value> {
    vec![heading("Description"), paragraph(description)]
}

/// Author and participant lines.
pub fn metadata_blocks(author: Option<&str>, participants: &[String]) -> Vec<Value> {
    let mut blocks = Vec::new();
    if let Some(author) = author {
        blocks.push(paragraph(&format!("Author: {author}")));
    }
    if !participants.is_empty() {
        blocks.push(paragraph(&format!(
            "Participants: {}",
            participants.join(", ")
        )));
    }
    blocks
}

/// Bookmark block linking back to the source discussion.
pub fn source_link_blocks(url: &str) -> Vec<Value> {
    vec![json!({
        "object": "block",
        "type": "bookmark",
        "bookmark": {"url": url}
    })]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_summary_is_heading_plus_paragraph() {
        let blocks = ai_summary_blocks("the gist");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "heading_3");
        assert_eq!(
            blocks[1]["paragraph"]["rich_text"][0]["text"]["content"],
            "the gist"
        );
    }

    #[test]
    fn metadata_omits_absent_parts() {
        assert!(metadata_blocks(None, &[]).is_empty());
        assert_eq!(metadata_blocks(Some("alice"), &[]).len(), 1);

        let blocks = metadata_blocks(Some("alice"), &["bob".to_string(), "carol".to_string()]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[1]["paragraph"]["rich_text"][0]["text"]["content"],
            "Participants: bob, carol"
        );
    }

    #[test]
    fn source_link_is_a_bookmark() {
        let blocks = source_link_blocks("https://chat.example.com/p1");
        assert_eq!(blocks[0]["type"], "bookmark");
        assert_eq!(blocks[0]["bookmark"]["url"], "https://chat.example.com/p1");
    }
}
