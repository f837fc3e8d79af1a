use serde_json::json;
use tempfile::TempDir;

use vaultsync_core::content::{Block, BlockKind, RichText};
use vaultsync_core::{ContentTree, ItemSummary};
use vaultsync_render::{ConvertOptions, MarkdownConverter};

fn tree() -> ContentTree {
    let item = ItemSummary::from_api(&json!({
        "id": "page-0001",
        "created_time": "2024-01-02T03:04:05Z",
        "last_edited_time": "2024-01-03T00:00:00Z",
        "url": "https://www.notion.so/0001",
        "properties": {
            "Name": { "type": "title", "title": [{ "plain_text": "Reading List" }] },
            "Tags": { "type": "multi_select", "multi_select": [{ "name": "books" }] }
        }
    }))
    .unwrap();
    ContentTree::new(
        item,
        vec![
            Block::new(BlockKind::Heading {
                level: 2,
                text: vec![RichText::plain("Fiction")],
            }),
            Block::new(BlockKind::BulletedListItem {
                text: vec![RichText::plain("Dune")],
            }),
            Block::new(BlockKind::Unknown {
                kind: "ai_block".into(),
                raw: serde_json::Value::Null,
            }),
        ],
    )
}

#[test]
fn converts_full_page() {
    let converter = MarkdownConverter::new(ConvertOptions::default()).unwrap();
    let out = converter.convert(&tree()).unwrap();

    assert_eq!(out.document.filename, "Reading List.md");
    assert_eq!(out.unsupported, vec!["ai_block".to_string()]);

    let markdown = out.document.to_markdown();
    assert!(markdown.starts_with("---\nnotion_id: page-0001\n"), "{markdown}");
    assert!(markdown.contains("Tags:\n- books\n"), "{markdown}");
    assert!(markdown.ends_with(
        "---\n\n# Reading List\n\n## Fiction\n\n- Dune\n\n<!-- unsupported block: ai_block -->\n"
    ));
}

#[test]
fn template_override_changes_body() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("page.md.tera"),
        "{{ content }}\n\nSource: {{ url }}\n",
    )
    .unwrap();

    let converter = MarkdownConverter::new(ConvertOptions {
        template_dir: Some(dir.path().to_path_buf()),
        ..ConvertOptions::default()
    })
    .unwrap();
    let out = converter.convert(&tree()).unwrap();

    assert!(out.document.body.starts_with("## Fiction"));
    assert!(out
        .document
        .body
        .ends_with("Source: https://www.notion.so/0001\n"));
}

#[test]
fn long_lines_produce_warnings() {
    let mut t = tree();
    t.blocks.push(Block::new(BlockKind::Paragraph {
        text: vec![RichText::plain("x".repeat(1500))],
    }));
    let converter = MarkdownConverter::new(ConvertOptions::default()).unwrap();
    let out = converter.convert(&t).unwrap();
    assert!(out.warnings.iter().any(|w| w.contains("very long")));
}
