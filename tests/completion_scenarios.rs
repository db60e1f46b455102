// End-to-end completion scenarios against canned tsserver JSON bodies.

use std::path::{Path, PathBuf};

use tower_lsp::lsp_types::{CompletionTextEdit, Position};
use tsbridge::completion::{
    apply_completion_details, build_completion_items, CompletionContext, CompletionSettings,
};
use tsbridge::protocol::{CompletionEntryDetails, CompletionInfo};

fn member_completion_info() -> CompletionInfo {
    serde_json::from_str(
        r#"{
            "isGlobalCompletion": false,
            "isMemberCompletion": true,
            "isNewIdentifierLocation": false,
            "entries": [
                {"name": "toFixed", "kind": "method", "kindModifiers": "", "sortText": "11"},
                {"name": "valueOf", "kind": "method", "kindModifiers": "", "sortText": "11"},
                {"name": "somethingLikeThat", "kind": "warning", "sortText": "12"}
            ]
        }"#,
    )
    .unwrap()
}

#[test]
fn member_completion_ranges_straddle_the_dot() {
    // Buffer "num." with the cursor right after the dot.
    let ctx = CompletionContext::new(PathBuf::from("/a.ts"), Position::new(0, 4), "num.".into());
    let items = build_completion_items(
        &member_completion_info(),
        &ctx,
        &CompletionSettings::default(),
    );
    assert_eq!(items.len(), 3);

    for item in &items {
        let Some(CompletionTextEdit::InsertAndReplace(edit)) = &item.text_edit else {
            panic!("expected an insert/replace edit for {}", item.label);
        };
        assert_eq!(edit.insert.start, Position::new(0, 4), "inserting starts at the cursor");
        assert_eq!(edit.replace.start, Position::new(0, 3), "replacing starts at the dot");
        assert_eq!(edit.replace.end, Position::new(0, 4));
        // Single line, containing the cursor.
        assert_eq!(edit.replace.start.line, edit.replace.end.line);
    }
}

#[test]
fn warning_entries_are_filtered_when_names_are_off() {
    let ctx = CompletionContext::new(PathBuf::from("/a.ts"), Position::new(0, 4), "num.".into());
    let settings = CompletionSettings {
        names: false,
        ..Default::default()
    };
    let items = build_completion_items(&member_completion_info(), &ctx, &settings);
    let labels: Vec<_> = items.iter().map(|item| item.label.as_str()).collect();
    assert_eq!(labels, vec!["toFixed", "valueOf"]);
}

#[test]
fn auto_import_resolve_splits_code_actions() {
    let details: CompletionEntryDetails = serde_json::from_str(
        r#"{
            "name": "Foo",
            "kind": "class",
            "kindModifiers": "export",
            "displayParts": [{"text": "class Foo", "kind": "text"}],
            "documentation": [{"text": "A class.", "kind": "text"}],
            "codeActions": [
                {
                    "description": "Import 'Foo' from module \"./foo\"",
                    "changes": [
                        {
                            "fileName": "/a.ts",
                            "textChanges": [
                                {
                                    "start": {"line": 1, "offset": 1},
                                    "end": {"line": 1, "offset": 1},
                                    "newText": "import { Foo } from './foo';\n"
                                }
                            ]
                        },
                        {
                            "fileName": "/other.ts",
                            "textChanges": [
                                {
                                    "start": {"line": 1, "offset": 1},
                                    "end": {"line": 1, "offset": 1},
                                    "newText": "export {};\n"
                                }
                            ]
                        }
                    ]
                }
            ]
        }"#,
    )
    .unwrap();

    let mut item = tower_lsp::lsp_types::CompletionItem {
        label: "Foo".to_string(),
        ..Default::default()
    };
    apply_completion_details(&mut item, &details, Path::new("/a.ts"), Some("./foo"));

    assert_eq!(
        item.detail.as_deref(),
        Some("Auto import from './foo'\nclass Foo")
    );

    // The current-file edit is applied with the completion itself.
    let additional = item.additional_text_edits.as_ref().unwrap();
    assert_eq!(additional.len(), 1);
    assert!(additional[0].new_text.starts_with("import { Foo }"));

    // Whatever touches other files rides along as one trailing command.
    let command = item.command.as_ref().unwrap();
    assert_eq!(command.command, "_typescript.applyCompletionCodeAction");
    let arguments = command.arguments.as_ref().unwrap();
    assert_eq!(arguments[0], serde_json::json!("/a.ts"));
    let remaining = arguments[1].as_array().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        remaining[0]["changes"][0]["fileName"],
        serde_json::json!("/other.ts")
    );
}

#[test]
fn resolve_without_code_actions_sets_documentation_only() {
    let details: CompletionEntryDetails = serde_json::from_str(
        r#"{
            "name": "toFixed",
            "kind": "method",
            "kindModifiers": "",
            "displayParts": [{"text": "(method) Number.toFixed(): string", "kind": "text"}],
            "documentation": [{"text": "Formats a number.", "kind": "text"}],
            "tags": [{"name": "since", "text": "es3"}]
        }"#,
    )
    .unwrap();

    let mut item = tower_lsp::lsp_types::CompletionItem {
        label: "toFixed".to_string(),
        ..Default::default()
    };
    apply_completion_details(&mut item, &details, Path::new("/a.ts"), None);

    assert_eq!(item.detail.as_deref(), Some("(method) Number.toFixed(): string"));
    let Some(tower_lsp::lsp_types::Documentation::MarkupContent(markup)) = &item.documentation
    else {
        panic!("expected markup documentation");
    };
    assert_eq!(markup.value, "Formats a number.\n@since es3");
    assert!(item.command.is_none());
    assert!(item.additional_text_edits.is_none());
}
