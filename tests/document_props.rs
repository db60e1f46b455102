// Property tests for the document mirror: random edit scripts applied
// through the LSP position machinery must match a naive character-splice
// reference model.

use proptest::prelude::*;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};
use tsbridge::document::Document;

fn doc(text: &str) -> Document {
    Document::new(
        Url::parse("file:///prop.ts").unwrap(),
        "/prop.ts".into(),
        "typescript".to_string(),
        1,
        text,
    )
}

proptest! {
    #[test]
    fn mirror_matches_naive_edit_application(
        initial in "[ -~\\n]{0,80}",
        ops in prop::collection::vec(
            (any::<usize>(), any::<usize>(), "[ -~\\n]{0,10}"),
            0..12,
        ),
    ) {
        let mut document = doc(&initial);
        let mut reference: Vec<char> = initial.chars().collect();
        let mut version = 1;

        for (a, b, text) in ops {
            let len = reference.len();
            let mut start = a % (len + 1);
            let mut end = b % (len + 1);
            if start > end {
                std::mem::swap(&mut start, &mut end);
            }

            let range = Range::new(document.position_at(start), document.position_at(end));
            version += 1;
            document.apply_edit(
                version,
                &TextDocumentContentChangeEvent {
                    range: Some(range),
                    range_length: None,
                    text: text.clone(),
                },
            );
            reference.splice(start..end, text.chars());

            prop_assert_eq!(document.text(), reference.iter().collect::<String>());
            prop_assert_eq!(document.version(), version);
        }
    }

    #[test]
    fn position_offset_round_trip(initial in "[ -~\\n]{0,120}") {
        let document = doc(&initial);
        for offset in 0..=initial.chars().count() {
            let position = document.position_at(offset);
            prop_assert_eq!(document.offset_at(position), offset);
        }
    }

    #[test]
    fn full_text_change_always_wins(
        initial in "[ -~\\n]{0,40}",
        replacement in "[ -~\\n]{0,40}",
    ) {
        let mut document = doc(&initial);
        document.apply_edit(
            2,
            &TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: replacement.clone(),
            },
        );
        prop_assert_eq!(document.text(), replacement);
    }
}

#[test]
fn scenario_open_then_change() {
    // didOpen "x", then replace [0,0..0,1] with "y" at version 2: the mirror
    // must read "y" and the tsserver change args for the edit are 1-based.
    let mut document = doc("x");
    let range = Range::new(Position::new(0, 0), Position::new(0, 1));
    document.apply_edit(
        2,
        &TextDocumentContentChangeEvent {
            range: Some(range),
            range_length: None,
            text: "y".to_string(),
        },
    );
    assert_eq!(document.text(), "y");

    let start = tsbridge::translate::to_ts_location(range.start);
    let end = tsbridge::translate::to_ts_location(range.end);
    assert_eq!((start.line, start.offset), (1, 1));
    assert_eq!((end.line, end.offset), (1, 2));
}
