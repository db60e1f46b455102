// Conversion round trips between LSP shapes and the tsserver dialect.

use std::path::Path;

use proptest::prelude::*;
use tower_lsp::lsp_types::{Position, Range, Url};
use tsbridge::protocol::{TextSpan, TsLocation};
use tsbridge::translate;

#[test]
fn file_uri_round_trip() {
    for raw in [
        "file:///a.ts",
        "file:///home/user/project/src/index.tsx",
        "file:///home/user/with%20space/a.ts",
        "file:///home/user/caf%C3%A9/util.js",
    ] {
        let uri = Url::parse(raw).unwrap();
        let path = translate::uri_to_path(&uri).expect(raw);
        assert_eq!(translate::path_to_uri(&path).unwrap(), uri, "{raw}");
    }
}

#[test]
fn range_through_request_args_round_trip() {
    let range = Range::new(Position::new(0, 0), Position::new(12, 34));
    let args = translate::to_file_range_args(Path::new("/a.ts"), range);
    let span = TextSpan {
        start: TsLocation {
            line: args.start_line,
            offset: args.start_offset,
        },
        end: TsLocation {
            line: args.end_line,
            offset: args.end_offset,
        },
    };
    assert_eq!(translate::as_range(&span), range);
}

proptest! {
    #[test]
    fn position_conversion_round_trip(line in 0u32..100_000, character in 0u32..10_000) {
        let position = Position::new(line, character);
        prop_assert_eq!(
            translate::to_position(translate::to_ts_location(position)),
            position
        );
    }

    #[test]
    fn ts_location_conversion_round_trip(line in 1u32..100_000, offset in 1u32..10_000) {
        let location = TsLocation { line, offset };
        let back = translate::to_ts_location(translate::to_position(location));
        prop_assert_eq!(back.line, location.line);
        prop_assert_eq!(back.offset, location.offset);
    }
}
