//! Pure conversions between LSP shapes and the tsserver wire dialect.
//!
//! tsserver coordinates are 1-based, LSP coordinates 0-based; every function
//! here is total and does nothing but arithmetic and table lookups, so the
//! dispatcher can stay free of coordinate juggling.

use std::path::{Path, PathBuf};

use tower_lsp::lsp_types::{
    self as lsp, DiagnosticSeverity, DocumentHighlight, DocumentHighlightKind, Location, Position,
    Range, SymbolKind, TextEdit, Url,
};

use crate::protocol::{
    CodeEdit, Diagnostic, FileRangeRequestArgs, FileSpan, HighlightSpan, JsDocTagInfo,
    SymbolDisplayPart, TextSpan, TsLocation,
};

pub fn to_position(location: TsLocation) -> Position {
    Position::new(
        location.line.saturating_sub(1),
        location.offset.saturating_sub(1),
    )
}

pub fn to_ts_location(position: Position) -> TsLocation {
    TsLocation {
        line: position.line + 1,
        offset: position.character + 1,
    }
}

pub fn as_range(span: &TextSpan) -> Range {
    Range::new(to_position(span.start), to_position(span.end))
}

pub fn to_text_span(range: Range) -> TextSpan {
    TextSpan {
        start: to_ts_location(range.start),
        end: to_ts_location(range.end),
    }
}

pub fn span_range(start: TsLocation, end: TsLocation) -> Range {
    Range::new(to_position(start), to_position(end))
}

pub fn to_file_range_args(file: &Path, range: Range) -> FileRangeRequestArgs {
    let start = to_ts_location(range.start);
    let end = to_ts_location(range.end);
    FileRangeRequestArgs {
        file: file.display().to_string(),
        start_line: start.line,
        start_offset: start.offset,
        end_line: end.line,
        end_offset: end.offset,
    }
}

/// Filesystem path for a `file://` uri. Anything else is not ours.
pub fn uri_to_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}

pub fn path_to_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

pub fn to_location(file: &str, start: TsLocation, end: TsLocation) -> Option<Location> {
    let uri = path_to_uri(Path::new(file))?;
    Some(Location::new(uri, span_range(start, end)))
}

pub fn file_span_to_location(span: &FileSpan) -> Option<Location> {
    to_location(&span.file, span.start, span.end)
}

pub fn to_text_edit(edit: &CodeEdit) -> TextEdit {
    TextEdit::new(span_range(edit.start, edit.end), edit.new_text.clone())
}

pub fn to_document_highlight(span: &HighlightSpan) -> DocumentHighlight {
    let kind = if span.kind == "writtenReference" {
        DocumentHighlightKind::WRITE
    } else {
        DocumentHighlightKind::READ
    };
    DocumentHighlight {
        range: span_range(span.start, span.end),
        kind: Some(kind),
    }
}

pub fn to_diagnostic(diagnostic: &Diagnostic) -> lsp::Diagnostic {
    lsp::Diagnostic {
        range: span_range(diagnostic.start, diagnostic.end),
        severity: Some(to_severity(&diagnostic.category)),
        code: diagnostic.code.map(|code| lsp::NumberOrString::Number(code as i32)),
        source: Some(
            diagnostic
                .source
                .clone()
                .unwrap_or_else(|| "typescript".to_string()),
        ),
        message: diagnostic.text.clone(),
        ..Default::default()
    }
}

pub fn to_severity(category: &str) -> DiagnosticSeverity {
    match category {
        "warning" => DiagnosticSeverity::WARNING,
        "suggestion" => DiagnosticSeverity::HINT,
        "message" => DiagnosticSeverity::INFORMATION,
        _ => DiagnosticSeverity::ERROR,
    }
}

/// tsserver `ScriptElementKind` display strings to LSP symbol kinds.
pub fn to_symbol_kind(kind: &str) -> SymbolKind {
    match kind {
        "module" => SymbolKind::MODULE,
        "class" | "local class" => SymbolKind::CLASS,
        "enum" => SymbolKind::ENUM,
        "interface" => SymbolKind::INTERFACE,
        "method" => SymbolKind::METHOD,
        "constructor" => SymbolKind::CONSTRUCTOR,
        "property" | "getter" | "setter" => SymbolKind::FIELD,
        "var" | "let" | "local var" | "parameter" | "alias" => SymbolKind::VARIABLE,
        "const" => SymbolKind::CONSTANT,
        "function" | "local function" => SymbolKind::FUNCTION,
        "script" => SymbolKind::FILE,
        _ => SymbolKind::VARIABLE,
    }
}

/// tsserver `ScriptElementKind` display strings to LSP completion kinds.
pub fn to_completion_kind(kind: &str) -> lsp::CompletionItemKind {
    use lsp::CompletionItemKind as K;
    match kind {
        "primitive type" | "keyword" => K::KEYWORD,
        "const" | "string" => K::CONSTANT,
        "let" | "var" | "local var" | "alias" => K::VARIABLE,
        "property" | "getter" | "setter" => K::FIELD,
        "function" => K::FUNCTION,
        "method" | "construct" | "call" | "index" => K::METHOD,
        "enum" => K::ENUM,
        "module" | "external module name" => K::MODULE,
        "class" | "type" => K::CLASS,
        "interface" => K::INTERFACE,
        "warning" | "script" => K::FILE,
        "directory" => K::FOLDER,
        _ => K::PROPERTY,
    }
}

pub const KIND_MODIFIER_OPTIONAL: &str = "optional";
pub const KIND_MODIFIER_DEPRECATED: &str = "deprecated";
pub const FILE_EXTENSION_KIND_MODIFIERS: &[&str] = &[".d.ts", ".ts", ".tsx", ".js", ".jsx"];

/// Kind modifiers arrive as a comma- or space-separated string.
pub fn parse_kind_modifiers(modifiers: &str) -> Vec<&str> {
    modifiers
        .split([',', ' '])
        .filter(|part| !part.is_empty())
        .collect()
}

/// `languageId` to the `scriptKindName` tsserver expects in `open`.
pub fn script_kind_name(language_id: &str) -> &'static str {
    match language_id {
        "typescriptreact" => "TSX",
        "javascript" => "JS",
        "javascriptreact" => "JSX",
        _ => "TS",
    }
}

pub fn as_plain_text(parts: &[SymbolDisplayPart]) -> String {
    parts.iter().map(|part| part.text.as_str()).collect()
}

pub fn as_tags_documentation(tags: &[JsDocTagInfo]) -> String {
    tags.iter()
        .map(|tag| match &tag.text {
            Some(text) => format!("@{} {}", tag.name, text.as_text()),
            None => format!("@{}", tag.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Documentation parts and JSDoc tags joined into one block.
pub fn as_documentation(parts: &[SymbolDisplayPart], tags: Option<&[JsDocTagInfo]>) -> String {
    let mut sections = Vec::new();
    let text = as_plain_text(parts);
    if !text.is_empty() {
        sections.push(text);
    }
    if let Some(tags) = tags {
        if !tags.is_empty() {
            sections.push(as_tags_documentation(tags));
        }
    }
    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32, offset: u32) -> TsLocation {
        TsLocation { line, offset }
    }

    #[test]
    fn positions_shift_between_bases() {
        assert_eq!(to_position(loc(1, 1)), Position::new(0, 0));
        assert_eq!(to_ts_location(Position::new(4, 2)), loc(5, 3));
    }

    #[test]
    fn range_args_round_trip() {
        let range = Range::new(Position::new(2, 0), Position::new(3, 7));
        let args = to_file_range_args(Path::new("/a.ts"), range);
        assert_eq!(args.start_line, 3);
        assert_eq!(args.start_offset, 1);
        let span = TextSpan {
            start: loc(args.start_line, args.start_offset),
            end: loc(args.end_line, args.end_offset),
        };
        assert_eq!(as_range(&span), range);
    }

    #[test]
    fn uri_path_round_trip() {
        let uri = Url::parse("file:///home/user/with%20space/a.ts").unwrap();
        let path = uri_to_path(&uri).unwrap();
        assert_eq!(path, PathBuf::from("/home/user/with space/a.ts"));
        assert_eq!(path_to_uri(&path).unwrap(), uri);
    }

    #[test]
    fn non_file_uris_have_no_path() {
        let uri = Url::parse("untitled:Untitled-1").unwrap();
        assert!(uri_to_path(&uri).is_none());
    }

    #[test]
    fn severities_map_by_category() {
        assert_eq!(to_severity("error"), DiagnosticSeverity::ERROR);
        assert_eq!(to_severity("warning"), DiagnosticSeverity::WARNING);
        assert_eq!(to_severity("suggestion"), DiagnosticSeverity::HINT);
        assert_eq!(to_severity("message"), DiagnosticSeverity::INFORMATION);
    }

    #[test]
    fn completion_kind_table_matches_wire_strings() {
        use lsp::CompletionItemKind as K;
        assert_eq!(to_completion_kind("keyword"), K::KEYWORD);
        assert_eq!(to_completion_kind("local var"), K::VARIABLE);
        assert_eq!(to_completion_kind("property"), K::FIELD);
        assert_eq!(to_completion_kind("construct"), K::METHOD);
        assert_eq!(to_completion_kind("external module name"), K::MODULE);
        assert_eq!(to_completion_kind("directory"), K::FOLDER);
        assert_eq!(to_completion_kind("something else"), K::PROPERTY);
    }

    #[test]
    fn kind_modifiers_split_on_commas_and_spaces() {
        assert_eq!(
            parse_kind_modifiers("optional,deprecated"),
            vec!["optional", "deprecated"]
        );
        assert_eq!(parse_kind_modifiers("export .d.ts"), vec!["export", ".d.ts"]);
        assert!(parse_kind_modifiers("").is_empty());
    }

    #[test]
    fn tags_render_as_at_lines() {
        let tags = vec![
            JsDocTagInfo {
                name: "param".into(),
                text: Some(crate::protocol::TagText::Plain("x the input".into())),
            },
            JsDocTagInfo {
                name: "deprecated".into(),
                text: None,
            },
        ];
        assert_eq!(as_tags_documentation(&tags), "@param x the input\n@deprecated");
    }
}
