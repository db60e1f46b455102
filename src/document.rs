//! Open-document mirror.
//!
//! Keeps an in-memory copy of every file the editor has opened, so that the
//! bridge can:
//! - apply incremental LSP edits and hand tsserver the matching `change`
//!   notifications,
//! - convert between LSP positions (0-based line, UTF-16 column) and
//!   absolute buffer offsets,
//! - answer "what word is under the cursor" style questions locally.
//!
//! The set of open documents is ordered most-recently-accessed first; the
//! workspace-symbol handler uses the front of that order as its file context.

use std::path::{Path, PathBuf};

use lru::LruCache;
use ropey::Rope;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};

/// One open text document, mirrored from the editor.
#[derive(Debug, Clone)]
pub struct Document {
    uri: Url,
    path: PathBuf,
    language_id: String,
    version: i32,
    content: Rope,
}

impl Document {
    pub fn new(uri: Url, path: PathBuf, language_id: String, version: i32, text: &str) -> Self {
        Self {
            uri,
            path,
            language_id,
            version,
            content: Rope::from_str(text),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn text(&self) -> String {
        self.content.to_string()
    }

    /// Number of lines, counting the empty line after a trailing newline.
    pub fn line_count(&self) -> usize {
        self.content.len_lines()
    }

    /// Apply one LSP content change. A change without a range replaces the
    /// whole document. The document version becomes `new_version` afterwards.
    pub fn apply_edit(&mut self, new_version: i32, change: &TextDocumentContentChangeEvent) {
        match change.range {
            Some(range) => {
                let start = self.offset_at(range.start);
                let end = self.offset_at(range.end);
                self.content.remove(start..end);
                self.content.insert(start, &change.text);
            }
            None => {
                self.content = Rope::from_str(&change.text);
            }
        }
        self.version = new_version;
    }

    /// Absolute char offset for an LSP position. The character component is
    /// counted in UTF-16 code units; positions past the end of a line clamp
    /// to the line end, lines past the end of the document clamp to the
    /// document end.
    pub fn offset_at(&self, position: Position) -> usize {
        let line = position.line as usize;
        if line >= self.content.len_lines() {
            return self.content.len_chars();
        }
        let line_start = self.content.line_to_char(line);
        let mut remaining = position.character as usize;
        let mut chars = 0usize;
        for ch in self.content.line(line).chars() {
            if ch == '\n' || ch == '\r' {
                break;
            }
            let width = ch.len_utf16();
            if remaining < width {
                break;
            }
            remaining -= width;
            chars += 1;
        }
        line_start + chars
    }

    /// Inverse of [`offset_at`]: LSP position for an absolute char offset.
    ///
    /// [`offset_at`]: Document::offset_at
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.content.len_chars());
        let line = self.content.char_to_line(offset);
        let line_start = self.content.line_to_char(line);
        let character =
            self.content.char_to_utf16_cu(offset) - self.content.char_to_utf16_cu(line_start);
        Position::new(line as u32, character as u32)
    }

    /// The text of a line, without its trailing line break.
    pub fn line_text(&self, line: usize) -> Option<String> {
        if line >= self.content.len_lines() {
            return None;
        }
        let text: String = self.content.line(line).chars().collect();
        Some(text.trim_end_matches(['\n', '\r']).to_string())
    }

    /// Range covering the content of a line (line break excluded).
    pub fn line_range(&self, line: usize) -> Option<Range> {
        let text = self.line_text(line)?;
        let width = text.encode_utf16().count() as u32;
        Some(Range::new(
            Position::new(line as u32, 0),
            Position::new(line as u32, width),
        ))
    }

    /// The portion of the position's line that lies before the position.
    pub fn line_prefix(&self, position: Position) -> Option<String> {
        let line = self.line_text(position.line as usize)?;
        let mut remaining = position.character as usize;
        let mut prefix = String::new();
        for ch in line.chars() {
            let width = ch.len_utf16();
            if remaining < width {
                break;
            }
            remaining -= width;
            prefix.push(ch);
        }
        Some(prefix)
    }

    /// The character directly before the position on its line, if any.
    pub fn char_before(&self, position: Position) -> Option<char> {
        self.line_prefix(position)?.chars().last()
    }

    /// Range of the maximal run of non-whitespace characters around the
    /// position. Returns `None` when the position touches whitespace on both
    /// sides.
    pub fn word_range_at_position(&self, position: Position) -> Option<Range> {
        let line = position.line as usize;
        let text: Vec<char> = self.line_text(line)?.chars().collect();
        let mut cursor = 0usize;
        let mut remaining = position.character as usize;
        for ch in &text {
            let width = ch.len_utf16();
            if remaining < width {
                break;
            }
            remaining -= width;
            cursor += 1;
        }

        let before = cursor > 0 && !text[cursor - 1].is_whitespace();
        let after = cursor < text.len() && !text[cursor].is_whitespace();
        if !before && !after {
            return None;
        }

        let mut start = cursor;
        while start > 0 && !text[start - 1].is_whitespace() {
            start -= 1;
        }
        let mut end = cursor;
        while end < text.len() && !text[end].is_whitespace() {
            end += 1;
        }

        let utf16_at = |idx: usize| text[..idx].iter().map(|c| c.len_utf16()).sum::<usize>() as u32;
        Some(Range::new(
            Position::new(line as u32, utf16_at(start)),
            Position::new(line as u32, utf16_at(end)),
        ))
    }

    /// Range spanning the entire document.
    pub fn full_range(&self) -> Range {
        Range::new(Position::new(0, 0), self.position_at(self.content.len_chars()))
    }
}

/// The set of open documents, keyed by filesystem path and ordered
/// most-recently-accessed first. Each successful lookup refreshes the
/// document's position in that order.
pub struct OpenDocuments {
    docs: LruCache<PathBuf, Document>,
}

impl OpenDocuments {
    pub fn new() -> Self {
        Self {
            docs: LruCache::unbounded(),
        }
    }

    /// Insert a document. Returns `false` (and keeps the existing entry)
    /// when the path is already open.
    pub fn open(&mut self, path: PathBuf, document: Document) -> bool {
        if self.docs.contains(&path) {
            return false;
        }
        self.docs.put(path, document);
        true
    }

    pub fn close(&mut self, path: &Path) -> Option<Document> {
        self.docs.pop(path)
    }

    pub fn get(&mut self, path: &Path) -> Option<&Document> {
        self.docs.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Document> {
        self.docs.get_mut(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.docs.contains(path)
    }

    /// Open paths, most recently accessed first.
    pub fn paths_mru(&self) -> Vec<PathBuf> {
        self.docs.iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn most_recent(&self) -> Option<&Path> {
        self.docs.iter().next().map(|(path, _)| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl Default for OpenDocuments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new(
            Url::parse("file:///test.ts").unwrap(),
            PathBuf::from("/test.ts"),
            "typescript".to_string(),
            1,
            text,
        )
    }

    #[test]
    fn offset_and_position_are_inverse() {
        let d = doc("let a = 1;\nlet b = 2;\r\nconst c = 3;\n");
        for line in 0..d.line_count() {
            let width = d.line_text(line).unwrap().encode_utf16().count();
            for col in 0..=width {
                let pos = Position::new(line as u32, col as u32);
                assert_eq!(d.position_at(d.offset_at(pos)), pos);
            }
        }
    }

    #[test]
    fn offset_counts_utf16_code_units() {
        // '𐐀' is two UTF-16 code units, one char.
        let d = doc("a𐐀b\n");
        assert_eq!(d.offset_at(Position::new(0, 0)), 0);
        assert_eq!(d.offset_at(Position::new(0, 1)), 1);
        assert_eq!(d.offset_at(Position::new(0, 3)), 2);
        assert_eq!(d.offset_at(Position::new(0, 4)), 3);
        assert_eq!(d.position_at(2), Position::new(0, 3));
    }

    #[test]
    fn positions_clamp_to_line_and_document_end() {
        let d = doc("ab\ncd");
        assert_eq!(d.offset_at(Position::new(0, 99)), 2);
        assert_eq!(d.offset_at(Position::new(9, 0)), 5);
    }

    #[test]
    fn incremental_edit_replaces_range() {
        let mut d = doc("hello world");
        d.apply_edit(
            2,
            &TextDocumentContentChangeEvent {
                range: Some(Range::new(Position::new(0, 6), Position::new(0, 11))),
                range_length: None,
                text: "there".to_string(),
            },
        );
        assert_eq!(d.text(), "hello there");
        assert_eq!(d.version(), 2);
    }

    #[test]
    fn full_text_edit_replaces_document() {
        let mut d = doc("old");
        d.apply_edit(
            3,
            &TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "entirely new\ncontent".to_string(),
            },
        );
        assert_eq!(d.text(), "entirely new\ncontent");
        assert_eq!(d.line_count(), 2);
    }

    #[test]
    fn edit_across_crlf_line_break() {
        let mut d = doc("one\r\ntwo\r\nthree");
        d.apply_edit(
            2,
            &TextDocumentContentChangeEvent {
                range: Some(Range::new(Position::new(0, 3), Position::new(1, 0))),
                range_length: None,
                text: " ".to_string(),
            },
        );
        assert_eq!(d.text(), "one two\r\nthree");
    }

    #[test]
    fn word_range_surrounds_position() {
        let d = doc("foo bar.baz qux");
        let range = d.word_range_at_position(Position::new(0, 6)).unwrap();
        assert_eq!(range.start, Position::new(0, 4));
        assert_eq!(range.end, Position::new(0, 11));
    }

    #[test]
    fn word_range_is_none_on_whitespace() {
        let d = doc("foo  bar");
        assert!(d.word_range_at_position(Position::new(0, 4)).is_none());
    }

    #[test]
    fn line_prefix_stops_at_position() {
        let d = doc("const x = obj.");
        assert_eq!(
            d.line_prefix(Position::new(0, 14)).unwrap(),
            "const x = obj."
        );
        assert_eq!(d.line_prefix(Position::new(0, 5)).unwrap(), "const");
    }

    #[test]
    fn open_documents_track_access_order() {
        let mut docs = OpenDocuments::new();
        assert!(docs.open(PathBuf::from("/a.ts"), doc("a")));
        assert!(docs.open(PathBuf::from("/b.ts"), doc("b")));
        assert!(!docs.open(PathBuf::from("/a.ts"), doc("a2")), "reopen is rejected");

        assert_eq!(docs.most_recent().unwrap(), Path::new("/b.ts"));
        docs.get(Path::new("/a.ts"));
        assert_eq!(docs.most_recent().unwrap(), Path::new("/a.ts"));

        assert!(docs.close(Path::new("/a.ts")).is_some());
        assert!(docs.close(Path::new("/a.ts")).is_none());
        assert_eq!(docs.len(), 1);
    }
}
