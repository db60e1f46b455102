//! The completion pipeline.
//!
//! Builds LSP completion items out of a tsserver `completionInfo` response
//! and later resolves individual items through `completionEntryDetails`.
//! Most of the subtlety is in reproducing editor behavior around filter
//! text and replacement ranges:
//! - private `#`-field entries filter differently depending on whether the
//!   user already typed the `#`,
//! - `this.`-prefixed insert texts get no filter text at all so they do not
//!   crowd out plain completions,
//! - bracket-accessor insert texts (`["abc"]`) filter as `.abc`,
//! - when no replacement span is provided, the longest label prefix found
//!   immediately before the cursor becomes the replaced range,
//! - a dot-accessor context (`.` or `?.` before the cursor) widens the
//!   replacing range and prefixes the filter text.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{
    Command as LspCommand, CompletionItem, CompletionItemTag, CompletionTextEdit, Documentation,
    InsertReplaceEdit, InsertTextFormat, MarkupContent, MarkupKind, Position, Range,
};

use crate::commands::APPLY_COMPLETION_CODE_ACTION;
use crate::protocol::{
    CodeAction, CompletionEntry, CompletionEntryDetails, CompletionEntryIdentifier,
    CompletionInfo, TextSpan,
};
use crate::translate;

/// Completion toggles from `initializationOptions.suggest`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSettings {
    pub names: bool,
    pub paths: bool,
    pub auto_imports: bool,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            names: true,
            paths: true,
            auto_imports: true,
        }
    }
}

/// The textual context directly before a member-completion cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct DotAccessorContext {
    pub text: String,
    pub range: Range,
}

/// Everything the item builder needs to know about the request site.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    pub file: PathBuf,
    pub position: Position,
    line: String,
    prefix: String,
    pub dot_accessor: Option<DotAccessorContext>,
}

impl CompletionContext {
    pub fn new(file: PathBuf, position: Position, line: String) -> Self {
        let prefix = utf16_prefix(&line, position.character as usize);
        let dot_accessor = dot_accessor_context(&prefix, position);
        Self {
            file,
            position,
            line,
            prefix,
            dot_accessor,
        }
    }

    fn line_end(&self) -> Position {
        Position::new(
            self.position.line,
            self.line.encode_utf16().count() as u32,
        )
    }
}

/// Stored on each item and echoed back by the client on resolve; exactly the
/// `completionEntryDetails` argument shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItemData {
    pub file: String,
    pub line: u32,
    pub offset: u32,
    pub entry_names: Vec<CompletionEntryIdentifier>,
}

/// Detect a `.` or `?.` directly before the cursor. The pattern is matched
/// against the line prefix only; this is intentionally not a parser.
pub fn dot_accessor_context(prefix: &str, position: Position) -> Option<DotAccessorContext> {
    static DOT: OnceLock<Regex> = OnceLock::new();
    let re = DOT.get_or_init(|| Regex::new(r"\??\.\s*$").unwrap());
    let m = re.find(prefix)?;
    let start_col = prefix[..m.start()].encode_utf16().count() as u32;
    Some(DotAccessorContext {
        text: prefix[m.start()..].to_string(),
        range: Range::new(Position::new(position.line, start_col), position),
    })
}

/// Build the LSP completion list for one `completionInfo` response.
pub fn build_completion_items(
    info: &CompletionInfo,
    ctx: &CompletionContext,
    settings: &CompletionSettings,
) -> Vec<CompletionItem> {
    info.entries
        .iter()
        .filter(|entry| should_include_entry(entry, settings))
        .map(|entry| build_item(entry, ctx))
        .collect()
}

fn should_include_entry(entry: &CompletionEntry, settings: &CompletionSettings) -> bool {
    if !settings.names && entry.kind == "warning" {
        return false;
    }
    if !settings.paths
        && matches!(entry.kind.as_str(), "directory" | "script" | "external module name")
    {
        return false;
    }
    if !settings.auto_imports && entry.has_action == Some(true) {
        return false;
    }
    true
}

fn build_item(entry: &CompletionEntry, ctx: &CompletionContext) -> CompletionItem {
    let kind = translate::to_completion_kind(&entry.kind);
    let modifiers = entry
        .kind_modifiers
        .as_deref()
        .map(translate::parse_kind_modifiers)
        .unwrap_or_default();

    let mut label = entry.name.clone();
    if modifiers.contains(&translate::KIND_MODIFIER_OPTIONAL) && !label.ends_with('?') {
        label.push('?');
    }

    let mut detail = None;
    if entry.kind == "script" {
        for ext in translate::FILE_EXTENSION_KIND_MODIFIERS {
            if modifiers.contains(ext) {
                detail = Some(if entry.name.ends_with(ext) {
                    entry.name.clone()
                } else {
                    format!("{}{}", entry.name, ext)
                });
                break;
            }
        }
    }

    let mut sort_text = entry.sort_text.clone();
    if entry.source.is_some() {
        // De-prioritize auto-imports below everything local.
        sort_text.insert(0, '\u{ffff}');
    }

    let mut filter_text = filter_text(entry, ctx);
    let new_text = entry.insert_text.clone().unwrap_or_else(|| entry.name.clone());
    let ranges = item_ranges(entry, ctx);
    let text_edit = ranges.map(|ranges| {
        CompletionTextEdit::InsertAndReplace(InsertReplaceEdit {
            new_text: new_text.clone(),
            insert: ranges.inserting,
            replace: ranges.replacing,
        })
    });
    if let Some(dot) = &ctx.dot_accessor {
        filter_text = Some(format!(
            "{}{}",
            dot.text,
            filter_text.as_deref().unwrap_or(&entry.name)
        ));
    }

    let data = CompletionItemData {
        file: ctx.file.display().to_string(),
        line: ctx.position.line + 1,
        offset: ctx.position.character + 1,
        entry_names: vec![match &entry.source {
            Some(source) => CompletionEntryIdentifier::WithSource {
                name: entry.name.clone(),
                source: source.clone(),
            },
            None => CompletionEntryIdentifier::Name(entry.name.clone()),
        }],
    };

    CompletionItem {
        label,
        kind: Some(kind),
        detail,
        tags: modifiers
            .contains(&translate::KIND_MODIFIER_DEPRECATED)
            .then(|| vec![CompletionItemTag::DEPRECATED]),
        sort_text: Some(sort_text),
        filter_text,
        preselect: entry.is_recommended,
        insert_text_format: matches!(
            kind,
            tower_lsp::lsp_types::CompletionItemKind::FUNCTION
                | tower_lsp::lsp_types::CompletionItemKind::METHOD
        )
        .then_some(InsertTextFormat::SNIPPET),
        commit_characters: commit_characters(&entry.kind),
        text_edit,
        data: serde_json::to_value(&data).ok(),
        ..Default::default()
    }
}

/// Commit characters by entry kind: members and types accept `.`, callables
/// additionally `,` and `(`.
fn commit_characters(kind: &str) -> Option<Vec<String>> {
    let chars: &[&str] = match kind {
        "getter" | "setter" | "construct" | "call" | "index" | "enum" | "interface" => &["."],
        "module" | "alias" | "const" | "let" | "var" | "local var" | "property" | "class"
        | "function" | "method" => &[".", ",", "("],
        _ => return None,
    };
    Some(chars.iter().map(|c| c.to_string()).collect())
}

fn filter_text(entry: &CompletionEntry, ctx: &CompletionContext) -> Option<String> {
    let insert = entry.insert_text.as_deref();

    if entry.name.starts_with('#') {
        let has_hash = word_before_cursor_starts_with_hash(&ctx.prefix);
        return match insert {
            Some(text) if text.starts_with("this.#") => {
                if has_hash {
                    Some(text.to_string())
                } else {
                    Some(text["this.#".len()..].to_string())
                }
            }
            Some(text) => Some(text.to_string()),
            None => {
                if has_hash {
                    None
                } else {
                    Some(entry.name[1..].to_string())
                }
            }
        };
    }

    match insert {
        // `this.` completions must not outrank plain ones.
        Some(text) if text.starts_with("this.") => None,
        Some(text) => {
            static BRACKET: OnceLock<Regex> = OnceLock::new();
            let re = BRACKET.get_or_init(|| Regex::new(r#"^\[['"](.+)['"]\]$"#).unwrap());
            match re.captures(text) {
                // So that `xyz.ab` filters against `.abc` instead of `["abc"]`.
                Some(caps) => Some(format!(".{}", &caps[1])),
                None => Some(text.to_string()),
            }
        }
        None => None,
    }
}

fn word_before_cursor_starts_with_hash(prefix: &str) -> bool {
    let chars: Vec<char> = prefix.chars().collect();
    let mut start = chars.len();
    while start > 0 {
        let ch = chars[start - 1];
        if ch.is_alphanumeric() || matches!(ch, '_' | '$' | '#') {
            start -= 1;
        } else {
            break;
        }
    }
    chars.get(start) == Some(&'#')
}

#[derive(Debug, Clone, Copy)]
struct ItemRanges {
    inserting: Range,
    replacing: Range,
}

fn item_ranges(entry: &CompletionEntry, ctx: &CompletionContext) -> Option<ItemRanges> {
    let mut ranges = match &entry.replacement_span {
        Some(span) => span_ranges(span, ctx),
        None => {
            let range = local_replacement_range(&entry.name, &ctx.prefix, ctx.position);
            ItemRanges {
                inserting: range,
                replacing: range,
            }
        }
    };
    if let Some(dot) = &ctx.dot_accessor {
        ranges.replacing = union(dot.range, ranges.replacing);
    }
    Some(ranges)
}

fn span_ranges(span: &TextSpan, ctx: &CompletionContext) -> ItemRanges {
    let mut range = translate::as_range(span);
    if range.start.line != range.end.line {
        // A multi-line replacement would drag surrounding lines along with
        // the accepted completion; clamp to the starting line.
        range.end = if range.start.line == ctx.position.line {
            ctx.line_end()
        } else {
            range.start
        };
    }
    if range.end < ctx.position {
        range.end = ctx.position;
    }
    let insert_end = ctx.position.max(range.start);
    ItemRanges {
        inserting: Range::new(range.start, insert_end),
        replacing: range,
    }
}

/// Longest prefix of `label` that appears, case-insensitively, directly
/// before the cursor.
fn local_replacement_range(label: &str, prefix: &str, position: Position) -> Range {
    let prefix_chars: Vec<char> = prefix.chars().collect();
    let label_chars: Vec<char> = label.chars().collect();
    let max = label_chars.len().min(prefix_chars.len());
    for len in (1..=max).rev() {
        let tail = &prefix_chars[prefix_chars.len() - len..];
        let head = &label_chars[..len];
        let matches = tail
            .iter()
            .zip(head)
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if matches {
            let width: usize = tail.iter().map(|c| c.len_utf16()).sum();
            let start = Position::new(position.line, position.character - width as u32);
            return Range::new(start, position);
        }
    }
    Range::new(position, position)
}

fn union(a: Range, b: Range) -> Range {
    Range::new(a.start.min(b.start), a.end.max(b.end))
}

fn utf16_prefix(line: &str, character: usize) -> String {
    let mut remaining = character;
    let mut prefix = String::new();
    for ch in line.chars() {
        let width = ch.len_utf16();
        if remaining < width {
            break;
        }
        remaining -= width;
        prefix.push(ch);
    }
    prefix
}

/// Fold a `completionEntryDetails` response into the item being resolved.
pub fn apply_completion_details(
    item: &mut CompletionItem,
    details: &CompletionEntryDetails,
    file: &Path,
    source: Option<&str>,
) {
    let display = translate::as_plain_text(&details.display_parts);
    item.detail = match source {
        Some(source) => Some(format!("Auto import from '{}'\n{}", source, display)),
        None if display.is_empty() => None,
        None => Some(display),
    };

    let documentation = translate::as_documentation(
        details.documentation.as_deref().unwrap_or(&[]),
        details.tags.as_deref(),
    );
    if !documentation.is_empty() {
        item.documentation = Some(Documentation::MarkupContent(MarkupContent {
            kind: MarkupKind::Markdown,
            value: documentation,
        }));
    }

    let mut additional_edits = Vec::new();
    let mut remaining_actions: Vec<CodeAction> = Vec::new();
    for action in details.code_actions.iter().flatten() {
        let mut other_changes = Vec::new();
        for change in &action.changes {
            if Path::new(&change.file_name) == file {
                additional_edits.extend(change.text_changes.iter().map(translate::to_text_edit));
            } else {
                other_changes.push(change.clone());
            }
        }
        if !other_changes.is_empty() || action.commands.is_some() {
            remaining_actions.push(CodeAction {
                description: action.description.clone(),
                changes: other_changes,
                commands: action.commands.clone(),
            });
        }
    }
    if !additional_edits.is_empty() {
        item.additional_text_edits = Some(additional_edits);
    }
    if !remaining_actions.is_empty() {
        item.command = Some(LspCommand {
            title: String::new(),
            command: APPLY_COMPLETION_CODE_ACTION.to_string(),
            arguments: Some(vec![
                serde_json::json!(file.display().to_string()),
                serde_json::json!(remaining_actions),
            ]),
        });
    }
}
