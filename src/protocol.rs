//! The tsserver wire dialect.
//!
//! tsserver speaks newline-delimited JSON over stdio: one request object per
//! line on stdin, one response or event object per line on stdout. The types
//! here model that dialect as owned serde shapes; the translation layer maps
//! them to and from LSP types. All line/offset coordinates on this wire are
//! 1-based.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_SYNTAX_DIAG: &str = "syntaxDiag";
pub const EVENT_SEMANTIC_DIAG: &str = "semanticDiag";
pub const EVENT_SUGGESTION_DIAG: &str = "suggestionDiag";
pub const EVENT_REQUEST_COMPLETED: &str = "requestCompleted";

/// Commands the bridge issues to tsserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Open,
    Close,
    Change,
    Configure,
    CompilerOptionsForInferredProjects,
    CompletionInfo,
    CompletionDetails,
    Quickinfo,
    Definition,
    Implementation,
    TypeDefinition,
    References,
    DocumentHighlights,
    Navtree,
    Navto,
    Rename,
    Format,
    SignatureHelp,
    GetCodeFixes,
    GetApplicableRefactors,
    GetEditsForRefactor,
    OrganizeImports,
    GetEditsForFileRename,
    ApplyCodeActionCommand,
    Geterr,
    GetOutliningSpans,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Open => "open",
            Command::Close => "close",
            Command::Change => "change",
            Command::Configure => "configure",
            Command::CompilerOptionsForInferredProjects => "compilerOptionsForInferredProjects",
            Command::CompletionInfo => "completionInfo",
            Command::CompletionDetails => "completionEntryDetails",
            Command::Quickinfo => "quickinfo",
            Command::Definition => "definition",
            Command::Implementation => "implementation",
            Command::TypeDefinition => "typeDefinition",
            Command::References => "references",
            Command::DocumentHighlights => "documentHighlights",
            Command::Navtree => "navtree",
            Command::Navto => "navto",
            Command::Rename => "rename",
            Command::Format => "format",
            Command::SignatureHelp => "signatureHelp",
            Command::GetCodeFixes => "getCodeFixes",
            Command::GetApplicableRefactors => "getApplicableRefactors",
            Command::GetEditsForRefactor => "getEditsForRefactor",
            Command::OrganizeImports => "organizeImports",
            Command::GetEditsForFileRename => "getEditsForFileRename",
            Command::ApplyCodeActionCommand => "applyCodeActionCommand",
            Command::Geterr => "geterr",
            Command::GetOutliningSpans => "getOutliningSpans",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound message. Requests and notifications share this shape; a
/// notification is simply a request nobody waits on.
#[derive(Debug, Serialize)]
pub struct OutgoingRequest<'a> {
    pub seq: i64,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Any message tsserver writes to stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Response(Response),
    Event(Event),
}

#[derive(Debug, Deserialize)]
pub struct Response {
    pub request_seq: i64,
    pub command: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// A 1-based (line, offset) coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsLocation {
    pub line: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: TsLocation,
    pub end: TsLocation,
}

/// A span attached to a file, as returned by navigation commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpan {
    pub file: String,
    pub start: TsLocation,
    pub end: TsLocation,
}

// ---------------------------------------------------------------------------
// Request arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequestArgs {
    pub file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequestArgs {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_kind_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestArgs {
    pub file: String,
    pub line: u32,
    pub offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
    pub insert_string: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocationRequestArgs {
    pub file: String,
    pub line: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRangeRequestArgs {
    pub file: String,
    pub start_line: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeterrRequestArgs {
    pub files: Vec<String>,
    pub delay: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequestArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_info: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_options: Option<Value>,
}

/// Defaults sent with `compilerOptionsForInferredProjects` right after the
/// child starts, so loose files get sensible checking.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCompilerOptionsForInferredProjectsArgs {
    pub options: InferredProjectCompilerOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredProjectCompilerOptions {
    pub module: &'static str,
    pub target: &'static str,
    pub jsx: &'static str,
    pub allow_js: bool,
    pub allow_synthetic_default_imports: bool,
    pub allow_non_ts_extensions: bool,
    pub resolve_json_module: bool,
    pub source_map: bool,
    pub strict_null_checks: bool,
}

impl Default for InferredProjectCompilerOptions {
    fn default() -> Self {
        Self {
            module: "commonjs",
            target: "es2016",
            jsx: "preserve",
            allow_js: true,
            allow_synthetic_default_imports: true,
            allow_non_ts_extensions: true,
            resolve_json_module: true,
            source_map: true,
            strict_null_checks: true,
        }
    }
}

/// Identifies one completion entry for a `completionEntryDetails` request.
/// Entries resolved from an auto-import carry their module source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionEntryIdentifier {
    Name(String),
    WithSource { name: String, source: String },
}

impl CompletionEntryIdentifier {
    pub fn source(&self) -> Option<&str> {
        match self {
            CompletionEntryIdentifier::Name(_) => None,
            CompletionEntryIdentifier::WithSource { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDetailsRequestArgs {
    pub file: String,
    pub line: u32,
    pub offset: u32,
    pub entry_names: Vec<CompletionEntryIdentifier>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHighlightsRequestArgs {
    pub file: String,
    pub line: u32,
    pub offset: u32,
    pub files_to_search: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavtoRequestArgs {
    pub search_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRequestArgs {
    pub file: String,
    pub line: u32,
    pub offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCodeFixesRequestArgs {
    pub file: String,
    pub start_line: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
    pub error_codes: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEditsForRefactorRequestArgs {
    pub file: String,
    pub start_line: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
    pub refactor: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeImportsRequestArgs {
    pub scope: OrganizeImportsScope,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeImportsScope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub args: FileRequestArgs,
}

impl OrganizeImportsScope {
    pub fn file(file: String) -> Self {
        Self {
            kind: "file",
            args: FileRequestArgs { file },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEditsForFileRenameRequestArgs {
    pub old_file_path: String,
    pub new_file_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCodeActionCommandRequestArgs {
    pub command: Value,
}

// ---------------------------------------------------------------------------
// Response and event bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub start: TsLocation,
    pub end: TsLocation,
    pub text: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEventBody {
    pub file: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompletedEventBody {
    pub request_seq: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInfo {
    #[serde(default)]
    pub is_member_completion: bool,
    #[serde(default)]
    pub is_new_identifier_location: bool,
    #[serde(default)]
    pub optional_replacement_span: Option<TextSpan>,
    #[serde(default)]
    pub entries: Vec<CompletionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEntry {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub kind_modifiers: Option<String>,
    #[serde(default)]
    pub sort_text: String,
    #[serde(default)]
    pub insert_text: Option<String>,
    #[serde(default)]
    pub replacement_span: Option<TextSpan>,
    #[serde(default)]
    pub has_action: Option<bool>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub is_recommended: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDisplayPart {
    pub text: String,
    pub kind: String,
}

/// JSDoc tag text arrives as a plain string from older tsservers and as
/// display parts from newer ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagText {
    Plain(String),
    Parts(Vec<SymbolDisplayPart>),
}

impl TagText {
    pub fn as_text(&self) -> String {
        match self {
            TagText::Plain(text) => text.clone(),
            TagText::Parts(parts) => parts.iter().map(|p| p.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsDocTagInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TagText>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEntryDetails {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub kind_modifiers: String,
    #[serde(default)]
    pub display_parts: Vec<SymbolDisplayPart>,
    #[serde(default)]
    pub documentation: Option<Vec<SymbolDisplayPart>>,
    #[serde(default)]
    pub tags: Option<Vec<JsDocTagInfo>>,
    #[serde(default)]
    pub code_actions: Option<Vec<CodeAction>>,
}

/// A tsserver code action. Serializable both ways: it is embedded in the
/// arguments of the `_typescript.applyCodeAction` command and parsed back
/// when the client executes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAction {
    pub description: String,
    #[serde(default)]
    pub changes: Vec<FileCodeEdits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCodeEdits {
    pub file_name: String,
    pub text_changes: Vec<CodeEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEdit {
    pub start: TsLocation,
    pub end: TsLocation,
    pub new_text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickInfoResponseBody {
    pub kind: String,
    #[serde(default)]
    pub kind_modifiers: String,
    pub start: TsLocation,
    pub end: TsLocation,
    #[serde(default)]
    pub display_string: String,
    #[serde(default)]
    pub documentation: Option<TagText>,
    #[serde(default)]
    pub tags: Option<Vec<JsDocTagInfo>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpItems {
    pub items: Vec<SignatureHelpItem>,
    pub applicable_span: TextSpan,
    pub selected_item_index: u32,
    pub argument_index: u32,
    #[serde(default)]
    pub argument_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpItem {
    #[serde(default)]
    pub prefix_display_parts: Vec<SymbolDisplayPart>,
    #[serde(default)]
    pub suffix_display_parts: Vec<SymbolDisplayPart>,
    #[serde(default)]
    pub separator_display_parts: Vec<SymbolDisplayPart>,
    #[serde(default)]
    pub parameters: Vec<SignatureHelpParameter>,
    #[serde(default)]
    pub documentation: Vec<SymbolDisplayPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpParameter {
    pub name: String,
    #[serde(default)]
    pub display_parts: Vec<SymbolDisplayPart>,
    #[serde(default)]
    pub documentation: Vec<SymbolDisplayPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTree {
    pub text: String,
    pub kind: String,
    #[serde(default)]
    pub kind_modifiers: String,
    #[serde(default)]
    pub spans: Vec<TextSpan>,
    #[serde(default)]
    pub name_span: Option<TextSpan>,
    #[serde(default)]
    pub child_items: Option<Vec<NavigationTree>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavtoItem {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub start: TsLocation,
    pub end: TsLocation,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponseBody {
    pub info: RenameInfo,
    #[serde(default)]
    pub locs: Vec<SpanGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameInfo {
    pub can_rename: bool,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub localized_error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanGroup {
    pub file: String,
    pub locs: Vec<RenameTextSpan>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameTextSpan {
    pub start: TsLocation,
    pub end: TsLocation,
    #[serde(default)]
    pub prefix_text: Option<String>,
    #[serde(default)]
    pub suffix_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesResponseBody {
    #[serde(default)]
    pub refs: Vec<ReferenceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub file: String,
    pub start: TsLocation,
    pub end: TsLocation,
    #[serde(default)]
    pub is_definition: bool,
    #[serde(default)]
    pub is_write_access: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHighlightsItem {
    pub file: String,
    pub highlight_spans: Vec<HighlightSpan>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightSpan {
    pub start: TsLocation,
    pub end: TsLocation,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicableRefactorInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub actions: Vec<RefactorActionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorActionInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub not_applicable_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorEditInfo {
    #[serde(default)]
    pub edits: Vec<FileCodeEdits>,
    #[serde(default)]
    pub rename_location: Option<TsLocation>,
    #[serde(default)]
    pub rename_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutliningSpan {
    pub text_span: TextSpan,
    #[serde(default)]
    pub banner_text: String,
    #[serde(default)]
    pub auto_collapse: bool,
    #[serde(default)]
    pub kind: String,
}
