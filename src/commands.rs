//! `workspace/executeCommand` handlers.
//!
//! Code actions, refactorings and file renames do not apply themselves: the
//! server hands the client a `_typescript.*` command, and the client sends
//! it back here to be executed. Unlike the read-side handlers, failures in
//! this module propagate to the client as JSON-RPC errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tower_lsp::jsonrpc::{Error, ErrorCode, Result};
use tower_lsp::lsp_types::{
    notification::Notification, ExecuteCommandParams, TextDocumentIdentifier,
    TextDocumentPositionParams, TextEdit, Url, WorkspaceEdit,
};
use tower_lsp::Client;

use crate::protocol::{
    ApplyCodeActionCommandRequestArgs, CodeAction, Command, FileCodeEdits,
    GetEditsForFileRenameRequestArgs, GetEditsForRefactorRequestArgs, OrganizeImportsRequestArgs,
    OrganizeImportsScope, RefactorEditInfo,
};
use crate::translate;
use crate::tsserver::{TsServer, TsServerError};

pub const APPLY_WORKSPACE_EDIT: &str = "_typescript.applyWorkspaceEdit";
pub const APPLY_CODE_ACTION: &str = "_typescript.applyCodeAction";
pub const APPLY_REFACTORING: &str = "_typescript.applyRefactoring";
pub const ORGANIZE_IMPORTS: &str = "_typescript.organizeImports";
pub const APPLY_RENAME_FILE: &str = "_typescript.applyRenameFile";
pub const APPLY_COMPLETION_CODE_ACTION: &str = "_typescript.applyCompletionCodeAction";

pub fn supported_commands() -> Vec<String> {
    [
        APPLY_WORKSPACE_EDIT,
        APPLY_CODE_ACTION,
        APPLY_REFACTORING,
        ORGANIZE_IMPORTS,
        APPLY_RENAME_FILE,
        APPLY_COMPLETION_CODE_ACTION,
    ]
    .iter()
    .map(|command| command.to_string())
    .collect()
}

/// Sent to the client after a refactoring whose edits leave a symbol that
/// should be renamed right away (`renameLocation` in the tsserver reply).
pub enum TypescriptRename {}

impl Notification for TypescriptRename {
    type Params = TextDocumentPositionParams;
    const METHOD: &'static str = "_typescript.rename";
}

pub async fn execute(
    client: &Client,
    server: &TsServer,
    params: ExecuteCommandParams,
) -> Result<Option<Value>> {
    let mut arguments = params.arguments.into_iter();
    match params.command.as_str() {
        APPLY_WORKSPACE_EDIT => {
            let edit: WorkspaceEdit = argument(arguments.next())?;
            apply_workspace_edit(client, edit).await?;
        }
        APPLY_CODE_ACTION => {
            let action: CodeAction = argument(arguments.next())?;
            apply_code_action(client, server, &action).await?;
        }
        APPLY_REFACTORING => {
            let args: GetEditsForRefactorRequestArgs = argument(arguments.next())?;
            apply_refactoring(client, server, args).await?;
        }
        ORGANIZE_IMPORTS => {
            let file: String = argument(arguments.next())?;
            organize_imports(client, server, file).await?;
        }
        APPLY_RENAME_FILE => {
            let args: RenameFileArguments = argument(arguments.next())?;
            apply_rename_file(client, server, args).await?;
        }
        APPLY_COMPLETION_CODE_ACTION => {
            let _file: String = argument(arguments.next())?;
            let actions: Vec<CodeAction> = argument(arguments.next())?;
            for action in &actions {
                apply_code_action(client, server, action).await?;
            }
        }
        unknown => {
            return Err(Error::invalid_params(format!("unknown command: {unknown}")));
        }
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameFileArguments {
    source_uri: Url,
    target_uri: Url,
}

async fn apply_workspace_edit(client: &Client, edit: WorkspaceEdit) -> Result<()> {
    let response = client.apply_edit(edit).await?;
    if !response.applied {
        return Err(internal(
            response
                .failure_reason
                .unwrap_or_else(|| "the client rejected the workspace edit".to_string()),
        ));
    }
    Ok(())
}

async fn apply_code_action(client: &Client, server: &TsServer, action: &CodeAction) -> Result<()> {
    if !action.changes.is_empty() {
        apply_workspace_edit(client, code_edits_to_workspace_edit(&action.changes)).await?;
    }
    for command in action.commands.iter().flatten() {
        server
            .request(
                Command::ApplyCodeActionCommand,
                ApplyCodeActionCommandRequestArgs {
                    command: command.clone(),
                },
            )
            .await
            .map_err(ts_error)?;
    }
    Ok(())
}

async fn apply_refactoring(
    client: &Client,
    server: &TsServer,
    args: GetEditsForRefactorRequestArgs,
) -> Result<()> {
    let file = args.file.clone();
    let body = server
        .request(Command::GetEditsForRefactor, args)
        .await
        .map_err(ts_error)?;
    let info: RefactorEditInfo = decode(body)?;

    // Refactorings like "move to new file" target files that do not exist
    // yet; the workspace edit can only apply once they do.
    for edit in &info.edits {
        ensure_file_exists(Path::new(&edit.file_name)).await?;
    }
    if !info.edits.is_empty() {
        apply_workspace_edit(client, code_edits_to_workspace_edit(&info.edits)).await?;
    }

    if let Some(location) = info.rename_location {
        let rename_file = info.rename_filename.unwrap_or(file);
        if let Some(uri) = translate::path_to_uri(Path::new(&rename_file)) {
            client
                .send_notification::<TypescriptRename>(TextDocumentPositionParams {
                    text_document: TextDocumentIdentifier { uri },
                    position: translate::to_position(location),
                })
                .await;
        }
    }
    Ok(())
}

async fn organize_imports(client: &Client, server: &TsServer, file: String) -> Result<()> {
    let body = server
        .request(
            Command::OrganizeImports,
            OrganizeImportsRequestArgs {
                scope: OrganizeImportsScope::file(file),
            },
        )
        .await
        .map_err(ts_error)?;
    let edits: Vec<FileCodeEdits> = decode(body)?;
    if !edits.is_empty() {
        apply_workspace_edit(client, code_edits_to_workspace_edit(&edits)).await?;
    }
    Ok(())
}

async fn apply_rename_file(
    client: &Client,
    server: &TsServer,
    args: RenameFileArguments,
) -> Result<()> {
    let old_path = path_of(&args.source_uri)?;
    let new_path = path_of(&args.target_uri)?;
    let body = server
        .request(
            Command::GetEditsForFileRename,
            GetEditsForFileRenameRequestArgs {
                old_file_path: old_path.display().to_string(),
                new_file_path: new_path.display().to_string(),
            },
        )
        .await
        .map_err(ts_error)?;
    let edits: Vec<FileCodeEdits> = decode(body)?;
    if !edits.is_empty() {
        apply_workspace_edit(client, code_edits_to_workspace_edit(&edits)).await?;
    }
    Ok(())
}

/// Edits for several files, as one LSP workspace edit.
pub fn code_edits_to_workspace_edit(edits: &[FileCodeEdits]) -> WorkspaceEdit {
    let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
    for file_edits in edits {
        let Some(uri) = translate::path_to_uri(Path::new(&file_edits.file_name)) else {
            tracing::warn!(file = %file_edits.file_name, "dropping edits for unmappable path");
            continue;
        };
        changes
            .entry(uri)
            .or_default()
            .extend(file_edits.text_changes.iter().map(translate::to_text_edit));
    }
    WorkspaceEdit {
        changes: Some(changes),
        ..Default::default()
    }
}

async fn ensure_file_exists(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| internal(format!("could not create {}: {err}", parent.display())))?;
    }
    tokio::fs::write(path, "")
        .await
        .map_err(|err| internal(format!("could not create {}: {err}", path.display())))
}

fn path_of(uri: &Url) -> Result<PathBuf> {
    translate::uri_to_path(uri)
        .ok_or_else(|| Error::invalid_params(format!("not a file uri: {uri}")))
}

fn argument<T: serde::de::DeserializeOwned>(value: Option<Value>) -> Result<T> {
    let value = value.ok_or_else(|| Error::invalid_params("missing command argument"))?;
    serde_json::from_value(value)
        .map_err(|err| Error::invalid_params(format!("malformed command argument: {err}")))
}

fn decode<T: serde::de::DeserializeOwned>(body: Option<Value>) -> Result<T> {
    let body = body.ok_or_else(|| internal("tsserver reply had no body".to_string()))?;
    serde_json::from_value(body).map_err(|err| internal(format!("malformed tsserver body: {err}")))
}

fn internal(message: String) -> Error {
    Error {
        code: ErrorCode::InternalError,
        message: message.into(),
        data: None,
    }
}

pub(crate) fn ts_error(err: TsServerError) -> Error {
    internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CodeEdit, TsLocation};

    #[test]
    fn all_six_commands_are_advertised() {
        let commands = supported_commands();
        assert_eq!(commands.len(), 6);
        assert!(commands.iter().all(|c| c.starts_with("_typescript.")));
    }

    #[test]
    fn file_edits_group_into_one_workspace_edit() {
        let edits = vec![
            FileCodeEdits {
                file_name: "/a.ts".into(),
                text_changes: vec![CodeEdit {
                    start: TsLocation { line: 1, offset: 1 },
                    end: TsLocation { line: 1, offset: 4 },
                    new_text: "foo".into(),
                }],
            },
            FileCodeEdits {
                file_name: "/a.ts".into(),
                text_changes: vec![CodeEdit {
                    start: TsLocation { line: 2, offset: 1 },
                    end: TsLocation { line: 2, offset: 1 },
                    new_text: "bar".into(),
                }],
            },
            FileCodeEdits {
                file_name: "/b.ts".into(),
                text_changes: vec![],
            },
        ];

        let edit = code_edits_to_workspace_edit(&edits);
        let changes = edit.changes.unwrap();
        assert_eq!(changes.len(), 2);
        let a = &changes[&Url::parse("file:///a.ts").unwrap()];
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].new_text, "foo");
    }

    #[test]
    fn rename_file_arguments_use_uris() {
        let args: RenameFileArguments = serde_json::from_str(
            r#"{"sourceUri":"file:///old.ts","targetUri":"file:///new.ts"}"#,
        )
        .unwrap();
        assert_eq!(args.source_uri.path(), "/old.ts");
        assert_eq!(args.target_uri.path(), "/new.ts");
    }
}
