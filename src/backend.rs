//! The LSP request dispatcher.
//!
//! Implements every LSP method by orchestrating the other modules: resolve
//! the uri to a path, keep the document mirror in step, translate the
//! request, send it over the tsserver transport, translate the reply back.
//! Read requests swallow protocol errors into empty results; mutating
//! requests surface them to the client. Reads that compete with the
//! diagnostics loop go through [`Backend::interrupt_diagnostics`], which
//! cancels an in-flight `geterr`, runs the read, and re-arms the debounce.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tower_lsp::jsonrpc::{Error, ErrorCode, Result};
use tower_lsp::lsp_types::request::{
    GotoImplementationParams, GotoImplementationResponse, GotoTypeDefinitionParams,
    GotoTypeDefinitionResponse,
};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::calls::{self, CallsParams, CallsResult};
use crate::commands;
use crate::completion::{self, CompletionContext, CompletionItemData, CompletionSettings};
use crate::diagnostics::{DiagnosticKind, DiagnosticsQueue, DiagnosticsScheduler};
use crate::document::{Document, OpenDocuments};
use crate::protocol::{
    ApplicableRefactorInfo, ChangeRequestArgs, Command as TsCommand, CompletionDetailsRequestArgs,
    CompletionEntryDetails, CompletionInfo, ConfigureRequestArgs, DiagnosticEventBody,
    DocumentHighlightsItem, DocumentHighlightsRequestArgs, Event, FileLocationRequestArgs,
    FileRequestArgs, FileSpan, FormatRequestArgs, GetCodeFixesRequestArgs,
    GetEditsForRefactorRequestArgs, NavigationTree, NavtoItem, NavtoRequestArgs,
    OutliningSpan, QuickInfoResponseBody, ReferencesResponseBody, RenameResponseBody,
    SetCompilerOptionsForInferredProjectsArgs, SignatureHelpItem, SignatureHelpItems,
    CodeEdit,
};
use crate::translate;
use crate::tsserver::{find_tsserver, TsServer, TsServerError, TsServerOptions};

/// Startup knobs from the CLI.
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    pub tsserver_path: Option<PathBuf>,
    pub tsserver_log_file: Option<PathBuf>,
    pub tsserver_log_verbosity: Option<String>,
}

/// `initializationOptions` as the bridge understands them; unknown fields
/// are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InitializationOptions {
    suggest: CompletionSettings,
    log_verbosity: Option<String>,
    global_plugins: Vec<String>,
    plugin_probe_locations: Vec<String>,
}

pub struct Backend {
    client: Client,
    options: BridgeOptions,
    server: OnceLock<TsServer>,
    documents: Arc<AsyncMutex<OpenDocuments>>,
    diagnostics: Arc<std::sync::Mutex<DiagnosticsQueue>>,
    scheduler: Arc<DiagnosticsScheduler>,
    workspace_root: RwLock<Option<PathBuf>>,
    hierarchical_symbols: AtomicBool,
    completion_settings: RwLock<CompletionSettings>,
    /// Owns the directory the cancellation marker files live in.
    cancellation_dir: std::sync::Mutex<Option<tempfile::TempDir>>,
}

impl Backend {
    pub fn new(client: Client, options: BridgeOptions) -> Self {
        Self {
            client,
            options,
            server: OnceLock::new(),
            documents: Arc::new(AsyncMutex::new(OpenDocuments::new())),
            diagnostics: Arc::new(std::sync::Mutex::new(DiagnosticsQueue::new())),
            scheduler: Arc::new(DiagnosticsScheduler::new()),
            workspace_root: RwLock::new(None),
            hierarchical_symbols: AtomicBool::new(false),
            completion_settings: RwLock::new(CompletionSettings::default()),
            cancellation_dir: std::sync::Mutex::new(None),
        }
    }

    fn server(&self) -> Result<TsServer> {
        self.server.get().cloned().ok_or_else(|| Error {
            code: ErrorCode::InternalError,
            message: "tsserver has not been started".into(),
            data: None,
        })
    }

    fn root(&self) -> Option<PathBuf> {
        self.workspace_root.read().unwrap().clone()
    }

    async fn schedule_diagnostics(&self) {
        let Some(server) = self.server.get() else {
            return;
        };
        let files: Vec<String> = self
            .documents
            .lock()
            .await
            .paths_mru()
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        Arc::clone(&self.scheduler).schedule(server.clone(), files);
    }

    /// Run a read request ahead of diagnostics: cancel an in-flight
    /// `geterr`, do the read, then re-arm the debounced loop.
    async fn interrupt_diagnostics<T>(&self, request: impl Future<Output = T>) -> T {
        self.scheduler.cancel_inflight();
        let out = request.await;
        self.schedule_diagnostics().await;
        out
    }

    /// Consume tsserver's unsolicited events; diagnostics flow through the
    /// queue and out as `publishDiagnostics`.
    fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<Event>) {
        let client = self.client.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(kind) = DiagnosticKind::from_event(&event.event) else {
                    tracing::trace!(event = %event.event, "ignoring tsserver event");
                    continue;
                };
                let Some(body) = decode_body::<DiagnosticEventBody>(event.body) else {
                    continue;
                };
                let path = PathBuf::from(&body.file);
                let published = body.diagnostics.iter().map(translate::to_diagnostic).collect();
                let merged = {
                    let mut queue = diagnostics.lock().unwrap();
                    queue.update(&path, kind, published);
                    queue.merged(&path)
                };
                if let Some(uri) = translate::path_to_uri(&path) {
                    client.publish_diagnostics(uri, merged, None).await;
                }
            }
        });
    }

    fn resolve_log_file(&self, root: Option<&Path>) -> PathBuf {
        if let Some(path) = &self.options.tsserver_log_file {
            return path.clone();
        }
        if let Some(root) = root {
            let dir = root.join(".log");
            if std::fs::create_dir_all(&dir).is_ok() {
                return dir.join("tsserver.log");
            }
        }
        std::env::temp_dir().join(format!("tsserver-{}.log", std::process::id()))
    }

    async fn spans_to_locations(
        &self,
        command: TsCommand,
        uri: &Url,
        position: Position,
    ) -> Vec<Location> {
        let Some(path) = translate::uri_to_path(uri) else {
            return Vec::new();
        };
        let Ok(server) = self.server() else {
            return Vec::new();
        };
        let spans: Option<Vec<FileSpan>> = decode_body(swallow(
            server.request(command, file_location(&path, position)).await,
        ));
        spans
            .unwrap_or_default()
            .iter()
            .filter_map(translate::file_span_to_location)
            .collect()
    }
}

/// The capabilities advertised on `initialize`.
fn server_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Kind(
            TextDocumentSyncKind::INCREMENTAL,
        )),
        completion_provider: Some(CompletionOptions {
            resolve_provider: Some(true),
            trigger_characters: Some(
                [".", "\"", "'", "/", "@", "<"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            ),
            ..Default::default()
        }),
        signature_help_provider: Some(SignatureHelpOptions {
            trigger_characters: Some(["(", ",", "<"].iter().map(|c| c.to_string()).collect()),
            retrigger_characters: None,
            work_done_progress_options: Default::default(),
        }),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        definition_provider: Some(OneOf::Left(true)),
        implementation_provider: Some(ImplementationProviderCapability::Simple(true)),
        type_definition_provider: Some(TypeDefinitionProviderCapability::Simple(true)),
        references_provider: Some(OneOf::Left(true)),
        document_highlight_provider: Some(OneOf::Left(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        workspace_symbol_provider: Some(OneOf::Left(true)),
        document_formatting_provider: Some(OneOf::Left(true)),
        code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
        folding_range_provider: Some(FoldingRangeProviderCapability::Simple(true)),
        rename_provider: Some(OneOf::Left(true)),
        execute_command_provider: Some(ExecuteCommandOptions {
            commands: commands::supported_commands(),
            work_done_progress_options: Default::default(),
        }),
        ..Default::default()
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        #[allow(deprecated)]
        let root = params
            .root_uri
            .as_ref()
            .and_then(translate::uri_to_path);
        *self.workspace_root.write().unwrap() = root.clone();

        let hierarchical = params
            .capabilities
            .text_document
            .as_ref()
            .and_then(|capabilities| capabilities.document_symbol.as_ref())
            .and_then(|symbols| symbols.hierarchical_document_symbol_support)
            .unwrap_or(false);
        self.hierarchical_symbols.store(hierarchical, Ordering::Relaxed);

        let init_options: InitializationOptions = params
            .initialization_options
            .and_then(|options| serde_json::from_value(options).ok())
            .unwrap_or_default();
        *self.completion_settings.write().unwrap() = init_options.suggest;

        let tsserver_path = find_tsserver(
            self.options.tsserver_path.as_deref(),
            root.as_deref(),
        )
        .map_err(|message| Error {
            code: ErrorCode::InternalError,
            message: message.into(),
            data: None,
        })?;

        let cancellation_dir = tempfile::tempdir().map_err(|err| Error {
            code: ErrorCode::InternalError,
            message: format!("could not create cancellation directory: {err}").into(),
            data: None,
        })?;
        let cancellation_prefix = cancellation_dir.path().join("tscancellation-");
        *self.cancellation_dir.lock().unwrap() = Some(cancellation_dir);

        let spawn_options = TsServerOptions {
            path: tsserver_path,
            log_file: Some(self.resolve_log_file(root.as_deref())),
            log_verbosity: self
                .options
                .tsserver_log_verbosity
                .clone()
                .or(init_options.log_verbosity),
            global_plugins: init_options.global_plugins,
            plugin_probe_locations: init_options.plugin_probe_locations,
            cancellation_pipe_name: Some(cancellation_prefix),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let server = TsServer::spawn(&spawn_options, event_tx).map_err(|err| Error {
            code: ErrorCode::InternalError,
            message: err.to_string().into(),
            data: None,
        })?;
        self.spawn_event_loop(event_rx);
        let _ = self.server.set(server.clone());

        if let Err(err) = server
            .request(
                TsCommand::Configure,
                ConfigureRequestArgs {
                    host_info: Some("tsbridge"),
                    preferences: Some(serde_json::json!({
                        "allowTextChangesInNewFiles": true,
                        "providePrefixAndSuffixTextForRename": true,
                    })),
                    format_options: None,
                },
            )
            .await
        {
            tracing::warn!(error = %err, "configure failed");
        }
        if let Err(err) = server
            .request(
                TsCommand::CompilerOptionsForInferredProjects,
                SetCompilerOptionsForInferredProjectsArgs::default(),
            )
            .await
        {
            tracing::warn!(error = %err, "compilerOptionsForInferredProjects failed");
        }

        Ok(InitializeResult {
            capabilities: server_capabilities(),
            server_info: Some(ServerInfo {
                name: "tsbridge".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("bridge initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        self.scheduler.cancel_inflight();
        if let Some(server) = self.server.get() {
            server.shutdown().await;
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let item = params.text_document;
        let Some(path) = translate::uri_to_path(&item.uri) else {
            return;
        };
        let Ok(server) = self.server() else {
            return;
        };

        let mut documents = self.documents.lock().await;
        let document = Document::new(
            item.uri.clone(),
            path.clone(),
            item.language_id.clone(),
            item.version,
            &item.text,
        );
        if documents.open(path.clone(), document) {
            let args = crate::protocol::OpenRequestArgs {
                file: path.display().to_string(),
                file_content: Some(item.text),
                script_kind_name: Some(translate::script_kind_name(&item.language_id)),
                project_root_path: self.root().map(|root| root.display().to_string()),
            };
            if let Err(err) = server.notify(TsCommand::Open, args).await {
                tracing::warn!(error = %err, "open notification failed");
            }
        } else {
            // The editor re-opened a file we already track; fall back to a
            // full-text change so tsserver's view stays consistent.
            tracing::warn!(file = %path.display(), "document already open, applying full change");
            if let Some(existing) = documents.get_mut(&path) {
                let args = change_args(&path, existing.full_range(), item.text.clone());
                existing.apply_edit(
                    item.version,
                    &TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: item.text,
                    },
                );
                if let Err(err) = server.notify(TsCommand::Change, args).await {
                    tracing::warn!(error = %err, "change notification failed");
                }
            }
        }
        drop(documents);
        self.schedule_diagnostics().await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(path) = translate::uri_to_path(&params.text_document.uri) else {
            return;
        };
        let Ok(server) = self.server() else {
            return;
        };
        let version = params.text_document.version;

        {
            let mut documents = self.documents.lock().await;
            let Some(document) = documents.get_mut(&path) else {
                tracing::error!(file = %path.display(), "change for a document that is not open");
                return;
            };
            for change in &params.content_changes {
                // The tsserver range must describe the text being replaced,
                // so it is computed against the pre-edit document.
                let range = change.range.unwrap_or_else(|| document.full_range());
                let args = change_args(&path, range, change.text.clone());
                document.apply_edit(version, change);
                if let Err(err) = server.notify(TsCommand::Change, args).await {
                    tracing::warn!(error = %err, "change notification failed");
                }
            }
        }
        self.schedule_diagnostics().await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(path) = translate::uri_to_path(&uri) else {
            return;
        };
        self.documents.lock().await.close(&path);
        if let Ok(server) = self.server() {
            let args = FileRequestArgs {
                file: path.display().to_string(),
            };
            if let Err(err) = server.notify(TsCommand::Close, args).await {
                tracing::warn!(error = %err, "close notification failed");
            }
        }
        self.diagnostics.lock().unwrap().clear(&path);
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn did_save(&self, _: DidSaveTextDocumentParams) {
        // tsserver works from the in-memory view; saving changes nothing.
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let context = {
            let mut documents = self.documents.lock().await;
            let Some(document) = documents.get(&path) else {
                return Ok(None);
            };
            let line = document.line_text(position.line as usize).unwrap_or_default();
            CompletionContext::new(path.clone(), position, line)
        };

        let body = swallow(
            self.interrupt_diagnostics(
                server.request(TsCommand::CompletionInfo, file_location(&path, position)),
            )
            .await,
        );
        let Some(info) = decode_body::<CompletionInfo>(body) else {
            return Ok(None);
        };
        let settings = self.completion_settings.read().unwrap().clone();
        let items = completion::build_completion_items(&info, &context, &settings);
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn completion_resolve(&self, mut item: CompletionItem) -> Result<CompletionItem> {
        let Some(data) = item
            .data
            .clone()
            .and_then(|data| serde_json::from_value::<CompletionItemData>(data).ok())
        else {
            return Ok(item);
        };
        let server = self.server()?;

        let args = CompletionDetailsRequestArgs {
            file: data.file.clone(),
            line: data.line,
            offset: data.offset,
            entry_names: data.entry_names.clone(),
        };
        let body = swallow(
            self.interrupt_diagnostics(server.request(TsCommand::CompletionDetails, args))
                .await,
        );
        if let Some(details) = decode_body::<Vec<CompletionEntryDetails>>(body) {
            if let Some(first) = details.first() {
                let source = data.entry_names.first().and_then(|entry| entry.source());
                completion::apply_completion_details(
                    &mut item,
                    first,
                    Path::new(&data.file),
                    source,
                );
            }
        }
        Ok(item)
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let body = swallow(
            self.interrupt_diagnostics(
                server.request(TsCommand::Quickinfo, file_location(&path, position)),
            )
            .await,
        );
        let Some(info) = decode_body::<QuickInfoResponseBody>(body) else {
            return Ok(None);
        };

        let mut documentation = info
            .documentation
            .map(|docs| docs.as_text())
            .unwrap_or_default();
        if let Some(tags) = &info.tags {
            if !tags.is_empty() {
                if !documentation.is_empty() {
                    documentation.push('\n');
                }
                documentation.push_str(&translate::as_tags_documentation(tags));
            }
        }

        Ok(Some(Hover {
            contents: HoverContents::Array(vec![
                MarkedString::LanguageString(LanguageString {
                    language: "typescript".to_string(),
                    value: info.display_string,
                }),
                MarkedString::String(documentation),
            ]),
            range: Some(translate::span_range(info.start, info.end)),
        }))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position_params = params.text_document_position_params;
        let locations = self
            .spans_to_locations(
                TsCommand::Definition,
                &position_params.text_document.uri,
                position_params.position,
            )
            .await;
        Ok(Some(GotoDefinitionResponse::Array(locations)))
    }

    async fn goto_type_definition(
        &self,
        params: GotoTypeDefinitionParams,
    ) -> Result<Option<GotoTypeDefinitionResponse>> {
        let position_params = params.text_document_position_params;
        let locations = self
            .spans_to_locations(
                TsCommand::TypeDefinition,
                &position_params.text_document.uri,
                position_params.position,
            )
            .await;
        Ok(Some(GotoTypeDefinitionResponse::Array(locations)))
    }

    async fn goto_implementation(
        &self,
        params: GotoImplementationParams,
    ) -> Result<Option<GotoImplementationResponse>> {
        let position_params = params.text_document_position_params;
        let locations = self
            .spans_to_locations(
                TsCommand::Implementation,
                &position_params.text_document.uri,
                position_params.position,
            )
            .await;
        Ok(Some(GotoImplementationResponse::Array(locations)))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let body = swallow(
            server
                .request(TsCommand::References, file_location(&path, position))
                .await,
        );
        let Some(refs) = decode_body::<ReferencesResponseBody>(body) else {
            return Ok(None);
        };
        let locations = refs
            .refs
            .iter()
            .filter(|entry| params.context.include_declaration || !entry.is_definition)
            .filter_map(|entry| translate::to_location(&entry.file, entry.start, entry.end))
            .collect();
        Ok(Some(locations))
    }

    async fn document_highlight(
        &self,
        params: DocumentHighlightParams,
    ) -> Result<Option<Vec<DocumentHighlight>>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let file = path.display().to_string();
        let location = translate::to_ts_location(position);
        let args = DocumentHighlightsRequestArgs {
            file: file.clone(),
            line: location.line,
            offset: location.offset,
            files_to_search: vec![file.clone()],
        };
        let body = swallow(server.request(TsCommand::DocumentHighlights, args).await);
        let Some(items) = decode_body::<Vec<DocumentHighlightsItem>>(body) else {
            return Ok(None);
        };
        let highlights = items
            .iter()
            .filter(|item| Path::new(&item.file) == path)
            .flat_map(|item| item.highlight_spans.iter())
            .map(translate::to_document_highlight)
            .collect();
        Ok(Some(highlights))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let body = swallow(
            server
                .request(
                    TsCommand::Navtree,
                    FileRequestArgs {
                        file: path.display().to_string(),
                    },
                )
                .await,
        );
        let Some(tree) = decode_body::<NavigationTree>(body) else {
            return Ok(None);
        };

        if self.hierarchical_symbols.load(Ordering::Relaxed) {
            let symbols = tree
                .child_items
                .iter()
                .flatten()
                .flat_map(to_document_symbols)
                .collect();
            Ok(Some(DocumentSymbolResponse::Nested(symbols)))
        } else {
            let mut symbols = Vec::new();
            for child in tree.child_items.iter().flatten() {
                collect_symbol_information(child, None, &uri, &mut symbols);
            }
            Ok(Some(DocumentSymbolResponse::Flat(symbols)))
        }
    }

    async fn formatting(&self, params: DocumentFormattingParams) -> Result<Option<Vec<TextEdit>>> {
        let Some(path) = translate::uri_to_path(&params.text_document.uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let full_range = {
            let mut documents = self.documents.lock().await;
            let Some(document) = documents.get(&path) else {
                return Ok(None);
            };
            document.full_range()
        };

        let mut format_options = serde_json::Map::new();
        format_options.insert(
            "convertTabsToSpaces".to_string(),
            Value::Bool(params.options.insert_spaces),
        );
        format_options.insert(
            "indentSize".to_string(),
            Value::from(params.options.tab_size),
        );
        format_options.insert("tabSize".to_string(), Value::from(params.options.tab_size));
        // A tsfmt.json at the workspace root silently overrides whatever the
        // editor asked for; re-read on every invocation.
        if let Some(root) = self.root() {
            if let Ok(text) = std::fs::read_to_string(root.join("tsfmt.json")) {
                if let Ok(Value::Object(overrides)) = serde_json::from_str::<Value>(&text) {
                    format_options.extend(overrides);
                }
            }
        }
        if let Err(err) = server
            .request(
                TsCommand::Configure,
                ConfigureRequestArgs {
                    host_info: None,
                    preferences: None,
                    format_options: Some(Value::Object(format_options)),
                },
            )
            .await
        {
            tracing::warn!(error = %err, "configure(formatOptions) failed");
        }

        let end = translate::to_ts_location(full_range.end);
        let body = swallow(
            server
                .request(
                    TsCommand::Format,
                    FormatRequestArgs {
                        file: path.display().to_string(),
                        line: 1,
                        offset: 1,
                        end_line: end.line,
                        end_offset: end.offset,
                    },
                )
                .await,
        );
        let Some(edits) = decode_body::<Vec<CodeEdit>>(body) else {
            return Ok(None);
        };
        Ok(Some(edits.iter().map(translate::to_text_edit).collect()))
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let body = swallow(
            self.interrupt_diagnostics(
                server.request(TsCommand::SignatureHelp, file_location(&path, position)),
            )
            .await,
        );
        let Some(items) = decode_body::<SignatureHelpItems>(body) else {
            return Ok(None);
        };
        let signatures = items.items.iter().map(to_signature_information).collect();
        Ok(Some(SignatureHelp {
            signatures,
            active_signature: Some(items.selected_item_index),
            active_parameter: Some(items.argument_index),
        }))
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let Some(path) = translate::uri_to_path(&params.text_document.uri) else {
            return Ok(None);
        };
        let server = self.server()?;
        let range_args = translate::to_file_range_args(&path, params.range);
        let mut actions: CodeActionResponse = Vec::new();

        let mut error_codes: Vec<i64> = params
            .context
            .diagnostics
            .iter()
            .filter_map(|diagnostic| match &diagnostic.code {
                Some(NumberOrString::Number(code)) => Some(*code as i64),
                _ => None,
            })
            .collect();
        error_codes.extend(
            self.diagnostics
                .lock()
                .unwrap()
                .codes_in_range(&path, params.range),
        );
        error_codes.sort_unstable();
        error_codes.dedup();

        if !error_codes.is_empty() {
            let fix_args = GetCodeFixesRequestArgs {
                file: range_args.file.clone(),
                start_line: range_args.start_line,
                start_offset: range_args.start_offset,
                end_line: range_args.end_line,
                end_offset: range_args.end_offset,
                error_codes,
            };
            let body = swallow(server.request(TsCommand::GetCodeFixes, fix_args).await);
            for fix in decode_body::<Vec<crate::protocol::CodeAction>>(body).unwrap_or_default() {
                actions.push(CodeActionOrCommand::CodeAction(CodeAction {
                    title: fix.description.clone(),
                    kind: Some(CodeActionKind::QUICKFIX),
                    command: Some(Command {
                        title: fix.description.clone(),
                        command: commands::APPLY_CODE_ACTION.to_string(),
                        arguments: Some(vec![serde_json::json!(fix)]),
                    }),
                    ..Default::default()
                }));
            }
        }

        let body = swallow(
            server
                .request(TsCommand::GetApplicableRefactors, range_args.clone())
                .await,
        );
        for info in decode_body::<Vec<ApplicableRefactorInfo>>(body).unwrap_or_default() {
            for action in info
                .actions
                .iter()
                .filter(|action| action.not_applicable_reason.is_none())
            {
                let edit_args = GetEditsForRefactorRequestArgs {
                    file: range_args.file.clone(),
                    start_line: range_args.start_line,
                    start_offset: range_args.start_offset,
                    end_line: range_args.end_line,
                    end_offset: range_args.end_offset,
                    refactor: info.name.clone(),
                    action: action.name.clone(),
                };
                actions.push(CodeActionOrCommand::CodeAction(CodeAction {
                    title: action.description.clone(),
                    kind: Some(CodeActionKind::REFACTOR),
                    command: Some(Command {
                        title: action.description.clone(),
                        command: commands::APPLY_REFACTORING.to_string(),
                        arguments: Some(vec![serde_json::json!(edit_args)]),
                    }),
                    ..Default::default()
                }));
            }
        }

        actions.push(CodeActionOrCommand::CodeAction(CodeAction {
            title: "Organize imports".to_string(),
            kind: Some(CodeActionKind::SOURCE_ORGANIZE_IMPORTS),
            command: Some(Command {
                title: "Organize imports".to_string(),
                command: commands::ORGANIZE_IMPORTS.to_string(),
                arguments: Some(vec![serde_json::json!(range_args.file)]),
            }),
            ..Default::default()
        }));

        Ok(Some(actions))
    }

    async fn folding_range(&self, params: FoldingRangeParams) -> Result<Option<Vec<FoldingRange>>> {
        let Some(path) = translate::uri_to_path(&params.text_document.uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let body = swallow(
            server
                .request(
                    TsCommand::GetOutliningSpans,
                    FileRequestArgs {
                        file: path.display().to_string(),
                    },
                )
                .await,
        );
        let Some(spans) = decode_body::<Vec<OutliningSpan>>(body) else {
            return Ok(None);
        };

        let mut documents = self.documents.lock().await;
        let Some(document) = documents.get(&path) else {
            return Ok(None);
        };
        let ranges = spans
            .iter()
            .filter_map(|span| to_folding_range(span, document))
            .collect();
        Ok(Some(ranges))
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(path) = translate::uri_to_path(&uri) else {
            return Ok(None);
        };
        let server = self.server()?;

        let body = server
            .request(TsCommand::Rename, file_location(&path, position))
            .await
            .map_err(commands::ts_error)?;
        let Some(response) = decode_body::<RenameResponseBody>(body) else {
            return Ok(None);
        };
        if !response.info.can_rename {
            return Err(Error::invalid_params(
                response
                    .info
                    .localized_error_message
                    .unwrap_or_else(|| "this symbol cannot be renamed".to_string()),
            ));
        }
        if response.locs.is_empty() {
            return Ok(None);
        }

        let mut changes: std::collections::HashMap<Url, Vec<TextEdit>> = Default::default();
        for group in &response.locs {
            let Some(uri) = translate::path_to_uri(Path::new(&group.file)) else {
                continue;
            };
            let edits = changes.entry(uri).or_default();
            for loc in &group.locs {
                let new_text = format!(
                    "{}{}{}",
                    loc.prefix_text.as_deref().unwrap_or(""),
                    params.new_name,
                    loc.suffix_text.as_deref().unwrap_or("")
                );
                edits.push(TextEdit::new(
                    translate::span_range(loc.start, loc.end),
                    new_text,
                ));
            }
        }
        Ok(Some(WorkspaceEdit {
            changes: Some(changes),
            ..Default::default()
        }))
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> Result<Option<Vec<SymbolInformation>>> {
        let server = self.server()?;
        let file = {
            let documents = self.documents.lock().await;
            documents
                .most_recent()
                .map(|path| path.display().to_string())
                .or_else(|| self.root().map(|root| root.display().to_string()))
        };

        let body = swallow(
            server
                .request(
                    TsCommand::Navto,
                    NavtoRequestArgs {
                        search_value: params.query,
                        file,
                    },
                )
                .await,
        );
        let Some(items) = decode_body::<Vec<NavtoItem>>(body) else {
            return Ok(None);
        };
        let symbols = items
            .iter()
            .filter_map(to_symbol_information)
            .collect();
        Ok(Some(symbols))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        let server = self.server()?;
        commands::execute(&self.client, &server, params).await
    }
}

impl Backend {
    /// The proposed `textDocument/calls` request, registered as a custom
    /// method next to the standard ones.
    pub async fn calls(&self, params: CallsParams) -> Result<Option<CallsResult>> {
        let Some(path) = translate::uri_to_path(&params.text_document.uri) else {
            return Ok(None);
        };
        let server = self.server()?;
        match calls::calls(&server, &path, params.position, params.direction).await {
            Ok(result) => Ok(Some(result)),
            Err(err) => {
                tracing::warn!(error = %err, "calls request failed");
                Ok(None)
            }
        }
    }
}

fn file_location(path: &Path, position: Position) -> FileLocationRequestArgs {
    let location = translate::to_ts_location(position);
    FileLocationRequestArgs {
        file: path.display().to_string(),
        line: location.line,
        offset: location.offset,
    }
}

fn change_args(path: &Path, range: Range, text: String) -> ChangeRequestArgs {
    let start = translate::to_ts_location(range.start);
    let end = translate::to_ts_location(range.end);
    ChangeRequestArgs {
        file: path.display().to_string(),
        line: start.line,
        offset: start.offset,
        end_line: end.line,
        end_offset: end.offset,
        insert_string: text,
    }
}

/// Read-path error policy: failures become empty results, except that
/// anything other than tsserver's "No content available" is logged first.
fn swallow(result: std::result::Result<Option<Value>, TsServerError>) -> Option<Value> {
    match result {
        Ok(body) => body,
        Err(err) => {
            if !err.is_no_content() {
                tracing::warn!(error = %err, "tsserver request failed");
            }
            None
        }
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(body: Option<Value>) -> Option<T> {
    let body = body?;
    match serde_json::from_value(body) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            tracing::warn!(error = %err, "malformed tsserver body");
            None
        }
    }
}

fn should_include_symbol(node: &NavigationTree) -> bool {
    !node.text.is_empty() && node.text != "<function>" && !node.spans.is_empty()
}

fn to_document_symbols(node: &NavigationTree) -> Vec<DocumentSymbol> {
    let children: Vec<DocumentSymbol> = node
        .child_items
        .iter()
        .flatten()
        .flat_map(to_document_symbols)
        .collect();
    if !should_include_symbol(node) {
        // Skipped nodes still contribute their children one level up.
        return children;
    }
    let range = translate::as_range(&node.spans[0]);
    let selection_range = node
        .name_span
        .as_ref()
        .map(translate::as_range)
        .unwrap_or(range);
    #[allow(deprecated)]
    vec![DocumentSymbol {
        name: node.text.clone(),
        detail: None,
        kind: translate::to_symbol_kind(&node.kind),
        tags: None,
        deprecated: None,
        range,
        selection_range,
        children: Some(children),
    }]
}

fn collect_symbol_information(
    node: &NavigationTree,
    container: Option<&str>,
    uri: &Url,
    out: &mut Vec<SymbolInformation>,
) {
    let container_for_children = if should_include_symbol(node) {
        let range = translate::as_range(&node.spans[0]);
        #[allow(deprecated)]
        out.push(SymbolInformation {
            name: node.text.clone(),
            kind: translate::to_symbol_kind(&node.kind),
            tags: None,
            deprecated: None,
            location: Location::new(uri.clone(), range),
            container_name: container.map(|name| name.to_string()),
        });
        node.text.as_str()
    } else {
        container.unwrap_or_default()
    };
    for child in node.child_items.iter().flatten() {
        collect_symbol_information(child, Some(container_for_children), uri, out);
    }
}

fn to_symbol_information(item: &NavtoItem) -> Option<SymbolInformation> {
    let location = translate::to_location(&item.file, item.start, item.end)?;
    #[allow(deprecated)]
    Some(SymbolInformation {
        name: item.name.clone(),
        kind: translate::to_symbol_kind(&item.kind),
        tags: None,
        deprecated: None,
        location,
        container_name: item.container_name.clone(),
    })
}

fn to_signature_information(item: &SignatureHelpItem) -> SignatureInformation {
    let separator = translate::as_plain_text(&item.separator_display_parts);
    let mut label = translate::as_plain_text(&item.prefix_display_parts);
    let mut parameters = Vec::new();
    for (index, parameter) in item.parameters.iter().enumerate() {
        if index > 0 {
            label.push_str(&separator);
        }
        let start = label.encode_utf16().count() as u32;
        label.push_str(&translate::as_plain_text(&parameter.display_parts));
        let end = label.encode_utf16().count() as u32;
        let documentation = translate::as_plain_text(&parameter.documentation);
        parameters.push(ParameterInformation {
            label: ParameterLabel::LabelOffsets([start, end]),
            documentation: (!documentation.is_empty())
                .then(|| Documentation::String(documentation)),
        });
    }
    label.push_str(&translate::as_plain_text(&item.suffix_display_parts));

    let documentation = translate::as_plain_text(&item.documentation);
    SignatureInformation {
        label,
        documentation: (!documentation.is_empty()).then(|| Documentation::String(documentation)),
        parameters: Some(parameters),
        active_parameter: None,
    }
}

/// Outlining spans to folding ranges, with two workarounds: `#endregion`
/// comment spans are dropped, and a fold that would swallow a closing `}`
/// stops one line short (never above its own start).
fn to_folding_range(span: &OutliningSpan, document: &Document) -> Option<FoldingRange> {
    let range = translate::as_range(&span.text_span);
    let kind = match span.kind.as_str() {
        "comment" => Some(FoldingRangeKind::Comment),
        "imports" => Some(FoldingRangeKind::Imports),
        "region" => Some(FoldingRangeKind::Region),
        _ => None,
    };

    if kind == Some(FoldingRangeKind::Comment) {
        let line = document
            .line_text(range.start.line as usize)
            .unwrap_or_default();
        if line.trim_start().starts_with("//") && line.contains("#endregion") {
            return None;
        }
    }

    let mut end_line = range.end.line;
    if range.end.character > 0
        && document.char_before(range.end) == Some('}')
    {
        end_line = end_line.saturating_sub(1).max(range.start.line);
    }
    if end_line <= range.start.line {
        return None;
    }

    Some(FoldingRange {
        start_line: range.start.line,
        end_line,
        kind,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SignatureHelpParameter, SymbolDisplayPart, TextSpan, TsLocation};

    fn span(start_line: u32, start_offset: u32, end_line: u32, end_offset: u32) -> TextSpan {
        TextSpan {
            start: TsLocation {
                line: start_line,
                offset: start_offset,
            },
            end: TsLocation {
                line: end_line,
                offset: end_offset,
            },
        }
    }

    fn navtree_node(
        text: &str,
        kind: &str,
        spans: Vec<TextSpan>,
        children: Vec<NavigationTree>,
    ) -> NavigationTree {
        NavigationTree {
            text: text.to_string(),
            kind: kind.to_string(),
            kind_modifiers: String::new(),
            spans,
            name_span: None,
            child_items: (!children.is_empty()).then_some(children),
        }
    }

    fn sample_tree() -> NavigationTree {
        navtree_node(
            "\"a\"",
            "module",
            vec![span(1, 1, 9, 1)],
            vec![
                navtree_node(
                    "Greeter",
                    "class",
                    vec![span(1, 1, 5, 2)],
                    vec![navtree_node("greet", "method", vec![span(2, 3, 4, 4)], vec![])],
                ),
                navtree_node("<function>", "function", vec![span(6, 1, 8, 2)], vec![]),
            ],
        )
    }

    fn document(text: &str) -> Document {
        Document::new(
            Url::parse("file:///a.ts").unwrap(),
            "/a.ts".into(),
            "typescript".to_string(),
            1,
            text,
        )
    }

    #[test]
    fn hierarchical_and_flat_symbols_describe_the_same_tree() {
        let tree = sample_tree();

        let nested: Vec<DocumentSymbol> = tree
            .child_items
            .iter()
            .flatten()
            .flat_map(to_document_symbols)
            .collect();
        assert_eq!(nested.len(), 1, "the anonymous function is filtered out");
        assert_eq!(nested[0].name, "Greeter");
        assert_eq!(nested[0].kind, SymbolKind::CLASS);
        let children = nested[0].children.as_ref().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "greet");
        assert_eq!(children[0].kind, SymbolKind::METHOD);

        let uri = Url::parse("file:///a.ts").unwrap();
        let mut flat = Vec::new();
        for child in tree.child_items.iter().flatten() {
            collect_symbol_information(child, None, &uri, &mut flat);
        }
        let names: Vec<_> = flat.iter().map(|symbol| symbol.name.as_str()).collect();
        assert_eq!(names, vec!["Greeter", "greet"]);
        assert_eq!(flat[1].container_name.as_deref(), Some("Greeter"));
    }

    #[test]
    fn endregion_comment_spans_do_not_fold()
    {
        let doc = document("// #region x\nlet a = 1;\n// #endregion\n");
        let mut outlining = OutliningSpan {
            text_span: span(3, 1, 4, 1),
            banner_text: String::new(),
            auto_collapse: false,
            kind: "comment".to_string(),
        };
        assert!(to_folding_range(&outlining, &doc).is_none());

        // The opening region comment still folds.
        outlining.text_span = span(1, 1, 3, 14);
        assert!(to_folding_range(&outlining, &doc).is_some());
    }

    #[test]
    fn folds_ending_on_a_closing_brace_stop_a_line_short() {
        let doc = document("function f() {\n  return 1;\n}\n");
        let outlining = OutliningSpan {
            text_span: span(1, 14, 3, 2),
            banner_text: String::new(),
            auto_collapse: false,
            kind: "code".to_string(),
        };
        let range = to_folding_range(&outlining, &doc).unwrap();
        assert_eq!(range.start_line, 0);
        assert_eq!(range.end_line, 1);
        assert_eq!(range.kind, None);
    }

    #[test]
    fn brace_adjustment_never_climbs_above_the_start_line() {
        let doc = document("if (x) {\n}\n");
        let outlining = OutliningSpan {
            text_span: span(1, 8, 2, 2),
            banner_text: String::new(),
            auto_collapse: false,
            kind: "code".to_string(),
        };
        // end would clamp to line 0 == start line; nothing worth folding.
        assert!(to_folding_range(&outlining, &doc).is_none());
    }

    #[test]
    fn signature_labels_carry_parameter_offsets() {
        let part = |text: &str| SymbolDisplayPart {
            text: text.to_string(),
            kind: "text".to_string(),
        };
        let item = SignatureHelpItem {
            prefix_display_parts: vec![part("greet(")],
            suffix_display_parts: vec![part("): void")],
            separator_display_parts: vec![part(", ")],
            parameters: vec![
                SignatureHelpParameter {
                    name: "name".to_string(),
                    display_parts: vec![part("name: string")],
                    documentation: vec![],
                },
                SignatureHelpParameter {
                    name: "loud".to_string(),
                    display_parts: vec![part("loud?: boolean")],
                    documentation: vec![part("shout it")],
                },
            ],
            documentation: vec![],
        };

        let signature = to_signature_information(&item);
        assert_eq!(signature.label, "greet(name: string, loud?: boolean): void");
        let parameters = signature.parameters.as_ref().unwrap();
        let ParameterLabel::LabelOffsets([start, end]) = parameters[0].label else {
            panic!("expected label offsets");
        };
        assert_eq!(&signature.label[start as usize..end as usize], "name: string");
        let ParameterLabel::LabelOffsets([start, end]) = parameters[1].label else {
            panic!("expected label offsets");
        };
        assert_eq!(&signature.label[start as usize..end as usize], "loud?: boolean");
    }
}
