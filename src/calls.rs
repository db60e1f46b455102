//! The proposed `textDocument/calls` request.
//!
//! tsserver has no call-hierarchy command of its own in this dialect, so the
//! hierarchy is assembled from primitives: `references` finds the call
//! sites, `navtree` attributes each site to its enclosing callable, and
//! `definition` pins down the symbol being talked about.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{
    Location, Position, Range, SymbolKind, TextDocumentIdentifier,
};

use crate::protocol::{
    Command, FileLocationRequestArgs, FileRequestArgs, FileSpan, NavigationTree,
    ReferencesResponseBody,
};
use crate::translate;
use crate::tsserver::{TsServer, TsServerError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    #[serde(default)]
    pub direction: CallDirection,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallDirection {
    #[default]
    Incoming,
    Outgoing,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<DefinitionSymbol>,
    pub calls: Vec<Call>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub location: Location,
    pub symbol: DefinitionSymbol,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSymbol {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub kind: SymbolKind,
    pub location: Location,
    pub selection_range: Range,
}

pub async fn calls(
    server: &TsServer,
    file: &Path,
    position: Position,
    direction: CallDirection,
) -> Result<CallsResult, TsServerError> {
    match direction {
        CallDirection::Incoming => incoming_calls(server, file, position).await,
        CallDirection::Outgoing => outgoing_calls(server, file, position).await,
    }
}

/// Callers of the symbol at `position`: every non-definition reference,
/// attributed to the callable that contains it.
async fn incoming_calls(
    server: &TsServer,
    file: &Path,
    position: Position,
) -> Result<CallsResult, TsServerError> {
    let refs = references(server, file, position).await?;
    let symbol = symbol_at_definition(server, file, position).await;

    let mut trees = NavtreeCache::default();
    let mut calls = Vec::new();
    for entry in refs.refs.iter().filter(|entry| !entry.is_definition) {
        let Some(location) = translate::to_location(&entry.file, entry.start, entry.end) else {
            continue;
        };
        let Some(tree) = trees.get(server, &entry.file).await else {
            continue;
        };
        let reference_position = translate::to_position(entry.start);
        if let Some(caller) = find_enclosing_callable(tree, reference_position) {
            if let Some(symbol) = symbol_of(caller, &entry.file) {
                calls.push(Call { location, symbol });
            }
        }
    }
    Ok(CallsResult { symbol, calls })
}

/// Calls to the symbol at `position` made from inside the callable that
/// encloses the cursor.
async fn outgoing_calls(
    server: &TsServer,
    file: &Path,
    position: Position,
) -> Result<CallsResult, TsServerError> {
    let mut trees = NavtreeCache::default();
    let file_name = file.display().to_string();
    let enclosing = trees
        .get(server, &file_name)
        .await
        .and_then(|tree| find_enclosing_callable(tree, position))
        .cloned();
    let symbol = enclosing
        .as_ref()
        .and_then(|node| symbol_of(node, &file_name));
    let Some(enclosing) = enclosing else {
        return Ok(CallsResult {
            symbol: None,
            calls: Vec::new(),
        });
    };

    let callee = symbol_at_definition(server, file, position).await;
    let refs = references(server, file, position).await?;

    let mut calls = Vec::new();
    if let Some(callee) = callee {
        let body = node_range(&enclosing);
        for entry in refs.refs.iter().filter(|entry| !entry.is_definition) {
            if Path::new(&entry.file) != file {
                continue;
            }
            let reference_position = translate::to_position(entry.start);
            if !contains(body, reference_position) {
                continue;
            }
            let Some(location) = translate::to_location(&entry.file, entry.start, entry.end)
            else {
                continue;
            };
            calls.push(Call {
                location,
                symbol: callee.clone(),
            });
        }
    }
    Ok(CallsResult { symbol, calls })
}

async fn references(
    server: &TsServer,
    file: &Path,
    position: Position,
) -> Result<ReferencesResponseBody, TsServerError> {
    let location = translate::to_ts_location(position);
    let body = server
        .request(
            Command::References,
            FileLocationRequestArgs {
                file: file.display().to_string(),
                line: location.line,
                offset: location.offset,
            },
        )
        .await?;
    Ok(body
        .and_then(|body| serde_json::from_value(body).ok())
        .unwrap_or(ReferencesResponseBody { refs: Vec::new() }))
}

/// The symbol's own definition site, described through the navtree of the
/// file that defines it.
async fn symbol_at_definition(
    server: &TsServer,
    file: &Path,
    position: Position,
) -> Option<DefinitionSymbol> {
    let location = translate::to_ts_location(position);
    let body = server
        .request(
            Command::Definition,
            FileLocationRequestArgs {
                file: file.display().to_string(),
                line: location.line,
                offset: location.offset,
            },
        )
        .await
        .ok()??;
    let definitions: Vec<FileSpan> = serde_json::from_value(body).ok()?;
    let definition = definitions.first()?;

    let mut trees = NavtreeCache::default();
    let tree = trees.get(server, &definition.file).await?;
    let node = find_enclosing_callable(tree, translate::to_position(definition.start))?;
    symbol_of(node, &definition.file)
}

#[derive(Default)]
struct NavtreeCache {
    trees: HashMap<String, Option<NavigationTree>>,
}

impl NavtreeCache {
    async fn get(&mut self, server: &TsServer, file: &str) -> Option<&NavigationTree> {
        if !self.trees.contains_key(file) {
            let tree = server
                .request(
                    Command::Navtree,
                    FileRequestArgs {
                        file: file.to_string(),
                    },
                )
                .await
                .ok()
                .flatten()
                .and_then(|body| serde_json::from_value(body).ok());
            self.trees.insert(file.to_string(), tree);
        }
        self.trees.get(file).and_then(|tree| tree.as_ref())
    }
}

fn is_callable(kind: &str) -> bool {
    matches!(
        kind,
        "function" | "local function" | "method" | "constructor" | "getter" | "setter"
    )
}

fn node_range(node: &NavigationTree) -> Range {
    node.spans
        .first()
        .map(translate::as_range)
        .unwrap_or_default()
}

fn contains(range: Range, position: Position) -> bool {
    range.start <= position && position <= range.end
}

fn node_contains(node: &NavigationTree, position: Position) -> bool {
    node.spans
        .iter()
        .any(|span| contains(translate::as_range(span), position))
}

/// Deepest callable navtree node whose span contains `position`.
fn find_enclosing_callable(
    node: &NavigationTree,
    position: Position,
) -> Option<&NavigationTree> {
    if !node_contains(node, position) {
        return None;
    }
    for child in node.child_items.iter().flatten() {
        if let Some(found) = find_enclosing_callable(child, position) {
            return Some(found);
        }
    }
    is_callable(&node.kind).then_some(node)
}

fn symbol_of(node: &NavigationTree, file: &str) -> Option<DefinitionSymbol> {
    let span = node.spans.first()?;
    let location = translate::to_location(file, span.start, span.end)?;
    let selection_range = node
        .name_span
        .as_ref()
        .map(translate::as_range)
        .unwrap_or(location.range);
    Some(DefinitionSymbol {
        name: node.text.clone(),
        detail: None,
        kind: translate::to_symbol_kind(&node.kind),
        location,
        selection_range,
    })
}
