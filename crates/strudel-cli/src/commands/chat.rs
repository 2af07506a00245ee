use anyhow::{Context as _, Result, bail};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use strudel_application::connection;
use strudel_application::{EngineCollaborators, EngineNotice, SyncEngine};
use strudel_core::collaborator::PatternEvaluator;
use strudel_core::connection::ConnectionState;
use strudel_core::panel::{PanelId, PanelPayload};
use strudel_core::session::MessageRole;
use strudel_interaction::{HttpBackendClient, WsConnector};

use super::context::CliContext;

/// The terminal has no audio engine; play requests are only logged.
struct LogOnlyEvaluator;

impl PatternEvaluator for LogOnlyEvaluator {
    fn evaluate(&self, panel_id: &PanelId, _payload: &PanelPayload) -> strudel_core::Result<()> {
        tracing::info!("[CLI] Playback is not available here; skipped {}", panel_id);
        Ok(())
    }
}

pub async fn run(panel: &str, message: &str, timeout_secs: u64) -> Result<()> {
    let panel_id: PanelId = panel.parse()?;
    let context = CliContext::load()?;
    let config = context.config.clone();

    let connector = Arc::new(WsConnector::new(
        &config.server_url,
        config.handshake_timeout(),
    )?);
    let backend = Arc::new(HttpBackendClient::new(
        &config.api_base_url,
        config.project_id.clone(),
    )?);
    let collaborators = EngineCollaborators {
        catalog: backend.clone(),
        history: backend,
        evaluator: Arc::new(LogOnlyEvaluator),
    };

    let (handle, mut events, driver) = connection::spawn(connector, &config);
    let mut engine = SyncEngine::new(config, handle.clone(), collaborators, context.recent_ledger());

    engine
        .open_item(&panel_id)
        .await
        .with_context(|| format!("Failed to open {}", panel_id))?;
    engine.connect()?;
    engine.send_chat(&panel_id, message)?;

    let outcome = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        print_reply(&mut engine, &mut events, &panel_id),
    )
    .await;

    engine.close_panel(&panel_id);
    handle.shutdown()?;
    let _ = driver.await;

    match outcome {
        Ok(result) => result,
        Err(_) => bail!("No complete reply within {}s", timeout_secs),
    }
}

/// Streams agent output for `panel_id` to stdout until the final chunk.
async fn print_reply(
    engine: &mut SyncEngine,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<connection::ConnectionEvent>,
    panel_id: &PanelId,
) -> Result<()> {
    let mut printed: Option<(String, usize)> = None;

    while let Some(event) = events.recv().await {
        for notice in engine.process_event(event).await {
            match notice {
                EngineNotice::AgentMessage {
                    panel_id: ref target,
                    complete,
                } if target == panel_id => {
                    print_delta(engine, panel_id, &mut printed)?;
                    if complete {
                        println!();
                        return Ok(());
                    }
                }
                EngineNotice::ServerError { message, code, .. } => {
                    bail!(
                        "Server error{}: {}",
                        code.map(|c| format!(" ({})", c)).unwrap_or_default(),
                        message
                    );
                }
                EngineNotice::ConnectionChanged(ConnectionState::Error) => {
                    let reason = engine
                        .connection_snapshot()
                        .last_error
                        .unwrap_or_else(|| "unknown error".to_string());
                    bail!("Connection failed: {}", reason);
                }
                EngineNotice::ConnectionChanged(state) => {
                    tracing::info!("[CLI] Connection {}", state.as_str());
                }
                _ => {}
            }
        }
    }

    bail!("Connection driver stopped before the reply finished")
}

/// Prints the unseen tail of the newest agent message.
fn print_delta(
    engine: &SyncEngine,
    panel_id: &PanelId,
    printed: &mut Option<(String, usize)>,
) -> Result<()> {
    let Some(latest) = engine
        .history(panel_id)
        .and_then(|h| h.messages.iter().rev().find(|m| m.role == MessageRole::Agent))
    else {
        return Ok(());
    };

    let already = match printed {
        Some((id, len)) if *id == latest.id => *len,
        _ => 0,
    };
    let tail = latest.content.get(already..).unwrap_or_default();

    let mut stdout = std::io::stdout();
    stdout.write_all(tail.as_bytes())?;
    stdout.flush()?;

    *printed = Some((latest.id.clone(), latest.content.len()));
    Ok(())
}
