//! SASL conversation over a connection.
//!
//! Carries [`ScramConversation`] messages in `saslStart`/`saslContinue`
//! commands. A connection whose authentication failed is invalidated so the
//! pool never hands it out.

use tracing::{info, instrument, warn};

use crate::core::document::{Binary, Document, Value};
use crate::error::{AuthErrorKind, DriverError, Result};
use crate::protocol::command::execute;
use crate::protocol::handshake::{ScramConversation, ScramMechanism};
use crate::protocol::hello::HelloReply;
use crate::transport::connection::Connection;
use crate::utils::metrics::global_metrics;

/// Empty `saslContinue` rounds accepted after the server signature verified
const MAX_EMPTY_ROUNDS: usize = 4;

/// Configured mechanism, else negotiated from the handshake reply
pub fn select_mechanism(configured: Option<ScramMechanism>, hello: &HelloReply) -> ScramMechanism {
    configured.unwrap_or_else(|| {
        ScramMechanism::negotiate(hello.sasl_supported_mechs.as_deref().unwrap_or_default())
    })
}

fn payload_text(reply: &Document) -> Result<String> {
    let bytes = match reply.get("payload") {
        Some(Value::Binary(bin)) => bin.bytes.clone(),
        Some(Value::String(s)) => s.clone().into_bytes(),
        _ => {
            return Err(DriverError::authentication(
                AuthErrorKind::BadChallenge,
                "SASL reply has no payload",
            ))
        }
    };
    String::from_utf8(bytes).map_err(|_| {
        DriverError::authentication(AuthErrorKind::BadChallenge, "SASL payload is not UTF-8")
    })
}

/// A server `ok: 0` during the conversation is a rejection
async fn sasl_call(conn: &mut Connection, source: &str, command: &Document) -> Result<Document> {
    execute(conn, source, command).await.map_err(|e| match e {
        DriverError::Command(cmd) => DriverError::authentication(
            AuthErrorKind::ServerRejected,
            format!("{} (code {})", cmd.message, cmd.code),
        ),
        other => other,
    })
}

fn continue_command(conversation_id: &Value, payload: &[u8]) -> Document {
    let mut cmd = Document::new();
    cmd.set("saslContinue", 1);
    cmd.set("conversationId", conversation_id.clone());
    cmd.set("payload", Binary::generic(payload));
    cmd
}

async fn converse(conn: &mut Connection, source: &str, scram: &mut ScramConversation) -> Result<()> {
    let client_first = scram.client_first()?;

    let mut options = Document::new();
    options.set("skipEmptyExchange", true);
    let mut start = Document::new();
    start.set("saslStart", 1);
    start.set("mechanism", scram.mechanism().name());
    start.set("payload", Binary::generic(client_first.into_bytes()));
    start.set("autoAuthorize", 1);
    start.set("options", options);

    let reply = sasl_call(conn, source, &start).await?;
    let conversation_id = reply.get("conversationId").cloned().ok_or_else(|| {
        DriverError::authentication(AuthErrorKind::BadChallenge, "saslStart reply has no conversationId")
    })?;

    let client_final = scram.client_final(&payload_text(&reply)?)?;
    let reply = sasl_call(
        conn,
        source,
        &continue_command(&conversation_id, client_final.as_bytes()),
    )
    .await?;
    scram.verify_server_final(&payload_text(&reply)?)?;

    let mut done = reply.get_bool("done").unwrap_or(false);
    let mut rounds = 0;
    while !done {
        rounds += 1;
        if rounds > MAX_EMPTY_ROUNDS {
            return Err(DriverError::authentication(
                AuthErrorKind::BadChallenge,
                "server never completed the SASL conversation",
            ));
        }
        let reply = sasl_call(conn, source, &continue_command(&conversation_id, &[])).await?;
        done = reply.get_bool("done").unwrap_or(false);
    }
    Ok(())
}

/// Authenticate `username` against the `source` database
#[instrument(skip(conn, password), fields(conn_id = conn.id(), mechanism = mechanism.name()))]
pub async fn authenticate(
    conn: &mut Connection,
    source: &str,
    username: &str,
    password: &str,
    mechanism: ScramMechanism,
) -> Result<()> {
    global_metrics().auth_attempt();
    let mut scram = ScramConversation::new(mechanism, username, password)?;

    match converse(conn, source, &mut scram).await {
        Ok(()) => {
            global_metrics().auth_success();
            info!(user = username, "Authenticated");
            Ok(())
        }
        Err(e) => {
            scram.abort();
            conn.invalidate("authentication failed");
            global_metrics().auth_failed();
            warn!(user = username, error = %e, "Authentication failed");
            Err(e)
        }
    }
}
