//! Command reply contract.
//!
//! A reply is accepted when its `ok` field is non-zero; `ok` may arrive as a
//! double, int32, int64 or boolean. Anything else becomes a [`CommandError`]
//! built from `errmsg`, `code` and `codeName`. Legacy `OP_REPLY` failures
//! carry the message in `$err` instead.

use crate::core::document::{Document, Value};
use crate::error::{constants, CommandError, DriverError, EncodingErrorKind, Result, WriteError};
use crate::protocol::message::ReplyMessage;

/// Read a numeric field of any width; doubles must be integral
pub fn numeric_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int32(v) => Some(i64::from(*v)),
        Value::Int64(v) => Some(*v),
        Value::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
        _ => None,
    }
}

/// Interpret the `ok` field
pub fn is_ok(reply: &Document) -> Result<bool> {
    match reply.get("ok") {
        Some(Value::Double(v)) => Ok(v.is_finite() && *v != 0.0),
        Some(Value::Int32(v)) => Ok(*v != 0),
        Some(Value::Int64(v)) => Ok(*v != 0),
        Some(Value::Boolean(v)) => Ok(*v),
        Some(other) => Err(DriverError::encoding(
            EncodingErrorKind::InvalidValue,
            format!("reply field 'ok' has type {}", other.type_name()),
        )),
        None => Err(DriverError::encoding(
            EncodingErrorKind::InvalidValue,
            constants::ERR_MISSING_OK,
        )),
    }
}

/// Build a [`CommandError`] from a failed reply
pub fn command_error(reply: Document) -> CommandError {
    let code = reply
        .get("code")
        .and_then(numeric_i64)
        .map(|c| c as i32)
        .unwrap_or(0);
    let code_name = reply.get_str("codeName").ok().map(str::to_string);
    let message = reply
        .get_str("errmsg")
        .or_else(|_| reply.get_str("$err"))
        .unwrap_or("command failed without an error message")
        .to_string();
    CommandError {
        code,
        code_name,
        message,
        raw: reply,
        write_errors: Vec::new(),
    }
}

/// Pass a successful reply through, turn a failed one into `DriverError::Command`
pub fn check_ok(reply: Document) -> Result<Document> {
    if is_ok(&reply)? {
        Ok(reply)
    } else {
        Err(command_error(reply).into())
    }
}

/// Extract the command reply document from a decoded message
pub fn reply_document(message: ReplyMessage) -> Result<Document> {
    match message {
        ReplyMessage::Msg(msg) => Ok(msg.body),
        ReplyMessage::Reply(reply) => {
            let failed = reply.query_failed();
            let doc = reply.documents.into_iter().next().ok_or_else(|| {
                DriverError::encoding(EncodingErrorKind::InvalidValue, constants::ERR_EMPTY_REPLY)
            })?;
            if failed {
                return Err(command_error(doc).into());
            }
            Ok(doc)
        }
    }
}

/// Accumulates write command replies across batches
#[derive(Debug, Default)]
pub struct WriteOutcome {
    /// Sum of `n` over every batch
    pub n: u64,
    /// Sum of `nModified` over every batch
    pub n_modified: u64,
    /// `(statement index, _id)` pairs from `upserted`
    pub upserted: Vec<(usize, Value)>,
    write_errors: Vec<WriteError>,
    concern_error: Option<(i32, String)>,
    last_error_reply: Option<Document>,
}

impl WriteOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch reply in. `offset` is the index of the batch's first
    /// statement within the caller's input.
    pub fn absorb(&mut self, reply: &Document, offset: usize) {
        if let Some(n) = reply.get("n").and_then(numeric_i64) {
            self.n += n.max(0) as u64;
        }
        if let Some(n) = reply.get("nModified").and_then(numeric_i64) {
            self.n_modified += n.max(0) as u64;
        }
        if let Ok(upserted) = reply.get_array("upserted") {
            for entry in upserted {
                if let Value::Document(d) = entry {
                    let index = d.get("index").and_then(numeric_i64).unwrap_or(0).max(0) as usize;
                    if let Some(id) = d.get("_id") {
                        self.upserted.push((offset + index, id.clone()));
                    }
                }
            }
        }

        let mut failed = false;
        if let Ok(errors) = reply.get_array("writeErrors") {
            for entry in errors {
                if let Value::Document(d) = entry {
                    let index = d.get("index").and_then(numeric_i64).unwrap_or(0).max(0) as usize;
                    self.write_errors.push(WriteError {
                        index: offset + index,
                        code: d.get("code").and_then(numeric_i64).unwrap_or(0) as i32,
                        message: d.get_str("errmsg").unwrap_or_default().to_string(),
                    });
                    failed = true;
                }
            }
        }
        if let Ok(concern) = reply.get_document("writeConcernError") {
            let code = concern.get("code").and_then(numeric_i64).unwrap_or(0) as i32;
            let message = concern.get_str("errmsg").unwrap_or_default().to_string();
            self.concern_error.get_or_insert((code, message));
            failed = true;
        }
        if failed {
            self.last_error_reply = Some(reply.clone());
        }
    }

    /// Record a batch whose command failed outright: every statement in it
    /// counts as a write error carrying the command's code and message
    pub fn absorb_failure(&mut self, err: CommandError, offset: usize, len: usize) {
        self.write_errors.extend((offset..offset + len).map(|index| WriteError {
            index,
            code: err.code,
            message: err.message.clone(),
        }));
        self.last_error_reply = Some(err.raw);
    }

    pub fn has_errors(&self) -> bool {
        !self.write_errors.is_empty() || self.concern_error.is_some()
    }

    /// One [`CommandError`] listing every failure, or `Ok(self)`
    pub fn into_result(self) -> Result<Self> {
        if !self.has_errors() {
            return Ok(self);
        }
        let mut parts = Vec::new();
        if !self.write_errors.is_empty() {
            parts.push(format!("{} write error(s)", self.write_errors.len()));
        }
        if let Some((code, message)) = &self.concern_error {
            parts.push(format!("write concern error: {message} (code {code})"));
        }
        let code = self
            .write_errors
            .first()
            .map(|e| e.code)
            .or(self.concern_error.as_ref().map(|(c, _)| *c))
            .unwrap_or(0);
        Err(CommandError {
            code,
            code_name: None,
            message: parts.join("; "),
            raw: self.last_error_reply.unwrap_or_default(),
            write_errors: self.write_errors,
        }
        .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::protocol::message::{OpMsg, OpReply, REPLY_QUERY_FAILURE};

    #[test]
    fn test_ok_accepts_every_numeric_form() {
        for ok in [Value::Double(1.0), Value::Int32(1), Value::Int64(1), Value::Boolean(true)] {
            assert!(is_ok(&doc! { "ok" => ok }).unwrap());
        }
        assert!(!is_ok(&doc! { "ok" => 0.0 }).unwrap());
        assert!(!is_ok(&doc! { "ok" => f64::NAN }).unwrap());
        assert!(!is_ok(&doc! { "ok" => f64::INFINITY }).unwrap());
        assert!(is_ok(&doc! { "ok" => "1" }).is_err());
        assert!(is_ok(&Document::new()).is_err());
    }

    #[test]
    fn test_failed_reply_becomes_command_error() {
        let err = check_ok(doc! {
            "ok" => 0.0,
            "errmsg" => "ns not found",
            "code" => 26,
            "codeName" => "NamespaceNotFound",
        })
        .unwrap_err();
        let cmd = err.as_command_error().unwrap();
        assert_eq!(cmd.code, 26);
        assert_eq!(cmd.code_name.as_deref(), Some("NamespaceNotFound"));
        assert_eq!(cmd.message, "ns not found");
        assert_eq!(cmd.raw.get_str("errmsg").unwrap(), "ns not found");
    }

    #[test]
    fn test_query_failure_flag_uses_dollar_err() {
        let reply = ReplyMessage::Reply(OpReply {
            flags: REPLY_QUERY_FAILURE,
            cursor_id: 0,
            starting_from: 0,
            documents: vec![doc! { "$err" => "bad query", "code" => 2 }],
        });
        let err = reply_document(reply).unwrap_err();
        assert_eq!(err.as_command_error().unwrap().message, "bad query");
    }

    #[test]
    fn test_op_msg_body_passes_through() {
        let body = doc! { "ok" => 1.0 };
        let doc = reply_document(ReplyMessage::Msg(OpMsg { flags: 0, body: body.clone() })).unwrap();
        assert_eq!(doc, body);
    }

    #[test]
    fn test_write_errors_are_offset_and_aggregated() {
        let mut outcome = WriteOutcome::new();
        outcome.absorb(
            &doc! {
                "ok" => 1.0,
                "n" => 1,
                "writeErrors" => vec![doc! { "index" => 0, "code" => 11000, "errmsg" => "dup a" }],
            },
            0,
        );
        outcome.absorb(
            &doc! {
                "ok" => 1.0,
                "n" => 0,
                "writeErrors" => vec![doc! { "index" => 0, "code" => 121, "errmsg" => "invalid" }],
            },
            2,
        );
        assert_eq!(outcome.n, 1);
        let err = outcome.into_result().unwrap_err();
        let cmd = err.as_command_error().unwrap();
        assert_eq!(cmd.code, 11000);
        let indexes: Vec<_> = cmd.write_errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 2]);
    }

    #[test]
    fn test_write_concern_error_alone_fails() {
        let mut outcome = WriteOutcome::new();
        outcome.absorb(
            &doc! { "ok" => 1, "n" => 1, "writeConcernError" => doc! { "code" => 64, "errmsg" => "waiting for replication timed out" } },
            0,
        );
        let err = outcome.into_result().unwrap_err();
        let cmd = err.as_command_error().unwrap();
        assert_eq!(cmd.code, 64);
        assert!(cmd.write_errors.is_empty());
        assert!(cmd.message.contains("replication"));
    }
}
