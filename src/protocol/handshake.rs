//! SCRAM challenge-response authentication (RFC 5802, RFC 7677)
//!
//! This module is the pure state machine; [`crate::protocol::auth`] carries
//! its messages over a connection.
//!
//! ```text
//! Unauthenticated --client_first--> ChallengeSent --verify_server_final--> Verified
//!                                         |
//!                                         +-- bad challenge / bad signature --> Failed
//! ```
//!
//! Conversation state is per session: each [`ScramConversation`] owns its
//! nonce and derived keys, and secret material is zeroized on drop.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{constants, AuthErrorKind, DriverError, Result};

/// Smallest iteration count accepted from a server
pub const MIN_ITERATIONS: u32 = 4096;

/// Random bytes in a client nonce before base64
pub const CLIENT_NONCE_LEN: usize = 24;

/// base64("n,,"): no channel binding, no authzid
const GS2_HEADER_B64: &str = "biws";

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

fn bad_challenge(message: impl Into<String>) -> DriverError {
    DriverError::authentication(AuthErrorKind::BadChallenge, message)
}

/// Supported SASL mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScramMechanism {
    #[serde(rename = "SCRAM-SHA-1")]
    Sha1,
    #[serde(rename = "SCRAM-SHA-256")]
    Sha256,
}

impl ScramMechanism {
    pub fn name(self) -> &'static str {
        match self {
            ScramMechanism::Sha1 => "SCRAM-SHA-1",
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCRAM-SHA-1" => Some(ScramMechanism::Sha1),
            "SCRAM-SHA-256" => Some(ScramMechanism::Sha256),
            _ => None,
        }
    }

    /// SHA-256 when the server advertises it, SHA-1 otherwise
    pub fn negotiate(server_mechanisms: &[String]) -> Self {
        if server_mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
            ScramMechanism::Sha256
        } else {
            ScramMechanism::Sha1
        }
    }

    /// Password as fed to Hi(). SHA-1 uses the legacy
    /// `hex(md5("user:mongo:password"))` digest; SHA-256 uses the password as given.
    pub fn prepare_password(self, username: &str, password: &str) -> Zeroizing<String> {
        match self {
            ScramMechanism::Sha1 => {
                let digest = md5::compute(format!("{username}:mongo:{password}"));
                Zeroizing::new(format!("{digest:x}"))
            }
            ScramMechanism::Sha256 => Zeroizing::new(password.to_string()),
        }
    }

    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha1 => Sha1::digest(data).to_vec(),
            ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let invalid = |e: hmac::digest::InvalidLength| bad_challenge(format!("HMAC key: {e}"));
        match self {
            ScramMechanism::Sha1 => {
                let mut mac = HmacSha1::new_from_slice(key).map_err(invalid)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            ScramMechanism::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(key).map_err(invalid)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Hi(password, salt, i): PBKDF2 with this mechanism's HMAC
    pub fn salted_password(
        self,
        prepared_password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let mut block = salt.to_vec();
        block.extend_from_slice(&1u32.to_be_bytes());
        let mut u = self.hmac(prepared_password.as_bytes(), &block)?;
        let mut result = Zeroizing::new(u.clone());
        for _ in 1..iterations {
            u = self.hmac(prepared_password.as_bytes(), &u)?;
            for (r, b) in result.iter_mut().zip(&u) {
                *r ^= b;
            }
        }
        Ok(result)
    }

    /// ClientProof for `auth_message`
    pub fn client_proof(self, salted_password: &[u8], auth_message: &str) -> Result<Vec<u8>> {
        let client_key = Zeroizing::new(self.hmac(salted_password, b"Client Key")?);
        let stored_key = self.hash(&client_key);
        let signature = self.hmac(&stored_key, auth_message.as_bytes())?;
        Ok(client_key.iter().zip(&signature).map(|(k, s)| k ^ s).collect())
    }

    /// ServerSignature for `auth_message`
    pub fn server_signature(self, salted_password: &[u8], auth_message: &str) -> Result<Vec<u8>> {
        let server_key = Zeroizing::new(self.hmac(salted_password, b"Server Key")?);
        self.hmac(&server_key, auth_message.as_bytes())
    }

    /// Server-side check of a presented proof
    pub fn verify_client_proof(
        self,
        salted_password: &[u8],
        auth_message: &str,
        proof: &[u8],
    ) -> Result<bool> {
        Ok(self.client_proof(salted_password, auth_message)? == proof)
    }
}

/// Escape a SASL username (`=` -> `=3D`, `,` -> `=2C`)
pub fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

/// Conversation states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramState {
    Unauthenticated,
    ChallengeSent,
    Verified,
    Failed,
}

/// Parsed server-first message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFirst {
    pub nonce: String,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

impl ServerFirst {
    pub fn parse(message: &str) -> Result<Self> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in message.split(',') {
            let (key, value) = attr
                .split_once('=')
                .ok_or_else(|| bad_challenge(format!("malformed attribute '{attr}'")))?;
            match key {
                "m" => return Err(bad_challenge("unsupported mandatory extension")),
                "r" => nonce = Some(value.to_string()),
                "s" => {
                    salt = Some(
                        BASE64
                            .decode(value)
                            .map_err(|e| bad_challenge(format!("salt is not base64: {e}")))?,
                    )
                }
                "i" => {
                    iterations = Some(value.parse::<u32>().map_err(|_| {
                        bad_challenge(format!("iteration count '{value}' is not a number"))
                    })?)
                }
                _ => {}
            }
        }
        Ok(Self {
            nonce: nonce.ok_or_else(|| bad_challenge("server-first lacks r="))?,
            salt: salt.ok_or_else(|| bad_challenge("server-first lacks s="))?,
            iterations: iterations.ok_or_else(|| bad_challenge("server-first lacks i="))?,
        })
    }
}

/// Client side of one SCRAM conversation
pub struct ScramConversation {
    mechanism: ScramMechanism,
    username: String,
    password: Zeroizing<String>,
    client_nonce: String,
    client_first_bare: String,
    expected_server_signature: Option<Zeroizing<Vec<u8>>>,
    state: ScramState,
}

impl std::fmt::Debug for ScramConversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramConversation")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ScramConversation {
    /// Start a conversation with a fresh random nonce
    pub fn new(mechanism: ScramMechanism, username: &str, password: &str) -> Result<Self> {
        let mut raw = [0u8; CLIENT_NONCE_LEN];
        getrandom::fill(&mut raw)
            .map_err(|e| bad_challenge(format!("cannot generate client nonce: {e}")))?;
        Ok(Self::with_client_nonce(
            mechanism,
            username,
            password,
            BASE64.encode(raw),
        ))
    }

    /// Start a conversation with a caller-chosen nonce
    pub fn with_client_nonce(
        mechanism: ScramMechanism,
        username: &str,
        password: &str,
        client_nonce: String,
    ) -> Self {
        Self {
            mechanism,
            username: username.to_string(),
            password: mechanism.prepare_password(username, password),
            client_nonce,
            client_first_bare: String::new(),
            expected_server_signature: None,
            state: ScramState::Unauthenticated,
        }
    }

    pub fn mechanism(&self) -> ScramMechanism {
        self.mechanism
    }

    pub fn state(&self) -> ScramState {
        self.state
    }

    fn expect_state(&self, expected: ScramState) -> Result<()> {
        if self.state != expected {
            return Err(bad_challenge(format!(
                "{} (in {:?}, expected {expected:?})",
                constants::ERR_AUTH_STATE,
                self.state
            )));
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: DriverError) -> Result<T> {
        self.state = ScramState::Failed;
        self.expected_server_signature = None;
        Err(err)
    }

    /// Mark the conversation failed, e.g. when the server rejects it
    pub fn abort(&mut self) {
        self.state = ScramState::Failed;
        self.expected_server_signature = None;
    }

    /// `n,,n=<user>,r=<nonce>`; moves to `ChallengeSent`
    pub fn client_first(&mut self) -> Result<String> {
        self.expect_state(ScramState::Unauthenticated)?;
        self.client_first_bare = format!(
            "n={},r={}",
            escape_username(&self.username),
            self.client_nonce
        );
        self.state = ScramState::ChallengeSent;
        debug!(mechanism = self.mechanism.name(), "SCRAM client-first prepared");
        Ok(format!("n,,{}", self.client_first_bare))
    }

    /// Answer the server challenge with `c=biws,r=<nonce>,p=<proof>`
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        self.expect_state(ScramState::ChallengeSent)?;
        if self.expected_server_signature.is_some() {
            return self.fail(bad_challenge(constants::ERR_AUTH_STATE));
        }

        let challenge = match ServerFirst::parse(server_first) {
            Ok(c) => c,
            Err(e) => return self.fail(e),
        };
        if !challenge.nonce.starts_with(&self.client_nonce)
            || challenge.nonce.len() <= self.client_nonce.len()
        {
            return self.fail(bad_challenge(constants::ERR_NONCE_MISMATCH));
        }
        if challenge.iterations < MIN_ITERATIONS {
            return self.fail(bad_challenge(format!(
                "{}: got {}",
                constants::ERR_LOW_ITERATIONS,
                challenge.iterations
            )));
        }

        let without_proof = format!("c={GS2_HEADER_B64},r={}", challenge.nonce);
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let computed = self
            .mechanism
            .salted_password(&self.password, &challenge.salt, challenge.iterations)
            .and_then(|salted| {
                let proof = self.mechanism.client_proof(&salted, &auth_message)?;
                let signature = self.mechanism.server_signature(&salted, &auth_message)?;
                Ok((proof, signature))
            });
        let (proof, signature) = match computed {
            Ok(pair) => pair,
            Err(e) => return self.fail(e),
        };
        self.expected_server_signature = Some(Zeroizing::new(signature));

        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Check `v=<signature>`; moves to `Verified` or `Failed`
    pub fn verify_server_final(&mut self, server_final: &str) -> Result<()> {
        self.expect_state(ScramState::ChallengeSent)?;
        let Some(expected) = self.expected_server_signature.take() else {
            return self.fail(bad_challenge(constants::ERR_AUTH_STATE));
        };

        for attr in server_final.split(',') {
            if let Some(error) = attr.strip_prefix("e=") {
                return self.fail(DriverError::authentication(
                    AuthErrorKind::ServerRejected,
                    format!("server reported: {error}"),
                ));
            }
            if let Some(value) = attr.strip_prefix("v=") {
                let presented = match BASE64.decode(value) {
                    Ok(v) => v,
                    Err(e) => {
                        return self.fail(bad_challenge(format!("server signature is not base64: {e}")))
                    }
                };
                if presented.as_slice() != expected.as_slice() {
                    warn!(mechanism = self.mechanism.name(), "SCRAM server signature mismatch");
                    return self.fail(DriverError::authentication(
                        AuthErrorKind::ProofMismatch,
                        constants::ERR_SERVER_SIGNATURE,
                    ));
                }
                self.state = ScramState::Verified;
                return Ok(());
            }
        }
        self.fail(bad_challenge("server-final lacks v="))
    }
}
