use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};

type HmacSha256 = Hmac<Sha256>;

/// One link in a tamper-evident audit trail. Entries for the same
/// stream (one decision or one escalation case) form a hash chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub entry_id: String,
    pub stream: String,
    pub version: u32,
    pub content_hash: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub stream: String,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Groups audit events into per-subject streams and signs each link
/// under a process-wide key so replays and exports can prove the trail
/// was not edited after the fact.
#[derive(Clone, Debug)]
pub struct AuditChain {
    signing_key: Vec<u8>,
    entries_by_stream: HashMap<String, Vec<ChainEntry>>,
}

pub fn stream_key(event: &AuditEvent) -> String {
    if let Some(case_id) = event.case_id {
        return format!("case:{}", case_id.0);
    }
    if let Some(decision_id) = &event.decision_id {
        return format!("decision:{}", decision_id.0);
    }
    "system".to_string()
}

impl AuditChain {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec(), entries_by_stream: HashMap::new() }
    }

    pub fn append(&mut self, event: &AuditEvent) -> ChainEntry {
        let stream = stream_key(event);
        let chain = self.entries_by_stream.entry(stream.clone()).or_default();
        let version = u32::try_from(chain.len()).unwrap_or(u32::MAX).saturating_add(1);
        let prev_hash = chain.last().map(|entry| entry.entry_hash.clone());
        let timestamp = Utc::now();
        let content_hash = content_hash(event);
        let entry_hash =
            hash_entry_material(&stream, version, &content_hash, prev_hash.as_deref(), timestamp);
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        let entry = ChainEntry {
            entry_id: Uuid::new_v4().to_string(),
            stream,
            version,
            content_hash,
            prev_hash,
            entry_hash,
            timestamp,
            signature,
        };

        chain.push(entry.clone());
        entry
    }

    pub fn verify_stream(&self, stream: &str) -> ChainVerification {
        let Some(entries) = self.entries_by_stream.get(stream) else {
            return ChainVerification {
                stream: stream.to_string(),
                valid: false,
                verified_entries: 0,
                latest_hash: None,
                failure_reason: Some("no audit entries found for stream".to_string()),
            };
        };

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_version = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.version != expected_version {
                return self.failure(
                    stream,
                    index,
                    previous_hash,
                    format!(
                        "version mismatch at entry {}: expected {}, found {}",
                        entry.entry_id, expected_version, entry.version
                    ),
                );
            }

            if entry.prev_hash != previous_hash {
                return self.failure(
                    stream,
                    index,
                    previous_hash,
                    format!("previous hash mismatch at entry {}", entry.entry_id),
                );
            }

            let computed_entry_hash = hash_entry_material(
                &entry.stream,
                entry.version,
                &entry.content_hash,
                entry.prev_hash.as_deref(),
                entry.timestamp,
            );
            if computed_entry_hash != entry.entry_hash {
                return self.failure(
                    stream,
                    index,
                    previous_hash,
                    format!("entry hash mismatch at entry {}", entry.entry_id),
                );
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return self.failure(
                    stream,
                    index,
                    previous_hash,
                    format!("signature mismatch at entry {}", entry.entry_id),
                );
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainVerification {
            stream: stream.to_string(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    pub fn entries_for_stream(&self, stream: &str) -> Vec<ChainEntry> {
        self.entries_by_stream.get(stream).cloned().unwrap_or_default()
    }

    fn failure(
        &self,
        stream: &str,
        verified_entries: usize,
        latest_hash: Option<String>,
        reason: String,
    ) -> ChainVerification {
        ChainVerification {
            stream: stream.to_string(),
            valid: false,
            verified_entries,
            latest_hash,
            failure_reason: Some(reason),
        }
    }
}

/// An audit sink that records events and extends the signed chain on
/// every emission.
#[derive(Clone)]
pub struct ChainedAuditSink {
    inner: Arc<Mutex<ChainedState>>,
}

struct ChainedState {
    chain: AuditChain,
    events: Vec<AuditEvent>,
}

impl ChainedAuditSink {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChainedState {
                chain: AuditChain::new(signing_key),
                events: Vec::new(),
            })),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.inner.lock() {
            Ok(state) => state.events.clone(),
            Err(poisoned) => poisoned.into_inner().events.clone(),
        }
    }

    pub fn verify_stream(&self, stream: &str) -> ChainVerification {
        match self.inner.lock() {
            Ok(state) => state.chain.verify_stream(stream),
            Err(poisoned) => poisoned.into_inner().chain.verify_stream(stream),
        }
    }

    pub fn entries_for_stream(&self, stream: &str) -> Vec<ChainEntry> {
        match self.inner.lock() {
            Ok(state) => state.chain.entries_for_stream(stream),
            Err(poisoned) => poisoned.into_inner().chain.entries_for_stream(stream),
        }
    }
}

impl AuditSink for ChainedAuditSink {
    fn emit(&self, event: AuditEvent) {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.chain.append(&event);
        state.events.push(event);
    }
}

fn content_hash(event: &AuditEvent) -> String {
    let canonical_payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(_) => event.event_id.as_bytes().to_vec(),
    };
    sha256_hex(&canonical_payload)
}

fn hash_entry_material(
    stream: &str,
    version: u32,
    content_hash: &str,
    prev_hash: Option<&str>,
    timestamp: DateTime<Utc>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}",
        stream,
        version,
        content_hash,
        prev_hash.unwrap_or(""),
        timestamp.to_rfc3339(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
