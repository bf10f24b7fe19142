//! Binary serialization and deserialization of committed grammars.
//!
//! This module provides a stable binary format for persisting a
//! [`GrammarSnapshot`](crate::GrammarSnapshot), so that large grammars can be
//! reloaded without re-parsing their text. The format consists of a 32-byte
//! fixed header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"RGRM"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! deserialization fails immediately with [`DeserializeError::IncompatibleVersion`].
//! The engine version is informational only.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    GrammarSnapshot, InternalRule, MaxRepeat, Rule, RuleComponent, RuleReference, Scope,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"RGRM";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when serializing a grammar to bytes.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode grammar: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when deserializing a grammar from bytes.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a rulegram binary: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedGrammar {
    metadata: GrammarMetadata,
    rules: Vec<SerializedRule>,
    root: Option<String>,
    next_insertion_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GrammarMetadata {
    name: String,
    locale: Option<String>,
    generation: u64,
    rule_count: usize,
    source_digest: Option<[u8; 32]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedRule {
    name: String,
    public: bool,
    insertion_id: u64,
    activatable: bool,
    component: SerializedComponent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum SerializedComponent {
    Token(String),
    Reference {
        rule_name: String,
        grammar: Option<String>,
    },
    Alternatives {
        components: Vec<SerializedComponent>,
        weights: Option<Vec<f32>>,
    },
    Sequence(Vec<SerializedComponent>),
    Count {
        component: Box<SerializedComponent>,
        min: u32,
        /// `None` for an indefinite upper bound.
        max: Option<u32>,
        repeat_probability: Option<f32>,
    },
    Tag(String),
}

// ---------------------------------------------------------------------------
// Component conversion
// ---------------------------------------------------------------------------

fn serialize_component(component: &RuleComponent) -> SerializedComponent {
    match component {
        RuleComponent::Token(text) => SerializedComponent::Token(text.clone()),
        RuleComponent::Reference(reference) => SerializedComponent::Reference {
            rule_name: reference.rule_name.clone(),
            grammar: reference.grammar.clone(),
        },
        RuleComponent::Alternatives {
            components,
            weights,
        } => SerializedComponent::Alternatives {
            components: components.iter().map(serialize_component).collect(),
            weights: weights.clone(),
        },
        RuleComponent::Sequence(components) => {
            SerializedComponent::Sequence(components.iter().map(serialize_component).collect())
        }
        RuleComponent::Count {
            component,
            min,
            max,
            repeat_probability,
        } => SerializedComponent::Count {
            component: Box::new(serialize_component(component)),
            min: *min,
            max: match max {
                MaxRepeat::Finite(n) => Some(*n),
                MaxRepeat::Indefinite => None,
            },
            repeat_probability: *repeat_probability,
        },
        RuleComponent::Tag(value) => SerializedComponent::Tag(value.clone()),
    }
}

fn deserialize_component(component: SerializedComponent) -> RuleComponent {
    match component {
        SerializedComponent::Token(text) => RuleComponent::Token(text),
        SerializedComponent::Reference { rule_name, grammar } => {
            RuleComponent::Reference(RuleReference { rule_name, grammar })
        }
        SerializedComponent::Alternatives {
            components,
            weights,
        } => RuleComponent::Alternatives {
            components: components.into_iter().map(deserialize_component).collect(),
            weights,
        },
        SerializedComponent::Sequence(components) => {
            RuleComponent::Sequence(components.into_iter().map(deserialize_component).collect())
        }
        SerializedComponent::Count {
            component,
            min,
            max,
            repeat_probability,
        } => RuleComponent::Count {
            component: Box::new(deserialize_component(*component)),
            min,
            max: max.map_or(MaxRepeat::Indefinite, MaxRepeat::Finite),
            repeat_probability,
        },
        SerializedComponent::Tag(value) => RuleComponent::Tag(value),
    }
}

// ---------------------------------------------------------------------------
// GrammarSnapshot -> SerializedGrammar
// ---------------------------------------------------------------------------

fn snapshot_to_serialized(
    snapshot: &GrammarSnapshot,
    source_text: Option<&str>,
) -> SerializedGrammar {
    let source_digest = source_text.map(|s| *blake3::hash(s.as_bytes()).as_bytes());

    // Insertion order keeps the output deterministic.
    let rules: Vec<SerializedRule> = snapshot
        .ordered()
        .map(|r| SerializedRule {
            name: r.rule.name.clone(),
            public: r.rule.is_public(),
            insertion_id: r.insertion_id,
            activatable: r.activatable,
            component: serialize_component(&r.rule.component),
        })
        .collect();

    SerializedGrammar {
        metadata: GrammarMetadata {
            name: snapshot.name.clone(),
            locale: snapshot.locale.clone(),
            generation: snapshot.generation,
            rule_count: rules.len(),
            source_digest,
        },
        rules,
        root: snapshot.root.clone(),
        next_insertion_id: snapshot.next_insertion_id,
    }
}

// ---------------------------------------------------------------------------
// SerializedGrammar -> GrammarSnapshot
// ---------------------------------------------------------------------------

fn serialized_to_snapshot(ser: SerializedGrammar) -> Result<GrammarSnapshot, DeserializeError> {
    validate(&ser)?;

    let mut rules = HashMap::with_capacity(ser.rules.len());
    for sr in ser.rules {
        let scope = if sr.public {
            Scope::Public
        } else {
            Scope::Private
        };
        let rule = Rule::new(sr.name, scope, deserialize_component(sr.component));
        rule.component.check_shape().map_err(|reason| {
            DeserializeError::Validation(format!("rule '{}': {reason}", rule.name))
        })?;
        rules.insert(
            rule.name.clone(),
            InternalRule {
                rule,
                insertion_id: sr.insertion_id,
                activatable: sr.activatable,
            },
        );
    }

    Ok(GrammarSnapshot {
        name: ser.metadata.name,
        locale: ser.metadata.locale,
        rules,
        root: ser.root,
        next_insertion_id: ser.next_insertion_id,
        generation: ser.metadata.generation,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(ser: &SerializedGrammar) -> Result<(), DeserializeError> {
    // Metadata consistency
    if ser.metadata.rule_count != ser.rules.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} rules but payload has {}",
            ser.metadata.rule_count,
            ser.rules.len()
        )));
    }
    if ser.metadata.name.is_empty() {
        return Err(DeserializeError::Validation("empty grammar name".to_owned()));
    }

    let mut names = HashSet::with_capacity(ser.rules.len());
    let mut ids = HashSet::with_capacity(ser.rules.len());
    for rule in &ser.rules {
        if rule.name.is_empty() {
            return Err(DeserializeError::Validation("empty rule name".to_owned()));
        }
        if !names.insert(rule.name.as_str()) {
            return Err(DeserializeError::Validation(format!(
                "duplicate rule name '{}'",
                rule.name
            )));
        }
        if !ids.insert(rule.insertion_id) {
            return Err(DeserializeError::Validation(format!(
                "duplicate insertion id {}",
                rule.insertion_id
            )));
        }
        if rule.insertion_id >= ser.next_insertion_id {
            return Err(DeserializeError::Validation(format!(
                "insertion id {} of rule '{}' not below next id {}",
                rule.insertion_id, rule.name, ser.next_insertion_id
            )));
        }
        if rule.activatable && !rule.public {
            return Err(DeserializeError::Validation(format!(
                "private rule '{}' marked activatable",
                rule.name
            )));
        }
    }

    // Root must name a public rule
    if let Some(root) = &ser.root {
        match ser.rules.iter().find(|r| &r.name == root) {
            None => {
                return Err(DeserializeError::Validation(format!(
                    "root '{root}' is not a rule of the grammar"
                )))
            }
            Some(r) if !r.public => {
                return Err(DeserializeError::Validation(format!(
                    "root '{root}' is private"
                )))
            }
            Some(_) => {}
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) {
    let hash = blake3::hash(payload);
    let hash_bytes = hash.as_bytes();

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    #[allow(clippy::cast_possible_truncation)] // payload will never exceed 4 GiB
    let payload_len = payload.len() as u32;
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash_bytes[..16]);
}

#[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32, always fits in u32
fn read_header(bytes: &[u8]) -> Result<(u16, u32, [u8; 16]), DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    }

    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    // bytes[6..8] is engine_version (informational, not used for checks)
    // bytes[8..12] is flags (reserved)
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);

    Ok((format_version, payload_len, hash))
}

// ---------------------------------------------------------------------------
// Public encode/decode
// ---------------------------------------------------------------------------

pub(crate) fn encode(
    snapshot: &GrammarSnapshot,
    source_text: Option<&str>,
) -> Result<Vec<u8>, SerializeError> {
    let serialized = snapshot_to_serialized(snapshot, source_text);
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<GrammarSnapshot, DeserializeError> {
    let (format_version, payload_len, stored_hash) = read_header(bytes)?;

    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload_start = HEADER_SIZE;
    let payload_end = payload_start + payload_len as usize;
    if bytes.len() < payload_end {
        return Err(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - HEADER_SIZE,
        });
    }
    let payload = &bytes[payload_start..payload_end];

    // Integrity check
    let computed_hash = blake3::hash(payload);
    if computed_hash.as_bytes()[..16] != stored_hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, _): (SerializedGrammar, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;

    serialized_to_snapshot(serialized)
}

/// The BLAKE3 digest of the source text stored in a grammar binary, if one
/// was given when it was written.
///
/// Compare it with `blake3::hash(source)` to tell whether a cached binary is
/// stale. Only the header and payload decode are checked; the payload
/// checksum is verified when the grammar itself is loaded.
///
/// # Errors
///
/// Returns [`DeserializeError`] if the header or payload cannot be read.
pub fn source_digest(bytes: &[u8]) -> Result<Option<[u8; 32]>, DeserializeError> {
    let (format_version, payload_len, _) = read_header(bytes)?;
    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }
    let payload = bytes
        .get(HEADER_SIZE..HEADER_SIZE + payload_len as usize)
        .ok_or(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - HEADER_SIZE,
        })?;
    let (serialized, _): (SerializedGrammar, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    Ok(serialized.metadata.source_digest)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
