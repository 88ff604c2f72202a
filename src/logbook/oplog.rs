use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TabulaError};
use crate::identity::{verify_signature, Profile};
use crate::logbook::op::{Op, OpType};

/// One per-author, append-only operation log. A log is created by an init
/// op, identified forever after by the InitID derived from that op, and
/// signed by its root author. Logs merged from other authors are foreign and
/// reject local appends.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Oplog {
    pub init_id: String,
    pub author_id: String,
    /// The author's username when the log was created. Display only; all
    /// resolution goes through `init_id`.
    pub username: String,
    pub ops: Vec<Op>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(skip)]
    pub foreign: bool,
}

/// Derives the stable identifier for a log from its init operation: a
/// 26-character base32 rendering of a truncated sha256 over the author,
/// subject name, and the init op's logical clock and timestamp.
pub fn derive_init_id(author_id: &str, name: &str, clock: u64, timestamp_nanos: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(author_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(clock.to_le_bytes());
    hasher.update(timestamp_nanos.to_le_bytes());

    let digest = hasher.finalize();
    BASE32_NOPAD.encode(&digest[..16]).to_lowercase()
}

impl Oplog {
    /// Creates a new log from its init op. The InitID is derived from the
    /// op, so identical inits produce identical logs.
    pub fn create(author: &Profile, init: Op) -> Result<Self> {
        if init.clock != 1 {
            return Err(TabulaError::IllegalState(
                "Init operations must carry clock 1".to_string(),
            ));
        }

        let init_id = derive_init_id(
            &init.author_id,
            &init.name,
            init.clock,
            init.timestamp.timestamp_nanos_opt().unwrap_or_default(),
        );

        let mut log = Self {
            init_id,
            author_id: init.author_id.clone(),
            username: author.username.clone(),
            ops: vec![init],
            signature: String::new(),
            foreign: false,
        };
        log.sign(author)?;

        Ok(log)
    }

    /// The logical clock the next op must carry
    pub fn next_clock(&self) -> u64 {
        self.ops.last().map(|op| op.clock + 1).unwrap_or(1)
    }

    /// Appends an op, enforcing single-writer ownership and clock
    /// monotonicity, and re-signs the log.
    pub fn append(&mut self, author: &Profile, op: Op) -> Result<()> {
        if self.foreign {
            return Err(TabulaError::SignatureInvalid(format!(
                "Log {} belongs to another author and is merge-only",
                self.init_id
            )));
        }
        if op.author_id != self.author_id {
            return Err(TabulaError::SignatureInvalid(format!(
                "Author {} may not append to log owned by {}",
                op.author_id, self.author_id
            )));
        }
        if op.clock != self.next_clock() {
            return Err(TabulaError::IllegalState(format!(
                "Op clock {} breaks monotonic order, expected {}",
                op.clock,
                self.next_clock()
            )));
        }

        self.ops.push(op);
        self.sign(author)
    }

    /// The bytes covered by the log signature: everything except the
    /// signature itself, CBOR-encoded.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let unsigned = Self {
            signature: String::new(),
            foreign: false,
            ..self.clone()
        };
        Ok(serde_cbor::to_vec(&unsigned)?)
    }

    pub fn sign(&mut self, author: &Profile) -> Result<()> {
        let signable = self.signable_bytes()?;
        self.signature = hex::encode(author.sign(&signable)?);
        Ok(())
    }

    /// Verifies the log signature against the public key embedded in the
    /// author's profile ID
    pub fn verify(&self) -> Result<()> {
        let signature = hex::decode(&self.signature)
            .map_err(|e| TabulaError::SignatureInvalid(format!("Malformed signature: {}", e)))?;
        verify_signature(&self.author_id, &self.signable_bytes()?, &signature)
    }

    /// The dataset's current name: the subject of the most recent name init
    /// or change op
    pub fn name(&self) -> &str {
        self.ops
            .iter()
            .rev()
            .find(|op| matches!(op.op_type, OpType::NameInit | OpType::NameChange))
            .map(|op| op.name.as_str())
            .unwrap_or("")
    }

    /// True once a NameDelete tombstone shadows the log
    pub fn is_deleted(&self) -> bool {
        self.ops
            .iter()
            .any(|op| op.op_type == OpType::NameDelete)
    }

    /// Projects the log's surviving version saves in append order.
    /// VersionDelete tombstones shadow the trailing `size` saves without
    /// rewriting them.
    pub fn version_saves(&self) -> Vec<&Op> {
        let mut saves: Vec<&Op> = Vec::new();

        for op in &self.ops {
            match op.op_type {
                OpType::VersionSave => saves.push(op),
                OpType::VersionDelete => {
                    let drop = (op.size as usize).min(saves.len());
                    saves.truncate(saves.len() - drop);
                }
                _ => (),
            }
        }

        saves
    }

    /// The content address of the newest surviving save, if any
    pub fn head_reference(&self) -> Option<&str> {
        self.version_saves().last().map(|op| op.reference.as_str())
    }

    /// Whether the head is published: the most recent publish/unpublish op
    /// wins
    pub fn published(&self) -> bool {
        self.ops
            .iter()
            .rev()
            .find_map(|op| match op.op_type {
                OpType::VersionPublish => Some(true),
                OpType::VersionUnpublish => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }
}
