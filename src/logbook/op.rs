use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TabulaError;

/// Operation categories, carried in the high nibble of an op code
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpCategory {
    User,
    Name,
    Version,
    Acl,
}

/// The closed set of logbook operation types. The high nibble encodes the
/// category, the low nibble the variant.
#[derive(Deserialize, Serialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(try_from = "u8")]
#[serde(into = "u8")]
pub enum OpType {
    UserInit,
    UserChange,
    UserRename,
    UserDelete,
    NameInit,
    NameChange,
    NameDelete,
    VersionSave,
    VersionDelete,
    VersionPublish,
    VersionUnpublish,
    AclInit,
    AclUpdate,
    AclDelete,
}

impl OpType {
    pub fn code(&self) -> u8 {
        match self {
            OpType::UserInit => 0x10,
            OpType::UserChange => 0x11,
            OpType::UserRename => 0x12,
            OpType::UserDelete => 0x13,
            OpType::NameInit => 0x20,
            OpType::NameChange => 0x21,
            OpType::NameDelete => 0x22,
            OpType::VersionSave => 0x30,
            OpType::VersionDelete => 0x31,
            OpType::VersionPublish => 0x32,
            OpType::VersionUnpublish => 0x33,
            OpType::AclInit => 0x40,
            OpType::AclUpdate => 0x41,
            OpType::AclDelete => 0x42,
        }
    }

    pub fn category(&self) -> OpCategory {
        match self.code() >> 4 {
            0x1 => OpCategory::User,
            0x2 => OpCategory::Name,
            0x3 => OpCategory::Version,
            _ => OpCategory::Acl,
        }
    }
}

impl TryFrom<u8> for OpType {
    type Error = TabulaError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let op_type = match code {
            0x10 => OpType::UserInit,
            0x11 => OpType::UserChange,
            0x12 => OpType::UserRename,
            0x13 => OpType::UserDelete,
            0x20 => OpType::NameInit,
            0x21 => OpType::NameChange,
            0x22 => OpType::NameDelete,
            0x30 => OpType::VersionSave,
            0x31 => OpType::VersionDelete,
            0x32 => OpType::VersionPublish,
            0x33 => OpType::VersionUnpublish,
            0x40 => OpType::AclInit,
            0x41 => OpType::AclUpdate,
            0x42 => OpType::AclDelete,
            _ => {
                return Err(TabulaError::IllegalArgument(format!(
                    "Unknown operation code: {:#04x}",
                    code
                )))
            }
        };
        Ok(op_type)
    }
}

impl From<OpType> for u8 {
    fn from(op_type: OpType) -> Self {
        op_type.code()
    }
}

/// One logbook operation. Ops are appended once and never mutated; the
/// logical clock provides total order within a log.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Op {
    #[serde(rename = "type")]
    pub op_type: OpType,
    /// Logical timestamp, monotonic within a log
    pub clock: u64,
    pub author_id: String,
    /// Subject name: the dataset name for name ops, the new username for
    /// user renames
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Content address of the snapshot this op refers to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_reference: String,
    /// Commit title
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
    /// Commit message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Type-specific size payload: body bytes for saves, drop count for
    /// version deletes
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Op {
    pub fn new(op_type: OpType, clock: u64, author_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            op_type,
            clock,
            author_id: author_id.to_string(),
            name: String::new(),
            reference: String::new(),
            prev_reference: String::new(),
            note: String::new(),
            message: String::new(),
            size: 0,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for op_type in [
            OpType::UserInit,
            OpType::UserRename,
            OpType::NameInit,
            OpType::NameChange,
            OpType::NameDelete,
            OpType::VersionSave,
            OpType::VersionDelete,
            OpType::VersionPublish,
            OpType::VersionUnpublish,
            OpType::AclUpdate,
        ] {
            assert_eq!(op_type, OpType::try_from(op_type.code()).unwrap());
        }
    }

    #[test]
    fn categories_come_from_the_high_nibble() {
        assert_eq!(OpCategory::User, OpType::UserDelete.category());
        assert_eq!(OpCategory::Name, OpType::NameInit.category());
        assert_eq!(OpCategory::Version, OpType::VersionUnpublish.category());
        assert_eq!(OpCategory::Acl, OpType::AclInit.category());
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(OpType::try_from(0x99).is_err());
        assert!(OpType::try_from(0x14).is_err());
    }
}
