#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::ContractViolation;

pub const TRANSITION_PROTOCOL_VERSION: u32 = 1;
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Create,
    Replace,
}

impl TransitionKind {
    pub const fn code(self) -> u8 {
        match self {
            TransitionKind::Create => 1,
            TransitionKind::Replace => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TransitionKind::Create),
            2 => Some(TransitionKind::Replace),
            _ => None,
        }
    }
}

/// Lifecycle of one state transition. Steps advance strictly in order; the
/// pipeline types in the signer enforce the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionState {
    Built,
    SignableBytesExtracted,
    Signed,
    Attached,
    Broadcast,
    Confirmed,
    Rejected,
}

/// Index of the signer key that produced a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignerKeyId(pub u8);

/// Fixed-width recoverable signature, `r (32) || s (32) || v (1)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionSignature([u8; SIGNATURE_LEN]);

impl TransitionSignature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ContractViolation> {
        let fixed: [u8; SIGNATURE_LEN] =
            bytes
                .try_into()
                .map_err(|_| ContractViolation::InvalidLength {
                    field: "transition_signature",
                    expected: SIGNATURE_LEN,
                    got: bytes.len(),
                })?;
        Ok(Self(fixed))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for TransitionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransitionSignature(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    Integer(u64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Application data carried by a transition, kept in key order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionPayload {
    entries: BTreeMap<String, PayloadValue>,
}

impl TransitionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: PayloadValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PayloadValue) -> Option<PayloadValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PayloadValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ledger-side reference returned once a payload is accepted for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionReference(pub String);

impl TransitionReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
