//! Operation signatures and overload resolution
//!
//! Resolution is arity-first: when a single signature is registered for a
//! name and the argument count matches, no argument types are inspected at
//! all. Full type matching is only paid for genuinely overloaded names, and
//! an ambiguous result is always raised to the caller, never guessed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use crate::connection::OperationInfo;
use crate::descriptor::TypeDescriptor;
use crate::error::RemoxError;
use crate::value::Value;

/// An operation's name-independent parameter-type profile.
///
/// Two signatures are equal iff their ordered parameter descriptor sequences
/// are identical; the operation name is carried for diagnostics but is not
/// part of identity, since overload sets are keyed by name externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSignature {
    operation_name: String,
    params: Vec<TypeDescriptor>,
}

impl OperationSignature {
    /// Builds a signature from an operation's reported metadata.
    ///
    /// Malformed parameter tokens propagate as fatal metadata errors: a
    /// handle built over incomplete metadata is unsafe to expose.
    pub fn from_info(info: &OperationInfo) -> Result<Self, RemoxError> {
        let params = info
            .params
            .iter()
            .map(|param| TypeDescriptor::parse(&param.type_token))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            operation_name: info.name.clone(),
            params,
        })
    }

    /// Builds a signature directly from parameter descriptors
    pub fn new(operation_name: impl Into<String>, params: Vec<TypeDescriptor>) -> Self {
        Self {
            operation_name: operation_name.into(),
            params,
        }
    }

    /// The operation name this signature was declared under
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// The declared parameter count
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    /// The ordered parameter descriptors
    pub fn params(&self) -> &[TypeDescriptor] {
        &self.params
    }

    /// The canonical wire tokens of the parameter descriptors
    pub fn param_tokens(&self) -> Vec<String> {
        self.params.iter().map(TypeDescriptor::token).collect()
    }

    /// Per-parameter type matching of the caller's arguments.
    ///
    /// The caller must have already filtered by arity.
    fn matches_args(&self, args: &[Value]) -> bool {
        self.params
            .iter()
            .zip(args.iter())
            .all(|(param, arg)| param.accepts(arg))
    }

    /// Deterministic hash of the descriptor token sequence (FNV-1a),
    /// used only for tie-break ordering
    fn sequence_hash(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = FNV_OFFSET;
        for param in &self.params {
            for byte in param.token().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            hash ^= u64::from(b';');
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

impl PartialEq for OperationSignature {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
    }
}

impl Eq for OperationSignature {}

impl Hash for OperationSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.params.hash(state);
    }
}

impl PartialOrd for OperationSignature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OperationSignature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.arg_count()
            .cmp(&other.arg_count())
            .then_with(|| self.sequence_hash().cmp(&other.sequence_hash()))
            .then_with(|| self.param_tokens().cmp(&other.param_tokens()))
    }
}

/// Selects exactly one signature for the given arguments.
///
/// Returns `Ok(None)` when no registered signature has a matching arity —
/// the call is not an operation and the caller should treat it as a
/// property/method miss. Zero or multiple type matches among same-arity
/// candidates fail with [`RemoxError::Overload`].
pub fn resolve<'a>(
    operation: &str,
    candidates: &'a BTreeSet<OperationSignature>,
    args: &[Value],
) -> Result<Option<&'a OperationSignature>, RemoxError> {
    let mut by_arity = candidates
        .iter()
        .filter(|signature| signature.arg_count() == args.len());

    let first = match by_arity.next() {
        Some(signature) => signature,
        None => return Ok(None),
    };

    // The common, non-overloaded case: arity alone disambiguates and no
    // argument type is ever inspected.
    let rest: Vec<&OperationSignature> = by_arity.collect();
    if rest.is_empty() {
        return Ok(Some(first));
    }

    let mut matched: Vec<&OperationSignature> = std::iter::once(first)
        .chain(rest)
        .filter(|signature| signature.matches_args(args))
        .collect();

    match matched.len() {
        1 => Ok(Some(matched.remove(0))),
        matched_count => Err(RemoxError::Overload {
            operation: operation.to_string(),
            arity: args.len(),
            matched: matched_count,
        }),
    }
}
