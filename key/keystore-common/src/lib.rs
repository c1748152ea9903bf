// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

mod authorization;
pub use authorization::{
    AuthorizationSet, AuthorizationSetBuilder, KeyParameter, KeyParameterValue, Tag, TagType,
};

mod defs;
pub use defs::{Algorithm, BlockMode, Digest, KeyFormat, KeyOrigin, Padding, Purpose};

mod error;
pub use error::{Error, ErrorCode, ResponseCode, Status, StatusOrigin};

/// Opaque token naming one in-progress operation. Assigned by the service on begin.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OperationHandle(pub u64);

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The split of a key's properties into those enforced by a hardware root of trust
/// and those enforced only by software policy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyCharacteristics {
    pub hardware_enforced: AuthorizationSet,
    pub software_enforced: AuthorizationSet,
}

impl KeyCharacteristics {
    pub fn is_empty(&self) -> bool {
        self.hardware_enforced.is_empty() && self.software_enforced.is_empty()
    }

    /// Looks up `tag` in the hardware-enforced set first, then the software-enforced set.
    pub fn find(&self, tag: Tag) -> Option<&KeyParameterValue> {
        self.hardware_enforced
            .find(tag)
            .or_else(|| self.software_enforced.find(tag))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BeginResult {
    pub handle: OperationHandle,
    pub output_parameters: AuthorizationSet,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdateResult {
    /// Number of leading bytes of the input that the service accepted.
    /// The caller must resubmit the rest.
    pub input_consumed: usize,
    pub output_parameters: AuthorizationSet,
    pub output: Vec<u8>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FinishResult {
    pub output_parameters: AuthorizationSet,
    pub output: Vec<u8>,
}
