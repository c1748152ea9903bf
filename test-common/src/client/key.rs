// Copyright (c) Microsoft. All rights reserved.

use keystore_common::{
    AuthorizationSet, BeginResult, Error, ErrorCode, FinishResult, KeyCharacteristics, KeyFormat,
    KeyOrigin, KeyParameterValue, OperationHandle, Purpose, ResponseCode, Tag, UpdateResult,
};

use super::engine;

/// Tags a hardware-backed keystore would enforce in its secure environment.
const HARDWARE_ENFORCED_TAGS: &[Tag] = &[
    Tag::ALGORITHM,
    Tag::KEY_SIZE,
    Tag::PURPOSE,
    Tag::DIGEST,
    Tag::PADDING,
    Tag::BLOCK_MODE,
];

/// Tags that parameterize one operation and are never part of a key's characteristics.
const OPERATION_TAGS: &[Tag] = &[Tag::NONCE, Tag::ASSOCIATED_DATA, Tag::MAC_LENGTH];

const MAX_ENTROPY_LEN: usize = 2048;
const MAX_OPERATIONS: usize = 16;

/// An in-memory keystore with real cryptography, for driving [`keystore_client::KeystoreClient`]
/// callers in tests.
///
/// The public fields inject faults.
#[derive(Default)]
pub struct MockKeystoreClient {
    /// Upper bound on the bytes one update accepts. `None` accepts everything.
    pub max_update_chunk: Option<usize>,

    /// Every call fails as if the service were unreachable.
    pub transport_failure: bool,

    /// Keys that fail to delete with [`ResponseCode::SystemError`].
    pub undeletable: std::collections::BTreeSet<String>,

    state: std::sync::Mutex<State>,
}

#[derive(Default)]
struct State {
    keys: std::collections::BTreeMap<String, StoredKey>,
    operations: std::collections::HashMap<OperationHandle, PendingOperation>,
    last_handle: u64,
    entropy_received: usize,
}

struct StoredKey {
    material: engine::KeyMaterial,
    characteristics: KeyCharacteristics,

    /// Both halves of the characteristics, for authorizing operations.
    authorizations: AuthorizationSet,
}

struct PendingOperation {
    engine: engine::Operation,
    input: Vec<u8>,
}

impl MockKeystoreClient {
    /// Total number of entropy bytes mixed in so far.
    pub fn entropy_received(&self) -> usize {
        self.state().entropy_received
    }

    /// Number of handles that have been begun and not yet finished or aborted.
    pub fn open_operations(&self) -> usize {
        self.state().operations.len()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_transport(&self) -> Result<(), Error> {
        if self.transport_failure {
            Err(super::client_error())
        } else {
            Ok(())
        }
    }

    fn store(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
        origin: KeyOrigin,
        create: impl FnOnce() -> Result<(engine::KeyMaterial, AuthorizationSet), Error>,
    ) -> Result<KeyCharacteristics, Error> {
        self.check_transport()?;

        if name.is_empty() {
            return Err(ErrorCode::InvalidArgument.into());
        }
        if parameters
            .iter()
            .any(|param| !param.tag.accepts(&param.value))
        {
            return Err(ErrorCode::InvalidTag.into());
        }
        if self.state().keys.contains_key(name) {
            return Err(ResponseCode::KeyAlreadyExists.into());
        }

        let (material, derived) = create()?;
        let characteristics = characteristics(parameters, &derived, origin);
        let authorizations = characteristics
            .hardware_enforced
            .iter()
            .chain(characteristics.software_enforced.iter())
            .cloned()
            .collect();

        let mut state = self.state();
        match state.keys.entry(name.to_owned()) {
            std::collections::btree_map::Entry::Occupied(_) => {
                Err(ResponseCode::KeyAlreadyExists.into())
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(StoredKey {
                    material,
                    characteristics: characteristics.clone(),
                    authorizations,
                });
                Ok(characteristics)
            }
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

fn characteristics(
    parameters: &AuthorizationSet,
    derived: &AuthorizationSet,
    origin: KeyOrigin,
) -> KeyCharacteristics {
    let mut characteristics = KeyCharacteristics::default();

    for param in parameters.iter().chain(derived.iter()) {
        if OPERATION_TAGS.contains(&param.tag) {
            continue;
        }

        let half = if HARDWARE_ENFORCED_TAGS.contains(&param.tag) {
            &mut characteristics.hardware_enforced
        } else {
            &mut characteristics.software_enforced
        };
        half.push(param.tag, param.value.clone());
    }

    characteristics
        .software_enforced
        .push(Tag::ORIGIN, KeyParameterValue::Enum(origin.into()));
    characteristics
        .software_enforced
        .push(Tag::CREATION_DATETIME, KeyParameterValue::Date(now_millis()));

    characteristics
}

fn check_validity(authorizations: &AuthorizationSet, purpose: Purpose) -> Result<(), Error> {
    let now = now_millis();

    if let Some(active) = authorizations.get_ulong(Tag::ACTIVE_DATETIME) {
        if now < active {
            return Err(ErrorCode::KeyNotYetValid.into());
        }
    }

    let expiry = if matches!(purpose, Purpose::Encrypt | Purpose::Sign) {
        Tag::ORIGINATION_EXPIRE_DATETIME
    } else {
        Tag::USAGE_EXPIRE_DATETIME
    };
    if let Some(expiry) = authorizations.get_ulong(expiry) {
        if now > expiry {
            return Err(ErrorCode::KeyExpired.into());
        }
    }

    Ok(())
}

impl keystore_client::KeystoreClient for MockKeystoreClient {
    fn add_entropy(&self, entropy: &[u8]) -> Result<(), Error> {
        self.check_transport()?;

        if entropy.len() > MAX_ENTROPY_LEN {
            return Err(ErrorCode::InvalidInputLength.into());
        }

        self.state().entropy_received += entropy.len();
        Ok(())
    }

    fn generate_key(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
    ) -> Result<KeyCharacteristics, Error> {
        self.store(name, parameters, KeyOrigin::Generated, || {
            engine::generate(parameters)
        })
    }

    fn get_key_characteristics(&self, name: &str) -> Result<KeyCharacteristics, Error> {
        self.check_transport()?;

        let state = self.state();
        let key = state.keys.get(name).ok_or(ResponseCode::KeyNotFound)?;
        Ok(key.characteristics.clone())
    }

    fn import_key(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
        format: KeyFormat,
        key_data: &[u8],
    ) -> Result<KeyCharacteristics, Error> {
        self.store(name, parameters, KeyOrigin::Imported, || {
            engine::import(parameters, format, key_data)
        })
    }

    fn export_key(&self, format: KeyFormat, name: &str) -> Result<Vec<u8>, Error> {
        self.check_transport()?;

        let state = self.state();
        let key = state.keys.get(name).ok_or(ResponseCode::KeyNotFound)?;
        engine::export(&key.material, format)
    }

    fn delete_key(&self, name: &str) -> Result<(), Error> {
        self.check_transport()?;

        let mut state = self.state();
        if !state.keys.contains_key(name) {
            return Err(ResponseCode::KeyNotFound.into());
        }
        if self.undeletable.contains(name) {
            return Err(ResponseCode::SystemError.into());
        }

        state.keys.remove(name);
        Ok(())
    }

    fn delete_all_keys(&self) -> Result<(), Error> {
        self.check_transport()?;

        let mut state = self.state();
        state.keys.retain(|name, _| self.undeletable.contains(name));

        if state.keys.is_empty() {
            Ok(())
        } else {
            Err(ResponseCode::SystemError.into())
        }
    }

    fn begin_operation(
        &self,
        purpose: Purpose,
        name: &str,
        input_parameters: &AuthorizationSet,
    ) -> Result<BeginResult, Error> {
        self.check_transport()?;

        let mut state = self.state();

        let key = state.keys.get(name).ok_or(ResponseCode::KeyNotFound)?;
        check_validity(&key.authorizations, purpose)?;
        let (operation, output_parameters) = engine::Operation::begin(
            purpose,
            key.material.clone(),
            &key.authorizations,
            input_parameters,
        )?;

        if state.operations.len() >= MAX_OPERATIONS {
            return Err(ErrorCode::TooManyOperations.into());
        }

        state.last_handle += 1;
        let handle = OperationHandle(state.last_handle);
        state.operations.insert(
            handle,
            PendingOperation {
                engine: operation,
                input: vec![],
            },
        );

        Ok(BeginResult {
            handle,
            output_parameters,
        })
    }

    fn update_operation(
        &self,
        handle: OperationHandle,
        input_parameters: &AuthorizationSet,
        input_data: &[u8],
    ) -> Result<UpdateResult, Error> {
        self.check_transport()?;

        let mut state = self.state();
        let operation = state
            .operations
            .get_mut(&handle)
            .ok_or(ErrorCode::InvalidOperationHandle)?;

        if let Some(aad) = input_parameters.get_bytes(Tag::ASSOCIATED_DATA) {
            operation.engine.add_associated_data(aad)?;
        }

        let input_consumed = self
            .max_update_chunk
            .map_or(input_data.len(), |chunk| chunk.min(input_data.len()));
        operation
            .input
            .extend_from_slice(&input_data[..input_consumed]);

        Ok(UpdateResult {
            input_consumed,
            output_parameters: AuthorizationSet::new(),
            output: vec![],
        })
    }

    fn finish_operation(
        &self,
        handle: OperationHandle,
        input_parameters: &AuthorizationSet,
        signature_to_verify: &[u8],
    ) -> Result<FinishResult, Error> {
        self.check_transport()?;

        let mut operation = self
            .state()
            .operations
            .remove(&handle)
            .ok_or(ErrorCode::InvalidOperationHandle)?;

        if let Some(aad) = input_parameters.get_bytes(Tag::ASSOCIATED_DATA) {
            operation.engine.add_associated_data(aad)?;
        }

        let output = operation
            .engine
            .finish(&operation.input, signature_to_verify)?;

        Ok(FinishResult {
            output_parameters: AuthorizationSet::new(),
            output,
        })
    }

    fn abort_operation(&self, handle: OperationHandle) -> Result<(), Error> {
        self.check_transport()?;

        match self.state().operations.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ErrorCode::InvalidOperationHandle.into()),
        }
    }

    fn key_exists(&self, name: &str) -> bool {
        !self.transport_failure && self.state().keys.contains_key(name)
    }

    fn list_keys(&self, prefix: &str) -> Option<Vec<String>> {
        if self.transport_failure {
            return None;
        }

        let state = self.state();
        Some(
            state
                .keys
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect(),
        )
    }
}

impl std::fmt::Debug for MockKeystoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockKeystoreClient")
            .field("keys", &state.keys.keys().collect::<Vec<_>>())
            .field("open_operations", &state.operations.len())
            .field("max_update_chunk", &self.max_update_chunk)
            .field("transport_failure", &self.transport_failure)
            .field("undeletable", &self.undeletable)
            .finish()
    }
}
