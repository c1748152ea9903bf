// Copyright (c) Microsoft. All rights reserved.

mod engine;
mod key;

pub use key::MockKeystoreClient;

/// Generic transport error. Tests only check that the failure surfaces as a transport error,
/// so any I/O error will do.
fn client_error() -> keystore_common::Error {
    keystore_common::Error::transport("test error")
}
