// Copyright (c) Microsoft. All rights reserved.

use keystore_client::KeystoreClient;
use keystore_common::{
    AuthorizationSet, AuthorizationSetBuilder, Digest, Error, ErrorCode, Padding, Purpose,
    ResponseCode, Status,
};

fn rsa_2048_sign_params() -> AuthorizationSet {
    AuthorizationSetBuilder::new()
        .rsa_signing_key(2048, 65537)
        .no_auth_required()
        .build()
}

fn ec_sign_params() -> AuthorizationSet {
    AuthorizationSetBuilder::new()
        .ec_signing_key(256)
        .digest(Digest::Sha256)
        .build()
}

fn is_invalid_handle(result: &Result<impl std::fmt::Debug, Error>) -> bool {
    matches!(result, Err(Error::Engine(ErrorCode::InvalidOperationHandle)))
}

fn sign_and_verify(client: &dyn KeystoreClient, name: &str) {
    let begin = client
        .begin_operation(Purpose::Sign, name, &AuthorizationSet::new())
        .unwrap();
    client
        .update_operation(begin.handle, &AuthorizationSet::new(), b"payload")
        .unwrap();
    let signature = client
        .finish_operation(begin.handle, &AuthorizationSet::new(), &[])
        .unwrap()
        .output;

    let begin = client
        .begin_operation(Purpose::Verify, name, &AuthorizationSet::new())
        .unwrap();
    client
        .update_operation(begin.handle, &AuthorizationSet::new(), b"payload")
        .unwrap();
    client
        .finish_operation(begin.handle, &AuthorizationSet::new(), &signature)
        .unwrap();
}

#[test]
fn trait_object_is_substitutable() {
    let _ = env_logger::builder().is_test(true).try_init();

    let clients: Vec<Box<dyn KeystoreClient>> = vec![
        Box::new(test_common::client::MockKeystoreClient::default()),
        Box::new(test_common::client::MockKeystoreClient::default()),
    ];

    for client in &clients {
        client.generate_key("ec", &ec_sign_params()).unwrap();
        sign_and_verify(&**client, "ec");
    }
}

#[test]
fn client_is_shareable_across_threads() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client: std::sync::Arc<dyn KeystoreClient> =
        std::sync::Arc::new(test_common::client::MockKeystoreClient::default());
    client.generate_key("ec", &ec_sign_params()).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            std::thread::spawn(move || sign_and_verify(&*client, "ec"))
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
}

#[test]
fn begin_then_abort_terminates_handle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = test_common::client::MockKeystoreClient::default();
    client.generate_key("ec", &ec_sign_params()).unwrap();

    let begin = client
        .begin_operation(Purpose::Sign, "ec", &AuthorizationSet::new())
        .unwrap();
    client.abort_operation(begin.handle).unwrap();

    assert!(is_invalid_handle(&client.update_operation(
        begin.handle,
        &AuthorizationSet::new(),
        b"data"
    )));
    assert!(is_invalid_handle(&client.finish_operation(
        begin.handle,
        &AuthorizationSet::new(),
        &[]
    )));
    assert!(is_invalid_handle(&client.abort_operation(begin.handle)));
}

#[test]
fn finish_invalidates_handle_even_on_failure() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = test_common::client::MockKeystoreClient::default();
    client.generate_key("ec", &ec_sign_params()).unwrap();

    let begin = client
        .begin_operation(Purpose::Verify, "ec", &AuthorizationSet::new())
        .unwrap();
    client
        .update_operation(begin.handle, &AuthorizationSet::new(), b"payload")
        .unwrap();
    let result =
        client.finish_operation(begin.handle, &AuthorizationSet::new(), b"not a signature");
    assert!(matches!(
        result,
        Err(Error::Engine(ErrorCode::VerificationFailed))
    ));
    assert_eq!(Status::from(&result), Status(-30));

    assert!(is_invalid_handle(&client.finish_operation(
        begin.handle,
        &AuthorizationSet::new(),
        &[]
    )));
    assert!(is_invalid_handle(&client.abort_operation(begin.handle)));
    assert_eq!(client.open_operations(), 0);
}

#[test]
fn partial_updates_are_resubmitted_without_loss() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut chunked = test_common::client::MockKeystoreClient::default();
    chunked.max_update_chunk = Some(4);
    let whole = test_common::client::MockKeystoreClient::default();

    let key = [0x42_u8; 32];
    let params = AuthorizationSetBuilder::new()
        .hmac_key(256)
        .digest(Digest::Sha256)
        .build();
    let op_params = AuthorizationSetBuilder::new().mac_length(256).build();
    let message: Vec<u8> = (0..=255).collect();

    let mut macs = vec![];
    for client in [&chunked as &dyn KeystoreClient, &whole] {
        client
            .import_key("hmac", &params, keystore_common::KeyFormat::Raw, &key)
            .unwrap();

        let begin = client
            .begin_operation(Purpose::Sign, "hmac", &op_params)
            .unwrap();

        let mut remaining = &message[..];
        let mut rounds = 0;
        while !remaining.is_empty() {
            let update = client
                .update_operation(begin.handle, &AuthorizationSet::new(), remaining)
                .unwrap();
            assert!(update.input_consumed > 0);
            assert!(update.input_consumed <= remaining.len());
            remaining = &remaining[update.input_consumed..];
            rounds += 1;
        }
        assert!(rounds >= 1);

        let finish = client
            .finish_operation(begin.handle, &AuthorizationSet::new(), &[])
            .unwrap();
        macs.push(finish.output);
    }

    assert_eq!(macs[0], macs[1]);
}

#[test]
fn key_exists() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut client = test_common::client::MockKeystoreClient::default();
    client.generate_key("present", &ec_sign_params()).unwrap();

    assert!(client.key_exists("present"));
    assert!(!client.key_exists("absent"));

    client.transport_failure = true;
    assert!(!client.key_exists("present"));
}

#[test]
fn list_keys_by_prefix() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut client = test_common::client::MockKeystoreClient::default();
    for name in ["device/b", "device/a", "module/x", "dev"] {
        client.generate_key(name, &ec_sign_params()).unwrap();
    }

    let all = client.list_keys("").unwrap();
    assert_eq!(all.len(), 4);
    for name in ["device/b", "device/a", "module/x", "dev"] {
        assert!(all.iter().any(|n| n == name));
    }

    let devices = client.list_keys("device/").unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|name| name.starts_with("device/")));
    assert_eq!(client.list_keys("device/"), Some(devices));

    assert_eq!(client.list_keys("nothing"), Some(vec![]));
    assert_eq!(client.list_keys(""), Some(all));

    client.transport_failure = true;
    assert_eq!(client.list_keys(""), None);
}

#[test]
fn generate_sign_finish_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = test_common::client::MockKeystoreClient::default();
    let client: &dyn KeystoreClient = &client;

    let characteristics = client.generate_key("k1", &rsa_2048_sign_params()).unwrap();
    assert!(!characteristics.hardware_enforced.is_empty());
    assert!(!characteristics.software_enforced.is_empty());

    let begin = client
        .begin_operation(Purpose::Sign, "k1", &AuthorizationSet::new())
        .unwrap();

    let update = client
        .update_operation(begin.handle, &AuthorizationSet::new(), b"hello")
        .unwrap();
    assert_eq!(update.input_consumed, 5);

    let finish = client
        .finish_operation(begin.handle, &AuthorizationSet::new(), &[])
        .unwrap();
    assert!(!finish.output.is_empty());

    let second = client.finish_operation(begin.handle, &AuthorizationSet::new(), &[]);
    assert!(second.is_err());
    assert!(!Status::from(&second).is_ok());
}

#[test]
fn pss_signature_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = test_common::client::MockKeystoreClient::default();
    let params = AuthorizationSetBuilder::new()
        .rsa_signing_key(2048, 65537)
        .digest(Digest::Sha256)
        .padding(Padding::RsaPss)
        .build();
    client.generate_key("pss", &params).unwrap();

    sign_and_verify(&client, "pss");
}

#[test]
fn delete_missing_key_leaves_others() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = test_common::client::MockKeystoreClient::default();
    client.generate_key("keep", &ec_sign_params()).unwrap();

    let result = client.delete_key("does-not-exist");
    assert!(matches!(
        result,
        Err(Error::Response(ResponseCode::KeyNotFound))
    ));
    assert_eq!(Status::from(&result), Status(7));

    assert!(client.key_exists("keep"));
    assert_eq!(client.list_keys(""), Some(vec!["keep".to_owned()]));

    client.delete_key("keep").unwrap();
    assert!(!client.key_exists("keep"));
}

#[test]
fn delete_all_keys_is_best_effort() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut client = test_common::client::MockKeystoreClient::default();
    client.undeletable.insert("stuck".to_owned());
    for name in ["a", "stuck", "z"] {
        client.generate_key(name, &ec_sign_params()).unwrap();
    }

    let result = client.delete_all_keys();
    assert!(matches!(
        result,
        Err(Error::Response(ResponseCode::SystemError))
    ));
    assert_eq!(client.list_keys(""), Some(vec!["stuck".to_owned()]));

    client.undeletable.clear();
    client.delete_all_keys().unwrap();
    assert_eq!(client.list_keys(""), Some(vec![]));
}

#[test]
fn export_symmetric_key_fails() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = test_common::client::MockKeystoreClient::default();
    client
        .generate_key(
            "aes",
            &AuthorizationSetBuilder::new().aes_encryption_key(256).build(),
        )
        .unwrap();

    for format in keystore_common::KeyFormat::ALL {
        assert!(matches!(
            client.export_key(*format, "aes"),
            Err(Error::Engine(ErrorCode::UnsupportedKeyFormat))
        ));
    }
}

#[test]
fn transport_failure_collapses_to_unknown_error() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut client = test_common::client::MockKeystoreClient::default();
    client.transport_failure = true;

    let result = client.generate_key("k", &ec_sign_params());
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(Status::from(&result), Status(-1000));
    assert_eq!(
        Status::from(&result).origin(),
        keystore_common::StatusOrigin::Engine
    );
}
