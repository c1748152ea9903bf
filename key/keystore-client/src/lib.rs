// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! Client interface to the keystore service.
//!
//! Keys live in the service, never in the calling process. Callers name keys, describe them with
//! [`AuthorizationSet`]s, and drive cryptographic operations through opaque
//! [`OperationHandle`]s.
//!
//! Every fallible call returns `Result<_, keystore_common::Error>`. The error is tagged with the
//! domain that reported it; [`keystore_common::Error::status`] collapses it onto a single integer
//! where 0 is success, positive values are service response codes and negative values are engine
//! error codes.

use keystore_common::{
    AuthorizationSet, BeginResult, Error, FinishResult, KeyCharacteristics, KeyFormat,
    OperationHandle, Purpose, UpdateResult,
};

mod operation;
pub use operation::Operation;

/// The capabilities of a keystore service, as seen by one caller.
///
/// Key names are scoped to the caller's own namespace in the service.
///
/// Every operation handle returned by [`begin_operation`](KeystoreClient::begin_operation) must
/// be terminated by exactly one [`finish_operation`](KeystoreClient::finish_operation) or
/// [`abort_operation`](KeystoreClient::abort_operation). The trait does not enforce this;
/// [`Operation`] does.
pub trait KeystoreClient: Send + Sync {
    /// Mixes `entropy` into the service's random number generator.
    fn add_entropy(&self, entropy: &[u8]) -> Result<(), Error>;

    /// Generates a key according to `parameters` and stores it as `name`.
    fn generate_key(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
    ) -> Result<KeyCharacteristics, Error>;

    fn get_key_characteristics(&self, name: &str) -> Result<KeyCharacteristics, Error>;

    /// Imports `key_data` encoded as `format`, applies `parameters`, and stores it as `name`.
    fn import_key(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
        format: KeyFormat,
        key_data: &[u8],
    ) -> Result<KeyCharacteristics, Error>;

    /// Exports the public part of the asymmetric key `name`.
    fn export_key(&self, format: KeyFormat, name: &str) -> Result<Vec<u8>, Error>;

    fn delete_key(&self, name: &str) -> Result<(), Error>;

    /// Deletes every key in the caller's namespace.
    fn delete_all_keys(&self) -> Result<(), Error>;

    fn begin_operation(
        &self,
        purpose: Purpose,
        name: &str,
        input_parameters: &AuthorizationSet,
    ) -> Result<BeginResult, Error>;

    /// Feeds `input_data` into the operation.
    ///
    /// The service may accept only a prefix of the input; see [`UpdateResult::input_consumed`].
    fn update_operation(
        &self,
        handle: OperationHandle,
        input_parameters: &AuthorizationSet,
        input_data: &[u8],
    ) -> Result<UpdateResult, Error>;

    /// Completes the operation. The handle is invalid afterwards, whether or not this succeeds.
    ///
    /// For verify operations, a signature that does not match is reported as
    /// [`keystore_common::ErrorCode::VerificationFailed`].
    fn finish_operation(
        &self,
        handle: OperationHandle,
        input_parameters: &AuthorizationSet,
        signature_to_verify: &[u8],
    ) -> Result<FinishResult, Error>;

    /// Abandons the operation. The handle is invalid afterwards, whether or not this succeeds.
    fn abort_operation(&self, handle: OperationHandle) -> Result<(), Error>;

    /// Whether `name` exists. Any error, including transport errors, is reported as `false`.
    fn key_exists(&self, name: &str) -> bool;

    /// Names of all keys starting with `prefix`, in a stable order. `None` if an error occurred.
    fn list_keys(&self, prefix: &str) -> Option<Vec<String>>;
}

/// A [`KeystoreClient`] that talks to the keystore service over HTTP on a unix socket or TCP.
pub struct Client {
    connector: http_common::Connector,
    timeout: Option<std::time::Duration>,
}

impl Client {
    pub fn new(connector: http_common::Connector) -> Self {
        Client {
            connector,
            timeout: None,
        }
    }

    pub fn from_config(config: &keystore_client_config::Config) -> Self {
        Client {
            connector: config.endpoints.keystored.clone(),
            timeout: config.timeout(),
        }
    }

    /// Bounds every read and write on the connection to the service.
    #[must_use]
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn call<TRequest, TResponse>(
        &self,
        operation: &'static str,
        method: &http::Method,
        uri: &str,
        body: Option<&TRequest>,
    ) -> Result<TResponse, Error>
    where
        TRequest: serde::Serialize,
        TResponse: serde::de::DeserializeOwned,
    {
        log::debug!("{} {} {}", operation, method, uri);

        let result = self
            .connector
            .connect(self.timeout)
            .map_err(Error::from)
            .and_then(|mut stream| request(&mut stream, method, uri, body));

        if let Err(err) = &result {
            log::debug!("{} failed with status {}: {}", operation, err.status(), err);
        }

        result
    }
}

fn key_uri(name: &str) -> String {
    format!(
        "/key/{}",
        percent_encoding::utf8_percent_encode(name, http_common::PATH_SEGMENT_ENCODE_SET)
    )
}

fn operation_uri(handle: OperationHandle, action: &str) -> String {
    format!("/operation/{}/{}", handle.0, action)
}

fn characteristics_from_wire(
    characteristics: keystore_common_http::KeyCharacteristics,
) -> Result<KeyCharacteristics, Error> {
    let characteristics: KeyCharacteristics = std::convert::TryInto::try_into(characteristics)?;
    Ok(characteristics)
}

fn authorization_set_from_wire(
    set: keystore_common_http::AuthorizationSet,
) -> Result<AuthorizationSet, Error> {
    let set: AuthorizationSet = std::convert::TryInto::try_into(set)?;
    Ok(set)
}

impl KeystoreClient for Client {
    fn add_entropy(&self, entropy: &[u8]) -> Result<(), Error> {
        let body = keystore_common_http::add_entropy::Request {
            entropy: http_common::ByteString(entropy.to_owned()),
        };

        let _: keystore_common_http::Empty =
            self.call("add_entropy", &http::Method::POST, "/entropy", Some(&body))?;
        Ok(())
    }

    fn generate_key(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
    ) -> Result<KeyCharacteristics, Error> {
        let body = keystore_common_http::generate_key::Request {
            name: name.to_owned(),
            parameters: parameters.into(),
        };

        let res: keystore_common_http::generate_key::Response =
            self.call("generate_key", &http::Method::POST, "/key", Some(&body))?;
        characteristics_from_wire(res.characteristics)
    }

    fn get_key_characteristics(&self, name: &str) -> Result<KeyCharacteristics, Error> {
        let res: keystore_common_http::get_key_characteristics::Response = self.call::<(), _>(
            "get_key_characteristics",
            &http::Method::GET,
            &key_uri(name),
            None,
        )?;
        characteristics_from_wire(res.characteristics)
    }

    fn import_key(
        &self,
        name: &str,
        parameters: &AuthorizationSet,
        format: KeyFormat,
        key_data: &[u8],
    ) -> Result<KeyCharacteristics, Error> {
        let body = keystore_common_http::import_key::Request {
            name: name.to_owned(),
            parameters: parameters.into(),
            format: format.value(),
            key_data: http_common::ByteString(key_data.to_owned()),
        };

        let res: keystore_common_http::import_key::Response =
            self.call("import_key", &http::Method::POST, "/key/import", Some(&body))?;
        characteristics_from_wire(res.characteristics)
    }

    fn export_key(&self, format: KeyFormat, name: &str) -> Result<Vec<u8>, Error> {
        let body = keystore_common_http::export_key::Request {
            format: format.value(),
        };

        let uri = format!("{}/export", key_uri(name));
        let res: keystore_common_http::export_key::Response =
            self.call("export_key", &http::Method::POST, &uri, Some(&body))?;
        Ok(res.export_data.0)
    }

    fn delete_key(&self, name: &str) -> Result<(), Error> {
        let _: keystore_common_http::Empty =
            self.call::<(), _>("delete_key", &http::Method::DELETE, &key_uri(name), None)?;
        Ok(())
    }

    fn delete_all_keys(&self) -> Result<(), Error> {
        let _: keystore_common_http::Empty =
            self.call::<(), _>("delete_all_keys", &http::Method::DELETE, "/keys", None)?;
        Ok(())
    }

    fn begin_operation(
        &self,
        purpose: Purpose,
        name: &str,
        input_parameters: &AuthorizationSet,
    ) -> Result<BeginResult, Error> {
        let body = keystore_common_http::begin_operation::Request {
            purpose: purpose.value(),
            name: name.to_owned(),
            input_parameters: input_parameters.into(),
        };

        let res: keystore_common_http::begin_operation::Response =
            self.call("begin_operation", &http::Method::POST, "/operation", Some(&body))?;
        Ok(BeginResult {
            handle: OperationHandle(res.handle),
            output_parameters: authorization_set_from_wire(res.output_parameters)?,
        })
    }

    fn update_operation(
        &self,
        handle: OperationHandle,
        input_parameters: &AuthorizationSet,
        input_data: &[u8],
    ) -> Result<UpdateResult, Error> {
        let body = keystore_common_http::update_operation::Request {
            input_parameters: input_parameters.into(),
            input_data: http_common::ByteString(input_data.to_owned()),
        };

        let res: keystore_common_http::update_operation::Response = self.call(
            "update_operation",
            &http::Method::POST,
            &operation_uri(handle, "update"),
            Some(&body),
        )?;

        if res.input_consumed > input_data.len() {
            return Err(Error::transport(format!(
                "service reported consuming {} bytes of a {}-byte input",
                res.input_consumed,
                input_data.len()
            )));
        }

        Ok(UpdateResult {
            input_consumed: res.input_consumed,
            output_parameters: authorization_set_from_wire(res.output_parameters)?,
            output: res.output_data.0,
        })
    }

    fn finish_operation(
        &self,
        handle: OperationHandle,
        input_parameters: &AuthorizationSet,
        signature_to_verify: &[u8],
    ) -> Result<FinishResult, Error> {
        let body = keystore_common_http::finish_operation::Request {
            input_parameters: input_parameters.into(),
            signature_to_verify: http_common::ByteString(signature_to_verify.to_owned()),
        };

        let res: keystore_common_http::finish_operation::Response = self.call(
            "finish_operation",
            &http::Method::POST,
            &operation_uri(handle, "finish"),
            Some(&body),
        )?;
        Ok(FinishResult {
            output_parameters: authorization_set_from_wire(res.output_parameters)?,
            output: res.output_data.0,
        })
    }

    fn abort_operation(&self, handle: OperationHandle) -> Result<(), Error> {
        let _: keystore_common_http::Empty = self.call::<(), _>(
            "abort_operation",
            &http::Method::POST,
            &operation_uri(handle, "abort"),
            None,
        )?;
        Ok(())
    }

    fn key_exists(&self, name: &str) -> bool {
        self.get_key_characteristics(name).is_ok()
    }

    fn list_keys(&self, prefix: &str) -> Option<Vec<String>> {
        let uri = format!(
            "/keys?prefix={}",
            percent_encoding::utf8_percent_encode(prefix, percent_encoding::NON_ALPHANUMERIC)
        );

        let res: keystore_common_http::list_keys::Response = self
            .call::<(), _>("list_keys", &http::Method::GET, &uri, None)
            .ok()?;
        Some(res.names)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connector", &self.connector)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn request<TStream, TRequest, TResponse>(
    stream: &mut TStream,
    method: &http::Method,
    uri: &str,
    body: Option<&TRequest>,
) -> Result<TResponse, Error>
where
    TStream: std::io::Read + std::io::Write,
    TRequest: serde::Serialize,
    TResponse: serde::de::DeserializeOwned,
{
    write!(
        stream,
        "{method} {uri} HTTP/1.1\r\n",
        method = method,
        uri = uri
    )?;

    if let Some(body) = body {
        let body = serde_json::to_string(body).map_err(Error::transport)?;
        let body_len = body.len();

        write!(
            stream,
            "\
            content-length: {body_len}\r\n\
            content-type: application/json\r\n\
            \r\n\
            {body}\
            ",
            body_len = body_len,
            body = body,
        )?;
    } else {
        stream.write_all(b"\r\n")?;
    }

    // Only read up to the content-length. The service is not guaranteed to close the connection
    // after the response, so reading to EOF could block indefinitely.

    let mut buf = vec![0_u8; 512];
    let mut read_so_far = 0;

    let (res_status_code, body) = loop {
        let new_read = loop {
            match stream.read(&mut buf[read_so_far..]) {
                Ok(new_read) => break new_read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err.into()),
            }
        };
        read_so_far += new_read;

        if let Some((res_status_code, body)) = try_parse_response(&buf[..read_so_far], new_read)?
        {
            break (res_status_code, body);
        }

        if read_so_far == buf.len() {
            buf.resize(buf.len() * 2, 0_u8);
        }
    };

    match res_status_code {
        Some(200) => {
            let res = serde_json::from_slice(body).map_err(Error::transport)?;
            Ok(res)
        }

        Some(400..=599) => {
            let res: keystore_common_http::Error =
                serde_json::from_slice(body).map_err(Error::transport)?;
            Err(res.into_keystore_error())
        }

        Some(_) | None => Err(Error::transport("malformed HTTP response")),
    }
}

fn try_parse_response(
    buf: &[u8],
    new_read: usize,
) -> Result<Option<(Option<u16>, &[u8])>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; 16];

    let mut res = httparse::Response::new(&mut headers);

    let body_start_pos = match res.parse(buf) {
        Ok(httparse::Status::Complete(body_start_pos)) => body_start_pos,
        Ok(httparse::Status::Partial) if new_read == 0 => {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
        }
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => return Err(Error::transport(err)),
    };

    let res_status_code = res.code;

    let mut content_length = None;
    let mut is_json = false;
    for header in res.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(header.value).map_err(Error::transport)?;
            let value: usize = value.parse().map_err(Error::transport)?;
            content_length = Some(value);
        } else if header.name.eq_ignore_ascii_case("content-type") {
            let value = std::str::from_utf8(header.value).map_err(Error::transport)?;
            if value == "application/json" {
                is_json = true;
            }
        }
    }

    if !is_json {
        return Err(Error::transport("malformed HTTP response"));
    }

    let body = &buf[body_start_pos..];
    let body = if let Some(content_length) = content_length {
        if body.len() < content_length {
            if new_read == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            return Ok(None);
        }

        &body[..content_length]
    } else if new_read == 0 {
        // Without a content-length, read until there's no more to read.
        body
    } else {
        return Ok(None);
    };

    Ok(Some((res_status_code, body)))
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};

    /// A stream whose reads come from a canned response and whose writes are recorded.
    struct FakeStream {
        response: std::io::Cursor<Vec<u8>>,
        request: Vec<u8>,
    }

    impl FakeStream {
        fn new(status: &str, body: &str) -> Self {
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            FakeStream {
                response: std::io::Cursor::new(response.into_bytes()),
                request: vec![],
            }
        }
    }

    impl std::io::Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            // Trickle a few bytes at a time to exercise partial parsing.
            let len = std::cmp::min(buf.len(), 7);
            self.response.read(&mut buf[..len])
        }
    }

    impl std::io::Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.request.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn request_writes_json_body_and_parses_response() {
        let mut stream = FakeStream::new(
            "200 OK",
            r#"{"handle":42,"outputParameters":[{"tag":2415920105,"value":{"bytes":"AAECAwQFBgcICQoL"}}]}"#,
        );

        let body = keystore_common_http::begin_operation::Request {
            purpose: keystore_common::Purpose::Encrypt.value(),
            name: "k1".to_owned(),
            input_parameters: Default::default(),
        };
        let res: keystore_common_http::begin_operation::Response =
            super::request(&mut stream, &http::Method::POST, "/operation", Some(&body)).unwrap();
        assert_eq!(res.handle, 42);

        let output_parameters = super::authorization_set_from_wire(res.output_parameters).unwrap();
        assert_eq!(
            output_parameters.get_bytes(keystore_common::Tag::NONCE),
            Some(&[0_u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11][..])
        );

        let request = String::from_utf8(stream.request).unwrap();
        assert!(request.starts_with("POST /operation HTTP/1.1\r\n"));
        assert!(request.contains("content-type: application/json\r\n"));
        assert!(request.ends_with(r#"{"purpose":0,"keyName":"k1","inputParameters":[]}"#));
    }

    #[test]
    fn request_maps_error_body_to_domain() {
        let mut stream = FakeStream::new("404 Not Found", r#"{"code":7,"message":"key not found"}"#);
        let err = super::request::<_, (), keystore_common_http::Empty>(
            &mut stream,
            &http::Method::DELETE,
            "/key/k1",
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            keystore_common::Error::Response(keystore_common::ResponseCode::KeyNotFound)
        ));
        assert_eq!(err.status(), keystore_common::Status(7));

        let mut stream = FakeStream::new(
            "400 Bad Request",
            r#"{"code":-30,"message":"verification failed"}"#,
        );
        let err = super::request::<_, (), keystore_common_http::Empty>(
            &mut stream,
            &http::Method::POST,
            "/operation/1/finish",
            None,
        )
        .unwrap_err();
        assert_eq!(err.status(), keystore_common::Status(-30));
    }

    #[test]
    fn truncated_response_is_transport_error() {
        let mut stream = FakeStream::new("200 OK", r#"{"keyNames":[]}"#);
        let len = stream.response.get_ref().len();
        stream.response.get_mut().truncate(len - 3);

        let err = super::request::<_, (), keystore_common_http::list_keys::Response>(
            &mut stream,
            &http::Method::GET,
            "/keys?prefix=",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, keystore_common::Error::Transport(_)));
        assert_eq!(err.status(), keystore_common::Status(-1000));
    }

    #[test]
    fn non_json_response_is_transport_error() {
        let mut stream = FakeStream {
            response: std::io::Cursor::new(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 2\r\n\r\nok".to_vec(),
            ),
            request: vec![],
        };

        let err = super::request::<_, (), keystore_common_http::Empty>(
            &mut stream,
            &http::Method::POST,
            "/entropy",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, keystore_common::Error::Transport(_)));
    }

    #[test]
    fn key_names_are_escaped() {
        assert_eq!(super::key_uri("plain"), "/key/plain");
        assert_eq!(super::key_uri("a/b c"), "/key/a%2Fb%20c");
        assert_eq!(
            super::operation_uri(keystore_common::OperationHandle(9), "finish"),
            "/operation/9/finish"
        );
    }

    #[test]
    fn unreachable_service_collapses_to_false_and_none() {
        let client = super::Client::new(http_common::Connector::Unix {
            socket_path: std::path::Path::new("/nonexistent/keystored.sock").into(),
        });

        assert!(!super::KeystoreClient::key_exists(&client, "k1"));
        assert_eq!(super::KeystoreClient::list_keys(&client, ""), None);

        let err = super::KeystoreClient::delete_key(&client, "k1").unwrap_err();
        assert!(matches!(err, keystore_common::Error::Transport(_)));
    }
}
