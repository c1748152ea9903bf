// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

/// Body of every non-200 response.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct Error {
    /// Positive for service response codes, negative for engine error codes.
    pub code: i32,

    pub message: std::borrow::Cow<'static, str>,
}

impl Error {
    pub fn into_keystore_error(self) -> keystore_common::Error {
        keystore_common::Error::from_status(self.code).unwrap_or_else(|| {
            keystore_common::Error::transport(format!(
                "service reported failure with success code {}: {}",
                self.code, self.message
            ))
        })
    }
}

impl From<&keystore_common::Error> for Error {
    fn from(err: &keystore_common::Error) -> Self {
        Error {
            code: err.status().0,
            message: err.to_string().into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct KeyParameter {
    pub tag: u32,

    pub value: KeyParameterValue,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyParameterValue {
    Enum(u32),
    Integer(u32),
    Long(u64),
    Date(u64),
    Bool(bool),
    Bytes(http_common::ByteString),
}

/// The wire form of an authorization set.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct AuthorizationSet(pub Vec<KeyParameter>);

impl From<&keystore_common::AuthorizationSet> for AuthorizationSet {
    fn from(set: &keystore_common::AuthorizationSet) -> Self {
        AuthorizationSet(
            set.iter()
                .map(|param| KeyParameter {
                    tag: param.tag.0,
                    value: match &param.value {
                        keystore_common::KeyParameterValue::Enum(value) => {
                            KeyParameterValue::Enum(*value)
                        }
                        keystore_common::KeyParameterValue::Integer(value) => {
                            KeyParameterValue::Integer(*value)
                        }
                        keystore_common::KeyParameterValue::Long(value) => {
                            KeyParameterValue::Long(*value)
                        }
                        keystore_common::KeyParameterValue::Date(value) => {
                            KeyParameterValue::Date(*value)
                        }
                        keystore_common::KeyParameterValue::Bool(value) => {
                            KeyParameterValue::Bool(*value)
                        }
                        keystore_common::KeyParameterValue::Bytes(value) => {
                            KeyParameterValue::Bytes(http_common::ByteString(value.clone()))
                        }
                    },
                })
                .collect(),
        )
    }
}

impl std::convert::TryFrom<AuthorizationSet> for keystore_common::AuthorizationSet {
    type Error = keystore_common::ErrorCode;

    fn try_from(set: AuthorizationSet) -> Result<Self, Self::Error> {
        let mut result = keystore_common::AuthorizationSet::new();

        for KeyParameter { tag, value } in set.0 {
            let value = match value {
                KeyParameterValue::Enum(value) => keystore_common::KeyParameterValue::Enum(value),
                KeyParameterValue::Integer(value) => {
                    keystore_common::KeyParameterValue::Integer(value)
                }
                KeyParameterValue::Long(value) => keystore_common::KeyParameterValue::Long(value),
                KeyParameterValue::Date(value) => keystore_common::KeyParameterValue::Date(value),
                KeyParameterValue::Bool(value) => keystore_common::KeyParameterValue::Bool(value),
                KeyParameterValue::Bytes(value) => {
                    keystore_common::KeyParameterValue::Bytes(value.0)
                }
            };
            result.try_push(keystore_common::Tag(tag), value)?;
        }

        Ok(result)
    }
}

#[derive(Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct KeyCharacteristics {
    #[serde(rename = "hardwareEnforced")]
    pub hardware_enforced: AuthorizationSet,

    #[serde(rename = "softwareEnforced")]
    pub software_enforced: AuthorizationSet,
}

impl From<&keystore_common::KeyCharacteristics> for KeyCharacteristics {
    fn from(characteristics: &keystore_common::KeyCharacteristics) -> Self {
        KeyCharacteristics {
            hardware_enforced: (&characteristics.hardware_enforced).into(),
            software_enforced: (&characteristics.software_enforced).into(),
        }
    }
}

impl std::convert::TryFrom<KeyCharacteristics> for keystore_common::KeyCharacteristics {
    type Error = keystore_common::ErrorCode;

    fn try_from(characteristics: KeyCharacteristics) -> Result<Self, Self::Error> {
        Ok(keystore_common::KeyCharacteristics {
            hardware_enforced: std::convert::TryInto::try_into(characteristics.hardware_enforced)?,
            software_enforced: std::convert::TryInto::try_into(characteristics.software_enforced)?,
        })
    }
}

pub mod add_entropy {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        pub entropy: http_common::ByteString,
    }
}

pub mod generate_key {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        #[serde(rename = "keyName")]
        pub name: String,

        pub parameters: crate::AuthorizationSet,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        pub characteristics: crate::KeyCharacteristics,
    }
}

pub mod get_key_characteristics {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        pub characteristics: crate::KeyCharacteristics,
    }
}

pub mod import_key {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        #[serde(rename = "keyName")]
        pub name: String,

        pub parameters: crate::AuthorizationSet,

        pub format: u32,

        #[serde(rename = "keyData")]
        pub key_data: http_common::ByteString,
    }

    pub type Response = crate::generate_key::Response;
}

pub mod export_key {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        pub format: u32,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        #[serde(rename = "exportData")]
        pub export_data: http_common::ByteString,
    }
}

pub mod list_keys {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        #[serde(rename = "keyNames")]
        pub names: Vec<String>,
    }
}

pub mod begin_operation {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        pub purpose: u32,

        #[serde(rename = "keyName")]
        pub name: String,

        #[serde(rename = "inputParameters")]
        pub input_parameters: crate::AuthorizationSet,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        pub handle: u64,

        #[serde(rename = "outputParameters", default)]
        pub output_parameters: crate::AuthorizationSet,
    }
}

pub mod update_operation {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        #[serde(rename = "inputParameters")]
        pub input_parameters: crate::AuthorizationSet,

        #[serde(rename = "inputData")]
        pub input_data: http_common::ByteString,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        #[serde(rename = "inputConsumed")]
        pub input_consumed: usize,

        #[serde(rename = "outputParameters", default)]
        pub output_parameters: crate::AuthorizationSet,

        #[serde(rename = "outputData", default)]
        pub output_data: http_common::ByteString,
    }
}

pub mod finish_operation {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Request {
        #[serde(rename = "inputParameters")]
        pub input_parameters: crate::AuthorizationSet,

        #[serde(rename = "signature")]
        pub signature_to_verify: http_common::ByteString,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    pub struct Response {
        #[serde(rename = "outputParameters", default)]
        pub output_parameters: crate::AuthorizationSet,

        #[serde(rename = "outputData", default)]
        pub output_data: http_common::ByteString,
    }
}

/// Response body of calls that produce no output.
#[derive(Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct Empty {}
