// Copyright (c) Microsoft. All rights reserved.

use std::convert::TryFrom;

/// The shape of value a tag carries. Encoded in the top four bits of the tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagType {
    Invalid,
    Enum,
    EnumRep,
    Uint,
    UintRep,
    Ulong,
    Date,
    Bool,
    Bignum,
    Bytes,
    UlongRep,
}

impl TagType {
    const SHIFT: u32 = 28;

    const fn bits(self) -> u32 {
        let n = match self {
            TagType::Invalid => 0,
            TagType::Enum => 1,
            TagType::EnumRep => 2,
            TagType::Uint => 3,
            TagType::UintRep => 4,
            TagType::Ulong => 5,
            TagType::Date => 6,
            TagType::Bool => 7,
            TagType::Bignum => 8,
            TagType::Bytes => 9,
            TagType::UlongRep => 10,
        };
        n << TagType::SHIFT
    }

    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            TagType::EnumRep | TagType::UintRep | TagType::UlongRep
        )
    }
}

/// An authorization tag. The top four bits hold the [`TagType`], the rest identify the tag.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag(pub u32);

impl Tag {
    const fn new(tag_type: TagType, n: u32) -> Self {
        Tag(tag_type.bits() | n)
    }

    pub const PURPOSE: Tag = Tag::new(TagType::EnumRep, 1);
    pub const ALGORITHM: Tag = Tag::new(TagType::Enum, 2);
    pub const KEY_SIZE: Tag = Tag::new(TagType::Uint, 3);
    pub const BLOCK_MODE: Tag = Tag::new(TagType::EnumRep, 4);
    pub const DIGEST: Tag = Tag::new(TagType::EnumRep, 5);
    pub const PADDING: Tag = Tag::new(TagType::EnumRep, 6);
    pub const CALLER_NONCE: Tag = Tag::new(TagType::Bool, 7);
    pub const MIN_MAC_LENGTH: Tag = Tag::new(TagType::Uint, 8);
    pub const RSA_PUBLIC_EXPONENT: Tag = Tag::new(TagType::Ulong, 200);
    pub const ACTIVE_DATETIME: Tag = Tag::new(TagType::Date, 400);
    pub const ORIGINATION_EXPIRE_DATETIME: Tag = Tag::new(TagType::Date, 401);
    pub const USAGE_EXPIRE_DATETIME: Tag = Tag::new(TagType::Date, 402);
    pub const NO_AUTH_REQUIRED: Tag = Tag::new(TagType::Bool, 503);
    pub const CREATION_DATETIME: Tag = Tag::new(TagType::Date, 701);
    pub const ORIGIN: Tag = Tag::new(TagType::Enum, 702);
    pub const ASSOCIATED_DATA: Tag = Tag::new(TagType::Bytes, 1000);
    pub const NONCE: Tag = Tag::new(TagType::Bytes, 1001);
    pub const MAC_LENGTH: Tag = Tag::new(TagType::Uint, 1003);

    pub fn tag_type(self) -> TagType {
        match self.0 >> TagType::SHIFT {
            1 => TagType::Enum,
            2 => TagType::EnumRep,
            3 => TagType::Uint,
            4 => TagType::UintRep,
            5 => TagType::Ulong,
            6 => TagType::Date,
            7 => TagType::Bool,
            8 => TagType::Bignum,
            9 => TagType::Bytes,
            10 => TagType::UlongRep,
            _ => TagType::Invalid,
        }
    }

    /// Whether `value` has the shape this tag's type calls for.
    pub fn accepts(self, value: &KeyParameterValue) -> bool {
        matches!(
            (self.tag_type(), value),
            (TagType::Enum | TagType::EnumRep, KeyParameterValue::Enum(_))
                | (TagType::Uint | TagType::UintRep, KeyParameterValue::Integer(_))
                | (TagType::Ulong | TagType::UlongRep, KeyParameterValue::Long(_))
                | (TagType::Date, KeyParameterValue::Date(_))
                | (TagType::Bool, KeyParameterValue::Bool(_))
                | (TagType::Bignum | TagType::Bytes, KeyParameterValue::Bytes(_))
        )
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Tag::PURPOSE => "PURPOSE",
            Tag::ALGORITHM => "ALGORITHM",
            Tag::KEY_SIZE => "KEY_SIZE",
            Tag::BLOCK_MODE => "BLOCK_MODE",
            Tag::DIGEST => "DIGEST",
            Tag::PADDING => "PADDING",
            Tag::CALLER_NONCE => "CALLER_NONCE",
            Tag::MIN_MAC_LENGTH => "MIN_MAC_LENGTH",
            Tag::RSA_PUBLIC_EXPONENT => "RSA_PUBLIC_EXPONENT",
            Tag::ACTIVE_DATETIME => "ACTIVE_DATETIME",
            Tag::ORIGINATION_EXPIRE_DATETIME => "ORIGINATION_EXPIRE_DATETIME",
            Tag::USAGE_EXPIRE_DATETIME => "USAGE_EXPIRE_DATETIME",
            Tag::NO_AUTH_REQUIRED => "NO_AUTH_REQUIRED",
            Tag::CREATION_DATETIME => "CREATION_DATETIME",
            Tag::ORIGIN => "ORIGIN",
            Tag::ASSOCIATED_DATA => "ASSOCIATED_DATA",
            Tag::NONCE => "NONCE",
            Tag::MAC_LENGTH => "MAC_LENGTH",
            _ => return None,
        })
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyParameterValue {
    Enum(u32),
    Integer(u32),
    Long(u64),
    /// Milliseconds since the Unix epoch.
    Date(u64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl std::fmt::Display for KeyParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyParameterValue::Enum(value) | KeyParameterValue::Integer(value) => {
                write!(f, "{}", value)
            }
            KeyParameterValue::Long(value) | KeyParameterValue::Date(value) => {
                write!(f, "{}", value)
            }
            KeyParameterValue::Bool(value) => write!(f, "{}", value),
            KeyParameterValue::Bytes(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyParameter {
    pub tag: Tag,
    pub value: KeyParameterValue,
}

/// An ordered collection of (tag, value) authorization parameters.
///
/// Repeatable tags may appear more than once. Lookups of a single value return the first occurrence.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthorizationSet {
    params: Vec<KeyParameter>,
}

impl AuthorizationSet {
    pub fn new() -> Self {
        AuthorizationSet::default()
    }

    /// Appends a parameter without validating its shape.
    pub fn push(&mut self, tag: Tag, value: KeyParameterValue) {
        self.params.push(KeyParameter { tag, value });
    }

    /// Appends a parameter, rejecting values whose shape does not match the tag's type.
    pub fn try_push(&mut self, tag: Tag, value: KeyParameterValue) -> Result<(), crate::ErrorCode> {
        if !tag.accepts(&value) {
            return Err(crate::ErrorCode::InvalidTag);
        }

        self.push(tag, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyParameter> {
        self.params.iter()
    }

    pub fn find(&self, tag: Tag) -> Option<&KeyParameterValue> {
        self.params
            .iter()
            .find(|param| param.tag == tag)
            .map(|param| &param.value)
    }

    pub fn find_all(&self, tag: Tag) -> impl Iterator<Item = &KeyParameterValue> + '_ {
        self.params
            .iter()
            .filter(move |param| param.tag == tag)
            .map(|param| &param.value)
    }

    pub fn contains(&self, tag: Tag, value: &KeyParameterValue) -> bool {
        self.find_all(tag).any(|v| v == value)
    }

    pub fn contains_enum<T>(&self, tag: Tag, value: T) -> bool
    where
        T: Into<u32>,
    {
        self.contains(tag, &KeyParameterValue::Enum(value.into()))
    }

    pub fn get_enum<T>(&self, tag: Tag) -> Option<T>
    where
        T: TryFrom<u32>,
    {
        match self.find(tag)? {
            KeyParameterValue::Enum(value) => T::try_from(*value).ok(),
            _ => None,
        }
    }

    /// All recognized values of a repeatable enum tag. Values that don't map to `T` are skipped.
    pub fn get_enums<T>(&self, tag: Tag) -> Vec<T>
    where
        T: TryFrom<u32>,
    {
        self.find_all(tag)
            .filter_map(|value| match value {
                KeyParameterValue::Enum(value) => T::try_from(*value).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn get_uint(&self, tag: Tag) -> Option<u32> {
        match self.find(tag)? {
            KeyParameterValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_ulong(&self, tag: Tag) -> Option<u64> {
        match self.find(tag)? {
            KeyParameterValue::Long(value) | KeyParameterValue::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bytes(&self, tag: Tag) -> Option<&[u8]> {
        match self.find(tag)? {
            KeyParameterValue::Bytes(value) => Some(value),
            _ => None,
        }
    }

    /// Bool tags are true when present.
    pub fn get_bool(&self, tag: Tag) -> bool {
        matches!(self.find(tag), Some(KeyParameterValue::Bool(true)))
    }
}

impl Extend<KeyParameter> for AuthorizationSet {
    fn extend<I: IntoIterator<Item = KeyParameter>>(&mut self, iter: I) {
        self.params.extend(iter);
    }
}

impl std::iter::FromIterator<KeyParameter> for AuthorizationSet {
    fn from_iter<I: IntoIterator<Item = KeyParameter>>(iter: I) -> Self {
        AuthorizationSet {
            params: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AuthorizationSet {
    type Item = KeyParameter;
    type IntoIter = std::vec::IntoIter<KeyParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.into_iter()
    }
}

impl<'a> IntoIterator for &'a AuthorizationSet {
    type Item = &'a KeyParameter;
    type IntoIter = std::slice::Iter<'a, KeyParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

macro_rules! impl_into_u32 {
    ($($ty:ty,)*) => {
        $(
            impl From<$ty> for u32 {
                fn from(value: $ty) -> Self {
                    value.value()
                }
            }
        )*
    };
}

impl_into_u32! {
    crate::Algorithm,
    crate::BlockMode,
    crate::Digest,
    crate::KeyOrigin,
    crate::Padding,
    crate::Purpose,
}

/// Builds an [`AuthorizationSet`] with typed setters for the common tags.
///
/// ```
/// let params = keystore_common::AuthorizationSetBuilder::new()
///     .rsa_signing_key(2048, 65537)
///     .digest(keystore_common::Digest::Sha256)
///     .padding(keystore_common::Padding::RsaPkcs1_1_5Sign)
///     .build();
/// assert_eq!(params.get_uint(keystore_common::Tag::KEY_SIZE), Some(2048));
/// ```
#[derive(Debug, Default)]
pub struct AuthorizationSetBuilder {
    set: AuthorizationSet,
}

impl AuthorizationSetBuilder {
    pub fn new() -> Self {
        AuthorizationSetBuilder::default()
    }

    pub fn push(mut self, tag: Tag, value: KeyParameterValue) -> Self {
        self.set.push(tag, value);
        self
    }

    pub fn purpose(self, purpose: crate::Purpose) -> Self {
        self.push(Tag::PURPOSE, KeyParameterValue::Enum(purpose.value()))
    }

    pub fn algorithm(self, algorithm: crate::Algorithm) -> Self {
        self.push(Tag::ALGORITHM, KeyParameterValue::Enum(algorithm.value()))
    }

    pub fn key_size(self, bits: u32) -> Self {
        self.push(Tag::KEY_SIZE, KeyParameterValue::Integer(bits))
    }

    pub fn block_mode(self, block_mode: crate::BlockMode) -> Self {
        self.push(Tag::BLOCK_MODE, KeyParameterValue::Enum(block_mode.value()))
    }

    pub fn digest(self, digest: crate::Digest) -> Self {
        self.push(Tag::DIGEST, KeyParameterValue::Enum(digest.value()))
    }

    pub fn padding(self, padding: crate::Padding) -> Self {
        self.push(Tag::PADDING, KeyParameterValue::Enum(padding.value()))
    }

    pub fn caller_nonce(self) -> Self {
        self.push(Tag::CALLER_NONCE, KeyParameterValue::Bool(true))
    }

    pub fn min_mac_length(self, bits: u32) -> Self {
        self.push(Tag::MIN_MAC_LENGTH, KeyParameterValue::Integer(bits))
    }

    pub fn mac_length(self, bits: u32) -> Self {
        self.push(Tag::MAC_LENGTH, KeyParameterValue::Integer(bits))
    }

    pub fn rsa_public_exponent(self, exponent: u64) -> Self {
        self.push(Tag::RSA_PUBLIC_EXPONENT, KeyParameterValue::Long(exponent))
    }

    pub fn no_auth_required(self) -> Self {
        self.push(Tag::NO_AUTH_REQUIRED, KeyParameterValue::Bool(true))
    }

    pub fn nonce(self, nonce: impl Into<Vec<u8>>) -> Self {
        self.push(Tag::NONCE, KeyParameterValue::Bytes(nonce.into()))
    }

    pub fn associated_data(self, aad: impl Into<Vec<u8>>) -> Self {
        self.push(Tag::ASSOCIATED_DATA, KeyParameterValue::Bytes(aad.into()))
    }

    pub fn rsa_signing_key(self, bits: u32, exponent: u64) -> Self {
        self.algorithm(crate::Algorithm::Rsa)
            .key_size(bits)
            .rsa_public_exponent(exponent)
            .purpose(crate::Purpose::Sign)
            .purpose(crate::Purpose::Verify)
    }

    pub fn rsa_encryption_key(self, bits: u32, exponent: u64) -> Self {
        self.algorithm(crate::Algorithm::Rsa)
            .key_size(bits)
            .rsa_public_exponent(exponent)
            .purpose(crate::Purpose::Encrypt)
            .purpose(crate::Purpose::Decrypt)
    }

    pub fn ec_signing_key(self, bits: u32) -> Self {
        self.algorithm(crate::Algorithm::Ec)
            .key_size(bits)
            .purpose(crate::Purpose::Sign)
            .purpose(crate::Purpose::Verify)
    }

    pub fn aes_encryption_key(self, bits: u32) -> Self {
        self.algorithm(crate::Algorithm::Aes)
            .key_size(bits)
            .purpose(crate::Purpose::Encrypt)
            .purpose(crate::Purpose::Decrypt)
    }

    pub fn hmac_key(self, bits: u32) -> Self {
        self.algorithm(crate::Algorithm::Hmac)
            .key_size(bits)
            .purpose(crate::Purpose::Sign)
            .purpose(crate::Purpose::Verify)
    }

    pub fn build(self) -> AuthorizationSet {
        self.set
    }
}
