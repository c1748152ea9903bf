// Copyright (c) Microsoft. All rights reserved.

//! openssl-backed key material and the cryptographic work of one operation.

use keystore_common::{
    Algorithm, AuthorizationSet, BlockMode, Digest, Error, ErrorCode, KeyFormat, Padding, Purpose,
    Tag,
};

const DEFAULT_RSA_PUBLIC_EXPONENT: u64 = 65537;
const GCM_NONCE_LEN: usize = 12;
const AES_BLOCK_LEN: usize = 16;

#[derive(Clone)]
pub(super) enum KeyMaterial {
    Rsa(openssl::pkey::PKey<openssl::pkey::Private>),
    Ec(openssl::pkey::PKey<openssl::pkey::Private>),
    Aes(Vec<u8>),
    Hmac(Vec<u8>),
}

impl KeyMaterial {
    pub(super) fn algorithm(&self) -> Algorithm {
        match self {
            KeyMaterial::Rsa(_) => Algorithm::Rsa,
            KeyMaterial::Ec(_) => Algorithm::Ec,
            KeyMaterial::Aes(_) => Algorithm::Aes,
            KeyMaterial::Hmac(_) => Algorithm::Hmac,
        }
    }
}

pub(super) fn openssl_error(_: openssl::error::ErrorStack) -> Error {
    ErrorCode::UnknownError.into()
}

fn key_size(parameters: &AuthorizationSet) -> Result<u32, Error> {
    parameters
        .get_uint(Tag::KEY_SIZE)
        .ok_or_else(|| ErrorCode::UnsupportedKeySize.into())
}

fn ec_curve(bits: u32) -> Result<openssl::nid::Nid, Error> {
    match bits {
        256 => Ok(openssl::nid::Nid::X9_62_PRIME256V1),
        384 => Ok(openssl::nid::Nid::SECP384R1),
        521 => Ok(openssl::nid::Nid::SECP521R1),
        _ => Err(ErrorCode::UnsupportedKeySize.into()),
    }
}

fn random_bytes(len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0_u8; len];
    openssl::rand::rand_bytes(&mut buf).map_err(openssl_error)?;
    Ok(buf)
}

fn check_symmetric_size(algorithm: Algorithm, bits: u32) -> Result<(), Error> {
    let supported = match algorithm {
        Algorithm::Aes => matches!(bits, 128 | 192 | 256),
        Algorithm::Hmac => (64..=512).contains(&bits) && bits % 8 == 0,
        Algorithm::Rsa | Algorithm::Ec => true,
    };
    if supported {
        Ok(())
    } else {
        Err(ErrorCode::UnsupportedKeySize.into())
    }
}

/// Generates key material for `parameters`.
///
/// Returns the material along with the parameters the engine filled in that the caller left out.
pub(super) fn generate(
    parameters: &AuthorizationSet,
) -> Result<(KeyMaterial, AuthorizationSet), Error> {
    let algorithm: Algorithm = parameters
        .get_enum(Tag::ALGORITHM)
        .ok_or(ErrorCode::UnsupportedAlgorithm)?;
    let bits = key_size(parameters)?;

    let mut derived = AuthorizationSet::new();

    let material = match algorithm {
        Algorithm::Rsa => {
            if !matches!(bits, 1024 | 2048 | 3072 | 4096) {
                return Err(ErrorCode::UnsupportedKeySize.into());
            }

            let exponent = match parameters.get_ulong(Tag::RSA_PUBLIC_EXPONENT) {
                Some(exponent) => exponent,
                None => {
                    derived.push(
                        Tag::RSA_PUBLIC_EXPONENT,
                        keystore_common::KeyParameterValue::Long(DEFAULT_RSA_PUBLIC_EXPONENT),
                    );
                    DEFAULT_RSA_PUBLIC_EXPONENT
                }
            };
            let exponent = match u32::try_from(exponent) {
                Ok(exponent) if exponent >= 3 && exponent % 2 == 1 => exponent,
                _ => return Err(ErrorCode::InvalidArgument.into()),
            };
            let exponent = openssl::bn::BigNum::from_u32(exponent).map_err(openssl_error)?;

            let rsa =
                openssl::rsa::Rsa::generate_with_e(bits, &exponent).map_err(openssl_error)?;
            KeyMaterial::Rsa(openssl::pkey::PKey::from_rsa(rsa).map_err(openssl_error)?)
        }

        Algorithm::Ec => {
            let group =
                openssl::ec::EcGroup::from_curve_name(ec_curve(bits)?).map_err(openssl_error)?;
            let ec_key = openssl::ec::EcKey::generate(&group).map_err(openssl_error)?;
            KeyMaterial::Ec(openssl::pkey::PKey::from_ec_key(ec_key).map_err(openssl_error)?)
        }

        Algorithm::Aes | Algorithm::Hmac => {
            check_symmetric_size(algorithm, bits)?;
            let key = random_bytes(bits as usize / 8)?;
            if algorithm == Algorithm::Aes {
                KeyMaterial::Aes(key)
            } else {
                KeyMaterial::Hmac(key)
            }
        }
    };

    Ok((material, derived))
}

/// Parses imported key material and checks it against `parameters`.
///
/// Returns the material along with the parameters derived from it that the caller left out.
pub(super) fn import(
    parameters: &AuthorizationSet,
    format: KeyFormat,
    key_data: &[u8],
) -> Result<(KeyMaterial, AuthorizationSet), Error> {
    let algorithm: Algorithm = parameters
        .get_enum(Tag::ALGORITHM)
        .ok_or(ErrorCode::UnsupportedAlgorithm)?;

    match (algorithm.is_asymmetric(), format) {
        (_, KeyFormat::X509) => return Err(ErrorCode::UnsupportedKeyFormat.into()),
        (true, KeyFormat::Pkcs8) | (false, KeyFormat::Raw) => (),
        _ => return Err(ErrorCode::IncompatibleKeyFormat.into()),
    }

    let mut derived = AuthorizationSet::new();

    let (material, bits) = match algorithm {
        Algorithm::Rsa | Algorithm::Ec => {
            let pkey = openssl::pkey::PKey::private_key_from_pkcs8(key_data)
                .map_err(|_| ErrorCode::InvalidKeyBlob)?;

            match (algorithm, pkey.id()) {
                (Algorithm::Rsa, openssl::pkey::Id::RSA) => {
                    let rsa = pkey.rsa().map_err(openssl_error)?;
                    let exponent = rsa
                        .e()
                        .to_vec()
                        .into_iter()
                        .try_fold(0_u64, |acc, b| {
                            acc.checked_mul(256).map(|acc| acc + u64::from(b))
                        })
                        .ok_or(ErrorCode::UnsupportedKeySize)?;
                    match parameters.get_ulong(Tag::RSA_PUBLIC_EXPONENT) {
                        Some(requested) if requested != exponent => {
                            return Err(ErrorCode::ImportParameterMismatch.into())
                        }
                        Some(_) => (),
                        None => derived.push(
                            Tag::RSA_PUBLIC_EXPONENT,
                            keystore_common::KeyParameterValue::Long(exponent),
                        ),
                    }

                    let bits = pkey.bits();
                    (KeyMaterial::Rsa(pkey), bits)
                }

                (Algorithm::Ec, openssl::pkey::Id::EC) => {
                    let bits = pkey.ec_key().map_err(openssl_error)?.group().degree();
                    ec_curve(bits)?;
                    (KeyMaterial::Ec(pkey), bits)
                }

                _ => return Err(ErrorCode::ImportParameterMismatch.into()),
            }
        }

        Algorithm::Aes | Algorithm::Hmac => {
            let bits = u32::try_from(key_data.len() * 8)
                .map_err(|_| ErrorCode::UnsupportedKeySize)?;
            check_symmetric_size(algorithm, bits)?;

            let key = key_data.to_owned();
            if algorithm == Algorithm::Aes {
                (KeyMaterial::Aes(key), bits)
            } else {
                (KeyMaterial::Hmac(key), bits)
            }
        }
    };

    match parameters.get_uint(Tag::KEY_SIZE) {
        Some(requested) if requested != bits => {
            return Err(ErrorCode::ImportParameterMismatch.into())
        }
        Some(_) => (),
        None => derived.push(
            Tag::KEY_SIZE,
            keystore_common::KeyParameterValue::Integer(bits),
        ),
    }

    Ok((material, derived))
}

pub(super) fn export(material: &KeyMaterial, format: KeyFormat) -> Result<Vec<u8>, Error> {
    match (material, format) {
        (KeyMaterial::Rsa(pkey) | KeyMaterial::Ec(pkey), KeyFormat::X509) => {
            pkey.public_key_to_der().map_err(openssl_error)
        }
        _ => Err(ErrorCode::UnsupportedKeyFormat.into()),
    }
}

fn message_digest(digest: Option<Digest>) -> Option<openssl::hash::MessageDigest> {
    match digest? {
        Digest::None => None,
        Digest::Md5 => Some(openssl::hash::MessageDigest::md5()),
        Digest::Sha1 => Some(openssl::hash::MessageDigest::sha1()),
        Digest::Sha224 => Some(openssl::hash::MessageDigest::sha224()),
        Digest::Sha256 => Some(openssl::hash::MessageDigest::sha256()),
        Digest::Sha384 => Some(openssl::hash::MessageDigest::sha384()),
        Digest::Sha512 => Some(openssl::hash::MessageDigest::sha512()),
    }
}

/// Picks the value of `tag` for an operation: the one requested at begin if the key authorizes
/// it, otherwise the first one the key authorizes.
///
/// A key that lists no values for `tag` places no restriction on it.
fn resolve<T>(
    key_parameters: &AuthorizationSet,
    begin_parameters: &AuthorizationSet,
    tag: Tag,
    incompatible: ErrorCode,
) -> Result<Option<T>, Error>
where
    T: Copy + Into<u32> + TryFrom<u32>,
{
    let authorized: Vec<T> = key_parameters.get_enums(tag);

    match begin_parameters.get_enum::<T>(tag) {
        Some(requested)
            if authorized.is_empty() || key_parameters.contains_enum(tag, requested) =>
        {
            Ok(Some(requested))
        }
        Some(_) => Err(incompatible.into()),
        None => Ok(authorized.first().copied()),
    }
}

/// Everything decided at begin that the engine needs at finish.
pub(super) struct Operation {
    purpose: Purpose,
    material: KeyMaterial,
    digest: Option<Digest>,
    padding: Option<Padding>,
    block_mode: Option<BlockMode>,
    nonce: Option<Vec<u8>>,
    mac_length_bits: Option<u32>,
    min_mac_length_bits: u32,
    associated_data: Vec<u8>,
}

impl Operation {
    /// Validates the operation's parameters and fixes its mode.
    ///
    /// Returns the operation along with the output parameters of begin.
    pub(super) fn begin(
        purpose: Purpose,
        material: KeyMaterial,
        key_parameters: &AuthorizationSet,
        begin_parameters: &AuthorizationSet,
    ) -> Result<(Self, AuthorizationSet), Error> {
        let algorithm = material.algorithm();
        let supported = match algorithm {
            Algorithm::Rsa => true,
            Algorithm::Aes => matches!(purpose, Purpose::Encrypt | Purpose::Decrypt),
            Algorithm::Ec | Algorithm::Hmac => matches!(purpose, Purpose::Sign | Purpose::Verify),
        };
        if !supported {
            return Err(ErrorCode::UnsupportedPurpose.into());
        }
        if !key_parameters.contains_enum(Tag::PURPOSE, purpose) {
            return Err(ErrorCode::IncompatiblePurpose.into());
        }

        let digest = resolve(
            key_parameters,
            begin_parameters,
            Tag::DIGEST,
            ErrorCode::IncompatibleDigest,
        )?;
        let padding = resolve(
            key_parameters,
            begin_parameters,
            Tag::PADDING,
            ErrorCode::IncompatiblePaddingMode,
        )?;
        let block_mode = resolve(
            key_parameters,
            begin_parameters,
            Tag::BLOCK_MODE,
            ErrorCode::IncompatibleBlockMode,
        )?;

        let mut operation = Operation {
            purpose,
            material,
            digest,
            padding,
            block_mode,
            nonce: None,
            mac_length_bits: begin_parameters.get_uint(Tag::MAC_LENGTH),
            min_mac_length_bits: 0,
            associated_data: vec![],
        };
        let mut output_parameters = AuthorizationSet::new();

        match algorithm {
            Algorithm::Rsa => operation.check_rsa_mode()?,
            Algorithm::Ec => (),
            Algorithm::Aes => {
                operation.min_mac_length_bits =
                    key_parameters.get_uint(Tag::MIN_MAC_LENGTH).unwrap_or(96);
                operation.begin_aes(key_parameters, begin_parameters, &mut output_parameters)?;
            }
            Algorithm::Hmac => {
                operation.min_mac_length_bits =
                    key_parameters.get_uint(Tag::MIN_MAC_LENGTH).unwrap_or(64);
                operation.check_hmac_mode()?;
            }
        }

        if let Some(aad) = begin_parameters.get_bytes(Tag::ASSOCIATED_DATA) {
            operation.add_associated_data(aad)?;
        }

        Ok((operation, output_parameters))
    }

    fn check_rsa_mode(&self) -> Result<(), Error> {
        let has_digest = message_digest(self.digest).is_some();

        match (self.purpose, self.padding) {
            (Purpose::Sign | Purpose::Verify, None | Some(Padding::None)) => {
                if has_digest {
                    return Err(ErrorCode::IncompatibleDigest.into());
                }
            }
            (
                Purpose::Sign | Purpose::Verify,
                Some(Padding::RsaPkcs1_1_5Sign | Padding::RsaPss),
            ) => {
                if !has_digest {
                    return Err(ErrorCode::IncompatibleDigest.into());
                }
            }
            (Purpose::Encrypt | Purpose::Decrypt, Some(Padding::RsaOaep)) => {
                if !has_digest {
                    return Err(ErrorCode::IncompatibleDigest.into());
                }
            }
            (Purpose::Encrypt | Purpose::Decrypt, Some(Padding::RsaPkcs1_1_5Encrypt)) => (),
            _ => return Err(ErrorCode::UnsupportedPaddingMode.into()),
        }

        Ok(())
    }

    fn check_hmac_mode(&self) -> Result<(), Error> {
        let md = message_digest(self.digest).ok_or(ErrorCode::UnsupportedDigest)?;
        let max_bits = u32::try_from(md.size() * 8).unwrap_or(u32::MAX);

        if self.purpose == Purpose::Sign {
            let mac_length_bits = self.mac_length_bits.ok_or(ErrorCode::MissingMacLength)?;
            if mac_length_bits % 8 != 0 || mac_length_bits > max_bits {
                return Err(ErrorCode::UnsupportedMacLength.into());
            }
            if mac_length_bits < self.min_mac_length_bits {
                return Err(ErrorCode::InvalidMacLength.into());
            }
        }

        Ok(())
    }

    fn begin_aes(
        &mut self,
        key_parameters: &AuthorizationSet,
        begin_parameters: &AuthorizationSet,
        output_parameters: &mut AuthorizationSet,
    ) -> Result<(), Error> {
        let nonce_len = match self.block_mode {
            Some(BlockMode::Gcm) => {
                if !matches!(self.padding, None | Some(Padding::None)) {
                    return Err(ErrorCode::IncompatiblePaddingMode.into());
                }

                let mac_length_bits = self.mac_length_bits.ok_or(ErrorCode::MissingMacLength)?;
                if mac_length_bits % 8 != 0 || !(96..=128).contains(&mac_length_bits) {
                    return Err(ErrorCode::UnsupportedMacLength.into());
                }
                if mac_length_bits < self.min_mac_length_bits {
                    return Err(ErrorCode::InvalidMacLength.into());
                }

                Some(GCM_NONCE_LEN)
            }
            Some(BlockMode::Cbc) => Some(AES_BLOCK_LEN),
            Some(BlockMode::Ecb) => None,
            Some(BlockMode::Ctr) | None => return Err(ErrorCode::UnsupportedBlockMode.into()),
        };

        if matches!(self.block_mode, Some(BlockMode::Cbc | BlockMode::Ecb))
            && !matches!(self.padding, None | Some(Padding::None | Padding::Pkcs7))
        {
            return Err(ErrorCode::IncompatiblePaddingMode.into());
        }

        let Some(nonce_len) = nonce_len else {
            if begin_parameters.find(Tag::NONCE).is_some() {
                return Err(ErrorCode::InvalidNonce.into());
            }
            return Ok(());
        };

        let nonce = match begin_parameters.get_bytes(Tag::NONCE) {
            Some(nonce) => {
                if self.purpose == Purpose::Encrypt
                    && !key_parameters.get_bool(Tag::CALLER_NONCE)
                {
                    return Err(ErrorCode::CallerNonceProhibited.into());
                }
                if nonce.len() != nonce_len {
                    return Err(ErrorCode::InvalidNonce.into());
                }
                nonce.to_owned()
            }

            None if self.purpose == Purpose::Encrypt => {
                let nonce = random_bytes(nonce_len)?;
                output_parameters.push(
                    Tag::NONCE,
                    keystore_common::KeyParameterValue::Bytes(nonce.clone()),
                );
                nonce
            }

            None => return Err(ErrorCode::MissingNonce.into()),
        };
        self.nonce = Some(nonce);

        Ok(())
    }

    /// Associated data is only meaningful for AES-GCM.
    pub(super) fn add_associated_data(&mut self, aad: &[u8]) -> Result<(), Error> {
        if self.block_mode != Some(BlockMode::Gcm) {
            return Err(ErrorCode::InvalidTag.into());
        }
        self.associated_data.extend_from_slice(aad);
        Ok(())
    }

    pub(super) fn finish(self, input: &[u8], signature: &[u8]) -> Result<Vec<u8>, Error> {
        match (&self.material, self.purpose) {
            (KeyMaterial::Rsa(pkey), Purpose::Sign) => self.rsa_sign(pkey, input),
            (KeyMaterial::Rsa(pkey), Purpose::Verify) => {
                self.rsa_verify(pkey, input, signature).map(|()| vec![])
            }
            (KeyMaterial::Rsa(pkey), Purpose::Encrypt) => self.rsa_crypt(pkey, input, true),
            (KeyMaterial::Rsa(pkey), Purpose::Decrypt) => self.rsa_crypt(pkey, input, false),

            (KeyMaterial::Ec(pkey), Purpose::Sign) => self.ec_sign(pkey, input),
            (KeyMaterial::Ec(pkey), Purpose::Verify) => {
                self.ec_verify(pkey, input, signature).map(|()| vec![])
            }

            (KeyMaterial::Aes(key), Purpose::Encrypt) => self.aes_encrypt(key, input),
            (KeyMaterial::Aes(key), Purpose::Decrypt) => self.aes_decrypt(key, input),

            (KeyMaterial::Hmac(key), Purpose::Sign) => {
                let mac = self.hmac(key, input)?;
                let mac_len = self.mac_length_bits.unwrap_or(0) as usize / 8;
                Ok(mac[..mac_len].to_owned())
            }
            (KeyMaterial::Hmac(key), Purpose::Verify) => {
                let mac = self.hmac(key, input)?;
                let min_len = self.min_mac_length_bits as usize / 8;
                if signature.len() < min_len || signature.len() > mac.len() {
                    return Err(ErrorCode::InvalidMacLength.into());
                }
                if openssl::memcmp::eq(&mac[..signature.len()], signature) {
                    Ok(vec![])
                } else {
                    Err(ErrorCode::VerificationFailed.into())
                }
            }

            _ => Err(ErrorCode::UnsupportedPurpose.into()),
        }
    }

    fn rsa_padding(&self) -> openssl::rsa::Padding {
        match self.padding {
            Some(Padding::RsaPss) => openssl::rsa::Padding::PKCS1_PSS,
            Some(Padding::RsaOaep) => openssl::rsa::Padding::PKCS1_OAEP,
            Some(Padding::RsaPkcs1_1_5Sign | Padding::RsaPkcs1_1_5Encrypt) => {
                openssl::rsa::Padding::PKCS1
            }
            _ => openssl::rsa::Padding::NONE,
        }
    }

    /// Raw RSA input is left-padded with zeros to the modulus size.
    fn rsa_raw_input(
        pkey: &openssl::pkey::PKey<openssl::pkey::Private>,
        input: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let modulus_len = pkey.size();
        if input.len() > modulus_len {
            return Err(ErrorCode::InvalidInputLength.into());
        }

        let mut padded = vec![0_u8; modulus_len - input.len()];
        padded.extend_from_slice(input);
        Ok(padded)
    }

    fn rsa_sign(
        &self,
        pkey: &openssl::pkey::PKey<openssl::pkey::Private>,
        input: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let Some(md) = message_digest(self.digest) else {
            let rsa = pkey.rsa().map_err(openssl_error)?;
            let padded = Self::rsa_raw_input(pkey, input)?;
            let mut signature = vec![0_u8; pkey.size()];
            let len = rsa
                .private_encrypt(&padded, &mut signature, openssl::rsa::Padding::NONE)
                .map_err(|_| ErrorCode::InvalidArgument)?;
            signature.truncate(len);
            return Ok(signature);
        };

        let mut signer = openssl::sign::Signer::new(md, pkey).map_err(openssl_error)?;
        signer
            .set_rsa_padding(self.rsa_padding())
            .map_err(openssl_error)?;
        if self.padding == Some(Padding::RsaPss) {
            signer
                .set_rsa_pss_saltlen(openssl::sign::RsaPssSaltlen::DIGEST_LENGTH)
                .map_err(openssl_error)?;
        }
        signer.update(input).map_err(openssl_error)?;
        signer.sign_to_vec().map_err(openssl_error)
    }

    fn rsa_verify(
        &self,
        pkey: &openssl::pkey::PKey<openssl::pkey::Private>,
        input: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        let Some(md) = message_digest(self.digest) else {
            if signature.len() != pkey.size() {
                return Err(ErrorCode::VerificationFailed.into());
            }

            let rsa = pkey.rsa().map_err(openssl_error)?;
            let padded = Self::rsa_raw_input(pkey, input)?;
            let mut recovered = vec![0_u8; pkey.size()];
            let len = rsa
                .public_decrypt(signature, &mut recovered, openssl::rsa::Padding::NONE)
                .map_err(|_| ErrorCode::VerificationFailed)?;
            return if len == padded.len() && openssl::memcmp::eq(&recovered[..len], &padded) {
                Ok(())
            } else {
                Err(ErrorCode::VerificationFailed.into())
            };
        };

        let mut verifier = openssl::sign::Verifier::new(md, pkey).map_err(openssl_error)?;
        verifier
            .set_rsa_padding(self.rsa_padding())
            .map_err(openssl_error)?;
        if self.padding == Some(Padding::RsaPss) {
            verifier
                .set_rsa_pss_saltlen(openssl::sign::RsaPssSaltlen::DIGEST_LENGTH)
                .map_err(openssl_error)?;
        }
        verifier.update(input).map_err(openssl_error)?;
        match verifier.verify(signature) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(ErrorCode::VerificationFailed.into()),
        }
    }

    fn rsa_crypt(
        &self,
        pkey: &openssl::pkey::PKey<openssl::pkey::Private>,
        input: &[u8],
        encrypt: bool,
    ) -> Result<Vec<u8>, Error> {
        let oaep_md = message_digest(self.digest);

        if encrypt {
            let mut encrypter = openssl::encrypt::Encrypter::new(pkey).map_err(openssl_error)?;
            encrypter
                .set_rsa_padding(self.rsa_padding())
                .map_err(openssl_error)?;
            if let (Some(Padding::RsaOaep), Some(md)) = (self.padding, oaep_md) {
                encrypter.set_rsa_oaep_md(md).map_err(openssl_error)?;
                encrypter.set_rsa_mgf1_md(md).map_err(openssl_error)?;
            }

            let len = encrypter.encrypt_len(input).map_err(openssl_error)?;
            let mut output = vec![0_u8; len];
            let len = encrypter
                .encrypt(input, &mut output)
                .map_err(|_| ErrorCode::InvalidInputLength)?;
            output.truncate(len);
            Ok(output)
        } else {
            let mut decrypter = openssl::encrypt::Decrypter::new(pkey).map_err(openssl_error)?;
            decrypter
                .set_rsa_padding(self.rsa_padding())
                .map_err(openssl_error)?;
            if let (Some(Padding::RsaOaep), Some(md)) = (self.padding, oaep_md) {
                decrypter.set_rsa_oaep_md(md).map_err(openssl_error)?;
                decrypter.set_rsa_mgf1_md(md).map_err(openssl_error)?;
            }

            let len = decrypter.decrypt_len(input).map_err(openssl_error)?;
            let mut output = vec![0_u8; len];
            let len = decrypter
                .decrypt(input, &mut output)
                .map_err(|_| ErrorCode::InvalidArgument)?;
            output.truncate(len);
            Ok(output)
        }
    }

    fn ec_sign(
        &self,
        pkey: &openssl::pkey::PKey<openssl::pkey::Private>,
        input: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let Some(md) = message_digest(self.digest) else {
            let ec_key = pkey.ec_key().map_err(openssl_error)?;
            let signature =
                openssl::ecdsa::EcdsaSig::sign(input, &ec_key).map_err(openssl_error)?;
            return signature.to_der().map_err(openssl_error);
        };

        let mut signer = openssl::sign::Signer::new(md, pkey).map_err(openssl_error)?;
        signer.update(input).map_err(openssl_error)?;
        signer.sign_to_vec().map_err(openssl_error)
    }

    fn ec_verify(
        &self,
        pkey: &openssl::pkey::PKey<openssl::pkey::Private>,
        input: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        let verified = if let Some(md) = message_digest(self.digest) {
            let mut verifier = openssl::sign::Verifier::new(md, pkey).map_err(openssl_error)?;
            verifier.update(input).map_err(openssl_error)?;
            verifier.verify(signature)
        } else {
            let ec_key = pkey.ec_key().map_err(openssl_error)?;
            openssl::ecdsa::EcdsaSig::from_der(signature)
                .and_then(|signature| signature.verify(input, &ec_key))
        };

        match verified {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(ErrorCode::VerificationFailed.into()),
        }
    }

    fn aes_cipher(&self, key: &[u8]) -> Result<openssl::symm::Cipher, Error> {
        let cipher = match (self.block_mode, key.len()) {
            (Some(BlockMode::Gcm), 16) => openssl::symm::Cipher::aes_128_gcm(),
            (Some(BlockMode::Gcm), 24) => openssl::symm::Cipher::aes_192_gcm(),
            (Some(BlockMode::Gcm), 32) => openssl::symm::Cipher::aes_256_gcm(),
            (Some(BlockMode::Cbc), 16) => openssl::symm::Cipher::aes_128_cbc(),
            (Some(BlockMode::Cbc), 24) => openssl::symm::Cipher::aes_192_cbc(),
            (Some(BlockMode::Cbc), 32) => openssl::symm::Cipher::aes_256_cbc(),
            (Some(BlockMode::Ecb), 16) => openssl::symm::Cipher::aes_128_ecb(),
            (Some(BlockMode::Ecb), 24) => openssl::symm::Cipher::aes_192_ecb(),
            (Some(BlockMode::Ecb), 32) => openssl::symm::Cipher::aes_256_ecb(),
            _ => return Err(ErrorCode::UnsupportedBlockMode.into()),
        };
        Ok(cipher)
    }

    fn aes_encrypt(&self, key: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = self.aes_cipher(key)?;

        if self.block_mode == Some(BlockMode::Gcm) {
            let mut tag = vec![0_u8; self.mac_length_bits.unwrap_or(128) as usize / 8];
            let mut output = openssl::symm::encrypt_aead(
                cipher,
                key,
                self.nonce.as_deref(),
                &self.associated_data,
                input,
                &mut tag,
            )
            .map_err(openssl_error)?;
            output.extend_from_slice(&tag);
            return Ok(output);
        }

        self.aes_block_crypt(cipher, true, key, input)
    }

    fn aes_decrypt(&self, key: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = self.aes_cipher(key)?;

        if self.block_mode == Some(BlockMode::Gcm) {
            let tag_len = self.mac_length_bits.unwrap_or(128) as usize / 8;
            if input.len() < tag_len {
                return Err(ErrorCode::InvalidInputLength.into());
            }

            let (ciphertext, tag) = input.split_at(input.len() - tag_len);
            return openssl::symm::decrypt_aead(
                cipher,
                key,
                self.nonce.as_deref(),
                &self.associated_data,
                ciphertext,
                tag,
            )
            .map_err(|_| ErrorCode::VerificationFailed.into());
        }

        self.aes_block_crypt(cipher, false, key, input)
    }

    fn aes_block_crypt(
        &self,
        cipher: openssl::symm::Cipher,
        encrypt: bool,
        key: &[u8],
        input: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let pad = self.padding == Some(Padding::Pkcs7);
        let whole_blocks = input.len() % AES_BLOCK_LEN == 0;
        if !whole_blocks && (!pad || !encrypt) {
            return Err(ErrorCode::InvalidInputLength.into());
        }

        let mode = if encrypt {
            openssl::symm::Mode::Encrypt
        } else {
            openssl::symm::Mode::Decrypt
        };

        let mut crypter = openssl::symm::Crypter::new(cipher, mode, key, self.nonce.as_deref())
            .map_err(openssl_error)?;
        crypter.pad(pad);

        let mut output = vec![0_u8; input.len() + cipher.block_size()];
        let len = crypter.update(input, &mut output).map_err(openssl_error)?;
        let rest = crypter
            .finalize(&mut output[len..])
            .map_err(|_| ErrorCode::InvalidArgument)?;
        output.truncate(len + rest);
        Ok(output)
    }

    fn hmac(&self, key: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
        let md = message_digest(self.digest).ok_or(ErrorCode::UnsupportedDigest)?;
        let pkey = openssl::pkey::PKey::hmac(key).map_err(openssl_error)?;

        let mut signer = openssl::sign::Signer::new(md, &pkey).map_err(openssl_error)?;
        signer.update(input).map_err(openssl_error)?;
        signer.sign_to_vec().map_err(openssl_error)
    }
}
