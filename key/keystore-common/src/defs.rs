// Copyright (c) Microsoft. All rights reserved.

//! Enumerated values carried by enum-typed authorization tags, with their wire values.

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:literal => $display:literal,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn value(self) -> u32 {
                match self {
                    $($name::$variant => $value,)*
                }
            }
        }

        impl std::convert::TryFrom<u32> for $name {
            type Error = u32;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)*
                    value => Err(value),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $($name::$variant => $display,)*
                })
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($display) {
                        return Ok($name::$variant);
                    }
                )*
                Err(format!("unrecognized {} {:?}", stringify!($name), s))
            }
        }
    };
}

wire_enum! {
    /// The cryptographic operation a key is used for.
    pub enum Purpose {
        Encrypt = 0 => "encrypt",
        Decrypt = 1 => "decrypt",
        Sign = 2 => "sign",
        Verify = 3 => "verify",
    }
}

wire_enum! {
    pub enum Algorithm {
        Rsa = 1 => "rsa",
        Ec = 3 => "ec",
        Aes = 32 => "aes",
        Hmac = 128 => "hmac",
    }
}

impl Algorithm {
    pub fn is_asymmetric(self) -> bool {
        matches!(self, Algorithm::Rsa | Algorithm::Ec)
    }
}

wire_enum! {
    pub enum BlockMode {
        Ecb = 1 => "ecb",
        Cbc = 2 => "cbc",
        Ctr = 3 => "ctr",
        Gcm = 32 => "gcm",
    }
}

wire_enum! {
    pub enum Digest {
        None = 0 => "none",
        Md5 = 1 => "md5",
        Sha1 = 2 => "sha1",
        Sha224 = 3 => "sha224",
        Sha256 = 4 => "sha256",
        Sha384 = 5 => "sha384",
        Sha512 = 6 => "sha512",
    }
}

wire_enum! {
    pub enum Padding {
        None = 1 => "none",
        RsaOaep = 2 => "rsa-oaep",
        RsaPss = 3 => "rsa-pss",
        RsaPkcs1_1_5Encrypt = 4 => "rsa-pkcs1-1-5-encrypt",
        RsaPkcs1_1_5Sign = 5 => "rsa-pkcs1-1-5-sign",
        Pkcs7 = 64 => "pkcs7",
    }
}

wire_enum! {
    /// Encoding of imported or exported key material.
    pub enum KeyFormat {
        /// SubjectPublicKeyInfo, DER. Used for exporting public keys.
        X509 = 0 => "x509",
        /// PrivateKeyInfo, DER. Used for importing asymmetric keys.
        Pkcs8 = 1 => "pkcs8",
        /// Raw key bytes. Used for importing symmetric keys.
        Raw = 3 => "raw",
    }
}

wire_enum! {
    pub enum KeyOrigin {
        Generated = 0 => "generated",
        Derived = 1 => "derived",
        Imported = 2 => "imported",
        Unknown = 3 => "unknown",
    }
}
