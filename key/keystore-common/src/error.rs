// Copyright (c) Microsoft. All rights reserved.

//! The two error domains a keystore call can fail in, and their collapse onto one status integer.
//!
//! | Status | Meaning |
//! |---|---|
//! | `0` | success |
//! | `> 0` | [`ResponseCode`] reported by the keystore service |
//! | `< 0` | [`ErrorCode`] reported by the cryptographic engine behind the service |
//!
//! Transport failures have no code of their own and collapse to [`ErrorCode::UnknownError`].

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $value:literal => $description:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        pub enum $name {
            $($variant,)*
            /// A code this crate does not know the meaning of.
            Other(i32),
        }

        impl $name {
            pub fn code(self) -> i32 {
                match self {
                    $($name::$variant => $value,)*
                    $name::Other(code) => code,
                }
            }

            pub fn from_code(code: i32) -> Self {
                match code {
                    $($value => $name::$variant,)*
                    code => $name::Other(code),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($name::$variant => f.write_str($description),)*
                    $name::Other(code) => write!(f, "unrecognized code {}", code),
                }
            }
        }
    };
}

code_enum! {
    /// Codes returned by the keystore service layer itself.
    pub enum ResponseCode {
        NoError = 1 => "no error",
        Locked = 2 => "keystore is locked",
        Uninitialized = 3 => "keystore is uninitialized",
        SystemError = 4 => "system error",
        ProtocolError = 5 => "protocol error",
        PermissionDenied = 6 => "permission denied",
        KeyNotFound = 7 => "key not found",
        ValueCorrupted = 8 => "value corrupted",
        UndefinedAction = 9 => "undefined action",
        WrongPassword = 10 => "wrong password",
        SignatureInvalid = 14 => "signature invalid",
        OpAuthNeeded = 15 => "operation requires authentication",
        KeyAlreadyExists = 16 => "key already exists",
    }
}

code_enum! {
    /// Codes returned by the cryptographic engine behind the keystore service.
    pub enum ErrorCode {
        Ok = 0 => "ok",
        RootOfTrustAlreadySet = -1 => "root of trust already set",
        UnsupportedPurpose = -2 => "unsupported purpose",
        IncompatiblePurpose = -3 => "incompatible purpose",
        UnsupportedAlgorithm = -4 => "unsupported algorithm",
        IncompatibleAlgorithm = -5 => "incompatible algorithm",
        UnsupportedKeySize = -6 => "unsupported key size",
        UnsupportedBlockMode = -7 => "unsupported block mode",
        IncompatibleBlockMode = -8 => "incompatible block mode",
        UnsupportedMacLength = -9 => "unsupported MAC length",
        UnsupportedPaddingMode = -10 => "unsupported padding mode",
        IncompatiblePaddingMode = -11 => "incompatible padding mode",
        UnsupportedDigest = -12 => "unsupported digest",
        IncompatibleDigest = -13 => "incompatible digest",
        InvalidExpirationTime = -14 => "invalid expiration time",
        InvalidUserId = -15 => "invalid user ID",
        InvalidAuthorizationTimeout = -16 => "invalid authorization timeout",
        UnsupportedKeyFormat = -17 => "unsupported key format",
        IncompatibleKeyFormat = -18 => "incompatible key format",
        UnsupportedKeyEncryptionAlgorithm = -19 => "unsupported key encryption algorithm",
        UnsupportedKeyVerificationAlgorithm = -20 => "unsupported key verification algorithm",
        InvalidInputLength = -21 => "invalid input length",
        KeyExportOptionsInvalid = -22 => "key export options invalid",
        DelegationNotAllowed = -23 => "delegation not allowed",
        KeyNotYetValid = -24 => "key not yet valid",
        KeyExpired = -25 => "key expired",
        KeyUserNotAuthenticated = -26 => "key user not authenticated",
        OutputParameterNull = -27 => "output parameter null",
        InvalidOperationHandle = -28 => "invalid operation handle",
        InsufficientBufferSpace = -29 => "insufficient buffer space",
        VerificationFailed = -30 => "verification failed",
        TooManyOperations = -31 => "too many operations",
        UnexpectedNullPointer = -32 => "unexpected null pointer",
        InvalidKeyBlob = -33 => "invalid key blob",
        ImportedKeyNotEncrypted = -34 => "imported key not encrypted",
        ImportedKeyDecryptionFailed = -35 => "imported key decryption failed",
        ImportedKeyNotSigned = -36 => "imported key not signed",
        ImportedKeyVerificationFailed = -37 => "imported key verification failed",
        InvalidArgument = -38 => "invalid argument",
        UnsupportedTag = -39 => "unsupported tag",
        InvalidTag = -40 => "invalid tag",
        MemoryAllocationFailed = -41 => "memory allocation failed",
        ImportParameterMismatch = -44 => "import parameter mismatch",
        SecureHwAccessDenied = -45 => "secure hardware access denied",
        OperationCancelled = -46 => "operation cancelled",
        ConcurrentAccessConflict = -47 => "concurrent access conflict",
        SecureHwBusy = -48 => "secure hardware busy",
        SecureHwCommunicationFailed = -49 => "secure hardware communication failed",
        UnsupportedEcField = -50 => "unsupported EC field",
        MissingNonce = -51 => "missing nonce",
        InvalidNonce = -52 => "invalid nonce",
        MissingMacLength = -53 => "missing MAC length",
        KeyRateLimitExceeded = -54 => "key rate limit exceeded",
        CallerNonceProhibited = -55 => "caller nonce prohibited",
        KeyMaxOpsExceeded = -56 => "key max ops exceeded",
        InvalidMacLength = -57 => "invalid MAC length",
        MissingMinMacLength = -58 => "missing min MAC length",
        UnsupportedMinMacLength = -59 => "unsupported min MAC length",
        UnsupportedKdf = -60 => "unsupported KDF",
        UnsupportedEcCurve = -61 => "unsupported EC curve",
        KeyRequiresUpgrade = -62 => "key requires upgrade",
        Unimplemented = -100 => "unimplemented",
        VersionMismatch = -101 => "version mismatch",
        UnknownError = -1000 => "unknown error",
    }
}

/// A failed keystore call, tagged with the domain that reported the failure.
#[derive(Debug)]
pub enum Error {
    Response(ResponseCode),
    Engine(ErrorCode),
    Transport(std::io::Error),
}

impl Error {
    /// Decodes a collapsed status back into the domain that produced it.
    ///
    /// Returns `None` for the codes that mean success in either domain.
    pub fn from_status(code: i32) -> Option<Self> {
        match code {
            0 => None,
            code if code > 0 => match ResponseCode::from_code(code) {
                ResponseCode::NoError => None,
                code => Some(Error::Response(code)),
            },
            code => Some(Error::Engine(ErrorCode::from_code(code))),
        }
    }

    /// The collapsed status of this error. Never [`Status::OK`]: an error built from a
    /// success code of either domain collapses to [`ErrorCode::UnknownError`].
    pub fn status(&self) -> Status {
        match self {
            Error::Response(ResponseCode::NoError)
            | Error::Engine(ErrorCode::Ok)
            | Error::Transport(_) => Status(ErrorCode::UnknownError.code()),
            Error::Response(code) => Status(code.code()),
            Error::Engine(code) => Status(code.code()),
        }
    }

    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Response(code) => write!(f, "keystore service error {}: {}", code.code(), code),
            Error::Engine(code) => write!(f, "keystore engine error {}: {}", code.code(), code),
            Error::Transport(_) => f.write_str("could not communicate with keystore service"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Response(_) | Error::Engine(_) => None,
            Error::Transport(err) => Some(err),
        }
    }
}

impl From<ResponseCode> for Error {
    fn from(code: ResponseCode) -> Self {
        Error::Response(code)
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::Engine(code)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err)
    }
}

/// The outcome of a keystore call collapsed onto one integer. Zero is success.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Status(pub i32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusOrigin {
    Success,
    Service,
    Engine,
}

impl Status {
    pub const OK: Status = Status(0);

    pub fn is_ok(self) -> bool {
        self == Status::OK
    }

    /// Classifies the status by its documented range.
    pub fn origin(self) -> StatusOrigin {
        match self.0 {
            0 => StatusOrigin::Success,
            code if code > 0 => StatusOrigin::Service,
            _ => StatusOrigin::Engine,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T> From<&Result<T, Error>> for Status {
    fn from(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => Status::OK,
            Err(err) => err.status(),
        }
    }
}
