use crate::bytes::{Reader, WireError, Writer};
use std::collections::BTreeMap;
use thiserror::Error;

macro_rules! wire_enum {
    ($name:ident, $doc:expr, { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn wire_value(self) -> u8 {
                self as u8
            }

            pub fn from_wire(value: u8) -> Result<Self, WireError> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(WireError::InvalidDiscriminant {
                        what: stringify!($name),
                        value,
                    }),
                }
            }
        }
    };
}

wire_enum!(DataFormat, "Payload encoding negotiated for a session.", {
    VectorFloat32 = 0,
    VectorInt8 = 1,
    CompressedState = 2,
    BinaryCustom = 3,
    GgwaveFsk = 4,
});

wire_enum!(Compression, "Compression algorithm applied to payloads.", {
    None = 0,
    Zlib = 1,
    Lz4 = 2,
    Zstd = 3,
});

wire_enum!(ErrorCorrectionScheme, "Error detection/correction scheme.", {
    None = 0,
    ChecksumOnly = 1,
    ReedSolomon = 2,
});

wire_enum!(Cipher, "Symmetric cipher protecting records.", {
    None = 0,
    AesGcm = 1,
    AesCbc = 2,
    Chacha20Poly1305 = 3,
    XChacha20Poly1305 = 4,
});

wire_enum!(KeyExchange, "Key exchange method establishing session keys.", {
    None = 0,
    Rsa = 1,
    Dh = 2,
    EcdhP256 = 3,
    EcdhP384 = 4,
    EcdhX25519 = 5,
});

wire_enum!(AuthMethod, "Peer authentication method.", {
    None = 0,
    HmacSha256 = 1,
    HmacSha512 = 2,
    Ed25519Signature = 3,
    RsaSignature = 4,
});

wire_enum!(KeySize, "Negotiated key length in bits.", {
    Bits128 = 0,
    Bits192 = 1,
    Bits256 = 2,
    Bits384 = 3,
    Bits512 = 4,
});

impl KeySize {
    pub fn bits(self) -> u32 {
        match self {
            KeySize::Bits128 => 128,
            KeySize::Bits192 => 192,
            KeySize::Bits256 => 256,
            KeySize::Bits384 => 384,
            KeySize::Bits512 => 512,
        }
    }
}

/// Violations of the parameter compatibility table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("{0:?} requires a key exchange method")]
    MissingKeyExchange(Cipher),
    #[error("key exchange {0:?} configured while encryption is disabled")]
    UnexpectedKeyExchange(KeyExchange),
    #[error("{cipher:?} is incompatible with {size:?}")]
    CipherKeySize { cipher: Cipher, size: KeySize },
    #[error("key exchange {kx:?} is incompatible with {size:?}")]
    ExchangeKeySize { kx: KeyExchange, size: KeySize },
}

/// The full set of parameters two agents negotiate for a session.
///
/// Immutable once a negotiation reaches `Finalized`; the agreed set seeds
/// the transmission configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NegotiableParams {
    pub protocol_version: String,
    pub security_version: String,
    pub data_format: DataFormat,
    pub compression: Compression,
    pub error_correction: ErrorCorrectionScheme,
    pub cipher: Cipher,
    pub key_exchange: KeyExchange,
    pub auth_method: AuthMethod,
    pub key_size: KeySize,
    pub custom: BTreeMap<String, String>,
}

impl Default for NegotiableParams {
    fn default() -> Self {
        Self {
            protocol_version: "1.0.0".to_string(),
            security_version: "1.0.0".to_string(),
            data_format: DataFormat::BinaryCustom,
            compression: Compression::None,
            error_correction: ErrorCorrectionScheme::None,
            cipher: Cipher::None,
            key_exchange: KeyExchange::None,
            auth_method: AuthMethod::None,
            key_size: KeySize::Bits256,
            custom: BTreeMap::new(),
        }
    }
}

impl NegotiableParams {
    /// Validates the security-parameter compatibility table.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.cipher != Cipher::None {
            if self.key_exchange == KeyExchange::None {
                return Err(ParamsError::MissingKeyExchange(self.cipher));
            }
            match self.cipher {
                Cipher::AesGcm | Cipher::AesCbc => {
                    if !matches!(
                        self.key_size,
                        KeySize::Bits128 | KeySize::Bits192 | KeySize::Bits256
                    ) {
                        return Err(ParamsError::CipherKeySize {
                            cipher: self.cipher,
                            size: self.key_size,
                        });
                    }
                }
                Cipher::Chacha20Poly1305 | Cipher::XChacha20Poly1305 => {
                    if self.key_size != KeySize::Bits256 {
                        return Err(ParamsError::CipherKeySize {
                            cipher: self.cipher,
                            size: self.key_size,
                        });
                    }
                }
                Cipher::None => unreachable!(),
            }
        } else if self.key_exchange != KeyExchange::None {
            return Err(ParamsError::UnexpectedKeyExchange(self.key_exchange));
        }

        match self.key_exchange {
            KeyExchange::Rsa if self.key_size < KeySize::Bits256 => {
                Err(ParamsError::ExchangeKeySize {
                    kx: self.key_exchange,
                    size: self.key_size,
                })
            }
            KeyExchange::EcdhP256 | KeyExchange::EcdhX25519
                if self.key_size != KeySize::Bits256 =>
            {
                Err(ParamsError::ExchangeKeySize {
                    kx: self.key_exchange,
                    size: self.key_size,
                })
            }
            KeyExchange::EcdhP384 if self.key_size != KeySize::Bits384 => {
                Err(ParamsError::ExchangeKeySize {
                    kx: self.key_exchange,
                    size: self.key_size,
                })
            }
            _ => Ok(()),
        }
    }

    /// The tuple of wire values used for deterministic tie-breaking between
    /// equally-ranked proposals.
    pub fn ordering_key(&self) -> [u8; 7] {
        [
            self.data_format.wire_value(),
            self.compression.wire_value(),
            self.error_correction.wire_value(),
            self.cipher.wire_value(),
            self.key_exchange.wire_value(),
            self.auth_method.wire_value(),
            self.key_size.wire_value(),
        ]
    }

    pub fn write_to(&self, w: &mut Writer) {
        w.put_string(&self.protocol_version);
        w.put_string(&self.security_version);
        w.put_u8(self.data_format.wire_value());
        w.put_u8(self.compression.wire_value());
        w.put_u8(self.error_correction.wire_value());
        w.put_u8(self.cipher.wire_value());
        w.put_u8(self.key_exchange.wire_value());
        w.put_u8(self.auth_method.wire_value());
        w.put_u8(self.key_size.wire_value());
        w.put_u16(self.custom.len().min(u16::MAX as usize) as u16);
        for (key, value) in self.custom.iter().take(u16::MAX as usize) {
            w.put_string(key);
            w.put_string(value);
        }
    }

    pub fn read_from(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let protocol_version = r.read_string("protocol_version")?;
        let security_version = r.read_string("security_version")?;
        let data_format = DataFormat::from_wire(r.read_u8()?)?;
        let compression = Compression::from_wire(r.read_u8()?)?;
        let error_correction = ErrorCorrectionScheme::from_wire(r.read_u8()?)?;
        let cipher = Cipher::from_wire(r.read_u8()?)?;
        let key_exchange = KeyExchange::from_wire(r.read_u8()?)?;
        let auth_method = AuthMethod::from_wire(r.read_u8()?)?;
        let key_size = KeySize::from_wire(r.read_u8()?)?;
        let count = r.read_u16()? as usize;
        let mut custom = BTreeMap::new();
        for _ in 0..count {
            let key = r.read_string("custom key")?;
            let value = r.read_string("custom value")?;
            custom.insert(key, value);
        }
        Ok(Self {
            protocol_version,
            security_version,
            data_format,
            compression,
            error_correction,
            cipher,
            key_exchange,
            auth_method,
            key_size,
            custom,
        })
    }
}

/// The option lists one side supports, advertised alongside proposals so
/// the peer can compute an honest intersection when countering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub data_formats: Vec<DataFormat>,
    pub compressions: Vec<Compression>,
    pub error_corrections: Vec<ErrorCorrectionScheme>,
    pub ciphers: Vec<Cipher>,
    pub key_exchanges: Vec<KeyExchange>,
    pub auth_methods: Vec<AuthMethod>,
    pub key_sizes: Vec<KeySize>,
}

impl CapabilitySet {
    fn write_list<T: Copy>(w: &mut Writer, items: &[T], to_wire: impl Fn(T) -> u8) {
        let len = items.len().min(u8::MAX as usize);
        w.put_u8(len as u8);
        for item in items.iter().take(len) {
            w.put_u8(to_wire(*item));
        }
    }

    fn read_list<T>(
        r: &mut Reader<'_>,
        from_wire: impl Fn(u8) -> Result<T, WireError>,
    ) -> Result<Vec<T>, WireError> {
        let len = r.read_u8()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(from_wire(r.read_u8()?)?);
        }
        Ok(out)
    }

    pub fn write_to(&self, w: &mut Writer) {
        Self::write_list(w, &self.data_formats, DataFormat::wire_value);
        Self::write_list(w, &self.compressions, Compression::wire_value);
        Self::write_list(w, &self.error_corrections, ErrorCorrectionScheme::wire_value);
        Self::write_list(w, &self.ciphers, Cipher::wire_value);
        Self::write_list(w, &self.key_exchanges, KeyExchange::wire_value);
        Self::write_list(w, &self.auth_methods, AuthMethod::wire_value);
        Self::write_list(w, &self.key_sizes, KeySize::wire_value);
    }

    pub fn read_from(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            data_formats: Self::read_list(r, DataFormat::from_wire)?,
            compressions: Self::read_list(r, Compression::from_wire)?,
            error_corrections: Self::read_list(r, ErrorCorrectionScheme::from_wire)?,
            ciphers: Self::read_list(r, Cipher::from_wire)?,
            key_exchanges: Self::read_list(r, KeyExchange::from_wire)?,
            auth_methods: Self::read_list(r, AuthMethod::from_wire)?,
            key_sizes: Self::read_list(r, KeySize::from_wire)?,
        })
    }

    pub fn contains_params(&self, params: &NegotiableParams) -> bool {
        self.data_formats.contains(&params.data_format)
            && self.compressions.contains(&params.compression)
            && self.error_corrections.contains(&params.error_correction)
            && self.ciphers.contains(&params.cipher)
            && self.key_exchanges.contains(&params.key_exchange)
            && self.auth_methods.contains(&params.auth_method)
            && self.key_sizes.contains(&params.key_size)
    }
}
