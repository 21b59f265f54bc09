use std::{
    cmp,
    convert::TryInto,
    fmt,
    str,
};

use aes::{Aes128, Aes256};
use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use block_padding::{NoPadding, Padding, Pkcs7};
use cbc::{Decryptor, Encryptor};
use cipher::{BlockDecrypt, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use cipher::generic_array::{ArrayLength, GenericArray, typenum::{U16, U32, Unsigned}};
use thiserror::Error;

/// Block size used by the FUS AES-256 envelope scheme. This is twice the
/// actual AES block size; the service pads everything to 32 bytes.
pub type EnvelopeBlockSize = U32;
/// Envelope key size
pub type KeySize = U32;
/// Block size of the per-file cipher (AES-128-ECB)
pub type FileBlockSize = U16;

const NON_UTF8_MSG: &str = "[Non-UTF-8 data]";

pub(crate) fn to_utf8_or_error_string(data: &[u8]) -> &str {
    str::from_utf8(data).unwrap_or(NON_UTF8_MSG)
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Fixed key has incorrect length")]
    IncorrectFixedKeyLength,
    #[error("Flexible key suffix has incorrect length")]
    IncorrectFlexibleKeySuffixLength,
    #[error("Ciphertext is smaller than block size")]
    CiphertextTooSmall,
    #[error("Nonce is not exactly 16 bytes")]
    InvalidNonceSize,
    #[error("Failed to decode base64 nonce: {0}")]
    NonceDecode(#[from] base64::DecodeError),
    #[error("Ciphertext is not a multiple of the cipher block size")]
    TruncatedCiphertext,
}

/// A type representing a decoded FUS nonce value.
///
/// The nonce is the server-issued challenge that all signature and
/// logic-check material is derived from. It is always exactly 16 bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Nonce {
    data: [u8; 16],
}

/// Input for computing a `<LOGIC_CHECK>` value. The filename flavor strips
/// the extension and keeps at most the final 16 bytes before the lookup.
#[derive(Clone, Copy)]
pub enum LogicCheckInput<'a> {
    Data(&'a [u8]),
    Filename(&'a str),
}

impl Nonce {
    /// Create instance from a byte slice containing the decoded nonce.
    /// [`CryptoError::InvalidNonceSize`] is returned if the slice is not
    /// 16 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            data: data.try_into().map_err(|_| CryptoError::InvalidNonceSize)?,
        })
    }

    /// Get byte slice containing the nonce. The slice is guaranteed to always
    /// be 16 bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get the scrambled value authenticating a request field: each nonce
    /// byte selects one character of the input.
    pub fn logic_check(&self, input: LogicCheckInput) -> String {
        match input {
            LogicCheckInput::Data(data) => {
                if data.is_empty() {
                    return String::new();
                }

                self.as_slice().iter()
                    .map(|c| data[(*c as usize & 0xf) % data.len()] as char)
                    .collect()
            }
            LogicCheckInput::Filename(filename) => {
                let mut data = filename.as_bytes();

                if let Some(n) = data.iter().position(|x| *x == b'.') {
                    data = &data[..n];
                }
                if data.len() > 16 {
                    data = &data[data.len() - 16..];
                }

                self.logic_check(LogicCheckInput::Data(data))
            }
        }
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_utf8_or_error_string(&self.data))
    }
}

/// The vendor-proprietary session-crypto capability. The protocol client
/// only depends on these four operations; any implementation reproducing
/// the vendor byte transform is acceptable, and tests may stub it out.
pub trait SessionCrypto: Send + Sync {
    /// Decode a raw (base64, fixed-key-encrypted) nonce from the server.
    fn decode_nonce(&self, raw: &[u8]) -> Result<Nonce, CryptoError>;

    /// Compute the Authorization signature for a decoded nonce.
    fn derive_signature(&self, nonce: &Nonce) -> String;

    /// Key for binaries using the version 2 encryption scheme.
    fn file_key_v2(&self, version: &str, model: &str, region: &str) -> [u8; 16];

    /// Key for binaries using the version 4 encryption scheme. Both inputs
    /// come from the binary-info response.
    fn file_key_v4(&self, version_field: &str, logic_value: &str)
        -> Result<[u8; 16], CryptoError>;
}

/// Container for holding the FUS key material.
#[derive(Clone, Debug)]
pub struct FusKeys {
    pub fixed_key: [u8; 32],
    pub flexible_key_suffix: [u8; 16],
}

impl FusKeys {
    /// Load keys from the specified byte slices. The fixed key should be 32
    /// bytes and the flexible key suffix should be 16 bytes.
    pub fn new(
        fixed_key: &[u8],
        flexible_key_suffix: &[u8],
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            fixed_key: fixed_key.try_into()
                .map_err(|_| CryptoError::IncorrectFixedKeyLength)?,
            flexible_key_suffix: flexible_key_suffix.try_into()
                .map_err(|_| CryptoError::IncorrectFlexibleKeySuffixLength)?,
        })
    }

    /// Derive the FUS "flexible key": each base byte mod 16 indexes into the
    /// fixed key, followed by the hardcoded suffix.
    fn flexible_key(&self, key_base: &[u8]) -> Vec<u8> {
        key_base.iter()
            .map(|x| self.fixed_key[(x % 16) as usize])
            .chain(self.flexible_key_suffix.iter().copied())
            .collect()
    }
}

impl SessionCrypto for FusKeys {
    fn decode_nonce(&self, raw: &[u8]) -> Result<Nonce, CryptoError> {
        let decoded = STANDARD.decode(raw)?;
        let plaintext = FusAes256::new(&self.fixed_key).decrypt(&decoded)?;
        Nonce::from_slice(&plaintext)
    }

    fn derive_signature(&self, nonce: &Nonce) -> String {
        let key = self.flexible_key(nonce.as_slice());
        let ciphertext = FusAes256::new(&key).encrypt(nonce.as_slice());

        STANDARD.encode(ciphertext)
    }

    fn file_key_v2(&self, version: &str, model: &str, region: &str) -> [u8; 16] {
        md5::compute(format!("{region}:{model}:{version}").as_bytes()).0
    }

    fn file_key_v4(&self, version_field: &str, logic_value: &str)
            -> Result<[u8; 16], CryptoError> {
        let selector = Nonce::from_slice(logic_value.as_bytes())?;
        let key = selector.logic_check(LogicCheckInput::Data(version_field.as_bytes()));

        Ok(md5::compute(key.as_bytes()).0)
    }
}

/// Pad byte array to specified block size and optionally truncate to one block.
fn pad<B: ArrayLength<u8>>(mut data: &[u8], truncate_to_block_size: bool) -> Vec<u8> {
    let block_size = B::USIZE;

    if truncate_to_block_size {
        data = &data[..cmp::min(data.len(), block_size)];
    }
    let mut buf = data.to_vec();

    if data.is_empty() || data.len() % block_size != 0 {
        buf.resize((data.len() / block_size + 1) * block_size, 0);

        let last_block_offset = buf.len() - block_size;
        let last_block = &mut buf[last_block_offset..];
        let ga_last_block = GenericArray::<u8, B>::from_mut_slice(last_block);
        Pkcs7::pad(ga_last_block, data.len() % block_size);
    }

    buf
}

/// Type for performing AES operations on FUS envelope data (nonces and
/// signatures). Notably:
/// * The key is PKCS#7 padded to 32 bytes if it is too short or truncated to
///   32 bytes if it is too long.
/// * The data uses a 32-byte block size. It is PKCS#7 padded to the next
///   32-byte boundary. During decryption, if the input is a multiple of
///   32-bytes and the last block looks like it has padding, then the padding
///   will be truncated. There is no way to tell the difference between padding
///   and some bytes that look like padding.
pub struct FusAes256 {
    dec: Decryptor<Aes256>,
    enc: Encryptor<Aes256>,
}

impl FusAes256 {
    /// Create a new cipher instance. The key will be PKCS#7 padded to 32
    /// bytes if it is too short or truncated to 32 bytes if it is too long.
    pub fn new(key: &[u8]) -> Self {
        let padded_key = pad::<KeySize>(key, true);
        let iv = &padded_key[..16];

        let dec = Decryptor::<Aes256>::new_from_slices(&padded_key, iv).unwrap();
        let enc = Encryptor::<Aes256>::new_from_slices(&padded_key, iv).unwrap();
        Self {
            dec,
            enc,
        }
    }

    /// Encrypt the provided plaintext data. The data will be PKCS#7 padded to
    /// the next 32-byte boundary.
    pub fn encrypt(self, data: &[u8]) -> Vec<u8> {
        let mut buf = pad::<EnvelopeBlockSize>(data, false);
        let buf_size = buf.len();

        self.enc.encrypt_padded_mut::<NoPadding>(&mut buf, buf_size).unwrap();

        buf
    }

    /// Decrypt the provided FUS ciphertext. The returned plain text will be
    /// PKCS#7 unpadded.
    pub fn decrypt(self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut plaintext = self.dec.decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(|_| CryptoError::CiphertextTooSmall)?;

        if !plaintext.is_empty() {
            let last_block_offset = plaintext.len() - EnvelopeBlockSize::USIZE;
            let last_block = &mut plaintext[last_block_offset..];
            let ga_last_block = GenericArray::<u8, EnvelopeBlockSize>::from_mut_slice(last_block);

            let plaintext_len = match Pkcs7::unpad(ga_last_block) {
                Ok(s) => s.len(),
                Err(_) => plaintext.len(), // Assume unpadded
            };

            plaintext.resize(plaintext_len, 0);
        }
        Ok(plaintext)
    }
}

/// Incremental decryptor for files delivered by FUS (AES-128-ECB).
///
/// Network chunk boundaries need not align with cipher block boundaries, so
/// the decryptor carries the partial trailing block between [`update`] calls
/// and additionally withholds the most recent decrypted block: the final
/// block of the stream is the only one that may carry PKCS#7 padding, and
/// which block is final is only known once [`finish`] is called. Memory use
/// is therefore bounded by two cipher blocks regardless of input size.
///
/// [`update`]: Self::update
/// [`finish`]: Self::finish
pub struct FileDecryptor {
    cipher: Aes128,
    carry: Vec<u8>,
    held: Option<GenericArray<u8, FileBlockSize>>,
}

impl FileDecryptor {
    /// Create a new decryptor for the specified 16-byte file key.
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            carry: Vec::with_capacity(2 * FileBlockSize::USIZE),
            held: None,
        }
    }

    /// Feed ciphertext into the decryptor, returning the plaintext that can
    /// be released so far. The result is empty until at least two full
    /// blocks have been seen in total.
    pub fn update(&mut self, chunk: &[u8]) -> Vec<u8> {
        let block_size = FileBlockSize::USIZE;

        self.carry.extend_from_slice(chunk);

        let full_bytes = self.carry.len() / block_size * block_size;
        if full_bytes == 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(full_bytes);
        if let Some(held) = self.held.take() {
            out.extend_from_slice(&held);
        }

        let rest = self.carry.split_off(full_bytes);

        for block in self.carry.chunks_exact_mut(block_size) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let (body, last) = self.carry.split_at(full_bytes - block_size);
        out.extend_from_slice(body);
        self.held = Some(GenericArray::clone_from_slice(last));

        self.carry = rest;

        out
    }

    /// Signal the end of the ciphertext, returning the remaining plaintext
    /// with trailing PKCS#7 padding removed. Padding that does not validate
    /// is assumed to be real data, same as the envelope cipher.
    pub fn finish(self) -> Result<Vec<u8>, CryptoError> {
        if !self.carry.is_empty() {
            return Err(CryptoError::TruncatedCiphertext);
        }

        match self.held {
            None => Ok(Vec::new()),
            Some(block) => {
                let plaintext_len = match Pkcs7::unpad(&block) {
                    Ok(s) => s.len(),
                    Err(_) => FileBlockSize::USIZE,
                };

                Ok(block[..plaintext_len].to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use cipher::BlockEncrypt;
    use cipher::generic_array::typenum::U4;
    use hex_literal::hex;

    use super::*;

    fn test_keys() -> FusKeys {
        FusKeys::new(
            b"testing_testing_testing_testing_",
            b"testing_testing_",
        ).unwrap()
    }

    /// Encrypt with AES-128-ECB the way FUS prepares delivered files.
    fn encrypt_file(key: &[u8; 16], data: &[u8], with_padding: bool) -> Vec<u8> {
        let block_size = FileBlockSize::USIZE;
        let cipher = Aes128::new(GenericArray::from_slice(key));

        let mut buf = data.to_vec();
        if with_padding {
            let pad_len = block_size - data.len() % block_size;
            buf.resize(data.len() + pad_len, pad_len as u8);
        }
        assert_eq!(buf.len() % block_size, 0);

        for block in buf.chunks_exact_mut(block_size) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }

        buf
    }

    #[test]
    fn test_pad() {
        let key = b"0123";
        assert_eq!(pad::<U4>(key, false), key);
        assert_eq!(pad::<U4>(key, true), key);

        let key = b"";
        assert_eq!(pad::<U4>(key, false), [4, 4, 4, 4]);
        assert_eq!(pad::<U4>(key, true), [4, 4, 4, 4]);

        let key = b"01234";
        assert_eq!(pad::<U4>(key, false), b"01234\x03\x03\x03");
        assert_eq!(pad::<U4>(key, true), b"0123");

        let key = b"01234567";
        assert_eq!(pad::<U4>(key, false), b"01234567");
        assert_eq!(pad::<U4>(key, true), b"0123");
    }

    #[test]
    fn test_flexible_key() {
        let keys = test_keys();

        assert_eq!(keys.flexible_key(b""), b"testing_testing_");
        assert_eq!(keys.flexible_key(b"abc"), b"esttesting_testing_");
    }

    #[test]
    fn test_nonce() {
        assert_matches!(Nonce::from_slice(b"testing_testing_"), Ok(_));
        assert_matches!(Nonce::from_slice(b"testing_testing"),
                        Err(CryptoError::InvalidNonceSize));
        assert_matches!(Nonce::from_slice(b"testing_testing_t"),
                        Err(CryptoError::InvalidNonceSize));

        assert_eq!(Nonce::from_slice(b"testing_testing_").unwrap().to_string(),
                   "testing_testing_");
        assert_eq!(Nonce::from_slice(b"\xffesting_testing_").unwrap().to_string(),
                   "[Non-UTF-8 data]");
    }

    #[test]
    fn test_decode_nonce() {
        let keys = test_keys();

        assert_matches!(keys.decode_nonce(b"yrJiFOygpIxnq4nbWdT2NLk1Odu8m5+zcFKQL4PzV0A="),
                        Ok(x) if x == Nonce::from_slice(b"testing_testing_").unwrap());
        assert_matches!(keys.decode_nonce(b"not base64!"),
                        Err(CryptoError::NonceDecode(_)));
    }

    #[test]
    fn test_derive_signature() {
        let keys = test_keys();
        let nonce = Nonce::from_slice(b"testing_testing_").unwrap();

        assert_eq!(keys.derive_signature(&nonce),
                   "9J2R5S8AAXs40SYA92cLHQfWDv/6w5cAeZkPOEDIFGw=");
    }

    #[test]
    fn test_logic_check() {
        use LogicCheckInput::*;

        let nonce = Nonce::from_slice(b"testing_testing_").unwrap();

        assert_eq!(nonce.logic_check(Data(b"abc")), "bcabacbabcabacba");
        assert_eq!(nonce.logic_check(Data(b"testing_testing_")), "intieg__intieg__");
        assert_eq!(nonce.logic_check(Data(b"")), "");

        assert_eq!(nonce.logic_check(Filename("abc")), "bcabacbabcabacba");
        assert_eq!(nonce.logic_check(Filename("testing_testing_.enc4")), "intieg__intieg__");
        assert_eq!(nonce.logic_check(Filename("testing_testing_testing_.enc4")), "intieg__intieg__");
    }

    #[test]
    fn test_file_keys() {
        let keys = test_keys();

        assert_eq!(keys.file_key_v2("G960FXXU1ASCD/G960FOXM1ASC1/G960FXXU1ASCD/G960FXXU1ASCD",
                                    "SM-G960F", "EUX"),
                   md5::compute(b"EUX:SM-G960F:G960FXXU1ASCD/G960FOXM1ASC1/G960FXXU1ASCD/G960FXXU1ASCD").0);

        // The logic value acts as the selector over the version field
        assert_eq!(keys.file_key_v4("abc", "testing_testing_").unwrap(),
                   md5::compute(b"bcabacbabcabacba").0);

        assert_matches!(keys.file_key_v4("abc", "short"),
                        Err(CryptoError::InvalidNonceSize));
    }

    #[test]
    fn test_encrypt() {
        // Key smaller than IV length
        assert_eq!(FusAes256::new(b"testing_").encrypt(b""),
                   hex!("ba575394750d7028b1ebf23bb82ad8978a2bb2183a0db9ca0d01f3f18c764eb4"));

        // Key equal to IV length
        assert_eq!(FusAes256::new(b"testing_testing_").encrypt(b""),
                   hex!("dd3b9041a4d4f8be4c6aa4cee25776670d3d7ce4383f68f65bbb037575beb7cd"));

        // Key equal to max key length
        assert_eq!(FusAes256::new(b"testing_testing_testing_testing_").encrypt(b""),
                   hex!("bccdc940c00de876757aa90693b01dab21ebefa70e46b4cb4ae2343b75c460d3"));

        // Key larger than max key length (truncation)
        assert_eq!(FusAes256::new(b"testing_testing_testing_testing_testing_").encrypt(b""),
                   hex!("bccdc940c00de876757aa90693b01dab21ebefa70e46b4cb4ae2343b75c460d3"));

        // Data equal to block size
        assert_eq!(FusAes256::new(b"testing_testing_testing_testing_testing_")
                       .encrypt(b"testing_testing_testing_testing_"),
                   hex!("cab26214eca0a48c67ab89db59d4f6341d9dee81cc7e31906d8161a9eb90aad6"));

        // Data not equal to block size
        assert_eq!(FusAes256::new(b"testing_testing_testing_testing_testing_")
                       .encrypt(b"testing_testing_"),
                   hex!("cab26214eca0a48c67ab89db59d4f634b93539dbbc9b9fb37052902f83f35740"));
    }

    #[test]
    fn test_decrypt() {
        // Empty ciphertext
        assert_matches!(FusAes256::new(b"testing_testing_").decrypt(b""),
                        Ok(x) if x == b"");

        // Ciphertext not multiple of block size
        assert_matches!(FusAes256::new(b"testing_testing_").decrypt(&[0]),
                        Err(CryptoError::CiphertextTooSmall));

        // Ciphertext with invalid padding should not be unpadded
        assert_matches!(FusAes256::new(b"testing_testing_")
                            .decrypt(&hex!("ea016b97268c45b6201797452df6c688ae6fe6a2b756275f4528464339aca48e")),
                        Ok(x) if x == hex!("74657374696e675f74657374696e675f10101010101010101010101010101002"));

        // Padding is correctly removed
        assert_matches!(FusAes256::new(b"testing_testing_")
                            .decrypt(&hex!("ea016b97268c45b6201797452df6c688a70500f3e18d557474c10a55758b07d9")),
                        Ok(x) if x == hex!("74657374696e675f74657374696e675f"));
    }

    #[test]
    fn test_file_decryptor_chunked() {
        let key = *b"0123456789abcdef";
        let plaintext: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let ciphertext = encrypt_file(&key, &plaintext, true);

        // Chunk boundaries that do and do not align with the cipher block
        // size must all yield identical output.
        for chunk_size in [1, 5, 16, 17, 32, 100, 1024] {
            let mut decryptor = FileDecryptor::new(&key);
            let mut out = Vec::new();

            for chunk in ciphertext.chunks(chunk_size) {
                out.extend_from_slice(&decryptor.update(chunk));
            }
            out.extend_from_slice(&decryptor.finish().unwrap());

            assert_eq!(out, plaintext, "chunk size {chunk_size}");
        }

        // Whole buffer in a single call
        let mut decryptor = FileDecryptor::new(&key);
        let mut out = decryptor.update(&ciphertext);
        out.extend_from_slice(&decryptor.finish().unwrap());
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_file_decryptor_unpadded_tail() {
        let key = *b"0123456789abcdef";
        let plaintext = b"testing_testing_testing_testing_";
        let ciphertext = encrypt_file(&key, plaintext, false);

        // The final block's last byte is not valid padding, so everything is
        // kept as data.
        let mut decryptor = FileDecryptor::new(&key);
        let mut out = decryptor.update(&ciphertext);
        out.extend_from_slice(&decryptor.finish().unwrap());
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_file_decryptor_truncated() {
        let key = *b"0123456789abcdef";

        let mut decryptor = FileDecryptor::new(&key);
        assert_eq!(decryptor.update(&[0u8; 17]), b"");
        assert_matches!(decryptor.finish(), Err(CryptoError::TruncatedCiphertext));

        // No input at all is fine
        let decryptor = FileDecryptor::new(&key);
        assert_matches!(decryptor.finish(), Ok(x) if x.is_empty());
    }
}
