//! Encrypted chunk codec
//!
//! Binary layout (all integers big-endian):
//! ```text
//! [4 bytes: "SBXC"][2 bytes: version]
//! [4 bytes: sigLen][sigLen bytes: HMAC-SHA256 signature, absent when 0]
//! [4 bytes: ivLen ][ivLen bytes: AES-CBC IV]
//! [4 bytes: dataLen][dataLen bytes: ciphertext]
//! ```
//!
//! The signature covers `len(iv) || iv || len(ciphertext) || ciphertext` so that
//! moving bytes between the two fields changes the signed input.

use std::io::{Read, Write};

use crate::keys::{SecretKeyPair, SignatureKey};
use crate::mac::Signer;
use crate::provider::{self, Encrypted};
use crate::{CryptoError, CryptoResult};

/// Magic prefix opening every chunk
pub const CHUNK_MAGIC: &[u8; 4] = b"SBXC";

/// Only chunk format version this codec reads or writes
pub const CHUNK_FORMAT_VERSION: u16 = 1;

/// Fixed bytes per chunk besides the three variable fields
pub const CHUNK_HEADER_SIZE: usize = CHUNK_MAGIC.len() + 2 + 3 * 4;

/// Default block size for buffered reads and writes
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

pub const MAX_SIGNATURE_LEN: usize = 1024;
pub const MAX_IV_LEN: usize = 256;
pub const MAX_CIPHERTEXT_LEN: usize = 64 * 1024 * 1024;

/// One unit of ciphertext with its IV and per-chunk signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    version: u16,
    signature: Option<Vec<u8>>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl EncryptedChunk {
    /// An unsigned chunk.
    pub fn new(iv: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            version: CHUNK_FORMAT_VERSION,
            signature: None,
            iv,
            ciphertext,
        }
    }

    /// Encrypt `plaintext` under a fresh IV and sign the result.
    pub fn seal(keys: &SecretKeyPair, plaintext: &[u8]) -> CryptoResult<Self> {
        let Encrypted { iv, ciphertext } = provider::encrypt(keys.encryption_key(), plaintext)?;
        Self::new(iv, ciphertext).sign(keys.signature_key())
    }

    /// Verify the signature, then decrypt. Never decrypts an unverified chunk.
    pub fn open(&self, keys: &SecretKeyPair) -> CryptoResult<Vec<u8>> {
        if !self.verify(keys.signature_key()) {
            return Err(CryptoError::Tampered("chunk signature mismatch".into()));
        }
        provider::decrypt(keys.encryption_key(), &self.iv, &self.ciphertext)
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Both IV and ciphertext present.
    pub fn is_complete(&self) -> bool {
        !self.iv.is_empty() && !self.ciphertext.is_empty()
    }

    pub fn serialized_len(&self) -> usize {
        CHUNK_HEADER_SIZE
            + self.signature.as_ref().map_or(0, Vec::len)
            + self.iv.len()
            + self.ciphertext.len()
    }

    /// Full binary layout, or `None` when the IV or ciphertext is missing.
    pub fn serialize(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.serialized_len());
        self.write_to(&mut out).ok()?;
        Some(out)
    }

    /// Parse exactly one chunk; trailing bytes are rejected.
    pub fn parse(bytes: &[u8]) -> CryptoResult<Self> {
        let mut cursor = bytes;
        let chunk = Self::read_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CryptoError::Malformed(format!(
                "{} trailing bytes after chunk",
                cursor.len()
            )));
        }
        Ok(chunk)
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> CryptoResult<Self> {
        Self::read_from_buffered(reader, DEFAULT_BLOCK_SIZE)
    }

    /// Read one chunk, pulling the ciphertext in `block_size` pieces.
    ///
    /// Memory grows only as ciphertext actually arrives, so a forged length
    /// field cannot force a large allocation up front.
    pub fn read_from_buffered<R: Read + ?Sized>(
        reader: &mut R,
        block_size: usize,
    ) -> CryptoResult<Self> {
        if block_size == 0 {
            return Err(CryptoError::Unsupported("zero block size".into()));
        }

        let mut magic = [0u8; 4];
        read_exact_field(reader, &mut magic, "chunk prefix")?;
        if &magic != CHUNK_MAGIC {
            return Err(CryptoError::Malformed("bad chunk prefix".into()));
        }

        let mut version = [0u8; 2];
        read_exact_field(reader, &mut version, "chunk version")?;
        let version = u16::from_be_bytes(version);
        if version != CHUNK_FORMAT_VERSION {
            return Err(CryptoError::Malformed(format!(
                "unsupported chunk version {version}"
            )));
        }

        let sig_len = read_len(reader, "signature", MAX_SIGNATURE_LEN)?;
        let signature = read_blocks(reader, sig_len, block_size, "signature")?;
        let iv_len = read_len(reader, "iv", MAX_IV_LEN)?;
        let iv = read_blocks(reader, iv_len, block_size, "iv")?;
        let data_len = read_len(reader, "ciphertext", MAX_CIPHERTEXT_LEN)?;
        let ciphertext = read_blocks(reader, data_len, block_size, "ciphertext")?;

        Ok(Self {
            version,
            signature: (!signature.is_empty()).then_some(signature),
            iv,
            ciphertext,
        })
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> CryptoResult<()> {
        self.write_to_buffered(writer, DEFAULT_BLOCK_SIZE)
    }

    /// Write the chunk, emitting the ciphertext in `block_size` pieces, then flush.
    pub fn write_to_buffered<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        block_size: usize,
    ) -> CryptoResult<()> {
        if !self.is_complete() {
            return Err(CryptoError::Malformed(
                "chunk has no IV or ciphertext".into(),
            ));
        }
        if block_size == 0 {
            return Err(CryptoError::Unsupported("zero block size".into()));
        }

        let signature = self.signature.as_deref().unwrap_or_default();
        let mut header = Vec::with_capacity(CHUNK_HEADER_SIZE + signature.len() + self.iv.len());
        header.extend_from_slice(CHUNK_MAGIC);
        header.extend_from_slice(&self.version.to_be_bytes());
        header.extend_from_slice(&encode_len(signature.len(), "signature", MAX_SIGNATURE_LEN)?);
        header.extend_from_slice(signature);
        header.extend_from_slice(&encode_len(self.iv.len(), "iv", MAX_IV_LEN)?);
        header.extend_from_slice(&self.iv);
        header.extend_from_slice(&encode_len(
            self.ciphertext.len(),
            "ciphertext",
            MAX_CIPHERTEXT_LEN,
        )?);
        writer.write_all(&header)?;

        for block in self.ciphertext.chunks(block_size) {
            writer.write_all(block)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Attach the signature over the IV and ciphertext.
    pub fn sign(mut self, key: &SignatureKey) -> CryptoResult<Self> {
        self.signature = Some(self.compute_signature(key)?);
        Ok(self)
    }

    /// Recompute the signature and compare in constant time.
    pub fn verify(&self, key: &SignatureKey) -> bool {
        if !self.is_complete() {
            return false;
        }
        let Some(reference) = self.signature.as_deref() else {
            return false;
        };
        match self.compute_signature(key) {
            Ok(computed) => provider::signatures_match(&computed, reference),
            Err(_) => false,
        }
    }

    fn compute_signature(&self, key: &SignatureKey) -> CryptoResult<Vec<u8>> {
        let mut signer = Signer::new(key)?;
        signer.update(&encode_len(self.iv.len(), "iv", MAX_IV_LEN)?);
        signer.update(&self.iv);
        signer.update(&encode_len(
            self.ciphertext.len(),
            "ciphertext",
            MAX_CIPHERTEXT_LEN,
        )?);
        signer.update(&self.ciphertext);
        Ok(signer.finish())
    }
}

fn encode_len(len: usize, field: &str, max: usize) -> CryptoResult<[u8; 4]> {
    if len > max {
        return Err(CryptoError::Malformed(format!(
            "{field} length {len} exceeds limit {max}"
        )));
    }
    let len = u32::try_from(len)
        .map_err(|_| CryptoError::Malformed(format!("{field} length {len} overflows u32")))?;
    Ok(len.to_be_bytes())
}

fn read_len<R: Read + ?Sized>(reader: &mut R, field: &str, max: usize) -> CryptoResult<usize> {
    let mut buf = [0u8; 4];
    read_exact_field(reader, &mut buf, field)?;
    let len = u32::from_be_bytes(buf) as usize;
    if len > max {
        return Err(CryptoError::Malformed(format!(
            "{field} length {len} exceeds limit {max}"
        )));
    }
    Ok(len)
}

fn read_blocks<R: Read + ?Sized>(
    reader: &mut R,
    len: usize,
    block_size: usize,
    field: &str,
) -> CryptoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(len.min(block_size));
    let mut block = vec![0u8; len.min(block_size)];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(block_size);
        read_exact_field(reader, &mut block[..n], field)?;
        out.extend_from_slice(&block[..n]);
        remaining -= n;
    }
    Ok(out)
}

/// `read_exact`, reporting a producer that ended early as a truncated field.
fn read_exact_field<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    field: &str,
) -> CryptoResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CryptoError::Malformed(format!("truncated chunk: {field}"))
        } else {
            CryptoError::Io(e)
        }
    })
}
