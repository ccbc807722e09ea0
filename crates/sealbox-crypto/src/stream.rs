//! Chunked encrypted stream codec
//!
//! Wire format:
//! ```text
//! [4 bytes: "SBXS"][2 bytes: version, BE]
//! repeated:  [1][serialized EncryptedChunk]
//! trailer:   [0][4 bytes: sigLen, BE][global signature]
//! ```
//!
//! The global signature is an HMAC over every chunk signature in production
//! order, so dropping, duplicating or reordering whole chunk sections fails
//! verification even though each chunk still verifies on its own.

use std::io::{ErrorKind, Read, Write};

use sealbox_core::config::StreamConfig;
use tracing::debug;
use zeroize::Zeroizing;

use crate::chunk::{EncryptedChunk, CHUNK_HEADER_SIZE, MAX_SIGNATURE_LEN};
use crate::keys::SecretKeyPair;
use crate::mac::Signer;
use crate::progress::{NoProgress, ProgressListener};
use crate::provider;
use crate::{CryptoError, CryptoResult, IV_SIZE, SIGNATURE_SIZE};

/// Magic prefix opening every encrypted stream
pub const STREAM_MAGIC: &[u8; 4] = b"SBXS";

pub const STREAM_FORMAT_VERSION: u16 = 1;

/// Section type of the terminal global signature
pub const SECTION_SIGNATURE: u8 = 0;
/// Section type of an encrypted chunk
pub const SECTION_CHUNK: u8 = 1;

/// Upper bound accepted for `StreamOptions::max_chunk_size`
pub const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

const STREAM_HEADER_SIZE: u64 = (STREAM_MAGIC.len() + 2) as u64;
const STREAM_TRAILER_SIZE: u64 = 1 + 4 + SIGNATURE_SIZE as u64;
const AES_BLOCK_SIZE: u64 = 16;

/// Chunking and buffering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    max_chunk_size: usize,
    io_buffer_size: usize,
}

impl StreamOptions {
    pub fn new(max_chunk_size: usize, io_buffer_size: usize) -> CryptoResult<Self> {
        if max_chunk_size == 0 || max_chunk_size > MAX_CHUNK_SIZE {
            return Err(CryptoError::Unsupported(format!(
                "max chunk size must be in 1..={MAX_CHUNK_SIZE}, got {max_chunk_size}"
            )));
        }
        if io_buffer_size == 0 {
            return Err(CryptoError::Unsupported("zero I/O buffer size".into()));
        }
        Ok(Self {
            max_chunk_size,
            io_buffer_size,
        })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn io_buffer_size(&self) -> usize {
        self.io_buffer_size
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 4 * 1024 * 1024,
            io_buffer_size: 64 * 1024,
        }
    }
}

impl TryFrom<&StreamConfig> for StreamOptions {
    type Error = CryptoError;

    fn try_from(config: &StreamConfig) -> CryptoResult<Self> {
        Self::new(config.max_chunk_size, config.io_buffer_size)
    }
}

/// How a stream operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Completed { bytes: u64, chunks: u64 },
    /// Stopped on request; the output is truncated and must be discarded.
    Canceled { bytes: u64, chunks: u64 },
}

impl StreamStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamStatus::Completed { .. })
    }

    /// Clear bytes processed.
    pub fn bytes(&self) -> u64 {
        match *self {
            StreamStatus::Completed { bytes, .. } | StreamStatus::Canceled { bytes, .. } => bytes,
        }
    }

    pub fn chunks(&self) -> u64 {
        match *self {
            StreamStatus::Completed { chunks, .. } | StreamStatus::Canceled { chunks, .. } => {
                chunks
            }
        }
    }
}

/// Encrypt `clear` into `cipher`, one signed chunk per `max_chunk_size` bytes.
pub fn encrypt_stream<R, W>(
    clear: &mut R,
    cipher: &mut W,
    keys: &SecretKeyPair,
    options: &StreamOptions,
    listener: &dyn ProgressListener,
) -> CryptoResult<StreamStatus>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    cipher.write_all(STREAM_MAGIC)?;
    cipher.write_all(&STREAM_FORMAT_VERSION.to_be_bytes())?;
    let mut global = Signer::new(keys.signature_key())?;

    let mut buf = Zeroizing::new(vec![0u8; options.max_chunk_size]);
    let mut bytes = 0u64;
    let mut chunks = 0u64;

    loop {
        listener.pause_if_needed();
        if listener.is_canceled() {
            debug!(bytes, chunks, "stream encryption canceled");
            return Ok(StreamStatus::Canceled { bytes, chunks });
        }

        let n = read_full(clear, &mut buf)?;
        if n == 0 {
            break;
        }

        let chunk = EncryptedChunk::seal(keys, &buf[..n])?;
        if let Some(signature) = chunk.signature() {
            global.update(signature);
        }
        cipher.write_all(&[SECTION_CHUNK])?;
        chunk.write_to_buffered(cipher, options.io_buffer_size)?;

        bytes += n as u64;
        chunks += 1;
        listener.on_progress(bytes);
    }

    let signature = global.finish();
    cipher.write_all(&[SECTION_SIGNATURE])?;
    cipher.write_all(&(signature.len() as u32).to_be_bytes())?;
    cipher.write_all(&signature)?;
    cipher.flush()?;

    debug!(bytes, chunks, "encrypted stream");
    Ok(StreamStatus::Completed { bytes, chunks })
}

/// Verify and decrypt a stream produced by [`encrypt_stream`].
///
/// Plaintext of each verified chunk is written as soon as it is decrypted; a
/// failure on a later chunk or on the global signature means everything
/// already written must be discarded.
pub fn decrypt_stream<R, W>(
    cipher: &mut R,
    clear: &mut W,
    keys: &SecretKeyPair,
    options: &StreamOptions,
    listener: &dyn ProgressListener,
) -> CryptoResult<StreamStatus>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    read_header(cipher)?;
    let mut global = Signer::new(keys.signature_key())?;

    let mut bytes = 0u64;
    let mut chunks = 0u64;

    let expected = loop {
        listener.pause_if_needed();
        if listener.is_canceled() {
            debug!(bytes, chunks, "stream decryption canceled");
            return Ok(StreamStatus::Canceled { bytes, chunks });
        }

        let mut section = [0u8; 1];
        read_trailer_field(cipher, &mut section)?;

        match section[0] {
            SECTION_SIGNATURE => {
                let mut len = [0u8; 4];
                read_trailer_field(cipher, &mut len)?;
                let len = u32::from_be_bytes(len) as usize;
                if len > MAX_SIGNATURE_LEN {
                    return Err(CryptoError::Malformed(format!(
                        "global signature length {len} exceeds limit"
                    )));
                }
                let mut signature = vec![0u8; len];
                read_trailer_field(cipher, &mut signature)?;
                break signature;
            }
            SECTION_CHUNK => {
                let chunk = EncryptedChunk::read_from_buffered(cipher, options.io_buffer_size)?;
                let plaintext = Zeroizing::new(chunk.open(keys)?);
                if let Some(signature) = chunk.signature() {
                    global.update(signature);
                }
                for block in plaintext.chunks(options.io_buffer_size) {
                    clear.write_all(block)?;
                }

                bytes += plaintext.len() as u64;
                chunks += 1;
                listener.on_progress(bytes);
            }
            other => {
                return Err(CryptoError::Malformed(format!(
                    "wrong message section {other}"
                )));
            }
        }
    };

    if !provider::signatures_match(&global.finish(), &expected) {
        return Err(CryptoError::Tampered("global signature mismatch".into()));
    }
    if !at_end(cipher)? {
        return Err(CryptoError::Malformed(
            "data after global signature".into(),
        ));
    }
    clear.flush()?;

    debug!(bytes, chunks, "decrypted stream");
    Ok(StreamStatus::Completed { bytes, chunks })
}

/// Encrypt a whole buffer with default options.
pub fn encrypt_bytes(keys: &SecretKeyPair, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let options = StreamOptions::default();
    let mut out = Vec::with_capacity(estimated_encrypted_size(plaintext.len() as u64, &options) as usize);
    encrypt_stream(&mut &plaintext[..], &mut out, keys, &options, &NoProgress)?;
    Ok(out)
}

/// Decrypt a whole buffer produced by [`encrypt_bytes`] or [`encrypt_stream`].
pub fn decrypt_bytes(keys: &SecretKeyPair, data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    decrypt_stream(
        &mut &data[..],
        &mut out,
        keys,
        &StreamOptions::default(),
        &NoProgress,
    )?;
    Ok(out)
}

/// Exact size of the stream [`encrypt_stream`] produces for `clear_len` input bytes.
pub fn estimated_encrypted_size(clear_len: u64, options: &StreamOptions) -> u64 {
    let max = options.max_chunk_size as u64;
    let full = clear_len / max;
    let rest = clear_len % max;
    let mut total = STREAM_HEADER_SIZE + full * chunk_section_size(max);
    if rest > 0 {
        total += chunk_section_size(rest);
    }
    total + STREAM_TRAILER_SIZE
}

/// Upper bound on the clear bytes inside a `cipher_len`-byte stream written
/// with `options`; at most 15 bytes above the real length.
pub fn estimated_decrypted_size(cipher_len: u64, options: &StreamOptions) -> u64 {
    let max = options.max_chunk_size as u64;
    let full_section = chunk_section_size(max);
    let body = cipher_len.saturating_sub(STREAM_HEADER_SIZE + STREAM_TRAILER_SIZE);

    let full = body / full_section;
    let rest = body % full_section;
    let overhead = chunk_section_size(0) - AES_BLOCK_SIZE;
    let last = rest.saturating_sub(overhead + 1);
    full * max + last
}

/// Section bytes for one chunk of `plain` clear bytes.
fn chunk_section_size(plain: u64) -> u64 {
    1 + CHUNK_HEADER_SIZE as u64
        + SIGNATURE_SIZE as u64
        + IV_SIZE as u64
        + (plain / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE
}

fn read_header<R: Read + ?Sized>(reader: &mut R) -> CryptoResult<()> {
    let mut header = [0u8; 6];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CryptoError::Malformed("truncated stream header".into()),
        _ => CryptoError::Io(e),
    })?;
    if &header[..4] != STREAM_MAGIC {
        return Err(CryptoError::Malformed("bad stream prefix".into()));
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != STREAM_FORMAT_VERSION {
        return Err(CryptoError::Malformed(format!(
            "unsupported stream version {version}"
        )));
    }
    Ok(())
}

/// Section bytes and the trailer: running out here means sections were cut off.
fn read_trailer_field<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> CryptoResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CryptoError::Tampered("stream truncated".into()),
        _ => CryptoError::Io(e),
    })
}

fn at_end<R: Read + ?Sized>(reader: &mut R) -> CryptoResult<bool> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(n) => return Ok(n == 0),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Fill `buf` across short reads; returns fewer bytes only at end of input.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> CryptoResult<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::generate_key_pair;
    use std::cell::Cell;

    fn small(chunk: usize) -> StreamOptions {
        StreamOptions::new(chunk, 16).unwrap()
    }

    fn encrypt_with(keys: &SecretKeyPair, data: &[u8], options: &StreamOptions) -> Vec<u8> {
        let mut out = Vec::new();
        let status = encrypt_stream(&mut &data[..], &mut out, keys, options, &NoProgress).unwrap();
        assert!(status.is_completed());
        out
    }

    fn decrypt_with(
        keys: &SecretKeyPair,
        data: &[u8],
        options: &StreamOptions,
    ) -> CryptoResult<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream(&mut &data[..], &mut out, keys, options, &NoProgress)?;
        Ok(out)
    }

    /// Reader handing out at most 3 bytes per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    struct CancelAfter {
        reports: Cell<u32>,
        limit: u32,
    }

    impl ProgressListener for CancelAfter {
        fn on_progress(&self, _processed: u64) {
            self.reports.set(self.reports.get() + 1);
        }

        fn is_canceled(&self) -> bool {
            self.reports.get() >= self.limit
        }

        fn pause_if_needed(&self) {}
    }

    #[test]
    fn test_empty_input_roundtrip() {
        let keys = generate_key_pair().unwrap();
        let encrypted = encrypt_bytes(&keys, b"").unwrap();

        assert_eq!(&encrypted[..4], STREAM_MAGIC);
        assert_eq!(encrypted[6], SECTION_SIGNATURE);
        assert_eq!(encrypted.len() as u64, estimated_encrypted_size(0, &StreamOptions::default()));
        assert!(decrypt_bytes(&keys, &encrypted).unwrap().is_empty());
    }

    #[test]
    fn test_single_byte_roundtrip() {
        let keys = generate_key_pair().unwrap();
        let encrypted = encrypt_bytes(&keys, b"x").unwrap();
        assert_eq!(decrypt_bytes(&keys, &encrypted).unwrap(), b"x");
    }

    #[test]
    fn test_chunk_boundaries() {
        let keys = generate_key_pair().unwrap();
        let options = small(64);

        for len in [63usize, 64, 65, 127, 128, 129, 640] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encrypted = encrypt_with(&keys, &data, &options);

            assert_eq!(
                encrypted.len() as u64,
                estimated_encrypted_size(len as u64, &options),
                "size estimate for {len} bytes"
            );
            assert_eq!(decrypt_with(&keys, &encrypted, &options).unwrap(), data);
        }
    }

    #[test]
    fn test_short_reads_fill_chunks() {
        let keys = generate_key_pair().unwrap();
        let options = small(32);
        let data = vec![0x5Au8; 100];

        let mut out = Vec::new();
        let status =
            encrypt_stream(&mut Trickle(&data), &mut out, &keys, &options, &NoProgress).unwrap();

        assert_eq!(status, StreamStatus::Completed { bytes: 100, chunks: 4 });
        let mut clear = Vec::new();
        decrypt_stream(&mut Trickle(&out), &mut clear, &keys, &options, &NoProgress).unwrap();
        assert_eq!(clear, data);
    }

    #[test]
    fn test_progress_reports_running_total() {
        let keys = generate_key_pair().unwrap();
        let control = crate::progress::StreamControl::new();
        let mut out = Vec::new();

        encrypt_stream(&mut &[1u8; 100][..], &mut out, &keys, &small(40), &control).unwrap();
        assert_eq!(control.processed(), 100);
    }

    #[test]
    fn test_cancel_stops_between_chunks() {
        let keys = generate_key_pair().unwrap();
        let listener = CancelAfter {
            reports: Cell::new(0),
            limit: 2,
        };
        let mut out = Vec::new();

        let status =
            encrypt_stream(&mut &[0u8; 1000][..], &mut out, &keys, &small(100), &listener).unwrap();

        assert_eq!(status, StreamStatus::Canceled { bytes: 200, chunks: 2 });
        assert!(!status.is_completed());
        assert!(decrypt_with(&keys, &out, &small(100)).is_err());
    }

    #[test]
    fn test_cancel_during_decryption() {
        let keys = generate_key_pair().unwrap();
        let options = small(64);
        let data: Vec<u8> = (0..=255u8).collect();
        let encrypted = encrypt_with(&keys, &data, &options);

        let listener = CancelAfter {
            reports: Cell::new(0),
            limit: 1,
        };
        let mut out = Vec::new();
        let status =
            decrypt_stream(&mut &encrypted[..], &mut out, &keys, &options, &listener).unwrap();

        assert_eq!(status, StreamStatus::Canceled { bytes: 64, chunks: 1 });
        assert_eq!(out, &data[..64]);
    }

    #[test]
    fn test_decrypted_size_bound() {
        let options = small(64);
        for len in [0u64, 1, 15, 16, 17, 63, 64, 65, 128, 200, 1000] {
            let bound = estimated_decrypted_size(estimated_encrypted_size(len, &options), &options);
            assert!(
                (len..=len + 15).contains(&bound),
                "bound {bound} for {len} clear bytes"
            );
        }
    }

    #[test]
    fn test_cancel_before_start() {
        let keys = generate_key_pair().unwrap();
        let control = crate::progress::StreamControl::new();
        control.cancel();
        let mut out = Vec::new();

        let status =
            encrypt_stream(&mut &b"data"[..], &mut out, &keys, &small(16), &control).unwrap();
        assert_eq!(status, StreamStatus::Canceled { bytes: 0, chunks: 0 });
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_bad_prefix_and_version() {
        let keys = generate_key_pair().unwrap();
        let encrypted = encrypt_bytes(&keys, b"abc").unwrap();

        let mut bad_prefix = encrypted.clone();
        bad_prefix[0] = b'X';
        assert!(matches!(
            decrypt_bytes(&keys, &bad_prefix),
            Err(CryptoError::Malformed(_))
        ));

        let mut bad_version = encrypted;
        bad_version[5] = 9;
        let err = decrypt_bytes(&keys, &bad_version).unwrap_err();
        assert!(err.to_string().contains("unsupported stream version 9"));
    }

    #[test]
    fn test_unknown_section_type() {
        let keys = generate_key_pair().unwrap();
        let mut encrypted = encrypt_bytes(&keys, b"abc").unwrap();
        encrypted[6] = 7;

        let err = decrypt_bytes(&keys, &encrypted).unwrap_err();
        assert!(err.to_string().contains("wrong message section"));
    }

    #[test]
    fn test_missing_trailer_is_truncation() {
        let keys = generate_key_pair().unwrap();
        let encrypted = encrypt_bytes(&keys, b"abc").unwrap();
        let without_trailer = &encrypted[..encrypted.len() - (1 + 4 + SIGNATURE_SIZE)];

        let err = decrypt_bytes(&keys, without_trailer).unwrap_err();
        assert!(matches!(err, CryptoError::Tampered(ref m) if m == "stream truncated"));
    }

    #[test]
    fn test_trailing_data_rejected() {
        let keys = generate_key_pair().unwrap();
        let mut encrypted = encrypt_bytes(&keys, b"abc").unwrap();
        encrypted.push(0);

        assert!(matches!(
            decrypt_bytes(&keys, &encrypted),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_global_signature_tamper() {
        let keys = generate_key_pair().unwrap();
        let mut encrypted = encrypt_bytes(&keys, b"abc").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x80;

        assert!(matches!(
            decrypt_bytes(&keys, &encrypted),
            Err(CryptoError::Tampered(_))
        ));
    }

    #[test]
    fn test_options_validation() {
        assert!(StreamOptions::new(0, 16).is_err());
        assert!(StreamOptions::new(MAX_CHUNK_SIZE + 1, 16).is_err());
        assert!(StreamOptions::new(1024, 0).is_err());
        assert!(StreamOptions::new(MAX_CHUNK_SIZE, 1).is_ok());

        let from_config = StreamOptions::try_from(&StreamConfig::default()).unwrap();
        assert_eq!(from_config, StreamOptions::default());
    }
}
