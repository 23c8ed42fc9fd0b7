//! Media decryption.
//!
//! Media blobs are XORed against a keystream derived from a per-item key.
//! The keystream is at least the default length and grows to cover
//! longer blobs, so every byte of the blob is decrypted.
//!
//! Images are decrypted in memory and tagged with a sniffed extension.
//! Video is decrypted chunk by chunk into a caller-chosen cache file and
//! referenced by path. The file is written under a `.part` name and only
//! moved into place once complete, so a failed run never leaves a
//! truncated cache entry. Thumbnails and transcoding belong to the caller.

mod fetch;
pub mod sniff;

pub use fetch::{FileFetcher, MediaFetcher};
pub use sniff::{detect_image_ext, detect_video_ext, mime_for_ext, DEFAULT_IMAGE_EXT};

use crate::error::{Error, Result};
use crate::keystream::{Keystream, KeystreamGenerator};
use crate::logging::{RedactedBytes, RedactedKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Chunk size for file-backed decryption.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Extension used for video output.
pub const DEFAULT_VIDEO_EXT: &str = ".mp4";

/// XOR `data` against the start of `keystream`, in place.
///
/// The keystream must be at least as long as the data.
pub fn xor_in_place(data: &mut [u8], keystream: &[u8]) -> Result<()> {
    if keystream.len() < data.len() {
        return Err(Error::Media(format!(
            "keystream of {} bytes cannot cover {} bytes",
            keystream.len(),
            data.len()
        )));
    }
    for (byte, k) in data.iter_mut().zip(keystream) {
        *byte ^= k;
    }
    Ok(())
}

/// XOR `data` against `keystream` into a new buffer. Applying it twice
/// returns the original bytes.
pub fn xor_keystream(data: &[u8], keystream: &[u8]) -> Result<Vec<u8>> {
    let mut out = data.to_vec();
    xor_in_place(&mut out, keystream)?;
    Ok(out)
}

/// Kind of media being decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image, decrypted in memory.
    Image,
    /// Video, decrypted to a cache file.
    Video,
}

/// Where decrypted bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// In-memory plaintext.
    Bytes(Vec<u8>),
    /// Plaintext written to this file.
    File(PathBuf),
}

/// Result of a successful decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMedia {
    /// Media kind.
    pub kind: MediaKind,
    /// Decrypted bytes or their location.
    pub payload: MediaPayload,
    /// Extension detected from magic bytes, if any matched.
    pub detected_ext: Option<&'static str>,
}

impl DecryptedMedia {
    /// Extension to cache or display under; falls back to the kind's
    /// default when no signature matched.
    pub fn extension(&self) -> &'static str {
        self.detected_ext.unwrap_or(match self.kind {
            MediaKind::Image => DEFAULT_IMAGE_EXT,
            MediaKind::Video => DEFAULT_VIDEO_EXT,
        })
    }

    /// Whether the format was recognised.
    pub fn format_known(&self) -> bool {
        self.detected_ext.is_some()
    }

    /// In-memory plaintext, for images.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            MediaPayload::Bytes(b) => Some(b),
            MediaPayload::File(_) => None,
        }
    }

    /// Output path, for video.
    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            MediaPayload::File(p) => Some(p),
            MediaPayload::Bytes(_) => None,
        }
    }
}

/// A media item to fetch and decrypt.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    /// Reference handed to the fetcher.
    pub url: String,
    /// Decryption key, when the item has one.
    pub key: Option<String>,
    /// Media kind.
    pub kind: MediaKind,
    /// Output file for video.
    pub cache_path: Option<PathBuf>,
}

/// Outcome of [`MediaDecryptor::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Media was fetched and decrypted.
    Decrypted(DecryptedMedia),
    /// The fetch failed; the caller should show the original reference.
    Fallback {
        /// The reference that could not be fetched.
        original_url: String,
    },
}

/// Decrypts media blobs with keystreams from a shared generator.
pub struct MediaDecryptor {
    keystreams: Arc<KeystreamGenerator>,
    fetcher: Arc<dyn MediaFetcher>,
}

impl MediaDecryptor {
    /// Create a decryptor reading local files.
    pub fn new(keystreams: Arc<KeystreamGenerator>) -> Self {
        Self::with_fetcher(keystreams, Arc::new(FileFetcher::new()))
    }

    /// Create a decryptor with a custom fetch collaborator.
    pub fn with_fetcher(keystreams: Arc<KeystreamGenerator>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            keystreams,
            fetcher,
        }
    }

    /// Keystream covering `len` bytes: never shorter than the default.
    async fn keystream_for(&self, key: &str, len: usize) -> Result<Keystream> {
        let length = len.max(self.keystreams.default_len());
        self.keystreams.generate(key, length).await
    }

    /// Decrypt in-memory bytes.
    pub async fn decrypt_bytes(&self, cipher: &[u8], key: &str) -> Result<Vec<u8>> {
        if key.trim().is_empty() {
            return Err(Error::KeyMissing);
        }
        if cipher.is_empty() {
            return Ok(Vec::new());
        }
        let keystream = self.keystream_for(key, cipher.len()).await?;
        xor_keystream(cipher, keystream.as_bytes())
    }

    /// Decrypt an image and sniff its format.
    pub async fn decrypt_image(&self, cipher: &[u8], key: &str) -> Result<DecryptedMedia> {
        let plain = self.decrypt_bytes(cipher, key).await?;
        let detected_ext = detect_image_ext(&plain);
        if detected_ext.is_none() {
            debug!(size = %RedactedBytes(&plain), "unrecognised image format, using default extension");
        }
        Ok(DecryptedMedia {
            kind: MediaKind::Image,
            payload: MediaPayload::Bytes(plain),
            detected_ext,
        })
    }

    /// Decrypt one blob of either kind. Video needs `video_dest`.
    pub async fn decrypt(
        &self,
        cipher: &[u8],
        key: &str,
        kind: MediaKind,
        video_dest: Option<&Path>,
    ) -> Result<DecryptedMedia> {
        match kind {
            MediaKind::Image => self.decrypt_image(cipher, key).await,
            MediaKind::Video => {
                let dest = video_dest.ok_or_else(|| {
                    Error::InvalidInput("video decryption needs a cache path".into())
                })?;
                self.decrypt_video_to(cipher, key, dest).await
            }
        }
    }

    /// Decrypt video bytes into `dest`.
    pub async fn decrypt_video_to(
        &self,
        cipher: &[u8],
        key: &str,
        dest: &Path,
    ) -> Result<DecryptedMedia> {
        let keystream = self.keystream_for(key, cipher.len()).await?;
        let mut out = PartialOutput::create(dest).await?;

        match write_decrypted(cipher, keystream.as_bytes(), &mut out).await {
            Ok(header) => {
                out.commit().await?;
                Ok(video_result(dest, &header))
            }
            Err(e) => {
                out.discard().await;
                Err(e)
            }
        }
    }

    /// Decrypt a video file on disk into `dest`, streaming both ends.
    pub async fn decrypt_video_file(
        &self,
        src: &Path,
        key: &str,
        dest: &Path,
    ) -> Result<DecryptedMedia> {
        let mut input = tokio::fs::File::open(src)
            .await
            .map_err(|e| Error::Media(format!("{}: {}", src.display(), e)))?;
        let size = input
            .metadata()
            .await
            .map_err(|e| Error::Media(e.to_string()))?
            .len();
        let size = usize::try_from(size)
            .map_err(|_| Error::InvalidInput("video too large".into()))?;

        let keystream = self.keystream_for(key, size).await?;
        let mut out = PartialOutput::create(dest).await?;

        match copy_decrypted(&mut input, keystream.as_bytes(), &mut out).await {
            Ok(header) => {
                out.commit().await?;
                Ok(video_result(dest, &header))
            }
            Err(e) => {
                out.discard().await;
                Err(e)
            }
        }
    }

    /// Fetch and decrypt one media item.
    ///
    /// A failed fetch degrades to [`MediaOutcome::Fallback`]. A missing key
    /// or a decryption failure is returned as an error; nothing is retried.
    pub async fn resolve(&self, request: &MediaRequest) -> Result<MediaOutcome> {
        let cipher = match self.fetcher.fetch(&request.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "media fetch failed, falling back to original reference");
                return Ok(MediaOutcome::Fallback {
                    original_url: request.url.clone(),
                });
            }
        };

        let key = request
            .key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(Error::KeyMissing)?;

        let media = self
            .decrypt(&cipher, key, request.kind, request.cache_path.as_deref())
            .await;

        match media {
            Ok(media) => {
                debug!(key = %RedactedKey(key), kind = ?media.kind, ext = media.extension(), "decrypted media");
                Ok(MediaOutcome::Decrypted(media))
            }
            Err(e) => {
                warn!(error = %e, kind = ?request.kind, "media decryption failed");
                Err(e)
            }
        }
    }
}

/// Bytes of decrypted output kept for format sniffing.
const HEADER_LEN: usize = 16;

/// Cache file written beside its destination as `<dest>.part`.
struct PartialOutput {
    file: tokio::fs::File,
    part: PathBuf,
    dest: PathBuf,
}

impl PartialOutput {
    async fn create(dest: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Media(format!("cannot create cache directory: {}", e)))?;
        }
        let part = part_path(dest);
        let file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| Error::Media(format!("{}: {}", part.display(), e)))?;
        Ok(Self {
            file,
            part,
            dest: dest.to_path_buf(),
        })
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .await
            .map_err(|e| Error::Media(format!("cache write failed: {}", e)))
    }

    /// Flush and move the finished file to its destination.
    async fn commit(mut self) -> Result<()> {
        let flushed = self
            .file
            .flush()
            .await
            .map_err(|e| Error::Media(format!("cache flush failed: {}", e)));
        if let Err(e) = flushed {
            self.discard().await;
            return Err(e);
        }

        let Self { file, part, dest } = self;
        drop(file);
        if let Err(e) = tokio::fs::rename(&part, &dest).await {
            remove_part(&part).await;
            return Err(Error::Media(format!(
                "cannot move {} into place: {}",
                dest.display(),
                e
            )));
        }
        Ok(())
    }

    /// Drop the unfinished file.
    async fn discard(self) {
        let Self { file, part, .. } = self;
        drop(file);
        remove_part(&part).await;
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_part(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        warn!(path = %part.display(), error = %e, "cannot remove partial cache file");
    }
}

/// Decrypt in-memory ciphertext chunk by chunk into `out`, returning the
/// leading plaintext bytes.
async fn write_decrypted(cipher: &[u8], keystream: &[u8], out: &mut PartialOutput) -> Result<Vec<u8>> {
    let mut header = Vec::new();
    for (offset, chunk) in (0..).step_by(CHUNK_SIZE).zip(cipher.chunks(CHUNK_SIZE)) {
        let mut plain = chunk.to_vec();
        let stream = keystream
            .get(offset..)
            .ok_or_else(|| Error::Media("keystream ended early".into()))?;
        xor_in_place(&mut plain, stream)?;
        if offset == 0 {
            header = plain.iter().take(HEADER_LEN).copied().collect();
        }
        out.write(&plain).await?;
    }
    Ok(header)
}

/// Stream `input` through the keystream into `out`, returning the leading
/// plaintext bytes.
async fn copy_decrypted(
    input: &mut tokio::fs::File,
    keystream: &[u8],
    out: &mut PartialOutput,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut offset = 0usize;
    let mut header = Vec::new();
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| Error::Media(format!("read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        let end = offset + n;
        let stream = keystream
            .get(offset..end)
            .ok_or_else(|| Error::Media("source grew while decrypting".into()))?;
        xor_in_place(&mut buf[..n], stream)?;
        let missing = HEADER_LEN.saturating_sub(header.len());
        header.extend(buf[..n].iter().take(missing));
        out.write(&buf[..n]).await?;
        offset = end;
    }
    Ok(header)
}

fn video_result(dest: &Path, header: &[u8]) -> DecryptedMedia {
    DecryptedMedia {
        kind: MediaKind::Video,
        payload: MediaPayload::File(dest.to_path_buf()),
        detected_ext: detect_video_ext(header),
    }
}
