//! Media decryption end to end with a fixture keystream module.

mod common;

use chatlens_core::media::{
    xor_keystream, MediaDecryptor, MediaKind, MediaOutcome, MediaRequest, CHUNK_SIZE,
};
use chatlens_core::Error;
use common::{generator, reference_keystream, REFERENCE_WAT};

const KEY: &str = "9f8e7d6c5b4a";
const DEFAULT_LEN: usize = 131_072;

/// Encrypt the way the client does: XOR with a keystream of at least the
/// default length.
fn encrypt(plain: &[u8], key: &str) -> Vec<u8> {
    let keystream = reference_keystream(key, plain.len().max(DEFAULT_LEN));
    xor_keystream(plain, &keystream).expect("xor")
}

fn decryptor() -> MediaDecryptor {
    MediaDecryptor::new(generator(REFERENCE_WAT))
}

fn jpeg_plaintext(len: usize) -> Vec<u8> {
    let mut plain = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    plain.extend((0..len.saturating_sub(plain.len())).map(|i| (i % 251) as u8));
    plain
}

#[tokio::test]
async fn test_round_trip_bytes() {
    let plain = b"The quick brown fox jumps over the lazy dog".to_vec();
    let cipher = encrypt(&plain, KEY);
    assert_ne!(cipher, plain);

    let decrypted = decryptor().decrypt_bytes(&cipher, KEY).await.expect("decrypt");
    assert_eq!(decrypted, plain);
}

#[tokio::test]
async fn test_image_sniffing() {
    let decryptor = decryptor();

    let jpeg = decryptor
        .decrypt_image(&encrypt(&jpeg_plaintext(2048), KEY), KEY)
        .await
        .expect("jpeg");
    assert_eq!(jpeg.detected_ext, Some(".jpg"));
    assert_eq!(jpeg.kind, MediaKind::Image);

    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    png.extend_from_slice(b"\x00\x00\x00\x0dIHDR");
    let png = decryptor
        .decrypt_image(&encrypt(&png, KEY), KEY)
        .await
        .expect("png");
    assert_eq!(png.detected_ext, Some(".png"));

    let unknown = decryptor
        .decrypt_image(&encrypt(b"plain text, not an image", KEY), KEY)
        .await
        .expect("unknown");
    assert!(!unknown.format_known());
    assert_eq!(unknown.extension(), ".jpg");
}

#[tokio::test]
async fn test_blob_longer_than_default_keystream() {
    let plain = jpeg_plaintext(DEFAULT_LEN + 5_000);
    let cipher = encrypt(&plain, KEY);

    let media = decryptor().decrypt_image(&cipher, KEY).await.expect("decrypt");
    assert_eq!(media.bytes(), Some(plain.as_slice()));
}

#[tokio::test]
async fn test_wrong_key_garbles() {
    let plain = jpeg_plaintext(64);
    let cipher = encrypt(&plain, KEY);

    let media = decryptor()
        .decrypt_image(&cipher, "some-other-key")
        .await
        .expect("decrypt");
    assert_ne!(media.bytes(), Some(plain.as_slice()));
}

#[tokio::test]
async fn test_video_streams_to_cache_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plain = vec![0x00, 0x00, 0x00, 0x20, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm'];
    plain.extend((0..3 * CHUNK_SIZE + 17).map(|i| (i % 253) as u8));
    let cipher = encrypt(&plain, KEY);

    let dest = dir.path().join("video").join("clip.mp4");
    let media = decryptor()
        .decrypt_video_to(&cipher, KEY, &dest)
        .await
        .expect("decrypt");

    assert_eq!(media.kind, MediaKind::Video);
    assert_eq!(media.extension(), ".mp4");
    assert!(media.format_known());
    assert_eq!(media.path(), Some(dest.as_path()));
    assert_eq!(std::fs::read(&dest).expect("read back"), plain);
    assert!(!dir.path().join("video").join("clip.mp4.part").exists());
}

#[tokio::test]
async fn test_video_file_to_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plain: Vec<u8> = (0..CHUNK_SIZE + 100).map(|i| (i % 7) as u8).collect();
    let src = dir.path().join("clip.enc");
    std::fs::write(&src, encrypt(&plain, KEY)).expect("write");

    let dest = dir.path().join("clip.out");
    let media = decryptor()
        .decrypt_video_file(&src, KEY, &dest)
        .await
        .expect("decrypt");

    assert!(!media.format_known());
    assert_eq!(std::fs::read(&dest).expect("read back"), plain);
}

#[tokio::test]
async fn test_failed_video_leaves_no_cache_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Opens fine but every read fails, after the output has been created.
    let src = dir.path().join("not-a-file");
    std::fs::create_dir(&src).expect("mkdir");

    let dest = dir.path().join("cache").join("clip.mp4");
    let err = decryptor()
        .decrypt_video_file(&src, KEY, &dest)
        .await
        .expect_err("unreadable source");
    assert!(matches!(err, Error::Media(_)), "got {:?}", err);
    assert!(!dest.exists());
    assert!(!dir.path().join("cache").join("clip.mp4.part").exists());
}

#[tokio::test]
async fn test_failed_video_keeps_previous_cache_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("not-a-file");
    std::fs::create_dir(&src).expect("mkdir");

    let dest = dir.path().join("clip.mp4");
    std::fs::write(&dest, b"complete earlier output").expect("write");

    decryptor()
        .decrypt_video_file(&src, KEY, &dest)
        .await
        .expect_err("unreadable source");
    assert_eq!(std::fs::read(&dest).expect("read"), b"complete earlier output");
}

#[tokio::test]
async fn test_blank_key_rejected_for_empty_blob() {
    for key in ["", "  \t"] {
        let err = decryptor().decrypt_bytes(&[], key).await.expect_err("blank key");
        assert!(matches!(err, Error::KeyMissing));
    }
    let empty = decryptor().decrypt_bytes(&[], KEY).await.expect("empty blob");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_resolve_decrypts_fetched_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plain = jpeg_plaintext(512);
    let src = dir.path().join("img.dat");
    std::fs::write(&src, encrypt(&plain, KEY)).expect("write");

    let outcome = decryptor()
        .resolve(&MediaRequest {
            url: format!("file://{}", src.display()),
            key: Some(KEY.to_string()),
            kind: MediaKind::Image,
            cache_path: None,
        })
        .await
        .expect("resolve");

    match outcome {
        MediaOutcome::Decrypted(media) => assert_eq!(media.bytes(), Some(plain.as_slice())),
        other => panic!("expected decrypted media, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resolve_falls_back_when_fetch_fails() {
    let outcome = decryptor()
        .resolve(&MediaRequest {
            url: "/nonexistent/media/img.dat".to_string(),
            key: Some(KEY.to_string()),
            kind: MediaKind::Image,
            cache_path: None,
        })
        .await
        .expect("fallback is not an error");

    assert_eq!(
        outcome,
        MediaOutcome::Fallback {
            original_url: "/nonexistent/media/img.dat".to_string()
        }
    );
}

#[tokio::test]
async fn test_resolve_without_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("img.dat");
    std::fs::write(&src, b"cipher").expect("write");

    for key in [None, Some("   ".to_string())] {
        let err = decryptor()
            .resolve(&MediaRequest {
                url: src.display().to_string(),
                key,
                kind: MediaKind::Image,
                cache_path: None,
            })
            .await
            .expect_err("no key");
        assert!(matches!(err, Error::KeyMissing));
    }
}

#[tokio::test]
async fn test_resolve_video_needs_cache_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("clip.dat");
    std::fs::write(&src, b"cipher").expect("write");

    let err = decryptor()
        .resolve(&MediaRequest {
            url: src.display().to_string(),
            key: Some(KEY.to_string()),
            kind: MediaKind::Video,
            cache_path: None,
        })
        .await
        .expect_err("no cache path");
    assert!(matches!(err, Error::InvalidInput(_)));
}
