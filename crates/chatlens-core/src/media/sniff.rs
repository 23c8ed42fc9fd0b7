//! Image format detection from decrypted headers.

/// Extension used when no signature matches.
pub const DEFAULT_IMAGE_EXT: &str = ".jpg";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Detect an image extension from magic bytes.
pub fn detect_image_ext(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(".jpg");
    }
    if bytes.starts_with(&PNG_SIGNATURE) {
        return Some(".png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(".gif");
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(".webp");
    }
    if bytes.starts_with(b"BM") {
        return Some(".bmp");
    }
    None
}

/// Detect a video container from its header. Only ISO-BMFF (`ftyp`) is
/// recognised.
pub fn detect_video_ext(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return Some(".mp4");
    }
    None
}

/// MIME type for an extension produced by [`detect_image_ext`].
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext {
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".bmp" => "image/bmp",
        ".mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        assert_eq!(detect_image_ext(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some(".jpg"));
        assert_eq!(detect_image_ext(&PNG_SIGNATURE), Some(".png"));
        assert_eq!(detect_image_ext(b"GIF89a\x01\x00"), Some(".gif"));
        assert_eq!(detect_image_ext(b"GIF87a"), Some(".gif"));
        assert_eq!(detect_image_ext(b"RIFF\x24\x00\x00\x00WEBPVP8 "), Some(".webp"));
        assert_eq!(detect_image_ext(b"BM\x36\x00"), Some(".bmp"));
    }

    #[test]
    fn test_unknown_and_short() {
        assert_eq!(detect_image_ext(b""), None);
        assert_eq!(detect_image_ext(&[0xFF, 0xD8]), None);
        assert_eq!(detect_image_ext(b"RIFF\x24\x00\x00\x00WAVE"), None);
        assert_eq!(detect_image_ext(b"\x00\x00\x00\x18ftypmp42"), None);
    }

    #[test]
    fn test_video_container() {
        assert_eq!(detect_video_ext(b"\x00\x00\x00\x18ftypmp42"), Some(".mp4"));
        assert_eq!(detect_video_ext(b"\x00\x00\x00\x18moov"), None);
    }

    #[test]
    fn test_mime() {
        assert_eq!(mime_for_ext(".png"), "image/png");
        assert_eq!(mime_for_ext(DEFAULT_IMAGE_EXT), "image/jpeg");
        assert_eq!(mime_for_ext(".xyz"), "application/octet-stream");
    }
}
