//! CLI command implementations.

use anyhow::{bail, Context, Result};
use chatlens_core::{
    config::EngineConfig,
    extbuf::{candidate_variants, parse_nicknames},
    keystream::KeystreamGenerator,
    media::{MediaDecryptor, DEFAULT_VIDEO_EXT},
    storage::{
        DatabaseConfig, MessagePager, MessageRow, PageQuery, PagerConfig, SqliteCursorProvider,
    },
};
use chrono::{NaiveDate, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bytes of keystream shown without `--hex`.
const KEYSTREAM_PREVIEW: usize = 32;

/// Get a secret from the user with masked input.
fn get_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt)
        .context("Failed to read password")
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Load engine configuration, or defaults when no file is given.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let path = expand(path);
    let mut config = EngineConfig::load(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;

    // Relative asset paths are relative to the config file.
    if config.resource_root.is_relative() {
        if let Some(dir) = path.parent() {
            config.resource_root = dir.join(&config.resource_root);
        }
    }
    Ok(config)
}

/// Generate a keystream and print it.
pub async fn keystream(
    config: &EngineConfig,
    key: &str,
    length: Option<usize>,
    full_hex: bool,
) -> Result<()> {
    let generator = KeystreamGenerator::global(config);
    let length = length.unwrap_or(generator.default_len());

    let ks = generator
        .generate(key, length)
        .await
        .context("Failed to generate keystream")?;

    if full_hex {
        println!("{}", hex::encode(ks.as_bytes()));
        return Ok(());
    }

    let preview = &ks.as_bytes()[..ks.len().min(KEYSTREAM_PREVIEW)];
    println!("Keystream: {} bytes", ks.len());
    println!("  Prefix: {}", hex::encode(preview));
    Ok(())
}

/// Cache file name for a decrypted input: a digest of its path, so the
/// same input always lands in the same place.
fn cache_name(input: &Path) -> String {
    let digest = Sha256::digest(input.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

/// Decrypt a media file on disk.
pub async fn decrypt(
    config: &EngineConfig,
    input: &str,
    key: &str,
    video: bool,
    out: Option<&str>,
) -> Result<()> {
    let input = expand(input);
    if !input.exists() {
        bail!("Input not found: {}", input.display());
    }

    let decryptor = MediaDecryptor::new(KeystreamGenerator::global(config));

    if video {
        let dest = match out {
            Some(out) => expand(out),
            None => {
                let dir = config
                    .cache_dir
                    .clone()
                    .or_else(|| input.parent().map(Path::to_path_buf))
                    .unwrap_or_default();
                dir.join(format!("{}{}", cache_name(&input), DEFAULT_VIDEO_EXT))
            }
        };

        let media = decryptor
            .decrypt_video_file(&input, key, &dest)
            .await
            .context("Failed to decrypt video")?;

        println!("Decrypted video written to: {}", dest.display());
        if !media.format_known() {
            println!("WARNING: no recognised container header; the key may be wrong.");
        }
        return Ok(());
    }

    let cipher = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let media = decryptor
        .decrypt_image(&cipher, key)
        .await
        .context("Failed to decrypt image")?;

    let dest = match out {
        Some(out) => expand(out),
        None => input.with_extension(media.extension().trim_start_matches('.')),
    };
    let Some(bytes) = media.bytes() else {
        bail!("Image payload missing");
    };
    tokio::fs::write(&dest, bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;

    println!("Decrypted image written to: {}", dest.display());
    println!("  Format: {}", media.extension());
    if !media.format_known() {
        println!("  (format not recognised, using default extension)");
    }
    Ok(())
}

/// Decode an ext-buffer file, raw or hex text.
fn read_blob(raw: Vec<u8>, is_hex: bool) -> Result<Vec<u8>> {
    if !is_hex {
        return Ok(raw);
    }
    let text: String = String::from_utf8(raw)
        .context("Hex blob is not text")?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(text).context("Invalid hex in blob")
}

/// Print the nickname table of an ext-buffer.
pub async fn nicknames(blob: &str, is_hex: bool, members: &[String]) -> Result<()> {
    let path = expand(blob);
    let raw = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let blob = read_blob(raw, is_hex)?;

    let candidates: Vec<String> = members
        .iter()
        .flat_map(|m| candidate_variants(m))
        .collect();
    let table = parse_nicknames(&blob, &candidates);

    if members.is_empty() {
        let mut entries: Vec<_> = table.iter().collect();
        entries.sort();
        println!("{} nickname(s):", entries.len());
        for (id, nickname) in entries {
            println!("  {:<32} {}", id, nickname);
        }
        return Ok(());
    }

    for member in members {
        let variants = candidate_variants(member);
        match table.resolve(&variants) {
            Some(nickname) => println!("  {:<32} {}", member, nickname),
            None => println!("  {:<32} (none)", member),
        }
    }
    Ok(())
}

/// Parameters of the `messages` command.
pub struct MessagesQuery {
    /// Conversation id.
    pub conversation: String,
    /// Rows to skip.
    pub offset: usize,
    /// Rows to return.
    pub limit: usize,
    /// Inclusive lower bound.
    pub start: Option<i64>,
    /// Inclusive upper bound.
    pub end: Option<i64>,
    /// Oldest first.
    pub ascending: bool,
    /// Substring filter.
    pub keyword: Option<String>,
}

/// Parse unix seconds or a `YYYY-MM-DD` date (start of day, UTC).
pub fn parse_time(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid time '{}' (expected unix seconds or YYYY-MM-DD)", value))?;
    let Some(start) = date.and_hms_opt(0, 0, 0) else {
        bail!("Invalid date '{}'", value);
    };
    Ok(Utc.from_utc_datetime(&start).timestamp())
}

/// Like [`parse_time`], but a bare date means the end of that day.
pub fn parse_end_time(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs);
    }
    Ok(parse_time(value)? + 86_399)
}

fn format_time(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn print_row(row: &MessageRow) {
    let time = row.create_time().map(format_time).unwrap_or_default();
    let sender = row.sender().unwrap_or("-");
    let text = row.text().unwrap_or("");
    println!("[{}] {}: {}", time, sender, text);
}

/// Print one page of a conversation.
pub async fn messages(
    config: &EngineConfig,
    db: &str,
    key: Option<&str>,
    query: &MessagesQuery,
) -> Result<()> {
    let db_path = expand(db);
    if !db_path.exists() {
        bail!("Database not found: {}", db_path.display());
    }

    let key_hex = match key {
        Some(key) => key.to_string(),
        None => get_password("Database key (hex, empty for none): ")?,
    };
    let key = hex::decode(key_hex.trim()).context("Database key must be hex")?;

    let store = SqliteCursorProvider::open(
        &DatabaseConfig {
            path: db_path.to_string_lossy().into_owned(),
            in_memory: false,
        },
        &key,
    )
    .context("Failed to open database (wrong key?)")?;

    let pager = MessagePager::new(Arc::new(store)).with_config(PagerConfig::from(config));
    let page_query = PageQuery::new(query.conversation.as_str())
        .page(query.offset, query.limit)
        .between(query.start.unwrap_or(0), query.end.unwrap_or(0))
        .ascending(query.ascending);

    let page = match query.keyword.as_deref() {
        Some(keyword) => pager.search(&page_query, keyword).await,
        None => pager.fetch_page(&page_query).await,
    }
    .context("Failed to load messages")?;

    println!(
        "{} (rows {}..{}):",
        query.conversation,
        query.offset,
        query.offset + page.rows.len()
    );
    for row in &page.rows {
        print_row(row);
    }
    if page.has_more {
        println!("\nMore messages available (use --offset {}).", query.offset + page.rows.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1700000000").expect("secs"), 1_700_000_000);
        assert_eq!(parse_time("2023-11-14").expect("date"), 1_699_920_000);
        assert_eq!(parse_end_time("2023-11-14").expect("date"), 1_699_920_000 + 86_399);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_cache_name_is_stable() {
        let a = cache_name(Path::new("/media/video.dat"));
        assert_eq!(a.len(), 16);
        assert_eq!(a, cache_name(Path::new("/media/video.dat")));
        assert_ne!(a, cache_name(Path::new("/media/other.dat")));
    }

    #[test]
    fn test_read_hex_blob() {
        let blob = read_blob(b"0a 04\n7a 68 61 6e".to_vec(), true).expect("hex");
        assert_eq!(blob, vec![0x0a, 0x04, b'z', b'h', b'a', b'n']);
        assert!(read_blob(b"zz".to_vec(), true).is_err());
    }
}
