// Best-effort gzip decoding for sitemap bodies

use crate::error::{Result, ScanError};
use flate2::read::MultiGzDecoder;
use std::io::Read;
use tracing::{debug, warn};

pub const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

const CHUNK_SIZE: usize = 8192;

/// Check the first three bytes for the gzip/deflate magic number.
pub fn has_gzip_magic(body: &[u8]) -> bool {
    body.len() >= GZIP_MAGIC.len() && body[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

/// Decompress a gzip buffer, following concatenated members, keeping
/// whatever was decoded before a truncation or checksum failure.
///
/// Fails only when not a single byte could be recovered.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Err(ScanError::DecompressionError("empty input".to_string()));
    }

    let mut decoder = MultiGzDecoder::new(input);
    let mut output = Vec::with_capacity(input.len() * 4);
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if output.is_empty() {
                    return Err(ScanError::DecompressionError(e.to_string()));
                }
                warn!(
                    "Gzip stream damaged after {} bytes, keeping partial output: {}",
                    output.len(),
                    e
                );
                break;
            }
        }
    }

    debug!("Decompressed {} bytes into {}", input.len(), output.len());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_urlset(count: usize) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#,
        );
        for i in 0..count {
            xml.push_str(&format!(
                "<url><loc>https://example.com/items/{i}/page-{}</loc><lastmod>2023-{:02}-{:02}</lastmod></url>\n",
                i * 7919 % 10007,
                i % 12 + 1,
                i % 28 + 1
            ));
        }
        xml.push_str("</urlset>");
        xml
    }

    #[test]
    fn test_magic_number() {
        assert!(has_gzip_magic(&gzip(b"hello")));
        assert!(!has_gzip_magic(b"<?xml"));
        assert!(!has_gzip_magic(&[0x1f, 0x8b]));
    }

    #[test]
    fn test_decompress_complete_stream() {
        let original = sample_urlset(10);
        let decoded = decompress(&gzip(original.as_bytes())).unwrap();
        assert_eq!(decoded, original.as_bytes());
    }

    #[test]
    fn test_decompress_concatenated_members() {
        let mut compressed = gzip(b"<urlset><url><loc>http://x/a</loc></url>");
        compressed.extend(gzip(b"<url><loc>http://x/b</loc></url></urlset>"));

        let decoded = String::from_utf8(decompress(&compressed).unwrap()).unwrap();
        assert_eq!(
            decoded,
            "<urlset><url><loc>http://x/a</loc></url><url><loc>http://x/b</loc></url></urlset>"
        );
    }

    #[test]
    fn test_decompress_truncated_stream_returns_prefix() {
        let original = sample_urlset(2000);
        let compressed = gzip(original.as_bytes());
        let truncated = &compressed[..compressed.len() / 2];

        let decoded = decompress(truncated).unwrap();
        assert!(!decoded.is_empty());
        assert!(decoded.len() < original.len());
        assert!(original.as_bytes().starts_with(&decoded));
    }

    #[test]
    fn test_decompress_bad_checksum_keeps_data() {
        let original = sample_urlset(50);
        let mut compressed = gzip(original.as_bytes());
        // CRC32 lives in the 8-byte trailer
        let crc_pos = compressed.len() - 8;
        compressed[crc_pos] ^= 0xff;

        let decoded = decompress(&compressed).unwrap();
        assert_eq!(decoded, original.as_bytes());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let result = decompress(b"this is definitely not gzip data");
        assert!(matches!(result, Err(ScanError::DecompressionError(_))));
    }

    #[test]
    fn test_decompress_empty_fails() {
        assert!(matches!(
            decompress(&[]),
            Err(ScanError::DecompressionError(_))
        ));
    }
}
