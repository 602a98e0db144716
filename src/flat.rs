//! Flat wrapper-delta encoding
//!
//! A single-blob rendering of a compressed-wrapper delta for content stores
//! that want one text-headed message instead of a nested tar: RFC-822-style
//! headers followed by the decompressed plaintext, or by a two-part MIME
//! body carrying the residual patch and the plaintext when the compressor
//! search was inexact. The pristine SHA-1 is mandatory and checked after
//! every reproduction.

use anyhow::{bail, Context, Result};
use base64::prelude::*;

use crate::delta::{WrapperDelta, WrapperKind};
use crate::error::RetarError;

pub const VERSION: &str = "1.0";

const TYPE_SINGLE: &str = "application/flat-recode";
const TYPE_MULTIPART: &str = "multipart/flat-recode";

/// Render a wrapper delta plus its plaintext as a flat message
pub fn encode(wrapper: &WrapperDelta, plaintext: &[u8]) -> Result<Vec<u8>> {
    let sha1sum = wrapper
        .sha1sum
        .as_deref()
        .ok_or_else(|| RetarError::MissingDeltaEntry("sha1sum".to_string()))?;
    let digest = BASE64_STANDARD
        .decode(sha1sum)
        .context("stored sha1sum is not valid base64")?;
    let boundary = hex::encode(digest);

    let mut out = Vec::new();
    let mut header = |name: &str, value: &str| {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    };

    match wrapper.patch {
        None => header("Content-Type", TYPE_SINGLE),
        Some(_) => header(
            "Content-Type",
            &format!("{}; boundary={}", TYPE_MULTIPART, boundary),
        ),
    }
    header("Flat-Recode-Version", VERSION);
    header("Pristine-SHA1", sha1sum);
    header("Type", wrapper.kind.name());
    match wrapper.kind {
        WrapperKind::Gz => {
            header(
                "Filename",
                &percent_encode(wrapper.filename.as_deref().unwrap_or_default()),
            );
            header("Timestamp", &wrapper.timestamp.unwrap_or(0).to_string());
            header("Params", &wrapper.params.join(" "));
        }
        WrapperKind::Bz2 => {
            header("Program", wrapper.program.as_deref().unwrap_or_default());
            header("Params", &wrapper.params.join(" "));
        }
    }
    out.push(b'\n');

    match &wrapper.patch {
        None => out.extend_from_slice(plaintext),
        Some(patch) => {
            for part in [patch.as_slice(), plaintext] {
                out.extend_from_slice(format!("--{}\n", boundary).as_bytes());
                out.extend_from_slice(b"Content-Type: application/octet-stream\n\n");
                out.extend_from_slice(part);
                out.push(b'\n');
            }
            out.extend_from_slice(format!("--{}--\n", boundary).as_bytes());
        }
    }

    Ok(out)
}

/// Parse a flat message back into a wrapper delta and its plaintext
pub fn decode(data: &[u8]) -> Result<(WrapperDelta, Vec<u8>)> {
    let split = find(data, b"\n\n")
        .ok_or_else(|| anyhow::anyhow!("flat encoding has no header separator"))?;
    let headers = parse_headers(&data[..split + 1])?;
    let body = &data[split + 2..];

    let version = require(&headers, "flat-recode-version")?;
    let major = version.split('.').next().unwrap_or(version);
    if major != "1" {
        return Err(RetarError::UnsupportedVersion {
            kind: "flat encoding",
            found: version.to_string(),
            supported: "1.x",
        }
        .into());
    }

    let content_type = require(&headers, "content-type")?;
    let sha1sum = Some(require(&headers, "pristine-sha1")?.to_string());
    let kind = WrapperKind::parse(require(&headers, "type")?)?;

    let params: Vec<String> = headers
        .iter()
        .find(|(name, _)| name == "params")
        .map(|(_, value)| value.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    let (program, filename, timestamp) = match kind {
        WrapperKind::Gz => {
            let filename = percent_decode(require(&headers, "filename")?)?;
            let timestamp = require(&headers, "timestamp")?
                .parse::<u32>()
                .context("flat encoding holds an unparsable timestamp")?;
            (None, Some(filename), Some(timestamp))
        }
        WrapperKind::Bz2 => (
            Some(require(&headers, "program")?.to_string()),
            None,
            None,
        ),
    };

    let (patch, plaintext) = if let Some(boundary) = boundary_of(content_type) {
        let parts = split_multipart(body, &boundary)?;
        match parts.as_slice() {
            [patch, plaintext] => (Some(patch.clone()), plaintext.clone()),
            other => bail!("flat encoding has {} parts, expected 2", other.len()),
        }
    } else if content_type.starts_with(TYPE_SINGLE) {
        (None, body.to_vec())
    } else {
        bail!("unknown flat content type {}", content_type);
    };

    let wrapper = WrapperDelta {
        kind,
        params,
        program,
        filename,
        timestamp,
        sha1sum,
        patch,
    };
    Ok((wrapper, plaintext))
}

fn parse_headers(block: &[u8]) -> Result<Vec<(String, String)>> {
    let text = std::str::from_utf8(block).context("flat encoding headers are not text")?;
    let mut headers = Vec::new();
    for line in text.lines() {
        let (name, value) = line
            .split_once(':')
            .with_context(|| format!("malformed flat header line {:?}", line))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    Ok(headers)
}

fn require<'a>(headers: &'a [(String, String)], name: &str) -> Result<&'a str> {
    headers
        .iter()
        .find(|(header, _)| header == name)
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| RetarError::MissingDeltaEntry(name.to_string()).into())
}

fn boundary_of(content_type: &str) -> Option<String> {
    if !content_type.starts_with(TYPE_MULTIPART) {
        return None;
    }
    content_type
        .split(';')
        .filter_map(|attr| attr.trim().strip_prefix("boundary="))
        .map(|value| value.trim_matches('"').to_string())
        .next()
}

fn split_multipart(body: &[u8], boundary: &str) -> Result<Vec<Vec<u8>>> {
    let open = format!("--{}\n", boundary).into_bytes();
    let middle = format!("\n--{}\n", boundary).into_bytes();
    let close = format!("\n--{}--", boundary).into_bytes();

    if !body.starts_with(&open) {
        bail!("flat multipart body does not start with its boundary");
    }
    let end = find(body, &close).context("flat multipart body is unterminated")?;
    let mut parts = Vec::new();
    let mut rest = &body[open.len()..end];
    loop {
        let (part, remainder) = match find(rest, &middle) {
            Some(pos) => (&rest[..pos], Some(&rest[pos + middle.len()..])),
            None => (rest, None),
        };
        // Skip the part's own headers.
        let content = match find(part, b"\n\n") {
            Some(pos) => &part[pos + 2..],
            None => part,
        };
        parts.push(content.to_vec());
        match remainder {
            Some(remainder) => rest = remainder,
            None => break,
        }
    }
    Ok(parts)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &byte in bytes {
        if (0x21..=0x7e).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn percent_decode(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut bytes = text.bytes();
    while let Some(byte) = bytes.next() {
        if byte != b'%' {
            out.push(byte);
            continue;
        }
        let high = bytes.next();
        let low = bytes.next();
        let decoded = match (high, low) {
            (Some(high), Some(low)) => {
                let hex = [high, low];
                u8::from_str_radix(std::str::from_utf8(&hex)?, 16).ok()
            }
            _ => None,
        };
        match decoded {
            Some(value) => out.push(value),
            None => bail!("malformed percent escape in {:?}", text),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gz_wrapper(patch: Option<Vec<u8>>) -> WrapperDelta {
        WrapperDelta {
            kind: WrapperKind::Gz,
            params: vec!["--gnu".to_string(), "-n".to_string()],
            program: None,
            filename: Some(b"pkg 1.0.tar".to_vec()),
            timestamp: Some(1_600_000_000),
            sha1sum: Some("qZk+NkcGgWq6PiVxeFDCbJzQ2J0=".to_string()),
            patch,
        }
    }

    #[test]
    fn test_percent_round_trip() {
        let raw = b"name with spaces+%\xff.tar";
        let encoded = percent_encode(raw);
        assert!(!encoded.contains(' '));
        assert!(encoded.contains("%20"));
        assert!(encoded.contains("%25"));
        assert!(encoded.contains("%FF"));
        assert_eq!(percent_decode(&encoded).unwrap(), raw);
    }

    #[test]
    fn test_percent_decode_rejects_garbage() {
        assert!(percent_decode("bad%zz").is_err());
        assert!(percent_decode("trailing%2").is_err());
    }

    #[test]
    fn test_single_body_round_trip() {
        let plaintext = b"plain tar bytes".to_vec();
        let encoded = encode(&gz_wrapper(None), &plaintext).unwrap();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with("Content-Type: application/flat-recode\n"));
        assert!(text.contains("Flat-Recode-Version: 1.0\n"));

        let (wrapper, decoded) = decode(&encoded).unwrap();
        assert_eq!(decoded, plaintext);
        assert_eq!(wrapper.kind, WrapperKind::Gz);
        assert_eq!(wrapper.params, vec!["--gnu", "-n"]);
        assert_eq!(wrapper.filename.as_deref(), Some(b"pkg 1.0.tar".as_slice()));
        assert_eq!(wrapper.timestamp, Some(1_600_000_000));
        assert!(wrapper.patch.is_none());
    }

    #[test]
    fn test_multipart_round_trip() {
        let plaintext = b"plain tar bytes\nwith\nlines".to_vec();
        let patch = vec![0u8, 1, 2, b'\n', 255];
        let encoded = encode(&gz_wrapper(Some(patch.clone())), &plaintext).unwrap();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with("Content-Type: multipart/flat-recode; boundary="));

        let (wrapper, decoded) = decode(&encoded).unwrap();
        assert_eq!(decoded, plaintext);
        assert_eq!(wrapper.patch, Some(patch));
    }

    #[test]
    fn test_bz2_headers() {
        let wrapper = WrapperDelta {
            kind: WrapperKind::Bz2,
            params: vec!["-6".to_string(), "-b17".to_string()],
            program: Some("pbzip2".to_string()),
            filename: None,
            timestamp: None,
            sha1sum: Some("qZk+NkcGgWq6PiVxeFDCbJzQ2J0=".to_string()),
            patch: None,
        };
        let encoded = encode(&wrapper, b"plain").unwrap();
        let (parsed, _) = decode(&encoded).unwrap();
        assert_eq!(parsed.kind, WrapperKind::Bz2);
        assert_eq!(parsed.program.as_deref(), Some("pbzip2"));
        assert_eq!(parsed.params, vec!["-6", "-b17"]);
    }

    #[test]
    fn test_missing_sha1_refused() {
        let encoded = encode(&gz_wrapper(None), b"plain").unwrap();
        let text = String::from_utf8(encoded).unwrap();
        let stripped = text.replace("Pristine-SHA1: qZk+NkcGgWq6PiVxeFDCbJzQ2J0=\n", "");
        let err = decode(stripped.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("pristine-sha1"));
    }

    #[test]
    fn test_future_version_refused() {
        let encoded = encode(&gz_wrapper(None), b"plain").unwrap();
        let text = String::from_utf8(encoded).unwrap();
        let bumped = text.replace("Flat-Recode-Version: 1.0", "Flat-Recode-Version: 2.0");
        let err = decode(bumped.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
