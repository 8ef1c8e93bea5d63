use sha2::{Digest, Sha256};

const MAX_NAME_LEN: usize = 120;

/// Name to save a download under: the server's suggestion when it made one,
/// otherwise `download--{short_hash(url)}.zip`.
pub fn download_filename(content_disposition: Option<&str>, url: &str) -> String {
    content_disposition
        .and_then(filename_from_disposition)
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("download--{}.zip", short_hash(url)))
}

/// Extracts the filename from a `Content-Disposition` value, preferring the
/// RFC 5987 `filename*` parameter over plain `filename`.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for param in split_params(header).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "filename*" => extended = decode_extended(value),
            "filename" => plain = Some(unquote(value)),
            _ => {}
        }
    }
    extended.or(plain).filter(|name| !name.trim().is_empty())
}

/// Splits on `;` outside double quotes.
fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (index, c) in header.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&header[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value);
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

/// `charset'lang'percent-encoded`; only UTF-8 and ISO-8859-1 are understood.
fn decode_extended(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next()?.to_ascii_lowercase();
    let _language = pieces.next()?;
    let encoded = pieces.next()?;
    let bytes = percent_decode(encoded)?;
    match charset.as_str() {
        "utf-8" => String::from_utf8(bytes).ok(),
        "iso-8859-1" => Some(bytes.into_iter().map(char::from).collect()),
        _ => None,
    }
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hex = input.get(index + 1..index + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            out.push(bytes[index]);
            index += 1;
        }
    }
    Some(out)
}

/// Makes a server-supplied name safe to create in the download directory.
pub fn sanitize_filename(input: &str) -> String {
    // Keep only the last path component.
    let base = input
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let cleaned: String = base
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }
    let mut name = compacted.trim_matches(&['_', ' ', '.'][..]).to_string();
    if name.chars().count() > MAX_NAME_LEN {
        name = name.chars().take(MAX_NAME_LEN).collect();
    }
    let stem = name.split('.').next().unwrap_or_default();
    if is_reserved_windows_name(stem) {
        name.insert(stem.len(), '_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}')
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_filename_is_used() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"peit_results_ab12cd34.zip\""),
            Some("peit_results_ab12cd34.zip".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=report.pdf"),
            Some("report.pdf".to_string())
        );
    }

    #[test]
    fn extended_filename_wins() {
        let header = "attachment; filename=\"fallback.zip\"; filename*=UTF-8''r%C3%A9sultats%20map.zip";
        assert_eq!(
            filename_from_disposition(header),
            Some("résultats map.zip".to_string())
        );
    }

    #[test]
    fn semicolons_inside_quotes_do_not_split() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"a;b.zip\""),
            Some("a;b.zip".to_string())
        );
    }

    #[test]
    fn inline_without_name_has_none() {
        assert_eq!(filename_from_disposition("inline"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a:b*c?.zip"), "a_b_c_.zip");
        assert_eq!(sanitize_filename("CON.zip"), "CON_.zip");
    }

    #[test]
    fn fallback_is_deterministic() {
        let url = "https://api.example.com/api/download/ab12cd34";
        let first = download_filename(None, url);
        assert_eq!(first, download_filename(Some("inline"), url));
        assert!(first.starts_with("download--"));
        assert!(first.ends_with(".zip"));
        assert_eq!(first.len(), "download--".len() + 8 + ".zip".len());
    }
}
