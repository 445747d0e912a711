//! Storage key validation and layout.
//!
//! Key format: `images/{YYYY}/{MM}/{DD}/{image_id}/{name}.{ext}` where name
//! is a variant type or `upload` for the pristine uploaded bytes. All
//! backends share this layout; it forms part of the external contract for
//! backups.

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Validate a storage key before it reaches any backend.
///
/// Rejects empty keys, NUL bytes, `..` segments, and keys anchored at a
/// filesystem root (leading `/` or `\`).
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key is empty".to_string()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey("key contains NUL".to_string()));
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(
            "key must be relative (no leading slash)".to_string(),
        ));
    }
    if key
        .split(['/', '\\'])
        .any(|segment| segment == "..")
    {
        return Err(StorageError::InvalidKey(
            "key contains a parent-directory segment".to_string(),
        ));
    }
    Ok(())
}

/// Build the canonical object key for an image blob.
///
/// `name` is a variant type (`thumbnail`, ..., `original`) or `upload`.
pub fn object_key(created_at: DateTime<Utc>, image_id: Uuid, name: &str, ext: &str) -> String {
    format!(
        "images/{:04}/{:02}/{:02}/{}/{}.{}",
        created_at.year(),
        created_at.month(),
        created_at.day(),
        image_id,
        name,
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn valid_keys_pass() {
        assert!(validate_key("images/2026/08/01/abc/upload.jpg").is_ok());
        assert!(validate_key("a").is_ok());
        assert!(validate_key("a/b/c.d").is_ok());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(
            validate_key(""),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn nul_byte_rejected() {
        assert!(matches!(
            validate_key("images/a\0b"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn parent_segment_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("images/../../etc").is_err());
        assert!(validate_key("images\\..\\etc").is_err());
        // ".." embedded in a longer segment is a legitimate name
        assert!(validate_key("images/a..b/c").is_ok());
    }

    #[test]
    fn leading_slash_rejected() {
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("\\windows\\system32").is_err());
    }

    #[test]
    fn object_key_layout() {
        let id = Uuid::parse_str("6d9f2b9e-3a77-4c8a-9a4e-0a6b5b7f2e10").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(
            object_key(at, id, "thumbnail", "jpg"),
            format!("images/2026/08/01/{}/thumbnail.jpg", id)
        );
        let early = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        assert!(object_key(early, id, "upload", "png").starts_with("images/2026/01/05/"));
    }
}
