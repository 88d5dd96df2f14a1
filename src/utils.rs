//! Utility functions for the ble-central-session crate.

/// Maximum number of bytes rendered by [`payload_preview`].
pub const PREVIEW_LEN: usize = 20;

/// Render a payload for log output.
///
/// Valid UTF-8 is shown as quoted text, anything else as hex. Both are cut
/// to [`PREVIEW_LEN`] bytes.
///
/// # Example
///
/// ```
/// use ble_central_session::payload_preview;
///
/// assert_eq!(payload_preview(b"hello"), "\"hello\"");
/// assert_eq!(payload_preview(&[0xc3, 0x28]), "[C3, 28]");
/// ```
pub fn payload_preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(PREVIEW_LEN)];
    let ellipsis = if payload.len() > PREVIEW_LEN { "..." } else { "" };

    match std::str::from_utf8(payload) {
        Ok(text) => {
            let cut = text
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .take_while(|end| *end <= PREVIEW_LEN)
                .last()
                .unwrap_or(0);
            format!("{:?}{}", &text[..cut], ellipsis)
        }
        Err(_) => format!("{:02X?}{}", shown, ellipsis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_preview() {
        assert_eq!(payload_preview(b"23.5C"), "\"23.5C\"");
        assert_eq!(payload_preview(b""), "\"\"");
    }

    #[test]
    fn test_binary_preview() {
        assert_eq!(payload_preview(&[0xff, 0x00, 0x10]), "[FF, 00, 10]");
    }

    #[test]
    fn test_long_payload_is_truncated() {
        let text = "a".repeat(32);
        assert_eq!(
            payload_preview(text.as_bytes()),
            format!("\"{}\"...", "a".repeat(PREVIEW_LEN))
        );

        let binary = vec![0xffu8; 24];
        assert!(payload_preview(&binary).ends_with("FF]..."));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 19 ASCII bytes followed by a two-byte character.
        let text = format!("{}é", "a".repeat(19));
        assert_eq!(
            payload_preview(text.as_bytes()),
            format!("\"{}\"...", "a".repeat(19))
        );
    }
}
