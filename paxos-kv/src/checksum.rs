//! `<text>;<checksum>;` framing used by the legacy line protocol.
//!
//! The checksum is the decimal sum of the Unicode scalar values of `text`.
//! It is located by scanning backwards for the last two `;`, so `text` may
//! itself contain semicolons.

const DELIMITER: char = ';';

pub fn calculate_checksum(text: &str) -> u64 {
    text.chars().map(|ch| u64::from(u32::from(ch))).sum()
}

pub fn build_msg_with_checksum(text: &str) -> String {
    format!("{text}{DELIMITER}{}{DELIMITER}", calculate_checksum(text))
}

/// Splits a framed message into its text and the checksum string.
fn split(msg: &str) -> Option<(&str, &str)> {
    let end = msg.rfind(DELIMITER)?;
    let start = msg[..end].rfind(DELIMITER)?;
    Some((&msg[..start], &msg[start + 1..end]))
}

/// `false` for a mismatch as well as for anything that is not framed at all.
pub fn verify_checksum(msg: &str) -> bool {
    match split(msg) {
        Some((text, checksum)) => checksum
            .parse::<u64>()
            .is_ok_and(|claimed| claimed == calculate_checksum(text)),
        None => false,
    }
}

/// Returns the text in front of the checksum, or `None` if there is none.
pub fn drop_checksum(msg: &str) -> Option<&str> {
    split(msg).map(|(text, _)| text)
}
