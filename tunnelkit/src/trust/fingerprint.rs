use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// `"SHA256:" + base64(sha256(wire_form(key)))`, matching OpenSSH's fingerprint format
/// since the 2016 change (§3, §6).
///
/// Pure function of the key's wire bytes — used only for display and logging, never for
/// trust-store identity (that stays the authorized-keys text form, see
/// [`super::ServerPubKeyRecord::human_key`]).
pub fn fingerprint(wire_bytes: &[u8]) -> String {
    let digest = Sha256::digest(wire_bytes);
    format!("SHA256:{}", BASE64_STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_same_bytes() {
        let key = b"some-wire-encoded-key-bytes";
        assert_eq!(fingerprint(key), fingerprint(key));
    }

    #[test]
    fn changes_with_any_byte() {
        let a = fingerprint(b"abcdefgh");
        let b = fingerprint(b"abcdefgi");
        assert_ne!(a, b);
    }

    #[test]
    fn has_expected_prefix_and_length() {
        let fp = fingerprint(b"anything");
        assert!(fp.starts_with("SHA256:"));
        // 32-byte digest, standard base64 with padding -> 44 chars
        assert_eq!(fp.len(), "SHA256:".len() + 44);
    }
}
