//! UID generation
//!
//! Molecule UIDs are a v4 UUID rendered in base58 and left-padded to 22
//! characters. Metadata UIDs are the first 10 characters of a fresh
//! molecule UID.

use multibase::Base;
use uuid::Uuid;

/// Length of a molecule UID
pub const MOLECULE_UID_LEN: usize = 22;

/// Length of a metadata UID
pub const METADATA_UID_LEN: usize = 10;

/// Base58 digit for zero, used as padding
const ZERO_DIGIT: char = '1';

/// Generate a new molecule UID
pub fn new_uid() -> String {
    encode_uid(Uuid::new_v4().as_bytes())
}

/// Generate a new metadata UID
pub fn new_metadata_uid() -> String {
    let mut uid = new_uid();
    uid.truncate(METADATA_UID_LEN);
    uid
}

/// Base58-encode 16 UUID bytes, left-padded to [`MOLECULE_UID_LEN`]
pub fn encode_uid(bytes: &[u8; 16]) -> String {
    // drop the multibase prefix character
    let digits = multibase::encode(Base::Base58Btc, bytes).split_off(1);
    let padding = MOLECULE_UID_LEN.saturating_sub(digits.len());
    let mut uid = String::with_capacity(MOLECULE_UID_LEN);
    uid.extend(std::iter::repeat_n(ZERO_DIGIT, padding));
    uid.push_str(&digits);
    uid
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uid_lengths() {
        assert_eq!(new_uid().len(), MOLECULE_UID_LEN);
        assert_eq!(new_metadata_uid().len(), METADATA_UID_LEN);
    }

    #[test]
    fn test_uids_are_unique() {
        let uids: HashSet<String> = (0..1000).map(|_| new_uid()).collect();
        assert_eq!(uids.len(), 1000);
    }

    #[test]
    fn test_encode_known_values() {
        assert_eq!(encode_uid(&[0; 16]), "1".repeat(22));

        let mut small = [0u8; 16];
        small[15] = 57;
        assert!(encode_uid(&small).ends_with('z'));
        small[15] = 58;
        assert!(encode_uid(&small).ends_with("21"));

        assert_eq!(encode_uid(&[0xff; 16]).len(), 22);
    }

    #[test]
    fn test_uid_decodes_back_to_uuid() {
        let uuid = Uuid::new_v4();
        let uid = encode_uid(uuid.as_bytes());
        let (base, bytes) = multibase::decode(format!("z{}", uid.trim_start_matches('1'))).unwrap();
        assert_eq!(base, Base::Base58Btc);
        let start = 16 - bytes.len();
        assert_eq!(&bytes[..], &uuid.as_bytes()[start..]);
    }

    #[test]
    fn test_alphabet_excludes_ambiguous_characters() {
        for _ in 0..100 {
            assert!(!new_uid().contains(['0', 'O', 'I', 'l']));
        }
    }
}
