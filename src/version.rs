//! Bolt protocol version negotiation.

/// Bolt magic preamble bytes.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Supported Bolt versions (major, minor) in preference order. 5.1 is the
/// first version with a separate LOGON message.
pub const SUPPORTED_VERSIONS: [(u8, u8); 4] = [(5, 4), (5, 3), (5, 2), (5, 1)];

/// The "no version" response sent when negotiation fails.
pub const NO_VERSION: [u8; 4] = [0, 0, 0, 0];

/// Builds the 16 proposal bytes a client sends after the preamble: one slot
/// covering every supported version, three empty slots.
pub fn client_proposals() -> [u8; 16] {
    let (major, newest) = SUPPORTED_VERSIONS[0];
    let (_, oldest) = SUPPORTED_VERSIONS[SUPPORTED_VERSIONS.len() - 1];
    let mut proposals = [0u8; 16];
    proposals[1] = newest - oldest;
    proposals[2] = newest;
    proposals[3] = major;
    proposals
}

/// Picks the best supported version from 4 proposals.
///
/// Each proposal is `[reserved, range, minor, major]`, where `range` counts
/// the earlier minor versions also accepted.
pub fn negotiate_version(proposals: &[u8; 16]) -> Option<(u8, u8)> {
    proposals
        .chunks_exact(4)
        .filter(|slot| slot[3] != 0 || slot[2] != 0)
        .find_map(|slot| {
            let (range, minor, major) = (slot[1], slot[2], slot[3]);
            SUPPORTED_VERSIONS.iter().copied().find(|&(m, n)| {
                m == major && n <= minor && n >= minor.saturating_sub(range)
            })
        })
}

/// Encodes a version as the 4-byte handshake response.
pub fn encode_version(major: u8, minor: u8) -> [u8; 4] {
    [0, 0, minor, major]
}

/// Decodes the server's handshake response; `None` means rejection.
pub fn decode_version(response: [u8; 4]) -> Option<(u8, u8)> {
    match (response[3], response[2]) {
        (0, 0) => None,
        (major, minor) => Some((major, minor)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_proposals_cover_all_supported() {
        let proposals = client_proposals();
        assert_eq!(&proposals[..4], &[0, 3, 4, 5]);
        assert!(proposals[4..].iter().all(|b| *b == 0));
        assert_eq!(negotiate_version(&proposals), Some((5, 4)));
    }

    #[test]
    fn negotiate_falls_through_to_later_slot() {
        let mut proposals = [0u8; 16];
        proposals[3] = 6;
        proposals[6] = 2;
        proposals[7] = 5;
        assert_eq!(negotiate_version(&proposals), Some((5, 2)));
    }

    #[test]
    fn negotiate_rejects_old_majors() {
        let mut proposals = [0u8; 16];
        proposals[2] = 4;
        proposals[3] = 4;
        assert_eq!(negotiate_version(&proposals), None);
        assert_eq!(negotiate_version(&[0u8; 16]), None);
    }

    #[test]
    fn response_round_trip() {
        assert_eq!(decode_version(encode_version(5, 3)), Some((5, 3)));
        assert_eq!(decode_version(NO_VERSION), None);
    }
}
