//! Internet checksum (RFC 1071), shared by IPv4, TCP, and ICMP.

/// Computes the 16 bit one's complement of the one's complement sum of all 16
/// bit words in the concatenation of `parts`.
///
/// Parts are summed as one contiguous byte stream, so a part with an odd
/// length pairs its last octet with the first octet of the next part. If the
/// total length is odd, the last octet is padded on the right with zeros.
///
/// Computing the checksum over data that already carries a correct checksum
/// yields zero.
pub fn checksum(parts: &[&[u8]]) -> u16 {
    // Chain together each byte slice so all word-sized values can be summed.
    let mut bytes = parts.iter().flat_map(|part| part.iter());

    let mut sum = 0u32;

    loop {
        let word = match (bytes.next(), bytes.next()) {
            (Some(h), Some(l)) => u16::from_be_bytes([*h, *l]),
            (Some(h), None) => u16::from_be_bytes([*h, 0x00]),
            _ => break,
        };

        sum += word as u32;

        // Handle potential overflow for each add operation with carry folding.
        if sum > 0xFFFF {
            // Adds the higher 16-bits to the lower 16-bits.
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }

    !(sum as u16)
}
