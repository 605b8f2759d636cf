//! Pairing-code generation, formatting, and comparison.
//!
//! Codes are drawn from a 36-symbol uppercase alphanumeric alphabet and
//! stored in canonical form (uppercase, no separators). Everything that
//! compares a user-submitted code goes through [`codes_match`], which is
//! constant-time over the canonical bytes.

use rand::Rng;
use subtle::ConstantTimeEq;

/// Alphabet for generated pairing codes.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default code length in symbols.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Entropy floor for a configured code length, in bits.
pub const MIN_CODE_BITS: f64 = 32.0;

/// Where pairing codes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSource {
    /// The service generates the code before opening the handshake.
    SelfGenerated,
    /// The upstream protocol issues the display code during the handshake.
    ProtocolIssued,
}

impl std::str::FromStr for CodeSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "self_generated" | "self-generated" => Ok(Self::SelfGenerated),
            "protocol_issued" | "protocol-issued" => Ok(Self::ProtocolIssued),
            other => Err(format!(
                "unknown code source {other:?}, expected self_generated or protocol_issued"
            )),
        }
    }
}

impl std::fmt::Display for CodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfGenerated => write!(f, "self_generated"),
            Self::ProtocolIssued => write!(f, "protocol_issued"),
        }
    }
}

/// Bits of entropy carried by `length` symbols of the code alphabet.
pub fn entropy_bits(length: usize) -> f64 {
    length as f64 * (CODE_ALPHABET.len() as f64).log2()
}

/// Generate a random pairing code of `length` symbols in canonical form.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Canonical form of a code: uppercase with separators dropped.
///
/// Accepts whatever grouping the user typed (`ab3d-9xk2`, `AB3D 9XK2`)
/// and reduces it to the stored representation.
pub fn canonicalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Display form of a canonical code: two hyphen-separated halves.
///
/// An odd length puts the longer half first (`ABCD-EFG` for 7 symbols).
pub fn display_code(canonical: &str) -> String {
    if canonical.len() < 2 {
        return canonical.to_string();
    }
    let mid = canonical.len().div_ceil(2);
    format!("{}-{}", &canonical[..mid], &canonical[mid..])
}

/// Constant-time comparison of a submitted code against the stored one.
///
/// Both sides are canonicalized first, so case and grouping never matter.
pub fn codes_match(submitted: &str, expected: &str) -> bool {
    let submitted = canonicalize(submitted);
    let expected = canonicalize(expected);
    submitted.as_bytes().ct_eq(expected.as_bytes()).into()
}
