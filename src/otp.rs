use std::fmt::Display;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

pub const DEFAULT_DIGITS: u32 = 6;
pub const DEFAULT_PERIOD: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Secret is not valid Base32")]
    SecretDecode(#[from] data_encoding::DecodeError),
    #[error("Secret is empty")]
    EmptySecret,
    #[error("Digest too short for truncation")]
    InvalidDigest,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA1"),
            Self::Sha256 => write!(f, "SHA256"),
            Self::Sha512 => write!(f, "SHA512"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            other => Err(format!("Unknown hash algorithm: {other}")),
        }
    }
}

/// A generated code, zero-padded to its digit count when displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    value: u32,
    digits: u32,
}

impl Code {
    /// Digits-only form, e.g. "004922".
    pub fn compact(&self) -> String {
        self.to_string()
    }

    /// Human form with a mid-gap for readability, e.g. "004 922".
    /// Odd digit counts put the longer half first.
    pub fn spaced(&self) -> String {
        let s = self.to_string();
        let split = (s.len() + 1) / 2;
        format!("{} {}", &s[..split], &s[split..])
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0pad$}", self.value, pad = self.digits as usize)
    }
}

/// RFC 6238 TOTP configuration for one account secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totp {
    secret: String,
    algorithm: HashAlgorithm,
    digits: u32,
    period: u64,
}

/// Uppercases and strips spaces, the way secrets are pasted out of most
/// provisioning flows.
pub fn normalize_secret(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

impl Totp {
    /// Defaults to SHA1, 6 digits, 30-second period.
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            algorithm: HashAlgorithm::Sha1,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
        }
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }

    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Generates the code for the window containing `unix_seconds`.
    pub fn generate(&self, unix_seconds: u64) -> Result<Code, OtpError> {
        let counter = unix_seconds / self.period;
        let key = decode_secret(&self.secret)?;
        let digest = calc_digest(&key, self.algorithm, counter);
        let value = truncate(&digest, self.digits)?;
        Ok(Code {
            value,
            digits: self.digits,
        })
    }

    /// Seconds left before the window containing `unix_seconds` rolls over.
    pub fn remaining(&self, unix_seconds: u64) -> u64 {
        self.period - (unix_seconds % self.period)
    }
}

/// Decodes an RFC 4648 base32 secret, tolerating missing padding.
fn decode_secret(secret: &str) -> Result<Vec<u8>, OtpError> {
    // Trimming first also catches padding-only input like "====".
    let unpadded = secret.trim_end_matches('=');
    if unpadded.is_empty() {
        return Err(OtpError::EmptySecret);
    }
    Ok(data_encoding::BASE32_NOPAD.decode(unpadded.as_bytes())?)
}

fn calc_digest(key: &[u8], algorithm: HashAlgorithm, counter: u64) -> Vec<u8> {
    let data = counter.to_be_bytes();
    match algorithm {
        HashAlgorithm::Sha1 => {
            let mut mac =
                Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// RFC 4226 dynamic truncation: the low nibble of the last digest byte is a
/// byte offset; four bytes from there, high bit masked, modulo 10^digits.
fn truncate(digest: &[u8], digits: u32) -> Result<u32, OtpError> {
    let offset = (*digest.last().ok_or(OtpError::InvalidDigest)? & 0xf) as usize;
    let code_bytes: [u8; 4] = digest
        .get(offset..offset + 4)
        .ok_or(OtpError::InvalidDigest)?
        .try_into()
        .map_err(|_| OtpError::InvalidDigest)?;
    let code = u32::from_be_bytes(code_bytes) & 0x7fff_ffff;
    Ok(code % 10u32.pow(digits))
}

/// Add-time validation: the normalized secret must decode as Base32 and
/// produce a code. Not re-run on later reads.
pub fn validate_secret(normalized: &str) -> Result<(), OtpError> {
    Totp::new(normalized.to_string()).generate(0).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 Appendix B secret for SHA1 ("12345678901234567890" in base32).
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_sha1_vectors() {
        let totp = Totp::new(RFC_SECRET.to_string()).with_digits(8);
        let cases = [
            (59u64, "94287082"),
            (1111111109, "07081804"),
            (1111111111, "14050471"),
            (1234567890, "89005924"),
            (2000000000, "69279037"),
            (20000000000, "65353130"),
        ];
        for (timestamp, expected) in cases {
            assert_eq!(totp.generate(timestamp).unwrap().to_string(), expected);
        }
    }

    #[test]
    fn rfc6238_sha256_vector() {
        let secret = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZA";
        let totp = Totp::new(secret.to_string())
            .with_algorithm(HashAlgorithm::Sha256)
            .with_digits(8);
        assert_eq!(totp.generate(59).unwrap().to_string(), "46119246");
    }

    #[test]
    fn rfc6238_sha512_vector() {
        let secret = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNA";
        let totp = Totp::new(secret.to_string())
            .with_algorithm(HashAlgorithm::Sha512)
            .with_digits(8);
        assert_eq!(totp.generate(59).unwrap().to_string(), "90693936");
    }

    #[test]
    fn six_digit_codes_are_zero_padded() {
        let totp = Totp::new(RFC_SECRET.to_string());
        let code = totp.generate(1111111109).unwrap();
        // 8-digit vector is 07081804, so the 6-digit code keeps a leading zero
        assert_eq!(code.to_string(), "081804");
        assert_eq!(code.spaced(), "081 804");
    }

    #[test]
    fn codes_are_stable_within_a_window() {
        let totp = Totp::new(RFC_SECRET.to_string());
        assert_eq!(totp.generate(30).unwrap(), totp.generate(59).unwrap());
        assert_ne!(totp.generate(59).unwrap(), totp.generate(60).unwrap());
    }

    #[test]
    fn remaining_counts_down_to_rollover() {
        let totp = Totp::new(RFC_SECRET.to_string());
        assert_eq!(totp.remaining(0), 30);
        assert_eq!(totp.remaining(29), 1);
        assert_eq!(totp.remaining(30), 30);
    }

    #[test]
    fn custom_period_changes_the_window() {
        let totp = Totp::new(RFC_SECRET.to_string()).with_period(60);
        assert_eq!(totp.remaining(59), 1);
        assert_eq!(totp.generate(0).unwrap(), totp.generate(59).unwrap());
        assert_ne!(totp.generate(59).unwrap(), totp.generate(60).unwrap());
    }

    #[test]
    fn normalize_strips_spaces_and_uppercases() {
        assert_eq!(normalize_secret("gezd gnbv gy3t qojq"), "GEZDGNBVGY3TQOJQ");
    }

    #[test]
    fn padded_secrets_are_accepted() {
        assert!(validate_secret("MFRGGZDF====").is_ok());
    }

    #[test]
    fn invalid_secrets_are_rejected() {
        assert!(validate_secret("not base32!").is_err());
        assert!(validate_secret("").is_err());
        assert!(validate_secret("GEZDGNB1").is_err()); // '1' not in the alphabet
    }

    #[test]
    fn padding_only_secrets_are_rejected() {
        assert!(validate_secret("====").is_err());
        assert!(validate_secret(&normalize_secret("= = =")).is_err());
    }
}
