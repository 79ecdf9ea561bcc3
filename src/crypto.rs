//! Callback signature verification and envelope crypto for WeChat Work.
//!
//! The platform signs every delivery with SHA-1 over the sorted
//! (token, timestamp, nonce, ciphertext) tuple and encrypts the payload with
//! AES-256-CBC where the IV is the first 16 bytes of the key. That IV scheme
//! is a platform convention and must not be reused outside this protocol.
//!
//! Plaintext framing: 16 bytes random | u32 big-endian body length | body |
//! receiver id. Padding is PKCS#7 with a 32-byte block, stripped manually.

use crate::error::CryptoError;
use aes::Aes256;
use base64::Engine as _;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};

const AES_KEY_LEN: usize = 32;
const PAD_BLOCK: usize = 32;
const FRAME_HEADER_LEN: usize = 20;

/// Stateless verifier/cipher for one app's callback credentials.
#[derive(Debug, Clone)]
pub struct WecomCrypto {
    token: String,
    key: [u8; AES_KEY_LEN],
}

/// Ciphertext plus the fields the platform needs to verify a passive reply.
#[derive(Debug, Clone)]
pub struct EncryptedReply {
    pub encrypt: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl WecomCrypto {
    pub fn new(token: &str, encoding_aes_key: &str) -> Result<Self, CryptoError> {
        // The console hands out a 43-char key with the trailing '=' stripped.
        let padded = format!("{}=", encoding_aes_key.trim());
        let raw = base64::engine::general_purpose::STANDARD
            .decode(padded)
            .map_err(|err| CryptoError::Decrypt(format!("invalid EncodingAESKey: {err}")))?;
        if raw.len() != AES_KEY_LEN {
            return Err(CryptoError::Decrypt(
                "invalid EncodingAESKey length: expected 32 bytes".to_string(),
            ));
        }
        let mut key = [0u8; AES_KEY_LEN];
        key.copy_from_slice(&raw);

        Ok(Self {
            token: token.trim().to_string(),
            key,
        })
    }

    /// SHA-1 over the sorted tuple, compared case-insensitively against the
    /// signature the platform supplied.
    pub fn verify_signature(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        payload: &str,
    ) -> bool {
        let expected = self.compute_signature(timestamp, nonce, payload);
        expected.eq_ignore_ascii_case(signature.trim())
    }

    fn compute_signature(&self, timestamp: &str, nonce: &str, payload: &str) -> String {
        let mut parts = vec![
            self.token.as_str(),
            timestamp.trim(),
            nonce.trim(),
            payload.trim(),
        ];
        parts.sort_unstable();

        let mut sha = Sha1::new();
        sha.update(parts.join(""));
        hex::encode(sha.finalize())
    }

    /// One-time endpoint registration: verify then decrypt the echo challenge.
    /// The caller must echo the returned plaintext back verbatim.
    pub fn verify_challenge(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<String, CryptoError> {
        if !self.verify_signature(signature, timestamp, nonce, echostr) {
            return Err(CryptoError::SignatureInvalid);
        }
        self.decrypt(echostr)
    }

    /// Decrypts a base64 ciphertext and returns the framed message body.
    /// The trailing receiver id is parsed for UTF-8 sanity but otherwise
    /// ignored; the platform routes per app before we ever see the payload.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String, CryptoError> {
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(check_base64_len(ciphertext_b64.trim()))
            .map_err(|err| CryptoError::Decrypt(format!("base64 decode failed: {err}")))?;
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CryptoError::Decrypt(
                "ciphertext is not a whole number of AES blocks".to_string(),
            ));
        }

        let iv = &self.key[..16];
        let mut buf = ciphertext;
        let plaintext = cbc::Decryptor::<Aes256>::new((&self.key).into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|err| CryptoError::Decrypt(format!("aes-cbc decrypt failed: {err}")))?;

        let unpadded = strip_padding(plaintext)?;
        if unpadded.len() < FRAME_HEADER_LEN {
            return Err(CryptoError::Decrypt(
                "decrypted payload shorter than frame header".to_string(),
            ));
        }

        let body_len =
            u32::from_be_bytes([unpadded[16], unpadded[17], unpadded[18], unpadded[19]]) as usize;
        let body_end = FRAME_HEADER_LEN.saturating_add(body_len);
        if body_end > unpadded.len() {
            return Err(CryptoError::Decrypt(
                "frame length exceeds decrypted payload".to_string(),
            ));
        }

        let body = std::str::from_utf8(&unpadded[FRAME_HEADER_LEN..body_end])
            .map_err(|_| CryptoError::Decrypt("message body is not utf-8".to_string()))?;
        std::str::from_utf8(&unpadded[body_end..])
            .map_err(|_| CryptoError::Decrypt("receiver id is not utf-8".to_string()))?;

        Ok(body.to_string())
    }

    /// Encrypts a passive reply body and signs the resulting ciphertext.
    pub fn encrypt(
        &self,
        plaintext: &str,
        nonce: &str,
        timestamp: &str,
        receiver_id: &str,
    ) -> Result<EncryptedReply, CryptoError> {
        let body = plaintext.as_bytes();
        if body.len() > u32::MAX as usize {
            return Err(CryptoError::Decrypt("reply payload too large".to_string()));
        }

        let mut raw = Vec::with_capacity(body.len() + receiver_id.len() + 64);
        raw.extend_from_slice(random_ascii_token(16).as_bytes());
        raw.extend_from_slice(&(body.len() as u32).to_be_bytes());
        raw.extend_from_slice(body);
        raw.extend_from_slice(receiver_id.as_bytes());

        let pad_len = PAD_BLOCK - (raw.len() % PAD_BLOCK);
        let pad_len = if pad_len == 0 { PAD_BLOCK } else { pad_len };
        raw.extend(std::iter::repeat_n(pad_len as u8, pad_len));

        let iv = &self.key[..16];
        let total = raw.len();
        let encrypted = cbc::Encryptor::<Aes256>::new((&self.key).into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut raw, total)
            .map_err(|err| CryptoError::Decrypt(format!("aes-cbc encrypt failed: {err}")))?;
        let encrypt = base64::engine::general_purpose::STANDARD.encode(encrypted);
        let signature = self.compute_signature(timestamp, nonce, &encrypt);

        Ok(EncryptedReply {
            encrypt,
            signature,
            timestamp: timestamp.trim().to_string(),
            nonce: nonce.trim().to_string(),
        })
    }
}

/// Re-pads base64 whose trailing `=` was stripped in transit. Genuinely
/// corrupt input still fails at decode.
pub fn check_base64_len(input: &str) -> String {
    let rem = input.len() % 4;
    if rem == 0 {
        input.to_string()
    } else {
        let mut out = String::with_capacity(input.len() + 4 - rem);
        out.push_str(input);
        for _ in 0..(4 - rem) {
            out.push('=');
        }
        out
    }
}

fn strip_padding(input: &[u8]) -> Result<&[u8], CryptoError> {
    let Some(last) = input.last() else {
        return Err(CryptoError::Decrypt("empty decrypted payload".to_string()));
    };
    let pad_len = *last as usize;
    if pad_len == 0 || pad_len > PAD_BLOCK || pad_len > input.len() {
        return Err(CryptoError::Decrypt("invalid padding length".to_string()));
    }
    Ok(&input[..input.len() - pad_len])
}

fn random_ascii_token(len: usize) -> String {
    use rand::RngExt;

    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut out = String::with_capacity(len);
    let mut rng = rand::rng();
    for _ in 0..len {
        let idx = rng.random_range(0..CHARSET.len());
        out.push(CHARSET[idx] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";

    fn crypto() -> WecomCrypto {
        WecomCrypto::new("token123", TEST_KEY).unwrap()
    }

    #[test]
    fn signature_matches_sorted_sha1() {
        let crypto = crypto();
        let mut parts = vec!["token123", "1700000000", "nonce123", "enc_payload"];
        parts.sort_unstable();
        let mut sha = Sha1::new();
        sha.update(parts.join(""));
        let signature = hex::encode(sha.finalize());

        assert!(crypto.verify_signature(&signature, "1700000000", "nonce123", "enc_payload"));
    }

    #[test]
    fn single_field_mutation_invalidates_signature() {
        let crypto = crypto();
        let signature = crypto.compute_signature("1700000000", "nonce123", "enc_payload");

        assert!(crypto.verify_signature(&signature, "1700000000", "nonce123", "enc_payload"));
        assert!(!crypto.verify_signature(&signature, "1700000001", "nonce123", "enc_payload"));
        assert!(!crypto.verify_signature(&signature, "1700000000", "nonce124", "enc_payload"));
        assert!(!crypto.verify_signature(&signature, "1700000000", "nonce123", "enc_payloae"));
        let mut mutated = signature.clone();
        mutated.replace_range(0..1, if signature.starts_with('0') { "1" } else { "0" });
        assert!(!crypto.verify_signature(&mutated, "1700000000", "nonce123", "enc_payload"));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let crypto = crypto();
        let plain = "<xml><ToUserName><![CDATA[corp]]></ToUserName><Content><![CDATA[hello]]></Content></xml>";
        let reply = crypto.encrypt(plain, "nonce123", "1700000000", "corp").unwrap();

        assert!(crypto.verify_signature(&reply.signature, "1700000000", "nonce123", &reply.encrypt));
        assert_eq!(crypto.decrypt(&reply.encrypt).unwrap(), plain);
    }

    #[test]
    fn round_trip_survives_4kb_payload() {
        let crypto = crypto();
        let plain = "x".repeat(4096);
        let reply = crypto.encrypt(&plain, "n", "1700000000", "").unwrap();
        assert_eq!(crypto.decrypt(&reply.encrypt).unwrap(), plain);
    }

    #[test]
    fn challenge_round_trip() {
        let crypto = crypto();
        let reply = crypto.encrypt("challenge-777", "n1", "1700000000", "corp").unwrap();
        let echoed = crypto
            .verify_challenge(&reply.signature, "1700000000", "n1", &reply.encrypt)
            .unwrap();
        assert_eq!(echoed, "challenge-777");
    }

    #[test]
    fn challenge_with_bad_signature_is_rejected() {
        let crypto = crypto();
        let reply = crypto.encrypt("challenge", "n1", "1700000000", "").unwrap();
        let err = crypto
            .verify_challenge("deadbeef", "1700000000", "n1", &reply.encrypt)
            .unwrap_err();
        assert_eq!(err, CryptoError::SignatureInvalid);
    }

    #[test]
    fn check_base64_len_pads_to_four_byte_boundary() {
        assert_eq!(check_base64_len("abcd"), "abcd");
        assert_eq!(check_base64_len("abcde"), "abcde===");
        assert_eq!(check_base64_len("abcdef"), "abcdef==");
        assert_eq!(check_base64_len("abcdefg"), "abcdefg=");
    }

    #[test]
    fn stripped_padding_is_restored_before_decode() {
        let crypto = crypto();
        let reply = crypto.encrypt("pad-me", "n", "1700000000", "").unwrap();
        let stripped = reply.encrypt.trim_end_matches('=');
        assert_eq!(crypto.decrypt(stripped).unwrap(), "pad-me");
    }

    #[test]
    fn corrupt_ciphertext_fails_without_panicking() {
        let crypto = crypto();
        assert!(matches!(
            crypto.decrypt("!!!not-base64!!!"),
            Err(CryptoError::Decrypt(_))
        ));
        // Valid base64, garbage content.
        let garbage = base64::engine::general_purpose::STANDARD.encode([0u8; 48]);
        assert!(matches!(crypto.decrypt(&garbage), Err(CryptoError::Decrypt(_))));
        // Not block-aligned after decode.
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 17]);
        assert!(matches!(crypto.decrypt(&short), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(WecomCrypto::new("tok", "short").is_err());
    }
}
