//! Scheme-tagged password hashes.
//!
//! Stored as `SCHEME:payload`. The legacy `{SCHEME}payload` form is accepted
//! when decoding; an untagged value is taken as plaintext.
//!
//! PBKDF2 payloads are `rounds$salt$digest`, with salt and digest in the
//! unpadded `./` base64 variant used by crypt-style hashes.

use std::fmt;

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use base64::{
  Engine as _,
  alphabet::Alphabet,
  engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD as B64},
};
use md5::Md5;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha512;

use crate::{Error, Result};

/// Rounds used for new PBKDF2 hashes unless configured otherwise.
pub const PBKDF2_DEFAULT_ROUNDS: u32 = 250_000;
pub const PBKDF2_MIN_ROUNDS: u32 = 1_000;
const PBKDF2_SALT_LEN: usize = 20;
const SHA1_LEN: usize = 20;

const H64_ALPHABET: Alphabet =
  match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789./") {
    Ok(alphabet) => alphabet,
    Err(_) => panic!("invalid h64 alphabet"),
  };

const H64: GeneralPurpose = GeneralPurpose::new(
  &H64_ALPHABET,
  GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scheme {
  /// Argon2id PHC string.
  #[default]
  #[serde(rename = "ARGON2", alias = "argon2")]
  Argon2,
  /// PBKDF2-HMAC-SHA512, 64-byte digest.
  #[serde(rename = "PBKDF2S5", alias = "pbkdf2s5")]
  Pbkdf2S5,
  /// PBKDF2-HMAC-SHA1, 20-byte digest.
  #[serde(rename = "PBKDF2", alias = "pbkdf2")]
  Pbkdf2,
  /// Salted SHA-1, base64 of digest followed by salt.
  #[serde(rename = "SSHA", alias = "ssha")]
  Ssha,
  /// Unsalted SHA-1 hex digest.
  #[serde(rename = "SHA", alias = "sha")]
  Sha,
  /// Unsalted MD5 hex digest.
  #[serde(rename = "MD5", alias = "md5")]
  Md5,
  #[serde(rename = "plaintext")]
  Plaintext,
  /// Recognised for stored values only.
  #[serde(rename = "crypt")]
  Crypt,
}

impl Scheme {
  pub fn tag(self) -> &'static str {
    match self {
      Scheme::Argon2 => "ARGON2",
      Scheme::Pbkdf2S5 => "PBKDF2S5",
      Scheme::Pbkdf2 => "PBKDF2",
      Scheme::Ssha => "SSHA",
      Scheme::Sha => "SHA",
      Scheme::Md5 => "MD5",
      Scheme::Plaintext => "plaintext",
      Scheme::Crypt => "crypt",
    }
  }

  pub fn from_tag(tag: &str) -> Option<Self> {
    Some(match tag.to_ascii_uppercase().as_str() {
      "ARGON2" => Scheme::Argon2,
      "PBKDF2S5" => Scheme::Pbkdf2S5,
      "PBKDF2" => Scheme::Pbkdf2,
      "SSHA" => Scheme::Ssha,
      "SHA" => Scheme::Sha,
      "MD5" => Scheme::Md5,
      "PLAINTEXT" => Scheme::Plaintext,
      "CRYPT" => Scheme::Crypt,
      _ => return None,
    })
  }
}

impl fmt::Display for Scheme {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.tag()) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Password {
  scheme:  Scheme,
  payload: String,
}

impl Password {
  /// Hash `cleartext` under `scheme`, with the default PBKDF2 rounds.
  pub fn hash(scheme: Scheme, cleartext: &str) -> Result<Self> {
    Self::hash_with_rounds(scheme, cleartext, PBKDF2_DEFAULT_ROUNDS)
  }

  /// Hash `cleartext` under `scheme`; `rounds` applies to PBKDF2 only.
  pub fn hash_with_rounds(scheme: Scheme, cleartext: &str, rounds: u32) -> Result<Self> {
    let payload = match scheme {
      Scheme::Argon2 => {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
          .hash_password(cleartext.as_bytes(), &salt)
          .map_err(|e| Error::InvalidValue(format!("argon2 error: {e}")))?
          .to_string()
      }
      Scheme::Pbkdf2S5 | Scheme::Pbkdf2 => {
        let mut salt = [0u8; PBKDF2_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        pbkdf2_payload(scheme, cleartext, rounds, &H64.encode(salt))?
      }
      Scheme::Ssha => {
        // 36 to 51 bytes of salt.
        let mut salt = vec![0u8; 36 + (OsRng.next_u32() % 16) as usize];
        OsRng.fill_bytes(&mut salt);
        ssha(cleartext, &salt)
      }
      Scheme::Sha => hex::encode(Sha1::digest(cleartext.as_bytes())),
      Scheme::Md5 => hex::encode(Md5::digest(cleartext.as_bytes())),
      Scheme::Plaintext => cleartext.to_owned(),
      Scheme::Crypt => return Err(Error::UnsupportedScheme(scheme.tag().to_owned())),
    };
    Ok(Password { scheme, payload })
  }

  pub fn scheme(&self) -> Scheme { self.scheme }

  /// Storage form, `SCHEME:payload`.
  pub fn encode(&self) -> String { format!("{}:{}", self.scheme.tag(), self.payload) }

  pub fn decode(stored: &str) -> Result<Self> {
    if let Some(rest) = stored.strip_prefix('{')
      && let Some((tag, payload)) = rest.split_once('}')
      && let Some(scheme) = Scheme::from_tag(tag)
    {
      return Ok(Password {
        scheme,
        payload: payload.to_owned(),
      });
    }
    if let Some((tag, payload)) = stored.split_once(':')
      && let Some(scheme) = Scheme::from_tag(tag)
    {
      return Ok(Password {
        scheme,
        payload: payload.to_owned(),
      });
    }
    Ok(Password {
      scheme:  Scheme::Plaintext,
      payload: stored.to_owned(),
    })
  }

  /// Re-encode `cleartext` under the stored scheme and compare.
  pub fn verify(&self, cleartext: &str) -> Result<bool> {
    Ok(match self.scheme {
      Scheme::Argon2 => {
        let parsed = PasswordHash::new(&self.payload)
          .map_err(|e| Error::InvalidValue(format!("malformed argon2 hash: {e}")))?;
        Argon2::default()
          .verify_password(cleartext.as_bytes(), &parsed)
          .is_ok()
      }
      Scheme::Pbkdf2S5 | Scheme::Pbkdf2 => {
        let (rounds, salt, _) = pbkdf2_unpack(&self.payload)?;
        pbkdf2_payload(self.scheme, cleartext, rounds, salt)? == self.payload
      }
      Scheme::Ssha => {
        let raw = B64
          .decode(&self.payload)
          .map_err(|e| Error::InvalidValue(format!("malformed SSHA hash: {e}")))?;
        if raw.len() <= SHA1_LEN {
          return Ok(false);
        }
        ssha(cleartext, &raw[SHA1_LEN..]) == self.payload
      }
      Scheme::Sha => hex::encode(Sha1::digest(cleartext.as_bytes())) == self.payload,
      Scheme::Md5 => hex::encode(Md5::digest(cleartext.as_bytes())) == self.payload,
      Scheme::Plaintext => cleartext == self.payload,
      Scheme::Crypt => return Err(Error::UnsupportedScheme(self.scheme.tag().to_owned())),
    })
  }

  /// True when the hash should be recomputed under `preferred`.
  pub fn needs_migration(&self, preferred: Scheme) -> bool { self.scheme != preferred }
}

fn ssha(cleartext: &str, salt: &[u8]) -> String {
  let mut hasher = Sha1::new();
  hasher.update(cleartext.as_bytes());
  hasher.update(salt);
  let mut raw = hasher.finalize().to_vec();
  raw.extend_from_slice(salt);
  B64.encode(raw)
}

/// Split `rounds$salt$digest`, returning the rounds, the encoded salt and
/// the encoded digest.
fn pbkdf2_unpack(payload: &str) -> Result<(u32, &str, &str)> {
  let malformed = |why: &str| Error::InvalidValue(format!("invalid PBKDF2 hash ({why})"));
  let mut parts = payload.split('$');
  let (Some(rounds), Some(salt), Some(digest), None) = (parts.next(), parts.next(), parts.next(), parts.next())
  else {
    return Err(malformed("wrong number of separators"));
  };
  if rounds.starts_with('0') {
    return Err(malformed("zero-padded rounds"));
  }
  let rounds = rounds.parse::<u32>().map_err(|_| malformed("invalid rounds"))?;
  Ok((rounds, salt, digest))
}

fn pbkdf2_payload(scheme: Scheme, cleartext: &str, rounds: u32, salt: &str) -> Result<String> {
  if rounds < PBKDF2_MIN_ROUNDS {
    return Err(Error::InvalidValue(format!("invalid PBKDF2 hash (rounds too low: {rounds})")));
  }
  let raw_salt = H64
    .decode(salt)
    .map_err(|e| Error::InvalidValue(format!("invalid PBKDF2 salt: {e}")))?;
  let digest = match scheme {
    Scheme::Pbkdf2S5 => {
      let mut out = [0u8; 64];
      pbkdf2::pbkdf2_hmac::<Sha512>(cleartext.as_bytes(), &raw_salt, rounds, &mut out);
      H64.encode(out)
    }
    _ => {
      let mut out = [0u8; SHA1_LEN];
      pbkdf2::pbkdf2_hmac::<Sha1>(cleartext.as_bytes(), &raw_salt, rounds, &mut out);
      H64.encode(out)
    }
  };
  Ok(format!("{rounds}${salt}${digest}"))
}

impl fmt::Display for Password {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{{}}}******", self.scheme.tag())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_computable_scheme_verifies() {
    for scheme in [
      Scheme::Argon2,
      Scheme::Pbkdf2S5,
      Scheme::Pbkdf2,
      Scheme::Ssha,
      Scheme::Sha,
      Scheme::Md5,
      Scheme::Plaintext,
    ] {
      let pw = Password::hash_with_rounds(scheme, "sekrit", PBKDF2_MIN_ROUNDS).unwrap();
      assert!(pw.verify("sekrit").unwrap(), "{scheme}");
      assert!(!pw.verify("guess").unwrap(), "{scheme}");

      let decoded = Password::decode(&pw.encode()).unwrap();
      assert_eq!(decoded, pw);
      assert!(decoded.verify("sekrit").unwrap());
    }
  }

  #[test]
  fn hashes_written_by_roundup_verify() {
    let known = [
      "{SHA}8d42e738c7adee551324955458b5e2c0b49ee655",
      "{MD5}ccbc53f4464604e714f69dd11138d8b5",
      "{SSHA}5TbNr7UzDy8GMTglWUK53Q3bZIgBAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4fICEiIyQ=",
      "{PBKDF2}1000$ZGVmZ2hpamtsbW5vcHFyc3R1dnc$EmrJGm/RfNuowin.pkz/Vk7b8SY",
      "{PBKDF2S5}1000$ZGVmZ2hpamtsbW5vcHFyc3R1dnc$pkdYyLpOgbZz9um9kmCrFaF4xz7r.zC/6YoKZpP3xLtWfmtpWH3mXPx0piM0eIwgD9NJrsOS4yLvTwMBHOJA3A",
    ];
    for stored in known {
      let pw = Password::decode(stored).unwrap();
      assert!(pw.verify("sekrit").unwrap(), "{stored}");
      assert!(!pw.verify("sekrit ").unwrap(), "{stored}");
    }
    assert_eq!(
      Password::hash(Scheme::Sha, "sekrit").unwrap().encode(),
      "SHA:8d42e738c7adee551324955458b5e2c0b49ee655"
    );
    assert_eq!(
      Password::hash(Scheme::Md5, "sekrit").unwrap().encode(),
      "MD5:ccbc53f4464604e714f69dd11138d8b5"
    );
  }

  #[test]
  fn malformed_pbkdf2_payloads_are_invalid() {
    for payload in ["1000$abc", "01000$abc$def", "many$abc$def", "999$ZGVm$abc"] {
      let pw = Password::decode(&format!("PBKDF2:{payload}")).unwrap();
      assert!(matches!(pw.verify("x"), Err(Error::InvalidValue(_))), "{payload}");
    }
    assert!(Password::hash_with_rounds(Scheme::Pbkdf2, "x", 10).is_err());
  }

  #[test]
  fn salted_hashes_differ_between_calls() {
    for scheme in [Scheme::Ssha, Scheme::Pbkdf2] {
      let a = Password::hash_with_rounds(scheme, "x", PBKDF2_MIN_ROUNDS).unwrap();
      let b = Password::hash_with_rounds(scheme, "x", PBKDF2_MIN_ROUNDS).unwrap();
      assert_ne!(a.encode(), b.encode(), "{scheme}");
    }
  }

  #[test]
  fn legacy_brace_form_and_untagged_values_decode() {
    let pw = Password::decode("{plaintext}hunter2").unwrap();
    assert_eq!(pw.scheme(), Scheme::Plaintext);
    assert!(pw.verify("hunter2").unwrap());

    let pw = Password::decode("hunter2").unwrap();
    assert_eq!(pw.scheme(), Scheme::Plaintext);
    assert_eq!(pw.encode(), "plaintext:hunter2");
  }

  #[test]
  fn crypt_is_recognised_but_not_computable() {
    let pw = Password::decode("crypt:abJnggxhB/yWI").unwrap();
    assert_eq!(pw.scheme(), Scheme::Crypt);
    assert!(matches!(pw.verify("x"), Err(Error::UnsupportedScheme(_))));
    assert!(Password::hash(Scheme::Crypt, "x").is_err());
  }

  #[test]
  fn migration_is_needed_only_for_other_schemes() {
    let pw = Password::hash(Scheme::Sha, "x").unwrap();
    assert!(pw.needs_migration(Scheme::Argon2));
    assert!(!pw.needs_migration(Scheme::Sha));
  }
}
