//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//! NTS cookie handling
//!
//! A cookie encapsulates one client's session keys, sealed under the
//! server's long-term cookie secret so the server can stay stateless.
//! Clients treat the whole thing as opaque bytes. The layouts below
//! are fixed big-endian formats so that any server process holding
//! the same secret can decrypt a cookie, regardless of what language
//! or architecture it was minted on.
//!
//! Plaintext layout: `algo (u16) || s2c_len (u16) || s2c || c2s_len (u16) || c2s`.
//! Transmitted layout: `key_id (u16) || nonce_len (u16) || nonce || ct_len (u16) || ct`.

use crate::aead::{GenericArrayExt, SivCipher, SivNonce};
use crate::records::AeadAlgorithm;
use rand::{CryptoRng, RngCore};
use std::fmt;

///Plaintext contents of a cookie
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PlainCookie {
    ///The AEAD algorithm the enclosed keys are for
    pub algo: AeadAlgorithm,
    ///The server-to-client key
    pub s2c: Vec<u8>,
    ///The client-to-server key
    pub c2s: Vec<u8>,
}

///A sealed cookie, as handed to the client
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EncryptedCookie {
    ///Identifies which cookie secret sealed this cookie
    pub id: u16,
    ///The AES-SIV nonce
    pub nonce: SivNonce,
    ///Sealed `PlainCookie`, tag included
    pub ciphertext: Vec<u8>,
}

///Enumeration of everything that can go wrong sealing or opening a cookie
#[derive(Debug)]
pub enum CookieError {
    ///The cookie secret has a length that selects no AES-SIV mode
    BadSecretLength(usize),
    ///The system random number generator failed
    Rng(rand::Error),
    ///AES-SIV encryption failed
    Seal,
    ///AES-SIV decryption failed: bad tag, corrupted cookie, or wrong secret
    Open,
    ///A cookie or cookie plaintext didn't match its fixed layout
    Malformed,
    ///The cookie names a key ID we don't hold a secret for
    UnknownKeyId(u16),
}

impl fmt::Display for CookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CookieError::*;
        match self {
            BadSecretLength(len) => write!(
                f,
                "cookie secret is {} bytes; must be 32 or 64",
                len
            ),
            Rng(e) => write!(f, "drawing cookie nonce: {}", e),
            Seal => write!(f, "sealing cookie failed"),
            Open => write!(f, "cookie failed to decrypt"),
            Malformed => write!(f, "cookie does not match its expected layout"),
            UnknownKeyId(id) => write!(f, "cookie sealed under unknown key ID {}", id),
        }
    }
}

impl std::error::Error for CookieError {}

///Minimal cursor over a byte slice for decoding the fixed layouts.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf }
    }

    fn take_u16(&mut self) -> Result<u16, CookieError> {
        if self.buf.len() < 2 {
            return Err(CookieError::Malformed);
        }
        let out = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        self.buf = &self.buf[2..];
        Ok(out)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CookieError> {
        if self.buf.len() < len {
            return Err(CookieError::Malformed);
        }
        let (out, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(out)
    }

    fn finish(self) -> Result<(), CookieError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CookieError::Malformed)
        }
    }
}

fn extend_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u16::max_value() as usize);
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

impl PlainCookie {
    ///Serialize to the fixed plaintext layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.s2c.len() + self.c2s.len());
        out.extend_from_slice(&self.algo.0.to_be_bytes());
        extend_prefixed(&mut out, &self.s2c);
        extend_prefixed(&mut out, &self.c2s);
        out
    }

    ///Deserialize from the fixed plaintext layout.
    pub fn from_bytes(buf: &[u8]) -> Result<PlainCookie, CookieError> {
        let mut reader = Reader::new(buf);
        let algo = AeadAlgorithm(reader.take_u16()?);
        let s2c_len = reader.take_u16()? as usize;
        let s2c = reader.take(s2c_len)?.to_vec();
        let c2s_len = reader.take_u16()? as usize;
        let c2s = reader.take(c2s_len)?.to_vec();
        reader.finish()?;
        Ok(PlainCookie { algo, s2c, c2s })
    }

    ///Seal this cookie under `secret`, drawing a fresh nonce from `rng`.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        secret: &[u8],
        key_id: u16,
        rng: &mut R,
    ) -> Result<EncryptedCookie, CookieError> {
        let cipher =
            SivCipher::from_key(secret).ok_or_else(|| CookieError::BadSecretLength(secret.len()))?;

        let mut nonce = SivNonce::default();
        rng.try_fill_bytes(nonce.as_mut_slice())
            .map_err(CookieError::Rng)?;

        let ciphertext = cipher
            .seal(&nonce, &[], &self.to_bytes())
            .map_err(|_| CookieError::Seal)?;

        Ok(EncryptedCookie {
            id: key_id,
            nonce,
            ciphertext,
        })
    }
}

impl EncryptedCookie {
    ///Serialize to the fixed transmitted layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.nonce.len() + self.ciphertext.len());
        out.extend_from_slice(&self.id.to_be_bytes());
        extend_prefixed(&mut out, self.nonce.as_slice());
        extend_prefixed(&mut out, &self.ciphertext);
        out
    }

    ///Deserialize from the fixed transmitted layout.
    pub fn from_bytes(buf: &[u8]) -> Result<EncryptedCookie, CookieError> {
        let mut reader = Reader::new(buf);
        let id = reader.take_u16()?;
        let nonce_len = reader.take_u16()? as usize;
        let nonce = SivNonce::try_clone_from_slice(reader.take(nonce_len)?)
            .map_err(|_| CookieError::Malformed)?;
        let ct_len = reader.take_u16()? as usize;
        let ciphertext = reader.take(ct_len)?.to_vec();
        reader.finish()?;
        Ok(EncryptedCookie {
            id,
            nonce,
            ciphertext,
        })
    }

    ///Open this cookie with the secret identified by `key_id`.
    pub fn decrypt(&self, secret: &[u8], key_id: u16) -> Result<PlainCookie, CookieError> {
        if self.id != key_id {
            return Err(CookieError::UnknownKeyId(self.id));
        }
        let cipher =
            SivCipher::from_key(secret).ok_or_else(|| CookieError::BadSecretLength(secret.len()))?;
        let plaintext = cipher
            .open(&self.nonce, &[], &self.ciphertext)
            .map_err(|_| CookieError::Open)?;
        PlainCookie::from_bytes(&plaintext)
    }
}
