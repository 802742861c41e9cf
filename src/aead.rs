//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!Convenience wrapper around the `aead` and `aes_siv` crates

pub use aead::{Aead, NewAead, Payload};
pub use aes_siv::{Aes128SivAead, Aes256SivAead};

use aead::generic_array::{ArrayLength, GenericArray};
use std::panic;

pub type SivNonce = GenericArray<u8, <Aes128SivAead as Aead>::NonceSize>;
pub type Aes128SivKey = GenericArray<u8, <Aes128SivAead as NewAead>::KeySize>;
pub type Aes256SivKey = GenericArray<u8, <Aes256SivAead as NewAead>::KeySize>;

///Error returned by `GenericArrayExt` methods if the slice passed in is the wrong length.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct LengthMismatchError;

///Annoyingly, GenericArray's `from_slice` constructors panic if the slice is the wrong length.
///This extension trait adds methods that catch the panic and return an error result instead.
pub trait GenericArrayExt<T, N>
where
    N: ArrayLength<T>,
{
    fn try_from_slice(slice: &[T]) -> Result<&GenericArray<T, N>, LengthMismatchError>
    where
        T: panic::RefUnwindSafe,
    {
        panic::catch_unwind(move || GenericArray::from_slice(slice))
            .map_err(|_| LengthMismatchError {})
    }

    fn try_clone_from_slice(slice: &[T]) -> Result<GenericArray<T, N>, LengthMismatchError>
    where
        T: panic::RefUnwindSafe + Clone,
    {
        panic::catch_unwind(move || GenericArray::clone_from_slice(slice))
            .map_err(|_| LengthMismatchError {})
    }
}

impl<T, N> GenericArrayExt<T, N> for GenericArray<T, N> where N: ArrayLength<T> {}

///An AES-SIV cipher instance, selected by the length of the raw key
/// material. A 32-byte key selects AES-SIV-CMAC-256 and a 64-byte key
/// AES-SIV-CMAC-512. The aes-siv crate implements no CMAC-384 mode,
/// so 48-byte keys are not accepted.
pub enum SivCipher {
    Cmac256(Aes128SivAead),
    Cmac512(Aes256SivAead),
}

impl SivCipher {
    ///Instantiate a cipher from raw key bytes, or `None` if the
    /// length selects no supported mode.
    pub fn from_key(key: &[u8]) -> Option<SivCipher> {
        match key.len() {
            32 => Some(SivCipher::Cmac256(Aes128SivAead::new(
                Aes128SivKey::from_slice(key),
            ))),
            64 => Some(SivCipher::Cmac512(Aes256SivAead::new(
                Aes256SivKey::from_slice(key),
            ))),
            _ => None,
        }
    }

    ///Encrypt and authenticate `plaintext`, binding `ad` into the tag.
    pub fn seal(&self, nonce: &SivNonce, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, aead::Error> {
        let payload = Payload {
            msg: plaintext,
            aad: ad,
        };
        match self {
            SivCipher::Cmac256(cipher) => cipher.encrypt(nonce, payload),
            SivCipher::Cmac512(cipher) => cipher.encrypt(nonce, payload),
        }
    }

    ///Decrypt and verify `ciphertext` under the same `nonce` and `ad`
    /// it was sealed with.
    pub fn open(&self, nonce: &SivNonce, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, aead::Error> {
        let payload = Payload {
            msg: ciphertext,
            aad: ad,
        };
        match self {
            SivCipher::Cmac256(cipher) => cipher.decrypt(nonce, payload),
            SivCipher::Cmac512(cipher) => cipher.decrypt(nonce, payload),
        }
    }
}
