//! `login.hashed` challenge/response.
use std::time::Duration;

use log::{debug, trace};
use md5::{Digest, Md5};

use crate::{
    client::{Client, Response},
    error::{RconError, Result},
};

const LOGIN_HASHED: &str = "login.hashed";

/// Uppercase hex MD5 of the raw salt bytes followed by the UTF-8 password.
/// `salt_hex` is the salt exactly as the server sends it.
pub fn password_hash(salt_hex: &str, password: &str) -> Result<String> {
    let salt = hex::decode(salt_hex).map_err(|_| RconError::InvalidSalt(salt_hex.to_string()))?;

    let mut hasher = Md5::new();
    hasher.update(&salt);
    hasher.update(password.as_bytes());
    Ok(hex::encode_upper(hasher.finalize()))
}

impl Client {
    /// Logs in with `password`. Two round trips: fetch a salt with
    /// `login.hashed`, then send `login.hashed <hash>`.
    ///
    /// A wrong password is not an error: the returned [Response] has status
    /// `InvalidPasswordHash`. If the server refuses to hand out a salt, that
    /// refusal is returned unchanged.
    pub async fn authenticate(
        &self,
        password: &str,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let salt = self.invoke_words(&[LOGIN_HASHED], timeout).await?;
        if !salt.is_ok() {
            debug!("server refused to send a login salt: {:?}", salt.words());
            return Ok(salt);
        }

        let salt_hex = salt
            .words()
            .get(1)
            .ok_or_else(|| RconError::InvalidSalt(String::new()))?;
        let hash = password_hash(salt_hex, password)?;

        trace!("sending password hash");
        let response = self.invoke_words(&[LOGIN_HASHED, hash.as_str()], timeout).await?;
        debug!("login answered with {:?}", response.status());
        Ok(response)
    }
}
