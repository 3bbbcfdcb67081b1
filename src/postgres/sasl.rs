//! SCRAM-SHA-256 client per RFC 5802 / RFC 7677.
//!
//! Only the `SCRAM-SHA-256` mechanism without channel binding is
//! implemented; the gs2 header is therefore always `n,,` (`biws` in
//! base64).
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::connection::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// The mechanism this client selects from `AuthenticationSASL`.
pub(crate) const MECHANISM: &str = "SCRAM-SHA-256";

pub(crate) struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,

    // derived by server_first, verified against server_final
    server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let nonce: [u8; 16] = rand::random();
        Self::with_nonce(username, password, BASE64.encode(nonce))
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            server_signature: None,
        }
    }

    /// The client-first message: gs2 header plus `n=<user>,r=<nonce>`.
    ///
    /// Postgres ignores the username here (it was sent in the startup
    /// message), but it is part of the signed AuthMessage either way.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.client_nonce)
    }

    /// Process the server-first message `r=<nonce>,s=<salt>,i=<iterations>`
    /// and produce the client-final message carrying the proof.
    pub fn server_first(&mut self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let message = std::str::from_utf8(data)
            .map_err(|_| AuthError::sasl("non UTF-8 server-first message"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in message.split(',') {
            if let Some(value) = attr.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = attr.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|_| AuthError::sasl("invalid base64 salt"))?,
                );
            } else if let Some(value) = attr.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| AuthError::sasl("invalid iteration count"))?,
                );
            }
        }

        let nonce = nonce.ok_or_else(|| AuthError::sasl("missing nonce"))?;
        let salt = salt.ok_or_else(|| AuthError::sasl("missing salt"))?;
        let iterations = iterations.ok_or_else(|| AuthError::sasl("missing iteration count"))?;

        // the combined nonce must extend ours, anything else is a replay
        if !nonce.starts_with(self.client_nonce.as_str()) || nonce.len() <= self.client_nonce.len()
        {
            return Err(AuthError::sasl("server nonce does not extend client nonce"));
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|_| AuthError::sasl("pbkdf2 failed"))?;

        let client_final_without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            message,
            client_final_without_proof,
        );

        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        let server_key = hmac(&salted_password, b"Server Key");
        self.server_signature = Some(hmac(&server_key, auth_message.as_bytes()));

        Ok(format!("{client_final_without_proof},p={}", BASE64.encode(proof)).into_bytes())
    }

    /// Verify the `v=<signature>` of the server-final message.
    ///
    /// A mismatch means the server never knew the password; it is fatal,
    /// not a condition to log.
    pub fn verify_server_final(&self, data: &[u8]) -> Result<(), AuthError> {
        let message = std::str::from_utf8(data)
            .map_err(|_| AuthError::sasl("non UTF-8 server-final message"))?;

        let signature = message
            .strip_prefix("v=")
            .ok_or_else(|| AuthError::sasl("malformed server-final message"))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|_| AuthError::sasl("invalid base64 server signature"))?;

        let expected = self
            .server_signature
            .ok_or_else(|| AuthError::sasl("server-final before server-first"))?;

        if signature != expected {
            return Err(AuthError::sasl("server signature mismatch"));
        }
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod test {
    use super::ScramClient;

    // RFC 7677 section 3 test vector
    const USER: &str = "user";
    const PASS: &str = "pencil";
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
        p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let mut client = ScramClient::with_nonce(USER, PASS, CLIENT_NONCE.to_string());

        assert_eq!(
            client.client_first(),
            format!("n,,n={USER},r={CLIENT_NONCE}").into_bytes(),
        );

        let client_final = client.server_first(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(client_final, CLIENT_FINAL.as_bytes());

        client.verify_server_final(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn tampered_server_signature_is_fatal() {
        let mut client = ScramClient::with_nonce(USER, PASS, CLIENT_NONCE.to_string());
        client.server_first(SERVER_FIRST.as_bytes()).unwrap();
        let err = client.verify_server_final(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(err.is_err());
    }

    #[test]
    fn foreign_nonce_rejected() {
        let mut client = ScramClient::with_nonce(USER, PASS, "ownnonce".to_string());
        let err = client.server_first(b"r=stranger,s=AAAA,i=4096");
        assert!(err.is_err());
    }
}
