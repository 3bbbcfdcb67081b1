//! The startup phase: authentication handshake until `ReadyForQuery`.
use bytes::Bytes;
use std::collections::HashMap;

use super::Config;
use crate::{
    common::{ByteStr, general},
    error::Result,
    net::BufferedSocket,
    postgres::{
        BackendProtocol, DatabaseError, FrontendProtocol, ProtocolError,
        backend::{
            Authentication, BackendKeyData, NegotiateProtocolVersion, ParameterStatus,
            ReadyForQuery,
        },
        frontend,
        sasl::{self, ScramClient},
    },
};

/// Authentication failure before the connection was usable.
#[derive(thiserror::Error)]
#[error("{reason}")]
pub struct AuthError {
    reason: std::borrow::Cow<'static, str>,
}

impl AuthError {
    pub(crate) fn sasl(reason: &'static str) -> Self {
        Self { reason: general!("SCRAM exchange failed: {reason}") }
    }

    fn unsupported(code: i32) -> Self {
        Self { reason: general!("unsupported authentication method (code {code})") }
    }
}

impl std::fmt::Debug for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Everything the startup phase leaves behind.
pub(super) struct StartupData {
    /// Prebuilt `CancelRequest` frame from `BackendKeyData`.
    pub cancel_frame: Option<Bytes>,
    /// Server parameters reported during startup.
    pub parameters: HashMap<ByteStr, ByteStr>,
}

/// Drive the startup phase on a fresh stream.
///
/// Legal incoming messages are the `Authentication*` family,
/// `ParameterStatus`, `BackendKeyData` and the terminal `ReadyForQuery`,
/// which succeeds iff authentication completed. A
/// `NegotiateProtocolVersion` is fatal: the server cannot speak protocol
/// 3.0 in full.
pub(super) async fn startup(stream: &mut BufferedSocket, config: &Config) -> Result<StartupData> {
    frontend::Startup { user: config.user.as_str(), database: Some(config.dbname.as_str()) }
        .encode(stream.write_buf_mut());
    stream.flush().await?;

    let mut auth_ok = false;
    let mut scram: Option<ScramClient> = None;
    let mut data = StartupData { cancel_frame: None, parameters: HashMap::new() };

    loop {
        let (tag, body) = stream.frame().await?;
        match tag {
            Authentication::FORMAT => {
                match Authentication::decode(tag, body)? {
                    Authentication::Ok => auth_ok = true,
                    Authentication::CleartextPassword => {
                        frontend::PasswordMessage { password: config.pass.as_str() }
                            .encode(stream.write_buf_mut());
                        stream.flush().await?;
                    }
                    Authentication::Md5Password { salt } => {
                        let hashed = md5_password(&config.user, &config.pass, salt);
                        frontend::PasswordMessage { password: &hashed }
                            .encode(stream.write_buf_mut());
                        stream.flush().await?;
                    }
                    Authentication::Sasl { mechanisms } => {
                        if !mechanisms.iter().any(|m| *m == *sasl::MECHANISM) {
                            return Err(AuthError {
                                reason: general!(
                                    "server offers none of the supported SASL mechanisms: {mechanisms:?}"
                                ),
                            }
                            .into());
                        }
                        let client = ScramClient::new(&config.user, &config.pass);
                        frontend::SaslInitialResponse {
                            mechanism: sasl::MECHANISM,
                            response: &client.client_first(),
                        }
                        .encode(stream.write_buf_mut());
                        stream.flush().await?;
                        scram = Some(client);
                    }
                    Authentication::SaslContinue { data } => {
                        let Some(client) = scram.as_mut() else {
                            return Err(ProtocolError::new(general!(
                                "SASL challenge without a SASL exchange"
                            ))
                            .into());
                        };
                        let response = client.server_first(&data)?;
                        frontend::SaslResponse { data: &response }
                            .encode(stream.write_buf_mut());
                        stream.flush().await?;
                    }
                    Authentication::SaslFinal { data } => {
                        let Some(client) = scram.as_ref() else {
                            return Err(ProtocolError::new(general!(
                                "SASL outcome without a SASL exchange"
                            ))
                            .into());
                        };
                        // mismatch is fatal, the server never knew the password
                        client.verify_server_final(&data)?;
                    }
                    Authentication::Unsupported(code) => {
                        return Err(AuthError::unsupported(code).into());
                    }
                }
            }
            BackendKeyData::FORMAT => {
                let key = BackendKeyData::decode(tag, body)?;
                data.cancel_frame =
                    Some(frontend::cancel_frame(key.process_id, key.secret_key));
            }
            ParameterStatus::FORMAT => {
                let status = ParameterStatus::decode(tag, body)?;
                data.parameters.insert(status.name, status.value);
            }
            ReadyForQuery::FORMAT => {
                return match auth_ok {
                    true => Ok(data),
                    false => Err(ProtocolError::new(general!(
                        "ReadyForQuery before authentication completed"
                    ))
                    .into()),
                };
            }
            NegotiateProtocolVersion::FORMAT => {
                let nego = NegotiateProtocolVersion::decode(tag, body)?;
                return Err(ProtocolError::new(general!(
                    "server only speaks protocol 3.{} with {} unrecognized options",
                    nego.newest_minor,
                    nego.unrecognized_options.len(),
                ))
                .into());
            }
            b'E' => return Err(DatabaseError::parse(body)?.into()),
            b'N' => match DatabaseError::parse(body) {
                Ok(notice) => {
                    tracing::warn!(severity = %notice.severity, "{}", notice.message);
                }
                Err(err) => return Err(err.into()),
            },
            other => {
                return Err(ProtocolError::new(general!(
                    "unexpected message {:?} during startup",
                    crate::ext::LossyFmt(&[other]),
                ))
                .into());
            }
        }
    }
}

/// Compute the MD5 password response: `"md5" + md5(md5(password || user) || salt)`.
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    use std::fmt::Write;

    let inner = md5::compute(format!("{password}{user}").as_bytes());

    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    let outer = md5::compute(&outer_input);

    let mut out = String::with_capacity(35);
    out.push_str("md5");
    write!(&mut out, "{outer:x}").expect("write to String");
    out
}

#[cfg(test)]
mod test {
    use super::md5_password;

    #[test]
    fn md5_response_shape() {
        let hashed = md5_password("postgres", "secret", *b"salt");
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 35);
        assert!(hashed[3..].bytes().all(|b| b.is_ascii_hexdigit()));
        // deterministic
        assert_eq!(hashed, md5_password("postgres", "secret", *b"salt"));
        assert_ne!(hashed, md5_password("postgres", "secret", *b"tlas"));
    }
}
