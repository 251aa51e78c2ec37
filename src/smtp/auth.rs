use base64::Engine;
use secrecy::{ExposeSecret, Secret};

use super::connection::{Connection, Reply};
use super::TransportError;

// A well-behaved server asks twice; anything beyond that is a loop.
const MAX_PROMPTS: usize = 4;

/// AUTH LOGIN: answers each decoded 334 prompt until the server reports
/// success or refuses.
pub async fn login(
    connection: &mut Connection,
    username: &str,
    password: &Secret<String>,
) -> Result<(), TransportError> {
    let mut reply = connection.command("AUTH LOGIN").await?;
    for _ in 0..MAX_PROMPTS {
        if reply.is_positive() {
            tracing::debug!("Authenticated");
            return Ok(());
        }
        if reply.code != 334 {
            return Err(rejected(&reply));
        }
        let answer = match decode_prompt(&reply)?.as_str() {
            "username:" => encode(username),
            "password:" => encode(password.expose_secret()),
            other => {
                return Err(TransportError::Auth(format!(
                    "Unexpected AUTH LOGIN prompt `{other}`"
                )))
            }
        };
        reply = connection.command_secret(&answer).await?;
    }
    if reply.is_positive() {
        Ok(())
    } else {
        Err(TransportError::Auth(
            "Server kept prompting for credentials".into(),
        ))
    }
}

fn decode_prompt(reply: &Reply) -> Result<String, TransportError> {
    let encoded = reply.text();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransportError::Auth(format!("Undecodable prompt `{encoded}`: {e}")))?;
    Ok(String::from_utf8_lossy(&decoded).trim().to_lowercase())
}

fn encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn rejected(reply: &Reply) -> TransportError {
    TransportError::Auth(format!("{} {}", reply.code, reply.text()))
}
