use deunicode::deunicode;
use rand::Rng;
use regex::Regex;

use crate::{domain::UserProfile, errors::Error, ports::TelegramSession, Result};

const USERNAME_MAX_LEN: usize = 30;

/// Build a public handle from profile fields: non-empty name parts
/// joined with underscores, lower-cased, transliterated to ASCII, with
/// a random numeric suffix. Falls back to a random base when the
/// profile has no usable name.
pub fn generate_username(
    first_name: Option<&str>,
    last_name: Option<&str>,
    rng: &mut impl Rng,
) -> String {
    let mut base = [first_name, last_name]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase().replace(' ', "_"))
        .collect::<Vec<_>>()
        .join("_");

    if base.is_empty() {
        base = (0..8).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    }

    let candidate = format!("{}{}", deunicode(&base), rng.gen_range(100..=2000));

    let sanitizer = Regex::new(r"[^A-Za-z0-9_]").expect("valid regex");
    sanitizer
        .replace_all(&candidate, "")
        .chars()
        .take(USERNAME_MAX_LEN)
        .collect()
}

/// Guarantee the authenticated account has a public handle, generating
/// one if absent. Returns the final profile. Failing to make the handle
/// stick is fatal and not retried.
pub async fn ensure_username<R: Rng + Send>(
    client: &mut dyn TelegramSession,
    rng: &mut R,
) -> Result<UserProfile> {
    let me = client.profile().await?;
    if me.username.is_some() {
        return Ok(me);
    }

    let username = generate_username(me.first_name.as_deref(), me.last_name.as_deref(), rng);
    tracing::info!(account = me.id, username, "assigning generated username");
    client.update_username(&username).await?;

    let me = client.profile().await?;
    if me.username.is_none() {
        return Err(Error::IdentityAssignment);
    }
    Ok(me)
}
