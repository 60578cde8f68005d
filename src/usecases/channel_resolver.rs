//! Channel Resolver: parses the six accepted channel-identifier syntaxes into
//! a canonical key, then resolves that key to a numeric chat id via the
//! platform, caching the result for a TTL window.

use crate::domain::{CanonicalKey, ChannelRef, DomainError, ParsedChannel};
use crate::ports::TgGateway;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Parse a raw channel identifier into a [`ParsedChannel`], applying the six
/// accepted syntaxes in order. Pure function: no platform access.
pub fn parse(input: &str) -> Result<ParsedChannel, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Parse("empty channel identifier".into()));
    }

    // Bare `+code` is shorthand for an invite link.
    if let Some(code) = trimmed.strip_prefix('+') {
        if !code.is_empty() {
            return Ok(ParsedChannel {
                key: CanonicalKey::Name(format!("https://t.me/+{code}")),
                embedded_message_id: None,
            });
        }
    }

    if let Some(name) = trimmed.strip_prefix('@') {
        return parse_username(name);
    }

    if trimmed.contains("t.me/") || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return parse_url(trimmed);
    }

    // Bare numeric string: a platform-assigned id.
    if let Ok(id) = trimmed.parse::<i64>() {
        return Ok(ParsedChannel {
            key: CanonicalKey::Id(id),
            embedded_message_id: None,
        });
    }

    // Bare identifier matching ^[A-Za-z][A-Za-z0-9_]{3,}$
    if is_username_shape(trimmed) {
        return parse_username(trimmed);
    }

    Err(DomainError::Parse(format!(
        "unrecognized channel identifier: {trimmed}"
    )))
}

fn parse_username(name: &str) -> Result<ParsedChannel, DomainError> {
    if !is_username_shape(name) {
        return Err(DomainError::Parse(format!("invalid username: {name}")));
    }
    Ok(ParsedChannel {
        key: CanonicalKey::Name(name.to_string()),
        embedded_message_id: None,
    })
}

fn is_username_shape(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    rest.len() >= 3 && rest.iter().all(|c| c.is_ascii_alphanumeric() || *c == '_')
}

fn parse_url(raw: &str) -> Result<ParsedChannel, DomainError> {
    let without_scheme = raw
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let without_host = without_scheme
        .strip_prefix("t.me/")
        .ok_or_else(|| DomainError::Parse(format!("unsupported host in {raw}")))?;
    let without_host = without_host.trim_end_matches('/');

    if without_host.is_empty() {
        return Err(DomainError::Parse(format!("empty path in {raw}")));
    }

    if let Some(rest) = without_host.strip_prefix("+") {
        return Ok(ParsedChannel {
            key: CanonicalKey::Name(format!("https://t.me/+{rest}")),
            embedded_message_id: None,
        });
    }

    if let Some(rest) = without_host.strip_prefix("joinchat/") {
        return Ok(ParsedChannel {
            key: CanonicalKey::Name(format!("https://t.me/joinchat/{rest}")),
            embedded_message_id: None,
        });
    }

    if let Some(rest) = without_host.strip_prefix("c/") {
        let mut parts = rest.splitn(2, '/');
        let id_part = parts
            .next()
            .ok_or_else(|| DomainError::Parse(format!("missing channel id in {raw}")))?;
        let numeric: i64 = id_part
            .parse()
            .map_err(|_| DomainError::Parse(format!("invalid private channel id in {raw}")))?;
        let full_id = -(1_000_000_000_000i64 + numeric);
        let embedded = parts.next().and_then(|s| s.parse::<i32>().ok());
        return Ok(ParsedChannel {
            key: CanonicalKey::Id(full_id),
            embedded_message_id: embedded,
        });
    }

    let mut segments = without_host.splitn(2, '/');
    let name = segments
        .next()
        .ok_or_else(|| DomainError::Parse(format!("empty path in {raw}")))?;
    if !is_username_shape(name) {
        return Err(DomainError::Parse(format!("invalid username in {raw}")));
    }
    let embedded = segments.next().and_then(|s| s.parse::<i32>().ok());
    Ok(ParsedChannel {
        key: CanonicalKey::Name(name.to_string()),
        embedded_message_id: embedded,
    })
}

/// Parse a list of raw identifiers, dropping and logging failures. The caller
/// receives only valid entries.
pub fn parse_list(inputs: &[String]) -> Vec<ParsedChannel> {
    inputs
        .iter()
        .filter_map(|raw| match parse(raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(input = %raw, error = %e, "dropping unparsable channel identifier");
                None
            }
        })
        .collect()
}

struct CacheEntry {
    channel_ref: ChannelRef,
    fetched_at: Instant,
}

/// Resolves parsed channels to live [`ChannelRef`]s, caching hits for
/// `ttl`. A cache hit never re-invokes the platform within the TTL window.
pub struct ChannelResolver {
    gateway: std::sync::Arc<dyn TgGateway>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ChannelResolver {
    pub fn new(gateway: std::sync::Arc<dyn TgGateway>) -> Self {
        Self::with_ttl(gateway, DEFAULT_TTL)
    }

    pub fn with_ttl(gateway: std::sync::Arc<dyn TgGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a raw identifier to a [`ChannelRef`], consulting the TTL cache
    /// first and falling back to a platform lookup on miss or expiry.
    pub async fn resolve(&self, raw: &str) -> Result<ChannelRef, DomainError> {
        let cache_key = raw.trim().to_string();

        if let Some(entry) = self.cache.lock().unwrap().get(&cache_key) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(input = %raw, "channel resolver cache hit");
                return Ok(entry.channel_ref.clone());
            }
        }

        let parsed = parse(raw)?;
        self.gateway.join_if_needed(&parsed).await?;
        let resolved = self.gateway.resolve_chat(&parsed).await?;

        let channel_ref = ChannelRef {
            raw: raw.to_string(),
            canonical: CanonicalKey::Id(resolved.numeric_id),
            numeric_id: Some(resolved.numeric_id),
            display: resolved.display,
            embedded_message_id: parsed.embedded_message_id,
        };

        self.cache.lock().unwrap().insert(
            cache_key,
            CacheEntry {
                channel_ref: channel_ref.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(channel_ref)
    }

    /// Resolve a list of raw identifiers, dropping entries that fail to parse
    /// or resolve, logging each drop.
    pub async fn resolve_list(&self, raws: &[String]) -> Vec<ChannelRef> {
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            match self.resolve(raw).await {
                Ok(channel_ref) => out.push(channel_ref),
                Err(e) => warn!(input = %raw, error = %e, "dropping unresolvable channel"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_at_username() {
        let parsed = parse("@mychannel").unwrap();
        assert_eq!(parsed.key, CanonicalKey::Name("mychannel".into()));
        assert_eq!(parsed.embedded_message_id, None);
    }

    #[test]
    fn parses_bare_username() {
        let parsed = parse("mychannel").unwrap();
        assert_eq!(parsed.key, CanonicalKey::Name("mychannel".into()));
    }

    #[test]
    fn parses_public_url() {
        let parsed = parse("https://t.me/mychannel").unwrap();
        assert_eq!(parsed.key, CanonicalKey::Name("mychannel".into()));
    }

    #[test]
    fn parses_public_url_with_message_id() {
        let parsed = parse("https://t.me/mychannel/42").unwrap();
        assert_eq!(parsed.key, CanonicalKey::Name("mychannel".into()));
        assert_eq!(parsed.embedded_message_id, Some(42));
    }

    #[test]
    fn parses_private_numeric_id() {
        let parsed = parse("-1001234567890").unwrap();
        assert_eq!(parsed.key, CanonicalKey::Id(-1001234567890));
    }

    #[test]
    fn parses_private_url() {
        let parsed = parse("https://t.me/c/1234567890/99").unwrap();
        assert_eq!(parsed.key, CanonicalKey::Id(-1001234567890));
        assert_eq!(parsed.embedded_message_id, Some(99));
    }

    #[test]
    fn parses_invite_link_url() {
        let parsed = parse("https://t.me/+AbCdEf123").unwrap();
        assert_eq!(
            parsed.key,
            CanonicalKey::Name("https://t.me/+AbCdEf123".into())
        );
    }

    #[test]
    fn parses_joinchat_url() {
        let parsed = parse("https://t.me/joinchat/AbCdEf123").unwrap();
        assert_eq!(
            parsed.key,
            CanonicalKey::Name("https://t.me/joinchat/AbCdEf123".into())
        );
    }

    #[test]
    fn parses_bare_invite_code() {
        let parsed = parse("+AbCdEf123").unwrap();
        assert_eq!(
            parsed.key,
            CanonicalKey::Name("https://t.me/+AbCdEf123".into())
        );
    }

    #[test]
    fn rejects_too_short_username() {
        assert!(parse("ab").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("!!!not-valid!!!").is_err());
    }

    #[test]
    fn parse_list_drops_invalid_entries() {
        let inputs = vec![
            "@valid1".to_string(),
            "!!!".to_string(),
            "@valid2".to_string(),
        ];
        let parsed = parse_list(&inputs);
        assert_eq!(parsed.len(), 2);
    }
}
