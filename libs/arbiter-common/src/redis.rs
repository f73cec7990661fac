use crate::types::Challenge;
use redis::{AsyncCommands, RedisResult};

/// Redis key semantics for the challenge store.
/// The evaluation service only reads these keys; the CLI seeds them.

pub const CHALLENGE_PREFIX: &str = "arbiter:challenge";

/// Generate deterministic key for a challenge
pub fn challenge_key(challenge_id: &str) -> String {
    format!("{}:{}", CHALLENGE_PREFIX, challenge_id)
}

/// Store a challenge record (no TTL, content is long-lived)
pub async fn store_challenge(
    conn: &mut redis::aio::ConnectionManager,
    challenge: &Challenge,
) -> RedisResult<()> {
    let key = challenge_key(&challenge.id);
    let payload = serde_json::to_string(challenge)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string())))?;

    conn.set(&key, payload).await
}

/// Retrieve a challenge record
pub async fn get_challenge(
    conn: &mut redis::aio::ConnectionManager,
    challenge_id: &str,
) -> RedisResult<Option<Challenge>> {
    let key = challenge_key(challenge_id);
    let payload: Option<String> = conn.get(&key).await?;

    match payload {
        Some(data) => {
            let challenge: Challenge = serde_json::from_str(&data)
                .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string())))?;
            Ok(Some(challenge))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_key_format() {
        assert_eq!(challenge_key("two-sum"), "arbiter:challenge:two-sum");
    }

    #[test]
    fn test_challenge_key_deterministic() {
        let key1 = challenge_key("64f1c0de");
        let key2 = challenge_key("64f1c0de");
        assert_eq!(key1, key2);
        assert!(key1.starts_with("arbiter:challenge:"));
    }
}
