use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::GenerationContext;
use crate::counter_state::{CounterState, GeneratedNumber};
use crate::error::StorageError;
use crate::number_assembler::PatternEvaluator;
use crate::sequence_config::SequenceConfig;
use crate::sequence_store::{format_number, ResetOutcome, SequenceStore};
use crate::settings::GeneratorSettings;

// Each sequence is a hash: counter, timestamp_ms, last_reset_ms ("" when never reset)
// and the JSON config it was last saved with.

// Returns nil when the sequence was created, otherwise the stored config.
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('HGET', KEYS[1], 'config') or ''
end
redis.call('HSET', KEYS[1],
  'counter', 0, 'timestamp_ms', ARGV[1], 'last_reset_ms', '', 'config', ARGV[2])
return false
"#;

// Returns {applied (1 or 0), counter, timestamp_ms, last_reset_ms}; the state is the
// new one when applied, otherwise the current one.
const RESET_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'counter', 'timestamp_ms', 'last_reset_ms')
if not cur[1] then
  return false
end
local last_reset = cur[3] or ''
if cur[1] == ARGV[1] and cur[2] == ARGV[2] and last_reset == ARGV[3] then
  redis.call('HSET', KEYS[1], 'counter', ARGV[4], 'timestamp_ms', ARGV[5], 'last_reset_ms', ARGV[6])
  return {1, ARGV[4], ARGV[5], ARGV[6]}
end
return {0, cur[1], cur[2], last_reset}
"#;

const INCREMENT_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'counter', 'last_reset_ms')
if not cur[1] then
  return false
end
local last_reset = cur[2] or ''
local limit = tonumber(ARGV[3])
if limit and tonumber(cur[1]) >= limit then
  redis.call('HSET', KEYS[1], 'counter', 0)
  last_reset = ARGV[2]
end
local counter = redis.call('HINCRBY', KEYS[1], 'counter', ARGV[1])
redis.call('HSET', KEYS[1], 'timestamp_ms', ARGV[2], 'last_reset_ms', last_reset)
return {counter, ARGV[2], last_reset}
"#;

/// [`SequenceStore`] backed by Redis.
///
/// Create, reset and increment each run as a single Lua script, so Redis serializes
/// them per key. Timestamps are stored with millisecond precision.
///
/// The number is formatted after the increment script has committed. A formatting
/// failure at that point leaves a gap in the counter; [`crate::GenerationService`]
/// evaluates the pattern before incrementing so only a store-side evaluator that
/// disagrees with the service's can hit it.
pub struct RedisSequenceStore {
    client: Client,
    key_prefix: String,
    evaluator: Arc<dyn PatternEvaluator>,
    create_script: Script,
    reset_script: Script,
    increment_script: Script,
}

impl RedisSequenceStore {
    pub fn new(
        redis_url: &str,
        key_prefix: impl Into<String>,
        evaluator: Arc<dyn PatternEvaluator>,
    ) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        Ok(RedisSequenceStore {
            client,
            key_prefix: key_prefix.into(),
            evaluator,
            create_script: Script::new(CREATE_SCRIPT),
            reset_script: Script::new(RESET_SCRIPT),
            increment_script: Script::new(INCREMENT_SCRIPT),
        })
    }

    pub fn from_settings(
        settings: &GeneratorSettings,
        evaluator: Arc<dyn PatternEvaluator>,
    ) -> Result<Self, StorageError> {
        let url = settings.redis_url.as_deref().ok_or_else(|| {
            StorageError::NotConfigured("NUMGEN_REDIS_URL is not set".to_string())
        })?;
        Self::new(url, settings.redis_key_prefix.clone(), evaluator)
    }

    pub fn key(&self, config: &SequenceConfig) -> String {
        format!(
            "{}:seq:{}:{}",
            self.key_prefix, config.tenant_id, config.sequence_name
        )
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// The configuration the sequence was last saved with, if it exists.
    pub async fn stored_config(
        &self,
        config: &SequenceConfig,
    ) -> Result<Option<SequenceConfig>, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(config);
        let raw: Option<String> = conn.hget(&key, "config").await?;
        raw.filter(|raw| !raw.is_empty())
            .map(|raw| decode_config(&key, &raw))
            .transpose()
    }
}

fn encode_millis(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.timestamp_millis().to_string())
        .unwrap_or_default()
}

fn decode_millis(
    key: &str,
    field: &str,
    raw: &str,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let corrupt = |reason: String| StorageError::CorruptState {
        key: key.to_string(),
        reason,
    };
    let millis: i64 = raw
        .parse()
        .map_err(|_| corrupt(format!("{} is not an integer: `{}`", field, raw)))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Some)
        .ok_or_else(|| corrupt(format!("{} out of range: {}", field, millis)))
}

fn decode_state(
    key: &str,
    counter: &str,
    timestamp: &str,
    last_reset: &str,
) -> Result<CounterState, StorageError> {
    let counter: u64 = counter.parse().map_err(|_| StorageError::CorruptState {
        key: key.to_string(),
        reason: format!("counter is not an integer: `{}`", counter),
    })?;
    let timestamp =
        decode_millis(key, "timestamp_ms", timestamp)?.ok_or_else(|| StorageError::CorruptState {
            key: key.to_string(),
            reason: "timestamp_ms is empty".to_string(),
        })?;
    Ok(CounterState {
        counter,
        timestamp,
        last_reset_at: decode_millis(key, "last_reset_ms", last_reset)?,
    })
}

fn decode_config(key: &str, raw: &str) -> Result<SequenceConfig, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::CorruptState {
        key: key.to_string(),
        reason: format!("config is not valid JSON: {}", e),
    })
}

#[async_trait]
impl SequenceStore for RedisSequenceStore {
    async fn exists(&self, config: &SequenceConfig) -> Result<bool, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(self.key(config)).await?;
        Ok(exists)
    }

    async fn save_sequence(
        &self,
        config: &SequenceConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(config);
        let encoded = serde_json::to_string(config)?;
        let existing: Option<String> = self
            .create_script
            .key(&key)
            .arg(now.timestamp_millis())
            .arg(&encoded)
            .invoke_async(&mut conn)
            .await?;

        match existing {
            None => debug!(%key, "created sequence"),
            Some(raw) if raw.is_empty() => {
                let _: () = conn.hset(&key, "config", &encoded).await?;
            }
            Some(raw) => {
                let stored = decode_config(&key, &raw)?;
                if stored.pattern != config.pattern {
                    warn!(
                        %key,
                        stored = %stored.pattern,
                        requested = %config.pattern,
                        "sequence key reused with a different pattern"
                    );
                }
                if stored != *config {
                    let _: () = conn.hset(&key, "config", &encoded).await?;
                }
            }
        }
        Ok(())
    }

    async fn get_current_state(
        &self,
        config: &SequenceConfig,
    ) -> Result<CounterState, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(config);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Err(StorageError::SequenceNotFound(key));
        }
        let field = |name: &str| fields.get(name).map(String::as_str).unwrap_or("");
        decode_state(
            &key,
            field("counter"),
            field("timestamp_ms"),
            field("last_reset_ms"),
        )
    }

    async fn reset(
        &self,
        config: &SequenceConfig,
        expected: &CounterState,
        new_state: CounterState,
    ) -> Result<ResetOutcome, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(config);
        let reply: Option<(i64, String, String, String)> = self
            .reset_script
            .key(&key)
            .arg(expected.counter.to_string())
            .arg(expected.timestamp.timestamp_millis().to_string())
            .arg(encode_millis(expected.last_reset_at))
            .arg(new_state.counter.to_string())
            .arg(new_state.timestamp.timestamp_millis().to_string())
            .arg(encode_millis(new_state.last_reset_at))
            .invoke_async(&mut conn)
            .await?;
        let (applied, counter, timestamp, last_reset) =
            reply.ok_or_else(|| StorageError::SequenceNotFound(key.clone()))?;
        let state = decode_state(&key, &counter, &timestamp, &last_reset)?;
        Ok(if applied == 1 {
            ResetOutcome::Applied(state)
        } else {
            ResetOutcome::Skipped(state)
        })
    }

    async fn lock_and_increment(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<GeneratedNumber, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(config);
        let limit = config
            .reset_limit
            .map(|l| l.to_string())
            .unwrap_or_default();
        let reply: Option<(u64, String, String)> = self
            .increment_script
            .key(&key)
            .arg(config.step_size)
            .arg(now.timestamp_millis())
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        let (counter, timestamp, last_reset) =
            reply.ok_or_else(|| StorageError::SequenceNotFound(key.clone()))?;
        let state = decode_state(&key, &counter.to_string(), &timestamp, &last_reset)?;
        format_number(self.evaluator.as_ref(), config, &state, context)
    }
}
