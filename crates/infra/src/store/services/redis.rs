//! Redis-backed `HashService` (optional, `redis` feature).

use std::time::Duration;

use redis::Commands;

use rowforge_core::ColumnMap;

use super::{HashService, ListEnd, ServiceError};

fn command_err(err: redis::RedisError) -> ServiceError {
    ServiceError::Command(err.to_string())
}

/// Escape glob metacharacters so a raw key prefix can be used in `MATCH`.
fn glob_escape(prefix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 1);
    for b in prefix {
        if matches!(b, b'*' | b'?' | b'[' | b']' | b'\\') {
            out.push(b'\\');
        }
        out.push(*b);
    }
    out.push(b'*');
    out
}

/// Hash-map service talking to a Redis server.
///
/// Opens a connection per call.
#[derive(Debug, Clone)]
pub struct RedisHashService {
    client: redis::Client,
}

impl RedisHashService {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, ServiceError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ServiceError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    fn connection(&self) -> Result<redis::Connection, ServiceError> {
        self.client
            .get_connection()
            .map_err(|e| ServiceError::Connection(e.to_string()))
    }
}

impl HashService for RedisHashService {
    fn hset_multiple(
        &self,
        key: &[u8],
        fields: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), ServiceError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let _: () = conn.hset_multiple(key, fields).map_err(command_err)?;
        Ok(())
    }

    fn hgetall(&self, key: &[u8]) -> Result<ColumnMap, ServiceError> {
        let mut conn = self.connection()?;
        conn.hgetall(key).map_err(command_err)
    }

    fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        let mut conn = self.connection()?;
        conn.hkeys(key).map_err(command_err)
    }

    fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        let mut conn = self.connection()?;
        conn.hget(key, field).map_err(command_err)
    }

    fn hdel(&self, key: &[u8], field: &[u8]) -> Result<(), ServiceError> {
        let mut conn = self.connection()?;
        let _: i64 = conn.hdel(key, field).map_err(command_err)?;
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<(), ServiceError> {
        let mut conn = self.connection()?;
        let _: i64 = conn.del(key).map_err(command_err)?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, ServiceError> {
        let mut conn = self.connection()?;
        conn.exists(key).map_err(command_err)
    }

    fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool, ServiceError> {
        let mut conn = self.connection()?;
        conn.set_nx(key, value).map_err(command_err)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        let mut conn = self.connection()?;
        let keys: Vec<Vec<u8>> = conn
            .scan_match::<_, Vec<u8>>(glob_escape(prefix))
            .map_err(command_err)?
            .collect();
        Ok(keys)
    }

    fn sadd(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
        let mut conn = self.connection()?;
        let _: i64 = conn.sadd(key, member).map_err(command_err)?;
        Ok(())
    }

    fn srem(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
        let mut conn = self.connection()?;
        let _: i64 = conn.srem(key, member).map_err(command_err)?;
        Ok(())
    }

    fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        let mut conn = self.connection()?;
        conn.smembers(key).map_err(command_err)
    }

    fn push(&self, key: &[u8], value: &[u8], end: ListEnd) -> Result<(), ServiceError> {
        let mut conn = self.connection()?;
        let command = match end {
            ListEnd::Head => "LPUSH",
            ListEnd::Tail => "RPUSH",
        };
        let _: i64 = redis::cmd(command)
            .arg(key)
            .arg(value)
            .query(&mut conn)
            .map_err(command_err)?;
        Ok(())
    }

    fn blocking_pop(
        &self,
        keys: &[Vec<u8>],
        timeout: Duration,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, ServiceError> {
        if keys.is_empty() {
            return Ok(None);
        }
        let mut conn = self.connection()?;

        // BLPOP treats 0 as "wait forever"; a zero timeout means one pass.
        if timeout.is_zero() {
            for key in keys {
                let value: Option<Vec<u8>> = redis::cmd("LPOP")
                    .arg(key)
                    .query(&mut conn)
                    .map_err(command_err)?;
                if let Some(value) = value {
                    return Ok(Some((key.clone(), value)));
                }
            }
            return Ok(None);
        }

        redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout.as_secs_f64())
            .query(&mut conn)
            .map_err(command_err)
    }

    fn list_len(&self, key: &[u8]) -> Result<usize, ServiceError> {
        let mut conn = self.connection()?;
        conn.llen(key).map_err(command_err)
    }

    fn flush_all(&self) -> Result<(), ServiceError> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("FLUSHDB")
            .query(&mut conn)
            .map_err(command_err)?;
        Ok(())
    }
}
