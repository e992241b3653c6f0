//! Shared cache backend over Redis.
//!
//! Values are stored as JSON with `SETEX` so the server enforces TTLs.
//! Every call is bounded by the configured timeout; any failure, including a
//! timeout, is logged and counted, then degrades to a miss or a no-op.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, PoolConfig, Runtime};
use metrics::counter;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, CacheError, CacheStats, KindStats};
use super::config::CacheConfig;
use super::keys::{CacheKey, CacheKind};
use super::value::CacheValue;

const SOURCE: &str = "cache::remote";
const METRIC_CACHE_ERROR_TOTAL: &str = "watchlazy_cache_error_total";
const SCAN_BATCH: usize = 200;
/// Keyspace walks may spend this many single-operation timeouts in total.
const SCAN_BUDGET_FACTOR: u32 = 20;

pub struct RemoteCache {
    pool: Pool,
    namespace: String,
    timeout: Duration,
    scan_timeout: Duration,
}

impl RemoteCache {
    /// Build the pool and probe the server once.
    pub async fn connect(url: &str, config: &CacheConfig) -> Result<Self, CacheError> {
        let timeout = config.remote_timeout();

        let mut pool_config = PoolConfig::new(config.remote_pool_size.max(1));
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let mut redis_config = RedisConfig::from_url(url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;
        let cache = Self {
            pool,
            namespace: config.remote_namespace.clone(),
            timeout,
            scan_timeout: timeout * SCAN_BUDGET_FACTOR,
        };

        cache.ping().await?;
        info!(target = SOURCE, namespace = %cache.namespace, "Connected to shared cache");
        Ok(cache)
    }

    fn full_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.namespace, key.storage_key())
    }

    fn kind_index(&self, full_key: &str) -> Option<usize> {
        let key = full_key
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(':')?;
        CacheKind::ALL
            .iter()
            .position(|kind| key.starts_with(kind.prefix()))
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }

    async fn within_scan_budget<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.scan_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout(self.scan_timeout))?
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, CacheError>(())
        })
        .await
    }

    async fn try_get(&self, key: &CacheKey) -> Result<Option<CacheValue>, CacheError> {
        let full_key = self.full_key(key);
        let payload: Option<String> = self
            .bounded(async {
                let mut conn = self.pool.get().await?;
                let payload: Option<String> = conn.get(&full_key).await?;
                Ok::<_, CacheError>(payload)
            })
            .await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn try_set(
        &self,
        key: &CacheKey,
        value: &CacheValue,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let full_key = self.full_key(key);
        let payload = serde_json::to_string(value)?;
        let ttl_secs = ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            let _: () = conn.set_ex(&full_key, payload, ttl_secs).await?;
            Ok::<_, CacheError>(())
        })
        .await
    }

    /// Collect every key under the namespace. Each SCAN page is bounded by the
    /// operation timeout and the whole walk by the scan budget.
    async fn scan_namespace(&self) -> Result<Vec<String>, CacheError> {
        let pattern = format!("{}:*", self.namespace);
        self.within_scan_budget(async {
            let mut conn = self
                .bounded(async { Ok::<_, CacheError>(self.pool.get().await?) })
                .await?;
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = self
                    .bounded(async {
                        let page = redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_BATCH)
                            .query_async(&mut conn)
                            .await?;
                        Ok::<_, CacheError>(page)
                    })
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, CacheError>(keys)
        })
        .await
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.within_scan_budget(async {
            let mut conn = self
                .bounded(async { Ok::<_, CacheError>(self.pool.get().await?) })
                .await?;
            for chunk in keys.chunks(SCAN_BATCH) {
                self.bounded(async {
                    let _: () = conn.del(chunk.to_vec()).await?;
                    Ok::<_, CacheError>(())
                })
                .await?;
            }
            Ok::<_, CacheError>(())
        })
        .await
    }

    fn record_error(op: &'static str, key: Option<&CacheKey>, err: &CacheError) {
        counter!(METRIC_CACHE_ERROR_TOTAL, "backend" => "remote", "op" => op).increment(1);
        match err {
            CacheError::Codec(_) => warn!(
                target = SOURCE,
                op,
                key = key.map(ToString::to_string).unwrap_or_default(),
                error = %err,
                "Discarding undecodable cache entry"
            ),
            _ => debug!(
                target = SOURCE,
                op,
                key = key.map(ToString::to_string).unwrap_or_default(),
                error = %err,
                "Shared cache operation failed"
            ),
        }
    }
}

#[async_trait]
impl CacheBackend for RemoteCache {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        match self.try_get(key).await {
            Ok(value) => value.filter(|value| value.kind() == key.kind()),
            Err(err) => {
                Self::record_error("get", Some(key), &err);
                None
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: CacheValue, ttl: Duration) {
        if let Err(err) = self.try_set(key, &value, ttl).await {
            Self::record_error("set", Some(key), &err);
        }
    }

    async fn invalidate_all(&self) -> Result<(), CacheError> {
        let result = async {
            let keys = self.scan_namespace().await?;
            self.delete_keys(&keys).await?;
            Ok::<usize, CacheError>(keys.len())
        }
        .await;

        match result {
            Ok(removed) => {
                debug!(target = SOURCE, removed, "Cleared shared cache entries");
                Ok(())
            }
            Err(err) => {
                Self::record_error("invalidate_all", None, &err);
                Err(err)
            }
        }
    }

    async fn stats(&self) -> CacheStats {
        let connected = self.is_connected().await;
        let mut sizes = vec![0usize; CacheKind::ALL.len()];
        if connected {
            match self.scan_namespace().await {
                Ok(keys) => {
                    for index in keys.iter().filter_map(|key| self.kind_index(key)) {
                        sizes[index] += 1;
                    }
                }
                Err(err) => Self::record_error("stats", None, &err),
            }
        }
        let kinds = CacheKind::ALL
            .iter()
            .zip(sizes)
            .map(|(kind, size)| KindStats {
                kind: kind.as_str(),
                size,
                capacity: None,
            })
            .collect();
        CacheStats {
            backend: self.name(),
            connected,
            kinds,
        }
    }

    async fn is_connected(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(err) => {
                Self::record_error("ping", None, &err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Minimal RESP server. Replies to PING, answers GET with a payload that
    /// is not a cache value and everything else with OK. While `stalled` is
    /// set it keeps reading commands but never replies.
    async fn fake_redis(stalled: Arc<AtomicBool>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&stalled)));
            }
        });
        format!("redis://{addr}")
    }

    async fn serve(mut socket: TcpStream, stalled: Arc<AtomicBool>) {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(read) => read,
            };
            buffer.extend_from_slice(&chunk[..read]);
            while let Some((args, used)) = parse_command(&buffer) {
                buffer.drain(..used);
                if stalled.load(Ordering::SeqCst) {
                    continue;
                }
                if socket.write_all(reply_to(&args).as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }

    fn parse_command(buffer: &[u8]) -> Option<(Vec<String>, usize)> {
        let mut pos = 0;
        let count: usize = read_line(buffer, &mut pos)?
            .strip_prefix('*')?
            .parse()
            .ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let len: usize = read_line(buffer, &mut pos)?
                .strip_prefix('$')?
                .parse()
                .ok()?;
            let end = pos + len;
            if buffer.len() < end + 2 {
                return None;
            }
            args.push(String::from_utf8_lossy(&buffer[pos..end]).into_owned());
            pos = end + 2;
        }
        Some((args, pos))
    }

    fn read_line(buffer: &[u8], pos: &mut usize) -> Option<String> {
        let rest = buffer.get(*pos..)?;
        let end = rest.windows(2).position(|window| window == b"\r\n")?;
        let line = String::from_utf8_lossy(&rest[..end]).into_owned();
        *pos += end + 2;
        Some(line)
    }

    fn reply_to(args: &[String]) -> String {
        let command = args.first().map(|arg| arg.to_ascii_uppercase());
        match command.as_deref() {
            Some("PING") => match args.get(1) {
                Some(echo) => format!("${}\r\n{}\r\n", echo.len(), echo),
                None => "+PONG\r\n".to_string(),
            },
            Some("GET") => "$8\r\nnot json\r\n".to_string(),
            Some("SCAN") => {
                let keys = ["watchlazy:top_rated:top:10", "watchlazy:search:heat"];
                let mut reply = format!("*2\r\n$1\r\n0\r\n*{}\r\n", keys.len());
                for key in keys {
                    reply.push_str(&format!("${}\r\n{}\r\n", key.len(), key));
                }
                reply
            }
            _ => "+OK\r\n".to_string(),
        }
    }

    fn config(timeout_ms: u64) -> CacheConfig {
        CacheConfig {
            remote_timeout_ms: timeout_ms,
            remote_pool_size: 2,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_a_miss() {
        let url = fake_redis(Arc::new(AtomicBool::new(false))).await;
        let cache = RemoteCache::connect(&url, &config(500))
            .await
            .expect("connect");

        assert!(cache.get(&CacheKey::movie("heat-1995")).await.is_none());
        assert!(cache.invalidate_all().await.is_ok());
    }

    #[tokio::test]
    async fn stats_count_scanned_keys_per_kind() {
        let url = fake_redis(Arc::new(AtomicBool::new(false))).await;
        let cache = RemoteCache::connect(&url, &config(500))
            .await
            .expect("connect");

        let stats = cache.stats().await;
        assert!(stats.connected);
        let sizes: Vec<(&str, usize)> = stats
            .kinds
            .iter()
            .map(|kind| (kind.kind, kind.size))
            .collect();
        assert_eq!(
            sizes,
            vec![("movie_related", 0), ("top_rated", 1), ("browse", 0), ("search", 1)]
        );
    }

    #[tokio::test]
    async fn stalled_server_degrades_within_the_timeout() {
        let stalled = Arc::new(AtomicBool::new(false));
        let url = fake_redis(Arc::clone(&stalled)).await;
        let cache = RemoteCache::connect(&url, &config(100))
            .await
            .expect("connect");
        stalled.store(true, Ordering::SeqCst);

        let key = CacheKey::top_rated(10);
        let started = Instant::now();
        assert!(cache.get(&key).await.is_none());
        cache
            .set(
                &key,
                CacheValue::TopRated { movies: Vec::new() },
                Duration::from_secs(60),
            )
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let started = Instant::now();
        assert!(cache.invalidate_all().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!cache.is_connected().await);
    }
}
