//! Shared key-value state store.
//!
//! Records published here (switch feature snapshots, gateway addresses,
//! per-port IP ranges) are read by other components and processes. There are
//! no transactions: writers overwrite, and readers must tolerate a value that
//! is stale or absent. The NAT probes retry exactly because of this.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::error::{CoinCommonError, CoinCommonResult};

/// Key holding the snapshot of the primary switch.
pub const SW_FEATURE_KEY: &str = "COIN_SW_FEATURE_";

/// Key holding the list of sessions with a cached feature snapshot.
pub const DP_FEATURES_SOCK_LIST_KEY: &str = "dp_features_sock_list";

const IP_RANGE_KEY_PREFIX: &str = "COIN_IP_RANGE_";
const GW_KEY_PREFIX: &str = "COIN_GW_";
const GW_MAC_KEY_PREFIX: &str = "COIN_GW_MAC_";
const DP_FEATURES_KEY_PREFIX: &str = "dp_features_";

/// Key of the `(address, netmask)` range behind a datapath port.
pub fn ip_range_key(port_no: u16) -> String {
    format!("{}{}", IP_RANGE_KEY_PREFIX, port_no)
}

/// Key of the gateway address learned for an interface.
pub fn gateway_key(interface: &str) -> String {
    format!("{}{}", GW_KEY_PREFIX, interface.trim().replace(' ', "_"))
}

/// Key of the hardware address learned for a gateway.
pub fn gateway_mac_key(gateway: Ipv4Addr) -> String {
    format!("{}{}", GW_MAC_KEY_PREFIX, gateway.to_string().replace('.', "-"))
}

/// Key of the feature snapshot cached for one switch session.
pub fn dp_features_key(session: &str) -> String {
    format!("{}{}", DP_FEATURES_KEY_PREFIX, session)
}

/// A `get/set/delete` store of JSON values by string key.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> CoinCommonResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> CoinCommonResult<()>;

    async fn delete(&self, key: &str) -> CoinCommonResult<()>;
}

/// Reads and deserializes a value; absent keys yield `None`.
pub async fn load<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> CoinCommonResult<Option<T>> {
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| CoinCommonError::Serialization {
                key: key.to_string(),
                source,
            }),
    }
}

/// Serializes and writes a value.
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> CoinCommonResult<()> {
    let value = serde_json::to_value(value).map_err(|source| CoinCommonError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, value).await
}

/// Process-local store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> CoinCommonResult<Option<Value>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> CoinCommonResult<()> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoinCommonResult<()> {
        self.data.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a Redis server; values are kept as JSON strings.
#[derive(Clone)]
pub struct RedisStore {
    url: String,
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

impl RedisStore {
    /// Connects to the server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> CoinCommonResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoinCommonError::store("connect", format!("Invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CoinCommonError::store("connect", e.to_string()))?;
        tracing::info!(url = %url, "Connected to Redis state store");
        Ok(Self {
            url: url.to_string(),
            connection,
        })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> CoinCommonResult<Option<Value>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CoinCommonError::store("get", e.to_string()))?;
        raw.map(|s| {
            serde_json::from_str(&s).map_err(|source| CoinCommonError::Serialization {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: Value) -> CoinCommonResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set(key, value.to_string())
            .await
            .map_err(|e| CoinCommonError::store("set", e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoinCommonResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| CoinCommonError::store("del", e.to_string()))?;
        Ok(())
    }
}
