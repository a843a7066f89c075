use std::future::Future;

use redis::{aio::MultiplexedConnection, AsyncCommands, FromRedisValue, ToRedisArgs};
use redis_macros::{FromRedisValue, ToRedisArgs};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::{CacheError, Error, HtmlError},
    CATALOG_CACHE_KEY,
};

// Caching - keys

#[derive(Serialize, Clone, Debug)]
pub struct CacheKey<T: ToString + Serialize> {
    value: T,
    kind: CacheKeyType,
}

impl<T: ToString + Serialize> CacheKey<T> {
    pub fn from(kind: CacheKeyType, value: T) -> Self {
        Self { value, kind }
    }

    pub fn lifetime(&self) -> CacheLifetime {
        match &self.kind {
            CacheKeyType::Tags | CacheKeyType::Ingredients => CacheLifetime::BindCatalogCache,
            CacheKeyType::Custom(bind) => CacheLifetime::Custom(bind.to_owned()),
        }
    }
}

impl<T: ToString + Serialize> std::fmt::Display for CacheKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CacheKeyType::Tags => write!(f, "tags-{}", self.value.to_string()),
            CacheKeyType::Ingredients => write!(f, "ingredients-{}", self.value.to_string()),
            CacheKeyType::Custom(_) => write!(f, "{}", self.value.to_string()),
        }
    }
}

/// Namespaces of cached values. `Custom` carries its own bind value.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum CacheKeyType {
    Tags,
    Ingredients,
    Custom(String),
}

impl CacheKeyType {
    pub fn new<T: ToString + Serialize>(self, key: T) -> CacheKey<T> {
        CacheKey::from(self, key)
    }
}

// Cache - wrappers

/// How long a cached value stays valid. Bound values are valid as long as the
/// bind key they were stored with is still current.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CacheLifetime {
    Infinite,
    Custom(String),
    BindCatalogCache,
}

impl CacheLifetime {
    pub async fn current_bind(
        &self,
        cache: &mut MultiplexedConnection,
    ) -> Result<Option<String>, Error> {
        match self {
            CacheLifetime::Infinite => Ok(None),
            CacheLifetime::BindCatalogCache => {
                get_cache_value::<&str, String>(CATALOG_CACHE_KEY, cache).await
            }
            CacheLifetime::Custom(value) => Ok(Some(value.to_owned())),
        }
    }
}

#[derive(Serialize, Deserialize, FromRedisValue, ToRedisArgs, Clone)]
pub struct RedisValue<T: Serialize + Send + Sync + Clone> {
    pub value: T,
    lifetime: CacheLifetime,
    bind: Option<String>,
}

impl<T> RedisValue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Clone,
{
    async fn is_current(
        &self,
        expected: &CacheLifetime,
        cache: &mut MultiplexedConnection,
    ) -> Result<bool, Error> {
        if &self.lifetime != expected {
            log::error!("Found conflicting cache bindings");
            return Err(HtmlError::InternalServerError.new("Conflicting cache bindings"));
        }

        Ok(self.bind == self.lifetime.current_bind(cache).await?)
    }

    /// A stored value that is still current, if any. Unreadable entries are
    /// dropped from the cache.
    async fn lookup<K>(
        key: &CacheKey<K>,
        cache: &mut MultiplexedConnection,
    ) -> Result<Option<Self>, Error>
    where
        K: ToString + Serialize,
    {
        let stored = match get_cache_value::<String, Self>(key.to_string(), cache).await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Dropping unreadable cache entry {key}: {e}");
                delete_cache_value(key.to_string(), cache).await?;
                None
            }
        };

        match stored {
            Some(stored) if stored.is_current(&key.lifetime(), cache).await? => {
                log::trace!("Cache hit {key}");
                Ok(Some(stored))
            }
            Some(_) => {
                log::trace!("Cache entry {key} is stale");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Returns the cached value for `key`, or runs `load` and caches its
    /// result under the bind read before loading, so a rotation during the
    /// load leaves the entry stale. When redis is unreachable the value is
    /// loaded without caching.
    pub async fn get_or<F, Fut, K>(
        key: CacheKey<K>,
        cache: &mut MultiplexedConnection,
        load: F,
    ) -> Result<RedisValue<T>, Error>
    where
        K: ToString + Serialize + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        match Self::lookup(&key, cache).await {
            Ok(Some(stored)) => return Ok(stored),
            Ok(None) => log::trace!("Cache miss {key}"),
            Err(e) => log::warn!("Cache lookup for {key} failed: {e}"),
        }

        let lifetime = key.lifetime();
        let bind = lifetime.current_bind(cache).await;
        let value = load().await?;

        let stored = match bind {
            Ok(bind) => RedisValue {
                value,
                lifetime,
                bind,
            },
            Err(e) => {
                log::warn!("Not caching {key}: {e}");
                return Ok(RedisValue {
                    value,
                    lifetime,
                    bind: None,
                });
            }
        };
        if let Err(e) = set_cache_value(key.to_string(), stored.clone(), cache).await {
            log::warn!("Failed to cache {key}: {e}");
        }

        Ok(stored)
    }
}

/// Invalidates every value bound to the catalog cache.
pub async fn rotate_catalog_cache(cache: &mut MultiplexedConnection) -> Result<(), Error> {
    let bind = uuid::Uuid::new_v4().to_string();
    log::debug!("Rotating {CATALOG_CACHE_KEY} to {bind}");
    set_cache_value(CATALOG_CACHE_KEY, bind, cache).await
}

// Cache - raw handlers

pub async fn set_cache_value<K: ToRedisArgs + Send + Sync, V: ToRedisArgs + Send + Sync>(
    key: K,
    value: V,
    cache: &mut MultiplexedConnection,
) -> Result<(), Error> {
    let _: () = cache.set(key, value).await.map_err(CacheError::from)?;

    Ok(())
}

pub async fn delete_cache_value<K: ToRedisArgs + Send + Sync>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<(), Error> {
    let _: () = cache.del(key).await.map_err(CacheError::from)?;

    Ok(())
}

pub async fn get_cache_value<K: ToRedisArgs + Send + Sync, V: FromRedisValue>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<Option<V>, Error> {
    let value: Option<V> = cache.get(key).await.map_err(CacheError::from)?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_keys_are_namespaced() {
        assert_eq!(CacheKeyType::Tags.new("all").to_string(), "tags-all");
        assert_eq!(
            CacheKeyType::Ingredients.new("sug").to_string(),
            "ingredients-sug"
        );
        assert_eq!(
            CacheKeyType::Custom(String::from("v1"))
                .new("raw-key")
                .to_string(),
            "raw-key"
        );
    }

    #[test]
    fn catalog_keys_bind_to_the_catalog_cache() {
        assert_eq!(
            CacheKeyType::Ingredients.new("a").lifetime(),
            CacheLifetime::BindCatalogCache
        );
        assert_eq!(
            CacheKeyType::Custom(String::from("v1")).new("k").lifetime(),
            CacheLifetime::Custom(String::from("v1"))
        );
    }

    async fn redis() -> MultiplexedConnection {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        crate::state::connect_redis(&url).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "Requires a redis server at REDIS_URL"]
    async fn rotation_during_a_load_leaves_the_entry_stale() {
        let mut cache = redis().await;
        rotate_catalog_cache(&mut cache).await.unwrap();
        let key = uuid::Uuid::new_v4().to_string();

        let mut writer = cache.clone();
        let first = RedisValue::get_or(
            CacheKeyType::Tags.new(key.clone()),
            &mut cache,
            move || async move {
                rotate_catalog_cache(&mut writer).await?;
                Ok(vec![String::from("before the write")])
            },
        )
        .await
        .unwrap();
        assert_eq!(first.value, vec!["before the write"]);

        let second = RedisValue::get_or(
            CacheKeyType::Tags.new(key.clone()),
            &mut cache,
            || async { Ok(vec![String::from("after the write")]) },
        )
        .await
        .unwrap();
        assert_eq!(second.value, vec!["after the write"]);

        let third = RedisValue::get_or(
            CacheKeyType::Tags.new(key.clone()),
            &mut cache,
            || async { Ok(vec![String::from("not loaded")]) },
        )
        .await
        .unwrap();
        assert_eq!(third.value, vec!["after the write"]);

        delete_cache_value(CacheKeyType::Tags.new(key).to_string(), &mut cache)
            .await
            .unwrap();
    }
}
