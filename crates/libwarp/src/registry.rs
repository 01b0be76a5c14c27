use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use warp_protocol::Token;

use crate::error::WarpError;
use crate::warp::Warp;

/// Process-wide mapping of active warps; the daemon's single source of truth
/// for whether a warp exists. The lock is held only for constant-time map
/// operations, never across I/O.
pub struct Registry {
    warps: Mutex<HashMap<Token, Arc<Warp>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            warps: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically insert the warp built by `init` unless the token is taken.
    /// Exactly one of any number of concurrent creators for the same token
    /// wins; the others observe `DuplicateWarp` and the map is untouched.
    pub async fn create_if_absent(
        &self,
        token: &str,
        init: impl FnOnce() -> Arc<Warp>,
    ) -> Result<Arc<Warp>, WarpError> {
        let mut warps = self.warps.lock().await;
        if warps.contains_key(token) {
            return Err(WarpError::DuplicateWarp(token.to_string()));
        }
        let warp = init();
        warps.insert(token.to_string(), Arc::clone(&warp));
        Ok(warp)
    }

    pub async fn lookup(&self, token: &str) -> Result<Arc<Warp>, WarpError> {
        self.warps
            .lock()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| WarpError::UnknownWarp(token.to_string()))
    }

    /// Idempotent: removing an absent token is a no-op.
    pub async fn remove(&self, token: &str) {
        self.warps.lock().await.remove(token);
    }

    pub async fn active(&self) -> usize {
        self.warps.lock().await.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::HostState;
    use warp_protocol::WindowSize;

    fn test_warp(token: &str) -> Arc<Warp> {
        Warp::new(
            token.to_string(),
            WindowSize { rows: 24, cols: 80 },
            HostState::new("u-1".to_string(), "host".to_string()),
            64,
        )
    }

    #[tokio::test]
    async fn create_lookup_remove_cycle() {
        let registry = Registry::new();
        registry
            .create_if_absent("t1", || test_warp("t1"))
            .await
            .expect("create");
        assert_eq!(registry.active().await, 1);

        let warp = registry.lookup("t1").await.expect("lookup");
        assert_eq!(warp.token(), "t1");

        registry.remove("t1").await;
        assert!(matches!(
            registry.lookup("t1").await,
            Err(WarpError::UnknownWarp(_))
        ));
        // removing again is a no-op
        registry.remove("t1").await;
        assert_eq!(registry.active().await, 0);
    }

    #[tokio::test]
    async fn duplicate_token_is_rejected() {
        let registry = Registry::new();
        registry
            .create_if_absent("t1", || test_warp("t1"))
            .await
            .expect("create");
        let err = registry
            .create_if_absent("t1", || test_warp("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WarpError::DuplicateWarp(_)));
        assert_eq!(registry.active().await, 1);
    }

    #[tokio::test]
    async fn concurrent_creators_race_exactly_one_wins() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry
                    .create_if_absent("contended", || test_warp("contended"))
                    .await
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for task in tasks {
            if task.await.expect("join") {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.active().await, 1);
    }
}
