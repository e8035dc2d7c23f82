//! Bounded connection permits.
//!
//! reqwest keeps its own idle pool; this module bounds how many requests
//! may be in flight at once, in total and per route. A request holds a
//! [`PoolPermit`] from before it is sent until its response body has been
//! read or dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::DavError;
use crate::DavResult;

/// `scheme://host:port` of a request target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route(pub String);

impl Route {
    pub fn of(url: &url::Url) -> Route {
        Route(format!(
            "{}://{}:{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or(0)
        ))
    }
}

/// Permits for one request. Released on drop.
#[derive(Debug)]
pub struct PoolPermit {
    _route: OwnedSemaphorePermit,
    _total: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct ConnectionPool {
    max_total: usize,
    max_per_route: usize,
    total: Arc<Semaphore>,
    routes: Mutex<HashMap<Route, Arc<Semaphore>>>,
}

impl ConnectionPool {
    pub fn new(max_total: usize, max_per_route: usize) -> ConnectionPool {
        let max_total = max_total.max(1);
        let max_per_route = max_per_route.max(1);
        ConnectionPool {
            max_total,
            max_per_route,
            total: Arc::new(Semaphore::new(max_total)),
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn max_per_route(&self) -> usize {
        self.max_per_route
    }

    // routes nobody holds or waits for are dropped before a new one is
    // added, so the map only keeps routes with requests in flight.
    fn route_semaphore(&self, route: &Route) -> Arc<Semaphore> {
        let mut routes = self.routes.lock();
        if !routes.contains_key(route) {
            routes.retain(|_, sem| Arc::strong_count(sem) > 1);
        }
        routes
            .entry(route.clone())
            .or_insert_with(|| {
                let sem = Semaphore::new(self.max_per_route);
                if self.total.is_closed() {
                    sem.close();
                }
                Arc::new(sem)
            })
            .clone()
    }

    /// Wait for a free slot on `route`. Fails after `close()`.
    pub async fn acquire(&self, route: &Route) -> DavResult<PoolPermit> {
        // route first, so that a saturated route does not hold total slots.
        let route_permit = self
            .route_semaphore(route)
            .acquire_owned()
            .await
            .map_err(|_| DavError::transport("connection pool shut down"))?;
        let total_permit = self
            .total
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DavError::transport("connection pool shut down"))?;
        Ok(PoolPermit {
            _route: route_permit,
            _total: total_permit,
        })
    }

    /// Requests in flight.
    pub fn in_use(&self) -> usize {
        self.max_total - self.total.available_permits()
    }

    pub fn close(&self) {
        self.total.close();
        for sem in self.routes.lock().values() {
            sem.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.total.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn route(s: &str) -> Route {
        Route::of(&url::Url::parse(s).unwrap())
    }

    #[test]
    fn route_key() {
        assert_eq!(route("http://h/a"), route("http://h:80/b"));
        assert_ne!(route("http://h/a"), route("https://h/a"));
    }

    #[tokio::test]
    async fn per_route_limit() {
        let pool = ConnectionPool::new(10, 1);
        let a = route("http://a/");
        let p1 = pool.acquire(&a).await.unwrap();
        assert_eq!(pool.in_use(), 1);
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&a)).await;
        assert!(blocked.is_err());
        // another route is not affected.
        let _p2 = pool.acquire(&route("http://b/")).await.unwrap();
        drop(p1);
        let _p3 = pool.acquire(&a).await.unwrap();
    }

    #[tokio::test]
    async fn idle_routes_are_dropped() {
        let pool = ConnectionPool::new(10, 2);
        let a = pool.acquire(&route("http://a/")).await.unwrap();
        drop(pool.acquire(&route("http://b/")).await.unwrap());
        drop(pool.acquire(&route("http://c/")).await.unwrap());
        let routes = pool.routes.lock().keys().cloned().collect::<Vec<_>>();
        assert_eq!(routes.len(), 2);
        assert!(routes.contains(&route("http://a/")));
        assert!(routes.contains(&route("http://c/")));
        drop(a);
        let _d = pool.acquire(&route("http://d/")).await.unwrap();
        assert_eq!(pool.routes.lock().len(), 1);
    }

    #[tokio::test]
    async fn total_limit_and_close() {
        let pool = ConnectionPool::new(1, 5);
        let p = pool.acquire(&route("http://a/")).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), pool.acquire(&route("http://b/"))).await;
        assert!(blocked.is_err());
        drop(p);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(pool.acquire(&route("http://a/")).await.is_err());
    }
}
