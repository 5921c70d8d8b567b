//! DNS resolution for the per-route pools.
//!
//! # Responsibilities
//! - Connect direct requests to the addresses route planning approved
//! - Optionally shuffle addresses across a round-robin record
//!
//! # Design Decisions
//! - The approved addresses travel with the dispatching task (task-local),
//!   since pools are per route and shared by every host and job
//! - reqwest calls the resolver on the first poll of the request future,
//!   which runs on the dispatching task
//! - A pin only applies to the host it was made for; anything else, such as
//!   a proxy host, is looked up normally
//! - Shuffling is off unless `client.randomize_dns` is set; the system
//!   resolver returns addresses in a stable order

use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use rand::seq::SliceRandom;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
struct PinnedHost {
    host: String,
    addrs: Vec<IpAddr>,
}

tokio::task_local! {
    static PINNED: PinnedHost;
}

/// Run `fut` with connections to `host` pinned to `addrs`.
///
/// No pin is installed when `addrs` is empty.
pub async fn with_pinned_addresses<F: Future>(host: &str, addrs: Vec<IpAddr>, fut: F) -> F::Output {
    if addrs.is_empty() {
        return fut.await;
    }
    let pinned = PinnedHost {
        host: host.to_ascii_lowercase(),
        addrs,
    };
    PINNED.scope(pinned, fut).await
}

fn pinned_for(host: &str) -> Option<Vec<IpAddr>> {
    PINNED
        .try_with(|pinned| pinned.host.eq_ignore_ascii_case(host).then(|| pinned.addrs.clone()))
        .ok()
        .flatten()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EgressResolver {
    randomize: bool,
}

impl EgressResolver {
    pub fn new(randomize: bool) -> Self {
        Self { randomize }
    }
}

impl Resolve for EgressResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        // Read here, not in the returned future: this call runs on the dispatching task.
        let pinned = pinned_for(&host);
        let randomize = self.randomize;
        Box::pin(async move {
            let mut addrs: Vec<SocketAddr> = match pinned {
                Some(ips) => {
                    tracing::trace!(host = %host, addresses = ?ips, "Using planned addresses");
                    ips.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect()
                }
                None => tokio::net::lookup_host((host.as_str(), 0))
                    .await
                    .map_err(|e| Box::new(e) as BoxError)?
                    .collect(),
            };
            if randomize {
                shuffle(&mut addrs);
                tracing::trace!(host = %host, count = addrs.len(), "Resolved with randomized order");
            }
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<Addrs, BoxError>(addrs)
        })
    }
}

fn shuffle(addrs: &mut [SocketAddr]) {
    addrs.shuffle(&mut rand::thread_rng());
}
