// checkout_pool demo: a pool of in-memory document-store sessions driven
// through by-name transactions. Set RUST_LOG=debug to see pool events.

use checkout_pool::{BoxError, OperationTable, Pool, PoolConfiguration, Resource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Insert {
    collection: &'static str,
    key: u32,
    body: String,
}

struct Find {
    collection: &'static str,
    key: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("no document {key} in {collection}")]
struct Missing {
    collection: &'static str,
    key: u32,
}

struct Session {
    number: usize,
    documents: HashMap<(&'static str, u32), String>,
}

impl Resource for Session {
    fn operations() -> OperationTable<Self> {
        OperationTable::new()
            .status("Insert", |session: &mut Session, q: Insert| {
                session.documents.insert((q.collection, q.key), q.body);
            })
            .fallible("Find", |session: &mut Session, q: Find| {
                session
                    .documents
                    .get(&(q.collection, q.key))
                    .cloned()
                    .ok_or(Missing {
                        collection: q.collection,
                        key: q.key,
                    })
            })
            .value("Session", |session: &mut Session, _: ()| session.number)
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== checkout_pool demo ===");

    let opened = AtomicUsize::new(0);
    let config = PoolConfiguration::new()
        .with_capacity(3)
        .with_initial_size(1)
        .with_timeout(Duration::from_secs(2));
    let pool = Pool::start(config, move || {
        Ok::<_, BoxError>(Session {
            number: opened.fetch_add(1, Ordering::SeqCst) + 1,
            documents: HashMap::new(),
        })
    })?;

    {
        // hold one session so the insert and find land on the same store
        let mut session = pool.check_out()?;
        pool.invoke(
            &mut session,
            "Insert",
            Insert {
                collection: "test",
                key: 1,
                body: "{\"a\": 1, \"b\": \"2\"}".to_string(),
            },
        )?;
        let found = pool
            .invoke(&mut session, "Find", Find { collection: "test", key: 1 })?
            .and_then(|value| value.downcast::<String>().ok());
        println!("  Found on session {}: {:?}", session.number, found);
    }

    match pool.transaction("Find", Find { collection: "test", key: 99 }) {
        Ok(_) => println!("  Unexpected hit"),
        Err(err) => println!("  Lookup failed: {}", err),
    }

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || -> Result<usize, checkout_pool::PoolError> {
                let number = pool
                    .transaction("Session", ())?
                    .and_then(|value| value.downcast::<usize>().ok())
                    .unwrap_or_default();
                thread::sleep(Duration::from_millis(20));
                Ok(number)
            })
        })
        .collect();

    for worker in workers {
        match worker.join() {
            Ok(Ok(number)) => println!("  Worker used session {}", number),
            Ok(Err(err)) => println!("  Worker failed: {}", err),
            Err(_) => println!("  Worker panicked"),
        }
    }

    let health = pool.get_health_status();
    println!("\n  Health: {}", if health.is_healthy() { "Healthy" } else { "Unhealthy" });
    println!("  Sessions opened: {} of {}", pool.total_count(), pool.capacity());

    println!("\n  Metrics:");
    let mut metrics: Vec<_> = pool.export_metrics().into_iter().collect();
    metrics.sort();
    for (key, value) in metrics {
        println!("    {}: {}", key, value);
    }

    Ok(())
}
