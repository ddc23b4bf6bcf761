use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaDatabase};

use crate::database::Database;

static DB_SEQ: AtomicUsize = AtomicUsize::new(0);

pub async fn test_db() -> Arc<Database> {
    // Connect and run the schema on a helper runtime with a real clock:
    // tests using paused tokio time would otherwise auto-advance past the
    // pool's acquire timeout while the SQLite worker thread is still busy.
    //
    // The database is a uniquely named shared-cache in-memory database so
    // both pooled connections see the same data, and both connections are
    // pre-warmed so sequential acquires under paused time always find an
    // idle connection on the first poll and never register a timeout timer.
    let name = format!("medley_test_{}", DB_SEQ.fetch_add(1, Ordering::Relaxed));
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let conn = tokio::task::spawn_blocking(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async move {
                let mut opt = ConnectOptions::new(url);
                opt.max_connections(2).test_before_acquire(false);
                let conn = SeaDatabase::connect(opt).await.unwrap();

                let schema = include_str!("../schema.sql");
                for stmt in schema.split(';') {
                    let trimmed = stmt.trim();
                    if !trimmed.is_empty() {
                        // Strip comment-only lines
                        let without_comments: String = trimmed
                            .lines()
                            .filter(|line| !line.trim_start().starts_with("--"))
                            .collect::<Vec<_>>()
                            .join("\n");
                        let without_comments = without_comments.trim();
                        if !without_comments.is_empty() {
                            conn.execute_unprepared(without_comments)
                                .await
                                .unwrap_or_else(|e| {
                                    panic!(
                                        "Failed to execute SQL: {}\nStatement: {}",
                                        e, without_comments
                                    )
                                });
                        }
                    }
                }

                // Force the pool up to both connections.
                let (a, b) = tokio::join!(
                    conn.execute_unprepared("SELECT 1"),
                    conn.execute_unprepared("SELECT 1"),
                );
                a.unwrap();
                b.unwrap();

                // Let the pool's spawned return-to-pool tasks finish before
                // this runtime is dropped, or the connections leak. The tasks
                // talk to the SQLite worker threads, so they need real time,
                // not just a yield.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;

                conn
            })
    })
    .await
    .unwrap();

    Arc::new(Database { conn })
}
