//! Session rotation under sustained load.
//!
//! Needs a local Chrome/Chromium, so it is ignored by default:
//! `cargo test --test session_rotation -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use leadharvest::browser::{PagePoolConfig, SessionConfig, SessionManager};
use leadharvest::scheduler::StopFlag;

#[tokio::test]
#[ignore = "requires a local Chrome/Chromium"]
async fn rotation_under_sustained_load() {
    let config = SessionConfig {
        max_age: Duration::from_millis(100),
        drain_timeout: Duration::from_millis(500),
        retry_limit: 1,
        headless: true,
        pool: PagePoolConfig {
            max_pages: 4,
            ..PagePoolConfig::default()
        },
    };
    let session = SessionManager::launch(config).await.expect("session");
    let stop = StopFlag::new();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let session = Arc::clone(&session);
        let stop = stop.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..4 {
                let outcome = session
                    .with_page(&stop, |page| async move {
                        page.goto("about:blank").await?;
                        tokio::time::sleep(Duration::from_millis(60)).await;
                        Ok(())
                    })
                    .await;
                // Rotation must stay invisible to page users.
                assert!(outcome.is_ok(), "with_page surfaced: {outcome:?}");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    // Sustained load past the 100ms TTL forces at least one rotation.
    assert!(session.rotations() >= 1);
    // Every lease was returned.
    assert_eq!(session.active_pages(), 0);

    session.close().await;
}
