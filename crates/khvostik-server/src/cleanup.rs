use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use khvostik_db::Database;
use khvostik_db::models::now_timestamp;

/// Background task that prunes spent and expired password reset tokens.
pub async fn run_cleanup_loop(db: Arc<Database>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match prune_resets(db.clone()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: pruned {} password reset tokens", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {:#}", e);
            }
        }
    }
}

async fn prune_resets(db: Arc<Database>) -> anyhow::Result<usize> {
    tokio::task::spawn_blocking(move || db.prune_password_resets(&now_timestamp())).await?
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use khvostik_db::models::{UserRow, format_timestamp};
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn prunes_only_expired_tokens() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4().to_string();
        db.create_user(&UserRow {
            id: user_id.clone(),
            email: "owner@example.com".into(),
            name: "Owner".into(),
            password: "hash".into(),
            role: "user".into(),
            created_at: now_timestamp(),
        })
        .unwrap();

        let past = format_timestamp(Utc::now() - Duration::hours(2));
        let future = format_timestamp(Utc::now() + Duration::hours(1));
        db.insert_password_reset("expired", &user_id, &past).unwrap();
        db.insert_password_reset("fresh", &user_id, &future).unwrap();

        assert_eq!(prune_resets(db.clone()).await.unwrap(), 1);
        assert_eq!(prune_resets(db.clone()).await.unwrap(), 0);
        assert_eq!(
            db.consume_password_reset("fresh", &now_timestamp()).unwrap(),
            Some(user_id)
        );
    }
}
