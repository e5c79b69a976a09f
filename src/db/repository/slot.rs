use chrono::{NaiveDateTime, Utc};

use sqlx::Row;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{PublicUser, Slot, SlotStatus};
use crate::error::{AppError, AppResult};

// ============================================================================
// Slot Repository
// ============================================================================

pub struct SlotRepository;

impl SlotRepository {
    fn map_row(r: &sqlx::sqlite::SqliteRow) -> AppResult<Slot> {
        let status: String = r.get("status");
        let status = status
            .parse::<SlotStatus>()
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        Ok(Slot {
            id: r.get("id"),
            title: r.get("title"),
            start_time: r.get("start_time"),
            end_time: r.get("end_time"),
            status,
            user_id: r.get("user_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Slot>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, start_time, end_time, status, user_id, created_at, updated_at
            FROM slots
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    pub async fn find_by_owner(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Slot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, start_time, end_time, status, user_id, created_at, updated_at
            FROM slots
            WHERE user_id = ?
            ORDER BY start_time ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(Self::map_row).collect()
    }

    /// All SWAPPABLE slots owned by someone other than `exclude_user_id`,
    /// ordered by start time, with the owner's identity resolved for display.
    pub async fn find_swappable_excluding(
        pool: &SqlitePool,
        exclude_user_id: &str,
    ) -> AppResult<Vec<(Slot, PublicUser)>> {
        let rows = sqlx::query(
            r#"
            SELECT
                s.id, s.title, s.start_time, s.end_time, s.status, s.user_id,
                s.created_at, s.updated_at,
                u.name AS owner_name, u.email AS owner_email
            FROM slots s
            JOIN users u ON u.id = s.user_id
            WHERE s.status = 'SWAPPABLE' AND s.user_id != ?
            ORDER BY s.start_time ASC
            "#,
        )
        .bind(exclude_user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter()
            .map(|r| {
                let slot = Self::map_row(r)?;
                let owner = PublicUser {
                    id: slot.user_id.clone(),
                    name: r.get("owner_name"),
                    email: r.get("owner_email"),
                };
                Ok((slot, owner))
            })
            .collect()
    }

    pub async fn create(
        pool: &SqlitePool,
        title: &str,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
        status: SlotStatus,
        user_id: &str,
    ) -> AppResult<Slot> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query(
            r#"
            INSERT INTO slots (id, title, start_time, end_time, status, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, title, start_time, end_time, status, user_id, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(start_time)
        .bind(end_time)
        .bind(status.as_str())
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Self::map_row(&row)
    }

    /// Owner-initiated edit of a slot's fields.
    ///
    /// The WHERE clause re-checks ownership and that no swap locked the slot
    /// between the caller's read and this write: an edit racing a swap-request
    /// commit affects zero rows (returns `None`) instead of clobbering
    /// SWAP_PENDING.
    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        owner_id: &str,
        title: &str,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
        status: SlotStatus,
    ) -> AppResult<Option<Slot>> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query(
            r#"
            UPDATE slots
            SET title = ?, start_time = ?, end_time = ?, status = ?, updated_at = ?
            WHERE id = ? AND user_id = ? AND status != 'SWAP_PENDING'
            RETURNING id, title, start_time, end_time, status, user_id, created_at, updated_at
            "#,
        )
        .bind(title)
        .bind(start_time)
        .bind(end_time)
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    /// Delete a slot, guarded the same way as [`Self::update`]: a slot that
    /// entered SWAP_PENDING since the caller's read is left untouched and
    /// `false` is returned.
    pub async fn delete(pool: &SqlitePool, id: &str, owner_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM slots WHERE id = ? AND user_id = ? AND status != 'SWAP_PENDING'",
        )
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap status transition. The WHERE clause re-validates the
    /// expected status immediately before the write, so a caller that lost a
    /// race observes `false` and can abort its transaction.
    pub async fn set_status_guarded(
        conn: &mut SqliteConnection,
        id: &str,
        from: SlotStatus,
        to: SlotStatus,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE slots
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .bind(from.as_str())
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a slot to a new owner and status, guarded on the slot currently
    /// being SWAP_PENDING. Ownership changes happen only through this path.
    pub async fn transfer_guarded(
        conn: &mut SqliteConnection,
        id: &str,
        new_owner_id: &str,
        to: SlotStatus,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE slots
            SET user_id = ?, status = ?, updated_at = ?
            WHERE id = ? AND status = 'SWAP_PENDING'
            "#,
        )
        .bind(new_owner_id)
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use crate::db::UserRepository;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn make_slot(pool: &SqlitePool, owner: &str, status: SlotStatus) -> Slot {
        let start = Utc::now().naive_utc() + Duration::days(1);
        let end = start + Duration::hours(1);
        SlotRepository::create(pool, "Shift", start, end, status, owner)
            .await
            .unwrap()
    }

    async fn lock_slot(pool: &SqlitePool, id: &str) {
        let mut tx = pool.begin().await.unwrap();
        assert!(SlotRepository::set_status_guarded(
            tx.as_mut(),
            id,
            SlotStatus::Swappable,
            SlotStatus::SwapPending,
        )
        .await
        .unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn stale_edit_cannot_overwrite_swap_pending() {
        let pool = test_pool().await;
        let owner = UserRepository::create(&pool, "alice", "alice@example.com", "hash")
            .await
            .unwrap()
            .id;
        let slot = make_slot(&pool, &owner, SlotStatus::Swappable).await;

        // The slot enters a negotiation after the owner read it as SWAPPABLE.
        lock_slot(&pool, &slot.id).await;

        // Replaying the edit with the stale snapshot must affect zero rows.
        let updated = SlotRepository::update(
            &pool,
            &slot.id,
            &owner,
            "Renamed",
            slot.start_time,
            slot.end_time,
            slot.status,
        )
        .await
        .unwrap();
        assert!(updated.is_none());

        let current = SlotRepository::find_by_id(&pool, &slot.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, SlotStatus::SwapPending);
        assert_eq!(current.title, "Shift");
    }

    #[tokio::test]
    async fn stale_delete_cannot_remove_swap_pending() {
        let pool = test_pool().await;
        let owner = UserRepository::create(&pool, "alice", "alice@example.com", "hash")
            .await
            .unwrap()
            .id;
        let slot = make_slot(&pool, &owner, SlotStatus::Swappable).await;

        lock_slot(&pool, &slot.id).await;

        let deleted = SlotRepository::delete(&pool, &slot.id, &owner).await.unwrap();
        assert!(!deleted);
        assert!(SlotRepository::find_by_id(&pool, &slot.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn update_and_delete_require_ownership() {
        let pool = test_pool().await;
        let owner = UserRepository::create(&pool, "alice", "alice@example.com", "hash")
            .await
            .unwrap()
            .id;
        let slot = make_slot(&pool, &owner, SlotStatus::Busy).await;

        let updated = SlotRepository::update(
            &pool,
            &slot.id,
            "someone-else",
            "Hijack",
            slot.start_time,
            slot.end_time,
            slot.status,
        )
        .await
        .unwrap();
        assert!(updated.is_none());

        assert!(!SlotRepository::delete(&pool, &slot.id, "someone-else")
            .await
            .unwrap());

        let updated = SlotRepository::update(
            &pool,
            &slot.id,
            &owner,
            "Renamed",
            slot.start_time,
            slot.end_time,
            SlotStatus::Swappable,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.status, SlotStatus::Swappable);
        assert!(SlotRepository::delete(&pool, &slot.id, &owner).await.unwrap());
    }
}
