use chrono::Utc;

use sqlx::Row;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{SwapRequest, SwapRequestStatus};
use crate::error::{AppError, AppResult};

// ============================================================================
// Swap Request Repository (append-only ledger)
// ============================================================================

pub struct SwapRequestRepository;

impl SwapRequestRepository {
    fn map_row(r: &sqlx::sqlite::SqliteRow) -> AppResult<SwapRequest> {
        let status: String = r.get("status");
        let status = status
            .parse::<SwapRequestStatus>()
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        Ok(SwapRequest {
            id: r.get("id"),
            requester_id: r.get("requester_id"),
            requester_slot_id: r.get("requester_slot_id"),
            target_user_id: r.get("target_user_id"),
            target_slot_id: r.get("target_slot_id"),
            status,
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }

    /// Insert a new PENDING request. Runs on a connection so the coordinator
    /// can include it in the same transaction as the slot status flips.
    pub async fn create(
        conn: &mut SqliteConnection,
        requester_id: &str,
        requester_slot_id: &str,
        target_user_id: &str,
        target_slot_id: &str,
    ) -> AppResult<SwapRequest> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query(
            r#"
            INSERT INTO swap_requests (
                id, requester_id, requester_slot_id, target_user_id, target_slot_id,
                status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)
            RETURNING
                id, requester_id, requester_slot_id, target_user_id, target_slot_id,
                status, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(requester_id)
        .bind(requester_slot_id)
        .bind(target_user_id)
        .bind(target_slot_id)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await
        .map_err(AppError::Database)?;

        Self::map_row(&row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<SwapRequest>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, requester_id, requester_slot_id, target_user_id, target_slot_id,
                status, created_at, updated_at
            FROM swap_requests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    /// Requests addressed to `user_id`, newest first.
    pub async fn find_incoming(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<SwapRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, requester_id, requester_slot_id, target_user_id, target_slot_id,
                status, created_at, updated_at
            FROM swap_requests
            WHERE target_user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(Self::map_row).collect()
    }

    /// Requests created by `user_id`, newest first.
    pub async fn find_outgoing(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<SwapRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, requester_id, requester_slot_id, target_user_id, target_slot_id,
                status, created_at, updated_at
            FROM swap_requests
            WHERE requester_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(Self::map_row).collect()
    }

    /// Resolve a PENDING request to ACCEPTED or REJECTED. The status guard in
    /// the WHERE clause makes the transition monotonic: a second responder
    /// (or a double submit) affects zero rows.
    pub async fn resolve_if_pending(
        conn: &mut SqliteConnection,
        id: &str,
        to: SwapRequestStatus,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE swap_requests
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }
}
