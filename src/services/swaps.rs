//! Swap coordinator: the negotiation state machine.
//!
//! A slot moves BUSY <-> SWAPPABLE under its owner's control; entering a
//! negotiation flips both slots to SWAP_PENDING, and the target user's answer
//! resolves the request exactly once (ACCEPTED swaps the owners, REJECTED
//! restores SWAPPABLE). Both slots and the ledger row always transition inside
//! one transaction, with a compare-and-swap guard per record so concurrent
//! coordinators racing on a slot produce at most one winner.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::db::models::{PublicUser, Slot, SlotStatus, SwapRequest, SwapRequestStatus};
use crate::db::{SlotRepository, SwapRequestRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::services::notifier::{
    EVENT_SWAP_REQUEST_ACCEPTED, EVENT_SWAP_REQUEST_RECEIVED, EVENT_SWAP_REQUEST_REJECTED,
};
use crate::AppState;

// ============================================================================
// Resolved views
// ============================================================================

/// A swap request with both parties and both slot bodies resolved for display
/// and for the `swap-request-received` notification payload.
///
/// Slot bodies are optional: a resolved (rejected) request may outlive its
/// slots, since the ledger is append-only but slots can be deleted once they
/// leave SWAP_PENDING.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequestView {
    pub id: String,
    pub status: SwapRequestStatus,
    pub requester: PublicUser,
    pub target_user: PublicUser,
    pub requester_slot: Option<Slot>,
    pub target_slot: Option<Slot>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A swappable slot offered by another user, with the owner resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwappableSlot {
    #[serde(flatten)]
    pub slot: Slot,
    pub owner: PublicUser,
}

/// Minimal payload for `swap-request-accepted` / `swap-request-rejected`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResolution {
    pub id: String,
    pub status: SwapRequestStatus,
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct SwapService;

impl SwapService {
    /// Propose exchanging `my_slot_id` for `their_slot_id`.
    ///
    /// Preconditions are checked in order (first failure wins): both slots
    /// exist, the requester owns the offered slot, the target slot belongs to
    /// someone else, and both slots are SWAPPABLE. On success both slots are
    /// flipped to SWAP_PENDING and a PENDING ledger row is created, all in one
    /// transaction. Losing a race between validation and commit yields
    /// `Conflict`; the transaction rolls back with no partial state.
    pub async fn create_swap_request(
        state: &Arc<AppState>,
        requester_id: &str,
        my_slot_id: &str,
        their_slot_id: &str,
    ) -> AppResult<SwapRequestView> {
        let my_slot = SlotRepository::find_by_id(&state.db, my_slot_id).await?;
        let their_slot = SlotRepository::find_by_id(&state.db, their_slot_id).await?;

        let (my_slot, their_slot) = match (my_slot, their_slot) {
            (Some(m), Some(t)) => (m, t),
            _ => {
                return Err(AppError::NotFound("One or both slots not found".to_string()));
            }
        };

        if my_slot.user_id != requester_id {
            return Err(AppError::Forbidden(
                "You do not own the slot you are offering".to_string(),
            ));
        }

        if their_slot.user_id == requester_id {
            return Err(AppError::InvalidOperation(
                "Cannot swap with your own slot".to_string(),
            ));
        }

        if my_slot.status != SlotStatus::Swappable {
            return Err(AppError::InvalidOperation(
                "Your slot is not marked as swappable".to_string(),
            ));
        }

        if their_slot.status != SlotStatus::Swappable {
            return Err(AppError::InvalidOperation(
                "The requested slot is not available for swapping".to_string(),
            ));
        }

        // Both slots enter SWAP_PENDING and the ledger row is created in one
        // transaction. The CAS guards re-validate SWAPPABLE right before each
        // write, so a concurrent request racing on either slot loses here.
        let mut tx = state.db.begin().await.map_err(AppError::Database)?;

        if !SlotRepository::set_status_guarded(
            tx.as_mut(),
            &my_slot.id,
            SlotStatus::Swappable,
            SlotStatus::SwapPending,
        )
        .await?
        {
            return Err(AppError::Conflict(
                "Your slot is no longer swappable".to_string(),
            ));
        }

        if !SlotRepository::set_status_guarded(
            tx.as_mut(),
            &their_slot.id,
            SlotStatus::Swappable,
            SlotStatus::SwapPending,
        )
        .await?
        {
            return Err(AppError::Conflict(
                "The requested slot was claimed by another request".to_string(),
            ));
        }

        let request = SwapRequestRepository::create(
            tx.as_mut(),
            requester_id,
            &my_slot.id,
            &their_slot.user_id,
            &their_slot.id,
        )
        .await?;

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            request_id = %request.id,
            requester_id,
            target_user_id = %their_slot.user_id,
            "Swap request created"
        );

        let view = Self::resolve_view(state, &request).await?;

        // Best-effort, fire-and-forget: the state transition is committed,
        // a missed notification is tolerable.
        state
            .notifier
            .notify(&request.target_user_id, EVENT_SWAP_REQUEST_RECEIVED, &view)
            .await;

        Ok(view)
    }

    /// Accept or reject a pending request addressed to `responder_id`.
    ///
    /// Accepting swaps the two slots' owners and parks both at BUSY; rejecting
    /// restores both to SWAPPABLE with owners unchanged. Either way the ledger
    /// row resolves exactly once: the PENDING guard makes a second respond (or
    /// a concurrent double submit) fail without touching state.
    pub async fn respond_to_swap_request(
        state: &Arc<AppState>,
        responder_id: &str,
        request_id: &str,
        accepted: bool,
    ) -> AppResult<SwapRequest> {
        let mut request = SwapRequestRepository::find_by_id(&state.db, request_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Swap request not found".to_string()))?;

        if request.target_user_id != responder_id {
            return Err(AppError::Forbidden(
                "You are not authorized to respond to this swap request".to_string(),
            ));
        }

        if request.status != SwapRequestStatus::Pending {
            return Err(AppError::InvalidOperation(
                "This swap request has already been processed".to_string(),
            ));
        }

        let requester_slot = SlotRepository::find_by_id(&state.db, &request.requester_slot_id).await?;
        let target_slot = SlotRepository::find_by_id(&state.db, &request.target_slot_id).await?;

        let (requester_slot, target_slot) = match (requester_slot, target_slot) {
            (Some(r), Some(t)) => (r, t),
            _ => {
                return Err(AppError::NotFound(
                    "One or both slots no longer exist".to_string(),
                ));
            }
        };

        let mut tx = state.db.begin().await.map_err(AppError::Database)?;

        let slots_updated = if accepted {
            // Exchange ownership; both slots leave the negotiation as BUSY.
            SlotRepository::transfer_guarded(
                tx.as_mut(),
                &requester_slot.id,
                &request.target_user_id,
                SlotStatus::Busy,
            )
            .await?
                && SlotRepository::transfer_guarded(
                    tx.as_mut(),
                    &target_slot.id,
                    &request.requester_id,
                    SlotStatus::Busy,
                )
                .await?
        } else {
            // Owners unchanged; both slots reopen for offers.
            SlotRepository::set_status_guarded(
                tx.as_mut(),
                &requester_slot.id,
                SlotStatus::SwapPending,
                SlotStatus::Swappable,
            )
            .await?
                && SlotRepository::set_status_guarded(
                    tx.as_mut(),
                    &target_slot.id,
                    SlotStatus::SwapPending,
                    SlotStatus::Swappable,
                )
                .await?
        };

        let resolution = if accepted {
            SwapRequestStatus::Accepted
        } else {
            SwapRequestStatus::Rejected
        };

        let request_resolved =
            SwapRequestRepository::resolve_if_pending(tx.as_mut(), &request.id, resolution).await?;

        if !slots_updated || !request_resolved {
            // Someone else resolved this request between our read and the
            // guarded writes; dropping the transaction rolls everything back.
            return Err(AppError::Conflict(
                "This swap request was processed concurrently".to_string(),
            ));
        }

        tx.commit().await.map_err(AppError::Database)?;

        request.status = resolution;

        tracing::info!(
            request_id = %request.id,
            accepted,
            "Swap request resolved"
        );

        let event = if accepted {
            EVENT_SWAP_REQUEST_ACCEPTED
        } else {
            EVENT_SWAP_REQUEST_REJECTED
        };
        let payload = SwapResolution {
            id: request.id.clone(),
            status: resolution,
        };
        state.notifier.notify(&request.requester_id, event, &payload).await;

        Ok(request)
    }

    /// All slots currently open to offers from `user_id` (everyone else's
    /// SWAPPABLE slots), earliest first.
    pub async fn list_swappable_slots(
        state: &Arc<AppState>,
        user_id: &str,
    ) -> AppResult<Vec<SwappableSlot>> {
        let rows = SlotRepository::find_swappable_excluding(&state.db, user_id).await?;
        Ok(rows
            .into_iter()
            .map(|(slot, owner)| SwappableSlot { slot, owner })
            .collect())
    }

    /// Requests addressed to `user_id`, newest first, fully resolved.
    pub async fn list_incoming(
        state: &Arc<AppState>,
        user_id: &str,
    ) -> AppResult<Vec<SwapRequestView>> {
        let requests = SwapRequestRepository::find_incoming(&state.db, user_id).await?;
        Self::resolve_views(state, requests).await
    }

    /// Requests created by `user_id`, newest first, fully resolved.
    pub async fn list_outgoing(
        state: &Arc<AppState>,
        user_id: &str,
    ) -> AppResult<Vec<SwapRequestView>> {
        let requests = SwapRequestRepository::find_outgoing(&state.db, user_id).await?;
        Self::resolve_views(state, requests).await
    }

    async fn resolve_views(
        state: &Arc<AppState>,
        requests: Vec<SwapRequest>,
    ) -> AppResult<Vec<SwapRequestView>> {
        let mut views = Vec::with_capacity(requests.len());
        for request in &requests {
            views.push(Self::resolve_view(state, request).await?);
        }
        Ok(views)
    }

    async fn resolve_view(state: &Arc<AppState>, request: &SwapRequest) -> AppResult<SwapRequestView> {
        let requester = UserRepository::find_by_id(&state.db, &request.requester_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Requester not found".to_string()))?;
        let target_user = UserRepository::find_by_id(&state.db, &request.target_user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Target user not found".to_string()))?;

        let requester_slot = SlotRepository::find_by_id(&state.db, &request.requester_slot_id).await?;
        let target_slot = SlotRepository::find_by_id(&state.db, &request.target_slot_id).await?;

        Ok(SwapRequestView {
            id: request.id.clone(),
            status: request.status,
            requester: PublicUser::from(&requester),
            target_user: PublicUser::from(&target_user),
            requester_slot,
            target_slot,
            created_at: request.created_at,
            updated_at: request.updated_at,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
