use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Resolution state of a swap request. Monotonic: `Pending` moves to
/// `Accepted` or `Rejected` exactly once and is never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapRequestStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl SwapRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapRequestStatus::Pending => "PENDING",
            SwapRequestStatus::Accepted => "ACCEPTED",
            SwapRequestStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for SwapRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SwapRequestStatus::Pending),
            "ACCEPTED" => Ok(SwapRequestStatus::Accepted),
            "REJECTED" => Ok(SwapRequestStatus::Rejected),
            other => Err(format!("unknown swap request status: {}", other)),
        }
    }
}

/// One proposed exchange between two slots belonging to two different users.
///
/// `target_user_id` is denormalized from the target slot's owner at creation
/// time. Ownership only changes through acceptance, which also resolves the
/// request, so the value is immutable for the life of the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub id: String,
    pub requester_id: String,
    pub requester_slot_id: String,
    pub target_user_id: String,
    pub target_slot_id: String,
    pub status: SwapRequestStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
