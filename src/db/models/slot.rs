use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Swap-eligibility state of a slot.
///
/// `SwapPending` doubles as a mutual-exclusion marker: it is the only
/// mechanism preventing a slot from being booked into two negotiations at
/// once, or edited/deleted while one is unresolved. Owners may toggle
/// `Busy` <-> `Swappable` freely; `SwapPending` is entered and left only by
/// the swap coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    #[serde(rename = "BUSY")]
    Busy,
    #[serde(rename = "SWAPPABLE")]
    Swappable,
    #[serde(rename = "SWAP_PENDING")]
    SwapPending,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Busy => "BUSY",
            SlotStatus::Swappable => "SWAPPABLE",
            SlotStatus::SwapPending => "SWAP_PENDING",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUSY" => Ok(SlotStatus::Busy),
            "SWAPPABLE" => Ok(SlotStatus::Swappable),
            "SWAP_PENDING" => Ok(SlotStatus::SwapPending),
            other => Err(format!("unknown slot status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: SlotStatus,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
