//! Ticket backlog of a room, ordered by ordinal.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::room::RoomData;

/// Highest ordinal a ticket may carry.
pub const MAX_TICKET_ORDINAL: u32 = 1_000_000;

/// Lifecycle of a ticket in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    /// Waiting in the queue.
    Pending,
    /// Currently being estimated; only the current ticket has this status.
    InProgress,
    /// Estimated.
    Completed,
    /// Parked until an external dependency is resolved.
    Blocked,
}

/// Work item estimated by the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Repository-assigned identifier, unique per room.
    pub id: u64,
    /// Human-facing key such as `PROJ-12`.
    pub ticket_key: String,
    /// Short summary.
    pub title: String,
    /// Optional details.
    pub description: Option<String>,
    /// Lifecycle state.
    pub status: TicketStatus,
    /// Display position, unique per room.
    pub ordinal: u32,
    /// Agreed estimate once the ticket is completed.
    pub outcome: Option<String>,
    /// Member that added the ticket.
    pub created_by: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl RoomData {
    /// Ticket with the given id.
    pub fn ticket(&self, id: u64) -> Option<&Ticket> {
        self.ticket_queue.iter().find(|ticket| ticket.id == id)
    }

    /// Mutable access to the ticket with the given id.
    pub fn ticket_mut(&mut self, id: u64) -> Option<&mut Ticket> {
        self.ticket_queue.iter_mut().find(|ticket| ticket.id == id)
    }

    /// Ticket currently being estimated.
    pub fn current_ticket(&self) -> Option<&Ticket> {
        self.current_ticket_id.and_then(|id| self.ticket(id))
    }

    /// Queue in display order.
    pub fn sorted_queue(&self) -> Vec<Ticket> {
        let mut queue = self.ticket_queue.clone();
        queue.sort_by_key(|ticket| ticket.ordinal);
        queue
    }

    /// Lowest-ordinal pending ticket other than the current one.
    pub fn next_pending_ticket(&self) -> Option<&Ticket> {
        self.ticket_queue
            .iter()
            .filter(|ticket| ticket.status == TicketStatus::Pending)
            .filter(|ticket| Some(ticket.id) != self.current_ticket_id)
            .min_by_key(|ticket| ticket.ordinal)
    }

    /// Ordinal for a ticket appended at the end of the queue, or `None` when
    /// the last ordinal is already at [`MAX_TICKET_ORDINAL`].
    pub fn next_ordinal(&self) -> Option<u32> {
        let last = self
            .ticket_queue
            .iter()
            .map(|ticket| ticket.ordinal)
            .max()
            .unwrap_or(0);
        last.checked_add(1)
            .filter(|ordinal| *ordinal <= MAX_TICKET_ORDINAL)
    }

    /// Whether a ticket other than `except` already uses `ordinal`.
    pub fn ordinal_taken(&self, ordinal: u32, except: u64) -> bool {
        self.ticket_queue
            .iter()
            .any(|ticket| ticket.id != except && ticket.ordinal == ordinal)
    }
}
