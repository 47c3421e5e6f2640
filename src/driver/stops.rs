//! The driver's ordered stop list with optimistic reordering.
//!
//! `confirmed` is the newest ordering the backend accepted and only changes
//! when a submission at least as new succeeds. `displayed` moves immediately
//! on every local reorder; once no newer submission is pending it is brought
//! back in line with `confirmed` as a whole.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::services::transport_api::{RouteStop, StopId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardingStatus {
    Boarded,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListedStop {
    #[serde(flatten)]
    pub stop: RouteStop,
    pub has_boarded: bool,
    pub boarding_status: Option<BoardingStatus>,
}

impl From<RouteStop> for ListedStop {
    fn from(stop: RouteStop) -> Self {
        Self {
            stop,
            has_boarded: false,
            boarding_status: None,
        }
    }
}

/// A pending submission produced by [`StopListing::reorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderTicket {
    seq: u64,
    order: Vec<StopId>,
}

impl ReorderTicket {
    /// The full ordering to submit.
    pub fn order(&self) -> &[StopId] {
        &self.order
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopListing {
    confirmed: Vec<StopId>,
    /// Sequence number of the ticket `confirmed` came from; 0 for the initial load.
    confirmed_seq: u64,
    displayed: Vec<ListedStop>,
    /// Sequence number of the newest ticket handed out.
    issued: u64,
    /// Tickets still waiting for an answer.
    pending: BTreeSet<u64>,
}

impl StopListing {
    /// Builds a listing whose server-confirmed order is `stops` as given.
    pub fn new(stops: Vec<RouteStop>) -> Self {
        Self {
            confirmed: stops.iter().map(|s| s.id).collect(),
            confirmed_seq: 0,
            displayed: stops.into_iter().map(ListedStop::from).collect(),
            issued: 0,
            pending: BTreeSet::new(),
        }
    }

    pub fn stops(&self) -> &[ListedStop] {
        &self.displayed
    }

    pub fn order(&self) -> Vec<StopId> {
        self.displayed.iter().map(|s| s.stop.id).collect()
    }

    pub fn confirmed(&self) -> &[StopId] {
        &self.confirmed
    }

    /// Moves the stop at `from` to `to`, shifting the rest without gaps.
    ///
    /// Returns `None` (and changes nothing) for out-of-range indices or a
    /// move onto itself.
    pub fn reorder(&mut self, from: usize, to: usize) -> Option<ReorderTicket> {
        let len = self.displayed.len();
        if from >= len || to >= len || from == to {
            return None;
        }
        let moved = self.displayed.remove(from);
        self.displayed.insert(to, moved);

        self.issued += 1;
        self.pending.insert(self.issued);
        Some(ReorderTicket {
            seq: self.issued,
            order: self.order(),
        })
    }

    /// Records that the backend accepted `ticket`.
    ///
    /// An acceptance older than the current baseline is ignored. Returns
    /// whether the baseline moved.
    pub fn confirm(&mut self, ticket: ReorderTicket) -> bool {
        self.pending.remove(&ticket.seq);
        if ticket.seq < self.confirmed_seq {
            return false;
        }
        self.confirmed = ticket.order;
        self.confirmed_seq = ticket.seq;
        self.settle(ticket.seq);
        true
    }

    /// Records that the backend refused `ticket`.
    ///
    /// Returns whether the displayed list was brought back to the confirmed
    /// order; it is left alone while a newer reorder awaits its own answer.
    pub fn reject(&mut self, ticket: &ReorderTicket) -> bool {
        self.pending.remove(&ticket.seq);
        self.settle(ticket.seq)
    }

    /// Shows the confirmed order unless a reorder newer than `seq` is pending.
    fn settle(&mut self, seq: u64) -> bool {
        if self.pending.range(seq + 1..).next().is_some() {
            return false;
        }
        let rank = |id: StopId| {
            self.confirmed
                .iter()
                .position(|c| *c == id)
                .unwrap_or(usize::MAX)
        };
        self.displayed.sort_by_key(|s| rank(s.stop.id));
        true
    }

    /// Applies a rider's live check-in. Returns false for unknown stops.
    pub fn apply_check_in(&mut self, id: StopId, is_boarding: bool) -> bool {
        match self.find_mut(id) {
            Some(listed) => {
                listed.stop.is_boarding_today = is_boarding;
                true
            }
            None => false,
        }
    }

    /// Marks a rider as boarded or missed. Either way the stop is done with.
    /// Local only.
    pub fn mark_status(&mut self, id: StopId, status: BoardingStatus) -> bool {
        match self.find_mut(id) {
            Some(listed) => {
                listed.has_boarded = true;
                listed.boarding_status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Riders boarding today who have not boarded yet.
    pub fn stops_remaining(&self) -> usize {
        self.displayed
            .iter()
            .filter(|s| s.stop.is_boarding_today && !s.has_boarded)
            .count()
    }

    fn find_mut(&mut self, id: StopId) -> Option<&mut ListedStop> {
        self.displayed.iter_mut().find(|s| s.stop.id == id)
    }
}
