//! Ticket status state machine
//!
//! ```text
//! OPEN      -> PAUSED | CONFIRMED | CLOSED | CANCELLED
//! PAUSED    -> OPEN | CONFIRMED | CANCELLED
//! CONFIRMED -> OPEN | PAUSED | CLOSED | CANCELLED
//! CLOSED    -> REOPENED
//! REOPENED  -> OPEN | CONFIRMED | CLOSED | CANCELLED
//! CANCELLED -> (none)
//! ```

use crate::error::{Error, Result};

text_enum! {
    /// Lifecycle state of a ticket
    pub enum TicketStatus {
        Open => "OPEN",
        Paused => "PAUSED",
        Confirmed => "CONFIRMED",
        Closed => "CLOSED",
        Cancelled => "CANCELLED",
        Reopened => "REOPENED",
    }
}

text_enum! {
    /// What an audit ledger row records
    pub enum ActionKind {
        Create => "Create",
        StatusChange => "StatusChange",
        Edit => "Edit",
        Comment => "Comment",
    }
}

impl TicketStatus {
    /// Targets reachable through `change_status`
    pub fn allowed_targets(self) -> &'static [TicketStatus] {
        use TicketStatus::*;
        match self {
            Open => &[Paused, Confirmed, Closed, Cancelled],
            Paused => &[Open, Confirmed, Cancelled],
            Confirmed => &[Open, Paused, Closed, Cancelled],
            Closed => &[Reopened],
            Reopened => &[Open, Confirmed, Closed, Cancelled],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: TicketStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// No outgoing edge
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Pause is reachable from every non-terminal state
    pub fn can_pause(self) -> bool {
        !self.is_terminal()
    }

    /// Still being worked on (dashboard "ongoing" projection)
    pub fn is_ongoing(self) -> bool {
        matches!(
            self,
            TicketStatus::Open
                | TicketStatus::Paused
                | TicketStatus::Confirmed
                | TicketStatus::Reopened
        )
    }
}

/// Validate `from -> to` against the table
pub fn check_transition(from: TicketStatus, to: TicketStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use TicketStatus::*;

    const TABLE: &[(TicketStatus, TicketStatus)] = &[
        (Open, Paused),
        (Open, Confirmed),
        (Open, Closed),
        (Open, Cancelled),
        (Paused, Open),
        (Paused, Confirmed),
        (Paused, Cancelled),
        (Confirmed, Open),
        (Confirmed, Paused),
        (Confirmed, Closed),
        (Confirmed, Cancelled),
        (Closed, Reopened),
        (Reopened, Open),
        (Reopened, Confirmed),
        (Reopened, Closed),
        (Reopened, Cancelled),
    ];

    fn any_status() -> impl Strategy<Value = TicketStatus> {
        prop::sample::select(TicketStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn transition_allowed_iff_in_table(from in any_status(), to in any_status()) {
            let listed = TABLE.contains(&(from, to));
            prop_assert_eq!(check_transition(from, to).is_ok(), listed);
        }
    }

    #[test]
    fn test_closed_only_reopens() {
        assert_eq!(Closed.allowed_targets(), &[Reopened]);
        assert!(matches!(
            check_transition(Closed, Confirmed),
            Err(Error::InvalidTransition { from: Closed, to: Confirmed })
        ));
    }

    #[test]
    fn test_cancelled_is_terminal() {
        assert!(Cancelled.is_terminal());
        assert!(!Cancelled.can_pause());
        assert!(Reopened.can_pause());
        assert!(Closed.can_pause());
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!("paused".parse::<TicketStatus>().unwrap(), Paused);
        assert_eq!(Reopened.to_string(), "REOPENED");
        assert!("ARCHIVED".parse::<TicketStatus>().is_err());
        assert_eq!("statuschange".parse::<ActionKind>().unwrap(), ActionKind::StatusChange);
    }
}
