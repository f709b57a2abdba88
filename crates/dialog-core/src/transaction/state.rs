use std::fmt;

/// Transaction states
///
/// `Uack` is a client INVITE transaction that received a 2xx and waits
/// for its owner to send the ACK explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Trying,
    Ringing,
    Completed,
    Confirmed,
    Terminated,
    Uack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Trying => "TRYING",
            TransactionState::Ringing => "RINGING",
            TransactionState::Completed => "COMPLETED",
            TransactionState::Confirmed => "CONFIRMED",
            TransactionState::Terminated => "TERMINATED",
            TransactionState::Uack => "UACK",
        };
        f.write_str(name)
    }
}

/// Transaction timers, see the table in the module docs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxTimer {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}
