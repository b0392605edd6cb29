/// Which side of the handshake this participant plays. Assigned once by
/// whatever external mechanism decides call ownership (first to join a room,
/// lexical ordering of peer ids, etc. — out of scope here) and never
/// renegotiated for the life of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Participant,
}
