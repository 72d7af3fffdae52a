// Reliability state machine for reception awareness
//
// States, events and the transition table driving retries of outbound
// messages until they are acknowledged or dead-lettered.

pub mod events;
pub mod reception_awareness;
pub mod states;

// Re-export main types for convenient access
pub use events::{ReceptionEvent, SendResult};
pub use reception_awareness::{determine_transition, Transition};
pub use states::ReliabilityState;
