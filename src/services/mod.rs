// Background services driven by the polling template

pub mod reception_awareness;

// Re-export main types for convenient access
pub use reception_awareness::ReceptionAwarenessAgent;
