//! # Domain Models
//!
//! AS4 message model, processing context, journal and persisted records.

pub mod context;
pub mod journal;
pub mod message;
pub mod pmode;
pub mod records;

// Re-export core models for easy access
pub use context::{ErrorResult, MessageOrigin, MessagingContext, ProcessingMode, ReceivedMessage};
pub use journal::{Journal, JournalLogEntry};
pub use message::{
    AgreementReference, As4Message, Attachment, CollaborationInfo, ErrorCode, ErrorDetail,
    ErrorSignal, MessageUnit, Party, PartyId, PullRequest, Receipt, SecurityHeader, Service,
    Severity, Signature, SignatureReference, SignalMessage, UserMessage, DEFAULT_MPC,
};
pub use pmode::{
    Delivery, MessagePackaging, PartyInfo, PushConfiguration, ReceiveSecurity, ReceivingPMode,
    ReceptionAwarenessSettings, ReplyHandling, SendingPMode, SigningSettings,
};
pub use records::{
    InException, InMessage, LeaseStatus, MessageKind, MessageStatus, MessageUpdate, Operation,
    OutException, OutMessage, OutMessageFilter, ReceptionAwareness,
};
