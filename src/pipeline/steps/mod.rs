// Built-in pipeline steps, registered under their stable identifiers

pub mod create_error;
pub mod create_receipt;
pub mod determine_pmodes;
pub mod handle_receipt;
pub mod save_out_message;
pub mod save_received_message;
pub mod send_message;
pub mod set_reception_awareness;
pub mod sign_message;
pub mod verify_signature;

// Re-export main types for convenient access
pub use create_error::CreateErrorStep;
pub use create_receipt::CreateReceiptStep;
pub use determine_pmodes::DeterminePModesStep;
pub use handle_receipt::HandleReceiptStep;
pub use save_out_message::SaveOutMessageStep;
pub use save_received_message::SaveReceivedMessageStep;
pub use send_message::SendMessageStep;
pub use set_reception_awareness::SetReceptionAwarenessStep;
pub use sign_message::SignMessageStep;
pub use verify_signature::VerifySignatureStep;

use super::registry::StepRegistry;
use super::step::Step;
use std::sync::Arc;

pub const DETERMINE_PMODES: &str = "DeterminePModes";
pub const VERIFY_SIGNATURE: &str = "VerifySignature";
pub const SAVE_RECEIVED_MESSAGE: &str = "SaveReceivedMessage";
pub const HANDLE_RECEIPT: &str = "HandleReceipt";
pub const CREATE_RECEIPT: &str = "CreateReceipt";
pub const CREATE_ERROR: &str = "CreateError";
pub const SIGN_MESSAGE: &str = "SignMessage";
pub const SET_RECEPTION_AWARENESS: &str = "SetReceptionAwareness";
pub const SEND_MESSAGE: &str = "SendMessage";
pub const SAVE_OUT_MESSAGE: &str = "SaveOutMessage";

pub(crate) fn register_builtin_steps(registry: &mut StepRegistry) {
    registry.register(DETERMINE_PMODES, |deps| {
        Ok(Arc::new(DeterminePModesStep::new(
            deps.pmode_store.clone(),
            deps.matcher.clone(),
        )) as Arc<dyn Step>)
    });
    registry.register(VERIFY_SIGNATURE, |deps| {
        Ok(Arc::new(VerifySignatureStep::new(deps.signer.clone())) as Arc<dyn Step>)
    });
    registry.register(SAVE_RECEIVED_MESSAGE, |deps| {
        Ok(Arc::new(SaveReceivedMessageStep::new(
            deps.message_repository.clone(),
            deps.codec.clone(),
        )) as Arc<dyn Step>)
    });
    registry.register(HANDLE_RECEIPT, |deps| {
        Ok(Arc::new(HandleReceiptStep::new(
            deps.message_repository.clone(),
            deps.reception_awareness_repository.clone(),
        )) as Arc<dyn Step>)
    });
    registry.register(CREATE_RECEIPT, |deps| {
        Ok(Arc::new(CreateReceiptStep::new(deps.id_generator.clone())) as Arc<dyn Step>)
    });
    registry.register(CREATE_ERROR, |deps| {
        Ok(Arc::new(CreateErrorStep::new(deps.id_generator.clone())) as Arc<dyn Step>)
    });
    registry.register(SIGN_MESSAGE, |deps| {
        Ok(Arc::new(SignMessageStep::new(deps.signer.clone())) as Arc<dyn Step>)
    });
    registry.register(SET_RECEPTION_AWARENESS, |deps| {
        Ok(Arc::new(SetReceptionAwarenessStep::new(
            deps.reception_awareness_repository.clone(),
            deps.id_generator.clone(),
        )) as Arc<dyn Step>)
    });
    registry.register(SEND_MESSAGE, |deps| {
        Ok(Arc::new(SendMessageStep::new(
            deps.sender.clone(),
            deps.codec.clone(),
            deps.message_repository.clone(),
            deps.reception_awareness_repository.clone(),
        )) as Arc<dyn Step>)
    });
    registry.register(SAVE_OUT_MESSAGE, |deps| {
        Ok(Arc::new(SaveOutMessageStep::new(
            deps.message_repository.clone(),
            deps.codec.clone(),
        )) as Arc<dyn Step>)
    });
}
