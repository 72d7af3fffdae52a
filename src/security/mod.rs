//! # Message Security
//!
//! Attachment digests and the signing boundary. Key material and the actual
//! signature algorithm live behind [`MessageSigner`]; the core only computes
//! the SHA-256 reference digests that get signed and checks them on receipt.

use crate::error::{As4Error, Result};
use crate::models::{As4Message, Attachment, Signature, SignatureReference};
use crate::utils::serde::encode_base64;
use sha2::{Digest, Sha256};

pub const SHA256_DIGEST_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Certificate / key store boundary
pub trait MessageSigner: Send + Sync {
    /// Signature value over the serialized references, base64 encoded
    fn sign(&self, algorithm: &str, signed_info: &[u8]) -> Result<String>;

    fn verify(&self, signature: &Signature, signed_info: &[u8]) -> Result<bool>;
}

/// SHA-256 reference for an attachment
pub fn attachment_reference(attachment: &Attachment) -> SignatureReference {
    SignatureReference {
        uri: attachment.cid(),
        digest_algorithm: SHA256_DIGEST_ALGORITHM.to_string(),
        digest_value: encode_base64(&Sha256::digest(&attachment.content)),
    }
}

/// Bytes the signature value is computed over
pub fn signed_info(references: &[SignatureReference]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(references)?)
}

/// Sign every attachment of `message` and store the signature in its security header
pub fn sign_message(
    message: &mut As4Message,
    signer: &dyn MessageSigner,
    algorithm: &str,
) -> Result<()> {
    let references: Vec<SignatureReference> =
        message.attachments.iter().map(attachment_reference).collect();
    let signature_value = signer.sign(algorithm, &signed_info(&references)?)?;

    message.security_header.signature = Some(Signature {
        algorithm: algorithm.to_string(),
        references,
        signature_value,
    });
    Ok(())
}

/// Check the attachment digests and the signature value of a signed message
pub fn verify_message(message: &As4Message, signer: &dyn MessageSigner) -> Result<()> {
    let signature = message
        .security_header
        .signature
        .as_ref()
        .ok_or_else(|| As4Error::Security("message is not signed".to_string()))?;

    for attachment in &message.attachments {
        let expected = attachment_reference(attachment);
        let reference = signature
            .references
            .iter()
            .find(|r| r.uri == expected.uri)
            .ok_or_else(|| {
                As4Error::Security(format!("attachment {} is not signed", expected.uri))
            })?;

        if reference.digest_value != expected.digest_value {
            return Err(As4Error::Security(format!(
                "digest mismatch for attachment {}",
                expected.uri
            )));
        }
    }

    if !signer.verify(signature, &signed_info(&signature.references)?)? {
        return Err(As4Error::Security("signature value is invalid".to_string()));
    }
    Ok(())
}
