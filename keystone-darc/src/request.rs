// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Signed requests submitted for verification against a DARC.

use crate::darc_impl::DarcId;
use crate::identity::Identity;
use keystone_hash::Hash;

/// A request to perform `action` on an object governed by the DARC whose
/// base id is `base_id`.
///
/// `msg` is the payload being authorized; for ledger instructions it is the
/// instruction digest, except during DARC evolution where the evolution
/// protocol requires the new DARC's id instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// base id of the governing DARC
    pub base_id: DarcId,
    /// action name, matched against the DARC rules
    pub action: String,
    /// the payload being authorized
    pub msg: Vec<u8>,
    /// identities claiming to authorize the request
    pub identities: Vec<Identity>,
    /// one raw signature per identity, in the same order
    pub signatures: Vec<Vec<u8>>,
}

impl Request {
    /// Builds a request from its parts.
    pub fn new(
        base_id: DarcId,
        action: String,
        msg: Vec<u8>,
        identities: Vec<Identity>,
        signatures: Vec<Vec<u8>>,
    ) -> Self {
        Request {
            base_id,
            action,
            msg,
            identities,
            signatures,
        }
    }

    /// The digest signed by every identity of the request.
    ///
    /// Layout: `base_id || 0x00 || action || 0x00 || msg || 0x00` followed by
    /// each identity's expression string terminated by `0x00`. The
    /// signatures themselves are not part of the digest, so they can be
    /// produced after the digest is fixed.
    pub fn hash(&self) -> Hash {
        let mut parts: Vec<&[u8]> = vec![
            self.base_id.as_bytes(),
            &[0u8],
            self.action.as_bytes(),
            &[0u8],
            &self.msg,
            &[0u8],
        ];
        let identity_strings: Vec<String> = self
            .identities
            .iter()
            .map(|identity| identity.to_expression_string())
            .collect();
        for identity in &identity_strings {
            parts.push(identity.as_bytes());
            parts.push(&[0u8]);
        }
        Hash::compute_from_tuple(&parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Signer;

    #[test]
    fn test_request_digest_stable_under_signing() {
        let signer = Signer::generate();
        let base = DarcId::from_bytes(&[7u8; 32]);
        let unsigned = Request::new(
            base,
            "invoke:update_config".to_string(),
            b"msg".to_vec(),
            vec![signer.identity()],
            vec![],
        );
        let mut signed = unsigned.clone();
        signed.signatures = vec![signer.sign(&unsigned.hash()).unwrap()];
        // filling the signatures must not move the digest
        assert_eq!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn test_request_digest_binds_action_and_msg() {
        let base = DarcId::from_bytes(&[7u8; 32]);
        let req = Request::new(base, "a".to_string(), b"m".to_vec(), vec![], vec![]);
        let mut other = req.clone();
        other.action = "b".to_string();
        assert_ne!(req.hash(), other.hash());
        let mut other = req.clone();
        other.msg = b"n".to_vec();
        assert_ne!(req.hash(), other.hash());
    }
}
