// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Distributed Access Right Control (DARC) documents.
//!
//! A DARC maps action names to identity expressions and governs which
//! signers may perform which actions on the objects it controls. The ledger
//! core only consumes the stable surface exposed here: building and hashing
//! [`Request`]s, verifying them against a [`Darc`], and checking DARC
//! evolution with [`Darc::sanity_check`].
#![warn(unused_crate_dependencies)]

mod darc_impl;
mod error;
mod identity;
mod request;

pub use darc_impl::{
    Darc, DarcDeserializer, DarcId, DarcIdDeserializer, DarcIdSerializer, DarcSerializer,
    Expression, Rules, ACTION_EVOLVE, ACTION_SIGN,
};
pub use error::DarcError;
pub use identity::{
    Identity, IdentityDeserializer, IdentitySerializer, Signature, SignatureDeserializer,
    SignatureSerializer, Signer,
};
pub use request::Request;
