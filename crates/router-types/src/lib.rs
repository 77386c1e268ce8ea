//! Wire types, envelope signing, and structural validators shared between the router
//! binary and (eventually) node/client implementations.

pub mod envelope;
pub mod error;
pub mod federation_proto;
pub mod inference;
pub mod model;
pub mod payment;
pub mod quote;
pub mod schema;

pub use envelope::{Envelope, EnvelopeError, KeyMaterial, SigningIdentity};
pub use error::ErrorReason;
