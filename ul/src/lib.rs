//! This crate implements the DICOM upper layer protocol engine:
//! the binary codec for protocol data units,
//! the association state machine which drives negotiation,
//! data transfer and release,
//! and the DIMSE message layer on top of established associations.
//!
//! - The [`address`] module
//!   provides an abstraction for compound addresses
//!   referring to application entities in a network.
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_
//!   and the items which compose them,
//!   plus the functions to read and write them.
//! - The [`association`] module
//!   comprises the upper layer state machine,
//!   the negotiation of presentation contexts
//!   and the drivers which connect the machine to a transport.
//! - The [`message`] module
//!   provides the DIMSE message model,
//!   fragmentation of messages into P-DATA values and their reassembly,
//!   and typed requests and responses for the composite services.
//!
//! ## Features
//! * `async`: Enables a tokio based driver for associations.
//!   See [`AsyncAssociation`](association::nonblocking::AsyncAssociation).

pub mod address;
pub mod association;
pub mod message;
pub mod pdu;

/// The implementation class UID sent by this crate during negotiation.
///
/// This UID may change in future versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.261394487436598717215932745186016593029";

/// The implementation version name sent by this crate during negotiation.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DIMSE-UL 0.1";

/// The DICOM application context name.
pub const DICOM_APPLICATION_CONTEXT: &str = dicom_dictionary_std::uids::DICOM_APPLICATION_CONTEXT;

// re-exports

pub use address::AeAddr;
pub use association::client::ClientAssociationOptions;
pub use association::server::ServerAssociationOptions;
pub use association::{Association, NegotiatedAssociation, State};
#[cfg(feature = "async")]
pub use association::nonblocking::AsyncAssociation;
pub use message::Message;
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
