//! DICOM association module
//!
//! This module contains the upper layer state machine
//! and the means of establishing associations between DICOM nodes.
//!
//! - [`machine`] is the pure state transition table,
//!   driven by [`Event`]s and answering with [`Action`]s.
//! - [`Association`] connects the state machine to a blocking [`Transport`],
//!   such as a [TCP stream][1].
//!   With the `async` feature,
//!   [`AsyncAssociation`](nonblocking::AsyncAssociation)
//!   does the same over tokio streams.
//!
//! As an association requester, often as a service class user (SCU),
//! a new association can be started
//! via the [`ClientAssociationOptions`] type.
//! The minimum required properties are the proposed abstract syntaxes
//! and the address of the target node.
//!
//! As an association acceptor,
//! usually taking the role of a service class provider (SCP),
//! a newly accepted [TCP stream][1] can be passed to
//! a previously prepared [`ServerAssociationOptions`].
//!
//! [1]: std::net::TcpStream
use snafu::{Backtrace, Snafu};

use crate::pdu::{
    AeTitleError, AssociationAC, AssociationRJ, AssociationRQ, DEFAULT_MAX_PDU,
};

pub mod client;
pub mod machine;
pub mod notify;
pub mod server;
pub mod transport;

mod driver;
#[cfg(feature = "async")]
pub mod nonblocking;
pub(crate) mod session;
mod uid;

pub use client::ClientAssociationOptions;
pub use driver::Association;
pub use machine::{
    AbortReason, Action, Event, Indication, Role, State, StateMachine, Transition,
};
pub use notify::EstablishmentHandlers;
pub use server::{AcceptAny, AcceptCalledAeTitle, AccessControl, ServerAssociationOptions};
pub use session::{SessionConfig, DEFAULT_ARTIM_TIMEOUT};
pub use transport::Transport;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("too many presentation contexts proposed ({})", count))]
    TooManyPresentationContexts { count: usize, backtrace: Backtrace },

    #[snafu(display("invalid {} AE title", field))]
    InvalidAeTitle {
        field: &'static str,
        source: AeTitleError,
    },

    #[snafu(display("invalid maximum PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    /// could not connect to the peer
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to encode PDU
    SendPdu {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity",
        length
    ))]
    SendTooLongPdu { length: usize, backtrace: Backtrace },

    #[snafu(display("association rejected: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    #[snafu(display("association aborted: {}", reason))]
    Aborted {
        reason: AbortReason,
        backtrace: Backtrace,
    },

    /// the association is closed
    Closed { backtrace: Backtrace },

    #[snafu(display("operation not allowed in state {:?}", state))]
    InvalidState { state: State, backtrace: Backtrace },

    /// no presentation contexts accepted by the peer
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display("unexpected indication `{:?}`", indication))]
    UnexpectedIndication {
        indication: Box<Indication>,
        backtrace: Backtrace,
    },

    /// timed out waiting for the peer
    TimedOut { backtrace: Backtrace },

    /// the peer requested to release the association
    ReleaseRequested { backtrace: Backtrace },

    #[snafu(display("presentation context {} was not accepted", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    /// failed to split message into fragments
    Fragment {
        #[snafu(backtrace)]
        source: crate::message::fragment::Error,
    },

    /// received fragments do not form a message
    Reassemble {
        #[snafu(backtrace)]
        source: crate::message::fragment::Error,
    },

    /// failed to encode message
    EncodeMessage {
        #[snafu(backtrace)]
        source: crate::message::Error,
    },

    /// failed to decode message
    DecodeMessage {
        #[snafu(backtrace)]
        source: crate::message::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A presentation context accepted during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresentationContextNegotiated {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
    /// whether this node may act as SCU on this context
    pub scu_role: bool,
    /// whether this node may act as SCP on this context
    pub scp_role: bool,
}

/// The outcome of a successful negotiation,
/// as seen from one of the two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAssociation {
    role: Role,
    calling_ae_title: String,
    called_ae_title: String,
    application_context: String,
    requestor_max_pdu_length: u32,
    acceptor_max_pdu_length: u32,
    presentation_contexts: Vec<PresentationContextNegotiated>,
    user_identity_response: Option<Vec<u8>>,
    peer_implementation_class_uid: Option<String>,
    peer_implementation_version_name: Option<String>,
}

impl NegotiatedAssociation {
    /// Record the negotiation from the request and its acknowledgement.
    ///
    /// Only accepted presentation contexts whose id
    /// was proposed in the request are kept.
    /// Without role selection, the requestor is SCU
    /// and the acceptor is SCP.
    pub fn from_exchange(role: Role, rq: &AssociationRQ, ac: &AssociationAC) -> Self {
        let rq_info = rq.user_information();
        let ac_info = ac.user_information();

        let presentation_contexts = ac
            .presentation_contexts()
            .filter(|pc| pc.is_accepted())
            .filter_map(|pc| {
                let proposed = rq.presentation_contexts().find(|p| p.id == pc.id)?;
                let abstract_syntax = uid::trim_uid(&proposed.abstract_syntax);
                let (requestor_scu, requestor_scp) = ac_info
                    .and_then(|info| {
                        info.role_selections()
                            .find(|r| uid::trim_uid(&r.sop_class_uid) == abstract_syntax)
                    })
                    .map(|r| (r.scu_role, r.scp_role))
                    .unwrap_or((true, false));
                let (scu_role, scp_role) = match role {
                    Role::Requestor => (requestor_scu, requestor_scp),
                    Role::Acceptor => (requestor_scp, requestor_scu),
                };
                Some(PresentationContextNegotiated {
                    id: pc.id,
                    abstract_syntax: abstract_syntax.to_string(),
                    transfer_syntax: uid::trim_uid(&pc.transfer_syntax).to_string(),
                    scu_role,
                    scp_role,
                })
            })
            .collect();

        let peer_info = match role {
            Role::Requestor => ac_info,
            Role::Acceptor => rq_info,
        };

        NegotiatedAssociation {
            role,
            calling_ae_title: rq.calling_ae_title().to_string(),
            called_ae_title: rq.called_ae_title().to_string(),
            application_context: ac
                .application_context()
                .or_else(|| rq.application_context())
                .unwrap_or_default()
                .to_string(),
            requestor_max_pdu_length: rq_info
                .and_then(|info| info.max_length())
                .unwrap_or(DEFAULT_MAX_PDU),
            acceptor_max_pdu_length: ac_info
                .and_then(|info| info.max_length())
                .unwrap_or(DEFAULT_MAX_PDU),
            presentation_contexts,
            user_identity_response: ac_info
                .and_then(|info| info.user_identity_response())
                .cloned(),
            peer_implementation_class_uid: peer_info
                .and_then(|info| info.implementation_class_uid())
                .cloned(),
            peer_implementation_version_name: peer_info
                .and_then(|info| info.implementation_version_name())
                .cloned(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    /// The AE title of the other node.
    pub fn peer_ae_title(&self) -> &str {
        match self.role {
            Role::Requestor => &self.called_ae_title,
            Role::Acceptor => &self.calling_ae_title,
        }
    }

    pub fn application_context(&self) -> &str {
        &self.application_context
    }

    /// The maximum PDU length the requestor accepts (0 means unlimited).
    pub fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    /// The maximum PDU length the acceptor accepts (0 means unlimited).
    pub fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    /// The maximum length of the PDUs this node may send.
    pub fn peer_max_pdu_length(&self) -> u32 {
        match self.role {
            Role::Requestor => self.acceptor_max_pdu_length,
            Role::Acceptor => self.requestor_max_pdu_length,
        }
    }

    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    pub fn presentation_context(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts.iter().find(|pc| pc.id == id)
    }

    /// The first accepted presentation context for this abstract syntax.
    pub fn presentation_context_for(
        &self,
        abstract_syntax: &str,
    ) -> Option<&PresentationContextNegotiated> {
        let abstract_syntax = abstract_syntax.trim_end_matches('\0');
        self.presentation_contexts
            .iter()
            .find(|pc| pc.abstract_syntax == abstract_syntax)
    }

    /// The server response to a user identity negotiation, if any.
    pub fn user_identity_response(&self) -> Option<&[u8]> {
        self.user_identity_response.as_deref()
    }

    pub fn peer_implementation_class_uid(&self) -> Option<&str> {
        self.peer_implementation_class_uid.as_deref()
    }

    pub fn peer_implementation_version_name(&self) -> Option<&str> {
        self.peer_implementation_version_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{
        PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
        RoleSelection, UserInformation, UserVariableItem,
    };

    fn rq() -> AssociationRQ {
        let mut rq = AssociationRQ::new()
            .with_application_context("1.2.840.10008.3.1.1.1")
            .with_presentation_contexts(vec![
                PresentationContextProposed {
                    id: 1,
                    abstract_syntax: "1.2.840.10008.1.1\0".to_string(),
                    transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
                },
                PresentationContextProposed {
                    id: 3,
                    abstract_syntax: "1.2.840.10008.5.1.4.1.2.2.3".to_string(),
                    transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
                },
            ])
            .with_user_information(UserInformation::from_items(vec![
                UserVariableItem::MaxLength(32768),
                UserVariableItem::ImplementationClassUID("1.2.3".to_string()),
            ]));
        rq.set_calling_ae_title("STORE-SCU").unwrap();
        rq.set_called_ae_title("ARCHIVE").unwrap();
        rq
    }

    fn ac() -> AssociationAC {
        AssociationAC::new()
            .with_presentation_contexts(vec![
                PresentationContextResult {
                    id: 1,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2".to_string(),
                },
                PresentationContextResult {
                    id: 3,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2".to_string(),
                },
                PresentationContextResult {
                    id: 5,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2".to_string(),
                },
            ])
            .with_user_information(UserInformation::from_items(vec![
                UserVariableItem::MaxLength(0),
                UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid: "1.2.840.10008.5.1.4.1.2.2.3".to_string(),
                    scu_role: true,
                    scp_role: true,
                }),
                UserVariableItem::UserIdentityResponse(b"token".to_vec()),
            ]))
    }

    #[test]
    fn requestor_view() {
        let n = NegotiatedAssociation::from_exchange(Role::Requestor, &rq(), &ac());
        assert_eq!(n.peer_ae_title(), "ARCHIVE");
        assert_eq!(n.peer_max_pdu_length(), 0);
        assert_eq!(n.requestor_max_pdu_length(), 32768);
        assert_eq!(n.application_context(), "1.2.840.10008.3.1.1.1");
        // id 5 was never proposed
        assert_eq!(n.presentation_contexts().len(), 2);

        let echo = n.presentation_context(1).unwrap();
        assert_eq!(echo.abstract_syntax, "1.2.840.10008.1.1");
        assert!(echo.scu_role && !echo.scp_role);

        let get = n
            .presentation_context_for("1.2.840.10008.5.1.4.1.2.2.3")
            .unwrap();
        assert_eq!(get.id, 3);
        assert!(get.scu_role && get.scp_role);
        assert_eq!(n.user_identity_response(), Some(&b"token"[..]));
        assert_eq!(n.peer_implementation_class_uid(), None);
    }

    #[test]
    fn acceptor_view() {
        let n = NegotiatedAssociation::from_exchange(Role::Acceptor, &rq(), &ac());
        assert_eq!(n.peer_ae_title(), "STORE-SCU");
        assert_eq!(n.peer_max_pdu_length(), 32768);
        assert_eq!(n.peer_implementation_class_uid(), Some("1.2.3"));
        let echo = n.presentation_context(1).unwrap();
        assert!(!echo.scu_role && echo.scp_role);
    }
}
