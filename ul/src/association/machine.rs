//! The DICOM upper layer state machine.
//!
//! [`StateMachine`] is a pure transition table:
//! it receives [`Event`]s one at a time
//! and answers with the successor [`State`]
//! and the list of [`Action`]s the owner must carry out
//! (send a PDU, open or close the transport, start or stop the ARTIM timer,
//! surface an [`Indication`] to the application).
//! It performs no I/O and never fails.
//!
//! The states follow the upper layer state table
//! of the standard (PS3.8, section 9.2),
//! with an explicit [`Closed`](State::Closed) terminal state.
use tracing::{debug, warn};

use crate::pdu::{
    AbortRQServiceProviderReason, AbortRQSource, AssociationAC, AssociationRJ,
    AssociationRJResult, AssociationRJServiceProviderASCEReason, AssociationRJSource,
    AssociationRQ, PDataValue, Pdu,
};

/// The part taken by this node in the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// the node which requested the association
    Requestor,
    /// the node which accepted the transport connection
    Acceptor,
}

/// A state of the upper layer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Sta1: no association, no transport
    Idle,
    /// waiting for a peer to connect on a listening transport
    AwaitingTransportConnect,
    /// Sta2: transport connection open, awaiting A-ASSOCIATE-RQ
    AwaitingAssociateRequest,
    /// Sta3: awaiting the local A-ASSOCIATE response primitive
    AwaitingAssociateResponseLocalUser,
    /// Sta4: awaiting the transport connection to open
    AwaitingTransportOpen,
    /// Sta5: awaiting A-ASSOCIATE-AC or A-ASSOCIATE-RJ
    AwaitingAssociateResponse,
    /// Sta6: association established
    DataTransfer,
    /// Sta7: awaiting A-RELEASE-RP
    AwaitingReleaseResponse,
    /// Sta8: awaiting the local A-RELEASE response primitive
    AwaitingReleaseConfirmation,
    /// Sta9: release collision, requestor awaiting local release response
    ReleaseCollisionRequestorLocal,
    /// Sta10: release collision, acceptor awaiting A-RELEASE-RP
    ReleaseCollisionAcceptorPeer,
    /// Sta11: release collision, requestor awaiting A-RELEASE-RP
    ReleaseCollisionRequestorPeer,
    /// Sta12: release collision, acceptor awaiting local release response
    ReleaseCollisionAcceptorLocal,
    /// Sta13: awaiting the transport connection to close
    Aborting,
    /// terminal state
    Closed,
}

impl State {
    /// Whether this is the aborting or the closed state.
    pub fn is_sink(self) -> bool {
        matches!(self, State::Aborting | State::Closed)
    }

    /// Whether P-DATA may be sent in this state.
    pub fn can_send_pdata(self) -> bool {
        matches!(
            self,
            State::DataTransfer | State::AwaitingReleaseConfirmation
        )
    }
}

/// An input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A-ASSOCIATE request primitive from the local user
    AssociateRequest(AssociationRQ),
    /// the local user started listening for a connection
    TransportListen,
    /// A-ASSOCIATE response primitive (accept) from the local user
    AssociateAccept(AssociationAC),
    /// A-ASSOCIATE response primitive (reject) from the local user
    AssociateReject(AssociationRJ),
    /// P-DATA request primitive from the local user
    PDataRequest(Vec<PDataValue>),
    /// A-RELEASE request primitive from the local user
    ReleaseRequest,
    /// A-RELEASE response primitive from the local user
    ReleaseResponse,
    /// A-ABORT request primitive from the local user
    AbortRequest,
    /// the local user found a protocol violation above the PDU level,
    /// such as an out of order fragment
    LocalProtocolError(AbortRQServiceProviderReason),
    /// the transport connection is open
    TransportConnected,
    /// a PDU was received from the peer
    PduReceived(Pdu),
    /// bytes received from the peer did not form a valid PDU
    InvalidPdu(AbortRQServiceProviderReason),
    /// the peer closed the transport connection
    TransportClosed,
    /// the transport connection failed
    TransportError,
    /// the ARTIM timer expired
    ArtimExpired,
}

impl Event {
    /// A short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::AssociateRequest(_) => "A-ASSOCIATE request",
            Event::TransportListen => "transport listen",
            Event::AssociateAccept(_) => "A-ASSOCIATE accept",
            Event::AssociateReject(_) => "A-ASSOCIATE reject",
            Event::PDataRequest(_) => "P-DATA request",
            Event::ReleaseRequest => "A-RELEASE request",
            Event::ReleaseResponse => "A-RELEASE response",
            Event::AbortRequest => "A-ABORT request",
            Event::LocalProtocolError(_) => "local protocol error",
            Event::TransportConnected => "transport connected",
            Event::PduReceived(Pdu::AssociationRQ(_)) => "A-ASSOCIATE-RQ PDU",
            Event::PduReceived(Pdu::AssociationAC(_)) => "A-ASSOCIATE-AC PDU",
            Event::PduReceived(Pdu::AssociationRJ(_)) => "A-ASSOCIATE-RJ PDU",
            Event::PduReceived(Pdu::PData { .. }) => "P-DATA-TF PDU",
            Event::PduReceived(Pdu::ReleaseRQ) => "A-RELEASE-RQ PDU",
            Event::PduReceived(Pdu::ReleaseRP) => "A-RELEASE-RP PDU",
            Event::PduReceived(Pdu::AbortRQ { .. }) => "A-ABORT PDU",
            Event::InvalidPdu(_) => "invalid PDU",
            Event::TransportClosed => "transport closed",
            Event::TransportError => "transport error",
            Event::ArtimExpired => "ARTIM expired",
        }
    }
}

/// Why an association ended in an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// the local user requested the abort
    Local,
    /// the peer sent an A-ABORT
    Peer(AbortRQSource),
    /// a protocol violation was detected and an A-ABORT was sent
    Protocol(AbortRQServiceProviderReason),
    /// the transport connection was closed unexpectedly
    TransportClosed,
    /// the transport connection failed
    TransportError,
    /// the peer did not respond in time
    ArtimExpired,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Local => f.write_str("aborted by the local user"),
            AbortReason::Peer(AbortRQSource::ServiceProvider(reason)) => {
                write!(f, "aborted by the peer service provider: {}", reason)
            }
            AbortReason::Peer(_) => f.write_str("aborted by the peer"),
            AbortReason::Protocol(reason) => write!(f, "protocol violation: {}", reason),
            AbortReason::TransportClosed => f.write_str("transport connection closed"),
            AbortReason::TransportError => f.write_str("transport connection failed"),
            AbortReason::ArtimExpired => f.write_str("timed out waiting for the peer"),
        }
    }
}

/// A notification for the owning application.
#[derive(Debug, Clone, PartialEq)]
pub enum Indication {
    /// an association request arrived and awaits a local response
    AssociateRequested(AssociationRQ),
    /// the peer accepted the association
    AssociateAccepted(AssociationAC),
    /// the association was rejected, either by the peer or locally
    AssociateRejected(AssociationRJ),
    /// presentation data values arrived
    PData(Vec<PDataValue>),
    /// the peer requested a release
    ReleaseRequested,
    /// both nodes requested a release at the same time
    ReleaseCollision,
    /// the peer confirmed the release during a collision
    ReleaseConfirmed,
    /// the association was released
    Released,
    /// the association was aborted
    Aborted(AbortReason),
}

impl Indication {
    /// Whether this indication ends the association.
    /// Exactly one terminal indication is produced per association.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Indication::AssociateRejected(_) | Indication::Released | Indication::Aborted(_)
        )
    }
}

/// Work requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenTransport,
    SendPdu(Pdu),
    StartArtim,
    StopArtim,
    CloseTransport,
    Indicate(Indication),
}

/// The outcome of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: State,
    pub to: State,
    pub actions: Vec<Action>,
}

/// The upper layer state machine of one association.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
    role: Option<Role>,
    pending_request: Option<AssociationRQ>,
    artim_running: bool,
    terminated: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            state: State::Idle,
            role: None,
            pending_request: None,
            artim_running: false,
            terminated: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The role of this node, known once the association starts.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether the ARTIM timer should be running.
    pub fn artim_running(&self) -> bool {
        self.artim_running
    }

    /// Whether a terminal indication was already produced.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Handle one event, moving to the successor state.
    pub fn handle(&mut self, event: Event) -> Transition {
        let from = self.state;
        let name = event.name();
        let mut actions = Vec::new();
        let to = self.transition(event, &mut actions);
        self.state = to;
        if from != to {
            debug!("{:?} --[{}]--> {:?}", from, name, to);
        }
        Transition { from, to, actions }
    }

    fn transition(&mut self, event: Event, out: &mut Vec<Action>) -> State {
        use Event::*;
        use State::*;

        match (self.state, event) {
            (Closed, event) => {
                debug!("Ignoring {} on a closed association", event.name());
                Closed
            }

            // Sta1
            (Idle, AssociateRequest(rq)) => {
                // AE-1
                self.role = Some(Role::Requestor);
                self.pending_request = Some(rq);
                out.push(Action::OpenTransport);
                AwaitingTransportOpen
            }
            (Idle, TransportListen) => {
                self.role = Some(Role::Acceptor);
                AwaitingTransportConnect
            }
            (Idle, TransportConnected) | (AwaitingTransportConnect, TransportConnected) => {
                // AE-5
                self.role = Some(Role::Acceptor);
                self.start_artim(out);
                AwaitingAssociateRequest
            }
            (Idle, AbortRequest) | (AwaitingTransportConnect, AbortRequest) => {
                self.terminate(out, Indication::Aborted(AbortReason::Local));
                Closed
            }
            (Idle, event) | (AwaitingTransportConnect, event) => {
                warn!("Unexpected {} without a transport connection", event.name());
                self.terminate(
                    out,
                    Indication::Aborted(AbortReason::Protocol(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    )),
                );
                Closed
            }

            // Sta4
            (AwaitingTransportOpen, TransportConnected) => {
                // AE-2
                match self.pending_request.take() {
                    Some(rq) => {
                        out.push(Action::SendPdu(Pdu::AssociationRQ(rq)));
                        self.start_artim(out);
                        AwaitingAssociateResponse
                    }
                    None => self.close(
                        out,
                        Indication::Aborted(AbortReason::Protocol(
                            AbortRQServiceProviderReason::ReasonNotSpecified,
                        )),
                    ),
                }
            }
            (AwaitingTransportOpen, AbortRequest) => {
                self.close(out, Indication::Aborted(AbortReason::Local))
            }
            (AwaitingTransportOpen, event) => {
                let reason = match event {
                    TransportClosed => AbortReason::TransportClosed,
                    TransportError => AbortReason::TransportError,
                    ArtimExpired => AbortReason::ArtimExpired,
                    event => {
                        warn!("Unexpected {} while connecting", event.name());
                        AbortReason::Protocol(AbortRQServiceProviderReason::UnexpectedPdu)
                    }
                };
                self.close(out, Indication::Aborted(reason))
            }

            // Sta2
            (AwaitingAssociateRequest, PduReceived(Pdu::AssociationRQ(rq))) => {
                self.stop_artim(out);
                if rq.protocol_version() & 0x0001 == 0 {
                    // AE-8
                    warn!(
                        "Rejecting association: protocol version {:#06x} not supported",
                        rq.protocol_version()
                    );
                    let rj = AssociationRJ {
                        result: AssociationRJResult::Permanent,
                        source: AssociationRJSource::ServiceProviderASCE(
                            AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
                        ),
                    };
                    out.push(Action::SendPdu(Pdu::AssociationRJ(rj)));
                    self.start_artim(out);
                    self.terminate(out, Indication::AssociateRejected(rj));
                    Aborting
                } else {
                    // AE-6
                    out.push(Action::Indicate(Indication::AssociateRequested(rq)));
                    AwaitingAssociateResponseLocalUser
                }
            }
            (AwaitingAssociateRequest, PduReceived(Pdu::AbortRQ { source })) => {
                // AA-2
                self.close(out, Indication::Aborted(AbortReason::Peer(source)))
            }
            (AwaitingAssociateRequest, TransportClosed) => {
                // AA-5
                self.close(out, Indication::Aborted(AbortReason::TransportClosed))
            }
            (AwaitingAssociateRequest, ArtimExpired) => {
                // AA-2
                self.close(out, Indication::Aborted(AbortReason::ArtimExpired))
            }

            // Sta3
            (AwaitingAssociateResponseLocalUser, AssociateAccept(ac)) => {
                // AE-7
                out.push(Action::SendPdu(Pdu::AssociationAC(ac)));
                DataTransfer
            }
            (AwaitingAssociateResponseLocalUser, AssociateReject(rj)) => {
                // AE-8
                out.push(Action::SendPdu(Pdu::AssociationRJ(rj)));
                self.start_artim(out);
                self.terminate(out, Indication::AssociateRejected(rj));
                Aborting
            }

            // Sta5
            (AwaitingAssociateResponse, PduReceived(Pdu::AssociationAC(ac))) => {
                // AE-3
                self.stop_artim(out);
                out.push(Action::Indicate(Indication::AssociateAccepted(ac)));
                DataTransfer
            }
            (AwaitingAssociateResponse, PduReceived(Pdu::AssociationRJ(rj))) => {
                // AE-4
                self.close(out, Indication::AssociateRejected(rj))
            }

            // Sta6
            (DataTransfer, PDataRequest(data)) => {
                // DT-1
                out.push(Action::SendPdu(Pdu::PData { data }));
                DataTransfer
            }
            (DataTransfer, PduReceived(Pdu::PData { data })) => {
                // DT-2
                out.push(Action::Indicate(Indication::PData(data)));
                DataTransfer
            }
            (DataTransfer, ReleaseRequest) => {
                // AR-1
                out.push(Action::SendPdu(Pdu::ReleaseRQ));
                self.start_artim(out);
                AwaitingReleaseResponse
            }
            (DataTransfer, PduReceived(Pdu::ReleaseRQ)) => {
                // AR-2
                out.push(Action::Indicate(Indication::ReleaseRequested));
                AwaitingReleaseConfirmation
            }

            // Sta7
            (AwaitingReleaseResponse, PduReceived(Pdu::PData { data })) => {
                // AR-6
                out.push(Action::Indicate(Indication::PData(data)));
                AwaitingReleaseResponse
            }
            (AwaitingReleaseResponse, PduReceived(Pdu::ReleaseRP)) => {
                // AR-3
                self.close(out, Indication::Released)
            }
            (AwaitingReleaseResponse, PduReceived(Pdu::ReleaseRQ)) => {
                // AR-8
                out.push(Action::Indicate(Indication::ReleaseCollision));
                match self.role {
                    Some(Role::Acceptor) => ReleaseCollisionAcceptorPeer,
                    _ => {
                        self.stop_artim(out);
                        ReleaseCollisionRequestorLocal
                    }
                }
            }

            // Sta8
            (AwaitingReleaseConfirmation, PDataRequest(data)) => {
                // AR-7
                out.push(Action::SendPdu(Pdu::PData { data }));
                AwaitingReleaseConfirmation
            }
            (AwaitingReleaseConfirmation, ReleaseResponse)
            | (ReleaseCollisionAcceptorLocal, ReleaseResponse) => {
                // AR-4
                out.push(Action::SendPdu(Pdu::ReleaseRP));
                self.start_artim(out);
                self.terminate(out, Indication::Released);
                Aborting
            }

            // Sta9
            (ReleaseCollisionRequestorLocal, ReleaseResponse) => {
                // AR-9
                out.push(Action::SendPdu(Pdu::ReleaseRP));
                self.start_artim(out);
                ReleaseCollisionRequestorPeer
            }

            // Sta10
            (ReleaseCollisionAcceptorPeer, PduReceived(Pdu::ReleaseRP)) => {
                // AR-10
                self.stop_artim(out);
                out.push(Action::Indicate(Indication::ReleaseConfirmed));
                ReleaseCollisionAcceptorLocal
            }

            // Sta11
            (ReleaseCollisionRequestorPeer, PduReceived(Pdu::ReleaseRP)) => {
                // AR-3
                self.close(out, Indication::Released)
            }

            // Sta13
            (Aborting, TransportClosed) | (Aborting, TransportError) => {
                // AR-5
                self.stop_artim(out);
                Closed
            }
            (Aborting, ArtimExpired) | (Aborting, PduReceived(Pdu::AbortRQ { .. })) => {
                // AA-2
                self.stop_artim(out);
                out.push(Action::CloseTransport);
                Closed
            }
            (Aborting, PduReceived(Pdu::AssociationRQ(_))) | (Aborting, InvalidPdu(_)) => {
                // AA-7
                out.push(Action::SendPdu(Pdu::AbortRQ {
                    source: AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    ),
                }));
                Aborting
            }
            (Aborting, event) => {
                // AA-6
                debug!("Ignoring {} while aborting", event.name());
                Aborting
            }

            // transitions shared by every state with an open transport
            (_, PduReceived(Pdu::AbortRQ { source })) => {
                // AA-3
                self.close(out, Indication::Aborted(AbortReason::Peer(source)))
            }
            (_, TransportClosed) => {
                // AA-4
                self.close(out, Indication::Aborted(AbortReason::TransportClosed))
            }
            (_, TransportError) => {
                // AA-4
                self.close(out, Indication::Aborted(AbortReason::TransportError))
            }
            (_, ArtimExpired) => self.close(out, Indication::Aborted(AbortReason::ArtimExpired)),
            (_, AbortRequest) => {
                // AA-1
                out.push(Action::SendPdu(Pdu::AbortRQ {
                    source: AbortRQSource::ServiceUser,
                }));
                self.start_artim(out);
                self.terminate(out, Indication::Aborted(AbortReason::Local));
                Aborting
            }
            (_, InvalidPdu(reason)) | (_, LocalProtocolError(reason)) => {
                // AA-8
                self.provider_abort(out, reason)
            }
            (state, PduReceived(pdu)) => {
                // AA-8
                warn!("Unexpected PDU in state {:?}: {}", state, pdu.short_description());
                self.provider_abort(out, AbortRQServiceProviderReason::UnexpectedPdu)
            }
            (state, event) => {
                warn!("Local {} not valid in state {:?}", event.name(), state);
                self.provider_abort(out, AbortRQServiceProviderReason::ReasonNotSpecified)
            }
        }
    }

    fn start_artim(&mut self, out: &mut Vec<Action>) {
        self.artim_running = true;
        out.push(Action::StartArtim);
    }

    fn stop_artim(&mut self, out: &mut Vec<Action>) {
        if self.artim_running {
            self.artim_running = false;
            out.push(Action::StopArtim);
        }
    }

    /// Produce a terminal indication, unless one was already produced.
    fn terminate(&mut self, out: &mut Vec<Action>, indication: Indication) {
        if self.terminated {
            debug!("Dropping duplicate terminal indication {:?}", indication);
            return;
        }
        self.terminated = true;
        self.pending_request = None;
        out.push(Action::Indicate(indication));
    }

    fn close(&mut self, out: &mut Vec<Action>, indication: Indication) -> State {
        self.stop_artim(out);
        out.push(Action::CloseTransport);
        self.terminate(out, indication);
        State::Closed
    }

    fn provider_abort(
        &mut self,
        out: &mut Vec<Action>,
        reason: AbortRQServiceProviderReason,
    ) -> State {
        out.push(Action::SendPdu(Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(reason),
        }));
        self.start_artim(out);
        self.terminate(out, Indication::Aborted(AbortReason::Protocol(reason)));
        State::Aborting
    }
}
