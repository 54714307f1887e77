//! I/O free core shared by the blocking and asynchronous drivers.
//!
//! A [`Session`] owns the state machine of one association
//! together with everything the drivers need between two I/O operations:
//! the bytes received but not yet decoded,
//! the indications not yet consumed by the application,
//! the ARTIM deadline,
//! the negotiated association record and the message reassembly state.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{trace, warn};

use super::machine::{Action, Event, Indication, Role, State, StateMachine};
use super::notify::EstablishmentHandlers;
use super::NegotiatedAssociation;
use crate::message::fragment::Reassembler;
use crate::pdu::{decode_pdu, AssociationRQ, Pdu};

/// The default ARTIM timeout.
pub const DEFAULT_ARTIM_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings of a session which do not change after establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// the maximum PDU length this node accepts
    pub max_pdu_length: u32,
    /// whether to refuse PDUs longer than `max_pdu_length`
    pub strict: bool,
    pub artim_timeout: Duration,
}

/// The I/O requested by one dispatched event.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub open_transport: bool,
    pub send: Vec<Pdu>,
    pub close_transport: bool,
}

#[derive(Debug)]
pub(crate) struct Session {
    machine: StateMachine,
    config: SessionConfig,
    artim_deadline: Option<Instant>,
    pub(crate) read_buffer: BytesMut,
    indications: VecDeque<Indication>,
    handlers: Option<EstablishmentHandlers<NegotiatedAssociation, Indication>>,
    request: Option<AssociationRQ>,
    negotiated: Option<NegotiatedAssociation>,
    pub(crate) reassembler: Reassembler,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            machine: StateMachine::new(),
            config,
            artim_deadline: None,
            read_buffer: BytesMut::with_capacity(config.max_pdu_length as usize),
            indications: VecDeque::new(),
            handlers: None,
            request: None,
            negotiated: None,
            reassembler: Reassembler::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn role(&self) -> Option<Role> {
        self.machine.role()
    }

    pub fn negotiated(&self) -> Option<&NegotiatedAssociation> {
        self.negotiated.as_ref()
    }

    pub fn set_handlers(
        &mut self,
        handlers: EstablishmentHandlers<NegotiatedAssociation, Indication>,
    ) {
        self.handlers = Some(handlers);
    }

    /// Feed one event to the state machine
    /// and translate its actions into I/O effects.
    pub fn dispatch(&mut self, event: Event) -> Effects {
        let transition = self.machine.handle(event);
        let mut effects = Effects::default();
        for action in transition.actions {
            match action {
                Action::OpenTransport => effects.open_transport = true,
                Action::SendPdu(pdu) => {
                    trace!("<< {}", pdu.short_description());
                    match &pdu {
                        Pdu::AssociationRQ(rq) => self.request = Some(rq.clone()),
                        Pdu::AssociationAC(ac) => self.establish(Role::Acceptor, ac),
                        _ => {}
                    }
                    effects.send.push(pdu);
                }
                Action::StartArtim => {
                    self.artim_deadline = Some(Instant::now() + self.config.artim_timeout)
                }
                Action::StopArtim => self.artim_deadline = None,
                Action::CloseTransport => effects.close_transport = true,
                Action::Indicate(indication) => self.indicate(indication),
            }
        }
        effects
    }

    fn indicate(&mut self, indication: Indication) {
        match &indication {
            Indication::AssociateRequested(rq) => self.request = Some(rq.clone()),
            Indication::AssociateAccepted(ac) => self.establish(Role::Requestor, ac),
            terminal if terminal.is_terminal() => {
                self.reassembler.clear();
                if let Some(handlers) = &self.handlers {
                    handlers.fail(terminal.clone());
                }
            }
            _ => {}
        }
        self.indications.push_back(indication);
    }

    fn establish(&mut self, role: Role, ac: &crate::pdu::AssociationAC) {
        let Some(rq) = &self.request else {
            warn!("Association accepted without a known request");
            return;
        };
        let negotiated = NegotiatedAssociation::from_exchange(role, rq, ac);
        self.reassembler
            .set_presentation_contexts(negotiated.presentation_contexts().iter().map(|pc| pc.id));
        if let Some(handlers) = &self.handlers {
            handlers.succeed(negotiated.clone());
        }
        self.negotiated = Some(negotiated);
    }

    pub fn next_indication(&mut self) -> Option<Indication> {
        self.indications.pop_front()
    }

    /// Decode the next PDU held in the read buffer, if complete.
    pub fn buffered_event(&mut self) -> Option<Event> {
        match decode_pdu(
            &mut self.read_buffer,
            self.config.max_pdu_length,
            self.config.strict,
        ) {
            Ok(Some(pdu)) => {
                trace!(">> {}", pdu.short_description());
                Some(Event::PduReceived(pdu))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Invalid PDU received: {}", e);
                self.read_buffer.clear();
                Some(Event::InvalidPdu(e.abort_reason()))
            }
        }
    }

    /// The time left until the ARTIM timer expires,
    /// or `None` if it is not running.
    pub fn artim_remaining(&self) -> Option<Duration> {
        self.artim_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn artim_expired(&self) -> bool {
        self.artim_remaining() == Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::machine::AbortReason;
    use crate::pdu::{
        encode_pdu, AbortRQServiceProviderReason, AssociationAC, PresentationContextProposed,
        PresentationContextResult, PresentationContextResultReason, DEFAULT_MAX_PDU,
    };
    use std::sync::{Arc, Mutex};

    fn config() -> SessionConfig {
        SessionConfig {
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            artim_timeout: Duration::from_secs(5),
        }
    }

    fn rq() -> AssociationRQ {
        let mut rq = AssociationRQ::new()
            .with_application_context("1.2.840.10008.3.1.1.1")
            .with_presentation_contexts(vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            }]);
        rq.set_called_ae_title("ANY-SCP").unwrap();
        rq.set_calling_ae_title("THIS-SCU").unwrap();
        rq
    }

    fn ac() -> AssociationAC {
        let mut ac = AssociationAC::new()
            .with_application_context("1.2.840.10008.3.1.1.1")
            .with_presentation_contexts(vec![PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            }]);
        ac.set_called_ae_title("ANY-SCP").unwrap();
        ac.set_calling_ae_title("THIS-SCU").unwrap();
        ac
    }

    #[test]
    fn requestor_records_negotiation() {
        let outcome = Arc::new(Mutex::new(Vec::new()));
        let (ok, err) = (Arc::clone(&outcome), Arc::clone(&outcome));
        let mut session = Session::new(config());
        session.set_handlers(EstablishmentHandlers::new(
            move |n: NegotiatedAssociation| ok.lock().unwrap().push(format!("ok {}", n.peer_ae_title())),
            move |i: Indication| err.lock().unwrap().push(format!("err {:?}", i)),
        ));

        let effects = session.dispatch(Event::AssociateRequest(rq()));
        assert!(effects.open_transport);
        let effects = session.dispatch(Event::TransportConnected);
        assert_eq!(effects.send, vec![Pdu::AssociationRQ(rq())]);
        assert!(session.artim_remaining().is_some());

        let bytes = encode_pdu(&Pdu::AssociationAC(ac())).unwrap();
        session.read_buffer.extend_from_slice(&bytes[..10]);
        assert_eq!(session.buffered_event(), None);
        session.read_buffer.extend_from_slice(&bytes[10..]);
        let event = session.buffered_event().unwrap();
        session.dispatch(event);

        assert_eq!(session.state(), State::DataTransfer);
        assert_eq!(session.artim_remaining(), None);
        assert_eq!(
            session.next_indication(),
            Some(Indication::AssociateAccepted(ac()))
        );
        let negotiated = session.negotiated().unwrap();
        assert_eq!(negotiated.presentation_contexts().len(), 1);

        // a later failure is not reported to the handlers
        session.dispatch(Event::TransportError);
        assert_eq!(*outcome.lock().unwrap(), vec!["ok ANY-SCP".to_string()]);
        assert_eq!(
            session.next_indication(),
            Some(Indication::Aborted(AbortReason::TransportError))
        );
    }

    #[test]
    fn garbage_becomes_invalid_pdu_event() {
        let mut session = Session::new(config());
        session.read_buffer.extend_from_slice(&[0x09, 0, 0, 0, 0, 0]);
        assert_eq!(
            session.buffered_event(),
            Some(Event::InvalidPdu(AbortRQServiceProviderReason::UnrecognizedPdu))
        );
        assert!(session.read_buffer.is_empty());
    }
}
