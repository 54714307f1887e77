//! Blocking association driver.
//!
//! An [`Association`] feeds the state machine with events
//! obtained from a blocking [`Transport`]
//! and carries out the resulting actions.
//! The ARTIM timer is mapped to the receive timeout of the transport.
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use snafu::{ensure, ResultExt};
use tracing::{debug, trace, warn};

use super::machine::{Event, Indication, Role, State};
use super::notify::EstablishmentHandlers;
use super::session::{Effects, Session, SessionConfig};
use super::transport::{is_timeout, Transport};
use super::{
    AbortedSnafu, ClosedSnafu, ConnectSnafu, Error, InvalidStateSnafu, NegotiatedAssociation,
    RejectedSnafu, ReleaseRequestedSnafu, Result, SendPduSnafu, SendTooLongPduSnafu,
    TimedOutSnafu, UnexpectedIndicationSnafu,
};
use crate::message::Message;
use crate::pdu::{
    encode_pdu, AbortRQServiceProviderReason, AssociationAC, AssociationRJ, AssociationRQ,
    PDataValue,
};

/// Size of the scratch buffer for each receive.
const RECEIVE_CHUNK: usize = 16 * 1024;

/// A DICOM upper layer association over a blocking transport.
///
/// Obtain one through
/// [`ClientAssociationOptions`](super::ClientAssociationOptions) as a requestor
/// or [`ServerAssociationOptions`](super::ServerAssociationOptions) as an acceptor.
///
/// The most common operations of an established association are
/// [`send_message`](Self::send_message)
/// and [`receive_message`](Self::receive_message).
///
/// When the value falls out of scope,
/// an established association is released,
/// and one in any other open state is aborted.
#[derive(Debug)]
pub struct Association<T: Transport = TcpStream> {
    session: Session,
    transport: Option<T>,
    read_timeout: Option<Duration>,
    scratch: Vec<u8>,
}

impl<T: Transport> Association<T> {
    pub(crate) fn new(config: SessionConfig, read_timeout: Option<Duration>) -> Self {
        Association {
            session: Session::new(config),
            transport: None,
            read_timeout,
            scratch: vec![0; RECEIVE_CHUNK],
        }
    }

    pub(crate) fn set_establishment_handlers(
        &mut self,
        handlers: EstablishmentHandlers<NegotiatedAssociation, Indication>,
    ) {
        self.session.set_handlers(handlers);
    }

    /// The current state of the association.
    pub fn state(&self) -> State {
        self.session.state()
    }

    /// The role of this node, known once the association started.
    pub fn role(&self) -> Option<Role> {
        self.session.role()
    }

    /// The outcome of the negotiation, once established.
    pub fn negotiated(&self) -> Option<&NegotiatedAssociation> {
        self.session.negotiated()
    }

    /// The maximum PDU length this node admits.
    pub fn local_max_pdu_length(&self) -> u32 {
        self.session.config().max_pdu_length
    }

    /// Feed one event to the state machine
    /// and carry out the I/O it asks for.
    fn dispatch(&mut self, event: Event) -> Result<()> {
        let Effects {
            send,
            close_transport,
            ..
        } = self.session.dispatch(event);

        let mut follow_up = None;
        let mut outcome = Ok(());
        for pdu in send {
            let bytes = match encode_pdu(&pdu).context(SendPduSnafu) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Could not encode {}: {}", pdu.short_description(), e);
                    follow_up = Some(Event::LocalProtocolError(
                        AbortRQServiceProviderReason::ReasonNotSpecified,
                    ));
                    outcome = Err(e);
                    break;
                }
            };
            let sent = match self.transport.as_mut() {
                Some(transport) => transport.send(&bytes),
                None => Err(ErrorKind::NotConnected.into()),
            };
            if let Err(e) = sent {
                warn!("Could not send {}: {}", pdu.short_description(), e);
                follow_up = Some(Event::TransportError);
                break;
            }
        }

        if close_transport {
            self.close_transport();
        }
        if let Some(event) = follow_up {
            self.dispatch(event)?;
        }
        outcome
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("Failed to close transport: {}", e);
            }
        }
    }

    /// Receive more bytes from the transport,
    /// producing an event if the receive failed or the ARTIM timer expired.
    ///
    /// With `user_timeout`, running out of the configured read timeout
    /// while the ARTIM timer is not running is reported as an error.
    fn read_more(&mut self, user_timeout: bool) -> Result<Option<Event>> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(Some(Event::TransportClosed));
        };
        let artim = self.session.artim_remaining();
        if artim == Some(Duration::ZERO) {
            return Ok(Some(Event::ArtimExpired));
        }
        let read_timeout = self.read_timeout.filter(|_| user_timeout);
        let timeout = match (artim, read_timeout) {
            (Some(a), Some(r)) => Some(a.min(r)),
            (a, r) => a.or(r),
        };

        match transport.receive(&mut self.scratch, timeout) {
            Ok(0) => Ok(Some(Event::TransportClosed)),
            Ok(n) => {
                trace!("Received {} bytes", n);
                self.session
                    .read_buffer
                    .extend_from_slice(&self.scratch[..n]);
                Ok(None)
            }
            Err(e) if is_timeout(&e) => {
                if self.session.artim_expired() {
                    return Ok(Some(Event::ArtimExpired));
                }
                match (read_timeout, artim) {
                    (Some(_), None) => TimedOutSnafu.fail(),
                    (Some(r), Some(a)) if r < a => TimedOutSnafu.fail(),
                    _ => Ok(None),
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                warn!("Transport error: {}", e);
                Ok(Some(Event::TransportError))
            }
        }
    }

    /// Run the state machine until the next indication for the application.
    pub fn next_indication(&mut self) -> Result<Indication> {
        loop {
            if let Some(indication) = self.session.next_indication() {
                return Ok(indication);
            }
            ensure!(self.session.state() != State::Closed, ClosedSnafu);
            if let Some(event) = self.session.buffered_event() {
                self.dispatch(event)?;
                continue;
            }
            if let Some(event) = self.read_more(true)? {
                self.dispatch(event)?;
            }
        }
    }

    /// Run the state machine until the transport is closed,
    /// discarding any indication.
    fn wait_closed(&mut self) -> Result<()> {
        while self.session.state() != State::Closed {
            if let Some(event) = self.session.buffered_event() {
                self.dispatch(event)?;
                continue;
            }
            if let Some(event) = self.read_more(false)? {
                self.dispatch(event)?;
            }
        }
        while let Some(indication) = self.session.next_indication() {
            trace!("Discarding {:?}", indication);
        }
        Ok(())
    }

    /// Request an association as the requestor,
    /// opening the transport through `connect`.
    pub(crate) fn request<F>(&mut self, rq: AssociationRQ, connect: F) -> Result<AssociationAC>
    where
        F: FnOnce() -> std::io::Result<T>,
    {
        let state = self.session.state();
        ensure!(state == State::Idle, InvalidStateSnafu { state });

        let effects = self.session.dispatch(Event::AssociateRequest(rq));
        if effects.open_transport {
            match connect() {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.dispatch(Event::TransportConnected)?;
                }
                Err(source) => {
                    self.dispatch(Event::TransportError)?;
                    while self.session.next_indication().is_some() {}
                    return Err(source).context(ConnectSnafu);
                }
            }
        }

        match self.next_indication()? {
            Indication::AssociateAccepted(ac) => Ok(ac),
            Indication::AssociateRejected(association_rj) => {
                RejectedSnafu { association_rj }.fail()
            }
            Indication::Aborted(reason) => AbortedSnafu { reason }.fail(),
            indication => self.unexpected(indication),
        }
    }

    /// Take in a freshly connected transport as the acceptor
    /// and wait for the association request.
    pub(crate) fn listen(&mut self, transport: T) -> Result<AssociationRQ> {
        let state = self.session.state();
        ensure!(state == State::Idle, InvalidStateSnafu { state });

        self.dispatch(Event::TransportListen)?;
        self.transport = Some(transport);
        self.dispatch(Event::TransportConnected)?;
        match self.next_indication()? {
            Indication::AssociateRequested(rq) => Ok(rq),
            Indication::AssociateRejected(association_rj) => {
                // unsupported protocol version, already answered
                self.wait_closed()?;
                RejectedSnafu { association_rj }.fail()
            }
            Indication::Aborted(reason) => AbortedSnafu { reason }.fail(),
            indication => self.unexpected(indication),
        }
    }

    /// Accept the pending association request.
    pub(crate) fn accept(&mut self, ac: AssociationAC) -> Result<()> {
        let state = self.session.state();
        ensure!(
            state == State::AwaitingAssociateResponseLocalUser,
            InvalidStateSnafu { state }
        );
        self.dispatch(Event::AssociateAccept(ac))
    }

    /// Reject the pending association request
    /// and wait for the requestor to close the connection.
    pub(crate) fn reject(&mut self, rj: AssociationRJ) -> Result<()> {
        let state = self.session.state();
        ensure!(
            state == State::AwaitingAssociateResponseLocalUser,
            InvalidStateSnafu { state }
        );
        self.dispatch(Event::AssociateReject(rj))?;
        self.wait_closed()
    }

    /// Abort after a failure of the local user,
    /// such as a request which cannot be negotiated.
    pub(crate) fn protocol_abort(&mut self, reason: AbortRQServiceProviderReason) {
        if !self.session.state().is_sink() {
            if let Err(e) = self.dispatch(Event::LocalProtocolError(reason)) {
                debug!("Failed to send A-ABORT: {}", e);
            }
        }
        if let Err(e) = self.wait_closed() {
            debug!("Association did not close cleanly: {}", e);
        }
    }

    fn unexpected<R>(&mut self, indication: Indication) -> Result<R> {
        warn!("Unexpected indication {:?}", indication);
        if !indication.is_terminal() {
            self.protocol_abort(AbortRQServiceProviderReason::UnexpectedPdu);
        }
        UnexpectedIndicationSnafu {
            indication: Box::new(indication),
        }
        .fail()
    }

    /// Send P-DATA values in a single P-DATA-TF PDU.
    ///
    /// Fails if the PDU would be longer
    /// than the maximum length admitted by the peer.
    pub fn send_pdata(&mut self, data: Vec<PDataValue>) -> Result<()> {
        let state = self.session.state();
        ensure!(state.can_send_pdata(), InvalidStateSnafu { state });

        let max = self
            .session
            .negotiated()
            .map_or(0, NegotiatedAssociation::peer_max_pdu_length);
        let length: usize = data.iter().map(|pdv| 6 + pdv.data.len()).sum();
        ensure!(
            max == 0 || length <= max as usize,
            SendTooLongPduSnafu { length }
        );
        self.dispatch(Event::PDataRequest(data))
    }

    /// Wait for the next P-DATA-TF PDU from the peer.
    ///
    /// A release request from the peer is reported as
    /// [`Error::ReleaseRequested`];
    /// answer it with [`respond_release`](Self::respond_release).
    pub fn receive_pdata(&mut self) -> Result<Vec<PDataValue>> {
        match self.next_indication()? {
            Indication::PData(data) => Ok(data),
            Indication::ReleaseRequested => ReleaseRequestedSnafu.fail(),
            Indication::Aborted(reason) => AbortedSnafu { reason }.fail(),
            Indication::Released => ClosedSnafu.fail(),
            indication => self.unexpected(indication),
        }
    }

    /// Send a message on the given presentation context,
    /// split into as many P-DATA-TF PDUs as needed.
    pub fn send_message(&mut self, presentation_context_id: u8, message: &Message) -> Result<()> {
        let state = self.session.state();
        ensure!(state.can_send_pdata(), InvalidStateSnafu { state });
        let values = self
            .session
            .prepare_message(presentation_context_id, message)?;
        for value in values {
            self.send_pdata(vec![value])?;
        }
        Ok(())
    }

    /// Receive the next whole message
    /// together with the ID of its presentation context.
    ///
    /// Malformed or out of order fragments abort the association.
    pub fn receive_message(&mut self) -> Result<(u8, Message)> {
        loop {
            match self.session.next_message() {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => {}
                Err(e) => return Err(self.abort_on(e)),
            }
            let data = self.receive_pdata()?;
            if let Err(e) = self.session.push_pdata(data) {
                return Err(self.abort_on(e));
            }
        }
    }

    fn abort_on(&mut self, e: Error) -> Error {
        warn!("Aborting association: {}", e);
        if let Err(e) = self.dispatch(Event::LocalProtocolError(
            AbortRQServiceProviderReason::InvalidPduParameter,
        )) {
            debug!("Failed to send A-ABORT: {}", e);
        }
        e
    }

    /// Gracefully release the association,
    /// then wait for the connection to close.
    ///
    /// P-DATA received while waiting for the release response is discarded.
    pub fn release(&mut self) -> Result<()> {
        let state = self.session.state();
        ensure!(state == State::DataTransfer, InvalidStateSnafu { state });
        self.dispatch(Event::ReleaseRequest)?;
        loop {
            match self.next_indication()? {
                Indication::PData(data) => {
                    debug!("Discarding {} P-DATA values during release", data.len());
                }
                Indication::ReleaseCollision => {
                    if self.session.role() == Some(Role::Requestor) {
                        self.dispatch(Event::ReleaseResponse)?;
                    }
                }
                Indication::ReleaseConfirmed => self.dispatch(Event::ReleaseResponse)?,
                Indication::Released => break,
                Indication::Aborted(reason) => return AbortedSnafu { reason }.fail(),
                indication => return self.unexpected(indication),
            }
        }
        self.wait_closed()
    }

    /// Confirm a release requested by the peer,
    /// then wait for the connection to close.
    pub fn respond_release(&mut self) -> Result<()> {
        let state = self.session.state();
        ensure!(
            state == State::AwaitingReleaseConfirmation,
            InvalidStateSnafu { state }
        );
        self.dispatch(Event::ReleaseResponse)?;
        self.wait_closed()
    }

    /// Abort the association and wait for the connection to close.
    pub fn abort(&mut self) -> Result<()> {
        if self.session.state().is_sink() {
            self.close_transport();
            return self.wait_closed();
        }
        self.dispatch(Event::AbortRequest)?;
        self.wait_closed()
    }
}

/// Release an established association or abort an open one.
impl<T: Transport> Drop for Association<T> {
    fn drop(&mut self) {
        let outcome = match self.session.state() {
            State::Closed | State::Idle => Ok(()),
            State::DataTransfer => self.release(),
            State::Aborting => Ok(()),
            _ => self.abort(),
        };
        if let Err(e) = outcome {
            debug!("Association did not close cleanly: {}", e);
        }
        self.close_transport();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::machine::AbortReason;
    use crate::pdu::{
        read_pdu, write_pdu, AbortRQSource, PDataValueType, Pdu, PresentationContextProposed,
        PresentationContextResult, PresentationContextResultReason, DEFAULT_MAX_PDU,
    };
    use matches::assert_matches;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// A scripted peer: bytes queued by the test are received,
    /// everything sent is recorded.
    #[derive(Debug, Clone, Default)]
    struct Scripted {
        incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sent: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
        broken: Arc<Mutex<bool>>,
    }

    impl Scripted {
        fn queue(&self, pdu: &Pdu) {
            let mut bytes = Vec::new();
            write_pdu(&mut bytes, pdu).unwrap();
            self.incoming.lock().unwrap().push_back(bytes);
        }

        fn sent_pdus(&self) -> Vec<Pdu> {
            let sent = self.sent.lock().unwrap();
            let mut cursor = std::io::Cursor::new(&sent[..]);
            let mut pdus = Vec::new();
            while (cursor.position() as usize) < sent.len() {
                pdus.push(read_pdu(&mut cursor, DEFAULT_MAX_PDU, true).unwrap());
            }
            pdus
        }
    }

    impl Transport for Scripted {
        fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            if *self.broken.lock().unwrap() {
                return Err(ErrorKind::BrokenPipe.into());
            }
            self.sent.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8], _: Option<Duration>) -> std::io::Result<usize> {
            match self.incoming.lock().unwrap().pop_front() {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Ok(0),
            }
        }

        fn close(&mut self) -> std::io::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

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

    fn established(peer: &Scripted) -> Association<Scripted> {
        peer.queue(&Pdu::AssociationAC(ac()));
        let mut association = Association::new(config(), None);
        let transport = peer.clone();
        association.request(rq(), move || Ok(transport)).unwrap();
        association
    }

    #[test]
    fn request_then_release() {
        let peer = Scripted::default();
        let mut association = established(&peer);
        assert_eq!(association.state(), State::DataTransfer);
        assert_eq!(association.negotiated().unwrap().peer_ae_title(), "ANY-SCP");

        peer.queue(&Pdu::ReleaseRP);
        association.release().unwrap();
        assert_eq!(association.state(), State::Closed);
        assert!(*peer.closed.lock().unwrap());
        assert_eq!(
            peer.sent_pdus(),
            vec![Pdu::AssociationRQ(rq()), Pdu::ReleaseRQ]
        );
    }

    #[test]
    fn rejection_is_reported() {
        let peer = Scripted::default();
        let rj = AssociationRJ {
            result: crate::pdu::AssociationRJResult::Permanent,
            source: crate::pdu::AssociationRJSource::ServiceUser(
                crate::pdu::AssociationRJServiceUserReason::CalledAETitleNotRecognized,
            ),
        };
        peer.queue(&Pdu::AssociationRJ(rj));
        let mut association: Association<Scripted> = Association::new(config(), None);
        let transport = peer.clone();
        let result = association.request(rq(), move || Ok(transport));
        assert_matches!(result, Err(Error::Rejected { association_rj, .. }) if association_rj == rj);
        assert_eq!(association.state(), State::Closed);
    }

    #[test]
    fn connection_failure() {
        let mut association: Association<Scripted> = Association::new(config(), None);
        let result = association.request(rq(), || {
            Err(std::io::Error::from(ErrorKind::ConnectionRefused))
        });
        assert_matches!(result, Err(Error::Connect { .. }));
        assert_eq!(association.state(), State::Closed);
    }

    #[test]
    fn pdata_and_peer_abort() {
        let peer = Scripted::default();
        let mut association = established(&peer);
        let value = PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Command,
            is_last: true,
            data: vec![1, 2, 3, 4],
        };
        peer.queue(&Pdu::PData {
            data: vec![value.clone()],
        });
        peer.queue(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        });
        assert_eq!(association.receive_pdata().unwrap(), vec![value]);
        assert_matches!(
            association.receive_pdata(),
            Err(Error::Aborted {
                reason: AbortReason::Peer(AbortRQSource::ServiceUser),
                ..
            })
        );
        assert_eq!(association.state(), State::Closed);
        assert_matches!(association.receive_pdata(), Err(Error::Closed { .. }));
    }

    #[test]
    fn oversized_pdata_is_refused() {
        let peer = Scripted::default();
        let mut association = established(&peer);
        let value = PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; DEFAULT_MAX_PDU as usize],
        };
        assert_matches!(
            association.send_pdata(vec![value]),
            Err(Error::SendTooLongPdu { .. })
        );
        assert_eq!(association.state(), State::DataTransfer);
        peer.queue(&Pdu::ReleaseRP);
    }

    #[test]
    fn peer_release_request() {
        let peer = Scripted::default();
        let mut association = established(&peer);
        peer.queue(&Pdu::ReleaseRQ);
        assert_matches!(
            association.receive_pdata(),
            Err(Error::ReleaseRequested { .. })
        );
        assert_eq!(association.state(), State::AwaitingReleaseConfirmation);
        association.respond_release().unwrap();
        assert_eq!(association.state(), State::Closed);
        assert_eq!(peer.sent_pdus().last(), Some(&Pdu::ReleaseRP));
    }

    #[test]
    fn bad_fragment_is_reported_even_if_abort_fails() {
        let peer = Scripted::default();
        let mut association = established(&peer);
        peer.queue(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: true,
                data: vec![0; 8],
            }],
        });
        *peer.broken.lock().unwrap() = true;
        assert_matches!(association.receive_message(), Err(Error::Reassemble { .. }));
        assert!(association.state().is_sink());
        assert_eq!(peer.sent_pdus(), vec![Pdu::AssociationRQ(rq())]);
    }

    #[test]
    fn dropping_aborts_pending_request() {
        let peer = Scripted::default();
        {
            let mut association: Association<Scripted> = Association::new(config(), None);
            association.dispatch(Event::AssociateRequest(rq())).unwrap();
            association.transport = Some(peer.clone());
            association.dispatch(Event::TransportConnected).unwrap();
            assert_eq!(association.state(), State::AwaitingAssociateResponse);
        }
        assert_eq!(
            peer.sent_pdus().last(),
            Some(&Pdu::AbortRQ {
                source: AbortRQSource::ServiceUser
            })
        );
        assert!(*peer.closed.lock().unwrap());
    }
}
