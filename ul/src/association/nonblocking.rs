//! Asynchronous association driver, built on tokio.
//!
//! [`AsyncAssociation`] runs the same state machine as
//! [`Association`](super::Association)
//! over any `AsyncRead + AsyncWrite` byte stream.
//! The ARTIM timer is mapped to [`tokio::time::timeout`] around each read.
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use snafu::{ensure, ResultExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::machine::{Event, Indication, Role, State};
use super::notify::EstablishmentHandlers;
use super::session::{Effects, Session, SessionConfig};
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

const RECEIVE_CHUNK: usize = 16 * 1024;

/// A DICOM upper layer association over an asynchronous byte stream.
///
/// Obtain one through
/// [`ClientAssociationOptions::establish_async`](super::ClientAssociationOptions::establish_async)
/// or [`ServerAssociationOptions::establish_async`](super::ServerAssociationOptions::establish_async).
///
/// Unlike the blocking association,
/// dropping this value does not release the association:
/// the stream is merely dropped.
/// Call [`release`](Self::release) or [`abort`](Self::abort) first.
#[derive(Debug)]
pub struct AsyncAssociation<S> {
    session: Session,
    stream: Option<S>,
    read_timeout: Option<Duration>,
    scratch: Vec<u8>,
}

impl<S> AsyncAssociation<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(config: SessionConfig, read_timeout: Option<Duration>) -> Self {
        AsyncAssociation {
            session: Session::new(config),
            stream: None,
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

    /// Feed an event to the state machine and carry out the I/O it asks for,
    /// including the events which that I/O produces in turn.
    async fn dispatch(&mut self, event: Event) -> Result<()> {
        let mut next = Some(event);
        let mut outcome = Ok(());
        while let Some(event) = next.take() {
            let Effects {
                send,
                close_transport,
                ..
            } = self.session.dispatch(event);

            for pdu in send {
                let bytes = match encode_pdu(&pdu).context(SendPduSnafu) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Could not encode {}: {}", pdu.short_description(), e);
                        next = Some(Event::LocalProtocolError(
                            AbortRQServiceProviderReason::ReasonNotSpecified,
                        ));
                        outcome = Err(e);
                        break;
                    }
                };
                let sent = match self.stream.as_mut() {
                    Some(stream) => match stream.write_all(&bytes).await {
                        Ok(()) => stream.flush().await,
                        Err(e) => Err(e),
                    },
                    None => Err(ErrorKind::NotConnected.into()),
                };
                if let Err(e) = sent {
                    warn!("Could not send {}: {}", pdu.short_description(), e);
                    next = Some(Event::TransportError);
                    break;
                }
            }

            if close_transport {
                self.close_transport().await;
            }
        }
        outcome
    }

    async fn close_transport(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Failed to close stream: {}", e);
            }
        }
    }

    async fn read_more(&mut self, user_timeout: bool) -> Result<Option<Event>> {
        let Some(stream) = self.stream.as_mut() else {
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

        let read = stream.read(&mut self.scratch);
        let received = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read).await {
                Ok(received) => received,
                Err(_) => {
                    if self.session.artim_expired() {
                        return Ok(Some(Event::ArtimExpired));
                    }
                    return match (read_timeout, artim) {
                        (Some(_), None) => TimedOutSnafu.fail(),
                        (Some(r), Some(a)) if r < a => TimedOutSnafu.fail(),
                        _ => Ok(None),
                    };
                }
            },
            None => read.await,
        };

        match received {
            Ok(0) => Ok(Some(Event::TransportClosed)),
            Ok(n) => {
                trace!("Received {} bytes", n);
                self.session
                    .read_buffer
                    .extend_from_slice(&self.scratch[..n]);
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                warn!("Transport error: {}", e);
                Ok(Some(Event::TransportError))
            }
        }
    }

    /// Run the state machine until the next indication for the application.
    pub async fn next_indication(&mut self) -> Result<Indication> {
        loop {
            if let Some(indication) = self.session.next_indication() {
                return Ok(indication);
            }
            ensure!(self.session.state() != State::Closed, ClosedSnafu);
            if let Some(event) = self.session.buffered_event() {
                self.dispatch(event).await?;
                continue;
            }
            if let Some(event) = self.read_more(true).await? {
                self.dispatch(event).await?;
            }
        }
    }

    async fn wait_closed(&mut self) -> Result<()> {
        while self.session.state() != State::Closed {
            if let Some(event) = self.session.buffered_event() {
                self.dispatch(event).await?;
                continue;
            }
            if let Some(event) = self.read_more(false).await? {
                self.dispatch(event).await?;
            }
        }
        while let Some(indication) = self.session.next_indication() {
            trace!("Discarding {:?}", indication);
        }
        Ok(())
    }

    pub(crate) async fn request<F>(&mut self, rq: AssociationRQ, connect: F) -> Result<AssociationAC>
    where
        F: Future<Output = std::io::Result<S>>,
    {
        let state = self.session.state();
        ensure!(state == State::Idle, InvalidStateSnafu { state });

        let effects = self.session.dispatch(Event::AssociateRequest(rq));
        if effects.open_transport {
            match connect.await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.dispatch(Event::TransportConnected).await?;
                }
                Err(source) => {
                    self.dispatch(Event::TransportError).await?;
                    while self.session.next_indication().is_some() {}
                    return Err(source).context(ConnectSnafu);
                }
            }
        }

        match self.next_indication().await? {
            Indication::AssociateAccepted(ac) => Ok(ac),
            Indication::AssociateRejected(association_rj) => {
                RejectedSnafu { association_rj }.fail()
            }
            Indication::Aborted(reason) => AbortedSnafu { reason }.fail(),
            indication => self.unexpected(indication).await,
        }
    }

    pub(crate) async fn listen(&mut self, stream: S) -> Result<AssociationRQ> {
        let state = self.session.state();
        ensure!(state == State::Idle, InvalidStateSnafu { state });

        self.dispatch(Event::TransportListen).await?;
        self.stream = Some(stream);
        self.dispatch(Event::TransportConnected).await?;
        match self.next_indication().await? {
            Indication::AssociateRequested(rq) => Ok(rq),
            Indication::AssociateRejected(association_rj) => {
                self.wait_closed().await?;
                RejectedSnafu { association_rj }.fail()
            }
            Indication::Aborted(reason) => AbortedSnafu { reason }.fail(),
            indication => self.unexpected(indication).await,
        }
    }

    pub(crate) async fn accept(&mut self, ac: AssociationAC) -> Result<()> {
        let state = self.session.state();
        ensure!(
            state == State::AwaitingAssociateResponseLocalUser,
            InvalidStateSnafu { state }
        );
        self.dispatch(Event::AssociateAccept(ac)).await
    }

    pub(crate) async fn reject(&mut self, rj: AssociationRJ) -> Result<()> {
        let state = self.session.state();
        ensure!(
            state == State::AwaitingAssociateResponseLocalUser,
            InvalidStateSnafu { state }
        );
        self.dispatch(Event::AssociateReject(rj)).await?;
        self.wait_closed().await
    }

    async fn unexpected<R>(&mut self, indication: Indication) -> Result<R> {
        warn!("Unexpected indication {:?}", indication);
        if !indication.is_terminal() && !self.session.state().is_sink() {
            if let Err(e) = self
                .dispatch(Event::LocalProtocolError(
                    AbortRQServiceProviderReason::UnexpectedPdu,
                ))
                .await
            {
                debug!("Failed to send A-ABORT: {}", e);
            }
            if let Err(e) = self.wait_closed().await {
                debug!("Association did not close cleanly: {}", e);
            }
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
    pub async fn send_pdata(&mut self, data: Vec<PDataValue>) -> Result<()> {
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
        self.dispatch(Event::PDataRequest(data)).await
    }

    /// Wait for the next P-DATA-TF PDU from the peer.
    ///
    /// A release request from the peer is reported as
    /// [`Error::ReleaseRequested`].
    pub async fn receive_pdata(&mut self) -> Result<Vec<PDataValue>> {
        match self.next_indication().await? {
            Indication::PData(data) => Ok(data),
            Indication::ReleaseRequested => ReleaseRequestedSnafu.fail(),
            Indication::Aborted(reason) => AbortedSnafu { reason }.fail(),
            Indication::Released => ClosedSnafu.fail(),
            indication => self.unexpected(indication).await,
        }
    }

    /// Send a message on the given presentation context.
    pub async fn send_message(
        &mut self,
        presentation_context_id: u8,
        message: &Message,
    ) -> Result<()> {
        let state = self.session.state();
        ensure!(state.can_send_pdata(), InvalidStateSnafu { state });
        let values = self
            .session
            .prepare_message(presentation_context_id, message)?;
        for value in values {
            self.send_pdata(vec![value]).await?;
        }
        Ok(())
    }

    /// Receive the next whole message
    /// together with the ID of its presentation context.
    pub async fn receive_message(&mut self) -> Result<(u8, Message)> {
        loop {
            match self.session.next_message() {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => {}
                Err(e) => return Err(self.abort_on(e).await),
            }
            let data = self.receive_pdata().await?;
            if let Err(e) = self.session.push_pdata(data) {
                return Err(self.abort_on(e).await);
            }
        }
    }

    async fn abort_on(&mut self, e: Error) -> Error {
        warn!("Aborting association: {}", e);
        if let Err(e) = self
            .dispatch(Event::LocalProtocolError(
                AbortRQServiceProviderReason::InvalidPduParameter,
            ))
            .await
        {
            debug!("Failed to send A-ABORT: {}", e);
        }
        e
    }

    /// Gracefully release the association,
    /// then wait for the connection to close.
    pub async fn release(&mut self) -> Result<()> {
        let state = self.session.state();
        ensure!(state == State::DataTransfer, InvalidStateSnafu { state });
        self.dispatch(Event::ReleaseRequest).await?;
        loop {
            match self.next_indication().await? {
                Indication::PData(data) => {
                    debug!("Discarding {} P-DATA values during release", data.len());
                }
                Indication::ReleaseCollision => {
                    if self.session.role() == Some(Role::Requestor) {
                        self.dispatch(Event::ReleaseResponse).await?;
                    }
                }
                Indication::ReleaseConfirmed => self.dispatch(Event::ReleaseResponse).await?,
                Indication::Released => break,
                Indication::Aborted(reason) => return AbortedSnafu { reason }.fail(),
                indication => return self.unexpected(indication).await,
            }
        }
        self.wait_closed().await
    }

    /// Confirm a release requested by the peer,
    /// then wait for the connection to close.
    pub async fn respond_release(&mut self) -> Result<()> {
        let state = self.session.state();
        ensure!(
            state == State::AwaitingReleaseConfirmation,
            InvalidStateSnafu { state }
        );
        self.dispatch(Event::ReleaseResponse).await?;
        self.wait_closed().await
    }

    /// Abort the association and wait for the connection to close.
    pub async fn abort(&mut self) -> Result<()> {
        if self.session.state().is_sink() {
            self.close_transport().await;
            return self.wait_closed().await;
        }
        self.dispatch(Event::AbortRequest).await?;
        self.wait_closed().await
    }
}
