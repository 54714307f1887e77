//! Association requester module
//!
//! The module provides the means to request a DICOM association
//! in which this application entity is the requestor.
//! See [`ClientAssociationOptions`] for details and examples
//! on how to create an association.
use std::{
    borrow::Cow,
    io::ErrorKind,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use dicom_dictionary_std::uids;
use snafu::{ensure, ResultExt};
use tracing::{debug, warn};

use crate::{
    pdu::{
        AssociationRQ, PresentationContextProposed, RoleSelection,
        UserIdentity, UserIdentityType, UserInformation, UserVariableItem, DEFAULT_MAX_PDU,
        MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
    },
    AeAddr, DICOM_APPLICATION_CONTEXT, IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{
    driver::Association,
    machine::Indication,
    notify::EstablishmentHandlers,
    session::{SessionConfig, DEFAULT_ARTIM_TIMEOUT},
    transport::Transport,
    uid::normalize_uid,
    Error, InvalidAeTitleSnafu, InvalidMaxPduSnafu, MissingAbstractSyntaxSnafu,
    NegotiatedAssociation, NoAcceptedPresentationContextsSnafu, Result,
    TooManyPresentationContextsSnafu,
};
#[cfg(feature = "async")]
use super::nonblocking::AsyncAssociation;
#[cfg(feature = "async")]
use tokio::net::TcpStream as TokioTcpStream;

/// The number of distinct odd presentation context IDs.
const MAX_PRESENTATION_CONTEXTS: usize = 128;

/// A DICOM association builder for a client node.
/// The final outcome is an [`Association`].
///
/// This is the standard way of requesting and establishing
/// an association with another DICOM node,
/// that one usually taking the role of a service class provider (SCP).
///
/// # Example
///
/// ```no_run
/// # use dimse_ul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///    .with_presentation_context("1.2.840.10008.1.1", vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"])
///    .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
///
/// At least one presentation context must be specified,
/// using the method [`with_presentation_context`](Self::with_presentation_context)
/// and supplying both an abstract syntax and list of transfer syntaxes.
///
/// A helper method [`with_abstract_syntax`](Self::with_abstract_syntax) will
/// include by default the transfer syntaxes
/// _Explicit VR Little Endian_ and _Implicit VR Little Endian_
/// in the resulting presentation context.
///
/// ```no_run
/// # use dimse_ul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .username_password("ris", "secret")
///     .establish_with("ARCHIVE@10.0.0.100:104")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Option<Cow<'a, str>>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the list of requested presentation contexts
    presentation_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    /// SCU/SCP role proposals per SOP class
    role_selections: Vec<RoleSelection>,
    user_identity: Option<UserIdentity>,
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    artim_timeout: Duration,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
    handlers: Option<EstablishmentHandlers<NegotiatedAssociation, Indication>>,
}

impl<'a> Default for ClientAssociationOptions<'a> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: None,
            application_context_name: DICOM_APPLICATION_CONTEXT.into(),
            presentation_contexts: Vec::new(),
            role_selections: Vec::new(),
            user_identity: None,
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            read_timeout: None,
            write_timeout: None,
            connection_timeout: None,
            handlers: None,
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    /// Passing an empty string resets the AE title to the default
    /// (or to the one passed via [`establish_with`](Self::establish_with)).
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let cae = called_ae_title.into();
        if cae.is_empty() {
            self.called_ae_title = None;
        } else {
            self.called_ae_title = Some(cae);
        }
        self
    }

    /// Override the application context name.
    pub fn application_context_name<T>(mut self, name: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.application_context_name = name.into();
        self
    }

    /// Include this presentation context
    /// in the list of proposed presentation contexts.
    pub fn with_presentation_context<T>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<T>,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let transfer_syntaxes: Vec<Cow<'a, str>> = transfer_syntax_uids
            .into_iter()
            .map(|t| normalize_uid(t.into()))
            .collect();
        self.presentation_contexts
            .push((normalize_uid(abstract_syntax_uid.into()), transfer_syntaxes));
        self
    }

    /// Helper to add this abstract syntax
    /// with the default transfer syntaxes
    /// to the list of proposed presentation contexts.
    pub fn with_abstract_syntax<T>(self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let default_transfer_syntaxes: Vec<Cow<'a, str>> = vec![
            uids::EXPLICIT_VR_LITTLE_ENDIAN.into(),
            uids::IMPLICIT_VR_LITTLE_ENDIAN.into(),
        ];
        self.with_presentation_context(abstract_syntax_uid.into(), default_transfer_syntaxes)
    }

    /// Propose the roles this node wishes to take for a SOP class.
    ///
    /// Needed, for instance, to act as a storage SCP
    /// on the same association of a C-GET operation.
    pub fn with_role_selection<T>(mut self, sop_class_uid: T, scu_role: bool, scp_role: bool) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.role_selections.push(RoleSelection {
            sop_class_uid: normalize_uid(sop_class_uid.into()).into_owned(),
            scu_role,
            scp_role,
        });
        self
    }

    /// Identify the user with the given identity item.
    pub fn user_identity(mut self, user_identity: UserIdentity) -> Self {
        self.user_identity = Some(user_identity);
        self
    }

    /// Identify the user by username.
    pub fn username<T: AsRef<str>>(self, username: T) -> Self {
        self.user_identity(UserIdentity::new(
            false,
            UserIdentityType::Username,
            username.as_ref().as_bytes().to_vec(),
            Vec::new(),
        ))
    }

    /// Identify the user by username and passcode.
    pub fn username_password<T: AsRef<str>, U: AsRef<str>>(self, username: T, passcode: U) -> Self {
        self.user_identity(UserIdentity::new(
            false,
            UserIdentityType::UsernamePassword,
            username.as_ref().as_bytes().to_vec(),
            passcode.as_ref().as_bytes().to_vec(),
        ))
    }

    /// Identify the user with a Kerberos service ticket.
    pub fn kerberos_service_ticket(self, ticket: impl Into<Vec<u8>>) -> Self {
        self.user_identity(UserIdentity::new(
            true,
            UserIdentityType::KerberosServiceTicket,
            ticket.into(),
            Vec::new(),
        ))
    }

    /// Identify the user with a SAML assertion.
    pub fn saml_assertion(self, assertion: impl Into<Vec<u8>>) -> Self {
        self.user_identity(UserIdentity::new(
            true,
            UserIdentityType::SamlAssertion,
            assertion.into(),
            Vec::new(),
        ))
    }

    /// Identify the user with a JSON web token.
    pub fn jwt<T: AsRef<str>>(self, token: T) -> Self {
        self.user_identity(UserIdentity::new(
            true,
            UserIdentityType::Jwt,
            token.as_ref().as_bytes().to_vec(),
            Vec::new(),
        ))
    }

    /// Override the protocol version field of the request.
    pub fn protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// How long to wait for the peer
    /// while a response is due (the ARTIM timer).
    pub fn artim_timeout(mut self, timeout: Duration) -> Self {
        self.artim_timeout = timeout;
        self
    }

    /// How long to wait for the peer
    /// when receiving on an established association.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// How long to wait for the TCP connection to open.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Register callbacks for the outcome of the establishment.
    /// Exactly one of them is called.
    pub fn on_establishment<F, G>(mut self, on_success: F, on_error: G) -> Self
    where
        F: FnOnce(NegotiatedAssociation) + Send + 'static,
        G: FnOnce(Indication) + Send + 'static,
    {
        self.handlers = Some(EstablishmentHandlers::new(on_success, on_error));
        self
    }

    /// Build the A-ASSOCIATE-RQ PDU described by these options.
    ///
    /// `called_ae_title` is used if no called AE title was set.
    /// Presentation contexts receive the odd IDs 1, 3, 5 and so on.
    pub fn build_request(&self, called_ae_title: Option<&str>) -> Result<AssociationRQ> {
        // fail if no presentation contexts were provided: they represent intent,
        // should not be omitted by the user
        ensure!(
            !self.presentation_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        ensure!(
            self.presentation_contexts.len() <= MAX_PRESENTATION_CONTEXTS,
            TooManyPresentationContextsSnafu {
                count: self.presentation_contexts.len()
            }
        );
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&self.max_pdu_length),
            InvalidMaxPduSnafu {
                max_pdu_length: self.max_pdu_length
            }
        );

        // choose called AE title
        let called_ae_title: &str = match (&self.called_ae_title, called_ae_title) {
            (Some(aec), Some(_)) => {
                warn!(
                    "Option `called_ae_title` overrides the AE title to `{}`",
                    aec
                );
                aec
            }
            (Some(aec), None) => aec,
            (None, Some(aec)) => aec,
            (None, None) => "ANY-SCP",
        };

        let presentation_contexts = self.presentation_contexts.iter().zip((1..=255).step_by(2)).map(
            |((abstract_syntax, transfer_syntaxes), id)| PresentationContextProposed {
                id,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: transfer_syntaxes.iter().map(|uid| uid.to_string()).collect(),
            },
        );

        let mut user_information = UserInformation::from_items(vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ]);
        for role in &self.role_selections {
            user_information.push(UserVariableItem::RoleSelection(role.clone()));
        }
        if let Some(identity) = &self.user_identity {
            user_information.push(UserVariableItem::UserIdentityItem(identity.clone()));
        }

        let mut rq = AssociationRQ::new()
            .with_application_context(self.application_context_name.as_ref())
            .with_presentation_contexts(presentation_contexts)
            .with_user_information(user_information);
        rq.set_protocol_version(self.protocol_version);
        rq.set_calling_ae_title(&self.calling_ae_title)
            .context(InvalidAeTitleSnafu { field: "calling" })?;
        rq.set_called_ae_title(called_ae_title)
            .context(InvalidAeTitleSnafu { field: "called" })?;
        Ok(rq)
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_pdu_length: self.max_pdu_length,
            strict: self.strict,
            artim_timeout: self.artim_timeout,
        }
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    pub fn establish<A: ToSocketAddrs>(self, address: A) -> Result<Association> {
        self.establish_impl(AeAddr::new_socket_addr(address))
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    ///
    /// This method allows you to specify the called AE title
    /// alongside with the socket address.
    /// See [AeAddr](`crate::AeAddr`) for more details.
    /// However, the AE title in this parameter
    /// is overridden by any `called_ae_title` option
    /// previously received.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use dimse_ul::association::client::ClientAssociationOptions;
    /// # fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let association = ClientAssociationOptions::new()
    ///     .with_abstract_syntax("1.2.840.10008.1.1")
    ///     // called AE title in address
    ///     .establish_with("MY-STORAGE@10.0.0.100:104")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn establish_with(self, ae_address: &str) -> Result<Association> {
        match ae_address.parse::<AeAddr<String>>() {
            Ok(ae_address) => self.establish_impl(ae_address),
            Err(_) => self.establish_impl(AeAddr::new_socket_addr(ae_address)),
        }
    }

    fn establish_impl<T>(self, ae_address: AeAddr<T>) -> Result<Association>
    where
        T: ToSocketAddrs,
    {
        let connection_timeout = self.connection_timeout;
        let write_timeout = self.write_timeout;
        let rq = self.build_request(ae_address.ae_title())?;
        self.request_over(rq, || {
            let stream = connect(&ae_address, connection_timeout)?;
            stream.set_write_timeout(write_timeout)?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }

    /// Request a new DICOM association
    /// over a transport opened by the given function.
    pub fn establish_over<T, F>(self, connect: F) -> Result<Association<T>>
    where
        T: Transport,
        F: FnOnce() -> std::io::Result<T>,
    {
        let rq = self.build_request(None)?;
        self.request_over(rq, connect)
    }

    fn request_over<T, F>(self, rq: AssociationRQ, connect: F) -> Result<Association<T>>
    where
        T: Transport,
        F: FnOnce() -> std::io::Result<T>,
    {
        let mut association = Association::new(self.session_config(), self.read_timeout);
        if let Some(handlers) = self.handlers {
            association.set_establishment_handlers(handlers);
        }
        association.request(rq, connect)?;

        if !has_accepted_contexts(association.negotiated()) {
            warn!("No presentation context was accepted, aborting association");
            if let Err(e) = association.abort() {
                debug!("Failed to abort association: {}", e);
            }
            return NoAcceptedPresentationContextsSnafu.fail();
        }
        Ok(association)
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association, asynchronously.
    #[cfg(feature = "async")]
    pub async fn establish_async<A>(self, address: A) -> Result<AsyncAssociation<TokioTcpStream>>
    where
        A: tokio::net::ToSocketAddrs,
    {
        self.establish_impl_async(AeAddr::new_socket_addr(address))
            .await
    }

    /// Initiate the TCP connection to the given address,
    /// which may include the called AE title,
    /// and request a new DICOM association, asynchronously.
    ///
    /// See [`establish_with`](Self::establish_with).
    #[cfg(feature = "async")]
    pub async fn establish_with_async(
        self,
        ae_address: &str,
    ) -> Result<AsyncAssociation<TokioTcpStream>> {
        match ae_address.parse::<AeAddr<String>>() {
            Ok(ae_address) => self.establish_impl_async(ae_address).await,
            Err(_) => {
                self.establish_impl_async(AeAddr::new_socket_addr(ae_address.to_string()))
                    .await
            }
        }
    }

    #[cfg(feature = "async")]
    async fn establish_impl_async<T>(
        self,
        ae_address: AeAddr<T>,
    ) -> Result<AsyncAssociation<TokioTcpStream>>
    where
        T: tokio::net::ToSocketAddrs,
    {
        let rq = self.build_request(ae_address.ae_title())?;
        let connection_timeout = self.connection_timeout;
        let (_, address) = ae_address.into_parts();
        self.request_over_async(rq, async move {
            let stream = match connection_timeout {
                Some(timeout) => tokio::time::timeout(timeout, TokioTcpStream::connect(address))
                    .await
                    .map_err(|_| std::io::Error::from(ErrorKind::TimedOut))??,
                None => TokioTcpStream::connect(address).await?,
            };
            stream.set_nodelay(true)?;
            Ok(stream)
        })
        .await
    }

    /// Request a new DICOM association
    /// over a byte stream opened by the given future.
    #[cfg(feature = "async")]
    pub async fn establish_over_async<S, F>(self, connect: F) -> Result<AsyncAssociation<S>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
        F: std::future::Future<Output = std::io::Result<S>>,
    {
        let rq = self.build_request(None)?;
        self.request_over_async(rq, connect).await
    }

    #[cfg(feature = "async")]
    async fn request_over_async<S, F>(
        self,
        rq: AssociationRQ,
        connect: F,
    ) -> Result<AsyncAssociation<S>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
        F: std::future::Future<Output = std::io::Result<S>>,
    {
        let mut association = AsyncAssociation::new(self.session_config(), self.read_timeout);
        if let Some(handlers) = self.handlers {
            association.set_establishment_handlers(handlers);
        }
        association.request(rq, connect).await?;

        if !has_accepted_contexts(association.negotiated()) {
            warn!("No presentation context was accepted, aborting association");
            if let Err(e) = association.abort().await {
                debug!("Failed to abort association: {}", e);
            }
            return NoAcceptedPresentationContextsSnafu.fail();
        }
        Ok(association)
    }
}

fn has_accepted_contexts(negotiated: Option<&NegotiatedAssociation>) -> bool {
    negotiated.map_or(false, |n| !n.presentation_contexts().is_empty())
}

/// Open a TCP connection to the first reachable address.
fn connect<A: ToSocketAddrs>(address: &A, timeout: Option<Duration>) -> std::io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect(address);
    };
    let mut last_error = None;
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| ErrorKind::AddrNotAvailable.into()))
}
