//! Association acceptor module
//!
//! The module provides the means to accept DICOM associations
//! in which this application entity listens to incoming association requests.
//! See [`ServerAssociationOptions`]
//! for details and examples on how to create an association.
use std::borrow::Cow;
use std::net::TcpStream;
use std::time::Duration;

use dicom_dictionary_std::uids;
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::ensure;
use tracing::{debug, warn};

use crate::pdu::{
    AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason,
    AssociationRJSource, AssociationRQ, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason, UserIdentity, UserInformation, UserVariableItem,
    DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
};
use crate::{DICOM_APPLICATION_CONTEXT, IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

use super::{
    driver::Association,
    session::{SessionConfig, DEFAULT_ARTIM_TIMEOUT},
    transport::Transport,
    uid::{normalize_uid, trim_uid},
    InvalidMaxPduSnafu, MissingAbstractSyntaxSnafu, RejectedSnafu, Result,
};
#[cfg(feature = "async")]
use super::nonblocking::AsyncAssociation;

/// Common interface for application entity access control policies.
///
/// Existing implementations include [`AcceptAny`] and [`AcceptCalledAeTitle`],
/// but users are free to implement their own.
pub trait AccessControl {
    /// Obtain the decision of whether to accept an incoming association request
    /// based on the recorded application entity titles and/or user identity.
    ///
    /// Returns Ok(()) if the requester node should be given clearance.
    /// Otherwise, a concrete association RJ service user reason is given.
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
        user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason>;
}

/// An access control rule that accepts any incoming association request.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptAny;

impl AccessControl for AcceptAny {
    fn check_access(
        &self,
        _this_ae_title: &str,
        _calling_ae_title: &str,
        _called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        Ok(())
    }
}

/// An access control rule that accepts association requests
/// that match the called AE title with the node's AE title.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptCalledAeTitle;

impl AccessControl for AcceptCalledAeTitle {
    fn check_access(
        &self,
        this_ae_title: &str,
        _calling_ae_title: &str,
        called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        if this_ae_title == called_ae_title {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CalledAETitleNotRecognized)
        }
    }
}

/// A DICOM association builder for an acceptor DICOM node,
/// often taking the role of a service class provider (SCP).
///
/// This is the standard way of negotiating and establishing
/// an association with a requesting node.
/// The outcome is an [`Association`].
/// Unlike the [`ClientAssociationOptions`],
/// a value of this type can be reused for multiple connections.
///
/// [`ClientAssociationOptions`]: crate::association::ClientAssociationOptions
///
/// The SCP will by default accept every proposed transfer syntax
/// which the transfer syntax registry can decode,
/// unless one or more transfer syntaxes are explicitly indicated
/// through calls to [`with_transfer_syntax`](Self::with_transfer_syntax).
///
/// Access control logic is also available,
/// enabling application entities to decide on
/// whether to accept or reject the association request
/// based on the _called_ and _calling_ AE titles.
///
/// - By default, the application will accept requests from anyone
///   ([`AcceptAny`])
/// - To only accept requests with a matching _called_ AE title,
///   add a call to [`accept_called_ae_title`](Self::accept_called_ae_title)
///   ([`AcceptCalledAeTitle`]).
/// - Any other policy can be implemented through the [`AccessControl`] trait.
///
/// # Example
///
/// ```no_run
/// # use std::net::TcpListener;
/// # use dimse_ul::association::server::ServerAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let scp_options = ServerAssociationOptions::new()
///    .accept_called_ae_title()
///    .ae_title("STORE-SCP")
///    .with_abstract_syntax("1.2.840.10008.1.1");
///
/// let listener = TcpListener::bind("0.0.0.0:11112")?;
/// for stream in listener.incoming() {
///     let mut association = scp_options.establish(stream?)?;
///     let (pc_id, message) = association.receive_message()?;
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServerAssociationOptions<'a, A = AcceptAny> {
    /// the application entity access control policy
    ae_access_control: A,
    /// the AE title of this DICOM node
    ae_title: Cow<'a, str>,
    /// the expected application context name
    application_context_name: Cow<'a, str>,
    /// the list of accepted abstract syntaxes
    abstract_syntax_uids: Vec<Cow<'a, str>>,
    /// the list of accepted transfer syntaxes
    transfer_syntax_uids: Vec<Cow<'a, str>>,
    /// the maximum PDU length
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// whether to accept unknown abstract syntaxes
    promiscuous: bool,
    artim_timeout: Duration,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Default for ServerAssociationOptions<'_, AcceptAny> {
    fn default() -> Self {
        ServerAssociationOptions {
            ae_access_control: AcceptAny,
            ae_title: "THIS-SCP".into(),
            application_context_name: DICOM_APPLICATION_CONTEXT.into(),
            abstract_syntax_uids: Vec::new(),
            transfer_syntax_uids: Vec::new(),
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            promiscuous: false,
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl ServerAssociationOptions<'_, AcceptAny> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a, A> ServerAssociationOptions<'a, A>
where
    A: AccessControl,
{
    /// Change the access control policy to accept any association
    /// regardless of the specified AE titles.
    ///
    /// This is the default behavior when the options are first created.
    pub fn accept_any(self) -> ServerAssociationOptions<'a, AcceptAny> {
        self.ae_access_control(AcceptAny)
    }

    /// Change the access control policy to accept an association
    /// if the called AE title matches this node's AE title.
    pub fn accept_called_ae_title(self) -> ServerAssociationOptions<'a, AcceptCalledAeTitle> {
        self.ae_access_control(AcceptCalledAeTitle)
    }

    /// Change the access control policy.
    pub fn ae_access_control<P>(self, access_control: P) -> ServerAssociationOptions<'a, P>
    where
        P: AccessControl,
    {
        let ServerAssociationOptions {
            ae_access_control: _,
            ae_title,
            application_context_name,
            abstract_syntax_uids,
            transfer_syntax_uids,
            max_pdu_length,
            strict,
            promiscuous,
            artim_timeout,
            read_timeout,
            write_timeout,
        } = self;

        ServerAssociationOptions {
            ae_access_control: access_control,
            ae_title,
            application_context_name,
            abstract_syntax_uids,
            transfer_syntax_uids,
            max_pdu_length,
            strict,
            promiscuous,
            artim_timeout,
            read_timeout,
            write_timeout,
        }
    }

    /// Define the application entity title referring to this DICOM node.
    ///
    /// The default is `THIS-SCP`.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Override the application context name
    /// expected in association requests.
    pub fn application_context_name<T>(mut self, name: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.application_context_name = name.into();
        self
    }

    /// Include this abstract syntax
    /// in the list of accepted abstract syntaxes.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.abstract_syntax_uids
            .push(normalize_uid(abstract_syntax_uid.into()));
        self
    }

    /// Include this transfer syntax in the list of accepted transfer syntaxes.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.transfer_syntax_uids
            .push(normalize_uid(transfer_syntax_uid.into()));
        self
    }

    /// Override the maximum expected PDU length.
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

    /// Override promiscuous mode:
    /// whether to accept unknown abstract syntaxes.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    /// How long to wait for the association request
    /// and for the peer to close the connection after a rejection.
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

    /// Decide on an association request.
    ///
    /// The request is rejected if the application context is not the expected one
    /// or if the access control policy refuses it.
    /// Otherwise each presentation context is accepted
    /// if its abstract syntax is known (or in promiscuous mode)
    /// and one of its transfer syntaxes is acceptable,
    /// the first such transfer syntax being chosen.
    /// Role selection proposals for accepted abstract syntaxes are granted.
    pub fn negotiate(&self, rq: &AssociationRQ) -> std::result::Result<AssociationAC, AssociationRJ> {
        let application_context = rq.application_context().unwrap_or_default();
        if trim_uid(application_context) != self.application_context_name {
            warn!(
                "Rejecting association: unsupported application context `{}`",
                application_context
            );
            return Err(service_user_rejection(
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
            ));
        }

        let user_identity = rq.user_information().and_then(|info| info.user_identity());
        self.ae_access_control
            .check_access(
                &self.ae_title,
                rq.calling_ae_title(),
                rq.called_ae_title(),
                user_identity,
            )
            .map_err(|reason| {
                warn!(
                    "Rejecting association from `{}`: {:?}",
                    rq.calling_ae_title(),
                    reason
                );
                service_user_rejection(reason)
            })?;

        let results: Vec<PresentationContextResult> = rq
            .presentation_contexts()
            .map(|pc| self.negotiate_presentation_context(pc))
            .collect();

        let mut user_information = UserInformation::from_items(vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ]);
        for role in rq
            .user_information()
            .into_iter()
            .flat_map(|info| info.role_selections())
        {
            let accepted = rq.presentation_contexts().any(|pc| {
                trim_uid(&pc.abstract_syntax) == trim_uid(&role.sop_class_uid)
                    && results
                        .iter()
                        .any(|r| r.id == pc.id && r.is_accepted())
            });
            if accepted {
                user_information.push(UserVariableItem::RoleSelection(role.clone()));
            }
        }

        let mut ac = AssociationAC::new()
            .with_application_context(self.application_context_name.as_ref())
            .with_presentation_contexts(results)
            .with_user_information(user_information);
        ac.set_calling_ae_title(rq.calling_ae_title()).map_err(|_| {
            service_user_rejection(AssociationRJServiceUserReason::CallingAETitleNotRecognized)
        })?;
        ac.set_called_ae_title(rq.called_ae_title()).map_err(|_| {
            service_user_rejection(AssociationRJServiceUserReason::CalledAETitleNotRecognized)
        })?;
        Ok(ac)
    }

    fn negotiate_presentation_context(
        &self,
        pc: &PresentationContextProposed,
    ) -> PresentationContextResult {
        let abstract_syntax = trim_uid(&pc.abstract_syntax);
        if !self.promiscuous && !self.abstract_syntax_uids.iter().any(|a| *a == abstract_syntax) {
            debug!(
                "Presentation context {}: abstract syntax {} not supported",
                pc.id, abstract_syntax
            );
            return PresentationContextResult {
                id: pc.id,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
            };
        }

        match self.choose_ts(&pc.transfer_syntaxes) {
            Some(ts) => PresentationContextResult {
                id: pc.id,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: ts,
            },
            None => {
                debug!(
                    "Presentation context {}: no supported transfer syntax among {:?}",
                    pc.id, pc.transfer_syntaxes
                );
                PresentationContextResult {
                    id: pc.id,
                    reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                    transfer_syntax: uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
                }
            }
        }
    }

    /// choose the first transfer syntax to
    /// - be on the options' list of transfer syntaxes, and
    /// - be supported by the transfer syntax registry.
    ///
    /// If the options' list is empty,
    /// accept the first supported transfer syntax.
    fn choose_ts(&self, proposed: &[String]) -> Option<String> {
        proposed
            .iter()
            .map(|ts| trim_uid(ts))
            .find(|ts| {
                (self.transfer_syntax_uids.is_empty()
                    || self.transfer_syntax_uids.iter().any(|t| t == ts))
                    && is_supported(ts)
            })
            .map(str::to_string)
    }

    fn session_config(&self) -> Result<SessionConfig> {
        ensure!(
            !self.abstract_syntax_uids.is_empty() || self.promiscuous,
            MissingAbstractSyntaxSnafu
        );
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&self.max_pdu_length),
            InvalidMaxPduSnafu {
                max_pdu_length: self.max_pdu_length
            }
        );
        Ok(SessionConfig {
            max_pdu_length: self.max_pdu_length,
            strict: self.strict,
            artim_timeout: self.artim_timeout,
        })
    }

    /// Negotiate an association with the given TCP stream.
    pub fn establish(&self, socket: TcpStream) -> Result<Association> {
        if let Err(e) = socket
            .set_write_timeout(self.write_timeout)
            .and_then(|_| socket.set_nodelay(true))
        {
            debug!("Could not configure socket: {}", e);
        }
        self.establish_over(socket)
    }

    /// Negotiate an association over the given transport,
    /// already connected to the requestor.
    ///
    /// A rejected request is reported as
    /// [`Error::Rejected`](super::Error::Rejected)
    /// once the requestor closed the connection.
    pub fn establish_over<T: Transport>(&self, transport: T) -> Result<Association<T>> {
        let mut association = Association::new(self.session_config()?, self.read_timeout);
        let rq = association.listen(transport)?;
        match self.negotiate(&rq) {
            Ok(ac) => {
                association.accept(ac)?;
                Ok(association)
            }
            Err(association_rj) => {
                association.reject(association_rj)?;
                RejectedSnafu { association_rj }.fail()
            }
        }
    }

    /// Negotiate an association with the given TCP stream, asynchronously.
    #[cfg(feature = "async")]
    pub async fn establish_async(
        &self,
        socket: tokio::net::TcpStream,
    ) -> Result<AsyncAssociation<tokio::net::TcpStream>> {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("Could not configure socket: {}", e);
        }
        self.establish_over_async(socket).await
    }

    /// Negotiate an association over the given byte stream, asynchronously.
    #[cfg(feature = "async")]
    pub async fn establish_over_async<S>(&self, stream: S) -> Result<AsyncAssociation<S>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let mut association = AsyncAssociation::new(self.session_config()?, self.read_timeout);
        let rq = association.listen(stream).await?;
        match self.negotiate(&rq) {
            Ok(ac) => {
                association.accept(ac).await?;
                Ok(association)
            }
            Err(association_rj) => {
                association.reject(association_rj).await?;
                RejectedSnafu { association_rj }.fail()
            }
        }
    }
}

fn service_user_rejection(reason: AssociationRJServiceUserReason) -> AssociationRJ {
    AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(reason),
    }
}

/// Check that a transfer syntax repository
/// supports the given transfer syntax,
/// meaning that it can parse and decode DICOM data sets.
///
/// ```
/// # use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
/// # use dimse_ul::association::server::is_supported_with_repo;
/// // Implicit VR Little Endian is guaranteed to be supported
/// assert!(is_supported_with_repo(TransferSyntaxRegistry, "1.2.840.10008.1.2"));
/// ```
pub fn is_supported_with_repo<R>(ts_repo: R, ts_uid: &str) -> bool
where
    R: TransferSyntaxIndex,
{
    ts_repo
        .get(ts_uid)
        .filter(|ts| !ts.is_unsupported())
        .is_some()
}

/// Check that the main transfer syntax registry
/// supports the given transfer syntax.
///
/// ```
/// # use dimse_ul::association::server::is_supported;
/// assert!(is_supported("1.2.840.10008.1.2.1"));
/// assert!(!is_supported("1.2.3.4"));
/// ```
pub fn is_supported(ts_uid: &str) -> bool {
    is_supported_with_repo(TransferSyntaxRegistry, ts_uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{Error, State};
    use crate::pdu::{
        read_pdu, write_pdu, AbortRQSource, Pdu, RoleSelection, UserIdentityType,
    };
    use matches::assert_matches;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn request(called: &str, contexts: Vec<(u8, &str, Vec<&str>)>) -> AssociationRQ {
        let mut rq = AssociationRQ::new()
            .with_application_context(DICOM_APPLICATION_CONTEXT)
            .with_presentation_contexts(contexts.into_iter().map(|(id, abs, ts)| {
                PresentationContextProposed {
                    id,
                    abstract_syntax: abs.to_string(),
                    transfer_syntaxes: ts.into_iter().map(String::from).collect(),
                }
            }))
            .with_user_information(UserInformation::from_items(vec![
                UserVariableItem::MaxLength(32768),
                UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid: uids::CT_IMAGE_STORAGE.to_string(),
                    scu_role: false,
                    scp_role: true,
                }),
                UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid: uids::MR_IMAGE_STORAGE.to_string(),
                    scu_role: false,
                    scp_role: true,
                }),
            ]));
        rq.set_calling_ae_title("STORE-SCU").unwrap();
        rq.set_called_ae_title(called).unwrap();
        rq
    }

    fn reason_of(ac: &AssociationAC, id: u8) -> PresentationContextResultReason {
        ac.presentation_contexts()
            .find(|pc| pc.id == id)
            .map(|pc| pc.reason)
            .unwrap()
    }

    #[test]
    fn presentation_context_negotiation() {
        let options = ServerAssociationOptions::new()
            .with_abstract_syntax(uids::VERIFICATION)
            .with_abstract_syntax(uids::CT_IMAGE_STORAGE);
        let rq = request(
            "ANY-SCP",
            vec![
                (1, uids::VERIFICATION, vec!["1.2.3.999", uids::IMPLICIT_VR_LITTLE_ENDIAN]),
                (3, uids::CT_IMAGE_STORAGE, vec!["1.2.3.999"]),
                (5, uids::MR_IMAGE_STORAGE, vec![uids::EXPLICIT_VR_LITTLE_ENDIAN]),
            ],
        );
        let ac = options.negotiate(&rq).unwrap();

        assert_eq!(reason_of(&ac, 1), PresentationContextResultReason::Acceptance);
        let echo = ac.presentation_contexts().next().unwrap();
        assert_eq!(echo.transfer_syntax, uids::IMPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(
            reason_of(&ac, 3),
            PresentationContextResultReason::TransferSyntaxesNotSupported
        );
        assert_eq!(
            reason_of(&ac, 5),
            PresentationContextResultReason::AbstractSyntaxNotSupported
        );
        assert_eq!(ac.calling_ae_title(), "STORE-SCU");
        assert_eq!(ac.called_ae_title(), "ANY-SCP");

        let info = ac.user_information().unwrap();
        assert_eq!(info.max_length(), Some(DEFAULT_MAX_PDU));
        // only abstract syntaxes with an accepted context get their roles
        assert_eq!(info.role_selections().count(), 0);
    }

    #[test]
    fn transfer_syntaxes_follow_the_registry() {
        assert!(is_supported(uids::IMPLICIT_VR_LITTLE_ENDIAN));
        assert!(is_supported(uids::EXPLICIT_VR_LITTLE_ENDIAN));
        // encapsulated pixel data does not prevent reading the data set
        assert!(is_supported(uids::JPEG_BASELINE8_BIT));
        assert!(!is_supported("1.2.3.999"));

        let rq = request(
            "ANY-SCP",
            vec![(
                1,
                uids::CT_IMAGE_STORAGE,
                vec!["1.2.3.999", uids::JPEG_BASELINE8_BIT],
            )],
        );
        let ac = ServerAssociationOptions::new()
            .with_abstract_syntax(uids::CT_IMAGE_STORAGE)
            .negotiate(&rq)
            .unwrap();
        let pc = ac.presentation_contexts().next().unwrap();
        assert!(pc.is_accepted());
        assert_eq!(pc.transfer_syntax, uids::JPEG_BASELINE8_BIT);
    }

    #[test]
    fn promiscuous_and_restricted_transfer_syntaxes() {
        let rq = request(
            "ANY-SCP",
            vec![(
                1,
                uids::CT_IMAGE_STORAGE,
                vec![uids::IMPLICIT_VR_LITTLE_ENDIAN, uids::EXPLICIT_VR_LITTLE_ENDIAN],
            )],
        );
        let ac = ServerAssociationOptions::new()
            .promiscuous(true)
            .with_transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .negotiate(&rq)
            .unwrap();
        let pc = ac.presentation_contexts().next().unwrap();
        assert!(pc.is_accepted());
        assert_eq!(pc.transfer_syntax, uids::EXPLICIT_VR_LITTLE_ENDIAN);

        let roles: Vec<_> = ac.user_information().unwrap().role_selections().collect();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].sop_class_uid, uids::CT_IMAGE_STORAGE);
        assert!(roles[0].scp_role);
    }

    #[test]
    fn access_control_rejections() {
        let rq = request("OTHER-SCP", vec![(1, uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])]);
        let options = ServerAssociationOptions::new()
            .accept_called_ae_title()
            .ae_title("STORE-SCP")
            .with_abstract_syntax(uids::VERIFICATION);
        let rj = options.negotiate(&rq).unwrap_err();
        assert_eq!(rj.result, AssociationRJResult::Permanent);
        assert_eq!(
            rj.source,
            AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized
            )
        );

        let rq = request("STORE-SCP", vec![(1, uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])]);
        assert!(options.negotiate(&rq).is_ok());

        let mut rq = rq;
        rq.set_application_context("1.2.3.4");
        assert_eq!(
            options.negotiate(&rq).unwrap_err().source,
            AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported
            )
        );
    }

    struct RequireUser;

    impl AccessControl for RequireUser {
        fn check_access(
            &self,
            _this_ae_title: &str,
            _calling_ae_title: &str,
            _called_ae_title: &str,
            user_identity: Option<&UserIdentity>,
        ) -> Result<(), AssociationRJServiceUserReason> {
            match user_identity {
                Some(identity) if identity.identity_type() == UserIdentityType::Username => Ok(()),
                _ => Err(AssociationRJServiceUserReason::NoReasonGiven),
            }
        }
    }

    #[test]
    fn custom_access_control_sees_user_identity() {
        let options = ServerAssociationOptions::new()
            .ae_access_control(RequireUser)
            .with_abstract_syntax(uids::VERIFICATION);
        let rq = request("ANY-SCP", vec![(1, uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])]);
        assert!(options.negotiate(&rq).is_err());

        let mut info = rq.user_information().cloned().unwrap_or_default();
        info.push(UserVariableItem::UserIdentityItem(UserIdentity::new(
            false,
            UserIdentityType::Username,
            b"ris".to_vec(),
            Vec::new(),
        )));
        let mut rq = rq;
        rq.set_user_information(info);
        assert!(options.negotiate(&rq).is_ok());
    }

    /// A requestor replaying a fixed sequence of PDUs.
    #[derive(Debug, Clone, Default)]
    struct Replay {
        incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Replay {
        fn new(pdus: &[Pdu]) -> Self {
            let replay = Replay::default();
            for pdu in pdus {
                let mut bytes = Vec::new();
                write_pdu(&mut bytes, pdu).unwrap();
                replay.incoming.lock().unwrap().push_back(bytes);
            }
            replay
        }

        fn first_sent(&self) -> Pdu {
            let sent = self.sent.lock().unwrap();
            read_pdu(&mut &sent[..], DEFAULT_MAX_PDU, true).unwrap()
        }
    }

    impl Transport for Replay {
        fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
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
            Ok(())
        }
    }

    #[test]
    fn establish_over_transport() {
        let rq = request("ANY-SCP", vec![(1, uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])]);
        let peer = Replay::new(&[
            Pdu::AssociationRQ(rq),
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceUser,
            },
        ]);
        let mut association = ServerAssociationOptions::new()
            .with_abstract_syntax(uids::VERIFICATION)
            .establish_over(peer.clone())
            .unwrap();
        assert_eq!(association.state(), State::DataTransfer);
        let negotiated = association.negotiated().unwrap();
        assert_eq!(negotiated.peer_ae_title(), "STORE-SCU");
        assert_eq!(negotiated.peer_max_pdu_length(), 32768);
        assert_matches!(peer.first_sent(), Pdu::AssociationAC(_));

        assert_matches!(association.receive_pdata(), Err(Error::Aborted { .. }));
    }

    #[test]
    fn rejection_over_transport() {
        let rq = request("OTHER-SCP", vec![(1, uids::VERIFICATION, vec![uids::IMPLICIT_VR_LITTLE_ENDIAN])]);
        let peer = Replay::new(&[Pdu::AssociationRQ(rq)]);
        let result = ServerAssociationOptions::new()
            .accept_called_ae_title()
            .with_abstract_syntax(uids::VERIFICATION)
            .establish_over(peer.clone());
        assert_matches!(result, Err(Error::Rejected { .. }));
        assert_matches!(peer.first_sent(), Pdu::AssociationRJ(_));
    }

    #[test]
    fn options_need_abstract_syntaxes() {
        let result = ServerAssociationOptions::new().establish_over(Replay::default());
        assert_matches!(result, Err(Error::MissingAbstractSyntax { .. }));
    }
}
