//! Protocol Data Unit module
//!
//! This module comprises the data structures representing
//! the protocol data units (PDUs) of the upper layer protocol
//! and their variable items,
//! as well as readers and writers of PDUs from arbitrary data sources.
//!
//! - [`item`] encodes and decodes the variable items and sub-items
//!   which make up association PDUs.
//! - [`reader`] decodes whole PDUs from a byte stream or buffer.
//! - [`writer`] encodes whole PDUs.
//!
//! All multi-byte integers on the wire are big endian.
//! Length fields are never stored:
//! they are computed from the content whenever a PDU is encoded
//! or its [`length`](Pdu::length) is requested.
pub mod item;
pub mod reader;
pub mod writer;

use snafu::Snafu;
use std::fmt::{self, Display};

pub use item::Item;
pub use reader::{decode_pdu, read_pdu, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE, PDU_HEADER_SIZE};
pub use writer::{encode_pdu, write_pdu};

/// The number of bytes of an AE title field.
pub const AE_TITLE_LENGTH: usize = 16;

/// An error validating an application entity title.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum AeTitleError {
    /// AE titles must have at least one character.
    #[snafu(display("AE title is empty"))]
    Empty,
    /// AE titles are at most 16 bytes long.
    #[snafu(display("AE title is {} bytes long, maximum is 16", length))]
    TooLong { length: usize },
}

/// Check whether the given string fits in an AE title field.
///
/// Padding is applied on encoding and trimmed on decoding,
/// so the title itself is not checked any further.
pub fn validate_ae_title(title: &str) -> Result<(), AeTitleError> {
    if title.is_empty() {
        return EmptySnafu.fail();
    }
    if title.len() > AE_TITLE_LENGTH {
        return TooLongSnafu {
            length: title.len(),
        }
        .fail();
    }
    Ok(())
}

/// Encode an AE title into its fixed-size field,
/// padded with trailing spaces.
pub fn encode_ae_title(title: &str) -> Result<[u8; AE_TITLE_LENGTH], AeTitleError> {
    validate_ae_title(title)?;
    let mut field = [b' '; AE_TITLE_LENGTH];
    field[..title.len()].copy_from_slice(title.as_bytes());
    Ok(field)
}

/// Decode an AE title field,
/// discarding leading and trailing spaces (and stray null bytes).
pub fn decode_ae_title(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

/// Message component for a proposed presentation context.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextProposed {
    /// the presentation context identifier
    pub id: u8,
    /// the expected abstract syntax UID
    /// (commonly referrering to the expected SOP class)
    pub abstract_syntax: String,
    /// a list of transfer syntax UIDs to support in this interaction
    pub transfer_syntaxes: Vec<String>,
}

/// Message component for the outcome of a proposed presentation context.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextResult {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    /// The accepted transfer syntax.
    /// Not significant unless the context was accepted.
    pub transfer_syntax: String,
}

impl PresentationContextResult {
    pub fn is_accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }
}

/// Presentation context items, proposed or resulting,
/// as they appear in association request and acknowledgement PDUs.
pub trait PresentationContextItem: Item + Clone + PartialEq + fmt::Debug {
    /// The item type code.
    const ITEM_TYPE: u8;

    /// The presentation context identifier.
    fn id(&self) -> u8;
}

impl PresentationContextItem for PresentationContextProposed {
    const ITEM_TYPE: u8 = item::PRESENTATION_CONTEXT_RQ_ITEM;

    fn id(&self) -> u8 {
        self.id
    }
}

impl PresentationContextItem for PresentationContextResult {
    const ITEM_TYPE: u8 = item::PRESENTATION_CONTEXT_AC_ITEM;

    fn id(&self) -> u8 {
        self.id
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub(crate) fn from(reason: u8) -> Option<PresentationContextResultReason> {
        let result = match reason {
            0 => PresentationContextResultReason::Acceptance,
            1 => PresentationContextResultReason::UserRejection,
            2 => PresentationContextResultReason::NoReason,
            3 => PresentationContextResultReason::AbstractSyntaxNotSupported,
            4 => PresentationContextResultReason::TransferSyntaxesNotSupported,
            _ => {
                return None;
            }
        };

        Some(result)
    }
}

impl Display for PresentationContextResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PresentationContextResultReason::Acceptance => "acceptance",
            PresentationContextResultReason::UserRejection => "user rejection",
            PresentationContextResultReason::NoReason => "no reason",
            PresentationContextResultReason::AbstractSyntaxNotSupported => {
                "abstract syntax not supported"
            }
            PresentationContextResultReason::TransferSyntaxesNotSupported => {
                "transfer syntaxes not supported"
            }
        };
        f.write_str(msg)
    }
}

/// SCP/SCU role selection for one SOP class (item type 54H).
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct RoleSelection {
    pub sop_class_uid: String,
    pub scu_role: bool,
    pub scp_role: bool,
}

#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct UserIdentity {
    positive_response_requested: bool,
    identity_type: UserIdentityType,
    primary_field: Vec<u8>,
    secondary_field: Vec<u8>,
}

impl UserIdentity {
    pub fn new(
        positive_response_requested: bool,
        identity_type: UserIdentityType,
        primary_field: Vec<u8>,
        secondary_field: Vec<u8>,
    ) -> Self {
        UserIdentity {
            positive_response_requested,
            identity_type,
            primary_field,
            secondary_field,
        }
    }

    pub fn positive_response_requested(&self) -> bool {
        self.positive_response_requested
    }

    pub fn identity_type(&self) -> UserIdentityType {
        self.identity_type
    }

    pub fn primary_field(&self) -> &[u8] {
        &self.primary_field
    }

    /// The secondary field, only significant for
    /// [`UsernamePassword`](UserIdentityType::UsernamePassword).
    pub fn secondary_field(&self) -> &[u8] {
        &self.secondary_field
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
#[non_exhaustive]
pub enum UserIdentityType {
    Username,
    UsernamePassword,
    KerberosServiceTicket,
    SamlAssertion,
    Jwt,
}

impl UserIdentityType {
    pub(crate) fn from(user_identity_type: u8) -> Option<Self> {
        match user_identity_type {
            1 => Some(Self::Username),
            2 => Some(Self::UsernamePassword),
            3 => Some(Self::KerberosServiceTicket),
            4 => Some(Self::SamlAssertion),
            5 => Some(Self::Jwt),
            _ => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Username => 1,
            Self::UsernamePassword => 2,
            Self::KerberosServiceTicket => 3,
            Self::SamlAssertion => 4,
            Self::Jwt => 5,
        }
    }
}

/// A sub-item of the user information item.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum UserVariableItem {
    /// Maximum length of the P-DATA-TF PDUs the sender can receive
    /// (0 means unlimited)
    MaxLength(u32),
    ImplementationClassUID(String),
    AsynchronousOperationsWindow {
        max_operations_invoked: u16,
        max_operations_performed: u16,
    },
    RoleSelection(RoleSelection),
    ImplementationVersionName(String),
    /// SOP class UID and service-class-application-information
    SopClassExtendedNegotiationSubItem(String, Vec<u8>),
    SopClassCommonExtendedNegotiation {
        sop_class_uid: String,
        service_class_uid: String,
        related_general_sop_class_uids: Vec<String>,
    },
    UserIdentityItem(UserIdentity),
    /// Server response to a user identity negotiation request
    UserIdentityResponse(Vec<u8>),
}

/// The user information item (item type 50H),
/// an ordered list of sub-items.
#[derive(Clone, Eq, Debug, Default)]
pub struct UserInformation {
    items: Vec<UserVariableItem>,
}

/// Multiset comparison, ignoring order.
fn same_items<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len()
        && a.iter().all(|x| {
            a.iter().filter(|y| *y == x).count() == b.iter().filter(|y| *y == x).count()
        })
}

impl PartialEq for UserInformation {
    fn eq(&self, other: &Self) -> bool {
        same_items(&self.items, &other.items)
    }
}

macro_rules! user_item_accessor {
    ($getter: ident, $variant: ident, $t: ty) => {
        pub fn $getter(&self) -> Option<&$t> {
            self.items.iter().find_map(|item| match item {
                UserVariableItem::$variant(v) => Some(v),
                _ => None,
            })
        }
    };
}

impl UserInformation {
    pub fn new() -> Self {
        UserInformation::default()
    }

    pub fn from_items(items: Vec<UserVariableItem>) -> Self {
        UserInformation { items }
    }

    pub fn items(&self) -> &[UserVariableItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<UserVariableItem> {
        self.items
    }

    pub fn push(&mut self, item: UserVariableItem) {
        self.items.push(item);
    }

    /// Replace the first sub-item of the same kind, in place,
    /// or append it if there is none.
    pub fn set(&mut self, item: UserVariableItem) {
        let kind = std::mem::discriminant(&item);
        match self
            .items
            .iter_mut()
            .find(|i| std::mem::discriminant(&**i) == kind)
        {
            Some(slot) => *slot = item,
            None => self.items.push(item),
        }
    }

    /// The maximum length of P-DATA-TF PDUs the sender can receive.
    pub fn max_length(&self) -> Option<u32> {
        self.items.iter().find_map(|item| match item {
            UserVariableItem::MaxLength(len) => Some(*len),
            _ => None,
        })
    }

    user_item_accessor!(implementation_class_uid, ImplementationClassUID, String);
    user_item_accessor!(implementation_version_name, ImplementationVersionName, String);
    user_item_accessor!(user_identity, UserIdentityItem, UserIdentity);
    user_item_accessor!(user_identity_response, UserIdentityResponse, Vec<u8>);

    pub fn asynchronous_operations_window(&self) -> Option<(u16, u16)> {
        self.items.iter().find_map(|item| match item {
            UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked,
                max_operations_performed,
            } => Some((*max_operations_invoked, *max_operations_performed)),
            _ => None,
        })
    }

    pub fn role_selections(&self) -> impl Iterator<Item = &RoleSelection> {
        self.items.iter().filter_map(|item| match item {
            UserVariableItem::RoleSelection(r) => Some(r),
            _ => None,
        })
    }
}

/// A variable item of an A-ASSOCIATE-RQ or A-ASSOCIATE-AC PDU.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum VariableItem<C> {
    ApplicationContext(String),
    PresentationContext(C),
    UserInformation(UserInformation),
}

/// The content shared by A-ASSOCIATE-RQ and A-ASSOCIATE-AC PDUs.
///
/// Variable items are kept in order.
/// The setters keep them in the canonical order:
/// application context, then presentation contexts, then user information.
/// Order is not significant for equality.
#[derive(Clone, Debug)]
pub struct AAssociate<C> {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
    variable_items: Vec<VariableItem<C>>,
}

/// An in-memory representation of an association request
pub type AssociationRQ = AAssociate<PresentationContextProposed>;

/// An in-memory representation of an association acknowledgement
pub type AssociationAC = AAssociate<PresentationContextResult>;

impl<C> Default for AAssociate<C> {
    fn default() -> Self {
        AAssociate {
            protocol_version: 1,
            called_ae_title: String::new(),
            calling_ae_title: String::new(),
            variable_items: Vec::new(),
        }
    }
}

impl<C: PartialEq> PartialEq for AAssociate<C> {
    fn eq(&self, other: &Self) -> bool {
        self.protocol_version == other.protocol_version
            && self.called_ae_title == other.called_ae_title
            && self.calling_ae_title == other.calling_ae_title
            && same_items(&self.variable_items, &other.variable_items)
    }
}

impl<C: Eq> Eq for AAssociate<C> {}

impl<C: PresentationContextItem> AAssociate<C> {
    /// Create an empty PDU with protocol version 1.
    /// The AE titles must be set before encoding.
    pub fn new() -> Self {
        AAssociate::default()
    }

    /// Assemble the PDU from decoded fields, without validation.
    pub(crate) fn from_parts(
        protocol_version: u16,
        called_ae_title: String,
        calling_ae_title: String,
        variable_items: Vec<VariableItem<C>>,
    ) -> Self {
        AAssociate {
            protocol_version,
            called_ae_title,
            calling_ae_title,
            variable_items,
        }
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: u16) {
        self.protocol_version = version;
    }

    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    pub fn set_called_ae_title(&mut self, title: &str) -> Result<(), AeTitleError> {
        validate_ae_title(title)?;
        self.called_ae_title = title.to_string();
        Ok(())
    }

    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    pub fn set_calling_ae_title(&mut self, title: &str) -> Result<(), AeTitleError> {
        validate_ae_title(title)?;
        self.calling_ae_title = title.to_string();
        Ok(())
    }

    pub fn variable_items(&self) -> &[VariableItem<C>] {
        &self.variable_items
    }

    pub fn application_context(&self) -> Option<&str> {
        self.variable_items.iter().find_map(|item| match item {
            VariableItem::ApplicationContext(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn presentation_contexts(&self) -> impl Iterator<Item = &C> {
        self.variable_items.iter().filter_map(|item| match item {
            VariableItem::PresentationContext(pc) => Some(pc),
            _ => None,
        })
    }

    pub fn user_information(&self) -> Option<&UserInformation> {
        self.variable_items.iter().find_map(|item| match item {
            VariableItem::UserInformation(ui) => Some(ui),
            _ => None,
        })
    }

    /// Rebuild the item list in canonical order,
    /// substituting the parts given.
    fn rebuild(
        &mut self,
        application_context: Option<VariableItem<C>>,
        presentation_contexts: Option<Vec<VariableItem<C>>>,
        user_information: Option<VariableItem<C>>,
    ) {
        let mut old_ac = None;
        let mut old_pcs = Vec::new();
        let mut old_ui = None;
        for item in self.variable_items.drain(..) {
            match item {
                VariableItem::ApplicationContext(_) => {
                    old_ac.get_or_insert(item);
                }
                VariableItem::PresentationContext(_) => old_pcs.push(item),
                VariableItem::UserInformation(_) => {
                    old_ui.get_or_insert(item);
                }
            }
        }
        self.variable_items.extend(application_context.or(old_ac));
        self.variable_items
            .extend(presentation_contexts.unwrap_or(old_pcs));
        self.variable_items.extend(user_information.or(old_ui));
    }

    pub fn set_application_context(&mut self, name: impl Into<String>) {
        self.rebuild(
            Some(VariableItem::ApplicationContext(name.into())),
            None,
            None,
        );
    }

    pub fn set_presentation_contexts(&mut self, contexts: impl IntoIterator<Item = C>) {
        let contexts = contexts
            .into_iter()
            .map(VariableItem::PresentationContext)
            .collect();
        self.rebuild(None, Some(contexts), None);
    }

    pub fn set_user_information(&mut self, user_information: UserInformation) {
        self.rebuild(
            None,
            None,
            Some(VariableItem::UserInformation(user_information)),
        );
    }

    /// The value of the PDU length field for the current content.
    pub fn length(&self) -> u32 {
        // protocol version, reserved, two AE titles, 32 reserved bytes
        let fixed = 2 + 2 + 2 * AE_TITLE_LENGTH + 32;
        let items: usize = self
            .variable_items
            .iter()
            .map(|item| item.encoded_len())
            .sum();
        (fixed + items) as u32
    }
}

/// Builder-style construction, for tests and configuration code.
impl<C: PresentationContextItem> AAssociate<C> {
    pub fn with_application_context(mut self, name: impl Into<String>) -> Self {
        self.set_application_context(name);
        self
    }

    pub fn with_presentation_contexts(mut self, contexts: impl IntoIterator<Item = C>) -> Self {
        self.set_presentation_contexts(contexts);
        self
    }

    pub fn with_user_information(mut self, user_information: UserInformation) -> Self {
        self.set_user_information(user_information);
        self
    }
}

impl From<AssociationRQ> for Pdu {
    fn from(value: AssociationRQ) -> Self {
        Pdu::AssociationRQ(value)
    }
}

impl From<AssociationAC> for Pdu {
    fn from(value: AssociationAC) -> Self {
        Pdu::AssociationAC(value)
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJResult {
    Permanent = 1,
    Transient = 2,
}

impl AssociationRJResult {
    pub(crate) fn from(value: u8) -> Option<AssociationRJResult> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }
}

/// An in-memory representation of an association rejection.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderASCE(AssociationRJServiceProviderASCEReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    pub(crate) fn from(source: u8, reason: u8) -> Option<AssociationRJSource> {
        let result = match (source, reason) {
            (1, 1) => {
                AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::NoReasonGiven)
            }
            (1, 2) => AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
            ),
            (1, 3) => AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAETitleNotRecognized,
            ),
            (1, 7) => AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized,
            ),
            (1, x @ (4..=6 | 8..=10)) => {
                AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::Reserved(x))
            }
            (2, 1) => AssociationRJSource::ServiceProviderASCE(
                AssociationRJServiceProviderASCEReason::NoReasonGiven,
            ),
            (2, 2) => AssociationRJSource::ServiceProviderASCE(
                AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
            ),
            (3, 1) => AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::TemporaryCongestion,
            ),
            (3, 2) => AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
            ),
            (3, x @ (0 | 3..=7)) => AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::Reserved(x),
            ),
            _ => {
                return None;
            }
        };
        Some(result)
    }

    /// The source and reason codes, in this order.
    pub(crate) fn to_codes(self) -> (u8, u8) {
        match self {
            AssociationRJSource::ServiceUser(reason) => (
                1,
                match reason {
                    AssociationRJServiceUserReason::NoReasonGiven => 1,
                    AssociationRJServiceUserReason::ApplicationContextNameNotSupported => 2,
                    AssociationRJServiceUserReason::CallingAETitleNotRecognized => 3,
                    AssociationRJServiceUserReason::CalledAETitleNotRecognized => 7,
                    AssociationRJServiceUserReason::Reserved(code) => code,
                },
            ),
            AssociationRJSource::ServiceProviderASCE(reason) => (
                2,
                match reason {
                    AssociationRJServiceProviderASCEReason::NoReasonGiven => 1,
                    AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => 2,
                },
            ),
            AssociationRJSource::ServiceProviderPresentation(reason) => (
                3,
                match reason {
                    AssociationRJServiceProviderPresentationReason::TemporaryCongestion => 1,
                    AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => 2,
                    AssociationRJServiceProviderPresentationReason::Reserved(code) => code,
                },
            ),
        }
    }
}

impl Display for AssociationRJSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationRJSource::ServiceUser(r) => Display::fmt(r, f),
            AssociationRJSource::ServiceProviderASCE(r) => Display::fmt(r, f),
            AssociationRJSource::ServiceProviderPresentation(r) => Display::fmt(r, f),
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

impl Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => {
                f.write_str("application context name not supported")
            }
            AssociationRJServiceUserReason::CallingAETitleNotRecognized => {
                f.write_str("calling AE title not recognized")
            }
            AssociationRJServiceUserReason::CalledAETitleNotRecognized => {
                f.write_str("called AE title not recognized")
            }
            AssociationRJServiceUserReason::Reserved(code) => write!(f, "reserved code {}", code),
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderASCEReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl Display for AssociationRJServiceProviderASCEReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationRJServiceProviderASCEReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => {
                f.write_str("protocol version not supported")
            }
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => {
                f.write_str("temporary congestion")
            }
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => {
                f.write_str("local limit exceeded")
            }
            AssociationRJServiceProviderPresentationReason::Reserved(code) => {
                write!(f, "reserved code {}", code)
            }
        }
    }
}

/// A presentation data value item of a P-DATA-TF PDU.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

impl PDataValue {
    /// The message control header byte.
    pub fn control_header(&self) -> u8 {
        let command = u8::from(self.value_type == PDataValueType::Command);
        let last = u8::from(self.is_last) << 1;
        command | last
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQSource {
    ServiceUser,
    ServiceProvider(AbortRQServiceProviderReason),
    Reserved,
}

impl AbortRQSource {
    pub(crate) fn from(source: u8, reason: u8) -> Option<AbortRQSource> {
        let result = match (source, reason) {
            (0, _) => AbortRQSource::ServiceUser,
            (1, _) => AbortRQSource::Reserved,
            (2, 0) => {
                AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::ReasonNotSpecified)
            }
            (2, 1) => AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnrecognizedPdu),
            (2, 2) => AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
            (2, 3) => AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::Reserved),
            (2, 4) => AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::UnrecognizedPduParameter,
            ),
            (2, 5) => {
                AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPduParameter)
            }
            (2, 6) => {
                AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::InvalidPduParameter)
            }
            (_, _) => {
                return None;
            }
        };

        Some(result)
    }

    /// The source and reason codes, in this order.
    pub(crate) fn to_codes(self) -> (u8, u8) {
        match self {
            AbortRQSource::ServiceUser => (0, 0),
            AbortRQSource::Reserved => (1, 0),
            AbortRQSource::ServiceProvider(reason) => (2, reason as u8),
        }
    }
}

/// An enumeration of supported A-ABORT PDU provider reasons.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQServiceProviderReason {
    /// Reason Not Specified
    ReasonNotSpecified = 0,
    /// Unrecognized PDU
    UnrecognizedPdu = 1,
    /// Unexpected PDU
    UnexpectedPdu = 2,
    /// Reserved
    Reserved = 3,
    /// Unrecognized PDU parameter
    UnrecognizedPduParameter = 4,
    /// Unexpected PDU parameter
    UnexpectedPduParameter = 5,
    /// Invalid PDU parameter
    InvalidPduParameter = 6,
}

impl Display for AbortRQServiceProviderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AbortRQServiceProviderReason::ReasonNotSpecified => "reason not specified",
            AbortRQServiceProviderReason::UnrecognizedPdu => "unrecognized PDU",
            AbortRQServiceProviderReason::UnexpectedPdu => "unexpected PDU",
            AbortRQServiceProviderReason::Reserved => "reserved code",
            AbortRQServiceProviderReason::UnrecognizedPduParameter => "unrecognized PDU parameter",
            AbortRQServiceProviderReason::UnexpectedPduParameter => "unexpected PDU parameter",
            AbortRQServiceProviderReason::InvalidPduParameter => "invalid PDU parameter",
        };
        f.write_str(msg)
    }
}

/// An in-memory representation of a full Protocol Data Unit (PDU).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Pdu {
    /// Association request (A-ASSOCIATE-RQ)
    AssociationRQ(AssociationRQ),
    /// Association acknowledgement (A-ASSOCIATE-AC)
    AssociationAC(AssociationAC),
    /// Association rejection (A-ASSOCIATE-RJ)
    AssociationRJ(AssociationRJ),
    /// P-Data
    PData { data: Vec<PDataValue> },
    /// Association release request (A-RELEASE-RQ)
    ReleaseRQ,
    /// Association release reply (A-RELEASE-RP)
    ReleaseRP,
    /// Association abort request (A-ABORT-RQ)
    AbortRQ { source: AbortRQSource },
}

pub const ASSOCIATE_RQ_PDU: u8 = 0x01;
pub const ASSOCIATE_AC_PDU: u8 = 0x02;
pub const ASSOCIATE_RJ_PDU: u8 = 0x03;
pub const P_DATA_TF_PDU: u8 = 0x04;
pub const RELEASE_RQ_PDU: u8 = 0x05;
pub const RELEASE_RP_PDU: u8 = 0x06;
pub const ABORT_PDU: u8 = 0x07;

impl Pdu {
    /// The PDU type code.
    pub fn pdu_type(&self) -> u8 {
        match self {
            Pdu::AssociationRQ(_) => ASSOCIATE_RQ_PDU,
            Pdu::AssociationAC(_) => ASSOCIATE_AC_PDU,
            Pdu::AssociationRJ(_) => ASSOCIATE_RJ_PDU,
            Pdu::PData { .. } => P_DATA_TF_PDU,
            Pdu::ReleaseRQ => RELEASE_RQ_PDU,
            Pdu::ReleaseRP => RELEASE_RP_PDU,
            Pdu::AbortRQ { .. } => ABORT_PDU,
        }
    }

    /// The value of the PDU length field for the current content,
    /// which excludes the 6-byte PDU header.
    pub fn length(&self) -> u32 {
        match self {
            Pdu::AssociationRQ(rq) => rq.length(),
            Pdu::AssociationAC(ac) => ac.length(),
            Pdu::PData { data } => data.iter().map(|pdv| 4 + 2 + pdv.data.len() as u32).sum(),
            Pdu::AssociationRJ(_) | Pdu::ReleaseRQ | Pdu::ReleaseRP | Pdu::AbortRQ { .. } => 4,
        }
    }

    /// Provide a short description of the PDU.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl std::fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Pdu::AssociationRQ(rq) => write!(
                f,
                "AssociationRQ {{ {} -> {}, {} presentation contexts }}",
                rq.calling_ae_title(),
                rq.called_ae_title(),
                rq.presentation_contexts().count()
            ),
            Pdu::AssociationAC(ac) => write!(
                f,
                "AssociationAC {{ {} presentation contexts, {} accepted }}",
                ac.presentation_contexts().count(),
                ac.presentation_contexts().filter(|pc| pc.is_accepted()).count()
            ),
            Pdu::AssociationRJ { .. }
            | Pdu::ReleaseRQ
            | Pdu::ReleaseRP
            | Pdu::AbortRQ { .. } => std::fmt::Debug::fmt(self.0, f),
            Pdu::PData { data } => {
                if data.len() == 1 {
                    write!(
                        f,
                        "PData [({:?}, {} bytes)]",
                        data[0].value_type,
                        data[0].data.len()
                    )
                } else if data.len() == 2 {
                    write!(
                        f,
                        "PData [({:?}, {} bytes), ({:?}, {} bytes)]",
                        data[0].value_type,
                        data[0].data.len(),
                        data[1].value_type,
                        data[1].data.len(),
                    )
                } else {
                    write!(f, "PData [{} p-data values]", data.len())
                }
            }
        }
    }
}
