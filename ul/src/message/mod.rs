//! DIMSE message module
//!
//! A [`Message`] is a command set plus an optional data set,
//! both held as [`InMemDicomObject`]s.
//! The command set is always encoded in Implicit VR Little Endian,
//! with its group length computed on encoding.
//! The data set uses the transfer syntax negotiated
//! for the presentation context it travels on.
//!
//! - [`fragment`] splits encoded messages into P-DATA values
//!   and reassembles them on the receiving side.
//! - The `c_*` modules hold typed requests and responses
//!   of the composite services,
//!   each convertible to and from a generic [`Message`].
use std::fmt;
use std::sync::OnceLock;

use dicom_core::value::ConvertValueError;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::mem::InMemElement;
use dicom_object::{InMemDicomObject, ReadError, WriteError};
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

pub mod c_cancel;
pub mod c_echo;
pub mod c_find;
pub mod c_get;
pub mod c_move;
pub mod c_store;
pub(crate) mod exchange;
pub mod fragment;

pub use c_cancel::CCancelRequest;
pub use c_echo::{CEchoRequest, CEchoResponse};
pub use c_find::{CFindRequest, CFindResponse};
pub use c_get::{CGetRequest, CGetResponse};
pub use c_move::{CMoveRequest, CMoveResponse};
pub use c_store::{CStoreRequest, CStoreResponse};

/// The value of _Command Data Set Type_ meaning that no data set follows.
pub const NO_DATA_SET: u16 = 0x0101;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Missing command element {}", keyword))]
    MissingField {
        keyword: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid value of command element {}", keyword))]
    InvalidField {
        keyword: &'static str,
        source: ConvertValueError,
    },

    #[snafu(display("Command element {} does not hold a primitive value", keyword))]
    NotPrimitive {
        keyword: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Unknown command field {:#06x}", value))]
    UnknownCommandField { value: u16, backtrace: Backtrace },

    #[snafu(display("Unknown priority {:#06x}", value))]
    UnknownPriority { value: u16, backtrace: Backtrace },

    #[snafu(display("Message is not a {} but a {}", expected, got))]
    CommandFieldMismatch {
        expected: CommandField,
        got: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display("A {} requires a data set", command))]
    MissingDataSet {
        command: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsupported transfer syntax {}", uid))]
    UnsupportedTransferSyntax { uid: String, backtrace: Backtrace },

    /// Could not encode command set
    EncodeCommandSet { source: WriteError },

    /// Could not decode command set
    DecodeCommandSet { source: ReadError },

    /// Could not encode data set
    EncodeDataSet { source: WriteError },

    /// Could not decode data set
    DecodeDataSet { source: ReadError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The _Command Field_ of the composite services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandField {
    CStoreRq = 0x0001,
    CStoreRsp = 0x8001,
    CGetRq = 0x0010,
    CGetRsp = 0x8010,
    CFindRq = 0x0020,
    CFindRsp = 0x8020,
    CMoveRq = 0x0021,
    CMoveRsp = 0x8021,
    CEchoRq = 0x0030,
    CEchoRsp = 0x8030,
    CCancelRq = 0x0FFF,
}

impl CommandField {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        use CommandField::*;
        Some(match code {
            0x0001 => CStoreRq,
            0x8001 => CStoreRsp,
            0x0010 => CGetRq,
            0x8010 => CGetRsp,
            0x0020 => CFindRq,
            0x8020 => CFindRsp,
            0x0021 => CMoveRq,
            0x8021 => CMoveRsp,
            0x0030 => CEchoRq,
            0x8030 => CEchoRsp,
            0x0FFF => CCancelRq,
            _ => return None,
        })
    }

    /// Whether this is the command field of a response.
    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandField::CStoreRq => "C-STORE-RQ",
            CommandField::CStoreRsp => "C-STORE-RSP",
            CommandField::CGetRq => "C-GET-RQ",
            CommandField::CGetRsp => "C-GET-RSP",
            CommandField::CFindRq => "C-FIND-RQ",
            CommandField::CFindRsp => "C-FIND-RSP",
            CommandField::CMoveRq => "C-MOVE-RQ",
            CommandField::CMoveRsp => "C-MOVE-RSP",
            CommandField::CEchoRq => "C-ECHO-RQ",
            CommandField::CEchoRsp => "C-ECHO-RSP",
            CommandField::CCancelRq => "C-CANCEL-RQ",
        };
        f.write_str(name)
    }
}

/// The priority of a request.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    Low = 0x0002,
    #[default]
    Medium = 0x0000,
    High = 0x0001,
}

impl Priority {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Priority::Medium),
            0x0001 => Some(Priority::High),
            0x0002 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// The broad class of a response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Pending,
    Cancel,
    Warning,
    Failure,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        match status {
            0x0000 => StatusClass::Success,
            0xFF00 | 0xFF01 => StatusClass::Pending,
            0xFE00 => StatusClass::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => StatusClass::Warning,
            _ => StatusClass::Failure,
        }
    }
}

/// Sub-operation counters of C-MOVE and C-GET responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubOperations {
    pub remaining: Option<u16>,
    pub completed: Option<u16>,
    pub failed: Option<u16>,
    pub warning: Option<u16>,
}

/// A DIMSE message: a command set and an optional data set.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    command_set: InMemDicomObject,
    data_set: Option<InMemDicomObject>,
}

fn field<'a>(
    obj: &'a InMemDicomObject,
    tag: Tag,
    keyword: &'static str,
) -> Result<&'a InMemElement> {
    obj.element(tag).ok().context(MissingFieldSnafu { keyword })
}

fn uint16_field(obj: &InMemDicomObject, tag: Tag, keyword: &'static str) -> Result<u16> {
    field(obj, tag, keyword)?
        .to_int::<u16>()
        .context(InvalidFieldSnafu { keyword })
}

/// Retrieve a text element without its trailing padding.
fn text_field(obj: &InMemDicomObject, tag: Tag, keyword: &'static str) -> Result<String> {
    let value = field(obj, tag, keyword)?
        .value()
        .primitive()
        .context(NotPrimitiveSnafu { keyword })?
        .to_str();
    Ok(value
        .trim_end_matches(|c: char| c == '\0' || c == ' ')
        .to_string())
}

fn put_uint16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

fn put_text(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: String) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

macro_rules! us_field {
    ($getter: ident, $setter: ident, $tag: expr, $keyword: literal) => {
        #[doc = concat!("Retrieve the _", $keyword, "_.")]
        pub fn $getter(&self) -> Result<u16> {
            uint16_field(&self.command_set, $tag, $keyword)
        }

        #[doc = concat!("Set the _", $keyword, "_.")]
        pub fn $setter(&mut self, value: u16) {
            put_uint16(&mut self.command_set, $tag, value);
        }
    };
}

macro_rules! text_field {
    ($getter: ident, $setter: ident, $tag: expr, $vr: expr, $keyword: literal) => {
        #[doc = concat!("Retrieve the _", $keyword, "_, without padding.")]
        pub fn $getter(&self) -> Result<String> {
            text_field(&self.command_set, $tag, $keyword)
        }

        #[doc = concat!("Set the _", $keyword, "_.")]
        pub fn $setter(&mut self, value: impl Into<String>) {
            put_text(&mut self.command_set, $tag, $vr, value.into());
        }
    };
}

impl Message {
    /// Create a message with the given command field and no data set.
    pub fn new(command_field: CommandField) -> Self {
        let mut command_set = InMemDicomObject::new_empty();
        put_uint16(&mut command_set, tags::COMMAND_FIELD, command_field.code());
        put_uint16(&mut command_set, tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET);
        Message {
            command_set,
            data_set: None,
        }
    }

    /// Assemble a message from a decoded command set and data set.
    ///
    /// The command set is kept as is,
    /// so its data set type may disagree with `data_set`.
    pub fn from_parts(command_set: InMemDicomObject, data_set: Option<InMemDicomObject>) -> Self {
        Message {
            command_set,
            data_set,
        }
    }

    pub fn into_parts(self) -> (InMemDicomObject, Option<InMemDicomObject>) {
        (self.command_set, self.data_set)
    }

    pub fn command_set(&self) -> &InMemDicomObject {
        &self.command_set
    }

    pub fn command_set_mut(&mut self) -> &mut InMemDicomObject {
        &mut self.command_set
    }

    pub fn data_set(&self) -> Option<&InMemDicomObject> {
        self.data_set.as_ref()
    }

    /// Replace the data set,
    /// updating _Command Data Set Type_ accordingly.
    pub fn set_data_set(&mut self, data_set: Option<InMemDicomObject>) {
        let data_set_type = if data_set.is_some() {
            0x0000
        } else {
            NO_DATA_SET
        };
        put_uint16(
            &mut self.command_set,
            tags::COMMAND_DATA_SET_TYPE,
            data_set_type,
        );
        self.data_set = data_set;
    }

    pub fn with_data_set(mut self, data_set: InMemDicomObject) -> Self {
        self.set_data_set(Some(data_set));
        self
    }

    /// Whether the command set announces a data set.
    pub fn has_data_set(&self) -> bool {
        has_data_set(&self.command_set)
    }

    pub fn command_field(&self) -> Result<CommandField> {
        let value = uint16_field(&self.command_set, tags::COMMAND_FIELD, "CommandField")?;
        CommandField::from_code(value).context(UnknownCommandFieldSnafu { value })
    }

    /// Fail unless the command field is the one given.
    pub fn expect_command_field(&self, expected: CommandField) -> Result<()> {
        let got = self.command_field()?;
        ensure!(got == expected, CommandFieldMismatchSnafu { expected, got });
        Ok(())
    }

    us_field!(message_id, set_message_id, tags::MESSAGE_ID, "MessageID");
    us_field!(
        message_id_being_responded_to,
        set_message_id_being_responded_to,
        tags::MESSAGE_ID_BEING_RESPONDED_TO,
        "MessageIDBeingRespondedTo"
    );
    us_field!(status, set_status, tags::STATUS, "Status");
    us_field!(
        move_originator_message_id,
        set_move_originator_message_id,
        tags::MOVE_ORIGINATOR_MESSAGE_ID,
        "MoveOriginatorMessageID"
    );

    text_field!(
        affected_sop_class_uid,
        set_affected_sop_class_uid,
        tags::AFFECTED_SOP_CLASS_UID,
        VR::UI,
        "AffectedSOPClassUID"
    );
    text_field!(
        requested_sop_class_uid,
        set_requested_sop_class_uid,
        tags::REQUESTED_SOP_CLASS_UID,
        VR::UI,
        "RequestedSOPClassUID"
    );
    text_field!(
        affected_sop_instance_uid,
        set_affected_sop_instance_uid,
        tags::AFFECTED_SOP_INSTANCE_UID,
        VR::UI,
        "AffectedSOPInstanceUID"
    );
    text_field!(
        move_destination,
        set_move_destination,
        tags::MOVE_DESTINATION,
        VR::AE,
        "MoveDestination"
    );
    text_field!(
        move_originator_ae_title,
        set_move_originator_ae_title,
        tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE,
        VR::AE,
        "MoveOriginatorApplicationEntityTitle"
    );

    pub fn priority(&self) -> Result<Priority> {
        let value = uint16_field(&self.command_set, tags::PRIORITY, "Priority")?;
        Priority::from_code(value).context(UnknownPrioritySnafu { value })
    }

    pub fn set_priority(&mut self, priority: Priority) {
        put_uint16(&mut self.command_set, tags::PRIORITY, priority as u16);
    }

    /// The class of the status, if the message has one.
    pub fn status_class(&self) -> Result<StatusClass> {
        self.status().map(StatusClass::of)
    }

    pub fn sub_operations(&self) -> SubOperations {
        let get = |tag, keyword| uint16_field(&self.command_set, tag, keyword).ok();
        SubOperations {
            remaining: get(
                tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
                "NumberOfRemainingSuboperations",
            ),
            completed: get(
                tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
                "NumberOfCompletedSuboperations",
            ),
            failed: get(
                tags::NUMBER_OF_FAILED_SUBOPERATIONS,
                "NumberOfFailedSuboperations",
            ),
            warning: get(
                tags::NUMBER_OF_WARNING_SUBOPERATIONS,
                "NumberOfWarningSuboperations",
            ),
        }
    }

    /// Set the sub-operation counters, removing those which are `None`.
    pub fn set_sub_operations(&mut self, sub_operations: SubOperations) {
        let counters = [
            (tags::NUMBER_OF_REMAINING_SUBOPERATIONS, sub_operations.remaining),
            (tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, sub_operations.completed),
            (tags::NUMBER_OF_FAILED_SUBOPERATIONS, sub_operations.failed),
            (tags::NUMBER_OF_WARNING_SUBOPERATIONS, sub_operations.warning),
        ];
        for (tag, value) in counters {
            match value {
                Some(value) => put_uint16(&mut self.command_set, tag, value),
                None => {
                    self.command_set.remove_element(tag);
                }
            }
        }
    }

    /// Encode the data set, if any, in the given transfer syntax.
    pub fn encode_data_set(&self, transfer_syntax: &str) -> Result<Option<Vec<u8>>> {
        let Some(data_set) = &self.data_set else {
            return Ok(None);
        };
        let ts = TransferSyntaxRegistry
            .get(transfer_syntax)
            .filter(|ts| !ts.is_unsupported())
            .context(UnsupportedTransferSyntaxSnafu {
                uid: transfer_syntax,
            })?;
        let mut out = Vec::new();
        data_set
            .write_dataset_with_ts(&mut out, ts)
            .context(EncodeDataSetSnafu)?;
        Ok(Some(out))
    }
}

/// Whether a command set announces a data set.
pub fn has_data_set(command_set: &InMemDicomObject) -> bool {
    matches!(
        uint16_field(command_set, tags::COMMAND_DATA_SET_TYPE, "CommandDataSetType"),
        Ok(v) if v != NO_DATA_SET
    )
}

/// Encode a command set in Implicit VR Little Endian,
/// preceded by its _Command Group Length_.
///
/// Any group length already in the command set is replaced.
pub fn encode_command_set(command_set: &InMemDicomObject) -> Result<Vec<u8>> {
    // commands are always in implicit VR LE
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();

    let mut command_set = command_set.clone();
    command_set.remove_element(tags::COMMAND_GROUP_LENGTH);
    let mut body = Vec::new();
    command_set
        .write_dataset_with_ts(&mut body, &ts)
        .context(EncodeCommandSetSnafu)?;

    command_set.put(DataElement::new(
        tags::COMMAND_GROUP_LENGTH,
        VR::UL,
        PrimitiveValue::from(body.len() as u32),
    ));
    let mut out = Vec::with_capacity(body.len() + 12);
    command_set
        .write_dataset_with_ts(&mut out, &ts)
        .context(EncodeCommandSetSnafu)?;
    Ok(out)
}

/// Decode a command set in Implicit VR Little Endian.
pub fn decode_command_set(bytes: &[u8]) -> Result<InMemDicomObject> {
    InMemDicomObject::read_dataset_with_ts(bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .context(DecodeCommandSetSnafu)
}

/// Decode a data set in the transfer syntax of the given UID.
pub fn decode_data_set(transfer_syntax: &str, bytes: &[u8]) -> Result<InMemDicomObject> {
    let ts = TransferSyntaxRegistry
        .get(transfer_syntax)
        .filter(|ts| !ts.is_unsupported())
        .context(UnsupportedTransferSyntaxSnafu {
            uid: transfer_syntax,
        })?;
    InMemDicomObject::read_dataset_with_ts(bytes, ts).context(DecodeDataSetSnafu)
}

/// Stand-in for data sets validated to be present.
pub(crate) fn empty_data_set() -> &'static InMemDicomObject {
    static EMPTY: OnceLock<InMemDicomObject> = OnceLock::new();
    EMPTY.get_or_init(InMemDicomObject::new_empty)
}

/// Require a non-empty data set for this kind of message.
pub(crate) fn require_data_set(message: &Message, command: CommandField) -> Result<()> {
    ensure!(
        message
            .data_set()
            .map_or(false, |d| d.into_iter().next().is_some()),
        MissingDataSetSnafu { command }
    );
    Ok(())
}

/// Declare a typed message wrapping a generic [`Message`].
///
/// The type must provide `fn validate(&Message) -> Result<()>`
/// checking its mandatory fields.
macro_rules! typed_message {
    ($(#[$meta: meta])* $name: ident, $command: ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name($crate::message::Message);

        impl $name {
            /// The command field of this kind of message.
            pub const COMMAND_FIELD: $crate::message::CommandField =
                $crate::message::CommandField::$command;

            /// View this as a generic message.
            pub fn as_message(&self) -> &$crate::message::Message {
                &self.0
            }

            /// Turn this into a generic message.
            pub fn into_message(self) -> $crate::message::Message {
                self.0
            }
        }

        impl From<$name> for $crate::message::Message {
            fn from(value: $name) -> $crate::message::Message {
                value.0
            }
        }

        impl TryFrom<$crate::message::Message> for $name {
            type Error = $crate::message::Error;

            fn try_from(
                message: $crate::message::Message,
            ) -> $crate::message::Result<Self> {
                message.expect_command_field($crate::message::CommandField::$command)?;
                Self::validate(&message)?;
                Ok($name(message))
            }
        }
    };
}

pub(crate) use typed_message;

/// Fields shared by every request.
pub(crate) fn validate_request(message: &Message) -> Result<()> {
    message.message_id()?;
    Ok(())
}

/// Fields shared by every response.
pub(crate) fn validate_response(message: &Message) -> Result<()> {
    message.message_id_being_responded_to()?;
    message.status()?;
    Ok(())
}
