//! PDU reader module
use crate::pdu::item::ItemReader;
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use bytes::{Buf, BytesMut};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{ErrorKind, Read};
use tracing::warn;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Not enough bytes for `{}`: needed {}, {} remaining",
        field,
        needed,
        remaining
    ))]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("{} trailing bytes after {}", count, context))]
    TrailingBytes {
        context: &'static str,
        count: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Unknown PDU type {:#04x}", pdu_type))]
    UnknownPduType { pdu_type: u8, backtrace: Backtrace },

    #[snafu(display("Unexpected item type {:#04x} in {}", item_type, context))]
    UnexpectedItem {
        context: &'static str,
        item_type: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },

    #[snafu(display("Invalid reject result {}, source {} or reason {}", result, source_code, reason))]
    InvalidRejectSourceOrReason {
        result: u8,
        source_code: u8,
        reason: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid abort source {} or reason {}", source_code, reason))]
    InvalidAbortSourceOrReason {
        source_code: u8,
        reason: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid presentation context result reason {}", reason))]
    InvalidPresentationContextResultReason { reason: u8, backtrace: Backtrace },

    #[snafu(display("Invalid user identity type {}", identity_type))]
    InvalidUserIdentityType {
        identity_type: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        source: std::str::Utf8Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
}

impl Error {
    /// The provider reason to send in an A-ABORT
    /// when a PDU fails to decode with this error.
    pub fn abort_reason(&self) -> AbortRQServiceProviderReason {
        match self {
            Error::UnknownPduType { .. } => AbortRQServiceProviderReason::UnrecognizedPdu,
            Error::UnexpectedItem { .. } => AbortRQServiceProviderReason::UnexpectedPduParameter,
            Error::InvalidPresentationContextResultReason { .. }
            | Error::InvalidUserIdentityType { .. }
            | Error::InvalidRejectSourceOrReason { .. }
            | Error::InvalidAbortSourceOrReason { .. } => {
                AbortRQServiceProviderReason::UnrecognizedPduParameter
            }
            _ => AbortRQServiceProviderReason::InvalidPduParameter,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn check_max_pdu_length(max_pdu_length: u32) -> Result<()> {
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );
    Ok(())
}

fn check_pdu_length(pdu_length: u32, max_pdu_length: u32, strict: bool) -> Result<()> {
    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming pdu was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }
    Ok(())
}

/// Read a whole PDU from a blocking byte source.
///
/// `max_pdu_length` is the maximum PDU length this node accepts.
/// In strict mode, longer PDUs are an error;
/// otherwise they are tolerated up to [`MAXIMUM_PDU_SIZE`] with a warning.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    check_max_pdu_length(max_pdu_length)?;

    // If we can't read 2 bytes here, that means that there is no PDU
    // available. Normally, we want to just return the UnexpectedEof error. However,
    // this method can block and wake up when stream is closed, so in this case, we
    // want to know if we had trouble even beginning to read a PDU. We still return
    // UnexpectedEof if we get after we have already began reading a PDU message.
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "type" });
    }

    let pdu_type = bytes[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "length" })?;

    check_pdu_length(pdu_length, max_pdu_length, strict)?;

    let mut body = vec![0; pdu_length as usize];
    reader.read_exact(&mut body).context(ReadPduSnafu)?;
    parse_pdu(pdu_type, &body, strict)
}

/// Decode a PDU from the front of a byte buffer.
///
/// Returns `Ok(None)` if the buffer does not hold a complete PDU yet,
/// in which case nothing is consumed.
/// Otherwise the bytes of the PDU are removed from the buffer,
/// even if its content fails to decode.
pub fn decode_pdu(buffer: &mut BytesMut, max_pdu_length: u32, strict: bool) -> Result<Option<Pdu>> {
    check_max_pdu_length(max_pdu_length)?;

    if buffer.len() < PDU_HEADER_SIZE as usize {
        return Ok(None);
    }
    let pdu_type = buffer[0];
    let pdu_length = BigEndian::read_u32(&buffer[2..6]);
    check_pdu_length(pdu_length, max_pdu_length, strict)?;

    let total = PDU_HEADER_SIZE as usize + pdu_length as usize;
    if buffer.len() < total {
        buffer.reserve(total - buffer.len());
        return Ok(None);
    }
    buffer.advance(PDU_HEADER_SIZE as usize);
    let body = buffer.split_to(pdu_length as usize);
    parse_pdu(pdu_type, &body, strict).map(Some)
}

/// Parse the body of a PDU of the given type.
/// The body must be consumed exactly.
pub fn parse_pdu(pdu_type: u8, body: &[u8], strict: bool) -> Result<Pdu> {
    let mut reader = ItemReader::new(body);

    let pdu = match pdu_type {
        ASSOCIATE_RQ_PDU => Pdu::AssociationRQ(read_associate(&mut reader, strict)?),
        ASSOCIATE_AC_PDU => Pdu::AssociationAC(read_associate(&mut reader, strict)?),
        ASSOCIATE_RJ_PDU => {
            // 7 - Reserved - This reserved field shall be sent with a value 00H but not tested
            // to this value when received.
            reader.reserved(1)?;

            // 8 - Result - 1: rejected-permanent, 2: rejected-transient
            let result = reader.u8("Result")?;
            // 9 - Source - 1: DICOM UL service-user, 2: DICOM UL service-provider (ACSE
            // related function), 3: DICOM UL service-provider (Presentation related function)
            let source_code = reader.u8("Source")?;
            // 10 - Reason/Diag.
            let reason = reader.u8("Reason/Diag.")?;

            let invalid = InvalidRejectSourceOrReasonSnafu {
                result,
                source_code,
                reason,
            };
            let result = AssociationRJResult::from(result).context(invalid)?;
            let source = AssociationRJSource::from(source_code, reason).context(invalid)?;
            Pdu::AssociationRJ(AssociationRJ { result, source })
        }
        P_DATA_TF_PDU => {
            let mut values = vec![];
            while !reader.is_empty() {
                // 1-4 - Item-length - The number of bytes from the first byte of the following
                // field to the last byte of the Presentation-data-value field.
                let item_length = reader.u32("Item-Length")?;
                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );

                // 5 - Presentation-context-ID
                let presentation_context_id = reader.u8("Presentation-context-ID")?;

                // 6 - Message Control Header
                // bit 0: 1 for a command fragment, 0 for data
                // bit 1: 1 for the last fragment
                let header = reader.u8("Message Control Header")?;
                let value_type = if header & 0x01 > 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = (header & 0x02) > 0;

                let data = reader
                    .bytes((item_length - 2) as usize, "Presentation-data-value")?
                    .to_vec();

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                })
            }
            Pdu::PData { data: values }
        }
        RELEASE_RQ_PDU => {
            // 7-10 - Reserved
            reader.reserved(4)?;
            Pdu::ReleaseRQ
        }
        RELEASE_RP_PDU => {
            // 7-10 - Reserved
            reader.reserved(4)?;
            Pdu::ReleaseRP
        }
        ABORT_PDU => {
            // 7-8 - Reserved
            reader.reserved(2)?;
            // 9 - Source - 0: service-user, 1: reserved, 2: service-provider
            let source_code = reader.u8("Source")?;
            // 10 - Reason/Diag, only significant for the service-provider
            let reason = reader.u8("Reason/Diag.")?;
            let source = AbortRQSource::from(source_code, reason)
                .context(InvalidAbortSourceOrReasonSnafu {
                    source_code,
                    reason,
                })?;
            Pdu::AbortRQ { source }
        }
        pdu_type => return UnknownPduTypeSnafu { pdu_type }.fail(),
    };

    reader.finish("PDU")?;
    Ok(pdu)
}

fn read_associate<C: PresentationContextItem>(
    reader: &mut ItemReader<'_>,
    strict: bool,
) -> Result<AAssociate<C>> {
    // 7-8 - Protocol-version - This two byte field shall use one bit to identify each
    // version of the DICOM UL protocol supported by the calling end-system. This is
    // Version 1 and shall be identified with bit 0 set.
    let protocol_version = reader.u16("Protocol-version")?;

    // 9-10 - Reserved - This reserved field shall be sent with a value 0000H but not
    // tested to this value when received.
    reader.reserved(2)?;

    // 11-26 - Called-AE-title - Leading and trailing spaces are non-significant.
    let called_ae_title = decode_ae_title(reader.bytes(AE_TITLE_LENGTH, "Called-AE-title")?);

    // 27-42 - Calling-AE-title
    let calling_ae_title = decode_ae_title(reader.bytes(AE_TITLE_LENGTH, "Calling-AE-title")?);

    // 43-74 - Reserved
    reader.reserved(32)?;

    // 75-xxx - Variable items - one Application Context Item,
    // one or more Presentation Context Items and one User Information Item.
    let mut variable_items = Vec::new();
    while !reader.is_empty() {
        let (item_type, mut body) = reader.sub_item()?;
        variable_items.push(VariableItem::<C>::read_body(item_type, &mut body)?);
        body.finish("variable item")?;
    }

    let has_application_context = variable_items
        .iter()
        .any(|item| matches!(item, VariableItem::ApplicationContext(_)));
    if !has_application_context {
        ensure!(!strict, MissingApplicationContextNameSnafu);
        warn!("Association PDU has no application context name");
    }

    Ok(AAssociate::from_parts(
        protocol_version,
        called_ae_title,
        calling_ae_title,
        variable_items,
    ))
}
