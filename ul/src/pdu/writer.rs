//! PDU writer module
use crate::pdu::item::Item;
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not write PDU header field `{}`", field))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write PDU body"))]
    WriteBody {
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Invalid {}", field))]
    InvalidAeTitle {
        field: &'static str,
        source: AeTitleError,
        backtrace: Backtrace,
    },

    #[snafu(display("{} item is too long ({} bytes)", item, length))]
    ItemTooLong {
        item: &'static str,
        length: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU is too long ({} bytes)", length))]
    PduTooLong { length: usize, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn write_associate<C: PresentationContextItem>(
    out: &mut Vec<u8>,
    pdu: &AAssociate<C>,
) -> Result<()> {
    let called = encode_ae_title(pdu.called_ae_title()).context(InvalidAeTitleSnafu {
        field: "Called-AE-title",
    })?;
    let calling = encode_ae_title(pdu.calling_ae_title()).context(InvalidAeTitleSnafu {
        field: "Calling-AE-title",
    })?;

    // 7-8 Protocol-version
    out.extend_from_slice(&pdu.protocol_version().to_be_bytes());
    // 9-10 Reserved
    out.extend_from_slice(&[0x00; 2]);
    // 11-26 Called-AE-title, 27-42 Calling-AE-title
    out.extend_from_slice(&called);
    out.extend_from_slice(&calling);
    // 43-74 Reserved
    out.extend_from_slice(&[0x00; 32]);
    // 75-xxx Variable items
    for item in pdu.variable_items() {
        item.write_item(out)?;
    }
    Ok(())
}

fn write_body(out: &mut Vec<u8>, pdu: &Pdu) -> Result<()> {
    match pdu {
        Pdu::AssociationRQ(rq) => write_associate(out, rq),
        Pdu::AssociationAC(ac) => write_associate(out, ac),
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            let (source, reason) = source.to_codes();
            // reserved, result, source, reason/diag.
            out.extend_from_slice(&[0x00, *result as u8, source, reason]);
            Ok(())
        }
        Pdu::PData { data } => {
            for pdv in data {
                // item length covers the context ID, the control header and the data
                let length = u32::try_from(pdv.data.len() + 2)
                    .ok()
                    .context(ItemTooLongSnafu {
                        item: "Presentation Data Value",
                        length: pdv.data.len(),
                    })?;
                out.extend_from_slice(&length.to_be_bytes());
                out.push(pdv.presentation_context_id);
                out.push(pdv.control_header());
                out.extend_from_slice(&pdv.data);
            }
            Ok(())
        }
        Pdu::ReleaseRQ | Pdu::ReleaseRP => {
            out.extend_from_slice(&[0x00; 4]);
            Ok(())
        }
        Pdu::AbortRQ { source } => {
            let (source, reason) = source.to_codes();
            out.extend_from_slice(&[0x00, 0x00, source, reason]);
            Ok(())
        }
    }
}

/// Encode a PDU into its body bytes and PDU type,
/// without the PDU header.
fn encode_body(pdu: &Pdu) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(pdu.length() as usize);
    write_body(&mut body, pdu)?;
    Ok(body)
}

/// Encode a whole PDU, header included.
pub fn encode_pdu(pdu: &Pdu) -> Result<Vec<u8>> {
    let body = encode_body(pdu)?;
    let length = u32::try_from(body.len())
        .ok()
        .context(PduTooLongSnafu { length: body.len() })?;
    let mut out = Vec::with_capacity(PDU_HEADER_SIZE as usize + body.len());
    out.push(pdu.pdu_type());
    out.push(0x00);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Write a whole PDU to a byte sink.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: ?Sized + Write,
{
    let body = encode_body(pdu)?;
    let length = u32::try_from(body.len())
        .ok()
        .context(PduTooLongSnafu { length: body.len() })?;

    writer
        .write_u8(pdu.pdu_type())
        .context(WriteFieldSnafu { field: "PDU-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteFieldSnafu { field: "Reserved" })?;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteFieldSnafu { field: "PDU-length" })?;
    writer.write_all(&body).context(WriteBodySnafu)?;
    Ok(())
}
