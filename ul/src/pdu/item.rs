//! Item codec.
//!
//! Association PDUs carry their content in variable items,
//! each made of a one-byte item type, a reserved byte,
//! a two-byte big endian length, and then the item body.
//! Items may nest: presentation contexts contain abstract and transfer syntax
//! sub-items, and the user information item contains its own sub-items.
//!
//! Lengths are computed bottom-up when writing.
//! When reading, each item consumes exactly its declared length,
//! and leftover or missing bytes are reported as errors.

use super::reader::{
    DecodeTextSnafu, InvalidPresentationContextResultReasonSnafu, InvalidUserIdentityTypeSnafu,
    MissingAbstractSyntaxSnafu, MissingTransferSyntaxSnafu,
    MultipleTransferSyntaxesAcceptedSnafu, Result as ReadResult, TrailingBytesSnafu,
    TruncatedSnafu, UnexpectedItemSnafu,
};
use super::writer::{ItemTooLongSnafu, Result as WriteResult};
use super::{
    PresentationContextItem, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason, RoleSelection, UserIdentity, UserIdentityType,
    UserInformation, UserVariableItem, VariableItem,
};
use byteordered::byteorder::{BigEndian, ByteOrder};
use snafu::{ensure, OptionExt, ResultExt};

/// The size of an item header: type, reserved byte and 16-bit length.
pub const ITEM_HEADER_SIZE: usize = 4;

pub const APPLICATION_CONTEXT_ITEM: u8 = 0x10;
pub const PRESENTATION_CONTEXT_RQ_ITEM: u8 = 0x20;
pub const PRESENTATION_CONTEXT_AC_ITEM: u8 = 0x21;
pub const ABSTRACT_SYNTAX_ITEM: u8 = 0x30;
pub const TRANSFER_SYNTAX_ITEM: u8 = 0x40;
pub const USER_INFORMATION_ITEM: u8 = 0x50;
pub const MAXIMUM_LENGTH_ITEM: u8 = 0x51;
pub const IMPLEMENTATION_CLASS_UID_ITEM: u8 = 0x52;
pub const ASYNCHRONOUS_OPERATIONS_WINDOW_ITEM: u8 = 0x53;
pub const ROLE_SELECTION_ITEM: u8 = 0x54;
pub const IMPLEMENTATION_VERSION_NAME_ITEM: u8 = 0x55;
pub const SOP_CLASS_EXTENDED_NEGOTIATION_ITEM: u8 = 0x56;
pub const SOP_CLASS_COMMON_EXTENDED_NEGOTIATION_ITEM: u8 = 0x57;
pub const USER_IDENTITY_RQ_ITEM: u8 = 0x58;
pub const USER_IDENTITY_AC_ITEM: u8 = 0x59;

/// A bounded reader over the body of a PDU or item.
#[derive(Debug, Clone)]
pub struct ItemReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ItemReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ItemReader { bytes, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, length: usize, field: &'static str) -> ReadResult<&'a [u8]> {
        ensure!(
            length <= self.remaining(),
            TruncatedSnafu {
                field,
                needed: length,
                remaining: self.remaining(),
            }
        );
        let out = &self.bytes[self.position..self.position + length];
        self.position += length;
        Ok(out)
    }

    pub fn u8(&mut self, field: &'static str) -> ReadResult<u8> {
        Ok(self.bytes(1, field)?[0])
    }

    pub fn u16(&mut self, field: &'static str) -> ReadResult<u16> {
        Ok(BigEndian::read_u16(self.bytes(2, field)?))
    }

    pub fn u32(&mut self, field: &'static str) -> ReadResult<u32> {
        Ok(BigEndian::read_u32(self.bytes(4, field)?))
    }

    /// Skip reserved bytes. Their values are not tested.
    pub fn reserved(&mut self, count: usize) -> ReadResult<()> {
        self.bytes(count, "reserved").map(|_| ())
    }

    /// Read text, dropping the trailing null padding of UIDs.
    pub fn text(&mut self, length: usize, field: &'static str) -> ReadResult<String> {
        let bytes = self.bytes(length, field)?;
        let text = std::str::from_utf8(bytes).context(DecodeTextSnafu { field })?;
        Ok(text.trim_end_matches('\0').to_string())
    }

    /// Read text preceded by its 16-bit length.
    pub fn text_u16(&mut self, field: &'static str) -> ReadResult<String> {
        let length = self.u16(field)?;
        self.text(usize::from(length), field)
    }

    /// Consume everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.bytes[self.position..];
        self.position = self.bytes.len();
        out
    }

    /// Read a nested item header,
    /// returning the item type and a reader bounded to the item body.
    pub fn sub_item(&mut self) -> ReadResult<(u8, ItemReader<'a>)> {
        let item_type = self.u8("item type")?;
        self.reserved(1)?;
        let length = self.u16("item length")?;
        let body = self.bytes(usize::from(length), "item body")?;
        Ok((item_type, ItemReader::new(body)))
    }

    /// Ensure that the whole body was consumed.
    pub fn finish(&self, context: &'static str) -> ReadResult<()> {
        ensure!(
            self.is_empty(),
            TrailingBytesSnafu {
                context,
                count: self.remaining(),
            }
        );
        Ok(())
    }
}

/// Write an item header followed by the body produced by `body`,
/// then fill in the item length.
pub fn write_item<F>(out: &mut Vec<u8>, item_type: u8, name: &'static str, body: F) -> WriteResult<()>
where
    F: FnOnce(&mut Vec<u8>) -> WriteResult<()>,
{
    out.push(item_type);
    out.push(0x00);
    let start = out.len();
    out.extend_from_slice(&[0, 0]);
    body(out)?;
    let length = out.len() - start - 2;
    let length = u16::try_from(length)
        .ok()
        .context(ItemTooLongSnafu { item: name, length })?;
    out[start..start + 2].copy_from_slice(&length.to_be_bytes());
    Ok(())
}

/// Write a byte string preceded by its 16-bit length.
pub fn write_u16_prefixed(out: &mut Vec<u8>, name: &'static str, bytes: &[u8]) -> WriteResult<()> {
    let length = u16::try_from(bytes.len()).ok().context(ItemTooLongSnafu {
        item: name,
        length: bytes.len(),
    })?;
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Write a simple item made only of text.
fn write_text_item(out: &mut Vec<u8>, item_type: u8, name: &'static str, text: &str) -> WriteResult<()> {
    write_item(out, item_type, name, |out| {
        out.extend_from_slice(text.as_bytes());
        Ok(())
    })
}

/// An item or sub-item which can be encoded and decoded on its own.
pub trait Item: Sized {
    /// The item type code of this item.
    fn item_type(&self) -> u8;

    /// The length of the item body, excluding the item header.
    fn body_len(&self) -> usize;

    /// The full length of the encoded item.
    fn encoded_len(&self) -> usize {
        ITEM_HEADER_SIZE + self.body_len()
    }

    /// Write the item, including its header.
    fn write_item(&self, out: &mut Vec<u8>) -> WriteResult<()>;

    /// Read the item body after its header was read.
    /// Implementations must consume the body completely.
    fn read_body(item_type: u8, body: &mut ItemReader<'_>) -> ReadResult<Self>;

    /// Encode the item into a new buffer.
    fn encode(&self) -> WriteResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_item(&mut out)?;
        Ok(out)
    }

    /// Decode an item spanning the whole of `bytes`.
    fn decode(bytes: &[u8]) -> ReadResult<Self> {
        let mut reader = ItemReader::new(bytes);
        let (item_type, mut body) = reader.sub_item()?;
        let item = Self::read_body(item_type, &mut body)?;
        body.finish("item")?;
        reader.finish("item")?;
        Ok(item)
    }
}

impl Item for PresentationContextProposed {
    fn item_type(&self) -> u8 {
        PRESENTATION_CONTEXT_RQ_ITEM
    }

    fn body_len(&self) -> usize {
        4 + ITEM_HEADER_SIZE
            + self.abstract_syntax.len()
            + self
                .transfer_syntaxes
                .iter()
                .map(|ts| ITEM_HEADER_SIZE + ts.len())
                .sum::<usize>()
    }

    fn write_item(&self, out: &mut Vec<u8>) -> WriteResult<()> {
        write_item(out, PRESENTATION_CONTEXT_RQ_ITEM, "Presentation Context", |out| {
            // 5 - Presentation-context-ID, then 3 reserved bytes
            out.extend_from_slice(&[self.id, 0x00, 0x00, 0x00]);
            write_text_item(out, ABSTRACT_SYNTAX_ITEM, "Abstract Syntax", &self.abstract_syntax)?;
            for transfer_syntax in &self.transfer_syntaxes {
                write_text_item(out, TRANSFER_SYNTAX_ITEM, "Transfer Syntax", transfer_syntax)?;
            }
            Ok(())
        })
    }

    fn read_body(item_type: u8, body: &mut ItemReader<'_>) -> ReadResult<Self> {
        ensure!(
            item_type == PRESENTATION_CONTEXT_RQ_ITEM,
            UnexpectedItemSnafu {
                context: "A-ASSOCIATE-RQ",
                item_type,
            }
        );
        let id = body.u8("Presentation-context-ID")?;
        body.reserved(3)?;

        let mut abstract_syntax = None;
        let mut transfer_syntaxes = Vec::new();
        while !body.is_empty() {
            let (sub_type, mut sub) = body.sub_item()?;
            match sub_type {
                ABSTRACT_SYNTAX_ITEM => {
                    let len = sub.remaining();
                    abstract_syntax = Some(sub.text(len, "Abstract-syntax-name")?);
                }
                TRANSFER_SYNTAX_ITEM => {
                    let len = sub.remaining();
                    transfer_syntaxes.push(sub.text(len, "Transfer-syntax-name")?);
                }
                item_type => {
                    return UnexpectedItemSnafu {
                        context: "Presentation Context",
                        item_type,
                    }
                    .fail()
                }
            }
        }

        let abstract_syntax = abstract_syntax.context(MissingAbstractSyntaxSnafu)?;
        ensure!(!transfer_syntaxes.is_empty(), MissingTransferSyntaxSnafu);

        Ok(PresentationContextProposed {
            id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

impl Item for PresentationContextResult {
    fn item_type(&self) -> u8 {
        PRESENTATION_CONTEXT_AC_ITEM
    }

    fn body_len(&self) -> usize {
        4 + ITEM_HEADER_SIZE + self.transfer_syntax.len()
    }

    fn write_item(&self, out: &mut Vec<u8>) -> WriteResult<()> {
        write_item(out, PRESENTATION_CONTEXT_AC_ITEM, "Presentation Context", |out| {
            // ID, reserved, Result/Reason, reserved
            out.extend_from_slice(&[self.id, 0x00, self.reason as u8, 0x00]);
            write_text_item(out, TRANSFER_SYNTAX_ITEM, "Transfer Syntax", &self.transfer_syntax)
        })
    }

    fn read_body(item_type: u8, body: &mut ItemReader<'_>) -> ReadResult<Self> {
        ensure!(
            item_type == PRESENTATION_CONTEXT_AC_ITEM,
            UnexpectedItemSnafu {
                context: "A-ASSOCIATE-AC",
                item_type,
            }
        );
        let id = body.u8("Presentation-context-ID")?;
        body.reserved(1)?;
        let reason = body.u8("Result/Reason")?;
        let reason = PresentationContextResultReason::from(reason)
            .context(InvalidPresentationContextResultReasonSnafu { reason })?;
        body.reserved(1)?;

        // a rejected context may omit the transfer syntax
        let mut transfer_syntax = None;
        while !body.is_empty() {
            let (sub_type, mut sub) = body.sub_item()?;
            match sub_type {
                TRANSFER_SYNTAX_ITEM => {
                    ensure!(
                        transfer_syntax.is_none(),
                        MultipleTransferSyntaxesAcceptedSnafu
                    );
                    let len = sub.remaining();
                    transfer_syntax = Some(sub.text(len, "Transfer-syntax-name")?);
                }
                item_type => {
                    return UnexpectedItemSnafu {
                        context: "Presentation Context",
                        item_type,
                    }
                    .fail()
                }
            }
        }

        Ok(PresentationContextResult {
            id,
            reason,
            transfer_syntax: transfer_syntax.unwrap_or_default(),
        })
    }
}

impl Item for UserVariableItem {
    fn item_type(&self) -> u8 {
        match self {
            UserVariableItem::MaxLength(_) => MAXIMUM_LENGTH_ITEM,
            UserVariableItem::ImplementationClassUID(_) => IMPLEMENTATION_CLASS_UID_ITEM,
            UserVariableItem::AsynchronousOperationsWindow { .. } => {
                ASYNCHRONOUS_OPERATIONS_WINDOW_ITEM
            }
            UserVariableItem::RoleSelection(_) => ROLE_SELECTION_ITEM,
            UserVariableItem::ImplementationVersionName(_) => IMPLEMENTATION_VERSION_NAME_ITEM,
            UserVariableItem::SopClassExtendedNegotiationSubItem(..) => {
                SOP_CLASS_EXTENDED_NEGOTIATION_ITEM
            }
            UserVariableItem::SopClassCommonExtendedNegotiation { .. } => {
                SOP_CLASS_COMMON_EXTENDED_NEGOTIATION_ITEM
            }
            UserVariableItem::UserIdentityItem(_) => USER_IDENTITY_RQ_ITEM,
            UserVariableItem::UserIdentityResponse(_) => USER_IDENTITY_AC_ITEM,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            UserVariableItem::MaxLength(_) => 4,
            UserVariableItem::ImplementationClassUID(uid) => uid.len(),
            UserVariableItem::AsynchronousOperationsWindow { .. } => 4,
            UserVariableItem::RoleSelection(role) => 2 + role.sop_class_uid.len() + 2,
            UserVariableItem::ImplementationVersionName(name) => name.len(),
            UserVariableItem::SopClassExtendedNegotiationSubItem(uid, info) => {
                2 + uid.len() + info.len()
            }
            UserVariableItem::SopClassCommonExtendedNegotiation {
                sop_class_uid,
                service_class_uid,
                related_general_sop_class_uids,
            } => {
                2 + sop_class_uid.len()
                    + 2
                    + service_class_uid.len()
                    + 2
                    + related_general_sop_class_uids
                        .iter()
                        .map(|uid| 2 + uid.len())
                        .sum::<usize>()
            }
            UserVariableItem::UserIdentityItem(identity) => {
                2 + 2 + identity.primary_field().len() + 2 + identity.secondary_field().len()
            }
            UserVariableItem::UserIdentityResponse(response) => 2 + response.len(),
        }
    }

    fn write_item(&self, out: &mut Vec<u8>) -> WriteResult<()> {
        match self {
            UserVariableItem::MaxLength(max_length) => {
                write_item(out, MAXIMUM_LENGTH_ITEM, "Maximum Length", |out| {
                    out.extend_from_slice(&max_length.to_be_bytes());
                    Ok(())
                })
            }
            UserVariableItem::ImplementationClassUID(uid) => write_text_item(
                out,
                IMPLEMENTATION_CLASS_UID_ITEM,
                "Implementation Class UID",
                uid,
            ),
            UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked,
                max_operations_performed,
            } => write_item(
                out,
                ASYNCHRONOUS_OPERATIONS_WINDOW_ITEM,
                "Asynchronous Operations Window",
                |out| {
                    out.extend_from_slice(&max_operations_invoked.to_be_bytes());
                    out.extend_from_slice(&max_operations_performed.to_be_bytes());
                    Ok(())
                },
            ),
            UserVariableItem::RoleSelection(role) => {
                write_item(out, ROLE_SELECTION_ITEM, "SCP/SCU Role Selection", |out| {
                    write_u16_prefixed(out, "SOP-class-uid", role.sop_class_uid.as_bytes())?;
                    out.push(u8::from(role.scu_role));
                    out.push(u8::from(role.scp_role));
                    Ok(())
                })
            }
            UserVariableItem::ImplementationVersionName(name) => write_text_item(
                out,
                IMPLEMENTATION_VERSION_NAME_ITEM,
                "Implementation Version Name",
                name,
            ),
            UserVariableItem::SopClassExtendedNegotiationSubItem(uid, info) => write_item(
                out,
                SOP_CLASS_EXTENDED_NEGOTIATION_ITEM,
                "SOP Class Extended Negotiation",
                |out| {
                    write_u16_prefixed(out, "SOP-class-uid", uid.as_bytes())?;
                    out.extend_from_slice(info);
                    Ok(())
                },
            ),
            UserVariableItem::SopClassCommonExtendedNegotiation {
                sop_class_uid,
                service_class_uid,
                related_general_sop_class_uids,
            } => write_item(
                out,
                SOP_CLASS_COMMON_EXTENDED_NEGOTIATION_ITEM,
                "SOP Class Common Extended Negotiation",
                |out| {
                    write_u16_prefixed(out, "SOP-class-uid", sop_class_uid.as_bytes())?;
                    write_u16_prefixed(out, "Service-class-uid", service_class_uid.as_bytes())?;
                    let mut related = Vec::new();
                    for uid in related_general_sop_class_uids {
                        write_u16_prefixed(&mut related, "Related-general-sop-class-uid", uid.as_bytes())?;
                    }
                    write_u16_prefixed(out, "Related-general-sop-class-identification", &related)
                },
            ),
            UserVariableItem::UserIdentityItem(identity) => {
                write_item(out, USER_IDENTITY_RQ_ITEM, "User Identity", |out| {
                    out.push(identity.identity_type().to_u8());
                    out.push(u8::from(identity.positive_response_requested()));
                    write_u16_prefixed(out, "Primary-field", identity.primary_field())?;
                    write_u16_prefixed(out, "Secondary-field", identity.secondary_field())
                })
            }
            UserVariableItem::UserIdentityResponse(response) => {
                write_item(out, USER_IDENTITY_AC_ITEM, "User Identity Response", |out| {
                    write_u16_prefixed(out, "Server-response", response)
                })
            }
        }
    }

    fn read_body(item_type: u8, body: &mut ItemReader<'_>) -> ReadResult<Self> {
        let item = match item_type {
            MAXIMUM_LENGTH_ITEM => UserVariableItem::MaxLength(body.u32("Maximum-length-received")?),
            IMPLEMENTATION_CLASS_UID_ITEM => {
                let len = body.remaining();
                UserVariableItem::ImplementationClassUID(body.text(len, "Implementation-class-uid")?)
            }
            ASYNCHRONOUS_OPERATIONS_WINDOW_ITEM => UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked: body.u16("Maximum-number-operations-invoked")?,
                max_operations_performed: body.u16("Maximum-number-operations-performed")?,
            },
            ROLE_SELECTION_ITEM => {
                let sop_class_uid = body.text_u16("SOP-class-uid")?;
                let scu_role = body.u8("SCU-role")? != 0;
                let scp_role = body.u8("SCP-role")? != 0;
                UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid,
                    scu_role,
                    scp_role,
                })
            }
            IMPLEMENTATION_VERSION_NAME_ITEM => {
                let len = body.remaining();
                UserVariableItem::ImplementationVersionName(
                    body.text(len, "Implementation-version-name")?,
                )
            }
            SOP_CLASS_EXTENDED_NEGOTIATION_ITEM => {
                let uid = body.text_u16("SOP-class-uid")?;
                let info = body.rest().to_vec();
                UserVariableItem::SopClassExtendedNegotiationSubItem(uid, info)
            }
            SOP_CLASS_COMMON_EXTENDED_NEGOTIATION_ITEM => {
                let sop_class_uid = body.text_u16("SOP-class-uid")?;
                let service_class_uid = body.text_u16("Service-class-uid")?;
                let related_length = body.u16("Related-general-sop-class-identification-length")?;
                let mut related = ItemReader::new(body.bytes(
                    usize::from(related_length),
                    "Related-general-sop-class-identification",
                )?);
                let mut related_general_sop_class_uids = Vec::new();
                while !related.is_empty() {
                    related_general_sop_class_uids
                        .push(related.text_u16("Related-general-sop-class-uid")?);
                }
                UserVariableItem::SopClassCommonExtendedNegotiation {
                    sop_class_uid,
                    service_class_uid,
                    related_general_sop_class_uids,
                }
            }
            USER_IDENTITY_RQ_ITEM => {
                let identity_type = body.u8("User-Identity-Type")?;
                let identity_type = UserIdentityType::from(identity_type)
                    .context(InvalidUserIdentityTypeSnafu { identity_type })?;
                let positive_response_requested = body.u8("Positive-response-requested")? != 0;
                let primary_length = body.u16("Primary-field-length")?;
                let primary_field = body
                    .bytes(usize::from(primary_length), "Primary-field")?
                    .to_vec();
                let secondary_length = body.u16("Secondary-field-length")?;
                let secondary_field = body
                    .bytes(usize::from(secondary_length), "Secondary-field")?
                    .to_vec();
                UserVariableItem::UserIdentityItem(UserIdentity::new(
                    positive_response_requested,
                    identity_type,
                    primary_field,
                    secondary_field,
                ))
            }
            USER_IDENTITY_AC_ITEM => {
                let length = body.u16("Server-response-length")?;
                let response = body.bytes(usize::from(length), "Server-response")?.to_vec();
                UserVariableItem::UserIdentityResponse(response)
            }
            item_type => {
                return UnexpectedItemSnafu {
                    context: "User Information",
                    item_type,
                }
                .fail()
            }
        };
        Ok(item)
    }
}

impl Item for UserInformation {
    fn item_type(&self) -> u8 {
        USER_INFORMATION_ITEM
    }

    fn body_len(&self) -> usize {
        self.items().iter().map(Item::encoded_len).sum()
    }

    fn write_item(&self, out: &mut Vec<u8>) -> WriteResult<()> {
        write_item(out, USER_INFORMATION_ITEM, "User Information", |out| {
            for item in self.items() {
                item.write_item(out)?;
            }
            Ok(())
        })
    }

    fn read_body(item_type: u8, body: &mut ItemReader<'_>) -> ReadResult<Self> {
        ensure!(
            item_type == USER_INFORMATION_ITEM,
            UnexpectedItemSnafu {
                context: "User Information",
                item_type,
            }
        );
        let mut items = Vec::new();
        while !body.is_empty() {
            let (sub_type, mut sub) = body.sub_item()?;
            items.push(UserVariableItem::read_body(sub_type, &mut sub)?);
            sub.finish("User Information sub-item")?;
        }
        Ok(UserInformation::from_items(items))
    }
}

impl<C: PresentationContextItem> Item for VariableItem<C> {
    fn item_type(&self) -> u8 {
        match self {
            VariableItem::ApplicationContext(_) => APPLICATION_CONTEXT_ITEM,
            VariableItem::PresentationContext(pc) => pc.item_type(),
            VariableItem::UserInformation(ui) => ui.item_type(),
        }
    }

    fn body_len(&self) -> usize {
        match self {
            VariableItem::ApplicationContext(name) => name.len(),
            VariableItem::PresentationContext(pc) => pc.body_len(),
            VariableItem::UserInformation(ui) => ui.body_len(),
        }
    }

    fn write_item(&self, out: &mut Vec<u8>) -> WriteResult<()> {
        match self {
            VariableItem::ApplicationContext(name) => {
                write_text_item(out, APPLICATION_CONTEXT_ITEM, "Application Context", name)
            }
            VariableItem::PresentationContext(pc) => pc.write_item(out),
            VariableItem::UserInformation(ui) => ui.write_item(out),
        }
    }

    fn read_body(item_type: u8, body: &mut ItemReader<'_>) -> ReadResult<Self> {
        let item = match item_type {
            APPLICATION_CONTEXT_ITEM => {
                let len = body.remaining();
                VariableItem::ApplicationContext(body.text(len, "Application-context-name")?)
            }
            t if t == C::ITEM_TYPE => VariableItem::PresentationContext(C::read_body(t, body)?),
            USER_INFORMATION_ITEM => {
                VariableItem::UserInformation(UserInformation::read_body(item_type, body)?)
            }
            item_type => {
                return UnexpectedItemSnafu {
                    context: "association PDU",
                    item_type,
                }
                .fail()
            }
        };
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::reader::Error as ReadError;
    use matches::assert_matches;

    #[test]
    fn role_selection_item() {
        let item = UserVariableItem::RoleSelection(RoleSelection {
            sop_class_uid: "1.2.3.4".to_string(),
            scu_role: true,
            scp_role: true,
        });
        let bytes = item.encode().unwrap();
        let mut expected = vec![0x54, 0x00, 0x00, 0x0b, 0x00, 0x07];
        expected.extend_from_slice(b"1.2.3.4");
        expected.extend_from_slice(&[0x01, 0x01]);
        assert_eq!(bytes, expected);
        assert_eq!(item.encoded_len(), 15);
        assert_eq!(UserVariableItem::decode(&bytes).unwrap(), item);
    }

    #[test]
    fn presentation_context_result_item() {
        let pc = PresentationContextResult {
            id: 3,
            reason: PresentationContextResultReason::UserRejection,
            transfer_syntax: "transfer_syntax".to_string(),
        };
        let bytes = pc.encode().unwrap();
        let mut expected = vec![0x21, 0x00, 0x00, 0x17, 0x03, 0x00, 0x01, 0x00];
        expected.extend_from_slice(&[0x40, 0x00, 0x00, 0x0f]);
        expected.extend_from_slice(b"transfer_syntax");
        assert_eq!(bytes, expected);
        assert_eq!(bytes.len(), 27);
        assert_eq!(PresentationContextResult::decode(&bytes).unwrap(), pc);
    }

    #[test]
    fn maximum_length_item_with_trailing_bytes() {
        let bytes = [0x51, 0x00, 0x00, 0x05, 0x00, 0x00, 0x40, 0x00, 0xFF];
        assert_matches!(
            UserVariableItem::decode(&bytes),
            Err(ReadError::TrailingBytes { count: 1, .. })
        );
    }

    #[test]
    fn truncated_item() {
        // declares 4 bytes of body, only 2 available
        let bytes = [0x51, 0x00, 0x00, 0x04, 0x00, 0x00];
        assert_matches!(
            UserVariableItem::decode(&bytes),
            Err(ReadError::Truncated { needed: 4, remaining: 2, .. })
        );
    }

    #[test]
    fn user_identity_items() {
        let item = UserVariableItem::UserIdentityItem(UserIdentity::new(
            true,
            UserIdentityType::UsernamePassword,
            b"foo".to_vec(),
            b"bar".to_vec(),
        ));
        let bytes = item.encode().unwrap();
        let mut expected = vec![0x58, 0x00, 0x00, 0x0c, 0x02, 0x01, 0x00, 0x03];
        expected.extend_from_slice(b"foo");
        expected.extend_from_slice(&[0x00, 0x03]);
        expected.extend_from_slice(b"bar");
        assert_eq!(bytes, expected);
        assert_eq!(UserVariableItem::decode(&bytes).unwrap(), item);

        let response = UserVariableItem::UserIdentityResponse(b"token".to_vec());
        let bytes = response.encode().unwrap();
        assert_eq!(&bytes[..6], &[0x59, 0x00, 0x00, 0x07, 0x00, 0x05]);
        assert_eq!(UserVariableItem::decode(&bytes).unwrap(), response);
    }

    #[test]
    fn common_extended_negotiation_item() {
        let item = UserVariableItem::SopClassCommonExtendedNegotiation {
            sop_class_uid: "1.2.3".to_string(),
            service_class_uid: "1.2.4".to_string(),
            related_general_sop_class_uids: vec!["1.2.5".to_string(), "1.2.66".to_string()],
        };
        let bytes = item.encode().unwrap();
        assert_eq!(bytes.len(), item.encoded_len());
        assert_eq!(UserVariableItem::decode(&bytes).unwrap(), item);
    }

    #[test]
    fn unknown_sub_items_are_refused() {
        let bytes = [0x5F, 0x00, 0x00, 0x02, 0xAB, 0xCD];
        assert_matches!(
            UserVariableItem::decode(&bytes),
            Err(ReadError::UnexpectedItem {
                context: "User Information",
                item_type: 0x5F,
                ..
            })
        );
    }

    #[test]
    fn proposed_context_requires_syntaxes() {
        // presentation context with no abstract syntax
        let bytes = [
            0x20, 0x00, 0x00, 0x0B, 0x01, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x03, b't', b's',
            b'1',
        ];
        assert_matches!(
            PresentationContextProposed::decode(&bytes),
            Err(ReadError::MissingAbstractSyntax { .. })
        );
    }
}
