//! Fragmentation of messages into P-DATA values and their reassembly.
//!
//! An outgoing message is split into command fragments
//! followed by data set fragments,
//! each small enough to travel in one P-DATA-TF PDU
//! under the peer's maximum PDU length.
//! On the receiving side, a [`Reassembler`] accumulates fragments
//! per presentation context until whole messages are available.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dicom_object::InMemDicomObject;
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use tracing::trace;

use crate::pdu::{PDataValue, PDataValueType};

use super::{decode_command_set, has_data_set};

/// Bytes taken by a P-DATA value item header
/// (item length, presentation context ID and control header).
pub const PDV_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Maximum PDU length {} leaves no room for data", max_pdu_length))]
    MaxPduTooSmall {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Fragment for unknown presentation context {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display(
        "Data set fragment on presentation context {} before a complete command",
        id
    ))]
    DataBeforeCommand { id: u8, backtrace: Backtrace },

    #[snafu(display(
        "Command fragment on presentation context {} while a data set was expected",
        id
    ))]
    CommandBeforeData { id: u8, backtrace: Backtrace },

    #[snafu(display("Invalid command set on presentation context {}", id))]
    DecodeCommand {
        id: u8,
        #[snafu(backtrace)]
        source: super::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Split an encoded message into P-DATA values,
/// each meant to be sent in its own P-DATA-TF PDU.
///
/// `max_pdu_length` is the maximum length the peer accepts,
/// 0 meaning unlimited.
/// Every fragment except the last of each part
/// carries exactly `max_pdu_length - 6` bytes,
/// so the number of fragments is minimal.
pub fn fragment(
    presentation_context_id: u8,
    command: &[u8],
    data: Option<&[u8]>,
    max_pdu_length: u32,
) -> Result<Vec<PDataValue>> {
    let capacity = if max_pdu_length == 0 {
        (u32::MAX - PDV_HEADER_SIZE) as usize
    } else {
        ensure!(
            max_pdu_length > PDV_HEADER_SIZE,
            MaxPduTooSmallSnafu { max_pdu_length }
        );
        (max_pdu_length - PDV_HEADER_SIZE) as usize
    };

    let mut values = Vec::new();
    split_into(
        &mut values,
        presentation_context_id,
        PDataValueType::Command,
        command,
        capacity,
    );
    if let Some(data) = data {
        split_into(
            &mut values,
            presentation_context_id,
            PDataValueType::Data,
            data,
            capacity,
        );
    }
    Ok(values)
}

fn split_into(
    out: &mut Vec<PDataValue>,
    presentation_context_id: u8,
    value_type: PDataValueType,
    bytes: &[u8],
    capacity: usize,
) {
    if bytes.is_empty() {
        out.push(PDataValue {
            presentation_context_id,
            value_type,
            is_last: true,
            data: Vec::new(),
        });
        return;
    }
    let count = fragment_count(bytes.len(), capacity);
    out.extend(
        bytes
            .chunks(capacity)
            .enumerate()
            .map(|(i, chunk)| PDataValue {
                presentation_context_id,
                value_type,
                is_last: i + 1 == count,
                data: chunk.to_vec(),
            }),
    );
}

fn fragment_count(len: usize, capacity: usize) -> usize {
    len / capacity + usize::from(len % capacity != 0)
}

/// A message whose fragments were all received.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledMessage {
    pub presentation_context_id: u8,
    /// the decoded command set
    pub command_set: InMemDicomObject,
    /// the data set bytes, still in the transfer syntax of the context
    pub data: Option<Vec<u8>>,
}

#[derive(Debug)]
enum Pending {
    Command(Vec<u8>),
    Data {
        command_set: InMemDicomObject,
        data: Vec<u8>,
    },
}

/// Reassembles incoming P-DATA values into messages,
/// independently for each presentation context.
///
/// Until [`set_presentation_contexts`](Self::set_presentation_contexts)
/// is called, fragments of any presentation context are accepted.
#[derive(Debug, Default)]
pub struct Reassembler {
    known: Option<BTreeSet<u8>>,
    pending: BTreeMap<u8, Pending>,
    complete: VecDeque<AssembledMessage>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the accepted fragments to these presentation contexts.
    pub fn set_presentation_contexts(&mut self, ids: impl IntoIterator<Item = u8>) {
        self.known = Some(ids.into_iter().collect());
    }

    /// Drop all partially received and unclaimed messages.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.complete.clear();
    }

    /// Whether a message is partially received on any presentation context.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take in one fragment.
    ///
    /// On error, the partial message of that presentation context is dropped.
    pub fn push(&mut self, value: PDataValue) -> Result<()> {
        let id = value.presentation_context_id;
        if let Some(known) = &self.known {
            ensure!(known.contains(&id), UnknownPresentationContextSnafu { id });
        }

        let PDataValue {
            value_type,
            is_last,
            data,
            ..
        } = value;
        trace!(
            "P-DATA fragment: context {}, {:?}, {} bytes, last: {}",
            id,
            value_type,
            data.len(),
            is_last
        );

        match (self.pending.remove(&id), value_type) {
            (None, PDataValueType::Command) => self.push_command(id, data, is_last),
            (Some(Pending::Command(mut buffer)), PDataValueType::Command) => {
                buffer.extend_from_slice(&data);
                self.push_command(id, buffer, is_last)
            }
            (Some(Pending::Data { .. }), PDataValueType::Command) => {
                CommandBeforeDataSnafu { id }.fail()
            }
            (None, PDataValueType::Data) | (Some(Pending::Command(_)), PDataValueType::Data) => {
                DataBeforeCommandSnafu { id }.fail()
            }
            (
                Some(Pending::Data {
                    command_set,
                    data: mut buffer,
                }),
                PDataValueType::Data,
            ) => {
                buffer.extend_from_slice(&data);
                if is_last {
                    self.complete.push_back(AssembledMessage {
                        presentation_context_id: id,
                        command_set,
                        data: Some(buffer),
                    });
                } else {
                    self.pending.insert(
                        id,
                        Pending::Data {
                            command_set,
                            data: buffer,
                        },
                    );
                }
                Ok(())
            }
        }
    }

    fn push_command(&mut self, id: u8, buffer: Vec<u8>, is_last: bool) -> Result<()> {
        if !is_last {
            self.pending.insert(id, Pending::Command(buffer));
            return Ok(());
        }
        let command_set = decode_command_set(&buffer).context(DecodeCommandSnafu { id })?;
        if has_data_set(&command_set) {
            self.pending.insert(
                id,
                Pending::Data {
                    command_set,
                    data: Vec::new(),
                },
            );
        } else {
            self.complete.push_back(AssembledMessage {
                presentation_context_id: id,
                command_set,
                data: None,
            });
        }
        Ok(())
    }

    /// Take the oldest fully received message.
    pub fn next_message(&mut self) -> Option<AssembledMessage> {
        self.complete.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{encode_command_set, CommandField, Message};
    use dicom_dictionary_std::{tags, uids};
    use matches::assert_matches;
    use rstest::rstest;

    fn command(with_data: bool) -> Vec<u8> {
        let mut message = Message::new(CommandField::CStoreRq);
        message.set_message_id(1);
        message.set_affected_sop_class_uid(uids::CT_IMAGE_STORAGE);
        message.set_affected_sop_instance_uid("1.2.3.4");
        if with_data {
            message.set_data_set(Some(InMemDicomObject::new_empty()));
        }
        encode_command_set(message.command_set()).unwrap()
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[rstest]
    #[case(4096, 10_000)]
    #[case(4096, 4090)]
    #[case(4096, 4091)]
    #[case(16384, 1)]
    #[case(0, 100_000)]
    #[case(7, 40)]
    fn fragments_reassemble(#[case] max_pdu_length: u32, #[case] data_len: usize) {
        let command = command(true);
        let data = data(data_len);
        let values = fragment(3, &command, Some(&data), max_pdu_length).unwrap();

        let capacity = match max_pdu_length {
            0 => usize::MAX,
            l => (l - PDV_HEADER_SIZE) as usize,
        };
        let expected = fragment_count(command.len(), capacity) + fragment_count(data_len, capacity);
        assert_eq!(values.len(), expected);
        assert!(values.iter().all(|v| v.data.len() <= capacity));
        assert_eq!(values.iter().filter(|v| v.is_last).count(), 2);

        let mut reassembler = Reassembler::new();
        reassembler.set_presentation_contexts([1, 3]);
        let count = values.len();
        for (i, value) in values.into_iter().enumerate() {
            reassembler.push(value).unwrap();
            if i + 1 < count {
                assert_eq!(reassembler.next_message(), None);
            }
        }
        let message = reassembler.next_message().unwrap();
        assert_eq!(message.presentation_context_id, 3);
        assert_eq!(message.data.as_deref(), Some(&data[..]));
        assert_eq!(
            message
                .command_set
                .element(tags::COMMAND_FIELD)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            CommandField::CStoreRq.code()
        );
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn command_without_data_set_completes_alone() {
        let values = fragment(1, &command(false), None, 16384).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value_type, PDataValueType::Command);

        let mut reassembler = Reassembler::new();
        reassembler.push(values[0].clone()).unwrap();
        let message = reassembler.next_message().unwrap();
        assert_eq!(message.data, None);
    }

    #[test]
    fn interleaved_contexts() {
        let a = fragment(1, &command(true), Some(&data(9000)), 4096).unwrap();
        let b = fragment(3, &command(false), None, 4096).unwrap();
        let mut reassembler = Reassembler::new();
        let mut a = a.into_iter();
        reassembler.push(a.next().unwrap()).unwrap();
        for value in b {
            reassembler.push(value).unwrap();
        }
        assert_eq!(reassembler.next_message().unwrap().presentation_context_id, 3);
        for value in a {
            reassembler.push(value).unwrap();
        }
        let message = reassembler.next_message().unwrap();
        assert_eq!(message.presentation_context_id, 1);
        assert_eq!(message.data.map(|d| d.len()), Some(9000));
    }

    #[test]
    fn data_before_command_is_refused() {
        let mut reassembler = Reassembler::new();
        let value = PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; 4],
        };
        assert_matches!(
            reassembler.push(value),
            Err(Error::DataBeforeCommand { id: 1, .. })
        );
    }

    #[test]
    fn command_while_awaiting_data_is_refused() {
        let mut reassembler = Reassembler::new();
        let values = fragment(1, &command(true), None, 16384).unwrap();
        reassembler.push(values[0].clone()).unwrap();
        assert!(reassembler.is_pending());
        assert_matches!(
            reassembler.push(values[0].clone()),
            Err(Error::CommandBeforeData { id: 1, .. })
        );
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn unknown_context_is_refused() {
        let mut reassembler = Reassembler::new();
        reassembler.set_presentation_contexts([1]);
        let values = fragment(5, &command(false), None, 16384).unwrap();
        assert_matches!(
            reassembler.push(values[0].clone()),
            Err(Error::UnknownPresentationContext { id: 5, .. })
        );
    }

    #[test]
    fn tiny_max_pdu_is_refused() {
        assert_matches!(
            fragment(1, &command(false), None, 6),
            Err(Error::MaxPduTooSmall { max_pdu_length: 6, .. })
        );
    }

    #[test]
    fn empty_data_set_still_has_a_last_fragment() {
        let values = fragment(1, &command(true), Some(&[]), 4096).unwrap();
        assert_eq!(values.len(), 2);
        assert!(values[1].is_last);
        assert!(values[1].data.is_empty());
    }
}
