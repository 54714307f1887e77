//! Message exchange over an established association,
//! shared by the blocking and asynchronous drivers.
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::association::session::Session;
use crate::association::{
    DecodeMessageSnafu, EncodeMessageSnafu, FragmentSnafu, NoAcceptedPresentationContextsSnafu,
    ReassembleSnafu, Result, UnknownPresentationContextSnafu,
};
use crate::pdu::PDataValue;

use super::{decode_data_set, encode_command_set, fragment, Message};

impl Session {
    /// Encode a message for the given presentation context
    /// and split it into P-DATA values fit for the peer.
    pub(crate) fn prepare_message(
        &self,
        presentation_context_id: u8,
        message: &Message,
    ) -> Result<Vec<PDataValue>> {
        let negotiated = self
            .negotiated()
            .context(NoAcceptedPresentationContextsSnafu)?;
        let pc = negotiated
            .presentation_context(presentation_context_id)
            .context(UnknownPresentationContextSnafu {
                id: presentation_context_id,
            })?;

        let command = encode_command_set(message.command_set()).context(EncodeMessageSnafu)?;
        let data = message
            .encode_data_set(&pc.transfer_syntax)
            .context(EncodeMessageSnafu)?;
        debug!(
            "Sending message on presentation context {}: {} command bytes, {} data bytes",
            presentation_context_id,
            command.len(),
            data.as_ref().map_or(0, Vec::len)
        );
        fragment::fragment(
            presentation_context_id,
            &command,
            data.as_deref(),
            negotiated.peer_max_pdu_length(),
        )
        .context(FragmentSnafu)
    }

    /// Feed received P-DATA values to the reassembler.
    pub(crate) fn push_pdata(&mut self, values: Vec<PDataValue>) -> Result<()> {
        for value in values {
            self.reassembler.push(value).context(ReassembleSnafu)?;
        }
        Ok(())
    }

    /// Take the next fully received message,
    /// decoding its data set with the transfer syntax of its context.
    pub(crate) fn next_message(&mut self) -> Result<Option<(u8, Message)>> {
        let Some(assembled) = self.reassembler.next_message() else {
            return Ok(None);
        };
        let id = assembled.presentation_context_id;
        let data_set = match assembled.data {
            Some(bytes) => {
                let transfer_syntax = self
                    .negotiated()
                    .and_then(|n| n.presentation_context(id))
                    .map(|pc| pc.transfer_syntax.as_str())
                    .context(UnknownPresentationContextSnafu { id })?;
                let data_set =
                    decode_data_set(transfer_syntax, &bytes).context(DecodeMessageSnafu)?;
                Some(data_set)
            }
            None => None,
        };
        Ok(Some((id, Message::from_parts(assembled.command_set, data_set))))
    }
}
