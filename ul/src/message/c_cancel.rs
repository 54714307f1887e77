//! C-CANCEL request.
use super::{typed_message, CommandField, Message, Result};

typed_message!(
    /// A C-CANCEL request,
    /// interrupting a pending C-FIND, C-GET or C-MOVE operation.
    CCancelRequest,
    CCancelRq
);

impl CCancelRequest {
    /// Create a request cancelling the operation with the given message ID.
    pub fn new(message_id_being_responded_to: u16) -> Self {
        let mut message = Message::new(CommandField::CCancelRq);
        message.set_message_id_being_responded_to(message_id_being_responded_to);
        CCancelRequest(message)
    }

    fn validate(message: &Message) -> Result<()> {
        message.message_id_being_responded_to()?;
        Ok(())
    }

    /// The message ID of the operation to cancel.
    pub fn message_id_being_responded_to(&self) -> u16 {
        self.0.message_id_being_responded_to().unwrap_or_default()
    }
}
