//! C-ECHO request and response.
use super::{typed_message, validate_request, validate_response, CommandField, Message, Result};

typed_message!(
    /// A C-ECHO request, used to verify the connection to a peer.
    CEchoRequest,
    CEchoRq
);

impl CEchoRequest {
    /// Create a request for the given SOP class,
    /// usually the Verification SOP class.
    pub fn new(message_id: u16, affected_sop_class_uid: impl Into<String>) -> Self {
        let mut message = Message::new(CommandField::CEchoRq);
        message.set_message_id(message_id);
        message.set_affected_sop_class_uid(affected_sop_class_uid);
        CEchoRequest(message)
    }

    fn validate(message: &Message) -> Result<()> {
        validate_request(message)?;
        message.affected_sop_class_uid()?;
        Ok(())
    }

    /// The ID of this request.
    pub fn message_id(&self) -> u16 {
        self.0.message_id().unwrap_or_default()
    }

    /// The SOP class to verify.
    pub fn affected_sop_class_uid(&self) -> String {
        self.0.affected_sop_class_uid().unwrap_or_default()
    }
}

typed_message!(
    /// A C-ECHO response.
    CEchoResponse,
    CEchoRsp
);

impl CEchoResponse {
    /// Create a response with the given status.
    pub fn new(
        message_id_being_responded_to: u16,
        status: u16,
        affected_sop_class_uid: impl Into<String>,
    ) -> Self {
        let mut message = Message::new(CommandField::CEchoRsp);
        message.set_message_id_being_responded_to(message_id_being_responded_to);
        message.set_status(status);
        message.set_affected_sop_class_uid(affected_sop_class_uid);
        CEchoResponse(message)
    }

    /// The successful response to a request.
    pub fn success(request: &CEchoRequest) -> Self {
        Self::new(request.message_id(), 0x0000, request.affected_sop_class_uid())
    }

    fn validate(message: &Message) -> Result<()> {
        validate_response(message)?;
        message.affected_sop_class_uid()?;
        Ok(())
    }

    /// The ID of the request being answered.
    pub fn message_id_being_responded_to(&self) -> u16 {
        self.0.message_id_being_responded_to().unwrap_or_default()
    }

    /// The status code, `0x0000` on success.
    pub fn status(&self) -> u16 {
        self.0.status().unwrap_or_default()
    }

    /// The SOP class which was verified.
    pub fn affected_sop_class_uid(&self) -> String {
        self.0.affected_sop_class_uid().unwrap_or_default()
    }
}
