//! C-FIND request and response.
use dicom_object::InMemDicomObject;

use super::{
    require_data_set, typed_message, validate_request, validate_response, CommandField, Message,
    Priority, Result, empty_data_set,
};

typed_message!(
    /// A C-FIND request, carrying the query identifier.
    CFindRequest,
    CFindRq
);

impl CFindRequest {
    /// Create a request.
    /// Fails if the identifier is empty.
    pub fn new(
        message_id: u16,
        affected_sop_class_uid: impl Into<String>,
        priority: Priority,
        identifier: InMemDicomObject,
    ) -> Result<Self> {
        let mut message = Message::new(CommandField::CFindRq);
        message.set_message_id(message_id);
        message.set_affected_sop_class_uid(affected_sop_class_uid);
        message.set_priority(priority);
        message.set_data_set(Some(identifier));
        Self::validate(&message)?;
        Ok(CFindRequest(message))
    }

    fn validate(message: &Message) -> Result<()> {
        validate_request(message)?;
        message.affected_sop_class_uid()?;
        message.priority()?;
        require_data_set(message, CommandField::CFindRq)
    }

    /// The ID of this request.
    pub fn message_id(&self) -> u16 {
        self.0.message_id().unwrap_or_default()
    }

    /// The SOP class of the request.
    pub fn affected_sop_class_uid(&self) -> String {
        self.0.affected_sop_class_uid().unwrap_or_default()
    }

    /// The priority of the request.
    pub fn priority(&self) -> Priority {
        self.0.priority().unwrap_or_default()
    }

    /// The identifier of the matching keys.
    pub fn identifier(&self) -> &InMemDicomObject {
        self.0.data_set().unwrap_or_else(|| empty_data_set())
    }
}

typed_message!(
    /// A C-FIND response.
    /// Pending responses carry a matching identifier.
    CFindResponse,
    CFindRsp
);

impl CFindResponse {
    /// Create a response with the given status.
    pub fn new(
        message_id_being_responded_to: u16,
        status: u16,
        identifier: Option<InMemDicomObject>,
    ) -> Self {
        let mut message = Message::new(CommandField::CFindRsp);
        message.set_message_id_being_responded_to(message_id_being_responded_to);
        message.set_status(status);
        message.set_data_set(identifier);
        CFindResponse(message)
    }

    /// Name the SOP class of the operation.
    pub fn with_affected_sop_class_uid(mut self, uid: impl Into<String>) -> Self {
        self.0.set_affected_sop_class_uid(uid);
        self
    }

    fn validate(message: &Message) -> Result<()> {
        validate_response(message)
    }

    /// The ID of the request being answered.
    pub fn message_id_being_responded_to(&self) -> u16 {
        self.0.message_id_being_responded_to().unwrap_or_default()
    }

    /// The status code of the response.
    pub fn status(&self) -> u16 {
        self.0.status().unwrap_or_default()
    }

    /// The SOP class of the operation, if the response names it.
    pub fn affected_sop_class_uid(&self) -> Option<String> {
        self.0.affected_sop_class_uid().ok()
    }

    /// The matching identifier of a pending response.
    pub fn identifier(&self) -> Option<&InMemDicomObject> {
        self.0.data_set()
    }
}
