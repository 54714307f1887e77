//! C-MOVE request and response.
use dicom_object::InMemDicomObject;

use super::{
    require_data_set, typed_message, validate_request, validate_response, CommandField, Message,
    Priority, Result, SubOperations, empty_data_set,
};

typed_message!(
    /// A C-MOVE request,
    /// asking the peer to send the matching instances to another node.
    CMoveRequest,
    CMoveRq
);

impl CMoveRequest {
    /// Create a request.
    /// Fails if the identifier is empty.
    pub fn new(
        message_id: u16,
        affected_sop_class_uid: impl Into<String>,
        priority: Priority,
        move_destination: impl Into<String>,
        identifier: InMemDicomObject,
    ) -> Result<Self> {
        let mut message = Message::new(CommandField::CMoveRq);
        message.set_message_id(message_id);
        message.set_affected_sop_class_uid(affected_sop_class_uid);
        message.set_priority(priority);
        message.set_move_destination(move_destination);
        message.set_data_set(Some(identifier));
        Self::validate(&message)?;
        Ok(CMoveRequest(message))
    }

    fn validate(message: &Message) -> Result<()> {
        validate_request(message)?;
        message.affected_sop_class_uid()?;
        message.priority()?;
        message.move_destination()?;
        require_data_set(message, CommandField::CMoveRq)
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

    /// The AE title of the node which should receive the instances.
    pub fn move_destination(&self) -> String {
        self.0.move_destination().unwrap_or_default()
    }

    /// The identifier of the matching keys.
    pub fn identifier(&self) -> &InMemDicomObject {
        self.0.data_set().unwrap_or_else(|| empty_data_set())
    }
}

typed_message!(
    /// A C-MOVE response, reporting the progress of the sub-operations.
    CMoveResponse,
    CMoveRsp
);

impl CMoveResponse {
    /// Create a response with the given status.
    pub fn new(
        message_id_being_responded_to: u16,
        status: u16,
        sub_operations: SubOperations,
    ) -> Self {
        let mut message = Message::new(CommandField::CMoveRsp);
        message.set_message_id_being_responded_to(message_id_being_responded_to);
        message.set_status(status);
        message.set_sub_operations(sub_operations);
        CMoveResponse(message)
    }

    /// Name the SOP class of the operation.
    pub fn with_affected_sop_class_uid(mut self, uid: impl Into<String>) -> Self {
        self.0.set_affected_sop_class_uid(uid);
        self
    }

    /// Attach a data set, such as the list of failed instances.
    pub fn with_data_set(mut self, data_set: InMemDicomObject) -> Self {
        self.0.set_data_set(Some(data_set));
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

    /// The sub-operation counters present in the response.
    pub fn sub_operations(&self) -> SubOperations {
        self.0.sub_operations()
    }

    /// The data set attached to the response, if any.
    pub fn data_set(&self) -> Option<&InMemDicomObject> {
        self.0.data_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Error;
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::{tags, uids};
    use matches::assert_matches;

    fn identifier() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, dicom_value!(Str, "STUDY")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, dicom_value!(Str, "1.2.3.4")),
        ])
    }

    #[test]
    fn move_destination_is_mandatory() {
        let mut message = Message::new(CommandField::CMoveRq);
        message.set_message_id(2);
        message.set_affected_sop_class_uid(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE);
        message.set_priority(Priority::Low);
        message.set_data_set(Some(identifier()));
        assert_matches!(
            CMoveRequest::try_from(message.clone()),
            Err(Error::MissingField {
                keyword: "MoveDestination",
                ..
            })
        );
        message.set_move_destination("STORE-SCP");
        let request = CMoveRequest::try_from(message).unwrap();
        assert_eq!(request.move_destination(), "STORE-SCP");
        assert_eq!(request.priority(), Priority::Low);
    }

    #[test]
    fn empty_identifier_is_refused() {
        let result = CMoveRequest::new(
            1,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            Priority::Medium,
            "STORE-SCP",
            InMemDicomObject::new_empty(),
        );
        assert_matches!(result, Err(Error::MissingDataSet { .. }));
    }

    #[test]
    fn response_counters() {
        let counters = SubOperations {
            remaining: Some(2),
            completed: Some(8),
            failed: Some(0),
            warning: Some(0),
        };
        let response = CMoveResponse::new(1, 0xFF00, counters);
        let response = CMoveResponse::try_from(Message::from(response)).unwrap();
        assert_eq!(response.sub_operations(), counters);
        assert_eq!(response.data_set(), None);
    }
}
