//! C-GET request and response.
use dicom_object::InMemDicomObject;

use super::{
    require_data_set, typed_message, validate_request, validate_response, CommandField, Message,
    Priority, Result, SubOperations, empty_data_set,
};

typed_message!(
    /// A C-GET request,
    /// asking the peer to send the matching instances
    /// over the same association.
    CGetRequest,
    CGetRq
);

impl CGetRequest {
    /// Create a request.
    /// Fails if the identifier is empty.
    pub fn new(
        message_id: u16,
        affected_sop_class_uid: impl Into<String>,
        priority: Priority,
        identifier: InMemDicomObject,
    ) -> Result<Self> {
        let mut message = Message::new(CommandField::CGetRq);
        message.set_message_id(message_id);
        message.set_affected_sop_class_uid(affected_sop_class_uid);
        message.set_priority(priority);
        message.set_data_set(Some(identifier));
        Self::validate(&message)?;
        Ok(CGetRequest(message))
    }

    fn validate(message: &Message) -> Result<()> {
        validate_request(message)?;
        message.affected_sop_class_uid()?;
        message.priority()?;
        require_data_set(message, CommandField::CGetRq)
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
    /// A C-GET response, reporting the progress of the sub-operations.
    CGetResponse,
    CGetRsp
);

impl CGetResponse {
    /// Create a response with the given status.
    pub fn new(
        message_id_being_responded_to: u16,
        status: u16,
        sub_operations: SubOperations,
    ) -> Self {
        let mut message = Message::new(CommandField::CGetRsp);
        message.set_message_id_being_responded_to(message_id_being_responded_to);
        message.set_status(status);
        message.set_sub_operations(sub_operations);
        CGetResponse(message)
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
    use crate::message::{Error, StatusClass};
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::{tags, uids};
    use matches::assert_matches;

    #[test]
    fn request_needs_identifier() {
        let mut message = Message::new(CommandField::CGetRq);
        message.set_message_id(3);
        message.set_affected_sop_class_uid(uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET);
        message.set_priority(Priority::Medium);
        assert_matches!(
            CGetRequest::try_from(message.clone()),
            Err(Error::MissingDataSet { .. })
        );

        let identifier = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            dicom_value!(Str, "PAT-1"),
        )]);
        message.set_data_set(Some(identifier.clone()));
        let request = CGetRequest::try_from(message).unwrap();
        assert_eq!(request.identifier(), &identifier);
    }

    #[test]
    fn final_response() {
        let response = CGetResponse::new(
            3,
            0xB000,
            SubOperations {
                remaining: None,
                completed: Some(4),
                failed: Some(1),
                warning: Some(0),
            },
        );
        assert_eq!(response.as_message().status_class().unwrap(), StatusClass::Warning);
        assert_eq!(response.sub_operations().remaining, None);
        assert_eq!(response.sub_operations().failed, Some(1));
    }
}
