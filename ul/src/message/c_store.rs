//! C-STORE request and response.
use dicom_object::InMemDicomObject;

use super::{
    require_data_set, typed_message, validate_request, validate_response, CommandField, Message,
    Priority, Result, empty_data_set,
};

typed_message!(
    /// A C-STORE request, carrying one composite instance.
    CStoreRequest,
    CStoreRq
);

impl CStoreRequest {
    /// Create a request.
    /// Fails if the data set is empty.
    pub fn new(
        message_id: u16,
        affected_sop_class_uid: impl Into<String>,
        affected_sop_instance_uid: impl Into<String>,
        priority: Priority,
        data_set: InMemDicomObject,
    ) -> Result<Self> {
        let mut message = Message::new(CommandField::CStoreRq);
        message.set_message_id(message_id);
        message.set_affected_sop_class_uid(affected_sop_class_uid);
        message.set_affected_sop_instance_uid(affected_sop_instance_uid);
        message.set_priority(priority);
        message.set_data_set(Some(data_set));
        Self::validate(&message)?;
        Ok(CStoreRequest(message))
    }

    /// Identify the C-MOVE operation which triggered this request.
    pub fn with_move_originator(mut self, ae_title: impl Into<String>, message_id: u16) -> Self {
        self.0.set_move_originator_ae_title(ae_title);
        self.0.set_move_originator_message_id(message_id);
        self
    }

    fn validate(message: &Message) -> Result<()> {
        validate_request(message)?;
        message.affected_sop_class_uid()?;
        message.affected_sop_instance_uid()?;
        message.priority()?;
        require_data_set(message, CommandField::CStoreRq)
    }

    /// The ID of this request.
    pub fn message_id(&self) -> u16 {
        self.0.message_id().unwrap_or_default()
    }

    /// The SOP class of the request.
    pub fn affected_sop_class_uid(&self) -> String {
        self.0.affected_sop_class_uid().unwrap_or_default()
    }

    /// The SOP instance carried by the request.
    pub fn affected_sop_instance_uid(&self) -> String {
        self.0.affected_sop_instance_uid().unwrap_or_default()
    }

    /// The priority of the request.
    pub fn priority(&self) -> Priority {
        self.0.priority().unwrap_or_default()
    }

    /// The AE title of the C-MOVE requester which triggered this request.
    pub fn move_originator_ae_title(&self) -> Option<String> {
        self.0.move_originator_ae_title().ok()
    }

    /// The message ID of the C-MOVE request which triggered this request.
    pub fn move_originator_message_id(&self) -> Option<u16> {
        self.0.move_originator_message_id().ok()
    }

    /// The composite instance to store.
    pub fn data_set(&self) -> &InMemDicomObject {
        self.0.data_set().unwrap_or_else(|| empty_data_set())
    }
}

typed_message!(
    /// A C-STORE response.
    CStoreResponse,
    CStoreRsp
);

impl CStoreResponse {
    /// Create a response with the given status.
    pub fn new(message_id_being_responded_to: u16, status: u16) -> Self {
        let mut message = Message::new(CommandField::CStoreRsp);
        message.set_message_id_being_responded_to(message_id_being_responded_to);
        message.set_status(status);
        CStoreResponse(message)
    }

    /// The response to a request, echoing its SOP class and instance.
    pub fn for_request(request: &CStoreRequest, status: u16) -> Self {
        let mut response = Self::new(request.message_id(), status);
        response
            .0
            .set_affected_sop_class_uid(request.affected_sop_class_uid());
        response
            .0
            .set_affected_sop_instance_uid(request.affected_sop_instance_uid());
        response
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

    /// The SOP instance which was stored, if the response names it.
    pub fn affected_sop_instance_uid(&self) -> Option<String> {
        self.0.affected_sop_instance_uid().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Error;
    use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::{tags, uids};
    use matches::assert_matches;

    fn instance() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, uids::CT_IMAGE_STORAGE),
            ),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, "1.2.3.4.5")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2_u16)),
        ])
    }

    #[test]
    fn store_request_and_response() {
        let request = CStoreRequest::new(
            9,
            uids::CT_IMAGE_STORAGE,
            "1.2.3.4.5",
            Priority::Medium,
            instance(),
        )
        .unwrap()
        .with_move_originator("MOVE-SCU", 4);
        let request = CStoreRequest::try_from(Message::from(request)).unwrap();
        assert_eq!(request.move_originator_ae_title(), Some("MOVE-SCU".to_string()));
        assert_eq!(request.move_originator_message_id(), Some(4));
        assert_eq!(request.data_set(), &instance());

        let response = CStoreResponse::for_request(&request, 0x0000);
        assert_eq!(response.message_id_being_responded_to(), 9);
        assert_eq!(response.affected_sop_instance_uid(), Some("1.2.3.4.5".to_string()));
    }

    #[test]
    fn instance_uid_is_mandatory() {
        let mut message = Message::new(CommandField::CStoreRq);
        message.set_message_id(1);
        message.set_affected_sop_class_uid(uids::CT_IMAGE_STORAGE);
        message.set_priority(Priority::Medium);
        message.set_data_set(Some(instance()));
        assert_matches!(
            CStoreRequest::try_from(message),
            Err(Error::MissingField {
                keyword: "AffectedSOPInstanceUID",
                ..
            })
        );
    }
}
