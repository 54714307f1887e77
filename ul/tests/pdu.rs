use bytes::BytesMut;
use dimse_ul::pdu::reader::Error as ReadError;
use dimse_ul::pdu::{
    decode_pdu, encode_pdu, read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource,
    AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason,
    AssociationRJSource, AssociationRQ, PDataValue, PDataValueType, Pdu,
    PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
    RoleSelection, UserIdentity, UserIdentityType, UserInformation, UserVariableItem,
    DEFAULT_MAX_PDU, MINIMUM_PDU_SIZE,
};
use matches::assert_matches;
use std::io::Cursor;

type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

/// A-ASSOCIATE-RQ from ECHO-SCU to ANY-SCP,
/// proposing Verification in Implicit VR Little Endian
/// with a maximum length of 16384.
#[rustfmt::skip]
static ECHO_ASSOCIATE_RQ: &[u8] = &[
    // PDU type, reserved, length (155)
    0x01, 0x00, 0x00, 0x00, 0x00, 0x9B,
    // protocol version, reserved
    0x00, 0x01, 0x00, 0x00,
    // called AE title
    b'A', b'N', b'Y', b'-', b'S', b'C', b'P', b' ',
    b' ', b' ', b' ', b' ', b' ', b' ', b' ', b' ',
    // calling AE title
    b'E', b'C', b'H', b'O', b'-', b'S', b'C', b'U',
    b' ', b' ', b' ', b' ', b' ', b' ', b' ', b' ',
    // reserved
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    // application context
    0x10, 0x00, 0x00, 0x15,
    b'1', b'.', b'2', b'.', b'8', b'4', b'0', b'.', b'1', b'0', b'0',
    b'0', b'8', b'.', b'3', b'.', b'1', b'.', b'1', b'.', b'1',
    // presentation context 1
    0x20, 0x00, 0x00, 0x2E, 0x01, 0x00, 0x00, 0x00,
    0x30, 0x00, 0x00, 0x11,
    b'1', b'.', b'2', b'.', b'8', b'4', b'0', b'.', b'1',
    b'0', b'0', b'0', b'8', b'.', b'1', b'.', b'1',
    0x40, 0x00, 0x00, 0x11,
    b'1', b'.', b'2', b'.', b'8', b'4', b'0', b'.', b'1',
    b'0', b'0', b'0', b'8', b'.', b'1', b'.', b'2',
    // user information
    0x50, 0x00, 0x00, 0x08,
    0x51, 0x00, 0x00, 0x04, 0x00, 0x00, 0x40, 0x00,
];

fn echo_rq() -> Result<AssociationRQ> {
    let mut rq = AssociationRQ::new()
        .with_application_context("1.2.840.10008.3.1.1.1")
        .with_presentation_contexts(vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: "1.2.840.10008.1.1".to_string(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
        }])
        .with_user_information(UserInformation::from_items(vec![UserVariableItem::MaxLength(
            16384,
        )]));
    rq.set_called_ae_title("ANY-SCP")?;
    rq.set_calling_ae_title("ECHO-SCU")?;
    Ok(rq)
}

#[test]
fn associate_rq_matches_wire_bytes() -> Result {
    let pdu = Pdu::AssociationRQ(echo_rq()?);
    assert_eq!(pdu.length() as usize + 6, ECHO_ASSOCIATE_RQ.len());
    assert_eq!(encode_pdu(&pdu)?, ECHO_ASSOCIATE_RQ);

    let decoded = read_pdu(&mut Cursor::new(ECHO_ASSOCIATE_RQ), DEFAULT_MAX_PDU, true)?;
    assert_eq!(decoded, pdu);
    let Pdu::AssociationRQ(rq) = decoded else {
        panic!("invalid pdu type");
    };
    assert_eq!(rq.protocol_version(), 1);
    assert_eq!(rq.called_ae_title(), "ANY-SCP");
    assert_eq!(rq.calling_ae_title(), "ECHO-SCU");
    assert_eq!(rq.application_context(), Some("1.2.840.10008.3.1.1.1"));
    assert_eq!(rq.user_information().and_then(|u| u.max_length()), Some(16384));
    Ok(())
}

#[test]
fn associate_rq_with_user_identity_wire_layout() -> Result {
    let mut bytes = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x90, 0x00, 0x01, 0x00, 0x00];
    bytes.extend_from_slice(b"CALLED_AE       ");
    bytes.extend_from_slice(b"CALLING_AE      ");
    bytes.extend_from_slice(&[0; 32]);
    bytes.extend_from_slice(b"\x10\x00\x00\x03foo");
    bytes.extend_from_slice(b"\x20\x00\x00\x25\x03\x00\x00\x00");
    bytes.extend_from_slice(b"\x30\x00\x00\x0fabstract_syntax");
    bytes.extend_from_slice(b"\x40\x00\x00\x03ts1\x40\x00\x00\x03ts2");
    bytes.extend_from_slice(b"\x50\x00\x00\x18\x51\x00\x00\x04\x12\x34\x56\x78");
    bytes.extend_from_slice(b"\x58\x00\x00\x0c\x02\x01\x00\x03foo\x00\x03bar");
    assert_eq!(bytes.len(), 150);

    let mut rq = AssociationRQ::new()
        .with_application_context("foo")
        .with_presentation_contexts(vec![PresentationContextProposed {
            id: 3,
            abstract_syntax: "abstract_syntax".to_string(),
            transfer_syntaxes: vec!["ts1".to_string(), "ts2".to_string()],
        }])
        .with_user_information(UserInformation::from_items(vec![
            UserVariableItem::MaxLength(0x12345678),
            UserVariableItem::UserIdentityItem(UserIdentity::new(
                true,
                UserIdentityType::UsernamePassword,
                b"foo".to_vec(),
                b"bar".to_vec(),
            )),
        ]));
    rq.set_called_ae_title("CALLED_AE")?;
    rq.set_calling_ae_title("CALLING_AE")?;

    let pdu = Pdu::AssociationRQ(rq);
    assert_eq!(pdu.length(), 144);
    assert_eq!(encode_pdu(&pdu)?, bytes);
    assert_eq!(read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true)?, pdu);
    Ok(())
}

#[test]
fn can_read_write_associate_rq_with_user_items() -> Result {
    let mut rq = AssociationRQ::new()
        .with_application_context("application context name")
        .with_presentation_contexts(vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "abstract 1".to_string(),
                transfer_syntaxes: vec!["transfer 1".to_string(), "transfer 2".to_string()],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "abstract 2".to_string(),
                transfer_syntaxes: vec!["transfer 3".to_string(), "transfer 4".to_string()],
            },
        ])
        .with_user_information(UserInformation::from_items(vec![
            UserVariableItem::MaxLength(23),
            UserVariableItem::ImplementationClassUID("class uid".to_string()),
            UserVariableItem::AsynchronousOperationsWindow {
                max_operations_invoked: 1,
                max_operations_performed: 1,
            },
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: "abstract 2".to_string(),
                scu_role: false,
                scp_role: true,
            }),
            UserVariableItem::ImplementationVersionName("version name".to_string()),
            UserVariableItem::SopClassExtendedNegotiationSubItem(
                "abstract 1".to_string(),
                vec![1, 1, 0, 1, 1, 0, 1],
            ),
            UserVariableItem::UserIdentityItem(UserIdentity::new(
                true,
                UserIdentityType::UsernamePassword,
                b"MyUsername".to_vec(),
                b"MyPassword".to_vec(),
            )),
        ]));
    rq.set_protocol_version(2);
    rq.set_called_ae_title("called ae")?;
    rq.set_calling_ae_title("calling ae")?;

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &rq.clone().into())?;
    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true)?;

    let Pdu::AssociationRQ(decoded) = result else {
        panic!("invalid pdu type");
    };
    assert_eq!(decoded, rq);
    assert_eq!(decoded.protocol_version(), 2);
    assert_eq!(decoded.called_ae_title(), "called ae");
    assert_eq!(decoded.calling_ae_title(), "calling ae");

    let contexts: Vec<_> = decoded.presentation_contexts().collect();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[1].id, 3);
    assert_eq!(contexts[1].transfer_syntaxes, ["transfer 3", "transfer 4"]);

    let user_information = decoded.user_information().expect("user information");
    assert_eq!(user_information.max_length(), Some(23));
    assert_eq!(user_information.asynchronous_operations_window(), Some((1, 1)));
    let roles: Vec<_> = user_information.role_selections().collect();
    assert_eq!(roles.len(), 1);
    assert!(!roles[0].scu_role && roles[0].scp_role);
    assert!(user_information.items().iter().any(|item| matches!(
        item,
        UserVariableItem::UserIdentityItem(identity)
            if identity.positive_response_requested()
                && identity.identity_type() == UserIdentityType::UsernamePassword
                && identity.primary_field() == b"MyUsername"
                && identity.secondary_field() == b"MyPassword"
    )));
    Ok(())
}

#[test]
fn can_read_write_associate_ac() -> Result {
    let mut ac = AssociationAC::new()
        .with_application_context("1.2.840.10008.3.1.1.1")
        .with_presentation_contexts(vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
        ])
        .with_user_information(UserInformation::from_items(vec![
            UserVariableItem::MaxLength(0),
            UserVariableItem::UserIdentityResponse(b"token".to_vec()),
        ]));
    ac.set_called_ae_title("STORE-SCP")?;
    ac.set_calling_ae_title("STORE-SCU")?;

    let pdu = Pdu::AssociationAC(ac);
    let bytes = encode_pdu(&pdu)?;
    assert_eq!(bytes[0], 0x02);
    let mut buffer = BytesMut::from(&bytes[..]);
    assert_eq!(decode_pdu(&mut buffer, DEFAULT_MAX_PDU, true)?, Some(pdu));
    assert!(buffer.is_empty());
    Ok(())
}

#[test]
fn can_read_write_pdata() -> Result {
    let pdata = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 3,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0, 0, 0, 0],
            },
            PDataValue {
                presentation_context_id: 3,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![0xAB; 5],
            },
        ],
    };

    let bytes = encode_pdu(&pdata)?;
    #[rustfmt::skip]
    let expected: &[u8] = &[
        0x04, 0x00, 0x00, 0x00, 0x00, 0x15,
        0x00, 0x00, 0x00, 0x06, 0x03, 0x03, 0, 0, 0, 0,
        0x00, 0x00, 0x00, 0x07, 0x03, 0x00, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB,
    ];
    assert_eq!(bytes, expected);
    assert_eq!(read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true)?, pdata);
    Ok(())
}

#[test]
fn fixed_size_pdus_on_the_wire() -> Result {
    let rejection = Pdu::AssociationRJ(AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ),
    });
    assert_eq!(
        encode_pdu(&rejection)?,
        [0x03, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x01, 0x01, 0x07]
    );
    assert_eq!(
        encode_pdu(&Pdu::ReleaseRQ)?,
        [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        encode_pdu(&Pdu::ReleaseRP)?,
        [0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
    );
    let abort = Pdu::AbortRQ {
        source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
    };
    let bytes = encode_pdu(&abort)?;
    assert_eq!(bytes, [0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0x02]);

    for pdu in [rejection, Pdu::ReleaseRQ, Pdu::ReleaseRP, abort] {
        let bytes = encode_pdu(&pdu)?;
        assert_eq!(read_pdu(&mut Cursor::new(&bytes), MINIMUM_PDU_SIZE, true)?, pdu);
    }
    Ok(())
}

#[test]
fn partial_buffers_are_left_untouched() -> Result {
    let mut buffer = BytesMut::new();
    for chunk in ECHO_ASSOCIATE_RQ.chunks(40) {
        assert_eq!(decode_pdu(&mut buffer, DEFAULT_MAX_PDU, true)?, None);
        buffer.extend_from_slice(chunk);
    }
    // a second PDU right behind the first one
    buffer.extend_from_slice(&encode_pdu(&Pdu::ReleaseRQ)?);

    let first = decode_pdu(&mut buffer, DEFAULT_MAX_PDU, true)?;
    assert_eq!(first, Some(Pdu::AssociationRQ(echo_rq()?)));
    assert_eq!(decode_pdu(&mut buffer, DEFAULT_MAX_PDU, true)?, Some(Pdu::ReleaseRQ));
    assert_eq!(decode_pdu(&mut buffer, DEFAULT_MAX_PDU, true)?, None);
    Ok(())
}

#[test]
fn oversized_pdu_depends_on_strictness() -> Result {
    let pdata = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; MINIMUM_PDU_SIZE as usize],
        }],
    };
    let bytes = encode_pdu(&pdata)?;

    assert_matches!(
        read_pdu(&mut Cursor::new(&bytes), MINIMUM_PDU_SIZE, true),
        Err(ReadError::PduTooLarge { .. })
    );
    assert_eq!(read_pdu(&mut Cursor::new(&bytes), MINIMUM_PDU_SIZE, false)?, pdata);
    Ok(())
}

#[test]
fn malformed_input() {
    // end of stream before any PDU
    assert_matches!(
        read_pdu(&mut Cursor::new(&[] as &[u8]), DEFAULT_MAX_PDU, true),
        Err(ReadError::NoPduAvailable { .. })
    );
    // maximum length outside of the allowed range
    assert_matches!(
        read_pdu(&mut Cursor::new(ECHO_ASSOCIATE_RQ), 1024, true),
        Err(ReadError::InvalidMaxPdu { .. })
    );

    let unknown = [0x0A, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
    let err = read_pdu(&mut Cursor::new(&unknown), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::UnknownPduType { pdu_type: 0x0A, .. });
    assert_eq!(err.abort_reason(), AbortRQServiceProviderReason::UnrecognizedPdu);

    let bad_abort = [0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0x09];
    let err = read_pdu(&mut Cursor::new(&bad_abort), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_eq!(
        err.abort_reason(),
        AbortRQServiceProviderReason::UnrecognizedPduParameter
    );

    // the declared length runs past the end of the stream
    let truncated = &ECHO_ASSOCIATE_RQ[..100];
    assert_matches!(
        read_pdu(&mut Cursor::new(truncated), DEFAULT_MAX_PDU, true),
        Err(ReadError::ReadPdu { .. })
    );
}

/// Append bytes to the echo request,
/// growing the PDU length and the lengths of the enclosing items.
fn extended_echo_rq(extra: &[u8], user_information: bool) -> Vec<u8> {
    let mut bytes = ECHO_ASSOCIATE_RQ.to_vec();
    let ui = bytes.len() - 12;
    bytes.extend_from_slice(extra);
    let pdu_length = (bytes.len() - 6) as u32;
    bytes[2..6].copy_from_slice(&pdu_length.to_be_bytes());
    if user_information {
        let ui_length = (bytes.len() - ui - 4) as u16;
        bytes[ui + 2..ui + 4].copy_from_slice(&ui_length.to_be_bytes());
    }
    bytes
}

#[test]
fn unknown_items_fail_the_decode() {
    let bytes = extended_echo_rq(&[0x77, 0x00, 0x00, 0x02, 0xAB, 0xCD], false);
    let err = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::UnexpectedItem { item_type: 0x77, .. });
    assert_eq!(
        err.abort_reason(),
        AbortRQServiceProviderReason::UnexpectedPduParameter
    );

    let bytes = extended_echo_rq(&[0x5F, 0x00, 0x00, 0x02, 0xAB, 0xCD], true);
    assert_matches!(
        read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true),
        Err(ReadError::UnexpectedItem {
            item_type: 0x5F,
            ..
        })
    );
    let mut buffer = BytesMut::from(&bytes[..]);
    assert_matches!(
        decode_pdu(&mut buffer, DEFAULT_MAX_PDU, true),
        Err(ReadError::UnexpectedItem {
            item_type: 0x5F,
            ..
        })
    );

    // the same request without the stray item is fine
    let bytes = extended_echo_rq(&[], true);
    assert_eq!(
        read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true).unwrap(),
        Pdu::AssociationRQ(echo_rq().unwrap())
    );
}
