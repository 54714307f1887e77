#![no_main]
use std::error::Error;

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, bool, &[u8])| {
    let (maxlen, strict, data) = data;
    let _ = fuzz(maxlen, strict, data);
});

fn fuzz(maxlen: u32, strict: bool, mut data: &[u8]) -> Result<(), Box<dyn Error>> {
    // the streaming decoder must agree with the blocking reader
    let mut buffer = BytesMut::from(data);
    let streamed = dimse_ul::pdu::decode_pdu(&mut buffer, maxlen, strict);

    let pdu = dimse_ul::pdu::read_pdu(&mut data, maxlen, strict)?;
    if let Ok(Some(streamed)) = streamed {
        assert_eq!(pdu, streamed, "both decoders should yield the same PDU");
    }

    let bytes = dimse_ul::pdu::encode_pdu(&pdu)?;
    assert_eq!(
        bytes.len() as u32,
        pdu.length() + dimse_ul::pdu::PDU_HEADER_SIZE,
        "computed length should match the encoded length"
    );

    let pdu2 = dimse_ul::pdu::read_pdu(&mut bytes.as_slice(), maxlen, false)
        .expect("serialized pdu should always deserialize");

    assert_eq!(
        pdu, pdu2,
        "pdu should be equal after serializing to/from bytes"
    );

    Ok(())
}
