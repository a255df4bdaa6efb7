#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use psos::network::mqtt::MqttCodec;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    data: Vec<u8>,
    /// Данные приходят кусками, как из сокета
    chunk: u8,
    max_packet_size: u16,
}

fuzz_target!(|input: FuzzInput| {
    let codec = MqttCodec::with_max_packet_size(usize::from(input.max_packet_size).max(2));
    let chunk = usize::from(input.chunk).max(1);
    let mut buf = BytesMut::new();

    for piece in input.data.chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            let before = buf.len();
            match codec.decode(&mut buf) {
                Ok(Some(packet)) => {
                    // Декодированный пакет должен кодироваться обратно.
                    let mut out = BytesMut::new();
                    codec
                        .encode(&packet, &mut out)
                        .expect("decoded packet must re-encode");
                    assert!(buf.len() < before, "decoder returned a packet without consuming input");
                }
                // При нехватке данных буфер не трогается.
                Ok(None) => {
                    assert_eq!(buf.len(), before);
                    break;
                }
                Err(_) => return,
            }
        }
    }
});
