use super::{sig, ClientMessage, ServerMessage};
use crate::error::GraphError;
use crate::packstream::Unpacker;
use crate::types::Fields;

/// Splits a message into its signature and a reader over its fields.
fn open(data: &[u8], name: fn(u8) -> Option<&'static str>) -> Result<(u8, Fields), GraphError> {
    let mut buf = data;
    let mut unpacker = Unpacker::new(&mut buf);
    let (signature, count) = unpacker.struct_header()?;
    let name = name(signature).ok_or_else(|| {
        GraphError::Protocol(format!("unknown message signature 0x{signature:02X}"))
    })?;
    let fields = unpacker.values(count)?;
    Ok((signature, Fields::new(name, fields)))
}

fn client_name(signature: u8) -> Option<&'static str> {
    Some(match signature {
        sig::HELLO => "HELLO",
        sig::LOGON => "LOGON",
        sig::GOODBYE => "GOODBYE",
        sig::RESET => "RESET",
        sig::RUN => "RUN",
        sig::PULL => "PULL",
        sig::DISCARD => "DISCARD",
        sig::BEGIN => "BEGIN",
        sig::COMMIT => "COMMIT",
        sig::ROLLBACK => "ROLLBACK",
        _ => return None,
    })
}

fn server_name(signature: u8) -> Option<&'static str> {
    Some(match signature {
        sig::SUCCESS => "SUCCESS",
        sig::RECORD => "RECORD",
        sig::FAILURE => "FAILURE",
        sig::IGNORED => "IGNORED",
        _ => return None,
    })
}

/// Decodes a request. Only stub servers in tests read these.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, GraphError> {
    let (signature, mut fields) = open(data, client_name)?;
    Ok(match signature {
        sig::HELLO => ClientMessage::Hello { extra: fields.next()? },
        sig::LOGON => ClientMessage::Logon { auth: fields.next()? },
        sig::RUN => ClientMessage::Run {
            query: fields.next()?,
            parameters: fields.next()?,
            extra: fields.next()?,
        },
        sig::PULL => ClientMessage::Pull { extra: fields.next()? },
        sig::DISCARD => ClientMessage::Discard { extra: fields.next()? },
        sig::BEGIN => ClientMessage::Begin { extra: fields.next()? },
        sig::GOODBYE => ClientMessage::Goodbye,
        sig::RESET => ClientMessage::Reset,
        sig::COMMIT => ClientMessage::Commit,
        _ => ClientMessage::Rollback,
    })
}

pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, GraphError> {
    let (signature, mut fields) = open(data, server_name)?;
    Ok(match signature {
        sig::SUCCESS => ServerMessage::Success { metadata: fields.next()? },
        sig::RECORD => ServerMessage::Record { data: fields.next()? },
        sig::FAILURE => ServerMessage::Failure { metadata: fields.next()? },
        _ => ServerMessage::Ignored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::encode::{encode_client_message, encode_server_message};
    use crate::types::{BoltDict, BoltValue};
    use bytes::BytesMut;

    #[test]
    fn decodes_streaming_success() {
        let mut bytes = vec![0xB1, sig::SUCCESS, 0xA1, 0x88];
        bytes.extend_from_slice(b"has_more");
        bytes.push(0xC3);
        let msg = decode_server_message(&bytes).unwrap();
        assert_eq!(msg, ServerMessage::success_with("has_more", true));
    }

    #[test]
    fn decodes_ignored_without_fields() {
        let msg = decode_server_message(&[0xB0, sig::IGNORED]).unwrap();
        assert_eq!(msg, ServerMessage::Ignored);
        assert!(msg.is_summary());
    }

    #[test]
    fn record_requires_a_list() {
        let err = decode_server_message(&[0xB1, sig::RECORD, 0x01]).unwrap_err();
        assert_eq!(err.to_string(), "protocol error: RECORD has a mistyped field 0");
        let err = decode_server_message(&[0xB0, sig::SUCCESS]).unwrap_err();
        assert!(err.to_string().contains("SUCCESS is missing field 0"));
    }

    #[test]
    fn unknown_signature_is_rejected() {
        let err = decode_server_message(&[0xB0, 0x55]).unwrap_err();
        assert!(err.to_string().contains("0x55"));
        assert!(decode_server_message(&[]).is_err());
        assert!(decode_server_message(&[0x01]).is_err());
    }

    #[test]
    fn addressed_pull_and_discard_keep_their_qid() {
        for msg in [ClientMessage::pull(100, 2), ClientMessage::discard(2)] {
            let mut buf = BytesMut::new();
            encode_client_message(&mut buf, &msg);
            let decoded = decode_client_message(&buf).unwrap();
            let (ClientMessage::Pull { extra } | ClientMessage::Discard { extra }) = &decoded
            else {
                panic!("unexpected message {decoded:?}");
            };
            assert_eq!(extra.get("qid"), Some(&BoltValue::Integer(2)));
        }
    }

    #[test]
    fn failure_keeps_code_and_message() {
        let msg = ServerMessage::failure("Neo.ClientError.Statement.SyntaxError", "bad query");
        let mut buf = BytesMut::new();
        encode_server_message(&mut buf, &msg);
        assert_eq!(decode_server_message(&buf).unwrap(), msg);
    }

    #[test]
    fn run_request_decodes_for_stub_peers() {
        let msg = ClientMessage::Run {
            query: "RETURN 1".into(),
            parameters: BoltDict::new(),
            extra: BoltDict::from([("db".to_string(), BoltValue::from("neo4j"))]),
        };
        let mut buf = BytesMut::new();
        encode_client_message(&mut buf, &msg);
        assert_eq!(decode_client_message(&buf).unwrap(), msg);
    }
}
