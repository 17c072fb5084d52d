//! Messages are PackStream structures whose tag is the message signature.

use bytes::BytesMut;

use super::{sig, ClientMessage, ServerMessage};
use crate::packstream::Pack;

pub fn encode_client_message(buf: &mut BytesMut, msg: &ClientMessage) {
    use ClientMessage::*;
    match msg {
        Hello { extra } => one_dict(buf, sig::HELLO, extra),
        Logon { auth } => one_dict(buf, sig::LOGON, auth),
        Pull { extra } => one_dict(buf, sig::PULL, extra),
        Discard { extra } => one_dict(buf, sig::DISCARD, extra),
        Begin { extra } => one_dict(buf, sig::BEGIN, extra),
        Run {
            query,
            parameters,
            extra,
        } => {
            buf.pack_struct_header(sig::RUN, 3);
            buf.pack_str(query);
            buf.pack_dict(parameters);
            buf.pack_dict(extra);
        }
        Goodbye => buf.pack_struct_header(sig::GOODBYE, 0),
        Reset => buf.pack_struct_header(sig::RESET, 0),
        Commit => buf.pack_struct_header(sig::COMMIT, 0),
        Rollback => buf.pack_struct_header(sig::ROLLBACK, 0),
    }
}

pub fn encode_server_message(buf: &mut BytesMut, msg: &ServerMessage) {
    match msg {
        ServerMessage::Success { metadata } => one_dict(buf, sig::SUCCESS, metadata),
        ServerMessage::Failure { metadata } => one_dict(buf, sig::FAILURE, metadata),
        ServerMessage::Record { data } => {
            buf.pack_struct_header(sig::RECORD, 1);
            buf.pack_list(data);
        }
        ServerMessage::Ignored => buf.pack_struct_header(sig::IGNORED, 0),
    }
}

fn one_dict(buf: &mut BytesMut, signature: u8, dict: &crate::types::BoltDict) {
    buf.pack_struct_header(signature, 1);
    buf.pack_dict(dict);
}
