//! Flow and packet-out actions.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use std::io::Cursor;

use crate::consts::{OFPAT_OUTPUT, OFP_ACTION_OUTPUT_LEN};
use crate::error::{CodecError, CodecResult};

/// Actions associated with flows and packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Output to a port. `max_len` bounds the bytes sent when the port is
    /// the controller.
    Output { port: u16, max_len: u16 },
}

impl Action {
    /// Output to `port` with `max_len` zero.
    pub fn output(port: u16) -> Self {
        Action::Output { port, max_len: 0 }
    }

    /// Output to `port` carrying whole frames.
    pub fn output_full(port: u16) -> Self {
        Action::Output {
            port,
            max_len: u16::MAX,
        }
    }

    /// Encoded size of this action.
    pub fn encoded_len(&self) -> usize {
        match self {
            Action::Output { .. } => OFP_ACTION_OUTPUT_LEN,
        }
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        match *self {
            Action::Output { port, max_len } => {
                buf.put_u16(OFPAT_OUTPUT);
                buf.put_u16(OFP_ACTION_OUTPUT_LEN as u16);
                buf.put_u16(port);
                buf.put_u16(max_len);
            }
        }
    }

    /// Total encoded size of an action list.
    pub fn list_len(actions: &[Action]) -> usize {
        actions.iter().map(Action::encoded_len).sum()
    }

    /// Parses a packed action list occupying all of `buf`.
    pub fn parse_list(buf: &[u8]) -> CodecResult<Vec<Action>> {
        let mut actions = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            let rest = &buf[offset..];
            CodecError::ensure("action", 4, rest.len())?;
            let mut cur = Cursor::new(rest);
            let action_type = cur.read_u16::<BigEndian>()?;
            let len = usize::from(cur.read_u16::<BigEndian>()?);
            if len < 4 || len % 8 != 0 {
                return Err(CodecError::BadLength {
                    what: "action",
                    length: len,
                });
            }
            CodecError::ensure("action", len, rest.len())?;
            match action_type {
                OFPAT_OUTPUT => {
                    let port = cur.read_u16::<BigEndian>()?;
                    let max_len = cur.read_u16::<BigEndian>()?;
                    actions.push(Action::Output { port, max_len });
                }
                other => return Err(CodecError::UnknownAction(other)),
            }
            offset += len;
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ofpp;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_output_wire_form() {
        let mut buf = Vec::new();
        Action::output_full(2).write(&mut buf);
        assert_eq!(buf, vec![0, 0, 0, 8, 0, 2, 0xff, 0xff]);
    }

    #[test]
    fn test_parse_list() {
        let actions = vec![Action::output(1), Action::output(ofpp::CONTROLLER)];
        let mut buf = Vec::new();
        for a in &actions {
            a.write(&mut buf);
        }
        assert_eq!(Action::list_len(&actions), 16);
        assert_eq!(Action::parse_list(&buf).unwrap(), actions);
    }

    #[test]
    fn test_parse_unknown_action() {
        let buf = [0, 5, 0, 8, 0, 0, 0, 0];
        assert!(matches!(
            Action::parse_list(&buf),
            Err(CodecError::UnknownAction(5))
        ));
    }

    #[test]
    fn test_parse_bad_length() {
        let buf = [0, 0, 0, 6, 0, 1, 0, 0];
        assert!(matches!(
            Action::parse_list(&buf),
            Err(CodecError::BadLength { what: "action", .. })
        ));
    }
}
