use super::{be_u16, check_first_payload, HeuristicClassifier};
use crate::flow::Flow;
use crate::packet::TransportKind;
use crate::protocol::Protocol;

const HEADER_LEN: usize = 12;
const MAX_POINTER_JUMPS: usize = 255;
const MAX_NAME_LEN: usize = 255;

const TYPE_A: u16 = 1;
const TYPE_NS: u16 = 2;
const TYPE_CNAME: u16 = 5;
const TYPE_SOA: u16 = 6;
const TYPE_PTR: u16 = 12;
const TYPE_MX: u16 = 15;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;

/// Detects a well-formed DNS message in the first UDP payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsClassifier;

impl HeuristicClassifier for DnsClassifier {
    fn protocol(&self) -> Protocol {
        Protocol::Dns
    }

    fn detects(&self, flow: &Flow) -> bool {
        check_first_payload(&flow.packets(), TransportKind::Udp, |payload, _| {
            parse_message(payload).is_some()
        })
    }
}

/// Section counts of a message that decoded cleanly.
#[derive(Debug, PartialEq, Eq)]
struct MessageShape {
    questions: u16,
    records: u32,
}

fn parse_message(msg: &[u8]) -> Option<MessageShape> {
    if msg.len() < HEADER_LEN {
        return None;
    }
    let questions = be_u16(msg, 4)?;
    let records = [6, 8, 10]
        .iter()
        .map(|at| be_u16(msg, *at).map(u32::from))
        .sum::<Option<u32>>()?;

    let mut offset = HEADER_LEN;
    for _ in 0..questions {
        offset = skip_name(msg, offset)?;
        // qtype, qclass
        offset = checked_advance(msg, offset, 4)?;
    }
    for _ in 0..records {
        offset = skip_record(msg, offset)?;
    }
    Some(MessageShape { questions, records })
}

fn checked_advance(msg: &[u8], offset: usize, len: usize) -> Option<usize> {
    let end = offset.checked_add(len)?;
    (end <= msg.len()).then_some(end)
}

/// Validates a possibly compressed name and returns the offset after it.
fn skip_name(msg: &[u8], start: usize) -> Option<usize> {
    let mut offset = start;
    let mut resume_at = None;
    let mut jumps = 0;
    let mut name_len = 0;

    loop {
        let len = *msg.get(offset)?;
        match len & 0xC0 {
            0x00 if len == 0 => {
                return Some(resume_at.unwrap_or(offset + 1));
            }
            0x00 => {
                let label_end = checked_advance(msg, offset + 1, usize::from(len))?;
                name_len += usize::from(len) + 1;
                if name_len > MAX_NAME_LEN {
                    return None;
                }
                offset = label_end;
            }
            0xC0 => {
                let pointer = usize::from(be_u16(msg, offset)? & 0x3FFF);
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS || pointer >= msg.len() {
                    return None;
                }
                resume_at.get_or_insert(offset + 2);
                offset = pointer;
            }
            // 0x40 and 0x80 label types are reserved
            _ => return None,
        }
    }
}

fn skip_record(msg: &[u8], start: usize) -> Option<usize> {
    let offset = skip_name(msg, start)?;
    let rtype = be_u16(msg, offset)?;
    let rdlength = usize::from(be_u16(msg, offset + 8)?);
    let data_start = checked_advance(msg, offset, 10)?;
    let data_end = checked_advance(msg, data_start, rdlength)?;

    let data_ok = match rtype {
        TYPE_A => rdlength == 4,
        TYPE_AAAA => rdlength == 16,
        TYPE_NS | TYPE_CNAME | TYPE_PTR => {
            skip_name(msg, data_start).is_some_and(|end| end <= data_end)
        }
        TYPE_MX => skip_name(msg, data_start + 2).is_some_and(|end| end <= data_end),
        TYPE_SRV => skip_name(msg, data_start + 6).is_some_and(|end| end <= data_end),
        TYPE_SOA => skip_name(msg, data_start)
            .and_then(|end| skip_name(msg, end))
            .is_some_and(|end| end + 20 <= data_end),
        _ => true,
    };
    data_ok.then_some(data_end)
}
