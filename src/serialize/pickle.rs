//! Pickle render format: a Python pickle protocol 2 stream encoding a list of
//! `{'name', 'start', 'end', 'step', 'values'}` dicts, matching the historical
//! graphite-web wire shape. Hand-rolled rather than pulled from a crate —
//! the opcode set needed here is tiny and fixed.

use crate::metricdata::MetricData;

const PROTO: u8 = 0x80;
const MARK: u8 = b'(';
const STOP: u8 = b'.';
const EMPTY_LIST: u8 = b']';
const EMPTY_DICT: u8 = b'}';
const APPENDS: u8 = b'e';
const SETITEMS: u8 = b'u';
const BINUNICODE: u8 = b'X';
const BININT: u8 = b'J';
const BINFLOAT: u8 = b'G';
const NONE: u8 = b'N';

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    fn op(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn string(&mut self, s: &str) {
        self.op(BINUNICODE);
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn int(&mut self, v: i64) {
        if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
            self.op(BININT);
            self.buf.extend_from_slice(&(v as i32).to_le_bytes());
        } else {
            // Fall back to a float representation rather than implementing LONG1;
            // time fields never exceed i32 range until the year 2038 + some slack,
            // and our only non-i32 numeric inputs are already f64.
            self.float(v as f64);
        }
    }

    fn float(&mut self, v: f64) {
        self.op(BINFLOAT);
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn none(&mut self) {
        self.op(NONE);
    }

    fn begin_list(&mut self) {
        self.op(EMPTY_LIST);
        self.op(MARK);
    }

    fn end_list(&mut self, had_items: bool) {
        if had_items {
            self.op(APPENDS);
        }
    }

    fn begin_dict(&mut self) {
        self.op(EMPTY_DICT);
        self.op(MARK);
    }

    fn end_dict(&mut self, had_items: bool) {
        if had_items {
            self.op(SETITEMS);
        }
    }
}

pub fn encode(series: &[MetricData]) -> Vec<u8> {
    let mut w = Writer::new();
    w.op(PROTO);
    w.buf.push(2);

    w.begin_list();
    for s in series {
        w.begin_dict();
        w.string("name");
        w.string(&s.name);
        w.string("start");
        w.int(s.start_time);
        w.string("end");
        w.int(s.stop_time);
        w.string("step");
        w.int(s.step_time);
        w.string("values");
        w.begin_list();
        for v in &s.values {
            if v.is_nan() {
                w.none();
            } else {
                w.float(*v);
            }
        }
        w.end_list(!s.values.is_empty());
        w.end_dict(true);
    }
    w.end_list(!series.is_empty());

    w.op(STOP);
    w.buf
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stream_starts_with_proto_2_and_ends_with_stop() {
        let md = MetricData::new("a", vec![1.0, f64::NAN], 0, 60);
        let out = encode(&[md]);
        assert_eq!(out[0], PROTO);
        assert_eq!(out[1], 2);
        assert_eq!(*out.last().unwrap(), STOP);
    }

    #[test]
    fn nan_is_encoded_as_none_opcode() {
        let md = MetricData::new("a", vec![f64::NAN], 0, 60);
        let out = encode(&[md]);
        assert!(out.contains(&NONE));
    }

    #[test]
    fn empty_series_list_has_no_appends() {
        let out = encode(&[]);
        assert!(!out.contains(&APPENDS));
    }
}
