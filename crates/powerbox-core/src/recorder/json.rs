//! Streaming JSON writer for session files.
//!
//! Builders append to a `String` and own their comma state. Dropping a
//! builder writes its closing bracket, so a scope that completes always
//! leaves balanced output.

use alloc::string::String;
use core::fmt::Write;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Close {
    Brace,
    Open,
}

/// Writer for the fields of one JSON object.
pub struct ObjectWriter<'a> {
    out: &'a mut String,
    first: bool,
    close: Close,
}

impl<'a> ObjectWriter<'a> {
    /// `{ ... }`, closed on drop.
    pub fn new(out: &'a mut String) -> Self {
        out.push('{');
        Self {
            out,
            first: true,
            close: Close::Brace,
        }
    }

    /// Opens an object that stays open after this writer is dropped. Used
    /// for a session head whose body is appended over many ticks.
    pub fn unterminated(out: &'a mut String) -> Self {
        out.push('{');
        Self {
            out,
            first: true,
            close: Close::Open,
        }
    }

    /// Appends fields to an object opened earlier by [`Self::unterminated`]
    /// and closes it on drop.
    pub fn continuation(out: &'a mut String) -> Self {
        Self {
            out,
            first: false,
            close: Close::Brace,
        }
    }

    /// Write the separator and `"key":`.
    pub fn key(&mut self, key: &str) -> &mut String {
        if !self.first {
            self.out.push(',');
        }
        self.first = false;
        push_str_literal(self.out, key);
        self.out.push(':');
        &mut *self.out
    }

    pub fn str(&mut self, key: &str, value: &str) -> &mut Self {
        let out = self.key(key);
        push_str_literal(out, value);
        self
    }

    pub fn int(&mut self, key: &str, value: i64) -> &mut Self {
        let out = self.key(key);
        let _ = write!(out, "{}", value);
        self
    }

    pub fn uint(&mut self, key: &str, value: u64) -> &mut Self {
        let out = self.key(key);
        let _ = write!(out, "{}", value);
        self
    }

    /// Four decimals; non-finite values are written as `null`.
    pub fn float(&mut self, key: &str, value: f32) -> &mut Self {
        let out = self.key(key);
        push_float(out, value);
        self
    }

    pub fn bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.key(key).push_str(if value { "true" } else { "false" });
        self
    }

    /// `1` or `0`.
    pub fn flag(&mut self, key: &str, value: bool) -> &mut Self {
        self.key(key).push(if value { '1' } else { '0' });
        self
    }

    pub fn null(&mut self, key: &str) -> &mut Self {
        self.key(key).push_str("null");
        self
    }

    pub fn object(&mut self, key: &str) -> ObjectWriter<'_> {
        ObjectWriter::new(self.key(key))
    }

    pub fn array(&mut self, key: &str) -> ArrayWriter<'_> {
        ArrayWriter::new(self.key(key))
    }
}

impl Drop for ObjectWriter<'_> {
    fn drop(&mut self) {
        if self.close == Close::Brace {
            self.out.push('}');
        }
    }
}

/// Writer for the elements of a JSON array, closed on drop.
pub struct ArrayWriter<'a> {
    out: &'a mut String,
    first: bool,
}

impl<'a> ArrayWriter<'a> {
    pub fn new(out: &'a mut String) -> Self {
        out.push('[');
        Self { out, first: true }
    }

    fn separate(&mut self) -> &mut String {
        if !self.first {
            self.out.push(',');
        }
        self.first = false;
        &mut *self.out
    }

    pub fn object(&mut self) -> ObjectWriter<'_> {
        ObjectWriter::new(self.separate())
    }
}

impl Drop for ArrayWriter<'_> {
    fn drop(&mut self) {
        self.out.push(']');
    }
}

pub(crate) fn push_float(out: &mut String, value: f32) {
    if value.is_finite() {
        let _ = write!(out, "{:.4}", value);
    } else {
        out.push_str("null");
    }
}

fn push_str_literal(out: &mut String, value: &str) {
    match serde_json::to_string(value) {
        Ok(literal) => out.push_str(&literal),
        Err(_) => out.push_str("null"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_builders_close_in_order() {
        let mut out = String::new();
        {
            let mut obj = ObjectWriter::new(&mut out);
            obj.str("name", "GSE-1").flag("on", true);
            {
                let mut devices = obj.array("devices");
                devices.object().int("t", -5);
                devices.object().float("v", 1.5);
            }
            obj.null("extra");
        }
        assert_eq!(
            out,
            r#"{"name":"GSE-1","on":1,"devices":[{"t":-5},{"v":1.5000}],"extra":null}"#
        );
    }

    #[test]
    fn test_head_and_continuation() {
        let mut out = String::new();
        ObjectWriter::unterminated(&mut out).flag("using_script", false);
        out.push_str(",\"data\":[]");
        ObjectWriter::continuation(&mut out).uint("duration_sec", 15);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["duration_sec"], 15);
    }

    #[test]
    fn test_escapes_and_non_finite() {
        let mut out = String::new();
        ObjectWriter::new(&mut out)
            .str("s", "a\"b\\c\n")
            .float("nan", f32::NAN);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["s"], "a\"b\\c\n");
        assert!(out.contains(r#""a\"b\\c\n""#), "escaped in place: {}", out);
        assert!(value["nan"].is_null());
    }
}
