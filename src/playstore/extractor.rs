//! Positional extraction from the Play Store's nested-array payloads.
//!
//! The same data arrives in two framings: embedded in HTML as
//! `AF_initDataCallback({key: 'ds:N', …})` blocks, and as batchexecute
//! payloads keyed by RPC id. Both are navigated through a [`Block`]
//! opened from an [`Extractor`], so scrapers never see the difference.
//!
//! A failed path records an error and yields a zero value instead of
//! aborting, so one scrape produces a full record plus one report
//! listing every field that failed. Only a missing top-level block is
//! fatal to the enclosing scraper.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Index(usize),
    Wildcard,
}

/// Parse a dotted path such as `"1.2.137.4"` or `"0.12.0.#.3.2"`.
/// `#` projects over every element of the array at that position.
fn parse_path(path: &str) -> Option<Vec<Segment>> {
    path.split('.')
        .map(|segment| {
            if segment == "#" {
                Some(Segment::Wildcard)
            } else {
                segment.parse::<usize>().ok().map(Segment::Index)
            }
        })
        .collect()
}

pub(crate) struct Extractor {
    blocks: HashMap<String, Value>,
    service_request_ids: HashMap<String, String>,
    errors: RefCell<Vec<String>>,
}

impl Extractor {
    pub fn new(blocks: HashMap<String, Value>, service_request_ids: HashMap<String, String>) -> Self {
        Self {
            blocks,
            service_request_ids,
            errors: RefCell::new(Vec::new()),
        }
    }

    /// An extractor over a single batchexecute payload, keyed by its
    /// RPC id.
    pub fn from_rpc_payload(rpc_id: &str, payload: Value) -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(rpc_id.to_string(), payload);
        Self::new(blocks, HashMap::new())
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.errors.borrow_mut().push(message.into());
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.borrow().is_empty()
    }

    /// Open a block by its `ds:N` key or RPC id.
    ///
    /// A missing block is recorded as an error and returns a muted
    /// block: every path on it yields a zero value without piling up
    /// further errors.
    pub fn block(&self, key: &str) -> Block<'_> {
        match self.blocks.get(key) {
            Some(data) => Block {
                data: Some(data),
                label: Some(key.to_string()),
                sink: Some(&self.errors),
            },
            None => {
                self.record_error(format!("block({key}): no such block"));
                Block::muted()
            }
        }
    }

    /// A block over a single list entry, sharing this extractor's error
    /// sink. Used when a path yields a list whose elements are
    /// themselves positional records.
    pub fn entry_block<'a>(&'a self, data: &'a Value) -> Block<'a> {
        Block {
            data: Some(data),
            label: None,
            sink: Some(&self.errors),
        }
    }

    /// Open a block through the `rpc_id → ds key` indirection table.
    ///
    /// The `ds:N` numbering shifts between countries while the RPC ids
    /// stay stable, so this is the robust way in for HTML payloads.
    pub fn block_by_rpc_id(&self, rpc_id: &str) -> Block<'_> {
        match self.service_request_ids.get(rpc_id) {
            Some(key) => self.block(key),
            None => {
                self.record_error(format!("block_by_rpc_id({rpc_id}): no such service request id"));
                Block::muted()
            }
        }
    }
}

/// A pinned root within a payload; all paths are relative to it.
pub(crate) struct Block<'a> {
    data: Option<&'a Value>,
    label: Option<String>,
    sink: Option<&'a RefCell<Vec<String>>>,
}

impl<'a> Block<'a> {
    fn muted() -> Self {
        Self {
            data: None,
            label: None,
            sink: None,
        }
    }

    fn error(&self, func: &str, path: &str, message: &str) {
        if let Some(sink) = self.sink {
            let entry = match &self.label {
                Some(label) => format!("{func}({label}, {path}): {message}"),
                None => format!("{func}({path}): {message}"),
            };
            sink.borrow_mut().push(entry);
        }
    }

    /// Resolve a path without recording errors. Missing indices and
    /// type mismatches along the way yield `None`.
    pub fn json(&self, path: &str) -> Option<&'a Value> {
        let segments = parse_path(path)?;
        let mut current = self.data?;

        for segment in segments {
            match segment {
                Segment::Index(i) => {
                    current = current.as_array()?.get(i)?;
                }
                Segment::Wildcard => return None,
            }
        }

        Some(current)
    }

    /// Resolve a path containing a `#` wildcard, producing one value
    /// per element of the projected array.
    pub fn values(&self, path: &str) -> Vec<&'a Value> {
        let Some(segments) = parse_path(path) else {
            return Vec::new();
        };
        let Some(root) = self.data else {
            return Vec::new();
        };

        let mut results = Vec::new();
        project(root, &segments, &mut results);
        results
    }

    pub fn get_bool(&self, path: &str) -> bool {
        match self.json(path) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => {
                self.error("get_bool", path, "wrong type");
                false
            }
        }
    }

    pub fn get_int(&self, path: &str) -> i64 {
        match self.json(path) {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    i
                } else if let Some(f) = n.as_f64() {
                    if f == f.trunc() && f <= i64::MAX as f64 {
                        f as i64
                    } else {
                        self.error("get_int", path, "number is not an integer");
                        0
                    }
                } else {
                    self.error("get_int", path, "cannot convert number to integer");
                    0
                }
            }
            _ => {
                self.error("get_int", path, "wrong type");
                0
            }
        }
    }

    pub fn get_float(&self, path: &str) -> f64 {
        match self.json(path) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or_else(|| {
                self.error("get_float", path, "cannot convert number to float");
                0.0
            }),
            _ => {
                self.error("get_float", path, "wrong type");
                0.0
            }
        }
    }

    pub fn get_string(&self, path: &str) -> String {
        match self.json(path) {
            Some(Value::String(s)) => s.clone(),
            _ => {
                self.error("get_string", path, "wrong type");
                String::new()
            }
        }
    }

    /// Numbers that upstream sometimes serializes as strings (install
    /// counts, histogram buckets). Either form is accepted.
    pub fn get_number_as_string(&self, path: &str) -> String {
        match self.json(path) {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if s.parse::<f64>().is_ok() => s.clone(),
            _ => {
                self.error("get_number_as_string", path, "not a number");
                String::new()
            }
        }
    }

    pub fn optional_string(&self, path: &str) -> Option<String> {
        match self.json(path) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.error("optional_string", path, "wrong type");
                None
            }
        }
    }

    pub fn optional_int(&self, path: &str) -> Option<i64> {
        match self.json(path) {
            None | Some(Value::Null) => None,
            Some(_) => Some(self.get_int(path)),
        }
    }

    pub fn optional_float(&self, path: &str) -> Option<f64> {
        match self.json(path) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(_) => {
                self.error("optional_float", path, "wrong type");
                None
            }
        }
    }

    pub fn string_slice(&self, path: &str) -> Vec<String> {
        self.values(path)
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s.clone()),
                _ => {
                    self.error("string_slice", path, "element has wrong type");
                    None
                }
            })
            .collect()
    }

    pub fn float_slice(&self, path: &str) -> Vec<f64> {
        self.values(path)
            .into_iter()
            .filter_map(|value| match value {
                Value::Number(n) => n.as_f64(),
                _ => {
                    self.error("float_slice", path, "element has wrong type");
                    None
                }
            })
            .collect()
    }

    pub fn optional_float_slice(&self, path: &str) -> Vec<Option<f64>> {
        self.values(path)
            .into_iter()
            .map(|value| match value {
                Value::Null => None,
                Value::Number(n) => n.as_f64(),
                _ => {
                    self.error("optional_float_slice", path, "element has wrong type");
                    None
                }
            })
            .collect()
    }
}

fn project<'a>(current: &'a Value, segments: &[Segment], out: &mut Vec<&'a Value>) {
    match segments.split_first() {
        None => out.push(current),
        Some((Segment::Index(i), rest)) => {
            if let Some(next) = current.as_array().and_then(|a| a.get(*i)) {
                project(next, rest, out);
            }
        }
        Some((Segment::Wildcard, rest)) => {
            if let Some(array) = current.as_array() {
                for element in array {
                    project(element, rest, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor_with(key: &str, value: Value) -> Extractor {
        let mut blocks = HashMap::new();
        blocks.insert(key.to_string(), value);
        Extractor::new(blocks, HashMap::new())
    }

    #[test]
    fn test_get_string_returns_value() {
        let extractor = extractor_with("ds:6", json!([["title"]]));
        let block = extractor.block("ds:6");

        assert_eq!(block.get_string("0.0"), "title");
        assert!(!extractor.has_errors());
    }

    #[test]
    fn test_get_string_wrong_type_records_one_error() {
        let extractor = extractor_with("ds:6", json!([[42]]));
        let block = extractor.block("ds:6");

        assert_eq!(block.get_string("0.0"), "");
        assert_eq!(extractor.errors().len(), 1);

        // Idempotent result; the error report grows per probe.
        assert_eq!(block.get_string("0.0"), "");
        assert_eq!(extractor.errors().len(), 2);
    }

    #[test]
    fn test_missing_block_is_fatal_but_muted() {
        let extractor = extractor_with("ds:6", json!([]));
        let block = extractor.block("ds:99");

        // The missing block itself is the only recorded error.
        assert_eq!(block.get_string("0.0"), "");
        assert_eq!(block.get_int("1"), 0);
        assert_eq!(extractor.errors(), vec!["block(ds:99): no such block"]);
    }

    #[test]
    fn test_rpc_id_indirection() {
        let mut blocks = HashMap::new();
        blocks.insert("ds:3".to_string(), json!(["via-rpc"]));
        let mut ids = HashMap::new();
        ids.insert("UsvDTd".to_string(), "ds:3".to_string());

        let extractor = Extractor::new(blocks, ids);
        assert_eq!(extractor.block_by_rpc_id("UsvDTd").get_string("0"), "via-rpc");
        assert!(!extractor.has_errors());

        extractor.block_by_rpc_id("missing");
        assert_eq!(extractor.errors().len(), 1);
    }

    #[test]
    fn test_bool_coercions() {
        let extractor = extractor_with("b", json!([true, 0, 3.5, "", "yes", null]));
        let block = extractor.block("b");

        assert!(block.get_bool("0"));
        assert!(!block.get_bool("1"));
        assert!(block.get_bool("2"));
        assert!(!block.get_bool("3"));
        assert!(block.get_bool("4"));
        assert!(!block.get_bool("5"));
        assert!(!block.get_bool("17")); // missing index is silently false
        assert!(!extractor.has_errors());
    }

    #[test]
    fn test_int_coercions() {
        let extractor = extractor_with("i", json!([7, 7.0, 7.5, "7"]));
        let block = extractor.block("i");

        assert_eq!(block.get_int("0"), 7);
        assert_eq!(block.get_int("1"), 7);
        assert_eq!(block.get_int("2"), 0); // lossy float coercion
        assert_eq!(block.get_int("3"), 0); // strings are not silently numeric
        assert_eq!(extractor.errors().len(), 2);
    }

    #[test]
    fn test_number_as_string() {
        let extractor = extractor_with("n", json!([50000000, "50000000", "not a number"]));
        let block = extractor.block("n");

        assert_eq!(block.get_number_as_string("0"), "50000000");
        assert_eq!(block.get_number_as_string("1"), "50000000");
        assert_eq!(block.get_number_as_string("2"), "");
        assert_eq!(extractor.errors().len(), 1);
    }

    #[test]
    fn test_optional_variants() {
        let extractor = extractor_with("o", json!([null, "text", 1.25]));
        let block = extractor.block("o");

        assert_eq!(block.optional_string("0"), None);
        assert_eq!(block.optional_string("9"), None);
        assert_eq!(block.optional_string("1"), Some("text".to_string()));
        assert_eq!(block.optional_float("2"), Some(1.25));
        assert_eq!(block.optional_int("0"), None);
        assert!(!extractor.has_errors());
    }

    #[test]
    fn test_wildcard_projection() {
        let extractor = extractor_with(
            "s",
            json!([[[0, ["a", "b", "https://one"]], [0, ["a", "b", "https://two"]]]]),
        );
        let block = extractor.block("s");

        assert_eq!(
            block.string_slice("0.#.1.2"),
            vec!["https://one".to_string(), "https://two".to_string()]
        );
    }

    #[test]
    fn test_optional_float_slice_keeps_positions() {
        let extractor = extractor_with("f", json!([[1.0, null, 3.0]]));
        let block = extractor.block("f");

        assert_eq!(
            block.optional_float_slice("0.#"),
            vec![Some(1.0), None, Some(3.0)]
        );
    }
}
