//! Self-describing tree codec backed by JSON.
//!
//! # Output
//! Every composite value becomes a node. A node is created in a *pending* state and only
//! materializes as an object or array when its first child is written, so a
//! [`SizeTag`] can still turn it into an array. Children of an object are named either by the
//! pending name-value pair or by an ordinal (`value0`, `value1`, ...); children of an array are
//! never named.
//!
//! ```text
//!              write child             size tag
//! StartObject ─────────────> InObject   StartObject ───> StartArray ──write──> InArray
//! ```
//!
//! The document is assembled in memory and rendered when the session finishes.
//!
//! # Input
//! The document is parsed up front. A stack of cursors tracks the position inside each open
//! node. Before each value is read the cursor is moved to the member carrying the expected
//! name, which lets callers read fields out of order or skip them. Without a name, values are
//! consumed in document order. The size of a sequence is the child count of its node.

use super::{Format, InputCodec, OutputCodec, Primitive, PrimitiveKind};
use crate::config::TreeOptions;
use crate::error::{ArchiveError, Result};
use crate::wrappers::SizeTag;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Number, Value};
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    StartObject,
    InObject,
    StartArray,
    InArray,
}

#[derive(Debug)]
struct Node {
    state: NodeState,
    name_counter: u32,
    /// Member name under which the finished node is attached to its parent.
    key: Option<String>,
    members: Map<String, Value>,
    values: Vec<Value>,
}

impl Node {
    fn new(key: Option<String>) -> Self {
        Self {
            state: NodeState::StartObject,
            name_counter: 0,
            key,
            members: Map::new(),
            values: Vec::new(),
        }
    }

    fn insert(&mut self, key: Option<String>, value: Value) {
        match self.state {
            NodeState::InArray | NodeState::StartArray => self.values.push(value),
            NodeState::InObject | NodeState::StartObject => {
                let key = key.unwrap_or_default();
                self.members.insert(key, value);
            }
        }
    }

    fn into_value(self) -> Value {
        match self.state {
            NodeState::StartArray | NodeState::InArray => Value::Array(self.values),
            NodeState::StartObject | NodeState::InObject => Value::Object(self.members),
        }
    }
}

fn float_to_json(value: f64) -> Value {
    if value.is_nan() {
        Value::String("NaN".into())
    } else if value.is_infinite() {
        Value::String(if value > 0.0 { "inf" } else { "-inf" }.into())
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn primitive_to_json(value: Primitive) -> Value {
    match value {
        Primitive::Bool(v) => Value::Bool(v),
        Primitive::Char(v) => Value::String(v.to_string()),
        Primitive::I8(v) => Value::from(v),
        Primitive::I16(v) => Value::from(v),
        Primitive::I32(v) => Value::from(v),
        Primitive::I64(v) => Value::from(v),
        Primitive::U8(v) => Value::from(v),
        Primitive::U16(v) => Value::from(v),
        Primitive::U32(v) => Value::from(v),
        Primitive::U64(v) => Value::from(v),
        // Wider than any JSON number parser guarantees.
        Primitive::I128(v) => Value::String(v.to_string()),
        Primitive::U128(v) => Value::String(v.to_string()),
        Primitive::F32(v) => float_to_json(f64::from(v)),
        Primitive::F64(v) => float_to_json(v),
    }
}

fn json_to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

macro_rules! int_from_json {
    ($value:expr, $variant:ident, $ty:ty, $getter:ident) => {
        $value
            .$getter()
            .and_then(|v| <$ty>::try_from(v).ok())
            .map(Primitive::$variant)
    };
}

macro_rules! wide_from_json {
    ($value:expr, $variant:ident, $ty:ty) => {
        match $value {
            Value::String(s) => s.parse::<$ty>().ok(),
            Value::Number(n) => n.to_string().parse::<$ty>().ok(),
            _ => None,
        }
        .map(Primitive::$variant)
    };
}

fn json_to_primitive(kind: PrimitiveKind, value: &Value) -> Result<Primitive> {
    let decoded = match kind {
        PrimitiveKind::Bool => value.as_bool().map(Primitive::Bool),
        PrimitiveKind::Char => value.as_str().and_then(|s| {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Primitive::Char(c)),
                _ => None,
            }
        }),
        PrimitiveKind::I8 => int_from_json!(value, I8, i8, as_i64),
        PrimitiveKind::I16 => int_from_json!(value, I16, i16, as_i64),
        PrimitiveKind::I32 => int_from_json!(value, I32, i32, as_i64),
        PrimitiveKind::I64 => int_from_json!(value, I64, i64, as_i64),
        PrimitiveKind::U8 => int_from_json!(value, U8, u8, as_u64),
        PrimitiveKind::U16 => int_from_json!(value, U16, u16, as_u64),
        PrimitiveKind::U32 => int_from_json!(value, U32, u32, as_u64),
        PrimitiveKind::U64 => int_from_json!(value, U64, u64, as_u64),
        PrimitiveKind::I128 => wide_from_json!(value, I128, i128),
        PrimitiveKind::U128 => wide_from_json!(value, U128, u128),
        PrimitiveKind::F32 => json_to_float(value).map(|v| Primitive::F32(v as f32)),
        PrimitiveKind::F64 => json_to_float(value).map(Primitive::F64),
    };
    decoded.ok_or_else(|| {
        ArchiveError::Malformed(format!("expected {kind:?}, found {} ({value})", json_kind(value)))
    })
}

/// Writes a JSON document.
#[derive(Debug)]
pub struct TreeOutput<W: Write> {
    writer: W,
    options: TreeOptions,
    nodes: Vec<Node>,
    next_name: Option<String>,
    finished: bool,
}

impl<W: Write> TreeOutput<W> {
    /// Creates a codec with an empty pending root node.
    pub fn new(writer: W, options: TreeOptions) -> Self {
        Self {
            writer,
            options,
            nodes: vec![Node::new(None)],
            next_name: None,
            finished: false,
        }
    }

    fn top(&mut self) -> Result<&mut Node> {
        if self.finished {
            return Err(ArchiveError::Internal("tree archive already finished".into()));
        }
        self.nodes
            .last_mut()
            .ok_or_else(|| ArchiveError::Internal("tree node stack is empty".into()))
    }

    /// Opens the current node if needed and produces the member name of the next child.
    fn write_name(&mut self) -> Result<Option<String>> {
        let pending = self.next_name.take();
        let node = self.top()?;
        match node.state {
            NodeState::StartArray => node.state = NodeState::InArray,
            NodeState::StartObject => node.state = NodeState::InObject,
            NodeState::InArray | NodeState::InObject => {}
        }
        if node.state == NodeState::InArray {
            return Ok(None);
        }
        Ok(Some(pending.unwrap_or_else(|| {
            let name = format!("value{}", node.name_counter);
            node.name_counter += 1;
            name
        })))
    }

    fn write_value(&mut self, value: Value) -> Result<()> {
        let key = self.write_name()?;
        self.top()?.insert(key, value);
        Ok(())
    }

    /// Converts the pending current node into an array.
    fn make_array(&mut self) -> Result<()> {
        let node = self.top()?;
        match node.state {
            NodeState::StartObject | NodeState::StartArray => {
                node.state = NodeState::StartArray;
                Ok(())
            }
            NodeState::InArray | NodeState::InObject => Err(ArchiveError::Internal(
                "size tag written after the node already received values".into(),
            )),
        }
    }
}

impl<W: Write> OutputCodec for TreeOutput<W> {
    fn format(&self) -> Format {
        Format::Tree
    }

    fn write_primitive(&mut self, value: Primitive) -> Result<()> {
        self.write_value(primitive_to_json(value))
    }

    fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_value(Value::String(value.to_owned()))
    }

    fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_value(Value::String(STANDARD.encode(bytes)))
    }

    fn write_size_tag(&mut self, _tag: SizeTag) -> Result<()> {
        self.make_array()
    }

    fn set_next_name(&mut self, name: &str) {
        self.next_name = Some(name.to_owned());
    }

    fn take_next_name(&mut self) -> Option<String> {
        self.next_name.take()
    }

    fn start_node(&mut self) -> Result<()> {
        let key = self.write_name()?;
        self.nodes.push(Node::new(key));
        Ok(())
    }

    fn finish_node(&mut self) -> Result<()> {
        if self.nodes.len() < 2 {
            return Err(ArchiveError::Internal("finish_node without a matching start_node".into()));
        }
        let node = self.nodes.pop().ok_or_else(|| ArchiveError::Internal("tree node stack is empty".into()))?;
        let key = node.key.clone();
        let value = node.into_value();
        self.top()?.insert(key, value);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        while self.nodes.len() > 1 {
            self.finish_node()?;
        }
        let root = self
            .nodes
            .pop()
            .ok_or_else(|| ArchiveError::Internal("tree node stack is empty".into()))?;
        self.finished = true;

        let document = root.into_value();
        match self.options.indent {
            Some(width) => {
                let indent = vec![b' '; width];
                let mut ser = Serializer::with_formatter(&mut self.writer, PrettyFormatter::with_indent(&indent));
                document.serialize(&mut ser)?;
            }
            None => serde_json::to_writer(&mut self.writer, &document)?,
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
enum Children {
    Members(Vec<(String, Value)>),
    Values(Vec<Value>),
}

#[derive(Debug)]
struct Cursor {
    children: Children,
    index: usize,
}

impl Cursor {
    fn over(value: Value) -> Result<Self> {
        let children = match value {
            Value::Object(map) => Children::Members(map.into_iter().collect()),
            Value::Array(values) => Children::Values(values),
            other => {
                return Err(ArchiveError::Malformed(format!(
                    "expected an object or an array, found {}",
                    json_kind(&other)
                )));
            }
        };
        Ok(Self { children, index: 0 })
    }

    fn len(&self) -> usize {
        match &self.children {
            Children::Members(m) => m.len(),
            Children::Values(v) => v.len(),
        }
    }

    fn name(&self) -> Option<&str> {
        match &self.children {
            Children::Members(m) => m.get(self.index).map(|(name, _)| name.as_str()),
            Children::Values(_) => None,
        }
    }

    fn take_value(&mut self) -> Result<Value> {
        let slot = match &mut self.children {
            Children::Members(m) => m.get_mut(self.index).map(|(_, v)| v),
            Children::Values(v) => v.get_mut(self.index),
        };
        slot.map(std::mem::take)
            .ok_or_else(|| ArchiveError::Malformed("no more values in the current node".into()))
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    fn search(&mut self, name: &str) -> Result<()> {
        if let Children::Members(members) = &self.children {
            match members.iter().position(|(member, _)| member == name) {
                Some(index) => self.index = index,
                None => return Err(ArchiveError::NameNotFound(name.to_owned())),
            }
        }
        Ok(())
    }
}

/// Reads a JSON document produced by [`TreeOutput`] or written by hand.
#[derive(Debug)]
pub struct TreeInput {
    cursors: Vec<Cursor>,
    next_name: Option<String>,
}

impl TreeInput {
    /// Parses the whole document from `reader`.
    pub fn new<R: Read>(reader: R) -> Result<Self> {
        let document: Value = serde_json::from_reader(reader)?;
        Self::from_value(document)
    }

    /// Reads from an already parsed document.
    pub fn from_value(document: Value) -> Result<Self> {
        Ok(Self {
            cursors: vec![Cursor::over(document)?],
            next_name: None,
        })
    }

    fn top(&mut self) -> Result<&mut Cursor> {
        self.cursors
            .last_mut()
            .ok_or_else(|| ArchiveError::Internal("tree cursor stack is empty".into()))
    }

    /// Moves the current cursor to the expected member, if a name was given and differs.
    fn search(&mut self) -> Result<()> {
        if let Some(name) = self.next_name.take() {
            let cursor = self.top()?;
            if cursor.name() != Some(name.as_str()) {
                cursor.search(&name)?;
            }
        }
        Ok(())
    }

    fn read_value(&mut self) -> Result<Value> {
        self.search()?;
        let cursor = self.top()?;
        let value = cursor.take_value()?;
        cursor.advance();
        Ok(value)
    }
}

impl InputCodec for TreeInput {
    fn format(&self) -> Format {
        Format::Tree
    }

    fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<Primitive> {
        let value = self.read_value()?;
        json_to_primitive(kind, &value)
    }

    fn read_string(&mut self) -> Result<String> {
        match self.read_value()? {
            Value::String(s) => Ok(s),
            other => Err(ArchiveError::Malformed(format!("expected a string, found {}", json_kind(&other)))),
        }
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let encoded = self.read_string()?;
        Ok(STANDARD.decode(encoded)?)
    }

    fn read_size_tag(&mut self) -> Result<SizeTag> {
        Ok(SizeTag(self.top()?.len() as u64))
    }

    fn set_next_name(&mut self, name: &str) {
        self.next_name = Some(name.to_owned());
    }

    fn take_next_name(&mut self) -> Option<String> {
        self.next_name.take()
    }

    fn start_node(&mut self) -> Result<()> {
        self.search()?;
        let value = self.top()?.take_value()?;
        self.cursors.push(Cursor::over(value)?);
        Ok(())
    }

    fn finish_node(&mut self) -> Result<()> {
        if self.cursors.len() < 2 {
            return Err(ArchiveError::Internal("finish_node without a matching start_node".into()));
        }
        self.cursors.pop();
        self.top()?.advance();
        Ok(())
    }

    fn safe_to_reserve(&self, count: u64, _element_size: usize) -> usize {
        // The children are already in memory.
        count.min(usize::MAX as u64) as usize
    }
}
