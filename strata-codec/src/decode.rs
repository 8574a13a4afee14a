//! Streaming tag decoder
//!
//! A [`TagDecoder`] is created per stream. Callers queue top-level read
//! requests ([`TagDecoder::read_value`] / [`TagDecoder::read_object`]) and
//! push bytes through [`TagDecoder::feed`]; requests resolve in FIFO order,
//! each potentially spanning many feeds. Decoding never blocks: when the
//! buffered bytes run out mid-value, the open frames stay suspended on an
//! explicit stack until more data arrives.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use smallvec::SmallVec;
use tokio::sync::oneshot;

use strata_format::{
    DecodeLimits, NamedTag, Result, StrataError, Tag, TagList, TagObject, TagType,
};

/// Terminal decode failure, replayed to every subsequent request
#[derive(Debug, Clone)]
enum DecodeFailure {
    UnknownTagType(u8),
    ExpectedObject(u8),
    Truncated,
    NegativeLength(i32),
    DuplicateName(String),
    LimitExceeded(String),
    Internal(&'static str),
}

impl DecodeFailure {
    fn to_error(&self) -> StrataError {
        match self {
            DecodeFailure::UnknownTagType(id) => StrataError::UnknownTagType(*id),
            DecodeFailure::ExpectedObject(id) => StrataError::ExpectedObject(*id),
            DecodeFailure::Truncated => StrataError::TruncatedInput,
            DecodeFailure::NegativeLength(len) => StrataError::NegativeLength(*len),
            DecodeFailure::DuplicateName(name) => {
                StrataError::InvalidArgument(format!("Duplicate object entry {name:?}"))
            }
            DecodeFailure::LimitExceeded(what) => StrataError::LimitExceeded(what.clone()),
            DecodeFailure::Internal(what) => StrataError::Internal((*what).to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Value,
    Object,
}

struct Request {
    kind: RequestKind,
    tx: oneshot::Sender<Result<Option<NamedTag>>>,
}

/// Value passed back to a parent frame when a child completes
enum Produced {
    /// A finished value
    Tag(Tag),
    /// A finished named entry, or None for an End terminator
    Entry(Option<(String, Tag)>),
}

/// One suspended level of the recursive parse
enum Frame {
    /// Discriminant byte, name string, then a child value
    NamedEntry { name: Option<String> },
    /// Named entries until an End discriminant
    Object { entries: Vec<(String, Tag)> },
    /// Element discriminant, element count, then that many values
    List {
        element: Option<u8>,
        len: Option<usize>,
        values: Vec<Tag>,
    },
    /// ByteArray / IntArray: length prefix then incremental fill
    Blob {
        int_array: bool,
        target: Option<usize>,
        data: Vec<u8>,
    },
    /// Fixed-width scalar or length-prefixed string
    Scalar { ty: TagType },
}

enum FrameStep {
    /// Not enough buffered bytes; frame position unchanged
    Stall,
    /// Recurse into a child value
    Push(Frame),
    /// Frame finished
    Produce(Produced),
    /// Format violation
    Fail(DecodeFailure),
}

enum StackOutcome {
    Stalled,
    Complete(Option<(String, Tag)>),
    Failed(DecodeFailure),
}

/// Future resolving to the next top-level value
pub struct ReadValue {
    rx: oneshot::Receiver<Result<Option<NamedTag>>>,
}

impl Future for ReadValue {
    type Output = Result<Option<NamedTag>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|res| match res {
            Ok(value) => value,
            Err(_) => Err(StrataError::Internal(
                "Decoder dropped before resolving request".to_string(),
            )),
        })
    }
}

/// Future resolving to the next top-level object and its name
pub struct ReadObject {
    rx: oneshot::Receiver<Result<Option<NamedTag>>>,
}

impl Future for ReadObject {
    type Output = Result<Option<(String, TagObject)>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|res| match res {
            Ok(Ok(Some(NamedTag {
                name,
                tag: Tag::Object(obj),
            }))) => Ok(Some((name, obj))),
            Ok(Ok(Some(_))) => Err(StrataError::Internal(
                "Object request resolved with a non-object value".to_string(),
            )),
            Ok(Ok(None)) => Ok(None),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StrataError::Internal(
                "Decoder dropped before resolving request".to_string(),
            )),
        })
    }
}

/// Incremental, suspendable parser for the tag wire format
pub struct TagDecoder {
    buf: Vec<u8>,
    pos: usize,
    ended: bool,
    failure: Option<DecodeFailure>,
    stack: SmallVec<[Frame; 8]>,
    queue: VecDeque<Request>,
    current: Option<Request>,
    limits: DecodeLimits,
}

impl Default for TagDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TagDecoder {
    /// Decoder with default limits
    pub fn new() -> Self {
        Self::with_limits(DecodeLimits::default())
    }

    /// Decoder with explicit limits
    pub fn with_limits(limits: DecodeLimits) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            ended: false,
            failure: None,
            stack: SmallVec::new(),
            queue: VecDeque::new(),
            current: None,
            limits,
        }
    }

    /// Append bytes and make progress on pending requests
    ///
    /// The unconsumed tail of the previous feed is retained by compaction.
    /// Returns true once every queued request is satisfied, meaning the
    /// caller can stop fetching input; any surplus bytes stay buffered for
    /// requests queued later.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<bool> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        if self.ended {
            return Err(StrataError::InvalidArgument(
                "Feed after end of stream".to_string(),
            ));
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
        self.drive();
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        Ok(self.current.is_none() && self.queue.is_empty())
    }

    /// Signal that no further bytes will arrive
    ///
    /// A request still starved of bytes mid-value fails with a truncation
    /// error; queued requests that never started resolve to `None`.
    pub fn end(&mut self) -> Result<()> {
        self.ended = true;
        self.drive();
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        Ok(())
    }

    /// Request the next top-level value
    ///
    /// Resolves to `None` once the stream has ended with no further value.
    pub fn read_value(&mut self) -> ReadValue {
        ReadValue {
            rx: self.enqueue(RequestKind::Value),
        }
    }

    /// Request the next top-level value, requiring it to be an Object
    pub fn read_object(&mut self) -> ReadObject {
        ReadObject {
            rx: self.enqueue(RequestKind::Object),
        }
    }

    fn enqueue(&mut self, kind: RequestKind) -> oneshot::Receiver<Result<Option<NamedTag>>> {
        let (tx, rx) = oneshot::channel();
        if let Some(failure) = &self.failure {
            let _ = tx.send(Err(failure.to_error()));
            return rx;
        }
        self.queue.push_back(Request { kind, tx });
        self.drive();
        rx
    }

    /// Drive queued requests as far as the buffered bytes allow
    fn drive(&mut self) {
        if self.failure.is_some() {
            return;
        }
        loop {
            if self.current.is_none() {
                match self.queue.pop_front() {
                    Some(request) => self.current = Some(request),
                    None => return,
                }
            }
            if self.stack.is_empty() {
                if self.pos >= self.buf.len() {
                    if self.ended {
                        self.resolve(Ok(None));
                        continue;
                    }
                    return;
                }
                // Peek the discriminant without consuming so a stalled name
                // read can re-derive it on the next feed.
                let disc = self.buf[self.pos];
                let kind = match &self.current {
                    Some(request) => request.kind,
                    None => return,
                };
                if kind == RequestKind::Object && disc != TagType::Object as u8 {
                    self.fail(DecodeFailure::ExpectedObject(disc));
                    return;
                }
                self.stack.push(Frame::NamedEntry { name: None });
            }
            match self.step_stack() {
                StackOutcome::Stalled => {
                    if self.ended {
                        self.fail(DecodeFailure::Truncated);
                    }
                    return;
                }
                StackOutcome::Failed(failure) => {
                    self.fail(failure);
                    return;
                }
                StackOutcome::Complete(entry) => {
                    self.resolve(Ok(entry.map(|(name, tag)| NamedTag { name, tag })));
                }
            }
        }
    }

    /// Step the frame stack until it empties, stalls, or fails
    fn step_stack(&mut self) -> StackOutcome {
        let mut returned: Option<Produced> = None;
        loop {
            let mut frame = match self.stack.pop() {
                Some(frame) => frame,
                None => {
                    return StackOutcome::Failed(DecodeFailure::Internal(
                        "Decoder stack empty mid-step",
                    ))
                }
            };
            match self.step_frame(&mut frame, returned.take()) {
                FrameStep::Stall => {
                    self.stack.push(frame);
                    return StackOutcome::Stalled;
                }
                FrameStep::Push(child) => {
                    self.stack.push(frame);
                    if self.stack.len() >= self.limits.max_depth {
                        return StackOutcome::Failed(DecodeFailure::LimitExceeded(format!(
                            "Nesting depth over {}",
                            self.limits.max_depth
                        )));
                    }
                    self.stack.push(child);
                }
                FrameStep::Fail(failure) => return StackOutcome::Failed(failure),
                FrameStep::Produce(produced) => {
                    if self.stack.is_empty() {
                        return match produced {
                            Produced::Entry(entry) => StackOutcome::Complete(entry),
                            Produced::Tag(_) => StackOutcome::Failed(DecodeFailure::Internal(
                                "Top-level frame produced a bare value",
                            )),
                        };
                    }
                    returned = Some(produced);
                }
            }
        }
    }

    fn step_frame(&mut self, frame: &mut Frame, returned: Option<Produced>) -> FrameStep {
        match frame {
            Frame::NamedEntry { name } => self.step_named_entry(name, returned),
            Frame::Object { entries } => Self::step_object(entries, returned),
            Frame::List {
                element,
                len,
                values,
            } => self.step_list(element, len, values, returned),
            Frame::Blob {
                int_array,
                target,
                data,
            } => self.step_blob(*int_array, target, data),
            Frame::Scalar { ty } => self.step_scalar(*ty),
        }
    }

    fn step_named_entry(
        &mut self,
        name: &mut Option<String>,
        returned: Option<Produced>,
    ) -> FrameStep {
        if let Some(produced) = returned {
            let tag = match produced {
                Produced::Tag(tag) => tag,
                Produced::Entry(_) => {
                    return FrameStep::Fail(DecodeFailure::Internal(
                        "Named entry received an entry from its child",
                    ))
                }
            };
            let name = match name.take() {
                Some(name) => name,
                None => {
                    return FrameStep::Fail(DecodeFailure::Internal(
                        "Named entry completed without a name",
                    ))
                }
            };
            return FrameStep::Produce(Produced::Entry(Some((name, tag))));
        }
        if self.pos >= self.buf.len() {
            return FrameStep::Stall;
        }
        let disc = self.buf[self.pos];
        self.pos += 1;
        if disc == TagType::End as u8 {
            return FrameStep::Produce(Produced::Entry(None));
        }
        match self.read_string() {
            Some(read) => {
                let ty = match TagType::from_u8(disc) {
                    Ok(ty) => ty,
                    Err(_) => return FrameStep::Fail(DecodeFailure::UnknownTagType(disc)),
                };
                *name = Some(read);
                match self.frame_for(ty) {
                    Ok(child) => FrameStep::Push(child),
                    Err(failure) => FrameStep::Fail(failure),
                }
            }
            None => {
                // Unread the speculatively consumed discriminant so the next
                // feed re-derives it.
                self.pos -= 1;
                FrameStep::Stall
            }
        }
    }

    fn step_object(
        entries: &mut Vec<(String, Tag)>,
        returned: Option<Produced>,
    ) -> FrameStep {
        match returned {
            Some(Produced::Entry(Some((name, tag)))) => {
                if entries.iter().any(|(existing, _)| *existing == name) {
                    return FrameStep::Fail(DecodeFailure::DuplicateName(name));
                }
                entries.push((name, tag));
                FrameStep::Push(Frame::NamedEntry { name: None })
            }
            Some(Produced::Entry(None)) => {
                let entries = std::mem::take(entries);
                match TagObject::from_entries(entries) {
                    Ok(obj) => FrameStep::Produce(Produced::Tag(Tag::Object(obj))),
                    Err(_) => FrameStep::Fail(DecodeFailure::Internal(
                        "Object entries failed revalidation",
                    )),
                }
            }
            Some(Produced::Tag(_)) => FrameStep::Fail(DecodeFailure::Internal(
                "Object received a bare value from its child",
            )),
            None => FrameStep::Push(Frame::NamedEntry { name: None }),
        }
    }

    fn step_list(
        &mut self,
        element: &mut Option<u8>,
        len: &mut Option<usize>,
        values: &mut Vec<Tag>,
        returned: Option<Produced>,
    ) -> FrameStep {
        if let Some(produced) = returned {
            match produced {
                Produced::Tag(tag) => values.push(tag),
                Produced::Entry(_) => {
                    return FrameStep::Fail(DecodeFailure::Internal(
                        "List received an entry from its child",
                    ))
                }
            }
        }
        let element = match element {
            Some(element) => *element,
            None => {
                if self.pos >= self.buf.len() {
                    return FrameStep::Stall;
                }
                let disc = self.buf[self.pos];
                self.pos += 1;
                *element = Some(disc);
                disc
            }
        };
        let len = match len {
            Some(len) => *len,
            None => {
                let raw = match self.read_i32() {
                    Some(raw) => raw,
                    None => return FrameStep::Stall,
                };
                if raw < 0 {
                    return FrameStep::Fail(DecodeFailure::NegativeLength(raw));
                }
                let count = raw as usize;
                if count > self.limits.max_list_len {
                    return FrameStep::Fail(DecodeFailure::LimitExceeded(format!(
                        "List length {count} over limit"
                    )));
                }
                *len = Some(count);
                count
            }
        };
        if values.len() == len {
            let element_type = match TagType::from_u8(element) {
                Ok(ty) => ty,
                Err(_) => return FrameStep::Fail(DecodeFailure::UnknownTagType(element)),
            };
            let values = std::mem::take(values);
            return match TagList::new(element_type, values) {
                Ok(list) => FrameStep::Produce(Produced::Tag(Tag::List(list))),
                Err(_) => FrameStep::Fail(DecodeFailure::Internal(
                    "List elements failed revalidation",
                )),
            };
        }
        let ty = match TagType::from_u8(element) {
            Ok(TagType::End) | Err(_) => {
                return FrameStep::Fail(DecodeFailure::UnknownTagType(element))
            }
            Ok(ty) => ty,
        };
        match self.frame_for(ty) {
            Ok(child) => FrameStep::Push(child),
            Err(failure) => FrameStep::Fail(failure),
        }
    }

    fn step_blob(
        &mut self,
        int_array: bool,
        target: &mut Option<usize>,
        data: &mut Vec<u8>,
    ) -> FrameStep {
        let target = match target {
            Some(target) => *target,
            None => {
                let raw = match self.read_i32() {
                    Some(raw) => raw,
                    None => return FrameStep::Stall,
                };
                if raw < 0 {
                    return FrameStep::Fail(DecodeFailure::NegativeLength(raw));
                }
                let bytes = if int_array {
                    match (raw as usize).checked_mul(4) {
                        Some(bytes) => bytes,
                        None => {
                            return FrameStep::Fail(DecodeFailure::LimitExceeded(
                                "Int array length overflows".to_string(),
                            ))
                        }
                    }
                } else {
                    raw as usize
                };
                if bytes > self.limits.max_array_bytes {
                    return FrameStep::Fail(DecodeFailure::LimitExceeded(format!(
                        "Array of {bytes} bytes over limit"
                    )));
                }
                *target = Some(bytes);
                bytes
            }
        };
        while data.len() < target {
            if self.pos >= self.buf.len() {
                return FrameStep::Stall;
            }
            let needed = target - data.len();
            let available = self.buf.len() - self.pos;
            let take = needed.min(available);
            data.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }
        let payload = Bytes::from(std::mem::take(data));
        let tag = if int_array {
            Tag::IntArray(payload)
        } else {
            Tag::ByteArray(payload)
        };
        FrameStep::Produce(Produced::Tag(tag))
    }

    fn step_scalar(&mut self, ty: TagType) -> FrameStep {
        let tag = match ty {
            TagType::Byte => match self.take(1) {
                Some(bytes) => Tag::Byte(bytes[0] as i8),
                None => return FrameStep::Stall,
            },
            TagType::Short => match self.take(2) {
                Some(bytes) => Tag::Short(i16::from_be_bytes([bytes[0], bytes[1]])),
                None => return FrameStep::Stall,
            },
            TagType::Int => match self.read_i32() {
                Some(value) => Tag::Int(value),
                None => return FrameStep::Stall,
            },
            TagType::Long => match self.take(8) {
                Some(bytes) => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    Tag::Long(i64::from_be_bytes(raw))
                }
                None => return FrameStep::Stall,
            },
            TagType::Float => match self.take(4) {
                Some(bytes) => Tag::Float(f32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])),
                None => return FrameStep::Stall,
            },
            TagType::Double => match self.take(8) {
                Some(bytes) => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    Tag::Double(f64::from_be_bytes(raw))
                }
                None => return FrameStep::Stall,
            },
            TagType::String => match self.read_string() {
                Some(value) => Tag::String(value),
                None => return FrameStep::Stall,
            },
            _ => {
                return FrameStep::Fail(DecodeFailure::Internal(
                    "Composite type dispatched to scalar frame",
                ))
            }
        };
        FrameStep::Produce(Produced::Tag(tag))
    }

    fn frame_for(&self, ty: TagType) -> std::result::Result<Frame, DecodeFailure> {
        Ok(match ty {
            TagType::End => return Err(DecodeFailure::UnknownTagType(0)),
            TagType::Object => Frame::Object {
                entries: Vec::new(),
            },
            TagType::List => Frame::List {
                element: None,
                len: None,
                values: Vec::new(),
            },
            TagType::ByteArray => Frame::Blob {
                int_array: false,
                target: None,
                data: Vec::new(),
            },
            TagType::IntArray => Frame::Blob {
                int_array: true,
                target: None,
                data: Vec::new(),
            },
            scalar => Frame::Scalar { ty: scalar },
        })
    }

    /// Consume `n` bytes if buffered, advancing the cursor
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let start = self.pos;
        self.pos += n;
        Some(&self.buf[start..start + n])
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.take(4)
            .map(|bytes| i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume a 2-byte-length-prefixed UTF-8 string, or nothing at all
    fn read_string(&mut self) -> Option<String> {
        if self.pos + 2 > self.buf.len() {
            return None;
        }
        let len = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]) as usize;
        if self.pos + 2 + len > self.buf.len() {
            return None;
        }
        let start = self.pos + 2;
        let text = String::from_utf8_lossy(&self.buf[start..start + len]).into_owned();
        self.pos += 2 + len;
        Some(text)
    }

    fn resolve(&mut self, result: Result<Option<NamedTag>>) {
        if let Some(request) = self.current.take() {
            // Receiver may have been abandoned; that is the caller's timeout
            // strategy, not an error here.
            let _ = request.tx.send(result);
        }
    }

    /// Record the terminal failure and replay it to every pending request
    fn fail(&mut self, failure: DecodeFailure) {
        if self.failure.is_some() {
            return;
        }
        self.failure = Some(failure.clone());
        self.stack.clear();
        if let Some(request) = self.current.take() {
            let _ = request.tx.send(Err(failure.to_error()));
        }
        while let Some(request) = self.queue.pop_front() {
            let _ = request.tx.send(Err(failure.to_error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_named_tag;

    fn decode_one(bytes: &[u8]) -> Result<Option<NamedTag>> {
        let mut decoder = TagDecoder::new();
        let fut = decoder.read_value();
        decoder.feed(bytes)?;
        decoder.end()?;
        poll_now(fut)
    }

    fn poll_now<F: Future>(fut: F) -> F::Output {
        // Requests resolve synchronously inside feed/end; a noop waker poll
        // just collects the result.
        let mut fut = Box::pin(fut);
        let waker = futures_noop_waker();
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(out) => out,
            Poll::Pending => panic!("request did not resolve synchronously"),
        }
    }

    fn futures_noop_waker() -> std::task::Waker {
        struct NoopWake;
        impl std::task::Wake for NoopWake {
            fn wake(self: std::sync::Arc<Self>) {}
        }
        std::task::Waker::from(std::sync::Arc::new(NoopWake))
    }

    #[test]
    fn decodes_simple_named_int() {
        let bytes = encode_named_tag("X", &Tag::Int(42)).unwrap();
        let named = decode_one(&bytes).unwrap().unwrap();
        assert_eq!(named.name, "X");
        assert_eq!(named.tag, Tag::Int(42));
    }

    #[test]
    fn resolves_none_on_empty_ended_stream() {
        let result = decode_one(&[]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn unknown_discriminant_fails_and_replays() {
        let mut decoder = TagDecoder::new();
        let first = decoder.read_value();
        let second = decoder.read_value();
        assert!(matches!(
            decoder.feed(&[99, 0, 0]),
            Err(StrataError::UnknownTagType(99))
        ));
        assert!(matches!(
            poll_now(first),
            Err(StrataError::UnknownTagType(99))
        ));
        assert!(matches!(
            poll_now(second),
            Err(StrataError::UnknownTagType(99))
        ));
        // Requests queued after the failure resolve identically.
        let late = decoder.read_value();
        assert!(matches!(
            poll_now(late),
            Err(StrataError::UnknownTagType(99))
        ));
    }

    #[test]
    fn truncated_value_fails_at_end() {
        let bytes = encode_named_tag("X", &Tag::Int(42)).unwrap();
        let mut decoder = TagDecoder::new();
        let fut = decoder.read_value();
        decoder.feed(&bytes[..bytes.len() - 2]).unwrap();
        assert!(matches!(decoder.end(), Err(StrataError::TruncatedInput)));
        assert!(matches!(poll_now(fut), Err(StrataError::TruncatedInput)));
    }

    #[test]
    fn read_object_rejects_non_object() {
        let bytes = encode_named_tag("X", &Tag::Int(42)).unwrap();
        let mut decoder = TagDecoder::new();
        let fut = decoder.read_object();
        assert!(matches!(
            decoder.feed(&bytes),
            Err(StrataError::ExpectedObject(3))
        ));
        assert!(matches!(
            poll_now(fut),
            Err(StrataError::ExpectedObject(3))
        ));
    }

    #[test]
    fn stalled_name_rolls_back_discriminant() {
        let bytes = encode_named_tag("LongishName", &Tag::Byte(7)).unwrap();
        let mut decoder = TagDecoder::new();
        let fut = decoder.read_value();
        // Split inside the name's length prefix: the discriminant byte must
        // be rolled back and re-derived on the next feed.
        decoder.feed(&bytes[..2]).unwrap();
        decoder.feed(&bytes[2..]).unwrap();
        decoder.end().unwrap();
        let named = poll_now(fut).unwrap().unwrap();
        assert_eq!(named.name, "LongishName");
        assert_eq!(named.tag, Tag::Byte(7));
    }

    #[test]
    fn negative_array_length_fails() {
        let mut bytes = vec![TagType::ByteArray as u8, 0, 0];
        bytes.extend_from_slice(&(-5i32).to_be_bytes());
        assert!(matches!(
            decode_one(&bytes),
            Err(StrataError::NegativeLength(-5))
        ));
    }

    #[test]
    fn depth_limit_enforced() {
        let limits = DecodeLimits {
            max_depth: 8,
            ..Default::default()
        };
        // Twelve nested objects under a tiny depth budget.
        let mut bytes = Vec::new();
        for _ in 0..12 {
            bytes.push(TagType::Object as u8);
            bytes.extend_from_slice(&[0, 1, b'a']);
        }
        let mut decoder = TagDecoder::with_limits(limits);
        let fut = decoder.read_value();
        assert!(matches!(
            decoder.feed(&bytes),
            Err(StrataError::LimitExceeded(_))
        ));
        assert!(matches!(poll_now(fut), Err(StrataError::LimitExceeded(_))));
    }

    #[test]
    fn duplicate_object_entry_fails() {
        let mut bytes = vec![TagType::Object as u8, 0, 0];
        for _ in 0..2 {
            bytes.push(TagType::Byte as u8);
            bytes.extend_from_slice(&[0, 1, b'x', 1]);
        }
        bytes.push(0);
        assert!(matches!(
            decode_one(&bytes),
            Err(StrataError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_list_keeps_element_type() {
        let mut obj = TagObject::new();
        obj.insert("empty", Tag::List(TagList::empty(TagType::End)));
        let bytes = encode_named_tag("", &Tag::Object(obj.clone())).unwrap();
        let named = decode_one(&bytes).unwrap().unwrap();
        assert_eq!(named.tag, Tag::Object(obj));
    }

    #[test]
    fn feed_reports_satisfaction() {
        let bytes = encode_named_tag("X", &Tag::Int(42)).unwrap();
        let mut decoder = TagDecoder::new();
        let _fut = decoder.read_value();
        assert!(!decoder.feed(&bytes[..3]).unwrap());
        assert!(decoder.feed(&bytes[3..]).unwrap());
    }

    #[test]
    fn fifo_across_multiple_requests() {
        let first = encode_named_tag("a", &Tag::Int(1)).unwrap();
        let second = encode_named_tag("b", &Tag::Int(2)).unwrap();
        let mut stream = first.to_vec();
        stream.extend_from_slice(&second);

        let mut decoder = TagDecoder::new();
        let fut_a = decoder.read_value();
        let fut_b = decoder.read_value();
        decoder.feed(&stream).unwrap();
        decoder.end().unwrap();
        assert_eq!(poll_now(fut_a).unwrap().unwrap().name, "a");
        assert_eq!(poll_now(fut_b).unwrap().unwrap().name, "b");
    }

    #[test]
    fn queued_request_after_last_value_resolves_none() {
        let bytes = encode_named_tag("only", &Tag::Int(1)).unwrap();
        let mut decoder = TagDecoder::new();
        let fut_a = decoder.read_value();
        let fut_b = decoder.read_value();
        decoder.feed(&bytes).unwrap();
        decoder.end().unwrap();
        assert!(poll_now(fut_a).unwrap().is_some());
        assert!(poll_now(fut_b).unwrap().is_none());
    }
}
